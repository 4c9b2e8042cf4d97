// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Butlers integration tests.
//!
//! Provides a scriptable channel adapter and a harness that wires it to a
//! temp SQLite store and a delivery pipeline, so the full exactly-once path
//! runs without external services.
//!
//! # Components
//!
//! - [`MockChannel`] - Mock provider adapter with scripted results and send capture
//! - [`FaultyStore`] - Store wrapper that fails chosen writes on demand
//! - [`TestHarness`] - Temp storage, pipeline, and mock channel in one place

pub mod faulty_store;
pub mod harness;
pub mod mock_channel;

pub use faulty_store::{FaultyStore, StoreFault};
pub use harness::TestHarness;
pub use mock_channel::MockChannel;
