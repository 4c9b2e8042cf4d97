// SPDX-FileCopyrightText: 2026 Butlers Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `butlers key` command implementation.
//!
//! Derives the idempotency key a submission would be stored under, which is
//! what an operator needs to find out why a send was treated as a duplicate.

use butlers_core::{ButlersError, DeliveryIntent};
use butlers_delivery::{DeliverySubmission, KeyComponents, RequestContext, derive_idempotency_key};
use clap::Args;
use serde::Serialize;

#[derive(Args, Debug)]
pub struct KeyArgs {
    /// Butler submitting the message.
    #[arg(long)]
    pub origin: String,

    /// `send` or `reply`.
    #[arg(long, default_value = "send")]
    pub intent: DeliveryIntent,

    #[arg(long)]
    pub channel: String,

    /// Recipient for `send`.
    #[arg(long)]
    pub recipient: Option<String>,

    #[arg(long)]
    pub message: String,

    #[arg(long)]
    pub subject: Option<String>,

    #[arg(long)]
    pub request_id: Option<String>,

    /// Source sender identity for `reply`.
    #[arg(long)]
    pub sender: Option<String>,

    /// Source thread identity for `reply`.
    #[arg(long)]
    pub thread: Option<String>,
}

impl KeyArgs {
    fn submission(&self) -> DeliverySubmission {
        let request_context = (self.sender.is_some() || self.thread.is_some()).then(|| {
            RequestContext {
                source_sender_identity: self.sender.clone(),
                source_thread_identity: self.thread.clone(),
                ..RequestContext::default()
            }
        });
        DeliverySubmission {
            request_id: self.request_id.clone(),
            origin_butler: self.origin.clone(),
            intent: self.intent,
            channel: self.channel.clone(),
            recipient: self.recipient.clone(),
            message: self.message.clone(),
            subject: self.subject.clone(),
            request_context,
            envelope: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Serialize)]
struct KeyOutput {
    idempotency_key: String,
    components: KeyComponents,
}

fn derive(args: &KeyArgs) -> Result<KeyOutput, ButlersError> {
    let (idempotency_key, components) = derive_idempotency_key(&args.submission())?;
    Ok(KeyOutput {
        idempotency_key,
        components,
    })
}

/// Run the `butlers key` command.
pub fn run_key(args: &KeyArgs) -> Result<(), ButlersError> {
    let output = derive(args)?;
    let json = serde_json::to_string_pretty(&output)
        .map_err(|e| ButlersError::Internal(format!("failed to render key: {e}")))?;
    println!("{json}");
    Ok(())
}
