//! Signed milestone notifications.
//!
//! The dispatcher is constructed by whoever owns a run and handed to the
//! components that emit. It only signs and queues envelopes; delivering them
//! (and retrying) belongs to whoever drains the receiver.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::{clog_debug, clog_warn};

type HmacSha256 = Hmac<Sha256>;

/// Pipeline milestones that produce a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    OrchestrationStarted,
    OrchestrationCompleted,
    TaskCompleted,
    ConsensusReached,
    CommitCreated,
    MergeCompleted,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrchestrationStarted => "orchestration_started",
            EventKind::OrchestrationCompleted => "orchestration_completed",
            EventKind::TaskCompleted => "task_completed",
            EventKind::ConsensusReached => "consensus_reached",
            EventKind::CommitCreated => "commit_created",
            EventKind::MergeCompleted => "merge_completed",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where envelopes go, and the key they are signed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDestination {
    pub url: String,
    pub secret: String,
}

impl WebhookDestination {
    pub fn new(url: &str, secret: &str) -> Self {
        Self {
            url: url.to_string(),
            secret: secret.to_string(),
        }
    }
}

/// The JSON body posted to a destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    /// Hex HMAC-SHA256 of `{event, timestamp, data}`.
    pub signature: String,
}

/// The signed portion of an envelope, in wire field order.
#[derive(Serialize)]
struct Signed<'a> {
    event: EventKind,
    timestamp: &'a DateTime<Utc>,
    data: &'a Value,
}

fn signed_bytes(event: EventKind, timestamp: &DateTime<Utc>, data: &Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Signed {
        event,
        timestamp,
        data,
    })?)
}

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Validation(format!("invalid signing key: {}", e)))
}

impl EventEnvelope {
    /// Build and sign an envelope.
    pub fn sign(
        event: EventKind,
        timestamp: DateTime<Utc>,
        data: Value,
        secret: &str,
    ) -> Result<Self> {
        let mut mac = mac(secret)?;
        mac.update(&signed_bytes(event, &timestamp, &data)?);
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(Self {
            event,
            timestamp,
            data,
            signature,
        })
    }

    /// Recompute the signature with `secret` and compare in constant time.
    pub fn verify(&self, secret: &str) -> bool {
        let Ok(expected) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(bytes) = signed_bytes(self.event, &self.timestamp, &self.data) else {
            return false;
        };
        match mac(secret) {
            Ok(mut mac) => {
                mac.update(&bytes);
                mac.verify_slice(&expected).is_ok()
            }
            Err(_) => false,
        }
    }
}

/// A signed envelope bound for one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEvent {
    pub url: String,
    pub envelope: EventEnvelope,
}

/// Signs milestone events once per destination and queues them.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    destinations: Vec<WebhookDestination>,
    tx: mpsc::UnboundedSender<OutboundEvent>,
}

impl EventDispatcher {
    pub fn new(
        destinations: Vec<WebhookDestination>,
    ) -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { destinations, tx }, rx)
    }

    pub fn destinations(&self) -> &[WebhookDestination] {
        &self.destinations
    }

    /// Queue `kind` with `data` for every destination. All destinations see
    /// the same timestamp. Returns how many envelopes were queued; signing or
    /// queueing failures are logged and skipped.
    pub fn emit(&self, kind: EventKind, data: Value) -> usize {
        let timestamp = Utc::now();
        let mut queued = 0;
        for destination in &self.destinations {
            let envelope =
                match EventEnvelope::sign(kind, timestamp, data.clone(), &destination.secret) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        clog_warn!("Could not sign {} for {}: {}", kind, destination.url, e);
                        continue;
                    }
                };
            let outbound = OutboundEvent {
                url: destination.url.clone(),
                envelope,
            };
            if self.tx.send(outbound).is_err() {
                clog_debug!("Event receiver dropped; {} not queued", kind);
                break;
            }
            queued += 1;
        }
        clog_debug!("Emitted {} to {} destination(s)", kind, queued);
        queued
    }
}
