//! Cross-context transports.
//!
//! A [`SyncTransport`] is the "broadcast" delivery path: an unordered,
//! best-effort fan-out to other execution contexts of the same origin. The
//! in-process and storage-change paths are owned by the bus itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::debug;

use scratchboard_shared::constants::BROADCAST_CAPACITY;
use scratchboard_shared::{ContextId, SyncEnvelope};

use crate::error::{BusError, Result};

/// What travels over a transport: the envelope plus the posting context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub origin: ContextId,
    pub envelope: SyncEnvelope,
}

pub trait SyncTransport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Post a frame to every other listening context.
    fn post(&self, frame: &Frame) -> Result<()>;

    /// A receiver for frames posted by any context, or `None` when this
    /// transport cannot deliver anything.
    fn listen(&self) -> Option<broadcast::Receiver<Frame>>;
}

/// Shared medium for every context of one origin, keyed by channel name.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<Frame>>>>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the named channel. Every handle opened with the same name on the
    /// same hub sees the others' posts.
    pub fn channel(&self, name: &str) -> BroadcastChannel {
        let sender = match self.channels.lock() {
            Ok(mut channels) => channels
                .entry(name.to_string())
                .or_insert_with(|| broadcast::channel(BROADCAST_CAPACITY).0)
                .clone(),
            // A poisoned map still yields a working, if isolated, channel.
            Err(_) => broadcast::channel(BROADCAST_CAPACITY).0,
        };
        BroadcastChannel {
            name: name.to_string(),
            sender,
        }
    }
}

/// One context's handle on a named hub channel.
#[derive(Clone)]
pub struct BroadcastChannel {
    name: String,
    sender: broadcast::Sender<Frame>,
}

impl SyncTransport for BroadcastChannel {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn post(&self, frame: &Frame) -> Result<()> {
        match self.sender.send(frame.clone()) {
            Ok(receivers) => {
                debug!(
                    channel = %self.name,
                    receivers,
                    version = %frame.envelope.version,
                    "Broadcast frame posted"
                );
            }
            // Nobody listening yet, same as a broadcast with no other tabs open.
            Err(_) => debug!(channel = %self.name, "Broadcast frame had no listeners"),
        }
        Ok(())
    }

    fn listen(&self) -> Option<broadcast::Receiver<Frame>> {
        Some(self.sender.subscribe())
    }
}

/// Stand-in for runtimes without a broadcast primitive.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTransport;

impl SyncTransport for NoopTransport {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn post(&self, _frame: &Frame) -> Result<()> {
        Err(BusError::Unsupported(self.name()))
    }

    fn listen(&self) -> Option<broadcast::Receiver<Frame>> {
        None
    }
}
