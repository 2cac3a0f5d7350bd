//! Background delivery of remote envelopes.
//!
//! The listener task awaits both remote paths and fans each new envelope out
//! to the bus's local handlers. It holds only a weak reference to the bus and
//! stops once the bus is dropped or both paths close.

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scratchboard_store::StorageChange;

use crate::bus::{lock, SyncBus};
use crate::transport::Frame;

enum Incoming {
    Frame(Result<Frame, RecvError>),
    Storage(Result<StorageChange, RecvError>),
}

async fn recv_next<T: Clone>(rx: &mut Option<broadcast::Receiver<T>>) -> Result<T, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl SyncBus {
    /// Spawn the listener task on the current tokio runtime.
    ///
    /// Returns `None` if a listener already owns this bus's receivers.
    pub fn spawn_listener(&self) -> Option<JoinHandle<()>> {
        let (mut frames, mut storage) = {
            let mut remote = lock(&self.inner.remote);
            (remote.frames.take(), remote.storage.take())
        };
        if frames.is_none() && storage.is_none() {
            return None;
        }

        let weak = Arc::downgrade(&self.inner);
        let context = self.inner.context;

        Some(tokio::spawn(async move {
            info!(context = %context.short(), "Sync listener started");

            while frames.is_some() || storage.is_some() {
                let incoming = tokio::select! {
                    result = recv_next(&mut frames) => Incoming::Frame(result),
                    result = recv_next(&mut storage) => Incoming::Storage(result),
                };

                let Some(inner) = weak.upgrade() else {
                    break;
                };

                let accepted = match incoming {
                    Incoming::Frame(Ok(frame)) => inner.accept_frame(frame),
                    Incoming::Storage(Ok(change)) => inner.accept_storage(change),
                    Incoming::Frame(Err(RecvError::Lagged(skipped)))
                    | Incoming::Storage(Err(RecvError::Lagged(skipped))) => {
                        warn!(skipped, "Sync listener lagged, re-reading stored envelope");
                        inner.recover_storage()
                    }
                    Incoming::Frame(Err(RecvError::Closed)) => {
                        frames = None;
                        None
                    }
                    Incoming::Storage(Err(RecvError::Closed)) => {
                        storage = None;
                        None
                    }
                };

                if let Some((envelope, path)) = accepted {
                    inner.deliver_remote(&envelope, path);
                }
            }

            info!(context = %context.short(), "Sync listener stopped");
        }))
    }
}
