//! Transport to minions that live in the same process.
//!
//! Each minion is a tokio task reading requests from an mpsc queue and
//! answering on a per-request oneshot. Handlers run on the blocking pool, so
//! a slow handler on one minion does not stall the others. Used for tests
//! and for single-host setups that still want the remote code path.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Transport, TransportError};
use crate::dispatch::request::{InvocationRequest, InvocationResponse, MinionId};
use crate::dispatch::result::{FailureKind, InvocationResult};
use crate::dispatch::Dispatcher;

/// Queue depth per minion.
const MINION_QUEUE: usize = 64;

struct Envelope {
    request: InvocationRequest,
    reply: oneshot::Sender<InvocationResponse>,
}

/// Transport to minions spawned in this process.
#[derive(Default)]
pub struct ChannelTransport {
    minions: DashMap<MinionId, mpsc::Sender<Envelope>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a minion serving `dispatcher`'s registry under `id`.
    ///
    /// Must be called from within a tokio runtime. Spawning a minion with an
    /// id already in use replaces the old minion, whose task then exits.
    pub fn spawn_minion(&self, id: MinionId, dispatcher: Arc<Dispatcher>) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::channel::<Envelope>(MINION_QUEUE);
        self.minions.insert(id.clone(), tx);
        log::info!("Channel minion {} started", id);

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let dispatcher = Arc::clone(&dispatcher);
                let minion = id.clone();
                tokio::spawn(async move {
                    let Envelope { request, reply } = envelope;
                    let jid = request.jid.clone();
                    let result =
                        tokio::task::spawn_blocking(move || dispatcher.invoke_local(&request))
                            .await
                            .unwrap_or_else(|e| {
                                InvocationResult::failure(
                                    FailureKind::HandlerError,
                                    format!("minion task failed: {}", e),
                                )
                            });
                    // The caller may have stopped waiting.
                    let _ = reply.send(InvocationResponse::new(jid, minion, result));
                });
            }
            log::info!("Channel minion {} stopped", id);
        })
    }

    /// Stop routing to a minion. Its task exits once its queue drains.
    pub fn disconnect(&self, id: &MinionId) -> bool {
        self.minions.remove(id).is_some()
    }

    pub fn minions(&self) -> Vec<MinionId> {
        let mut ids: Vec<MinionId> = self.minions.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        "channel"
    }

    async fn send(
        &self,
        minion: &MinionId,
        request: &InvocationRequest,
    ) -> Result<InvocationResponse, TransportError> {
        // Clone the sender out so no map guard is held across an await.
        let sender = self
            .minions
            .get(minion)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::UnknownMinion(minion.to_string()))?;

        let (reply, response) = oneshot::channel();
        sender
            .send(Envelope {
                request: request.clone(),
                reply,
            })
            .await
            .map_err(|_| TransportError::Closed(format!("minion {} is not running", minion)))?;

        response
            .await
            .map_err(|_| TransportError::Closed(format!("minion {} dropped the reply", minion)))
    }
}
