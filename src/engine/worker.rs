//! RPC bridge to a background execution context.
//!
//! ## Model
//!
//! The bridge talks to a worker over a message channel pair: no shared
//! memory, only serialized envelopes plus an ownership-transfer list for
//! binary payloads. A dispatch:
//!
//! 1. allocates a fresh, strictly increasing request id,
//! 2. records a pending entry keyed by that id,
//! 3. deep-walks the argument graph and moves every binary payload into a
//!    transfer list (zero-copy handoff),
//! 4. serializes the `{ id, function_name, args }` envelope and sends it.
//!
//! A response `{ id, result | error }` settles and removes the pending
//! entry exactly once. A canceled token sends a best-effort `{ cancel: id }`
//! across the boundary *and* settles the local entry as `Canceled`
//! immediately; a late reply for an id with no pending entry is dropped.
//! A send failure rolls back the pending entry and settles synchronously.
//!
//! ## Action registry
//!
//! The worker dispatches by name against an [`ActionRegistry`] injected at
//! spawn time; an explicit object, not a module-level global, so tests can
//! build isolated registries. Unknown names come back as a distinct
//! [`WorkerError::UnknownAction`] rather than a missing-function crash.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::cancellation::{CancellationSource, CancellationToken};
use crate::engine::error::WorkerError;
use crate::engine::task::{Task, TaskCompletionSource};


/// Argument graph crossing the worker boundary.
///
/// Binary payloads ([`WorkerValue::Bytes`]) are extracted before
/// serialization and moved across by ownership; [`WorkerValue::Transferred`]
/// is the placeholder left in the serialized graph.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum WorkerValue {
    /// Absent value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating-point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Binary payload; moved, never copied, across the boundary.
    Bytes(Vec<u8>),
    /// Slot index into the transfer list of the surrounding envelope.
    Transferred(usize),
    /// Ordered sequence.
    List(Vec<WorkerValue>),
    /// String-keyed mapping.
    Map(BTreeMap<String, WorkerValue>),
}

/// Moves every `Bytes` leaf of the argument graph into a transfer list.
///
/// The walk is total (covers nested lists and maps) and pure: it consumes
/// the input graph and returns a rewritten one, leaving placeholders where
/// payloads were.
pub fn extract_transferables(args: Vec<WorkerValue>) -> (Vec<WorkerValue>, Vec<Vec<u8>>) {
    fn strip(value: WorkerValue, transfers: &mut Vec<Vec<u8>>) -> WorkerValue {
        match value {
            WorkerValue::Bytes(payload) => {
                transfers.push(payload);
                WorkerValue::Transferred(transfers.len() - 1)
            }
            WorkerValue::List(items) => WorkerValue::List(
                items
                    .into_iter()
                    .map(|item| strip(item, transfers))
                    .collect(),
            ),
            WorkerValue::Map(entries) => WorkerValue::Map(
                entries
                    .into_iter()
                    .map(|(key, item)| (key, strip(item, transfers)))
                    .collect(),
            ),
            other => other,
        }
    }

    let mut transfers = Vec::new();
    let rewritten = args
        .into_iter()
        .map(|value| strip(value, &mut transfers))
        .collect();
    (rewritten, transfers)
}

/// Re-grafts transferred payloads into the argument graph.
///
/// ## Errors
/// A placeholder referencing a missing or already-consumed slot is an
/// [`WorkerError::Envelope`] failure: the envelope and its transfer list
/// disagree.
pub fn restore_transferables(
    args: Vec<WorkerValue>,
    transfers: Vec<Vec<u8>>,
) -> Result<Vec<WorkerValue>, WorkerError> {
    fn graft(
        value: WorkerValue,
        slots: &mut [Option<Vec<u8>>],
    ) -> Result<WorkerValue, WorkerError> {
        match value {
            WorkerValue::Transferred(index) => {
                let payload = slots
                    .get_mut(index)
                    .and_then(Option::take)
                    .ok_or_else(|| WorkerError::Envelope {
                        message: format!("transfer slot {index} missing or reused"),
                    })?;
                Ok(WorkerValue::Bytes(payload))
            }
            WorkerValue::List(items) => Ok(WorkerValue::List(
                items
                    .into_iter()
                    .map(|item| graft(item, slots))
                    .collect::<Result<_, _>>()?,
            )),
            WorkerValue::Map(entries) => Ok(WorkerValue::Map(
                entries
                    .into_iter()
                    .map(|(key, item)| Ok((key, graft(item, slots)?)))
                    .collect::<Result<_, WorkerError>>()?,
            )),
            other => Ok(other),
        }
    }

    let mut slots: Vec<Option<Vec<u8>>> = transfers.into_iter().map(Some).collect();
    args.into_iter()
        .map(|value| graft(value, &mut slots))
        .collect()
}

/// Outcome of a worker-side action.
pub type ActionResult = Result<WorkerValue, String>;

/// Boxed future produced by an action handler.
pub type ActionFuture = BoxFuture<'static, ActionResult>;

/// Type-erased worker action.
pub type ActionHandler =
    Arc<dyn Fn(Vec<WorkerValue>, CancellationToken) -> ActionFuture + Send + Sync>;

/// Explicit name-to-handler registry injected into a worker at spawn time.

#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async action under `name`.
    ///
    /// ## Errors
    /// [`WorkerError::DuplicateAction`] when the name is already taken;
    /// silent replacement would make dispatch outcomes registry-order
    /// dependent.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> Result<(), WorkerError>
    where
        F: Fn(Vec<WorkerValue>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        let name = name.into();
        if self.actions.contains_key(&name) {
            return Err(WorkerError::DuplicateAction { name });
        }
        self.actions.insert(
            name,
            Arc::new(move |args, token| {
                let fut: ActionFuture = Box::pin(handler(args, token));
                fut
            }),
        );
        Ok(())
    }

    fn get(&self, name: &str) -> Option<ActionHandler> {
        self.actions.get(name).cloned()
    }
}

/// Serialized request envelope.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WorkerMessage {
    Call {
        id: u64,
        function_name: String,
        args: Vec<WorkerValue>,
    },
    Cancel {
        id: u64,
    },
    Shutdown,
}

/// Serialized response envelope: exactly one of `result`/`error` is set.
#[derive(Debug, Serialize, Deserialize)]
struct WorkerReply {
    id: u64,
    result: Option<WorkerValue>,
    error: Option<String>,
}

struct OutboundFrame {
    envelope: String,
    transferables: Vec<Vec<u8>>,
}

struct InboundFrame {
    envelope: String,
}

type PendingMap = Arc<Mutex<HashMap<u64, TaskCompletionSource<WorkerValue>>>>;

/// Caller-side handle onto a background worker.
///
/// Cloning shares the same pending table and request-id counter.

#[derive(Clone)]
pub struct WorkerBridge {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    pending: PendingMap,
    next_id: Arc<AtomicU64>,
}

impl WorkerBridge {
    /// Spawns a worker executing `registry` actions and returns its bridge.
    pub fn spawn(registry: ActionRegistry) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(worker_loop(registry, outbound_rx, reply_tx));
        tokio::spawn(response_pump(reply_rx, Arc::clone(&pending)));

        WorkerBridge {
            outbound: outbound_tx,
            pending,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        lock_pending(&self.pending).len()
    }

    /// Dispatches a named action to the worker.
    ///
    /// ## Semantics
    /// * Ids are strictly increasing per bridge; an id is never reused
    ///   while pending.
    /// * Binary payloads inside `args` cross by ownership transfer.
    /// * A send failure rolls back the pending entry and settles the task
    ///   as `Faulted` before this returns.
    /// * Cancellation settles the local task as `Canceled` immediately and
    ///   forwards a best-effort cancel message; the remote action may
    ///   already be running.
    pub fn dispatch(
        &self,
        function_name: impl Into<String>,
        args: Vec<WorkerValue>,
        token: &CancellationToken,
    ) -> Task<WorkerValue> {
        if token.is_cancellation_requested() {
            return Task::canceled();
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let function_name = function_name.into();
        let (args, transferables) = extract_transferables(args);

        let envelope = match serde_json::to_string(&WorkerMessage::Call {
            id,
            function_name: function_name.clone(),
            args,
        }) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Task::faulted(
                    WorkerError::Envelope {
                        message: e.to_string(),
                    }
                    .into(),
                )
            }
        };

        let source = TaskCompletionSource::new();
        lock_pending(&self.pending).insert(id, source.clone());

        tracing::debug!(id, action = %function_name, "worker dispatch");
        if self
            .outbound
            .send(OutboundFrame {
                envelope,
                transferables,
            })
            .is_err()
        {
            lock_pending(&self.pending).remove(&id);
            return Task::faulted(WorkerError::ChannelClosed.into());
        }

        let pending = Arc::clone(&self.pending);
        let outbound = self.outbound.clone();
        let on_cancel = source.clone();
        token.register(move || {
            if lock_pending(&pending).remove(&id).is_some() {
                if let Ok(envelope) = serde_json::to_string(&WorkerMessage::Cancel { id }) {
                    let _ = outbound.send(OutboundFrame {
                        envelope,
                        transferables: Vec::new(),
                    });
                }
                on_cancel.set_canceled();
            }
        });

        source.task()
    }

    /// Stops the worker.
    ///
    /// Every still-pending request is settled as `Faulted` with
    /// [`WorkerError::ChannelClosed`] immediately; in-flight remote actions
    /// observe their cancellation token, and any late reply they produce is
    /// dropped by the response pump.
    pub fn shutdown(&self) {
        if let Ok(envelope) = serde_json::to_string(&WorkerMessage::Shutdown) {
            let _ = self.outbound.send(OutboundFrame {
                envelope,
                transferables: Vec::new(),
            });
        }
        let orphaned: Vec<_> = lock_pending(&self.pending).drain().collect();
        for (_, source) in orphaned {
            source.set_error(WorkerError::ChannelClosed.into());
        }
    }
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<u64, TaskCompletionSource<WorkerValue>>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Settles pending entries as replies arrive; drains the table when the
/// worker goes away.
async fn response_pump(mut replies: mpsc::UnboundedReceiver<InboundFrame>, pending: PendingMap) {
    while let Some(frame) = replies.recv().await {
        let reply: WorkerReply = match serde_json::from_str(&frame.envelope) {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable worker reply dropped");
                continue;
            }
        };

        // Locally-canceled requests have no entry left; their late replies
        // are dropped here.
        let Some(source) = lock_pending(&pending).remove(&reply.id) else {
            continue;
        };

        match (reply.result, reply.error) {
            (Some(value), None) => {
                source.set_result(value);
            }
            (_, Some(message)) => {
                source.set_error(WorkerError::Remote { message }.into());
            }
            (None, None) => {
                source.set_error(
                    WorkerError::Envelope {
                        message: format!("reply {} carried neither result nor error", reply.id),
                    }
                    .into(),
                );
            }
        }
    }

    let orphaned: Vec<_> = lock_pending(&pending).drain().collect();
    for (_, source) in orphaned {
        source.set_error(WorkerError::ChannelClosed.into());
    }
}

/// The background execution context: deserializes envelopes, dispatches by
/// name, honors remote cancellation.
async fn worker_loop(
    registry: ActionRegistry,
    mut inbox: mpsc::UnboundedReceiver<OutboundFrame>,
    replies: mpsc::UnboundedSender<InboundFrame>,
) {
    let cancels: Arc<Mutex<HashMap<u64, CancellationSource>>> =
        Arc::new(Mutex::new(HashMap::new()));

    while let Some(frame) = inbox.recv().await {
        let message: WorkerMessage = match serde_json::from_str(&frame.envelope) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable worker request dropped");
                continue;
            }
        };

        match message {
            WorkerMessage::Call {
                id,
                function_name,
                args,
            } => {
                let args = match restore_transferables(args, frame.transferables) {
                    Ok(args) => args,
                    Err(e) => {
                        send_reply(&replies, WorkerReply {
                            id,
                            result: None,
                            error: Some(e.to_string()),
                        });
                        continue;
                    }
                };

                let Some(handler) = registry.get(&function_name) else {
                    send_reply(&replies, WorkerReply {
                        id,
                        result: None,
                        error: Some(
                            WorkerError::UnknownAction {
                                name: function_name,
                            }
                            .to_string(),
                        ),
                    });
                    continue;
                };

                let source = CancellationSource::new();
                let token = source.token();
                lock_cancels(&cancels).insert(id, source);

                let replies = replies.clone();
                let cancels = Arc::clone(&cancels);
                tokio::spawn(async move {
                    let outcome = handler(args, token).await;
                    lock_cancels(&cancels).remove(&id);
                    let reply = match outcome {
                        Ok(value) => WorkerReply {
                            id,
                            result: Some(value),
                            error: None,
                        },
                        Err(message) => WorkerReply {
                            id,
                            result: None,
                            error: Some(message),
                        },
                    };
                    send_reply(&replies, reply);
                });
            }
            WorkerMessage::Cancel { id } => {
                if let Some(source) = lock_cancels(&cancels).remove(&id) {
                    tracing::debug!(id, "remote cancellation honored");
                    source.cancel();
                }
            }
            WorkerMessage::Shutdown => {
                // Signal in-flight actions before exiting; cooperative
                // handlers stop at their next poll point.
                let in_flight: Vec<_> = lock_cancels(&cancels).drain().collect();
                for (_, source) in in_flight {
                    source.cancel();
                }
                break;
            }
        }
    }
}

fn lock_cancels(
    cancels: &Arc<Mutex<HashMap<u64, CancellationSource>>>,
) -> std::sync::MutexGuard<'_, HashMap<u64, CancellationSource>> {
    cancels.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn send_reply(replies: &mpsc::UnboundedSender<InboundFrame>, reply: WorkerReply) {
    if let Ok(envelope) = serde_json::to_string(&reply) {
        let _ = replies.send(InboundFrame { envelope });
    }
}
