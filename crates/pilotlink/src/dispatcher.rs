//! Inbound message routing and call correlation
//!
//! Every inbound [`Message`] is first matched against the table of in-flight
//! calls by correlation ID. A match is a response: it is handed to the one
//! waiting caller and never reaches a type handler. Anything else is a request
//! or notification and goes to the handler bound for its [`MessageType`].
//!
//! Routing never waits on handlers. Handler work is admitted into a bounded
//! per-connection backlog and runs on a bounded worker pool; a full backlog
//! faults the connection instead of stalling the reader.

use async_trait::async_trait;
use futures::FutureExt;
use pilotlink_proto::{Message, MessageType};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{oneshot, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Handler for inbound requests and notifications of one message type.
///
/// `ctx` is the connection the message arrived on, so a handler can send a
/// reply carrying the same correlation ID.
#[async_trait]
pub trait MessageHandler<C>: Send + Sync {
    /// Handle one inbound message
    async fn handle(&self, ctx: C, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<C, F, Fut> MessageHandler<C> for F
where
    C: Send + 'static,
    F: Fn(C, Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, ctx: C, message: Message) -> anyhow::Result<()> {
        (self)(ctx, message).await
    }
}

/// Where [`Dispatcher::dispatch`] sent a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Delivered to the caller waiting on its correlation ID
    Response,
    /// Queued for a type handler running in its own task
    Handler,
    /// Nobody wanted it; logged and dropped
    Unhandled,
    /// The handler backlog was full; dropped and the fault token cancelled
    Overflow,
}

/// Per-connection routing table
pub struct Dispatcher<C> {
    /// Handlers by message type
    handlers: RwLock<HashMap<MessageType, Arc<dyn MessageHandler<C>>>>,
    /// Calls waiting for a response, by correlation ID
    pending: RwLock<HashMap<Uuid, oneshot::Sender<Message>>>,
    /// Bounds how many handler tasks run at once
    workers: Arc<Semaphore>,
    /// Bounds handler work admitted but not finished, running or queued
    admission: Arc<Semaphore>,
    /// Cancelled when a handler panics or the backlog overflows
    fault: CancellationToken,
}

impl<C> Dispatcher<C>
where
    C: Send + 'static,
{
    /// Create a dispatcher that runs at most `max_concurrent_handlers`
    /// handlers at once and queues up to `queue_capacity` more behind them
    pub fn new(max_concurrent_handlers: usize, queue_capacity: usize) -> Self {
        let workers = max_concurrent_handlers.max(1);
        Self {
            handlers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            workers: Arc::new(Semaphore::new(workers)),
            admission: Arc::new(Semaphore::new(workers + queue_capacity)),
            fault: CancellationToken::new(),
        }
    }

    /// Bind the handler for a message type, replacing any previous one
    pub async fn bind<H>(&self, kind: MessageType, handler: H)
    where
        H: MessageHandler<C> + 'static,
    {
        let mut handlers = self.handlers.write().await;
        if handlers.insert(kind, Arc::new(handler)).is_some() {
            debug!(%kind, "Replaced message handler");
        } else {
            debug!(%kind, "Bound message handler");
        }
    }

    /// Register a pending call and get the slot its response will land in.
    ///
    /// Must happen before the request is sent, or a fast reply could be
    /// mistaken for an unsolicited message.
    pub async fn expect_response(&self, id: Uuid) -> oneshot::Receiver<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);
        rx
    }

    /// Forget a pending call, e.g. after its caller timed out
    pub async fn cancel(&self, id: Uuid) -> bool {
        self.pending.write().await.remove(&id).is_some()
    }

    /// Drop every pending slot so blocked callers see the connection is gone
    pub async fn fail_pending(&self) -> usize {
        let mut pending = self.pending.write().await;
        let count = pending.len();
        pending.clear();
        count
    }

    /// Number of calls still waiting for a response
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    /// Token cancelled when a handler task faults or the backlog overflows
    pub fn fault_token(&self) -> CancellationToken {
        self.fault.clone()
    }

    /// Route one inbound message.
    ///
    /// Never waits for a handler. Responses are delivered inline; other
    /// messages are queued for the worker pool, and a full queue trips the
    /// fault token.
    pub async fn dispatch(&self, ctx: C, message: Message) -> Dispatched {
        let waiter = self.pending.write().await.remove(&message.id);
        if let Some(waiter) = waiter {
            let id = message.id;
            if waiter.send(message).is_err() {
                warn!(%id, "Caller stopped waiting before its response arrived");
            }
            return Dispatched::Response;
        }

        let handler = self.handlers.read().await.get(&message.kind).cloned();
        let Some(handler) = handler else {
            warn!(id = %message.id, kind = %message.kind, "No handler bound, dropping message");
            return Dispatched::Unhandled;
        };

        let Ok(admitted) = self.admission.clone().try_acquire_owned() else {
            error!(
                id = %message.id,
                kind = %message.kind,
                "Handler backlog full, faulting connection"
            );
            self.fault.cancel();
            return Dispatched::Overflow;
        };

        let workers = self.workers.clone();
        let fault = self.fault.clone();
        tokio::spawn(async move {
            let _admitted = admitted;
            // The pool is never closed
            let Ok(_permit) = workers.acquire_owned().await else {
                return;
            };
            let id = message.id;
            let kind = message.kind;

            match AssertUnwindSafe(handler.handle(ctx, message)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(%id, %kind, "Handler failed: {:#}", e);
                }
                Err(panic) => {
                    error!(%id, %kind, "Handler panicked: {}", panic_message(panic.as_ref()));
                    fault.cancel();
                }
            }
        });

        Dispatched::Handler
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests;
