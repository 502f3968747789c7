//! Bidirectional JSON-RPC channel over the locator's stdio.
//!
//! A background task reads frames from the locator's stdout, routes
//! responses to the waiting caller, and fans notifications out to
//! subscribers. Requests race a deadline; on expiry the caller's wait is
//! cancelled and a `$/cancelRequest` notification is sent, but the channel
//! never decides to kill the process. That decision belongs to the
//! supervisor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::ChannelError;
use crate::jsonrpc::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestIds,
};
use crate::transport::{BoxedReader, BoxedWriter, FrameReader, FrameWriter};

/// Log target for channel operations.
const CHANNEL_TARGET: &str = "envscout_locator::channel";

/// Bound on writing the best-effort cancellation notice.
const CANCEL_WRITE_TIMEOUT: Duration = Duration::from_millis(250);

/// Callback invoked for each matching notification.
pub type NotificationHandler = Arc<dyn Fn(Value) + Send + Sync>;

type Reply = oneshot::Sender<Result<Value, ChannelError>>;

struct Pending {
    method: String,
    reply: Reply,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    handlers: HashMap<u64, (String, NotificationHandler)>,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<HashMap<i64, Pending>>,
    listeners: Mutex<Listeners>,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A handler panic must not wedge every later request.
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

impl Shared {
    fn take_pending(&self, id: i64) -> Option<Pending> {
        lock(&self.pending).remove(&id)
    }

    fn dispatch(&self, bytes: &[u8]) {
        let message = match JsonRpcMessage::from_bytes(bytes) {
            Ok(message) => message,
            Err(error) => {
                warn!(
                    target: CHANNEL_TARGET,
                    error = %error,
                    bytes = bytes.len(),
                    "discarding malformed frame"
                );
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => self.complete(response),
            JsonRpcMessage::Notification(notification) => self.notify(notification),
            JsonRpcMessage::ServerRequest(request) => {
                warn!(
                    target: CHANNEL_TARGET,
                    method = %request.method,
                    id = %request.id,
                    "ignoring locator-initiated request"
                );
            }
        }
    }

    fn complete(&self, response: JsonRpcResponse) {
        let Some(id) = response.id else {
            warn!(target: CHANNEL_TARGET, "discarding response without an id");
            return;
        };
        let Some(pending) = self.take_pending(id) else {
            debug!(
                target: CHANNEL_TARGET,
                id,
                "response for a request nobody is waiting on"
            );
            return;
        };

        let outcome = match response.error {
            Some(error) => Err(ChannelError::from_jsonrpc(&pending.method, error)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        // The caller may have timed out in the meantime.
        drop(pending.reply.send(outcome));
    }

    fn notify(&self, notification: JsonRpcNotification) {
        let handlers: Vec<NotificationHandler> = lock(&self.listeners)
            .handlers
            .values()
            .filter(|(method, _)| *method == notification.method)
            .map(|(_, handler)| Arc::clone(handler))
            .collect();

        if handlers.is_empty() {
            trace!(
                target: CHANNEL_TARGET,
                method = %notification.method,
                "notification without subscribers"
            );
            return;
        }

        let params = notification.params.unwrap_or(Value::Null);
        for handler in handlers {
            handler(params.clone());
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<Pending> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        for pending in drained {
            drop(pending.reply.send(Err(ChannelError::Closed)));
        }
    }

    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.fail_pending();
    }
}

/// Listener registration; dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.listeners).handlers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// JSON-RPC channel bound to one locator process.
pub struct RpcChannel {
    ids: RequestIds,
    writer: tokio::sync::Mutex<Option<FrameWriter<BoxedWriter>>>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl RpcChannel {
    /// Starts a channel over the locator's stdout (`reader`) and stdin
    /// (`writer`). Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(reader: BoxedReader, writer: BoxedWriter) -> Self {
        let shared = Arc::new(Shared::default());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_reader(
            FrameReader::new(reader),
            Arc::clone(&shared),
            shutdown.clone(),
        ));

        Self {
            ids: RequestIds::new(),
            writer: tokio::sync::Mutex::new(Some(FrameWriter::new(writer))),
            shared,
            shutdown,
            reader: Mutex::new(Some(task)),
        }
    }

    /// Whether the locator's output has ended or the channel was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Sends a request and waits for its result until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Timeout`] when the deadline elapses,
    /// [`ChannelError::Server`] when the locator answers with an error object,
    /// and [`ChannelError::Closed`] when the channel closes first.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        let id = self.ids.next();
        let payload = serde_json::to_vec(&JsonRpcRequest::new(id, method, params))?;
        let (reply, response) = oneshot::channel();
        lock(&self.shared.pending).insert(
            id,
            Pending {
                method: method.to_owned(),
                reply,
            },
        );
        // The reader may have drained the pending map before the insert.
        if self.is_closed() {
            drop(self.shared.take_pending(id));
            return Err(ChannelError::Closed);
        }

        debug!(target: CHANNEL_TARGET, method, id, "sending request");

        let exchange = async {
            self.send(&payload).await?;
            response.await.map_err(|_| ChannelError::Closed)?
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;
        drop(self.shared.take_pending(id));

        match outcome {
            Ok(result) => result,
            Err(_elapsed) => {
                let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(
                    target: CHANNEL_TARGET,
                    method,
                    id,
                    timeout_ms,
                    "request timed out"
                );
                self.cancel(id).await;
                Err(ChannelError::Timeout {
                    method: method.to_owned(),
                    timeout_ms,
                })
            }
        }
    }

    /// Sends a notification (no response expected).
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] if the channel is closed, or a
    /// transport error if the write fails.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ChannelError> {
        let payload = serde_json::to_vec(&JsonRpcNotification::new(method, params))?;
        debug!(target: CHANNEL_TARGET, method, "sending notification");
        self.send(&payload).await
    }

    /// Registers `handler` for notifications named `method`.
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) -> Subscription {
        let mut listeners = lock(&self.shared.listeners);
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners
            .handlers
            .insert(id, (method.into(), Arc::new(handler)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).handlers.len()
    }

    /// Drops every registered listener.
    pub fn release_listeners(&self) {
        let released = std::mem::take(&mut lock(&self.shared.listeners).handlers);
        debug!(
            target: CHANNEL_TARGET,
            released = released.len(),
            "released notification listeners"
        );
    }

    /// Stops the reader task and fails every pending request.
    pub fn close(&self) {
        self.shutdown.cancel();
        if let Some(task) = lock(&self.reader).take() {
            task.abort();
        }
        self.shared.mark_closed();
    }

    /// Closes the locator's stdin, signalling it to exit.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the shutdown write fails.
    pub async fn close_streams(&self) -> Result<(), ChannelError> {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            writer.close().await?;
        }
        Ok(())
    }

    async fn send(&self, payload: &[u8]) -> Result<(), ChannelError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(ChannelError::Closed)?;
        writer.send(payload).await.map_err(ChannelError::from)
    }

    async fn cancel(&self, id: i64) {
        let notice = self.notify("$/cancelRequest", Some(json!({ "id": id })));
        match tokio::time::timeout(CANCEL_WRITE_TIMEOUT, notice).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                debug!(target: CHANNEL_TARGET, id, error = %error, "cancellation notice failed");
            }
            Err(_elapsed) => {
                debug!(target: CHANNEL_TARGET, id, "cancellation notice timed out");
            }
        }
    }
}

impl Drop for RpcChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RpcChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcChannel")
            .field("closed", &self.is_closed())
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

/// Marks the channel closed when the reader task ends, including by panic.
struct CloseOnExit(Arc<Shared>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.mark_closed();
    }
}

async fn run_reader(
    mut reader: FrameReader<BoxedReader>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
) {
    let closer = CloseOnExit(Arc::clone(&shared));
    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => break,
            frame = reader.receive() => frame,
        };
        match frame {
            Ok(Some(bytes)) => shared.dispatch(&bytes),
            Ok(None) => {
                debug!(target: CHANNEL_TARGET, "locator closed its output");
                break;
            }
            Err(error) => {
                warn!(target: CHANNEL_TARGET, error = %error, "failed to read from locator");
                break;
            }
        }
    }
    drop(closer);
}
