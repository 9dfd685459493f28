use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use duplexrpc_frame::{FrameError, RpcCodec};
use duplexrpc_registry::{AnyMessage, Payload, RegistryError, TypeRegistry};
use duplexrpc_transport::{BoxedReader, BoxedWriter, Transport};
use futures_core::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::task::TaskTracker;

use crate::config::HostConfig;
use crate::envelope::{Envelope, CALLBACK_METHOD};
use crate::error::{CallError, HandlerError, HostError, Result};
use crate::pending::{CallKind, Delivery, HostStats, PendingTable, Route};
use crate::response;
use crate::service::MethodTable;

enum Outbound {
    Frame(Bytes),
    Shutdown,
}

#[derive(Default)]
struct Tasks {
    reader: Option<AbortHandle>,
    writer: Option<JoinHandle<()>>,
}

struct Shared {
    registry: Arc<TypeRegistry>,
    methods: MethodTable,
    config: HostConfig,
    transport: &'static str,
    pending: Mutex<PendingTable>,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
    /// Future and stream responses still producing replies.
    responders: TaskTracker,
}

/// Configures and starts a [`Host`].
pub struct HostBuilder {
    registry: Arc<TypeRegistry>,
    methods: MethodTable,
    config: HostConfig,
}

impl HostBuilder {
    /// Methods this side serves. Defaults to none.
    pub fn methods(mut self, methods: MethodTable) -> Self {
        self.methods = methods;
        self
    }

    pub fn config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    /// Start the read loop and writer task on the current tokio runtime.
    pub fn spawn(self, transport: Transport) -> Host {
        let kind = transport.kind();
        let (reader, writer) = transport.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            registry: self.registry,
            methods: self.methods,
            pending: Mutex::new(PendingTable::new(self.config.max_tombstones)),
            config: self.config,
            transport: kind,
            outbound,
            closed,
            tasks: Mutex::new(Tasks::default()),
            responders: TaskTracker::new(),
        });

        let writer = tokio::spawn(write_loop(Arc::clone(&shared), outbound_rx, writer));
        let reader = tokio::spawn(read_loop(Arc::clone(&shared), reader));
        *shared.tasks() = Tasks {
            reader: Some(reader.abort_handle()),
            writer: Some(writer),
        };

        tracing::debug!(
            transport = kind,
            methods = shared.methods.len(),
            "host started"
        );
        Host { shared }
    }

    /// Start over a raw read/write pair.
    pub fn spawn_io<R, W>(self, reader: R, writer: W) -> Host
    where
        R: AsyncRead + Send + 'static,
        W: AsyncWrite + Send + 'static,
    {
        self.spawn(Transport::from_halves(reader, writer, "io"))
    }
}

/// One side of a bidirectional RPC connection.
///
/// Cheap to clone; all clones share the connection. The connection stays
/// up until the peer closes its end or [`Host::close`] is called.
#[derive(Clone)]
pub struct Host {
    shared: Arc<Shared>,
}

impl Host {
    pub fn builder(registry: Arc<TypeRegistry>) -> HostBuilder {
        HostBuilder {
            registry,
            methods: MethodTable::new(),
            config: HostConfig::default(),
        }
    }

    /// Start a host with default configuration.
    pub fn spawn(transport: Transport, registry: Arc<TypeRegistry>, methods: MethodTable) -> Self {
        Self::builder(registry).methods(methods).spawn(transport)
    }

    /// Send a call to the peer's `method`.
    ///
    /// The call is registered before its frame is written, so a reply can
    /// never outrun the caller. Consume the returned handle with
    /// [`Host::expect_one`] or [`Host::expect_many`].
    pub fn call<T: Send + Sync + 'static>(&self, method: &str, arg: T) -> Result<PendingCall> {
        self.call_payload(method, Payload::message(arg))
    }

    /// Send a call whose argument is already boxed.
    pub fn call_payload(&self, method: &str, arg: Payload) -> Result<PendingCall> {
        if method.is_empty() || method == CALLBACK_METHOD {
            return Err(HostError::ReservedMethod(method.to_string()));
        }
        let shared = &self.shared;
        let argument = shared.registry.encode_any(&arg)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut pending = shared.pending();
            let id = pending.allocate_id();
            pending.insert(id, tx)?;
            id
        };

        let envelope = Envelope::call(id, method, argument);
        if let Err(err) = shared.enqueue(&envelope) {
            shared.pending().complete(id);
            return Err(err);
        }
        tracing::trace!(id, method, "call sent");

        Ok(PendingCall {
            shared: Arc::clone(shared),
            envelope,
            rx: Some(rx),
        })
    }

    /// Wait for the single reply to `call`, up to the configured timeout.
    ///
    /// `Ok(None)` means the remote handler returned nothing.
    pub async fn expect_one(
        &self,
        call: PendingCall,
    ) -> std::result::Result<Option<AnyMessage>, CallError> {
        self.expect_one_with_timeout(call, self.shared.config.call_timeout)
            .await
    }

    pub async fn expect_one_with_timeout(
        &self,
        call: PendingCall,
        timeout: Duration,
    ) -> std::result::Result<Option<AnyMessage>, CallError> {
        let mut claim = call.claim(CallKind::Unary);
        let delivery = match tokio::time::timeout(timeout, claim.rx.recv()).await {
            Ok(delivery) => delivery,
            Err(_) => {
                claim.abandon();
                tracing::debug!(id = claim.id, ?timeout, "call timed out");
                return Err(CallError::Timeout(timeout));
            }
        };
        claim.finish();

        match delivery {
            Some(Ok(Payload::Message(value))) => Ok(Some(value)),
            Some(Ok(Payload::Undefined | Payload::Close)) => Ok(None),
            Some(Ok(Payload::Error(err))) => Err(CallError::Remote(err.message)),
            Some(Err(err)) => Err(err),
            None => Err(CallError::Disconnected),
        }
    }

    /// Consume `call` as a stream of replies ending at `Close` or `Error`.
    ///
    /// Streams have no timeout. Dropping the stream early abandons the call.
    pub fn expect_many(&self, call: PendingCall) -> CallStream {
        CallStream {
            claim: call.claim(CallKind::Streaming),
            finished: false,
        }
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.shared.registry
    }

    pub fn stats(&self) -> HostStats {
        self.shared.pending().stats()
    }

    pub fn transport_kind(&self) -> &'static str {
        self.shared.transport
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolve once the connection is gone.
    pub async fn closed(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Fail outstanding calls, flush queued frames and shut down the write
    /// half so the peer sees end of stream.
    pub async fn close(&self) {
        self.shared.shut_down("closed locally");
        let writer = self.shared.tasks().writer.take();
        if let Some(writer) = writer {
            let _ = writer.await;
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("transport", &self.shared.transport)
            .field("methods", &self.shared.methods)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An outgoing call that has been sent but not yet consumed.
///
/// Dropping it without calling `expect_one`/`expect_many` abandons the
/// call; a reply that still arrives is counted as late.
#[derive(Debug)]
pub struct PendingCall {
    shared: Arc<Shared>,
    envelope: Envelope,
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl PendingCall {
    pub fn id(&self) -> u32 {
        self.envelope.id
    }

    /// The envelope that was written for this call.
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn claim(mut self, kind: CallKind) -> Claim {
        let id = self.envelope.id;
        // A missing receiver yields an immediately closed channel.
        let rx = self
            .rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);
        self.shared.pending().set_kind(id, kind);
        Claim {
            shared: Arc::clone(&self.shared),
            id,
            rx,
            done: false,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if self.rx.is_some() {
            tracing::debug!(id = self.envelope.id, "pending call dropped unclaimed");
            self.shared.pending().abandon(self.envelope.id);
        }
    }
}

/// Receiving end of a claimed call. Abandons the call if dropped unfinished.
struct Claim {
    shared: Arc<Shared>,
    id: u32,
    rx: mpsc::UnboundedReceiver<Delivery>,
    done: bool,
}

impl Claim {
    fn finish(&mut self) {
        if !self.done {
            self.done = true;
            self.shared.pending().complete(self.id);
        }
    }

    fn abandon(&mut self) {
        if !self.done {
            self.done = true;
            self.shared.pending().abandon(self.id);
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Replies to a streaming call, in wire order.
///
/// Yields each data item, then ends after `Close`. A remote `Error` is
/// yielded once as `Err` and ends the stream. `Undefined` ends it too.
pub struct CallStream {
    claim: Claim,
    finished: bool,
}

impl CallStream {
    pub fn id(&self) -> u32 {
        self.claim.id
    }
}

impl Stream for CallStream {
    type Item = std::result::Result<AnyMessage, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        loop {
            let delivery = match this.claim.rx.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(delivery) => delivery,
            };
            let last = match delivery {
                Some(Ok(Payload::Message(value))) => return Poll::Ready(Some(Ok(value))),
                // Routed before the stream was claimed.
                Some(Err(CallError::Decode(err))) => {
                    this.claim.shared.pending().note_undecodable();
                    tracing::warn!(parent_id = this.claim.id, error = %err, "dropping undecodable stream item");
                    continue;
                }
                Some(Ok(Payload::Close | Payload::Undefined)) | None => None,
                Some(Ok(Payload::Error(err))) => Some(Err(CallError::Remote(err.message))),
                Some(Err(err)) => Some(Err(err)),
            };
            this.finished = true;
            this.claim.finish();
            return Poll::Ready(last);
        }
    }
}

impl fmt::Debug for CallStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallStream")
            .field("id", &self.claim.id)
            .field("finished", &self.finished)
            .finish()
    }
}

/// Sends the callback frames answering one incoming call.
pub(crate) struct Replier {
    shared: Arc<Shared>,
    parent_id: u32,
}

impl Replier {
    pub(crate) fn parent_id(&self) -> u32 {
        self.parent_id
    }

    /// Tracker for tasks that keep replying after the handler returned. The
    /// write half stays open until they finish.
    pub(crate) fn responders(&self) -> TaskTracker {
        self.shared.responders.clone()
    }

    /// Send one response payload. Returns false when nothing more should be
    /// sent for this call.
    pub(crate) fn reply(&self, payload: Payload) -> bool {
        match self.shared.send_callback(self.parent_id, &payload) {
            Ok(()) => true,
            Err(HostError::Registry(RegistryError::UnregisteredValue(rust_type))) => {
                tracing::error!(
                    parent_id = self.parent_id,
                    rust_type,
                    "unsupported rpc return value"
                );
                self.send_error(format!("unsupported rpc return value: {rust_type}"));
                false
            }
            Err(HostError::Closed) => {
                tracing::debug!(parent_id = self.parent_id, "reply dropped, host closed");
                false
            }
            Err(err) => {
                tracing::error!(parent_id = self.parent_id, error = %err, "failed to send reply");
                self.send_error(format!("failed to send reply: {err}"));
                false
            }
        }
    }

    pub(crate) fn fail(&self, err: &HandlerError) {
        tracing::debug!(parent_id = self.parent_id, error = %err, "handler failed");
        self.send_error(err.message());
    }

    pub(crate) fn panicked(&self, panic: &(dyn Any + Send)) {
        let message = panic_message(panic);
        tracing::error!(parent_id = self.parent_id, panic = message, "handler panicked");
        self.send_error(format!("handler panicked: {message}"));
    }

    fn send_error(&self, message: impl Into<String>) {
        if let Err(err) = self
            .shared
            .send_callback(self.parent_id, &Payload::error(message))
        {
            tracing::debug!(parent_id = self.parent_id, error = %err, "error reply dropped");
        }
    }
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_callback(&self, parent_id: u32, payload: &Payload) -> Result<()> {
        let argument = self.registry.encode_any(payload)?;
        let id = self.pending().allocate_id();
        self.enqueue(&Envelope::callback(id, parent_id, argument))
    }

    fn enqueue(&self, envelope: &Envelope) -> Result<()> {
        if *self.closed.borrow() {
            return Err(HostError::Closed);
        }
        let frame = envelope.encode()?;
        let max = self.config.frame.max_payload_size;
        if frame.len() > max {
            return Err(FrameError::PayloadTooLarge {
                size: frame.len(),
                max,
            }
            .into());
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| HostError::Closed)
    }

    fn shut_down(&self, reason: &'static str) {
        let failed = self.pending().close();
        if self.closed.send_replace(true) {
            return;
        }
        let _ = self.outbound.send(Outbound::Shutdown);
        if let Some(reader) = self.tasks().reader.take() {
            reader.abort();
        }
        tracing::debug!(reason, failed_calls = failed, "host closed");
    }

    fn on_frame(self: &Arc<Self>, frame: &[u8]) {
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.pending().note_malformed();
                tracing::warn!(error = %err, len = frame.len(), "dropping malformed envelope");
                return;
            }
        };
        if envelope.is_callback() {
            self.on_callback(envelope);
        } else {
            self.on_call(envelope);
        }
    }

    fn on_callback(&self, envelope: Envelope) {
        let parent_id = envelope.parent_id;
        let delivery = self
            .registry
            .decode_any(&envelope.argument)
            .map_err(CallError::Decode);
        let route = self.pending().route(parent_id, delivery);
        match route {
            Route::Delivered => tracing::trace!(parent_id, "reply routed"),
            Route::Dropped => tracing::warn!(
                parent_id,
                type_name = %envelope.argument.type_name,
                "dropping undecodable stream item"
            ),
            Route::Late => tracing::debug!(parent_id, "late reply for abandoned call"),
            Route::Orphaned => tracing::warn!(parent_id, "reply for unknown call"),
        }
    }

    fn on_call(self: &Arc<Self>, envelope: Envelope) {
        if envelope.id == 0 || envelope.method == CALLBACK_METHOD {
            self.pending().note_malformed();
            tracing::warn!(id = envelope.id, method = %envelope.method, "dropping invalid call");
            return;
        }
        let replier = Replier {
            shared: Arc::clone(self),
            parent_id: envelope.id,
        };

        let Some(handler) = self.methods.get(&envelope.method) else {
            tracing::debug!(id = envelope.id, method = %envelope.method, "method not implemented");
            replier.reply(Payload::error(format!(
                "method not implemented: {}",
                envelope.method
            )));
            return;
        };

        let arg = match self.registry.decode_any(&envelope.argument) {
            Ok(Payload::Message(arg)) => arg,
            Ok(other) => {
                replier.reply(Payload::error(format!(
                    "invalid argument: {} is a response-only type",
                    other.kind()
                )));
                return;
            }
            Err(err) => {
                tracing::warn!(id = envelope.id, method = %envelope.method, error = %err, "cannot decode argument");
                replier.reply(Payload::error(format!("cannot decode argument: {err}")));
                return;
            }
        };

        tracing::trace!(id = envelope.id, method = %envelope.method, "dispatching call");
        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(arg, &envelope))) {
            Ok(Ok(response)) => response::dispatch(response, replier),
            Ok(Err(err)) => replier.fail(&err),
            Err(panic) => replier.panicked(&*panic),
        }
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

async fn read_loop(shared: Arc<Shared>, reader: BoxedReader) {
    let mut frames = FramedRead::new(reader, RpcCodec::with_config(&shared.config.frame));
    let reason = loop {
        match frames.next().await {
            Some(Ok(frame)) => shared.on_frame(&frame),
            Some(Err(err)) => {
                tracing::warn!(error = %err, "read loop stopped on framing error");
                break "framing error";
            }
            None => {
                // Half-close: answer what the peer already asked first.
                let failed = shared.pending().close();
                shared.responders.close();
                tracing::debug!(
                    in_flight = shared.responders.len(),
                    failed_calls = failed,
                    "peer finished sending"
                );
                shared.responders.wait().await;
                break "end of stream";
            }
        }
    };
    shared.shut_down(reason);
}

async fn write_loop(
    shared: Arc<Shared>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    writer: BoxedWriter,
) {
    let write_timeout = shared.config.frame.write_timeout;
    let mut sink = FramedWrite::new(writer, RpcCodec::with_config(&shared.config.frame));

    while let Some(Outbound::Frame(frame)) = outbound.recv().await {
        let sent = match write_timeout {
            Some(limit) => tokio::time::timeout(limit, sink.send(frame))
                .await
                .unwrap_or_else(|_| {
                    Err(FrameError::Io(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "frame write timed out",
                    )))
                }),
            None => sink.send(frame).await,
        };
        if let Err(err) = sent {
            tracing::warn!(error = %err, "write loop stopped");
            shared.shut_down("write error");
            return;
        }
    }

    if let Err(err) = sink.close().await {
        tracing::debug!(error = %err, "closing write half failed");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
