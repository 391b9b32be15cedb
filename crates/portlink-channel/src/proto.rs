//! The channel protocol: one bidirectional RPC endpoint over one message
//! port.
//!
//! A [`ChannelProtocol`] owns an outbound and an inbound [`Pipeline`] built
//! from the stages in [`crate::stages`]. Outbound calls fold a
//! [`SendContext`] through prepare → correlation → disconnect gate →
//! serialize → send; inbound payloads fold a [`RecvContext`] through
//! normalize → deserialize → request/response dispatch. Sends attempted
//! while disconnected halt at the gate and are parked; [`activate`]
//! resumes them from the stage after the halt, so correlation state
//! allocated before the halt is never redone.
//!
//! [`activate`]: ChannelProtocol::activate

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use portlink_buffer::{BufferPair, BufferRegistry, Payload, JSON_FORMAT};
use portlink_prims::{Event, Promise, Subscription};
use serde_json::Value;

use crate::context::{RecvContext, SendContext, SignalListener};
use crate::error::{ChannelError, Result};
use crate::handler::HandlerResolver;
use crate::message::{
    is_event_method, Message, RemoteError, RequestHeader, RequestKind,
};
use crate::pipeline::{GatedContext, Pipeline, Stage};
use crate::port::{MessagePort, TransferList};
use crate::seq::SeqGen;
use crate::stages::{self, STAGE_HANDLE_REQUEST, STAGE_SEND_REQUEST};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Construction options for a [`ChannelProtocol`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Channel name, carried in request headers and log events.
    pub name: String,
    /// Start in the connected state instead of buffering sends.
    pub connected: bool,
    /// Serialization format resolved against the buffer registry.
    pub format: String,
    /// Reject outstanding requests with an internal error on disconnect
    /// instead of leaving them pending for a reconnect.
    pub reject_pending_on_disconnect: bool,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            name: "channel".to_string(),
            connected: false,
            format: JSON_FORMAT.to_string(),
            reject_pending_on_disconnect: false,
        }
    }
}

impl ChannelOptions {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    pub fn with_reject_pending_on_disconnect(mut self, reject: bool) -> Self {
        self.reject_pending_on_disconnect = reject;
        self
    }
}

#[derive(Default)]
pub(crate) struct PortBinding {
    pub(crate) port: Option<Arc<dyn MessagePort>>,
    pub(crate) subscription: Option<Subscription>,
}

pub(crate) struct ProtoInner {
    pub(crate) name: String,
    pub(crate) options: ChannelOptions,
    pub(crate) seq: SeqGen,
    pub(crate) connected: AtomicBool,
    pub(crate) disposed: AtomicBool,
    pub(crate) buffers: BufferPair,
    pub(crate) binding: Mutex<PortBinding>,
    /// Outstanding promise requests awaiting a terminal response.
    pub(crate) pending: Mutex<HashMap<String, portlink_prims::Deferred<Value, RemoteError>>>,
    /// Persistent event-method listeners, keyed by sequence id.
    pub(crate) listeners: Mutex<HashMap<String, SignalListener>>,
    /// Sends halted by the disconnect gate, awaiting resume.
    pub(crate) parked: Mutex<Vec<SendContext>>,
    /// Server-side signal teardowns, disposed on signal abort.
    pub(crate) teardowns: Mutex<HashMap<String, portlink_prims::Disposable>>,
    resolver: RwLock<Option<Arc<dyn HandlerResolver>>>,
    send_pipeline: RwLock<Pipeline<SendContext>>,
    recv_pipeline: RwLock<Pipeline<RecvContext>>,
    on_connect: Event<()>,
    on_disconnect: Event<()>,
}

impl ProtoInner {
    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn resolver(&self) -> Option<Arc<dyn HandlerResolver>> {
        self.resolver
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn send_payload(
        &self,
        payload: Payload,
        transfer: Option<TransferList>,
    ) -> Result<()> {
        let port = lock(&self.binding).port.clone();
        let Some(port) = port else {
            return Err(ChannelError::NoPort(self.name.clone()));
        };
        port.send(payload, transfer)?;
        Ok(())
    }

    fn handle_inbound(self: &Arc<Self>, payload: Payload, ports: TransferList) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let ctx = RecvContext::new(payload, ports);
        let result = {
            let pipeline = self.recv_pipeline.read().unwrap_or_else(PoisonError::into_inner);
            pipeline.run(ctx)
        };
        if let Err(err) = result {
            tracing::warn!(channel = %self.name, error = %err, "inbound pipeline failed");
        }
    }
}

/// A bidirectional RPC channel over a pluggable [`MessagePort`].
///
/// Cheap to clone; all clones share one endpoint.
#[derive(Clone)]
pub struct ChannelProtocol {
    inner: Arc<ProtoInner>,
}

impl ChannelProtocol {
    pub fn new(options: ChannelOptions) -> Self {
        Self::build(options, BufferPair::json())
    }

    /// Create a channel whose buffers come from `registry` by the
    /// configured format name. An unknown format logs a warning and falls
    /// back to JSON rather than failing construction.
    pub fn with_registry(options: ChannelOptions, registry: &BufferRegistry) -> Self {
        let buffers = match registry.create(&options.format) {
            Ok(buffers) => buffers,
            Err(err) => {
                tracing::warn!(
                    channel = %options.name,
                    format = %options.format,
                    error = %err,
                    "falling back to json buffers"
                );
                BufferPair::json()
            }
        };
        Self::build(options, buffers)
    }

    fn build(options: ChannelOptions, buffers: BufferPair) -> Self {
        let inner = Arc::new_cyclic(|weak| {
            let mut send_pipeline = Pipeline::new();
            for stage in stages::outbound_stages(weak) {
                send_pipeline.push(stage);
            }
            let mut recv_pipeline = Pipeline::new();
            for stage in stages::inbound_stages(weak) {
                recv_pipeline.push(stage);
            }

            ProtoInner {
                name: options.name.clone(),
                seq: SeqGen::new(),
                connected: AtomicBool::new(options.connected),
                disposed: AtomicBool::new(false),
                buffers,
                binding: Mutex::new(PortBinding::default()),
                pending: Mutex::new(HashMap::new()),
                listeners: Mutex::new(HashMap::new()),
                parked: Mutex::new(Vec::new()),
                teardowns: Mutex::new(HashMap::new()),
                resolver: RwLock::new(None),
                send_pipeline: RwLock::new(send_pipeline),
                recv_pipeline: RwLock::new(recv_pipeline),
                on_connect: Event::new(),
                on_disconnect: Event::new(),
                options,
            }
        });
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn format(&self) -> &str {
        self.inner.buffers.writer.format()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// The per-instance sequence-id key prefix.
    pub fn seq_key(&self) -> &str {
        self.inner.seq.key()
    }

    /// Bind `port` as the channel's transport without changing the
    /// connected state. A previously bound port is closed first.
    pub fn bind_port(&self, port: Arc<dyn MessagePort>) -> Result<()> {
        if self.is_disposed() {
            return Err(ChannelError::Disposed);
        }
        let weak = Arc::downgrade(&self.inner);
        let subscription = port.subscribe(Arc::new(move |payload, ports| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_inbound(payload, ports);
            }
        }));

        let mut binding = lock(&self.inner.binding);
        if let Some(previous) = binding.port.take() {
            previous.close();
        }
        binding.subscription = Some(subscription);
        binding.port = Some(port);
        Ok(())
    }

    /// Bind `port` and immediately activate the channel.
    pub fn connect(&self, port: Arc<dyn MessagePort>) -> Result<()> {
        self.bind_port(port)?;
        self.activate();
        Ok(())
    }

    /// Mark the channel connected, fire the connect event, and resume any
    /// sends parked while disconnected, in arrival order.
    pub fn activate(&self) {
        if self.is_disposed() || self.inner.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.on_connect.fire(());
        self.drain_parked();
    }

    fn drain_parked(&self) {
        let parked: Vec<SendContext> = lock(&self.inner.parked).drain(..).collect();
        if parked.is_empty() {
            return;
        }
        tracing::debug!(channel = %self.name(), count = parked.len(), "resuming parked sends");
        let pipeline = self
            .inner
            .send_pipeline
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for ctx in parked {
            if let Err(err) = pipeline.resume(ctx) {
                tracing::warn!(channel = %self.name(), error = %err, "parked send failed");
            }
        }
    }

    /// Mark the channel disconnected and fire the disconnect event. Later
    /// sends park until [`activate`](Self::activate); pending requests stay
    /// pending unless `reject_pending_on_disconnect` is set.
    pub fn disconnect(&self) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        if self.inner.options.reject_pending_on_disconnect {
            let drained: Vec<_> = {
                let mut pending = lock(&self.inner.pending);
                pending.drain().collect()
            };
            for (seq_id, deferred) in drained {
                deferred.reject(RemoteError::internal("channel disconnected"));
                tracing::debug!(channel = %self.name(), seq_id, "rejected pending request");
            }
        }
        self.inner.on_disconnect.fire(());
    }

    pub fn on_connect(
        &self,
        listener: impl Fn(&()) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.on_connect.subscribe(listener)
    }

    pub fn on_disconnect(
        &self,
        listener: impl Fn(&()) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.on_disconnect.subscribe(listener)
    }

    /// Install the handler resolver consulted for inbound requests.
    pub fn bind_resolver(&self, resolver: Arc<dyn HandlerResolver>) {
        *self
            .inner
            .resolver
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(resolver);
    }

    /// Issue a promise request and return the promise for its reply.
    ///
    /// Event-method names are rejected; use [`subscribe`](Self::subscribe)
    /// for those.
    pub fn request(
        &self,
        path: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Promise<Value, RemoteError>> {
        if is_event_method(method) {
            return Err(ChannelError::EventMethod(method.to_string()));
        }
        let (reply, _) = self.run_outbound(SendContext::new(path, method, args))?;
        reply.ok_or_else(|| {
            ChannelError::Malformed("promise request produced no reply promise".to_string())
        })
    }

    /// Issue a prepared context as-is. Used by callers that set an explicit
    /// kind, a transfer list, or a listener. Returns the reply promise for
    /// promise-kind requests.
    pub fn request_with(
        &self,
        ctx: SendContext,
    ) -> Result<Option<Promise<Value, RemoteError>>> {
        let (reply, _) = self.run_outbound(ctx)?;
        Ok(reply)
    }

    /// Subscribe to a remote event method. Every value the peer emits for
    /// this subscription invokes `listener`; dropping the returned
    /// [`Subscription`] sends a signal abort and removes the listener.
    pub fn subscribe(
        &self,
        path: &str,
        method: &str,
        args: Vec<Value>,
        listener: impl Fn(&[Value]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        if !is_event_method(method) {
            return Err(ChannelError::EventMethod(method.to_string()));
        }
        let ctx = SendContext::new(path, method, args).with_listener(Arc::new(listener));
        let (_, seq_id) = self.run_outbound(ctx)?;
        let Some(seq_id) = seq_id else {
            return Err(ChannelError::Malformed(
                "signal request allocated no sequence id".to_string(),
            ));
        };

        let proto = self.clone();
        let path = path.to_string();
        let method = method.to_string();
        Ok(Subscription::new(move || {
            if let Err(err) = proto.abort_signal(&path, &method, &seq_id) {
                tracing::debug!(error = %err, "signal abort not delivered");
            }
        }))
    }

    /// Remove the local listener for `seq_id` and, when connected, notify
    /// the peer so its handler teardown runs.
    pub fn abort_signal(&self, path: &str, method: &str, seq_id: &str) -> Result<()> {
        lock(&self.inner.listeners).remove(seq_id);
        if !self.is_connected() || self.is_disposed() {
            return Ok(());
        }
        // Aborts bypass the pipeline: they carry their own correlation and
        // must not allocate a new sequence id or park.
        let header = RequestHeader {
            kind: RequestKind::SignalAbort,
            seq_id: seq_id.to_string(),
            path: path.to_string(),
            method: method.to_string(),
            channel: Some(self.inner.name.clone()),
        };
        let message = Message::request(header, Vec::new());
        let payload = self.inner.buffers.writer.encode(&message.to_value())?;
        self.inner.send_payload(payload, None)
    }

    /// Feed an inbound payload into the receive pipeline. Transport
    /// adapters call this (via the port subscription); it is public for
    /// in-process and test wiring.
    pub fn on_message(&self, payload: Payload, ports: TransferList) {
        self.inner.handle_inbound(payload, ports);
    }

    /// Write an already-encoded payload straight to the bound port,
    /// bypassing the outbound pipeline. Replies and aborts carry their own
    /// correlation and must not allocate a new sequence id or park.
    pub fn send_reply(&self, payload: Payload) -> Result<()> {
        if self.is_disposed() {
            return Err(ChannelError::Disposed);
        }
        self.inner.send_payload(payload, None)
    }

    /// Insert an outbound stage ahead of the final send stage.
    pub fn add_send_middleware(&self, stage: Stage<SendContext>) {
        self.inner
            .send_pipeline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_before(STAGE_SEND_REQUEST, stage);
    }

    /// Insert an inbound stage ahead of request dispatch.
    pub fn add_recv_middleware(&self, stage: Stage<RecvContext>) {
        self.inner
            .recv_pipeline
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert_before(STAGE_HANDLE_REQUEST, stage);
    }

    /// Outstanding promise requests awaiting replies.
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Sends parked by the disconnect gate.
    pub fn parked_sends(&self) -> usize {
        lock(&self.inner.parked).len()
    }

    /// Tear the channel down: close and unbind the port and drop event
    /// subscriptions. Outstanding promises are left unsettled; callers
    /// that need them rejected use `reject_pending_on_disconnect` and
    /// disconnect first.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.connected.store(false, Ordering::SeqCst);
        let (port, subscription) = {
            let mut binding = lock(&self.inner.binding);
            (binding.port.take(), binding.subscription.take())
        };
        drop(subscription);
        if let Some(port) = port {
            port.close();
        }
        lock(&self.inner.listeners).clear();
        lock(&self.inner.parked).clear();
        tracing::debug!(channel = %self.name(), "channel disposed");
    }

    fn run_outbound(
        &self,
        ctx: SendContext,
    ) -> Result<(Option<Promise<Value, RemoteError>>, Option<String>)> {
        if self.is_disposed() {
            return Err(ChannelError::Disposed);
        }
        let mut out = {
            let pipeline = self
                .inner
                .send_pipeline
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            pipeline.run(ctx)?
        };
        let reply = out.reply.take();
        let seq_id = out.seq_id().map(str::to_string);
        if out.halted_at().is_some() {
            tracing::debug!(
                channel = %self.name(),
                method = %out.method,
                seq_id = ?seq_id,
                "parked send while disconnected"
            );
            lock(&self.inner.parked).push(out);
        }
        Ok((reply, seq_id))
    }
}

impl std::fmt::Debug for ChannelProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelProtocol")
            .field("name", &self.inner.name)
            .field("format", &self.format())
            .field("connected", &self.is_connected())
            .field("pending", &self.pending_requests())
            .field("parked", &self.parked_sends())
            .finish()
    }
}
