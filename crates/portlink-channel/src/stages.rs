//! Built-in pipeline stages.
//!
//! Outbound: `prepare` → `update_seq_info` → `handle_disconnected` →
//! `serialize` → user stages → `send_request`.
//! Inbound: `normalize` → `deserialize` → user stages → `handle_request` →
//! `handle_response`.

use std::sync::{Arc, Weak};

use portlink_prims::Deferred;
use serde_json::Value;

use crate::context::{RecvContext, SendContext};
use crate::error::{ChannelError, Result};
use crate::handler::{CallContext, SignalEmitter};
use crate::message::{
    is_event_method, is_options_method, Header, Message, RemoteError, RequestHeader, RequestKind,
    ResponseKind,
};
use crate::pipeline::{GatedContext, Lifecycle, Stage};
use crate::proto::{lock, ProtoInner};

pub(crate) const STAGE_PREPARE: &str = "prepare";
pub(crate) const STAGE_UPDATE_SEQ_INFO: &str = "update_seq_info";
pub(crate) const STAGE_HANDLE_DISCONNECTED: &str = "handle_disconnected";
pub(crate) const STAGE_SERIALIZE: &str = "serialize";
pub(crate) const STAGE_SEND_REQUEST: &str = "send_request";

pub(crate) const STAGE_NORMALIZE: &str = "normalize";
pub(crate) const STAGE_DESERIALIZE: &str = "deserialize";
pub(crate) const STAGE_HANDLE_REQUEST: &str = "handle_request";
pub(crate) const STAGE_HANDLE_RESPONSE: &str = "handle_response";

pub(crate) fn outbound_stages(weak: &Weak<ProtoInner>) -> Vec<Stage<SendContext>> {
    vec![
        proto_stage(weak, STAGE_PREPARE, Lifecycle::Prepare, ProtoInner::stage_prepare),
        proto_stage(
            weak,
            STAGE_UPDATE_SEQ_INFO,
            Lifecycle::Transform,
            ProtoInner::stage_update_seq_info,
        ),
        proto_stage(
            weak,
            STAGE_HANDLE_DISCONNECTED,
            Lifecycle::Transform,
            ProtoInner::stage_handle_disconnected,
        ),
        proto_stage(
            weak,
            STAGE_SERIALIZE,
            Lifecycle::DataOperation,
            ProtoInner::stage_serialize,
        ),
        proto_stage(
            weak,
            STAGE_SEND_REQUEST,
            Lifecycle::Send,
            ProtoInner::stage_send_request,
        ),
    ]
}

pub(crate) fn inbound_stages(weak: &Weak<ProtoInner>) -> Vec<Stage<RecvContext>> {
    vec![
        proto_stage(weak, STAGE_NORMALIZE, Lifecycle::Prepare, ProtoInner::stage_normalize),
        proto_stage(
            weak,
            STAGE_DESERIALIZE,
            Lifecycle::DataOperation,
            ProtoInner::stage_deserialize,
        ),
        proto_stage(
            weak,
            STAGE_HANDLE_REQUEST,
            Lifecycle::Send,
            ProtoInner::stage_handle_request,
        ),
        proto_stage(
            weak,
            STAGE_HANDLE_RESPONSE,
            Lifecycle::Send,
            ProtoInner::stage_handle_response,
        ),
    ]
}

/// Wrap a protocol method as a stage, failing cleanly once the protocol
/// instance is gone.
fn proto_stage<C: 'static>(
    weak: &Weak<ProtoInner>,
    name: &'static str,
    lifecycle: Lifecycle,
    run: fn(&Arc<ProtoInner>, C) -> Result<C>,
) -> Stage<C> {
    let weak = weak.clone();
    Stage::new(name, lifecycle, move |ctx| match weak.upgrade() {
        Some(inner) => run(&inner, ctx),
        None => Err(ChannelError::Disposed),
    })
}

impl ProtoInner {
    /// Shape the raw call into header/body and allocate the sequence id.
    fn stage_prepare(self: &Arc<Self>, mut ctx: SendContext) -> Result<SendContext> {
        let kind = ctx.kind.unwrap_or_else(|| {
            if is_event_method(&ctx.method) {
                RequestKind::SignalRequest
            } else {
                RequestKind::PromiseRequest
            }
        });
        ctx.kind = Some(kind);
        ctx.is_options = is_options_method(&ctx.method);
        ctx.body = std::mem::take(&mut ctx.args);
        ctx.header = Some(RequestHeader {
            kind,
            seq_id: self.seq.next(),
            path: ctx.path.clone(),
            method: ctx.method.clone(),
            channel: Some(self.name.clone()),
        });
        Ok(ctx)
    }

    /// Register the reply bookkeeping keyed by the allocated sequence id.
    fn stage_update_seq_info(self: &Arc<Self>, mut ctx: SendContext) -> Result<SendContext> {
        let header = ctx
            .header
            .clone()
            .ok_or_else(|| ChannelError::Malformed("update_seq_info ran before prepare".to_string()))?;

        match header.kind {
            RequestKind::SignalRequest => {
                if let Some(listener) = ctx.listener.clone() {
                    lock(&self.listeners).insert(header.seq_id.clone(), listener);
                }
                // The continuation lives locally; it never crosses the wire.
                ctx.body.clear();
            }
            RequestKind::PromiseRequest => {
                let deferred = Deferred::new();
                ctx.reply = Some(deferred.promise());
                lock(&self.pending).insert(header.seq_id.clone(), deferred);
            }
            RequestKind::PromiseAbort | RequestKind::SignalAbort => {}
        }
        Ok(ctx)
    }

    /// Park non-options sends while disconnected by raising the abort gate.
    fn stage_handle_disconnected(self: &Arc<Self>, mut ctx: SendContext) -> Result<SendContext> {
        if !self.is_connected() && !ctx.is_options {
            ctx.set_min_lifecycle(Lifecycle::Aborted);
        }
        Ok(ctx)
    }

    /// Encode header and body through the write buffer.
    fn stage_serialize(self: &Arc<Self>, mut ctx: SendContext) -> Result<SendContext> {
        let header = ctx
            .header
            .clone()
            .ok_or_else(|| ChannelError::Malformed("serialize ran before prepare".to_string()))?;
        let message = Message::request(header, ctx.body.clone());
        ctx.encoded = Some(self.buffers.writer.encode(&message.to_value())?);
        Ok(ctx)
    }

    /// Hand the encoded payload (plus any transfer list) to the bound port.
    fn stage_send_request(self: &Arc<Self>, ctx: SendContext) -> Result<SendContext> {
        let payload = ctx
            .encoded
            .clone()
            .ok_or_else(|| ChannelError::Malformed("send_request ran before serialize".to_string()))?;
        self.send_payload(payload, ctx.transfer.clone())?;
        Ok(ctx)
    }

    fn stage_normalize(self: &Arc<Self>, ctx: RecvContext) -> Result<RecvContext> {
        tracing::trace!(
            channel = %self.name,
            bytes = ctx.raw.len(),
            ports = ctx.ports.len(),
            "inbound message"
        );
        Ok(ctx)
    }

    /// Decode through the read buffer; on failure the raw payload passes
    /// through undecoded rather than aborting the pipeline.
    fn stage_deserialize(self: &Arc<Self>, mut ctx: RecvContext) -> Result<RecvContext> {
        match self.buffers.reader.decode(&ctx.raw) {
            Ok(value) => match Message::from_value(&value) {
                Ok(message) => ctx.message = Some(message),
                Err(err) => {
                    tracing::warn!(
                        channel = %self.name,
                        error = %err,
                        "unroutable inbound message; passing raw payload through"
                    );
                }
            },
            Err(err) => {
                tracing::warn!(
                    channel = %self.name,
                    error = %err,
                    "failed to decode inbound payload; passing it through"
                );
            }
        }
        Ok(ctx)
    }

    /// Dispatch request-kind messages to the bound handler resolver.
    fn stage_handle_request(self: &Arc<Self>, ctx: RecvContext) -> Result<RecvContext> {
        let Some(Message {
            header: Header::Request(req),
            body,
        }) = &ctx.message
        else {
            return Ok(ctx);
        };
        let req = req.clone();
        let body = body.clone();

        match req.kind {
            RequestKind::PromiseRequest => self.dispatch_call(&req, body, true),
            RequestKind::SignalRequest => self.dispatch_call(&req, body, false),
            RequestKind::SignalAbort => {
                if let Some(mut teardown) = lock(&self.teardowns).remove(&req.seq_id) {
                    use portlink_prims::Dispose;
                    if let Err(err) = teardown.dispose() {
                        tracing::warn!(
                            seq_id = %req.seq_id,
                            error = %err,
                            "signal teardown failed"
                        );
                    }
                }
            }
            RequestKind::PromiseAbort => {
                // Cancellation of in-flight handlers is not supported; the
                // handler runs to completion and its reply is delivered.
                tracing::debug!(seq_id = %req.seq_id, "promise abort received");
            }
        }
        Ok(ctx)
    }

    /// Settle the pending deferred or invoke the persistent listener
    /// registered under the response's sequence id.
    fn stage_handle_response(self: &Arc<Self>, ctx: RecvContext) -> Result<RecvContext> {
        let Some(Message {
            header: Header::Response(resp),
            body,
        }) = &ctx.message
        else {
            return Ok(ctx);
        };

        // Event-method listeners are persistent and fire on every response.
        let listener = lock(&self.listeners).get(&resp.seq_id).cloned();
        if let Some(listener) = listener {
            listener(body);
            return Ok(ctx);
        }

        match lock(&self.pending).remove(&resp.seq_id) {
            Some(deferred) => match resp.kind {
                ResponseKind::ReturnSuccess | ResponseKind::PortSuccess => {
                    deferred.resolve(body.first().cloned().unwrap_or(Value::Null));
                }
                ResponseKind::ReturnFail | ResponseKind::PortFail => {
                    deferred.reject(RemoteError::from_value(body.first()));
                }
            },
            None => {
                tracing::warn!(
                    channel = %self.name,
                    seq_id = %resp.seq_id,
                    "response for unknown sequence id"
                );
            }
        }
        Ok(ctx)
    }

    fn dispatch_call(self: &Arc<Self>, req: &RequestHeader, body: Vec<Value>, expects_reply: bool) {
        let resolver = self.resolver();
        let handler = resolver
            .as_ref()
            .and_then(|r| r.resolve(&req.path, &req.method));

        let Some(handler) = handler else {
            if expects_reply {
                let err = RemoteError::method_not_found(&req.method);
                self.send_response(
                    ResponseKind::ReturnFail,
                    &req.seq_id,
                    vec![err.to_value(&req.seq_id)],
                    &req.path,
                    &req.method,
                );
            } else {
                tracing::warn!(
                    path = %req.path,
                    method = %req.method,
                    "no handler registered for signal request"
                );
            }
            return;
        };

        let emitter = self.make_emitter(req.seq_id.clone());
        let call = CallContext::new(body, emitter);

        match handler(call) {
            Ok(result) if expects_reply => {
                self.send_response(
                    ResponseKind::ReturnSuccess,
                    &req.seq_id,
                    vec![result],
                    &req.path,
                    &req.method,
                );
            }
            Ok(_) => {}
            Err(err) if expects_reply => {
                self.send_response(
                    ResponseKind::ReturnFail,
                    &req.seq_id,
                    vec![err.to_value(&req.seq_id)],
                    &req.path,
                    &req.method,
                );
            }
            Err(err) => {
                tracing::warn!(
                    path = %req.path,
                    method = %req.method,
                    error = %err,
                    "signal handler failed"
                );
            }
        }
    }

    fn make_emitter(self: &Arc<Self>, seq_id: String) -> SignalEmitter {
        let weak = Arc::downgrade(self);
        let send = {
            let weak = weak.clone();
            let seq_id = seq_id.clone();
            Arc::new(move |kind: ResponseKind, body: Vec<Value>| -> Result<()> {
                let inner = weak.upgrade().ok_or(ChannelError::Disposed)?;
                inner.encode_and_send(kind, &seq_id, body)
            })
        };
        let register = {
            let seq_id = seq_id.clone();
            Arc::new(move |teardown: portlink_prims::Disposable| {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner.teardowns).insert(seq_id.clone(), teardown);
                }
            })
        };
        SignalEmitter::new(seq_id, send, register)
    }

    pub(crate) fn encode_and_send(
        &self,
        kind: ResponseKind,
        seq_id: &str,
        body: Vec<Value>,
    ) -> Result<()> {
        let message = Message::response(kind, seq_id, body);
        let payload = self.buffers.writer.encode(&message.to_value())?;
        self.send_payload(payload, None)
    }

    /// Send a reply, substituting a minimal error body if encoding fails.
    /// The reply is never silently dropped.
    fn send_response(
        &self,
        kind: ResponseKind,
        seq_id: &str,
        body: Vec<Value>,
        path: &str,
        method: &str,
    ) {
        if let Err(err) = self.encode_and_send(kind, seq_id, body) {
            match err {
                ChannelError::Buffer(buffer_err) => {
                    tracing::warn!(
                        path,
                        method,
                        error = %buffer_err,
                        "failed to encode reply; substituting error body"
                    );
                    let fallback =
                        RemoteError::internal("failed to encode response").to_value(seq_id);
                    if let Err(err) =
                        self.encode_and_send(ResponseKind::ReturnFail, seq_id, vec![fallback])
                    {
                        tracing::warn!(path, method, error = %err, "failed to send fallback reply");
                    }
                }
                other => {
                    tracing::warn!(path, method, error = %other, "failed to send reply");
                }
            }
        }
    }
}
