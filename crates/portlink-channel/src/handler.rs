use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use portlink_prims::Disposable;
use serde_json::Value;

use crate::error::Result;
use crate::message::{RemoteError, ResponseKind};

/// A registered service method.
pub type Handler = Arc<dyn Fn(CallContext) -> std::result::Result<Value, RemoteError> + Send + Sync>;

/// Per-invocation context handed to a handler.
///
/// Promise-method handlers return their result and are done. Event-method
/// handlers keep the [`SignalEmitter`] and push values through it for as
/// long as the subscription lives; `set_teardown` registers the cleanup run
/// when the peer aborts the signal.
pub struct CallContext {
    args: Vec<Value>,
    emitter: SignalEmitter,
}

impl CallContext {
    pub(crate) fn new(args: Vec<Value>, emitter: SignalEmitter) -> Self {
        Self { args, emitter }
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn emitter(&self) -> SignalEmitter {
        self.emitter.clone()
    }

    /// Register cleanup to run when the peer sends a signal abort.
    pub fn set_teardown(&self, teardown: Disposable) {
        (self.emitter.register_teardown)(teardown);
    }
}

impl std::fmt::Debug for CallContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallContext")
            .field("args", &self.args.len())
            .field("seq_id", &self.emitter.seq_id)
            .finish()
    }
}

type EmitFn = Arc<dyn Fn(ResponseKind, Vec<Value>) -> Result<()> + Send + Sync>;
type TeardownFn = Arc<dyn Fn(Disposable) + Send + Sync>;

/// Sends responses correlated to one request's sequence id.
#[derive(Clone)]
pub struct SignalEmitter {
    seq_id: String,
    send: EmitFn,
    register_teardown: TeardownFn,
}

impl SignalEmitter {
    pub(crate) fn new(seq_id: String, send: EmitFn, register_teardown: TeardownFn) -> Self {
        Self {
            seq_id,
            send,
            register_teardown,
        }
    }

    pub fn seq_id(&self) -> &str {
        &self.seq_id
    }

    /// Push a value to the subscribed peer listener.
    pub fn emit(&self, value: Value) -> Result<()> {
        (self.send)(ResponseKind::ReturnSuccess, vec![value])
    }

    /// Push an error to the subscribed peer listener.
    pub fn emit_error(&self, err: RemoteError) -> Result<()> {
        let body = err.to_value(&self.seq_id);
        (self.send)(ResponseKind::ReturnFail, vec![body])
    }
}

impl std::fmt::Debug for SignalEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalEmitter")
            .field("seq_id", &self.seq_id)
            .finish()
    }
}

/// Method-name-keyed set of handlers for one service.
pub struct HandlerSet {
    handlers: RwLock<HashMap<String, Handler>>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace) a handler for a method name.
    pub fn register_handler(&self, method: impl Into<String>, handler: Handler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(method.into(), handler);
    }

    /// Convenience wrapper taking a plain closure.
    pub fn register_fn(
        &self,
        method: impl Into<String>,
        f: impl Fn(CallContext) -> std::result::Result<Value, RemoteError> + Send + Sync + 'static,
    ) {
        self.register_handler(method, Arc::new(f));
    }

    pub fn get_handler(&self, method: &str) -> Option<Handler> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
    }

    /// Registered method names, sorted.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerSet")
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Resolves a service path and method name to a handler.
///
/// The seam between the protocol's inbound dispatch and the path-keyed
/// service registries layered above it.
pub trait HandlerResolver: Send + Sync {
    fn resolve(&self, path: &str, method: &str) -> Option<Handler>;
}

/// A bare handler set answers for any path.
impl HandlerResolver for HandlerSet {
    fn resolve(&self, _path: &str, method: &str) -> Option<Handler> {
        self.get_handler(method)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn register_and_resolve_handlers() {
        let set = HandlerSet::new();
        set.register_fn("echo", |ctx| Ok(ctx.arg(0).cloned().unwrap_or(Value::Null)));

        assert!(set.get_handler("echo").is_some());
        assert!(set.get_handler("missing").is_none());
        assert!(set.resolve("any/path", "echo").is_some());
        assert_eq!(set.method_names(), vec!["echo".to_string()]);
    }

    #[test]
    fn handler_sees_call_args() {
        let set = HandlerSet::new();
        set.register_fn("sum", |ctx| {
            let total: i64 = ctx.args().iter().filter_map(Value::as_i64).sum();
            Ok(json!(total))
        });

        let emitter = SignalEmitter::new(
            "k_0".to_string(),
            Arc::new(|_, _| Ok(())),
            Arc::new(|_| {}),
        );
        let ctx = CallContext::new(vec![json!(1), json!(2), json!(3)], emitter);

        let handler = set.get_handler("sum").unwrap();
        assert_eq!(handler(ctx).unwrap(), json!(6));
    }

    #[test]
    fn emitter_forwards_values_with_its_seq_id() {
        let sent = Arc::new(std::sync::Mutex::new(Vec::new()));
        let emitter = SignalEmitter::new(
            "k_9".to_string(),
            Arc::new({
                let sent = Arc::clone(&sent);
                move |kind, body| {
                    sent.lock().unwrap().push((kind, body));
                    Ok(())
                }
            }),
            Arc::new(|_| {}),
        );

        emitter.emit(json!("tick")).unwrap();
        emitter.emit_error(RemoteError::internal("broke")).unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, ResponseKind::ReturnSuccess);
        assert_eq!(sent[0].1, vec![json!("tick")]);
        assert_eq!(sent[1].0, ResponseKind::ReturnFail);
        assert_eq!(emitter.seq_id(), "k_9");
    }
}
