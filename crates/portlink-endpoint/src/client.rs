use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use portlink_channel::{
    is_event_method, is_port_transfer_method, ChannelError, ChannelProtocol, RemoteError, Result,
    SendContext,
};
use portlink_prims::{Promise, Subscription};
use serde_json::Value;

/// Calling-side handle for one remote service path.
///
/// Routes by method name: ordinary names issue promise requests, `on`-prefixed
/// event methods must go through [`subscribe`](Self::subscribe), and the port
/// transfer method forwards its final argument as the transfer list.
#[derive(Clone)]
pub struct ChannelClient {
    channel: ChannelProtocol,
    path: String,
}

impl ChannelClient {
    pub fn new(channel: ChannelProtocol, path: impl Into<String>) -> Self {
        Self {
            channel,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn channel(&self) -> &ChannelProtocol {
        &self.channel
    }

    /// Invoke a promise method and return the promise for its reply.
    pub fn call(&self, method: &str, mut args: Vec<Value>) -> Result<Promise<Value, RemoteError>> {
        if is_event_method(method) {
            return Err(ChannelError::EventMethod(method.to_string()));
        }
        if is_port_transfer_method(method) {
            // The trailing argument is the list of transferable handles; it
            // rides beside the payload rather than inside it.
            let transfer = match args.pop() {
                Some(Value::Array(handles)) => handles,
                Some(other) => {
                    args.push(other);
                    Vec::new()
                }
                None => Vec::new(),
            };
            let ctx = SendContext::new(&self.path, method, args).with_transfer(transfer);
            return self.channel.request_with(ctx)?.ok_or_else(|| {
                ChannelError::Malformed("promise request produced no reply promise".to_string())
            });
        }
        self.channel.request(&self.path, method, args)
    }

    /// Invoke a promise method and block for the reply.
    ///
    /// `None` means the timeout elapsed; the promise stays pending and the
    /// reply, if it ever arrives, is dropped with it.
    pub fn call_wait(
        &self,
        method: &str,
        args: Vec<Value>,
        timeout: Duration,
    ) -> Result<Option<std::result::Result<Value, RemoteError>>> {
        Ok(self.call(method, args)?.wait_timeout(timeout))
    }

    /// Subscribe to a remote event method.
    pub fn subscribe(
        &self,
        method: &str,
        args: Vec<Value>,
        listener: impl Fn(&[Value]) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.channel.subscribe(&self.path, method, args, listener)
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("path", &self.path)
            .field("channel", &self.channel.name())
            .finish()
    }
}

/// Caches one [`ChannelClient`] per service path over a shared channel.
pub struct ClientRegistry {
    channel: ChannelProtocol,
    clients: Mutex<HashMap<String, ChannelClient>>,
}

impl ClientRegistry {
    pub fn new(channel: ChannelProtocol) -> Self {
        Self {
            channel,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The client for `path`, created on first use.
    pub fn client(&self, path: impl Into<String>) -> ChannelClient {
        let path = path.into();
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.clone())
            .or_insert_with(|| ChannelClient::new(self.channel.clone(), path))
            .clone()
    }

    pub fn channel(&self) -> &ChannelProtocol {
        &self.channel
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let paths: Vec<String> = self
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ClientRegistry")
            .field("channel", &self.channel.name())
            .field("paths", &paths)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use portlink_channel::{ChannelOptions, MessagePort};
    use portlink_transport::MemoryPort;
    use serde_json::json;

    use super::*;
    use crate::service::ServiceRegistry;

    fn linked_pair() -> (ChannelProtocol, ChannelProtocol) {
        let (a, b) = MemoryPort::pair();
        let client_side = ChannelProtocol::new(ChannelOptions::default().with_name("client"));
        let server_side = ChannelProtocol::new(ChannelOptions::default().with_name("server"));
        client_side.connect(a as Arc<dyn MessagePort>).unwrap();
        server_side.connect(b as Arc<dyn MessagePort>).unwrap();
        (client_side, server_side)
    }

    #[test]
    fn call_round_trips_through_a_service() {
        let (client_side, server_side) = linked_pair();
        let services = Arc::new(ServiceRegistry::new());
        services.service("calc").register_fn("add", |ctx| {
            let sum: i64 = ctx.args().iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });
        services.bind(&server_side);

        let client = ChannelClient::new(client_side, "calc");
        let reply = client
            .call_wait("add", vec![json!(2), json!(3)], Duration::from_secs(1))
            .unwrap()
            .expect("reply within timeout");
        assert_eq!(reply.unwrap(), json!(5));
    }

    #[test]
    fn unknown_method_surfaces_remote_error() {
        let (client_side, server_side) = linked_pair();
        let services = Arc::new(ServiceRegistry::new());
        services.bind(&server_side);

        let client = ChannelClient::new(client_side, "calc");
        let reply = client
            .call_wait("missing", vec![], Duration::from_secs(1))
            .unwrap()
            .expect("reply within timeout");
        let err = reply.unwrap_err();
        assert_eq!(err.code, -32601);
    }

    #[test]
    fn event_methods_are_rejected_by_call() {
        let (client_side, _server_side) = linked_pair();
        let client = ChannelClient::new(client_side, "calc");
        assert!(matches!(
            client.call("onChange", vec![]),
            Err(ChannelError::EventMethod(_))
        ));
    }

    #[test]
    fn subscribe_streams_emitted_values() {
        let (client_side, server_side) = linked_pair();
        let services = Arc::new(ServiceRegistry::new());
        services.service("clock").register_fn("onTick", |ctx| {
            let emitter = ctx.emitter();
            emitter.emit(json!(1)).unwrap();
            emitter.emit(json!(2)).unwrap();
            Ok(Value::Null)
        });
        services.bind(&server_side);

        let received = Arc::new(Mutex::new(Vec::new()));
        let client = ChannelClient::new(client_side, "clock");
        let _sub = client
            .subscribe("onTick", vec![], {
                let received = Arc::clone(&received);
                move |body| received.lock().unwrap().extend(body.to_vec())
            })
            .unwrap();

        assert_eq!(*received.lock().unwrap(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn registry_caches_clients_per_path() {
        let (client_side, _server_side) = linked_pair();
        let registry = ClientRegistry::new(client_side);
        let a = registry.client("calc");
        let b = registry.client("calc");
        assert_eq!(a.path(), b.path());
        assert_eq!(registry.channel().name(), "client");
    }
}
