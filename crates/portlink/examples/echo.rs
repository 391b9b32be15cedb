//! Minimal in-process echo: two channels over a memory port pair.
//!
//! Run with `cargo run --example echo`.

use std::sync::Arc;
use std::time::Duration;

use portlink::channel::{ChannelOptions, ChannelProtocol, MessagePort};
use portlink::endpoint::{ChannelClient, ServiceRegistry};
use portlink::transport::MemoryPort;
use serde_json::{json, Value};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let (client_port, server_port) = MemoryPort::pair();

    let server = ChannelProtocol::new(ChannelOptions::default().with_name("echo-server"));
    server
        .connect(server_port as Arc<dyn MessagePort>)
        .expect("bind server port");

    let services = Arc::new(ServiceRegistry::new());
    services
        .service("echo")
        .register_fn("echo", |ctx| Ok(ctx.arg(0).cloned().unwrap_or(Value::Null)));
    services.bind(&server);

    let channel = ChannelProtocol::new(ChannelOptions::default().with_name("echo-client"));
    channel
        .connect(client_port as Arc<dyn MessagePort>)
        .expect("bind client port");

    let client = ChannelClient::new(channel, "echo");
    let reply = client
        .call_wait(
            "echo",
            vec![json!({"greeting": "hello, portlink"})],
            Duration::from_secs(1),
        )
        .expect("send request")
        .expect("reply within timeout")
        .expect("echo succeeds");

    tracing::info!(%reply, "echo replied");
}
