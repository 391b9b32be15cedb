//! End-to-end tests wiring channels, endpoints, and transports together.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use portlink::channel::{ChannelOptions, ChannelProtocol, MessagePort};
use portlink::endpoint::{ChannelClient, ServiceRegistry};
use portlink::transport::MemoryPort;
use serde_json::{json, Value};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);

fn linked_channels(client_name: &str, server_name: &str) -> (ChannelProtocol, ChannelProtocol) {
    let (a, b) = MemoryPort::pair();
    let client = ChannelProtocol::new(ChannelOptions::default().with_name(client_name));
    let server = ChannelProtocol::new(ChannelOptions::default().with_name(server_name));
    client.connect(a as Arc<dyn MessagePort>).unwrap();
    server.connect(b as Arc<dyn MessagePort>).unwrap();
    (client, server)
}

fn echo_services() -> Arc<ServiceRegistry> {
    let services = Arc::new(ServiceRegistry::new());
    services
        .service("echo")
        .register_fn("echo", |ctx| Ok(ctx.arg(0).cloned().unwrap_or(Value::Null)));
    services
}

#[test]
fn echo_round_trip_preserves_the_value() {
    let (client_side, server_side) = linked_channels("client", "server");
    echo_services().bind(&server_side);

    let client = ChannelClient::new(client_side, "echo");
    let payload = json!({"nested": {"list": [1, 2, 3], "text": "round trip"}});
    let reply = client
        .call_wait("echo", vec![payload.clone()], REPLY_TIMEOUT)
        .unwrap()
        .expect("reply within timeout");
    assert_eq!(reply.unwrap(), payload);
}

#[test]
fn requests_issued_before_connect_are_delivered_after() {
    let (port_a, port_b) = MemoryPort::pair();
    let client_side = ChannelProtocol::new(ChannelOptions::default().with_name("client"));
    let server_side = ChannelProtocol::new(ChannelOptions::default().with_name("server"));
    server_side.connect(port_b as Arc<dyn MessagePort>).unwrap();
    echo_services().bind(&server_side);

    // Issue before the client has any transport at all.
    let client = ChannelClient::new(client_side.clone(), "echo");
    let early = client.call("echo", vec![json!("early")]).unwrap();
    assert_eq!(client_side.parked_sends(), 1);
    assert!(early.try_get().is_none());

    client_side.connect(port_a as Arc<dyn MessagePort>).unwrap();

    assert_eq!(client_side.parked_sends(), 0);
    assert_eq!(
        early.wait_timeout(REPLY_TIMEOUT).expect("reply after connect").unwrap(),
        json!("early")
    );
}

#[test]
fn concurrent_calls_resolve_to_their_own_results() {
    let (client_side, server_side) = linked_channels("client", "server");
    echo_services().bind(&server_side);
    let client = Arc::new(ChannelClient::new(client_side, "echo"));

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let client = Arc::clone(&client);
            std::thread::spawn(move || {
                for i in 0..25 {
                    let value = json!(format!("worker-{worker}-call-{i}"));
                    let reply = client
                        .call_wait("echo", vec![value.clone()], REPLY_TIMEOUT)
                        .unwrap()
                        .expect("reply within timeout");
                    assert_eq!(reply.unwrap(), value);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(client.channel().pending_requests(), 0);
}

#[test]
fn event_subscription_streams_until_dropped() {
    let (client_side, server_side) = linked_channels("client", "server");
    let services = Arc::new(ServiceRegistry::new());
    let emitters = Arc::new(Mutex::new(Vec::new()));
    services.service("feed").register_fn("onUpdate", {
        let emitters = Arc::clone(&emitters);
        move |ctx| {
            emitters.lock().unwrap().push(ctx.emitter());
            Ok(Value::Null)
        }
    });
    services.bind(&server_side);

    let received = Arc::new(Mutex::new(Vec::new()));
    let client = ChannelClient::new(client_side, "feed");
    let sub = client
        .subscribe("onUpdate", vec![], {
            let received = Arc::clone(&received);
            move |body| received.lock().unwrap().extend(body.to_vec())
        })
        .unwrap();

    let emitter = emitters.lock().unwrap().pop().expect("handler captured emitter");
    emitter.emit(json!("a")).unwrap();
    emitter.emit(json!("b")).unwrap();
    assert_eq!(*received.lock().unwrap(), vec![json!("a"), json!("b")]);

    drop(sub);
    emitter.emit(json!("c")).unwrap();
    assert_eq!(received.lock().unwrap().len(), 2, "emissions after abort are dropped");
}

#[cfg(unix)]
#[test]
fn echo_round_trip_over_unix_socket() {
    use portlink::transport::{connect_uds, UdsListener};

    let dir = std::env::temp_dir().join(format!("portlink-e2e-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let sock_path = dir.join("echo.sock");

    let listener = UdsListener::bind(&sock_path).unwrap();
    let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
    let server_thread = std::thread::spawn(move || {
        let port = listener.accept().unwrap();
        let server = ChannelProtocol::new(ChannelOptions::default().with_name("server"));
        server.connect(port as Arc<dyn MessagePort>).unwrap();
        echo_services().bind(&server);
        // Keep the server alive until the client is done.
        let _ = done_rx.recv_timeout(Duration::from_secs(5));
        server
    });

    let port = connect_uds(&sock_path).unwrap();
    let channel = ChannelProtocol::new(ChannelOptions::default().with_name("client"));
    channel.connect(port as Arc<dyn MessagePort>).unwrap();

    let client = ChannelClient::new(channel, "echo");
    let reply = client
        .call_wait("echo", vec![json!("over uds")], REPLY_TIMEOUT)
        .unwrap()
        .expect("reply within timeout");
    assert_eq!(reply.unwrap(), json!("over uds"));

    done_tx.send(()).unwrap();
    drop(server_thread.join().unwrap());
    let _ = std::fs::remove_dir_all(&dir);
}
