use std::net::SocketAddr;
use std::time::Duration;

use abyss_sniffer::aggregator::frame::TelemetryFrame;
use abyss_sniffer::config::PublisherConfig;
use abyss_sniffer::publish::Publisher;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn test_config() -> PublisherConfig {
    PublisherConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        server_name: "abyss-test".to_string(),
        subscriber_queue: 4,
        send_timeout: Duration::from_millis(500),
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/"))
        .await
        .unwrap();
    ws
}

/// Next text message as JSON, skipping control frames.
async fn next_json(ws: &mut Client) -> Value {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("stream ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a message")
}

async fn wait_for_subscribers(publisher: &Publisher, n: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while publisher.subscriber_count() != n {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("expected {n} subscribers"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hello_then_pong() {
    let publisher = Publisher::new(&test_config());
    let addr = publisher.start().await.unwrap();

    let mut ws = connect(addr).await;
    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "hello");
    assert_eq!(hello["schema"], 1);
    assert_eq!(hello["server"], "abyss-test");
    assert_eq!(hello["version"], env!("CARGO_PKG_VERSION"));

    ws.send(Message::Text(r#"{"type":"ping","t":42.5}"#.into()))
        .await
        .unwrap();
    assert_eq!(next_json(&mut ws).await, json!({"type": "pong", "t": 42.5}));

    publisher.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_messages_are_ignored() {
    let publisher = Publisher::new(&test_config());
    let addr = publisher.start().await.unwrap();

    let mut ws = connect(addr).await;
    next_json(&mut ws).await;

    for junk in ["hello?", r#"{"type":"subscribe"}"#, r#"{"t":1}"#] {
        ws.send(Message::Text(junk.into())).await.unwrap();
    }
    ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"ping","t":7}"#.into()))
        .await
        .unwrap();

    // The pong is the first reply, so nothing answered the junk.
    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "pong");
    assert_eq!(reply["t"], 7.0);

    publisher.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcast_reaches_all_subscribers() {
    let publisher = Publisher::new(&test_config());
    let addr = publisher.start().await.unwrap();

    let mut a = connect(addr).await;
    let mut b = connect(addr).await;
    next_json(&mut a).await;
    next_json(&mut b).await;
    wait_for_subscribers(&publisher, 2).await;

    let mut frame = TelemetryFrame::new(1.5);
    frame.net.bps = 9000;
    assert_eq!(publisher.broadcast(&frame), 2);

    for ws in [&mut a, &mut b] {
        let v = next_json(ws).await;
        assert_eq!(v["schema"], 1);
        assert_eq!(v["t"], 1.5);
        assert_eq!(v["net"]["bps"], 9000);
    }

    let stats = publisher.stats();
    assert_eq!(stats.broadcasts, 1);
    assert_eq!(stats.subscribers, 2);

    publisher.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_leaves_other_sessions_alone() {
    let publisher = Publisher::new(&test_config());
    let addr = publisher.start().await.unwrap();

    let mut stays = connect(addr).await;
    let mut leaves = connect(addr).await;
    next_json(&mut stays).await;
    next_json(&mut leaves).await;
    wait_for_subscribers(&publisher, 2).await;

    leaves.close(None).await.unwrap();
    drop(leaves);
    wait_for_subscribers(&publisher, 1).await;

    assert_eq!(publisher.broadcast(&TelemetryFrame::new(3.0)), 1);
    assert_eq!(next_json(&mut stays).await["t"], 3.0);

    publisher.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_closes_sessions() {
    let publisher = Publisher::new(&test_config());
    let addr = publisher.start().await.unwrap();

    let mut ws = connect(addr).await;
    next_json(&mut ws).await;
    wait_for_subscribers(&publisher, 1).await;

    publisher.stop().await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session was not closed");
    assert_eq!(publisher.subscriber_count(), 0);
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bind_conflict_is_a_startup_error() {
    let first = Publisher::new(&test_config());
    let addr = first.start().await.unwrap();

    let second = Publisher::new(&PublisherConfig {
        addr,
        ..test_config()
    });
    let err = second.start().await.unwrap_err();
    assert!(err.to_string().contains("listening on"));

    first.stop().await.unwrap();
}
