mod support;

use futures::{SinkExt, StreamExt};
use gateway::{ApiSettings, AppState, StreamProcessor, StreamSettings, SubscriberRegistry, router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use support::*;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use vision::DetectorHandle;

const TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn serve() -> (SocketAddr, Arc<StreamProcessor>) {
    let processor = Arc::new(StreamProcessor::new(
        Arc::new(SyntheticOpener::endless()),
        DetectorHandle::with_detector(FixedDetector::new(vec![detection("person", 0.9)]), 0.5),
        Arc::new(SubscriberRegistry::new()),
        StreamSettings {
            frame_interval: Duration::from_millis(1),
            read_backoff: Duration::from_millis(1),
            ..StreamSettings::default()
        },
    ));
    let app = router(AppState::new(processor.clone(), ApiSettings::default()));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (addr, processor)
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = connect_async(format!("ws://{addr}/stream/ws")).await.unwrap();
    client
}

/// Next text message as JSON; fails on anything else.
async fn next_json(client: &mut Client) -> Value {
    match tokio::time::timeout(TIMEOUT, client.next()).await.unwrap() {
        Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text message, got {other:?}"),
    }
}

async fn wait_for_subscribers(processor: &StreamProcessor, expected: usize) -> bool {
    tokio::time::timeout(TIMEOUT, async {
        while processor.subscriber_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn websocket_client_lifecycle() {
    let (addr, processor) = serve().await;

    let mut client = connect(addr).await;
    let greeting = next_json(&mut client).await;
    assert_eq!(greeting["type"], "connected");
    assert_eq!(greeting["message"], "Connected to AI-enhanced stream");
    assert_eq!(processor.subscriber_count(), 1);

    processor.start().unwrap();
    let frame = next_json(&mut client).await;
    assert_eq!(frame["type"], "frame");
    assert_eq!(frame["status"], "active");
    assert_eq!(frame["objects"], 1);
    assert!(!frame["data"].as_str().unwrap().is_empty());

    client.close(None).await.unwrap();
    assert!(wait_for_subscribers(&processor, 0).await, "closed client still registered");
    assert!(processor.is_running(), "a client leaving does not stop the stream");

    let mut client = connect(addr).await;
    assert_eq!(next_json(&mut client).await["type"], "connected");
    assert_eq!(next_json(&mut client).await["type"], "frame");

    let stopping = processor.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .unwrap();

    // Frames queued before the stop may still arrive; the close must follow.
    let closed = tokio::time::timeout(TIMEOUT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(_))) => continue,
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "stop did not close the socket");
    assert_eq!(processor.subscriber_count(), 0);
    assert!(!processor.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_messages_are_ignored() {
    let (addr, processor) = serve().await;

    let mut client = connect(addr).await;
    assert_eq!(next_json(&mut client).await["type"], "connected");

    client.send(Message::Text("hello".into())).await.unwrap();
    processor.start().unwrap();
    assert_eq!(next_json(&mut client).await["type"], "frame");
    assert_eq!(processor.subscriber_count(), 1);

    let stopping = processor.clone();
    tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .unwrap();
}
