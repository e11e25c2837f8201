//! Producers on plain threads, one WebSocket viewer on the other end.

use std::net::SocketAddr;
use std::time::Duration;

use feynman_core::{Event, EventKind, Payload, Text};
use feynman_server::{BroadcastServer, channel, ws_url};
use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

async fn next_text(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> Option<String> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out")?
            .ok()?;
        match msg {
            Message::Text(text) => return Some(text),
            Message::Close(_) => return None,
            _ => {}
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn threads_keep_their_own_order_on_the_wire() {
    let (tx, rx) = channel(4096);
    let cancel = CancellationToken::new();
    let server = BroadcastServer::new(
        "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
        rx,
        cancel.clone(),
    );
    let (listener, addr) = server.bind().await.unwrap();
    let serving = tokio::spawn(async move { server.serve(listener).await });

    let producers: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let tx = tx.clone();
            std::thread::spawn(move || {
                for n in 0..50 {
                    tx.send(Event::new(
                        format!("{name}-{n}"),
                        Payload::Text(Text::new(format!("{name} {n}"), 0, 0)),
                    ));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    let (mut ws, _) = connect_async(ws_url(addr)).await.unwrap();
    let mut received = Vec::new();
    while received.len() < 100 {
        let text = next_text(&mut ws).await.expect("viewer stream ended early");
        let event: Event = serde_json::from_str(&text).unwrap();
        assert_eq!(event.kind(), EventKind::Text);
        received.push(event.id);
    }

    for name in ["left", "right"] {
        let seq: Vec<u32> = received
            .iter()
            .filter_map(|id| id.strip_prefix(&format!("{name}-"))?.parse().ok())
            .collect();
        assert_eq!(seq, (0..50).collect::<Vec<_>>(), "order of {name}");
    }

    cancel.cancel();
    assert!(next_text(&mut ws).await.is_none(), "viewer is closed on shutdown");
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn each_frame_is_one_flat_event_object() {
    let (tx, rx) = channel(16);
    let cancel = CancellationToken::new();
    let server = BroadcastServer::new("127.0.0.1:0".parse().unwrap(), rx, cancel.clone());
    let (listener, addr) = server.bind().await.unwrap();
    tokio::spawn(async move { server.serve(listener).await });

    tx.send(
        Event::new("db-size", Payload::Text(Text::new("size: 0", 120, 70)))
            .with_group(Some("db".into())),
    );
    let (mut ws, _) = connect_async(ws_url(addr)).await.unwrap();
    let text = next_text(&mut ws).await.unwrap();
    let v: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(v["kind"], "text");
    assert_eq!(v["id"], "db-size");
    assert_eq!(v["group"], "db");
    assert_eq!(v["text"], "size: 0");
    assert!(v["when"].as_f64().unwrap() > 0.0);
    cancel.cancel();
}
