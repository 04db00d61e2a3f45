// Pusher client against a loopback WebSocket server

use firmware_ci::config::PusherConfig;
use firmware_ci::notify::{ConnectionState, NotificationSource, NotifyError, PusherConnection, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const STEP: Duration = Duration::from_secs(5);

fn config_for(addr: std::net::SocketAddr) -> PusherConfig {
    PusherConfig {
        key: "test-key".to_string(),
        endpoint: Some(format!("ws://{}", addr)),
        reconnect_delay_secs: 0,
        ..PusherConfig::default()
    }
}

async fn next(connection: &mut PusherConnection) -> TransportEvent {
    timeout(STEP, connection.next_event())
        .await
        .expect("timed out waiting for transport event")
        .expect("transport closed")
}

#[tokio::test]
async fn test_subscribe_after_connect_and_receive_event() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"42.7\",\"activity_timeout\":120}"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        let subscribe = loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => break text.to_string(),
                _ => continue,
            }
        };

        ws.send(Message::Text(
            r#"{"event":"pusher_internal:subscription_succeeded","channel":"travis","data":"{}"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(
            r#"{"event":"deploy_complete","channel":"travis","data":"{\"package\":{\"name\":\"led-sectional\"},\"version\":{\"name\":\"v1.2.3\"}}"}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();

        // Keep the socket open until the client is done.
        let _ = ws.next().await;
        subscribe
    });

    let mut connection = PusherConnection::connect(&config_for(addr));

    assert_eq!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished {
            socket_id: "42.7".to_string()
        }
    );
    assert_eq!(
        connection.state(),
        ConnectionState::Connected {
            socket_id: "42.7".to_string()
        }
    );

    connection.subscribe("travis").await.unwrap();

    assert_eq!(
        next(&mut connection).await,
        TransportEvent::SubscriptionSucceeded {
            channel: "travis".to_string()
        }
    );
    match next(&mut connection).await {
        TransportEvent::ChannelEvent { channel, event, data } => {
            assert_eq!(channel, "travis");
            assert_eq!(event, "deploy_complete");
            let event = firmware_ci::DeployEvent::decode(&data).unwrap();
            assert_eq!(event.version_name, "v1.2.3");
        }
        other => panic!("unexpected event {:?}", other),
    }

    drop(connection);
    let subscribe = timeout(STEP, server).await.unwrap().unwrap();
    let frame: serde_json::Value = serde_json::from_str(&subscribe).unwrap();
    assert_eq!(frame["event"], "pusher:subscribe");
    assert_eq!(frame["data"]["channel"], "travis");
}

#[tokio::test]
async fn test_subscribe_before_connect_is_rejected() {
    // Nothing accepts on this listener's backlog beyond the TCP handshake,
    // so the WebSocket handshake never completes.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let connection = PusherConnection::connect(&config_for(addr));

    assert!(matches!(
        connection.subscribe("travis").await,
        Err(NotifyError::NotConnected)
    ));
    drop(listener);
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        for socket_id in ["1.1", "2.2"] {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let established = format!(
                r#"{{"event":"pusher:connection_established","data":"{{\"socket_id\":\"{}\"}}"}}"#,
                socket_id
            );
            ws.send(Message::Text(established.into())).await.unwrap();
            if socket_id == "1.1" {
                ws.close(None).await.unwrap();
            } else {
                let _ = ws.next().await;
            }
        }
    });

    let mut connection = PusherConnection::connect(&config_for(addr));

    assert_eq!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished {
            socket_id: "1.1".to_string()
        }
    );
    assert_eq!(next(&mut connection).await, TransportEvent::Disconnected);
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished {
            socket_id: "2.2".to_string()
        }
    );
}

#[tokio::test]
async fn test_fatal_error_closes_transport() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"pusher:error","data":{"code":4001,"message":"Application does not exist"}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        let _ = ws.next().await;
    });

    let mut connection = PusherConnection::connect(&config_for(addr));

    assert_eq!(next(&mut connection).await, TransportEvent::Disconnected);
    let closed = timeout(STEP, connection.next_event()).await.unwrap();
    assert!(closed.is_none());
}

fn established(socket_id: &str, activity_timeout: u64) -> Message {
    Message::Text(
        format!(
            r#"{{"event":"pusher:connection_established","data":"{{\"socket_id\":\"{}\",\"activity_timeout\":{}}}"}}"#,
            socket_id, activity_timeout
        )
        .into(),
    )
}

async fn next_text<S>(ws: &mut tokio_tungstenite::WebSocketStream<S>) -> serde_json::Value
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_server_ping_is_answered_with_pong() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(established("3.3", 120)).await.unwrap();
        ws.send(Message::Text(r#"{"event":"pusher:ping","data":{}}"#.to_string().into()))
            .await
            .unwrap();
        next_text(&mut ws).await
    });

    let mut connection = PusherConnection::connect(&config_for(addr));
    assert!(matches!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished { .. }
    ));

    let reply = timeout(STEP, server).await.unwrap().unwrap();
    assert_eq!(reply["event"], "pusher:pong");
}

#[tokio::test]
async fn test_idle_connection_sends_ping_after_activity_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(established("4.4", 1)).await.unwrap();
        let sent_at = tokio::time::Instant::now();
        let frame = next_text(&mut ws).await;
        let idle = sent_at.elapsed();
        ws.send(Message::Text(r#"{"event":"pusher:pong","data":{}}"#.to_string().into()))
            .await
            .unwrap();
        (frame, idle)
    });

    let mut connection = PusherConnection::connect(&config_for(addr));
    assert!(matches!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished { .. }
    ));

    let (frame, idle) = timeout(STEP, server).await.unwrap().unwrap();
    assert_eq!(frame["event"], "pusher:ping");
    assert!(idle >= Duration::from_millis(900), "ping sent after {:?}", idle);
}

#[tokio::test]
async fn test_unanswered_ping_drops_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(established("5.5", 1)).await.unwrap();
        // Read and ignore everything, pings included.
        while let Some(Ok(_)) = ws.next().await {}
        // Hold the listener so the reconnect attempt does not fail fast.
        let _ = listener.accept().await;
    });

    let config = PusherConfig {
        pong_timeout_secs: 1,
        ..config_for(addr)
    };
    let mut connection = PusherConnection::connect(&config);

    assert!(matches!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished { .. }
    ));
    let started = tokio::time::Instant::now();
    assert_eq!(next(&mut connection).await, TransportEvent::Disconnected);
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test]
async fn test_reconnect_now_error_skips_delay() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(established("6.6", 120)).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"pusher:error","data":{"code":4200,"message":"Generic reconnect immediately"}}"#
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
        let _ = ws.next().await;

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(established("7.7", 120)).await.unwrap();
        let _ = ws.next().await;
    });

    // A long delay that would blow the step timeout if it were applied.
    let config = PusherConfig {
        reconnect_delay_secs: 60,
        ..config_for(addr)
    };
    let mut connection = PusherConnection::connect(&config);

    assert_eq!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished {
            socket_id: "6.6".to_string()
        }
    );
    assert_eq!(next(&mut connection).await, TransportEvent::Disconnected);
    assert_eq!(
        next(&mut connection).await,
        TransportEvent::ConnectionEstablished {
            socket_id: "7.7".to_string()
        }
    );
}
