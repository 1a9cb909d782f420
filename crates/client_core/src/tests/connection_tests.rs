use super::*;
use axum::{
    extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use shared::domain::{
    Conversation, ConversationId, Message, MessageId, MessageKind, Role, UserId, UserRef,
};
use tokio::net::TcpListener;

#[test]
fn websocket_url_swaps_scheme_and_appends_path() {
    assert_eq!(
        websocket_url("http://127.0.0.1:9000").expect("url"),
        "ws://127.0.0.1:9000/ws"
    );
    assert_eq!(
        websocket_url("https://chat.example.com/").expect("url"),
        "wss://chat.example.com/ws"
    );
    assert!(websocket_url("ftp://chat.example.com").is_err());
}

#[tokio::test]
async fn missing_transport_is_never_connected() {
    let transport = MissingEventTransport::new();

    assert!(!transport.is_connected());
    let err = transport
        .send_with_ack(sample_request("hello"))
        .await
        .expect_err("must fail");
    assert!(matches!(err, TransportError::NotConnected));
}

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).expect("timestamp")
}

fn user(id: i64, name: &str) -> UserRef {
    UserRef {
        id: UserId(id),
        display_name: name.to_string(),
        role: Role::Agent,
    }
}

fn sample_request(text: &str) -> ClientRequest {
    ClientRequest::SendMessage {
        conversation_id: Some(ConversationId(7)),
        recipient_id: None,
        text: text.to_string(),
    }
}

async fn serve_acking_socket(mut socket: WebSocket) {
    while let Some(Ok(frame)) = socket.recv().await {
        let AxumMessage::Text(text) = frame else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<ClientFrame>(&text) else {
            continue;
        };
        let ClientRequest::SendMessage {
            conversation_id,
            text,
            ..
        } = frame.request;

        let alice = user(1, "Alice");
        let bob = user(2, "Bob");
        let conversation = Conversation {
            id: conversation_id.unwrap_or(ConversationId(501)),
            participants: [alice.clone(), bob],
            last_message_preview: Some(text.clone()),
            last_activity_at: Some(at(1000)),
            updated_at: at(1000),
            unread_count: None,
        };
        let message = Message {
            id: MessageId(9001),
            conversation_id: conversation.id,
            sender: alice,
            text,
            kind: MessageKind::Text,
            attachment: None,
            created_at: at(1000),
        };

        let ack = ServerFrame::Ack {
            request_id: frame.request_id,
            ack: SendAck {
                ok: true,
                conversation: Some(conversation.clone()),
                message: Some(message.clone()),
                error: None,
            },
        };
        let _ = socket
            .send(AxumMessage::Text(
                serde_json::to_string(&ack).expect("ack json"),
            ))
            .await;

        let event = ServerFrame::Event {
            event: ServerEvent::MessageNew {
                conversation,
                message,
            },
        };
        let _ = socket
            .send(AxumMessage::Text(
                serde_json::to_string(&event).expect("event json"),
            ))
            .await;
    }
}

async fn serve_silent_socket(mut socket: WebSocket) {
    while socket.recv().await.is_some() {}
}

async fn spawn_ws_server(silent: bool) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handler = get(move |ws: WebSocketUpgrade| async move {
        if silent {
            ws.on_upgrade(serve_silent_socket).into_response()
        } else {
            ws.on_upgrade(serve_acking_socket).into_response()
        }
    });
    let app = Router::new().route("/ws", handler);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

async fn wait_until_connected(transport: &WsTransport) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !transport.is_connected() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("connect timeout");
}

async fn next_event(events: &mut broadcast::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event timeout")
        .expect("event stream open")
}

#[tokio::test]
async fn round_trip_correlates_ack_and_forwards_broadcast() {
    let server_url = spawn_ws_server(false).await.expect("server");
    let transport = WsTransport::new(&server_url)
        .expect("transport")
        .with_reconnect_delay(Duration::from_millis(100));
    let mut events = transport.subscribe();

    transport.open("token-1").await.expect("open");
    wait_until_connected(&transport).await;

    let ack = transport
        .send_with_ack(sample_request("hello"))
        .await
        .expect("ack");
    assert!(ack.ok);
    let result = ack.into_result().expect("result payload");
    assert_eq!(result.message.text, "hello");
    assert_eq!(result.conversation.id, ConversationId(7));

    assert!(matches!(next_event(&mut events).await, TransportEvent::Connected));
    loop {
        if let TransportEvent::Server(ServerEvent::MessageNew { message, .. }) =
            next_event(&mut events).await
        {
            assert_eq!(message.text, "hello");
            break;
        }
    }

    transport.close().await;
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn acknowledgement_timeout_is_reported() {
    let server_url = spawn_ws_server(true).await.expect("server");
    let transport = WsTransport::new(&server_url)
        .expect("transport")
        .with_ack_timeout(Duration::from_millis(100))
        .with_reconnect_delay(Duration::from_millis(100));

    transport.open("token-1").await.expect("open");
    wait_until_connected(&transport).await;

    let err = transport
        .send_with_ack(sample_request("hello"))
        .await
        .expect_err("must time out");
    assert!(matches!(err, TransportError::AckTimeout(_)));

    transport.close().await;
}

#[tokio::test]
async fn connect_failures_flip_the_flag_without_erroring() {
    // Grab a port that nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let transport = WsTransport::new(&format!("http://{addr}"))
        .expect("transport")
        .with_reconnect_delay(Duration::from_millis(50));
    let mut events = transport.subscribe();

    transport.open("token-1").await.expect("open never throws");

    assert!(matches!(
        next_event(&mut events).await,
        TransportEvent::ConnectError
    ));
    assert!(!transport.is_connected());

    let err = transport
        .send_with_ack(sample_request("hello"))
        .await
        .expect_err("must fail while down");
    assert!(matches!(err, TransportError::NotConnected));

    transport.close().await;
}
