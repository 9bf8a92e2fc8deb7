//! Shared helpers: a scripted ActionCable server on a local port.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use hermine_session::channel::{ChannelEvent, Subscription};

pub type ServerSocket = WebSocketStream<TcpStream>;

/// Binds a listener and returns it with the HTTP origin clients should use.
#[allow(dead_code)]
pub async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind local listener");
    let origin = format!("http://{}", listener.local_addr().expect("local addr"));
    (listener, origin)
}

/// Accepts one cable client, checking the handshake the way Rails does.
#[allow(dead_code)]
pub async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.expect("accept client");
    tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            assert_eq!(request.uri().path(), "/cable");
            assert!(request.headers().contains_key("Origin"));
            let protocol = request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .cloned()
                .expect("client must offer a subprotocol");
            assert_eq!(protocol.to_str().ok(), Some("actioncable-v1-json"));
            response
                .headers_mut()
                .insert("Sec-WebSocket-Protocol", protocol);
            Ok(response)
        },
    )
    .await
    .expect("websocket handshake")
}

/// Sends one JSON frame.
#[allow(dead_code)]
pub async fn send(socket: &mut ServerSocket, frame: Value) {
    socket
        .send(Message::Text(frame.to_string()))
        .await
        .expect("send frame");
}

/// Next client command, skipping non-text frames.
#[allow(dead_code)]
pub async fn next_command(socket: &mut ServerSocket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for client command")
            .expect("client hung up")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("command is JSON");
        }
    }
}

/// Reads a `subscribe` command and answers with `confirm_subscription`.
///
/// Returns the raw identifier string for use in data frames.
#[allow(dead_code)]
pub async fn confirm_next_subscription(socket: &mut ServerSocket) -> String {
    let command = next_command(socket).await;
    assert_eq!(command["command"], "subscribe");
    let identifier = command["identifier"]
        .as_str()
        .expect("identifier is a JSON string")
        .to_string();
    send(
        socket,
        json!({"type": "confirm_subscription", "identifier": identifier}),
    )
    .await;
    identifier
}

/// Next subscription event, failing the test after five seconds.
#[allow(dead_code)]
pub async fn next_event(subscription: &mut Subscription) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(5), subscription.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("subscription closed")
}
