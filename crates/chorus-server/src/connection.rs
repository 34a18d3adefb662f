//! Per-connection handler: authenticate, bind, then pump frames both ways.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chorus_common::{close_codes, ClientFrame, ClientOp, PublicIdentity, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use crate::hub::Hub;
use crate::registry::Outbound;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsStream = SplitStream<WebSocketStream<TcpStream>>;

/// Handle a single WebSocket connection until either side closes it.
pub async fn handle_connection(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    hub: Arc<Hub>,
    hello_timeout: Duration,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. Authenticate from the hello frame.
    let Some((hello_id, token)) = read_hello(&mut stream, addr, hello_timeout).await else {
        close(&mut sink, close_codes::AUTH_FAILED, "authentication failed").await;
        return;
    };

    let identity = match hub.authenticate(&token).await {
        Ok(identity) => identity,
        Err(e) => {
            tracing::warn!(peer = %addr, error = %e, "Authentication failed");
            let _ = send(
                &mut sink,
                &ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            close(&mut sink, close_codes::AUTH_FAILED, "authentication failed").await;
            return;
        }
    };

    // 2. Bind the session; a previous session for this identity is evicted.
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let session = hub.connect(identity.clone(), tx).await;

    tracing::info!(
        peer = %addr,
        session = %session.session_id,
        identity = %identity.id,
        "Client connected"
    );

    if send_welcome(&mut sink, &session.session_id, identity, hello_id)
        .await
        .is_err()
    {
        hub.disconnect(&session.session_id).await;
        return;
    }

    // 3. Forwarding loop.
    loop {
        tokio::select! {
            Some(out) = rx.recv() => match out {
                Outbound::Message(msg) => {
                    if send(&mut sink, &msg).await.is_err() {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    tracing::info!(session = %session.session_id, code, reason = %reason, "Closing session");
                    close(&mut sink, code, &reason).await;
                    break;
                }
            },

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => match ClientFrame::parse(&text) {
                        Ok(frame) => hub.handle(&session, frame).await,
                        Err(e) => {
                            tracing::warn!(session = %session.session_id, error = %e, "Malformed frame");
                            let _ = send(
                                &mut sink,
                                &ServerMessage::Error {
                                    message: e.to_string(),
                                },
                            )
                            .await;
                        }
                    },
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(peer = %addr, error = %e, "WS error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // 4. Cleanup.
    tracing::info!(
        peer = %addr,
        session = %session.session_id,
        "Client disconnected"
    );
    hub.disconnect(&session.session_id).await;
}

/// Read the first frame, which must be a `hello`. Returns its id and token.
async fn read_hello(
    stream: &mut WsStream,
    addr: SocketAddr,
    timeout: Duration,
) -> Option<(u64, String)> {
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match ClientFrame::parse(&text) {
            Ok(ClientFrame {
                id,
                op: ClientOp::Hello { token },
            }) => Some((id, token)),
            Ok(other) => {
                tracing::warn!(peer = %addr, op = other.op.name(), "Expected hello");
                None
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid hello message");
                None
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text hello, got another frame type");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during hello");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before hello");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout_secs = timeout.as_secs(), "Hello timeout");
            None
        }
    }
}

async fn send_welcome(
    sink: &mut WsSink,
    session_id: &chorus_common::SessionId,
    identity: PublicIdentity,
    hello_id: u64,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    send(
        sink,
        &ServerMessage::Welcome {
            session_id: session_id.clone(),
            identity,
        },
    )
    .await?;
    send(sink, &ServerMessage::ok(hello_id)).await
}

/// Send a ServerMessage as a JSON text frame.
async fn send(
    sink: &mut WsSink,
    msg: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match msg.to_json() {
        Ok(json) => sink.send(Message::Text(json.into())).await,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to encode server message");
            Ok(())
        }
    }
}

async fn close(sink: &mut WsSink, code: u16, reason: &str) {
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}
