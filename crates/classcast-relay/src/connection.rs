//! Per-connection handler: join, register, then route messages.

use std::net::SocketAddr;
use std::time::Duration;

use classcast_common::{ParticipantId, SessionId};
use classcast_mesh::protocol::{ClientMessage, MessageKind, ParticipantInfo, Role, ServerMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_tungstenite::tungstenite::Message;

use crate::session::{Departure, Outbox, SessionStore};

type WsStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

/// Outcome of routing one client frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Leave,
}

/// A validated `join-session` request.
struct Hello {
    session_id: SessionId,
    role: Role,
    display_name: String,
}

/// Handle a single WebSocket connection.
pub async fn handle_connection(
    ws: WsStream,
    addr: SocketAddr,
    store: SessionStore,
    hello_timeout: Duration,
) {
    let (mut sink, mut stream) = ws.split();

    // 1. The first frame must be a join.
    let hello = match read_hello(&mut stream, addr, hello_timeout).await {
        Some(Ok(hello)) => hello,
        Some(Err(reason)) => {
            let _ = send_response(&mut sink, &ServerMessage::JoinFailed { reason }).await;
            return;
        }
        None => return,
    };

    // 2. Register with the session.
    let self_id = ParticipantId::random();
    let info = ParticipantInfo {
        participant_id: self_id.clone(),
        display_name: hello.display_name.clone(),
        role: hello.role,
    };
    let (tx, mut rx) = mpsc::channel::<String>(256);
    let ticket = match store.join(&hello.session_id, info, tx).await {
        Ok(ticket) => ticket,
        Err(reason) => {
            tracing::info!(peer = %addr, session = %hello.session_id, reason, "Join refused");
            let _ = send_response(
                &mut sink,
                &ServerMessage::JoinFailed {
                    reason: reason.into(),
                },
            )
            .await;
            return;
        }
    };
    let session_id = hello.session_id;

    tracing::info!(
        peer = %addr,
        session = %session_id,
        participant = %self_id,
        role = %hello.role,
        "Participant joined"
    );

    // 3. Confirm to the joiner, then announce to everyone else.
    let mut confirmations = Vec::with_capacity(2);
    if ticket.created {
        confirmations.push(ServerMessage::SessionCreated {
            session_id: session_id.clone(),
        });
    }
    confirmations.push(ServerMessage::JoinSuccess {
        session_id: session_id.clone(),
        self_id: self_id.clone(),
        participants: ticket.participants,
    });
    for msg in &confirmations {
        if send_response(&mut sink, msg).await.is_err() {
            depart(&store, &session_id, &self_id).await;
            return;
        }
    }
    broadcast(
        &ticket.others,
        &ServerMessage::ParticipantJoined {
            participant_id: self_id.clone(),
            display_name: hello.display_name,
            role: hello.role,
        },
    );

    // 4. Forwarding loop.
    loop {
        tokio::select! {
            // Frames routed to us by other connections.
            queued = rx.recv() => {
                let Some(msg) = queued else { break };
                if sink.send(Message::Text(msg.into())).await.is_err() {
                    break;
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let parsed = ClientMessage::from_json(&text).map_err(|e| e.to_string());
                        let flow = match parsed {
                            Ok(msg) => route(&store, &session_id, &self_id, msg).await,
                            Err(e) => Err(e),
                        };
                        match flow {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Leave) => break,
                            Err(message) => {
                                tracing::debug!(participant = %self_id, error = %message, "Rejected frame");
                                if send_response(&mut sink, &ServerMessage::Error { message }).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
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

    // 5. Cleanup.
    tracing::info!(
        peer = %addr,
        session = %session_id,
        participant = %self_id,
        "Participant disconnected"
    );
    depart(&store, &session_id, &self_id).await;
}

/// Route one frame from `sender_id`. Errors are reported back to the sender.
pub(crate) async fn route(
    store: &SessionStore,
    session_id: &SessionId,
    sender_id: &ParticipantId,
    msg: ClientMessage,
) -> Result<Flow, String> {
    let kind = msg.kind();
    let (target, forwarded) = match msg {
        ClientMessage::JoinSession { .. } => return Err("already joined a session".into()),
        ClientMessage::LeaveSession { session_id: sid } => {
            check_session(session_id, &sid)?;
            return Ok(Flow::Leave);
        }
        ClientMessage::Offer {
            target_id,
            session_id: sid,
            description,
        } => {
            check_session(session_id, &sid)?;
            let msg = ServerMessage::Offer {
                sender_id: sender_id.clone(),
                session_id: sid,
                description,
            };
            (target_id, msg)
        }
        ClientMessage::Answer {
            target_id,
            session_id: sid,
            description,
        } => {
            check_session(session_id, &sid)?;
            let msg = ServerMessage::Answer {
                sender_id: sender_id.clone(),
                session_id: sid,
                description,
            };
            (target_id, msg)
        }
        ClientMessage::Candidate {
            target_id,
            session_id: sid,
            candidate,
        } => {
            check_session(session_id, &sid)?;
            let msg = ServerMessage::Candidate {
                sender_id: sender_id.clone(),
                session_id: sid,
                candidate,
            };
            (target_id, msg)
        }
        ClientMessage::Message {
            session_id: sid,
            payload,
        } => {
            check_session(session_id, &sid)?;
            let recipients: Vec<Outbox> = match payload.kind {
                MessageKind::Question => store.teacher_sender(session_id).await.into_iter().collect(),
                MessageKind::Chat => store.others(session_id, sender_id).await,
            };
            let msg = ServerMessage::Message {
                sender_id: sender_id.clone(),
                session_id: sid,
                payload,
            };
            broadcast(&recipients, &msg);
            return Ok(Flow::Continue);
        }
    };

    let Some(tx) = store.sender(session_id, &target).await else {
        return Err(format!("no participant {target} in session {session_id}"));
    };
    tracing::trace!(from = %sender_id, to = %target, kind, "Forwarding");
    deliver(&tx, &forwarded);
    Ok(Flow::Continue)
}

fn check_session(joined: &SessionId, named: &SessionId) -> Result<(), String> {
    if joined == named {
        Ok(())
    } else {
        Err(format!("not a member of session {named}"))
    }
}

/// Remove a participant and tell whoever is left.
async fn depart(store: &SessionStore, session_id: &SessionId, participant_id: &ParticipantId) {
    match store.leave(session_id, participant_id).await {
        Departure::NotFound => {}
        Departure::Left { others } => {
            broadcast(
                &others,
                &ServerMessage::ParticipantLeft {
                    participant_id: participant_id.clone(),
                },
            );
        }
        Departure::SessionEnded { others } => {
            tracing::info!(session = %session_id, "Teacher left, ending session");
            broadcast(
                &others,
                &ServerMessage::SessionEnded {
                    session_id: session_id.clone(),
                },
            );
        }
    }
}

fn broadcast(recipients: &[Outbox], msg: &ServerMessage) {
    for tx in recipients {
        deliver(tx, msg);
    }
}

/// Queue a frame without waiting. A recipient whose outbox is full loses the
/// frame; its own negotiation timeout recovers the link.
fn deliver(tx: &Outbox, msg: &ServerMessage) {
    let json = match msg.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode relay message");
            return;
        }
    };
    match tx.try_send(json) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            tracing::warn!(capacity = tx.max_capacity(), "Recipient outbox full, frame dropped");
        }
        // Receiver's connection is already closing.
        Err(TrySendError::Closed(_)) => tracing::debug!("Recipient channel closed"),
    }
}

/// Read the first frame. `None` means the connection should just be dropped;
/// `Some(Err(_))` carries a reason to report before closing.
async fn read_hello(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
    addr: SocketAddr,
    timeout: Duration,
) -> Option<Result<Hello, String>> {
    let frame = tokio::time::timeout(timeout, stream.next()).await;

    match frame {
        Ok(Some(Ok(Message::Text(text)))) => match ClientMessage::from_json(&text) {
            Ok(ClientMessage::JoinSession {
                session_id,
                role,
                display_name,
                credentials,
            }) => {
                let display_name = display_name.trim().to_string();
                if display_name.is_empty() {
                    return Some(Err("display name is required".into()));
                }
                tracing::debug!(
                    peer = %addr,
                    has_credentials = credentials.is_some(),
                    "Join request"
                );
                Some(Ok(Hello {
                    session_id,
                    role,
                    display_name,
                }))
            }
            Ok(other) => {
                tracing::warn!(peer = %addr, kind = other.kind(), "Expected join-session first");
                Some(Err("join a session first".into()))
            }
            Err(e) => {
                tracing::warn!(peer = %addr, error = %e, "Invalid join message");
                Some(Err(e.to_string()))
            }
        },
        Ok(Some(Ok(_))) => {
            tracing::warn!(peer = %addr, "Expected text join, got binary");
            None
        }
        Ok(Some(Err(e))) => {
            tracing::warn!(peer = %addr, error = %e, "WS error during join");
            None
        }
        Ok(None) => {
            tracing::debug!(peer = %addr, "Connection closed before join");
            None
        }
        Err(_) => {
            tracing::warn!(peer = %addr, timeout_secs = timeout.as_secs(), "Join timeout");
            None
        }
    }
}

/// Send a ServerMessage as a JSON text frame.
async fn send_response(
    sink: &mut futures_util::stream::SplitSink<WsStream, Message>,
    response: &ServerMessage,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = response
        .to_json()
        .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e.to_string())))?;
    sink.send(Message::Text(json.into())).await
}
