//! Background WebSocket connection loop with auto-reconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use classcast_config::schema::SignalingConfig;
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use tracing::{debug, error, info, warn};

use super::SignalingEvent;
use crate::protocol::{ClientMessage, ServerMessage};

/// Commands from `SignalingClient` to the connection task.
#[derive(Debug)]
pub(crate) enum SignalingCommand {
    Send(ClientMessage),
    Disconnect,
}

type CommandRx = Arc<Mutex<mpsc::Receiver<SignalingCommand>>>;

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value))
}

/// Double the delay, capped at `max`.
pub(crate) fn next_backoff(current: Duration, max: Duration) -> Duration {
    (current * 2).min(max)
}

// ---------------------------------------------------------------------------
// Connection Loop
// ---------------------------------------------------------------------------

/// Background task managing the relay connection with auto-reconnect.
pub(crate) async fn connection_loop(
    config: SignalingConfig,
    connected: Arc<RwLock<bool>>,
    event_tx: mpsc::Sender<SignalingEvent>,
    command_rx: mpsc::Receiver<SignalingCommand>,
) {
    let command_rx: CommandRx = Arc::new(Mutex::new(command_rx));
    let shutdown = Arc::new(AtomicBool::new(false));
    let base_delay = secs(config.reconnect_delay_secs);
    let max_delay = secs(config.max_reconnect_delay_secs);
    let connect_timeout = secs(config.connect_timeout_secs);
    let mut reconnect_delay = base_delay;

    loop {
        info!(url = %config.url, "Connecting to signaling relay");

        match tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::connect_async(config.url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _))) => {
                reconnect_delay = base_delay;
                discard_stale_commands(&command_rx, &shutdown).await;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                *connected.write().await = true;
                let _ = event_tx.send(SignalingEvent::Connected).await;

                let (ws_write, ws_read) = ws_stream.split();
                let ws_write = Arc::new(Mutex::new(ws_write));

                let heartbeat_handle = tokio::spawn(heartbeat_task(
                    Arc::clone(&ws_write),
                    secs(config.heartbeat_interval_secs),
                ));
                let cmd_handle = tokio::spawn(command_forwarder(
                    Arc::clone(&command_rx),
                    Arc::clone(&ws_write),
                    Arc::clone(&shutdown),
                ));

                let reason = read_loop(ws_read, &event_tx).await;

                heartbeat_handle.abort();
                cmd_handle.abort();
                *connected.write().await = false;
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                warn!(reason = %reason, "Signaling connection lost");
                let _ = event_tx.send(SignalingEvent::Disconnected { reason }).await;
            }
            Ok(Err(e)) => {
                error!(error = %e, "Failed to connect to signaling relay");
                let _ = event_tx
                    .send(SignalingEvent::Disconnected {
                        reason: format!("connection failed: {e}"),
                    })
                    .await;
            }
            Err(_elapsed) => {
                error!(
                    timeout_secs = connect_timeout.as_secs(),
                    "Signaling connection timed out"
                );
                let _ = event_tx
                    .send(SignalingEvent::Disconnected {
                        reason: format!("connection timed out after {}s", connect_timeout.as_secs()),
                    })
                    .await;
            }
        }

        if shutdown.load(Ordering::Relaxed) {
            break;
        }
        info!(delay_secs = reconnect_delay.as_secs(), "Reconnecting to signaling relay");
        if idle_until_retry(&command_rx, reconnect_delay).await {
            break;
        }
        reconnect_delay = next_backoff(reconnect_delay, max_delay);
    }

    *connected.write().await = false;
    info!("Signaling connection closed");
}

/// Read frames until the socket ends. Returns why it ended.
async fn read_loop<S>(mut read: S, event_tx: &mpsc::Sender<SignalingEvent>) -> String
where
    S: Stream<Item = Result<WsMessage, tungstenite::Error>> + Unpin,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match ServerMessage::from_json(&text) {
                Ok(message) => {
                    if event_tx.send(SignalingEvent::Message(message)).await.is_err() {
                        return "event receiver dropped".to_string();
                    }
                }
                Err(e) => debug!(error = %e, "Unrecognized frame from relay"),
            },
            Ok(WsMessage::Close(_)) => return "relay closed the connection".to_string(),
            Err(e) => return format!("websocket error: {e}"),
            _ => {}
        }
    }
    "connection ended".to_string()
}

/// Messages queued while the socket was down target participants of the
/// previous connection. Drop them.
async fn discard_stale_commands(command_rx: &CommandRx, shutdown: &AtomicBool) {
    let mut rx = command_rx.lock().await;
    loop {
        match rx.try_recv() {
            Ok(SignalingCommand::Send(message)) => {
                debug!(kind = message.kind(), "Dropping stale queued message");
            }
            Ok(SignalingCommand::Disconnect) | Err(mpsc::error::TryRecvError::Disconnected) => {
                shutdown.store(true, Ordering::Relaxed);
                return;
            }
            Err(mpsc::error::TryRecvError::Empty) => return,
        }
    }
}

/// Sleep before the next attempt. Returns `true` if a disconnect was
/// requested meanwhile.
async fn idle_until_retry(command_rx: &CommandRx, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    let mut rx = command_rx.lock().await;
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            command = rx.recv() => match command {
                Some(SignalingCommand::Disconnect) | None => return true,
                Some(SignalingCommand::Send(message)) => {
                    debug!(kind = message.kind(), "Dropping message while disconnected");
                }
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

async fn heartbeat_task<S>(ws_write: Arc<Mutex<S>>, interval: Duration)
where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut interval = tokio::time::interval(interval);
    loop {
        interval.tick().await;
        let mut writer = ws_write.lock().await;
        if writer.send(WsMessage::Ping(Default::default())).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Command Forwarder
// ---------------------------------------------------------------------------

async fn command_forwarder<S>(
    cmd_rx: CommandRx,
    cmd_write: Arc<Mutex<S>>,
    shutdown: Arc<AtomicBool>,
) where
    S: futures_util::Sink<WsMessage> + Unpin,
{
    let mut rx = cmd_rx.lock().await;
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SignalingCommand::Send(message) => match message.to_json() {
                Ok(json) => {
                    let mut writer = cmd_write.lock().await;
                    if writer.send(WsMessage::Text(json.into())).await.is_err() {
                        warn!(kind = message.kind(), "Failed to write to relay");
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode client message"),
            },
            SignalingCommand::Disconnect => break,
        }
    }
    shutdown.store(true, Ordering::Relaxed);
    let mut writer = cmd_write.lock().await;
    let _ = writer.send(WsMessage::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_until_capped() {
        let max = Duration::from_secs(30);
        let mut delay = Duration::from_secs(2);
        let mut seen = Vec::new();
        for _ in 0..6 {
            delay = next_backoff(delay, max);
            seen.push(delay.as_secs());
        }
        assert_eq!(seen, vec![4, 8, 16, 30, 30, 30]);
    }

    #[tokio::test]
    async fn stale_commands_are_dropped_but_disconnect_is_honored() {
        let (tx, rx) = mpsc::channel(8);
        let rx: CommandRx = Arc::new(Mutex::new(rx));
        let shutdown = AtomicBool::new(false);
        tx.send(SignalingCommand::Send(ClientMessage::LeaveSession {
            session_id: classcast_common::SessionId::generate(),
        }))
        .await
        .unwrap();
        discard_stale_commands(&rx, &shutdown).await;
        assert!(!shutdown.load(Ordering::Relaxed));
        assert!(rx.lock().await.try_recv().is_err());

        tx.send(SignalingCommand::Disconnect).await.unwrap();
        discard_stale_commands(&rx, &shutdown).await;
        assert!(shutdown.load(Ordering::Relaxed));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_is_cut_short_by_disconnect() {
        let (tx, rx) = mpsc::channel(8);
        let rx: CommandRx = Arc::new(Mutex::new(rx));
        tx.send(SignalingCommand::Disconnect).await.unwrap();
        assert!(idle_until_retry(&rx, Duration::from_secs(60)).await);
        assert!(!idle_until_retry(&rx, Duration::from_secs(1)).await);
    }
}
