//! classcast-relay: signaling relay for classroom screen sharing.
//!
//! Accepts WebSocket connections, groups them into sessions, and routes
//! offers, answers, candidates and text messages between participants.
//! Session descriptions are forwarded untouched; media never passes through
//! the relay.

mod connection;
mod session;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use classcast_config::{schema::LogLevel, ClasscastConfig};
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;

use crate::connection::handle_connection;
use crate::session::SessionStore;

#[derive(Parser)]
#[command(name = "classcast-relay", about = "Signaling relay for classroom screen sharing")]
struct Args {
    /// Port to listen on. Overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds before an abandoned session is reaped.
    #[arg(long)]
    session_ttl: Option<u32>,

    /// Path to a config file instead of the platform default.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `classcast_relay=trace`.
    #[arg(long)]
    log_level: Option<String>,

    /// Print the effective configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn load(args: &Args) -> classcast_common::Result<ClasscastConfig> {
    let mut config = match &args.config {
        Some(path) => classcast_config::load_from_path(path)?,
        None => classcast_config::load_default()?,
    };
    if let Some(port) = args.port {
        config.relay.port = port;
    }
    if let Some(ttl) = args.session_ttl {
        config.relay.session_ttl_secs = ttl;
    }
    classcast_config::validation::validate(&config)?;
    Ok(config)
}

fn filter_directive(args: &Args, level: LogLevel) -> String {
    if let Some(directive) = &args.log_level {
        return directive.clone();
    }
    std::env::var("RUST_LOG").unwrap_or_else(|_| format!("classcast_relay={}", level.as_directive()))
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("classcast-relay: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> classcast_common::Result<()> {
    let config = load(&args)?;
    if args.print_config {
        println!("{}", classcast_config::config_to_json(&config));
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter_directive(
            &args,
            config.logging.level,
        )))
        .init();

    let relay = &config.relay;
    let store = SessionStore::new(relay.max_participants as usize);

    let addr = format!("{}:{}", relay.bind_address, relay.port);
    let listener = TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!(address = %addr, error = %e, "Failed to bind TCP listener");
        e
    })?;

    tracing::info!("classcast-relay listening on {}", addr);

    // Spawn stale session reaper.
    let reaper_store = store.clone();
    let ttl = Duration::from_secs(u64::from(relay.session_ttl_secs));
    let interval = Duration::from_secs(u64::from(relay.reap_interval_secs));
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let reaped = reaper_store.reap_stale(ttl).await;
            let count = reaper_store.count().await;
            tracing::debug!(sessions = count, reaped, "Reaper tick");
        }
    });

    serve(
        listener,
        store,
        Duration::from_secs(u64::from(relay.hello_timeout_secs)),
    )
    .await;
    Ok(())
}

/// Accept loop.
async fn serve(listener: TcpListener, store: SessionStore, hello_timeout: Duration) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let store = store.clone();
                tokio::spawn(async move {
                    match accept_async(stream).await {
                        Ok(ws) => handle_connection(ws, addr, store, hello_timeout).await,
                        Err(e) => {
                            tracing::warn!(peer = %addr, error = %e, "WS handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use classcast_common::{ParticipantId, SessionId};
    use classcast_mesh::protocol::{ClientMessage, Role, ServerMessage, SessionDescription};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpStream;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

    type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn start_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, SessionStore::new(8), Duration::from_secs(5)));
        format!("ws://{addr}")
    }

    async fn send(ws: &mut Client, msg: &ClientMessage) {
        ws.send(Message::Text(msg.to_json().unwrap().into()))
            .await
            .unwrap();
    }

    async fn recv(ws: &mut Client) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                return ServerMessage::from_json(&text).unwrap();
            }
        }
    }

    async fn join(url: &str, role: Role, name: &str) -> (Client, ParticipantId) {
        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        send(
            &mut ws,
            &ClientMessage::JoinSession {
                session_id: SessionId::parse("E2E001").unwrap(),
                role,
                display_name: name.into(),
                credentials: None,
            },
        )
        .await;
        loop {
            match recv(&mut ws).await {
                ServerMessage::SessionCreated { .. } => continue,
                ServerMessage::JoinSuccess { self_id, .. } => return (ws, self_id),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn classroom_over_real_sockets() {
        let url = start_relay().await;
        let (mut teacher, teacher_id) = join(&url, Role::Teacher, "Teacher").await;
        let (mut student, student_id) = join(&url, Role::Student, "Student").await;

        match recv(&mut teacher).await {
            ServerMessage::ParticipantJoined { participant_id, role, .. } => {
                assert_eq!(participant_id, student_id);
                assert_eq!(role, Role::Student);
            }
            other => panic!("unexpected {other:?}"),
        }

        send(
            &mut teacher,
            &ClientMessage::Offer {
                target_id: student_id.clone(),
                session_id: SessionId::parse("E2E001").unwrap(),
                description: SessionDescription::offer("v=0"),
            },
        )
        .await;
        match recv(&mut student).await {
            ServerMessage::Offer { sender_id, .. } => assert_eq!(sender_id, teacher_id),
            other => panic!("unexpected {other:?}"),
        }

        send(
            &mut teacher,
            &ClientMessage::LeaveSession {
                session_id: SessionId::parse("E2E001").unwrap(),
            },
        )
        .await;
        assert!(matches!(
            recv(&mut student).await,
            ServerMessage::SessionEnded { .. }
        ));
    }

    #[tokio::test]
    async fn student_cannot_open_a_session() {
        let url = start_relay().await;
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        send(
            &mut ws,
            &ClientMessage::JoinSession {
                session_id: SessionId::parse("NOPE01").unwrap(),
                role: Role::Student,
                display_name: "Early".into(),
                credentials: None,
            },
        )
        .await;
        match recv(&mut ws).await {
            ServerMessage::JoinFailed { reason } => assert_eq!(reason, "session not found"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unreadable_config_surfaces_as_config_error() {
        let args = Args::parse_from([
            "classcast-relay",
            "--config",
            "/nonexistent/classcast/relay.toml",
        ]);
        let err = load(&args).unwrap_err();
        assert!(matches!(err, classcast_common::ClasscastError::Config(_)));
        assert!(err.to_string().contains("relay.toml"));
    }

    #[test]
    fn print_config_flag() {
        let args = Args::parse_from(["classcast-relay", "--print-config"]);
        assert!(args.print_config);
        let json = classcast_config::config_to_json(&ClasscastConfig::default());
        assert!(json.contains("\"relay\""));
    }

    #[test]
    fn cli_overrides_config() {
        let args = Args::parse_from(["classcast-relay", "--port", "6001", "--log-level", "debug"]);
        assert_eq!(args.port, Some(6001));
        assert_eq!(filter_directive(&args, LogLevel::Info), "debug");
    }
}
