//! Local control socket
//!
//! The running daemon listens on a Unix socket in its config directory.
//! `hpd launch` and `hpd set-default` connect to it, write one JSON request
//! line and read one JSON reply line. Requests become engine messages, so
//! they follow the same rules as attach events.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hpd_core::prelude::*;
use hpd_core::{DeviceId, ImageKey};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};

use crate::message::Message;

/// Socket file name inside the config directory
pub const CONTROL_SOCKET_NAME: &str = "hpd.sock";

/// How long one request may take end to end
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Path of the control socket for a config directory
pub fn socket_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONTROL_SOCKET_NAME)
}

/// A request from `hpd` subcommands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Run an image now
    Launch { device_id: DeviceId, image: String },
    /// Set or clear a device's default image
    SetDefault {
        device_id: DeviceId,
        image: Option<String>,
    },
}

impl ControlRequest {
    fn into_message(self, reply: oneshot::Sender<ControlReply>) -> Message {
        match self {
            ControlRequest::Launch { device_id, image } => Message::LaunchImage {
                key: ImageKey::new(device_id, image),
                reply: Some(reply),
            },
            ControlRequest::SetDefault { device_id, image } => Message::SetDefaultImage {
                device_id,
                image,
                reply: Some(reply),
            },
        }
    }
}

/// The daemon's answer to one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    pub message: String,
}

impl ControlReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }

    pub fn from_result(result: Result<String>) -> Self {
        match result {
            Ok(message) => Self::ok(message),
            Err(e) => Self::failed(e.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────

/// Bind the control socket and serve requests until shutdown.
///
/// A leftover socket file from a dead daemon is replaced. A live one is an
/// error.
#[cfg(unix)]
pub fn spawn_control_server(
    path: PathBuf,
    msg_tx: mpsc::Sender<Message>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<tokio::task::JoinHandle<()>> {
    use tokio::net::UnixListener;

    if path.exists() {
        if std::os::unix::net::UnixStream::connect(&path).is_ok() {
            return Err(Error::control(format!(
                "another daemon is listening on {}",
                path.display()
            )));
        }
        std::fs::remove_file(&path)?;
    }

    let listener = UnixListener::bind(&path)
        .map_err(|e| Error::control(format!("cannot bind {}: {}", path.display(), e)))?;
    info!("Control socket: {}", path.display());

    Ok(tokio::spawn(async move {
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                accept = listener.accept() => match accept {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_connection(stream, msg_tx.clone()));
                    }
                    Err(e) => warn!("Control socket accept failed: {}", e),
                },
            }
        }

        let _ = std::fs::remove_file(&path);
        debug!("Control socket closed");
    }))
}

#[cfg(unix)]
async fn handle_connection(stream: tokio::net::UnixStream, msg_tx: mpsc::Sender<Message>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let reply = match tokio::time::timeout(REQUEST_TIMEOUT, lines.next_line()).await {
        Ok(Ok(Some(line))) => dispatch_line(&line, &msg_tx).await,
        Ok(Ok(None)) => return,
        Ok(Err(e)) => ControlReply::failed(format!("read failed: {}", e)),
        Err(_) => ControlReply::failed("timed out waiting for a request"),
    };

    match serde_json::to_string(&reply) {
        Ok(mut json) => {
            json.push('\n');
            if let Err(e) = write_half.write_all(json.as_bytes()).await {
                debug!("Control client went away: {}", e);
            }
        }
        Err(e) => warn!("Cannot encode control reply: {}", e),
    }
}

/// Parse one request line, hand it to the engine and wait for its answer
async fn dispatch_line(line: &str, msg_tx: &mpsc::Sender<Message>) -> ControlReply {
    let request: ControlRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return ControlReply::failed(format!("invalid request: {}", e)),
    };
    debug!("Control request: {:?}", request);

    let (reply_tx, reply_rx) = oneshot::channel();
    if msg_tx.send(request.into_message(reply_tx)).await.is_err() {
        return ControlReply::failed("daemon is shutting down");
    }

    match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => ControlReply::failed("daemon dropped the request"),
        Err(_) => ControlReply::failed("daemon did not answer in time"),
    }
}

// ─────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────

/// Send one request to the daemon listening on `path`
#[cfg(unix)]
pub async fn send_request(path: &Path, request: &ControlRequest) -> Result<ControlReply> {
    let stream = tokio::net::UnixStream::connect(path).await.map_err(|e| {
        Error::control(format!(
            "daemon not reachable at {}: {}",
            path.display(),
            e
        ))
    })?;
    let (read_half, mut write_half) = stream.into_split();

    let mut line = serde_json::to_string(request)
        .map_err(|e| Error::control(format!("cannot encode request: {}", e)))?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await?;

    let mut lines = BufReader::new(read_half).lines();
    let answer = tokio::time::timeout(REQUEST_TIMEOUT * 2, lines.next_line())
        .await
        .map_err(|_| Error::control("daemon did not answer in time"))??
        .ok_or_else(|| Error::control("daemon closed the connection"))?;

    serde_json::from_str(&answer).map_err(|e| Error::control(format!("invalid reply: {}", e)))
}
