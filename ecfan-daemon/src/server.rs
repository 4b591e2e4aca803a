//! Unix socket IPC server
//!
//! Accepts local clients on a stream socket and speaks the line protocol
//! from `ecfan-protocol`: one request per connection, one response, close.
//! Connections are handled inline on the accept loop - there is no
//! per-client fan-out, and the server trusts the peer for nothing beyond
//! the command grammar. Read and write deadlines keep a stalled client
//! from wedging the loop, and a shutdown notification wakes the accept
//! select so the socket file can be removed promptly.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use ecfan_core::constants::ipc;
use ecfan_error::{EcfanError, Result};
use ecfan_protocol::{Request, Response, MAX_FRAME};

use crate::controller::{ControlState, FanMode};

/// Socket permissions: world read/write so unprivileged clients can query
/// the daemon. The command grammar is the entire attack surface.
const SOCKET_MODE: u32 = 0o666;

/// Run the accept loop until shutdown is signalled.
pub async fn run_server(
    socket_path: PathBuf,
    state: Arc<ControlState>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
) -> Result<()> {
    // Remove a stale socket, refusing to touch symlinks.
    if socket_path.exists() {
        let metadata = socket_path.symlink_metadata()?;
        if metadata.file_type().is_symlink() {
            return Err(EcfanError::ipc(format!(
                "socket path {} is a symlink - refusing",
                socket_path.display()
            )));
        }
        std::fs::remove_file(&socket_path)?;
        debug!("removed stale socket file");
    }

    let listener = UnixListener::bind(&socket_path)
        .map_err(|e| EcfanError::ipc(format!("bind {} failed: {e}", socket_path.display())))?;
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))?;

    info!(
        "listening on {} (mode {:o})",
        socket_path.display(),
        SOCKET_MODE
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        // Inline handling: one request, one response.
                        handle_connection(stream, &state).await;
                    }
                    Err(e) => {
                        error!("accept error: {e}");
                    }
                }
            }
            _ = notify.notified() => {
                if shutdown.load(Ordering::SeqCst) {
                    info!("shutdown requested, leaving accept loop");
                    break;
                }
            }
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    Ok(())
}

/// Serve a single client: read one bounded request line, reply, close.
async fn handle_connection(stream: UnixStream, state: &ControlState) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(MAX_FRAME);

    let response = match timeout(
        ipc::READ_TIMEOUT,
        read_line_bounded(&mut reader, &mut line, MAX_FRAME),
    )
    .await
    {
        Ok(Ok(0)) => {
            debug!("client closed without sending a request");
            return;
        }
        Ok(Ok(_)) => match std::str::from_utf8(&line) {
            Ok(text) => process_request(text, state),
            Err(_) => Response::error("ERROR: Invalid request encoding"),
        },
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
            warn!("oversized request frame dropped");
            Response::error("ERROR: Request too large")
        }
        Ok(Err(e)) => {
            debug!("recv error: {e}");
            return;
        }
        Err(_) => {
            debug!("client read timed out");
            return;
        }
    };

    let reply = format!("{response}\n");
    match timeout(ipc::WRITE_TIMEOUT, writer.write_all(reply.as_bytes())).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("send error: {e}"),
        Err(_) => debug!("client write timed out"),
    }
}

/// Parse and execute one request against the shared state.
fn process_request(line: &str, state: &ControlState) -> Response {
    let request = match Request::parse(line) {
        Ok(request) => request,
        Err(message) => {
            debug!("rejected request {line:?}");
            return Response::error(message);
        }
    };

    match request {
        Request::Status => {
            let snap = state.snapshot();
            Response::Status {
                cpu_temp: snap.cpu_temp,
                gpu_temp: snap.gpu_temp,
                fan_duty: snap.fan_duty,
                fan_rpm: snap.fan_rpm,
                auto: snap.mode == FanMode::Auto,
            }
        }
        Request::GetTemp => {
            let snap = state.snapshot();
            Response::Temps {
                cpu_temp: snap.cpu_temp,
                gpu_temp: snap.gpu_temp,
            }
        }
        Request::GetFan => {
            let snap = state.snapshot();
            Response::Fan {
                fan_duty: snap.fan_duty,
                fan_rpm: snap.fan_rpm,
                auto: snap.mode == FanMode::Auto,
            }
        }
        Request::SetFan { duty } => {
            state.set_manual(duty);
            info!("client requested manual fan duty {duty}%");
            Response::FanSet { duty }
        }
        Request::SetAuto => {
            state.set_auto();
            info!("client enabled auto mode");
            Response::AutoEnabled
        }
        Request::SetTargetTemp { celsius } => {
            state.set_target_temp(celsius);
            info!("client set target temperature {celsius}°C");
            Response::TargetTempSet { celsius }
        }
    }
}

/// Read one line of at most `max_len` bytes. Returns the number of bytes
/// read (0 on EOF before any data); an oversized line yields
/// `InvalidData` after consuming what fits.
async fn read_line_bounded<R: tokio::io::AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            // EOF terminates the request like a newline would.
            return Ok(out.len());
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "request too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}
