//! vitalboard authority entrypoint.
//!
//! A small single-writer service that owns SharedState. Terminals either poll
//! it (`get_state` / `update`) or hold a `subscribe` connection open and
//! exchange events. State is in memory only; a restart returns to the seed.

use fs_err as fs;
use std::env;
use std::io::{Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vitalboard_protocol::{
    parse_update, ErrorInfo, Method, Request, Response, ERROR_TOO_MANY_CONNECTIONS,
    MAX_REQUEST_BYTES, PROTOCOL_VERSION,
};

mod state;
mod subscription;

use state::{seed_state, SharedState};

const SOCKET_ENV: &str = "VITALBOARD_SOCKET";
const SOCKET_NAME: &str = "board.sock";
const READ_TIMEOUT_SECS: u64 = 2;
const READ_CHUNK_SIZE: usize = 4096;
const MAX_ACTIVE_CONNECTIONS: usize = 64;

fn main() {
    init_logging();

    let socket_path = match daemon_socket_path() {
        Ok(path) => path,
        Err(err) => {
            error!(error = %err, "Failed to resolve authority socket path");
            std::process::exit(1);
        }
    };

    if let Err(err) = prepare_socket_dir(&socket_path) {
        error!(error = %err, "Failed to prepare authority socket directory");
        std::process::exit(1);
    }

    if let Err(err) = remove_existing_socket(&socket_path) {
        error!(error = %err, path = %socket_path.display(), "Failed to remove existing socket");
        std::process::exit(1);
    }

    let listener = match UnixListener::bind(&socket_path) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, path = %socket_path.display(), "Failed to bind authority socket");
            std::process::exit(1);
        }
    };

    info!(path = %socket_path.display(), "vitalboard authority started");

    let shared_state = Arc::new(SharedState::new(seed_state()));

    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                let state = Arc::clone(&shared_state);
                let active = state.active_connections.fetch_add(1, Ordering::SeqCst);
                if active >= MAX_ACTIVE_CONNECTIONS {
                    state.active_connections.fetch_sub(1, Ordering::SeqCst);
                    state.rejected_connections.fetch_add(1, Ordering::Relaxed);
                    warn!(active, "Connection limit reached; rejecting");
                    reject_connection(stream);
                    continue;
                }
                thread::spawn(move || {
                    handle_connection(stream, Arc::clone(&state));
                    state.active_connections.fetch_sub(1, Ordering::SeqCst);
                });
            }
            Err(err) => {
                warn!(error = %err, "Failed to accept authority connection");
            }
        }
    }
}

fn init_logging() {
    let debug_enabled = env::var("VITALBOARD_DEBUG_LOG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn daemon_socket_path() -> Result<PathBuf, String> {
    if let Some(path) = env::var_os(SOCKET_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let home = dirs::home_dir().ok_or_else(|| "Home directory not found".to_string())?;
    Ok(home.join(".vitalboard").join(SOCKET_NAME))
}

fn prepare_socket_dir(socket_path: &Path) -> Result<(), String> {
    let parent = socket_path
        .parent()
        .ok_or_else(|| "Socket path has no parent".to_string())?;
    fs::create_dir_all(parent).map_err(|err| format!("Failed to create socket directory: {}", err))
}

fn remove_existing_socket(socket_path: &Path) -> Result<(), String> {
    if socket_path.exists() {
        fs::remove_file(socket_path)
            .map_err(|err| format!("Failed to remove existing socket: {}", err))?;
    }
    Ok(())
}

fn reject_connection(mut stream: UnixStream) {
    let response = Response::error(
        None,
        ERROR_TOO_MANY_CONNECTIONS,
        "authority connection limit reached",
    );
    let _ = write_response(&mut stream, response);
}

fn handle_connection(mut stream: UnixStream, state: Arc<SharedState>) {
    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            warn!(code = %err.code, message = %err.message, "Failed to read request");
            let response = Response::error_with_info(None, err);
            let _ = write_response(&mut stream, response);
            return;
        }
    };

    tracing::debug!(method = ?request.method, id = ?request.id, "Authority request received");

    if request.method == Method::Subscribe && request.protocol_version == PROTOCOL_VERSION {
        subscription::serve(stream, request.id, state);
        return;
    }

    let response = handle_request(request, &state);
    let _ = write_response(&mut stream, response);
}

fn read_request(stream: &mut UnixStream) -> Result<Request, ErrorInfo> {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(READ_TIMEOUT_SECS)));

    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(ErrorInfo::new(
                        "request_too_large",
                        "request exceeded maximum size",
                    ));
                }
                if chunk[..n].contains(&b'\n') {
                    break;
                }
            }
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ErrorInfo::new("read_timeout", "request timed out"));
            }
            Err(err) => {
                return Err(ErrorInfo::new(
                    "read_error",
                    format!("failed to read request: {}", err),
                ));
            }
        }
    }

    let request_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => {
            if buffer[index + 1..].iter().any(|b| !b.is_ascii_whitespace()) {
                warn!("Extra bytes detected after newline; ignoring trailing data");
            }
            &buffer[..index]
        }
        None => buffer.as_slice(),
    };

    if request_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ErrorInfo::new("empty_request", "request body was empty"));
    }

    serde_json::from_slice(request_bytes).map_err(|err| {
        ErrorInfo::new(
            "invalid_json",
            format!("request was not valid JSON: {}", err),
        )
    })
}

fn handle_request(request: Request, state: &SharedState) -> Response {
    if request.protocol_version != PROTOCOL_VERSION {
        return Response::error(
            request.id,
            "protocol_mismatch",
            "unsupported protocol version",
        );
    }

    match request.method {
        Method::GetHealth => {
            let mut data = serde_json::json!({
                "status": "ok",
                "pid": std::process::id(),
                "version": env!("CARGO_PKG_VERSION"),
                "protocol_version": PROTOCOL_VERSION,
            });
            if let Ok(value) = serde_json::to_value(state.stats()) {
                data["stats"] = value;
            }
            Response::ok(request.id, data)
        }
        Method::GetState => match serde_json::to_value(state.snapshot()) {
            Ok(value) => Response::ok(request.id, value),
            Err(err) => Response::error(
                request.id,
                "serialization_error",
                format!("Failed to serialize state: {}", err),
            ),
        },
        Method::Update => handle_update(request, state),
        // Matching subscribe requests are upgraded before dispatch.
        Method::Subscribe => Response::error(
            request.id,
            "invalid_request",
            "subscribe must be the first request on a connection",
        ),
    }
}

fn handle_update(request: Request, state: &SharedState) -> Response {
    let params = match request.params {
        Some(params) => params,
        None => return Response::error(request.id, "invalid_params", "fields are required"),
    };

    let updates = match parse_update(params) {
        Ok(updates) => updates,
        Err(err) => return Response::error_with_info(request.id, err),
    };

    let applied = state.apply(updates, None);
    info!(fields = ?applied, "Fields updated");

    Response::ok(request.id, serde_json::json!({"accepted": true}))
}

pub(crate) fn write_response(stream: &mut UnixStream, response: Response) -> std::io::Result<()> {
    serde_json::to_writer(&mut *stream, &response)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}
