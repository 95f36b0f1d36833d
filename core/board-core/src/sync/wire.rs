//! Newline-delimited JSON over the authority's Unix socket.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use vitalboard_protocol::{Method, Request, Response, MAX_REQUEST_BYTES};

use crate::error::{BoardError, Result};

const READ_TIMEOUT_MS: u64 = 2000;
const WRITE_TIMEOUT_MS: u64 = 2000;
const READ_CHUNK_SIZE: usize = 4096;

pub fn connect(socket: &Path) -> Result<UnixStream> {
    let stream = UnixStream::connect(socket).map_err(|source| BoardError::Connect {
        path: socket.to_path_buf(),
        source,
    })?;
    let _ = stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)));
    let _ = stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)));
    Ok(stream)
}

pub fn write_line<T: Serialize>(stream: &mut UnixStream, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *stream, value).map_err(|source| BoardError::Json {
        context: "Failed to write message".to_string(),
        source,
    })?;
    stream
        .write_all(b"\n")
        .and_then(|_| stream.flush())
        .map_err(|source| BoardError::Io {
            context: "Failed to flush message".to_string(),
            source,
        })
}

/// One request on a fresh connection; the authority closes after replying.
pub fn send_request(socket: &Path, method: Method, params: Option<serde_json::Value>) -> Result<Response> {
    let mut stream = connect(socket)?;
    let request = Request::new(method, None, params);
    write_line(&mut stream, &request)?;
    let response = read_response(&mut stream)?;
    if response.ok {
        return Ok(response);
    }
    Err(match response.error {
        Some(info) => BoardError::from(info),
        None => BoardError::Rejected {
            code: "unknown".to_string(),
            message: "Unknown authority error".to_string(),
        },
    })
}

pub fn read_response(stream: &mut UnixStream) -> Result<Response> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                if buffer.len() > MAX_REQUEST_BYTES {
                    return Err(BoardError::ResponseTooLarge);
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
                return Err(BoardError::Timeout);
            }
            Err(source) => {
                return Err(BoardError::Io {
                    context: "Failed to read response".to_string(),
                    source,
                })
            }
        }
    }

    let response_bytes = match buffer.iter().position(|b| *b == b'\n') {
        Some(index) => &buffer[..index],
        None => buffer.as_slice(),
    };

    if response_bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(BoardError::EmptyResponse);
    }

    serde_json::from_slice(response_bytes).map_err(|source| BoardError::Json {
        context: "Failed to parse response".to_string(),
        source,
    })
}
