//! HTTP API Server
//!
//! Lightweight HTTP/1.1 server for the encryption service. One thread per
//! connection, one request per connection, no external web framework.
//!
//! ## Running the Server
//!
//! ```bash
//! filecrypt serve --port 8000 --init-keys
//! filecrypt serve --bind 0.0.0.0 --max-input 256M --session-ttl 30m
//! ```

use crate::api::handlers::*;
use crate::api::models::*;
use crate::api::multipart::MultipartForm;
use crate::config::ServiceConfig;
use crate::error::{FileCryptError, Result};
use crate::staging::ArtifactLease;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Room for multipart framing and the text fields around the file
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Longest accepted request line or header line
const MAX_LINE_LEN: u64 = 8 * 1024;

/// Most headers accepted per request
const MAX_HEADERS: usize = 100;

/// A parsed request
#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: HashMap<String, String>,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Response-side settings shared by every connection
#[derive(Debug, Clone, Copy)]
struct ResponseOptions {
    cors: bool,
}

/// Decrements the live connection count on drop
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// API HTTP Server
pub struct ApiServer {
    /// Configuration
    config: ServiceConfig,
    /// Shared application state
    state: Arc<AppState>,
    /// Shutdown flag
    shutdown: Arc<AtomicBool>,
    /// Connections currently being served
    active: Arc<AtomicUsize>,
}

impl ApiServer {
    /// Create a new API server
    pub fn new(config: ServiceConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Get shutdown flag for external control
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Get shared state
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured address and serve until shut down
    pub fn run(&self) -> Result<()> {
        let addr = self.config.socket_addr()?;
        let listener = TcpListener::bind(addr).map_err(|e| FileCryptError::io(addr.to_string(), e))?;
        self.serve(listener)
    }

    /// Serve on an already bound listener (blocking)
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        let local = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        tracing::info!("FileCrypt API listening on http://{}", local);

        while !self.shutdown.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::debug!("Accepted connection from {}", peer);
                    self.accept(stream);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }

        tracing::info!("API server shutting down");
        Ok(())
    }

    fn accept(&self, mut stream: TcpStream) {
        let options = ResponseOptions {
            cors: self.config.cors,
        };

        if self.active.fetch_add(1, Ordering::SeqCst) >= self.config.max_connections {
            self.active.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("Connection limit of {} reached", self.config.max_connections);
            let _ = send_error(&mut stream, 503, "Server is at its connection limit", options);
            return;
        }
        let slot = ConnectionSlot(Arc::clone(&self.active));

        let state = Arc::clone(&self.state);
        let config = self.config.clone();
        let spawned = thread::Builder::new()
            .name("http-conn".to_string())
            .spawn(move || {
                let _slot = slot;
                if let Err(e) = handle_connection(stream, &state, &config, options) {
                    tracing::debug!("Connection error: {}", e);
                }
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn connection thread: {}", e);
        }
    }
}

/// Largest request body accepted for `config`
fn max_body_size(config: &ServiceConfig) -> u64 {
    config.max_input_size.saturating_add(MULTIPART_OVERHEAD)
}

/// Handle a single HTTP connection
fn handle_connection(
    mut stream: TcpStream,
    state: &AppState,
    config: &ServiceConfig,
    options: ResponseOptions,
) -> Result<()> {
    stream.set_nonblocking(false)?;
    // Reads share one deadline for the whole request; writes time out per call
    stream.set_write_timeout(Some(config.io_timeout))?;

    let deadline = Instant::now() + config.io_timeout;
    let request = match read_request(&stream, deadline, max_body_size(config)) {
        Ok(request) => request,
        Err(RequestError::Respond(status, message)) => {
            return send_error(&mut stream, status, &message, options);
        }
        Err(RequestError::Io(e)) if is_timeout(&e) => {
            return send_error(&mut stream, 408, "Request timed out", options);
        }
        Err(RequestError::Io(e)) => return Err(e.into()),
    };

    route_request(&mut stream, &request, state, options)
}

enum RequestError {
    /// Answer with this status and close
    Respond(u16, String),
    Io(io::Error),
}

impl From<io::Error> for RequestError {
    fn from(e: io::Error) -> Self {
        RequestError::Io(e)
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// Socket reader that fails once the request deadline has passed
struct DeadlineReader<'a> {
    stream: &'a TcpStream,
    deadline: Instant,
}

impl Read for DeadlineReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::ErrorKind::TimedOut.into());
        }
        self.stream.set_read_timeout(Some(remaining))?;
        let mut stream = self.stream;
        stream.read(buf)
    }
}

fn read_line(reader: &mut BufReader<DeadlineReader<'_>>) -> std::result::Result<String, RequestError> {
    let mut line = String::new();
    let n = reader.by_ref().take(MAX_LINE_LEN).read_line(&mut line)?;
    if n as u64 >= MAX_LINE_LEN && !line.ends_with('\n') {
        return Err(RequestError::Respond(400, "Header line too long".to_string()));
    }
    Ok(line)
}

/// Read request line, headers and a Content-Length body
fn read_request(
    stream: &TcpStream,
    deadline: Instant,
    max_body: u64,
) -> std::result::Result<HttpRequest, RequestError> {
    let mut reader = BufReader::new(DeadlineReader { stream, deadline });

    let request_line = read_line(&mut reader)?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Err(RequestError::Respond(400, "Bad Request".to_string()));
    }
    let method = parts[0].to_string();
    let target = parts[1];

    let mut headers: Vec<(String, String)> = Vec::new();
    let mut content_length: Option<u64> = None;

    loop {
        let line = read_line(&mut reader)?;
        if line.trim().is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(RequestError::Respond(400, "Too many headers".to_string()));
        }

        if let Some((key, value)) = line.trim().split_once(':') {
            let key = key.trim().to_lowercase();
            let value = value.trim().to_string();

            if key == "content-length" {
                content_length = Some(value.parse().map_err(|_| {
                    RequestError::Respond(400, "Invalid Content-Length".to_string())
                })?);
            }
            if key == "transfer-encoding" {
                return Err(RequestError::Respond(
                    411,
                    "Chunked bodies are not supported; send Content-Length".to_string(),
                ));
            }

            headers.push((key, value));
        }
    }

    let content_length = content_length.unwrap_or(0);
    if content_length > max_body {
        return Err(RequestError::Respond(
            413,
            format!("Request body of {} bytes exceeds the {} byte limit", content_length, max_body),
        ));
    }

    let mut body = vec![0u8; content_length as usize];
    reader.read_exact(&mut body)?;

    let (path, query) = target.split_once('?').unwrap_or((target, ""));
    Ok(HttpRequest {
        method,
        path: path.to_string(),
        query: parse_query_string(query),
        headers,
        body,
    })
}

/// Strip the optional `/api` prefix
fn normalize_path(path: &str) -> &str {
    match path.strip_prefix("/api") {
        Some("") => "/",
        Some(rest) if rest.starts_with('/') => rest,
        _ => path,
    }
}

/// Route HTTP request to appropriate handler
fn route_request(
    stream: &mut TcpStream,
    request: &HttpRequest,
    state: &AppState,
    options: ResponseOptions,
) -> Result<()> {
    // Handle CORS preflight
    if request.method == "OPTIONS" {
        return send_cors_preflight(stream, options);
    }

    tracing::info!("{} {}", request.method, request.path);
    let path = normalize_path(&request.path);
    let method = request.method.as_str();

    match (method, path) {
        ("GET", "/") => send_json(stream, 200, &handle_root(), options),

        ("GET", "/health") => send_json(stream, 200, &handle_health(state), options),

        ("GET", "/generate-key") => match handle_generate_key(&request.query) {
            Ok(resp) => send_json(stream, 200, &resp, options),
            Err(e) => send_failure(stream, "Key generation failed", &e, options),
        },

        ("POST", "/encrypt") => match parse_form(request).and_then(|form| handle_encrypt(state, &form)) {
            Ok(resp) => send_json(stream, 200, &resp, options),
            Err(e) => send_failure(stream, "Encryption failed", &e, options),
        },

        ("POST", "/decrypt") => match parse_form(request).and_then(|form| handle_decrypt(state, &form)) {
            Ok(resp) => send_json(stream, 200, &resp, options),
            Err(e) => send_failure(stream, "Decryption failed", &e, options),
        },

        ("GET", path) if path.starts_with("/download/") => {
            match path["/download/".len()..].split_once('/') {
                Some((token, name)) if !token.is_empty() && !name.contains('/') => {
                    let name = percent_decode(name, false);
                    match handle_download(state, token, &name) {
                        Ok(lease) => send_file(stream, lease, options),
                        Err(_) => send_error(stream, 404, "File not found", options),
                    }
                }
                _ => send_error(stream, 404, "File not found", options),
            }
        }

        (_, "/" | "/health" | "/generate-key" | "/encrypt" | "/decrypt") => {
            send_error(stream, 405, "Method not allowed", options)
        }

        // Not found
        _ => send_error(stream, 404, "Not found", options),
    }
}

fn parse_form(request: &HttpRequest) -> Result<MultipartForm> {
    let content_type = request
        .header("content-type")
        .ok_or_else(|| FileCryptError::invalid("missing Content-Type"))?;
    MultipartForm::parse(content_type, &request.body)
}

/// Parse query string into key-value pairs
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let value = parts.next().unwrap_or("");
            Some((percent_decode(key, true), percent_decode(value, true)))
        })
        .collect()
}

/// Percent decoding; `plus_as_space` applies to query strings only
fn percent_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 3;
                        continue;
                    }
                    None => out.push(b'%'),
                }
            }
            b'+' if plus_as_space => out.push(b' '),
            other => out.push(other),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Send JSON response
fn send_json<T: serde::Serialize>(
    stream: &mut TcpStream,
    status: u16,
    data: &T,
    options: ResponseOptions,
) -> Result<()> {
    let body = serde_json::to_vec(data).map_err(|e| FileCryptError::invalid(e.to_string()))?;
    send_response(stream, status, &body, "application/json", &[], options)
}

/// Send an error body derived from a failed operation
fn send_failure(
    stream: &mut TcpStream,
    context: &str,
    err: &FileCryptError,
    options: ResponseOptions,
) -> Result<()> {
    let status = error_status(err);
    if status >= 500 {
        tracing::warn!("{}: {}", context, err);
    } else {
        tracing::debug!("{}: {}", context, err);
    }
    let message = match err.root() {
        FileCryptError::UnsupportedAlgorithm(_) => err.to_string(),
        _ => format!("{}: {}", context, err),
    };
    send_json(stream, status, &ApiError::new(status, message), options)
}

/// Send error response
fn send_error(stream: &mut TcpStream, status: u16, message: &str, options: ResponseOptions) -> Result<()> {
    send_json(stream, status, &ApiError::new(status, message), options)
}

/// Stream an artifact as an attachment
fn send_file(stream: &mut TcpStream, mut lease: ArtifactLease, options: ResponseOptions) -> Result<()> {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        lease.name().replace(['"', '\\'], "_")
    );
    let head = response_head(
        200,
        "application/octet-stream",
        lease.len(),
        &[("Content-Disposition", disposition.as_str())],
        options,
    );
    stream.write_all(head.as_bytes())?;
    io::copy(lease.file(), stream)?;
    stream.flush()?;
    Ok(())
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        411 => "Length Required",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

fn response_head(
    status: u16,
    content_type: &str,
    content_length: u64,
    extra: &[(&str, &str)],
    options: ResponseOptions,
) -> String {
    let mut head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n",
        status,
        status_text(status),
        content_type,
        content_length,
    );

    for (name, value) in extra {
        head.push_str(&format!("{}: {}\r\n", name, value));
    }

    if options.cors {
        head.push_str("Access-Control-Allow-Origin: *\r\n");
        head.push_str("Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n");
        head.push_str("Access-Control-Allow-Headers: *\r\n");
    }

    head.push_str("\r\n");
    head
}

/// Send HTTP response
fn send_response(
    stream: &mut TcpStream,
    status: u16,
    body: &[u8],
    content_type: &str,
    extra: &[(&str, &str)],
    options: ResponseOptions,
) -> Result<()> {
    let head = response_head(status, content_type, body.len() as u64, extra, options);
    stream.write_all(head.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

/// Send CORS preflight response
fn send_cors_preflight(stream: &mut TcpStream, options: ResponseOptions) -> Result<()> {
    let mut response = String::from("HTTP/1.1 204 No Content\r\n");
    if options.cors {
        response.push_str(
            "Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: *\r\n\
             Access-Control-Max-Age: 86400\r\n",
        );
    }
    response.push_str("Content-Length: 0\r\nConnection: close\r\n\r\n");

    stream.write_all(response.as_bytes())?;
    stream.flush()?;
    Ok(())
}
