//! HTTP server for reconciliation jobs
//! Minimal HTTP handling on top of tokio

use recon_align::observability::{init_tracing, redact};
use recon_align::orchestrator::{JobStore, Orchestrator, ReconRequest, ReconResponse};
use recon_align::Settings;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    let settings = Settings::from_env()?;
    let orchestrator = Arc::new(Orchestrator::from_settings(&settings)?);

    let listener = TcpListener::bind(&settings.server_addr).await?;
    info!("Server listening on {}", settings.server_addr);

    loop {
        let (stream, addr) = listener.accept().await?;
        info!("New connection from: {}", addr);
        tokio::spawn(handle_connection(stream, orchestrator.clone()));
    }
}

async fn handle_connection(mut stream: TcpStream, orchestrator: Arc<Orchestrator>) {
    let response = match read_request(&mut stream).await {
        Ok(Some(request)) => handle_request(&request, &orchestrator).await,
        Ok(None) => create_response(400, "Bad Request", r#"{"error":"Malformed request"}"#),
        Err(e) => {
            error!("Failed to read from stream: {}", e);
            return;
        }
    };
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        error!("Failed to write response: {}", e);
    }
}

struct HttpRequest {
    method: String,
    path: String,
    body: String,
}

/// Read the head, then as many body bytes as `Content-Length` announces.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<Option<HttpRequest>> {
    let mut data = Vec::new();
    let mut buffer = [0; 4096];
    let head_end = loop {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            return Ok(None);
        }
        data.extend_from_slice(&buffer[..n]);
        if let Some(pos) = find_head_end(&data) {
            break pos;
        }
        if data.len() > MAX_BODY_BYTES {
            return Ok(None);
        }
    };

    let head = String::from_utf8_lossy(&data[..head_end]).to_string();
    let mut lines = head.lines();
    let Some(request_line) = lines.next() else {
        return Ok(None);
    };
    let parts: Vec<&str> = request_line.split_whitespace().collect();
    if parts.len() < 2 {
        return Ok(None);
    }

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_lowercase(), value.trim().to_string());
        }
    }
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Ok(None);
    }

    let body_start = head_end + 4;
    while data.len() < body_start + content_length {
        let n = stream.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buffer[..n]);
    }
    let body_end = data.len().min(body_start + content_length);
    let body = String::from_utf8_lossy(&data[body_start.min(body_end)..body_end]).to_string();

    Ok(Some(HttpRequest {
        method: parts[0].to_string(),
        path: normalize_path(parts[1]),
        body,
    }))
}

fn find_head_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

fn normalize_path(raw: &str) -> String {
    let path = raw.split('?').next().unwrap_or(raw).trim_end_matches('/');
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}

async fn handle_request(request: &HttpRequest, orchestrator: &Orchestrator) -> String {
    info!("Request: {} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") | ("GET", "/api/health") => {
            create_response(200, "OK", r#"{"status":"ok","service":"recon-align"}"#)
        }
        ("OPTIONS", _) => create_response(204, "No Content", ""),
        ("POST", "/api/reconcile") => {
            let recon_request: ReconRequest = match serde_json::from_str(&request.body) {
                Ok(r) => r,
                Err(e) => {
                    warn!("Rejected reconcile body: {}", e);
                    let body = serde_json::json!({ "error": format!("Invalid request body: {}", e) });
                    return create_response(400, "Bad Request", &body.to_string());
                }
            };
            let response = orchestrator.run(recon_request).await;
            json_response(200, "OK", &response)
        }
        ("GET", path) if path.starts_with("/api/jobs/") => {
            let job_id = &path["/api/jobs/".len()..];
            match orchestrator.store().load(job_id) {
                Ok(Some(state)) => json_response(200, "OK", &ReconResponse::from(&state)),
                Ok(None) => create_response(404, "Not Found", r#"{"error":"Unknown job id"}"#),
                Err(e) => {
                    error!("Job lookup failed: {}", redact(&e.to_string()));
                    create_response(500, "Internal Server Error", r#"{"error":"Job store unavailable"}"#)
                }
            }
        }
        _ => create_response(404, "Not Found", r#"{"error":"Not found"}"#),
    }
}

fn json_response(status: u16, status_text: &str, value: &impl serde::Serialize) -> String {
    match serde_json::to_string(value) {
        Ok(body) => create_response(status, status_text, &body),
        Err(_) => create_response(500, "Internal Server Error", r#"{"error":"Failed to serialize response"}"#),
    }
}

fn create_response(status: u16, status_text: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: Content-Type\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        status,
        status_text,
        body.len(),
        body
    )
}
