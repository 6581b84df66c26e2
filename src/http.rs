//! Loopback HTTP control surface: the short-lived client used by the CLI
//! against a running daemon, and the daemon-side listener serving it.
//!
//! The protocol is deliberately small: `POST /<service>` with an
//! `action=<verb>` form body, HTML responses, any status below 300 is
//! success. IPv4 only. SSL is an external transport concern and is not
//! bound here.
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::{debug, error, info, warn};

use crate::config::HttpdSection;
use crate::control;
use crate::error::HttpClientError;
use crate::run::Engine;
use crate::service::{Action, Monitor};

/// Cap on the error body the client is willing to scrape.
const ERROR_BODY_CAP: usize = 1024;

const NET_TIMEOUT: Duration = Duration::from_secs(5);

/// Issues `action` against a running daemon through its control listener.
pub fn control_daemon(
    httpd: &HttpdSection,
    service: &str,
    action: Action,
) -> Result<(), HttpClientError> {
    let target = format!("{}:{}", httpd.address, httpd.port);
    let mut stream = TcpStream::connect(&target).map_err(HttpClientError::NotAvailable)?;
    stream.set_read_timeout(Some(NET_TIMEOUT))?;
    stream.set_write_timeout(Some(NET_TIMEOUT))?;

    let body = format!("action={action}");
    let auth = httpd.auth.as_ref().map(|auth| {
        format!(
            "Authorization: Basic {}\r\n",
            BASE64.encode(format!("{}:{}", auth.username, auth.password))
        )
    });
    write!(
        stream,
        "POST /{service} HTTP/1.0\r\n\
         Content-Type: application/x-www-form-urlencoded\r\n\
         Content-Length: {}\r\n\
         {}\r\n\
         {body}",
        body.len(),
        auth.as_deref().unwrap_or("")
    )?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line)?;
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HttpClientError::BadStatusLine(status_line.trim().to_string()))?;

    if status < 300 {
        return Ok(());
    }
    Err(HttpClientError::Rejected(scrape_error(&mut reader)))
}

/// Extracts the error text between `</h2>` and `<p>` from an HTML error
/// page, mirroring what the daemon emits below.
fn scrape_error(reader: &mut impl BufRead) -> String {
    let mut content_length = 0usize;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    break;
                }
                if let Some(value) = trimmed.strip_prefix("Content-Length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            Err(_) => break,
        }
    }
    if content_length == 0 || content_length >= ERROR_BODY_CAP {
        return "unable to parse response".to_string();
    }
    let mut body = vec![0u8; content_length];
    if reader.read_exact(&mut body).is_err() {
        return "unable to parse response".to_string();
    }
    let body = String::from_utf8_lossy(&body);
    match body.split_once("</h2>") {
        Some((_, rest)) => {
            let message = match rest.split_once("<p>") {
                Some((message, _)) => message,
                None => rest,
            };
            let message = message.trim();
            if message.is_empty() {
                "unable to parse response".to_string()
            } else {
                message.to_string()
            }
        }
        None => "unable to parse response".to_string(),
    }
}

/// The daemon-side control listener. One request is served at a time in
/// the daemon's context; actions go through the dispatcher under the
/// service-table mutex.
pub struct HttpControl {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    target: String,
}

impl HttpControl {
    /// Binds the configured loopback listener and starts serving. Port 0
    /// binds an ephemeral port, reported by [`port`](Self::port).
    pub fn spawn(engine: Arc<Engine>, httpd: HttpdSection) -> std::io::Result<Self> {
        let listener = TcpListener::bind(format!("{}:{}", httpd.address, httpd.port))?;
        let target = listener.local_addr()?.to_string();
        info!("control listener at [{target}]");
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_worker = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if shutdown_worker.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        if let Err(e) = serve(&engine, &httpd, stream) {
                            warn!("control request failed: {e}");
                        }
                    }
                    Err(e) => {
                        error!("control listener error: {e}");
                        break;
                    }
                }
            }
            debug!("control listener stopped");
        });
        Ok(Self {
            handle,
            shutdown,
            target,
        })
    }

    /// The port the listener actually bound.
    pub fn port(&self) -> u16 {
        self.target
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
            .unwrap_or(0)
    }

    /// Stops accepting and joins the listener thread.
    pub fn stop(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        // Poke the blocking accept so the thread observes the flag.
        let _ = TcpStream::connect(&self.target);
        let _ = self.handle.join();
    }
}

fn serve(
    engine: &Arc<Engine>,
    httpd: &HttpdSection,
    mut stream: TcpStream,
) -> std::io::Result<()> {
    stream.set_read_timeout(Some(NET_TIMEOUT))?;
    stream.set_write_timeout(Some(NET_TIMEOUT))?;
    let mut reader = BufReader::new(stream.try_clone()?);

    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    let mut authorization: Option<String> = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            content_length = value.trim().parse().unwrap_or(0);
        } else if let Some(value) = trimmed.strip_prefix("Authorization:") {
            authorization = Some(value.trim().to_string());
        }
    }

    if let Some(auth) = &httpd.auth {
        let expected = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", auth.username, auth.password))
        );
        if authorization.as_deref() != Some(expected.as_str()) {
            return respond(&mut stream, 401, "Unauthorized", "You are not authorized");
        }
    }

    if method != "POST" {
        return respond(&mut stream, 405, "Method Not Allowed", "Only POST is supported");
    }

    let mut body = vec![0u8; content_length.min(ERROR_BODY_CAP)];
    reader.read_exact(&mut body)?;
    let body = String::from_utf8_lossy(&body);
    let Some(verb) = body
        .split('&')
        .find_map(|pair| pair.strip_prefix("action="))
    else {
        return respond(&mut stream, 400, "Bad Request", "Missing action parameter");
    };

    let service = path.trim_start_matches('/');
    let Ok(action) = verb.trim().parse::<Action>() else {
        return respond(
            &mut stream,
            400,
            "Bad Request",
            &format!("Invalid action {verb}"),
        );
    };

    debug!("control request: {action} '{service}'");
    match run_action(engine, service, action) {
        Ok(()) => respond(
            &mut stream,
            200,
            "OK",
            &format!("'{service}' {action} done"),
        ),
        Err(crate::error::VigilError::UnknownService(name)) => respond(
            &mut stream,
            404,
            "Not Found",
            &format!("There is no service named \"{name}\""),
        ),
        Err(e) => respond(&mut stream, 503, "Service Unavailable", &e.to_string()),
    }
}

/// Dispatches one requested action, holding the service in `Waiting`
/// while the batch runs.
fn run_action(
    engine: &Arc<Engine>,
    service: &str,
    action: Action,
) -> Result<(), crate::error::VigilError> {
    {
        let mut table = engine.services.lock()?;
        let svc = table
            .get_mut(service)
            .ok_or_else(|| crate::error::VigilError::UnknownService(service.to_string()))?;
        svc.monitor = Monitor::Waiting;
    }

    let result = control::control(engine, service, action);

    {
        let mut table = engine.services.lock()?;
        if let Some(svc) = table.get_mut(service)
            && svc.monitor == Monitor::Waiting
        {
            svc.monitor = Monitor::Init;
        }
    }
    engine.flags.doaction.store(true, Ordering::SeqCst);
    result
}

fn respond(
    stream: &mut TcpStream,
    status: u16,
    reason: &str,
    message: &str,
) -> std::io::Result<()> {
    let heading = if status < 300 {
        "OK".to_string()
    } else {
        format!("{status} {reason}")
    };
    let body = format!("<html><body><h2>{heading}</h2>{message}<p></p></body></html>\r\n");
    write!(
        stream,
        "HTTP/1.0 {status} {reason}\r\n\
         Content-Type: text/html\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n\
         {body}",
        body.len()
    )?;
    stream.flush()
}
