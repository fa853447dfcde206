//! Loopback redirect listener
//!
//! Receives exactly one browser redirect on `127.0.0.1`, answers it with a
//! fixed plain-text page and stops. The responder runs in its own tokio task
//! so the caller can open the browser and then block on a bounded wait.
//!
//! Browsers may open speculative connections that send nothing, either
//! closing them or leaving them idle. Every accepted connection is read in
//! parallel; the first real request is the only one serviced, and the socket
//! is dropped before its result is reported.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};
use url::form_urlencoded;

use crate::constants::REDIRECT_SUCCESS_BODY;
use crate::error::{Error, Result};

/// Upper bound on the request line plus headers we are willing to read.
const MAX_REQUEST_BYTES: u64 = 8 * 1024;

/// Authorization code and state captured from a redirect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationResult {
    pub code: String,
    /// Absent when the server did not echo a state (and always for manual
    /// code entry).
    pub state: Option<String>,
}

/// Find a free port by binding port 0 and releasing the socket.
///
/// Known limitation: the port is free when this returns, but another process
/// may claim it before it is bound again. `LoopbackListener::bind(0)` keeps
/// the socket and has no such window; the login flow uses that instead.
pub fn reserve_port() -> Result<u16> {
    let socket = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| Error::PortReservationFailed(format!("binding 127.0.0.1:0: {e}")))?;
    let port = socket
        .local_addr()
        .map_err(|e| Error::PortReservationFailed(format!("reading local address: {e}")))?
        .port();
    debug!(port, "reserved loopback port");
    Ok(port)
}

/// Bind, serve a single redirect, and return what it carried.
///
/// Fails with `RedirectTimeout` if nothing arrives within `timeout`.
pub async fn listen_once(port: u16, timeout: Duration) -> Result<AuthorizationResult> {
    LoopbackListener::bind(port).await?.spawn().wait(timeout).await
}

/// A bound loopback socket that has not started serving yet.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    port: u16,
}

impl LoopbackListener {
    /// Bind `127.0.0.1:<port>`; port 0 lets the OS pick.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|e| Error::PortReservationFailed(format!("binding 127.0.0.1:{port}: {e}")))?;
        let port = listener
            .local_addr()
            .map_err(|e| Error::PortReservationFailed(format!("reading local address: {e}")))?
            .port();
        debug!(port, "loopback listener bound");
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Redirect URI pointing at this listener.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/", self.port)
    }

    /// Start serving in a background task.
    pub fn spawn(self) -> PendingRedirect {
        let (result_tx, result_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let port = self.port;

        let task = tokio::spawn(async move {
            let outcome = tokio::select! {
                outcome = serve_one(self.listener) => outcome,
                // Fires on an explicit cancel and when the handle is dropped
                _ = shutdown_rx => {
                    debug!(port, "loopback listener cancelled");
                    return;
                }
            };
            let _ = result_tx.send(outcome);
        });

        PendingRedirect {
            port,
            result_rx,
            shutdown_tx,
            task,
        }
    }
}

/// Handle to a running listener task.
///
/// Dropping the handle cancels the task and releases the socket.
#[derive(Debug)]
pub struct PendingRedirect {
    port: u16,
    result_rx: oneshot::Receiver<Result<AuthorizationResult>>,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl PendingRedirect {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait up to `timeout` for the redirect.
    ///
    /// On timeout the listener task is cancelled and awaited, so the port is
    /// free again by the time `RedirectTimeout` is returned.
    pub async fn wait(mut self, timeout: Duration) -> Result<AuthorizationResult> {
        match tokio::time::timeout(timeout, &mut self.result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Io(
                "loopback listener stopped without reporting a result".into(),
            )),
            Err(_) => {
                let _ = self.shutdown_tx.send(());
                if let Err(e) = self.task.await {
                    warn!(port = self.port, error = %e, "loopback listener task failed during cancel");
                }
                info!(
                    port = self.port,
                    timeout_secs = timeout.as_secs_f64(),
                    "no authorization redirect before timeout"
                );
                Err(Error::RedirectTimeout(timeout))
            }
        }
    }
}

/// Accept connections until one carries a request, answer it, and parse it.
///
/// Connections are read concurrently, so an idle preconnect that never sends
/// anything cannot hold up the real redirect. Only the first connection to
/// deliver a request line is answered; the listener and every other pending
/// connection are dropped before that.
async fn serve_one(listener: TcpListener) -> Result<AuthorizationResult> {
    let mut reads = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted
                    .map_err(|e| Error::Io(format!("accepting redirect connection: {e}")))?;
                reads.spawn(read_request(stream, peer));
            }
            Some(joined) = reads.join_next() => {
                let Ok(read) = joined else { continue };
                match read? {
                    Some((stream, peer, request_line)) => {
                        drop(listener);
                        reads.abort_all();
                        respond(stream, peer).await;
                        return parse_request_line(&request_line);
                    }
                    None => debug!("connection closed without a request, still waiting"),
                }
            }
        }
    }
}

/// Read the request line and drain the headers of one connection.
///
/// `None` if the peer went away before sending a request line.
async fn read_request(
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<Option<(TcpStream, SocketAddr, String)>> {
    let mut reader = BufReader::new(stream.take(MAX_REQUEST_BYTES));

    let mut request_line = String::new();
    match reader.read_line(&mut request_line).await {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::InvalidData => {
            return Err(Error::MalformedRedirect(
                "request line is not valid UTF-8".into(),
            ));
        }
        Err(e) => {
            debug!(%peer, error = %e, "dropping redirect connection");
            return Ok(None);
        }
    }

    // Drain headers so the browser sees a clean response
    loop {
        let mut header = String::new();
        match reader.read_line(&mut header).await {
            Ok(n) if n > 0 && !header.trim_end().is_empty() => {}
            // Header bytes are never interpreted, so bad ones just end the drain
            _ => break,
        }
    }

    Ok(Some((reader.into_inner().into_inner(), peer, request_line)))
}

/// Send the fixed success page and close the connection.
async fn respond(mut stream: TcpStream, peer: SocketAddr) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        REDIRECT_SUCCESS_BODY.len(),
        REDIRECT_SUCCESS_BODY
    );
    if let Err(e) = stream.write_all(response.as_bytes()).await {
        warn!(%peer, error = %e, "failed to answer redirect request");
    }
    let _ = stream.shutdown().await;
    debug!(%peer, "redirect request answered");
}

/// Check the method and parse the target of a `GET <target> HTTP/1.1` line.
fn parse_request_line(request_line: &str) -> Result<AuthorizationResult> {
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default();
    let target = parts
        .next()
        .ok_or_else(|| Error::MalformedRedirect(format!("bad request line: {request_line:?}")))?;
    if method != "GET" {
        return Err(Error::MalformedRedirect(format!(
            "expected GET, got {method}"
        )));
    }
    parse_redirect_target(target)
}

/// Extract the authorization result from a request target such as
/// `/?code=abc&state=xyz`.
pub fn parse_redirect_target(target: &str) -> Result<AuthorizationResult> {
    let query = target
        .split_once('?')
        .map(|(_, query)| query)
        .unwrap_or_default();
    let query = query.split('#').next().unwrap_or_default();

    let mut code = None;
    let mut state = None;
    let mut error = None;
    let mut description = None;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Err(Error::AuthorizationDenied { error, description });
    }

    match code {
        Some(code) if !code.is_empty() => Ok(AuthorizationResult { code, state }),
        _ => Err(Error::MalformedRedirect(
            "redirect carried neither a code nor an error".into(),
        )),
    }
}
