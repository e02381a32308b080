//! IPC server for the daemon
//!
//! Listens on `127.0.0.1:<port>` and maps each authenticated request onto one
//! of the daemon flags. Handlers never run menu logic themselves; they flip a
//! flag and answer.

use crate::daemon::credential::Credential;
use crate::daemon::protocol::{DaemonRequest, DaemonResponse, Method};
use crate::daemon::signal::{Flag, Signals};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Longest request line accepted, in bytes, newline included
const MAX_REQUEST_LEN: u64 = 4096;

/// Errors that can occur in the IPC server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind 127.0.0.1:{port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Server shutdown")]
    Shutdown,
}

/// Handle to control a running IPC server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    shutdown_tx: broadcast::Sender<()>,
    local_addr: SocketAddr,
}

impl ServerHandle {
    /// Stop accepting connections
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// Authenticated loopback listener that flips daemon flags
pub struct IpcServer {
    secret: Arc<str>,
    port: u16,
    signals: Arc<Signals>,
}

impl IpcServer {
    /// Create a server for the given credential and flags
    pub fn new(credential: &Credential, signals: Arc<Signals>) -> Self {
        Self {
            secret: Arc::from(credential.secret.as_str()),
            port: credential.port,
            signals,
        }
    }

    /// Bind the listener and spawn the accept loop
    ///
    /// Binding happens before this returns, so a failure here is reported to
    /// the caller rather than logged from a background task.
    pub async fn run(&self) -> Result<ServerHandle, ServerError> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, self.port))
            .await
            .map_err(|source| ServerError::Bind {
                port: self.port,
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!("IPC server listening on {}", local_addr);

        let (shutdown_tx, _) = broadcast::channel(1);
        let handle = ServerHandle {
            shutdown_tx: shutdown_tx.clone(),
            local_addr,
        };

        let secret = Arc::clone(&self.secret);
        let signals = Arc::clone(&self.signals);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok((stream, addr)) => {
                                debug!("Accepted connection from {}", addr);
                                let secret = Arc::clone(&secret);
                                let signals = Arc::clone(&signals);
                                let mut conn_shutdown_rx = shutdown_rx.resubscribe();

                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, &secret, &signals, &mut conn_shutdown_rx).await {
                                        match e {
                                            ServerError::Shutdown => {
                                                debug!("Connection closed due to shutdown");
                                            }
                                            _ => {
                                                warn!("Connection error: {}", e);
                                            }
                                        }
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }

                    _ = shutdown_rx.recv() => {
                        info!("IPC server stopping");
                        break;
                    }
                }
            }
        });

        Ok(handle)
    }
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    secret: &str,
    signals: &Signals,
    shutdown_rx: &mut broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();

        tokio::select! {
            read_result = read_request_line(&mut reader, &mut line) => {
                match read_result {
                    Ok(Incoming::Closed) => {
                        debug!("Client disconnected");
                        return Ok(());
                    }
                    Ok(Incoming::TooLong) => {
                        warn!("Discarded request longer than {} bytes", MAX_REQUEST_LEN);
                        let response = DaemonResponse::Error {
                            message: format!("Request exceeds {} bytes", MAX_REQUEST_LEN),
                        };
                        let response_json = serde_json::to_string(&response)?;
                        writer.write_all(response_json.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;
                    }
                    Ok(Incoming::Line) => {
                        let response = match serde_json::from_str::<DaemonRequest>(&line) {
                            Ok(request) => handle_request(request, secret, signals),
                            Err(e) => {
                                warn!("Failed to parse request: {}", e);
                                DaemonResponse::Error {
                                    message: format!("Invalid request: {}", e),
                                }
                            }
                        };

                        let response_json = serde_json::to_string(&response)?;
                        writer.write_all(response_json.as_bytes()).await?;
                        writer.write_all(b"\n").await?;
                        writer.flush().await?;

                        if response == DaemonResponse::Unauthorized {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                }
            }

            _ = shutdown_rx.recv() => {
                return Err(ServerError::Shutdown);
            }
        }
    }
}

/// What one read from a client produced
enum Incoming {
    Closed,
    Line,
    TooLong,
}

/// Read one request line of at most [`MAX_REQUEST_LEN`] bytes
///
/// An oversized line is skipped through its newline so the connection stays
/// usable for the next request.
async fn read_request_line<R>(reader: &mut R, line: &mut String) -> std::io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader).take(MAX_REQUEST_LEN).read_line(line).await?;
    if n == 0 {
        return Ok(Incoming::Closed);
    }
    if line.ends_with('\n') || (n as u64) < MAX_REQUEST_LEN {
        return Ok(Incoming::Line);
    }

    loop {
        let (used, found) = {
            let buf = reader.fill_buf().await?;
            if buf.is_empty() {
                break;
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(i) => (i + 1, true),
                None => (buf.len(), false),
            }
        };
        reader.consume(used);
        if found {
            break;
        }
    }
    Ok(Incoming::TooLong)
}

/// Authenticate a request and set the flag behind its method
fn handle_request(request: DaemonRequest, secret: &str, signals: &Signals) -> DaemonResponse {
    if !constant_time_eq(request.authkey.as_bytes(), secret.as_bytes()) {
        warn!("Rejected request with bad authkey");
        return DaemonResponse::Unauthorized;
    }

    let flag = match request.method {
        Method::Wake => Flag::Wake,
        Method::ExpireCache => Flag::CacheExpired,
        Method::Kill => Flag::Kill,
    };
    info!("Handling {} request", request.method);
    signals.set(flag);
    DaemonResponse::Ok
}

/// Compare two byte strings without an early exit on the first mismatch
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let len_diff = a.len() ^ b.len();
    let byte_diff = a
        .iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y));
    len_diff == 0 && byte_diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::credential::{free_loopback_port, generate_secret};
    use std::time::Duration;

    fn test_credential() -> Credential {
        Credential {
            port: free_loopback_port().unwrap(),
            secret: generate_secret(24),
        }
    }

    async fn send_line(port: u16, line: &str) -> DaemonResponse {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await.unwrap();
        stream.write_all(line.as_bytes()).await.unwrap();
        stream.write_all(b"\n").await.unwrap();

        let mut reader = BufReader::new(stream);
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();
        serde_json::from_str(&response_line).unwrap()
    }

    fn request_json(secret: &str, method: Method) -> String {
        serde_json::to_string(&DaemonRequest {
            authkey: secret.to_string(),
            method,
        })
        .unwrap()
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(constant_time_eq(b"", b""));
    }

    #[tokio::test]
    async fn test_each_method_sets_its_flag() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let server = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = server.run().await.expect("Failed to start server");

        for (method, flag) in [
            (Method::Wake, Flag::Wake),
            (Method::ExpireCache, Flag::CacheExpired),
            (Method::Kill, Flag::Kill),
        ] {
            assert!(!signals.is_set(flag));
            let response = send_line(credential.port, &request_json(&credential.secret, method)).await;
            assert_eq!(response, DaemonResponse::Ok);
            // The flag is set before the response is written
            assert!(signals.is_set(flag));
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_bad_secret_is_rejected() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let server = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = server.run().await.expect("Failed to start server");

        let response = send_line(
            credential.port,
            &request_json("wrongwrongwrongwrong", Method::Kill),
        )
        .await;
        assert_eq!(response, DaemonResponse::Unauthorized);
        assert!(!signals.is_set(Flag::Kill));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let server = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = server.run().await.expect("Failed to start server");

        let response = send_line(credential.port, "not valid json").await;
        match response {
            DaemonResponse::Error { message } => {
                assert!(message.contains("Invalid request"));
            }
            other => panic!("Expected Error response, got {:?}", other),
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_many_requests_on_one_connection() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let server = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = server.run().await.expect("Failed to start server");

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, credential.port))
            .await
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let request = request_json(&credential.secret, Method::Wake);

        // Well past the per-line limit in total
        for _ in 0..200 {
            writer.write_all(request.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            let mut response_line = String::new();
            reader.read_line(&mut response_line).await.unwrap();
            let response: DaemonResponse = serde_json::from_str(&response_line).unwrap();
            assert_eq!(response, DaemonResponse::Ok);
        }
        assert!(200 * request.len() as u64 > MAX_REQUEST_LEN);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_oversized_line_is_refused() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let server = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = server.run().await.expect("Failed to start server");

        let stream = TcpStream::connect((Ipv4Addr::LOCALHOST, credential.port))
            .await
            .unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let oversized = "a".repeat(3 * MAX_REQUEST_LEN as usize);
        writer.write_all(oversized.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        let mut response_line = String::new();
        reader.read_line(&mut response_line).await.unwrap();
        match serde_json::from_str::<DaemonResponse>(&response_line).unwrap() {
            DaemonResponse::Error { message } => assert!(message.contains("exceeds")),
            other => panic!("Expected Error response, got {:?}", other),
        }

        // The same connection still serves a normal request
        let request = request_json(&credential.secret, Method::Wake);
        writer.write_all(request.as_bytes()).await.unwrap();
        writer.write_all(b"\n").await.unwrap();
        response_line.clear();
        reader.read_line(&mut response_line).await.unwrap();
        assert_eq!(
            serde_json::from_str::<DaemonResponse>(&response_line).unwrap(),
            DaemonResponse::Ok
        );
        assert!(signals.is_set(Flag::Wake));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());

        let first = IpcServer::new(&credential, Arc::clone(&signals));
        let handle = first.run().await.expect("Failed to start server");

        let second = IpcServer::new(&credential, signals);
        let result = second.run().await;
        assert!(matches!(result, Err(ServerError::Bind { .. })));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let credential = test_credential();
        let server = IpcServer::new(&credential, Arc::new(Signals::new()));
        let handle = server.run().await.expect("Failed to start server");
        assert_eq!(handle.local_addr().port(), credential.port);

        handle.shutdown();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = TcpStream::connect((Ipv4Addr::LOCALHOST, credential.port)).await;
        assert!(result.is_err());
    }
}
