//! Thin client stub for the daemon's IPC endpoint
//!
//! A launch that finds no daemon must fall through to starting one quickly,
//! so connecting uses a timeout of a few hundred milliseconds.

use crate::daemon::credential::{Credential, CredentialStore};
use crate::daemon::protocol::{DaemonRequest, DaemonResponse, Method};
use std::net::Ipv4Addr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Timeout for establishing the connection
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(300);

/// Timeout for one request/acknowledgement round trip
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that can occur when communicating with the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("No daemon reachable on 127.0.0.1:{port}: {reason}")]
    Connection { port: u16, reason: String },

    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Daemon rejected the shared secret")]
    Unauthorized,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Connection closed by daemon")]
    ConnectionClosed,
}

impl ClientError {
    /// Whether the error means nobody is listening
    pub fn is_connection(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }
}

/// Connected client for the daemon's three procedures
pub struct IpcClient {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    secret: String,
}

impl IpcClient {
    /// Connect to the daemon described by `credential`
    pub async fn connect(credential: &Credential) -> Result<Self, ClientError> {
        let port = credential.port;
        debug!("Connecting to daemon on port {}", port);

        let connect = TcpStream::connect((Ipv4Addr::LOCALHOST, port));
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Connection {
                    port,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ClientError::Connection {
                    port,
                    reason: "connect timed out".to_string(),
                })
            }
        };

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            secret: credential.secret.clone(),
        })
    }

    /// Invoke a procedure and wait for the daemon to acknowledge it
    ///
    /// The acknowledgement only means the flag is set; whatever the daemon
    /// does in reaction happens asynchronously.
    pub async fn invoke(&mut self, method: Method) -> Result<(), ClientError> {
        let response = match tokio::time::timeout(REQUEST_TIMEOUT, self.send_request(method)).await
        {
            Ok(inner_result) => inner_result?,
            Err(_) => return Err(ClientError::Timeout),
        };

        match response {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Unauthorized => Err(ClientError::Unauthorized),
            DaemonResponse::Error { message } => Err(ClientError::RemoteCall(message)),
        }
    }

    async fn send_request(&mut self, method: Method) -> Result<DaemonResponse, ClientError> {
        let request = DaemonRequest {
            authkey: self.secret.clone(),
            method,
        };
        let request_json = serde_json::to_string(&request)?;
        debug!("Sending {} request", method);

        self.writer.write_all(request_json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;

        let mut response_line = String::new();
        let bytes_read = self.reader.read_line(&mut response_line).await?;
        if bytes_read == 0 {
            return Err(ClientError::ConnectionClosed);
        }

        Ok(serde_json::from_str(&response_line)?)
    }

    /// Ask the daemon to show the menu
    pub async fn wake(&mut self) -> Result<(), ClientError> {
        self.invoke(Method::Wake).await
    }

    /// Mark the daemon's open database stale
    pub async fn expire_cache(&mut self) -> Result<(), ClientError> {
        self.invoke(Method::ExpireCache).await
    }

    /// Ask the daemon to shut down
    pub async fn kill(&mut self) -> Result<(), ClientError> {
        self.invoke(Method::Kill).await
    }
}

/// Connect, invoke one procedure and disconnect
pub async fn call(credential: &Credential, method: Method) -> Result<(), ClientError> {
    let mut client = IpcClient::connect(credential).await?;
    client.invoke(method).await
}

/// Invoke `method` on the daemon recorded in `store`
///
/// Returns `false` without connecting when no credential file exists.
pub async fn call_running(store: &CredentialStore, method: Method) -> Result<bool, ClientError> {
    match store.load() {
        Some(credential) => {
            call(&credential, method).await?;
            Ok(true)
        }
        None => Ok(false),
    }
}

/// Invoke `kill`, treating an unreachable or already-dead daemon as success
pub async fn kill_quietly(credential: &Credential) {
    if let Err(e) = call(credential, Method::Kill).await {
        debug!("Kill call failed, daemon presumably gone: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::credential::{free_loopback_port, generate_secret};
    use crate::daemon::server::IpcServer;
    use crate::daemon::signal::{Flag, Signals};
    use std::sync::Arc;
    use std::time::Instant;

    fn test_credential() -> Credential {
        Credential {
            port: free_loopback_port().unwrap(),
            secret: generate_secret(24),
        }
    }

    #[tokio::test]
    async fn test_connect_daemon_not_running() {
        let credential = test_credential();
        let start = Instant::now();
        let result = IpcClient::connect(&credential).await;
        assert!(matches!(result, Err(ClientError::Connection { .. })));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_invoke_sets_flags() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let handle = IpcServer::new(&credential, Arc::clone(&signals))
            .run()
            .await
            .expect("Failed to start server");

        let mut client = IpcClient::connect(&credential)
            .await
            .expect("Failed to connect");
        client.wake().await.expect("wake failed");
        client.expire_cache().await.expect("expire_cache failed");

        assert!(signals.is_set(Flag::Wake));
        assert!(signals.is_set(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::Kill));

        client.kill().await.expect("kill failed");
        assert!(signals.is_set(Flag::Kill));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let credential = test_credential();
        let signals = Arc::new(Signals::new());
        let handle = IpcServer::new(&credential, Arc::clone(&signals))
            .run()
            .await
            .expect("Failed to start server");

        let forged = Credential {
            port: credential.port,
            secret: generate_secret(24),
        };
        let result = call(&forged, Method::Wake).await;
        assert!(matches!(result, Err(ClientError::Unauthorized)));
        assert!(!signals.is_set(Flag::Wake));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_call_running_expires_cache() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = CredentialStore::with_path(temp_dir.path().join("daemon.cred"));
        assert!(!call_running(&store, Method::ExpireCache).await.unwrap());

        let credential = test_credential();
        store.write(&credential).unwrap();
        let signals = Arc::new(Signals::new());
        let handle = IpcServer::new(&credential, Arc::clone(&signals))
            .run()
            .await
            .expect("Failed to start server");

        assert!(call_running(&store, Method::ExpireCache).await.unwrap());
        assert!(signals.is_set(Flag::CacheExpired));
        assert!(!signals.is_set(Flag::Wake));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_kill_quietly_without_daemon() {
        // Must not panic or hang
        kill_quietly(&test_credential()).await;
    }

    #[test]
    fn test_is_connection() {
        let err = ClientError::Connection {
            port: 1,
            reason: "refused".to_string(),
        };
        assert!(err.is_connection());
        assert!(!ClientError::Timeout.is_connection());
    }
}
