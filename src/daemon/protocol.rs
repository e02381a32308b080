//! IPC protocol types for launcher-daemon communication
//!
//! Messages are sent as newline-delimited JSON over a loopback TCP connection.
//! Every request carries the shared secret from the credential file.

use serde::{Deserialize, Serialize};

/// The three remote procedures the daemon exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Show the menu
    Wake,
    /// Mark the open database stale
    ExpireCache,
    /// Shut the daemon down
    Kill,
}

impl Method {
    /// Wire name of the method
    pub fn name(&self) -> &'static str {
        match self {
            Method::Wake => "wake",
            Method::ExpireCache => "expire_cache",
            Method::Kill => "kill",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wake" => Ok(Method::Wake),
            "expire_cache" | "expireCache" => Ok(Method::ExpireCache),
            "kill" => Ok(Method::Kill),
            other => Err(format!("unknown method: {}", other)),
        }
    }
}

/// Request sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonRequest {
    /// Shared secret from the credential file
    pub authkey: String,
    /// Procedure to invoke
    pub method: Method,
}

/// Response sent from daemon to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data")]
pub enum DaemonResponse {
    /// The flag behind the method is now set
    Ok,
    /// The secret did not match
    Unauthorized,
    /// The request could not be understood
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_wire_names() {
        assert_eq!(serde_json::to_string(&Method::Wake).unwrap(), "\"wake\"");
        assert_eq!(
            serde_json::to_string(&Method::ExpireCache).unwrap(),
            "\"expire_cache\""
        );
        assert_eq!(serde_json::to_string(&Method::Kill).unwrap(), "\"kill\"");
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("wake".parse::<Method>().unwrap(), Method::Wake);
        assert_eq!("expireCache".parse::<Method>().unwrap(), Method::ExpireCache);
        assert_eq!("kill".parse::<Method>().unwrap(), Method::Kill);
        assert!("reboot".parse::<Method>().is_err());
    }

    #[test]
    fn test_request_serialization() {
        let req = DaemonRequest {
            authkey: "abcdefghijklmnop".to_string(),
            method: Method::ExpireCache,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"authkey\":\"abcdefghijklmnop\""));
        assert!(json.contains("\"method\":\"expire_cache\""));
    }

    #[test]
    fn test_unknown_method_rejected() {
        let result = serde_json::from_str::<DaemonRequest>(
            r#"{"authkey":"abcdefghijklmnop","method":"list"}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_response_serialization() {
        assert_eq!(
            serde_json::to_string(&DaemonResponse::Ok).unwrap(),
            r#"{"status":"Ok"}"#
        );

        let resp = DaemonResponse::Error {
            message: "Something went wrong".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("Error"));
        assert!(json.contains("Something went wrong"));
        let parsed: DaemonResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, resp);
    }
}
