//! Requests and responses exchanged with the transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A request produced by a transcoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Path including any query string.
    pub path: String,
    /// Optional JSON body.
    pub payload: Option<Value>,
}

impl Request {
    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            payload: None,
        }
    }

    /// Creates a POST request with a body.
    pub fn post(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            payload: Some(payload),
        }
    }

    /// Creates a PUT request with a body.
    pub fn put(path: impl Into<String>, payload: Value) -> Self {
        Self {
            method: Method::Put,
            path: path.into(),
            payload: Some(payload),
        }
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            payload: None,
        }
    }

    /// Returns the path without its query string.
    pub fn route(&self) -> &str {
        self.path.split('?').next().unwrap_or(&self.path)
    }

    /// Returns the value of a query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        let (_, query) = self.path.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == name).then_some(value)
        })
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A transport response.
///
/// Status `0` stands for a network failure where no HTTP response arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Optional JSON body.
    pub payload: Option<Value>,
}

impl Response {
    /// Creates a response.
    pub fn new(status: u16, payload: Option<Value>) -> Self {
        Self { status, payload }
    }

    /// Creates a 200 response with a body.
    pub fn ok(payload: Value) -> Self {
        Self::new(200, Some(payload))
    }

    /// Creates a response with a status and no body.
    pub fn status(status: u16) -> Self {
        Self::new(status, None)
    }

    /// Creates a network failure response.
    pub fn network_error() -> Self {
        Self::new(0, None)
    }

    /// 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 4xx; retrying will not help.
    pub fn is_permanent_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    /// Anything that is neither success nor permanent failure.
    pub fn is_transient_error(&self) -> bool {
        !self.is_success() && !self.is_permanent_error()
    }

    /// Returns the backend error label, e.g. `invalid-credentials`.
    pub fn label(&self) -> Option<&str> {
        self.payload.as_ref()?.get("label")?.as_str()
    }
}
