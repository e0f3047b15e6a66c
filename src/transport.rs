use attohttpc::body::Bytes;
use http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct TransportError(String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        TransportError(message.into())
    }
}

impl From<attohttpc::Error> for TransportError {
    fn from(e: attohttpc::Error) -> Self {
        TransportError(e.to_string())
    }
}

/// A response as seen by the relay: the status and the raw body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Performs one JSON POST.
///
/// Implementations must not retry and must report any failure to obtain a
/// response as `TransportError`.
pub trait Transport: Send + Sync {
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug)]
pub struct HttpTransport {
    user_agent: String,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Self {
        Self {
            user_agent: user_agent.to_owned(),
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(&self, url: &str, body: Vec<u8>) -> Result<TransportResponse, TransportError> {
        let resp = attohttpc::post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("User-Agent", self.user_agent.as_str())
            .body(Bytes(body))
            .send()?;

        let status = resp.status();
        let body = resp.bytes()?;
        log::trace!("POST {} -> {} ({} bytes)", url, status, body.len());
        Ok(TransportResponse { status, body })
    }
}
