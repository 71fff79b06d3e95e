//! Client abstraction for the external generative-content service
//!
//! Defines the `GenerativeClient` trait the dispatcher drives. Transport,
//! authentication headers and the remote payload schema all live behind this
//! trait; the dispatch layer only sees a credential going in and either a raw
//! response or an `UpstreamError` coming out.

use common::Credential;
use serde::Serialize;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

/// How the dispatcher should react to a failed upstream call.
///
/// - RateLimited puts the credential into cooldown and retries after a wait
/// - Fatal aborts the dispatch and surfaces the error unchanged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorClassification {
    /// Quota or request-rate exhaustion; `wait` is the suggested pause
    RateLimited { wait: Duration },
    /// Authentication failure, malformed request, anything else
    Fatal,
}

/// Error returned by the generative client for a single call.
///
/// `status` is the HTTP-like status code when the client library exposes one.
/// `message` is the raw error text; the classifier scans it for quota phrases
/// and a suggested retry delay.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: Option<u16>,
    pub message: String,
}

impl UpstreamError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Error carrying an explicit status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(Some(status), message)
    }

    /// Error with message text only.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, UpstreamError>;

/// Opaque reference to a resource uploaded to the generative service.
///
/// Only meaningful together with the credential that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteHandle {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl RemoteHandle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: None,
        }
    }
}

/// Processing state reported when polling an uploaded resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Processing,
    Active,
    Failed,
}

/// One generation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Payload {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub prompt: String,
    /// Previously uploaded resource the prompt refers to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<RemoteHandle>,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

/// The three operations the dispatch layer needs from the generative service.
///
/// Every method receives the credential to authenticate with; implementations
/// must not substitute a different one, because uploaded resources are only
/// visible to the key that created them.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn GenerativeClient>`).
pub trait GenerativeClient: Send + Sync {
    /// Identifier for logging (e.g. "gemini")
    fn id(&self) -> &str;

    /// Run one generation request and return the raw text of the response.
    fn call<'a>(
        &'a self,
        credential: &'a Credential,
        payload: &'a Payload,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Upload a local file, returning the remote handle.
    fn upload<'a>(
        &'a self,
        resource: &'a Path,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteHandle>> + Send + 'a>>;

    /// Query the processing state of an uploaded resource.
    fn poll_status<'a>(
        &'a self,
        handle: &'a RemoteHandle,
        credential: &'a Credential,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteState>> + Send + 'a>>;
}
