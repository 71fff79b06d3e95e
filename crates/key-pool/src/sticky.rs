//! Upload-then-generate sessions pinned to one key
//!
//! An uploaded resource is only visible to the key that created it. The
//! session uploads through rotating dispatch (any key may create it), records
//! the key that succeeded as the owner, polls the resource with that owner
//! until it is ready, and runs every follow-up call through sticky dispatch
//! with the owner.
//!
//! ```text
//! Uploading --poll--> Active
//!     |
//!     +------poll---> Failed (terminal)
//! ```

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use common::Credential;
use provider::{GenerativeClient, Payload, RemoteHandle, RemoteState};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::task::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StickyState {
    Uploading,
    Active,
    Failed,
}

impl StickyState {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Active => "active",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for StickyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An uploaded resource and the key that owns it.
#[derive(Debug, Clone)]
pub struct StickyHandle {
    remote: RemoteHandle,
    owner: Credential,
    state: StickyState,
}

impl StickyHandle {
    pub fn remote(&self) -> &RemoteHandle {
        &self.remote
    }

    pub fn owner(&self) -> &Credential {
        &self.owner
    }

    pub fn state(&self) -> StickyState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == StickyState::Active
    }
}

/// Drives uploads and pinned calls for one generative client.
pub struct StickySession {
    dispatcher: Arc<Dispatcher>,
    client: Arc<dyn GenerativeClient>,
}

impl StickySession {
    pub fn new(dispatcher: Arc<Dispatcher>, client: Arc<dyn GenerativeClient>) -> Self {
        Self { dispatcher, client }
    }

    /// Upload `resource` and wait until the service reports it active.
    pub async fn open(&self, resource: &Path) -> Result<StickyHandle> {
        let mut handle = self.upload(resource).await?;
        self.wait_until_active(&mut handle).await?;
        Ok(handle)
    }

    /// Upload through rotating dispatch. The returned handle is `Uploading`
    /// and owned by whichever key completed the upload.
    pub async fn upload(&self, resource: &Path) -> Result<StickyHandle> {
        let client = &self.client;
        let uploaded = self
            .dispatcher
            .dispatch_reporting(TaskType::Upload, |key| async move {
                client.upload(resource, &key).await
            })
            .await?;

        info!(
            client = client.id(),
            remote = %uploaded.value.name,
            owner = uploaded.credential.id(),
            attempts = uploaded.attempts,
            "resource uploaded"
        );

        Ok(StickyHandle {
            remote: uploaded.value,
            owner: uploaded.credential,
            state: StickyState::Uploading,
        })
    }

    /// Poll with the owning key every `poll_interval` until the resource is
    /// active or failed. Returns immediately for a handle that is already
    /// active. A failed resource is terminal; re-uploading is up to the caller.
    pub async fn wait_until_active(&self, handle: &mut StickyHandle) -> Result<()> {
        match handle.state {
            StickyState::Active => return Ok(()),
            StickyState::Failed => return Err(Error::RemoteFailed(handle.remote.name.clone())),
            StickyState::Uploading => {}
        }

        let interval = self.dispatcher.config().poll_interval();
        let client = &self.client;
        let remote = &handle.remote;

        loop {
            let state = self
                .dispatcher
                .dispatch_sticky(&handle.owner, |key| async move {
                    client.poll_status(remote, &key).await
                })
                .await?;

            match state {
                RemoteState::Active => {
                    info!(
                        remote = %remote.name,
                        owner = handle.owner.id(),
                        "resource active"
                    );
                    handle.state = StickyState::Active;
                    return Ok(());
                }
                RemoteState::Failed => {
                    warn!(
                        remote = %remote.name,
                        owner = handle.owner.id(),
                        "resource processing failed"
                    );
                    handle.state = StickyState::Failed;
                    return Err(Error::RemoteFailed(remote.name.clone()));
                }
                RemoteState::Processing => {
                    debug!(remote = %remote.name, "resource still processing");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    /// Generation call against an active handle, pinned to its owner.
    ///
    /// `payload.attachment` is set to the handle's remote reference.
    pub async fn call(&self, handle: &StickyHandle, payload: &Payload) -> Result<String> {
        if !handle.is_active() {
            return Err(Error::NotReady(format!(
                "{} ({})",
                handle.remote.name, handle.state
            )));
        }

        let client = &self.client;
        let payload = Payload {
            attachment: Some(handle.remote.clone()),
            ..payload.clone()
        };
        let payload = &payload;

        self.dispatcher
            .dispatch_sticky(&handle.owner, |key| async move {
                client.call(&key, payload).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::pool::KeyPool;
    use crate::pool::tests::ScriptedChooser;
    use provider::UpstreamError;
    use std::collections::{HashMap, VecDeque};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Client whose upload, poll and call outcomes are scripted in order.
    /// Every request is logged as "<op>:<key id>".
    #[derive(Default)]
    struct ScriptedClient {
        uploads: Mutex<VecDeque<provider::Result<RemoteHandle>>>,
        polls: Mutex<VecDeque<provider::Result<RemoteState>>>,
        calls: Mutex<VecDeque<provider::Result<String>>>,
        log: Mutex<Vec<String>>,
        attachments: Mutex<Vec<Option<RemoteHandle>>>,
    }

    impl ScriptedClient {
        fn with_uploads(self, uploads: Vec<provider::Result<RemoteHandle>>) -> Self {
            *self.uploads.lock().unwrap() = uploads.into();
            self
        }

        fn with_polls(self, polls: Vec<provider::Result<RemoteState>>) -> Self {
            *self.polls.lock().unwrap() = polls.into();
            self
        }

        fn with_calls(self, calls: Vec<provider::Result<String>>) -> Self {
            *self.calls.lock().unwrap() = calls.into();
            self
        }

        fn record(&self, op: &str, key: &Credential) {
            self.log.lock().unwrap().push(format!("{op}:{}", key.id()));
        }

        fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl GenerativeClient for ScriptedClient {
        fn id(&self) -> &str {
            "scripted"
        }

        fn call<'a>(
            &'a self,
            credential: &'a Credential,
            payload: &'a Payload,
        ) -> Pin<Box<dyn Future<Output = provider::Result<String>> + Send + 'a>> {
            self.record("call", credential);
            self.attachments
                .lock()
                .unwrap()
                .push(payload.attachment.clone());
            let out = self
                .calls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("generated".to_string()));
            Box::pin(async move { out })
        }

        fn upload<'a>(
            &'a self,
            _resource: &'a Path,
            credential: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = provider::Result<RemoteHandle>> + Send + 'a>> {
            self.record("upload", credential);
            let out = self
                .uploads
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RemoteHandle::new("files/doc-1")));
            Box::pin(async move { out })
        }

        fn poll_status<'a>(
            &'a self,
            _handle: &'a RemoteHandle,
            credential: &'a Credential,
        ) -> Pin<Box<dyn Future<Output = provider::Result<RemoteState>> + Send + 'a>> {
            self.record("poll", credential);
            let out = self
                .polls
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(RemoteState::Active));
            Box::pin(async move { out })
        }
    }

    fn rate_limit() -> UpstreamError {
        UpstreamError::with_status(429, "RESOURCE_EXHAUSTED: retry in 1s")
    }

    /// Session over keys `key_a`, `key_b`, `key_c`, with the chooser scripted
    /// to pick the given indices in order.
    fn session(client: Arc<ScriptedClient>, picks: &[usize]) -> (StickySession, Arc<Dispatcher>) {
        let keys = ["key_a", "key_b", "key_c"]
            .iter()
            .map(|k| Credential::new(*k))
            .collect();
        let pool = KeyPool::new(keys, HashMap::new())
            .with_chooser(Arc::new(ScriptedChooser::new(picks)));
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(pool), DispatchConfig::default()));
        (StickySession::new(dispatcher.clone(), client), dispatcher)
    }

    #[tokio::test(start_paused = true)]
    async fn open_pins_owner_through_polling() {
        let client = Arc::new(ScriptedClient::default().with_polls(vec![
            Ok(RemoteState::Processing),
            Ok(RemoteState::Processing),
            Ok(RemoteState::Active),
        ]));
        let (session, _) = session(client.clone(), &[1]);
        let start = Instant::now();

        let handle = session.open(Path::new("/tmp/lecture.pdf")).await.unwrap();

        assert!(handle.is_active());
        assert_eq!(handle.owner(), &Credential::new("key_b"));
        assert_eq!(handle.remote().name, "files/doc-1");
        assert_eq!(
            client.log(),
            vec![
                "upload:...ey_b",
                "poll:...ey_b",
                "poll:...ey_b",
                "poll:...ey_b"
            ]
        );
        // two processing polls, 2s apart
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn upload_rotates_and_owner_is_the_successful_key() {
        let client = Arc::new(ScriptedClient::default().with_uploads(vec![
            Err(rate_limit()),
            Ok(RemoteHandle::new("files/x")),
        ]));
        // key_a is picked first and rate limited; among key_b, key_c pick key_c
        let (session, dispatcher) = session(client.clone(), &[0, 1]);

        let handle = session.open(Path::new("/tmp/a.pdf")).await.unwrap();

        assert_eq!(handle.owner(), &Credential::new("key_c"));
        let log = client.log();
        assert_eq!(log[..2], ["upload:...ey_a", "upload:...ey_c"]);
        assert!(
            log[2..].iter().all(|entry| entry.ends_with("ey_c")),
            "polling must use the owner: {log:?}"
        );
        assert!(matches!(
            dispatcher.pool().status(&Credential::new("key_a")).await,
            crate::pool::KeyStatus::CoolingDown { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_processing_is_terminal() {
        let client = Arc::new(ScriptedClient::default().with_polls(vec![
            Ok(RemoteState::Processing),
            Ok(RemoteState::Failed),
        ]));
        let (session, _) = session(client.clone(), &[0]);

        let mut handle = session.upload(Path::new("/tmp/a.pdf")).await.unwrap();
        assert_eq!(handle.state(), StickyState::Uploading);

        let err = session.wait_until_active(&mut handle).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RemoteFailed(ref name) if name == "files/doc-1"
        ));
        assert_eq!(handle.state(), StickyState::Failed);

        // no further polling on a failed handle
        let polls_before = client.log().len();
        assert!(session.wait_until_active(&mut handle).await.is_err());
        assert_eq!(client.log().len(), polls_before);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_rate_limit_retries_with_owner() {
        let client = Arc::new(ScriptedClient::default().with_polls(vec![
            Err(rate_limit()),
            Ok(RemoteState::Active),
        ]));
        let (session, _) = session(client.clone(), &[2]);

        let handle = session.open(Path::new("/tmp/a.pdf")).await.unwrap();

        assert_eq!(handle.owner(), &Credential::new("key_c"));
        assert_eq!(
            client.log(),
            vec!["upload:...ey_c", "poll:...ey_c", "poll:...ey_c"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn call_requires_active_handle() {
        let client = Arc::new(ScriptedClient::default());
        let (session, _) = session(client.clone(), &[0]);

        let handle = session.upload(Path::new("/tmp/a.pdf")).await.unwrap();
        let payload = Payload {
            model: "m".into(),
            system_instruction: None,
            prompt: "summarize".into(),
            attachment: None,
            temperature: 0.7,
            max_output_tokens: 2000,
        };

        let err = session.call(&handle, &payload).await.unwrap_err();
        assert!(matches!(
            err,
            Error::NotReady(ref msg) if msg.contains("uploading")
        ));
        assert!(!client.log().iter().any(|e| e.starts_with("call:")));
    }

    #[tokio::test(start_paused = true)]
    async fn call_sticks_to_owner_through_rate_limits() {
        let client = Arc::new(ScriptedClient::default().with_calls(vec![
            Err(rate_limit()),
            Err(rate_limit()),
            Err(rate_limit()),
            Ok("{\"analysis\": \"ok\"}".to_string()),
        ]));
        let (session, _) = session(client.clone(), &[0]);
        let handle = session.open(Path::new("/tmp/a.pdf")).await.unwrap();

        let payload = Payload {
            model: "m".into(),
            system_instruction: Some("json only".into()),
            prompt: "summarize".into(),
            attachment: None,
            temperature: 0.7,
            max_output_tokens: 2000,
        };
        let out = session.call(&handle, &payload).await.unwrap();

        assert_eq!(out, "{\"analysis\": \"ok\"}");
        let calls: Vec<String> = client
            .log()
            .into_iter()
            .filter(|e| e.starts_with("call:"))
            .collect();
        assert_eq!(calls.len(), 4);
        assert!(calls.iter().all(|e| e == "call:...ey_a"));
        assert!(
            client
                .attachments
                .lock()
                .unwrap()
                .iter()
                .all(|a| a.as_ref() == Some(handle.remote()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn call_fatal_error_surfaces() {
        let denied = UpstreamError::with_status(403, "permission denied on file");
        let client = Arc::new(ScriptedClient::default().with_calls(vec![Err(denied)]));
        let (session, _) = session(client.clone(), &[0]);
        let handle = session.open(Path::new("/tmp/a.pdf")).await.unwrap();
        let payload = Payload {
            model: "m".into(),
            system_instruction: None,
            prompt: "p".into(),
            attachment: None,
            temperature: 0.7,
            max_output_tokens: 2000,
        };

        let err = session.call(&handle, &payload).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Upstream(ref e) if e.status == Some(403)
        ));
    }

    #[test]
    fn state_labels() {
        assert_eq!(StickyState::Uploading.to_string(), "uploading");
        assert_eq!(
            serde_json::to_string(&StickyState::Active).unwrap(),
            "\"active\""
        );
    }
}
