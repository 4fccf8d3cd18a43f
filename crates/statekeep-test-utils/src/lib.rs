//! Testing utilities for statekeep workspace
//!
//! Shared test doubles: in-memory clients with request logs, scripted
//! operator input, a recording UI, and stub backends.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use statekeep_core::{
    Backend, BackendError, BackendSource, ClientError, Fetched, ForcePusher, Input, InputError,
    InputOpts, Locker, Payload, StateClient, StateError, StateManager, Ui,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Client that stores nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NilClient;

#[async_trait]
impl StateClient for NilClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        Ok(Fetched::NotFound)
    }

    async fn put(&self, _data: &[u8]) -> Result<(), ClientError> {
        Ok(())
    }

    async fn delete(&self) -> Result<(), ClientError> {
        Ok(())
    }
}

/// One call seen by a mock client; JSON content is decoded for easy comparison
#[derive(Debug, Clone, PartialEq)]
pub struct MockRequest {
    pub method: String,
    pub content: Option<serde_json::Value>,
}

impl MockRequest {
    pub fn new(method: &str, content: Option<serde_json::Value>) -> Self {
        Self {
            method: method.to_string(),
            content,
        }
    }
}

#[derive(Debug, Default)]
struct MockStore {
    current: Option<Vec<u8>>,
    log: Vec<MockRequest>,
}

impl MockStore {
    fn record(&mut self, method: &str, content: Option<&[u8]>) {
        let content = content.and_then(|bytes| serde_json::from_slice(bytes).ok());
        self.log.push(MockRequest::new(method, content));
    }
}

/// In-memory client that logs every request
#[derive(Debug, Default)]
pub struct MockClient {
    store: Mutex<MockStore>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current(data: impl Into<Vec<u8>>) -> Self {
        let client = Self::new();
        client.store.lock().current = Some(data.into());
        client
    }

    /// Replace the stored bytes without logging, as another writer would
    pub fn set_current(&self, data: Option<Vec<u8>>) {
        self.store.lock().current = data;
    }

    pub fn current(&self) -> Option<Vec<u8>> {
        self.store.lock().current.clone()
    }

    pub fn log(&self) -> Vec<MockRequest> {
        self.store.lock().log.clone()
    }

    pub fn clear_log(&self) {
        self.store.lock().log.clear();
    }
}

#[async_trait]
impl StateClient for MockClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        let mut store = self.store.lock();
        let current = store.current.clone();
        store.record("Get", current.as_deref());
        Ok(current.map(Payload::new).into())
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        let mut store = self.store.lock();
        store.record("Put", Some(data));
        store.current = Some(data.to_vec());
        Ok(())
    }

    async fn delete(&self) -> Result<(), ClientError> {
        let mut store = self.store.lock();
        let current = store.current.take();
        store.record("Delete", current.as_deref());
        Ok(())
    }
}

/// Like [`MockClient`], but also a [`ForcePusher`]; forced puts log as `Force Put`
#[derive(Debug, Default)]
pub struct MockForcePushClient {
    inner: MockClient,
    force: AtomicBool,
}

impl MockForcePushClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_current(data: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: MockClient::with_current(data),
            force: AtomicBool::new(false),
        }
    }

    pub fn set_current(&self, data: Option<Vec<u8>>) {
        self.inner.set_current(data);
    }

    pub fn current(&self) -> Option<Vec<u8>> {
        self.inner.current()
    }

    pub fn log(&self) -> Vec<MockRequest> {
        self.inner.log()
    }

    pub fn is_forced(&self) -> bool {
        self.force.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateClient for MockForcePushClient {
    async fn get(&self) -> Result<Fetched, ClientError> {
        self.inner.get().await
    }

    async fn put(&self, data: &[u8]) -> Result<(), ClientError> {
        let method = if self.is_forced() { "Force Put" } else { "Put" };
        let mut store = self.inner.store.lock();
        store.record(method, Some(data));
        store.current = Some(data.to_vec());
        Ok(())
    }

    async fn delete(&self) -> Result<(), ClientError> {
        self.inner.delete().await
    }

    fn as_force_pusher(&self) -> Option<&dyn ForcePusher> {
        Some(self)
    }
}

impl ForcePusher for MockForcePushClient {
    fn enable_force_push(&self) {
        self.force.store(true, Ordering::SeqCst);
    }
}

/// Operator input answering from a script, in order
#[derive(Debug, Default)]
pub struct ScriptedInput {
    answers: Mutex<Vec<String>>,
    prompts: Mutex<Vec<InputOpts>>,
    calls: AtomicUsize,
}

impl ScriptedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut answers: Vec<String> = answers.into_iter().map(Into::into).collect();
        answers.reverse();
        Self {
            answers: Mutex::new(answers),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<InputOpts> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl Input for ScriptedInput {
    async fn input(&self, opts: &InputOpts) -> Result<String, InputError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(opts.clone());
        self.answers.lock().pop().ok_or(InputError::Closed)
    }
}

/// UI that keeps everything it was asked to show
#[derive(Debug, Default)]
pub struct RecordingUi {
    outputs: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outputs(&self) -> Vec<String> {
        self.outputs.lock().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl Ui for RecordingUi {
    fn output(&self, message: &str) {
        self.outputs.lock().push(message.to_string());
    }

    fn error(&self, message: &str) {
        self.errors.lock().push(message.to_string());
    }
}

/// State manager with a fixed shape and no stored state
///
/// Lets workflow tests pick local/remote and the lock capability directly.
pub struct StubManager {
    locker: Option<Box<dyn Locker>>,
    local: bool,
}

impl StubManager {
    /// Remote manager with the given lock capability
    pub fn remote(locker: impl Locker + 'static) -> Self {
        Self {
            locker: Some(Box::new(locker)),
            local: false,
        }
    }

    /// Remote manager with no lock capability
    pub fn without_locker() -> Self {
        Self {
            locker: None,
            local: false,
        }
    }

    /// Purely local manager with the given lock capability
    pub fn local(locker: impl Locker + 'static) -> Self {
        Self {
            locker: Some(Box::new(locker)),
            local: true,
        }
    }
}

#[async_trait]
impl StateManager for StubManager {
    fn state(&self) -> Option<&[u8]> {
        None
    }

    fn write_state(&mut self, _content: Vec<u8>) {}

    async fn refresh(&mut self, _cancel: &CancellationToken) -> Result<(), StateError> {
        Ok(())
    }

    async fn persist(&mut self, _cancel: &CancellationToken) -> Result<(), StateError> {
        Ok(())
    }

    fn enable_force_push(&mut self) {}

    fn locker(&self) -> Option<&dyn Locker> {
        self.locker.as_deref()
    }

    fn is_local(&self) -> bool {
        self.local
    }
}

/// Backend handing out one prebuilt state manager
pub struct StaticBackend {
    manager: Mutex<Option<Box<dyn StateManager>>>,
}

impl StaticBackend {
    pub fn new(manager: impl StateManager + 'static) -> Self {
        Self {
            manager: Mutex::new(Some(Box::new(manager))),
        }
    }
}

#[async_trait]
impl Backend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn state_mgr(&self, workspace: &str) -> Result<Box<dyn StateManager>, BackendError> {
        self.manager
            .lock()
            .take()
            .ok_or_else(|| BackendError::WorkspaceNotFound(workspace.to_string()))
    }

    async fn workspaces(&self) -> Result<Vec<String>, BackendError> {
        Ok(vec![statekeep_core::DEFAULT_WORKSPACE.to_string()])
    }

    async fn delete_workspace(&self, workspace: &str) -> Result<(), BackendError> {
        Err(BackendError::ProtectedWorkspace(workspace.to_string()))
    }
}

/// Backend source that yields one backend, or fails with a fixed error
pub struct OnceSource {
    backend: Mutex<Option<Box<dyn Backend>>>,
    loads: AtomicUsize,
}

impl OnceSource {
    pub fn new(backend: impl Backend + 'static) -> Self {
        Self {
            backend: Mutex::new(Some(Box::new(backend))),
            loads: AtomicUsize::new(0),
        }
    }

    /// Source whose every load fails
    pub fn failing() -> Self {
        Self {
            backend: Mutex::new(None),
            loads: AtomicUsize::new(0),
        }
    }

    /// Source serving a [`StaticBackend`] around `manager`
    pub fn with_manager(manager: impl StateManager + 'static) -> Self {
        Self::new(StaticBackend::new(manager))
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendSource for OnceSource {
    async fn load(&self) -> Result<Box<dyn Backend>, BackendError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.backend.lock().take().ok_or_else(|| {
            BackendError::io_error(
                "statekeep.toml",
                std::io::Error::new(std::io::ErrorKind::NotFound, "backend unavailable"),
            )
        })
    }
}
