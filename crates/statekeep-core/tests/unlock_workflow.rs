//! Force-unlock workflow scenarios

use async_trait::async_trait;
use mockall::mock;
use pretty_assertions::assert_eq;
use statekeep_core::backend::directory::DirectoryBackend;
use statekeep_core::backend::inmem::InmemBackend;
use statekeep_core::backend::local::LocalBackend;
use statekeep_core::unlock::{CONFIRM_ID, UNLOCK_SUCCESS};
use statekeep_core::{
    ClientError, CommandOutcome, Input, InputError, InputOpts, LockInfo, Locker, UnlockCommand,
    DEFAULT_WORKSPACE,
};
use statekeep_test_utils::{OnceSource, RecordingUi, ScriptedInput, StubManager};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mock! {
    pub Locker {}

    #[async_trait]
    impl Locker for Locker {
        async fn lock(&self, info: &LockInfo) -> Result<String, ClientError>;
        async fn unlock(&self, id: &str) -> Result<(), ClientError>;
        fn is_locking_enabled(&self) -> bool;
    }
}

fn locker_never_unlocked() -> MockLocker {
    let mut locker = MockLocker::new();
    locker.expect_is_locking_enabled().returning(|| true);
    locker.expect_unlock().times(0);
    locker
}

struct Harness {
    ui: Arc<RecordingUi>,
    input: Arc<ScriptedInput>,
    command: UnlockCommand,
}

impl Harness {
    fn new(answers: &[&str]) -> Self {
        let ui = Arc::new(RecordingUi::new());
        let input = Arc::new(ScriptedInput::new(answers.iter().copied()));
        let command = UnlockCommand::new(ui.clone(), input.clone());
        Self { ui, input, command }
    }

    async fn run(&self, source: &OnceSource, args: &[&str], force: bool) -> CommandOutcome {
        let positionals: Vec<String> = args.iter().map(ToString::to_string).collect();
        self.command
            .run(
                source,
                DEFAULT_WORKSPACE,
                &positionals,
                force,
                &CancellationToken::new(),
            )
            .await
    }
}

#[tokio::test]
async fn local_state_is_refused_with_or_without_force() {
    for force in [false, true] {
        let harness = Harness::new(&["yes"]);
        let source = OnceSource::with_manager(StubManager::local(locker_never_unlocked()));

        let outcome = harness.run(&source, &["abc"], force).await;

        assert_eq!(outcome, CommandOutcome::Failure);
        assert_eq!(
            harness.ui.errors(),
            vec!["Local state cannot be unlocked by another process"]
        );
        assert!(harness.ui.outputs().is_empty());
        assert_eq!(harness.input.calls(), 0);
    }
}

#[tokio::test]
async fn filesystem_backend_is_local() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(&[]);
    let source = OnceSource::new(LocalBackend::in_dir(dir.path()));

    let outcome = harness.run(&source, &["abc"], true).await;

    assert_eq!(outcome.exit_code(), 1);
    assert_eq!(
        harness.ui.errors(),
        vec!["Local state cannot be unlocked by another process"]
    );
}

#[tokio::test]
async fn anything_but_yes_cancels_without_unlocking() {
    for answer in ["y", "", "no", "YES", " yes"] {
        let harness = Harness::new(&[answer]);
        let source = OnceSource::with_manager(StubManager::remote(locker_never_unlocked()));

        let outcome = harness.run(&source, &["abc"], false).await;

        assert_eq!(outcome.exit_code(), 1, "answer {answer:?}");
        assert_eq!(harness.ui.outputs(), vec!["force-unlock cancelled."]);
        assert!(harness.ui.errors().is_empty());
        assert_eq!(harness.input.calls(), 1);
    }
}

#[tokio::test]
async fn yes_confirms_and_unlocks_supplied_id() {
    let mut locker = MockLocker::new();
    locker.expect_is_locking_enabled().returning(|| true);
    locker.expect_unlock().times(1).returning(|id| {
        assert_eq!(id, "d2f1-lock");
        Ok(())
    });

    let harness = Harness::new(&["yes\n"]);
    let source = OnceSource::with_manager(StubManager::remote(locker));

    let outcome = harness.run(&source, &["d2f1-lock"], false).await;

    assert_eq!(outcome, CommandOutcome::Success);
    assert_eq!(harness.ui.outputs(), vec![UNLOCK_SUCCESS]);
    assert!(harness.ui.errors().is_empty());

    let prompts = harness.input.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].id, CONFIRM_ID);
    assert!(prompts[0].description.contains("Only 'yes' will be accepted"));
}

#[tokio::test]
async fn force_skips_confirmation() {
    let mut locker = MockLocker::new();
    locker.expect_is_locking_enabled().returning(|| true);
    locker.expect_unlock().times(1).returning(|_| Ok(()));

    let harness = Harness::new(&[]);
    let source = OnceSource::with_manager(StubManager::remote(locker));

    assert_eq!(
        harness.run(&source, &["abc"], true).await,
        CommandOutcome::Success
    );
    assert_eq!(harness.input.calls(), 0);
}

#[tokio::test]
async fn lock_id_is_not_validated_before_confirmation() {
    let harness = Harness::new(&["no"]);
    let source = OnceSource::with_manager(StubManager::remote(locker_never_unlocked()));

    harness.run(&source, &["../not a lock id"], false).await;

    assert_eq!(harness.input.calls(), 1);
    assert_eq!(harness.ui.outputs(), vec!["force-unlock cancelled."]);
}

#[tokio::test]
async fn mismatched_id_is_reported_and_lock_stays() {
    let backend = InmemBackend::new();
    let id = backend
        .client(DEFAULT_WORKSPACE)
        .lock(&LockInfo::new("apply"))
        .await
        .unwrap();

    let harness = Harness::new(&[]);
    let source = OnceSource::new(backend.clone());

    let outcome = harness.run(&source, &["not-the-holder"], true).await;

    assert_eq!(outcome, CommandOutcome::Failure);
    let errors = harness.ui.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Failed to unlock state: lock id \"not-the-holder\""));
    assert_eq!(backend.lock_holder(DEFAULT_WORKSPACE).unwrap().id, id);
}

#[tokio::test]
async fn matching_id_releases_inmem_lock() {
    let backend = InmemBackend::new();
    let id = backend
        .client(DEFAULT_WORKSPACE)
        .lock(&LockInfo::new("apply"))
        .await
        .unwrap();

    let harness = Harness::new(&["yes"]);
    let source = OnceSource::new(backend.clone());

    assert_eq!(
        harness.run(&source, &[id.as_str()], false).await,
        CommandOutcome::Success
    );
    assert!(backend.lock_holder(DEFAULT_WORKSPACE).is_none());
}

#[tokio::test]
async fn disabled_locking_is_refused_before_confirmation() {
    for source in [
        OnceSource::new(InmemBackend::new().with_locking(false)),
        OnceSource::with_manager(StubManager::without_locker()),
    ] {
        let harness = Harness::new(&["yes"]);

        let outcome = harness.run(&source, &["abc"], false).await;

        assert_eq!(outcome, CommandOutcome::Failure);
        assert_eq!(harness.ui.errors(), vec!["Locking is disabled for this backend"]);
        assert_eq!(harness.input.calls(), 0);
    }
}

#[tokio::test]
async fn backend_load_failure_is_fatal() {
    let harness = Harness::new(&["yes"]);
    let source = OnceSource::failing();

    let outcome = harness.run(&source, &["abc"], false).await;

    assert_eq!(outcome, CommandOutcome::Failure);
    assert_eq!(source.loads(), 1);
    let errors = harness.ui.errors();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("Failed to load backend: "));
}

#[tokio::test]
async fn wrong_argument_count_shows_help() {
    for args in [&[][..], &["a", "b"][..]] {
        let harness = Harness::new(&["yes"]);
        let source = OnceSource::with_manager(StubManager::remote(locker_never_unlocked()));

        let outcome = harness.run(&source, args, false).await;

        assert_eq!(outcome, CommandOutcome::ShowHelp);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(harness.ui.errors(), vec!["Expected a single argument: LOCK_ID"]);
        assert_eq!(source.loads(), 0);
    }
}

#[tokio::test]
async fn closed_input_is_an_error() {
    let harness = Harness::new(&[]);
    let source = OnceSource::with_manager(StubManager::remote(locker_never_unlocked()));

    let outcome = harness.run(&source, &["abc"], false).await;

    assert_eq!(outcome, CommandOutcome::Failure);
    assert_eq!(
        harness.ui.errors(),
        vec!["Error asking for confirmation: input closed"]
    );
}

#[tokio::test]
async fn cancellation_abandons_unlock() {
    let backend = InmemBackend::new();
    let id = backend
        .client(DEFAULT_WORKSPACE)
        .lock(&LockInfo::new("apply"))
        .await
        .unwrap();

    let ui = Arc::new(RecordingUi::new());
    let command = UnlockCommand::new(ui.clone(), Arc::new(ScriptedInput::new(["yes"])));
    let source = OnceSource::new(backend.clone());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = command
        .run(&source, DEFAULT_WORKSPACE, &[id.clone()], true, &cancel)
        .await;

    assert_eq!(outcome, CommandOutcome::Failure);
    assert_eq!(
        ui.errors(),
        vec!["Failed to unlock state: operation cancelled"]
    );
    assert_eq!(backend.lock_holder(DEFAULT_WORKSPACE).unwrap().id, id);
}

/// Operator who never answers
#[derive(Default)]
struct SilentInput {
    asked: AtomicUsize,
}

#[async_trait]
impl Input for SilentInput {
    async fn input(&self, _opts: &InputOpts) -> Result<String, InputError> {
        self.asked.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

#[tokio::test]
async fn interrupt_while_waiting_for_confirmation() {
    let backend = InmemBackend::new();
    let id = backend
        .client(DEFAULT_WORKSPACE)
        .lock(&LockInfo::new("apply"))
        .await
        .unwrap();

    let ui = Arc::new(RecordingUi::new());
    let input = Arc::new(SilentInput::default());
    let command = UnlockCommand::new(ui.clone(), input.clone());
    let source = OnceSource::new(backend.clone());
    let cancel = CancellationToken::new();

    let interrupt = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        interrupt.cancel();
    });

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        command.run(&source, DEFAULT_WORKSPACE, &[id.clone()], false, &cancel),
    )
    .await
    .expect("prompt should be abandoned on interrupt");

    assert_eq!(outcome, CommandOutcome::Failure);
    assert_eq!(input.asked.load(Ordering::SeqCst), 1);
    assert_eq!(
        ui.errors(),
        vec!["Failed to unlock state: operation cancelled"]
    );
    assert!(ui.outputs().is_empty());
    assert_eq!(backend.lock_holder(DEFAULT_WORKSPACE).unwrap().id, id);
}

#[tokio::test]
async fn force_unlock_clears_empty_directory_lock_file() {
    let dir = tempfile::tempdir().unwrap();
    let backend = DirectoryBackend::new(dir.path());
    let lock_path = backend.client(DEFAULT_WORKSPACE).lock_path().to_path_buf();
    std::fs::write(&lock_path, b"").unwrap();

    let harness = Harness::new(&[]);
    let source = OnceSource::new(backend.clone());

    assert_eq!(
        harness.run(&source, &["anything"], true).await,
        CommandOutcome::Success
    );
    assert!(!lock_path.exists());
    backend
        .client(DEFAULT_WORKSPACE)
        .lock(&LockInfo::new("apply"))
        .await
        .unwrap();
}
