//! Force-unlock: manual recovery from a stuck lock
//!
//! Linear and one-shot. Every refusal is reported once and maps to exit
//! code 1; nothing is retried.

use crate::backend::BackendSource;
use crate::error::UnlockError;
use crate::ui::{Input, InputOpts, Ui};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Prompt id for the confirmation question
pub const CONFIRM_ID: &str = "force-unlock";

/// The only answer that confirms
pub const CONFIRM_ANSWER: &str = "yes";

const CONFIRM_QUERY: &str = "Do you really want to force-unlock?";

const CONFIRM_DESCRIPTION: &str = "statekeep will remove the lock on the remote state.\n\
This does not modify your infrastructure. This will allow local statekeep\n\
commands to modify this state, even though it may still be in use.\n\
Only 'yes' will be accepted to confirm.";

/// Printed after a successful unlock
pub const UNLOCK_SUCCESS: &str = "statekeep state has been successfully unlocked!\n\n\
The state has been unlocked, and statekeep commands should now be able to\n\
obtain a new lock on the remote state.";

/// One-line summary for command listings
pub const SYNOPSIS: &str = "Release a stuck lock on the current workspace";

/// Long help for the command
pub const HELP: &str = "Manually unlock the state for the current workspace.

This does not modify your infrastructure. It removes the lock on the state
for the current workspace; what that means depends on the backend in use.
Local state files cannot be unlocked by another process.";

/// Parsed command arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockArgs {
    /// Lock id to release, passed through unvalidated
    pub lock_id: String,
    /// Skip the confirmation prompt
    pub force: bool,
}

impl UnlockArgs {
    /// Build from positional arguments left after flag parsing
    ///
    /// # Errors
    /// Returns `UnlockError::Usage` unless exactly one positional is given.
    pub fn from_positionals(positionals: &[String], force: bool) -> Result<Self, UnlockError> {
        match positionals {
            [lock_id] => Ok(Self {
                lock_id: lock_id.clone(),
                force,
            }),
            _ => Err(UnlockError::Usage),
        }
    }
}

/// How a command finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Completed
    Success,
    /// Refused or failed; the reason has been reported
    Failure,
    /// Usage error; the caller should print the command help
    ShowHelp,
}

impl CommandOutcome {
    /// Process exit code
    #[inline]
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure | Self::ShowHelp => 1,
        }
    }
}

/// The force-unlock command
pub struct UnlockCommand {
    ui: Arc<dyn Ui>,
    input: Arc<dyn Input>,
}

impl std::fmt::Debug for UnlockCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCommand").finish_non_exhaustive()
    }
}

impl UnlockCommand {
    /// Create the command over an output sink and an answer source
    #[must_use]
    pub fn new(ui: Arc<dyn Ui>, input: Arc<dyn Input>) -> Self {
        Self { ui, input }
    }

    /// Run from raw positionals and report the result through the UI
    ///
    /// Exactly one message is shown: the success text, the cancellation
    /// notice, or the error.
    pub async fn run(
        &self,
        source: &dyn BackendSource,
        workspace: &str,
        positionals: &[String],
        force: bool,
        cancel: &CancellationToken,
    ) -> CommandOutcome {
        let result = match UnlockArgs::from_positionals(positionals, force) {
            Ok(args) => self.execute(source, workspace, &args, cancel).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.ui.output(UNLOCK_SUCCESS);
                CommandOutcome::Success
            }
            Err(e) if e.is_cancellation() => {
                self.ui.output(&e.to_string());
                CommandOutcome::Failure
            }
            Err(e) if e.wants_help() => {
                self.ui.error(&e.to_string());
                CommandOutcome::ShowHelp
            }
            Err(e) => {
                self.ui.error(&e.to_string());
                CommandOutcome::Failure
            }
        }
    }

    /// Execute the workflow without reporting
    ///
    /// # Errors
    /// Returns the `UnlockError` for the first step that refuses or fails.
    pub async fn execute(
        &self,
        source: &dyn BackendSource,
        workspace: &str,
        args: &UnlockArgs,
        cancel: &CancellationToken,
    ) -> Result<(), UnlockError> {
        let backend = source.load().await.map_err(UnlockError::Backend)?;
        let mgr = backend
            .state_mgr(workspace)
            .await
            .map_err(UnlockError::StateManager)?;

        if mgr.is_local() {
            return Err(UnlockError::LocalState);
        }

        let locker = mgr
            .locker()
            .filter(|locker| locker.is_locking_enabled())
            .ok_or(UnlockError::NotLockable)?;

        if !args.force {
            self.confirm(cancel).await?;
        }

        tracing::info!(
            backend = backend.name(),
            workspace,
            lock_id = %args.lock_id,
            forced = args.force,
            "force-unlocking state"
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(UnlockError::Interrupted),
            res = locker.unlock(&args.lock_id) => res.map_err(UnlockError::Unlock),
        }
    }

    async fn confirm(&self, cancel: &CancellationToken) -> Result<(), UnlockError> {
        let opts = InputOpts::new(CONFIRM_ID, CONFIRM_QUERY, CONFIRM_DESCRIPTION);
        let answer = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(UnlockError::Interrupted),
            answer = self.input.input(&opts) => answer.map_err(UnlockError::Input)?,
        };
        if answer.trim_end_matches(['\r', '\n']) == CONFIRM_ANSWER {
            Ok(())
        } else {
            tracing::debug!(answer = %answer.trim_end(), "force-unlock not confirmed");
            Err(UnlockError::UserCancelled)
        }
    }
}
