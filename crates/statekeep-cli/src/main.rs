//! statekeep command-line interface

mod terminal;

use anyhow::{anyhow, bail, Context, Result};
use clap::error::ErrorKind;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use statekeep_core::backend::config::Config;
use statekeep_core::unlock::{HELP, SYNOPSIS};
use statekeep_core::{
    BackendSource, ClientError, CommandOutcome, LockInfo, Locker, StateManager, Ui, UnlockCommand,
};
use std::ffi::OsString;
use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use terminal::{StdinInput, TerminalUi};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// How long an interrupted `state push` still waits to release its lock
const RELEASE_GRACE: Duration = Duration::from_secs(5);

fn build_cli() -> Command {
    Command::new("statekeep")
        .version(statekeep_core::VERSION)
        .about("Conflict-safe remote state storage")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Configuration file (default: statekeep.toml in the working directory)"),
        )
        .arg(
            Arg::new("chdir")
                .long("chdir")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Run as if started in this directory"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log debug output to stderr"),
        )
        .subcommand(
            Command::new("force-unlock")
                .about(SYNOPSIS)
                .long_about(HELP)
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Don't ask for input for unlock confirmation"),
                )
                .arg(
                    Arg::new("lock-id")
                        .value_name("LOCK_ID")
                        .num_args(0..)
                        .help("Id of the lock to release"),
                ),
        )
        .subcommand(
            Command::new("state")
                .about("Read or write the current workspace's state")
                .subcommand_required(true)
                .subcommand(Command::new("pull").about("Print the current state to stdout"))
                .subcommand(
                    Command::new("push")
                        .about("Replace the current state with a file's content")
                        .arg(
                            Arg::new("force")
                                .long("force")
                                .action(ArgAction::SetTrue)
                                .help("Overwrite even if the state changed since it was read"),
                        )
                        .arg(
                            Arg::new("file")
                                .required(true)
                                .value_parser(value_parser!(PathBuf))
                                .help("File holding the new state"),
                        ),
                ),
        )
        .subcommand(
            Command::new("workspace")
                .about("Manage workspaces")
                .subcommand_required(true)
                .subcommand(Command::new("list").about("List workspaces")),
        )
}

/// Accept the single-dash `-force` spelling ahead of any `--`
fn normalize_args(args: impl IntoIterator<Item = OsString>) -> Vec<OsString> {
    let mut positional_only = false;
    args.into_iter()
        .map(|arg| {
            if positional_only {
                arg
            } else if arg == "--" {
                positional_only = true;
                arg
            } else if arg == "-force" {
                OsString::from("--force")
            } else {
                arg
            }
        })
        .collect()
}

/// Help and version requests succeed; every usage error is a failure
fn exit_code_for(err: &clap::Error) -> i32 {
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
        _ => 1,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let base = match matches.get_one::<PathBuf>("chdir") {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to determine working directory")?,
    };
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::from_file(base.join(path))?,
        None => Config::discover(&base)?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() {
    let matches = match build_cli().try_get_matches_from(normalize_args(std::env::args_os())) {
        Ok(matches) => matches,
        Err(e) => {
            let _ = e.print();
            std::process::exit(exit_code_for(&e));
        }
    };
    init_tracing(matches.get_flag("verbose"));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let code = match run(&matches, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            TerminalUi.error(&format!("Error: {e:#}"));
            1
        }
    };
    std::process::exit(code);
}

async fn run(matches: &ArgMatches, cancel: &CancellationToken) -> Result<i32> {
    let config = load_config(matches)?;

    match matches.subcommand() {
        Some(("force-unlock", args)) => {
            let positionals: Vec<String> = args
                .get_many::<String>("lock-id")
                .unwrap_or_default()
                .cloned()
                .collect();
            let workspace = config.workspace().context("Error selecting workspace")?;

            let command = UnlockCommand::new(Arc::new(TerminalUi), Arc::new(StdinInput));
            let outcome = command
                .run(&config, &workspace, &positionals, args.get_flag("force"), cancel)
                .await;

            if outcome == CommandOutcome::ShowHelp {
                if let Some(sub) = build_cli().find_subcommand_mut("force-unlock") {
                    eprintln!("{}", sub.render_long_help());
                }
            }
            Ok(outcome.exit_code())
        }
        Some(("state", sub)) => match sub.subcommand() {
            Some(("pull", _)) => {
                state_pull(&config, cancel).await?;
                Ok(0)
            }
            Some(("push", args)) => {
                let file = args
                    .get_one::<PathBuf>("file")
                    .context("missing state file")?;
                state_push(&config, file, args.get_flag("force"), cancel).await?;
                Ok(0)
            }
            _ => Ok(1),
        },
        Some(("workspace", sub)) => match sub.subcommand() {
            Some(("list", _)) => {
                workspace_list(&config).await?;
                Ok(0)
            }
            _ => Ok(1),
        },
        _ => Ok(1),
    }
}

async fn open_state(config: &Config) -> Result<Box<dyn StateManager>> {
    let workspace = config.workspace().context("Error selecting workspace")?;
    let backend = config.load().await.context("Failed to load backend")?;
    backend
        .state_mgr(&workspace)
        .await
        .context("Failed to load state")
}

async fn state_pull(config: &Config, cancel: &CancellationToken) -> Result<()> {
    let mut mgr = open_state(config).await?;
    mgr.refresh(cancel).await.context("Failed to refresh state")?;

    if let Some(data) = mgr.state() {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(data)?;
        stdout.flush()?;
    }
    Ok(())
}

async fn state_push(
    config: &Config,
    file: &Path,
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let mut mgr = open_state(config).await?;

    let lock_id = match mgr.locker().filter(|locker| locker.is_locking_enabled()) {
        Some(locker) => Some(
            interruptible(cancel, locker.lock(&LockInfo::new("state push")))
                .await
                .context("Error acquiring the state lock")?,
        ),
        None => None,
    };

    let pushed = push(&mut *mgr, data, force, cancel).await;

    if let Some(id) = lock_id {
        if let Some(locker) = mgr.locker() {
            if let Err(e) = release(locker, &id, cancel).await {
                TerminalUi.error(&format!(
                    "Error releasing the state lock: {e:#}\n\n\
                     The lock is still held with ID {id}. Once no other process is using it,\n\
                     release it with: statekeep force-unlock {id}"
                ));
            }
        }
    }
    pushed
}

async fn interruptible<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ClientError>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => bail!("operation cancelled"),
        res = call => Ok(res?),
    }
}

/// Release the push lock; after an interrupt the attempt is bounded instead
async fn release(locker: &dyn Locker, id: &str, cancel: &CancellationToken) -> Result<()> {
    if !cancel.is_cancelled() {
        return interruptible(cancel, locker.unlock(id)).await;
    }
    tokio::time::timeout(RELEASE_GRACE, locker.unlock(id))
        .await
        .map_err(|_| anyhow!("timed out after an interrupt"))??;
    Ok(())
}

async fn push(
    mgr: &mut dyn StateManager,
    data: Vec<u8>,
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    mgr.refresh(cancel).await.context("Failed to refresh state")?;
    if force {
        mgr.enable_force_push();
    }
    mgr.write_state(data);
    mgr.persist(cancel).await.context("Failed to persist state")?;
    Ok(())
}

async fn workspace_list(config: &Config) -> Result<()> {
    let current = config.workspace().context("Error selecting workspace")?;
    let backend = config.load().await.context("Failed to load backend")?;
    for name in backend.workspaces().await? {
        let marker = if name == current { "*" } else { " " };
        println!("{marker} {name}");
    }
    Ok(())
}
