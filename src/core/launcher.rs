// src/core/launcher.rs

//! Starts the external scanner against a target and supervises it.
//!
//! A launch is detached from its caller: `Launcher::launch` returns at once
//! and the spawn, drain and wait steps run on their own tokio task. The
//! returned `LaunchHandle` can be awaited for the outcome or simply dropped.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::LauncherSettings;
use crate::core::target::{self, ResolvedTarget};

/// Number of trailing output lines kept in the outcome.
const OUTPUT_TAIL_LINES: usize = 20;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("child {0} was not captured")]
    MissingPipe(&'static str),

    #[error("IO error while supervising scanner: {0}")]
    Io(#[from] std::io::Error),
}

/// How a launch ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The target was blank; nothing was started.
    InvalidTarget,
    /// No scanner script at any candidate location.
    ScriptNotFound { checked: Vec<PathBuf> },
    /// The scanner ran to completion. `code` is `None` when it was killed by a signal.
    Exited {
        code: Option<i32>,
        lines: usize,
        tail: Vec<String>,
    },
    Failed(String),
}

impl LaunchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LaunchOutcome::Exited { code: Some(0), .. })
    }
}

/// Handle on a detached launch.
#[derive(Debug)]
pub struct LaunchHandle {
    target: String,
    task: JoinHandle<LaunchOutcome>,
}

impl LaunchHandle {
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Waits for the launch to finish. A panicking task is reported as `Failed`.
    pub async fn outcome(self) -> LaunchOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(target = %self.target, error = %e, "Launch task did not complete.");
                LaunchOutcome::Failed(format!("launch task failed: {e}"))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Launcher {
    settings: Arc<LauncherSettings>,
}

impl Launcher {
    pub fn new(settings: LauncherSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    /// Starts a scan of `target` in the background and returns immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub fn launch(&self, target: &str, user_id: u64) -> LaunchHandle {
        let settings = Arc::clone(&self.settings);
        let raw = target.to_string();
        let task = tokio::spawn(async move { run_launch(&settings, &raw, user_id).await });

        LaunchHandle {
            target: target.to_string(),
            task,
        }
    }
}

async fn run_launch(settings: &LauncherSettings, raw: &str, user_id: u64) -> LaunchOutcome {
    info!(target = raw, user_id, "Launching scan.");

    let Some(resolved) = target::resolve(raw).await else {
        error!(target = raw, "Invalid target provided, aborting scan.");
        return LaunchOutcome::InvalidTarget;
    };
    info!(
        host = %resolved.host,
        scan_target = %resolved.scan_target(),
        url = ?resolved.url,
        "Target normalized."
    );

    let base = match settings.working_dir.clone() {
        Some(dir) => dir,
        None => match std::env::current_dir() {
            Ok(dir) => dir,
            Err(e) => {
                error!(error = %e, "Cannot determine working directory.");
                return LaunchOutcome::Failed(format!("cannot determine working directory: {e}"));
            }
        },
    };

    let script = match locate_script(&base, &settings.script_subpath) {
        Ok(script) => script,
        Err(checked) => {
            error!("Scanner script not found in expected locations. Aborting launch.");
            for path in &checked {
                error!(path = %path.display(), "Checked");
            }
            return LaunchOutcome::ScriptNotFound { checked };
        }
    };
    info!(script = %script.display(), "Using scanner script.");

    let interpreter =
        select_interpreter(&settings.primary_interpreter, &settings.fallback_interpreter).await;

    match supervise(settings, &interpreter, &script, &resolved).await {
        Ok((code, lines, tail)) => LaunchOutcome::Exited { code, lines, tail },
        Err(e) => {
            error!(error = ?e, script = %script.display(), "Scanner launch failed.");
            LaunchOutcome::Failed(e.to_string())
        }
    }
}

/// Candidate script locations: `base`, its parent and its grandparent, each
/// joined with `subpath`.
pub fn candidate_paths(base: &Path, subpath: &Path) -> Vec<PathBuf> {
    base.ancestors()
        .take(3)
        .map(|dir| dir.join(subpath))
        .collect()
}

/// Returns the first existing candidate, or every path that was checked.
pub fn locate_script(base: &Path, subpath: &Path) -> Result<PathBuf, Vec<PathBuf>> {
    let candidates = candidate_paths(base, subpath);
    match candidates.iter().find(|p| p.is_file()) {
        Some(found) => Ok(std::path::absolute(found).unwrap_or_else(|_| found.clone())),
        None => Err(candidates),
    }
}

/// Uses `primary` if it can be started at all, otherwise `fallback`.
pub async fn select_interpreter(primary: &str, fallback: &str) -> String {
    let probe = Command::new(primary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    match probe {
        Ok(_) => {
            debug!(interpreter = primary, "Interpreter available.");
            primary.to_string()
        }
        Err(e) => {
            warn!(interpreter = primary, fallback, error = %e, "Interpreter not found, falling back.");
            fallback.to_string()
        }
    }
}

/// Prepends `segment` to an existing search-path value.
pub fn extend_path_var(segment: &str, existing: Option<OsString>) -> OsString {
    let separator = if cfg!(windows) { ";" } else { ":" };
    let mut value = OsString::from(segment);
    if let Some(existing) = existing.filter(|v| !v.is_empty()) {
        value.push(separator);
        value.push(existing);
    }
    value
}

fn build_command(
    settings: &LauncherSettings,
    interpreter: &str,
    script: &Path,
    resolved: &ResolvedTarget,
) -> Command {
    let mut cmd = Command::new(interpreter);
    cmd.arg(script).arg(resolved.scan_target());
    if let Some(url) = &resolved.url {
        cmd.arg("--url").arg(url);
    }

    if let Some(dir) = script.parent() {
        cmd.current_dir(dir);
    }

    if let Some(segment) = &settings.library_path {
        let var = &settings.library_path_var;
        cmd.env(var, extend_path_var(segment, std::env::var_os(var)));
    }

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

async fn supervise(
    settings: &LauncherSettings,
    interpreter: &str,
    script: &Path,
    resolved: &ResolvedTarget,
) -> Result<(Option<i32>, usize, Vec<String>), LaunchError> {
    let mut cmd = build_command(settings, interpreter, script, resolved);
    debug!(command = ?cmd.as_std(), "Spawning scanner.");

    let mut child = cmd.spawn().map_err(|source| LaunchError::Spawn {
        program: interpreter.to_string(),
        source,
    })?;
    info!(pid = ?child.id(), "Scanner running.");

    let stdout = child.stdout.take().ok_or(LaunchError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(LaunchError::MissingPipe("stderr"))?;

    // Both streams feed one channel so the operator log reads as one merged output.
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let readers = [forward_lines(stdout, tx.clone()), forward_lines(stderr, tx)];

    let mut lines = 0;
    let mut tail = VecDeque::with_capacity(OUTPUT_TAIL_LINES);
    while let Some(line) = rx.recv().await {
        info!("[scanner] {line}");
        lines += 1;
        if tail.len() == OUTPUT_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }

    for reader in readers {
        match reader.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Error reading scanner output."),
            Err(e) => warn!(error = %e, "Output reader task failed."),
        }
    }

    let status = child.wait().await?;
    info!(code = ?status.code(), "Scanner finished.");
    Ok((status.code(), lines, tail.into()))
}

fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>) -> JoinHandle<std::io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                return Ok(());
            }
            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            if tx.send(line).await.is_err() {
                return Ok(());
            }
        }
    })
}
