//! Build engine that runs a shell command.
//!
//! Runs `buildCommand` once, then watches the project root and runs it again
//! for every batch of file changes. Changes arriving within `debounceMs` of
//! each other are folded into one rebuild.

use crate::config::DevConfig;
use crate::dev::{BuildEngine, BuildEvent, BuildOutcome, FileChange, FileWatcher, Mode, WatchContext};
use crate::error::DevError;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lines of build output kept in a failure report.
const FAILURE_TAIL_LINES: usize = 20;

/// The default build engine: a shell command plus a file watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuildEngine;

impl CommandBuildEngine {
    pub fn new() -> Self {
        Self
    }

    /// Watch patterns plus the build outputs, anchored at the project root.
    fn ignore_patterns(config: &DevConfig) -> Vec<String> {
        let mut patterns = config.watch_ignore.clone();
        let outputs = [
            config.server_build_dir(),
            config.server_build_file(),
            config.assets_dir(),
        ];
        for output in outputs {
            if let Ok(rel) = output.strip_prefix(&config.root_directory) {
                let rel = rel.to_string_lossy().replace('\\', "/");
                if rel.is_empty() {
                    continue;
                }
                let anchored = format!("/{}", rel);
                if !patterns.contains(&anchored) {
                    patterns.push(anchored);
                }
            }
        }
        patterns
    }
}

impl BuildEngine for CommandBuildEngine {
    fn watch(&self, ctx: WatchContext) -> Result<JoinHandle<Result<(), DevError>>, DevError> {
        // Before the watcher exists, so recreating the directory is not a change.
        empty_dir(&ctx.config.assets_dir());

        let (watcher, changes) = FileWatcher::new(
            &ctx.config.root_directory,
            Self::ignore_patterns(&ctx.config),
            ctx.config.debounce_ms,
        )
        .map_err(|e| DevError::EngineSetup(e.to_string()))?;

        tracing::debug!(root = %watcher.root().display(), "Watching for changes");

        Ok(tokio::spawn(run(ctx, watcher, changes)))
    }
}

async fn run(
    ctx: WatchContext,
    _watcher: FileWatcher,
    mut changes: mpsc::Receiver<FileChange>,
) -> Result<(), DevError> {
    let runner = BuildRunner::new(&ctx.config, ctx.mode);
    let debounce = Duration::from_millis(ctx.config.debounce_ms);

    let Some(outcome) = runner.run(&ctx.cancel).await else {
        return Ok(());
    };
    if !ctx.emit(BuildEvent::InitialBuild(outcome)).await {
        return Ok(());
    }

    loop {
        let first = tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(()),
            change = changes.recv() => match change {
                Some(change) => change,
                None => return Err(DevError::EngineSetup("file watcher stopped".to_string())),
            },
        };

        let Some(batch) = collect_batch(first, &mut changes, debounce, &ctx.cancel).await else {
            return Ok(());
        };

        let structural = batch
            .iter()
            .any(|c| !matches!(c, FileChange::Modified(_)));

        for change in batch {
            let event = match change {
                FileChange::Created(path) => BuildEvent::FileCreated(path),
                FileChange::Modified(path) => BuildEvent::FileChanged(path),
                FileChange::Removed(path) => BuildEvent::FileDeleted(path),
            };
            if !ctx.emit(event).await {
                return Ok(());
            }
        }

        if !ctx.emit(BuildEvent::RebuildStarted).await {
            return Ok(());
        }

        // Added or removed files can orphan assets; start from a clean slate.
        if structural {
            empty_dir(&ctx.config.assets_dir());
        }

        let Some(outcome) = runner.run(&ctx.cancel).await else {
            return Ok(());
        };
        if !ctx.emit(BuildEvent::RebuildFinished(outcome)).await {
            return Ok(());
        }
    }
}

/// Gather every change arriving within `window` of the first one.
async fn collect_batch(
    first: FileChange,
    changes: &mut mpsc::Receiver<FileChange>,
    window: Duration,
    cancel: &CancellationToken,
) -> Option<Vec<FileChange>> {
    let mut batch = vec![first];
    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = &mut deadline => break,
            Some(change) = changes.recv() => {
                if !batch.contains(&change) {
                    batch.push(change);
                }
            }
        }
    }

    Some(batch)
}

/// Runs the build command.
struct BuildRunner {
    command: String,
    root: PathBuf,
    mode: Mode,
}

impl BuildRunner {
    fn new(config: &DevConfig, mode: Mode) -> Self {
        Self {
            command: config.build_command.clone(),
            root: config.root_directory.clone(),
            mode,
        }
    }

    /// Run one build. `None` if cancelled.
    ///
    /// On cancel the whole process tree is killed and reaped before this
    /// returns, so nothing the command started can write output afterwards.
    async fn run(&self, cancel: &CancellationToken) -> Option<BuildOutcome> {
        let started = Instant::now();
        tracing::debug!(command = %self.command, mode = %self.mode, "Running build");

        let mut command = shell(&self.command);
        command
            .current_dir(&self.root)
            .env("NODE_ENV", self.mode.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Some(BuildOutcome::failed(
                    started.elapsed(),
                    format!("failed to run `{}`: {}", self.command, e),
                ))
            }
        };
        let pid = child.id();

        let finished = tokio::select! {
            _ = cancel.cancelled() => None,
            output = collect_output(&mut child) => Some(output),
        };
        let Some(output) = finished else {
            terminate(&mut child, pid).await;
            return None;
        };
        let elapsed = started.elapsed();

        match output {
            Ok((status, _, _)) if status.success() => Some(BuildOutcome::success(elapsed)),
            Ok((status, stdout, stderr)) => {
                let stderr = String::from_utf8_lossy(&stderr);
                let stdout = String::from_utf8_lossy(&stdout);
                let text = if stderr.trim().is_empty() { stdout } else { stderr };
                let detail = match tail(&text, FAILURE_TAIL_LINES) {
                    t if t.is_empty() => format!("`{}` exited with {}", self.command, status),
                    t => t,
                };
                Some(BuildOutcome::failed(elapsed, detail))
            }
            Err(e) => Some(BuildOutcome::failed(elapsed, e.to_string())),
        }
    }
}

/// Wait for the child while draining both pipes.
async fn collect_output(child: &mut Child) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
    let mut stdout = child.stdout.take();
    let mut stderr = child.stderr.take();

    let (status, stdout, stderr) = tokio::join!(
        child.wait(),
        read_pipe(stdout.as_mut()),
        read_pipe(stderr.as_mut())
    );
    Ok((status?, stdout?, stderr?))
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<&mut R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Kill the build and everything it spawned, then reap the shell.
#[cfg(unix)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pgid) = pid.and_then(|pid| i32::try_from(pid).ok()) {
        if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
            tracing::debug!(pgid, error = %e, "Build process group already gone");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Build process already exited");
    }
}

#[cfg(windows)]
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        let killed = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = killed {
            tracing::debug!(pid, error = %e, "taskkill failed");
        }
    }
    if let Err(e) = child.kill().await {
        tracing::debug!(error = %e, "Build process already exited");
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.args(["/C", command]);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

/// Empty `dir`, creating it if missing. Failures are logged.
pub(crate) fn empty_dir(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), error = %e, "Failed to create directory");
            }
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let result = match entry.file_type() {
            Ok(ft) if ft.is_dir() => std::fs::remove_dir_all(&path),
            _ => std::fs::remove_file(&path),
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove build output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir, command: &str) -> DevConfig {
        DevConfig {
            build_command: command.to_string(),
            debounce_ms: 50,
            ..DevConfig::for_root(dir.path().canonicalize().unwrap())
        }
    }

    fn start(config: DevConfig) -> (JoinHandle<Result<(), DevError>>, mpsc::Receiver<BuildEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let ctx = WatchContext {
            config,
            mode: Mode::Development,
            events: tx,
            cancel: cancel.clone(),
        };
        let task = CommandBuildEngine::new().watch(ctx).unwrap();
        (task, rx, cancel)
    }

    async fn next(rx: &mut mpsc::Receiver<BuildEvent>) -> BuildEvent {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for build event")
            .expect("engine stopped")
    }

    #[test]
    fn test_ignore_patterns_include_build_dirs() {
        let config = DevConfig::for_root("/app");
        let patterns = CommandBuildEngine::ignore_patterns(&config);
        assert!(patterns.contains(&"/build".to_string()));
        assert!(patterns.contains(&"/build/index.html".to_string()));
        assert!(patterns.contains(&"/public/build".to_string()));
        assert!(patterns.contains(&"node_modules".to_string()));
    }

    #[test]
    fn test_ignore_patterns_cover_artifact_at_root() {
        let config = DevConfig {
            server_build_path: PathBuf::from("server.html"),
            ..DevConfig::for_root("/app")
        };
        let patterns = CommandBuildEngine::ignore_patterns(&config);
        assert!(patterns.contains(&"/server.html".to_string()));
        assert!(!patterns.iter().any(|p| p == "/" || p.is_empty()));
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\nb\nc\n", 2), "b\nc");
        assert_eq!(tail("", 2), "");
    }

    #[test]
    fn test_empty_dir_clears_and_creates() {
        let dir = TempDir::new().unwrap();
        let assets = dir.path().join("public/build");
        empty_dir(&assets);
        assert!(assets.is_dir());

        std::fs::create_dir_all(assets.join("nested")).unwrap();
        std::fs::write(assets.join("entry.js"), "x").unwrap();
        empty_dir(&assets);
        assert_eq!(std::fs::read_dir(&assets).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_initial_build_success() {
        let dir = TempDir::new().unwrap();
        let (task, mut rx, cancel) = start(config(&dir, "mkdir -p build && echo ok > build/index.html"));

        match next(&mut rx).await {
            BuildEvent::InitialBuild(outcome) => assert!(outcome.is_success()),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(dir.path().join("build/index.html").exists());

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_initial_build_failure_reports_output() {
        let dir = TempDir::new().unwrap();
        let (task, mut rx, cancel) = start(config(&dir, "echo 'syntax error in app.ts' >&2; exit 3"));

        match next(&mut rx).await {
            BuildEvent::InitialBuild(outcome) => {
                assert_eq!(outcome.failure.as_deref(), Some("syntax error in app.ts"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_change_triggers_rebuild() {
        let dir = TempDir::new().unwrap();
        let (task, mut rx, cancel) = start(config(&dir, "mkdir -p build && date > build/index.html"));

        assert!(matches!(next(&mut rx).await, BuildEvent::InitialBuild(_)));

        std::fs::write(dir.path().join("app.txt"), "hello").unwrap();

        let mut events = Vec::new();
        loop {
            let event = next(&mut rx).await;
            let done = matches!(event, BuildEvent::RebuildFinished(_));
            events.push(event);
            if done {
                break;
            }
        }

        assert!(events.iter().any(|e| matches!(
            e,
            BuildEvent::FileCreated(p) | BuildEvent::FileChanged(p) if p.ends_with("app.txt")
        )));
        let start = events.iter().position(|e| *e == BuildEvent::RebuildStarted);
        assert_eq!(start, Some(events.len() - 2));

        cancel.cancel();
        task.await.unwrap().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_interrupts_running_build() {
        let dir = TempDir::new().unwrap();
        let (task, mut rx, cancel) = start(config(&dir, "sleep 30"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
        assert!(rx.recv().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_processes_started_by_the_build() {
        let dir = TempDir::new().unwrap();
        let config = config(
            &dir,
            "true && sh -c 'sleep 1; mkdir -p public/build; echo late > public/build/late.js'",
        );
        let assets = config.assets_dir();
        let runner = BuildRunner::new(&config, Mode::Development);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            canceller.cancel();
        });
        assert!(runner.run(&cancel).await.is_none());

        empty_dir(&assets);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!assets.join("late.js").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_build_output_collected_from_both_pipes() {
        let dir = TempDir::new().unwrap();
        let runner = BuildRunner::new(&config(&dir, "echo progress; echo broken >&2; exit 1"), Mode::Production);

        let outcome = runner.run(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.failure.as_deref(), Some("broken"));
    }
}
