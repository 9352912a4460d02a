//! Dev session orchestration.
//!
//! ```text
//! init ──► building ──► watching ──► draining ──► closed
//!   │          │                        ▲
//!   └─ config  └─ build/bind failure ───┘
//!      errors (nothing allocated yet)
//! ```
//!
//! `init` validates the configuration and resolves the app server port.
//! `building` opens the control channel, starts the build engine and waits
//! for the first build. `watching` serves the app until the shutdown token
//! fires. `draining` releases everything in a fixed order:
//!
//! 1. close the control channel and every browser connection
//! 2. stop the build engine and wait for it
//! 3. empty the assets build directory
//! 4. delete the server build artifact
//! 5. close the app server listener
//!
//! Each step tolerates failures so the later ones always run.

use crate::config::DevConfig;
use crate::dev::command_engine::empty_dir;
use crate::dev::{
    app_router, resolve_port, AppLifecycle, AppLoader, BuildEngine, BuildGeneration, BuildSlot,
    ControlChannel, DevEnvironment, Mode, PortAllocator, ReadyInfo, RebuildWatcher,
    StaticAppLoader, TcpPortAllocator, WatchEvent, WatchHandle,
};
use crate::error::{DevError, Result};
use crate::ui::{self, format_duration, Spinner};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    Building,
    Watching,
    Draining,
    Closed,
}

/// One step of the draining sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    CloseChannel,
    StopWatcher,
    EmptyAssets,
    RemoveServerBuild,
    CloseListener,
}

/// What a finished session reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Resolved app server port
    pub port: u16,
    /// Number of successful builds
    pub generation: u64,
    /// Draining steps, in the order they ran
    pub teardown: Vec<TeardownStep>,
}

type ReadyCallback = Box<dyn FnOnce(&ReadyInfo) + Send + Sync>;

/// One `kiln dev` run.
pub struct DevSession {
    config: DevConfig,
    mode: Mode,
    engine: Arc<dyn BuildEngine>,
    loader: Arc<dyn AppLoader>,
    env: DevEnvironment,
    allocator: Box<dyn PortAllocator>,
    channel: Option<ControlChannel>,
    on_ready: Option<ReadyCallback>,
    state: watch::Sender<SessionState>,
}

impl DevSession {
    pub fn new(config: DevConfig, mode: Mode, engine: Arc<dyn BuildEngine>) -> Self {
        let (state, _) = watch::channel(SessionState::Init);
        Self {
            config,
            mode,
            engine,
            loader: Arc::new(StaticAppLoader),
            env: DevEnvironment::from_process(),
            allocator: Box::new(TcpPortAllocator),
            channel: None,
            on_ready: None,
            state,
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn AppLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Use these `PORT`/`HOST` values instead of the process environment.
    pub fn with_environment(mut self, env: DevEnvironment) -> Self {
        self.env = env;
        self
    }

    pub fn with_port_allocator(mut self, allocator: impl PortAllocator + 'static) -> Self {
        self.allocator = Box::new(allocator);
        self
    }

    /// Use an existing control channel instead of opening `devServerPort`.
    pub fn with_channel(mut self, channel: ControlChannel) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Replace the default ready message.
    pub fn on_ready(mut self, callback: impl FnOnce(&ReadyInfo) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Box::new(callback));
        self
    }

    /// Follow state transitions.
    pub fn state_receiver(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: SessionState) {
        tracing::debug!(?state, "Dev session state");
        self.state.send_replace(state);
    }

    /// Run until `shutdown` is cancelled, then drain.
    ///
    /// Configuration errors return before any resource is created. Build or
    /// bind failures drain whatever was started and return the error.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<SessionSummary> {
        self.set_state(SessionState::Init);
        self.config.validate()?;
        let port = resolve_port(self.config.port, &self.env, self.allocator.as_ref())?;
        tracing::debug!(port, mode = %self.mode, "Resolved app server port");

        self.set_state(SessionState::Building);
        let channel = match self.channel.take() {
            Some(channel) => channel,
            None => {
                ControlChannel::open(
                    self.config.dev_server_port,
                    Duration::from_millis(self.config.dev_server_broadcast_delay),
                )
                .await?
            }
        };

        let started = Instant::now();
        let generation = BuildGeneration::new();
        let started_watch = RebuildWatcher::start(
            Arc::clone(&self.engine),
            &self.config,
            self.mode,
            channel.clone(),
            generation.clone(),
            shutdown.child_token(),
        );
        let (watch, mut events) = match started_watch {
            Ok(started) => started,
            Err(e) => {
                let (_, engine_result) = self.drain(channel, None, &mut AppLifecycle::new()).await;
                warn_on_engine_error(engine_result);
                return Err(e.into());
            }
        };

        let mut resources = Resources {
            channel,
            watch: Some(watch),
            app: AppLifecycle::new(),
        };

        let spinner = Spinner::new("Building...");
        let initial = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break None,
                event = events.recv() => match event {
                    Some(WatchEvent::InitialBuild { outcome }) => break Some(outcome),
                    Some(event) => tracing::debug!(?event, "Event before initial build"),
                    None => {
                        spinner.fail("Build engine stopped");
                        let (_, engine_result) = self.drain_resources(resources).await;
                        return Err(engine_result.err().unwrap_or(DevError::EngineStopped).into());
                    }
                },
            }
        };

        let outcome = match initial {
            Some(outcome) => outcome,
            None => {
                spinner.fail("Cancelled before the first build finished");
                let (teardown, engine_result) = self.drain_resources(resources).await;
                warn_on_engine_error(engine_result);
                return Ok(self.summary(port, &generation, teardown));
            }
        };

        if let Some(detail) = outcome.failure {
            spinner.fail("Initial build failed");
            let (_, engine_result) = self.drain_resources(resources).await;
            warn_on_engine_error(engine_result);
            return Err(DevError::InitialBuild(detail).into());
        }
        spinner.finish(&format!("Built in {}", format_duration(started.elapsed())));

        self.set_state(SessionState::Watching);
        let slot = Arc::new(BuildSlot::new(
            self.config.server_build_dir(),
            self.config.server_build_file(),
            generation.clone(),
            Arc::clone(&self.loader),
        ));
        let reload_port = resources
            .channel
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.dev_server_port);
        let router = app_router(&self.config, slot, reload_port);

        let on_ready = self.on_ready.take();
        let host = self.env.host.clone();
        let listening = resources
            .app
            .start(router, host.as_deref(), port, move |info| match on_ready {
                Some(callback) => callback(info),
                None => ui::success(&info.message()),
            })
            .await;
        if let Err(e) = listening {
            let (_, engine_result) = self.drain_resources(resources).await;
            warn_on_engine_error(engine_result);
            return Err(e.into());
        }

        watch_until_shutdown(&mut events, &shutdown).await;

        let (teardown, engine_result) = self.drain_resources(resources).await;
        warn_on_engine_error(engine_result);

        Ok(self.summary(port, &generation, teardown))
    }

    fn summary(&self, port: u16, generation: &BuildGeneration, teardown: Vec<TeardownStep>) -> SessionSummary {
        SessionSummary {
            port,
            generation: generation.current(),
            teardown,
        }
    }

    async fn drain_resources(
        &self,
        mut resources: Resources,
    ) -> (Vec<TeardownStep>, std::result::Result<(), DevError>) {
        let watch = resources.watch.take();
        self.drain(resources.channel, watch, &mut resources.app).await
    }

    async fn drain(
        &self,
        channel: ControlChannel,
        watch: Option<WatchHandle>,
        app: &mut AppLifecycle,
    ) -> (Vec<TeardownStep>, std::result::Result<(), DevError>) {
        self.set_state(SessionState::Draining);
        let mut steps = Vec::with_capacity(5);

        channel.close().await;
        steps.push(TeardownStep::CloseChannel);

        let engine_result = match watch {
            Some(watch) => {
                let result = watch.stop().await;
                steps.push(TeardownStep::StopWatcher);
                result
            }
            None => Ok(()),
        };

        empty_dir(&self.config.assets_dir());
        steps.push(TeardownStep::EmptyAssets);

        let artifact = self.config.server_build_file();
        match std::fs::remove_file(&artifact) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %artifact.display(), error = %e, "Failed to remove server build"),
        }
        steps.push(TeardownStep::RemoveServerBuild);

        if let Err(e) = app.stop().await {
            tracing::warn!(error = %e, "Failed to close app server");
        }
        steps.push(TeardownStep::CloseListener);

        self.set_state(SessionState::Closed);
        (steps, engine_result)
    }
}

fn warn_on_engine_error(result: std::result::Result<(), DevError>) {
    if let Err(e) = result {
        tracing::warn!(error = %e, "Build engine stopped with an error");
    }
}

struct Resources {
    channel: ControlChannel,
    watch: Option<WatchHandle>,
    app: AppLifecycle,
}

/// Stay in `watching` until shutdown. Rebuilds are handled by the watcher;
/// the session only traces them.
async fn watch_until_shutdown(
    events: &mut mpsc::UnboundedReceiver<WatchEvent>,
    shutdown: &CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            event = events.recv() => match event {
                Some(WatchEvent::RebuildFinish { outcome }) => {
                    tracing::debug!(success = outcome.is_success(), duration = ?outcome.duration, "Rebuild finished");
                }
                Some(event) => tracing::trace!(?event, "Watch event"),
                None => {
                    ui::warning("Build engine stopped; changes are no longer picked up");
                    shutdown.cancelled().await;
                    return;
                }
            },
        }
    }
}
