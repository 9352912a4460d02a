//! Development session: watch, rebuild, live-reload.
//!
//! - [`channel`] pushes [`ReloadEvent`]s to browsers over WebSocket
//! - [`engine`] is the build engine interface plus [`CommandBuildEngine`]
//! - [`watcher`] translates engine events into log lines and reloads
//! - [`modules`] keeps requests on a single build generation
//! - [`app`] owns the app server listener
//! - [`session`] wires everything together and tears it down in order

pub mod app;
pub mod channel;
pub mod command_engine;
pub mod engine;
pub mod fs_watcher;
pub mod modules;
pub mod port;
pub mod session;
pub mod watcher;

// Re-exports
pub use app::{app_router, AppLifecycle, LifecycleState, StaticAppLoader};
pub use channel::{ClientConnection, ControlChannel, ReadyState, LOG_PREFIX};
pub use command_engine::CommandBuildEngine;
pub use engine::{BuildEngine, BuildEvent, BuildOutcome, Mode, WatchContext, WatchHandle};
pub use fs_watcher::{FileChange, FileWatcher};
pub use modules::{AppLoader, BuildGeneration, BuildSlot, LoadedBuild, ModuleCache};
pub use port::{resolve_port, DevEnvironment, PortAllocator, ReadyInfo, TcpPortAllocator};
pub use session::{DevSession, SessionState, SessionSummary, TeardownStep};
pub use watcher::{RebuildWatcher, WatchEvent};

use serde::{Deserialize, Serialize};

/// Message pushed to every connected browser.
///
/// Wire format: `{"type":"LOG","message":"..."}` or `{"type":"RELOAD"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ReloadEvent {
    /// Human-readable status line, printed to the browser console
    Log { message: String },

    /// A new build is ready; the page should reload
    Reload,
}

impl ReloadEvent {
    /// Build a `LOG` event.
    pub fn log(message: impl Into<String>) -> Self {
        ReloadEvent::Log {
            message: message.into(),
        }
    }
}
