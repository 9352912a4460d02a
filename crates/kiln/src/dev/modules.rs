//! Server build generations.
//!
//! Every successful build bumps a [`BuildGeneration`]. The app server keeps
//! one [`LoadedBuild`] per generation in a [`BuildSlot`]; before a request is
//! dispatched the slot checks the counter and, when it moved, drops every
//! cached module under the build directory and loads the new artifact.
//! A request is always served entirely by the generation it started on.

use crate::error::DevError;
use axum::Router;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter of successful builds, shared between the watcher and
/// the app server.
#[derive(Debug, Clone, Default)]
pub struct BuildGeneration(Arc<AtomicU64>);

impl BuildGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }

    /// Record a successful build and return the new generation.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Turns a server build artifact into a request handler.
pub trait AppLoader: Send + Sync + 'static {
    fn load(&self, artifact: &Path, generation: u64) -> Result<Router, DevError>;
}

/// One loaded generation of the server build.
#[derive(Clone)]
pub struct LoadedBuild {
    pub generation: u64,
    pub router: Router,
}

/// Loaded server modules keyed by artifact path.
#[derive(Default)]
pub struct ModuleCache {
    entries: RwLock<HashMap<PathBuf, LoadedBuild>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> Option<LoadedBuild> {
        self.entries.read().get(path).cloned()
    }

    pub fn insert(&self, path: PathBuf, build: LoadedBuild) {
        self.entries.write().insert(path, build);
    }

    /// Remove every entry whose path lies under `build_path`.
    ///
    /// Matches whole path components, so purging `/app/build` keeps
    /// `/app/build-tools/x`. Returns how many entries were dropped.
    pub fn purge(&self, build_path: &Path) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|path, _| !path.starts_with(build_path));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// The app server's view of the current server build.
pub struct BuildSlot {
    build_dir: PathBuf,
    artifact: PathBuf,
    generation: BuildGeneration,
    loader: Arc<dyn AppLoader>,
    cache: ModuleCache,
    current: RwLock<Option<LoadedBuild>>,
}

impl BuildSlot {
    pub fn new(
        build_dir: PathBuf,
        artifact: PathBuf,
        generation: BuildGeneration,
        loader: Arc<dyn AppLoader>,
    ) -> Self {
        Self {
            build_dir,
            artifact,
            generation,
            loader,
            cache: ModuleCache::new(),
            current: RwLock::new(None),
        }
    }

    /// Return the build to serve the next request with.
    ///
    /// Reloads when the generation moved since the last request.
    pub fn refresh(&self) -> Result<LoadedBuild, DevError> {
        let wanted = self.generation.current();

        if let Some(build) = self.current.read().as_ref() {
            if build.generation == wanted {
                return Ok(build.clone());
            }
        }

        let mut current = self.current.write();
        // Another request may have reloaded while we waited for the lock.
        if let Some(build) = current.as_ref() {
            if build.generation == wanted {
                return Ok(build.clone());
            }
        }

        let purged = self.cache.purge(&self.build_dir);
        tracing::debug!(generation = wanted, purged, "Loading server build");

        let build = match self.cache.get(&self.artifact) {
            Some(build) if build.generation == wanted => build,
            _ => {
                let router = self.loader.load(&self.artifact, wanted)?;
                let build = LoadedBuild {
                    generation: wanted,
                    router,
                };
                self.cache.insert(self.artifact.clone(), build.clone());
                build
            }
        };

        *current = Some(build.clone());
        Ok(build)
    }

    /// Generation of the build currently loaded, if any.
    pub fn loaded_generation(&self) -> Option<u64> {
        self.current.read().as_ref().map(|b| b.generation)
    }

    pub fn cache(&self) -> &ModuleCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingLoader {
        loads: AtomicUsize,
    }

    impl AppLoader for CountingLoader {
        fn load(&self, _artifact: &Path, _generation: u64) -> Result<Router, DevError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Router::new())
        }
    }

    fn slot(generation: BuildGeneration) -> (BuildSlot, Arc<CountingLoader>) {
        let loader = Arc::new(CountingLoader {
            loads: AtomicUsize::new(0),
        });
        let slot = BuildSlot::new(
            PathBuf::from("/app/build"),
            PathBuf::from("/app/build/index.html"),
            generation,
            loader.clone(),
        );
        (slot, loader)
    }

    #[test]
    fn test_generation_advances() {
        let generation = BuildGeneration::new();
        assert_eq!(generation.current(), 0);
        assert_eq!(generation.advance(), 1);
        assert_eq!(generation.clone().advance(), 2);
        assert_eq!(generation.current(), 2);
    }

    #[test]
    fn test_purge_matches_whole_components() {
        let cache = ModuleCache::new();
        let build = LoadedBuild {
            generation: 1,
            router: Router::new(),
        };
        cache.insert(PathBuf::from("/app/build/index.js"), build.clone());
        cache.insert(PathBuf::from("/app/build/routes/a.js"), build.clone());
        cache.insert(PathBuf::from("/app/build-tools/x.js"), build.clone());
        cache.insert(PathBuf::from("/app/node_modules/react.js"), build);

        assert_eq!(cache.purge(Path::new("/app/build")), 2);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(Path::new("/app/build-tools/x.js")).is_some());
    }

    #[test]
    fn test_refresh_loads_once_per_generation() {
        let generation = BuildGeneration::new();
        generation.advance();
        let (slot, loader) = slot(generation.clone());

        assert_eq!(slot.refresh().unwrap().generation, 1);
        assert_eq!(slot.refresh().unwrap().generation, 1);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        generation.advance();
        assert_eq!(slot.refresh().unwrap().generation, 2);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(slot.loaded_generation(), Some(2));
        assert_eq!(slot.cache().len(), 1);
    }

    #[test]
    fn test_failed_load_keeps_previous_build() {
        struct FlakyLoader;

        impl AppLoader for FlakyLoader {
            fn load(&self, artifact: &Path, generation: u64) -> Result<Router, DevError> {
                if generation == 2 {
                    return Err(DevError::Load {
                        path: artifact.to_path_buf(),
                        reason: "missing".to_string(),
                    });
                }
                Ok(Router::new())
            }
        }

        let generation = BuildGeneration::new();
        generation.advance();
        let slot = BuildSlot::new(
            PathBuf::from("/app/build"),
            PathBuf::from("/app/build/index.html"),
            generation.clone(),
            Arc::new(FlakyLoader),
        );

        slot.refresh().unwrap();
        generation.advance();
        assert!(slot.refresh().is_err());
        assert_eq!(slot.loaded_generation(), Some(1));
    }
}
