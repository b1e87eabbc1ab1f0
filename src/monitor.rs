//! Long-lived route monitoring for one project root.
//!
//! [`setup_monitoring`] loads the workspace and derives every file's
//! contribution once. [`Monitor::start`] then keeps both current from
//! file-system events; only changed files are re-extracted before the graph
//! is relinked.

use crate::error::SetupError;
use crate::expand::{ExpandOptions, Expander};
use crate::extract::extract_file;
use crate::graph::RouteGraph;
use crate::locate::{self, LocateOptions};
use crate::lsp::{LspRegistry, LspSettings};
use crate::model::{AnalysisResult, ExpandedFunction, FunctionLocation, Resource};
use crate::resolver::ModuleResolver;
use crate::scan::ScanOptions;
use crate::util::canonical_or_clean;
use crate::watch::{self, WatchBatch, WatchConfig, WatchHandle, WatchSet};
use crate::workspace::{Change, WorkspaceStore};
use anyhow::Result;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct MonitorOptions {
    pub no_ignore: bool,
    pub debounce_ms: u64,
    pub lsp_enabled: bool,
    pub max_expand_depth: usize,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        let config = crate::config::get();
        Self {
            no_ignore: false,
            debounce_ms: config.watch_debounce_ms,
            lsp_enabled: config.lsp_enabled,
            max_expand_depth: config.max_expand_depth,
        }
    }
}

/// Counts from one incremental refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub config_changed: bool,
}

struct State {
    store: WorkspaceStore,
    graph: RouteGraph,
    set: WatchSet,
    no_ignore: bool,
}

impl State {
    fn load(root: &Path, resolver: Arc<ModuleResolver>, no_ignore: bool) -> Result<Self> {
        let mut set = WatchSet::new(root, no_ignore);
        let mut store = WorkspaceStore::new(root)?;
        for scanned in crate::scan::scan_project(root, &ScanOptions::new(no_ignore))? {
            if !set.contains(&scanned.abs_path) {
                continue;
            }
            if let Err(err) = store.upsert(&scanned.abs_path) {
                warn!(file = %scanned.rel_path, "skip file: {err:#}");
            }
        }
        let mut graph = RouteGraph::with_resolver(root, resolver);
        for file in store.files() {
            graph.replace_file(extract_file(file));
        }
        Ok(Self {
            store,
            graph,
            set,
            no_ignore,
        })
    }

    fn refresh(&mut self, paths: &[PathBuf]) -> RefreshStats {
        let mut stats = RefreshStats::default();
        for path in paths {
            if watch::is_config_file(path) {
                stats.config_changed = true;
                continue;
            }
            if !self.set.contains(path) && !self.store.contains(path) {
                continue;
            }
            match self.store.upsert(path) {
                Ok(Change::Unchanged) => stats.unchanged += 1,
                Ok(Change::Removed) => {
                    self.graph.remove_file(path);
                    stats.removed += 1;
                }
                Ok(Change::Added | Change::Modified) => {
                    if let Some(file) = self.store.get(path) {
                        self.graph.replace_file(extract_file(&file));
                        stats.updated += 1;
                    }
                }
                Err(err) => warn!(file = %path.display(), "refresh failed: {err:#}"),
            }
        }
        if stats.config_changed {
            debug!("project configuration changed; clearing resolver caches");
            self.graph.resolver().invalidate();
            self.set = WatchSet::new(self.store.root(), self.no_ignore);
        }
        stats
    }

    fn reload(&mut self) {
        let root = self.store.root().to_path_buf();
        let resolver = Arc::clone(self.graph.resolver());
        resolver.invalidate();
        match State::load(&root, resolver, self.no_ignore) {
            Ok(mut fresh) => {
                fresh.graph.copy_extras_from(&self.graph);
                *self = fresh;
            }
            Err(err) => warn!("rescan failed: {err:#}"),
        }
    }
}

struct Shared {
    state: Mutex<State>,
    listeners: Mutex<Vec<UnboundedSender<AnalysisResult>>>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(&self, batch: WatchBatch) {
        let result = {
            let mut state = self.state();
            match batch {
                WatchBatch::Changed(paths) => {
                    let stats = state.refresh(&paths);
                    debug!(?stats, "refreshed");
                    if stats.updated == 0 && stats.removed == 0 && !stats.config_changed {
                        return;
                    }
                }
                WatchBatch::Rescan => state.reload(),
            }
            state.graph.analyze()
        };
        self.publish(result);
    }

    fn publish(&self, result: AnalysisResult) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.retain(|tx| tx.send(result.clone()).is_ok());
    }
}

pub struct Monitor {
    root: PathBuf,
    options: MonitorOptions,
    resolver: Arc<ModuleResolver>,
    shared: Arc<Shared>,
    lsp: LspRegistry,
    watch: Mutex<Option<WatchHandle>>,
    torn_down: AtomicBool,
}

pub fn setup_monitoring(root: &Path) -> Result<Monitor, SetupError> {
    setup_monitoring_with(root, MonitorOptions::default())
}

pub fn setup_monitoring_with(root: &Path, options: MonitorOptions) -> Result<Monitor, SetupError> {
    if !root.exists() {
        return Err(SetupError::RootMissing(root.to_path_buf()));
    }
    if !root.is_dir() {
        return Err(SetupError::NotADirectory(root.to_path_buf()));
    }
    let root = canonical_or_clean(root);
    let resolver = Arc::new(ModuleResolver::new(&root));
    let state = State::load(&root, Arc::clone(&resolver), options.no_ignore)?;
    info!(
        root = %root.display(),
        files = state.store.len(),
        "monitoring ready"
    );
    let config = crate::config::get();
    Ok(Monitor {
        root,
        resolver,
        shared: Arc::new(Shared {
            state: Mutex::new(state),
            listeners: Mutex::new(Vec::new()),
        }),
        lsp: LspRegistry::new(LspSettings::from_config(config)),
        watch: Mutex::new(None),
        torn_down: AtomicBool::new(false),
        options,
    })
}

impl Monitor {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Begin watching. Calling it again while watching does nothing.
    pub fn start(&self) -> Result<(), SetupError> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(SetupError::Watch("monitor was torn down".to_string()));
        }
        let mut watch = self.watch.lock().unwrap_or_else(PoisonError::into_inner);
        if watch.is_some() {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        let config = WatchConfig::new(self.options.debounce_ms, self.options.no_ignore);
        let handle = watch::start(self.root.clone(), config, move |batch| shared.apply(batch))?;
        *watch = Some(handle);
        Ok(())
    }

    pub fn is_watching(&self) -> bool {
        self.watch
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn find_routes(&self) -> AnalysisResult {
        self.shared.state().graph.analyze()
    }

    /// Re-read `paths` now instead of waiting for the watcher.
    pub fn refresh_paths(&self, paths: &[PathBuf]) -> RefreshStats {
        let paths: Vec<PathBuf> = paths
            .iter()
            .map(|p| if p.is_absolute() { p.clone() } else { self.root.join(p) })
            .collect();
        self.shared.state().refresh(&paths)
    }

    pub fn files(&self) -> Vec<PathBuf> {
        self.shared.state().store.paths()
    }

    pub fn add_custom(&self, method: &str, path: &str, handler_text: &str) {
        self.shared.state().graph.add_custom(method, path, handler_text);
    }

    pub fn add_imported(&self, method: &str, path: &str) {
        self.shared.state().graph.add_imported(method, path);
    }

    pub fn match_request(&self, method: &str, path: &str) -> Vec<Resource> {
        self.shared.state().graph.match_request(method, path)
    }

    /// Receive a fresh result after every change the watcher applies.
    pub fn subscribe(&self) -> UnboundedReceiver<AnalysisResult> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub async fn locate_function(&self, function_text: &str, options: &LocateOptions) -> Option<FunctionLocation> {
        locate::locate(&self.root, function_text, options)
            .await
            .map(|found| found.location)
    }

    pub async fn expand_function(
        &self,
        function_text: &str,
        options: &ExpandOptions,
    ) -> Result<Option<ExpandedFunction>> {
        let lsp = self.options.lsp_enabled.then_some(&self.lsp);
        let depth = options.max_depth.unwrap_or(self.options.max_expand_depth);
        let mut expander = Expander::new(&self.root, Arc::clone(&self.resolver), lsp, depth)?;
        expander.expand(function_text, &options.locate).await
    }

    /// Stop watching and dispose language server sessions.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_watching();
        self.lsp.dispose_all().await;
        info!(root = %self.root.display(), "monitoring stopped");
    }

    fn stop_watching(&self) {
        let handle = self
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // Sessions kill their processes when the registry drops.
        self.stop_watching();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn setup_rejects_missing_and_file_roots() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(
            setup_monitoring(&missing),
            Err(SetupError::RootMissing(_))
        ));
        let file = dir.path().join("file.ts");
        fs::write(&file, "").unwrap();
        assert!(matches!(
            setup_monitoring(&file),
            Err(SetupError::NotADirectory(_))
        ));
    }

    #[test]
    fn refresh_skips_identical_content() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let app = src.join("app.ts");
        fs::write(&app, "import { Hono } from \"hono\";\nconst app = new Hono();\napp.get(\"/a\", (c) => c.text(\"a\"));\n").unwrap();
        let monitor = setup_monitoring(dir.path()).unwrap();
        assert_eq!(monitor.find_routes().resources.len(), 1);

        let stats = monitor.refresh_paths(&[PathBuf::from("src/app.ts")]);
        assert_eq!(stats.unchanged, 1);
        assert_eq!(stats.updated, 0);
    }
}
