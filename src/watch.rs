use crate::error::SetupError;
use crate::resolver::tsconfig;
use crate::scan::{self, SKIP_DIRS};
use ignore::{
    Match as IgnoreMatch,
    gitignore::{Gitignore, GitignoreBuilder},
    overrides::{Override, OverrideBuilder},
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(200);
const READY_TIMEOUT: Duration = Duration::from_secs(2);

/// Files whose change invalidates module resolution rather than a single
/// contribution.
pub const CONFIG_FILES: &[&str] = &["tsconfig.json", "jsconfig.json", "package.json"];

#[derive(Clone, Copy, Debug)]
pub struct WatchConfig {
    pub debounce: Duration,
    pub no_ignore: bool,
}

impl WatchConfig {
    pub fn new(debounce_ms: u64, no_ignore: bool) -> Self {
        Self {
            debounce: Duration::from_millis(debounce_ms.max(1)),
            no_ignore,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(crate::config::get().watch_debounce_ms, false)
    }
}

/// A coalesced set of changes delivered to the watch callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchBatch {
    /// Paths touched since the last batch, each at most once
    Changed(Vec<PathBuf>),
    /// The backend dropped events; everything must be reloaded
    Rescan,
}

pub struct WatchHandle {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Coalesces events until the debounce window has passed without a new one.
/// A later event for a pending path replaces the earlier one, so the flush
/// always re-reads the newest content.
pub struct Debouncer {
    debounce: Duration,
    pending: BTreeSet<PathBuf>,
    last_event: Option<Instant>,
}

impl Debouncer {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            pending: BTreeSet::new(),
            last_event: None,
        }
    }

    pub fn push(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path);
        self.last_event = Some(now);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.last_event = None;
    }

    /// Drain the pending paths once the window has elapsed.
    pub fn ready(&mut self, now: Instant) -> Option<Vec<PathBuf>> {
        let last = self.last_event?;
        if self.pending.is_empty() || now.duration_since(last) < self.debounce {
            return None;
        }
        self.last_event = None;
        Some(std::mem::take(&mut self.pending).into_iter().collect())
    }
}

/// Which paths under a project root are worth re-analysing.
pub struct WatchSet {
    root: PathBuf,
    include: Option<Override>,
    filter: PathFilter,
    no_ignore: bool,
}

impl WatchSet {
    /// Globs from the root `tsconfig.json` `include`, else `src/**` plus
    /// root-level files.
    pub fn new(root: &Path, no_ignore: bool) -> Self {
        let include = root_include_globs(root).and_then(|globs| build_override(root, &globs));
        Self {
            root: root.to_path_buf(),
            include,
            filter: PathFilter::new(root, no_ignore),
            no_ignore,
        }
    }

    pub fn has_include_globs(&self) -> bool {
        self.include.is_some()
    }

    pub fn contains(&mut self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return false;
        };
        let mut in_skipped_dir = false;
        for component in rel.components() {
            let name = component.as_os_str();
            if name == ".git" {
                return false;
            }
            if name == "node_modules" || SKIP_DIRS.iter().any(|dir| name == *dir) {
                in_skipped_dir = true;
            }
        }
        if in_skipped_dir && !self.no_ignore {
            return false;
        }
        if is_config_file(path) {
            return true;
        }
        if scan::language_for_path(path).is_none() {
            return false;
        }
        let included = match &self.include {
            Some(matcher) => matcher.matched(path, false).is_whitelist(),
            None => rel.starts_with("src") || rel.components().count() == 1,
        };
        included && !self.filter.is_ignored(path)
    }
}

pub fn is_config_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| CONFIG_FILES.contains(&name))
        .unwrap_or(false)
}

fn root_include_globs(root: &Path) -> Option<Vec<String>> {
    let path = root.join("tsconfig.json");
    if !path.is_file() {
        return None;
    }
    match tsconfig::load(&path) {
        Ok(config) if !config.include.is_empty() => Some(config.include),
        Ok(_) => None,
        Err(err) => {
            warn!("watch: {err}");
            None
        }
    }
}

fn build_override(root: &Path, globs: &[String]) -> Option<Override> {
    let mut builder = OverrideBuilder::new(root);
    for glob in globs {
        // `src` in tsconfig means the whole directory
        let glob = if glob.contains('*') || glob.contains('.') {
            glob.trim_start_matches("./").to_string()
        } else {
            format!("{}/**", glob.trim_start_matches("./").trim_end_matches('/'))
        };
        if let Err(err) = builder.add(&glob) {
            warn!("watch: invalid include glob {glob}: {err}");
        }
    }
    match builder.build() {
        Ok(matcher) if !matcher.is_empty() => Some(matcher),
        Ok(_) => None,
        Err(err) => {
            warn!("watch: include build error: {err}");
            None
        }
    }
}

/// Watch `root` on a dedicated thread and hand every debounced batch to
/// `on_batch`. Fails when the platform watcher cannot be started.
pub fn start<F>(root: PathBuf, config: WatchConfig, on_batch: F) -> Result<WatchHandle, SetupError>
where
    F: FnMut(WatchBatch) + Send + 'static,
{
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = thread::spawn(move || run_loop(root, config, stop_rx, ready_tx, on_batch));
    let mut watch = WatchHandle {
        stop: stop_tx,
        thread: Some(handle),
    };
    match ready_rx.recv_timeout(READY_TIMEOUT) {
        Ok(Ok(())) => Ok(watch),
        Ok(Err(err)) => {
            watch.shutdown();
            Err(err)
        }
        Err(_) => Ok(watch),
    }
}

fn run_loop<F>(
    root: PathBuf,
    config: WatchConfig,
    stop_rx: Receiver<()>,
    ready: Sender<Result<(), SetupError>>,
    mut on_batch: F,
) where
    F: FnMut(WatchBatch),
{
    let mut set = WatchSet::new(&root, config.no_ignore);
    let (_watcher, event_rx) = match try_start_watcher(&root) {
        Ok(started) => {
            let _ = ready.send(Ok(()));
            started
        }
        Err(err) => {
            let _ = ready.send(Err(SetupError::Watch(err.to_string())));
            return;
        }
    };
    info!(root = %root.display(), tsconfig_include = set.has_include_globs(), "watching");

    let mut pending = Debouncer::new(config.debounce);
    loop {
        if stop_requested(&stop_rx) {
            debug!("watch stopped");
            return;
        }
        let wait = if pending.is_empty() {
            IDLE_POLL
        } else {
            config.debounce
        };
        match event_rx.recv_timeout(wait) {
            Ok(Ok(event)) => {
                if event.need_rescan() {
                    pending.clear();
                    on_batch(WatchBatch::Rescan);
                    continue;
                }
                if is_noise_event(&event) {
                    continue;
                }
                let now = Instant::now();
                for path in event.paths {
                    if set.contains(&path) {
                        pending.push(path, now);
                    }
                }
            }
            Ok(Err(err)) => warn!("watch error: {err}"),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("watch backend disconnected");
                return;
            }
        }
        if let Some(paths) = pending.ready(Instant::now()) {
            debug!(count = paths.len(), "flush changed paths");
            on_batch(WatchBatch::Changed(paths));
        }
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn try_start_watcher(
    root: &Path,
) -> notify::Result<(RecommendedWatcher, Receiver<notify::Result<Event>>)> {
    let (event_tx, event_rx) = mpsc::channel();
    let handler = move |res| {
        let _ = event_tx.send(res);
    };
    let mut watcher = notify::recommended_watcher(handler)?;
    watcher.watch(root, RecursiveMode::Recursive)?;
    Ok((watcher, event_rx))
}

fn is_noise_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Access(_))
}

struct PathFilter {
    root: PathBuf,
    no_ignore: bool,
    gitignores: HashMap<PathBuf, Gitignore>,
    git_exclude: Gitignore,
    global_ignore: Gitignore,
}

impl PathFilter {
    fn new(root: &Path, no_ignore: bool) -> Self {
        let git_exclude = if no_ignore {
            Gitignore::empty()
        } else {
            build_gitignore(root, root.join(".git/info/exclude"))
        };
        let (global_ignore, err) = if no_ignore {
            (Gitignore::empty(), None)
        } else {
            GitignoreBuilder::new(root).build_global()
        };
        if let Some(err) = err {
            debug!("watch: global ignore error: {err}");
        }
        Self {
            root: root.to_path_buf(),
            no_ignore,
            gitignores: HashMap::new(),
            git_exclude,
            global_ignore,
        }
    }

    fn is_ignored(&mut self, path: &Path) -> bool {
        if self.no_ignore {
            return false;
        }
        let is_dir = path.is_dir();
        let mut decision = None;
        apply_match(
            &mut decision,
            self.global_ignore.matched_path_or_any_parents(path, is_dir),
        );
        apply_match(
            &mut decision,
            self.git_exclude.matched_path_or_any_parents(path, is_dir),
        );
        for dir in self.ancestor_dirs(path) {
            let matcher = self.gitignore_for(&dir);
            apply_match(&mut decision, matcher.matched_path_or_any_parents(path, is_dir));
        }
        decision.unwrap_or(false)
    }

    /// Directories from the root down to the parent of `path`.
    fn ancestor_dirs(&self, path: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let Some(mut current) = path.parent() else {
            return out;
        };
        loop {
            if !current.starts_with(&self.root) {
                break;
            }
            out.push(current.to_path_buf());
            if current == self.root {
                break;
            }
            let Some(parent) = current.parent() else {
                break;
            };
            current = parent;
        }
        out.reverse();
        out
    }

    fn gitignore_for(&mut self, dir: &Path) -> &Gitignore {
        use std::collections::hash_map::Entry;
        match self.gitignores.entry(dir.to_path_buf()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let path = dir.join(".gitignore");
                let matcher = if path.is_file() {
                    let (ignore, err) = Gitignore::new(&path);
                    if let Some(err) = err {
                        warn!("watch: ignore parse error: {err}");
                    }
                    ignore
                } else {
                    Gitignore::empty()
                };
                entry.insert(matcher)
            }
        }
    }
}

fn apply_match<T>(decision: &mut Option<bool>, matched: IgnoreMatch<T>) {
    match matched {
        IgnoreMatch::Ignore(_) => *decision = Some(true),
        IgnoreMatch::Whitelist(_) => *decision = Some(false),
        IgnoreMatch::None => {}
    }
}

fn build_gitignore(root: &Path, path: PathBuf) -> Gitignore {
    if !path.is_file() {
        return Gitignore::empty();
    }
    let mut builder = GitignoreBuilder::new(root);
    if let Some(err) = builder.add(path) {
        warn!("watch: ignore parse error: {err}");
    }
    builder.build().unwrap_or_else(|err| {
        warn!("watch: ignore build error: {err}");
        Gitignore::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn debouncer_waits_for_quiet_window() {
        let mut debouncer = Debouncer::new(Duration::from_millis(50));
        let t0 = Instant::now();
        debouncer.push(PathBuf::from("/p/src/a.ts"), t0);
        debouncer.push(PathBuf::from("/p/src/b.ts"), t0 + Duration::from_millis(30));
        debouncer.push(PathBuf::from("/p/src/a.ts"), t0 + Duration::from_millis(40));

        assert_eq!(debouncer.ready(t0 + Duration::from_millis(60)), None);
        let flushed = debouncer.ready(t0 + Duration::from_millis(95)).unwrap();
        assert_eq!(
            flushed,
            vec![PathBuf::from("/p/src/a.ts"), PathBuf::from("/p/src/b.ts")]
        );
        assert!(debouncer.is_empty());
        assert_eq!(debouncer.ready(t0 + Duration::from_secs(1)), None);
    }

    #[test]
    fn default_watch_set_is_src_and_root_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let mut set = WatchSet::new(root, false);
        assert!(!set.has_include_globs());
        assert!(set.contains(&root.join("src/routes/users.ts")));
        assert!(set.contains(&root.join("index.ts")));
        assert!(set.contains(&root.join("tsconfig.json")));
        assert!(!set.contains(&root.join("scripts/seed.ts")));
        assert!(!set.contains(&root.join("src/node_modules/x/index.js")));
        assert!(!set.contains(&root.join("src/readme.md")));
        assert!(!set.contains(Path::new("/elsewhere/src/a.ts")));
    }

    #[test]
    fn tsconfig_include_and_gitignore_shape_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(
            root.join("tsconfig.json"),
            r#"{ "include": ["app/**/*.ts", "server"] }"#,
        )
        .unwrap();
        fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        let mut set = WatchSet::new(root, false);
        assert!(set.has_include_globs());
        assert!(set.contains(&root.join("app/routes/a.ts")));
        assert!(set.contains(&root.join("server/main.ts")));
        assert!(!set.contains(&root.join("src/a.ts")));
        assert!(!set.contains(&root.join("app/generated/b.ts")));

        let mut unfiltered = WatchSet::new(root, true);
        assert!(unfiltered.contains(&root.join("app/generated/b.ts")));
    }
}
