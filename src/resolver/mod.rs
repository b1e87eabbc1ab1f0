//! Module resolution: tsconfig path aliases first, then relative and
//! node-style lookup, with pnpm store paths unwound to package names.

pub mod packages;
pub mod tsconfig;

use crate::error::ResolveError;
use crate::util::{clean_path, is_node_modules_path};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;
pub use tsconfig::TsConfig;

/// Extension lookup order. TypeScript sources win over compiled output that
/// may sit next to them.
pub const EXTENSIONS: &[&str] = &[
    "ts", "tsx", "d.ts", "mts", "cts", "js", "jsx", "mjs", "cjs",
];

pub struct ModuleResolver {
    root: PathBuf,
    tsconfigs: Mutex<HashMap<PathBuf, Option<Arc<TsConfig>>>>,
}

impl ModuleResolver {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            tsconfigs: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drop cached tsconfig parses (called when a config file changes).
    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.tsconfigs.lock() {
            cache.clear();
        }
    }

    /// Nearest tsconfig for files in `dir`, cached per directory.
    pub fn tsconfig_for(&self, dir: &Path) -> Option<Arc<TsConfig>> {
        if let Ok(cache) = self.tsconfigs.lock() {
            if let Some(hit) = cache.get(dir) {
                return hit.clone();
            }
        }
        let loaded = tsconfig::find_nearest(dir, &self.root).and_then(|path| {
            match tsconfig::load(&path) {
                Ok(config) => Some(Arc::new(config)),
                Err(err) => {
                    debug!(config = %path.display(), "ignore tsconfig: {err}");
                    None
                }
            }
        });
        if let Ok(mut cache) = self.tsconfigs.lock() {
            cache.insert(dir.to_path_buf(), loaded.clone());
        }
        loaded
    }

    pub fn resolve(&self, specifier: &str, containing_file: &Path) -> Result<PathBuf, ResolveError> {
        let not_found = || ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: containing_file.to_path_buf(),
        };
        let dir = containing_file.parent().ok_or_else(not_found)?;

        if packages::is_bare_specifier(specifier) {
            if let Some(config) = self.tsconfig_for(dir) {
                for candidate in config.alias_candidates(specifier) {
                    if let Some(found) = resolve_file_or_directory(&candidate) {
                        return Ok(self.finish(found));
                    }
                }
                if let Some(candidate) = config.base_url_candidate(specifier) {
                    if let Some(found) = resolve_file_or_directory(&candidate) {
                        return Ok(self.finish(found));
                    }
                }
            }
            return resolve_node_modules(specifier, dir)
                .map(|found| self.finish(found))
                .ok_or_else(not_found);
        }

        let candidate = if specifier.starts_with('/') {
            PathBuf::from(specifier)
        } else {
            dir.join(specifier)
        };
        resolve_file_or_directory(&clean_path(&candidate))
            .map(|found| self.finish(found))
            .ok_or_else(not_found)
    }

    /// Workspace packages linked into `node_modules` resolve to their real
    /// location when it lies inside the project; other dependency paths keep
    /// their lexical form so package names stay recoverable.
    fn finish(&self, found: PathBuf) -> PathBuf {
        if !is_node_modules_path(&found) {
            return found;
        }
        match fs::canonicalize(&found) {
            Ok(real) if real.starts_with(&self.root) && !is_node_modules_path(&real) => real,
            _ => found,
        }
    }
}

/// One-shot resolution without a shared cache.
pub fn resolve(
    specifier: &str,
    containing_file: &Path,
    project_root: &Path,
) -> Result<PathBuf, ResolveError> {
    ModuleResolver::new(project_root).resolve(specifier, containing_file)
}

pub fn resolve_file_or_directory(base: &Path) -> Option<PathBuf> {
    try_extensions(base).or_else(|| try_directory(base))
}

fn try_extensions(base: &Path) -> Option<PathBuf> {
    if base.is_file() && crate::scan::language_for_path(base).is_some() {
        return Some(base.to_path_buf());
    }
    let raw = base.to_string_lossy();
    // `./db.js` written against a `db.ts` source
    for (compiled, sources) in [
        (".js", &["ts", "tsx"][..]),
        (".jsx", &["tsx"][..]),
        (".mjs", &["mts"][..]),
        (".cjs", &["cts"][..]),
    ] {
        if let Some(stem) = raw.strip_suffix(compiled) {
            for ext in sources {
                let candidate = PathBuf::from(format!("{stem}.{ext}"));
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }
    }
    for ext in EXTENSIONS {
        let candidate = PathBuf::from(format!("{raw}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    if base.is_file() {
        return Some(base.to_path_buf());
    }
    None
}

fn try_directory(base: &Path) -> Option<PathBuf> {
    if !base.is_dir() {
        return None;
    }
    if let Some(entry) = packages::package_entry(base) {
        if let Some(found) = try_extensions(&entry).or_else(|| try_index(&entry)) {
            return Some(found);
        }
    }
    try_index(base)
}

fn try_index(dir: &Path) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("index.{ext}")))
        .find(|candidate| candidate.is_file())
}

/// Node lookup: every ancestor's `node_modules`, skipping ancestors that are
/// themselves `node_modules` directories.
fn resolve_node_modules(specifier: &str, start: &Path) -> Option<PathBuf> {
    let (package, subpath) = packages::split_bare_specifier(specifier);
    if package.is_empty() {
        return None;
    }
    let mut dir = Some(start);
    while let Some(current) = dir {
        if current.file_name().map(|n| n != "node_modules").unwrap_or(true) {
            let package_dir = current.join("node_modules").join(&package);
            if package_dir.is_dir() {
                let found = match &subpath {
                    Some(sub) => resolve_file_or_directory(&package_dir.join(sub)),
                    None => try_directory(&package_dir),
                };
                if found.is_some() {
                    return found;
                }
            }
        }
        dir = current.parent();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[test]
    fn resolves_relative_with_extension_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/db.ts"), "export const db = 1;");
        write(&root.join("src/routes/index.ts"), "export {};");
        let resolver = ModuleResolver::new(root);
        let from = root.join("src/index.ts");

        assert_eq!(resolver.resolve("./db", &from).unwrap(), root.join("src/db.ts"));
        assert_eq!(resolver.resolve("./db.js", &from).unwrap(), root.join("src/db.ts"));
        assert_eq!(
            resolver.resolve("./routes", &from).unwrap(),
            root.join("src/routes/index.ts")
        );
        assert!(matches!(
            resolver.resolve("./missing", &from),
            Err(ResolveError::NotFound { .. })
        ));
    }

    #[test]
    fn barrel_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(&root.join("src/lib/index.ts"), "export * from './a';");
        write(&root.join("src/lib/a.ts"), "export const a = 1;");
        let found = resolve("./lib", &root.join("src/app.ts"), root).unwrap();
        assert_eq!(found, root.join("src/lib/index.ts"));
    }
}
