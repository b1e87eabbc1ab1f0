use anyhow::{Context, Result};
use blake3::Hasher;
use ignore::WalkBuilder;
use ignore::overrides::OverrideBuilder;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    pub fn name(self) -> &'static str {
        match self {
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Tsx => "tsx",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageSpec {
    pub language: Language,
    pub extensions: &'static [&'static str],
}

const LANGUAGE_SPECS: &[LanguageSpec] = &[
    LanguageSpec {
        language: Language::JavaScript,
        extensions: &["js", "jsx", "mjs", "cjs"],
    },
    LanguageSpec {
        language: Language::TypeScript,
        extensions: &["ts", "mts", "cts"],
    },
    LanguageSpec {
        language: Language::Tsx,
        extensions: &["tsx"],
    },
];

/// Directories never descended into: dependencies, build output, VCS.
pub const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    "dist",
    "build",
    "out",
    ".wrangler",
    ".next",
    ".turbo",
    "coverage",
];

const SKIP_FILE_SUFFIXES: &[&str] = &[".log", ".md"];

#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub rel_path: String,
    pub abs_path: PathBuf,
    pub hash: String,
    pub language: Language,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub no_ignore: bool,
    /// Gitignore-style globs relative to the root; empty means everything
    pub include: Vec<String>,
    /// Keep build output directories (the source-map fallback reads them)
    pub include_build_output: bool,
}

impl ScanOptions {
    pub fn new(no_ignore: bool) -> Self {
        Self {
            no_ignore,
            ..Self::default()
        }
    }

    pub fn with_include(mut self, include: Vec<String>) -> Self {
        self.include = include;
        self
    }
}

pub fn language_for_path(path: &Path) -> Option<Language> {
    let name = path.file_name()?.to_str()?;
    if SKIP_FILE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return None;
    }
    let ext = path.extension().and_then(|ext| ext.to_str())?;
    LANGUAGE_SPECS
        .iter()
        .find(|spec| spec.extensions.contains(&ext))
        .map(|spec| spec.language)
}

pub fn scan_project(root: &Path, options: &ScanOptions) -> Result<Vec<ScannedFile>> {
    let mut files = Vec::new();
    for path in walk_paths(root, options)? {
        let Some(language) = language_for_path(&path) else {
            continue;
        };
        let rel_path = crate::util::normalize_rel_path(root, &path)?;
        let hash = match hash_file(&path) {
            Ok(value) => value,
            Err(err) => {
                warn!(file = %path.display(), "skip unreadable file: {err:#}");
                continue;
            }
        };
        files.push(ScannedFile {
            rel_path,
            abs_path: path,
            hash,
            language,
        });
    }
    files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(files)
}

/// Sorted source files for the function locator. Ignore files are not
/// honored here; only the fixed skip lists apply.
pub fn candidate_files(root: &Path) -> Vec<PathBuf> {
    let options = ScanOptions::new(true);
    match walk_paths(root, &options) {
        Ok(paths) => paths
            .into_iter()
            .filter(|path| language_for_path(path).is_some())
            .collect(),
        Err(err) => {
            warn!(root = %root.display(), "candidate walk failed: {err:#}");
            Vec::new()
        }
    }
}

/// Compiled JavaScript files that have a sibling `.map`.
pub fn source_mapped_files(root: &Path) -> Vec<PathBuf> {
    let options = ScanOptions {
        no_ignore: true,
        include: Vec::new(),
        include_build_output: true,
    };
    let paths = match walk_paths(root, &options) {
        Ok(paths) => paths,
        Err(err) => {
            warn!(root = %root.display(), "source map walk failed: {err:#}");
            return Vec::new();
        }
    };
    paths
        .into_iter()
        .filter(|path| {
            let is_js = matches!(
                path.extension().and_then(OsStr::to_str),
                Some("js" | "mjs" | "cjs")
            );
            is_js && map_path_for(path).is_file()
        })
        .collect()
}

pub fn map_path_for(path: &Path) -> PathBuf {
    let mut raw = path.as_os_str().to_owned();
    raw.push(".map");
    PathBuf::from(raw)
}

fn walk_paths(root: &Path, options: &ScanOptions) -> Result<Vec<PathBuf>> {
    let mut builder = WalkBuilder::new(root);
    if options.no_ignore {
        builder
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false);
    } else {
        builder
            .ignore(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .parents(true)
            .require_git(false);
    }
    if !options.include.is_empty() {
        let mut overrides = OverrideBuilder::new(root);
        for glob in &options.include {
            overrides
                .add(glob)
                .with_context(|| format!("invalid include glob {glob}"))?;
        }
        builder.overrides(overrides.build()?);
    }
    let keep_build = options.include_build_output;
    let walker = builder
        .hidden(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| !is_skipped_entry(entry, keep_build))
        .build();

    let mut out = Vec::new();
    for entry in walker {
        let entry = match entry {
            Ok(value) => value,
            Err(err) => {
                debug!("walk error: {err}");
                continue;
            }
        };
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            continue;
        }
        out.push(entry.into_path());
    }
    Ok(out)
}

fn is_skipped_entry(entry: &ignore::DirEntry, keep_build: bool) -> bool {
    if !entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false) {
        return false;
    }
    let name = entry.file_name();
    if name == OsStr::new("node_modules") || name == OsStr::new(".git") {
        return true;
    }
    !keep_build && SKIP_DIRS.iter().any(|dir| name == OsStr::new(dir))
}

pub fn hash_text(text: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

fn hash_file(path: &Path) -> Result<String> {
    let data = fs::read(path).with_context(|| format!("hash {}", path.display()))?;
    let mut hasher = Hasher::new();
    hasher.update(&data);
    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_detection_skips_docs_and_logs() {
        assert_eq!(
            language_for_path(Path::new("src/app.ts")),
            Some(Language::TypeScript)
        );
        assert_eq!(
            language_for_path(Path::new("src/view.tsx")),
            Some(Language::Tsx)
        );
        assert_eq!(
            language_for_path(Path::new("worker.mjs")),
            Some(Language::JavaScript)
        );
        assert_eq!(language_for_path(Path::new("README.md")), None);
        assert_eq!(language_for_path(Path::new("server.log")), None);
    }

    #[test]
    fn candidate_walk_skips_dependencies_and_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(root.join("src/b.ts"), "export const b = 1;").unwrap();
        fs::write(root.join("src/a.ts"), "export const a = 1;").unwrap();
        fs::write(root.join("node_modules/pkg/index.js"), "").unwrap();
        fs::write(root.join("dist/index.js"), "").unwrap();
        fs::write(root.join("notes.md"), "").unwrap();

        let files = candidate_files(root);
        let rels: Vec<String> = files
            .iter()
            .map(|p| crate::util::normalize_rel_path(root, p).unwrap())
            .collect();
        assert_eq!(rels, vec!["src/a.ts".to_string(), "src/b.ts".to_string()]);
    }

    #[test]
    fn include_globs_limit_scan() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::write(root.join("src/index.ts"), "").unwrap();
        fs::write(root.join("scripts/seed.ts"), "").unwrap();

        let options = ScanOptions::new(false).with_include(vec!["src/**".to_string()]);
        let files = scan_project(root, &options).unwrap();
        let rels: Vec<&str> = files.iter().map(|f| f.rel_path.as_str()).collect();
        assert_eq!(rels, vec!["src/index.ts"]);
    }
}
