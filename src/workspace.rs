use crate::scan::{self, Language, ScanOptions};
use crate::util;
use anyhow::{Context, Result, anyhow};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use tree_sitter::{Parser, Tree};

/// One tracked file: text and tree always belong together and are replaced
/// as a unit.
#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub rel_path: String,
    pub text: String,
    pub tree: Tree,
    pub language: Language,
    pub version: u64,
    pub hash: String,
}

impl SourceFile {
    pub fn root(&self) -> tree_sitter::Node<'_> {
        self.tree.root_node()
    }
}

/// One parser per grammar.
pub struct SourceParser {
    javascript: Parser,
    typescript: Parser,
    tsx: Parser,
}

impl SourceParser {
    pub fn new() -> Result<Self> {
        let mut javascript = Parser::new();
        javascript
            .set_language(&tree_sitter_javascript::LANGUAGE.into())
            .map_err(|err| anyhow!("load javascript grammar: {err}"))?;
        let mut typescript = Parser::new();
        typescript
            .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
            .map_err(|err| anyhow!("load typescript grammar: {err}"))?;
        let mut tsx = Parser::new();
        tsx.set_language(&tree_sitter_typescript::LANGUAGE_TSX.into())
            .map_err(|err| anyhow!("load tsx grammar: {err}"))?;
        Ok(Self {
            javascript,
            typescript,
            tsx,
        })
    }

    pub fn parse(&mut self, language: Language, text: &str) -> Result<Tree> {
        let parser = match language {
            Language::JavaScript => &mut self.javascript,
            Language::TypeScript => &mut self.typescript,
            Language::Tsx => &mut self.tsx,
        };
        parser
            .parse(text, None)
            .ok_or_else(|| anyhow!("parse failed ({})", language.name()))
    }

    /// Parse a file that is not part of the tracked set.
    pub fn parse_file(&mut self, root: &Path, path: &Path) -> Result<SourceFile> {
        let language = scan::language_for_path(path)
            .ok_or_else(|| anyhow!("unsupported file type {}", path.display()))?;
        let text = util::read_to_string(path)?;
        self.parse_text(root, path, text, language, 1)
    }

    pub fn parse_text(
        &mut self,
        root: &Path,
        path: &Path,
        text: String,
        language: Language,
        version: u64,
    ) -> Result<SourceFile> {
        let tree = self
            .parse(language, &text)
            .with_context(|| format!("parse {}", path.display()))?;
        Ok(SourceFile {
            path: path.to_path_buf(),
            rel_path: util::display_rel_path(root, path),
            hash: scan::hash_text(&text),
            text,
            tree,
            language,
            version,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Added,
    Modified,
    Unchanged,
    Removed,
}

/// In-memory text and syntax trees for every tracked file. Only the watcher
/// mutates it; analysis passes read snapshots.
pub struct WorkspaceStore {
    root: PathBuf,
    files: BTreeMap<PathBuf, Arc<SourceFile>>,
    parser: SourceParser,
}

impl WorkspaceStore {
    pub fn new(root: &Path) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            files: BTreeMap::new(),
            parser: SourceParser::new()?,
        })
    }

    pub fn load(root: &Path, options: &ScanOptions) -> Result<Self> {
        let mut store = Self::new(root)?;
        for scanned in scan::scan_project(root, options)? {
            if let Err(err) = store.upsert(&scanned.abs_path) {
                warn!(file = %scanned.rel_path, "skip file: {err:#}");
            }
        }
        debug!(files = store.files.len(), "workspace loaded");
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, path: &Path) -> Option<Arc<SourceFile>> {
        self.files.get(path).cloned()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    /// Files in path order.
    pub fn files(&self) -> impl Iterator<Item = &Arc<SourceFile>> {
        self.files.values()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }

    /// Re-read `path` from disk. A missing file is treated as a removal.
    pub fn upsert(&mut self, path: &Path) -> Result<Change> {
        if !path.is_file() {
            return Ok(if self.remove(path) {
                Change::Removed
            } else {
                Change::Unchanged
            });
        }
        let text = util::read_to_string(path)?;
        self.upsert_text(path, text)
    }

    pub fn upsert_text(&mut self, path: &Path, text: String) -> Result<Change> {
        let language = scan::language_for_path(path)
            .ok_or_else(|| anyhow!("unsupported file type {}", path.display()))?;
        let hash = scan::hash_text(&text);
        let (version, change) = match self.files.get(path) {
            Some(existing) if existing.hash == hash => return Ok(Change::Unchanged),
            Some(existing) => (existing.version + 1, Change::Modified),
            None => (1, Change::Added),
        };
        let file = self
            .parser
            .parse_text(&self.root, path, text, language, version)?;
        self.files.insert(path.to_path_buf(), Arc::new(file));
        Ok(change)
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        self.files.remove(path).is_some()
    }

    /// Tracked file, or a freshly parsed untracked one.
    pub fn get_or_parse(&mut self, path: &Path) -> Option<Arc<SourceFile>> {
        if let Some(file) = self.files.get(path) {
            return Some(file.clone());
        }
        match self.parser.parse_file(&self.root, path) {
            Ok(file) => Some(Arc::new(file)),
            Err(err) => {
                debug!(file = %path.display(), "parse untracked file failed: {err:#}");
                None
            }
        }
    }
}
