//! Find the source node of a function captured as text at runtime.

use crate::extract::syntax::span;
use crate::model::FunctionLocation;
use crate::scan::{self, Language};
use crate::sourcemap;
use crate::util::collapse_whitespace;
use crate::workspace::SourceParser;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use tree_sitter::Node;

/// Below this length a search text must equal a node; above it, being
/// contained in one is enough.
const CONTAINMENT_MIN_LEN: usize = 25;

const FUNCTION_KINDS: &[&str] = &[
    "function_declaration",
    "generator_function_declaration",
    "function_expression",
    "function",
    "generator_function",
    "arrow_function",
    "method_definition",
];

#[derive(Debug, Clone, Default)]
pub struct Hints {
    /// Original TypeScript text of the function
    pub source_function: Option<String>,
    /// File expected to contain it, absolute or relative to the root
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocateOptions {
    pub skip_source_map: bool,
    pub hints: Hints,
}

/// A located function with enough information to analyze it further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundFunction {
    pub file: PathBuf,
    pub start_byte: usize,
    pub end_byte: usize,
    pub location: FunctionLocation,
    /// Verbatim node text
    pub text: String,
}

/// Collapse whitespace runs, trim, and drop one leading `async `.
pub fn normalize(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    match collapsed.strip_prefix("async ") {
        Some(rest) => rest.to_string(),
        None => collapsed,
    }
}

pub fn is_function_kind(kind: &str) -> bool {
    FUNCTION_KINDS.contains(&kind)
}

fn matches(node_text: &str, search: &str) -> bool {
    node_text == search || (search.len() > CONTAINMENT_MIN_LEN && node_text.contains(search))
}

/// First function node in `source` matching `search` (already normalized),
/// in pre-order.
pub fn find_in_tree<'t>(root: Node<'t>, source: &str, search: &str) -> Option<Node<'t>> {
    if is_function_kind(root.kind()) {
        let text = source.get(root.start_byte()..root.end_byte()).unwrap_or("");
        if matches(&normalize(text), search) {
            // A containment hit on an outer function may hide an exact inner one.
            let mut cursor = root.walk();
            let children: Vec<Node<'t>> = root.named_children(&mut cursor).collect();
            for child in children {
                if let Some(inner) = find_in_tree(child, source, search) {
                    return Some(inner);
                }
            }
            return Some(root);
        }
    }
    let mut cursor = root.walk();
    let children: Vec<Node<'t>> = root.named_children(&mut cursor).collect();
    children
        .into_iter()
        .find_map(|child| find_in_tree(child, source, search))
}

pub fn search_source(
    parser: &mut SourceParser,
    path: &Path,
    source: &str,
    language: Language,
    search: &str,
) -> Result<Option<FoundFunction>> {
    let tree = parser.parse(language, source)?;
    let Some(node) = find_in_tree(tree.root_node(), source, search) else {
        return Ok(None);
    };
    let node_span = span(node);
    Ok(Some(FoundFunction {
        file: path.to_path_buf(),
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        location: FunctionLocation {
            file: path.to_path_buf(),
            start_line: node_span.start_line,
            start_column: node_span.start_column,
            end_line: node_span.end_line,
            end_column: node_span.end_column,
        },
        text: source
            .get(node.start_byte()..node.end_byte())
            .unwrap_or("")
            .to_string(),
    }))
}

pub fn search_file(
    parser: &mut SourceParser,
    path: &Path,
    search: &str,
) -> Result<Option<FoundFunction>> {
    let Some(language) = scan::language_for_path(path) else {
        return Ok(None);
    };
    let source = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    search_source(parser, path, &source, language, search)
}

/// Walk every candidate file under `root` in sorted order.
pub fn locate_direct(root: &Path, function_text: &str) -> Result<Option<FoundFunction>> {
    let search = normalize(function_text);
    if search.is_empty() {
        return Ok(None);
    }
    let mut parser = SourceParser::new()?;
    for path in scan::candidate_files(root) {
        match search_file(&mut parser, &path, &search) {
            Ok(Some(found)) => return Ok(Some(found)),
            Ok(None) => {}
            Err(err) => debug!(file = %path.display(), "skip file: {err:#}"),
        }
    }
    Ok(None)
}

fn locate_hinted(root: &Path, hints: &Hints) -> Option<FoundFunction> {
    let text = hints.source_function.as_deref()?;
    let search = normalize(text);
    let mut parser = SourceParser::new().ok()?;
    if let Some(file) = hints.source_file.as_deref() {
        let path = if Path::new(file).is_absolute() {
            PathBuf::from(file)
        } else {
            root.join(file)
        };
        match search_file(&mut parser, &path, &search) {
            Ok(Some(found)) => return Some(found),
            Ok(None) => {}
            Err(err) => debug!(file = %path.display(), "hinted file unreadable: {err:#}"),
        }
    }
    locate_direct(root, text).ok().flatten()
}

/// Locate `function_text` under `root`. The direct search and the
/// source-mapped search run concurrently; the first hit wins.
pub async fn locate(
    root: &Path,
    function_text: &str,
    options: &LocateOptions,
) -> Option<FoundFunction> {
    if options.hints.source_function.is_some() {
        let root = root.to_path_buf();
        let hints = options.hints.clone();
        let hinted = tokio::task::spawn_blocking(move || locate_hinted(&root, &hints))
            .await
            .ok()
            .flatten();
        if hinted.is_some() {
            return hinted;
        }
    }

    let direct = {
        let root = root.to_path_buf();
        let text = function_text.to_string();
        tokio::task::spawn_blocking(move || locate_direct(&root, &text))
    };
    if options.skip_source_map {
        return settle(direct.await);
    }
    let mapped = {
        let root = root.to_path_buf();
        let text = function_text.to_string();
        tokio::task::spawn_blocking(move || sourcemap::locate_via_source_maps(&root, &text))
    };
    race(direct, mapped).await
}

type SearchTask = tokio::task::JoinHandle<Result<Option<FoundFunction>>>;

async fn race(mut direct: SearchTask, mut mapped: SearchTask) -> Option<FoundFunction> {
    tokio::select! {
        first = &mut direct => match settle(first) {
            Some(found) => {
                mapped.abort();
                Some(found)
            }
            None => settle(mapped.await),
        },
        first = &mut mapped => match settle(first) {
            Some(found) => {
                direct.abort();
                Some(found)
            }
            None => settle(direct.await),
        },
    }
}

fn settle(
    joined: std::result::Result<Result<Option<FoundFunction>>, tokio::task::JoinError>,
) -> Option<FoundFunction> {
    match joined {
        Ok(Ok(found)) => found,
        Ok(Err(err)) => {
            warn!("function search failed: {err:#}");
            None
        }
        Err(err) => {
            debug!("function search task ended: {err}");
            None
        }
    }
}

pub async fn locate_function(root: &Path, function_text: &str) -> Option<FunctionLocation> {
    locate(root, function_text, &LocateOptions::default())
        .await
        .map(|found| found.location)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_async_and_whitespace() {
        assert_eq!(normalize("  async (c) =>\n   c.text('x') "), "(c) => c.text('x')");
        assert_eq!(normalize("function  f() {}"), "function f() {}");
    }

    #[test]
    fn finds_async_arrow_without_keyword() {
        let source = "app.get('/', async (c) => {\n  return c.text('hello');\n});\n";
        let mut parser = SourceParser::new().unwrap();
        let found = search_source(
            &mut parser,
            Path::new("/p/index.ts"),
            source,
            Language::TypeScript,
            &normalize("(c) => { return c.text('hello'); }"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(found.location.start_line, 1);
        assert_eq!(found.location.start_column, 14);
        assert_eq!(found.location.end_line, 3);
        assert!(found.text.starts_with("async (c)"));
    }

    #[test]
    fn containment_needs_long_search_text() {
        let source = "function outer() { const inner = 1; return inner + 41; }";
        let mut parser = SourceParser::new().unwrap();
        let short = search_source(
            &mut parser,
            Path::new("/p/a.ts"),
            source,
            Language::TypeScript,
            "return inner",
        )
        .unwrap();
        assert!(short.is_none());
        let long = search_source(
            &mut parser,
            Path::new("/p/a.ts"),
            source,
            Language::TypeScript,
            "const inner = 1; return inner + 41;",
        )
        .unwrap();
        assert_eq!(long.map(|f| f.start_byte), Some(0));
    }
}
