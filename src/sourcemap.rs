//! Source-map assisted function search.
//!
//! A function captured from compiled output is first found in the compiled
//! `.js` file, its start is mapped back through the sibling `.js.map`, and
//! the function at the mapped position of the original source is returned.

use crate::extract::syntax::span;
use crate::locate::{self, FoundFunction, is_function_kind, normalize};
use crate::model::FunctionLocation;
use crate::scan::{self, Language};
use crate::util::{clean_path, uri_to_path};
use crate::workspace::SourceParser;
use anyhow::{Context, Result, anyhow};
use oxc_sourcemap::SourceMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use tree_sitter::{Node, Point};

/// Original-source span of a compiled function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFunction {
    pub source: PathBuf,
    /// 0-based line and column of the mapped start
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub content: String,
}

impl MappedFunction {
    /// Original text from the mapped start to the end of the mapped end line.
    pub fn text(&self) -> String {
        let mut out = Vec::new();
        for (idx, line) in self.content.lines().enumerate() {
            let idx = idx as u32;
            if idx < self.line {
                continue;
            }
            if idx > self.end_line {
                break;
            }
            if idx == self.line {
                out.push(line.chars().skip(self.column as usize).collect::<String>());
            } else {
                out.push(line.to_string());
            }
        }
        out.join("\n")
    }
}

pub fn locate_via_source_maps(root: &Path, function_text: &str) -> Result<Option<FoundFunction>> {
    let search = normalize(function_text);
    if search.is_empty() {
        return Ok(None);
    }
    let mut parser = SourceParser::new()?;
    for compiled in scan::source_mapped_files(root) {
        let found = match locate::search_file(&mut parser, &compiled, &search) {
            Ok(Some(found)) => found,
            Ok(None) => continue,
            Err(err) => {
                debug!(file = %compiled.display(), "skip compiled file: {err:#}");
                continue;
            }
        };
        let mapped = match map_back(&compiled, &found) {
            Ok(Some(mapped)) => mapped,
            Ok(None) => continue,
            Err(err) => {
                debug!(file = %compiled.display(), "unusable source map: {err:#}");
                continue;
            }
        };
        debug!(
            compiled = %compiled.display(),
            source = %mapped.source.display(),
            line = mapped.line,
            "mapped compiled function"
        );
        if let Some(hit) = function_at(&mut parser, &mapped)? {
            return Ok(Some(hit));
        }
        if let Some(hit) = locate::locate_direct(root, &mapped.text())? {
            return Ok(Some(hit));
        }
    }
    Ok(None)
}

/// Map the start and end of a function found in `compiled` to its source.
pub fn map_back(compiled: &Path, found: &FoundFunction) -> Result<Option<MappedFunction>> {
    let map_path = scan::map_path_for(compiled);
    let raw = fs::read_to_string(&map_path)
        .with_context(|| format!("read {}", map_path.display()))?;
    let map = SourceMap::from_json_string(&raw)
        .map_err(|err| anyhow!("parse {}: {err:?}", map_path.display()))?;

    let start_line = (found.location.start_line - 1) as u32;
    let start_col = (found.location.start_column - 1) as u32;
    let end_line = (found.location.end_line - 1) as u32;
    let end_col = (found.location.end_column - 1) as u32;

    let Some((source_id, line, column)) = original_position(&map, start_line, start_col) else {
        return Ok(None);
    };
    let end_line = original_position(&map, end_line, end_col)
        .filter(|(id, _, _)| *id == source_id)
        .map(|(_, line, _)| line)
        .unwrap_or(line)
        .max(line);

    let Some(name) = map.get_source(source_id).map(|s| s.to_string()) else {
        return Ok(None);
    };
    let map_dir = map_path.parent().unwrap_or(Path::new("/"));
    let source = source_path(map_dir, &name);
    let content = match map.get_source_content(source_id).map(|s| s.to_string()) {
        Some(content) => content,
        None => fs::read_to_string(&source)
            .with_context(|| format!("read mapped source {}", source.display()))?,
    };
    Ok(Some(MappedFunction {
        source,
        line,
        column,
        end_line,
        content,
    }))
}

/// Greatest mapped token at or before the generated position.
fn original_position(map: &SourceMap, line: u32, column: u32) -> Option<(u32, u32, u32)> {
    let mut best: Option<((u32, u32), (u32, u32, u32))> = None;
    for token in map.get_tokens() {
        let Some(source_id) = token.get_source_id() else {
            continue;
        };
        let generated = (token.get_dst_line(), token.get_dst_col());
        if generated > (line, column) {
            continue;
        }
        if best.map(|(at, _)| generated >= at).unwrap_or(true) {
            best = Some((
                generated,
                (source_id, token.get_src_line(), token.get_src_col()),
            ));
        }
    }
    best.map(|(_, original)| original)
}

fn source_path(map_dir: &Path, name: &str) -> PathBuf {
    if name.starts_with("file://") {
        if let Some(path) = uri_to_path(name) {
            return path;
        }
    }
    let name = name
        .strip_prefix("webpack://")
        .map(|rest| rest.trim_start_matches(|c: char| c != '/').trim_start_matches('/'))
        .unwrap_or(name);
    clean_path(&map_dir.join(name))
}

/// Function node starting at the mapped position, or the smallest one
/// enclosing it.
fn function_at(parser: &mut SourceParser, mapped: &MappedFunction) -> Result<Option<FoundFunction>> {
    let language = scan::language_for_path(&mapped.source).unwrap_or(Language::TypeScript);
    let tree = parser.parse(language, &mapped.content)?;
    let point = Point {
        row: mapped.line as usize,
        column: mapped.column as usize,
    };
    let mut best: Option<Node<'_>> = None;
    collect_enclosing(tree.root_node(), point, &mut best);
    let Some(node) = best else {
        return Ok(None);
    };
    let node_span = span(node);
    Ok(Some(FoundFunction {
        file: mapped.source.clone(),
        start_byte: node.start_byte(),
        end_byte: node.end_byte(),
        location: FunctionLocation {
            file: mapped.source.clone(),
            start_line: node_span.start_line,
            start_column: node_span.start_column,
            end_line: node_span.end_line,
            end_column: node_span.end_column,
        },
        text: mapped
            .content
            .get(node.start_byte()..node.end_byte())
            .unwrap_or("")
            .to_string(),
    }))
}

fn collect_enclosing<'t>(node: Node<'t>, point: Point, best: &mut Option<Node<'t>>) {
    if node.start_position() > point || node.end_position() <= point {
        return;
    }
    if is_function_kind(node.kind()) {
        *best = Some(node);
        if node.start_position() == point {
            return;
        }
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children {
        collect_enclosing(child, point, best);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_slices_from_mapped_column() {
        let mapped = MappedFunction {
            source: PathBuf::from("/p/src/a.ts"),
            line: 1,
            column: 4,
            end_line: 2,
            content: "line0\nabc def\nghi\nlast".to_string(),
        };
        assert_eq!(mapped.text(), "def\nghi");
    }

    #[test]
    fn maps_compiled_arrow_to_typed_source() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("dist")).unwrap();
        fs::write(
            root.join("src/handler.ts"),
            "import type { Context } from \"hono\";\n\nexport const handler = (c: Context) => c.text(\"hi\");\n",
        )
        .unwrap();
        fs::write(
            root.join("dist/handler.js"),
            "export const handler = (c) => c.text(\"hi\");\n",
        )
        .unwrap();
        fs::write(
            root.join("dist/handler.js.map"),
            r#"{"version":3,"sources":["../src/handler.ts"],"names":[],"mappings":"AAEA,uBAAuB"}"#,
        )
        .unwrap();

        let found = locate_via_source_maps(root, "(c) => c.text(\"hi\")")
            .unwrap()
            .unwrap();
        assert_eq!(found.file, root.join("src/handler.ts"));
        assert_eq!(found.location.start_line, 3);
        assert_eq!(found.location.start_column, 24);
        assert_eq!(found.text, "(c: Context) => c.text(\"hi\")");
    }
}
