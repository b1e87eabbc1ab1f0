//! Function expansion: locate a captured function and attach the source of
//! every helper it references, transitively.
//!
//! Each free identifier is resolved in this order:
//! 1. an import binding, followed through the resolver and any re-export
//!    chain of the target module;
//! 2. a top-level declaration in the same file;
//! 3. the language server's `textDocument/definition`, when a registry is
//!    available.
//!
//! Anything left over is reported as unresolved.

use crate::extract::bindings::{collect_bindings, find_binding};
use crate::extract::syntax::{is_function_declaration, is_function_node, node_text, range};
use crate::locate::{self, LocateOptions};
use crate::lsp::LspRegistry;
use crate::model::{
    BindingKind, ContextEntry, Definition, DefinitionType, ExpandedFunction, ImportBinding,
    Position, Range,
};
use crate::resolver::ModuleResolver;
use crate::resolver::packages::{is_bare_specifier, package_name_from_path, split_bare_specifier};
use crate::scan::{self, Language};
use crate::scope::{FreeIdentifier, free_identifiers};
use crate::util::{
    byte_column, display_rel_path, file_uri, is_node_modules_path, uri_to_path, utf16_column,
};
use crate::workspace::SourceParser;
use anyhow::Result;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, warn};
use tree_sitter::{Node, Tree};

pub const THIRD_PARTY_PLACEHOLDER: &str = "#third-party-library-code";

const MAX_REEXPORT_HOPS: usize = 8;

#[derive(Debug, Clone, Default)]
pub struct ExpandOptions {
    pub locate: LocateOptions,
    /// Nested expansion depth; `None` uses the configured default
    pub max_depth: Option<usize>,
}

struct ParsedFile {
    path: PathBuf,
    text: String,
    tree: Tree,
    bindings: Vec<ImportBinding>,
}

/// A declaration found in some file, kept as byte ranges so no syntax node
/// is held across an await.
struct Declaration {
    file: Arc<ParsedFile>,
    name: String,
    statement: (usize, usize),
    kind: DefinitionType,
    function: Option<(usize, usize)>,
}

pub struct Expander<'a> {
    root: PathBuf,
    resolver: Arc<ModuleResolver>,
    lsp: Option<&'a LspRegistry>,
    max_depth: usize,
    parser: SourceParser,
    files: HashMap<PathBuf, Arc<ParsedFile>>,
    visited: HashSet<(PathBuf, String)>,
}

impl<'a> Expander<'a> {
    pub fn new(
        root: &Path,
        resolver: Arc<ModuleResolver>,
        lsp: Option<&'a LspRegistry>,
        max_depth: usize,
    ) -> Result<Self> {
        Ok(Self {
            root: root.to_path_buf(),
            resolver,
            lsp,
            max_depth,
            parser: SourceParser::new()?,
            files: HashMap::new(),
            visited: HashSet::new(),
        })
    }

    pub async fn expand(
        &mut self,
        function_text: &str,
        options: &LocateOptions,
    ) -> Result<Option<ExpandedFunction>> {
        let Some(found) = locate::locate(&self.root, function_text, options).await else {
            let preview: String = function_text.chars().take(100).collect();
            warn!("no source found for function {preview}...");
            return Ok(None);
        };
        let Some(file) = self.load(&found.file) else {
            return Ok(None);
        };
        let context = self
            .context_for(Arc::clone(&file), (found.start_byte, found.end_byte), 1)
            .await;
        Ok(Some(ExpandedFunction {
            file: found.file.clone(),
            start_line: found.location.start_line,
            start_column: found.location.start_column,
            end_line: found.location.end_line,
            end_column: found.location.end_column,
            source: found.text,
            context,
        }))
    }

    fn load(&mut self, path: &Path) -> Option<Arc<ParsedFile>> {
        if let Some(hit) = self.files.get(path) {
            return Some(Arc::clone(hit));
        }
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                debug!(file = %path.display(), "cannot read: {err}");
                return None;
            }
        };
        let language = scan::language_for_path(path).unwrap_or(Language::TypeScript);
        let tree = match self.parser.parse(language, &text) {
            Ok(tree) => tree,
            Err(err) => {
                debug!(file = %path.display(), "cannot parse: {err:#}");
                return None;
            }
        };
        let bindings = collect_bindings(tree.root_node(), &text, path);
        let parsed = Arc::new(ParsedFile {
            path: path.to_path_buf(),
            text,
            tree,
            bindings,
        });
        self.files.insert(path.to_path_buf(), Arc::clone(&parsed));
        Some(parsed)
    }

    fn context_for<'s>(
        &'s mut self,
        file: Arc<ParsedFile>,
        function: (usize, usize),
        depth: usize,
    ) -> Pin<Box<dyn Future<Output = Vec<ContextEntry>> + 's>> {
        Box::pin(async move {
            let identifiers = match node_in_range(&file.tree, function) {
                Some(node) => free_identifiers(node, &file.text),
                None => Vec::new(),
            };
            let mut context = Vec::with_capacity(identifiers.len());
            for identifier in identifiers {
                if let Some(entry) = self.resolve_identifier(&file, &identifier, depth).await {
                    context.push(entry);
                }
            }
            context
        })
    }

    async fn resolve_identifier(
        &mut self,
        file: &Arc<ParsedFile>,
        identifier: &FreeIdentifier,
        depth: usize,
    ) -> Option<ContextEntry> {
        let name = identifier.name.as_str();
        let position = identifier.position;

        if let Some(binding) = find_binding(&file.bindings, name).cloned() {
            if let Some(entry) = self.from_import(file, &binding, position, depth).await {
                return Some(entry);
            }
        } else if let Some(decl) = self.top_level(file, name) {
            return Some(self.entry_for(name, position, decl, depth).await);
        }

        match self.from_language_server(file, identifier, depth).await {
            LspOutcome::Entry(entry) => Some(entry),
            LspOutcome::Global => None,
            LspOutcome::Nothing => {
                debug!(name, file = %file.path.display(), "unresolved identifier");
                Some(ContextEntry::unresolved(name, position))
            }
        }
    }

    async fn from_import(
        &mut self,
        file: &Arc<ParsedFile>,
        binding: &ImportBinding,
        position: Position,
        depth: usize,
    ) -> Option<ContextEntry> {
        let target = match self.resolver.resolve(&binding.specifier, &file.path) {
            Ok(target) => target,
            Err(err) => {
                debug!("{err}");
                if is_bare_specifier(&binding.specifier) {
                    let (package, _) = split_bare_specifier(&binding.specifier);
                    return Some(ContextEntry {
                        package: Some(package),
                        unresolved: false,
                        ..ContextEntry::unresolved(&binding.local, position)
                    });
                }
                return None;
            }
        };
        if is_node_modules_path(&target) {
            return Some(self.third_party(&binding.local, position, &target, zero_range()));
        }
        if binding.kind == BindingKind::Namespace {
            let whole = self.load(&target)?;
            return Some(ContextEntry {
                name: binding.local.clone(),
                kind: DefinitionType::Unknown,
                position,
                definition: Some(Definition {
                    uri: file_uri(&target),
                    file: display_rel_path(&self.root, &target),
                    range: Range {
                        start: Position { line: 0, character: 0 },
                        end: Position {
                            line: u32::MAX,
                            character: u32::MAX,
                        },
                    },
                    text: Some(whole.text.clone()),
                }),
                package: None,
                context: Vec::new(),
                unresolved: false,
            });
        }
        let decl = self.exported(&target, &binding.imported, 0)?;
        Some(self.entry_for(&binding.local, position, decl, depth).await)
    }

    /// Declaration exported as `name` by `path`, following re-exports.
    fn exported(&mut self, path: &Path, name: &str, hops: usize) -> Option<Declaration> {
        if hops > MAX_REEXPORT_HOPS {
            return None;
        }
        let file = self.load(path)?;
        let local = if name == "default" {
            match default_export(&file) {
                DefaultExport::Name(local) => local,
                DefaultExport::Statement(decl) => return Some(decl),
                DefaultExport::None => return self.follow_reexports(&file, name, hops),
            }
        } else {
            local_export_name(&file, name).unwrap_or_else(|| name.to_string())
        };
        if let Some(decl) = self.top_level(&file, &local) {
            return Some(decl);
        }
        // `import { x } from "./y"; export { x };`
        if let Some(binding) = find_binding(&file.bindings, &local).cloned() {
            if binding.kind != BindingKind::Namespace {
                if let Ok(next) = self.resolver.resolve(&binding.specifier, &file.path) {
                    if !is_node_modules_path(&next) {
                        return self.exported(&next, &binding.imported, hops + 1);
                    }
                }
            }
        }
        self.follow_reexports(&file, name, hops)
    }

    fn follow_reexports(&mut self, file: &Arc<ParsedFile>, name: &str, hops: usize) -> Option<Declaration> {
        for binding in file.bindings.iter().filter(|b| b.kind == BindingKind::ReExport) {
            let forwarded = if binding.local == name {
                binding.imported.clone()
            } else if binding.local == "*" && name != "default" {
                name.to_string()
            } else {
                continue;
            };
            let Ok(next) = self.resolver.resolve(&binding.specifier, &file.path) else {
                continue;
            };
            if is_node_modules_path(&next) {
                continue;
            }
            if let Some(decl) = self.exported(&next, &forwarded, hops + 1) {
                return Some(decl);
            }
        }
        None
    }

    fn top_level(&self, file: &Arc<ParsedFile>, name: &str) -> Option<Declaration> {
        let root = file.tree.root_node();
        let mut cursor = root.walk();
        let statements: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
        statements
            .into_iter()
            .find_map(|stmt| declaration_in(file, stmt, name))
    }

    async fn entry_for(
        &mut self,
        name: &str,
        position: Position,
        decl: Declaration,
        depth: usize,
    ) -> ContextEntry {
        let (text, decl_range) = {
            let node = node_in_range(&decl.file.tree, decl.statement);
            let text = decl
                .file
                .text
                .get(decl.statement.0..decl.statement.1)
                .unwrap_or("")
                .to_string();
            (text, node.map(range).unwrap_or_else(zero_range))
        };
        let path = decl.file.path.clone();
        let mut entry = ContextEntry {
            name: name.to_string(),
            kind: decl.kind,
            position,
            definition: Some(Definition {
                uri: file_uri(&path),
                file: display_rel_path(&self.root, &path),
                range: decl_range,
                text: Some(text),
            }),
            package: None,
            context: Vec::new(),
            unresolved: false,
        };
        if let Some(function) = decl.function {
            let first_visit = self.visited.insert((path, decl.name.clone()));
            if first_visit && depth < self.max_depth {
                entry.context = self.context_for(Arc::clone(&decl.file), function, depth + 1).await;
            }
        }
        entry
    }

    fn third_party(&self, name: &str, position: Position, path: &Path, at: Range) -> ContextEntry {
        ContextEntry {
            name: name.to_string(),
            kind: DefinitionType::Unknown,
            position,
            definition: Some(Definition {
                uri: file_uri(path),
                file: display_rel_path(&self.root, path),
                range: at,
                text: Some(THIRD_PARTY_PLACEHOLDER.to_string()),
            }),
            package: package_name_from_path(path),
            context: Vec::new(),
            unresolved: false,
        }
    }

    async fn from_language_server(
        &mut self,
        file: &Arc<ParsedFile>,
        identifier: &FreeIdentifier,
        depth: usize,
    ) -> LspOutcome {
        let Some(registry) = self.lsp else {
            return LspOutcome::Nothing;
        };
        let session = match registry.start(&self.root).await {
            Ok(session) => session,
            Err(err) => {
                warn!("language server unavailable, disabling fallback: {err}");
                self.lsp = None;
                return LspOutcome::Nothing;
            }
        };
        let at = identifier.position;
        let request_at = Position {
            line: at.line,
            character: utf16_column(&file.text, at.line as usize, at.character as usize) as u32,
        };
        let location = match session.definition(&file.path, request_at).await {
            Ok(locations) => locations.into_iter().next(),
            Err(err) => {
                debug!(name = %identifier.name, "definition request failed: {err}");
                None
            }
        };
        let Some(location) = location else {
            return LspOutcome::Nothing;
        };
        let Some(path) = uri_to_path(&location.uri) else {
            return LspOutcome::Nothing;
        };
        if is_node_modules_path(&path) {
            if is_lib_declaration(&path) {
                return LspOutcome::Global;
            }
            return LspOutcome::Entry(self.third_party(
                &identifier.name,
                identifier.position,
                &path,
                location.range,
            ));
        }
        if !path.starts_with(&self.root) && path.to_string_lossy().ends_with(".d.ts") {
            return LspOutcome::Global;
        }
        let Some(target) = self.load(&path) else {
            return LspOutcome::Nothing;
        };
        let start = location.range.start;
        let start = Position {
            line: start.line,
            character: byte_column(&target.text, start.line as usize, start.character as usize) as u32,
        };
        match enclosing_declaration(&target, start) {
            Some(decl) => {
                LspOutcome::Entry(self.entry_for(&identifier.name, identifier.position, decl, depth).await)
            }
            None => LspOutcome::Nothing,
        }
    }
}

/// Declaration file shipped with the compiler or a `@types` package.
fn is_lib_declaration(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".d.ts")
        && package_name_from_path(path)
            .map(|pkg| pkg == "typescript" || pkg.starts_with("@types/"))
            .unwrap_or(false)
}

enum LspOutcome {
    Entry(ContextEntry),
    /// Runtime or lib declaration; not reported
    Global,
    Nothing,
}

enum DefaultExport {
    Name(String),
    Statement(Declaration),
    None,
}

fn default_export(file: &Arc<ParsedFile>) -> DefaultExport {
    let root = file.tree.root_node();
    let mut cursor = root.walk();
    let statements: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
    for stmt in statements {
        if stmt.kind() != "export_statement"
            || !crate::extract::syntax::has_anonymous_child(stmt, "default")
        {
            // `export { x as default }`
            if stmt.kind() == "export_statement" && stmt.child_by_field_name("source").is_none() {
                if let Some(local) = clause_local(stmt, &file.text, "default") {
                    return DefaultExport::Name(local);
                }
            }
            continue;
        }
        if let Some(declaration) = stmt.child_by_field_name("declaration") {
            if let Some(name) = declaration.child_by_field_name("name") {
                return DefaultExport::Name(node_text(name, &file.text));
            }
        }
        if let Some(value) = stmt.child_by_field_name("value") {
            if value.kind() == "identifier" {
                return DefaultExport::Name(node_text(value, &file.text));
            }
        }
        let function = first_function(stmt);
        return DefaultExport::Statement(Declaration {
            file: Arc::clone(file),
            name: "default".to_string(),
            statement: (stmt.start_byte(), stmt.end_byte()),
            kind: if function.is_some() {
                DefinitionType::Function
            } else {
                DefinitionType::Unknown
            },
            function,
        });
    }
    DefaultExport::None
}

/// Local name behind `export { local as exported }` in this file.
fn local_export_name(file: &ParsedFile, exported: &str) -> Option<String> {
    let root = file.tree.root_node();
    let mut cursor = root.walk();
    let statements: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
    statements.into_iter().find_map(|stmt| {
        if stmt.kind() != "export_statement" || stmt.child_by_field_name("source").is_some() {
            return None;
        }
        clause_local(stmt, &file.text, exported)
    })
}

fn clause_local(stmt: Node<'_>, source: &str, exported: &str) -> Option<String> {
    let mut cursor = stmt.walk();
    let clauses: Vec<Node<'_>> = stmt
        .named_children(&mut cursor)
        .filter(|c| c.kind() == "export_clause")
        .collect();
    for clause in clauses {
        let mut spec_cursor = clause.walk();
        let specs: Vec<Node<'_>> = clause.named_children(&mut spec_cursor).collect();
        for spec in specs {
            let Some(local) = spec.child_by_field_name("name") else {
                continue;
            };
            let local = node_text(local, source);
            let alias = spec
                .child_by_field_name("alias")
                .map(|a| node_text(a, source))
                .unwrap_or_else(|| local.clone());
            if alias == exported {
                return Some(local);
            }
        }
    }
    None
}

/// Declaration of `name` made by the top-level statement `stmt`.
fn declaration_in(file: &Arc<ParsedFile>, stmt: Node<'_>, name: &str) -> Option<Declaration> {
    let source = file.text.as_str();
    let inner = if stmt.kind() == "export_statement" {
        stmt.child_by_field_name("declaration")?
    } else {
        stmt
    };
    let make = |kind: DefinitionType, function: Option<(usize, usize)>| Declaration {
        file: Arc::clone(file),
        name: name.to_string(),
        statement: (stmt.start_byte(), stmt.end_byte()),
        kind,
        function,
    };
    let declared = |node: Node<'_>| {
        node.child_by_field_name("name")
            .map(|n| node_text(n, source) == name)
            .unwrap_or(false)
    };
    match inner.kind() {
        kind if is_function_declaration(kind) && declared(inner) => Some(make(
            DefinitionType::Function,
            Some((inner.start_byte(), inner.end_byte())),
        )),
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = inner.walk();
            let declarators: Vec<Node<'_>> = inner.named_children(&mut cursor).collect();
            let declarator = declarators
                .into_iter()
                .find(|d| d.kind() == "variable_declarator" && declared(*d))?;
            let value = declarator
                .child_by_field_name("value")
                .map(crate::extract::syntax::unwrap_expression);
            match value {
                Some(value) if is_function_node(value.kind()) => Some(make(
                    DefinitionType::Function,
                    Some((value.start_byte(), value.end_byte())),
                )),
                _ => Some(make(DefinitionType::Unknown, None)),
            }
        }
        "type_alias_declaration" | "interface_declaration" | "enum_declaration"
            if declared(inner) =>
        {
            Some(make(DefinitionType::Type, None))
        }
        "class_declaration" | "abstract_class_declaration" if declared(inner) => {
            Some(make(DefinitionType::Unknown, None))
        }
        _ => None,
    }
}

/// Top-level declaration whose statement contains `at`.
fn enclosing_declaration(file: &Arc<ParsedFile>, at: Position) -> Option<Declaration> {
    let root = file.tree.root_node();
    let mut cursor = root.walk();
    let statements: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
    let point = tree_sitter::Point {
        row: at.line as usize,
        column: at.character as usize,
    };
    let stmt = statements
        .into_iter()
        .find(|s| s.start_position() <= point && point < s.end_position())?;
    let inner = if stmt.kind() == "export_statement" {
        stmt.child_by_field_name("declaration").unwrap_or(stmt)
    } else {
        stmt
    };
    let name = match inner.child_by_field_name("name") {
        Some(name) => node_text(name, &file.text),
        None => {
            let mut decl_cursor = inner.walk();
            let first = inner
                .named_children(&mut decl_cursor)
                .find(|d| d.kind() == "variable_declarator")?;
            node_text(first.child_by_field_name("name")?, &file.text)
        }
    };
    declaration_in(file, stmt, &name)
}

fn first_function(node: Node<'_>) -> Option<(usize, usize)> {
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
    children
        .into_iter()
        .find(|c| is_function_node(c.kind()) || is_function_declaration(c.kind()))
        .map(|c| (c.start_byte(), c.end_byte()))
}

/// Node spanning exactly `bytes`; a function node wins when several share
/// the range.
fn node_in_range(tree: &Tree, bytes: (usize, usize)) -> Option<Node<'_>> {
    let mut node = tree.root_node().descendant_for_byte_range(bytes.0, bytes.1)?;
    let mut exact = None;
    loop {
        let spans = node.start_byte() == bytes.0 && node.end_byte() == bytes.1;
        if spans && locate::is_function_kind(node.kind()) {
            return Some(node);
        }
        if spans && exact.is_none() {
            exact = Some(node);
        }
        if node.start_byte() < bytes.0 || node.end_byte() > bytes.1 {
            return exact;
        }
        match node.parent() {
            Some(parent) => node = parent,
            None => return exact,
        }
    }
}

fn zero_range() -> Range {
    Range {
        start: Position { line: 0, character: 0 },
        end: Position { line: 0, character: 0 },
    }
}

/// Expand with a private language server registry that is disposed before
/// returning.
pub async fn expand_function_with(
    root: &Path,
    function_text: &str,
    options: &ExpandOptions,
    lsp_enabled: bool,
) -> Result<Option<ExpandedFunction>> {
    let config = crate::config::get();
    let registry =
        lsp_enabled.then(|| LspRegistry::new(crate::lsp::LspSettings::from_config(config)));
    let resolver = Arc::new(ModuleResolver::new(root));
    let max_depth = options.max_depth.unwrap_or(config.max_expand_depth);
    let result = {
        let mut expander = Expander::new(root, resolver, registry.as_ref(), max_depth)?;
        expander.expand(function_text, &options.locate).await
    };
    if let Some(registry) = registry {
        registry.dispose_all().await;
    }
    result
}

pub async fn expand_function(root: &Path, function_text: &str) -> Result<Option<ExpandedFunction>> {
    expand_function_with(
        root,
        function_text,
        &ExpandOptions::default(),
        crate::config::get().lsp_enabled,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(root: &Path, rel: &str, text: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    #[tokio::test]
    async fn expands_same_file_and_imported_helpers() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            root,
            "src/util.ts",
            "export const GREETING = \"hi\";\nexport function shout(s: string) {\n  return s.toUpperCase() + SUFFIX;\n}\nconst SUFFIX = \"!\";\n",
        );
        write(
            root,
            "src/index.ts",
            "import { shout } from \"./util\";\nconst prefix = \"> \";\nexport const handler = (c) => c.text(prefix + shout(\"x\"));\n",
        );
        let resolver = Arc::new(ModuleResolver::new(root));
        let mut expander = Expander::new(root, resolver, None, 5).unwrap();
        let options = LocateOptions {
            skip_source_map: true,
            ..LocateOptions::default()
        };
        let expanded = expander
            .expand("(c) => c.text(prefix + shout(\"x\"))", &options)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(expanded.file, root.join("src/index.ts"));
        let names: Vec<&str> = expanded.context.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["prefix", "shout"]);

        let shout = expanded.find("shout").unwrap();
        assert_eq!(shout.kind, DefinitionType::Function);
        let text = shout.definition.as_ref().unwrap().text.as_deref().unwrap();
        assert!(text.starts_with("export function shout"));
        assert_eq!(shout.context.len(), 1);
        assert_eq!(shout.context[0].name, "SUFFIX");
    }

    #[tokio::test]
    async fn unknown_names_are_unresolved_without_lsp() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/a.ts", "export function run() { return mystery(1); }\n");
        let resolver = Arc::new(ModuleResolver::new(root));
        let mut expander = Expander::new(root, resolver, None, 5).unwrap();
        let expanded = expander
            .expand("function run() { return mystery(1); }", &LocateOptions {
                skip_source_map: true,
                ..LocateOptions::default()
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(expanded.unresolved_names(), vec!["mystery"]);
    }
}
