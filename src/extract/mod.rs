//! Per-file route extraction.
//!
//! Each file yields a [`FileContribution`]: the routers it declares, their
//! registrations in source order, the mounts between routers, and the names
//! it exports. Cross-file linking happens in [`crate::graph`].

pub mod bindings;
pub mod classify;
pub mod syntax;

use crate::error::NodeTypeNotSupportedError;
use crate::http;
use crate::model::{HandlerKind, HandlerRef, ImportBinding, Resource, ResourceKind};
use crate::workspace::SourceFile;
use bindings::find_binding;
use classify::{Classifier, NodeClass, method_for};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use syntax::{
    call_arguments, call_target_node, enclosing_scope, has_anonymous_child, is_function_node,
    member_object_and_property, node_str, node_text, object_property_node, object_property_string,
    span, string_value, unwrap_expression,
};
use tracing::{debug, warn};
use tree_sitter::Node;

const MAX_CONST_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouterKey {
    pub file: PathBuf,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountTarget {
    Router(RouterKey),
    /// Name exported by another module, resolved by the graph
    Import { specifier: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDraft {
    pub id: String,
    pub method: String,
    pub path: String,
    pub kind: ResourceKind,
    pub handler: HandlerRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDraft {
    pub prefix: String,
    pub target: MountTarget,
    pub line: usize,
    pub column: usize,
    pub text: String,
    /// Mount created for `const app = factory()`; silently dropped when the
    /// factory turns out not to return a router.
    pub implicit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryItem {
    Resource(ResourceDraft),
    Mount(MountDraft),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterDecl {
    pub key: RouterKey,
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Declared as `const x = factory()`: only a router if the factory is.
    pub from_factory: bool,
    pub entries: Vec<EntryItem>,
}

#[derive(Debug, Clone, Default)]
pub struct FileContribution {
    pub file: PathBuf,
    pub rel_path: String,
    pub version: u64,
    pub routers: Vec<RouterDecl>,
    pub exports: BTreeMap<String, MountTarget>,
    pub bindings: Vec<ImportBinding>,
    pub errors: Vec<NodeTypeNotSupportedError>,
}

impl FileContribution {
    pub fn router(&self, key: &RouterKey) -> Option<&RouterDecl> {
        self.routers.iter().find(|router| &router.key == key)
    }

    pub fn resource_count(&self) -> usize {
        self.routers
            .iter()
            .flat_map(|router| router.entries.iter())
            .filter(|entry| matches!(entry, EntryItem::Resource(_)))
            .count()
    }
}

/// Router reference as seen from a use site: which router, and the base path
/// accumulated through `basePath` aliases.
#[derive(Debug, Clone)]
struct Handle {
    router: usize,
    base: String,
}

struct NameBinding {
    name: String,
    scope: (usize, usize),
    handle: Handle,
}

pub fn extract_file(file: &SourceFile) -> FileContribution {
    let bindings = bindings::collect_bindings(file.root(), &file.text, &file.path);
    extract_contribution(file, bindings)
}

/// Resources of a single file, with mounts between its own routers composed.
/// Imported sub-routers are left out; the route graph links those.
pub fn extract_resources(file: &SourceFile, bindings: &[ImportBinding]) -> Vec<Resource> {
    let contribution = extract_contribution(file, bindings.to_vec());
    let root = file.path.parent().unwrap_or(std::path::Path::new("/"));
    let mut graph = crate::graph::RouteGraph::new(root);
    graph.replace_file(contribution);
    graph.analyze().resources
}

pub fn extract_contribution(file: &SourceFile, bindings: Vec<ImportBinding>) -> FileContribution {
    let mut extraction = Extraction::new(file, &bindings);
    let root = file.root();
    extraction.collect_constants(root);
    extraction.collect_constructions(root);
    extraction.collect_factories(root);
    extraction.collect_aliases(root);
    extraction.collect_registrations(root);
    extraction.collect_exports(root);
    let Extraction {
        routers, exports, errors, ..
    } = extraction;
    FileContribution {
        file: file.path.clone(),
        rel_path: file.rel_path.clone(),
        version: file.version,
        routers,
        exports,
        bindings,
        errors,
    }
}

struct Extraction<'a> {
    file: &'a SourceFile,
    source: &'a str,
    bindings: &'a [ImportBinding],
    classifier: Classifier<'a>,
    routers: Vec<RouterDecl>,
    names: Vec<NameBinding>,
    /// construction or factory-call start byte -> owning router
    owners: HashMap<usize, usize>,
    factories: HashMap<String, Handle>,
    constants: HashMap<String, Node<'a>>,
    exports: BTreeMap<String, MountTarget>,
    errors: Vec<NodeTypeNotSupportedError>,
}

impl<'a> Extraction<'a> {
    fn new(file: &'a SourceFile, bindings: &'a [ImportBinding]) -> Self {
        Self {
            file,
            source: &file.text,
            bindings,
            classifier: Classifier::new(bindings, &file.text),
            routers: Vec::new(),
            names: Vec::new(),
            owners: HashMap::new(),
            factories: HashMap::new(),
            constants: HashMap::new(),
            exports: BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    fn unsupported(&mut self, node: Node<'_>, kind: &str) {
        let pos = node.start_position();
        let text = crate::util::truncate_str_bytes(&node_text(node, self.source), 200);
        warn!(
            file = %self.file.rel_path,
            line = pos.row + 1,
            kind,
            "unsupported route construct"
        );
        self.errors.push(NodeTypeNotSupportedError {
            file: self.file.rel_path.clone(),
            line: pos.row + 1,
            column: pos.column + 1,
            kind: kind.to_string(),
            text,
        });
    }

    fn lookup(&self, name: &str, at: usize) -> Option<Handle> {
        self.names
            .iter()
            .filter(|b| b.name == name && b.scope.0 <= at && at <= b.scope.1)
            .min_by_key(|b| b.scope.1 - b.scope.0)
            .map(|b| b.handle.clone())
    }

    fn new_router(&mut self, name: String, node: Node<'_>, from_factory: bool) -> usize {
        let pos = node.start_position();
        self.routers.push(RouterDecl {
            key: RouterKey {
                file: self.file.path.clone(),
                offset: node.start_byte(),
            },
            name,
            line: pos.row + 1,
            column: pos.column + 1,
            from_factory,
            entries: Vec::new(),
        });
        self.routers.len() - 1
    }

    fn bind_name(&mut self, name: String, at: Node<'_>, handle: Handle) {
        let scope = enclosing_scope(at);
        self.names.push(NameBinding {
            name,
            scope,
            handle,
        });
    }

    // Pass 0: `const NAME = <value>` anywhere in the file, for path constants
    // and `createRoute` definitions.
    fn collect_constants(&mut self, root: Node<'a>) {
        visit(root, &mut |node| {
            if node.kind() != "variable_declarator" {
                return;
            }
            let (Some(name), Some(value)) = (
                node.child_by_field_name("name"),
                node.child_by_field_name("value"),
            ) else {
                return;
            };
            if name.kind() == "identifier" {
                self.constants
                    .entry(node_text(name, self.source))
                    .or_insert(unwrap_expression(value));
            }
        });
    }

    // Pass 1: every router construction, named by its declarator when it has one.
    fn collect_constructions(&mut self, root: Node<'a>) {
        let mut found: Vec<(Node<'a>, Option<Node<'a>>)> = Vec::new();
        visit(root, &mut |node| {
            if node.kind() == "variable_declarator" {
                if let Some(value) = node.child_by_field_name("value") {
                    let chain_root = chain_root(unwrap_expression(value));
                    if chain_root.kind() == "new_expression"
                        && matches!(
                            self.classifier.classify(chain_root),
                            NodeClass::RouterConstruction
                        )
                    {
                        found.push((chain_root, Some(node)));
                    }
                }
            } else if node.kind() == "new_expression"
                && matches!(self.classifier.classify(node), NodeClass::RouterConstruction)
            {
                found.push((node, None));
            }
        });

        for (construction, declarator) in found {
            if self.owners.contains_key(&construction.start_byte()) {
                continue;
            }
            let idx = match declarator {
                Some(decl) => {
                    let name_node = decl.child_by_field_name("name");
                    let name = name_node
                        .map(|n| node_text(n, self.source))
                        .unwrap_or_else(|| "<anonymous>".to_string());
                    let idx = self.new_router(name.clone(), decl, false);
                    if let Some(value) = decl.child_by_field_name("value") {
                        let base = self.chain_base(unwrap_expression(value));
                        self.bind_name(name, decl, Handle { router: idx, base });
                    }
                    idx
                }
                None => {
                    let idx = self.new_router("<anonymous>".to_string(), construction, false);
                    if is_default_export_value(construction) {
                        self.exports.insert(
                            "default".to_string(),
                            MountTarget::Router(self.routers[idx].key.clone()),
                        );
                    }
                    idx
                }
            };
            self.owners.insert(construction.start_byte(), idx);
        }
    }

    /// Concatenated `basePath` arguments along a declarator's call chain.
    fn chain_base(&self, value: Node<'_>) -> String {
        let mut base = String::new();
        for call in chain_calls(value) {
            if let NodeClass::BasePathCall { .. } = self.classifier.classify(call) {
                if let Some(arg) = call_arguments(call).into_iter().next() {
                    if let Some(path) = self.static_string(arg, 0) {
                        base = join_base(&base, &path);
                    }
                }
            }
        }
        base
    }

    // Pass 2: functions that build and return a router.
    fn collect_factories(&mut self, root: Node<'a>) {
        let mut candidates: Vec<(String, Node<'a>)> = Vec::new();
        visit(root, &mut |node| match node.kind() {
            "function_declaration" | "generator_function_declaration" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source));
                if let Some(name) = name {
                    candidates.push((name, node));
                }
            }
            "variable_declarator" => {
                let (Some(name), Some(value)) = (
                    node.child_by_field_name("name"),
                    node.child_by_field_name("value"),
                ) else {
                    return;
                };
                if name.kind() == "identifier" && is_function_node(value.kind()) {
                    candidates.push((node_text(name, self.source), value));
                }
            }
            "function" | "function_expression" | "arrow_function" => {
                if is_default_export_value(node) {
                    candidates.push(("default".to_string(), node));
                }
            }
            _ => {}
        });

        for (name, function) in candidates {
            let Some(handle) = self.returned_router(function) else {
                continue;
            };
            debug!(file = %self.file.rel_path, factory = %name, "router factory");
            if is_default_export_value(function)
                || function
                    .parent()
                    .map(|p| p.kind() == "export_statement" && has_anonymous_child(p, "default"))
                    .unwrap_or(false)
            {
                self.exports.insert(
                    "default".to_string(),
                    MountTarget::Router(self.routers[handle.router].key.clone()),
                );
            }
            self.factories.insert(name, handle);
        }
    }

    fn returned_router(&self, function: Node<'_>) -> Option<Handle> {
        let body = function.child_by_field_name("body")?;
        if body.kind() != "statement_block" {
            // Concise arrow body: `() => new Hono()`
            return self.router_of_expression(unwrap_expression(body));
        }
        let mut result = None;
        visit_shallow(body, &mut |node| {
            if result.is_some() || node.kind() != "return_statement" {
                return;
            }
            if let Some(expr) = node.named_child(0) {
                result = self.router_of_expression(unwrap_expression(expr));
            }
        });
        result
    }

    fn router_of_expression(&self, expr: Node<'_>) -> Option<Handle> {
        let root = chain_root(expr);
        match root.kind() {
            "identifier" => self.lookup(&node_text(root, self.source), root.start_byte()),
            "new_expression" => self.owners.get(&root.start_byte()).map(|idx| Handle {
                router: *idx,
                base: String::new(),
            }),
            _ => None,
        }
    }

    // Pass 3: `const v1 = app.basePath("/v1")` aliases and
    // `const app = createApp()` factory results, in source order.
    fn collect_aliases(&mut self, root: Node<'a>) {
        let mut declarators: Vec<Node<'a>> = Vec::new();
        visit(root, &mut |node| {
            if node.kind() == "variable_declarator" {
                declarators.push(node);
            }
        });
        for decl in declarators {
            let (Some(name_node), Some(value)) = (
                decl.child_by_field_name("name"),
                decl.child_by_field_name("value"),
            ) else {
                continue;
            };
            if name_node.kind() != "identifier" {
                continue;
            }
            let name = node_text(name_node, self.source);
            let value = unwrap_expression(value);
            let root_node = chain_root(value);
            match root_node.kind() {
                "identifier" if !chain_calls(value).is_empty() => {
                    let Some(handle) = self.lookup(&node_text(root_node, self.source), root_node.start_byte())
                    else {
                        continue;
                    };
                    let base = join_base(&handle.base, &self.chain_base(value));
                    self.bind_name(
                        name,
                        decl,
                        Handle {
                            router: handle.router,
                            base,
                        },
                    );
                }
                "identifier" => {
                    // `const api = app`
                    if let Some(handle) =
                        self.lookup(&node_text(root_node, self.source), root_node.start_byte())
                    {
                        self.bind_name(name, decl, handle);
                    }
                }
                "call_expression" => {
                    let Some(target) = self.factory_target(root_node) else {
                        continue;
                    };
                    let idx = self.new_router(name.clone(), decl, true);
                    let pos = root_node.start_position();
                    self.routers[idx].entries.push(EntryItem::Mount(MountDraft {
                        prefix: String::new(),
                        target,
                        line: pos.row + 1,
                        column: pos.column + 1,
                        text: node_text(root_node, self.source),
                        implicit: true,
                    }));
                    self.owners.insert(root_node.start_byte(), idx);
                    let base = self.chain_base(value);
                    self.bind_name(name, decl, Handle { router: idx, base });
                }
                _ => {}
            }
        }
    }

    /// Target of a factory call `createApp()` / `ns.createApp()`.
    fn factory_target(&self, call: Node<'_>) -> Option<MountTarget> {
        let function = call_target_node(call)?;
        match function.kind() {
            "identifier" => {
                let name = node_text(function, self.source);
                if let Some(handle) = self.factories.get(&name) {
                    return Some(MountTarget::Router(self.routers[handle.router].key.clone()));
                }
                find_binding(self.bindings, &name)
                    .filter(|binding| !classify::is_framework_module(&binding.specifier))
                    .map(|binding| MountTarget::Import {
                        specifier: binding.specifier.clone(),
                        name: binding.imported.clone(),
                    })
            }
            "member_expression" => self.namespace_member(function),
            _ => None,
        }
    }

    /// `ns.name` where `ns` is a namespace import.
    fn namespace_member(&self, node: Node<'_>) -> Option<MountTarget> {
        let (object, property) = member_object_and_property(node, self.source)?;
        if object.kind() != "identifier" {
            return None;
        }
        let binding = find_binding(self.bindings, &node_text(object, self.source))?;
        if binding.kind != crate::model::BindingKind::Namespace {
            return None;
        }
        Some(MountTarget::Import {
            specifier: binding.specifier.clone(),
            name: property,
        })
    }

    // Pass 4: registration chains, attributed to routers in source order.
    fn collect_registrations(&mut self, root: Node<'a>) {
        let mut chains: Vec<Node<'a>> = Vec::new();
        visit(root, &mut |node| {
            if node.kind() == "call_expression" && is_outermost_call(node) {
                chains.push(node);
            }
        });
        for outer in chains {
            self.process_chain(outer);
        }
    }

    fn process_chain(&mut self, outer: Node<'a>) {
        let root = chain_root(outer);
        let start = match root.kind() {
            "identifier" => self.lookup(&node_text(root, self.source), root.start_byte()),
            "new_expression" | "call_expression" => {
                self.owners.get(&root.start_byte()).map(|idx| Handle {
                    router: *idx,
                    base: String::new(),
                })
            }
            _ => None,
        };
        let Some(handle) = start else {
            return;
        };
        let mut base = handle.base.clone();
        for call in chain_calls(outer) {
            match self.classifier.classify(call) {
                NodeClass::BasePathCall { .. } => {
                    match call_arguments(call).into_iter().next() {
                        Some(arg) => match self.static_string(arg, 0) {
                            Some(path) => base = join_base(&base, &path),
                            None => self.unsupported(arg, arg.kind()),
                        },
                        None => self.unsupported(call, "missing_argument"),
                    }
                }
                NodeClass::RouteCall { method, .. } => {
                    self.handle_route_call(handle.router, &base, method, call)
                }
                NodeClass::MountCall { .. } => self.handle_mount(handle.router, &base, call),
                NodeClass::DynamicDispatch { .. } => {
                    let kind = call_target_node(call)
                        .map(|n| n.kind())
                        .unwrap_or("subscript_expression");
                    self.unsupported(call, kind);
                }
                NodeClass::RouterConstruction | NodeClass::Other => {}
            }
        }
    }

    fn handle_route_call(&mut self, router: usize, base: &str, name: &str, call: Node<'a>) {
        let args = call_arguments(call);
        match name {
            "use" => self.handle_use(router, base, call, &args),
            "on" => self.handle_on(router, base, call, &args),
            "openapi" => self.handle_openapi(router, base, call, &args),
            verb => {
                let Some(method) = method_for(verb) else {
                    return;
                };
                let Some(first) = args.first().copied() else {
                    self.unsupported(call, "missing_argument");
                    return;
                };
                let Some(path) = self.path_argument(first) else {
                    return;
                };
                self.push_handlers(router, &join_base(base, &path), &[method], call, &args[1..]);
            }
        }
    }

    fn handle_use(&mut self, router: usize, base: &str, call: Node<'a>, args: &[Node<'a>]) {
        let (path, handlers) = match args.first() {
            Some(first) if self.is_path_argument(*first) => match self.path_argument(*first) {
                Some(path) => (path, &args[1..]),
                None => return,
            },
            _ => ("*".to_string(), args),
        };
        if handlers.is_empty() {
            self.unsupported(call, "missing_handler");
            return;
        }
        let full = join_base(base, &path);
        for handler in handlers {
            let draft = self.draft(http::METHOD_ALL, &full, ResourceKind::Middleware, *handler);
            self.routers[router].entries.push(EntryItem::Resource(draft));
        }
    }

    fn handle_on(&mut self, router: usize, base: &str, call: Node<'a>, args: &[Node<'a>]) {
        if args.len() < 2 {
            self.unsupported(call, "missing_argument");
            return;
        }
        let methods = match self.string_list(args[0]) {
            Some(raw) => raw
                .iter()
                .filter_map(|m| http::normalize_method(m))
                .collect::<Vec<_>>(),
            None => {
                self.unsupported(args[0], args[0].kind());
                return;
            }
        };
        if methods.is_empty() {
            self.unsupported(args[0], "unsupported_method");
            return;
        }
        let paths = if args[1].kind() == "array" {
            match self.string_list(args[1]) {
                Some(paths) => paths,
                None => {
                    self.unsupported(args[1], "array");
                    return;
                }
            }
        } else {
            match self.path_argument(args[1]) {
                Some(path) => vec![path],
                None => return,
            }
        };
        for path in paths {
            self.push_handlers(router, &join_base(base, &path), &methods, call, &args[2..]);
        }
    }

    fn handle_openapi(&mut self, router: usize, base: &str, call: Node<'a>, args: &[Node<'a>]) {
        let Some(first) = args.first().copied() else {
            self.unsupported(call, "missing_argument");
            return;
        };
        let definition = match unwrap_expression(first).kind() {
            "identifier" => self
                .constants
                .get(&node_text(first, self.source))
                .copied(),
            "call_expression" => Some(unwrap_expression(first)),
            _ => None,
        };
        let config = definition.and_then(|def| {
            if def.kind() != "call_expression" {
                return None;
            }
            call_arguments(def)
                .into_iter()
                .next()
                .filter(|arg| arg.kind() == "object")
        });
        let Some(config) = config else {
            self.unsupported(first, first.kind());
            return;
        };
        let method = object_property_string(config, "method", self.source)
            .and_then(|m| http::normalize_method(&m));
        let path = object_property_node(config, "path", self.source)
            .and_then(|node| self.static_string(node, 0));
        let (Some(method), Some(path)) = (method, path) else {
            self.unsupported(config, "openapi_route_config");
            return;
        };
        let path = http::openapi_path_to_router(&path);
        self.push_handlers(router, &join_base(base, &path), &[method], call, &args[1..]);
    }

    /// Last handler is the route; every earlier one is middleware.
    fn push_handlers(
        &mut self,
        router: usize,
        path: &str,
        methods: &[String],
        call: Node<'a>,
        handlers: &[Node<'a>],
    ) {
        let Some((last, middleware)) = handlers.split_last() else {
            self.unsupported(call, "missing_handler");
            return;
        };
        for method in methods {
            for handler in middleware {
                let draft = self.draft(method, path, ResourceKind::Middleware, *handler);
                self.routers[router].entries.push(EntryItem::Resource(draft));
            }
            let draft = self.draft(method, path, ResourceKind::Route, *last);
            self.routers[router].entries.push(EntryItem::Resource(draft));
        }
    }

    fn draft(&self, method: &str, path: &str, kind: ResourceKind, handler: Node<'_>) -> ResourceDraft {
        ResourceDraft {
            id: format!(
                "{}:{}@{}",
                kind.id_prefix(),
                self.file.rel_path,
                handler.start_byte()
            ),
            method: method.to_string(),
            path: http::join_paths("", path),
            kind,
            handler: self.handler_ref(handler),
        }
    }

    fn handler_ref(&self, node: Node<'_>) -> HandlerRef {
        let inner = unwrap_expression(node);
        let kind = match inner.kind() {
            kind if is_function_node(kind) => HandlerKind::Inline,
            "identifier" | "member_expression" => HandlerKind::Identifier,
            "call_expression" => HandlerKind::Factory,
            _ => HandlerKind::Other,
        };
        let text = node_str(node, self.source).to_string();
        HandlerRef {
            call_site: (kind == HandlerKind::Factory).then(|| text.clone()),
            text,
            kind,
            file: Some(self.file.rel_path.clone()),
            span: Some(span(node)),
        }
    }

    fn handle_mount(&mut self, router: usize, base: &str, call: Node<'a>) {
        let args = call_arguments(call);
        if args.len() < 2 {
            self.unsupported(call, "missing_argument");
            return;
        }
        let prefix = self.path_argument(args[0]).unwrap_or_default();
        let target_node = unwrap_expression(args[1]);
        let target = match target_node.kind() {
            "identifier" => {
                let name = node_text(target_node, self.source);
                match self.lookup(&name, target_node.start_byte()) {
                    Some(handle) => Some(MountTarget::Router(self.routers[handle.router].key.clone())),
                    None => find_binding(self.bindings, &name).map(|binding| MountTarget::Import {
                        specifier: binding.specifier.clone(),
                        name: binding.imported.clone(),
                    }),
                }
            }
            "call_expression" => self.factory_target(target_node),
            "member_expression" => self.namespace_member(target_node),
            "new_expression" => self
                .owners
                .get(&target_node.start_byte())
                .map(|idx| MountTarget::Router(self.routers[*idx].key.clone())),
            _ => None,
        };
        let Some(target) = target else {
            self.unsupported(target_node, target_node.kind());
            return;
        };
        let pos = call.start_position();
        let prefix = if base.is_empty() {
            prefix
        } else {
            http::join_paths(base, &prefix)
        };
        self.routers[router].entries.push(EntryItem::Mount(MountDraft {
            prefix,
            target,
            line: pos.row + 1,
            column: pos.column + 1,
            text: node_text(call, self.source),
            implicit: false,
        }));
    }

    /// `use(path, ...)` versus `use(handler, ...)`.
    fn is_path_argument(&self, node: Node<'_>) -> bool {
        match unwrap_expression(node).kind() {
            "string" | "template_string" => true,
            "identifier" | "binary_expression" => self.static_string(node, 0).is_some(),
            _ => false,
        }
    }

    /// String value of a path argument, recording an error when it has no
    /// static value.
    fn path_argument(&mut self, node: Node<'_>) -> Option<String> {
        match self.static_string(node, 0) {
            Some(value) => Some(value),
            None => {
                let inner = unwrap_expression(node);
                self.unsupported(inner, inner.kind());
                None
            }
        }
    }

    fn static_string(&self, node: Node<'_>, depth: usize) -> Option<String> {
        if depth > MAX_CONST_DEPTH {
            return None;
        }
        let node = unwrap_expression(node);
        match node.kind() {
            "string" => string_value(node, self.source),
            "number" => Some(node_text(node, self.source)),
            "template_string" => Some(self.expand_template(node, depth)),
            "identifier" => {
                let value = *self.constants.get(&node_text(node, self.source))?;
                self.static_string(value, depth + 1)
            }
            "binary_expression" => {
                let operator = node.child_by_field_name("operator")?;
                if node_text(operator, self.source) != "+" {
                    return None;
                }
                let left = self.static_string(node.child_by_field_name("left")?, depth + 1)?;
                let right = self.static_string(node.child_by_field_name("right")?, depth + 1)?;
                Some(format!("{left}{right}"))
            }
            _ => None,
        }
    }

    /// Template text with constant substitutions filled in; unresolved
    /// substitutions keep their source text.
    fn expand_template(&self, node: Node<'_>, depth: usize) -> String {
        let inner_start = node.start_byte() + 1;
        let inner_end = node.end_byte().saturating_sub(1).max(inner_start);
        let mut out = String::new();
        let mut cursor = inner_start;
        let mut walker = node.walk();
        for child in node.named_children(&mut walker) {
            if child.kind() != "template_substitution" {
                continue;
            }
            out.push_str(self.source.get(cursor..child.start_byte()).unwrap_or(""));
            let value = child
                .named_child(0)
                .and_then(|expr| self.static_string(expr, depth + 1));
            match value {
                Some(value) => out.push_str(&value),
                None => out.push_str(node_str(child, self.source)),
            }
            cursor = child.end_byte();
        }
        out.push_str(self.source.get(cursor..inner_end).unwrap_or(""));
        out
    }

    fn string_list(&self, node: Node<'_>) -> Option<Vec<String>> {
        let node = unwrap_expression(node);
        if node.kind() != "array" {
            return self.static_string(node, 0).map(|s| vec![s]);
        }
        let mut out = Vec::new();
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            out.push(self.static_string(child, 0)?);
        }
        Some(out)
    }

    // Pass 5: exported names that refer to routers or router factories.
    fn collect_exports(&mut self, root: Node<'a>) {
        let mut cursor = root.walk();
        let statements: Vec<Node<'a>> = root.named_children(&mut cursor).collect();
        for stmt in statements {
            match stmt.kind() {
                "export_statement" => self.export_statement(stmt),
                "expression_statement" => {
                    // module.exports = app
                    let Some(expr) = stmt.named_child(0) else {
                        continue;
                    };
                    if expr.kind() != "assignment_expression" {
                        continue;
                    }
                    let (Some(left), Some(right)) = (
                        expr.child_by_field_name("left"),
                        expr.child_by_field_name("right"),
                    ) else {
                        continue;
                    };
                    if node_text(left, self.source) == "module.exports" {
                        if let Some(target) = self.local_target(unwrap_expression(right)) {
                            self.exports.insert("default".to_string(), target);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn export_statement(&mut self, stmt: Node<'a>) {
        if stmt.child_by_field_name("source").is_some() {
            // Re-exports are followed through bindings by the graph.
            return;
        }
        let is_default = has_anonymous_child(stmt, "default") || has_anonymous_child(stmt, "=");
        if let Some(declaration) = stmt.child_by_field_name("declaration") {
            match declaration.kind() {
                "lexical_declaration" | "variable_declaration" => {
                    let mut cursor = declaration.walk();
                    let declarators: Vec<Node<'a>> =
                        declaration.named_children(&mut cursor).collect();
                    for decl in declarators {
                        let Some(name) = decl.child_by_field_name("name") else {
                            continue;
                        };
                        let name = node_text(name, self.source);
                        if let Some(target) = self.named_target(&name, decl.end_byte()) {
                            self.exports.insert(name, target);
                        }
                    }
                }
                kind if syntax::is_function_declaration(kind) => {
                    if let Some(name) = declaration.child_by_field_name("name") {
                        let name = node_text(name, self.source);
                        if let Some(target) = self.named_target(&name, declaration.end_byte()) {
                            if is_default {
                                self.exports.insert("default".to_string(), target.clone());
                            }
                            self.exports.insert(name, target);
                        }
                    }
                }
                _ => {}
            }
            return;
        }
        if let Some(value) = stmt.child_by_field_name("value") {
            if let Some(target) = self.local_target(unwrap_expression(value)) {
                self.exports.insert("default".to_string(), target);
            }
            return;
        }
        if is_default {
            // `export = app` has no field names in the grammar
            let mut cursor = stmt.walk();
            let value = stmt
                .named_children(&mut cursor)
                .find(|child| child.kind() != "comment");
            if let Some(target) = value.and_then(|v| self.local_target(unwrap_expression(v))) {
                self.exports.insert("default".to_string(), target);
            }
            return;
        }
        let mut cursor = stmt.walk();
        let clauses: Vec<Node<'a>> = stmt
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "export_clause")
            .collect();
        for clause in clauses {
            let mut spec_cursor = clause.walk();
            let specs: Vec<Node<'a>> = clause.named_children(&mut spec_cursor).collect();
            for spec in specs {
                let Some(local) = spec.child_by_field_name("name") else {
                    continue;
                };
                let local = node_text(local, self.source);
                let exported = spec
                    .child_by_field_name("alias")
                    .map(|alias| node_text(alias, self.source))
                    .unwrap_or_else(|| local.clone());
                if let Some(target) = self.named_target(&local, stmt.start_byte()) {
                    self.exports.insert(exported, target);
                }
            }
        }
    }

    fn local_target(&self, node: Node<'_>) -> Option<MountTarget> {
        match node.kind() {
            "identifier" => self.named_target(&node_text(node, self.source), node.start_byte()),
            _ => {
                let root = chain_root(node);
                self.owners
                    .get(&root.start_byte())
                    .map(|idx| MountTarget::Router(self.routers[*idx].key.clone()))
            }
        }
    }

    /// Router, router factory or imported binding visible at top level.
    fn named_target(&self, name: &str, at: usize) -> Option<MountTarget> {
        if let Some(handle) = self.lookup(name, at) {
            return Some(MountTarget::Router(self.routers[handle.router].key.clone()));
        }
        if let Some(handle) = self.factories.get(name) {
            return Some(MountTarget::Router(self.routers[handle.router].key.clone()));
        }
        find_binding(self.bindings, name).map(|binding| MountTarget::Import {
            specifier: binding.specifier.clone(),
            name: binding.imported.clone(),
        })
    }
}

fn join_base(base: &str, path: &str) -> String {
    if base.is_empty() {
        path.to_string()
    } else {
        http::join_paths(base, path)
    }
}

/// Innermost object of a call/member chain: `new Hono().get().post()` gives
/// the `new_expression`, `app.get().post()` gives `app`.
pub fn chain_root(node: Node<'_>) -> Node<'_> {
    let mut current = node;
    loop {
        let next = match current.kind() {
            "call_expression" => match call_target_node(current) {
                Some(target)
                    if matches!(
                        target.kind(),
                        "member_expression" | "subscript_expression" | "optional_member_expression"
                    ) =>
                {
                    target.child_by_field_name("object")
                }
                _ => None,
            },
            "member_expression" | "subscript_expression" => current.child_by_field_name("object"),
            "parenthesized_expression" | "non_null_expression" | "await_expression" => {
                current.named_child(0)
            }
            _ => None,
        };
        match next {
            Some(inner) => current = inner,
            None => return current,
        }
    }
}

/// Calls of a chain, innermost (first in source) to outermost.
pub fn chain_calls(node: Node<'_>) -> Vec<Node<'_>> {
    let mut calls = Vec::new();
    let mut current = node;
    loop {
        let next = match current.kind() {
            "call_expression" => {
                let target = call_target_node(current);
                match target {
                    Some(t)
                        if matches!(
                            t.kind(),
                            "member_expression" | "subscript_expression" | "optional_member_expression"
                        ) =>
                    {
                        calls.push(current);
                        t.child_by_field_name("object")
                    }
                    _ => None,
                }
            }
            "parenthesized_expression" | "non_null_expression" | "await_expression" => {
                current.named_child(0)
            }
            _ => None,
        };
        match next {
            Some(inner) => current = inner,
            None => break,
        }
    }
    calls.reverse();
    calls
}

/// False when this call is the object of an enclosing chained call.
fn is_outermost_call(node: Node<'_>) -> bool {
    let Some(parent) = node.parent() else {
        return true;
    };
    if !matches!(
        parent.kind(),
        "member_expression" | "subscript_expression" | "optional_member_expression"
    ) {
        return true;
    }
    let is_object = parent
        .child_by_field_name("object")
        .map(|obj| obj.id() == node.id())
        .unwrap_or(false);
    let Some(grand) = parent.parent() else {
        return true;
    };
    let is_callee = grand.kind() == "call_expression"
        && call_target_node(grand)
            .map(|target| target.id() == parent.id())
            .unwrap_or(false);
    !(is_object && is_callee)
}

fn is_default_export_value(node: Node<'_>) -> bool {
    let mut current = node;
    while let Some(parent) = current.parent() {
        match parent.kind() {
            "export_statement" => return has_anonymous_child(parent, "default"),
            "call_expression" | "member_expression" | "parenthesized_expression" => {
                current = parent
            }
            _ => return false,
        }
    }
    false
}

/// Pre-order walk over named nodes.
fn visit<'t, F: FnMut(Node<'t>)>(node: Node<'t>, f: &mut F) {
    f(node);
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children {
        visit(child, f);
    }
}

/// Like [`visit`] but does not descend into nested functions.
fn visit_shallow<'t, F: FnMut(Node<'t>)>(node: Node<'t>, f: &mut F) {
    f(node);
    let mut cursor = node.walk();
    let children: Vec<Node<'t>> = node.named_children(&mut cursor).collect();
    for child in children {
        if is_function_node(child.kind()) || syntax::is_function_declaration(child.kind()) {
            continue;
        }
        visit_shallow(child, f);
    }
}
