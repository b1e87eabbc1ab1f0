//! Cross-file route inventory.
//!
//! Per-file contributions are cached by path and relinked on every
//! [`RouteGraph::analyze`]: mounts are resolved to routers, every unmounted
//! router is walked depth-first, and the emitted resources are numbered in
//! traversal order before deduplication.

use crate::error::NodeTypeNotSupportedError;
use crate::extract::{EntryItem, FileContribution, MountDraft, MountTarget, RouterDecl, RouterKey};
use crate::http;
use crate::matcher;
use crate::model::{
    AnalysisResult, AnalysisWarning, BindingKind, HandlerRef, Origin, Resource, ResourceKind,
};
use crate::resolver::ModuleResolver;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_EXPORT_HOPS: usize = 8;

#[derive(Debug, Clone)]
struct ExtraResource {
    method: String,
    path: String,
    origin: Origin,
    handler: HandlerRef,
}

pub struct RouteGraph {
    root: PathBuf,
    resolver: Arc<ModuleResolver>,
    contributions: BTreeMap<PathBuf, FileContribution>,
    extra: Vec<ExtraResource>,
}

impl RouteGraph {
    pub fn new(root: &Path) -> Self {
        Self::with_resolver(root, Arc::new(ModuleResolver::new(root)))
    }

    pub fn with_resolver(root: &Path, resolver: Arc<ModuleResolver>) -> Self {
        Self {
            root: root.to_path_buf(),
            resolver,
            contributions: BTreeMap::new(),
            extra: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    pub fn file_count(&self) -> usize {
        self.contributions.len()
    }

    pub fn contribution(&self, path: &Path) -> Option<&FileContribution> {
        self.contributions.get(path)
    }

    /// Replace one file's contribution; every other file is left untouched.
    pub fn replace_file(&mut self, contribution: FileContribution) {
        debug!(
            file = %contribution.rel_path,
            version = contribution.version,
            routers = contribution.routers.len(),
            "replace contribution"
        );
        self.contributions
            .insert(contribution.file.clone(), contribution);
    }

    pub fn remove_file(&mut self, path: &Path) -> bool {
        self.contributions.remove(path).is_some()
    }

    pub fn add_custom(&mut self, method: &str, path: &str, handler_text: &str) {
        self.push_extra(method, path, Origin::Custom, HandlerRef::detached(handler_text));
    }

    /// Route declared by an API description rather than source code.
    pub fn add_imported(&mut self, method: &str, path: &str) {
        self.push_extra(method, path, Origin::Imported, HandlerRef::detached(""));
    }

    /// Carry custom and imported resources over to a rebuilt graph.
    pub fn copy_extras_from(&mut self, other: &RouteGraph) {
        self.extra = other.extra.clone();
    }

    fn push_extra(&mut self, method: &str, path: &str, origin: Origin, handler: HandlerRef) {
        let method = http::normalize_method(method).unwrap_or_else(|| method.to_ascii_uppercase());
        self.extra.push(ExtraResource {
            method,
            path: http::join_paths("", path),
            origin,
            handler,
        });
    }

    pub fn get_resources(&self) -> Vec<Resource> {
        self.analyze().resources
    }

    pub fn error_count(&self) -> usize {
        self.analyze().error_count
    }

    pub fn match_request(&self, method: &str, path: &str) -> Vec<Resource> {
        matcher::match_request(&self.analyze().resources, method, path)
    }

    pub fn analyze(&self) -> AnalysisResult {
        let mut linker = Linker::new(self);
        linker.link_all();
        let mut walk = Walk::default();
        for key in linker.traversal_roots() {
            if !walk.visited.contains(&key) {
                linker.visit(&key, "", &mut walk);
            }
        }

        let mut errors: Vec<NodeTypeNotSupportedError> = self
            .contributions
            .values()
            .flat_map(|c| c.errors.iter().cloned())
            .collect();
        errors.extend(walk.errors);

        let mut resources = dedup(walk.resources);
        let mut order = resources.iter().map(|r| r.order + 1).max().unwrap_or(0);
        for (idx, extra) in self.extra.iter().enumerate() {
            let resource = Resource {
                id: format!(
                    "{}:{}#{idx}",
                    ResourceKind::Route.id_prefix(),
                    match extra.origin {
                        Origin::Custom => "custom",
                        _ => "imported",
                    }
                ),
                method: extra.method.clone(),
                path: extra.path.clone(),
                kind: ResourceKind::Route,
                origin: extra.origin,
                handler: extra.handler.clone(),
                order,
            };
            if resources.iter().any(|r| r.same_identity(&resource)) {
                info!(
                    method = %resource.method,
                    path = %resource.path,
                    "drop duplicate {:?} resource",
                    resource.origin
                );
                continue;
            }
            order += 1;
            resources.push(resource);
        }

        let mut warnings = walk.warnings;
        warnings.extend(ambiguous_order(&resources));

        AnalysisResult {
            error_count: errors.len(),
            errors,
            resources,
            warnings,
        }
    }
}

#[derive(Default)]
struct Walk {
    resources: Vec<Resource>,
    errors: Vec<NodeTypeNotSupportedError>,
    warnings: Vec<AnalysisWarning>,
    visited: HashSet<RouterKey>,
    stack: Vec<RouterKey>,
}

struct Linker<'g> {
    graph: &'g RouteGraph,
    routers: HashMap<RouterKey, (&'g FileContribution, &'g RouterDecl)>,
    /// Linked target per (router, entry index)
    links: HashMap<(RouterKey, usize), RouterKey>,
    valid: HashSet<RouterKey>,
}

impl<'g> Linker<'g> {
    fn new(graph: &'g RouteGraph) -> Self {
        let mut routers = HashMap::new();
        for contribution in graph.contributions.values() {
            for router in &contribution.routers {
                routers.insert(router.key.clone(), (contribution, router));
            }
        }
        Self {
            graph,
            routers,
            links: HashMap::new(),
            valid: HashSet::new(),
        }
    }

    fn link_all(&mut self) {
        let mut links = HashMap::new();
        for (contribution, router) in self.routers.values() {
            for (idx, entry) in router.entries.iter().enumerate() {
                if let EntryItem::Mount(mount) = entry {
                    if let Some(target) = self.link(&mount.target, &contribution.file, 0) {
                        links.insert((router.key.clone(), idx), target);
                    }
                }
            }
        }
        self.links = links;
        // A factory result is a router only if its factory returned one.
        self.valid = self
            .routers
            .values()
            .filter(|(_, router)| {
                !router.from_factory
                    || router.entries.iter().enumerate().any(|(idx, entry)| {
                        matches!(entry, EntryItem::Mount(m) if m.implicit)
                            && self.links.contains_key(&(router.key.clone(), idx))
                    })
            })
            .map(|(_, router)| router.key.clone())
            .collect();
    }

    fn link(&self, target: &MountTarget, from: &Path, hops: usize) -> Option<RouterKey> {
        if hops > MAX_EXPORT_HOPS {
            return None;
        }
        match target {
            MountTarget::Router(key) => self.routers.contains_key(key).then(|| key.clone()),
            MountTarget::Import { specifier, name } => {
                let path = match self.graph.resolver.resolve(specifier, from) {
                    Ok(path) => path,
                    Err(err) => {
                        debug!("mount target unresolved: {err}");
                        return None;
                    }
                };
                self.exported_router(&path, name, hops + 1)
            }
        }
    }

    fn exported_router(&self, file: &Path, name: &str, hops: usize) -> Option<RouterKey> {
        let contribution = self.graph.contributions.get(file)?;
        if let Some(target) = contribution.exports.get(name) {
            return self.link(target, file, hops);
        }
        // Barrel files: `export { x } from "./y"` and `export * from "./y"`.
        for binding in &contribution.bindings {
            if binding.kind != BindingKind::ReExport {
                continue;
            }
            let forwarded = if binding.local == name {
                binding.imported.clone()
            } else if binding.local == "*" && name != "default" {
                name.to_string()
            } else {
                continue;
            };
            let target = MountTarget::Import {
                specifier: binding.specifier.clone(),
                name: forwarded,
            };
            if let Some(key) = self.link(&target, file, hops) {
                return Some(key);
            }
        }
        None
    }

    /// Unmounted routers ordered by (relative path, position), followed by
    /// any router left unreached (only possible inside a mount cycle).
    fn traversal_roots(&self) -> Vec<RouterKey> {
        let mounted: HashSet<&RouterKey> = self.links.values().collect();
        let mut keys: Vec<(&str, usize, &RouterKey)> = self
            .routers
            .values()
            .filter(|(_, router)| self.valid.contains(&router.key))
            .map(|(c, router)| (c.rel_path.as_str(), router.key.offset, &router.key))
            .collect();
        keys.sort();
        let (roots, rest): (Vec<_>, Vec<_>) = keys
            .into_iter()
            .partition(|(_, _, key)| !mounted.contains(key));
        roots
            .into_iter()
            .chain(rest)
            .map(|(_, _, key)| key.clone())
            .collect()
    }

    fn visit(&self, key: &RouterKey, prefix: &str, walk: &mut Walk) {
        let Some((contribution, router)) = self.routers.get(key) else {
            return;
        };
        walk.visited.insert(key.clone());
        walk.stack.push(key.clone());
        for (idx, entry) in router.entries.iter().enumerate() {
            match entry {
                EntryItem::Resource(draft) => {
                    let path = if prefix.is_empty() {
                        draft.path.clone()
                    } else {
                        http::join_paths(prefix, &draft.path)
                    };
                    walk.resources.push(Resource {
                        id: draft.id.clone(),
                        method: draft.method.clone(),
                        path,
                        kind: draft.kind,
                        origin: Origin::Discovered,
                        handler: draft.handler.clone(),
                        order: walk.resources.len(),
                    });
                }
                EntryItem::Mount(mount) => match self.links.get(&(key.clone(), idx)) {
                    Some(target) if walk.stack.contains(target) => {
                        warn!(file = %contribution.rel_path, line = mount.line, "mount cycle");
                        walk.errors.push(cycle_error(contribution, mount));
                    }
                    Some(target) => {
                        let nested = join_prefix(prefix, &mount.prefix);
                        self.visit(target, &nested, walk);
                    }
                    None if mount.implicit => {}
                    None => {
                        debug!(file = %contribution.rel_path, target = %mount.text, "unresolved mount");
                        walk.warnings.push(AnalysisWarning::UnresolvedMount {
                            file: contribution.rel_path.clone(),
                            line: mount.line,
                            target: mount.text.clone(),
                        });
                    }
                },
            }
        }
        walk.stack.pop();
    }
}

fn join_prefix(prefix: &str, mount: &str) -> String {
    match (prefix.is_empty(), mount.is_empty()) {
        (true, _) => mount.to_string(),
        (false, true) => prefix.to_string(),
        (false, false) => http::join_paths(prefix, mount),
    }
}

fn cycle_error(contribution: &FileContribution, mount: &MountDraft) -> NodeTypeNotSupportedError {
    NodeTypeNotSupportedError {
        file: contribution.rel_path.clone(),
        line: mount.line,
        column: mount.column,
        kind: "mount_cycle".to_string(),
        text: mount.text.clone(),
    }
}

/// Keep the lowest-order route per (method, path). Middleware is only
/// dropped when the same registration is reached twice at the same path.
fn dedup(resources: Vec<Resource>) -> Vec<Resource> {
    let mut routes: HashSet<(String, String)> = HashSet::new();
    let mut middleware: HashSet<(String, String, String)> = HashSet::new();
    let mut kept = Vec::with_capacity(resources.len());
    for resource in resources {
        let fresh = match resource.kind {
            ResourceKind::Route => {
                routes.insert((resource.method.clone(), resource.path.clone()))
            }
            ResourceKind::Middleware => middleware.insert((
                resource.id.clone(),
                resource.method.clone(),
                resource.path.clone(),
            )),
        };
        if !fresh {
            info!(
                id = %resource.id,
                method = %resource.method,
                path = %resource.path,
                "drop duplicate {}",
                resource.kind.as_str()
            );
            continue;
        }
        kept.push(resource);
    }
    kept
}

/// Middleware registered after the route it shares a method and path with.
fn ambiguous_order(resources: &[Resource]) -> Vec<AnalysisWarning> {
    let mut warnings = Vec::new();
    for route in resources.iter().filter(|r| r.kind == ResourceKind::Route) {
        for middleware in resources.iter().filter(|r| {
            r.kind == ResourceKind::Middleware
                && r.method == route.method
                && r.path == route.path
                && r.order > route.order
        }) {
            warn!(
                method = %route.method,
                path = %route.path,
                route = %route.id,
                middleware = %middleware.id,
                "middleware registered after route"
            );
            warnings.push(AnalysisWarning::AmbiguousOrder {
                method: route.method.clone(),
                path: route.path.clone(),
                route_id: route.id.clone(),
                middleware_id: middleware.id.clone(),
            });
        }
    }
    warnings
}
