use crate::error::NodeTypeNotSupportedError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Route,
    Middleware,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Route => "route",
            ResourceKind::Middleware => "middleware",
        }
    }

    pub fn id_prefix(self) -> &'static str {
        match self {
            ResourceKind::Route => "ROUTE",
            ResourceKind::Middleware => "MIDDLEWARE",
        }
    }
}

/// Where a Resource came from. Discovered ones are extracted from source;
/// custom and imported ones are added by collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Discovered,
    Custom,
    Imported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    /// Arrow function or function expression written in place
    Inline,
    /// Reference to a named handler
    Identifier,
    /// Call expression producing the handler, e.g. `cors()`
    Factory,
    Other,
}

/// 1-based source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRef {
    pub text: String,
    pub kind: HandlerKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
    /// Call-site text for factory middleware
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_site: Option<String>,
}

impl HandlerRef {
    pub fn detached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: HandlerKind::Other,
            file: None,
            span: None,
            call_site: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub method: String,
    pub path: String,
    pub kind: ResourceKind,
    pub origin: Origin,
    pub handler: HandlerRef,
    pub order: usize,
}

impl Resource {
    pub fn same_identity(&self, other: &Resource) -> bool {
        self.method == other.method && self.path == other.path && self.kind == other.kind
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AnalysisWarning {
    /// Middleware registered after a route with the same method and path
    #[serde(rename_all = "camelCase")]
    AmbiguousOrder {
        method: String,
        path: String,
        route_id: String,
        middleware_id: String,
    },
    /// Mount target that could not be linked to a router
    #[serde(rename_all = "camelCase")]
    UnresolvedMount {
        file: String,
        line: usize,
        target: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub resources: Vec<Resource>,
    pub error_count: usize,
    pub errors: Vec<NodeTypeNotSupportedError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<AnalysisWarning>,
}

impl AnalysisResult {
    pub fn routes(&self) -> impl Iterator<Item = &Resource> {
        self.resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Route)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BindingKind {
    Default,
    Named,
    Namespace,
    ReExport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBinding {
    /// Name visible in the declaring file (`*` for `export * from`)
    pub local: String,
    /// Name exported by the source module; `default` or `*` for those forms
    pub imported: String,
    pub specifier: String,
    pub kind: BindingKind,
    pub file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionLocation {
    pub file: PathBuf,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
}

/// 0-based position, matching the language server protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionType {
    Function,
    Type,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Definition {
    pub uri: String,
    /// Path relative to the project root when inside it
    pub file: String,
    pub range: Range,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DefinitionType,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<Definition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<ContextEntry>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unresolved: bool,
}

impl ContextEntry {
    pub fn unresolved(name: impl Into<String>, position: Position) -> Self {
        Self {
            name: name.into(),
            kind: DefinitionType::Unknown,
            position,
            definition: None,
            package: None,
            context: Vec::new(),
            unresolved: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedFunction {
    pub file: PathBuf,
    pub start_line: usize,
    pub start_column: usize,
    pub end_line: usize,
    pub end_column: usize,
    /// Verbatim text of the located function
    pub source: String,
    pub context: Vec<ContextEntry>,
}

impl ExpandedFunction {
    /// Depth-first search through the context tree.
    pub fn find(&self, name: &str) -> Option<&ContextEntry> {
        fn walk<'a>(entries: &'a [ContextEntry], name: &str) -> Option<&'a ContextEntry> {
            for entry in entries {
                if entry.name == name {
                    return Some(entry);
                }
                if let Some(found) = walk(&entry.context, name) {
                    return Some(found);
                }
            }
            None
        }
        walk(&self.context, name)
    }

    pub fn unresolved_names(&self) -> Vec<&str> {
        self.context
            .iter()
            .filter(|entry| entry.unresolved)
            .map(|entry| entry.name.as_str())
            .collect()
    }
}
