//! Static route inventory and function expansion for Hono applications.

pub mod cli;
pub mod config;
pub mod error;
pub mod expand;
pub mod extract;
pub mod graph;
pub mod http;
pub mod locate;
pub mod logging;
pub mod lsp;
pub mod matcher;
pub mod model;
pub mod monitor;
pub mod resolver;
pub mod scan;
pub mod scope;
pub mod sourcemap;
pub mod util;
pub mod watch;
pub mod workspace;

pub use error::{LspError, NodeTypeNotSupportedError, ResolveError, SetupError};
pub use expand::{ExpandOptions, expand_function};
pub use graph::RouteGraph;
pub use locate::{LocateOptions, locate_function};
pub use model::{AnalysisResult, ExpandedFunction, FunctionLocation, Resource};
pub use monitor::{Monitor, MonitorOptions, setup_monitoring, setup_monitoring_with};
