use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "routelens",
    version,
    about = "Static route inventory and function expansion for Hono projects",
    after_help = r#"Examples:
  routelens routes --root .
  routelens match --root . GET /api/users/42
  routelens locate --root . --text 'async (c) => c.json(await listUsers())'
  routelens expand --root . --file captured.txt --max-depth 3
  routelens resolve --root . --from src/index.ts @/lib/db
  routelens watch --root . --debounce-ms 100
"#
)]
pub struct Args {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RootArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Include files ignored by .gitignore.
    #[arg(long)]
    pub no_ignore: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct FunctionInput {
    /// Function source text.
    #[arg(long, conflicts_with = "file", required_unless_present = "file")]
    pub text: Option<String>,
    /// Read the function source text from a file.
    #[arg(long)]
    pub file: Option<PathBuf>,
    /// Do not search compiled output through source maps.
    #[arg(long)]
    pub skip_source_map: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the route inventory as JSON.
    Routes {
        #[command(flatten)]
        root: RootArgs,
    },
    /// Print the resources a request would run through.
    Match {
        #[command(flatten)]
        root: RootArgs,
        method: String,
        path: String,
    },
    /// Print the source location of a function.
    Locate {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[command(flatten)]
        input: FunctionInput,
    },
    /// Print a function with the helpers it references.
    Expand {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        #[command(flatten)]
        input: FunctionInput,
        /// Nested helper expansion depth.
        #[arg(long)]
        max_depth: Option<usize>,
        /// Never start a language server.
        #[arg(long)]
        no_lsp: bool,
    },
    /// Resolve an import specifier as seen from a file.
    Resolve {
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// File containing the import.
        #[arg(long)]
        from: PathBuf,
        specifier: String,
    },
    /// Print the route inventory after every change until interrupted.
    Watch {
        #[command(flatten)]
        root: RootArgs,
        /// Debounce window for filesystem events in milliseconds.
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}
