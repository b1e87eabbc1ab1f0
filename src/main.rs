use anyhow::{Context, Result};
use clap::Parser;
use routelens::cli::{self, FunctionInput};
use routelens::expand::{self, ExpandOptions};
use routelens::locate::{self, LocateOptions};
use routelens::monitor::{self, MonitorOptions};
use routelens::resolver::{ModuleResolver, packages};
use routelens::util::canonical_or_clean;
use routelens::{config, logging};
use serde_json::json;
use std::path::Path;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    logging::init(args.verbose);

    match args.command {
        cli::Command::Routes { root } => {
            let monitor = monitor::setup_monitoring_with(&root.root, monitor_options(root.no_ignore))?;
            let result = monitor.find_routes();
            println!("{}", serde_json::to_string_pretty(&result)?);
            monitor.teardown().await;
            Ok(())
        }
        cli::Command::Match { root, method, path } => {
            let monitor = monitor::setup_monitoring_with(&root.root, monitor_options(root.no_ignore))?;
            let matched = monitor.match_request(&method, &path);
            println!("{}", serde_json::to_string_pretty(&matched)?);
            monitor.teardown().await;
            Ok(())
        }
        cli::Command::Locate { root, input } => {
            let text = read_input(&input)?;
            let options = LocateOptions {
                skip_source_map: input.skip_source_map,
                ..LocateOptions::default()
            };
            let location = locate::locate(&root, &text, &options)
                .await
                .map(|found| found.location);
            println!("{}", serde_json::to_string_pretty(&location)?);
            Ok(())
        }
        cli::Command::Expand {
            root,
            input,
            max_depth,
            no_lsp,
        } => {
            let text = read_input(&input)?;
            let options = ExpandOptions {
                locate: LocateOptions {
                    skip_source_map: input.skip_source_map,
                    ..LocateOptions::default()
                },
                max_depth,
            };
            let lsp_enabled = config::get().lsp_enabled && !no_lsp;
            let expanded = expand::expand_function_with(&root, &text, &options, lsp_enabled).await?;
            println!("{}", serde_json::to_string_pretty(&expanded)?);
            Ok(())
        }
        cli::Command::Resolve {
            root,
            from,
            specifier,
        } => {
            let root = canonical_or_clean(&root);
            let from = if from.is_absolute() { from } else { root.join(from) };
            let resolver = ModuleResolver::new(&root);
            let value = match resolver.resolve(&specifier, &from) {
                Ok(path) => json!({
                    "path": path,
                    "package": packages::package_name_from_path(&path),
                }),
                Err(err) => {
                    tracing::debug!("{err}");
                    serde_json::Value::Null
                }
            };
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        cli::Command::Watch { root, debounce_ms } => {
            let mut options = monitor_options(root.no_ignore);
            if let Some(debounce_ms) = debounce_ms {
                options.debounce_ms = debounce_ms;
            }
            let monitor = monitor::setup_monitoring_with(&root.root, options)?;
            println!("{}", serde_json::to_string(&monitor.find_routes())?);
            let mut updates = monitor.subscribe();
            monitor.start()?;
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    update = updates.recv() => match update {
                        Some(result) => println!("{}", serde_json::to_string(&result)?),
                        None => break,
                    },
                }
            }
            monitor.teardown().await;
            Ok(())
        }
    }
}

fn monitor_options(no_ignore: bool) -> MonitorOptions {
    MonitorOptions {
        no_ignore,
        ..MonitorOptions::default()
    }
}

fn read_input(input: &FunctionInput) -> Result<String> {
    match (&input.text, &input.file) {
        (Some(text), _) => Ok(text.clone()),
        (None, Some(path)) => read_file(path),
        (None, None) => anyhow::bail!("either --text or --file is required"),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}
