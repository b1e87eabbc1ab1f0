use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

const PNPM_STORE: &str = ".pnpm";

/// Logical package name for a path inside a dependency directory.
///
/// `node_modules/.pnpm/<pkg>@<ver>/node_modules/<pkg>/...` unwinds to `<pkg>`;
/// scoped names span two segments (`@foo/bar`), and the store directory
/// encodes them as `@foo+bar@1.0.0`.
pub fn package_name_from_path(path: &Path) -> Option<String> {
    let parts: Vec<String> = path
        .components()
        .filter_map(|comp| match comp {
            Component::Normal(os) => Some(os.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    let last_modules = parts.iter().rposition(|part| part == "node_modules")?;
    let rest = &parts[last_modules + 1..];
    match rest.first().map(String::as_str) {
        Some(PNPM_STORE) => rest.get(1).and_then(|entry| unwind_pnpm_entry(entry)),
        Some(first) if first.starts_with('@') => {
            let second = rest.get(1)?;
            Some(format!("{first}/{second}"))
        }
        Some(first) => Some(first.to_string()),
        None => None,
    }
}

/// `lodash@4.17.21` gives `lodash`; `@foo+bar@1.0.0_peer@2` gives `@foo/bar`.
pub fn unwind_pnpm_entry(entry: &str) -> Option<String> {
    let search_from = usize::from(entry.starts_with('@'));
    let version_at = entry[search_from..].find('@')? + search_from;
    let name = &entry[..version_at];
    if name.is_empty() {
        return None;
    }
    Some(name.replacen('+', "/", 1))
}

/// Split a bare specifier into package name and optional subpath.
pub fn split_bare_specifier(specifier: &str) -> (String, Option<String>) {
    let mut segments = specifier.splitn(3, '/');
    let first = segments.next().unwrap_or_default();
    if first.starts_with('@') {
        let second = segments.next().unwrap_or_default();
        let rest = segments.next().map(|s| s.to_string());
        (format!("{first}/{second}"), rest)
    } else {
        let rest: Vec<&str> = segments.collect();
        let sub = if rest.is_empty() {
            None
        } else {
            Some(rest.join("/"))
        };
        (first.to_string(), sub)
    }
}

pub fn is_bare_specifier(specifier: &str) -> bool {
    !(specifier.starts_with("./")
        || specifier.starts_with("../")
        || specifier == "."
        || specifier == ".."
        || specifier.starts_with('/'))
}

/// Entry file declared by `package.json` in `package_dir`, relative paths
/// joined onto the directory. Prefers type declarations over runtime entries.
pub fn package_entry(package_dir: &Path) -> Option<PathBuf> {
    let raw = fs::read_to_string(package_dir.join("package.json")).ok()?;
    let manifest: Value = serde_json::from_str(&raw).ok()?;
    let from_exports = manifest.get("exports").and_then(exports_root_entry);
    let entry = ["types", "typings"]
        .iter()
        .find_map(|key| manifest.get(*key).and_then(Value::as_str).map(|s| s.to_string()))
        .or(from_exports)
        .or_else(|| {
            ["module", "main"]
                .iter()
                .find_map(|key| manifest.get(*key).and_then(Value::as_str).map(|s| s.to_string()))
        })?;
    Some(crate::util::clean_path(&package_dir.join(entry)))
}

fn exports_root_entry(exports: &Value) -> Option<String> {
    match exports {
        Value::String(value) => Some(value.clone()),
        Value::Object(map) => {
            let root = map.get(".").unwrap_or(exports);
            match root {
                Value::String(value) => Some(value.clone()),
                Value::Object(conditions) => ["types", "import", "default", "require"]
                    .iter()
                    .find_map(|key| conditions.get(*key).and_then(exports_root_entry)),
                _ => None,
            }
        }
        _ => None,
    }
}
