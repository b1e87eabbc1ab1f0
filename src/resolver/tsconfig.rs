use crate::error::ResolveError;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const CONFIG_NAME: &str = "tsconfig.json";
const MAX_EXTENDS_DEPTH: usize = 5;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTsConfig {
    extends: Option<serde_json::Value>,
    compiler_options: Option<RawCompilerOptions>,
    include: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCompilerOptions {
    base_url: Option<String>,
    paths: Option<BTreeMap<String, Vec<String>>>,
}

/// The parts of a tsconfig that affect resolution and the watch set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsConfig {
    pub path: PathBuf,
    pub base_url: Option<PathBuf>,
    /// Alias patterns with their targets, resolved against `paths_base`
    pub paths: Vec<(String, Vec<String>)>,
    pub paths_base: PathBuf,
    pub include: Vec<String>,
}

impl TsConfig {
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("/"))
    }

    /// Candidate base paths for `specifier`, best alias first.
    pub fn alias_candidates(&self, specifier: &str) -> Vec<PathBuf> {
        let mut best: Option<(usize, &str, &Vec<String>)> = None;
        for (pattern, targets) in &self.paths {
            if !matches_pattern(pattern, specifier) {
                continue;
            }
            // Exact patterns beat wildcards; longer prefixes beat shorter ones.
            let score = pattern.find('*').unwrap_or(usize::MAX);
            if best.map(|(s, _, _)| score > s).unwrap_or(true) {
                best = Some((score, pattern.as_str(), targets));
            }
        }
        let Some((_, pattern, targets)) = best else {
            return Vec::new();
        };
        let captured = capture(pattern, specifier).unwrap_or_default();
        targets
            .iter()
            .map(|target| self.paths_base.join(target.replacen('*', &captured, 1)))
            .collect()
    }

    /// `baseUrl`-relative candidate for a bare specifier.
    pub fn base_url_candidate(&self, specifier: &str) -> Option<PathBuf> {
        self.base_url.as_ref().map(|base| base.join(specifier))
    }
}

fn matches_pattern(pattern: &str, specifier: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == specifier,
        Some((prefix, suffix)) => {
            specifier.len() >= prefix.len() + suffix.len()
                && specifier.starts_with(prefix)
                && specifier.ends_with(suffix)
        }
    }
}

fn capture(pattern: &str, specifier: &str) -> Option<String> {
    let (prefix, suffix) = pattern.split_once('*')?;
    specifier
        .get(prefix.len()..specifier.len() - suffix.len())
        .map(|s| s.to_string())
}

/// Nearest `tsconfig.json` at or above `start`, not climbing past `stop`
/// when `start` is inside it.
pub fn find_nearest(start: &Path, stop: &Path) -> Option<PathBuf> {
    let bounded = start.starts_with(stop);
    let mut dir = Some(start);
    while let Some(current) = dir {
        let candidate = current.join(CONFIG_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
        if bounded && current == stop {
            return None;
        }
        dir = current.parent();
    }
    None
}

pub fn load(path: &Path) -> Result<TsConfig, ResolveError> {
    load_with_depth(path, 0)
}

fn load_with_depth(path: &Path, depth: usize) -> Result<TsConfig, ResolveError> {
    let raw_text = fs::read_to_string(path)?;
    let raw: RawTsConfig =
        serde_json::from_str(&strip_jsonc(&raw_text)).map_err(|err| ResolveError::InvalidConfig {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
    let dir = path.parent().unwrap_or(Path::new("/")).to_path_buf();

    let mut config = match parent_config(&raw, &dir, depth) {
        Some(parent) => parent,
        None => TsConfig {
            paths_base: dir.clone(),
            ..TsConfig::default()
        },
    };
    config.path = path.to_path_buf();

    let options = raw.compiler_options.unwrap_or_default();
    if let Some(base) = options.base_url {
        let base = crate::util::clean_path(&dir.join(base));
        config.paths_base = base.clone();
        config.base_url = Some(base);
    }
    if let Some(paths) = options.paths {
        if config.base_url.is_none() {
            config.paths_base = dir.clone();
        }
        config.paths = paths.into_iter().collect();
    }
    if let Some(include) = raw.include {
        config.include = include;
    }
    Ok(config)
}

fn parent_config(raw: &RawTsConfig, dir: &Path, depth: usize) -> Option<TsConfig> {
    if depth >= MAX_EXTENDS_DEPTH {
        return None;
    }
    let extends = match raw.extends.as_ref()? {
        serde_json::Value::String(value) => value.clone(),
        serde_json::Value::Array(values) => values.last()?.as_str()?.to_string(),
        _ => return None,
    };
    let candidate = if extends.starts_with('.') || extends.starts_with('/') {
        let mut path = dir.join(&extends);
        if path.extension().is_none() {
            path.set_extension("json");
        }
        path
    } else {
        dir.join("node_modules").join(&extends)
    };
    match load_with_depth(&candidate, depth + 1) {
        Ok(parent) => Some(parent),
        Err(err) => {
            debug!(extends = %extends, "skip tsconfig extends: {err}");
            None
        }
    }
}

/// Strip `//` and `/* */` comments and trailing commas so JSONC parses as JSON.
pub fn strip_jsonc(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;
    while let Some(ch) = chars.next() {
        if in_string {
            out.push(ch);
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
            }
            _ => out.push(ch),
        }
    }
    remove_trailing_commas(&out)
}

fn remove_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut in_string = false;
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        if in_string {
            out.push(ch);
            if ch == '\\' && idx + 1 < chars.len() {
                out.push(chars[idx + 1]);
                idx += 2;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
            idx += 1;
            continue;
        }
        if ch == '"' {
            in_string = true;
        } else if ch == ',' {
            let next = chars[idx + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                idx += 1;
                continue;
            }
        }
        out.push(ch);
        idx += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_comments_and_trailing_commas() {
        let raw = r#"{
  // comment
  "compilerOptions": {
    "baseUrl": ".", /* inline */
    "paths": { "@/*": ["src/*"], },
  },
  "include": ["src/**/*.ts", "http://not-a-comment"],
}"#;
        let value: serde_json::Value = serde_json::from_str(&strip_jsonc(raw)).unwrap();
        assert_eq!(value["compilerOptions"]["paths"]["@/*"][0], "src/*");
        assert_eq!(value["include"][1], "http://not-a-comment");
    }

    #[test]
    fn alias_prefers_longest_prefix() {
        let config = TsConfig {
            path: PathBuf::from("/p/tsconfig.json"),
            base_url: Some(PathBuf::from("/p")),
            paths: vec![
                ("@/*".to_string(), vec!["src/*".to_string()]),
                ("@/db/*".to_string(), vec!["src/database/*".to_string()]),
                ("config".to_string(), vec!["src/config.ts".to_string()]),
            ],
            paths_base: PathBuf::from("/p"),
            include: Vec::new(),
        };
        assert_eq!(
            config.alias_candidates("@/db/users"),
            vec![PathBuf::from("/p/src/database/users")]
        );
        assert_eq!(
            config.alias_candidates("@/routes/api"),
            vec![PathBuf::from("/p/src/routes/api")]
        );
        assert_eq!(
            config.alias_candidates("config"),
            vec![PathBuf::from("/p/src/config.ts")]
        );
        assert!(config.alias_candidates("lodash").is_empty());
    }

    #[test]
    fn load_follows_relative_extends() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("tsconfig.base.json"),
            r#"{ "compilerOptions": { "baseUrl": ".", "paths": { "~/*": ["lib/*"] } } }"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("tsconfig.json"),
            r#"{ "extends": "./tsconfig.base.json", "include": ["src"] }"#,
        )
        .unwrap();
        let config = load(&dir.path().join("tsconfig.json")).unwrap();
        assert_eq!(config.include, vec!["src".to_string()]);
        assert_eq!(config.paths.len(), 1);
        assert_eq!(
            config.alias_candidates("~/util"),
            vec![dir.path().join("lib/util")]
        );
    }
}
