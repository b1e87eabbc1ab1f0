use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};

pub fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

pub fn normalize_rel_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path.strip_prefix(root).with_context(|| {
        format!("strip prefix {} from {}", root.display(), path.display())
    })?;
    Ok(normalize_path(rel))
}

/// Relative path with forward slashes when `path` is under `root`, the full
/// normalized path otherwise.
pub fn display_rel_path(root: &Path, path: &Path) -> String {
    normalize_rel_path(root, path).unwrap_or_else(|_| normalize_path(path))
}

pub fn normalize_path(path: &Path) -> String {
    let mut parts = Vec::new();
    let absolute = path.has_root();
    for comp in path.components() {
        match comp {
            Component::Normal(os) => parts.push(os.to_string_lossy().to_string()),
            Component::ParentDir => parts.push("..".to_string()),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if parts.is_empty() {
        return if absolute { "/".to_string() } else { ".".to_string() };
    }
    let joined = parts.join("/");
    if absolute { format!("/{joined}") } else { joined }
}

/// Resolve `.` and `..` segments without touching the file system.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Canonicalize when the path exists, otherwise clean it lexically.
pub fn canonical_or_clean(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| clean_path(path))
}

/// Collapse every whitespace run to a single space and trim.
pub fn collapse_whitespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

pub fn truncate_str_bytes(value: &str, max_bytes: usize) -> String {
    if value.len() <= max_bytes {
        return value.to_string();
    }
    let mut end = max_bytes.min(value.len());
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// UTF-16 column of `byte_column` on 0-based `line`. Language servers count
/// columns in UTF-16 code units; tree-sitter counts bytes.
pub fn utf16_column(text: &str, line: usize, byte_column: usize) -> usize {
    let Some(row) = text.lines().nth(line) else {
        return byte_column;
    };
    let mut end = byte_column.min(row.len());
    while end > 0 && !row.is_char_boundary(end) {
        end -= 1;
    }
    row[..end].encode_utf16().count()
}

/// Inverse of [`utf16_column`].
pub fn byte_column(text: &str, line: usize, utf16_column: usize) -> usize {
    let Some(row) = text.lines().nth(line) else {
        return utf16_column;
    };
    let mut units = 0;
    for (idx, ch) in row.char_indices() {
        if units >= utf16_column {
            return idx;
        }
        units += ch.len_utf16();
    }
    row.len()
}

pub fn is_node_modules_path(path: &Path) -> bool {
    path.components()
        .any(|comp| comp.as_os_str() == "node_modules")
}

pub fn file_uri(path: &Path) -> String {
    format!("file://{}", normalize_path(path))
}

pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    let rest = uri.strip_prefix("file://")?;
    Some(PathBuf::from(percent_decode(rest)))
}

fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' && idx + 2 < bytes.len() {
            let hex = raw.get(idx + 1..idx + 3);
            if let Some(value) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(value);
                idx += 3;
                continue;
            }
        }
        out.push(bytes[idx]);
        idx += 1;
    }
    String::from_utf8_lossy(&out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_path_folds_parent_segments() {
        let cleaned = clean_path(Path::new("/repo/src/routes/../db.ts"));
        assert_eq!(cleaned, PathBuf::from("/repo/src/db.ts"));
    }

    #[test]
    fn columns_convert_between_bytes_and_utf16() {
        let text = "a\nconst s = \"hé→😀\"; go();\n";
        // three non-ASCII chars before `go`: 2 + 3 + 4 bytes, 1 + 1 + 2 units
        let byte = text.lines().nth(1).unwrap().find("go").unwrap();
        assert_eq!(byte, 24);
        assert_eq!(utf16_column(text, 1, byte), 19);
        assert_eq!(byte_column(text, 1, 19), byte);
        assert_eq!(utf16_column(text, 0, 1), 1);
        assert_eq!(byte_column(text, 9, 4), 4);
    }

    #[test]
    fn collapse_whitespace_joins_lines() {
        assert_eq!(
            collapse_whitespace("  (c) =>\n\t{ return 1;  }\n"),
            "(c) => { return 1; }"
        );
    }

    #[test]
    fn uri_round_trip_decodes_spaces() {
        let path = uri_to_path("file:///tmp/my%20app/index.ts").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/my app/index.ts"));
        assert_eq!(file_uri(Path::new("/tmp/a.ts")), "file:///tmp/a.ts");
    }
}
