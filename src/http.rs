/// Sentinel method for registrations that match every verb (`all`, `use`).
pub const METHOD_ALL: &str = "ALL";

/// Router methods that register a route for a single verb.
pub const VERB_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "options"];

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"];

pub fn normalize_method(raw: &str) -> Option<String> {
    let trimmed = raw.trim().trim_matches(|c| c == '"' || c == '\'');
    if trimmed.is_empty() {
        return None;
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper == "ALL" || upper == "ANY" || upper == "*" {
        return Some(METHOD_ALL.to_string());
    }
    if HTTP_METHODS.iter().any(|method| *method == upper) {
        return Some(upper);
    }
    None
}

pub fn is_verb_method(name: &str) -> bool {
    VERB_METHODS.contains(&name)
}

pub fn join_paths(prefix: &str, suffix: &str) -> String {
    let mut left = prefix.trim().to_string();
    let mut right = suffix.trim().to_string();
    if left.is_empty() {
        left = "/".to_string();
    }
    if right.is_empty() {
        right = "/".to_string();
    }
    if !left.starts_with('/') {
        left = format!("/{left}");
    }
    let left = left.trim_end_matches('/');
    let right = right.trim_start_matches('/');
    if left.is_empty() {
        if right.is_empty() {
            "/".to_string()
        } else {
            format!("/{right}")
        }
    } else if right.is_empty() {
        left.to_string()
    } else {
        format!("{left}/{right}")
    }
}

/// Rewrite OpenAPI style `{param}` segments to the router's `:param` form.
pub fn openapi_path_to_router(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '{' {
            out.push(ch);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for next in chars.by_ref() {
            if next == '}' {
                closed = true;
                break;
            }
            name.push(next);
        }
        if closed && !name.is_empty() {
            out.push(':');
            out.push_str(&name);
        } else {
            out.push('{');
            out.push_str(&name);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_paths_composes_prefixes() {
        assert_eq!(join_paths("/api", "/users"), "/api/users");
        assert_eq!(join_paths("/api/", "users"), "/api/users");
        assert_eq!(join_paths("/api", "/"), "/api");
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("", ""), "/");
        assert_eq!(join_paths("/api", "*"), "/api/*");
    }

    #[test]
    fn normalize_method_maps_wildcards() {
        assert_eq!(normalize_method("get").as_deref(), Some("GET"));
        assert_eq!(normalize_method("all").as_deref(), Some(METHOD_ALL));
        assert_eq!(normalize_method("'post'").as_deref(), Some("POST"));
        assert_eq!(normalize_method("fetch"), None);
    }

    #[test]
    fn openapi_params_become_router_params() {
        assert_eq!(openapi_path_to_router("/users/{id}"), "/users/:id");
        assert_eq!(
            openapi_path_to_router("/a/{x}/b/{y}"),
            "/a/:x/b/:y"
        );
        assert_eq!(openapi_path_to_router("/broken/{id"), "/broken/{id");
    }
}
