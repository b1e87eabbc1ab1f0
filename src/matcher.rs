//! Request matching against discovered path patterns.

use crate::http::METHOD_ALL;
use crate::model::Resource;

/// Resources the router would run for `method path`, in registration order.
pub fn match_request(resources: &[Resource], method: &str, path: &str) -> Vec<Resource> {
    let method = method.trim().to_ascii_uppercase();
    let path = path.split(['?', '#']).next().unwrap_or("");
    let mut matched: Vec<Resource> = resources
        .iter()
        .filter(|r| method_matches(&r.method, &method) && path_matches(&r.path, path))
        .cloned()
        .collect();
    matched.sort_by_key(|r| r.order);
    matched
}

fn method_matches(registered: &str, requested: &str) -> bool {
    registered == METHOD_ALL
        || registered == requested
        || (requested == "HEAD" && registered == "GET")
}

pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern: Vec<&str> = segments(pattern);
    let path: Vec<&str> = segments(path);
    match_segments(&pattern, &path)
}

fn segments(raw: &str) -> Vec<&str> {
    raw.split('/').filter(|s| !s.is_empty()).collect()
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return path.is_empty();
    };
    if *head == "*" {
        if rest.is_empty() {
            return true;
        }
        return (0..path.len()).any(|skip| match_segments(rest, &path[skip + 1..]));
    }
    if let Some(param) = head.strip_prefix(':') {
        if param_is_optional(param) {
            return match_segments(rest, path)
                || (!path.is_empty() && match_segments(rest, &path[1..]));
        }
        return !path.is_empty() && match_segments(rest, &path[1..]);
    }
    path.first() == Some(head) && match_segments(rest, &path[1..])
}

/// `:id?`, ignoring any `{regex}` constraint.
fn param_is_optional(param: &str) -> bool {
    let name = match param.find('{') {
        Some(idx) => &param[..idx],
        None => param,
    };
    name.ends_with('?') || param.ends_with('?')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HandlerRef, Origin, ResourceKind};

    fn resource(method: &str, path: &str, kind: ResourceKind, order: usize) -> Resource {
        Resource {
            id: format!("{}:test@{order}", kind.id_prefix()),
            method: method.to_string(),
            path: path.to_string(),
            kind,
            origin: Origin::Discovered,
            handler: HandlerRef::detached("h"),
            order,
        }
    }

    #[test]
    fn patterns() {
        assert!(path_matches("/users/:id", "/users/42"));
        assert!(!path_matches("/users/:id", "/users"));
        assert!(path_matches("/users/:id?", "/users"));
        assert!(path_matches("/api/*", "/api"));
        assert!(path_matches("/api/*", "/api/v1/items"));
        assert!(path_matches("*", "/anything/at/all"));
        assert!(path_matches("/a/*/c", "/a/b/c"));
        assert!(path_matches("/posts/:id{[0-9]+}", "/posts/7"));
        assert!(!path_matches("/users", "/users/1"));
    }

    #[test]
    fn middleware_and_route_in_order() {
        let resources = vec![
            resource("ALL", "/*", ResourceKind::Middleware, 0),
            resource("GET", "/users/:id", ResourceKind::Route, 1),
            resource("POST", "/users/:id", ResourceKind::Route, 2),
        ];
        let matched = match_request(&resources, "get", "/users/7?full=1");
        let orders: Vec<usize> = matched.iter().map(|r| r.order).collect();
        assert_eq!(orders, vec![0, 1]);
    }
}
