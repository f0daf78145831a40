//! Project-relative path resolution.

/// Derives the path of `cwd` relative to the project root `client_path`.
///
/// The root gets a leading `/`, then `cwd` is split around it. When the root
/// occurs exactly once, the remainder stripped of `/` is returned. Otherwise
/// the result is empty, meaning the project root. This never fails.
///
/// A root that occurs more than once in `cwd` is not disambiguated.
#[must_use]
pub fn resolve_rpath(cwd: &str, client_path: &str) -> String {
    let root = if client_path.starts_with('/') {
        client_path.to_string()
    } else {
        format!("/{client_path}")
    };

    if cwd.matches(root.as_str()).count() != 1 {
        return String::new();
    }

    cwd.split_once(root.as_str())
        .map(|(_, rest)| rest.trim_matches('/').to_string())
        .unwrap_or_default()
}
