/// Collapses every run of slashes, drops leading and trailing ones and
/// re-prefixes a single `/`. The root (`""`, `"/"`, `"///"`) becomes `""`.
pub fn normalize_uri(path: &str) -> String {
    let segments: Vec<&str> = path.trim().split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return String::new();
    }
    format!("/{}", segments.join("/"))
}

/// Normalized concatenation of path fragments
pub fn join_url(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|p| normalize_uri(p))
        .collect::<String>();
    normalize_uri(&joined)
}

/// Shape axum expects for a normalized path: the root is `/`
pub(crate) fn route_path(normalized: &str) -> &str {
    if normalized.is_empty() {
        "/"
    } else {
        normalized
    }
}

/// Normalized, case-insensitive comparison
pub fn same_path(a: &str, b: &str) -> bool {
    normalize_uri(a).eq_ignore_ascii_case(&normalize_uri(b))
}
