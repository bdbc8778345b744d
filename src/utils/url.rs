//! URL helpers for the chat and completion endpoints.

/// Path of the streaming chat route relative to a server origin.
pub const CHAT_ROUTE: &str = "api/chat";

/// Path of the one-shot completion route relative to a server origin.
pub const COMPLETION_ROUTE: &str = "api/completion/complete";

/// Normalize a base URL by removing trailing slashes
///
/// # Examples
///
/// ```
/// use forkchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:3000/"), "http://localhost:3000");
/// assert_eq!(normalize_base_url("http://localhost:3000///"), "http://localhost:3000");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join a base URL and a route without doubling slashes.
///
/// # Examples
///
/// ```
/// use forkchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:3000/", "/api/chat"),
///     "http://localhost:3000/api/chat"
/// );
/// ```
pub fn construct_api_url(base_url: &str, route: &str) -> String {
    let normalized_base = normalize_base_url(base_url);
    let route = route.trim_start_matches('/');
    format!("{normalized_base}/{route}")
}

/// Resolve the configured endpoint to the streaming chat URL.
///
/// A value that already names the chat route is used as given; a bare
/// origin gets `/api/chat` appended.
///
/// ```
/// use forkchat::utils::url::chat_endpoint;
///
/// assert_eq!(chat_endpoint("http://localhost:3000"), "http://localhost:3000/api/chat");
/// assert_eq!(chat_endpoint("https://x.dev/api/chat/"), "https://x.dev/api/chat");
/// ```
pub fn chat_endpoint(endpoint: &str) -> String {
    let normalized = normalize_base_url(endpoint);
    if normalized.ends_with(CHAT_ROUTE) {
        normalized
    } else {
        construct_api_url(&normalized, CHAT_ROUTE)
    }
}

/// Completion URL served next to a resolved chat endpoint.
///
/// ```
/// use forkchat::utils::url::completion_endpoint;
///
/// assert_eq!(
///     completion_endpoint("http://localhost:3000/api/chat"),
///     "http://localhost:3000/api/completion/complete"
/// );
/// ```
pub fn completion_endpoint(chat_endpoint: &str) -> String {
    let normalized = normalize_base_url(chat_endpoint);
    let origin = normalized
        .strip_suffix(CHAT_ROUTE)
        .unwrap_or(normalized.as_str());
    construct_api_url(origin, COMPLETION_ROUTE)
}
