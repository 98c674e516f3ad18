use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};
use crate::services::scenario_images::IMAGES_ROUTE;

/// Records request count and latency per normalised route.
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Collapses session ids and image file names so label cardinality stays
/// bounded.
fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix(IMAGES_ROUTE) {
        if rest.len() > 1 && rest.starts_with('/') {
            return format!("{}/{{file}}", IMAGES_ROUTE);
        }
    }

    path.split('/')
        .map(|segment| {
            if is_uuid_like(segment) || is_numeric_id(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// UUID format: 8-4-4-4-12 hex characters
fn is_uuid_like(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/session/550e8400-e29b-41d4-a716-446655440000/answer"),
            "/api/session/{id}/answer"
        );
        assert_eq!(
            normalize_path("/api/session/550e8400-e29b-41d4-a716-446655440000"),
            "/api/session/{id}"
        );
        assert_eq!(normalize_path("/api/session/start"), "/api/session/start");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_image_paths() {
        assert_eq!(normalize_path("/images/junction_01.png"), "/images/{file}");
        assert_eq!(normalize_path("/images/"), "/images/");
        assert_eq!(normalize_path("/imagesx"), "/imagesx");
    }

    #[test]
    fn test_is_uuid_like() {
        assert!(is_uuid_like("550e8400-e29b-41d4-a716-446655440000"));
        assert!(!is_uuid_like("not-a-uuid"));
        assert!(!is_uuid_like("12345"));
    }

    #[test]
    fn test_is_numeric_id() {
        assert!(is_numeric_id("123"));
        assert!(!is_numeric_id("abc"));
        assert!(!is_numeric_id(""));
    }
}
