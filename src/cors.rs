//! Cross-origin resource sharing middleware.
//!
//! # Responsibilities
//! - Stamp `Access-Control-*` headers onto every response in scope
//! - Answer `OPTIONS` preflights with 204, short-circuiting the chain
//!
//! # Design Decisions
//! - Preflights never reach the handler; the allow list is static
//!   configuration, not route-derived
//! - An origin allow list echoes a listed caller and falls back to the
//!   first entry otherwise; the wildcard origin skips `Vary`

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::Response;

use crate::context::Context;
use crate::middleware::{Flow, Middleware, Next};

enum Origin {
    Any,
    List(Vec<String>),
}

/// CORS policy. Attach with [`App::layer`](crate::App::layer).
///
/// Defaults mirror common browser expectations: any origin, the standard
/// mutating methods, credentials allowed, six-hour preflight cache.
pub struct Cors {
    origin: Origin,
    allow_methods: Vec<Method>,
    allow_headers: Vec<String>,
    expose_headers: Vec<String>,
    credentials: bool,
    max_age_secs: u64,
}

impl Default for Cors {
    fn default() -> Self {
        Cors::new()
    }
}

impl Cors {
    pub fn new() -> Self {
        Cors {
            origin: Origin::Any,
            allow_methods: vec![
                Method::GET,
                Method::HEAD,
                Method::PUT,
                Method::POST,
                Method::DELETE,
                Method::PATCH,
            ],
            allow_headers: Vec::new(),
            expose_headers: Vec::new(),
            credentials: true,
            max_age_secs: 21_600,
        }
    }

    /// Restrict to an explicit origin allow list.
    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origin = Origin::List(origins.into_iter().map(Into::into).collect());
        self
    }

    pub fn allow_methods<I>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = Method>,
    {
        self.allow_methods = methods.into_iter().collect();
        self
    }

    /// Headers a preflight may approve. When empty, the preflight echoes
    /// whatever the browser asked for in `Access-Control-Request-Headers`.
    pub fn allow_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn expose_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expose_headers = headers.into_iter().map(Into::into).collect();
        self
    }

    pub fn credentials(mut self, allow: bool) -> Self {
        self.credentials = allow;
        self
    }

    /// Preflight cache lifetime in seconds. Zero disables the cache headers.
    pub fn max_age(mut self, secs: u64) -> Self {
        self.max_age_secs = secs;
        self
    }

    fn resolve_origin(&self, request_origin: Option<&str>) -> Option<String> {
        match &self.origin {
            Origin::Any => Some("*".to_string()),
            Origin::List(list) => match request_origin {
                Some(origin) if list.iter().any(|o| o == origin) => Some(origin.to_string()),
                _ => list.first().cloned(),
            },
        }
    }

    /// Headers stamped onto both ordinary responses and preflights.
    fn apply(&self, cx: &Context, headers: &mut HeaderMap) {
        if let Some(origin) = self.resolve_origin(cx.header(header::ORIGIN.as_str())) {
            set(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &origin);
        }
        if matches!(self.origin, Origin::List(_)) {
            // Caches must key on the caller once the allowed origin varies.
            set(headers, header::VARY, "Origin");
        }
        if self.credentials {
            set(headers, header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
        }
        if !self.expose_headers.is_empty() {
            set(
                headers,
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                &self.expose_headers.join(","),
            );
        }
    }

    fn preflight(&self, cx: &Context) -> Response {
        let mut response = Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .unwrap_or_else(|_| Response::new(Body::empty()));
        let headers = response.headers_mut();
        self.apply(cx, headers);
        let methods = self
            .allow_methods
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(",");
        if !methods.is_empty() {
            set(headers, header::ACCESS_CONTROL_ALLOW_METHODS, &methods);
        }
        let allow_headers = if self.allow_headers.is_empty() {
            cx.header(header::ACCESS_CONTROL_REQUEST_HEADERS.as_str())
                .map(str::to_string)
        } else {
            Some(self.allow_headers.join(","))
        };
        if let Some(value) = allow_headers.filter(|v| !v.is_empty()) {
            set(headers, header::ACCESS_CONTROL_ALLOW_HEADERS, &value);
        }
        if self.max_age_secs > 0 {
            set(
                headers,
                header::ACCESS_CONTROL_MAX_AGE,
                &self.max_age_secs.to_string(),
            );
            set(
                headers,
                header::CACHE_CONTROL,
                &format!("public, max-age={0}, s-maxage={0}", self.max_age_secs),
            );
        }
        response
    }
}

fn set(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

#[async_trait]
impl Middleware for Cors {
    async fn call(&self, cx: Context, next: Next) -> Flow {
        if cx.method() == Method::OPTIONS {
            return Flow::Respond(self.preflight(&cx));
        }
        let mut response = next.run(cx.clone()).await;
        self.apply(&cx, response.headers_mut());
        Flow::Respond(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::App;
    use crate::codec::RichValue;
    use axum::http::Request;

    fn request(method: Method, path: &str, origin: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(origin) = origin {
            builder = builder.header(header::ORIGIN, origin);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn header_str<'a>(response: &'a Response, name: HeaderName) -> Option<&'a str> {
        response.headers().get(name).and_then(|v| v.to_str().ok())
    }

    fn app_with(cors: Cors) -> App {
        App::new()
            .layer(cors)
            .get("/data", |_cx: Context| async { RichValue::from("ok") })
    }

    #[tokio::test]
    async fn wildcard_policy_stamps_every_response() {
        let app = app_with(Cors::new());
        let response = app
            .handle(request(Method::GET, "/data", Some("https://example.com")))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some("*")
        );
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_CREDENTIALS),
            Some("true")
        );
        assert!(header_str(&response, header::VARY).is_none());
    }

    #[tokio::test]
    async fn preflight_short_circuits_with_204() {
        let app = app_with(Cors::new());
        let response = app
            .handle(request(Method::OPTIONS, "/data", Some("https://example.com")))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let methods = header_str(&response, header::ACCESS_CONTROL_ALLOW_METHODS).unwrap();
        assert!(methods.contains("GET"));
        assert!(methods.contains("DELETE"));
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_MAX_AGE),
            Some("21600")
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn listed_origin_is_echoed_with_vary() {
        let cors = Cors::new().origins(["https://a.example", "https://b.example"]);
        let app = app_with(cors);
        let response = app
            .handle(request(Method::GET, "/data", Some("https://b.example")))
            .await;
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some("https://b.example")
        );
        assert_eq!(header_str(&response, header::VARY), Some("Origin"));
    }

    #[tokio::test]
    async fn unlisted_origin_falls_back_to_first_entry() {
        let cors = Cors::new().origins(["https://a.example", "https://b.example"]);
        let app = app_with(cors);
        let response = app
            .handle(request(Method::GET, "/data", Some("https://evil.example")))
            .await;
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_ORIGIN),
            Some("https://a.example")
        );
    }

    #[tokio::test]
    async fn preflight_echoes_requested_headers_when_none_configured() {
        let app = app_with(Cors::new());
        let mut preflight = request(Method::OPTIONS, "/data", Some("https://a.example"));
        preflight.headers_mut().insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("x-custom, authorization"),
        );
        let response = app.handle(preflight).await;
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_HEADERS),
            Some("x-custom, authorization")
        );
    }

    #[tokio::test]
    async fn configured_allow_headers_win_over_the_request() {
        let cors = Cors::new().allow_headers(["x-api-key"]);
        let app = app_with(cors);
        let mut preflight = request(Method::OPTIONS, "/data", Some("https://a.example"));
        preflight.headers_mut().insert(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            HeaderValue::from_static("x-other"),
        );
        let response = app.handle(preflight).await;
        assert_eq!(
            header_str(&response, header::ACCESS_CONTROL_ALLOW_HEADERS),
            Some("x-api-key")
        );
    }
}
