use axum::body::Body;
use axum::http::{header, Method, Request};
use serde_json::Value;

/// Builder for requests against the router
pub struct RequestBuilder {
    method: Method,
    uri: String,
    body: Option<Value>,
    raw_body: Option<String>,
    bearer: Option<String>,
    cookie: Option<String>,
}

impl RequestBuilder {
    pub fn get(uri: &str) -> Self {
        Self::new(Method::GET, uri)
    }

    pub fn post(uri: &str) -> Self {
        Self::new(Method::POST, uri)
    }

    fn new(method: Method, uri: &str) -> Self {
        Self {
            method,
            uri: uri.to_string(),
            body: None,
            raw_body: None,
            bearer: None,
            cookie: None,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Send `body` verbatim as `application/json`.
    pub fn raw_json(mut self, body: &str) -> Self {
        self.raw_body = Some(body.to_string());
        self
    }

    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer = Some(token.to_string());
        self
    }

    pub fn session_cookie(mut self, token: &str) -> Self {
        self.cookie = Some(format!("sid={token}"));
        self
    }

    pub fn build(self) -> Request<Body> {
        let mut builder = Request::builder().method(self.method).uri(self.uri);
        if let Some(token) = self.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        if let Some(cookie) = self.cookie {
            builder = builder.header(header::COOKIE, cookie);
        }

        let payload = match (self.body, self.raw_body) {
            (Some(value), _) => Some(value.to_string()),
            (None, raw) => raw,
        };
        match payload {
            Some(payload) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .expect("Failed to build request"),
            None => builder.body(Body::empty()).expect("Failed to build request"),
        }
    }
}
