//! Cookie header parsing.

use std::collections::HashMap;

use axum::extract::Request;
use axum::http::header::COOKIE;
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

/// Cookies sent with the request, by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookies(pub HashMap<String, String>);

impl Cookies {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Parse every `Cookie` header. Later duplicates overwrite earlier ones.
pub fn parse(headers: &HeaderMap) -> Cookies {
    let pairs = headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        });
    Cookies(pairs.collect())
}

pub async fn parse_cookies(mut req: Request, next: Next) -> Response {
    let cookies = parse(req.headers());
    req.extensions_mut().insert(cookies);
    next.run(req).await
}
