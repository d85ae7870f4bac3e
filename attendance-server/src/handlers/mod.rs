pub mod cache;
pub mod entities;
pub mod eta;
pub mod events;
pub mod health;
pub mod locations;
pub mod participants;
pub mod webhook;
pub mod websocket;

use actix_web::{http::header, HttpRequest};

/// Bearer token from the `Authorization` header, with a `token` query
/// parameter fallback for clients that cannot set headers (browsers opening
/// a websocket).
pub fn access_token(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned);

    from_header.or_else(|| {
        url::form_urlencoded::parse(req.query_string().as_bytes())
            .find(|(key, _)| key == "token")
            .map(|(_, value)| value.into_owned())
    })
}
