//! HTTP Basic authentication for the API routes.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use pdmcore::config;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

use super::error::ApiError;
use super::AppState;

type HmacSha256 = Hmac<Sha256>;

const CREDENTIAL_MAC_KEY: &[u8] = b"pdm-basic-auth";

/// MAC over a `user:password` pair. Tags are compared in constant time.
fn credential_mac(pair: &str) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(CREDENTIAL_MAC_KEY).ok()?;
    mac.update(pair.as_bytes());
    Some(mac)
}

pub struct Credentials {
    username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            password: SecretString::from(password.to_string()),
        }
    }

    pub fn from_config() -> Self {
        if config::LOGIN_PASSWORD.as_str() == config::DEFAULT_LOGIN_PASSWORD {
            log::warn!("Web API uses the default password; set LOGIN_PASSWORD");
        }
        Self::new(&config::LOGIN_USERNAME, &config::LOGIN_PASSWORD)
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check an `Authorization: Basic …` header value.
    pub fn verify(&self, header: &str) -> bool {
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(pair) = String::from_utf8(decoded) else {
            return false;
        };
        let expected = format!("{}:{}", self.username, self.password.expose_secret());
        match (credential_mac(&pair), credential_mac(&expected)) {
            (Some(presented), Some(stored)) => presented.verify_slice(&stored.finalize().into_bytes()).is_ok(),
            _ => false,
        }
    }
}

/// Middleware: reject requests without valid credentials.
pub async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let authorized = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| state.credentials.verify(value));

    if authorized {
        return next.run(request).await;
    }

    log::warn!("Rejected unauthenticated request to {}", request.uri().path());
    let mut response = ApiError::unauthorized().into_response();
    response
        .headers_mut()
        .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"PDM\""));
    response
}
