use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use tracing::info;

use crate::models::PresenceEntry;
use crate::ws::profiles;

/// Authenticated identity attached to a WebSocket connection for its
/// lifetime. Presence entries and cursor updates are derived from it.
#[derive(Clone, Debug)]
pub struct UserIdentity {
    pub user_id: String,
    pub name: String,
    pub initials: String,
    pub avatar: Option<String>,
}

impl UserIdentity {
    pub fn presence_entry(&self) -> PresenceEntry {
        PresenceEntry {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            initials: self.initials.clone(),
            avatar: self.avatar.clone(),
        }
    }
}

// Get the auth token from a set of request headers
pub fn token_from_headers(headers: &HeaderMap) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = headers
            .get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for cookie in cookie::Cookie::split_parse(cookie_header).flatten() {
            if cookie.name() == "auth_token" {
                return Ok(cookie.value().to_string());
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    token_from_headers(req.headers())
}

// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

/// Authenticate a connecting WebSocket client.
///
/// An invalid or expired credential is a fatal failure for the attempt
/// and is surfaced to the caller distinctly (HTTP 401 before upgrade);
/// it is never retried by the server side.
pub async fn authenticate_connection(token: &str) -> Result<UserIdentity, String> {
    let config = crate::config::get_config();
    let Some(secret) = &config.auth_jwt_secret else {
        return Err("No JWT secret configured!".to_string());
    };

    let token_data = validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;

    let token_type = token_data
        .claims
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("user");
    if token_type != "user" {
        return Err(format!("Token type '{}' cannot open a document session", token_type));
    }

    let uid = token_data
        .claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Can't extract a UID from the JWT token".to_string())?;
    info!("JWT token validated successfully for user: {}", uid);

    let claim_name = token_data
        .claims
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Enrich with the portal profile when available; the JWT claims are
    // the fallback.
    let profile = profiles::get_or_fetch_profile(uid).await;
    let name = profile
        .name
        .or(claim_name)
        .unwrap_or_else(|| uid.to_string());

    Ok(UserIdentity {
        user_id: uid.to_string(),
        initials: PresenceEntry::initials_from_name(&name),
        name,
        avatar: profile.avatar,
    })
}
