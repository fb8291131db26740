use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tracing::{error, info};

use crate::config;
use crate::services::auth_service::{get_auth_token, validate_jwt};

pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(&req) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate Token
    let config = config::get_config();
    let secret = match &config.auth_jwt_secret {
        Some(secret) => secret,
        None => {
            error!("Auth JWT secret not configured");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    let token_data = match validate_jwt(&token, secret) {
        Ok(token_data) => token_data,
        Err(e) => {
            error!("JWT validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Extract the subject
    let sub = match token_data.claims.get("sub").and_then(|v| v.as_str()) {
        Some(sub) => sub.to_string(),
        None => {
            error!("JWT token does not contain 'sub' claim");
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 4. Determine the type of token (user/service)
    let token_type = token_data
        .claims
        .get("type")
        .and_then(|v| v.as_str())
        .unwrap_or("user");

    // 5A. User tokens carry their portal roles as a claim
    let roles: Vec<String> = if token_type == "user" {
        info!("User token validated successfully");
        match token_data.claims.get("roles").and_then(|v| v.as_array()) {
            Some(roles_array) => roles_array
                .iter()
                .filter_map(|r| r.as_str().map(|s| s.to_string()))
                .collect(),
            None => Vec::new(),
        }
    }
    // 5B. Service tokens get a single service role
    else if token_type == "service" {
        info!("Service token validated successfully");
        vec![format!("service/{}", sub)]
    } else {
        error!("JWT token has unknown type '{}'", token_type);
        return Err(StatusCode::UNAUTHORIZED);
    };

    // 6. Set identity and roles into request extensions for downstream
    // handlers
    {
        let extensions = req.extensions_mut();
        extensions.insert(roles);
        extensions.insert(sub);
    }

    Ok(next.run(req).await)
}
