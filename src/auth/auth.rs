use axum::{http::StatusCode, Json};

use crate::models::ErrorResponse;

const PORTAL_ADMIN_ROLE: &str = "portal-admin";

pub fn is_admin(roles: &[String]) -> bool {
    roles.iter().any(|r| r == PORTAL_ADMIN_ROLE)
}

pub fn ensure_admin(roles: &[String]) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    if is_admin(roles) {
        return Ok(PORTAL_ADMIN_ROLE.to_string());
    }

    let status = StatusCode::FORBIDDEN;
    Err((
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: "Portal admin access required".to_string(),
        }),
    ))
}
