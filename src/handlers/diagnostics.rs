use axum::{
    extract::{Extension, State},
    http::StatusCode,
    Json,
};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

use crate::auth::auth;
use crate::models::{DiagnosticsResponse, ErrorResponse};
use crate::ws::profiles;
use crate::AppState;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Room and system diagnostics
pub async fn diagnostics(
    State(state): State<Arc<AppState>>,
    Extension(roles): Extension<Vec<String>>,
) -> Result<(StatusCode, Json<DiagnosticsResponse>), (StatusCode, Json<ErrorResponse>)> {
    // Only portal admins may read diagnostics
    let _ = auth::ensure_admin(&roles)?;

    // Aggregate counters from the room registry
    let (n_conn, n_rooms, n_users) = state.registry.stats().await;
    let n_profile_cache = profiles::cache_entry_count() as u32;

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| Mutex::new(System::new_all()));
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0),
        }
    };

    info!(
        "Diagnostics: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Conn: {}, Rooms: {}",
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        n_conn,
        n_rooms
    );

    Ok((
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_conn,
            n_rooms,
            n_users,
            n_profile_cache,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    ))
}
