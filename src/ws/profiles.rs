use moka::sync::Cache;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, info};

use crate::clients::portal_client;

/// Public profile details fetched from the portal, used to enrich the
/// presence entry beyond what the JWT carries.
#[derive(Clone, Debug, Default)]
pub struct UserProfile {
    pub name: Option<String>,
    pub avatar: Option<String>,
}

static PROFILE_CACHE: OnceLock<Cache<String, UserProfile>> = OnceLock::new();

pub fn init_profile_cache() {
    get_profile_cache();
    info!("Profile cache initialized");
}

fn get_profile_cache() -> &'static Cache<String, UserProfile> {
    PROFILE_CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build()
    })
}

/// Entry count for diagnostics.
pub fn cache_entry_count() -> u64 {
    PROFILE_CACHE
        .get()
        .map(|cache| cache.entry_count())
        .unwrap_or(0)
}

fn parse_profile_from_json(json: Value) -> UserProfile {
    UserProfile {
        name: json
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        avatar: json
            .get("avatar")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}

/// Look up a user's profile, hitting the portal service on a cache
/// miss. Returns an empty profile when the portal client is not
/// configured or the lookup fails; the caller falls back to the
/// identity carried in the JWT.
pub async fn get_or_fetch_profile(uid: &str) -> UserProfile {
    let cache = get_profile_cache();

    if let Some(profile) = cache.get(uid) {
        return profile;
    }

    let Some(client) = portal_client::get_portal_client() else {
        return UserProfile::default();
    };

    match client.get_profile(uid).await {
        Ok(json) => {
            let profile = parse_profile_from_json(json);
            cache.insert(uid.to_string(), profile.clone());
            profile
        }
        Err(e) => {
            debug!("Profile lookup failed for {}: {}", uid, e);
            UserProfile::default()
        }
    }
}
