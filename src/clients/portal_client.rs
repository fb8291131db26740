use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;

static PORTAL_CLIENT: OnceCell<Arc<PortalClient>> = OnceCell::const_new();

/// HTTP client for the portal API, authenticated with short-lived
/// service tokens.
#[derive(Debug)]
pub struct PortalClient {
    client: Client,
    base_url: String,
    jwt_secret: String,
    service_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

impl PortalClient {
    pub fn new(base_url: String, jwt_secret: String, service_name: String) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            jwt_secret,
            service_name,
        }
    }

    fn generate_token(&self) -> String {
        let expiration = Utc::now()
            .checked_add_signed(Duration::seconds(60)) // 1 minute expiration
            .expect("valid timestamp")
            .timestamp();

        let claims = Claims {
            sub: self.service_name.clone(),
            type_: "service".to_string(),
            exp: expiration as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .expect("Failed to generate JWT")
    }

    /// Fetch a user's public profile (display name, avatar)
    pub async fn get_profile(&self, uid: &str) -> Result<serde_json::Value, reqwest::Error> {
        let token = self.generate_token();
        let url = format!("{}/api/users/{}/profile", self.base_url, uid);
        self.client
            .get(&url)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await?
            .json()
            .await
    }
}

/// Initialize the global PortalClient
pub fn init_portal_client(
    base_url: String,
    jwt_secret: String,
    service_name: String,
) -> Result<(), &'static str> {
    let client = PortalClient::new(base_url, jwt_secret, service_name);
    PORTAL_CLIENT
        .set(Arc::new(client))
        .map_err(|_| "PortalClient already initialized")
}

/// Get the global PortalClient instance
pub fn get_portal_client() -> Option<Arc<PortalClient>> {
    PORTAL_CLIENT.get().cloned()
}
