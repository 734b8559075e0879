//! Tuya cloud OpenAPI client

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ControlGateway, GatewayResult};
use crate::config::TuyaConfig;
use crate::error::GatewayError;
use crate::models::Action;

type HmacSha256 = Hmac<Sha256>;

/// Regional OpenAPI endpoints
pub fn region_endpoint(region: &str) -> Option<&'static str> {
    match region.to_lowercase().as_str() {
        "us" => Some("https://openapi.tuyaus.com"),
        "us-e" => Some("https://openapi-ueaz.tuyaus.com"),
        "eu" => Some("https://openapi.tuyaeu.com"),
        "eu-w" => Some("https://openapi-weaz.tuyaeu.com"),
        "cn" => Some("https://openapi.tuyacn.com"),
        "in" => Some("https://openapi.tuyain.com"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
struct Session {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TuyaResponse<T> {
    success: bool,
    code: Option<i64>,
    msg: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TokenResult {
    access_token: String,
    expire_time: u64,
    uid: Option<String>,
}

/// Long-lived authenticated client for the Tuya cloud
pub struct TuyaCloud {
    base_url: String,
    client_id: String,
    secret: String,
    switch_code: String,
    session: RwLock<Option<Session>>,
    http_client: Client,
}

impl TuyaCloud {
    pub fn new(config: &TuyaConfig) -> Result<Self, GatewayError> {
        let base_url = match config.endpoint.as_deref() {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => region_endpoint(&config.region)
                .ok_or_else(|| {
                    GatewayError::Config(format!("unknown Tuya region: {}", config.region))
                })?
                .to_string(),
        };

        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            base_url,
            client_id: config.api_key.clone(),
            secret: config.api_secret.clone(),
            switch_code: config.switch_code.clone(),
            session: RwLock::new(None),
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Obtain a fresh access token and replace the current session
    pub async fn authenticate(&self) -> Result<(), GatewayError> {
        let raw = self
            .send(Method::GET, "/v1.0/token?grant_type=1", None, None)
            .await?;

        let response: TuyaResponse<TokenResult> =
            serde_json::from_value(raw).map_err(|e| GatewayError::Decode(e.to_string()))?;

        if !response.success {
            return Err(GatewayError::Api {
                code: response.code.unwrap_or_default(),
                message: response.msg.unwrap_or_else(|| "token request rejected".to_string()),
            });
        }

        let token = response
            .result
            .ok_or_else(|| GatewayError::Decode("no token in response".to_string()))?;

        {
            let mut session = self.session.write().await;
            *session = Some(Session {
                access_token: token.access_token,
                expires_at: Instant::now() + Duration::from_secs(token.expire_time),
            });
        }

        tracing::info!(
            "[Tuya] Session established (uid: {}), expires in {} sec",
            token.uid.as_deref().unwrap_or("-"),
            token.expire_time
        );
        Ok(())
    }

    pub async fn has_session(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Set the outlet switch on or off
    pub async fn set_switch(&self, remote_id: &str, on: bool) -> Result<serde_json::Value, GatewayError> {
        let body = json!({
            "commands": [{"code": self.switch_code, "value": on}]
        });
        let path = format!("/v1.0/iot-03/devices/{}/commands", remote_id);
        self.request(Method::POST, &path, Some(&body)).await
    }

    /// Provider status payload, unmodified
    pub async fn get_status(&self, remote_id: &str) -> Result<serde_json::Value, GatewayError> {
        let path = format!("/v1.0/iot-03/devices/{}/status", remote_id);
        self.request(Method::GET, &path, None).await
    }

    async fn current_token(&self) -> Result<String, GatewayError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(GatewayError::NotAuthenticated)?;

        if session.expires_at <= Instant::now() {
            tracing::debug!("[Tuya] Using expired session token until next refresh");
        }

        Ok(session.access_token.clone())
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        let token = self.current_token().await?;
        let raw = self.send(method, path, body, Some(&token)).await?;

        if raw.get("success").and_then(|v| v.as_bool()) == Some(true) {
            return Ok(raw);
        }

        Err(GatewayError::Api {
            code: raw.get("code").and_then(|v| v.as_i64()).unwrap_or_default(),
            message: raw
                .get("msg")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected")
                .to_string(),
        })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        access_token: Option<&str>,
    ) -> Result<serde_json::Value, GatewayError> {
        let body = body.map(|b| b.to_string()).unwrap_or_default();
        let t = Utc::now().timestamp_millis().to_string();
        let nonce = Uuid::new_v4().simple().to_string();

        let sign = sign_request(
            &self.client_id,
            &self.secret,
            access_token.unwrap_or_default(),
            &t,
            &nonce,
            method.as_str(),
            &body,
            path,
        )?;

        let mut request = self
            .http_client
            .request(method, format!("{}{}", self.base_url, path))
            .header("client_id", &self.client_id)
            .header("sign", sign)
            .header("t", t)
            .header("nonce", nonce)
            .header("sign_method", "HMAC-SHA256");

        if let Some(token) = access_token {
            request = request.header("access_token", token);
        }

        if !body.is_empty() {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request.send().await?;
        let status = response.status();

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| GatewayError::Decode(format!("HTTP {}: {}", status, e)))
    }
}

/// SHA-256 of the request body, lowercase hex
pub fn content_hash(body: &str) -> String {
    hex::encode(Sha256::digest(body.as_bytes()))
}

/// HMAC-SHA256 request signature, uppercase hex
#[allow(clippy::too_many_arguments)]
pub fn sign_request(
    client_id: &str,
    secret: &str,
    access_token: &str,
    t: &str,
    nonce: &str,
    method: &str,
    body: &str,
    path: &str,
) -> Result<String, GatewayError> {
    let string_to_sign = format!("{}\n{}\n\n{}", method, content_hash(body), path);
    let payload = format!("{}{}{}{}{}", client_id, access_token, t, nonce, string_to_sign);

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::Config(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());

    Ok(hex::encode_upper(mac.finalize().into_bytes()))
}

#[async_trait]
impl ControlGateway for TuyaCloud {
    async fn invoke(&self, remote_id: &str, action: Action) -> GatewayResult {
        let result = match action.switch_value() {
            Some(on) => self.set_switch(remote_id, on).await,
            None => self.get_status(remote_id).await,
        };

        match result {
            Ok(raw) => GatewayResult::ok(raw),
            Err(e) => {
                tracing::warn!("[Tuya] {} on {} failed: {}", action, remote_id, e);
                GatewayResult::failed(e.to_string())
            }
        }
    }

    fn name(&self) -> &'static str {
        "tuya"
    }
}
