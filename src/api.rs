//! Remote service facade and its HTTP implementation.
//!
//! Every request goes to `<base>/api/v1<endpoint>` and carries the session's
//! bearer token when one is present.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::RemoteError;
use crate::models::{
    BirthProfile, CalendarSystem, CompatibilityResult, EntityId, EphemeralIdentity, NewRecord,
    RawRecord, RecordList, RegisteredUser, RegistrationResponse, Sex, StoredProfile,
};
use crate::session::Session;

pub const DEFAULT_API_BASE_URL: &str = "https://api.dothefortune.com";
const API_VERSION: &str = "/api/v1";

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn register_entity(
        &self,
        identity: &EphemeralIdentity,
        profile: &BirthProfile,
    ) -> Result<RegistrationResponse, RemoteError>;

    async fn compute_compatibility(
        &self,
        entity_id: &EntityId,
    ) -> Result<CompatibilityResult, RemoteError>;

    async fn fetch_own_profile(&self) -> Result<StoredProfile, RemoteError>;

    /// Most recent first.
    async fn list_records(&self, limit: u32) -> Result<Vec<RawRecord>, RemoteError>;

    async fn create_record(&self, record: &NewRecord) -> Result<Value, RemoteError>;
}

#[derive(Debug, Serialize)]
struct RegisterBody<'a> {
    email: &'a str,
    password: &'a str,
    name: &'a str,
    gender: &'static str,
    birth_year: i32,
    birth_month: u32,
    birth_day: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    birth_hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    birth_minute: Option<u32>,
    unknown_time: bool,
    birth_place: &'a str,
    is_lunar: bool,
}

impl<'a> RegisterBody<'a> {
    fn new(identity: &'a EphemeralIdentity, profile: &'a BirthProfile) -> Self {
        Self {
            email: &identity.email,
            password: &identity.password,
            name: &identity.name,
            gender: profile.sex.code(),
            birth_year: profile.year(),
            birth_month: profile.month(),
            birth_day: profile.day(),
            birth_hour: profile.hour(),
            birth_minute: profile.minute(),
            unknown_time: profile.birth_time.is_none(),
            birth_place: &profile.birth_place,
            is_lunar: profile.calendar_system == CalendarSystem::Lunar,
        }
    }
}

/// Stored fortune info as returned by `GET /fortune/info`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FortuneInfo {
    pub birth_year: Option<i32>,
    pub birth_month: Option<u32>,
    pub birth_day: Option<u32>,
    #[serde(default)]
    pub birth_hour: Option<u32>,
    #[serde(default)]
    pub birth_minute: Option<u32>,
    #[serde(default)]
    pub unknown_time: bool,
    #[serde(default)]
    pub birth_place: Option<String>,
    #[serde(default)]
    pub is_lunar: bool,
    #[serde(default)]
    pub user: Option<FortuneInfoUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FortuneInfoUser {
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl FortuneInfo {
    /// Keeps every field that is present and valid; never fails.
    pub fn into_stored(self) -> StoredProfile {
        let birth_date = match (self.birth_year, self.birth_month, self.birth_day) {
            (Some(y), Some(m), Some(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        let birth_time = if self.unknown_time {
            None
        } else {
            NaiveTime::from_hms_opt(
                self.birth_hour.unwrap_or(0),
                self.birth_minute.unwrap_or(0),
                0,
            )
        };
        let user = self.user.unwrap_or_default();
        let sex = user.gender.as_deref().map(|g| match g {
            "M" => Sex::Male,
            _ => Sex::Female,
        });

        StoredProfile {
            display_name: user.name.filter(|n| !n.trim().is_empty()),
            sex,
            calendar_system: Some(if self.is_lunar {
                CalendarSystem::Lunar
            } else {
                CalendarSystem::Solar
            }),
            birth_date,
            birth_time,
            birth_place: self.birth_place.filter(|p| !p.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<RegisteredUser>,
}

/// Message for a non-success response: body `error`, then `message`, then the status.
pub fn error_message(status: u16, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    parsed
        .as_ref()
        .and_then(|v| {
            ["error", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str))
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP error! status: {status}"))
}

pub struct HttpRemoteService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemoteService {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}{}", self.base_url, API_VERSION, endpoint)
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T, RemoteError> {
        let url = self.url(endpoint);
        debug!(method = %method, url = %url, has_token = self.token.is_some(), "API request");

        let mut builder = self.client.request(method, &url);
        if let Some(token) = self.token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = body {
            builder = builder.json(&body);
        }

        let response = builder.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %url, "API response");

        let text = response.text().await?;
        if !status.is_success() {
            let message = error_message(status.as_u16(), &text);
            warn!(status = status.as_u16(), url = %url, "API error: {}", message);
            return Err(RemoteError::Status {
                status: status.as_u16(),
                message,
            });
        }

        serde_json::from_str(&text).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// Authenticates and returns the session to persist.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, RemoteError> {
        let response: LoginResponse = self
            .request(
                Method::POST,
                "/auth/login",
                Some(json!({ "email": email, "password": password })),
            )
            .await?;

        let user = response.user.unwrap_or_default();
        Ok(Session {
            token: response.token,
            name: user.name,
            email: user.email.or_else(|| Some(email.to_string())),
        })
    }

    pub async fn logout(&self) -> Result<(), RemoteError> {
        let _: Value = self.request(Method::POST, "/auth/logout", None).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteService for HttpRemoteService {
    async fn register_entity(
        &self,
        identity: &EphemeralIdentity,
        profile: &BirthProfile,
    ) -> Result<RegistrationResponse, RemoteError> {
        let body = serde_json::to_value(RegisterBody::new(identity, profile))
            .map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.request(Method::POST, "/auth/register", Some(body)).await
    }

    async fn compute_compatibility(
        &self,
        entity_id: &EntityId,
    ) -> Result<CompatibilityResult, RemoteError> {
        let endpoint = format!("/compatibility/calculate?user2_id={entity_id}");
        self.request(Method::GET, &endpoint, None).await
    }

    async fn fetch_own_profile(&self) -> Result<StoredProfile, RemoteError> {
        let info: FortuneInfo = self.request(Method::GET, "/fortune/info", None).await?;
        Ok(info.into_stored())
    }

    async fn list_records(&self, limit: u32) -> Result<Vec<RawRecord>, RemoteError> {
        let list: RecordList = self
            .request(Method::GET, &format!("/records?limit={limit}"), None)
            .await?;
        Ok(list.records)
    }

    async fn create_record(&self, record: &NewRecord) -> Result<Value, RemoteError> {
        let body = serde_json::to_value(record).map_err(|e| RemoteError::Decode(e.to_string()))?;
        self.request(Method::POST, "/records", Some(body)).await
    }
}
