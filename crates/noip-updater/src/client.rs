//! No-IP dynamic DNS update client: the callable the scheduled job runs.
//!
//! Protocol: `GET /nic/update?hostname=<host>[&myip=<ip>]` with HTTP Basic
//! auth. The plain-text body starts with a status word (`good`, `nochg`,
//! `nohost`, `badauth`, ...).

use std::time::Duration;

use async_trait::async_trait;
use noip_core::{config::HttpConfig, NoipError};
use noip_scheduler::{BoxError, UpdateCallable};
use reqwest::header::AUTHORIZATION;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("No-IP rejected the update: {0}")]
    Rejected(NoIpResponse),
}

impl From<UpdateError> for NoipError {
    fn from(err: UpdateError) -> Self {
        match err {
            UpdateError::Rejected(resp) => NoipError::Invocation(resp.to_string()),
            other => NoipError::Http(other.to_string()),
        }
    }
}

/// Parsed first word of a No-IP update response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoIpResponse {
    /// DNS updated; carries the new address.
    Good(String),
    /// Address unchanged.
    NoChange(String),
    NoHost,
    BadAuth,
    BadAgent,
    NotDonator,
    Abuse,
    /// Provider-side failure; retry later.
    ServerError,
    Unknown(String),
}

impl NoIpResponse {
    pub fn parse(body: &str) -> Self {
        let body = body.trim();
        let mut words = body.split_whitespace();
        let status = words.next().unwrap_or("");
        let ip = words.next().unwrap_or("").to_string();
        match status {
            "good" => NoIpResponse::Good(ip),
            "nochg" => NoIpResponse::NoChange(ip),
            "nohost" => NoIpResponse::NoHost,
            "badauth" => NoIpResponse::BadAuth,
            "badagent" => NoIpResponse::BadAgent,
            "!donator" => NoIpResponse::NotDonator,
            "abuse" => NoIpResponse::Abuse,
            "911" => NoIpResponse::ServerError,
            _ => NoIpResponse::Unknown(body.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, NoIpResponse::Good(_) | NoIpResponse::NoChange(_))
    }
}

impl std::fmt::Display for NoIpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoIpResponse::Good(ip) => write!(f, "good {ip}"),
            NoIpResponse::NoChange(ip) => write!(f, "nochg {ip}"),
            NoIpResponse::NoHost => write!(f, "nohost: hostname does not exist in this account"),
            NoIpResponse::BadAuth => write!(f, "badauth: invalid username/password"),
            NoIpResponse::BadAgent => write!(f, "badagent: client disabled by No-IP"),
            NoIpResponse::NotDonator => write!(f, "!donator: feature not available on this account"),
            NoIpResponse::Abuse => write!(f, "abuse: hostname blocked for update abuse"),
            NoIpResponse::ServerError => write!(f, "911: No-IP server error"),
            NoIpResponse::Unknown(body) => write!(f, "unrecognised response {body:?}"),
        }
    }
}

pub struct NoIpClient {
    http: reqwest::Client,
    endpoint: String,
    ip: Option<String>,
}

impl NoIpClient {
    /// Build a client from config. `ip` forces the reported address.
    pub fn new(config: &HttpConfig, ip: Option<String>) -> Result<Self, UpdateError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            ip,
        })
    }

    /// Send one update request and parse the reply.
    pub async fn send(&self, credential: &str, hostname: &str) -> Result<NoIpResponse, UpdateError> {
        let mut query = vec![("hostname", hostname)];
        if let Some(ip) = self.ip.as_deref() {
            query.push(("myip", ip));
        }

        let resp = self
            .http
            .get(&self.endpoint)
            .query(&query)
            .header(AUTHORIZATION, format!("Basic {credential}"))
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        debug!(status = status.as_u16(), body = %body.trim(), "No-IP response");

        let parsed = NoIpResponse::parse(&body);
        if !status.is_success() && matches!(parsed, NoIpResponse::Unknown(_)) {
            return Err(UpdateError::Status {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(parsed)
    }
}

#[async_trait]
impl UpdateCallable for NoIpClient {
    async fn update(&self, credential: &str, hostname: &str) -> Result<(), BoxError> {
        let resp = self
            .send(credential, hostname)
            .await
            .map_err(NoipError::from)?;
        if !resp.is_success() {
            return Err(NoipError::from(UpdateError::Rejected(resp)).into());
        }
        info!(%hostname, response = %resp, "No-IP accepted the update");
        Ok(())
    }
}
