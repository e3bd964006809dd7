//! Commvault API client for communicating with a CommServe backend.
//!
//! This module provides a per-target client for the Commvault REST API:
//! login with token caching, authenticated GETs, and defensive parsing of
//! the loosely-specified job and VM pseudo-client response shapes.

use crate::config::TargetConfig;
use crate::error::{CvError, Result};
use crate::token_cache::{AuthToken, TokenCache};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Commvault API client, scoped to a single target.
#[derive(Clone)]
pub struct CommvaultClient {
    client: Client,
    config: TargetConfig,
    target_name: String,
    token_cache: Arc<TokenCache>,
}

impl CommvaultClient {
    /// Create a new Commvault API client for one target.
    ///
    /// Fails if the target configuration is missing required fields or the
    /// underlying HTTP client cannot be built.
    pub fn new(
        target_name: &str,
        config: TargetConfig,
        token_cache: Arc<TokenCache>,
    ) -> Result<Self> {
        if config.api_url.is_empty() || config.username.is_empty() || config.password.is_empty() {
            return Err(CvError::Config(config::ConfigError::Message(format!(
                "target '{}': api_url, username and password are required",
                target_name
            ))));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()?;

        Ok(Self {
            client,
            config,
            target_name: target_name.to_string(),
            token_cache,
        })
    }

    /// Name of the target this client talks to.
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Authenticate against the backend and return a fresh token.
    ///
    /// The password is base64-encoded in the login body. The response shape
    /// differs between backend versions, so the token is extracted by trying
    /// each strategy in [`TOKEN_EXTRACTORS`] in order.
    pub async fn login(&self) -> Result<AuthToken> {
        let url = format!("{}/Login", self.config.api_url);
        debug!(target = %self.target_name, "Logging in at: {}", url);

        let body = json!({
            "username": self.config.username,
            "password": BASE64.encode(&self.config.password),
        });

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CvError::Auth(format!("login request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CvError::Auth(format!(
                "login returned HTTP {} for {}",
                status, url
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| CvError::Auth(format!("login response is not valid JSON: {}", e)))?;

        let token = extract_token(&parsed)
            .ok_or_else(|| CvError::Auth("no token field in login response".to_string()))?;

        debug!(target = %self.target_name, "Login succeeded");
        Ok(AuthToken::new(token))
    }

    /// Issue an authenticated GET and return the parsed JSON body.
    ///
    /// The token comes from the shared cache (logging in if needed); an
    /// authentication failure is a hard error. Transport errors, HTTP error
    /// statuses and unparseable bodies are soft failures: they are logged and
    /// yield `Ok(None)`, so one failing fetch never aborts sibling
    /// collections.
    pub async fn get(&self, endpoint: &str, params: &[(&str, String)]) -> Result<Option<Value>> {
        let token = self
            .token_cache
            .get_or_refresh(&self.target_name, || self.login())
            .await?;

        let url = format!("{}{}", self.config.api_url, endpoint);
        debug!(target = %self.target_name, "Fetching: {}", url);

        let response = match self
            .client
            .get(&url)
            .header("Authtoken", token)
            .header("Accept", "application/json")
            .query(params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(target = %self.target_name, "GET {} failed: {}", endpoint, e);
                return Ok(None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(target = %self.target_name, "GET {} returned HTTP {}", endpoint, status);
            return Ok(None);
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(Some(body)),
            Err(e) => {
                warn!(target = %self.target_name, "GET {} body is not valid JSON: {}", endpoint, e);
                Ok(None)
            }
        }
    }
}

/// One token-extraction strategy for the login response.
type TokenExtractor = fn(&Value) -> Option<String>;

/// Ordered extraction strategies; the first non-empty match wins.
pub const TOKEN_EXTRACTORS: &[(&str, TokenExtractor)] = &[
    ("top-level token", top_level_token),
    ("console session token", console_session_token),
];

fn top_level_token(body: &Value) -> Option<String> {
    nonempty_str(body.get("token")?)
}

fn console_session_token(body: &Value) -> Option<String> {
    body.get("console")?
        .as_array()?
        .iter()
        .find_map(|session| nonempty_str(session.get("token")?))
}

/// Extract a session token from a login response body.
pub fn extract_token(body: &Value) -> Option<String> {
    TOKEN_EXTRACTORS
        .iter()
        .find_map(|(_name, extract)| extract(body))
}

fn nonempty_str(value: &Value) -> Option<String> {
    value
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Four-way classification of a job's raw status string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Completed,
    Running,
    Failed,
    Unknown,
}

impl JobStatus {
    /// Map a raw backend status string onto the four-way classification.
    pub fn classify(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "completed" => JobStatus::Completed,
            "running" | "waiting" | "pending" | "queued" | "suspended" => JobStatus::Running,
            "failed" | "killed" | "completed w/ errors" | "completed w/ warnings" | "no run" => {
                JobStatus::Failed
            }
            _ => JobStatus::Unknown,
        }
    }

    /// Gauge value exposed for this status.
    pub fn value(&self) -> f64 {
        match self {
            JobStatus::Completed => 1.0,
            JobStatus::Running => 2.0,
            JobStatus::Failed => 0.0,
            JobStatus::Unknown => 3.0,
        }
    }
}

/// One finished or in-flight job reported by the backend.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job_id: String,
    pub job_type: String,
    pub client_name: String,
    pub subclient_name: String,
    pub status: JobStatus,
    pub duration_seconds: f64,
    pub start_time: f64,
    pub end_time: f64,
    pub failed_files: f64,
    pub failed_folders: f64,
    pub percent_complete: f64,
    pub app_size_bytes: f64,
    pub media_size_bytes: f64,
    pub alert_level: f64,
}

/// One VM pseudo-client entry from the client inventory.
#[derive(Debug, Clone)]
pub struct VmClientRecord {
    pub client_id: String,
    pub client_name: String,
    pub host_name: String,
    pub instance_name: String,
    pub status_code: String,
    pub status_str: String,
    /// (activity type, enabled) pairs from the client's activity control.
    pub activities: Vec<(String, bool)>,
}

impl VmClientRecord {
    /// Whether the client counts as active. Only a small whitelist of status
    /// codes/strings qualifies; anything else is inactive.
    pub fn is_active(&self) -> bool {
        matches!(self.status_code.as_str(), "0" | "1")
            || self.status_str.eq_ignore_ascii_case("configured")
    }
}

/// Parse one entry of the `jobs` list. The interesting fields live under a
/// nested `jobSummary` object; a missing summary or job ID makes the entry
/// malformed.
pub fn parse_job(entry: &Value) -> Result<JobRecord> {
    let summary = entry
        .get("jobSummary")
        .filter(|s| s.is_object())
        .ok_or_else(|| CvError::Parse("job entry has no jobSummary object".to_string()))?;

    let job_id = id_field(summary, "jobId")
        .ok_or_else(|| CvError::Parse("job entry is missing jobId".to_string()))?;

    let job_type = str_field(summary, "jobType")
        .unwrap_or_else(|| "unknown".to_string())
        .replace(' ', "_")
        .to_lowercase();

    // Client entity key differs between backend versions
    let client_name = summary
        .get("clientEntity")
        .or_else(|| summary.get("client"))
        .and_then(|entity| str_field(entity, "clientName"))
        .unwrap_or_else(|| "unknown".to_string());

    let subclient_name = summary
        .get("subclient")
        .and_then(|sub| str_field(sub, "subclientName"))
        .unwrap_or_else(|| "unknown".to_string());

    let status_raw = str_field(summary, "status").unwrap_or_else(|| "unknown".to_string());

    let alert_level = num_field(summary, "alertColorLevel")
        .or_else(|| num_field(summary, "severity"))
        .unwrap_or(0.0);

    Ok(JobRecord {
        job_id,
        job_type,
        client_name,
        subclient_name,
        status: JobStatus::classify(&status_raw),
        duration_seconds: num_field(summary, "jobElapsedTime").unwrap_or(0.0),
        start_time: num_field(summary, "jobStartTime").unwrap_or(0.0),
        end_time: num_field(summary, "jobEndTime").unwrap_or(0.0),
        failed_files: num_field(summary, "totalFailedFiles").unwrap_or(0.0),
        failed_folders: num_field(summary, "totalFailedFolders").unwrap_or(0.0),
        percent_complete: num_field(summary, "percentComplete").unwrap_or(0.0),
        app_size_bytes: num_field(summary, "sizeOfApplication").unwrap_or(0.0),
        media_size_bytes: num_field(summary, "sizeOfMediaOnDisk").unwrap_or(0.0),
        alert_level,
    })
}

/// Parse one entry of the `VSPseudoClientsList`. The client entity may sit
/// under `client.clientEntity` or directly under `client`; a missing entity
/// or client ID makes the entry malformed.
pub fn parse_vm_client(entry: &Value) -> Result<VmClientRecord> {
    let client = entry
        .get("client")
        .filter(|c| c.is_object())
        .ok_or_else(|| CvError::Parse("VM client entry has no client object".to_string()))?;
    let entity = client
        .get("clientEntity")
        .filter(|e| e.is_object())
        .unwrap_or(client);

    let client_id = id_field(entity, "clientId")
        .ok_or_else(|| CvError::Parse("VM client entry is missing clientId".to_string()))?;

    let client_name = str_field(entity, "clientName").unwrap_or_else(|| "unknown".to_string());
    let host_name = str_field(entity, "hostName").unwrap_or_else(|| "unknown".to_string());

    let instance_name = entry
        .get("instance")
        .and_then(|inst| str_field(inst, "instanceName"))
        .unwrap_or_else(|| "unknown".to_string());

    let status_info = entry.get("statusInfo");
    let status_code = status_info
        .and_then(|info| id_field(info, "status"))
        .or_else(|| id_field(entry, "status"))
        .unwrap_or_else(|| "unknown".to_string());
    let status_str = status_info
        .and_then(|info| str_field(info, "statusString"))
        .unwrap_or_else(|| status_code.clone());

    let activities = entry
        .get("clientActivityControl")
        .and_then(|ac| ac.get("activityControlOptions"))
        .and_then(Value::as_array)
        .map(|options| {
            options
                .iter()
                .map(|activity| {
                    let activity_type = id_field(activity, "activityType")
                        .unwrap_or_else(|| "unknown".to_string());
                    let enabled = activity
                        .get("enableActivityType")
                        .and_then(Value::as_bool)
                        .unwrap_or(false);
                    (activity_type, enabled)
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(VmClientRecord {
        client_id,
        client_name,
        host_name,
        instance_name,
        status_code,
        status_str,
        activities,
    })
}

/// Identity-ish field that the backend reports as either a number or a string.
fn id_field(obj: &Value, key: &str) -> Option<String> {
    match obj.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn str_field(obj: &Value, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Numeric field that may arrive as a JSON number or a numeric string.
fn num_field(obj: &Value, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
