//! io.net VMaaS REST client.
//!
//! Unique responsibility: typed deployment operations on top of the resilient
//! request layer.
//!
//! API base: <https://api.intelligence.io.solutions>
//! - POST   /enterprise/v1/io-cloud/vmaas/deploy
//! - GET    /enterprise/v1/io-cloud/vmaas/deployment/{id}
//! - GET    /enterprise/v1/io-cloud/vmaas/deployment/{id}/vms
//! - DELETE /enterprise/v1/io-cloud/vmaas/deployment/{id}
//! - GET    /enterprise/v1/io-cloud/vmaas/deployments
//! - Header: x-api-key: <token>
//!
//! The API key is read once, from a user-scoped file, when the client is
//! built. A missing or empty key fails construction.

use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::ionet_backoff::{Backoff, DEFAULT_MAX_BACKOFF_FACTOR};
use crate::ionet_request::{
    ApiRequest, DEFAULT_MAX_ATTEMPTS, RawResponse, RequestError, ReqwestTransport,
    RetryingRequester, Transport,
};

const VMAAS_PREFIX: &str = "/enterprise/v1/io-cloud/vmaas";

/// Configuration for the io.net client.
#[derive(Clone, Debug)]
pub struct IonetClientConfig {
    /// API base URL.
    /// Env: `IONET_API_URL` (default: "<https://api.intelligence.io.solutions>")
    pub api_url: String,

    /// File holding the API key.
    /// Env: `IONET_API_KEY_PATH` (default: "~/.ionet/api_key")
    pub api_key_path: PathBuf,

    /// HTTP request timeout in milliseconds.
    /// Env: `IONET_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// Maximum attempts per request (rate limits and transport errors).
    /// Env: `IONET_HTTP_RETRY_MAX_ATTEMPTS` (default: 6)
    pub max_attempts: u32,

    /// First retry delay in milliseconds.
    /// Env: `IONET_HTTP_RETRY_INITIAL_BACKOFF_MS` (default: 5000)
    pub initial_backoff_ms: u64,

    /// Cap on retry delay, as a multiple of the initial delay.
    /// Env: `IONET_HTTP_RETRY_MAX_BACKOFF_FACTOR` (default: 10)
    pub max_backoff_factor: u32,
}

impl Default for IonetClientConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.intelligence.io.solutions".to_string(),
            api_key_path: expand_home("~/.ionet/api_key"),
            timeout_ms: 30_000,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff_ms: 5_000,
            max_backoff_factor: DEFAULT_MAX_BACKOFF_FACTOR,
        }
    }
}

impl IonetClientConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value.
    pub fn from_env() -> Result<Self, ClientError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            api_url: env::var("IONET_API_URL").unwrap_or(defaults.api_url),
            api_key_path: env::var("IONET_API_KEY_PATH")
                .map_or(defaults.api_key_path, |p| expand_home(&p)),
            timeout_ms: parse_u64_env("IONET_HTTP_TIMEOUT_MS", defaults.timeout_ms)?,
            max_attempts: parse_u32_env("IONET_HTTP_RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            initial_backoff_ms: parse_u64_env(
                "IONET_HTTP_RETRY_INITIAL_BACKOFF_MS",
                defaults.initial_backoff_ms,
            )?,
            max_backoff_factor: parse_u32_env(
                "IONET_HTTP_RETRY_MAX_BACKOFF_FACTOR",
                defaults.max_backoff_factor,
            )?,
        })
    }

    fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.initial_backoff_ms),
            self.max_backoff_factor,
        )
    }
}

// ============================================================================
// Remote vocabulary
// ============================================================================

/// Deployment status as reported by io.net.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RemoteStatus {
    /// "deployment requested": VMs are being allocated.
    Requested,
    /// VMs are up.
    Running,
    /// Deployment failed.
    Failed,
    /// Deployment ran to the end of its duration.
    Completed,
    /// Deployment was destroyed.
    Destroyed,
    /// Destroy was requested and is in progress.
    TerminationRequested,
    /// The remote explicitly reported "unknown" or omitted the status.
    Unknown,
    /// A status string outside the known vocabulary.
    Unmapped(String),
}

impl RemoteStatus {
    /// Parse a remote status string. Case, `-` and `_` are not significant.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "deployment requested" | "requested" => Self::Requested,
            "running" => Self::Running,
            "failed" => Self::Failed,
            "completed" => Self::Completed,
            "destroyed" => Self::Destroyed,
            "termination requested" => Self::TerminationRequested,
            "unknown" | "" => Self::Unknown,
            _ => Self::Unmapped(raw.trim().to_string()),
        }
    }

    /// Status string as stored locally.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Requested => "deployment requested",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::Destroyed => "destroyed",
            Self::TerminationRequested => "termination requested",
            Self::Unknown => "unknown",
            Self::Unmapped(s) => s,
        }
    }

    /// True when the deployment no longer needs tracking.
    #[must_use]
    pub const fn is_gone(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Destroyed | Self::TerminationRequested
        )
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a deploy request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeployRequest {
    /// Provider-facing name of the deployment.
    pub resource_private_name: String,
    /// Lease duration in hours.
    pub duration_hours: u32,
    /// GPUs per VM.
    pub gpus_per_vm: u32,
    /// io.net hardware id.
    pub hardware_id: u32,
    /// Candidate location ids.
    pub location_ids: Vec<u32>,
    /// Number of VMs.
    pub vms_qty: u32,
    /// VM image type (e.g. "general").
    pub vm_image_type: String,
    /// SSH public keys by name.
    pub ssh_keys: BTreeMap<String, String>,
    /// GitHub users whose keys are authorized.
    pub github_ids: Vec<String>,
    /// Network services to expose, passed through as-is.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_services: Option<serde_json::Value>,
}

/// Deployment details.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentDetails {
    /// Parsed status.
    pub status: RemoteStatus,
    /// Full response body.
    pub raw: serde_json::Value,
}

/// One VM of a deployment, as listed by the API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteVm {
    /// VM id.
    #[serde(default)]
    pub vm_id: Option<String>,
    /// Container id (used when `vm_id` is absent).
    #[serde(default)]
    pub container_id: Option<String>,
    /// SSH access string ("user@host" or "host").
    #[serde(default)]
    pub ssh_access: Option<String>,
    /// Internal IP.
    #[serde(default)]
    pub internal_ip: Option<String>,
}

impl RemoteVm {
    /// Stable identifier of the VM: `vm_id`, then `container_id`.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.vm_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.container_id.as_deref().filter(|s| !s.is_empty()))
    }
}

// ============================================================================
// Client
// ============================================================================

/// Deployment operations used by the orchestrator.
#[async_trait]
pub trait DeploymentApi: Send + Sync {
    /// Submit a deployment and return its id.
    async fn deploy(&self, request: &DeployRequest) -> Result<String, ClientError>;
    /// Fetch deployment status.
    async fn deployment_details(&self, deployment_id: &str) -> Result<DeploymentDetails, ClientError>;
    /// List VMs of a deployment, in remote order.
    async fn deployment_vms(&self, deployment_id: &str) -> Result<Vec<RemoteVm>, ClientError>;
    /// Destroy a deployment.
    async fn destroy(&self, deployment_id: &str) -> Result<(), ClientError>;
    /// List ids of all deployments visible to the caller.
    async fn list_deployments(&self) -> Result<Vec<String>, ClientError>;
}

/// io.net VMaaS client.
pub struct IonetClient<T = ReqwestTransport> {
    requester: RetryingRequester<T>,
}

impl IonetClient<ReqwestTransport> {
    /// Create a client, reading the API key from `cfg.api_key_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file is missing or empty, or if the HTTP
    /// client cannot be built.
    pub fn new(cfg: &IonetClientConfig) -> Result<Self, ClientError> {
        let api_key = load_api_key(&cfg.api_key_path)?;
        let transport = ReqwestTransport::new(
            cfg.api_url.clone(),
            api_key,
            Duration::from_millis(cfg.timeout_ms),
        )
        .map_err(ClientError::Http)?;

        Ok(Self::with_transport(transport, cfg.max_attempts, cfg.backoff()))
    }
}

impl<T: Transport> IonetClient<T> {
    /// Create a client over an arbitrary transport.
    #[must_use]
    pub fn with_transport(transport: T, max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            requester: RetryingRequester::new(transport, max_attempts, backoff),
        }
    }

    /// The wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        self.requester.transport()
    }

    /// Check that the API key is accepted by listing deployments.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Authentication`] if the call fails.
    pub async fn verify_credentials(&self) -> Result<(), ClientError> {
        self.list_deployments()
            .await
            .map(|_| ())
            .map_err(|e| ClientError::Authentication(e.to_string()))
    }

    /// Maximum GPUs per VM for each hardware type.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn available_hardware(&self) -> Result<serde_json::Value, ClientError> {
        self.get_json(&format!("{VMAAS_PREFIX}/hardware/max-gpus-per-vm"), "hardware")
            .await
    }

    /// VM availability for a hardware type and quantity.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn available_vms(
        &self,
        hardware_id: u32,
        hardware_qty: u32,
        location_id: Option<u32>,
    ) -> Result<serde_json::Value, ClientError> {
        let mut path =
            format!("{VMAAS_PREFIX}/available-vms?hardware_id={hardware_id}&hardware_qty={hardware_qty}");
        if let Some(location_id) = location_id {
            path.push_str(&format!("&location_ids=[{location_id}]"));
        }
        self.get_json(&path, "available vms").await
    }

    /// Price quote for a deployment shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    pub async fn pricing(&self, quote: &PriceQuery) -> Result<serde_json::Value, ClientError> {
        let location_ids = serde_json::to_string(&quote.location_ids)
            .map_err(|source| ClientError::Decode { what: "location ids", source })?;
        let path = format!(
            "{VMAAS_PREFIX}/price?hardware_id={}&location_ids={location_ids}&duration_hours={}&gpus_per_vm={}&replica_count={}&currency=usdc",
            quote.hardware_id, quote.duration_hours, quote.gpus_per_vm, quote.replica_count
        );
        self.get_json(&path, "price").await
    }

    async fn get_json(&self, path: &str, what: &'static str) -> Result<serde_json::Value, ClientError> {
        let resp = self.requester.execute(&ApiRequest::get(path)).await?;
        resp.json().map_err(|source| ClientError::Decode { what, source })
    }
}

#[async_trait]
impl<T: Transport> DeploymentApi for IonetClient<T> {
    async fn deploy(&self, request: &DeployRequest) -> Result<String, ClientError> {
        let body = serde_json::to_value(request)
            .map_err(|source| ClientError::Decode { what: "deploy request", source })?;
        let resp = self
            .requester
            .execute(&ApiRequest::post(format!("{VMAAS_PREFIX}/deploy"), body))
            .await?;

        let deployment_id = parse_deploy_response(&resp)?;
        info!(deployment_id = %deployment_id, name = %request.resource_private_name, "ionet deployment submitted");
        Ok(deployment_id)
    }

    async fn deployment_details(&self, deployment_id: &str) -> Result<DeploymentDetails, ClientError> {
        let resp = self
            .requester
            .execute(&ApiRequest::get(format!("{VMAAS_PREFIX}/deployment/{deployment_id}")))
            .await?;
        parse_details(&resp)
    }

    async fn deployment_vms(&self, deployment_id: &str) -> Result<Vec<RemoteVm>, ClientError> {
        let resp = self
            .requester
            .execute(&ApiRequest::get(format!(
                "{VMAAS_PREFIX}/deployment/{deployment_id}/vms"
            )))
            .await?;
        parse_vms(&resp)
    }

    async fn destroy(&self, deployment_id: &str) -> Result<(), ClientError> {
        self.requester
            .execute(&ApiRequest::delete(format!("{VMAAS_PREFIX}/deployment/{deployment_id}")))
            .await?;
        debug!(deployment_id, "ionet destroy acknowledged");
        Ok(())
    }

    async fn list_deployments(&self) -> Result<Vec<String>, ClientError> {
        let resp = self
            .requester
            .execute(&ApiRequest::get(format!("{VMAAS_PREFIX}/deployments")))
            .await?;
        parse_deployment_list(&resp)
    }
}

/// Parameters for [`IonetClient::pricing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceQuery {
    /// io.net hardware id.
    pub hardware_id: u32,
    /// Candidate location ids.
    pub location_ids: Vec<u32>,
    /// Lease duration in hours.
    pub duration_hours: u32,
    /// GPUs per VM.
    pub gpus_per_vm: u32,
    /// Number of VMs.
    pub replica_count: u32,
}

// ============================================================================
// Response parsing
// ============================================================================

fn decode(resp: &RawResponse, what: &'static str) -> Result<serde_json::Value, ClientError> {
    resp.json().map_err(|source| ClientError::Decode { what, source })
}

fn parse_deploy_response(resp: &RawResponse) -> Result<String, ClientError> {
    let body = decode(resp, "deploy response")?;
    body.get("deployment_id")
        .or_else(|| body.pointer("/data/deployment_id"))
        .and_then(serde_json::Value::as_str)
        .filter(|id| !id.trim().is_empty())
        .map(str::to_string)
        .ok_or(ClientError::MissingDeploymentId)
}

fn parse_details(resp: &RawResponse) -> Result<DeploymentDetails, ClientError> {
    let raw = decode(resp, "deployment details")?;
    let status = raw
        .pointer("/data/status")
        .and_then(serde_json::Value::as_str)
        .map_or(RemoteStatus::Unknown, RemoteStatus::parse);
    Ok(DeploymentDetails { status, raw })
}

fn parse_vms(resp: &RawResponse) -> Result<Vec<RemoteVm>, ClientError> {
    let body = decode(resp, "deployment vms")?;
    match body.pointer("/data/workers") {
        Some(workers) => serde_json::from_value(workers.clone())
            .map_err(|source| ClientError::Decode { what: "deployment vms", source }),
        None => Ok(Vec::new()),
    }
}

fn parse_deployment_list(resp: &RawResponse) -> Result<Vec<String>, ClientError> {
    let body = decode(resp, "deployment list")?;
    let entries = body
        .pointer("/data/deployments")
        .or_else(|| body.get("deployments"))
        .or_else(|| body.get("data"))
        .and_then(serde_json::Value::as_array)
        .cloned()
        .unwrap_or_default();

    Ok(entries
        .iter()
        .filter_map(|entry| {
            entry
                .as_str()
                .or_else(|| entry.get("deployment_id").and_then(serde_json::Value::as_str))
                .or_else(|| entry.get("id").and_then(serde_json::Value::as_str))
                .map(str::to_string)
        })
        .collect())
}

// ============================================================================
// Error type
// ============================================================================

/// Error type for io.net client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// API key file does not exist.
    #[error("io.net API key not found at {}; create the file and add your API key", .0.display())]
    MissingCredential(PathBuf),
    /// API key file is empty.
    #[error("io.net API key is empty in {}", .0.display())]
    EmptyCredential(PathBuf),
    /// API key file could not be read.
    #[error("cannot read io.net API key at {}: {source}", .path.display())]
    CredentialRead {
        /// Key file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Credentials were rejected.
    #[error("failed to authenticate with io.net API: {0}")]
    Authentication(String),
    /// Invalid environment variable value.
    #[error("invalid env var {key}: {reason}")]
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The reason for invalidity.
        reason: &'static str,
    },
    /// HTTP client construction error.
    #[error("http client error: {0}")]
    Http(reqwest::Error),
    /// Request rejected or retries exhausted.
    #[error(transparent)]
    Request(#[from] RequestError),
    /// Response body did not match the expected schema.
    #[error("malformed {what}: {source}")]
    Decode {
        /// Which payload failed.
        what: &'static str,
        /// JSON error.
        source: serde_json::Error,
    },
    /// Deploy succeeded but no deployment id came back.
    #[error("no deployment_id returned from io.net API")]
    MissingDeploymentId,
}

impl ClientError {
    /// True when the remote answered that the deployment does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Request(RequestError::Api {
                status: 404 | 410,
                ..
            })
        )
    }

    /// True when the remote returned a response that could not be interpreted.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Decode { .. } | Self::MissingDeploymentId)
    }
}

// ============================================================================
// Helper functions
// ============================================================================

/// Read and trim the API key stored at `path`.
///
/// # Errors
///
/// Returns an error if the file is missing, unreadable, or empty.
pub fn load_api_key(path: &Path) -> Result<String, ClientError> {
    let raw = fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ClientError::MissingCredential(path.to_path_buf())
        } else {
            ClientError::CredentialRead {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let key = raw.trim();
    if key.is_empty() {
        return Err(ClientError::EmptyCredential(path.to_path_buf()));
    }
    Ok(key.to_string())
}

/// Expand a leading `~` to `$HOME`.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix('~'), env::var_os("HOME")) {
        (Some(rest), Some(home)) => {
            PathBuf::from(home).join(rest.trim_start_matches(['/', '\\']))
        }
        _ => PathBuf::from(path),
    }
}

fn parse_u32_env(key: &'static str, default: u32) -> Result<u32, ClientError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u32>().map_err(|_| ClientError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

fn parse_u64_env(key: &'static str, default: u64) -> Result<u64, ClientError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<u64>().map_err(|_| ClientError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}
