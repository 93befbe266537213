//! io.net deployment orchestrator.
//!
//! High-level lifecycle management for one io.net deployment per cluster,
//! reconciled against locally persisted metadata.
//!
//! This module provides:
//! - `ensure_running()`: reuse a running deployment or create one and wait for it
//! - `inspect()`: head/worker view of the cluster's VMs
//! - `query_status()`: provider-agnostic status of every tracked deployment
//! - `terminate()`: destroy everything tracked and forget it locally
//! - `stop()`: always refused, io.net cannot stop VMs
//!
//! The remote is trusted over local metadata: records of deployments the
//! remote reports as gone (or does not know) are dropped with a log line.
//!
//! Operations on the same cluster must be serialized by the caller. Waiting
//! for readiness suspends the calling task; dropping the future (e.g. via
//! `tokio::time::timeout`) leaves the deployment running remotely and its
//! record in place, to be picked up by the next `ensure_running()`.

use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    env,
    path::PathBuf,
    sync::Mutex,
    time::Duration,
};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ionet_catalog::{self, CatalogError};
use crate::ionet_client::{
    ClientError, DeployRequest, DeploymentApi, RemoteStatus, RemoteVm, expand_home,
};
use crate::ionet_state::{
    DeploymentRecord, MetadataStore, NodeRole, StateStoreError, VmMapping,
};

/// Configuration for the io.net orchestrator.
#[derive(Clone, Debug)]
pub struct IonetOrchestratorConfig {
    /// Directory holding per-cluster metadata files.
    /// Env: `IONET_STATE_DIR` (default: "~/.ionet")
    pub state_dir: PathBuf,

    /// Delay between readiness polls in milliseconds.
    /// Env: `IONET_POLL_INTERVAL_MS` (default: 10000)
    pub poll_interval_ms: u64,

    /// Readiness polls before giving up (180 x 10s = 30 minutes).
    /// Env: `IONET_MAX_POLL_ATTEMPTS` (default: 180)
    pub max_poll_attempts: u32,
}

impl Default for IonetOrchestratorConfig {
    fn default() -> Self {
        Self {
            state_dir: expand_home("~/.ionet"),
            poll_interval_ms: 10_000,
            max_poll_attempts: 180,
        }
    }
}

impl IonetOrchestratorConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable holds an invalid value.
    pub fn from_env() -> Result<Self, OrchestratorError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        Ok(Self {
            state_dir: env::var("IONET_STATE_DIR").map_or(defaults.state_dir, |p| expand_home(&p)),
            poll_interval_ms: parse_env("IONET_POLL_INTERVAL_MS", defaults.poll_interval_ms)?,
            max_poll_attempts: parse_env("IONET_MAX_POLL_ATTEMPTS", defaults.max_poll_attempts)?,
        })
    }
}

/// What the caller wants deployed.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentSpec {
    /// Instance type, e.g. "ionet-h100-8x".
    pub instance_type: String,
    /// Region name, e.g. "us-east-1".
    pub region: String,
    /// Number of VMs.
    pub vm_count: u32,
    /// Lease duration in hours.
    pub duration_hours: u32,
    /// VM image type.
    pub vm_image_type: String,
    /// SSH public keys by name.
    pub ssh_keys: BTreeMap<String, String>,
    /// GitHub users whose keys are authorized.
    pub github_ids: Vec<String>,
    /// Network services passed through to the deploy call.
    pub network_services: Option<serde_json::Value>,
}

impl DeploymentSpec {
    /// Spec with a 24h lease on the general image and no identity material.
    #[must_use]
    pub fn new(instance_type: impl Into<String>, region: impl Into<String>, vm_count: u32) -> Self {
        Self {
            instance_type: instance_type.into(),
            region: region.into(),
            vm_count,
            duration_hours: 24,
            vm_image_type: "general".to_string(),
            ssh_keys: BTreeMap::new(),
            github_ids: Vec::new(),
            network_services: None,
        }
    }
}

/// Provider-agnostic cluster status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterStatus {
    /// Being provisioned (or in a state we do not recognize).
    Initializing,
    /// Running.
    Up,
}

impl ClusterStatus {
    /// Map a remote status. `None` means the deployment is gone.
    #[must_use]
    pub const fn from_remote(status: &RemoteStatus) -> Option<Self> {
        match status {
            RemoteStatus::Running => Some(Self::Up),
            RemoteStatus::Completed
            | RemoteStatus::Destroyed
            | RemoteStatus::TerminationRequested => None,
            // A failure may be transient on io.net's side.
            RemoteStatus::Requested
            | RemoteStatus::Failed
            | RemoteStatus::Unknown
            | RemoteStatus::Unmapped(_) => Some(Self::Initializing),
        }
    }
}

/// Status entry returned by [`IonetOrchestrator::query_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStatus {
    /// Mapped status, `None` once the deployment is gone or unobservable.
    pub status: Option<ClusterStatus>,
    /// Error detail, only filled when terminal entries were requested.
    pub error: Option<String>,
}

/// Handle to a running deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentHandle {
    /// io.net deployment id.
    pub deployment_id: String,
    /// Logical cluster name.
    pub cluster_name: String,
    /// Provider-facing cluster name.
    pub cluster_name_on_cloud: String,
    /// Region name.
    pub region: String,
    /// True if this call created the deployment, false if it was reused.
    pub created: bool,
}

/// One VM as seen by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceInfo {
    /// VM id.
    pub instance_id: String,
    /// Head or worker.
    pub role: NodeRole,
    /// Internal address.
    pub internal_ip: String,
    /// External address, if known.
    pub external_ip: Option<String>,
    /// SSH port.
    pub ssh_port: u16,
    /// Cluster tags.
    pub tags: BTreeMap<String, String>,
}

/// VMs of a cluster, head first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterView {
    /// Instances in head-first order.
    pub instances: Vec<InstanceInfo>,
    /// Id of the head instance, if any VM is known.
    pub head_instance_id: Option<String>,
}

impl ClusterView {
    /// The head instance.
    #[must_use]
    pub fn head(&self) -> Option<&InstanceInfo> {
        self.instances.iter().find(|i| i.role == NodeRole::Head)
    }
}

/// Outcome of [`IonetOrchestrator::terminate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TerminateReport {
    /// Deployments destroyed remotely (or already gone).
    pub destroyed: Vec<String>,
    /// Deployments whose destroy call failed, with the error. Still forgotten locally.
    pub failed: Vec<(String, String)>,
}

impl TerminateReport {
    /// True if every remote destroy succeeded.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

enum Existing {
    Ready,
    Pending,
    Dropped,
}

/// io.net orchestrator over an injected client and metadata store.
pub struct IonetOrchestrator<C, S> {
    client: C,
    store: S,
    cfg: IonetOrchestratorConfig,
    unmapped_seen: Mutex<HashSet<String>>,
}

impl<C: DeploymentApi, S: MetadataStore> IonetOrchestrator<C, S> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(client: C, store: S, cfg: IonetOrchestratorConfig) -> Self {
        Self {
            client,
            store,
            cfg,
            unmapped_seen: Mutex::new(HashSet::new()),
        }
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &IonetOrchestratorConfig {
        &self.cfg
    }

    /// The injected client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// The injected metadata store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Ensure the cluster has a running deployment.
    ///
    /// This method will:
    /// 1. Check every recorded deployment of the cluster against the remote
    /// 2. Return the first one that is running, dropping records the remote
    ///    reports as gone or unknown
    /// 3. Resume waiting on a recorded deployment that is still provisioning
    /// 4. Otherwise deploy, record, and wait for the new deployment
    ///
    /// # Errors
    ///
    /// Configuration errors (unknown instance type or region, zero VMs),
    /// remote failures on deploy, [`OrchestratorError::DeploymentFailed`] when
    /// io.net reports failure and [`OrchestratorError::ReadyTimeout`] when the
    /// poll budget runs out. The record is kept in both of these cases, except
    /// when the remote stops knowing the deployment mid-wait: that surfaces as
    /// `DeploymentFailed` with status "not found" and the record is dropped.
    pub async fn ensure_running(
        &self,
        cluster_name_on_cloud: &str,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentHandle, OrchestratorError> {
        let cluster = extract_cluster_name(cluster_name_on_cloud);

        for (_, mut record) in self.store.list(&cluster)? {
            match self.reconcile_existing(&cluster, &mut record).await? {
                Existing::Ready => {
                    info!(cluster = %cluster, deployment_id = %record.deployment_id, "found existing running deployment");
                    return Ok(handle(&record, false));
                }
                Existing::Pending => {
                    info!(cluster = %cluster, deployment_id = %record.deployment_id, "resuming wait on existing deployment");
                    self.wait_until_ready(&cluster, &mut record).await?;
                    return Ok(handle(&record, false));
                }
                Existing::Dropped => {}
            }
        }

        let mut record = self.create(&cluster, cluster_name_on_cloud, spec).await?;
        self.wait_until_ready(&cluster, &mut record).await?;
        info!(cluster = %cluster, deployment_id = %record.deployment_id, "ionet deployment is ready");
        Ok(handle(&record, true))
    }

    /// Head/worker view of the cluster's VMs.
    ///
    /// The head is the first VM the remote lists, unless a previous call
    /// already recorded a head that is still present; that head is kept so the
    /// assignment does not flap. Discovered VMs are written back to the record.
    ///
    /// Never fails: any error degrades to an empty view.
    pub async fn inspect(&self, cluster_name_on_cloud: &str) -> ClusterView {
        let cluster = extract_cluster_name(cluster_name_on_cloud);

        let index = match self.store.list(&cluster) {
            Ok(index) => index,
            Err(e) => {
                error!(cluster = %cluster, error = %e, "cannot read deployment metadata");
                return ClusterView::default();
            }
        };

        // At most one deployment per cluster.
        let Some((deployment_id, mut record)) = index.into_iter().next() else {
            return ClusterView::default();
        };

        let vms = match self.client.deployment_vms(&deployment_id).await {
            Ok(vms) => vms,
            Err(e) if e.is_not_found() => {
                self.forget(&cluster, &deployment_id, "remote does not know deployment");
                return ClusterView::default();
            }
            Err(e) => {
                error!(cluster = %cluster, deployment_id = %deployment_id, error = %e, "failed to get cluster info");
                return ClusterView::default();
            }
        };

        if vms.is_empty() {
            warn!(cluster = %cluster, deployment_id = %deployment_id, "no VMs found for deployment");
            return ClusterView::default();
        }

        let view = build_view(&mut record, cluster_name_on_cloud, &cluster, &vms);

        if let Err(e) = self.store.upsert(&cluster, &record) {
            error!(cluster = %cluster, deployment_id = %deployment_id, error = %e, "failed to save VM mappings");
        }
        view
    }

    /// Status of every tracked deployment of the cluster.
    ///
    /// With `non_terminated_only`, deployments that are gone (or could not be
    /// queried) are left out. Otherwise they are included with
    /// `status: None`, and failures carry an error detail.
    ///
    /// Records of deployments the remote reports as gone are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the metadata store fails.
    pub async fn query_status(
        &self,
        cluster_name_on_cloud: &str,
        non_terminated_only: bool,
    ) -> Result<BTreeMap<String, DeploymentStatus>, OrchestratorError> {
        let cluster = extract_cluster_name(cluster_name_on_cloud);
        let mut statuses = BTreeMap::new();

        for (deployment_id, mut record) in self.store.list(&cluster)? {
            let entry = match self.client.deployment_details(&deployment_id).await {
                Ok(details) => {
                    self.note_unmapped(&details.status);
                    if details.status.is_gone() {
                        self.forget(&cluster, &deployment_id, details.status.as_str());
                    } else if record.deployment_status != details.status.as_str() {
                        details.status.as_str().clone_into(&mut record.deployment_status);
                        self.store.upsert(&cluster, &record)?;
                    }

                    let error = (details.status == RemoteStatus::Failed)
                        .then(|| format!("deployment {deployment_id} reported status failed"));
                    DeploymentStatus {
                        status: ClusterStatus::from_remote(&details.status),
                        error,
                    }
                }
                Err(e) => {
                    if e.is_not_found() {
                        self.forget(&cluster, &deployment_id, "remote does not know deployment");
                    } else {
                        warn!(cluster = %cluster, deployment_id = %deployment_id, error = %e, "failed to query deployment");
                    }
                    DeploymentStatus {
                        status: None,
                        error: Some(e.to_string()),
                    }
                }
            };

            if non_terminated_only {
                if entry.status.is_some() {
                    statuses.insert(deployment_id, DeploymentStatus { error: None, ..entry });
                }
            } else {
                statuses.insert(deployment_id, entry);
            }
        }

        Ok(statuses)
    }

    /// Destroy every tracked deployment and forget it locally.
    ///
    /// A failed destroy is logged and reported but does not fail the call;
    /// the local record is removed regardless, so the remote deployment may
    /// leak.
    ///
    /// # Errors
    ///
    /// Returns an error only if the metadata store fails. Listing failures
    /// abort before any destroy; removal failures are logged, every remaining
    /// deployment is still destroyed, and the first one is returned at the end.
    pub async fn terminate(&self, cluster_name_on_cloud: &str) -> Result<TerminateReport, OrchestratorError> {
        let cluster = extract_cluster_name(cluster_name_on_cloud);
        let index = self.store.list(&cluster)?;
        let mut report = TerminateReport::default();
        let mut store_error = None;

        if index.is_empty() {
            warn!(cluster = %cluster, "no deployments found");
            return Ok(report);
        }

        for deployment_id in index.into_keys() {
            info!(cluster = %cluster, deployment_id = %deployment_id, "terminating ionet deployment");
            match self.client.destroy(&deployment_id).await {
                Ok(()) => {
                    info!(deployment_id = %deployment_id, "deployment terminated");
                    report.destroyed.push(deployment_id.clone());
                }
                Err(e) if e.is_not_found() => {
                    info!(deployment_id = %deployment_id, "deployment already gone");
                    report.destroyed.push(deployment_id.clone());
                }
                Err(e) => {
                    error!(
                        cluster = %cluster,
                        deployment_id = %deployment_id,
                        error = %e,
                        "failed to terminate deployment; removing local record anyway, remote resources may leak"
                    );
                    report.failed.push((deployment_id.clone(), e.to_string()));
                }
            }
            if let Err(e) = self.store.remove(&cluster, &deployment_id) {
                error!(cluster = %cluster, deployment_id = %deployment_id, error = %e, "failed to remove deployment record");
                store_error.get_or_insert(e);
            }
        }

        store_error.map_or(Ok(report), |e| Err(e.into()))
    }

    /// io.net cannot stop VMs; always fails without calling the remote.
    ///
    /// # Errors
    ///
    /// Always returns [`OrchestratorError::StopUnsupported`].
    pub fn stop(&self, cluster_name_on_cloud: &str) -> Result<(), OrchestratorError> {
        warn!(cluster = %cluster_name_on_cloud, "stop requested on ionet cluster");
        Err(OrchestratorError::StopUnsupported)
    }

    /// Check one recorded deployment against the remote.
    async fn reconcile_existing(
        &self,
        cluster: &str,
        record: &mut DeploymentRecord,
    ) -> Result<Existing, OrchestratorError> {
        let deployment_id = record.deployment_id.clone();

        let status = match self.client.deployment_details(&deployment_id).await {
            Ok(details) => details.status,
            Err(e) if e.is_not_found() => {
                self.forget(cluster, &deployment_id, "remote does not know deployment");
                return Ok(Existing::Dropped);
            }
            Err(e) => return Err(e.into()),
        };
        self.note_unmapped(&status);

        match status {
            RemoteStatus::Running => {
                if record.deployment_status != status.as_str() {
                    status.as_str().clone_into(&mut record.deployment_status);
                    self.store.upsert(cluster, record)?;
                }
                Ok(Existing::Ready)
            }
            RemoteStatus::Failed => {
                self.forget(cluster, &deployment_id, status.as_str());
                Ok(Existing::Dropped)
            }
            s if s.is_gone() => {
                self.forget(cluster, &deployment_id, s.as_str());
                Ok(Existing::Dropped)
            }
            _ => Ok(Existing::Pending),
        }
    }

    /// Submit a new deployment and record it before waiting on it.
    async fn create(
        &self,
        cluster: &str,
        cluster_name_on_cloud: &str,
        spec: &DeploymentSpec,
    ) -> Result<DeploymentRecord, OrchestratorError> {
        if spec.vm_count == 0 {
            return Err(OrchestratorError::InvalidSpec("vm_count must be at least 1"));
        }
        let hardware = ionet_catalog::hardware_for_instance_type(&spec.instance_type)?;
        let location_id = ionet_catalog::location_for_region(&spec.region)?;

        let request = DeployRequest {
            resource_private_name: cluster_name_on_cloud.to_string(),
            duration_hours: spec.duration_hours,
            gpus_per_vm: hardware.gpus_per_vm,
            hardware_id: hardware.hardware_id,
            location_ids: vec![location_id],
            vms_qty: spec.vm_count,
            vm_image_type: spec.vm_image_type.clone(),
            ssh_keys: spec.ssh_keys.clone(),
            github_ids: spec.github_ids.clone(),
            network_services: spec.network_services.clone(),
        };

        info!(
            cluster = %cluster,
            instance_type = %spec.instance_type,
            region = %spec.region,
            vms = spec.vm_count,
            "deploying ionet VMs"
        );
        let deployment_id = self.client.deploy(&request).await?;

        let record = DeploymentRecord {
            cluster_name: cluster.to_string(),
            cluster_name_on_cloud: cluster_name_on_cloud.to_string(),
            deployment_id,
            region: spec.region.clone(),
            hardware_id: hardware.hardware_id,
            gpus_per_vm: hardware.gpus_per_vm,
            vm_count: spec.vm_count,
            vm_mappings: BTreeMap::new(),
            created_at: Utc::now(),
            deployment_status: RemoteStatus::Requested.as_str().to_string(),
        };
        self.store.upsert(cluster, &record)?;
        Ok(record)
    }

    /// Poll until the deployment runs, fails, or the poll budget is spent.
    async fn wait_until_ready(
        &self,
        cluster: &str,
        record: &mut DeploymentRecord,
    ) -> Result<(), OrchestratorError> {
        let interval = Duration::from_millis(self.cfg.poll_interval_ms);
        let max_attempts = self.cfg.max_poll_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.client.deployment_details(&record.deployment_id).await {
                Ok(details) => {
                    let status = details.status;
                    self.note_unmapped(&status);

                    if status == RemoteStatus::Running || status == RemoteStatus::Failed || status.is_gone() {
                        status.as_str().clone_into(&mut record.deployment_status);
                        self.store.upsert(cluster, record)?;
                    }
                    if status == RemoteStatus::Running {
                        return Ok(());
                    }
                    if status == RemoteStatus::Failed || status.is_gone() {
                        return Err(OrchestratorError::DeploymentFailed {
                            deployment_id: record.deployment_id.clone(),
                            status: status.to_string(),
                        });
                    }
                    info!(
                        deployment_id = %record.deployment_id,
                        status = %status,
                        attempt,
                        max_attempts,
                        "waiting for deployment"
                    );
                }
                Err(e) if e.is_not_found() => {
                    self.forget(cluster, &record.deployment_id, "remote does not know deployment");
                    return Err(OrchestratorError::DeploymentFailed {
                        deployment_id: record.deployment_id.clone(),
                        status: "not found".to_string(),
                    });
                }
                Err(e) if e.is_malformed() => return Err(e.into()),
                Err(e) => {
                    warn!(deployment_id = %record.deployment_id, attempt, error = %e, "error checking deployment status");
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }

        Err(OrchestratorError::ReadyTimeout {
            deployment_id: record.deployment_id.clone(),
            attempts: max_attempts,
        })
    }

    /// Drop a record the remote no longer backs. Failures are only logged.
    fn forget(&self, cluster: &str, deployment_id: &str, reason: &str) {
        info!(cluster = %cluster, deployment_id = %deployment_id, reason, "dropping stale deployment record");
        if let Err(e) = self.store.remove(cluster, deployment_id) {
            error!(cluster = %cluster, deployment_id = %deployment_id, error = %e, "failed to drop stale deployment record");
        }
    }

    /// Log each unrecognized remote status string once.
    fn note_unmapped(&self, status: &RemoteStatus) {
        if let RemoteStatus::Unmapped(raw) = status
            && let Ok(mut seen) = self.unmapped_seen.lock()
            && seen.insert(raw.clone())
        {
            warn!(status = %raw, "unrecognized ionet deployment status, treating as initializing");
        }
    }
}

fn handle(record: &DeploymentRecord, created: bool) -> DeploymentHandle {
    DeploymentHandle {
        deployment_id: record.deployment_id.clone(),
        cluster_name: record.cluster_name.clone(),
        cluster_name_on_cloud: record.cluster_name_on_cloud.clone(),
        region: record.region.clone(),
        created,
    }
}

/// Build the view and replace the record's VM mappings with what the remote lists.
fn build_view(
    record: &mut DeploymentRecord,
    cluster_name_on_cloud: &str,
    cluster: &str,
    vms: &[RemoteVm],
) -> ClusterView {
    let mut seen = BTreeSet::new();
    let listed: Vec<(String, &RemoteVm)> = vms
        .iter()
        .enumerate()
        .map(|(i, vm)| (vm.id().map_or_else(|| format!("vm-{i}"), str::to_string), vm))
        .filter(|(id, _)| seen.insert(id.clone()))
        .collect();

    let head_index = record
        .head_vm_id()
        .and_then(|head| listed.iter().position(|(id, _)| id == head))
        .unwrap_or(0);

    let mut view = ClusterView::default();
    let mut mappings = BTreeMap::new();

    let ordered = listed
        .get(head_index)
        .into_iter()
        .chain(listed.iter().enumerate().filter(|(i, _)| *i != head_index).map(|(_, vm)| vm));

    for (vm_id, vm) in ordered {
        let role = if view.instances.is_empty() {
            NodeRole::Head
        } else {
            NodeRole::Worker
        };
        let ssh_access = vm.ssh_access.clone().unwrap_or_default();
        let external_ip = (!ssh_access.trim().is_empty()).then(|| extract_external_address(&ssh_access));
        let internal_ip = vm
            .internal_ip
            .clone()
            .filter(|ip| !ip.is_empty())
            .unwrap_or_else(|| "127.0.0.1".to_string());

        let tags = BTreeMap::from([
            ("ray-cluster-name".to_string(), cluster_name_on_cloud.to_string()),
            ("ray-node-kind".to_string(), role.as_str().to_string()),
            ("skypilot-cluster-name".to_string(), cluster.to_string()),
            ("ionet-deployment-id".to_string(), record.deployment_id.clone()),
        ]);

        mappings.insert(
            vm_id.clone(),
            VmMapping {
                role,
                internal_ip: internal_ip.clone(),
                external_ip: external_ip.clone(),
                ssh_access,
            },
        );
        if role == NodeRole::Head {
            view.head_instance_id = Some(vm_id.clone());
        }
        view.instances.push(InstanceInfo {
            instance_id: vm_id.clone(),
            role,
            internal_ip,
            external_ip,
            ssh_port: 22,
            tags,
        });
    }

    record.vm_mappings = mappings;
    view
}

/// External address from an io.net SSH access string.
///
/// Accepts "user@host", "ssh user@host" and bare "host".
#[must_use]
pub fn extract_external_address(ssh_access: &str) -> String {
    ssh_access
        .rsplit('@')
        .next()
        .unwrap_or(ssh_access)
        .trim()
        .to_string()
}

/// Logical cluster name: the provider-facing name without role suffixes.
#[must_use]
pub fn extract_cluster_name(cluster_name_on_cloud: &str) -> String {
    cluster_name_on_cloud.replace("-head", "").replace("-worker", "")
}

// ============================================================================
// Error type
// ============================================================================

/// Error type for orchestrator operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid environment variable value.
    #[error("invalid env var {key}: {reason}")]
    InvalidEnv {
        /// The environment variable key.
        key: &'static str,
        /// The reason for invalidity.
        reason: &'static str,
    },
    /// Unknown instance type or region.
    #[error("invalid configuration: {0}")]
    Catalog(#[from] CatalogError),
    /// Deployment spec rejected before any remote call.
    #[error("invalid deployment spec: {0}")]
    InvalidSpec(&'static str),
    /// Client error (configuration, remote rejection, exhausted retries).
    #[error("ionet client error: {0}")]
    Client(#[from] ClientError),
    /// Metadata store error.
    #[error("metadata store error: {0}")]
    State(#[from] StateStoreError),
    /// io.net reported the deployment as failed or gone while waiting.
    #[error("deployment {deployment_id} failed with status: {status}")]
    DeploymentFailed {
        /// Deployment id.
        deployment_id: String,
        /// Reported status.
        status: String,
    },
    /// io.net never reported the deployment as running.
    #[error("deployment {deployment_id} not ready after {attempts} polls")]
    ReadyTimeout {
        /// Deployment id.
        deployment_id: String,
        /// Polls made.
        attempts: u32,
    },
    /// Stopping is not supported.
    #[error("ionet does not support stopping instances; use terminate instead")]
    StopUnsupported,
}

impl OrchestratorError {
    /// True for errors caused by local configuration rather than the remote.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidEnv { .. }
                | Self::Catalog(_)
                | Self::InvalidSpec(_)
                | Self::Client(
                    ClientError::MissingCredential(_)
                        | ClientError::EmptyCredential(_)
                        | ClientError::CredentialRead { .. }
                        | ClientError::InvalidEnv { .. }
                )
        )
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, OrchestratorError> {
    env::var(key).map_or_else(
        |_| Ok(default),
        |v| {
            v.parse::<T>().map_err(|_| OrchestratorError::InvalidEnv {
                key,
                reason: "expected an unsigned integer",
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> DeploymentRecord {
        DeploymentRecord {
            cluster_name: "demo".into(),
            cluster_name_on_cloud: "demo-head".into(),
            deployment_id: "dep-1".into(),
            region: "us-east-1".into(),
            hardware_id: 1,
            gpus_per_vm: 1,
            vm_count: 3,
            vm_mappings: BTreeMap::new(),
            created_at: Utc::now(),
            deployment_status: "running".into(),
        }
    }

    fn vm(id: &str, ssh: &str) -> RemoteVm {
        RemoteVm {
            vm_id: Some(id.into()),
            container_id: None,
            ssh_access: Some(ssh.into()),
            internal_ip: Some(format!("10.0.0.{}", id.len())),
        }
    }

    #[test]
    fn external_address_handles_both_forms() {
        assert_eq!(extract_external_address("user@1.2.3.4"), "1.2.3.4");
        assert_eq!(extract_external_address("1.2.3.4"), "1.2.3.4");
        assert_eq!(extract_external_address("ssh ubuntu@5.6.7.8 "), "5.6.7.8");
    }

    #[test]
    fn cluster_name_strips_role_suffixes() {
        assert_eq!(extract_cluster_name("train-head"), "train");
        assert_eq!(extract_cluster_name("train-worker"), "train");
        assert_eq!(extract_cluster_name("train"), "train");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(ClusterStatus::from_remote(&RemoteStatus::Running), Some(ClusterStatus::Up));
        assert_eq!(
            ClusterStatus::from_remote(&RemoteStatus::Requested),
            Some(ClusterStatus::Initializing)
        );
        assert_eq!(
            ClusterStatus::from_remote(&RemoteStatus::Unmapped("warming".into())),
            Some(ClusterStatus::Initializing)
        );
        assert_eq!(ClusterStatus::from_remote(&RemoteStatus::Destroyed), None);
        assert_eq!(ClusterStatus::from_remote(&RemoteStatus::TerminationRequested), None);
    }

    #[test]
    fn first_vm_becomes_head() {
        let mut rec = record();
        let vms = vec![vm("a", "ubuntu@1.1.1.1"), vm("b", ""), RemoteVm::default()];
        let view = build_view(&mut rec, "demo-head", "demo", &vms);

        assert_eq!(view.head_instance_id.as_deref(), Some("a"));
        assert_eq!(view.instances.len(), 3);
        assert_eq!(view.instances[0].external_ip.as_deref(), Some("1.1.1.1"));
        assert_eq!(view.instances[1].external_ip, None);
        assert_eq!(view.instances[2].instance_id, "vm-2");
        assert_eq!(view.instances[2].internal_ip, "127.0.0.1");
        assert_eq!(view.instances[1].tags["ray-node-kind"], "worker");
        assert_eq!(rec.vm_mappings.len(), 3);
        assert_eq!(rec.head_vm_id(), Some("a"));
    }

    #[test]
    fn recorded_head_is_kept_when_order_changes() {
        let mut rec = record();
        let _ = build_view(&mut rec, "demo-head", "demo", &[vm("a", "1.1.1.1"), vm("b", "2.2.2.2")]);

        let view = build_view(&mut rec, "demo-head", "demo", &[vm("b", "2.2.2.2"), vm("a", "1.1.1.1")]);
        assert_eq!(view.head_instance_id.as_deref(), Some("a"));
        assert_eq!(view.instances[1].instance_id, "b");
        assert_eq!(rec.vm_mappings["b"].role, NodeRole::Worker);
    }

    #[test]
    fn duplicate_vm_ids_are_collapsed() {
        let mut rec = record();
        let view = build_view(&mut rec, "demo-head", "demo", &[vm("a", "1.1.1.1"), vm("a", "1.1.1.1")]);
        assert_eq!(view.instances.len(), 1);
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(OrchestratorError::InvalidSpec("x").is_configuration());
        assert!(
            OrchestratorError::Catalog(CatalogError::UnsupportedRegion("r".into())).is_configuration()
        );
        assert!(!OrchestratorError::StopUnsupported.is_configuration());
    }
}
