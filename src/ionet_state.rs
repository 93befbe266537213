//! Deployment metadata persistence.
//!
//! Unique responsibility: durably record, per logical cluster, which io.net
//! deployments were requested and what is known about them.
//!
//! Non-goals:
//! - Call the io.net API (done by `ionet_client` / `ionet_orchestrator`).
//! - Lock across processes. Callers serialize operations on one cluster.
//!
//! Layout: one JSON file per cluster, `<dir>/deployments-<cluster>.json`,
//! holding a map `deployment_id -> DeploymentRecord`. A cluster with no
//! records has no file at all, so "never deployed" and "all removed" look
//! the same.
//!
//! The metadata is a cache of what the provider reports. A corrupted file is
//! logged and read as empty instead of failing the caller.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Logical role of a VM inside a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// First VM; the cluster's control node.
    Head,
    /// Any other VM.
    Worker,
}

impl NodeRole {
    /// Tag value for this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Worker => "worker",
        }
    }
}

/// What is known about one VM of a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmMapping {
    /// Head or worker.
    pub role: NodeRole,
    /// Internal address.
    pub internal_ip: String,
    /// External address, if the VM exposes SSH.
    pub external_ip: Option<String>,
    /// Raw SSH access string as reported by io.net.
    pub ssh_access: String,
}

/// One remote deployment request and its last known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Logical cluster name.
    pub cluster_name: String,
    /// Provider-facing cluster name.
    pub cluster_name_on_cloud: String,
    /// Id assigned by io.net on deploy. Never changes.
    pub deployment_id: String,
    /// Region name.
    pub region: String,
    /// io.net hardware id.
    pub hardware_id: u32,
    /// GPUs per VM.
    pub gpus_per_vm: u32,
    /// Requested number of VMs.
    pub vm_count: u32,
    /// Discovered VMs by id. Empty until the VMs have been inspected.
    #[serde(default)]
    pub vm_mappings: BTreeMap<String, VmMapping>,
    /// When the deploy call succeeded.
    pub created_at: DateTime<Utc>,
    /// Last observed remote status string.
    pub deployment_status: String,
}

impl DeploymentRecord {
    /// VM id currently recorded as head, if VMs have been discovered.
    #[must_use]
    pub fn head_vm_id(&self) -> Option<&str> {
        self.vm_mappings
            .iter()
            .find(|(_, vm)| vm.role == NodeRole::Head)
            .map(|(id, _)| id.as_str())
    }
}

/// Every record of one cluster, keyed by deployment id.
pub type ClusterMetadataIndex = BTreeMap<String, DeploymentRecord>;

/// Errors for metadata store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// I/O error.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// Serialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Invalid record or cluster name.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
}

/// Per-cluster persistence of deployment records.
pub trait MetadataStore: Send + Sync {
    /// All records of `cluster`; empty if none were ever stored.
    ///
    /// # Errors
    ///
    /// Returns an error only for unrecoverable I/O failures.
    fn list(&self, cluster: &str) -> Result<ClusterMetadataIndex, StateStoreError>;

    /// Insert or replace the record under its `deployment_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the record is invalid or cannot be written.
    fn upsert(&self, cluster: &str, record: &DeploymentRecord) -> Result<(), StateStoreError>;

    /// Remove a record. Removing an unknown id is a no-op.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be rewritten.
    fn remove(&self, cluster: &str, deployment_id: &str) -> Result<(), StateStoreError>;

    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Same as [`MetadataStore::list`].
    fn get(
        &self,
        cluster: &str,
        deployment_id: &str,
    ) -> Result<Option<DeploymentRecord>, StateStoreError> {
        Ok(self.list(cluster)?.remove(deployment_id))
    }

    /// Drop every record whose id is not in `active_ids`.
    ///
    /// # Errors
    ///
    /// Same as [`MetadataStore::remove`].
    fn refresh(&self, cluster: &str, active_ids: &BTreeSet<String>) -> Result<(), StateStoreError> {
        for deployment_id in self.list(cluster)?.into_keys() {
            if !active_ids.contains(&deployment_id) {
                self.remove(cluster, &deployment_id)?;
            }
        }
        Ok(())
    }
}

/// JSON-file metadata store, one file per cluster, with atomic writes.
#[derive(Debug, Clone)]
pub struct JsonFileMetadataStore {
    dir: PathBuf,
}

impl JsonFileMetadataStore {
    /// Create a store rooted at `dir`. The directory is created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the index of `cluster`.
    #[must_use]
    pub fn path_for(&self, cluster: &str) -> PathBuf {
        self.dir.join(format!("deployments-{cluster}.json"))
    }

    fn load(&self, cluster: &str) -> Result<ClusterMetadataIndex, StateStoreError> {
        validate_cluster_name(cluster)?;
        let path = self.path_for(cluster);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ClusterMetadataIndex::new()),
            Err(source) => return Err(StateStoreError::Io { path, source }),
        };

        match serde_json::from_slice::<ClusterMetadataIndex>(&bytes) {
            Ok(index) => Ok(index),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupted deployment metadata, treating as empty");
                Ok(ClusterMetadataIndex::new())
            }
        }
    }

    fn save(&self, cluster: &str, index: &ClusterMetadataIndex) -> Result<(), StateStoreError> {
        let path = self.path_for(cluster);

        if index.is_empty() {
            return match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(source) => Err(StateStoreError::Io { path, source }),
            };
        }

        fs::create_dir_all(&self.dir).map_err(|source| StateStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        // Write to a temp file in the same directory, then rename over the target.
        let tmp = self.dir.join(format!(".deployments-{cluster}.json.tmp"));
        let json = serde_json::to_vec_pretty(index)?;

        let write_tmp = || -> io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&json)?;
            f.sync_all()
        };
        write_tmp().map_err(|source| StateStoreError::Io {
            path: tmp.clone(),
            source,
        })?;

        fs::rename(&tmp, &path).map_err(|source| StateStoreError::Io { path, source })?;
        debug!(cluster, records = index.len(), "deployment metadata saved");
        Ok(())
    }
}

impl MetadataStore for JsonFileMetadataStore {
    fn list(&self, cluster: &str) -> Result<ClusterMetadataIndex, StateStoreError> {
        self.load(cluster)
    }

    fn upsert(&self, cluster: &str, record: &DeploymentRecord) -> Result<(), StateStoreError> {
        if record.deployment_id.trim().is_empty() {
            return Err(StateStoreError::InvalidState("deployment_id is empty"));
        }
        let mut index = self.load(cluster)?;
        index.insert(record.deployment_id.clone(), record.clone());
        self.save(cluster, &index)
    }

    fn remove(&self, cluster: &str, deployment_id: &str) -> Result<(), StateStoreError> {
        let mut index = self.load(cluster)?;
        if index.remove(deployment_id).is_none() {
            return Ok(());
        }
        self.save(cluster, &index)
    }
}

fn validate_cluster_name(cluster: &str) -> Result<(), StateStoreError> {
    if cluster.trim().is_empty() {
        return Err(StateStoreError::InvalidState("cluster name is empty"));
    }
    if cluster.contains(['/', '\\']) || cluster == "." || cluster == ".." {
        return Err(StateStoreError::InvalidState(
            "cluster name must not contain path separators",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str) -> DeploymentRecord {
        DeploymentRecord {
            cluster_name: "demo".into(),
            cluster_name_on_cloud: "demo-head".into(),
            deployment_id: id.into(),
            region: "us-east-1".into(),
            hardware_id: 1,
            gpus_per_vm: 8,
            vm_count: 2,
            vm_mappings: BTreeMap::new(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 30, 5).unwrap(),
            deployment_status: "deployment requested".into(),
        }
    }

    #[test]
    fn missing_file_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        assert!(store.list("demo").unwrap().is_empty());
        assert!(store.get("demo", "x").unwrap().is_none());
    }

    #[test]
    fn index_round_trips_field_for_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path().join("nested"));

        let mut a = record("dep-a");
        a.created_at = Utc::now();
        a.vm_mappings.insert(
            "vm-1".into(),
            VmMapping {
                role: NodeRole::Head,
                internal_ip: "10.0.0.1".into(),
                external_ip: Some("1.2.3.4".into()),
                ssh_access: "ubuntu@1.2.3.4".into(),
            },
        );
        a.vm_mappings.insert(
            "vm-2".into(),
            VmMapping {
                role: NodeRole::Worker,
                internal_ip: "10.0.0.2".into(),
                external_ip: None,
                ssh_access: String::new(),
            },
        );
        let b = record("dep-b");

        store.upsert("demo", &a).unwrap();
        store.upsert("demo", &b).unwrap();

        let expected: ClusterMetadataIndex =
            [(a.deployment_id.clone(), a), (b.deployment_id.clone(), b)].into();
        assert_eq!(store.list("demo").unwrap(), expected);

        // A fresh store over the same directory sees the same index.
        let reopened = JsonFileMetadataStore::new(store.dir());
        assert_eq!(reopened.list("demo").unwrap(), expected);
    }

    #[test]
    fn on_disk_format_is_a_map_of_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.upsert("demo", &record("dep-a")).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(store.path_for("demo")).unwrap()).unwrap();
        assert_eq!(raw["dep-a"]["deployment_id"], "dep-a");
        assert_eq!(raw["dep-a"]["hardware_id"], 1);
        assert_eq!(raw["dep-a"]["vm_mappings"], serde_json::json!({}));
    }

    #[test]
    fn upsert_replaces_existing_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        let mut r = record("dep-a");
        store.upsert("demo", &r).unwrap();
        r.deployment_status = "running".into();
        store.upsert("demo", &r).unwrap();

        let index = store.list("demo").unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["dep-a"].deployment_status, "running");
    }

    #[test]
    fn removing_last_record_deletes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.upsert("demo", &record("dep-a")).unwrap();
        store.upsert("demo", &record("dep-b")).unwrap();

        store.remove("demo", "dep-a").unwrap();
        assert!(store.path_for("demo").exists());

        store.remove("demo", "dep-b").unwrap();
        assert!(!store.path_for("demo").exists());
        assert_eq!(store.list("demo").unwrap(), store.list("never-deployed").unwrap());
    }

    #[test]
    fn removing_unknown_id_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.remove("demo", "nothing").unwrap();
        assert!(!store.path_for("demo").exists());
    }

    #[test]
    fn corrupted_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        fs::write(store.path_for("demo"), b"{\"dep-a\": {\"cluster_na").unwrap();
        assert!(store.list("demo").unwrap().is_empty());

        // Writing again replaces the corrupted unit.
        store.upsert("demo", &record("dep-b")).unwrap();
        assert_eq!(store.list("demo").unwrap().len(), 1);
    }

    #[test]
    fn clusters_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.upsert("one", &record("dep-a")).unwrap();
        assert!(store.list("two").unwrap().is_empty());
    }

    #[test]
    fn refresh_drops_inactive_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        store.upsert("demo", &record("dep-a")).unwrap();
        store.upsert("demo", &record("dep-b")).unwrap();

        store
            .refresh("demo", &BTreeSet::from(["dep-b".to_string()]))
            .unwrap();
        let ids: Vec<_> = store.list("demo").unwrap().into_keys().collect();
        assert_eq!(ids, vec!["dep-b"]);

        store.refresh("demo", &BTreeSet::new()).unwrap();
        assert!(!store.path_for("demo").exists());
    }

    #[test]
    fn rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileMetadataStore::new(dir.path());
        assert!(matches!(store.list(""), Err(StateStoreError::InvalidState(_))));
        assert!(matches!(store.list("../x"), Err(StateStoreError::InvalidState(_))));
        assert!(matches!(
            store.upsert("demo", &record(" ")),
            Err(StateStoreError::InvalidState(_))
        ));
    }

    #[test]
    fn head_vm_is_found_by_role() {
        let mut r = record("dep-a");
        assert_eq!(r.head_vm_id(), None);
        r.vm_mappings.insert(
            "vm-9".into(),
            VmMapping {
                role: NodeRole::Head,
                internal_ip: "10.0.0.9".into(),
                external_ip: None,
                ssh_access: String::new(),
            },
        );
        assert_eq!(r.head_vm_id(), Some("vm-9"));
    }
}
