use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use super::{Bundle, ClusterScheduler, Labels, SchedulerError, WorkloadInfo, WorkloadRef, WorkloadSpec};

#[derive(Default)]
struct MemoryCluster {
    config_bundles: BTreeMap<String, Bundle>,
    secret_bundles: BTreeMap<String, Bundle>,
    workloads: BTreeMap<String, (WorkloadSpec, WorkloadInfo)>,
    /// config bundle name -> owning workload
    owners: BTreeMap<String, WorkloadRef>,
}

/// In-process [`ClusterScheduler`] for tests and local development.
///
/// Created workloads start pending; tests drive them with
/// [`MemoryScheduler::set_workload_counts`]. Deleting a workload also removes
/// config bundles it owns, mirroring garbage collection.
#[derive(Default)]
pub struct MemoryScheduler {
    cluster: Mutex<MemoryCluster>,
    next_uid: AtomicU64,
    fail_workload_creation: AtomicBool,
    fail_workload_deletion: AtomicBool,
}

impl MemoryScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn cluster(&self) -> MutexGuard<'_, MemoryCluster> {
        self.cluster.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make subsequent `create_workload` calls fail.
    pub fn fail_workload_creation(&self, fail: bool) {
        self.fail_workload_creation.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `delete_workload` calls fail.
    pub fn fail_workload_deletion(&self, fail: bool) {
        self.fail_workload_deletion.store(fail, Ordering::SeqCst);
    }

    /// Set pod counters of a workload; returns false if it does not exist.
    pub fn set_workload_counts(&self, name: &str, active: i32, succeeded: i32, failed: i32) -> bool {
        let mut cluster = self.cluster();
        let Some((_, info)) = cluster.workloads.get_mut(name) else {
            return false;
        };
        info.active = active;
        info.succeeded = succeeded;
        info.failed = failed;
        if active > 0 && info.start_time.is_none() {
            info.start_time = Some(Utc::now());
        }
        if active == 0 && (succeeded > 0 || failed > 0) {
            info.completion_time = Some(Utc::now());
        }
        true
    }

    /// Remove a workload without touching its bundles, as if deleted out of band.
    pub fn remove_workload(&self, name: &str) {
        self.cluster().workloads.remove(name);
    }

    pub fn workload_spec(&self, name: &str) -> Option<WorkloadSpec> {
        self.cluster().workloads.get(name).map(|(spec, _)| spec.clone())
    }

    pub fn config_bundle(&self, name: &str) -> Option<Bundle> {
        self.cluster().config_bundles.get(name).cloned()
    }

    pub fn secret_bundle(&self, name: &str) -> Option<Bundle> {
        self.cluster().secret_bundles.get(name).cloned()
    }

    pub fn config_bundle_owner(&self, name: &str) -> Option<WorkloadRef> {
        self.cluster().owners.get(name).cloned()
    }

    pub fn workload_count(&self) -> usize {
        self.cluster().workloads.len()
    }
}

fn matches_selector(labels: &Labels, selector: &Labels) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl ClusterScheduler for MemoryScheduler {
    async fn create_config_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
        let mut cluster = self.cluster();
        if cluster.config_bundles.contains_key(&bundle.name) {
            return Err(SchedulerError::Api(format!("ConfigMap {} already exists", bundle.name)));
        }
        cluster.config_bundles.insert(bundle.name.clone(), bundle.clone());
        Ok(())
    }

    async fn create_secret_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
        let mut cluster = self.cluster();
        if cluster.secret_bundles.contains_key(&bundle.name) {
            return Err(SchedulerError::Api(format!("Secret {} already exists", bundle.name)));
        }
        cluster.secret_bundles.insert(bundle.name.clone(), bundle.clone());
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadRef, SchedulerError> {
        if self.fail_workload_creation.load(Ordering::SeqCst) {
            return Err(SchedulerError::Api(format!(
                "Job {}: admission webhook denied the request",
                spec.name
            )));
        }
        let mut cluster = self.cluster();
        if cluster.workloads.contains_key(&spec.name) {
            return Err(SchedulerError::Api(format!("Job {} already exists", spec.name)));
        }
        let uid = format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst));
        let info = WorkloadInfo {
            name: spec.name.clone(),
            labels: spec.labels.clone(),
            active: 0,
            succeeded: 0,
            failed: 0,
            start_time: None,
            completion_time: None,
        };
        cluster.workloads.insert(spec.name.clone(), (spec.clone(), info));
        Ok(WorkloadRef {
            name: spec.name.clone(),
            uid,
        })
    }

    async fn set_config_bundle_owner(
        &self,
        bundle: &str,
        owner: &WorkloadRef,
    ) -> Result<(), SchedulerError> {
        let mut cluster = self.cluster();
        if !cluster.config_bundles.contains_key(bundle) {
            return Err(SchedulerError::NotFound(format!("ConfigMap {}", bundle)));
        }
        cluster.owners.insert(bundle.to_string(), owner.clone());
        Ok(())
    }

    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, SchedulerError> {
        Ok(self.cluster().workloads.get(name).map(|(_, info)| info.clone()))
    }

    async fn list_workloads(&self, selector: &Labels) -> Result<Vec<WorkloadInfo>, SchedulerError> {
        Ok(self
            .cluster()
            .workloads
            .values()
            .filter(|(_, info)| matches_selector(&info.labels, selector))
            .map(|(_, info)| info.clone())
            .collect())
    }

    async fn delete_workload(&self, name: &str) -> Result<(), SchedulerError> {
        if self.fail_workload_deletion.load(Ordering::SeqCst) {
            return Err(SchedulerError::Api(format!("Job {}: connection reset", name)));
        }
        let mut cluster = self.cluster();
        if cluster.workloads.remove(name).is_none() {
            return Err(SchedulerError::NotFound(format!("Job {}", name)));
        }
        let owned: Vec<String> = cluster
            .owners
            .iter()
            .filter(|(_, owner)| owner.name == name)
            .map(|(bundle, _)| bundle.clone())
            .collect();
        for bundle in owned {
            cluster.owners.remove(&bundle);
            cluster.config_bundles.remove(&bundle);
        }
        Ok(())
    }

    async fn delete_config_bundle(&self, name: &str) -> Result<(), SchedulerError> {
        let mut cluster = self.cluster();
        cluster.owners.remove(name);
        cluster
            .config_bundles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::NotFound(format!("ConfigMap {}", name)))
    }

    async fn delete_secret_bundle(&self, name: &str) -> Result<(), SchedulerError> {
        self.cluster()
            .secret_bundles
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::NotFound(format!("Secret {}", name)))
    }
}
