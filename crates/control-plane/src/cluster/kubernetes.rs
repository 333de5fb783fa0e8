use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapEnvSource, Container, EnvFromSource, PodSecurityContext, PodSpec,
    PodTemplateSpec, ResourceRequirements, Secret, SecretEnvSource, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::{debug, info};

use super::{Bundle, ClusterScheduler, Labels, SchedulerError, WorkloadInfo, WorkloadRef, WorkloadSpec};

const RUNNER_CONTAINER: &str = "notebook-runner";

/// [`ClusterScheduler`] backed by Kubernetes Jobs, ConfigMaps and Secrets.
#[derive(Clone)]
pub struct KubeScheduler {
    client: Client,
    namespace: String,
}

impl KubeScheduler {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using in-cluster config or the local kubeconfig.
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, SchedulerError> {
        let client = Client::try_default()
            .await
            .map_err(|e| SchedulerError::Api(format!("failed to create Kubernetes client: {}", e)))?;
        let namespace = namespace.into();
        info!(namespace = %namespace, "Kubernetes scheduler initialized");
        Ok(Self::new(client, namespace))
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn configmaps(&self) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn secrets(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn metadata(&self, name: &str, labels: &Labels) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        }
    }
}

fn map_error(what: &str, err: kube::Error) -> SchedulerError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            SchedulerError::NotFound(what.to_string())
        }
        other => SchedulerError::Api(format!("{}: {}", what, other)),
    }
}

pub(crate) fn selector_string(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Kubernetes Job for a workload descriptor.
pub(crate) fn build_job(spec: &WorkloadSpec, namespace: &str) -> Job {
    let quantities = |cpu: Option<&str>, memory: &str| {
        let mut map = BTreeMap::new();
        if let Some(cpu) = cpu {
            map.insert("cpu".to_string(), Quantity(cpu.to_string()));
        }
        map.insert("memory".to_string(), Quantity(memory.to_string()));
        map
    };

    let container = Container {
        name: RUNNER_CONTAINER.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(spec.image_pull_policy.clone()),
        env_from: Some(vec![
            EnvFromSource {
                config_map_ref: Some(ConfigMapEnvSource {
                    name: spec.config_bundle.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            },
            EnvFromSource {
                secret_ref: Some(SecretEnvSource {
                    name: spec.secret_bundle.clone(),
                    optional: Some(false),
                }),
                ..Default::default()
            },
        ]),
        resources: Some(ResourceRequirements {
            requests: Some(quantities(Some(&spec.cpu), &spec.memory)),
            limits: Some(quantities(None, &spec.memory)),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            ttl_seconds_after_finished: Some(spec.ttl_seconds_after_finished),
            backoff_limit: Some(spec.backoff_limit),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    security_context: Some(PodSecurityContext {
                        run_as_user: Some(spec.run_as_user),
                        run_as_group: Some(spec.run_as_user),
                        fs_group: Some(spec.run_as_user),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn job_info(job: Job) -> WorkloadInfo {
    let status = job.status.unwrap_or_default();
    WorkloadInfo {
        name: job.metadata.name.unwrap_or_default(),
        labels: job.metadata.labels.unwrap_or_default(),
        active: status.active.unwrap_or(0),
        succeeded: status.succeeded.unwrap_or(0),
        failed: status.failed.unwrap_or(0),
        start_time: status.start_time.map(|t| t.0),
        completion_time: status.completion_time.map(|t| t.0),
    }
}

#[async_trait]
impl ClusterScheduler for KubeScheduler {
    async fn create_config_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
        let cm = ConfigMap {
            metadata: self.metadata(&bundle.name, &bundle.labels),
            data: Some(bundle.data.clone()),
            ..Default::default()
        };
        self.configmaps()
            .create(&PostParams::default(), &cm)
            .await
            .map_err(|e| map_error(&format!("ConfigMap {}", bundle.name), e))?;
        debug!(name = %bundle.name, "Created ConfigMap");
        Ok(())
    }

    async fn create_secret_bundle(&self, bundle: &Bundle) -> Result<(), SchedulerError> {
        let secret = Secret {
            metadata: self.metadata(&bundle.name, &bundle.labels),
            string_data: Some(bundle.data.clone()),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        };
        self.secrets()
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|e| map_error(&format!("Secret {}", bundle.name), e))?;
        debug!(name = %bundle.name, "Created Secret");
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<WorkloadRef, SchedulerError> {
        let job = build_job(spec, &self.namespace);
        let created = self
            .jobs()
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| map_error(&format!("Job {}", spec.name), e))?;
        let uid = created
            .metadata
            .uid
            .ok_or_else(|| SchedulerError::Api(format!("Job {} was created without a uid", spec.name)))?;
        info!(name = %spec.name, uid = %uid, "Created Job");
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
        let patch = json!({
            "metadata": {
                "ownerReferences": [{
                    "apiVersion": "batch/v1",
                    "kind": "Job",
                    "name": owner.name,
                    "uid": owner.uid,
                    "blockOwnerDeletion": true
                }]
            }
        });
        self.configmaps()
            .patch(bundle, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(&format!("ConfigMap {}", bundle), e))?;
        Ok(())
    }

    async fn get_workload(&self, name: &str) -> Result<Option<WorkloadInfo>, SchedulerError> {
        let job = self
            .jobs()
            .get_opt(name)
            .await
            .map_err(|e| map_error(&format!("Job {}", name), e))?;
        Ok(job.map(job_info))
    }

    async fn list_workloads(&self, selector: &Labels) -> Result<Vec<WorkloadInfo>, SchedulerError> {
        let params = ListParams::default().labels(&selector_string(selector));
        let jobs = self
            .jobs()
            .list(&params)
            .await
            .map_err(|e| map_error("Job list", e))?;
        Ok(jobs.items.into_iter().map(job_info).collect())
    }

    async fn delete_workload(&self, name: &str) -> Result<(), SchedulerError> {
        self.jobs()
            .delete(name, &DeleteParams::foreground())
            .await
            .map_err(|e| map_error(&format!("Job {}", name), e))?;
        info!(name = %name, "Deleted Job");
        Ok(())
    }

    async fn delete_config_bundle(&self, name: &str) -> Result<(), SchedulerError> {
        self.configmaps()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(&format!("ConfigMap {}", name), e))?;
        Ok(())
    }

    async fn delete_secret_bundle(&self, name: &str) -> Result<(), SchedulerError> {
        self.secrets()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_error(&format!("Secret {}", name), e))?;
        Ok(())
    }
}
