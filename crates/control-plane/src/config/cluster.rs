//! Cluster configuration for notebook runner workloads.

use serde::Deserialize;

/// Which cluster scheduler backs the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerBackend {
    Kube,
    Memory,
}

/// Cluster configuration loaded from environment variables.
///
/// Environment variables are prefixed with `K8S_`:
/// - `K8S_NAMESPACE`: Namespace runner jobs are created in (default: "default")
/// - `K8S_RUNNER_IMAGE`: Notebook runner container image
/// - `K8S_IMAGE_PULL_POLICY`: Pull policy for the runner image (default: "IfNotPresent")
/// - `K8S_JOB_TTL_SECONDS`: `ttlSecondsAfterFinished` for runner jobs (default: 3 days)
/// - `K8S_SCHEDULER`: `kube` or `memory` (default: kube)
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_runner_image")]
    pub runner_image: String,

    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,

    #[serde(default = "default_job_ttl_seconds")]
    pub job_ttl_seconds: i32,

    #[serde(default = "default_scheduler")]
    pub scheduler: SchedulerBackend,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_runner_image() -> String {
    "nbforge/notebook-runner:latest".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_job_ttl_seconds() -> i32 {
    86_400 * 3
}

fn default_scheduler() -> SchedulerBackend {
    SchedulerBackend::Kube
}

impl ClusterConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables are prefixed with `K8S_`.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("K8S_").from_env::<ClusterConfig>()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            runner_image: default_runner_image(),
            image_pull_policy: default_image_pull_policy(),
            job_ttl_seconds: default_job_ttl_seconds(),
            scheduler: default_scheduler(),
        }
    }
}
