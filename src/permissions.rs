use crate::application::{ApplicationCondition, ApplicationSpec};
use crate::errors::{Error, Result};
use crate::project::AppProject;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, ListParams, ResourceExt};
use tracing::debug;

/// Address of the cluster hosting the controller, always configured
pub const KUBERNETES_INTERNAL_API_SERVER_ADDR: &str = "https://kubernetes.default.svc";

/// Label identifying the Secrets describing a cluster
pub const CLUSTER_SECRET_TYPE_LABEL: &str = "argocd.argoproj.io/secret-type";

/// Registry of the clusters Applications can be deployed to
#[async_trait]
pub trait ClusterRegistry: Send + Sync {
    /// Whether `server` is a configured cluster
    async fn has_cluster(&self, server: &str) -> Result<bool>;
}

/// Cluster registry backed by the cluster Secrets of the control plane
/// namespace
pub struct SecretClusterRegistry {
    secrets: Api<Secret>,
}

impl SecretClusterRegistry {
    pub fn new(secrets: Api<Secret>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl ClusterRegistry for SecretClusterRegistry {
    async fn has_cluster(&self, server: &str) -> Result<bool> {
        if server == KUBERNETES_INTERNAL_API_SERVER_ADDR {
            return Ok(true);
        }
        let lp = ListParams::default().labels(&format!("{CLUSTER_SECRET_TYPE_LABEL}=cluster"));
        let secrets = self.secrets.list(&lp).await.map_err(Error::Kube)?;
        let found = secrets.items.iter().any(|secret| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get("server"))
                .is_some_and(|value| value.0 == server.as_bytes())
        });
        debug!(server, found, secrets = secrets.items.len(), "cluster lookup");
        Ok(found)
    }
}

/// Check that `spec` is complete and allowed by `project`.
///
/// An incomplete source is reported as a single condition. Otherwise every
/// violated rule is reported as a condition; an empty list means the
/// Application may be synced. An error is returned only when `clusters`
/// cannot be queried.
pub async fn validate_permissions(
    spec: &ApplicationSpec,
    project: &AppProject,
    clusters: Option<&dyn ClusterRegistry>,
) -> Result<Vec<ApplicationCondition>> {
    let source = &spec.source;

    // a malformed source is reported alone, the other rules are meaningless
    if source.repo_url.is_empty() || (source.path.is_empty() && source.chart.is_empty()) {
        return Ok(vec![ApplicationCondition::invalid_spec(
            "spec.source.repoURL and spec.source.path either spec.source.chart are required",
        )]);
    }
    if !source.chart.is_empty() && source.target_revision.is_empty() {
        return Ok(vec![ApplicationCondition::invalid_spec(
            "spec.source.targetRevision is required if the manifest source is a helm chart",
        )]);
    }

    let mut conditions = Vec::new();
    if !project.is_source_permitted(&source.repo_url) {
        conditions.push(ApplicationCondition::invalid_spec(format!(
            "application repo {} is not permitted in project '{}'",
            source.repo_url,
            project.name_any()
        )));
    }

    let destination = &spec.destination;
    if destination.is_complete() {
        if !project.is_destination_permitted(destination) {
            conditions.push(ApplicationCondition::invalid_spec(format!(
                "application destination {{{} {}}} is not permitted in project '{}'",
                destination.server,
                destination.namespace,
                project.name_any()
            )));
        }
        if let Some(clusters) = clusters {
            if !clusters.has_cluster(&destination.server).await? {
                conditions.push(ApplicationCondition::invalid_spec(format!(
                    "cluster '{}' has not been configured",
                    destination.server
                )));
            }
        }
    } else {
        conditions.push(ApplicationCondition::invalid_spec(
            "Destination server and/or namespace missing from app spec",
        ));
    }

    debug!(
        project = project.name_any(),
        conditions = conditions.len(),
        "permissions validated"
    );
    Ok(conditions)
}
