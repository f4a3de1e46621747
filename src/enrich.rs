use crate::application::{ApplicationCondition, ApplicationSource, ApplicationSpec};
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Details discovered by rendering an Application source
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RepoAppDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksonnet: Option<KsonnetAppSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetAppSpec {
    #[serde(default)]
    pub environments: BTreeMap<String, KsonnetEnvironment>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetEnvironment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<KsonnetEnvironmentDestination>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetEnvironmentDestination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub namespace: String,
}

/// Front end of the manifest engines, able to inspect an Application source
#[async_trait]
pub trait RepoDetailsSource: Send + Sync {
    async fn app_details(&self, source: &ApplicationSource) -> Result<RepoAppDetails>;
}

/// Fill the unresolved parts of the destination using the discovered details.
///
/// Only Ksonnet sources carry a destination of their own: the one of the
/// environment named by the spec is used. Nothing happens when the
/// environment is unknown.
pub fn enrich_spec(spec: &mut ApplicationSpec, details: &RepoAppDetails) {
    if spec.destination.is_complete() {
        return;
    }
    let Some(environment) = spec.source.ksonnet().map(|k| k.environment.as_str()) else {
        return;
    };
    let Some(env_destination) = details
        .ksonnet
        .as_ref()
        .and_then(|ksonnet| ksonnet.environments.get(environment))
        .and_then(|env| env.destination.as_ref())
    else {
        debug!(environment, "ksonnet environment not found, destination left unresolved");
        return;
    };

    if spec.destination.server.is_empty() {
        spec.destination.server = env_destination.server.clone();
    }
    if spec.destination.namespace.is_empty() {
        spec.destination.namespace = env_destination.namespace.clone();
    }
    debug!(
        environment,
        server = spec.destination.server,
        namespace = spec.destination.namespace,
        "destination resolved from ksonnet environment"
    );
}

/// Inspect the source of `spec` through `repo` and enrich the spec with what
/// was discovered.
///
/// Failing to inspect the source is reported as a condition.
pub async fn validate_repo(
    spec: &mut ApplicationSpec,
    repo: &dyn RepoDetailsSource,
) -> Vec<ApplicationCondition> {
    let mut conditions = Vec::new();
    match repo.app_details(&spec.source).await {
        Ok(details) => enrich_spec(spec, &details),
        Err(e) => {
            warn!(repo = spec.source.repo_url, error = %e, "cannot get app details");
            conditions.push(ApplicationCondition::invalid_spec(format!(
                "Unable to get app details: {e}"
            )));
        }
    }
    conditions
}
