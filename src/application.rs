use kube::{api::ResourceExt, CustomResource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::errors::Error;

/// Annotation used to ask the controller to re-evaluate an Application.
/// The controller removes it once the refresh has been processed.
pub const REFRESH_ANNOTATION: &str = "argocd.argoproj.io/refresh";

/// Project used when an Application does not name one
pub const DEFAULT_PROJECT: &str = "default";

/// Desired state of one deployable unit.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    kind = "Application",
    group = "argoproj.io",
    version = "v1alpha1",
    namespaced,
    status = "ApplicationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSpec {
    #[serde(default)]
    pub source: ApplicationSource,
    #[serde(default)]
    pub destination: ApplicationDestination,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project: String,
}

impl ApplicationSpec {
    /// Name of the AppProject governing this spec
    pub fn project_name(&self) -> &str {
        if self.project.is_empty() {
            DEFAULT_PROJECT
        } else {
            &self.project
        }
    }
}

/// Where the manifests come from.
///
/// `tool` is `None` for a bare Git source: plain manifests with no
/// tool-specific settings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL", default)]
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub target_revision: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub chart: String,
    #[serde(flatten)]
    pub tool: Option<SourceTool>,
}

impl ApplicationSource {
    /// Helm settings, when the source is rendered with Helm
    pub fn helm(&self) -> Option<&ApplicationSourceHelm> {
        match &self.tool {
            Some(SourceTool::Helm(helm)) => Some(helm),
            _ => None,
        }
    }

    /// Ksonnet settings, when the source is rendered with Ksonnet
    pub fn ksonnet(&self) -> Option<&ApplicationSourceKsonnet> {
        match &self.tool {
            Some(SourceTool::Ksonnet(ksonnet)) => Some(ksonnet),
            _ => None,
        }
    }
}

/// Tool-specific rendering settings. At most one tool can be configured.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SourceTool {
    Helm(ApplicationSourceHelm),
    Kustomize(ApplicationSourceKustomize),
    Ksonnet(ApplicationSourceKsonnet),
    Directory(ApplicationSourceDirectory),
}

impl SourceTool {
    /// Whether every field holds its zero value
    pub fn is_zero(&self) -> bool {
        match self {
            SourceTool::Helm(helm) => helm.is_zero(),
            SourceTool::Kustomize(kustomize) => kustomize.is_zero(),
            SourceTool::Ksonnet(ksonnet) => ksonnet.is_zero(),
            SourceTool::Directory(directory) => directory.is_zero(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceHelm {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub value_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<HelmParameter>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub release_name: String,
    /// Values documents stored in ConfigMaps and Secrets, merged in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values_from: Vec<ValuesFromSource>,
}

impl ApplicationSourceHelm {
    pub fn is_zero(&self) -> bool {
        self.value_files.is_empty()
            && self.parameters.is_empty()
            && self.release_name.is_empty()
            && self.values_from.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HelmParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub force_string: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceKustomize {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name_prefix: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common_labels: BTreeMap<String, String>,
}

impl ApplicationSourceKustomize {
    pub fn is_zero(&self) -> bool {
        self.name_prefix.is_empty() && self.images.is_empty() && self.common_labels.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceKsonnet {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<KsonnetParameter>,
}

impl ApplicationSourceKsonnet {
    pub fn is_zero(&self) -> bool {
        self.environment.is_empty() && self.parameters.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KsonnetParameter {
    #[serde(default)]
    pub component: String,
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSourceDirectory {
    #[serde(default)]
    pub recurse: bool,
}

impl ApplicationSourceDirectory {
    pub fn is_zero(&self) -> bool {
        !self.recurse
    }
}

/// Reference to a values document stored in the cluster
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ValuesFromSource {
    ConfigMapKeyRef(KeySelector),
    SecretKeyRef(KeySelector),
}

/// Key inside of a ConfigMap or Secret living in the Application namespace
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KeySelector {
    pub name: String,
    /// Defaults to `values.yaml` when empty
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional: Option<bool>,
}

impl KeySelector {
    pub fn is_optional(&self) -> bool {
        self.optional.unwrap_or(false)
    }
}

/// Target cluster and namespace. Either field may still be unresolved.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationDestination {
    #[serde(default)]
    pub server: String,
    #[serde(default)]
    pub namespace: String,
}

impl ApplicationDestination {
    pub fn new(server: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            namespace: namespace.into(),
        }
    }

    /// Both the server and the namespace are known
    pub fn is_complete(&self) -> bool {
        !self.server.is_empty() && !self.namespace.is_empty()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ApplicationCondition>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum ApplicationConditionType {
    InvalidSpecError,
    UnknownError,
}

/// A validation outcome recorded on the Application. The object stays
/// valid, but cannot be synced until the condition goes away.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct ApplicationCondition {
    #[serde(rename = "type")]
    pub type_: ApplicationConditionType,
    pub message: String,
}

impl ApplicationCondition {
    pub fn invalid_spec(message: impl Into<String>) -> Self {
        Self {
            type_: ApplicationConditionType::InvalidSpecError,
            message: message.into(),
        }
    }
}

/// Kind of refresh requested through the refresh annotation
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RefreshType {
    /// Compare the live state against the cached manifests
    Normal,
    /// Regenerate the manifests before comparing
    Hard,
}

impl RefreshType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshType::Normal => "normal",
            RefreshType::Hard => "hard",
        }
    }
}

impl fmt::Display for RefreshType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RefreshType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(RefreshType::Normal),
            "hard" => Ok(RefreshType::Hard),
            other => Err(Error::Internal(format!("unknown refresh type '{other}'"))),
        }
    }
}

impl Application {
    /// The pending refresh request, if any.
    ///
    /// An annotation holding an unknown value is still a pending request
    /// and is reported as a normal refresh.
    pub fn refresh_requested(&self) -> Option<RefreshType> {
        self.annotations()
            .get(REFRESH_ANNOTATION)
            .map(|value| value.parse().unwrap_or(RefreshType::Normal))
    }
}
