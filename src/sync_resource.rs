use kube::core::GroupVersionKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Selects one resource of a selective sync operation
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperationResource {
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl SyncOperationResource {
    /// The name must match exactly, empty `group` and `kind` match anything
    pub fn has_identity(&self, name: &str, gvk: &GroupVersionKind) -> bool {
        self.name == name
            && (self.kind.is_empty() || self.kind == gvk.kind)
            && (self.group.is_empty() || self.group == gvk.group)
    }
}

/// Whether the resource is selected by one of `resources`.
///
/// An empty selector list selects nothing.
pub fn contains_sync_resource(
    name: &str,
    gvk: &GroupVersionKind,
    resources: &[SyncOperationResource],
) -> bool {
    resources.iter().any(|r| r.has_identity(name, gvk))
}
