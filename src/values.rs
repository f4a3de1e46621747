use crate::application::{ApplicationSpec, KeySelector, ValuesFromSource};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{api::Api, client::Client};
use serde_yaml::{Mapping, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Key read when a values source does not name one
pub const DEFAULT_VALUES_KEY: &str = "values.yaml";

/// Read access to the objects holding values documents.
///
/// Both methods return `Ok(None)` when the object does not exist.
#[async_trait]
pub trait ValuesStore: Send + Sync {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>>;
}

#[async_trait]
impl ValuesStore for Client {
    async fn config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let config_maps: Api<ConfigMap> = Api::namespaced(self.clone(), namespace);
        let config_map = config_maps.get_opt(name).await.map_err(Error::Kube)?;
        Ok(config_map.map(|cm| cm.data.unwrap_or_default()))
    }

    async fn secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        let secrets: Api<Secret> = Api::namespaced(self.clone(), namespace);
        let secret = secrets.get_opt(name).await.map_err(Error::Kube)?;
        Ok(secret.map(|secret| {
            secret
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|(key, value)| (key, value.0))
                .collect()
        }))
    }
}

/// Merge the values documents referenced by the Helm source of `spec`.
///
/// Documents are applied in declaration order; a top level key defined by
/// a later document replaces the one of an earlier document, nested maps
/// are not merged. Keys are emitted sorted. The result is always a single
/// YAML document, `{}` when nothing was merged.
pub async fn resolve_helm_values(
    store: &dyn ValuesStore,
    namespace: &str,
    spec: &ApplicationSpec,
) -> Result<String> {
    let values_from: &[ValuesFromSource] = spec
        .source
        .helm()
        .map(|helm| helm.values_from.as_slice())
        .unwrap_or_default();

    // try_join_all keeps the order of its inputs
    let documents = try_join_all(
        values_from
            .iter()
            .map(|source| fetch_document(store, namespace, source)),
    )
    .await?;

    let mut merged = Mapping::new();
    for (source, document) in values_from.iter().zip(documents) {
        let Some(document) = document else {
            continue;
        };
        if document.trim().is_empty() {
            continue;
        }
        let values: Option<Mapping> = serde_yaml::from_str(&document)
            .map_err(|e| Error::ValuesDocument(describe(source), e))?;
        merged.extend(values.unwrap_or_default());
    }

    // keys keep their YAML type, `1` and `true` are not turned into strings
    let mut entries: Vec<(Value, Value)> = merged.into_iter().collect();
    entries.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let merged: Mapping = entries.into_iter().collect();

    serde_yaml::to_string(&merged).map_err(|e| Error::ValuesDocument("merged values".to_string(), e))
}

/// Fetch one values document. `Ok(None)` means an optional source is
/// missing.
async fn fetch_document(
    store: &dyn ValuesStore,
    namespace: &str,
    source: &ValuesFromSource,
) -> Result<Option<String>> {
    let (kind, selector) = selector_of(source);
    let key = if selector.key.is_empty() {
        DEFAULT_VALUES_KEY
    } else {
        selector.key.as_str()
    };

    let missing = |key: Option<&str>| Error::MissingValuesSource {
        kind,
        name: selector.name.clone(),
        namespace: namespace.to_string(),
        key: key.map(str::to_string),
    };

    // outer None: the object is missing, inner None: the key is missing
    let document: Option<Option<String>> = match source {
        ValuesFromSource::ConfigMapKeyRef(_) => store
            .config_map_data(namespace, &selector.name)
            .await?
            .map(|mut data| data.remove(key)),
        ValuesFromSource::SecretKeyRef(_) => store
            .secret_data(namespace, &selector.name)
            .await?
            .map(|mut data| {
                data.remove(key)
                    .map(|bytes| {
                        String::from_utf8(bytes).map_err(|_| {
                            Error::Internal(format!(
                                "key '{key}' of {kind} '{}' is not valid UTF-8",
                                selector.name
                            ))
                        })
                    })
                    .transpose()
            })
            .transpose()?,
    };

    match document {
        Some(Some(document)) => {
            debug!(kind, name = selector.name, key, namespace, "values document found");
            Ok(Some(document))
        }
        _ if selector.is_optional() => {
            info!(kind, name = selector.name, key, namespace, "optional values document not found, skipping");
            Ok(None)
        }
        Some(None) => Err(missing(Some(key))),
        None => Err(missing(None)),
    }
}

fn selector_of(source: &ValuesFromSource) -> (&'static str, &KeySelector) {
    match source {
        ValuesFromSource::ConfigMapKeyRef(selector) => ("ConfigMap", selector),
        ValuesFromSource::SecretKeyRef(selector) => ("Secret", selector),
    }
}

fn describe(source: &ValuesFromSource) -> String {
    let (kind, selector) = selector_of(source);
    format!("{kind} '{}'", selector.name)
}
