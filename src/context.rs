use crate::application::Application;
use crate::errors::{Error, Result};
use crate::permissions::SecretClusterRegistry;
use crate::project::AppProject;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams},
    client::Client,
    config::Kubeconfig,
    runtime::{
        reflector::{store::Writer, Store},
        watcher,
    },
};
use std::path::Path;
use tracing::debug;

/// Handles to the cluster hosting the Argo CD control plane.
///
/// Everything the library needs from the cluster is built from here and
/// handed over explicitly, nothing is kept in global state.
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    client: Client,

    /// Namespace holding Applications, AppProjects and cluster Secrets
    namespace: String,
}

impl Context {
    /// Create a new `Context`.
    ///
    /// * `kubeconfig`: path to the kubeconfig file to be used, the default
    ///   configuration (in-cluster or `$KUBECONFIG`) is used when missing
    /// * `namespace`: namespace of the Argo CD control plane
    pub async fn new(kubeconfig: Option<&Path>, namespace: &str) -> Result<Self> {
        let client = match kubeconfig {
            Some(path) => Self::create_client(path).await?,
            None => Client::try_default().await.map_err(Error::Kube)?,
        };
        Ok(Self {
            client,
            namespace: namespace.to_string(),
        })
    }

    /// Create the `kube::Client` from a kubeconfig file
    async fn create_client(kubeconfig_path: &Path) -> Result<Client> {
        let kubeconfig = Kubeconfig::read_from(kubeconfig_path).map_err(Error::Kubeconfig)?;

        let client_config = kube::Config::from_custom_kubeconfig(
            kubeconfig,
            &kube::config::KubeConfigOptions::default(),
        )
        .await
        .map_err(Error::Kubeconfig)?;

        Client::try_from(client_config).map_err(Error::Kube)
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Build the `kube::Api` object required to interact with `Application` objects
    pub fn applications_api(&self) -> Api<Application> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    /// Cluster registry backed by the Secrets of the control plane namespace
    pub fn cluster_registry(&self) -> SecretClusterRegistry {
        SecretClusterRegistry::new(Api::<Secret>::namespaced(
            self.client.clone(),
            &self.namespace,
        ))
    }

    /// Snapshot of the AppProjects of the control plane namespace.
    ///
    /// Long running processes should keep a reflector running instead, the
    /// snapshot is never updated.
    pub async fn project_snapshot(&self) -> Result<Store<AppProject>> {
        let projects: Api<AppProject> = Api::namespaced(self.client.clone(), &self.namespace);
        let list = projects
            .list(&ListParams::default())
            .await
            .map_err(Error::Kube)?;
        debug!(
            namespace = self.namespace,
            projects = list.items.len(),
            "projects loaded"
        );

        let mut writer = Writer::<AppProject>::default();
        writer.apply_watcher_event(&watcher::Event::Restarted(list.items));
        Ok(writer.as_reader())
    }
}
