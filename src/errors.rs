use thiserror::Error;

/// Hard failures raised by the code.
///
/// Policy violations are never reported through this type: they are
/// returned as `ApplicationCondition` values instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Issue related with Kubernetes operations
    #[error("Kube Error: {0}")]
    Kube(#[source] kube::Error),

    /// Issue related with the parsing of the Kubeconfig file
    #[error("Error parsing Kubeconfig: {0}")]
    Kubeconfig(#[source] kube::config::KubeconfigError),

    /// The watch stream reported a failure
    #[error("Watch Error: {0}")]
    Watch(#[source] kube::runtime::watcher::Error),

    /// The object the operation requires does not exist
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    /// A required values source could not be found. `key` is `None` when
    /// the object itself is missing
    #[error("{kind} '{name}' in namespace '{namespace}' {}", missing_part(.key))]
    MissingValuesSource {
        kind: &'static str,
        name: String,
        namespace: String,
        key: Option<String>,
    },

    /// A values source holds something that is not a YAML mapping
    #[error("Invalid values document in {0}: {1}")]
    ValuesDocument(String, #[source] serde_yaml::Error),

    /// The refresh was not acknowledged before the timeout
    #[error("deadline exceeded while waiting for application '{0}' to be refreshed")]
    DeadlineExceeded(String),

    /// The caller gave up waiting for the refresh
    #[error("context canceled while waiting for application '{0}' to be refreshed")]
    Cancelled(String),

    /// The watch stream ended before the refresh was acknowledged
    #[error("watch of application '{0}' closed before the refresh was acknowledged")]
    WatchClosed(String),

    /// The application was deleted while waiting for the refresh
    #[error("application '{0}' was deleted while waiting for the refresh")]
    Deleted(String),

    /// A generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map a `kube::Error` to `Error::NotFound` when the API server answered
    /// with a 404, to `Error::Kube` otherwise
    pub fn from_kube(error: kube::Error, kind: &'static str, name: &str) -> Self {
        match error {
            kube::Error::Api(response) if response.code == 404 => Error::NotFound {
                kind,
                name: name.to_string(),
            },
            other => Error::Kube(other),
        }
    }
}

fn missing_part(key: &Option<String>) -> String {
    match key {
        Some(key) => format!("has no key '{key}'"),
        None => "does not exist".to_string(),
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
