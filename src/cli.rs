use clap::builder::TypedValueParser;
use clap::{Parser, Subcommand};
use tracing_subscriber::filter::LevelFilter;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Log level
    #[arg(
        long,
        default_value_t = LevelFilter::INFO,
        value_parser = clap::builder::PossibleValuesParser::new(["trace", "debug", "info", "warn", "error"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
    )]
    pub log_level: LevelFilter,

    /// Path to the kubeconfig file. The in-cluster configuration, or the
    /// one referenced by `KUBECONFIG`, is used when not provided
    #[clap(long)]
    pub kubeconfig: Option<std::path::PathBuf>,

    /// Namespace of the Argo CD control plane
    #[clap(long, env = "ARGOCD_NAMESPACE", default_value = "argocd")]
    pub namespace: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask the controller to refresh an Application
    Refresh {
        /// Name of the Application
        app: String,

        /// Regenerate the manifests instead of using the cached ones
        #[arg(long)]
        hard: bool,

        /// Block until the controller has processed the refresh
        #[arg(long)]
        wait: bool,

        /// Seconds to wait for the refresh, 0 waits forever
        #[arg(long, requires = "wait")]
        timeout: Option<u64>,
    },

    /// Check whether an Application is allowed to be synced and print its
    /// merged Helm values
    Check {
        /// Name of the Application
        app: String,
    },
}
