//! Command line and environment configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ocm_common::telemetry::TelemetryConfig;

/// Default reconcile workers per controller
pub const DEFAULT_WORKERS: usize = 1;

/// Open Cluster Management registration operator
#[derive(Parser, Debug)]
#[command(name = "ocm-operator", version, about, long_about = None)]
pub struct Cli {
    /// Print the operator CRDs as YAML and exit
    #[arg(long)]
    pub crd: bool,

    /// Concurrent reconciles per controller
    #[arg(long, env = "OCM_CONTROLLER_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Emit JSON log lines
    #[arg(long, env = "OCM_JSON_LOGS")]
    pub json_logs: bool,

    /// Kubeconfig to use instead of in-cluster config or `KUBECONFIG`
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Which side of the fleet to manage
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Operator modes
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the ClusterManager controllers on the hub
    Hub,
    /// Run the Klusterlet controllers on a managed cluster
    Klusterlet,
}

/// Settings shared by every controller of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Concurrent reconciles per controller
    pub workers: usize,
    /// Emit JSON log lines
    pub json_logs: bool,
    /// Explicit kubeconfig path
    pub kubeconfig: Option<PathBuf>,
}

impl OperatorConfig {
    /// Logging settings for this run
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            json: self.json_logs,
            ..Default::default()
        }
    }
}

impl From<&Cli> for OperatorConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            workers: cli.workers.max(1),
            json_logs: cli.json_logs,
            kubeconfig: cli.kubeconfig.clone(),
        }
    }
}
