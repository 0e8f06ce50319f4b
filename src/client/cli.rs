//! `valkey-cli --cluster` invocations.
//!
//! Membership changes and rebalancing go through the `valkey-cli` cluster
//! manager, which already implements the multi-node protocols behind
//! `create`, `add-node`, `del-node` and `rebalance`. Argument vectors are
//! built by pure functions so they can be tested without the binary.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, instrument};

use crate::topology::Address;

use super::valkey_client::ValkeyError;

/// Options for `--cluster rebalance`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebalanceOptions {
    /// Let masters without slots receive some.
    pub use_empty_masters: bool,
    /// Per-node weights as `(node_id, weight)`; unlisted nodes weigh 1.
    pub weights: Vec<(String, u32)>,
    /// Overwrite keys that already exist on the target during migration.
    pub replace: bool,
}

impl RebalanceOptions {
    /// Spread slots over every master, including empty ones.
    pub fn spread() -> Self {
        Self {
            use_empty_masters: true,
            weights: Vec::new(),
            replace: true,
        }
    }

    /// Drain `node_id` by giving it weight 0 and every other master weight 1.
    pub fn drain<'a>(node_id: &str, others: impl IntoIterator<Item = &'a str>) -> Self {
        let mut weights = vec![(node_id.to_string(), 0)];
        weights.extend(others.into_iter().map(|id| (id.to_string(), 1)));
        Self {
            use_empty_masters: true,
            weights,
            replace: false,
        }
    }

    pub fn weight_of(&self, node_id: &str) -> u32 {
        self.weights
            .iter()
            .find(|(id, _)| id == node_id)
            .map_or(1, |(_, weight)| *weight)
    }
}

/// Runner for `valkey-cli --cluster` subcommands.
#[derive(Debug, Clone)]
pub struct ValkeyCli {
    binary: PathBuf,
    password: Option<String>,
}

impl ValkeyCli {
    pub fn new(binary: impl Into<PathBuf>, password: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            password,
        }
    }

    fn tool_name(&self) -> String {
        self.binary.display().to_string()
    }

    fn auth_args(&self) -> Vec<String> {
        match &self.password {
            Some(password) => vec![
                "-a".to_string(),
                password.clone(),
                "--no-auth-warning".to_string(),
            ],
            None => Vec::new(),
        }
    }

    pub fn create_args(&self, nodes: &[Address], replicas_per_master: u32) -> Vec<String> {
        let mut args = self.auth_args();
        args.extend(["--cluster".to_string(), "create".to_string()]);
        args.extend(nodes.iter().map(ToString::to_string));
        args.extend([
            "--cluster-replicas".to_string(),
            replicas_per_master.to_string(),
            "--cluster-yes".to_string(),
        ]);
        args
    }

    pub fn add_node_args(&self, new_node: &Address, via: &Address) -> Vec<String> {
        let mut args = self.auth_args();
        args.extend([
            "--cluster".to_string(),
            "add-node".to_string(),
            new_node.to_string(),
            via.to_string(),
        ]);
        args
    }

    pub fn del_node_args(&self, via: &Address, node_id: &str) -> Vec<String> {
        let mut args = self.auth_args();
        args.extend([
            "--cluster".to_string(),
            "del-node".to_string(),
            via.to_string(),
            node_id.to_string(),
        ]);
        args
    }

    pub fn rebalance_args(&self, via: &Address, options: &RebalanceOptions) -> Vec<String> {
        let mut args = self.auth_args();
        args.extend([
            "--cluster".to_string(),
            "rebalance".to_string(),
            via.to_string(),
        ]);
        if !options.weights.is_empty() {
            args.push("--cluster-weight".to_string());
            args.extend(
                options
                    .weights
                    .iter()
                    .map(|(id, weight)| format!("{id}={weight}")),
            );
        }
        if options.use_empty_masters {
            args.push("--cluster-use-empty-masters".to_string());
        }
        if options.replace {
            args.push("--cluster-replace".to_string());
        }
        args
    }

    /// Run the binary with `args`, failing on a non-zero exit status.
    ///
    /// Only the subcommand is logged, never the arguments, which may carry
    /// the password.
    #[instrument(skip(self, args))]
    pub async fn run(&self, subcommand: &str, args: Vec<String>) -> Result<String, ValkeyError> {
        debug!(tool = %self.tool_name(), "running cluster manager");
        let output = Command::new(&self.binary)
            .args(&args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.map_spawn_error(e))?;

        if !output.status.success() {
            return Err(ValkeyError::Command {
                command: format!("{} --cluster {}", self.tool_name(), subcommand),
                status: output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Check that the binary can be executed.
    pub async fn ensure_available(&self) -> Result<(), ValkeyError> {
        Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .map_err(|e| self.map_spawn_error(e))?;
        Ok(())
    }

    fn map_spawn_error(&self, error: std::io::Error) -> ValkeyError {
        if error.kind() == ErrorKind::NotFound {
            ValkeyError::ToolNotFound {
                tool: self.tool_name(),
            }
        } else {
            ValkeyError::Io(error)
        }
    }
}
