//! Validator 身份查询 - 仅用于日志

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use super::command::run_bounded;

/// Runs the configured identity command once at startup
#[derive(Debug, Clone)]
pub struct IdentityProbe {
    argv: Vec<String>,
    timeout: Duration,
}

impl IdentityProbe {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }

    /// Query the identity string
    pub async fn query(&self) -> Result<String> {
        let (program, args) = match self.argv.split_first() {
            Some(split) => split,
            None => bail!("identity command is empty"),
        };
        let program = which::which(program)
            .with_context(|| format!("{} not found on PATH", program))?;
        let args: Vec<&str> = args.iter().map(String::as_str).collect();

        let identity = run_bounded(&program.to_string_lossy(), &args, self.timeout).await?;
        if identity.is_empty() {
            bail!("identity command printed nothing");
        }
        Ok(identity)
    }

    /// Query and log; failures never stop the agent
    pub async fn log_identity(&self) -> Option<String> {
        match self.query().await {
            Ok(identity) => {
                info!(identity = %identity, "Validator identity");
                Some(identity)
            }
            Err(e) => {
                warn!(error = %e, command = ?self.argv, "Failed to read validator identity");
                None
            }
        }
    }
}
