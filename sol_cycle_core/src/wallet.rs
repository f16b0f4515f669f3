// Wallet gateway: the local CLI wallet tool behind a trait so stages can
// be exercised against mocks.

use crate::error::CoreError;
use async_trait::async_trait;
use log::{debug, warn};
use std::time::Duration;
use tokio::process::Command;

const ALREADY_EXISTS_MARKER: &str = "Error: Account already exists";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Created,
    AlreadyExists,
}

#[async_trait(?Send)]
pub trait WalletGateway {
    /// Native SOL balance of the configured wallet.
    async fn native_balance(&self) -> Result<f64, CoreError>;

    /// Ensure an on-chain token account exists for the mint.
    async fn create_token_account(&self, mint: &str) -> Result<ProvisionOutcome, CoreError>;

    /// Token balance held for the mint, in whole tokens.
    async fn token_balance(&self, mint: &str) -> Result<f64, CoreError>;

    /// Wrap native SOL into its token representation.
    async fn wrap_sol(&self, amount_sol: f64) -> Result<(), CoreError>;
}

/// Parse `solana balance` output ("2.5 SOL") into a number.
pub fn parse_native_balance(stdout: &str) -> Result<f64, CoreError> {
    stdout
        .trim()
        .split_whitespace()
        .next()
        .and_then(|tok| tok.parse::<f64>().ok())
        .ok_or_else(|| {
            CoreError::ParseError(format!("Unrecognized balance output: {:?}", stdout.trim()))
        })
}

/// Parse `spl-token accounts <mint>` output: the balance is the first line
/// that parses as a number.
pub fn parse_token_balance(stdout: &str) -> Result<f64, CoreError> {
    stdout
        .lines()
        .find_map(|line| line.trim().parse::<f64>().ok())
        .ok_or_else(|| CoreError::ParseError("Balance not found in command output".to_string()))
}

pub fn is_already_exists(stderr: &str) -> bool {
    stderr.contains(ALREADY_EXISTS_MARKER)
}

/// Gateway backed by the `solana` / `spl-token` command line tools.
pub struct SplTokenCli {
    command_timeout: Duration,
}

struct CommandOutput {
    stdout: String,
    stderr: String,
    success: bool,
}

impl SplTokenCli {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CoreError> {
        debug!("Running wallet command: {} {}", program, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.command_timeout, child)
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "{} {} exceeded {:?}",
                    program,
                    args.join(" "),
                    self.command_timeout
                ))
            })?
            .map_err(|e| CoreError::WalletCommand(format!("{} failed to start: {}", program, e)))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        })
    }
}

#[async_trait(?Send)]
impl WalletGateway for SplTokenCli {
    async fn native_balance(&self) -> Result<f64, CoreError> {
        let out = self.run("solana", &["balance"]).await?;
        if !out.success {
            return Err(CoreError::WalletCommand(format!(
                "solana balance failed: {}",
                out.stderr.trim()
            )));
        }
        parse_native_balance(&out.stdout)
    }

    async fn create_token_account(&self, mint: &str) -> Result<ProvisionOutcome, CoreError> {
        let out = self.run("spl-token", &["create-account", mint]).await?;
        if is_already_exists(&out.stderr) {
            warn!("Token account already exists for {}", mint);
            return Ok(ProvisionOutcome::AlreadyExists);
        }
        if !out.success {
            return Err(CoreError::WalletCommand(format!(
                "create-account {} failed: {}",
                mint,
                out.stderr.trim()
            )));
        }
        Ok(ProvisionOutcome::Created)
    }

    async fn token_balance(&self, mint: &str) -> Result<f64, CoreError> {
        let out = self.run("spl-token", &["accounts", mint]).await?;
        if !out.success {
            return Err(CoreError::WalletCommand(format!(
                "accounts {} failed: {}",
                mint,
                out.stderr.trim()
            )));
        }
        parse_token_balance(&out.stdout)
    }

    async fn wrap_sol(&self, amount_sol: f64) -> Result<(), CoreError> {
        let amount = format!("{}", amount_sol);
        let out = self.run("spl-token", &["wrap", &amount]).await?;
        if is_already_exists(&out.stderr) {
            warn!("Wrapped SOL account already exists, continuing");
            return Ok(());
        }
        if !out.success {
            return Err(CoreError::WalletCommand(format!(
                "wrap {} failed: {}",
                amount,
                out.stderr.trim()
            )));
        }
        if out.stdout.contains("Signature:") {
            Ok(())
        } else {
            Err(CoreError::WalletCommand(
                "wrap command produced no signature".to_string(),
            ))
        }
    }
}
