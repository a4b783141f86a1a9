//! # ldaps-probe
//!
//! Runs the reference directory operation script against one LDAPS server and reports
//! completion. Every directory failure is logged by the script itself; the process only fails
//! on unusable parameters.

#![forbid(unsafe_code)]
#![deny(clippy::all)]

use anyhow::Context;
use clap::Parser;
use ldaps_core::{ConnectionParameters, ReferralPolicy, ScriptConfig, TransportSelector};
use ldaps_directory::run_directory_test_script;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Directory probe: bind, add, search, modify, rename and delete against an LDAPS server.
#[derive(Debug, Parser)]
#[command(name = "ldaps-probe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server URL (`ldaps://host:port` or `ldap://host:port`).
    #[arg(long, env = "LDAPS_URL", default_value = "ldaps://ad2016:636")]
    url: String,

    /// Bind principal.
    #[arg(long, env = "LDAPS_PRINCIPAL", default_value = "Administrator@EXAMPLE2.COM")]
    principal: String,

    /// Bind credential.
    #[arg(long, env = "LDAPS_CREDENTIAL", hide_env_values = true)]
    credential: String,

    /// Deliberately wrong credential, tried before the real one.
    #[arg(long, env = "LDAPS_WRONG_CREDENTIAL", hide_env_values = true)]
    wrong_credential: Option<String>,

    /// Referral policy: `ignore` or `follow`.
    #[arg(long, env = "LDAPS_REFERRAL", default_value = "ignore")]
    referral: ReferralPolicy,

    /// Transport: `trusting` (permissive trust policy) or `default` (platform trust store).
    #[arg(long, env = "LDAPS_TRANSPORT", default_value = "trusting")]
    transport: TransportSelector,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Per-operation timeout in seconds.
    #[arg(long, default_value_t = 30)]
    operation_timeout: u64,
}

impl Cli {
    fn candidate(&self, credential: &str) -> anyhow::Result<ConnectionParameters> {
        Ok(
            ConnectionParameters::new(&self.url, &self.principal, credential)?
                .with_referral(self.referral)
                .with_transport(self.transport)
                .with_connect_timeout_secs(self.connect_timeout)
                .with_operation_timeout_secs(self.operation_timeout),
        )
    }

    fn script_config(&self) -> anyhow::Result<ScriptConfig> {
        let mut candidates = Vec::with_capacity(2);
        if let Some(wrong) = &self.wrong_credential {
            candidates.push(self.candidate(wrong)?);
        }
        candidates.push(self.candidate(&self.credential)?);
        Ok(ScriptConfig::new(candidates)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli
        .script_config()
        .context("invalid connection parameters")?;

    info!(
        url = %cli.url,
        referral = %cli.referral,
        transport = %cli.transport,
        candidates = config.bind_candidates().len(),
        "starting directory script"
    );
    run_directory_test_script(&config).await;

    println!("ldaps-probe: directory script completed against {}", cli.url);
    Ok(())
}
