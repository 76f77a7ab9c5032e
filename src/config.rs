use crate::client::alicr;
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path, path::PathBuf};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub webserver: Webserver,
    #[serde(default = "default_cron_schedule")]
    pub cron_schedule: String,
    /// Namespace to scan, all namespaces when unset.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Check containers without an `enable.version-checker.io` annotation.
    #[serde(default)]
    pub default_test_all: bool,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub tls: Tls,
    #[serde(default)]
    pub registries: Registries,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tls {
    #[serde(default)]
    pub ca_certificate_paths: Vec<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Registries {
    pub alicr: Option<alicr::Options>,
}

fn default_cron_schedule() -> String {
    "0 */5 * * * *".to_string()
}

fn default_concurrency() -> usize {
    5
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config: Config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    if config.concurrency == 0 {
        anyhow::bail!("concurrency must be at least 1");
    }

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variable values.
/// Every missing variable is reported in one error.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let mut missing = Vec::new();
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| {
            missing.push(var_name.to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        return Err(anyhow!(
            "Missing environment variable(s): {}",
            missing.join(", ")
        ));
    }

    Ok(result.into_owned())
}
