//! Generates docker-compose style files that run one miner container per key

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const COMPOSE_VERSION: &str = "0.1";
pub const MINE_IMAGE: &str = "ghcr.io/birchwork/ore-ace:v0.6";
pub const CLAIM_IMAGE: &str = "ghcr.io/birchwork/ore-ace:latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub version: String,
    // zero-padded names keep BTreeMap order equal to key order
    pub services: BTreeMap<String, Service>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub container_name: String,
    pub image: String,
    pub command: Vec<String>,
    pub restart: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MineOptions {
    pub threads: u32,
    /// Priority fee in micro-lamports
    pub fee: u64,
    pub image: String,
}

impl Default for MineOptions {
    fn default() -> Self {
        Self {
            threads: 1,
            fee: 0,
            image: MINE_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOptions {
    pub jito_enable: bool,
    pub jito_fee: Option<String>,
    // not passed to the claim command
    pub priority_fee: String,
    pub threads: String,
    pub image: String,
}

impl Default for ClaimOptions {
    fn default() -> Self {
        Self {
            jito_enable: false,
            jito_fee: None,
            priority_fee: "0".to_string(),
            threads: "1".to_string(),
            image: CLAIM_IMAGE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServiceKind {
    Mine(MineOptions),
    Claim(ClaimOptions),
}

impl ServiceKind {
    fn prefix(&self) -> &'static str {
        match self {
            ServiceKind::Mine(_) => "mine",
            ServiceKind::Claim(_) => "claim",
        }
    }

    fn image(&self) -> &str {
        match self {
            ServiceKind::Mine(options) => &options.image,
            ServiceKind::Claim(options) => &options.image,
        }
    }

    fn command(&self, rpc: &str, key: &str) -> Vec<String> {
        let mut command: Vec<String> = Vec::new();
        match self {
            ServiceKind::Mine(options) => {
                command.extend(["--rpc", rpc, "--private-key", key].map(String::from));
                command.push("--priority-fee".to_string());
                command.push(options.fee.to_string());
                command.push("mine".to_string());
                if options.threads != 1 {
                    command.push("--threads".to_string());
                    command.push(options.threads.to_string());
                }
            }
            ServiceKind::Claim(options) => {
                if options.jito_enable {
                    command.push("--jito-enable".to_string());
                    if let Some(fee) = &options.jito_fee {
                        command.push("--jito-fee".to_string());
                        command.push(fee.clone());
                    }
                }
                command.extend(["--rpc", rpc, "--keypair", key, "claim"].map(String::from));
            }
        }
        command
    }
}

/// Split a key file into trimmed, non-empty lines. Keys are passed to the
/// miner as-is; no decoding happens here.
pub fn read_key_lines(content: &str) -> Vec<String> {
    content
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

pub fn service_name(kind: &ServiceKind, group: &str, index: usize) -> String {
    format!("{}-{}-{:03}", kind.prefix(), group, index + 1)
}

pub fn generate(kind: &ServiceKind, group: &str, rpc: &str, keys: &[String]) -> ComposeFile {
    let services = keys
        .iter()
        .enumerate()
        .map(|(index, key)| {
            let name = service_name(kind, group, index);
            let service = Service {
                container_name: name.clone(),
                image: kind.image().to_string(),
                command: kind.command(rpc, key),
                restart: "always".to_string(),
            };
            (name, service)
        })
        .collect();

    ComposeFile {
        version: COMPOSE_VERSION.to_string(),
        services,
    }
}

pub fn render(file: &ComposeFile) -> Result<String> {
    Ok(serde_yaml::to_string(file)?)
}

/// Read keys from `keys_path` and write the compose file to `output`.
/// Returns the number of services written.
pub fn write_compose(
    keys_path: &Path,
    output: &Path,
    kind: &ServiceKind,
    group: &str,
    rpc: &str,
) -> Result<usize> {
    if group.is_empty() {
        return Err(Error::Compose("group name must not be empty".to_string()));
    }

    let content = std::fs::read_to_string(keys_path)
        .map_err(|e| Error::Io(format!("Error reading {}: {}", keys_path.display(), e)))?;
    let keys = read_key_lines(&content);

    if let ServiceKind::Claim(options) = kind {
        debug!(
            "claim command takes no priority fee ({}) or threads ({})",
            options.priority_fee, options.threads
        );
    }

    let file = generate(kind, group, rpc, &keys);
    std::fs::write(output, render(&file)?)
        .map_err(|e| Error::Io(format!("Error writing {}: {}", output.display(), e)))?;

    info!(
        "YAML file has been generated successfully: {} ({} services)",
        output.display(),
        keys.len()
    );
    Ok(keys.len())
}
