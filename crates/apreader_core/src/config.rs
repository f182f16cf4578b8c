/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{ReaderError, Result};
use apreader_protocol::{HYPER_PREFIX, IPNS_PREFIX};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_LIMIT: usize = 32;
const DEFAULT_DB_FILE: &str = "reader.db";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ReaderConfig {
    /// Directory holding the database. Defaults to `APREADER_DATA_DIR` or the platform data dir.
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub db_file: Option<String>,
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Actor URLs followed on first start, when nothing is followed yet.
    #[serde(default)]
    pub default_followed_actors: Vec<String>,
    /// Page size used by queries when the caller does not pass one.
    #[serde(default)]
    pub default_limit: Option<usize>,
}

impl ReaderConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ReaderError::Config(format!("read {}: {e}", path.display())));
            }
        };
        serde_json::from_str(&text)
            .map_err(|e| ReaderError::Config(format!("parse {}: {e}", path.display())))
    }

    pub fn db_path(&self) -> Result<PathBuf> {
        let dir = match &self.data_dir {
            Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => default_data_dir()?,
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| ReaderError::Config(format!("create data dir {}: {e}", dir.display())))?;
        let file = self.db_file.as_deref().unwrap_or(DEFAULT_DB_FILE);
        Ok(dir.join(file))
    }

    pub fn default_limit(&self) -> usize {
        self.default_limit.filter(|n| *n > 0).unwrap_or(DEFAULT_LIMIT)
    }
}

/// Maps a peer-to-peer address prefix onto an HTTPS gateway prefix.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct GatewayRule {
    pub prefix: String,
    pub gateway: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FetchConfig {
    #[serde(default = "default_gateways")]
    pub gateways: Vec<GatewayRule>,
    /// Prefix prepended to the percent-encoded URL; `null` disables the proxy fallback.
    #[serde(default = "default_cors_proxy")]
    pub cors_proxy: Option<String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// How many HTML pages may be followed through `rel="alternate"` links for one resolve.
    #[serde(default = "default_max_discovery_hops")]
    pub max_discovery_hops: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            gateways: default_gateways(),
            cors_proxy: default_cors_proxy(),
            retry_attempts: default_retry_attempts(),
            timeout_secs: default_timeout_secs(),
            max_discovery_hops: default_max_discovery_hops(),
        }
    }
}

fn default_gateways() -> Vec<GatewayRule> {
    vec![
        GatewayRule {
            prefix: HYPER_PREFIX.to_string(),
            gateway: "https://hyper.hypha.coop/hyper/".to_string(),
        },
        GatewayRule {
            prefix: IPNS_PREFIX.to_string(),
            gateway: "https://ipfs.hypha.coop/ipns/".to_string(),
        },
    ]
}

fn default_cors_proxy() -> Option<String> {
    Some("https://corsproxy.io/?".to_string())
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_discovery_hops() -> u32 {
    3
}

pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(v) = std::env::var("APREADER_DATA_DIR") {
        if !v.trim().is_empty() {
            return Ok(PathBuf::from(v));
        }
    }
    let proj = ProjectDirs::from("coop", "hypha", "apreader")
        .ok_or_else(|| ReaderError::Config("unable to determine platform data dir".to_string()))?;
    Ok(proj.data_local_dir().to_path_buf())
}

pub fn default_config_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        let base = std::env::var("APPDATA")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        return PathBuf::from(base).join("apreader").join("config.json");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    if cfg!(target_os = "macos") {
        return PathBuf::from(home)
            .join("Library")
            .join("Application Support")
            .join("apreader")
            .join("config.json");
    }
    PathBuf::from(home).join(".config").join("apreader").join("config.json")
}
