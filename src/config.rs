//! 应用配置文件
//!
//! JSON 格式，`link` 与 `test` 两节均可省略：
//!
//! ```json
//! { "link": { "address": "127.0.0.1:7000", "listen": false },
//!   "test": { "mode": "originator", "packet_size": 64, "transmission_rate": 10 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// 对端地址（host:port）
    #[serde(alias = "port")]
    pub address: Option<String>,
    /// 为 true 时在 `address` 上监听并等待对端连接
    pub listen: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(alias = "serial")]
    pub link: LinkConfig,
    pub test: SessionConfig,
}

impl AppConfig {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_json::from_str(raw)?;
        cfg.test.validate()?;
        Ok(cfg)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }
}
