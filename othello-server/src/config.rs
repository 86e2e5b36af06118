//! 服务端配置
//!
//! 先读取 `OTHELLO_CONFIG` 指向的 JSON 文件（缺省字段取默认值），
//! 再用环境变量覆盖个别字段。

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use protocol::{PlacementPolicy, GRACE_PERIOD_SECS, MATCH_NOTIFY_DELAY_MS};

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "OTHELLO_CONFIG";

/// 配对时的颜色分配策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorPolicy {
    /// 发起配对的一方执黑
    #[default]
    Fixed,
    /// 随机分配
    Random,
}

/// 服务端配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 断线宽限期（秒）
    pub grace_period_secs: u64,
    /// 配对成功后延迟多久发送 start_game（毫秒）
    pub match_notify_delay_ms: u64,
    /// 每个连接的发送队列长度
    pub outbound_queue: usize,
    pub color_policy: ColorPolicy,
    pub placement_policy: PlacementPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9528,
            grace_period_secs: GRACE_PERIOD_SECS,
            match_notify_delay_ms: MATCH_NOTIFY_DELAY_MS,
            outbound_queue: 64,
            color_policy: ColorPolicy::Fixed,
            placement_policy: PlacementPolicy::Lenient,
        }
    }
}

impl ServerConfig {
    /// 从配置文件和环境变量加载
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 读取 JSON 配置文件
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_json(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        info!(?path, "loaded configuration file");
        Ok(config)
    }

    /// 解析 JSON 配置
    pub fn from_json(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 检查取值范围
    pub fn validate(&self) -> Result<()> {
        if self.outbound_queue == 0 {
            bail!("outbound_queue must be at least 1");
        }
        if self.grace_period_secs == 0 {
            bail!("grace_period_secs must be at least 1");
        }
        Ok(())
    }

    /// 用环境变量覆盖
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("OTHELLO_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("OTHELLO_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid OTHELLO_PORT: {}", port))?;
        }
        if let Some(secs) = lookup("OTHELLO_GRACE_SECS") {
            self.grace_period_secs = secs
                .parse()
                .with_context(|| format!("Invalid OTHELLO_GRACE_SECS: {}", secs))?;
        }
        if let Some(ms) = lookup("OTHELLO_MATCH_DELAY_MS") {
            self.match_notify_delay_ms = ms
                .parse()
                .with_context(|| format!("Invalid OTHELLO_MATCH_DELAY_MS: {}", ms))?;
        }
        Ok(())
    }

    /// 监听地址
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn match_notify_delay(&self) -> Duration {
        Duration::from_millis(self.match_notify_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.grace_period(), Duration::from_secs(40));
        assert_eq!(config.color_policy, ColorPolicy::Fixed);
        assert_eq!(config.placement_policy, PlacementPolicy::Lenient);
        assert_eq!(config.bind_addr(), "127.0.0.1:9528");
    }

    #[test]
    fn test_partial_json() {
        let config = ServerConfig::from_json(
            r#"{"port": 7000, "color_policy": "random", "placement_policy": "require_capture"}"#,
        )
        .unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.color_policy, ColorPolicy::Random);
        assert_eq!(config.placement_policy, PlacementPolicy::RequireCapture);
        assert_eq!(config.grace_period_secs, GRACE_PERIOD_SECS);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            [("OTHELLO_PORT", "9000"), ("OTHELLO_GRACE_SECS", "5")].into_iter().collect();

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.grace_period(), Duration::from_secs(5));
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(ServerConfig::from_json(r#"{"outbound_queue": 0}"#).is_err());
        assert!(ServerConfig::from_json(r#"{"grace_period_secs": 0}"#).is_err());
        assert!(ServerConfig::from_json(r#"{"outbound_queue": 1}"#).is_ok());

        let mut config = ServerConfig::default();
        config
            .apply_overrides(|key| (key == "OTHELLO_GRACE_SECS").then(|| "0".to_string()))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_override() {
        let mut config = ServerConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "OTHELLO_PORT").then(|| "not-a-port".to_string())
        });
        assert!(result.is_err());
    }
}
