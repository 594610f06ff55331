// 信令层配置
// 配置加载由上层完成，这里只定义结构和默认值

use serde::Deserialize;
use std::time::Duration;

/// 通道自动点播模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteMode {
    /// 仅手动点播
    Manual,
    /// 心跳时对在线通道自动发起点播
    Auto,
}

impl Default for InviteMode {
    fn default() -> Self {
        Self::Manual
    }
}

/// 移动位置订阅配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// 是否自动订阅设备位置
    pub autosub_position: bool,

    /// 订阅有效期（秒）
    pub expires: u32,

    /// 设备上报间隔（秒）
    pub interval: u64,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            autosub_position: false,
            expires: 3600,
            interval: 6,
        }
    }
}

/// 信令服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// 平台国标编码（20位）
    pub serial: String,

    /// SIP 域
    pub realm: String,

    /// 注册用户名（与 password 同时为空时跳过鉴权）
    pub username: String,

    /// 注册密码
    pub password: String,

    /// 设备心跳间隔（秒），通道同步按 2 倍心跳间隔去抖
    pub heartbeat_interval: u64,

    /// 注册失败次数上限，超过后一律 403
    pub max_register_count: u32,

    /// 自动点播模式
    pub invite_mode: InviteMode,

    /// 位置订阅
    pub position: PositionConfig,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            serial: "34020000002000000001".to_string(),
            realm: "3402000000".to_string(),
            username: String::new(),
            password: String::new(),
            heartbeat_interval: 60,
            max_register_count: 3,
            invite_mode: InviteMode::default(),
            position: PositionConfig::default(),
        }
    }
}

impl SignalConfig {
    /// 通道同步去抖窗口：2 倍心跳间隔
    pub fn sync_window(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval * 2)
    }

    /// 是否无需注册鉴权
    pub fn auth_disabled(&self) -> bool {
        self.username.is_empty() && self.password.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SignalConfig::default();
        assert_eq!(config.serial.len(), 20);
        assert!(config.auth_disabled());
        assert_eq!(config.sync_window(), Duration::from_secs(120));
        assert_eq!(config.invite_mode, InviteMode::Manual);
    }

    #[test]
    fn test_auth_enabled_when_password_set() {
        let config = SignalConfig {
            password: "123456".to_string(),
            ..Default::default()
        };
        assert!(!config.auth_disabled());
    }
}
