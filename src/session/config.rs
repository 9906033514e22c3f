//! 测试会话配置

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::proto::MAX_PAYLOAD_LEN;

/// 会话角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Sends DATA on a fixed schedule and waits for ACKs.
    #[default]
    #[serde(alias = "transmitter")]
    Originator,
    /// Waits for DATA and answers each one with an ACK.
    #[serde(alias = "receiver")]
    Responder,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::Originator => f.write_str("originator"),
            SessionMode::Responder => f.write_str("responder"),
        }
    }
}

impl FromStr for SessionMode {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "originator" | "transmitter" | "tx" => Ok(SessionMode::Originator),
            "responder" | "receiver" | "rx" => Ok(SessionMode::Responder),
            other => Err(SessionError::InvalidConfig(format!("unknown mode `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub mode: SessionMode,
    /// DATA 负载字节数
    pub packet_size: usize,
    /// 每秒发送的 DATA 报文数
    pub transmission_rate: f64,
    #[serde(alias = "test_duration")]
    pub test_duration_secs: f64,
    #[serde(alias = "heartbeat_interval")]
    pub heartbeat_interval_secs: f64,
    /// 超过该时长未被确认的 DATA 计为丢失
    pub ack_timeout_secs: f64,
    /// 带宽采样与快照推送周期
    pub sample_interval_secs: f64,
    /// 驱动循环与读取活动的轮询间隔
    pub poll_interval_ms: u64,
    /// 暂停期间最多缓存的入站报文数
    pub pause_backlog: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::Originator,
            packet_size: 64,
            transmission_rate: 10.0,
            test_duration_secs: 60.0,
            heartbeat_interval_secs: 5.0,
            ack_timeout_secs: 5.0,
            sample_interval_secs: 1.0,
            poll_interval_ms: 1,
            pause_backlog: 1024,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        let positive = [
            ("transmission_rate", self.transmission_rate),
            ("test_duration_secs", self.test_duration_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("ack_timeout_secs", self.ack_timeout_secs),
            ("sample_interval_secs", self.sample_interval_secs),
        ];
        for (name, v) in positive {
            if !(v.is_finite() && v > 0.0) {
                return Err(SessionError::InvalidConfig(format!(
                    "{name} must be positive, got {v}"
                )));
            }
        }
        if self.packet_size > MAX_PAYLOAD_LEN {
            return Err(SessionError::InvalidConfig(format!(
                "packet_size {} exceeds maximum payload {MAX_PAYLOAD_LEN}",
                self.packet_size
            )));
        }
        Ok(())
    }

    /// 名义发送间隔（秒）
    pub fn send_interval(&self) -> f64 {
        1.0 / self.transmission_rate
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
