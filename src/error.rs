//! 错误类型
//!
//! 帧解析、链路、会话生命周期与配置文件的错误分类。

use thiserror::Error;

/// Why a byte slice is not a valid frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("bad magic byte 0x{0:02x}")]
    BadMagic(u8),
    #[error("truncated frame: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },
    #[error("declared payload of {len} bytes exceeds limit {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("checksum mismatch: expected 0x{expected:08x}, got 0x{actual:08x}")]
    Checksum { expected: u32, actual: u32 },
    #[error("unknown packet type 0x{0:02x}")]
    UnknownType(u8),
}

/// 链路（传输层）错误
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("link is closed")]
    Closed,
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("write timed out after {written} of {expected} bytes")]
    WriteTimeout { written: usize, expected: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// 会话生命周期错误：调用被拒绝，状态不变。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a test is already running")]
    AlreadyRunning,
    #[error("no test is running")]
    NotRunning,
    #[error("test is already paused")]
    AlreadyPaused,
    #[error("test is not paused")]
    NotPaused,
    #[error("transport is not open")]
    TransportClosed,
    #[error("invalid test config: {0}")]
    InvalidConfig(String),
    #[error("failed to spawn worker: {0}")]
    Spawn(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Invalid(#[from] SessionError),
}
