//! 链路统计信息

use serde::Serialize;

/// 传输边界上的收发统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub write_errors: u64,
    pub read_errors: u64,
}
