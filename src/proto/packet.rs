//! 数据包类型
//!
//! 链路测试协议中唯一的报文类型及其线上时间戳换算。

use serde::Serialize;

use crate::error::FrameError;

use super::codec::{HEADER_LEN, TRAILER_LEN};

/// Sequence id as carried on the wire (the codec's counter modulo 2^16).
pub type SequenceId = u16;

/// 报文类型（线上 1 字节）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum PacketType {
    Data = 0x01,
    Ack = 0x02,
    Heartbeat = 0x03,
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = FrameError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::Ack),
            0x03 => Ok(PacketType::Heartbeat),
            other => Err(FrameError::UnknownType(other)),
        }
    }
}

/// 将秒转换为线上毫秒时间戳（截断到毫秒，按 2^32 取模）。
pub fn wire_millis(secs: f64) -> u32 {
    (secs * 1000.0) as u64 as u32
}

/// 不可变的协议报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    kind: PacketType,
    sequence_id: SequenceId,
    timestamp_ms: u32,
    payload: Vec<u8>,
}

impl Packet {
    pub fn new(kind: PacketType, sequence_id: SequenceId, timestamp_ms: u32, payload: Vec<u8>) -> Self {
        Self {
            kind,
            sequence_id,
            timestamp_ms,
            payload,
        }
    }

    pub fn kind(&self) -> PacketType {
        self.kind
    }

    pub fn sequence_id(&self) -> SequenceId {
        self.sequence_id
    }

    /// 创建时间（毫秒，按 2^32 取模）
    pub fn timestamp_ms(&self) -> u32 {
        self.timestamp_ms
    }

    /// 创建时间（秒）；线上只保留毫秒精度。
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_ms as f64 / 1000.0
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    /// 编码后的完整帧长度
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + TRAILER_LEN
    }

    /// Seconds elapsed between the packet's wire timestamp and `now`.
    ///
    /// The millisecond difference is taken with wrapping signed arithmetic, so
    /// a stamp from the "future" (clock skew) comes back negative rather than huge.
    pub fn age_secs(&self, now: f64) -> f64 {
        let back_ms = wire_millis(now).wrapping_sub(self.timestamp_ms) as i32;
        ((now * 1000.0).fract() + back_ms as f64) / 1000.0
    }
}
