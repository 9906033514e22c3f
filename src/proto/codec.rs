//! Framing codec.
//!
//! Wire layout (big-endian):
//!
//! ```text
//! [magic:1][type:1][sequence:2][timestamp_ms:4][payload_len:4][payload:N][crc32:4]
//! ```
//!
//! The CRC-32 trailer covers every byte before it.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::error::FrameError;

use super::packet::{Packet, PacketType, SequenceId, wire_millis};

pub const MAGIC: u8 = 0xAA;
/// magic + type + sequence + timestamp + payload_len
pub const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4;
pub const TRAILER_LEN: usize = 4;
pub const MIN_FRAME_LEN: usize = HEADER_LEN + TRAILER_LEN;
pub(crate) const PAYLOAD_LEN_OFFSET: usize = 8;
/// 单帧允许的最大负载
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// 报文构造器：持有本实例独占的序号计数器。
///
/// Not thread-safe on its own; the owner serializes access.
#[derive(Debug)]
pub struct PacketCodec {
    sequence_counter: u32,
    clock: Arc<dyn Clock>,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl PacketCodec {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            sequence_counter: 0,
            clock,
        }
    }

    /// 下一个将被分配的内部序号
    pub fn sequence_counter(&self) -> u32 {
        self.sequence_counter
    }

    /// 创建报文：打上当前时间戳，分配序号后计数器自增。
    pub fn create(&mut self, kind: PacketType, payload: Vec<u8>) -> Packet {
        // 线上序号只保留低 16 位
        let seq = self.sequence_counter as SequenceId;
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        Packet::new(kind, seq, wire_millis(self.clock.now()), payload)
    }

    pub fn data_packet(&mut self, payload: Vec<u8>) -> Packet {
        self.create(PacketType::Data, payload)
    }

    /// ACK 的负载是被确认序号的 4 字节大端表示。
    pub fn ack_packet(&mut self, acked_sequence: u32) -> Packet {
        self.create(PacketType::Ack, acked_sequence.to_be_bytes().to_vec())
    }

    pub fn heartbeat_packet(&mut self) -> Packet {
        self.create(PacketType::Heartbeat, Vec::new())
    }
}

/// 编码为完整帧
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(packet.frame_len());
    out.push(MAGIC);
    out.push(packet.kind().as_u8());
    out.extend_from_slice(&packet.sequence_id().to_be_bytes());
    out.extend_from_slice(&packet.timestamp_ms().to_be_bytes());
    out.extend_from_slice(&(packet.payload_size() as u32).to_be_bytes());
    out.extend_from_slice(packet.payload());
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Payload length declared by a header at the start of `buf`, if the header is complete.
pub(crate) fn declared_payload_len(buf: &[u8]) -> Option<usize> {
    let raw = buf.get(PAYLOAD_LEN_OFFSET..HEADER_LEN)?;
    let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
    Some(len as usize)
}

fn be_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// 解码一帧并给出失败原因。`buf` 中帧之后的多余字节被忽略。
pub fn try_decode(buf: &[u8]) -> Result<Packet, FrameError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort { len: buf.len() });
    }
    if buf[0] != MAGIC {
        return Err(FrameError::BadMagic(buf[0]));
    }

    let payload_len = declared_payload_len(buf).ok_or(FrameError::TooShort { len: buf.len() })?;
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(FrameError::PayloadTooLarge {
            len: payload_len,
            max: MAX_PAYLOAD_LEN,
        });
    }
    let payload_end = HEADER_LEN + payload_len;
    let need = payload_end + TRAILER_LEN;
    if buf.len() < need {
        return Err(FrameError::Truncated {
            need,
            have: buf.len(),
        });
    }

    let expected = be_u32(buf, payload_end);
    let actual = crc32fast::hash(&buf[..payload_end]);
    if expected != actual {
        return Err(FrameError::Checksum { expected, actual });
    }

    let kind = PacketType::try_from(buf[1])?;
    let sequence_id = u16::from_be_bytes([buf[2], buf[3]]);
    let timestamp_ms = be_u32(buf, 4);
    Ok(Packet::new(
        kind,
        sequence_id,
        timestamp_ms,
        buf[HEADER_LEN..payload_end].to_vec(),
    ))
}

/// 解码一帧；任何失败都返回 `None`。
pub fn decode(buf: &[u8]) -> Option<Packet> {
    try_decode(buf).ok()
}

/// 从 ACK 报文中取出被确认的序号；非 ACK 或负载不足 4 字节时返回 `None`。
pub fn extract_acked_sequence(packet: &Packet) -> Option<u32> {
    if packet.kind() != PacketType::Ack {
        return None;
    }
    let p = packet.payload();
    if p.len() < 4 {
        return None;
    }
    Some(be_u32(p, 0))
}
