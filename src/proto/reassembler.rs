//! 字节流重组
//!
//! 把任意切分的输入字节流重新同步到魔数字节上，逐个产出校验通过的报文。
//! 失败的帧只丢弃触发它的那个魔数字节，保证前进且最坏代价受缓冲区长度约束。

use serde::Serialize;
use tracing::trace;

use super::codec::{HEADER_LEN, MAGIC, MAX_PAYLOAD_LEN, MIN_FRAME_LEN, TRAILER_LEN, declared_payload_len, try_decode};
use super::packet::Packet;

/// 重组统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReassemblerStats {
    /// 成功解码的帧数
    pub frames: u64,
    /// 因找不到魔数或位于魔数之前而丢弃的字节数
    pub discarded_bytes: u64,
    /// 魔数后跟随的内容无法解码的次数
    pub false_starts: u64,
}

#[derive(Debug, Default)]
pub struct StreamReassembler {
    buf: Vec<u8>,
    stats: ReassemblerStats,
}

impl StreamReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加新到达的字节
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// 取出下一个完整报文；数据不足时返回 `None`，不消耗未完成的帧。
    pub fn next_packet(&mut self) -> Option<Packet> {
        loop {
            if self.buf.len() < MIN_FRAME_LEN {
                return None;
            }

            let Some(at) = self.buf.iter().position(|&b| b == MAGIC) else {
                trace!(bytes = self.buf.len(), "no magic byte, discarding buffer");
                self.discard(self.buf.len());
                return None;
            };
            if at > 0 {
                self.discard(at);
            }

            if self.buf.len() < HEADER_LEN {
                return None;
            }
            let payload_len = declared_payload_len(&self.buf)?;
            if payload_len > MAX_PAYLOAD_LEN {
                trace!(payload_len, "declared payload too large, resyncing");
                self.drop_false_start();
                continue;
            }

            let total = HEADER_LEN + payload_len + TRAILER_LEN;
            if self.buf.len() < total {
                return None;
            }

            match try_decode(&self.buf[..total]) {
                Ok(pkt) => {
                    self.buf.drain(..total);
                    self.stats.frames += 1;
                    return Some(pkt);
                }
                Err(err) => {
                    trace!(%err, "frame rejected, resyncing");
                    self.drop_false_start();
                }
            }
        }
    }

    /// 惰性地取出当前缓冲区中所有可解码的报文
    pub fn packets(&mut self) -> impl Iterator<Item = Packet> + '_ {
        std::iter::from_fn(move || self.next_packet())
    }

    /// 追加一段字节并返回因此变得完整的全部报文（按到达顺序）
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Packet> {
        self.push(chunk);
        self.packets().collect()
    }

    /// 当前缓冲但尚未消耗的字节数
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> ReassemblerStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn discard(&mut self, n: usize) {
        self.buf.drain(..n);
        self.stats.discarded_bytes += n as u64;
    }

    fn drop_false_start(&mut self) {
        self.buf.drain(..1);
        self.stats.false_starts += 1;
        self.stats.discarded_bytes += 1;
    }
}
