//! 链路模块
//!
//! 此模块包含传输抽象、内存/TCP 两种实现、链路统计以及入站读取活动。

mod memory;
mod reader;
mod stats;
mod tcp;
mod transport;

pub use memory::MemoryTransport;
pub use reader::{InboundReader, InboundSink, LinkEvent};
pub use stats::LinkStats;
pub use tcp::{DEFAULT_WRITE_TIMEOUT, TcpTransport};
pub use transport::Transport;

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::LinkError;
use crate::proto::{Packet, encode};
use crate::sync::lock;

/// 共享的链路句柄：写入方（驱动循环、ACK 回复）与读取方各持一份克隆。
///
/// The link adds no lock of its own around the transport, so a slow write never
/// holds up a read. The statistics lock is only taken after I/O returns.
#[derive(Clone)]
pub struct Link {
    transport: Arc<dyn Transport>,
    stats: Arc<Mutex<LinkStats>>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("open", &self.is_open())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Link {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        Self {
            transport: Arc::new(transport),
            stats: Arc::default(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_open()
    }

    pub fn close(&self) {
        self.transport.close();
    }

    /// 编码并发送一帧
    pub fn send(&self, packet: &Packet) -> Result<usize, LinkError> {
        let frame = encode(packet);
        let res = self.transport.write(&frame);
        let mut stats = lock(&self.stats);
        match res {
            Ok(n) if n < frame.len() => {
                stats.write_errors += 1;
                Err(LinkError::ShortWrite {
                    written: n,
                    expected: frame.len(),
                })
            }
            Ok(n) => {
                stats.bytes_sent += n as u64;
                stats.packets_sent += 1;
                debug!(kind = ?packet.kind(), seq = packet.sequence_id(), size = n, "sent packet");
                Ok(n)
            }
            Err(err) => {
                stats.write_errors += 1;
                Err(err)
            }
        }
    }

    pub fn read_available(&self) -> Result<Vec<u8>, LinkError> {
        let res = self.transport.read_available();
        let mut stats = lock(&self.stats);
        match &res {
            Ok(bytes) => stats.bytes_received += bytes.len() as u64,
            Err(_) => stats.read_errors += 1,
        }
        res
    }

    pub(crate) fn note_packet_received(&self) {
        lock(&self.stats).packets_received += 1;
    }

    pub fn stats(&self) -> LinkStats {
        *lock(&self.stats)
    }

    pub fn reset_stats(&self) {
        *lock(&self.stats) = LinkStats::default();
    }
}
