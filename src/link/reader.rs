//! 入站活动
//!
//! 持续轮询链路，把字节送入重组器，按到达顺序把报文交给接收方。

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::proto::{Packet, ReassemblerStats, StreamReassembler};

use super::Link;

/// 链路健康状态变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Lost(String),
    Restored,
}

/// Receiver of everything the inbound activity produces.
pub trait InboundSink: Send + Sync {
    fn on_packet(&self, packet: Packet);
    fn on_link_event(&self, event: LinkEvent);
}

pub struct InboundReader {
    link: Link,
    reassembler: StreamReassembler,
    poll: Duration,
    healthy: bool,
}

impl InboundReader {
    pub fn new(link: Link, poll: Duration) -> Self {
        Self {
            link,
            reassembler: StreamReassembler::new(),
            poll,
            healthy: true,
        }
    }

    /// 执行一次轮询，返回交付的报文数
    pub fn poll_once(&mut self, sink: &dyn InboundSink) -> usize {
        let bytes = match self.link.read_available() {
            Ok(bytes) => {
                if !self.healthy {
                    debug!("link restored");
                    self.healthy = true;
                    sink.on_link_event(LinkEvent::Restored);
                }
                bytes
            }
            Err(err) => {
                // 每次断线只报告一次
                if self.healthy {
                    warn!(%err, "link read failed");
                    self.healthy = false;
                    sink.on_link_event(LinkEvent::Lost(err.to_string()));
                }
                return 0;
            }
        };
        if bytes.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        for pkt in self.reassembler.feed(&bytes) {
            trace!(kind = ?pkt.kind(), seq = pkt.sequence_id(), "received packet");
            self.link.note_packet_received();
            sink.on_packet(pkt);
            delivered += 1;
        }
        delivered
    }

    /// 运行直到 `running` 被清除
    pub fn run(mut self, running: &AtomicBool, sink: &dyn InboundSink) -> ReassemblerStats {
        while running.load(Ordering::SeqCst) {
            if self.poll_once(sink) == 0 {
                thread::sleep(self.poll);
            }
        }
        let stats = self.reassembler.stats();
        debug!(?stats, "inbound reader stopped");
        stats
    }

    pub fn spawn(
        self,
        running: Arc<AtomicBool>,
        sink: Arc<dyn InboundSink>,
    ) -> io::Result<JoinHandle<ReassemblerStats>> {
        thread::Builder::new()
            .name("linktest-rx".into())
            .spawn(move || self.run(&running, sink.as_ref()))
    }
}
