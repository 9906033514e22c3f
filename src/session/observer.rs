//! 会话观察者
//!
//! 状态机在固定位置（报文分类、指标周期、生命周期变化）同步调用观察者，
//! 调用时不持有会话锁，观察者可以安全地回调会话读取快照。

use std::sync::mpsc::Sender;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::proto::{PacketType, SequenceId};

use super::config::SessionMode;
use super::machine::SessionSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Requested,
    DurationElapsed,
}

/// 单个入站报文的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PacketOutcome {
    /// DATA accepted by a responder; `missing` ids were newly counted lost.
    DataAccepted { missing: usize },
    /// ACK matched a pending send.
    Acked { rtt_secs: f64 },
    /// ACK for an id that is not pending (late, duplicate or unknown).
    AckIgnored,
    /// Packet type not expected in the current mode.
    Unexpected,
    Heartbeat,
    /// Buffered while paused.
    Deferred,
    /// Arrived while no test was running.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started { mode: SessionMode },
    Stopped { reason: StopReason },
    Paused,
    Resumed,
    Metrics { snapshot: SessionSnapshot },
    Status { message: String },
    Packet {
        kind: PacketType,
        sequence_id: SequenceId,
        outcome: PacketOutcome,
    },
    LinkLost { reason: String },
    LinkRestored,
}

pub trait SessionObserver: Send + Sync {
    fn on_event(&self, event: &SessionEvent);
}

/// 忽略所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SessionObserver for NullObserver {
    fn on_event(&self, _event: &SessionEvent) {}
}

/// 把事件写入 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl SessionObserver for LogObserver {
    fn on_event(&self, event: &SessionEvent) {
        match event {
            SessionEvent::Started { mode } => info!(%mode, "▶️  test started"),
            SessionEvent::Stopped { reason } => info!(?reason, "⏹️  test stopped"),
            SessionEvent::Paused => info!("test paused"),
            SessionEvent::Resumed => info!("test resumed"),
            SessionEvent::Metrics { snapshot } => debug!(
                elapsed = snapshot.elapsed_secs,
                sent = snapshot.metrics.packets_sent,
                received = snapshot.metrics.packets_received,
                lost = snapshot.metrics.packets_lost,
                "metrics"
            ),
            SessionEvent::Status { message } => info!("{message}"),
            SessionEvent::Packet {
                kind,
                sequence_id,
                outcome,
            } => trace!(?kind, sequence_id, ?outcome, "packet handled"),
            SessionEvent::LinkLost { reason } => warn!(%reason, "link lost"),
            SessionEvent::LinkRestored => info!("link restored"),
        }
    }
}

/// 通过 mpsc 通道转发事件；接收端关闭后事件被丢弃。
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: Sender<SessionEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for ChannelObserver {
    fn on_event(&self, event: &SessionEvent) {
        let _ = self.tx.send(event.clone());
    }
}
