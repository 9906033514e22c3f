//! 测试会话状态机
//!
//! `SessionCore` 持有一次测试的全部可变状态（指标、待确认表、序号跟踪、编解码器），
//! 所有操作都显式接收当前时间，不做 I/O：驱动循环和入站活动在同一把锁下调用它，
//! 在锁外完成实际发送。

use std::collections::VecDeque;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{LinkError, SessionError};
use crate::link::LinkStats;
use crate::proto::{Packet, PacketCodec, PacketType, SequenceId, extract_acked_sequence};

use super::config::{SessionConfig, SessionMode};
use super::metrics::{MetricsSummary, TestMetrics};
use super::observer::PacketOutcome;
use super::tracking::{PendingAcks, SequenceTracker};

/// DATA 负载的填充字节
pub const FILLER_BYTE: u8 = b'X';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl SessionPhase {
    /// Running or paused.
    pub fn is_active(self) -> bool {
        matches!(self, SessionPhase::Running | SessionPhase::Paused)
    }
}

/// 会话的只读快照，供观察者与命令行输出使用。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub mode: SessionMode,
    pub elapsed_secs: f64,
    pub progress_pct: f64,
    pub metrics: TestMetrics,
    pub summary: MetricsSummary,
    pub pending_acks: usize,
    pub last_sequence_seen: i64,
    pub link: LinkStats,
}

/// 处理一个入站报文的结果；`reply` 需要由调用方在锁外发送。
#[derive(Debug)]
pub struct Handled {
    pub outcome: PacketOutcome,
    pub reply: Option<Packet>,
}

impl Handled {
    fn outcome(outcome: PacketOutcome) -> Self {
        Self {
            outcome,
            reply: None,
        }
    }
}

/// 驱动循环一个节拍要做的事
#[derive(Debug, Default)]
pub struct Tick {
    /// 会话已不在运行（被外部结束）
    pub finished: bool,
    /// 已达到配置的测试时长
    pub expired: bool,
    /// 需要依次发送的报文
    pub outgoing: Vec<Packet>,
    /// 本节拍追加了一个带宽样本
    pub sample_due: bool,
    /// 到了周期性推送快照的时间（暂停期间照常）
    pub report_due: bool,
    /// 本节拍因超时判定丢失的序号
    pub timed_out: Vec<SequenceId>,
}

#[derive(Debug)]
pub struct SessionCore {
    config: SessionConfig,
    phase: SessionPhase,
    metrics: TestMetrics,
    pending: PendingAcks,
    tracker: SequenceTracker,
    clock: Arc<dyn Clock>,
    /// 发起方 DATA 专用：保证 DATA 序号连续
    data_codec: PacketCodec,
    /// 心跳与 ACK
    control_codec: PacketCodec,
    /// 暂停期间缓存的报文及其到达时间
    backlog: VecDeque<(Packet, f64)>,
    next_send_at: f64,
    last_heartbeat_at: f64,
    last_sample_at: f64,
    last_report_at: f64,
    bytes_at_last_sample: u64,
}

impl SessionCore {
    pub fn new(config: SessionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            phase: SessionPhase::Idle,
            metrics: TestMetrics::default(),
            pending: PendingAcks::default(),
            tracker: SequenceTracker::default(),
            data_codec: PacketCodec::new(clock.clone()),
            control_codec: PacketCodec::new(clock.clone()),
            clock,
            backlog: VecDeque::new(),
            next_send_at: 0.0,
            last_heartbeat_at: 0.0,
            last_sample_at: 0.0,
            last_report_at: 0.0,
            bytes_at_last_sample: 0,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn metrics(&self) -> &TestMetrics {
        &self.metrics
    }

    pub fn pending_acks(&self) -> &PendingAcks {
        &self.pending
    }

    pub fn tracker(&self) -> &SequenceTracker {
        &self.tracker
    }

    /// 暂停期间缓存的入站报文数
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    pub fn configure(&mut self, config: SessionConfig) -> Result<(), SessionError> {
        if self.phase.is_active() {
            return Err(SessionError::AlreadyRunning);
        }
        config.validate()?;
        info!(
            mode = %config.mode,
            size = config.packet_size,
            rate = config.transmission_rate,
            duration = config.test_duration_secs,
            "test configured"
        );
        self.config = config;
        Ok(())
    }

    /// 重置全部测试状态并进入 Running
    pub fn begin(&mut self, now: f64) -> Result<(), SessionError> {
        if self.phase.is_active() {
            return Err(SessionError::AlreadyRunning);
        }
        self.metrics = TestMetrics::started_at(now);
        self.pending.clear();
        self.tracker.reset();
        self.backlog.clear();
        self.data_codec = PacketCodec::new(self.clock.clone());
        self.next_send_at = now;
        self.last_heartbeat_at = now;
        self.last_sample_at = now;
        self.last_report_at = now;
        self.bytes_at_last_sample = 0;
        self.phase = SessionPhase::Running;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), SessionError> {
        match self.phase {
            SessionPhase::Running => {
                self.phase = SessionPhase::Paused;
                Ok(())
            }
            SessionPhase::Paused => Err(SessionError::AlreadyPaused),
            _ => Err(SessionError::NotRunning),
        }
    }

    /// 恢复运行：重设发送与采样基准，并按到达顺序处理暂停期间缓存的报文。
    ///
    /// Deferred packets are handled with their arrival time, so latency samples
    /// do not include the pause.
    pub fn resume(&mut self, now: f64) -> Result<Vec<Handled>, SessionError> {
        match self.phase {
            SessionPhase::Paused => {}
            SessionPhase::Running => return Err(SessionError::NotPaused),
            _ => return Err(SessionError::NotRunning),
        }
        self.phase = SessionPhase::Running;
        self.next_send_at = self.next_send_at.max(now);
        self.last_sample_at = now;
        self.bytes_at_last_sample = self.metrics.bytes_transmitted;

        let backlog = std::mem::take(&mut self.backlog);
        debug!(replayed = backlog.len(), "replaying packets deferred during pause");
        Ok(backlog
            .into_iter()
            .map(|(pkt, arrived)| self.handle_packet(pkt, arrived))
            .collect())
    }

    /// 结束测试并冻结指标；若本来就不在运行则返回 false。
    pub fn finish(&mut self, now: f64) -> bool {
        if !self.phase.is_active() {
            return false;
        }
        self.metrics.finalize(now);
        self.phase = SessionPhase::Stopped;
        self.backlog.clear();
        true
    }

    pub fn elapsed(&self, now: f64) -> f64 {
        self.metrics.test_duration(now)
    }

    /// 追加一条错误事件（仅在测试进行中记录）
    pub fn record_error(&mut self, message: String) {
        if self.phase.is_active() {
            self.metrics.errors.push(message);
        }
    }

    /// 入站报文入口：运行中立即处理，暂停时缓存，其余情况丢弃。
    pub fn inbound(&mut self, packet: Packet, now: f64) -> Handled {
        match self.phase {
            SessionPhase::Running => self.handle_packet(packet, now),
            SessionPhase::Paused => self.defer(packet, now),
            _ => Handled::outcome(PacketOutcome::Dropped),
        }
    }

    fn defer(&mut self, packet: Packet, now: f64) -> Handled {
        let cap = self.config.pause_backlog;
        if cap == 0 {
            self.metrics.errors.push(format!(
                "Dropped packet while paused: seq={}",
                packet.sequence_id()
            ));
            return Handled::outcome(PacketOutcome::Dropped);
        }
        if self.backlog.len() >= cap {
            if let Some((old, _)) = self.backlog.pop_front() {
                self.metrics.errors.push(format!(
                    "Pause backlog full, dropped packet: seq={}",
                    old.sequence_id()
                ));
            }
        }
        self.backlog.push_back((packet, now));
        Handled::outcome(PacketOutcome::Deferred)
    }

    /// 按当前角色分类并处理一个报文（不检查暂停状态）。
    pub fn handle_packet(&mut self, packet: Packet, now: f64) -> Handled {
        let seq = packet.sequence_id();
        match (packet.kind(), self.config.mode) {
            (PacketType::Data, SessionMode::Responder) => self.accept_data(&packet, now),
            (PacketType::Ack, SessionMode::Originator) => self.accept_ack(&packet, now),
            (PacketType::Data, SessionMode::Originator) => {
                self.metrics
                    .errors
                    .push(format!("Unexpected DATA packet: seq={seq}"));
                Handled::outcome(PacketOutcome::Unexpected)
            }
            (PacketType::Ack, SessionMode::Responder) => {
                self.metrics
                    .errors
                    .push(format!("Unexpected ACK packet: seq={seq}"));
                Handled::outcome(PacketOutcome::Unexpected)
            }
            (PacketType::Heartbeat, _) => Handled::outcome(PacketOutcome::Heartbeat),
        }
    }

    fn accept_data(&mut self, packet: &Packet, now: f64) -> Handled {
        let seq = packet.sequence_id();
        self.metrics.packets_received += 1;
        self.metrics.bytes_transmitted += packet.payload_size() as u64;

        let obs = self.tracker.observe(seq);
        for missing in &obs.missing {
            // 报告线上形式的序号
            self.metrics
                .errors
                .push(format!("Missing packet: seq={}", *missing as u16));
        }
        self.metrics.packets_lost += obs.missing.len() as u64;
        if !obs.missing.is_empty() {
            debug!(seq, missing = obs.missing.len(), "sequence gap");
        }

        let reply = self.control_codec.ack_packet(seq as u32);

        let latency = packet.age_secs(now);
        if latency > 0.0 {
            self.metrics.latency_samples.push(latency);
        }

        Handled {
            outcome: PacketOutcome::DataAccepted {
                missing: obs.missing.len(),
            },
            reply: Some(reply),
        }
    }

    fn accept_ack(&mut self, packet: &Packet, now: f64) -> Handled {
        let acked = extract_acked_sequence(packet).and_then(|v| SequenceId::try_from(v).ok());
        let Some(acked) = acked else {
            return Handled::outcome(PacketOutcome::AckIgnored);
        };
        match self.pending.resolve(acked) {
            Some(sent_at) => {
                let rtt = now - sent_at;
                self.metrics.latency_samples.push(rtt);
                self.metrics.packets_received += 1;
                Handled::outcome(PacketOutcome::Acked { rtt_secs: rtt })
            }
            None => Handled::outcome(PacketOutcome::AckIgnored),
        }
    }

    /// 计算驱动循环在 `now` 时刻应做的工作。
    ///
    /// DATA 在返回前已登记进待确认表，这样即使 ACK 先于发送确认到达也能匹配。
    pub fn plan_tick(&mut self, now: f64) -> Tick {
        let mut tick = Tick::default();
        if !self.phase.is_active() {
            tick.finished = true;
            return tick;
        }
        if self.elapsed(now) >= self.config.test_duration_secs {
            tick.expired = true;
            return tick;
        }
        if now - self.last_report_at >= self.config.sample_interval_secs {
            self.last_report_at = now;
            tick.report_due = true;
        }
        if self.phase == SessionPhase::Paused {
            return tick;
        }

        if now - self.last_heartbeat_at >= self.config.heartbeat_interval_secs {
            tick.outgoing.push(self.control_codec.heartbeat_packet());
            self.last_heartbeat_at = now;
        }

        if self.config.mode == SessionMode::Originator && now >= self.next_send_at {
            let payload = vec![FILLER_BYTE; self.config.packet_size];
            let pkt = self.data_codec.data_packet(payload);
            if self.pending.insert(pkt.sequence_id(), now).is_some() {
                // 序号回绕时旧条目仍未确认
                self.metrics.packets_lost += 1;
                self.metrics
                    .errors
                    .push(format!("ACK timeout: seq={}", pkt.sequence_id()));
            }
            tick.outgoing.push(pkt);
            // 按名义间隔推进，不补偿调度延迟
            self.next_send_at += self.config.send_interval();
        }

        let since = now - self.last_sample_at;
        if since >= self.config.sample_interval_secs {
            let delta = self
                .metrics
                .bytes_transmitted
                .saturating_sub(self.bytes_at_last_sample);
            self.metrics.bandwidth_samples.push(delta as f64 / since);
            self.last_sample_at = now;
            self.bytes_at_last_sample = self.metrics.bytes_transmitted;
            tick.sample_due = true;
        }

        if self.config.mode == SessionMode::Originator {
            tick.timed_out = self.sweep_timeouts(now);
        }
        tick
    }

    /// 清理超时的待确认条目，每个只计一次丢失。
    pub fn sweep_timeouts(&mut self, now: f64) -> Vec<SequenceId> {
        let expired = self.pending.sweep(now, self.config.ack_timeout_secs);
        for seq in &expired {
            self.metrics.packets_lost += 1;
            self.metrics.errors.push(format!("ACK timeout: seq={seq}"));
        }
        if !expired.is_empty() {
            warn!(count = expired.len(), "ack timeouts");
        }
        expired
    }

    /// 发送成功后计入发送指标（只统计 DATA）
    pub fn confirm_sent(&mut self, packet: &Packet) {
        if packet.kind() == PacketType::Data && self.phase.is_active() {
            self.metrics.packets_sent += 1;
            self.metrics.bytes_transmitted += packet.payload_size() as u64;
        }
    }

    /// 发送失败：撤销待确认登记并记录错误事件
    pub fn send_failed(&mut self, packet: &Packet, err: &LinkError) {
        if packet.kind() == PacketType::Data {
            self.pending.resolve(packet.sequence_id());
        }
        self.record_error(format!(
            "Send failed: type={:?} seq={}: {err}",
            packet.kind(),
            packet.sequence_id()
        ));
    }

    pub fn snapshot(&self, now: f64, link: LinkStats) -> SessionSnapshot {
        let elapsed = self.elapsed(now);
        SessionSnapshot {
            phase: self.phase,
            mode: self.config.mode,
            elapsed_secs: elapsed,
            progress_pct: (100.0 * elapsed / self.config.test_duration_secs).clamp(0.0, 100.0),
            metrics: self.metrics.clone(),
            summary: self.metrics.summary(now),
            pending_acks: self.pending.len(),
            last_sequence_seen: self.tracker.last_sequence_seen(),
            link,
        }
    }
}
