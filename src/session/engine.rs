//! 测试会话
//!
//! `TestSession` 在一条链路上运行 [`SessionCore`]：启动时派生两个线程，
//! 驱动循环负责定时发送/心跳/超时清理，入站活动负责读取与重组。
//! 两者只通过同一把会话锁共享状态，锁内从不做 I/O，也从不嵌套其它会话锁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::SessionError;
use crate::link::{InboundReader, InboundSink, Link, LinkEvent};
use crate::proto::{Packet, ReassemblerStats};
use crate::sync::lock;

use super::config::SessionConfig;
use super::machine::{SessionCore, SessionPhase, SessionSnapshot};
use super::metrics::TestMetrics;
use super::observer::{LogObserver, SessionEvent, SessionObserver, StopReason};

/// stop() 等待工作线程退出的上限
const STOP_WAIT: Duration = Duration::from_secs(2);
const JOIN_POLL: Duration = Duration::from_millis(2);

struct Shared {
    core: Mutex<SessionCore>,
    link: Link,
    clock: Arc<dyn Clock>,
    observer: Arc<dyn SessionObserver>,
    stop: AtomicBool,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        self.observer.on_event(&event);
    }

    fn snapshot(&self) -> SessionSnapshot {
        let link = self.link.stats();
        let now = self.clock.now();
        lock(&self.core).snapshot(now, link)
    }

    fn send(&self, packet: &Packet) {
        match self.link.send(packet) {
            Ok(_) => lock(&self.core).confirm_sent(packet),
            Err(err) => {
                warn!(%err, kind = ?packet.kind(), seq = packet.sequence_id(), "send failed");
                lock(&self.core).send_failed(packet, &err);
            }
        }
    }

    /// 冻结指标并通知观察者；只有真正完成状态转换的一方会发出事件。
    fn finish(&self, reason: StopReason) {
        let now = self.clock.now();
        let (done, elapsed) = {
            let mut core = lock(&self.core);
            (core.finish(now), core.elapsed(now))
        };
        if !done {
            return;
        }
        info!(?reason, elapsed, "test finished");
        self.emit(SessionEvent::Stopped { reason });
        let message = match reason {
            StopReason::Requested => "Test stopped",
            StopReason::DurationElapsed => "Test completed",
        };
        self.emit(SessionEvent::Status {
            message: message.to_string(),
        });
        self.emit(SessionEvent::Metrics {
            snapshot: self.snapshot(),
        });
    }
}

impl InboundSink for Shared {
    fn on_packet(&self, packet: Packet) {
        let now = self.clock.now();
        let (kind, sequence_id) = (packet.kind(), packet.sequence_id());
        let handled = lock(&self.core).inbound(packet, now);
        if let Some(reply) = handled.reply {
            self.send(&reply);
        }
        self.emit(SessionEvent::Packet {
            kind,
            sequence_id,
            outcome: handled.outcome,
        });
    }

    fn on_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Lost(reason) => {
                lock(&self.core).record_error(format!("Link lost: {reason}"));
                self.emit(SessionEvent::LinkLost { reason });
            }
            LinkEvent::Restored => self.emit(SessionEvent::LinkRestored),
        }
    }
}

fn drive(shared: Arc<Shared>, running: Arc<AtomicBool>) {
    let poll = lock(&shared.core).config().poll_interval();
    let reason = loop {
        if shared.stop.load(Ordering::SeqCst) {
            break StopReason::Requested;
        }
        let now = shared.clock.now();
        let tick = lock(&shared.core).plan_tick(now);
        if tick.finished {
            break StopReason::Requested;
        }
        if tick.expired {
            break StopReason::DurationElapsed;
        }

        // 写入在锁外进行；正在进行的写入总会完成后才检查停止标志
        for pkt in &tick.outgoing {
            shared.send(pkt);
        }
        if tick.report_due {
            shared.emit(SessionEvent::Metrics {
                snapshot: shared.snapshot(),
            });
        }
        thread::sleep(poll);
    };
    shared.finish(reason);
    running.store(false, Ordering::SeqCst);
}

fn join_within<T>(handle: JoinHandle<T>, limit: Duration) -> Option<T> {
    let deadline = Instant::now() + limit;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return None;
        }
        thread::sleep(JOIN_POLL);
    }
    handle.join().ok()
}

struct Workers {
    running: Arc<AtomicBool>,
    drive: JoinHandle<()>,
    reader: JoinHandle<ReassemblerStats>,
}

/// 一条链路上的测试会话
///
/// Observers are called synchronously from the session's threads and from the
/// control methods. They may read [`TestSession::snapshot`] but must not call
/// `start`/`stop` from inside a callback.
pub struct TestSession {
    shared: Arc<Shared>,
    workers: Mutex<Option<Workers>>,
}

impl TestSession {
    pub fn new(link: Link) -> Self {
        Self::with_parts(link, Arc::new(SystemClock), Arc::new(LogObserver))
    }

    pub fn with_parts(
        link: Link,
        clock: Arc<dyn Clock>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let core = SessionCore::new(SessionConfig::default(), clock.clone());
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(core),
                link,
                clock,
                observer,
                stop: AtomicBool::new(false),
            }),
            workers: Mutex::new(None),
        }
    }

    pub fn link(&self) -> &Link {
        &self.shared.link
    }

    /// 仅在 Idle/Stopped 状态下可用；失败时配置保持不变。
    pub fn configure(&self, config: SessionConfig) -> Result<(), SessionError> {
        lock(&self.shared.core).configure(config)
    }

    pub fn config(&self) -> SessionConfig {
        lock(&self.shared.core).config().clone()
    }

    #[tracing::instrument(skip(self))]
    pub fn start(&self) -> Result<(), SessionError> {
        let mut workers = lock(&self.workers);
        if lock(&self.shared.core).phase().is_active() {
            return Err(SessionError::AlreadyRunning);
        }
        if !self.shared.link.is_open() {
            return Err(SessionError::TransportClosed);
        }
        if let Some(stale) = workers.take() {
            reap(stale);
        }
        self.shared.link.reset_stats();

        let now = self.shared.clock.now();
        let (mode, poll) = {
            let mut core = lock(&self.shared.core);
            core.begin(now)?;
            (core.config().mode, core.config().poll_interval())
        };
        self.shared.stop.store(false, Ordering::SeqCst);
        self.shared.emit(SessionEvent::Started { mode });
        self.shared.emit(SessionEvent::Status {
            message: format!("Test started in {mode} mode"),
        });

        let running = Arc::new(AtomicBool::new(true));
        let sink: Arc<dyn InboundSink> = self.shared.clone();
        let reader = InboundReader::new(self.shared.link.clone(), poll)
            .spawn(running.clone(), sink)
            .map_err(|e| self.abort_start(&running, e))?;

        let drive_handle = {
            let shared = self.shared.clone();
            let running = running.clone();
            thread::Builder::new()
                .name("linktest-drive".into())
                .spawn(move || drive(shared, running))
        };
        let drive_handle = match drive_handle {
            Ok(h) => h,
            Err(e) => {
                let err = self.abort_start(&running, e);
                let _ = join_within(reader, STOP_WAIT);
                return Err(err);
            }
        };

        *workers = Some(Workers {
            running,
            drive: drive_handle,
            reader,
        });
        Ok(())
    }

    fn abort_start(&self, running: &AtomicBool, err: std::io::Error) -> SessionError {
        warn!(%err, "failed to spawn session worker");
        running.store(false, Ordering::SeqCst);
        self.shared.finish(StopReason::Requested);
        SessionError::Spawn(err.to_string())
    }

    /// 请求停止并在有限时间内等待工作线程退出。
    #[tracing::instrument(skip(self))]
    pub fn stop(&self) {
        let mut workers = lock(&self.workers);
        let Some(w) = workers.take() else {
            return;
        };
        self.shared.stop.store(true, Ordering::SeqCst);
        if join_within(w.drive, STOP_WAIT).is_none() {
            warn!("drive loop did not exit in time");
            self.shared.finish(StopReason::Requested);
        }
        w.running.store(false, Ordering::SeqCst);
        match join_within(w.reader, STOP_WAIT) {
            Some(stats) => debug!(?stats, "reader joined"),
            None => warn!("inbound reader did not exit in time"),
        }
    }

    pub fn pause(&self) -> Result<(), SessionError> {
        lock(&self.shared.core).pause()?;
        self.shared.emit(SessionEvent::Paused);
        self.shared.emit(SessionEvent::Status {
            message: "Test paused".to_string(),
        });
        Ok(())
    }

    pub fn resume(&self) -> Result<(), SessionError> {
        let now = self.shared.clock.now();
        let replayed = lock(&self.shared.core).resume(now)?;
        for reply in replayed.into_iter().filter_map(|h| h.reply) {
            self.shared.send(&reply);
        }
        self.shared.emit(SessionEvent::Resumed);
        self.shared.emit(SessionEvent::Status {
            message: "Test resumed".to_string(),
        });
        Ok(())
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.shared.core).phase()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshot()
    }

    pub fn metrics(&self) -> TestMetrics {
        lock(&self.shared.core).metrics().clone()
    }

    /// 等待测试自行结束；超时返回 false。
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.phase().is_active() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

fn reap(stale: Workers) {
    stale.running.store(false, Ordering::SeqCst);
    let _ = join_within(stale.drive, STOP_WAIT);
    let _ = join_within(stale.reader, STOP_WAIT);
}

impl Drop for TestSession {
    fn drop(&mut self) {
        self.stop();
    }
}
