//! 测试会话模块
//!
//! 此模块包含会话配置、指标聚合、确认/序号跟踪、观察者接口以及状态机与其驱动线程。

mod config;
mod machine;
mod engine;
mod metrics;
mod observer;
mod tracking;

pub use config::{SessionConfig, SessionMode};
pub use machine::{FILLER_BYTE, Handled, SessionCore, SessionPhase, SessionSnapshot, Tick};
pub use engine::TestSession;
pub use metrics::{MetricsSummary, TestMetrics};
pub use observer::{
    ChannelObserver, LogObserver, NullObserver, PacketOutcome, SessionEvent, SessionObserver,
    StopReason,
};
pub use tracking::{Observation, PendingAcks, SequenceTracker};
