//! 确认与序号跟踪
//!
//! 发送方的待确认表，以及接收方基于序号间隙的丢包检测。

use std::collections::{HashMap, HashSet};

use crate::proto::SequenceId;

/// 已发送但尚未确认的 DATA：序号 -> 发送时间（秒）
#[derive(Debug, Default)]
pub struct PendingAcks {
    sent_at: HashMap<SequenceId, f64>,
}

impl PendingAcks {
    /// 记录一次发送；序号回绕后若旧条目仍在，返回被替换的发送时间。
    pub fn insert(&mut self, seq: SequenceId, at: f64) -> Option<f64> {
        self.sent_at.insert(seq, at)
    }

    /// 原子地移除并返回发送时间；不存在时返回 `None`。
    pub fn resolve(&mut self, seq: SequenceId) -> Option<f64> {
        self.sent_at.remove(&seq)
    }

    /// 移除所有超过 `timeout` 的条目，按发送时间排序返回其序号。
    pub fn sweep(&mut self, now: f64, timeout: f64) -> Vec<SequenceId> {
        let mut expired: Vec<(f64, SequenceId)> = self
            .sent_at
            .iter()
            .filter(|&(_, &at)| now - at > timeout)
            .map(|(&seq, &at)| (at, seq))
            .collect();
        expired.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        for (_, seq) in &expired {
            self.sent_at.remove(seq);
        }
        expired.into_iter().map(|(_, seq)| seq).collect()
    }

    pub fn contains(&self, seq: SequenceId) -> bool {
        self.sent_at.contains_key(&seq)
    }

    pub fn len(&self) -> usize {
        self.sent_at.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent_at.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent_at.clear();
    }
}

/// 单个到达序号的观测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// 展开后的 64 位序号
    pub sequence: i64,
    /// 本次新发现的缺失序号（展开后），每个只报告一次
    pub missing: Vec<i64>,
    pub duplicate: bool,
}

/// Receiver-side gap detector.
///
/// Wire ids are 16 bits; each one is extended to the 64-bit running sequence
/// nearest to `last_sequence_seen` (forward window of 32 767), so a gap that
/// spans the 65 535 -> 0 wrap is detected like any other.
#[derive(Debug)]
pub struct SequenceTracker {
    last_seen: i64,
    seen: HashSet<i64>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self {
            last_seen: -1,
            seen: HashSet::new(),
        }
    }
}

impl SequenceTracker {
    /// 已见过的最大（展开后）序号；尚未收到任何报文时为 -1。
    pub fn last_sequence_seen(&self) -> i64 {
        self.last_seen
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    pub fn has_seen(&self, sequence: i64) -> bool {
        self.seen.contains(&sequence)
    }

    pub fn observe(&mut self, seq: SequenceId) -> Observation {
        let sequence = self.extend(seq);
        let duplicate = !self.seen.insert(sequence);

        let missing: Vec<i64> = if sequence > self.last_seen + 1 {
            (self.last_seen + 1..sequence)
                .filter(|s| !self.seen.contains(s))
                .collect()
        } else {
            Vec::new()
        };
        self.last_seen = self.last_seen.max(sequence);

        Observation {
            sequence,
            missing,
            duplicate,
        }
    }

    pub fn reset(&mut self) {
        self.last_seen = -1;
        self.seen.clear();
    }

    fn extend(&self, seq: SequenceId) -> i64 {
        if self.last_seen < 0 {
            return seq as i64;
        }
        let delta = seq.wrapping_sub(self.last_seen as u16) as i16;
        self.last_seen + delta as i64
    }
}
