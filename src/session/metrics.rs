//! 指标聚合
//!
//! 只追加的计数器与采样序列，由状态机在运行期间原地修改，停止后冻结。

use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestMetrics {
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_transmitted: u64,
    /// 秒
    pub latency_samples: Vec<f64>,
    /// 字节/秒
    pub bandwidth_samples: Vec<f64>,
    pub errors: Vec<String>,
}

/// 由 [`TestMetrics`] 派生的统计量
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub duration_secs: f64,
    pub packet_loss_rate: f64,
    pub average_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub jitter: f64,
    pub average_bandwidth: f64,
    pub peak_bandwidth: f64,
    pub current_bandwidth: f64,
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

impl TestMetrics {
    pub fn started_at(now: f64) -> Self {
        Self {
            start_time: Some(now),
            ..Self::default()
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    pub(crate) fn finalize(&mut self, now: f64) {
        if self.end_time.is_none() {
            self.end_time = Some(now);
        }
    }

    /// 已冻结时为 `end - start`，否则为 `now - start`；未开始时为 0。
    pub fn test_duration(&self, now: f64) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        self.end_time.unwrap_or(now) - start
    }

    /// 丢包率（百分比）
    pub fn packet_loss_rate(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        100.0 * self.packets_lost as f64 / self.packets_sent as f64
    }

    pub fn average_latency(&self) -> f64 {
        mean(&self.latency_samples)
    }

    pub fn average_bandwidth(&self) -> f64 {
        mean(&self.bandwidth_samples)
    }

    pub fn min_latency(&self) -> f64 {
        self.latency_samples.iter().copied().reduce(f64::min).unwrap_or(0.0)
    }

    pub fn max_latency(&self) -> f64 {
        self.latency_samples.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    /// 时延的总体标准差
    pub fn jitter(&self) -> f64 {
        if self.latency_samples.len() < 2 {
            return 0.0;
        }
        let m = self.average_latency();
        let var = self
            .latency_samples
            .iter()
            .map(|x| (x - m) * (x - m))
            .sum::<f64>()
            / self.latency_samples.len() as f64;
        var.sqrt()
    }

    pub fn peak_bandwidth(&self) -> f64 {
        self.bandwidth_samples.iter().copied().reduce(f64::max).unwrap_or(0.0)
    }

    pub fn current_bandwidth(&self) -> f64 {
        self.bandwidth_samples.last().copied().unwrap_or(0.0)
    }

    pub fn summary(&self, now: f64) -> MetricsSummary {
        MetricsSummary {
            duration_secs: self.test_duration(now),
            packet_loss_rate: self.packet_loss_rate(),
            average_latency: self.average_latency(),
            min_latency: self.min_latency(),
            max_latency: self.max_latency(),
            jitter: self.jitter(),
            average_bandwidth: self.average_bandwidth(),
            peak_bandwidth: self.peak_bandwidth(),
            current_bandwidth: self.current_bandwidth(),
        }
    }
}
