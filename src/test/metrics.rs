use crate::session::TestMetrics;

#[test]
fn empty_metrics_derive_zeroes() {
    let m = TestMetrics::default();
    assert_eq!(m.packet_loss_rate(), 0.0);
    assert_eq!(m.average_latency(), 0.0);
    assert_eq!(m.average_bandwidth(), 0.0);
    assert_eq!(m.min_latency(), 0.0);
    assert_eq!(m.max_latency(), 0.0);
    assert_eq!(m.jitter(), 0.0);
    assert_eq!(m.peak_bandwidth(), 0.0);
    assert_eq!(m.current_bandwidth(), 0.0);
    assert_eq!(m.test_duration(123.0), 0.0);
}

#[test]
fn loss_rate_is_a_percentage_of_sent() {
    let m = TestMetrics {
        packets_sent: 40,
        packets_lost: 10,
        ..TestMetrics::default()
    };
    assert_eq!(m.packet_loss_rate(), 25.0);
}

#[test]
fn duration_runs_until_finalized() {
    let mut m = TestMetrics::started_at(100.0);
    assert_eq!(m.test_duration(102.5), 2.5);
    assert!(!m.is_finalized());

    m.finalize(104.0);
    m.finalize(110.0);
    assert!(m.is_finalized());
    assert_eq!(m.end_time, Some(104.0), "finalize only freezes once");
    assert_eq!(m.test_duration(200.0), 4.0);
}

#[test]
fn latency_and_bandwidth_statistics() {
    let m = TestMetrics {
        latency_samples: vec![0.010, 0.020, 0.030],
        bandwidth_samples: vec![100.0, 300.0, 200.0],
        ..TestMetrics::default()
    };
    assert!((m.average_latency() - 0.020).abs() < 1e-12);
    assert_eq!(m.min_latency(), 0.010);
    assert_eq!(m.max_latency(), 0.030);
    let expected_jitter = (2.0f64 / 3.0).sqrt() * 0.010;
    assert!((m.jitter() - expected_jitter).abs() < 1e-9);

    assert_eq!(m.average_bandwidth(), 200.0);
    assert_eq!(m.peak_bandwidth(), 300.0);
    assert_eq!(m.current_bandwidth(), 200.0);

    let s = m.summary(0.0);
    assert_eq!(s.peak_bandwidth, 300.0);
    assert_eq!(s.duration_secs, 0.0);
}
