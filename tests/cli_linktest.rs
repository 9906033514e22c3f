use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "linktest-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn linktest() -> Command {
    Command::new(env!("CARGO_BIN_EXE_linktest"))
}

fn json_lines(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).expect("parse snapshot json"))
        .collect()
}

#[test]
fn loopback_prints_both_snapshots_as_json() {
    let out = linktest()
        .args([
            "--loopback",
            "--rate",
            "20",
            "--duration-secs",
            "1",
            "--packet-size",
            "32",
            "--json",
        ])
        .output()
        .expect("run linktest");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

    let snaps = json_lines(&out.stdout);
    assert_eq!(snaps.len(), 2);
    assert_eq!(snaps[0]["mode"], "originator");
    assert_eq!(snaps[1]["mode"], "responder");
    assert_eq!(snaps[0]["phase"], "stopped");

    let sent = snaps[0]["metrics"]["packets_sent"].as_u64().unwrap();
    let received = snaps[1]["metrics"]["packets_received"].as_u64().unwrap();
    assert!(sent >= 15, "sent {sent}");
    assert_eq!(received, sent);
    assert_eq!(snaps[0]["metrics"]["packets_lost"], 0);
    assert_eq!(snaps[1]["metrics"]["bytes_transmitted"].as_u64().unwrap(), sent * 32);
}

#[test]
fn loopback_summary_lines_by_default() {
    let out = linktest()
        .args(["--loopback", "--rate", "10", "--duration-secs", "0.5"])
        .output()
        .expect("run linktest");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let lines: Vec<&str> = stdout.lines().filter(|l| l.starts_with("summary ")).collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("role=originator"));
    assert!(lines[1].contains("role=responder"));
    assert!(lines[0].contains("lost=0"));
}

#[test]
fn drop_every_produces_loss() {
    let out = linktest()
        .args([
            "--loopback",
            "--rate",
            "20",
            "--duration-secs",
            "1.5",
            "--ack-timeout-secs",
            "0.3",
            "--heartbeat-secs",
            "100",
            "--drop-every",
            "5",
            "--json",
        ])
        .output()
        .expect("run linktest");
    assert!(out.status.success());
    let snaps = json_lines(&out.stdout);
    assert!(snaps[0]["metrics"]["packets_lost"].as_u64().unwrap() > 0);
    assert!(snaps[1]["metrics"]["packets_lost"].as_u64().unwrap() > 0);
}

#[test]
fn config_file_sets_test_parameters() {
    let dir = unique_temp_dir("config");
    let cfg = write_file(
        &dir,
        "linktest.json",
        r#"{ "test": { "packet_size": 16, "transmission_rate": 10, "test_duration": 0.5 } }"#,
    );
    let out = linktest()
        .arg("--loopback")
        .arg("--config")
        .arg(&cfg)
        .arg("--json")
        .output()
        .expect("run linktest");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let snaps = json_lines(&out.stdout);
    let sent = snaps[0]["metrics"]["packets_sent"].as_u64().unwrap();
    assert!((4..=6).contains(&sent), "sent {sent}");
    assert_eq!(snaps[0]["metrics"]["bytes_transmitted"].as_u64().unwrap(), sent * 16);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn missing_link_is_an_error() {
    let out = linktest().output().expect("run linktest");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("--loopback"));
}

#[test]
fn invalid_mode_is_rejected() {
    let out = linktest()
        .args(["--loopback", "--mode", "sideways"])
        .output()
        .expect("run linktest");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid value 'sideways'"), "stderr: {stderr}");
}

#[test]
fn mode_accepts_legacy_role_names() {
    let out = linktest()
        .args(["--loopback", "--mode", "transmitter", "--rate", "10", "--duration-secs", "0.3"])
        .output()
        .expect("run linktest");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = unique_temp_dir("bad-config");
    let cfg = write_file(&dir, "bad.json", r#"{ "test": { "transmission_rate": -1 } }"#);
    let out = linktest()
        .arg("--loopback")
        .arg("--config")
        .arg(&cfg)
        .output()
        .expect("run linktest");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("transmission_rate"));
    fs::remove_dir_all(&dir).ok();
}
