//! 链路测试命令行
//!
//! 在 TCP 链路（例如经 ser2net 桥接的串口）或进程内的内存回环上运行一次测试，
//! 结束后输出汇总。

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use linktest_rs::clock::SystemClock;
use linktest_rs::config::AppConfig;
use linktest_rs::error::{ConfigError, LinkError, SessionError};
use linktest_rs::link::{Link, MemoryTransport, TcpTransport};
use linktest_rs::session::{LogObserver, SessionConfig, SessionMode, SessionSnapshot, TestSession};
use thiserror::Error;
use tracing::info;

/// 等待测试自行结束时，在配置时长之外额外给出的宽限
const WAIT_GRACE_SECS: f64 = 5.0;
/// 回环模式下应答方比发起方多运行的时长，保证最后的 DATA 能被确认
const RESPONDER_TAIL_SECS: f64 = 1.0;

#[derive(Debug, Parser)]
#[command(
    name = "linktest",
    about = "Measure throughput, latency and loss of a point-to-point link"
)]
struct Args {
    /// Run an originator and a responder back-to-back over an in-memory link
    #[arg(long, conflicts_with_all = ["connect", "listen"])]
    loopback: bool,

    /// Connect to host:port (e.g. a serial port bridged by ser2net)
    #[arg(long, conflicts_with = "listen")]
    connect: Option<String>,

    /// Listen on host:port and wait for one peer
    #[arg(long)]
    listen: Option<String>,

    /// Role for --connect/--listen (loopback runs both)
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// JSON config file with optional `link` and `test` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// DATA payload size in bytes
    #[arg(long)]
    packet_size: Option<usize>,

    /// DATA packets per second
    #[arg(long)]
    rate: Option<f64>,

    #[arg(long)]
    duration_secs: Option<f64>,

    #[arg(long)]
    heartbeat_secs: Option<f64>,

    #[arg(long)]
    ack_timeout_secs: Option<f64>,

    /// Loopback only: silently drop every N-th frame the originator writes
    #[arg(long, requires = "loopback")]
    drop_every: Option<usize>,

    /// Print final snapshots as JSON lines instead of summary lines
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    #[value(alias = "transmitter", alias = "tx")]
    Originator,
    #[value(alias = "receiver", alias = "rx")]
    Responder,
}

impl From<ModeArg> for SessionMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Originator => SessionMode::Originator,
            ModeArg::Responder => SessionMode::Responder,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("failed to encode snapshot: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    // 初始化 tracing；日志写到 stderr，stdout 只留给结果
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), CliError> {
    let mut app = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    if let Some(mode) = args.mode {
        app.test.mode = mode.into();
    }
    if let Some(v) = args.packet_size {
        app.test.packet_size = v;
    }
    if let Some(v) = args.rate {
        app.test.transmission_rate = v;
    }
    if let Some(v) = args.duration_secs {
        app.test.test_duration_secs = v;
    }
    if let Some(v) = args.heartbeat_secs {
        app.test.heartbeat_interval_secs = v;
    }
    if let Some(v) = args.ack_timeout_secs {
        app.test.ack_timeout_secs = v;
    }
    if let Some(addr) = &args.connect {
        app.link.address = Some(addr.clone());
        app.link.listen = false;
    }
    if let Some(addr) = &args.listen {
        app.link.address = Some(addr.clone());
        app.link.listen = true;
    }
    app.test.validate()?;

    if args.loopback {
        run_loopback(&app.test, args.drop_every, args.json)
    } else {
        run_remote(&app, args.json)
    }
}

fn wait_limit(cfg: &SessionConfig) -> Duration {
    Duration::from_secs_f64(cfg.test_duration_secs + WAIT_GRACE_SECS)
}

fn new_session(link: Link) -> TestSession {
    TestSession::with_parts(link, Arc::new(SystemClock), Arc::new(LogObserver))
}

fn run_loopback(cfg: &SessionConfig, drop_every: Option<usize>, json: bool) -> Result<(), CliError> {
    let (a, b) = MemoryTransport::pair();
    let a = match drop_every {
        Some(n) => a.with_write_drop_every(n),
        None => a,
    };

    let originator = new_session(Link::new(a));
    let responder = new_session(Link::new(b));
    originator.configure(SessionConfig {
        mode: SessionMode::Originator,
        ..cfg.clone()
    })?;
    responder.configure(SessionConfig {
        mode: SessionMode::Responder,
        test_duration_secs: cfg.test_duration_secs + RESPONDER_TAIL_SECS,
        ..cfg.clone()
    })?;

    responder.start()?;
    originator.start()?;
    info!(duration = cfg.test_duration_secs, "loopback test running");

    if !originator.wait(wait_limit(cfg)) {
        info!("originator did not finish in time, stopping");
    }
    originator.stop();
    responder.stop();

    report(&originator.snapshot(), json)?;
    report(&responder.snapshot(), json)?;
    Ok(())
}

fn run_remote(app: &AppConfig, json: bool) -> Result<(), CliError> {
    let address = app.link.address.clone().ok_or_else(|| {
        CliError::Usage("one of --loopback, --connect or --listen is required".to_string())
    })?;
    let transport = if app.link.listen {
        let listener = TcpListener::bind(&address).map_err(LinkError::from)?;
        info!(%address, "waiting for peer");
        TcpTransport::accept(&listener)?
    } else {
        TcpTransport::connect(&address)?
    };

    let session = new_session(Link::new(transport));
    session.configure(app.test.clone())?;
    session.start()?;
    if !session.wait(wait_limit(&app.test)) {
        info!("test did not finish in time, stopping");
    }
    session.stop();
    session.link().close();

    report(&session.snapshot(), json)
}

fn report(snap: &SessionSnapshot, json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string(snap)?);
        return Ok(());
    }
    let m = &snap.metrics;
    let s = &snap.summary;
    println!(
        "summary role={} sent={} received={} lost={} loss_rate={:.2} avg_latency_ms={:.3} jitter_ms={:.3} avg_bandwidth_bps={:.1} errors={}",
        snap.mode,
        m.packets_sent,
        m.packets_received,
        m.packets_lost,
        s.packet_loss_rate,
        s.average_latency * 1000.0,
        s.jitter * 1000.0,
        s.average_bandwidth,
        m.errors.len()
    );
    Ok(())
}
