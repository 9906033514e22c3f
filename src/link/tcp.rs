//! TCP 链路
//!
//! 用于经 ser2net/socat 等桥接到网络上的串口。读写各持一个套接字句柄和各自的锁，
//! 写入阻塞时读取照常进行。写入在期限内保证整帧写完，超时返回错误。

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::LinkError;
use crate::sync::lock;

use super::transport::Transport;

const READ_CHUNK: usize = 4096;
const WRITE_RETRY: Duration = Duration::from_millis(1);
/// 单帧写入的默认期限
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    /// 关闭用；不经过读写锁
    control: TcpStream,
    open: AtomicBool,
    write_timeout: Duration,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self, LinkError> {
        let stream = TcpStream::connect(addr)?;
        info!(peer = ?stream.peer_addr().ok(), "connected");
        Self::from_stream(stream)
    }

    /// 在监听套接字上等待一个对端
    pub fn accept(listener: &TcpListener) -> Result<Self, LinkError> {
        let (stream, peer) = listener.accept()?;
        info!(%peer, "accepted");
        Self::from_stream(stream)
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self, LinkError> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let writer = stream.try_clone()?;
        let control = stream.try_clone()?;
        Ok(Self {
            reader: Mutex::new(stream),
            writer: Mutex::new(writer),
            control,
            open: AtomicBool::new(true),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        })
    }

    /// How long one frame may wait for socket buffer space before the write fails.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

impl Transport for TcpTransport {
    fn write(&self, bytes: &[u8]) -> Result<usize, LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        let mut stream = lock(&self.writer);
        let deadline = Instant::now() + self.write_timeout;
        let mut written = 0;
        while written < bytes.len() {
            match stream.write(&bytes[written..]) {
                Ok(0) => {
                    self.mark_closed();
                    return Err(LinkError::ShortWrite {
                        written,
                        expected: bytes.len(),
                    });
                }
                Ok(n) => written += n,
                // 对端不读时缓冲区会一直满着，只等到期限为止
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if !self.is_open() {
                        return Err(LinkError::Closed);
                    }
                    if Instant::now() >= deadline {
                        warn!(written, expected = bytes.len(), "write timed out");
                        return Err(LinkError::WriteTimeout {
                            written,
                            expected: bytes.len(),
                        });
                    }
                    thread::sleep(WRITE_RETRY);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.mark_closed();
                    return Err(e.into());
                }
            }
        }
        Ok(written)
    }

    fn read_available(&self) -> Result<Vec<u8>, LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        let mut stream = lock(&self.reader);
        let mut out = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    debug!("peer closed the connection");
                    self.mark_closed();
                    if out.is_empty() {
                        return Err(LinkError::Closed);
                    }
                    break;
                }
                Ok(n) => out.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.mark_closed();
                    return Err(e.into());
                }
            }
        }
        Ok(out)
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.mark_closed();
        let _ = self.control.shutdown(Shutdown::Both);
    }
}
