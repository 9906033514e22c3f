//! 内存双工链路
//!
//! 一对端点共享两个字节队列，一端写入的数据由另一端读出。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LinkError;
use crate::sync::lock;

use super::transport::Transport;

type Pipe = Arc<Mutex<VecDeque<u8>>>;

#[derive(Debug)]
pub struct MemoryTransport {
    tx: Pipe,
    rx: Pipe,
    open: Arc<AtomicBool>,
    /// 每第 n 次写入被静默丢弃（模拟线路丢包）
    drop_every: Option<usize>,
    writes: AtomicUsize,
}

impl MemoryTransport {
    /// 创建一对互联的端点
    pub fn pair() -> (MemoryTransport, MemoryTransport) {
        let a_to_b: Pipe = Arc::default();
        let b_to_a: Pipe = Arc::default();
        let open = Arc::new(AtomicBool::new(true));
        let a = MemoryTransport {
            tx: a_to_b.clone(),
            rx: b_to_a.clone(),
            open: open.clone(),
            drop_every: None,
            writes: AtomicUsize::new(0),
        };
        let b = MemoryTransport {
            tx: b_to_a,
            rx: a_to_b,
            open,
            drop_every: None,
            writes: AtomicUsize::new(0),
        };
        (a, b)
    }

    /// Silently drop every `n`-th write (the write still reports success).
    pub fn with_write_drop_every(mut self, n: usize) -> Self {
        self.drop_every = (n > 0).then_some(n);
        self
    }

    /// 对端尚未读取的字节数（本端写入方向）
    pub fn outbound_pending(&self) -> usize {
        lock(&self.tx).len()
    }
}

impl Transport for MemoryTransport {
    fn write(&self, bytes: &[u8]) -> Result<usize, LinkError> {
        if !self.is_open() {
            return Err(LinkError::Closed);
        }
        let count = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(n) = self.drop_every {
            if count % n == 0 {
                return Ok(bytes.len());
            }
        }
        lock(&self.tx).extend(bytes.iter().copied());
        Ok(bytes.len())
    }

    fn read_available(&self) -> Result<Vec<u8>, LinkError> {
        let mut rx = lock(&self.rx);
        if rx.is_empty() && !self.is_open() {
            return Err(LinkError::Closed);
        }
        Ok(rx.drain(..).collect())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}
