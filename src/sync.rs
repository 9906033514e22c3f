use std::sync::{Mutex, MutexGuard};

/// 获取锁；持有者 panic 导致的中毒状态被忽略，继续使用内部数据。
pub(crate) fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
