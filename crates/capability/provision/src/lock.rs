//! 设备操作锁
//!
//! 同一设备同一时刻最多一个进行中的下发操作。`try_acquire` 不排队也不阻塞，
//! 返回的守卫在任何路径上被丢弃时释放锁。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use domain::DeviceId;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Default)]
struct LockInner {
    held: DashMap<DeviceId, Instant>,
    idle: Notify,
}

/// 设备操作锁集合；克隆共享同一集合。
#[derive(Clone, Default)]
pub struct OperationLocks {
    inner: Arc<LockInner>,
}

impl OperationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设备未被占用时加锁并返回守卫，否则返回 `None`。
    pub fn try_acquire(&self, device_id: DeviceId) -> Option<OperationGuard> {
        match self.inner.held.entry(device_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                Some(OperationGuard {
                    inner: self.inner.clone(),
                    device_id,
                })
            }
        }
    }

    pub fn is_locked(&self, device_id: DeviceId) -> bool {
        self.inner.held.contains_key(&device_id)
    }

    pub fn held_count(&self) -> usize {
        self.inner.held.len()
    }

    /// 等待所有进行中的操作结束。
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.held.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

/// 持有期间设备处于锁定状态。
pub struct OperationGuard {
    inner: Arc<LockInner>,
    device_id: DeviceId,
}

impl OperationGuard {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.inner.held.remove(&self.device_id);
        if self.inner.held.is_empty() {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let locks = OperationLocks::new();
        let guard = locks.try_acquire(7).expect("first acquire");
        assert!(locks.is_locked(7));
        assert!(locks.try_acquire(7).is_none());
        assert!(locks.try_acquire(8).is_some());
        drop(guard);
        assert!(!locks.is_locked(7));
        assert!(locks.try_acquire(7).is_some());
    }

    #[test]
    fn guard_released_on_early_return() {
        let locks = OperationLocks::new();
        let attempt = |locks: &OperationLocks| -> Result<(), &'static str> {
            let _guard = locks.try_acquire(1).ok_or("busy")?;
            Err("gateway failed")
        };
        assert_eq!(attempt(&locks), Err("gateway failed"));
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_idle_returns_after_last_guard() {
        let locks = OperationLocks::new();
        let guard = locks.try_acquire(1).expect("acquire");
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.wait_idle().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.expect("waiter");
        locks.wait_idle().await;
    }
}
