//! 对局锁
//!
//! 同一对局的读-改-写（落子、弃权、认输、结束、重连、超时清理）串行执行。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use protocol::GameId;

/// 按对局 ID 分配的互斥锁
#[derive(Default)]
pub struct GameLocks {
    locks: Mutex<HashMap<GameId, Arc<AsyncMutex<()>>>>,
}

impl GameLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取对局锁，持有期间其他任务无法操作同一对局
    pub async fn lock(&self, game_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks
                .entry(game_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// 对局结束后释放锁条目
    pub fn forget(&self, game_id: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(lock) = locks.get(game_id) {
            // 仍有任务持有或等待时保留
            if Arc::strong_count(lock) == 1 {
                locks.remove(game_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_lock_serializes_same_game() {
        let locks = Arc::new(GameLocks::new());
        let guard = locks.lock("g").await;

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            let _guard = locks2.lock("g").await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        // 不同对局互不影响
        let _other = locks.lock("h").await;

        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_forget() {
        let locks = GameLocks::new();
        let guard = locks.lock("g").await;

        locks.forget("g");
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget("g");
        assert!(locks.is_empty());
    }
}
