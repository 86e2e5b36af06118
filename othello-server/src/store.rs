//! 会话存储接口
//!
//! 对外部带过期时间的键值存储的抽象，语义与 Redis 的
//! GET/SET/HGET/HSET/DEL/EXPIRE/PERSIST/TTL/EXISTS/KEYS 对应。
//! 进程内实现 [`MemoryStore`] 用于单实例部署和测试。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};

/// 键的剩余生存时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// 键不存在
    Missing,
    /// 永不过期
    Persistent,
    /// 剩余时间
    Remaining(Duration),
}

/// 带过期时间的键值存储
///
/// 任何调用都可能返回 [`StoreError::Unavailable`]，调用方不能假设成功。
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 读取字符串值
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// 写入字符串值；`ttl` 为 None 时键变为永久
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// 读取哈希字段
    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// 读取整个哈希
    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// 部分更新哈希字段，未提及的字段保持不变
    ///
    /// `ttl` 为 None 时保留键原有的过期时间。
    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()>;

    /// 删除哈希字段
    async fn hash_delete(&self, key: &str, fields: &[&str]) -> StoreResult<()>;

    /// 删除键，返回键是否存在过
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    /// 设置过期时间，返回键是否存在
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// 移除过期时间，返回键是否存在
    async fn persist(&self, key: &str) -> StoreResult<bool>;

    /// 查询剩余生存时间
    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl>;

    /// 键是否存在
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// 列出以 `prefix` 开头的所有键
    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 取出未过期的条目，过期的顺手清掉
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    let now = Instant::now();
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        entries.remove(key);
    }
    entries.get_mut(key)
}

fn deadline(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|ttl| Instant::now() + ttl)
}

/// 进程内存储
///
/// 过期采用惰性清理；时间取自 tokio 时钟，测试中可以暂停和快进。
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// 模拟存储故障：设为 false 后所有调用返回 `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        Ok(self.hash_get_all(key).await?.remove(field))
    }

    async fn hash_get_all(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => Ok(map.clone()),
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_set(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;

        if live(&mut entries, key).is_none() {
            entries.insert(
                key.to_string(),
                Entry {
                    value: Value::Hash(HashMap::new()),
                    expires_at: None,
                },
            );
        }

        let entry = entries.get_mut(key).ok_or_else(|| StoreError::Unavailable(
            "entry vanished during update".to_string(),
        ))?;
        let Value::Hash(map) = &mut entry.value else {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        };

        for (field, value) in fields {
            map.insert(field.to_string(), value.clone());
        }
        if ttl.is_some() {
            entry.expires_at = deadline(ttl);
        }
        Ok(())
    }

    async fn hash_delete(&self, key: &str, fields: &[&str]) -> StoreResult<()> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(Entry {
                value: Value::Hash(map),
                ..
            }) => {
                for field in fields {
                    map.remove(*field);
                }
                Ok(())
            }
            Some(_) => Err(StoreError::WrongType {
                key: key.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let existed = live(&mut entries, key).is_some();
        entries.remove(key);
        Ok(existed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = deadline(Some(ttl));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn persist(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        match live(&mut entries, key) {
            Some(entry) => {
                entry.expires_at = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<KeyTtl> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(match live(&mut entries, key) {
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Remaining(at.saturating_duration_since(Instant::now())),
            Some(_) => KeyTtl::Persistent,
            None => KeyTtl::Missing,
        })
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        Ok(live(&mut entries, key).is_some())
    }

    async fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));

        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
