//! 连接注册表
//!
//! 进程内的参与者 ID -> 发送通道映射。每个 ID 至多一个活动连接，
//! 新连接注册时会顶替旧连接并唤醒旧连接任务让其退出。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use protocol::{ParticipantId, ServerMessage};

/// 连接编号
pub type ConnectionId = u64;

/// 活动连接句柄
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub tx: mpsc::Sender<ServerMessage>,
    /// 被新连接顶替时触发
    pub superseded: Arc<Notify>,
}

impl ConnectionHandle {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            tx,
            superseded: Arc::new(Notify::new()),
        }
    }
}

/// 连接注册表
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ParticipantId, ConnectionHandle>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// 分配新的连接编号
    pub fn next_connection_id(&self) -> ConnectionId {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn connections(&self) -> std::sync::MutexGuard<'_, HashMap<ParticipantId, ConnectionHandle>> {
        // 锁内没有可能 panic 的操作，中毒时直接取回数据
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 注册连接，返回被顶替的旧句柄
    pub fn register(&self, participant: &str, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self.connections().insert(participant.to_string(), handle.clone());

        match &previous {
            Some(old) if old.id != handle.id => {
                debug!(participant, old_conn = old.id, new_conn = handle.id, "connection superseded");
                old.superseded.notify_one();
            }
            _ => {}
        }
        previous
    }

    pub fn lookup(&self, participant: &str) -> Option<ConnectionHandle> {
        self.connections().get(participant).cloned()
    }

    /// 移除连接；编号不一致（已被新连接顶替）时不做任何事
    pub fn remove(&self, participant: &str, conn: ConnectionId) -> bool {
        let mut connections = self.connections();
        match connections.get(participant) {
            Some(handle) if handle.id == conn => {
                connections.remove(participant);
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, participant: &str) -> bool {
        self.connections().contains_key(participant)
    }

    /// 在线连接数
    pub fn len(&self) -> usize {
        self.connections().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 发送消息；没有活动连接或通道已关闭时丢弃并返回 false
    pub async fn send(&self, participant: &str, msg: ServerMessage) -> bool {
        let Some(handle) = self.lookup(participant) else {
            warn!(participant, kind = msg.kind(), "no live connection, notification dropped");
            return false;
        };

        let kind = msg.kind();
        if handle.tx.send(msg).await.is_err() {
            warn!(participant, kind, conn = handle.id, "connection closed, notification dropped");
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(registry: &ConnectionRegistry) -> (ConnectionHandle, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(8);
        (ConnectionHandle::new(registry.next_connection_id(), tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_send() {
        let registry = ConnectionRegistry::new();
        let (h, mut rx) = handle(&registry);

        assert!(registry.register("a", h).is_none());
        assert!(registry.is_connected("a"));
        assert!(registry.send("a", ServerMessage::OpponentReconnected).await);
        assert_eq!(rx.recv().await, Some(ServerMessage::OpponentReconnected));

        assert!(!registry.send("b", ServerMessage::OpponentReconnected).await);
    }

    #[tokio::test]
    async fn test_supersede() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = handle(&registry);
        let (new, mut new_rx) = handle(&registry);
        let old_id = old.id;
        let old_notify = old.superseded.clone();

        registry.register("a", old);
        let previous = registry.register("a", new).unwrap();
        assert_eq!(previous.id, old_id);

        // 旧连接收到顶替通知
        tokio::time::timeout(std::time::Duration::from_secs(1), old_notify.notified())
            .await
            .unwrap();

        // 旧连接退出时不能移除新连接
        assert!(!registry.remove("a", old_id));
        assert!(registry.is_connected("a"));

        registry.send("a", ServerMessage::OpponentSurrendered).await;
        assert_eq!(new_rx.recv().await, Some(ServerMessage::OpponentSurrendered));
    }

    #[tokio::test]
    async fn test_send_to_closed_channel() {
        let registry = ConnectionRegistry::new();
        let (h, rx) = handle(&registry);
        let conn = h.id;
        registry.register("a", h);
        drop(rx);

        assert!(!registry.send("a", ServerMessage::OpponentReconnected).await);
        assert!(registry.remove("a", conn));
        assert!(registry.is_empty());
    }
}
