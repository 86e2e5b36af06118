//! 配对
//!
//! 等待中的参与者放在 [`WaitingPool`] 中，配对时从池中随机挑选对手（不是先到先得）。
//! 池的互斥锁同时保护"挑选 + 写入"整个过程，保证每个参与者在一轮配对中至多进入一局。

use std::collections::HashMap;

use rand::Rng;
use tokio::sync::Mutex;
use tracing::{debug, error, info};
use uuid::Uuid;

use protocol::{BoardState, Color, GameId, ParticipantId};

use crate::config::ColorPolicy;
use crate::error::StoreResult;
use crate::participant::{Participant, Seat};
use crate::registry::ConnectionRegistry;
use crate::session::SessionRepository;

/// 等待池：O(1) 加入、移除和随机选取
#[derive(Debug, Default)]
pub struct WaitingPool {
    ids: Vec<ParticipantId>,
    index: HashMap<ParticipantId, usize>,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入；已在池中时返回 false
    pub fn insert(&mut self, id: &str) -> bool {
        if self.index.contains_key(id) {
            return false;
        }
        self.index.insert(id.to_string(), self.ids.len());
        self.ids.push(id.to_string());
        true
    }

    /// 移除；不在池中时返回 false
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(idx) = self.index.remove(id) else {
            return false;
        };
        self.ids.swap_remove(idx);
        if let Some(moved) = self.ids.get(idx) {
            self.index.insert(moved.clone(), idx);
        }
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// 随机选取一个不是 `candidate` 的参与者
    pub fn pick_other<R: Rng>(&self, candidate: &str, rng: &mut R) -> Option<ParticipantId> {
        match self.index.get(candidate) {
            Some(&own) => {
                if self.ids.len() < 2 {
                    return None;
                }
                let mut pick = rng.gen_range(0..self.ids.len() - 1);
                if pick >= own {
                    pick += 1;
                }
                self.ids.get(pick).cloned()
            }
            None => {
                if self.ids.is_empty() {
                    return None;
                }
                self.ids.get(rng.gen_range(0..self.ids.len())).cloned()
            }
        }
    }
}

/// 一次成功的配对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub game_id: GameId,
    pub black: Participant,
    pub white: Participant,
}

impl Pairing {
    pub fn participants(&self) -> [&Participant; 2] {
        [&self.black, &self.white]
    }
}

/// 配对器
pub struct Matchmaker {
    pool: Mutex<WaitingPool>,
    color_policy: ColorPolicy,
}

impl Matchmaker {
    pub fn new(color_policy: ColorPolicy) -> Self {
        Self {
            pool: Mutex::new(WaitingPool::new()),
            color_policy,
        }
    }

    /// 加入等待池
    pub async fn enqueue(&self, id: &str) {
        if self.pool.lock().await.insert(id) {
            debug!(participant = %id, "joined waiting pool");
        }
    }

    /// 离开等待池
    pub async fn withdraw(&self, id: &str) -> bool {
        self.pool.lock().await.remove(id)
    }

    pub async fn is_waiting(&self, id: &str) -> bool {
        self.pool.lock().await.contains(id)
    }

    pub async fn waiting_count(&self) -> usize {
        self.pool.lock().await.len()
    }

    /// 为 `candidate` 寻找对手并创建对局
    ///
    /// 提交前重新校验双方仍为等待状态且连接在线，失效的池条目顺带清除。
    /// 写入失败时尽力回滚，双方留在池中。
    pub async fn try_match(
        &self,
        candidate: &str,
        repo: &SessionRepository,
        registry: &ConnectionRegistry,
    ) -> StoreResult<Option<Pairing>> {
        let mut pool = self.pool.lock().await;

        if !pool.contains(candidate) {
            return Ok(None);
        }
        let Some(me) = Self::eligible(candidate, repo, registry).await? else {
            pool.remove(candidate);
            debug!(participant = %candidate, "candidate no longer eligible, evicted");
            return Ok(None);
        };

        let opponent = loop {
            let picked = {
                let mut rng = rand::thread_rng();
                pool.pick_other(candidate, &mut rng)
            };
            let Some(other_id) = picked else {
                return Ok(None);
            };
            match Self::eligible(&other_id, repo, registry).await? {
                Some(other) => break other,
                None => {
                    pool.remove(&other_id);
                    debug!(participant = %other_id, "stale waiting entry evicted");
                }
            }
        };

        let candidate_black = match self.color_policy {
            ColorPolicy::Fixed => true,
            ColorPolicy::Random => rand::random::<bool>(),
        };
        let (black, white) = if candidate_black {
            (me, opponent)
        } else {
            (opponent, me)
        };

        let game_id = Uuid::new_v4().to_string();
        match Self::commit(&game_id, &black, &white, repo).await {
            Ok(pairing) => {
                pool.remove(&black.id);
                pool.remove(&white.id);
                info!(
                    game = %game_id,
                    black = %black.id,
                    white = %white.id,
                    "participants matched"
                );
                Ok(Some(pairing))
            }
            Err(e) => {
                error!(game = %game_id, error = %e, "failed to commit pairing, rolling back");
                Self::rollback(&game_id, &black, &white, repo).await;
                Err(e)
            }
        }
    }

    /// 记录为等待状态且连接在线时返回记录
    async fn eligible(
        id: &str,
        repo: &SessionRepository,
        registry: &ConnectionRegistry,
    ) -> StoreResult<Option<Participant>> {
        if !registry.is_connected(id) {
            return Ok(None);
        }
        Ok(repo
            .load_participant(id)
            .await?
            .filter(|p| p.status.is_waiting()))
    }

    async fn commit(
        game_id: &str,
        black: &Participant,
        white: &Participant,
        repo: &SessionRepository,
    ) -> StoreResult<Pairing> {
        repo.create_game(game_id, &BoardState::initial()).await?;

        let black = repo
            .mark_matched(&black.id, &black.name, seat_for(game_id, white, Color::Black))
            .await?;
        let white = repo
            .mark_matched(&white.id, &white.name, seat_for(game_id, &black, Color::White))
            .await?;

        Ok(Pairing {
            game_id: game_id.to_string(),
            black,
            white,
        })
    }

    async fn rollback(
        game_id: &str,
        black: &Participant,
        white: &Participant,
        repo: &SessionRepository,
    ) {
        if let Err(e) = repo.delete_game(game_id).await {
            error!(game = %game_id, error = %e, "rollback: failed to delete game");
        }
        for p in [black, white] {
            if let Err(e) = repo.create_waiting(&p.id, &p.name).await {
                error!(participant = %p.id, error = %e, "rollback: failed to restore waiting record");
            }
        }
    }
}

fn seat_for(game_id: &str, opponent: &Participant, color: Color) -> Seat {
    Seat {
        game_id: game_id.to_string(),
        opponent_id: opponent.id.clone(),
        opponent_name: opponent.name.clone(),
        color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tokio::sync::mpsc;

    use crate::participant::ParticipantStatus;
    use crate::registry::ConnectionHandle;
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        repo: SessionRepository,
        registry: ConnectionRegistry,
        _receivers: Vec<mpsc::Receiver<protocol::ServerMessage>>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(MemoryStore::new());
            Self {
                repo: SessionRepository::new(store.clone()),
                store,
                registry: ConnectionRegistry::new(),
                _receivers: Vec::new(),
            }
        }

        async fn join(&mut self, matchmaker: &Matchmaker, id: &str) {
            let (tx, rx) = mpsc::channel(8);
            self.registry
                .register(id, ConnectionHandle::new(self.registry.next_connection_id(), tx));
            self._receivers.push(rx);
            self.repo.create_waiting(id, id).await.unwrap();
            matchmaker.enqueue(id).await;
        }
    }

    #[test]
    fn test_pool_insert_remove() {
        let mut pool = WaitingPool::new();
        assert!(pool.insert("a"));
        assert!(!pool.insert("a"));
        pool.insert("b");
        pool.insert("c");

        assert!(pool.remove("a"));
        assert!(!pool.remove("a"));
        assert_eq!(pool.len(), 2);
        assert!(pool.contains("b") && pool.contains("c"));

        // 被换位的元素索引仍然正确
        assert!(pool.remove("c"));
        assert!(pool.remove("b"));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pick_other_excludes_candidate() {
        let mut pool = WaitingPool::new();
        pool.insert("a");
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pool.pick_other("a", &mut rng), None);

        for id in ["b", "c", "d"] {
            pool.insert(id);
        }

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let pick = pool.pick_other("a", &mut rng).unwrap();
            assert_ne!(pick, "a");
            seen.insert(pick);
        }
        // 随机选取，不是总选第一个
        assert_eq!(seen.len(), 3);
    }

    #[tokio::test]
    async fn test_single_candidate_waits() {
        let mut fx = Fixture::new();
        let mm = Matchmaker::new(ColorPolicy::Fixed);
        fx.join(&mm, "a").await;

        assert_eq!(mm.try_match("a", &fx.repo, &fx.registry).await.unwrap(), None);
        assert!(mm.is_waiting("a").await);
    }

    #[tokio::test]
    async fn test_match_commits_both_records() {
        let mut fx = Fixture::new();
        let mm = Matchmaker::new(ColorPolicy::Fixed);
        fx.join(&mm, "a").await;
        fx.join(&mm, "b").await;

        let pairing = mm
            .try_match("b", &fx.repo, &fx.registry)
            .await
            .unwrap()
            .unwrap();

        // 固定策略：发起方执黑
        assert_eq!(pairing.black.id, "b");
        assert_eq!(pairing.white.id, "a");
        assert_eq!(mm.waiting_count().await, 0);

        let a = fx.repo.load_participant("a").await.unwrap().unwrap();
        let b = fx.repo.load_participant("b").await.unwrap().unwrap();
        let (sa, sb) = (a.seat().unwrap(), b.seat().unwrap());
        assert_eq!(sa.opponent_id, "b");
        assert_eq!(sb.opponent_id, "a");
        assert_eq!(sa.game_id, sb.game_id);
        assert_ne!(sa.color, sb.color);

        let game = fx.repo.load_game(&pairing.game_id).await.unwrap().unwrap();
        assert_eq!(game, BoardState::initial());
    }

    #[tokio::test]
    async fn test_stale_entries_evicted() {
        let mut fx = Fixture::new();
        let mm = Matchmaker::new(ColorPolicy::Random);
        fx.join(&mm, "a").await;
        fx.join(&mm, "gone").await;
        fx.join(&mm, "busy").await;

        fx.registry.remove("gone", 2);
        fx.repo
            .mark_matched(
                "busy",
                "busy",
                Seat {
                    game_id: "other".to_string(),
                    opponent_id: "x".to_string(),
                    opponent_name: "x".to_string(),
                    color: Color::Black,
                },
            )
            .await
            .unwrap();

        assert_eq!(mm.try_match("a", &fx.repo, &fx.registry).await.unwrap(), None);
        assert_eq!(mm.waiting_count().await, 1);
        assert!(mm.is_waiting("a").await);
    }

    #[tokio::test]
    async fn test_store_failure_leaves_candidates_queued() {
        let mut fx = Fixture::new();
        let mm = Matchmaker::new(ColorPolicy::Fixed);
        fx.join(&mm, "a").await;
        fx.join(&mm, "b").await;

        fx.store.set_available(false);
        assert!(mm.try_match("a", &fx.repo, &fx.registry).await.is_err());
        fx.store.set_available(true);

        assert_eq!(mm.waiting_count().await, 2);
        let a = fx.repo.load_participant("a").await.unwrap().unwrap();
        assert_eq!(a.status, ParticipantStatus::Waiting);

        assert!(mm.try_match("a", &fx.repo, &fx.registry).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_matching_never_double_books() {
        let mut fx = Fixture::new();
        let mm = Matchmaker::new(ColorPolicy::Random);
        let ids: Vec<String> = (0..9).map(|i| format!("p{}", i)).collect();
        for id in &ids {
            fx.join(&mm, id).await;
        }

        let _receivers = std::mem::take(&mut fx._receivers);
        let fx = Arc::new(fx);
        let mm = Arc::new(mm);
        let tasks: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let fx = fx.clone();
                let mm = mm.clone();
                tokio::spawn(async move { mm.try_match(&id, &fx.repo, &fx.registry).await })
            })
            .collect();

        let mut pairings = Vec::new();
        for task in tasks {
            if let Some(p) = task.await.unwrap().unwrap() {
                pairings.push(p);
            }
        }

        assert!(pairings.len() <= ids.len() / 2);
        let mut seen = HashSet::new();
        for p in &pairings {
            assert!(seen.insert(p.black.id.clone()));
            assert!(seen.insert(p.white.id.clone()));
        }

        // 存储中的配对关系与返回结果一致且对称
        for p in &pairings {
            let black = fx.repo.load_participant(&p.black.id).await.unwrap().unwrap();
            let white = fx.repo.load_participant(&p.white.id).await.unwrap().unwrap();
            assert_eq!(black.seat().unwrap().opponent_id, p.white.id);
            assert_eq!(white.seat().unwrap().opponent_id, p.black.id);
        }
    }
}
