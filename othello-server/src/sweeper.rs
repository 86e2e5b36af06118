//! 断线与超时处理
//!
//! 对局中的参与者断线后，参与者记录、对手记录和对局记录都设置宽限期 TTL，
//! 并为其安排一次超时检查。检查按参与者 ID 登记，重新调度或重连时取消旧检查，
//! 只有最后一次调度的检查会真正执行。

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use protocol::{EndReason, ParticipantId, ServerMessage};

use crate::error::StoreResult;
use crate::participant::{Participant, ParticipantStatus, Seat};
use crate::registry::ConnectionId;
use crate::server::Coordinator;

/// 记录过期时间比超时检查多留的余量
const RECORD_TTL_MARGIN: Duration = Duration::from_secs(5);

/// 断线后记录的过期时间：检查先于过期执行
fn record_ttl(grace: Duration) -> Duration {
    grace + RECORD_TTL_MARGIN
}

struct SweepJob {
    ticket: u64,
    /// 丢弃即取消
    _cancel: oneshot::Sender<()>,
}

/// 可取消的超时检查调度器
pub struct DisconnectSweeper {
    jobs: Mutex<HashMap<ParticipantId, SweepJob>>,
    next_ticket: AtomicU64,
}

impl Default for DisconnectSweeper {
    fn default() -> Self {
        Self::new()
    }
}

impl DisconnectSweeper {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(1),
        }
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, HashMap<ParticipantId, SweepJob>> {
        self.jobs.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// 在 `delay` 之后执行 `check(ticket)`；同一参与者已有的检查被取消
    pub fn schedule<F, Fut>(&self, id: &str, delay: Duration, check: F) -> u64
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();

        let replaced = self.jobs().insert(
            id.to_string(),
            SweepJob {
                ticket,
                _cancel: cancel_tx,
            },
        );
        if replaced.is_some() {
            debug!(participant = %id, ticket, "previous sweep superseded");
        }

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => check(ticket).await,
                _ = cancel_rx => {}
            }
        });
        ticket
    }

    /// 取消参与者的待执行检查
    pub fn cancel(&self, id: &str) -> bool {
        let cancelled = self.jobs().remove(id).is_some();
        if cancelled {
            debug!(participant = %id, "sweep cancelled");
        }
        cancelled
    }

    /// 检查开始执行时调用；票据不是最新的说明已被顶替，返回 false
    pub fn finish(&self, id: &str, ticket: u64) -> bool {
        let mut jobs = self.jobs();
        match jobs.get(id) {
            Some(job) if job.ticket == ticket => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.jobs().contains_key(id)
    }
}

impl Coordinator {
    /// 连接断开
    pub(crate) async fn handle_disconnect(self: &Arc<Self>, id: &str, conn: ConnectionId) {
        if !self.registry.remove(id, conn) {
            debug!(participant = %id, conn, "connection already replaced, skipping disconnect");
            return;
        }
        self.matchmaker.withdraw(id).await;

        if let Err(e) = self.expire_on_disconnect(id).await {
            error!(participant = %id, error = %e, "failed to record disconnect");
        }
    }

    pub(crate) async fn expire_on_disconnect(self: &Arc<Self>, id: &str) -> StoreResult<()> {
        let grace = self.config.grace_period();
        let ttl = record_ttl(grace);
        let Some(participant) = self.repo.load_participant(id).await? else {
            return Ok(());
        };

        let seat = match participant.status {
            ParticipantStatus::Waiting => {
                if self.registry.is_connected(id) {
                    return Ok(());
                }
                self.repo.extend_participant(id, grace).await?;
                // 续期期间可能已重新注册
                if self.registry.is_connected(id) {
                    self.repo.persist_participant(id).await?;
                    return Ok(());
                }
                info!(participant = %id, "waiting participant disconnected");
                return Ok(());
            }
            ParticipantStatus::Matched(seat) | ParticipantStatus::Disconnected { seat, .. } => seat,
        };

        let _guard = self.games.lock(&seat.game_id).await;
        // 等锁期间可能已重连，或对局已结束
        if self.registry.is_connected(id) {
            debug!(participant = %id, game = %seat.game_id, "participant already reconnected, disconnect ignored");
            return Ok(());
        }
        let still_in_game = self
            .repo
            .load_participant(id)
            .await?
            .is_some_and(|p| p.in_game(&seat.game_id));
        if !still_in_game {
            return Ok(());
        }

        let deadline = Utc::now()
            + chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        self.repo.mark_disconnected(id, deadline).await?;
        self.repo.extend_participant(id, ttl).await?;
        self.repo.extend_participant(&seat.opponent_id, ttl).await?;
        self.repo.extend_game(&seat.game_id, ttl).await?;

        self.schedule_sweep(id, seat.clone(), grace);
        info!(
            participant = %id,
            game = %seat.game_id,
            grace_secs = grace.as_secs(),
            "matched participant disconnected"
        );

        self.registry
            .send(
                &seat.opponent_id,
                ServerMessage::OpponentDisconnected {
                    timeout_secs: grace.as_secs(),
                },
            )
            .await;
        Ok(())
    }

    fn schedule_sweep(self: &Arc<Self>, id: &str, seat: Seat, delay: Duration) {
        let coordinator = Arc::clone(self);
        let participant = id.to_string();
        self.sweeper.schedule(id, delay, move |ticket| async move {
            coordinator.sweep(&participant, &seat, ticket).await;
        });
    }

    /// 宽限期到期检查
    ///
    /// 参与者已重连或已不在该对局中时不做任何事。
    pub(crate) async fn sweep(&self, id: &str, seat: &Seat, ticket: u64) {
        if !self.sweeper.finish(id, ticket) {
            debug!(participant = %id, ticket, "stale sweep abstains");
            return;
        }
        if self.registry.is_connected(id) {
            debug!(participant = %id, "participant returned, sweep abstains");
            return;
        }

        let guard = self.games.lock(&seat.game_id).await;
        if let Err(e) = self.expire_game(id, seat).await {
            error!(participant = %id, game = %seat.game_id, error = %e, "sweep failed");
        }
        drop(guard);
        self.games.forget(&seat.game_id);
    }

    async fn expire_game(&self, id: &str, seat: &Seat) -> StoreResult<()> {
        let participant = self.repo.load_participant(id).await?;
        if let Some(p) = &participant {
            if !matches!(p.status, ParticipantStatus::Disconnected { .. }) || !p.in_game(&seat.game_id) {
                debug!(participant = %id, game = %seat.game_id, "participant no longer disconnected in game, sweep abstains");
                return Ok(());
            }
        }

        let state = self.repo.load_game(&seat.game_id).await?;
        let opponent = self
            .repo
            .load_participant(&seat.opponent_id)
            .await?
            .filter(|p| p.in_game(&seat.game_id));
        let opponent_in_game = opponent.is_some();

        // 记录已过期时按调度时的座位处理，名字取自对手记录
        let name = match (&participant, opponent.as_ref().and_then(Participant::seat)) {
            (Some(p), _) => p.name.clone(),
            (None, Some(opponent_seat)) => opponent_seat.opponent_name.clone(),
            (None, None) => {
                debug!(participant = %id, game = %seat.game_id, "records already gone, sweep abstains");
                return Ok(());
            }
        };

        self.repo.delete_participant(id).await?;
        if opponent_in_game {
            self.repo.delete_participant(&seat.opponent_id).await?;
            self.sweeper.cancel(&seat.opponent_id);
        }
        self.repo.delete_game(&seat.game_id).await?;
        info!(participant = %id, game = %seat.game_id, "grace period expired, game ended");

        match state {
            Some(state) if opponent_in_game => {
                self.registry
                    .send(
                        &seat.opponent_id,
                        ServerMessage::EndGame {
                            board: state.board.clone(),
                            current_player: state.current_turn,
                            your_color: seat.color.opponent(),
                            opponent_name: name,
                            reason: EndReason::OpponentTimeout,
                            score: state.board.score(),
                        },
                    )
                    .await;
            }
            _ => {
                warn!(game = %seat.game_id, "game state already gone, opponent not notified");
            }
        }
        Ok(())
    }

    /// 启动时恢复遗留记录
    ///
    /// 重启后没有任何连接存活：对局中的参与者按断线处理，
    /// 已断线的按剩余宽限期重新安排检查，等待中的设置宽限期 TTL。
    pub async fn recover_orphans(self: &Arc<Self>) -> StoreResult<usize> {
        let grace = self.config.grace_period();
        let ttl = record_ttl(grace);
        let mut recovered = 0;

        for id in self.repo.participant_ids().await? {
            let Some(participant) = self.repo.load_participant(&id).await? else {
                continue;
            };

            match participant.status {
                ParticipantStatus::Waiting => {
                    self.repo.extend_participant(&id, grace).await?;
                }
                ParticipantStatus::Matched(seat) => {
                    let deadline = Utc::now()
                        + chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
                    self.repo.mark_disconnected(&id, deadline).await?;
                    self.repo.extend_participant(&id, ttl).await?;
                    self.repo.extend_game(&seat.game_id, ttl).await?;
                    self.schedule_sweep(&id, seat, grace);
                }
                ParticipantStatus::Disconnected { seat, deadline } => {
                    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    self.schedule_sweep(&id, seat, remaining);
                }
            }
            recovered += 1;
        }

        if recovered > 0 {
            info!(count = recovered, "recovered participant records from store");
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(start_paused = true)]
    async fn test_schedule_runs_after_delay() {
        let sweeper = DisconnectSweeper::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        sweeper.schedule("a", Duration::from_secs(40), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sweeper.is_pending("a"));

        tokio::time::sleep(Duration::from_secs(39)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let sweeper = DisconnectSweeper::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = fired.clone();
        sweeper.schedule("a", Duration::from_secs(40), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sweeper.cancel("a"));
        assert!(!sweeper.cancel("a"));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_last_wins() {
        let sweeper = Arc::new(DisconnectSweeper::new());
        let fired = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let log = fired.clone();
            let sw = sweeper.clone();
            sweeper.schedule("a", Duration::from_secs(40), move |ticket| async move {
                if sw.finish("a", ticket) {
                    log.lock().unwrap().push(label);
                }
            });
            tokio::time::sleep(Duration::from_secs(10)).await;
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(*fired.lock().unwrap(), vec!["second"]);
        assert!(!sweeper.is_pending("a"));
    }

    #[test]
    fn test_stale_ticket() {
        let sweeper = DisconnectSweeper::new();
        assert!(!sweeper.finish("a", 1));
    }
}
