//! 会话记录
//!
//! 在 [`SessionStore`] 之上提供带类型的参与者与对局记录读写。
//!
//! 键布局：
//! - `participant:{id}` 哈希：name / status / game_id / opponent_id / opponent_name / color / deadline
//! - `game:{id}:board` 棋盘 JSON
//! - `game:{id}:turn` 当前走子方
//! - `game:{id}:passes` 哈希：black / white 弃权标记

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use protocol::{Board, BoardState, Color, PassFlags, ParticipantId};

use crate::error::{StoreError, StoreResult};
use crate::participant::{field, Participant, ParticipantStatus, Seat};
use crate::store::{KeyTtl, SessionStore};

/// 参与者键前缀
pub const PARTICIPANT_PREFIX: &str = "participant:";

pub fn participant_key(id: &str) -> String {
    format!("{}{}", PARTICIPANT_PREFIX, id)
}

pub fn board_key(game_id: &str) -> String {
    format!("game:{}:board", game_id)
}

pub fn turn_key(game_id: &str) -> String {
    format!("game:{}:turn", game_id)
}

pub fn passes_key(game_id: &str) -> String {
    format!("game:{}:passes", game_id)
}

fn game_keys(game_id: &str) -> [String; 3] {
    [board_key(game_id), turn_key(game_id), passes_key(game_id)]
}

fn flag(passed: bool) -> String {
    if passed { "1" } else { "0" }.to_string()
}

/// 会话记录仓库
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn SessionStore>,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // ========================================================================
    // 参与者
    // ========================================================================

    pub async fn load_participant(&self, id: &str) -> StoreResult<Option<Participant>> {
        let fields = self.store.hash_get_all(&participant_key(id)).await?;
        Ok(Participant::from_fields(id, &fields))
    }

    /// 写入等待状态，清除对局字段，记录永不过期
    pub async fn create_waiting(&self, id: &str, name: &str) -> StoreResult<Participant> {
        let participant = Participant::waiting(id.to_string(), name.to_string());
        let key = participant_key(id);

        self.store
            .hash_set(&key, &participant.to_fields(), None)
            .await?;
        self.store.hash_delete(&key, &field::SEAT_FIELDS).await?;
        self.store.persist(&key).await?;

        debug!(participant = %id, "participant record set to waiting");
        Ok(participant)
    }

    /// 写入对局状态
    pub async fn mark_matched(&self, id: &str, name: &str, seat: Seat) -> StoreResult<Participant> {
        let participant = Participant {
            id: id.to_string(),
            name: name.to_string(),
            status: ParticipantStatus::Matched(seat),
        };
        let key = participant_key(id);

        self.store
            .hash_set(&key, &participant.to_fields(), None)
            .await?;
        self.store.hash_delete(&key, &[field::DEADLINE]).await?;
        self.store.persist(&key).await?;
        Ok(participant)
    }

    /// 标记断线（只改状态和截止时间，不动其他字段）
    pub async fn mark_disconnected(&self, id: &str, deadline: DateTime<Utc>) -> StoreResult<()> {
        self.store
            .hash_set(
                &participant_key(id),
                &[
                    (field::STATUS, "disconnected".to_string()),
                    (field::DEADLINE, deadline.to_rfc3339()),
                ],
                None,
            )
            .await
    }

    /// 标记重连，记录恢复为永不过期
    pub async fn mark_reconnected(&self, id: &str) -> StoreResult<()> {
        let key = participant_key(id);
        self.store
            .hash_set(&key, &[(field::STATUS, "matched".to_string())], None)
            .await?;
        self.store.hash_delete(&key, &[field::DEADLINE]).await?;
        self.store.persist(&key).await?;
        Ok(())
    }

    /// 对局结束后回到等待状态（不加入配对池）；记录不存在时返回 false
    pub async fn reset_to_waiting(&self, id: &str) -> StoreResult<bool> {
        let key = participant_key(id);
        if !self.store.exists(&key).await? {
            return Ok(false);
        }

        self.store
            .hash_set(&key, &[(field::STATUS, "waiting".to_string())], None)
            .await?;
        self.store.hash_delete(&key, &field::SEAT_FIELDS).await?;
        self.store.persist(&key).await?;
        Ok(true)
    }

    pub async fn delete_participant(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(&participant_key(id)).await
    }

    pub async fn persist_participant(&self, id: &str) -> StoreResult<bool> {
        self.store.persist(&participant_key(id)).await
    }

    /// 延长参与者记录的过期时间
    pub async fn extend_participant(&self, id: &str, ttl: Duration) -> StoreResult<bool> {
        self.extend_expiry(&participant_key(id), ttl).await
    }

    /// 所有参与者 ID
    pub async fn participant_ids(&self) -> StoreResult<Vec<ParticipantId>> {
        let keys = self.store.keys(PARTICIPANT_PREFIX).await?;
        Ok(keys
            .into_iter()
            .filter_map(|key| key.strip_prefix(PARTICIPANT_PREFIX).map(str::to_string))
            .collect())
    }

    // ========================================================================
    // 对局
    // ========================================================================

    /// 创建对局记录（永不过期）
    pub async fn create_game(&self, game_id: &str, state: &BoardState) -> StoreResult<()> {
        self.write_game(game_id, state, None).await
    }

    /// 读取完整对局状态；棋盘或走子方缺失时返回 None
    pub async fn load_game(&self, game_id: &str) -> StoreResult<Option<BoardState>> {
        let Some(board) = self.load_board(game_id).await? else {
            return Ok(None);
        };
        let Some(current_turn) = self.load_turn(game_id).await? else {
            return Ok(None);
        };

        let passes_map = self.store.hash_get_all(&passes_key(game_id)).await?;
        let passes = PassFlags {
            black: passes_map.get("black").is_some_and(|v| v == "1"),
            white: passes_map.get("white").is_some_and(|v| v == "1"),
        };

        Ok(Some(BoardState {
            board,
            current_turn,
            passes,
        }))
    }

    pub async fn load_board(&self, game_id: &str) -> StoreResult<Option<Board>> {
        let key = board_key(game_id);
        let Some(json) = self.store.get(&key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key,
                reason: e.to_string(),
            })
    }

    pub async fn load_turn(&self, game_id: &str) -> StoreResult<Option<Color>> {
        let key = turn_key(game_id);
        match self.store.get(&key).await? {
            Some(turn) => Color::parse(&turn).map(Some).ok_or(StoreError::Corrupt {
                key,
                reason: format!("unknown color {:?}", turn),
            }),
            None => Ok(None),
        }
    }

    /// 保存对局状态，保留原有的过期时间
    pub async fn save_game(&self, game_id: &str, state: &BoardState) -> StoreResult<()> {
        let ttl = match self.store.ttl(&board_key(game_id)).await? {
            KeyTtl::Remaining(remaining) if !remaining.is_zero() => Some(remaining),
            _ => None,
        };
        self.write_game(game_id, state, ttl).await
    }

    async fn write_game(
        &self,
        game_id: &str,
        state: &BoardState,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        let board = serde_json::to_string(&state.board).map_err(|e| StoreError::Corrupt {
            key: board_key(game_id),
            reason: e.to_string(),
        })?;

        self.store.set(&board_key(game_id), &board, ttl).await?;
        self.store
            .set(&turn_key(game_id), state.current_turn.as_str(), ttl)
            .await?;

        let passes = passes_key(game_id);
        self.store
            .hash_set(
                &passes,
                &[
                    ("black", flag(state.passes.black)),
                    ("white", flag(state.passes.white)),
                ],
                ttl,
            )
            .await?;
        if ttl.is_none() {
            self.store.persist(&passes).await?;
        }
        Ok(())
    }

    pub async fn delete_game(&self, game_id: &str) -> StoreResult<()> {
        for key in game_keys(game_id) {
            self.store.delete(&key).await?;
        }
        Ok(())
    }

    /// 延长对局记录的过期时间
    pub async fn extend_game(&self, game_id: &str, ttl: Duration) -> StoreResult<()> {
        for key in game_keys(game_id) {
            self.extend_expiry(&key, ttl).await?;
        }
        Ok(())
    }

    /// 移除对局记录的过期时间
    pub async fn persist_game(&self, game_id: &str) -> StoreResult<()> {
        for key in game_keys(game_id) {
            self.store.persist(&key).await?;
        }
        Ok(())
    }

    /// 设置过期时间，已有更长的过期时间时保持不变；返回键是否存在
    pub async fn extend_expiry(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        match self.store.ttl(key).await? {
            KeyTtl::Missing => Ok(false),
            KeyTtl::Remaining(remaining) if remaining >= ttl => Ok(true),
            KeyTtl::Remaining(_) | KeyTtl::Persistent => self.store.expire(key, ttl).await,
        }
    }
}
