//! 重连恢复
//!
//! 已在对局中的参与者重新注册时，从存储读取棋盘、走子方和自身颜色，
//! 三者齐全则恢复对局，否则由调用方把参与者重新送入配对。

use std::sync::Arc;

use tracing::{debug, info};

use protocol::{BoardState, ErrorCode, ServerMessage};

use crate::error::{HandlerError, HandlerResult};
use crate::participant::{Participant, Seat};
use crate::server::Coordinator;

fn restore_message(state: &BoardState, seat: &Seat) -> ServerMessage {
    ServerMessage::RestoreBoard {
        board: state.board.clone(),
        current_player: state.current_turn,
        your_color: seat.color,
        your_turn: state.current_turn == seat.color,
        opponent_name: seat.opponent_name.clone(),
    }
}

impl Coordinator {
    /// 恢复对局；记录已过期无法恢复时返回 false
    ///
    /// 调用前连接已在注册表中登记。
    pub(crate) async fn reconnect(self: &Arc<Self>, participant: &Participant) -> HandlerResult<bool> {
        let Some(seat) = participant.seat() else {
            return Ok(false);
        };
        let id = participant.id.as_str();

        let _guard = self.games.lock(&seat.game_id).await;
        let Some(state) = self.repo.load_game(&seat.game_id).await? else {
            info!(participant = %id, game = %seat.game_id, "game state expired, reconnection failed");
            self.repo.delete_game(&seat.game_id).await?;
            self.sweeper.cancel(id);
            return Ok(false);
        };

        self.repo.mark_reconnected(id).await?;
        self.sweeper.cancel(id);

        let opponent_online = self.registry.is_connected(&seat.opponent_id);
        if opponent_online {
            // 双方都在线，记录恢复为永不过期
            self.repo.persist_game(&seat.game_id).await?;
            self.repo.persist_participant(&seat.opponent_id).await?;
        }

        info!(
            participant = %id,
            game = %seat.game_id,
            opponent_online,
            "participant reconnected"
        );

        self.registry.send(id, restore_message(&state, seat)).await;
        if opponent_online {
            self.registry
                .send(&seat.opponent_id, ServerMessage::OpponentReconnected)
                .await;
            self.registry
                .send(
                    &seat.opponent_id,
                    ServerMessage::UpdateBoard {
                        board: state.board.clone(),
                        current_player: state.current_turn,
                    },
                )
                .await;
        }
        Ok(true)
    }

    /// 同一连接重复注册：只给自己重发棋局；对局已不存在时返回 false
    pub(crate) async fn resend_restore(&self, id: &str, seat: &Seat) -> HandlerResult<bool> {
        let Some(state) = self.repo.load_game(&seat.game_id).await? else {
            return Ok(false);
        };
        debug!(participant = %id, game = %seat.game_id, "repeated register on live connection");
        self.registry.send(id, restore_message(&state, seat)).await;
        Ok(true)
    }

    /// 重新发送当前棋局，不修改任何状态
    pub(crate) async fn restore_request(&self, id: &str, user_id: Option<String>) -> HandlerResult {
        if let Some(user_id) = user_id {
            if user_id != id {
                return Err(HandlerError::rejected(
                    ErrorCode::IdentityMismatch,
                    "user_id does not match the registered participant",
                ));
            }
        }

        let (_, seat) = self.seat_of(id).await?;
        let state = self
            .repo
            .load_game(&seat.game_id)
            .await?
            .ok_or_else(|| HandlerError::rejected(ErrorCode::GameNotFound, "game state not found"))?;

        debug!(participant = %id, game = %seat.game_id, "restore requested");
        self.registry.send(id, restore_message(&state, &seat)).await;
        Ok(())
    }
}
