//! 服务器主逻辑
//!
//! 每个连接一个任务：读取消息、分派处理，通过注册表中的发送通道推送消息。
//! 所有跨参与者状态以会话存储为准，内存中的副本只在一次消息处理内有效。

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use protocol::{
    BoardState, ClientMessage, Color, EndReason, ErrorCode, FrameReader, FrameWriter, Move,
    OthelloError, ParticipantId, PassOutcome, Position, ProtocolError, ServerMessage,
};

use crate::config::ServerConfig;
use crate::error::{HandlerError, HandlerResult};
use crate::game::GameLocks;
use crate::matchmaker::{Matchmaker, Pairing};
use crate::participant::{normalize_name, validate_id, Participant, ParticipantStatus, Seat};
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::session::SessionRepository;
use crate::store::SessionStore;
use crate::sweeper::DisconnectSweeper;

/// 会话协调器
pub struct Coordinator {
    pub(crate) config: ServerConfig,
    pub(crate) repo: SessionRepository,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) matchmaker: Matchmaker,
    pub(crate) sweeper: DisconnectSweeper,
    pub(crate) games: GameLocks,
}

/// 连接读循环的退出原因
enum Exit {
    Closed,
    Superseded,
}

impl Coordinator {
    pub fn new(config: ServerConfig, store: Arc<dyn SessionStore>) -> Arc<Self> {
        Arc::new(Self {
            matchmaker: Matchmaker::new(config.color_policy),
            repo: SessionRepository::new(store),
            registry: ConnectionRegistry::new(),
            sweeper: DisconnectSweeper::new(),
            games: GameLocks::new(),
            config,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn repo(&self) -> &SessionRepository {
        &self.repo
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// 服务一个连接直到对端关闭或被同 ID 的新连接顶替
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: FrameReader<R>, mut writer: FrameWriter<W>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = self.registry.next_connection_id();
        let (tx, mut rx) = mpsc::channel::<ServerMessage>(self.config.outbound_queue);
        let handle = ConnectionHandle::new(conn, tx);
        debug!(conn, "connection opened");

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = writer.send(&msg).await {
                    debug!(conn, error = %e, "write failed, closing writer");
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        let mut session: Option<ParticipantId> = None;
        let exit = loop {
            let result = tokio::select! {
                result = reader.read_text() => result,
                _ = handle.superseded.notified() => break Exit::Superseded,
            };

            match result {
                Ok(text) => self.dispatch(&handle, &mut session, &text).await,
                Err(ProtocolError::ConnectionClosed) => break Exit::Closed,
                Err(ProtocolError::Utf8(e)) => {
                    reply(&handle, ServerMessage::error(ErrorCode::MalformedMessage, e.to_string())).await;
                }
                Err(e) => {
                    // 帧头损坏后无法再对齐，直接断开
                    warn!(conn, error = %e, "transport error, closing connection");
                    reply(&handle, ServerMessage::error(ErrorCode::MalformedMessage, e.to_string())).await;
                    break Exit::Closed;
                }
            }
        };

        match (exit, session) {
            (Exit::Closed, Some(id)) => {
                info!(participant = %id, conn, "connection closed");
                self.handle_disconnect(&id, conn).await;
            }
            (Exit::Superseded, Some(id)) => {
                info!(participant = %id, conn, "connection superseded by a newer one");
            }
            (_, None) => debug!(conn, "unregistered connection closed"),
        }

        drop(handle);
        let _ = writer_task.await;
    }

    /// 解析并处理一条消息，错误回显给发送方
    async fn dispatch(self: &Arc<Self>, handle: &ConnectionHandle, session: &mut Option<ParticipantId>, text: &str) {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(conn = handle.id, error = %e, "malformed message");
                reply(handle, ServerMessage::error(ErrorCode::MalformedMessage, e.to_string())).await;
                return;
            }
        };

        let result = match (msg, session.clone()) {
            (ClientMessage::Register { user_id, name }, _) => {
                self.handle_register(handle, session, user_id, name).await
            }
            (_, None) => Err(HandlerError::rejected(
                ErrorCode::NotRegistered,
                "register before sending other messages",
            )),
            (ClientMessage::Move { x, y, .. }, Some(id)) => self.handle_move(&id, x, y).await,
            (ClientMessage::Pass, Some(id)) => self.handle_pass(&id).await,
            (ClientMessage::Surrender { user_id }, Some(id)) => self.handle_surrender(&id, user_id).await,
            (ClientMessage::EndGame, Some(id)) => self.handle_end_game(&id).await,
            (ClientMessage::RestoreRequest { user_id }, Some(id)) => self.restore_request(&id, user_id).await,
        };

        match result {
            Ok(()) => {}
            Err(HandlerError::Store(e)) => {
                error!(participant = ?session, conn = handle.id, error = %e, "store failure, message dropped");
                reply(handle, ServerMessage::error(ErrorCode::StoreUnavailable, "session store unavailable")).await;
            }
            Err(HandlerError::Rejected { code, message }) => {
                debug!(participant = ?session, conn = handle.id, %code, %message, "message rejected");
                reply(handle, ServerMessage::error(code, message)).await;
            }
        }
    }

    /// 注册：新参与者进入配对，对局中的参与者走重连流程
    async fn handle_register(
        self: &Arc<Self>,
        handle: &ConnectionHandle,
        session: &mut Option<ParticipantId>,
        user_id: ParticipantId,
        name: Option<String>,
    ) -> HandlerResult {
        validate_id(&user_id)?;
        if session.as_ref().is_some_and(|current| *current != user_id) {
            return Err(HandlerError::rejected(
                ErrorCode::AlreadyRegistered,
                "connection is already registered under another id",
            ));
        }
        let name = normalize_name(&user_id, name.as_deref())?;

        let previous = self.registry.register(&user_id, handle.clone());
        let same_connection = previous.is_some_and(|old| old.id == handle.id);
        *session = Some(user_id.clone());
        info!(participant = %user_id, conn = handle.id, same_connection, "participant registered");

        if let Some(existing) = self.repo.load_participant(&user_id).await? {
            if let Some(seat) = existing.seat() {
                if same_connection && self.resend_restore(&user_id, seat).await? {
                    return Ok(());
                }
                if self.reconnect(&existing).await? {
                    return Ok(());
                }
            }
        }

        self.enter_matchmaking(&user_id, &name).await
    }

    /// 写入等待记录并尝试配对
    async fn enter_matchmaking(self: &Arc<Self>, id: &str, name: &str) -> HandlerResult {
        self.repo.create_waiting(id, name).await?;
        self.matchmaker.enqueue(id).await;
        self.spawn_match(id);
        Ok(())
    }

    fn spawn_match(self: &Arc<Self>, id: &str) {
        let coordinator = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            match coordinator
                .matchmaker
                .try_match(&id, &coordinator.repo, &coordinator.registry)
                .await
            {
                Ok(Some(pairing)) => coordinator.announce(pairing).await,
                Ok(None) => debug!(participant = %id, "no opponent available yet"),
                Err(e) => error!(participant = %id, error = %e, "matchmaking failed"),
            }
        });
    }

    /// 延迟发送 start_game；届时不在线或已离开该对局的一方不发送
    async fn announce(&self, pairing: Pairing) {
        tokio::time::sleep(self.config.match_notify_delay()).await;

        for participant in pairing.participants() {
            let Some(seat) = participant.seat() else {
                continue;
            };
            let record = match self.repo.load_participant(&participant.id).await {
                Ok(record) => record,
                Err(e) => {
                    error!(participant = %participant.id, error = %e, "failed to load record for start_game");
                    continue;
                }
            };
            if !record.is_some_and(|p| p.in_game(&pairing.game_id)) {
                warn!(participant = %participant.id, game = %pairing.game_id, "left game before start_game, notification dropped");
                continue;
            }
            let board = match self.repo.load_board(&pairing.game_id).await {
                Ok(Some(board)) => board,
                Ok(None) => {
                    warn!(game = %pairing.game_id, "game state gone before start_game");
                    return;
                }
                Err(e) => {
                    error!(game = %pairing.game_id, error = %e, "failed to load board for start_game");
                    return;
                }
            };

            self.registry
                .send(
                    &participant.id,
                    ServerMessage::StartGame {
                        your_color: seat.color,
                        opponent_name: seat.opponent_name.clone(),
                        first_turn: Color::Black,
                        board,
                    },
                )
                .await;
        }
    }

    /// 读取参与者及其座位
    pub(crate) async fn seat_of(&self, id: &str) -> HandlerResult<(Participant, Seat)> {
        let participant = self
            .repo
            .load_participant(id)
            .await?
            .ok_or_else(|| HandlerError::rejected(ErrorCode::NotInGame, "participant record not found"))?;
        let seat = participant
            .seat()
            .cloned()
            .ok_or_else(|| HandlerError::rejected(ErrorCode::NotInGame, "not in a game"))?;
        Ok((participant, seat))
    }

    async fn load_state(&self, seat: &Seat) -> HandlerResult<BoardState> {
        self.repo
            .load_game(&seat.game_id)
            .await?
            .ok_or_else(|| HandlerError::rejected(ErrorCode::GameNotFound, "game state not found"))
    }

    /// 落子：先持久化再转发
    async fn handle_move(&self, id: &str, x: i32, y: i32) -> HandlerResult {
        let (_, seat) = self.seat_of(id).await?;
        let pos = Position::new(x, y).ok_or(OthelloError::InvalidPosition { x, y })?;

        let _guard = self.games.lock(&seat.game_id).await;
        let mut state = self.load_state(&seat).await?;
        let flipped = state.apply_move(Move::new(pos, seat.color), self.config.placement_policy)?;
        self.repo.save_game(&seat.game_id, &state).await?;

        info!(
            participant = %id,
            game = %seat.game_id,
            %pos,
            flipped = flipped.len(),
            "move applied"
        );

        for (target, color) in [(id, seat.color), (seat.opponent_id.as_str(), seat.color.opponent())] {
            self.registry
                .send(
                    target,
                    ServerMessage::Move {
                        x: pos.x,
                        y: pos.y,
                        color: seat.color,
                        next_turn: state.current_turn,
                        your_color: color,
                        your_turn: state.current_turn == color,
                    },
                )
                .await;
        }
        Ok(())
    }

    /// 弃权：双方连续弃权时结束对局
    async fn handle_pass(&self, id: &str) -> HandlerResult {
        let (participant, seat) = self.seat_of(id).await?;

        let guard = self.games.lock(&seat.game_id).await;
        let mut state = self.load_state(&seat).await?;
        let before = state.clone();

        match state.apply_pass(seat.color)? {
            PassOutcome::Continue => {
                self.repo.save_game(&seat.game_id, &state).await?;
                debug!(participant = %id, game = %seat.game_id, "pass recorded");

                for (target, color) in [(id, seat.color), (seat.opponent_id.as_str(), seat.color.opponent())] {
                    self.registry
                        .send(
                            target,
                            ServerMessage::Pass {
                                next_turn: state.current_turn,
                                your_color: color,
                                your_turn: state.current_turn == color,
                            },
                        )
                        .await;
                }
            }
            PassOutcome::GameOver => {
                self.teardown(&participant, &seat).await?;
                info!(game = %seat.game_id, "both participants passed, game over");
                self.notify_end(&participant, &seat, &before, EndReason::DoublePass).await;
            }
        }

        drop(guard);
        self.games.forget(&seat.game_id);
        Ok(())
    }

    /// 认输
    async fn handle_surrender(&self, id: &str, user_id: Option<ParticipantId>) -> HandlerResult {
        if user_id.is_some_and(|user_id| user_id != id) {
            return Err(HandlerError::rejected(
                ErrorCode::IdentityMismatch,
                "user_id does not match the registered participant",
            ));
        }
        let (participant, seat) = self.seat_of(id).await?;

        let guard = self.games.lock(&seat.game_id).await;
        let state = self.load_state(&seat).await?;
        self.teardown(&participant, &seat).await?;
        info!(participant = %id, game = %seat.game_id, "participant surrendered");

        self.registry
            .send(&seat.opponent_id, ServerMessage::OpponentSurrendered)
            .await;
        self.notify_end(&participant, &seat, &state, EndReason::Surrender).await;

        drop(guard);
        self.games.forget(&seat.game_id);
        Ok(())
    }

    /// 结束当前对局（如有）并重新进入配对
    async fn handle_end_game(self: &Arc<Self>, id: &str) -> HandlerResult {
        let participant = self.repo.load_participant(id).await?;

        let name = match participant {
            Some(participant) => {
                if let Some(seat) = participant.seat().cloned() {
                    let guard = self.games.lock(&seat.game_id).await;
                    let state = self.repo.load_game(&seat.game_id).await?;
                    self.teardown(&participant, &seat).await?;
                    info!(participant = %id, game = %seat.game_id, "game ended by participant");
                    if let Some(state) = state {
                        self.notify_end(&participant, &seat, &state, EndReason::EndedByPlayer)
                            .await;
                    }
                    drop(guard);
                    self.games.forget(&seat.game_id);
                }
                participant.name
            }
            None => id.to_string(),
        };

        self.enter_matchmaking(id, &name).await
    }

    /// 删除对局记录，双方回到等待状态（不进入配对池）
    ///
    /// 已离线的对手记录直接删除。调用方持有对局锁。
    async fn teardown(&self, participant: &Participant, seat: &Seat) -> HandlerResult {
        self.repo.delete_game(&seat.game_id).await?;
        self.repo.reset_to_waiting(&participant.id).await?;
        self.sweeper.cancel(&participant.id);

        let opponent = self.repo.load_participant(&seat.opponent_id).await?;
        if opponent.is_some_and(|p| p.in_game(&seat.game_id)) {
            if self.registry.is_connected(&seat.opponent_id) {
                self.repo.reset_to_waiting(&seat.opponent_id).await?;
            } else {
                self.repo.delete_participant(&seat.opponent_id).await?;
            }
            self.sweeper.cancel(&seat.opponent_id);
        }
        Ok(())
    }

    /// 向双方发送 end_game
    async fn notify_end(&self, participant: &Participant, seat: &Seat, state: &BoardState, reason: EndReason) {
        let score = state.board.score();
        let sides = [
            (participant.id.as_str(), seat.color, seat.opponent_name.as_str()),
            (seat.opponent_id.as_str(), seat.color.opponent(), participant.name.as_str()),
        ];

        for (target, color, opponent_name) in sides {
            self.registry
                .send(
                    target,
                    ServerMessage::EndGame {
                        board: state.board.clone(),
                        current_player: state.current_turn,
                        your_color: color,
                        opponent_name: opponent_name.to_string(),
                        reason,
                        score,
                    },
                )
                .await;
        }
    }

    /// 等待池中的参与者数量
    pub async fn waiting_count(&self) -> usize {
        self.matchmaker.waiting_count().await
    }

    /// 参与者当前状态（测试和诊断用）
    pub async fn status_of(&self, id: &str) -> HandlerResult<Option<ParticipantStatus>> {
        Ok(self.repo.load_participant(id).await?.map(|p| p.status))
    }
}

/// 直接回复发送方（连接可能尚未登记）
async fn reply(handle: &ConnectionHandle, msg: ServerMessage) {
    if handle.tx.send(msg).await.is_err() {
        debug!(conn = handle.id, "writer gone, reply dropped");
    }
}
