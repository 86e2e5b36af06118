//! 消息类型定义
//!
//! 所有消息都是带 `type` 字段的 JSON 对象。

use serde::{Deserialize, Serialize};

use crate::board::{Board, Score};
use crate::stone::Color;

/// 参与者 ID（客户端提供的不透明字符串）
pub type ParticipantId = String;

/// 对局 ID
pub type GameId = String;

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// 加入或重新加入
    Register {
        user_id: ParticipantId,
        #[serde(default)]
        name: Option<String>,
    },
    /// 落子；旧客户端附带的 board 字段被忽略，以服务端状态为准
    Move {
        x: i32,
        y: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        board: Option<serde_json::Value>,
    },
    /// 弃权
    Pass,
    /// 认输
    Surrender {
        #[serde(default)]
        user_id: Option<ParticipantId>,
    },
    /// 确认对局结束并回到等待状态
    EndGame,
    /// 主动请求同步棋局
    RestoreRequest {
        #[serde(default)]
        user_id: Option<ParticipantId>,
    },
}

/// 对局结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// 双方连续弃权
    DoublePass,
    /// 一方认输
    Surrender,
    /// 断线方未在宽限期内返回
    OpponentTimeout,
    /// 参与者主动结束
    EndedByPlayer,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// 对局开始
    StartGame {
        your_color: Color,
        opponent_name: String,
        first_turn: Color,
        board: Board,
    },
    /// 落子完成
    Move {
        x: u8,
        y: u8,
        color: Color,
        next_turn: Color,
        your_color: Color,
        your_turn: bool,
    },
    /// 一方弃权
    Pass {
        next_turn: Color,
        your_color: Color,
        your_turn: bool,
    },
    /// 对局结束
    EndGame {
        board: Board,
        current_player: Color,
        your_color: Color,
        opponent_name: String,
        reason: EndReason,
        score: Score,
    },
    /// 重连后恢复完整棋局
    RestoreBoard {
        board: Board,
        current_player: Color,
        your_color: Color,
        your_turn: bool,
        opponent_name: String,
    },
    /// 棋盘快照
    UpdateBoard {
        board: Board,
        current_player: Color,
    },
    /// 对手重连
    OpponentReconnected,
    /// 对手断线
    OpponentDisconnected { timeout_secs: u64 },
    /// 对手认输
    OpponentSurrendered,
    /// 错误消息
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    /// 消息类型名（用于日志）
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::StartGame { .. } => "start_game",
            ServerMessage::Move { .. } => "move",
            ServerMessage::Pass { .. } => "pass",
            ServerMessage::EndGame { .. } => "end_game",
            ServerMessage::RestoreBoard { .. } => "restore_board",
            ServerMessage::UpdateBoard { .. } => "update_board",
            ServerMessage::OpponentReconnected => "opponent_reconnected",
            ServerMessage::OpponentDisconnected { .. } => "opponent_disconnected",
            ServerMessage::OpponentSurrendered => "opponent_surrendered",
            ServerMessage::Error { .. } => "error",
        }
    }

    /// 构造错误消息
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// 错误码定义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    // === 协议 ===
    /// 无法解析的消息或未知类型
    MalformedMessage,
    /// 尚未发送 register
    NotRegistered,
    /// 同一连接试图注册另一个 ID
    AlreadyRegistered,
    /// 消息中的 user_id 与连接注册的不一致
    IdentityMismatch,
    /// 无效昵称或 ID
    InvalidName,

    // === 对局 ===
    /// 坐标越界或落子不合法
    InvalidMove,
    /// 目标格已有棋子
    CellOccupied,
    /// 不是你的回合
    NotYourTurn,
    /// 不在对局中
    NotInGame,
    /// 对局记录不存在
    GameNotFound,

    // === 系统 ===
    /// 存储不可用
    StoreUnavailable,
    /// 内部错误
    InternalError,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
