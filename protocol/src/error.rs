//! 错误类型定义

use thiserror::Error;

/// 黑白棋规则错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OthelloError {
    /// 坐标越界
    #[error("Invalid position: ({x}, {y})")]
    InvalidPosition { x: i32, y: i32 },

    /// 目标格已有棋子
    #[error("Cell ({x}, {y}) is already occupied")]
    Occupied { x: u8, y: u8 },

    /// 不是你的回合
    #[error("Not your turn")]
    NotYourTurn,

    /// 落子没有翻转任何棋子（仅在严格规则下报错）
    #[error("Placement at ({x}, {y}) captures nothing")]
    NoCapture { x: u8, y: u8 },

    /// 无效的棋盘图示
    #[error("Invalid board diagram: {reason}")]
    InvalidDiagram { reason: String },
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 帧内容不是合法 UTF-8
    #[error("Frame payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 规则错误
    #[error("Othello error: {0}")]
    Othello(#[from] OthelloError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
