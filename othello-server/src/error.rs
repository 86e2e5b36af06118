//! 错误类型定义

use protocol::{ErrorCode, OthelloError};
use thiserror::Error;

/// 会话存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// 存储不可达
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// 键存在但类型不符（例如对字符串键做哈希操作）
    #[error("Wrong value type for key {key}")]
    WrongType { key: String },

    /// 记录内容无法解析
    #[error("Corrupt record {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// 存储操作结果类型
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// 消息处理错误
#[derive(Error, Debug)]
pub enum HandlerError {
    /// 存储失败：本条消息的处理中止，之前的状态保持有效
    #[error(transparent)]
    Store(#[from] StoreError),

    /// 协议或校验错误：回显给发送方，连接保持
    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },
}

impl HandlerError {
    pub fn rejected(code: ErrorCode, message: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code,
            message: message.into(),
        }
    }
}

impl From<OthelloError> for HandlerError {
    fn from(err: OthelloError) -> Self {
        let code = match err {
            OthelloError::Occupied { .. } => ErrorCode::CellOccupied,
            OthelloError::NotYourTurn => ErrorCode::NotYourTurn,
            OthelloError::InvalidPosition { .. }
            | OthelloError::NoCapture { .. }
            | OthelloError::InvalidDiagram { .. } => ErrorCode::InvalidMove,
        };
        HandlerError::rejected(code, err.to_string())
    }
}

/// 消息处理结果类型
pub type HandlerResult<T = ()> = std::result::Result<T, HandlerError>;
