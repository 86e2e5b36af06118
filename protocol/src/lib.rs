//! 黑白棋共享协议库
//!
//! 包含:
//! - 棋子颜色、棋盘、位置等核心数据结构
//! - 落子与翻转规则
//! - 消息类型定义 (ClientMessage, ServerMessage)
//! - 传输层抽象 (Connector, Connection, Listener traits)
//! - 帧编解码
//! - 棋盘图示

mod board;
mod constants;
mod diagram;
mod error;
mod message;
mod moves;
mod stone;
mod transport;

pub use board::{Board, BoardState, PassFlags, Score};
pub use constants::*;
pub use diagram::{Diagram, INITIAL_DIAGRAM};
pub use error::{OthelloError, ProtocolError, Result};
pub use message::{
    ClientMessage, EndReason, ErrorCode, GameId, ParticipantId, ServerMessage,
};
pub use moves::{Move, MoveGenerator, PassOutcome, PlacementPolicy, DIRECTIONS};
pub use stone::{Color, Position};
pub use transport::{
    Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection, TcpConnector,
    TcpListener,
};
