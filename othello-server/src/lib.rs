//! 黑白棋对战服务端
//!
//! 包含:
//! - 会话存储接口与进程内实现
//! - 连接注册表
//! - 随机配对
//! - 断线重连恢复
//! - 宽限期超时清理

pub mod config;
pub mod error;
pub mod game;
pub mod matchmaker;
pub mod participant;
pub mod reconnect;
pub mod registry;
pub mod server;
pub mod session;
pub mod store;
pub mod sweeper;

pub use config::{ColorPolicy, ServerConfig};
pub use error::{HandlerError, HandlerResult, StoreError, StoreResult};
pub use game::GameLocks;
pub use matchmaker::{Matchmaker, Pairing, WaitingPool};
pub use participant::{Participant, ParticipantStatus, Seat};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use server::Coordinator;
pub use session::SessionRepository;
pub use store::{KeyTtl, MemoryStore, SessionStore};
pub use sweeper::DisconnectSweeper;
