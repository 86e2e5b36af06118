//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 棋盘边长（8x8）
pub const BOARD_SIZE: usize = 8;

/// 棋盘格子总数
pub const CELL_COUNT: usize = BOARD_SIZE * BOARD_SIZE;

/// 昵称最大长度
pub const MAX_NAME_LEN: usize = 20;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 断线重连宽限期（秒）
pub const GRACE_PERIOD_SECS: u64 = 40;

/// 配对成功到发送 start_game 的延迟（毫秒）
pub const MATCH_NOTIFY_DELAY_MS: u64 = 5000;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
