//! 棋盘状态

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;
use crate::stone::{Color, Position};

/// 棋盘
///
/// 序列化为 8 行 8 列的嵌套数组，访问方式为 `board[y][x]`，
/// 每格为 `null`、`"black"` 或 `"white"`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    rows: [[Option<Color>; BOARD_SIZE]; BOARD_SIZE],
}

impl Board {
    /// 创建空棋盘
    pub fn empty() -> Self {
        Self {
            rows: [[None; BOARD_SIZE]; BOARD_SIZE],
        }
    }

    /// 创建初始棋盘：中心四格交叉摆放
    pub fn initial() -> Self {
        let mut board = Self::empty();
        board.set(Position::new_unchecked(3, 3), Some(Color::White));
        board.set(Position::new_unchecked(4, 4), Some(Color::White));
        board.set(Position::new_unchecked(4, 3), Some(Color::Black));
        board.set(Position::new_unchecked(3, 4), Some(Color::Black));
        board
    }

    /// 获取指定位置的棋子
    pub fn get(&self, pos: Position) -> Option<Color> {
        if pos.is_valid() {
            self.rows[pos.y as usize][pos.x as usize]
        } else {
            None
        }
    }

    /// 设置指定位置的棋子（不检查规则）
    pub fn set(&mut self, pos: Position, stone: Option<Color>) {
        if pos.is_valid() {
            self.rows[pos.y as usize][pos.x as usize] = stone;
        }
    }

    /// 指定颜色的棋子数
    pub fn count(&self, color: Color) -> usize {
        self.rows
            .iter()
            .flatten()
            .filter(|cell| **cell == Some(color))
            .count()
    }

    /// 空格数
    pub fn empty_count(&self) -> usize {
        self.rows.iter().flatten().filter(|cell| cell.is_none()).count()
    }

    /// 棋盘是否已下满
    pub fn is_full(&self) -> bool {
        self.empty_count() == 0
    }

    /// 当前比分
    pub fn score(&self) -> Score {
        Score {
            black: self.count(Color::Black),
            white: self.count(Color::White),
        }
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}

/// 比分
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub black: usize,
    pub white: usize,
}

impl Score {
    /// 领先方，平局返回 None
    pub fn leader(&self) -> Option<Color> {
        match self.black.cmp(&self.white) {
            std::cmp::Ordering::Greater => Some(Color::Black),
            std::cmp::Ordering::Less => Some(Color::White),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// 双方的待定弃权标记
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassFlags {
    pub black: bool,
    pub white: bool,
}

impl PassFlags {
    pub fn get(&self, color: Color) -> bool {
        match color {
            Color::Black => self.black,
            Color::White => self.white,
        }
    }

    pub fn set(&mut self, color: Color, passed: bool) {
        match color {
            Color::Black => self.black = passed,
            Color::White => self.white = passed,
        }
    }

    /// 清除双方标记
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 双方是否都已弃权
    pub fn both(&self) -> bool {
        self.black && self.white
    }
}

/// 一局棋的权威状态（棋盘 + 走子方 + 弃权标记）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardState {
    /// 棋盘
    pub board: Board,
    /// 当前走子方
    pub current_turn: Color,
    /// 弃权标记
    pub passes: PassFlags,
}

impl BoardState {
    /// 创建初始状态（黑方先行）
    pub fn initial() -> Self {
        Self {
            board: Board::initial(),
            current_turn: Color::Black,
            passes: PassFlags::default(),
        }
    }

    /// 从棋盘创建状态
    pub fn from_board(board: Board, current_turn: Color) -> Self {
        Self {
            board,
            current_turn,
            passes: PassFlags::default(),
        }
    }

    /// 切换走子方
    pub fn switch_turn(&mut self) {
        self.current_turn = self.current_turn.opponent();
    }
}

impl Default for BoardState {
    fn default() -> Self {
        Self::initial()
    }
}
