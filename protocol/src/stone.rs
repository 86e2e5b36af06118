//! 棋子颜色与棋盘坐标

use serde::{Deserialize, Serialize};

use crate::constants::BOARD_SIZE;

/// 棋子颜色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    /// 黑方（先手）
    Black,
    /// 白方
    White,
}

impl Color {
    /// 获取对方颜色
    pub fn opponent(&self) -> Color {
        match self {
            Color::Black => Color::White,
            Color::White => Color::Black,
        }
    }

    /// 存储与日志使用的名称
    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Black => "black",
            Color::White => "white",
        }
    }

    /// 从名称解析
    pub fn parse(s: &str) -> Option<Color> {
        match s {
            "black" => Some(Color::Black),
            "white" => Some(Color::White),
            _ => None,
        }
    }

    /// 棋盘图示字符
    pub fn to_diagram_char(&self) -> char {
        match self {
            Color::Black => 'B',
            Color::White => 'W',
        }
    }

    /// 从棋盘图示字符解析
    pub fn from_diagram_char(c: char) -> Option<Color> {
        match c {
            'B' | 'b' | 'X' | 'x' => Some(Color::Black),
            'W' | 'w' | 'O' | 'o' => Some(Color::White),
            _ => None,
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 棋盘位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// 列 (0-7)
    pub x: u8,
    /// 行 (0-7)
    pub y: u8,
}

impl Position {
    /// 创建新位置，越界返回 None
    ///
    /// 接收有符号坐标，客户端发来的负数坐标在这里被拒绝。
    pub fn new(x: i32, y: i32) -> Option<Self> {
        if (0..BOARD_SIZE as i32).contains(&x) && (0..BOARD_SIZE as i32).contains(&y) {
            Some(Self {
                x: x as u8,
                y: y as u8,
            })
        } else {
            None
        }
    }

    /// 创建新位置（不检查边界，内部使用）
    pub const fn new_unchecked(x: u8, y: u8) -> Self {
        Self { x, y }
    }

    /// 检查位置是否在棋盘内
    pub fn is_valid(&self) -> bool {
        (self.x as usize) < BOARD_SIZE && (self.y as usize) < BOARD_SIZE
    }

    /// 获取偏移后的位置
    pub fn offset(&self, dx: i8, dy: i8) -> Option<Position> {
        Self::new(self.x as i32 + dx as i32, self.y as i32 + dy as i32)
    }

    /// 转换为数组索引
    pub fn to_index(&self) -> usize {
        self.y as usize * BOARD_SIZE + self.x as usize
    }

    /// 从数组索引转换
    pub fn from_index(index: usize) -> Option<Self> {
        if index < BOARD_SIZE * BOARD_SIZE {
            Some(Position {
                x: (index % BOARD_SIZE) as u8,
                y: (index / BOARD_SIZE) as u8,
            })
        } else {
            None
        }
    }

    /// 遍历所有格子（按行）
    pub fn all() -> impl Iterator<Item = Position> {
        (0..BOARD_SIZE * BOARD_SIZE).filter_map(Position::from_index)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_opponent() {
        assert_eq!(Color::Black.opponent(), Color::White);
        assert_eq!(Color::White.opponent(), Color::Black);
    }

    #[test]
    fn test_color_names() {
        assert_eq!(Color::parse("black"), Some(Color::Black));
        assert_eq!(Color::parse(Color::White.as_str()), Some(Color::White));
        assert_eq!(Color::parse("red"), None);
        assert_eq!(serde_json::to_string(&Color::White).unwrap(), "\"white\"");
    }

    #[test]
    fn test_position_valid() {
        assert!(Position::new(0, 0).is_some());
        assert!(Position::new(7, 7).is_some());
        assert!(Position::new(8, 0).is_none());
        assert!(Position::new(0, -1).is_none());
    }

    #[test]
    fn test_position_offset() {
        let corner = Position::new_unchecked(0, 0);
        assert_eq!(corner.offset(1, 1), Some(Position::new_unchecked(1, 1)));
        assert_eq!(corner.offset(-1, 0), None);
        assert_eq!(Position::new_unchecked(7, 3).offset(1, 0), None);
    }

    #[test]
    fn test_index_round_trip() {
        assert_eq!(Position::all().count(), 64);
        let pos = Position::new_unchecked(5, 2);
        assert_eq!(Position::from_index(pos.to_index()), Some(pos));
        assert_eq!(Position::from_index(64), None);
    }
}
