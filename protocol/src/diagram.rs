//! 棋盘图示解析和生成
//!
//! 每行 8 个字符，`B` 为黑子、`W` 为白子、`.` 为空格；
//! 行之间用 `/`、换行分隔，或直接连写 64 个字符。可选地在末尾以空格
//! 追加走子方（`b` / `w`）。
//!
//! 示例：
//! `......../......../......../...WB.../...BW.../......../......../........ b`

use crate::board::{Board, BoardState};
use crate::constants::{BOARD_SIZE, CELL_COUNT};
use crate::error::OthelloError;
use crate::stone::{Color, Position};

/// 初始局面图示
pub const INITIAL_DIAGRAM: &str =
    "......../......../......../...WB.../...BW.../......../......../........ b";

/// 棋盘图示处理
pub struct Diagram;

impl Diagram {
    /// 解析图示为棋盘状态（走子方缺省为黑方）
    pub fn parse(diagram: &str) -> Result<BoardState, OthelloError> {
        let (cells, turn) = match diagram.trim().rsplit_once(' ') {
            Some((cells, turn)) if turn.len() == 1 => (cells, Some(turn)),
            _ => (diagram, None),
        };

        let board = Self::parse_board(cells)?;
        let current_turn = match turn {
            Some("b") | Some("B") => Color::Black,
            Some("w") | Some("W") => Color::White,
            Some(other) => {
                return Err(OthelloError::InvalidDiagram {
                    reason: format!("Unknown side to move: {}", other),
                })
            }
            None => Color::Black,
        };

        Ok(BoardState::from_board(board, current_turn))
    }

    /// 解析图示的棋盘部分
    pub fn parse_board(cells: &str) -> Result<Board, OthelloError> {
        let symbols: Vec<char> = cells
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '/')
            .collect();

        if symbols.len() != CELL_COUNT {
            return Err(OthelloError::InvalidDiagram {
                reason: format!("Expected {} cells, got {}", CELL_COUNT, symbols.len()),
            });
        }

        let mut board = Board::empty();
        for (index, symbol) in symbols.into_iter().enumerate() {
            let stone = match symbol {
                '.' | '-' => None,
                c => Some(Color::from_diagram_char(c).ok_or_else(|| {
                    OthelloError::InvalidDiagram {
                        reason: format!("Invalid cell character: {}", c),
                    }
                })?),
            };
            if let Some(pos) = Position::from_index(index) {
                board.set(pos, stone);
            }
        }

        Ok(board)
    }

    /// 生成棋盘图示（不含走子方）
    pub fn board_to_string(board: &Board) -> String {
        let mut rows = Vec::with_capacity(BOARD_SIZE);
        for y in 0..BOARD_SIZE {
            let row: String = (0..BOARD_SIZE)
                .map(|x| {
                    board
                        .get(Position::new_unchecked(x as u8, y as u8))
                        .map_or('.', |c| c.to_diagram_char())
                })
                .collect();
            rows.push(row);
        }
        rows.join("/")
    }

    /// 生成完整图示
    pub fn to_string(state: &BoardState) -> String {
        let side = match state.current_turn {
            Color::Black => 'b',
            Color::White => 'w',
        };
        format!("{} {}", Self::board_to_string(&state.board), side)
    }
}
