//! 落子与翻转规则

use serde::{Deserialize, Serialize};

use crate::board::{Board, BoardState};
use crate::error::OthelloError;
use crate::stone::{Color, Position};

/// 八个扫描方向
pub const DIRECTIONS: [(i8, i8); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// 落子合法性策略
///
/// `Lenient` 接受不翻转任何棋子的落子，`RequireCapture` 为标准黑白棋规则。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementPolicy {
    #[default]
    Lenient,
    RequireCapture,
}

/// 一步落子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    pub pos: Position,
    pub color: Color,
}

impl Move {
    pub fn new(pos: Position, color: Color) -> Self {
        Self { pos, color }
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.color, self.pos)
    }
}

/// 弃权结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// 对局继续，轮到对方
    Continue,
    /// 双方连续弃权，对局结束
    GameOver,
}

/// 走法生成器
pub struct MoveGenerator;

impl MoveGenerator {
    /// 计算在 `pos` 落下 `color` 会翻转的所有棋子
    ///
    /// 每个方向上扫描连续的对方棋子，只有以己方棋子收尾的一段才会被翻转；
    /// 碰到空格或棋盘边缘的一段保持不变。
    pub fn flips_for(board: &Board, pos: Position, color: Color) -> Vec<Position> {
        let opponent = color.opponent();
        let mut flips = Vec::new();

        for (dx, dy) in DIRECTIONS {
            let mut run = Vec::new();
            let mut cursor = pos.offset(dx, dy);

            while let Some(p) = cursor {
                if board.get(p) != Some(opponent) {
                    break;
                }
                run.push(p);
                cursor = p.offset(dx, dy);
            }

            let anchored = cursor.is_some_and(|p| board.get(p) == Some(color));
            if anchored && !run.is_empty() {
                flips.extend(run);
            }
        }

        flips
    }

    /// 标准规则下是否为合法落子（空格且至少翻转一子）
    pub fn is_legal(board: &Board, pos: Position, color: Color) -> bool {
        board.get(pos).is_none() && !Self::flips_for(board, pos, color).is_empty()
    }

    /// 标准规则下指定颜色的所有合法落子
    pub fn legal_moves(board: &Board, color: Color) -> Vec<Position> {
        Position::all()
            .filter(|&pos| Self::is_legal(board, pos, color))
            .collect()
    }

    /// 标准规则下是否还有可下的位置
    pub fn has_legal_move(board: &Board, color: Color) -> bool {
        Position::all().any(|pos| Self::is_legal(board, pos, color))
    }
}

impl Board {
    /// 落子并翻转，返回被翻转的位置
    ///
    /// 目标格已有棋子时返回 `Occupied`，棋盘不变。坐标越界由调用方事先检查。
    pub fn place(&mut self, pos: Position, color: Color) -> Result<Vec<Position>, OthelloError> {
        if self.get(pos).is_some() {
            return Err(OthelloError::Occupied { x: pos.x, y: pos.y });
        }

        let flips = MoveGenerator::flips_for(self, pos, color);
        self.set(pos, Some(color));
        for &p in &flips {
            self.set(p, Some(color));
        }

        Ok(flips)
    }
}

impl BoardState {
    /// 执行一步落子
    ///
    /// 成功后清除双方弃权标记并切换走子方。
    pub fn apply_move(
        &mut self,
        mv: Move,
        policy: PlacementPolicy,
    ) -> Result<Vec<Position>, OthelloError> {
        if mv.color != self.current_turn {
            return Err(OthelloError::NotYourTurn);
        }
        if self.board.get(mv.pos).is_some() {
            return Err(OthelloError::Occupied {
                x: mv.pos.x,
                y: mv.pos.y,
            });
        }
        if policy == PlacementPolicy::RequireCapture
            && MoveGenerator::flips_for(&self.board, mv.pos, mv.color).is_empty()
        {
            return Err(OthelloError::NoCapture {
                x: mv.pos.x,
                y: mv.pos.y,
            });
        }

        let flipped = self.board.place(mv.pos, mv.color)?;
        self.passes.clear();
        self.switch_turn();

        Ok(flipped)
    }

    /// 执行弃权
    ///
    /// 记录弃权方标记并切换走子方；双方标记都已置位时对局结束。
    pub fn apply_pass(&mut self, color: Color) -> Result<PassOutcome, OthelloError> {
        if color != self.current_turn {
            return Err(OthelloError::NotYourTurn);
        }

        self.passes.set(color, true);
        self.switch_turn();

        if self.passes.both() {
            Ok(PassOutcome::GameOver)
        } else {
            Ok(PassOutcome::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagram::Diagram;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn pos(x: u8, y: u8) -> Position {
        Position::new_unchecked(x, y)
    }

    #[test]
    fn test_opening_capture() {
        let mut state = BoardState::initial();

        let flipped = state
            .apply_move(Move::new(pos(2, 3), Color::Black), PlacementPolicy::Lenient)
            .unwrap();

        assert_eq!(flipped, vec![pos(3, 3)]);
        assert_eq!(state.board.get(pos(2, 3)), Some(Color::Black));
        assert_eq!(state.board.get(pos(3, 3)), Some(Color::Black));
        assert_eq!(state.board.get(pos(4, 4)), Some(Color::White));
        assert_eq!(state.current_turn, Color::White);
        assert_eq!(state.board.score().black, 4);
        assert_eq!(state.board.score().white, 1);
    }

    #[test]
    fn test_initial_legal_moves() {
        let board = Board::initial();
        let mut moves = MoveGenerator::legal_moves(&board, Color::Black);
        moves.sort_by_key(|p| p.to_index());

        assert_eq!(moves, vec![pos(3, 2), pos(2, 3), pos(5, 4), pos(4, 5)]);
    }

    #[test]
    fn test_occupied_is_noop() {
        let mut board = Board::initial();
        let before = board.clone();

        let result = board.place(pos(3, 3), Color::Black);
        assert_eq!(result, Err(OthelloError::Occupied { x: 3, y: 3 }));
        assert_eq!(board, before);
    }

    #[test]
    fn test_multi_direction_capture() {
        let mut board = Diagram::parse_board(
            "B.B.B...\
             .WWW....\
             BW.WB...\
             .WWW....\
             B.B.B...\
             ........\
             ........\
             ........",
        )
        .unwrap();

        let flipped = board.place(pos(2, 2), Color::Black).unwrap();

        assert_eq!(flipped.len(), 8);
        assert_eq!(board.count(Color::White), 0);
    }

    #[test]
    fn test_unterminated_runs_untouched() {
        // 向东的白子一直延伸到边缘，向南的白子后面是空格
        let mut board = Diagram::parse_board(
            "........\
             ........\
             ....WWWW\
             ....W...\
             ........\
             ........\
             ........\
             ........",
        )
        .unwrap();
        let before = board.clone();

        let flipped = board.place(pos(3, 2), Color::Black).unwrap();

        assert!(flipped.is_empty());
        for p in Position::all().filter(|&p| p != pos(3, 2)) {
            assert_eq!(board.get(p), before.get(p));
        }
    }

    #[test]
    fn test_run_terminated_by_own_stone_only() {
        // 向东：W W B 收尾翻转；向西：W 后面是空格不翻
        let mut board = Diagram::parse_board(
            "........\
             ........\
             ........\
             .W.WWB..\
             ........\
             ........\
             ........\
             ........",
        )
        .unwrap();

        let flipped = board.place(pos(2, 3), Color::Black).unwrap();

        assert_eq!(flipped, vec![pos(3, 3), pos(4, 3)]);
        assert_eq!(board.get(pos(1, 3)), Some(Color::White));
    }

    #[test]
    fn test_zero_capture_policy() {
        let mut lenient = BoardState::initial();
        let corner = Move::new(pos(0, 0), Color::Black);

        let flipped = lenient.apply_move(corner, PlacementPolicy::Lenient).unwrap();
        assert!(flipped.is_empty());
        assert_eq!(lenient.board.get(pos(0, 0)), Some(Color::Black));
        assert_eq!(lenient.current_turn, Color::White);

        let mut strict = BoardState::initial();
        let result = strict.apply_move(corner, PlacementPolicy::RequireCapture);
        assert_eq!(result, Err(OthelloError::NoCapture { x: 0, y: 0 }));
        assert_eq!(strict, BoardState::initial());
    }

    #[test]
    fn test_wrong_turn_rejected() {
        let mut state = BoardState::initial();
        let result = state.apply_move(Move::new(pos(2, 3), Color::White), PlacementPolicy::Lenient);
        assert_eq!(result, Err(OthelloError::NotYourTurn));
        assert_eq!(state.apply_pass(Color::White), Err(OthelloError::NotYourTurn));
        assert_eq!(state, BoardState::initial());
    }

    #[test]
    fn test_consecutive_passes_end_game() {
        let mut state = BoardState::initial();
        let board_before = state.board.clone();

        assert_eq!(state.apply_pass(Color::Black), Ok(PassOutcome::Continue));
        assert_eq!(state.current_turn, Color::White);
        assert_eq!(state.apply_pass(Color::White), Ok(PassOutcome::GameOver));
        assert_eq!(state.board, board_before);
    }

    #[test]
    fn test_move_between_passes_resets_flags() {
        let mut state = BoardState::initial();

        state.apply_pass(Color::Black).unwrap();
        state
            .apply_move(Move::new(pos(4, 2), Color::White), PlacementPolicy::Lenient)
            .unwrap();
        assert!(!state.passes.black);

        assert_eq!(state.apply_pass(Color::Black), Ok(PassOutcome::Continue));
        assert_eq!(state.apply_pass(Color::White), Ok(PassOutcome::GameOver));
    }

    #[test]
    fn test_placement_only_adds_or_flips() {
        // 固定种子的随机对弈
        let mut rng = StdRng::seed_from_u64(0x2545_F491_4F6C_DD1D);

        let mut board = Board::initial();
        let mut color = Color::Black;

        while !board.is_full() {
            let empties: Vec<Position> = Position::all().filter(|&p| board.get(p).is_none()).collect();
            let target = empties[rng.gen_range(0..empties.len())];
            let before = board.clone();
            let stones_before = 64 - before.empty_count();

            let flipped = board.place(target, color).unwrap();

            assert_eq!(64 - board.empty_count(), stones_before + 1);
            assert_eq!(
                board.count(color),
                before.count(color) + flipped.len() + 1
            );
            for p in Position::all() {
                if p == target {
                    assert_eq!(board.get(p), Some(color));
                } else if flipped.contains(&p) {
                    assert_eq!(before.get(p), Some(color.opponent()));
                    assert_eq!(board.get(p), Some(color));
                } else {
                    assert_eq!(board.get(p), before.get(p));
                }
            }

            color = color.opponent();
        }
    }
}
