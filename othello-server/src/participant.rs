//! 参与者状态

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use protocol::{Color, ErrorCode, GameId, ParticipantId, MAX_NAME_LEN};

use crate::error::{HandlerError, HandlerResult};

/// 记录字段名
pub mod field {
    pub const NAME: &str = "name";
    pub const STATUS: &str = "status";
    pub const GAME_ID: &str = "game_id";
    pub const OPPONENT_ID: &str = "opponent_id";
    pub const OPPONENT_NAME: &str = "opponent_name";
    pub const COLOR: &str = "color";
    pub const DEADLINE: &str = "deadline";

    /// 只在对局中存在的字段
    pub const SEAT_FIELDS: [&str; 5] = [GAME_ID, OPPONENT_ID, OPPONENT_NAME, COLOR, DEADLINE];
}

/// 对局中的座位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seat {
    pub game_id: GameId,
    pub opponent_id: ParticipantId,
    pub opponent_name: String,
    pub color: Color,
}

/// 参与者状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    /// 等待配对
    Waiting,
    /// 对局中，连接在线
    Matched(Seat),
    /// 对局中，连接断开，宽限期截止于 `deadline`
    Disconnected { seat: Seat, deadline: DateTime<Utc> },
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParticipantStatus::Waiting => "waiting",
            ParticipantStatus::Matched(_) => "matched",
            ParticipantStatus::Disconnected { .. } => "disconnected",
        }
    }

    /// 所在座位（等待中为 None）
    pub fn seat(&self) -> Option<&Seat> {
        match self {
            ParticipantStatus::Waiting => None,
            ParticipantStatus::Matched(seat) => Some(seat),
            ParticipantStatus::Disconnected { seat, .. } => Some(seat),
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(self, ParticipantStatus::Waiting)
    }
}

/// 参与者记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub status: ParticipantStatus,
}

impl Participant {
    pub fn waiting(id: ParticipantId, name: String) -> Self {
        Self {
            id,
            name,
            status: ParticipantStatus::Waiting,
        }
    }

    pub fn seat(&self) -> Option<&Seat> {
        self.status.seat()
    }

    /// 是否在指定对局中
    pub fn in_game(&self, game_id: &str) -> bool {
        self.seat().is_some_and(|seat| seat.game_id == game_id)
    }

    /// 序列化为哈希字段
    pub fn to_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            (field::NAME, self.name.clone()),
            (field::STATUS, self.status.as_str().to_string()),
        ];
        if let Some(seat) = self.seat() {
            fields.push((field::GAME_ID, seat.game_id.clone()));
            fields.push((field::OPPONENT_ID, seat.opponent_id.clone()));
            fields.push((field::OPPONENT_NAME, seat.opponent_name.clone()));
            fields.push((field::COLOR, seat.color.as_str().to_string()));
        }
        if let ParticipantStatus::Disconnected { deadline, .. } = &self.status {
            fields.push((field::DEADLINE, deadline.to_rfc3339()));
        }
        fields
    }

    /// 从哈希字段还原，记录不存在时返回 None
    ///
    /// 对局字段残缺的记录按等待状态处理。
    pub fn from_fields(id: &str, fields: &HashMap<String, String>) -> Option<Self> {
        if fields.is_empty() {
            return None;
        }

        let name = fields
            .get(field::NAME)
            .cloned()
            .unwrap_or_else(|| id.to_string());
        let status = match fields.get(field::STATUS).map(String::as_str) {
            Some("matched") => match parse_seat(fields) {
                Some(seat) => ParticipantStatus::Matched(seat),
                None => {
                    warn!(participant = %id, "matched record without a complete seat, treating as waiting");
                    ParticipantStatus::Waiting
                }
            },
            Some("disconnected") => {
                let deadline = fields
                    .get(field::DEADLINE)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc));
                match (parse_seat(fields), deadline) {
                    (Some(seat), Some(deadline)) => {
                        ParticipantStatus::Disconnected { seat, deadline }
                    }
                    _ => {
                        warn!(participant = %id, "disconnected record is incomplete, treating as waiting");
                        ParticipantStatus::Waiting
                    }
                }
            }
            _ => ParticipantStatus::Waiting,
        };

        Some(Self {
            id: id.to_string(),
            name,
            status,
        })
    }
}

fn parse_seat(fields: &HashMap<String, String>) -> Option<Seat> {
    let game_id = fields.get(field::GAME_ID).filter(|s| !s.is_empty())?;
    let opponent_id = fields.get(field::OPPONENT_ID).filter(|s| !s.is_empty())?;
    let color = fields.get(field::COLOR).and_then(|s| Color::parse(s))?;
    let opponent_name = fields
        .get(field::OPPONENT_NAME)
        .cloned()
        .unwrap_or_else(|| opponent_id.clone());

    Some(Seat {
        game_id: game_id.clone(),
        opponent_id: opponent_id.clone(),
        opponent_name,
        color,
    })
}

/// 校验参与者 ID
pub fn validate_id(id: &str) -> HandlerResult<()> {
    if id.trim().is_empty() {
        return Err(HandlerError::rejected(ErrorCode::InvalidName, "user_id must not be empty"));
    }
    Ok(())
}

/// 规范化昵称：去除首尾空白，空昵称使用参与者 ID
pub fn normalize_name(id: &str, name: Option<&str>) -> HandlerResult<String> {
    let name = name.map(str::trim).unwrap_or_default();
    if name.chars().count() > MAX_NAME_LEN {
        return Err(HandlerError::rejected(
            ErrorCode::InvalidName,
            format!("name must not exceed {} characters", MAX_NAME_LEN),
        ));
    }
    if name.is_empty() {
        return Ok(id.to_string());
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat() -> Seat {
        Seat {
            game_id: "g-1".to_string(),
            opponent_id: "bob".to_string(),
            opponent_name: "Bob".to_string(),
            color: Color::White,
        }
    }

    fn to_map(fields: Vec<(&'static str, String)>) -> HashMap<String, String> {
        fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_matched_record() {
        let participant = Participant {
            id: "alice".to_string(),
            name: "Alice".to_string(),
            status: ParticipantStatus::Matched(seat()),
        };
        let map = to_map(participant.to_fields());
        assert_eq!(map.get("status").map(String::as_str), Some("matched"));
        assert_eq!(map.get("color").map(String::as_str), Some("white"));

        let restored = Participant::from_fields("alice", &map).unwrap();
        assert_eq!(restored, participant);
        assert!(restored.in_game("g-1"));
        assert!(!restored.in_game("g-2"));
    }

    #[test]
    fn test_disconnected_record() {
        let deadline = DateTime::parse_from_rfc3339("2024-05-01T12:00:40Z")
            .unwrap()
            .with_timezone(&Utc);
        let participant = Participant {
            id: "alice".to_string(),
            name: "Alice".to_string(),
            status: ParticipantStatus::Disconnected {
                seat: seat(),
                deadline,
            },
        };

        let restored = Participant::from_fields("alice", &to_map(participant.to_fields())).unwrap();
        assert_eq!(restored.status, participant.status);
    }

    #[test]
    fn test_incomplete_matched_record_degrades() {
        let map = to_map(vec![
            ("name", "Alice".to_string()),
            ("status", "matched".to_string()),
            ("game_id", "g-1".to_string()),
        ]);
        let restored = Participant::from_fields("alice", &map).unwrap();
        assert_eq!(restored.status, ParticipantStatus::Waiting);

        assert!(Participant::from_fields("alice", &HashMap::new()).is_none());
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("u-1", Some("  Alice ")).unwrap(), "Alice");
        assert_eq!(normalize_name("u-1", Some("   ")).unwrap(), "u-1");
        assert_eq!(normalize_name("u-1", None).unwrap(), "u-1");
        assert_eq!(normalize_name("u-1", Some(&"棋".repeat(20))).unwrap().chars().count(), 20);
        assert!(matches!(
            normalize_name("u-1", Some(&"x".repeat(21))),
            Err(HandlerError::Rejected { code: ErrorCode::InvalidName, .. })
        ));

        assert!(validate_id("u-1").is_ok());
        assert!(validate_id(" ").is_err());
    }
}
