//! Wire protocol shared by the server and its clients.
//!
//! Every frame is plain ASCII, introduced by the `+` delimiter, followed by a
//! one character tag and a fixed-width, zero-padded payload. Frames the server
//! rebroadcasts on behalf of a player carry that player's 2-digit identity
//! between the delimiter and the tag, e.g. `+03p01230456`.

use thiserror::Error;

mod buffer;
mod frame;
mod values;

pub use buffer::FrameBuffer;
pub use frame::{ClientFrame, ServerFrame};
pub use values::{
    Attribute, AttributeValue, Colour, Direction, Health, Identity, Kills, LaserId, Name, Position,
};

pub const DELIMITER: char = '+';

/// Inclusive upper bound of the playfield on both axes.
pub const PLAYFIELD_MAX: i32 = 999;
/// Distance a laser travels per tick.
pub const LASER_SPEED: i32 = 5;
/// Identities 00..=98 may be handed out.
pub const MAX_PLAYERS: usize = 99;
/// Laser ids 000..=998 may be handed out.
pub const MAX_LASERS: usize = 999;

pub const NAME_WIDTH: usize = 8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty frame")]
    Empty,
    #[error("frame is not ASCII")]
    NotAscii,
    #[error("unknown tag '{0}'")]
    UnknownTag(char),
    #[error("frame '{tag}' expects {expected} payload bytes, got {found}")]
    Length {
        tag: char,
        expected: usize,
        found: usize,
    },
    #[error("non-digit in numeric field {0:?}")]
    NotNumeric(String),
    #[error("{field} value {value} out of range")]
    OutOfRange { field: &'static str, value: i64 },
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("unknown laser direction '{0}'")]
    UnknownDirection(char),
}

/// Payload width for a tag, not counting the tag or an identity prefix.
///
/// Names may arrive shorter than this when a client strips the padding.
pub fn payload_width(tag: char) -> Option<usize> {
    match tag {
        'n' => Some(NAME_WIDTH),
        'c' => Some(9),
        'h' => Some(3),
        'p' => Some(8),
        'k' => Some(2),
        'l' => Some(9),
        'v' => Some(22),
        'o' => Some(3),
        'x' | 'u' | 'z' => Some(0),
        _ => None,
    }
}

/// Parses a run of ASCII digits. Signs and whitespace are rejected since the
/// format has no room for them.
pub(crate) fn parse_digits(field: &str) -> Result<u32, ProtocolError> {
    if field.is_empty() || field.len() > 9 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::NotNumeric(field.to_string()));
    }
    field
        .parse()
        .map_err(|_| ProtocolError::NotNumeric(field.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_widths() {
        assert_eq!(payload_width('n'), Some(8));
        assert_eq!(payload_width('c'), Some(9));
        assert_eq!(payload_width('v'), Some(22));
        assert_eq!(payload_width('z'), Some(0));
        assert_eq!(payload_width('q'), None);
    }

    #[test]
    fn test_parse_digits() {
        assert_eq!(parse_digits("0042"), Ok(42));
        assert!(parse_digits("").is_err());
        assert!(parse_digits("-001").is_err());
        assert!(parse_digits(" 12").is_err());
        assert!(parse_digits("1a").is_err());
    }
}
