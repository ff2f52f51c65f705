use crate::{parse_digits, ProtocolError, LASER_SPEED, NAME_WIDTH, PLAYFIELD_MAX};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Two digit player identity, `00`..=`99` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity(u8);

impl Identity {
    pub fn new(value: u8) -> Result<Self, ProtocolError> {
        if value > 99 {
            return Err(ProtocolError::OutOfRange {
                field: "identity",
                value: value.into(),
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Identity {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('#', s, 2)?;
        Ok(Self(parse_digits(s)? as u8))
    }
}

/// Three digit laser id, `000`..=`999` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LaserId(u16);

impl LaserId {
    pub fn new(value: u16) -> Result<Self, ProtocolError> {
        if value > 999 {
            return Err(ProtocolError::OutOfRange {
                field: "laser id",
                value: value.into(),
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for LaserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for LaserId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('o', s, 3)?;
        Ok(Self(parse_digits(s)? as u16))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Colour {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn rgb(self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}{:03}{:03}", self.r, self.g, self.b)
    }
}

impl FromStr for Colour {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('c', s, 9)?;
        let channel = |range: std::ops::Range<usize>| -> Result<u8, ProtocolError> {
            let value = parse_digits(&s[range])?;
            u8::try_from(value).map_err(|_| ProtocolError::OutOfRange {
                field: "colour",
                value: value.into(),
            })
        };
        Ok(Self {
            r: channel(0..3)?,
            g: channel(3..6)?,
            b: channel(6..9)?,
        })
    }
}

/// A point that fits the 4+4 digit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    x: u16,
    y: u16,
}

impl Position {
    pub const MAX_COORD: i32 = 9999;

    /// Rejects coordinates the format cannot carry; there is no sign digit.
    pub fn new(x: i32, y: i32) -> Result<Self, ProtocolError> {
        for value in [x, y] {
            if !(0..=Self::MAX_COORD).contains(&value) {
                return Err(ProtocolError::OutOfRange {
                    field: "position",
                    value: value.into(),
                });
            }
        }
        Ok(Self {
            x: x as u16,
            y: y as u16,
        })
    }

    pub fn x(self) -> i32 {
        self.x.into()
    }

    pub fn y(self) -> i32 {
        self.y.into()
    }

    pub fn in_playfield(self) -> bool {
        self.x() <= PLAYFIELD_MAX && self.y() <= PLAYFIELD_MAX
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:04}", self.x, self.y)
    }
}

impl FromStr for Position {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('p', s, 8)?;
        Self::new(parse_digits(&s[..4])? as i32, parse_digits(&s[4..])? as i32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Health(u16);

impl Health {
    pub fn new(value: u16) -> Result<Self, ProtocolError> {
        if value > 999 {
            return Err(ProtocolError::OutOfRange {
                field: "health",
                value: value.into(),
            });
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u16 {
        self.0
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl FromStr for Health {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('h', s, 3)?;
        Ok(Self(parse_digits(s)? as u16))
    }
}

/// Kill count as broadcast; two digits, so counts above 99 are shown as 99.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Kills(u8);

impl Kills {
    pub fn saturating(count: u32) -> Self {
        Self(count.min(99) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Kills {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Kills {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        expect_len('k', s, 2)?;
        Ok(Self(parse_digits(s)? as u8))
    }
}

/// Player name of one to eight printable characters, stored without padding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name(String);

impl Name {
    pub fn new(name: &str) -> Result<Self, ProtocolError> {
        let trimmed = name.trim_end_matches(' ');
        let printable = trimmed
            .chars()
            .all(|c| c == ' ' || (c.is_ascii_graphic() && c != crate::DELIMITER));
        if trimmed.is_empty() || trimmed.len() > NAME_WIDTH || !printable {
            return Err(ProtocolError::InvalidName(name.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<width$}", self.0, width = NAME_WIDTH)
    }
}

impl FromStr for Name {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_char(self) -> char {
        match self {
            Direction::Up => 'w',
            Direction::Down => 's',
            Direction::Left => 'a',
            Direction::Right => 'd',
        }
    }

    pub fn from_char(c: char) -> Result<Self, ProtocolError> {
        match c {
            'w' => Ok(Direction::Up),
            's' => Ok(Direction::Down),
            'a' => Ok(Direction::Left),
            'd' => Ok(Direction::Right),
            other => Err(ProtocolError::UnknownDirection(other)),
        }
    }

    /// Per-tick displacement in playfield coordinates (y grows downwards).
    pub fn step(self) -> (i32, i32) {
        match self {
            Direction::Up => (0, -LASER_SPEED),
            Direction::Down => (0, LASER_SPEED),
            Direction::Left => (-LASER_SPEED, 0),
            Direction::Right => (LASER_SPEED, 0),
        }
    }
}

/// The player attributes that are synchronised between clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Attribute {
    Colour,
    Name,
    Position,
    Health,
    Kills,
}

impl Attribute {
    /// Attributes a player must provide before it may play.
    pub const REQUIRED: [Attribute; 4] = [
        Attribute::Colour,
        Attribute::Name,
        Attribute::Position,
        Attribute::Health,
    ];

    pub fn tag(self) -> char {
        match self {
            Attribute::Colour => 'c',
            Attribute::Name => 'n',
            Attribute::Position => 'p',
            Attribute::Health => 'h',
            Attribute::Kills => 'k',
        }
    }

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'c' => Some(Attribute::Colour),
            'n' => Some(Attribute::Name),
            'p' => Some(Attribute::Position),
            'h' => Some(Attribute::Health),
            'k' => Some(Attribute::Kills),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    Colour(Colour),
    Name(Name),
    Position(Position),
    Health(Health),
    Kills(Kills),
}

impl AttributeValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::Colour(_) => Attribute::Colour,
            AttributeValue::Name(_) => Attribute::Name,
            AttributeValue::Position(_) => Attribute::Position,
            AttributeValue::Health(_) => Attribute::Health,
            AttributeValue::Kills(_) => Attribute::Kills,
        }
    }

    pub fn parse(attribute: Attribute, payload: &str) -> Result<Self, ProtocolError> {
        Ok(match attribute {
            Attribute::Colour => AttributeValue::Colour(payload.parse()?),
            Attribute::Name => AttributeValue::Name(payload.parse()?),
            Attribute::Position => AttributeValue::Position(payload.parse()?),
            Attribute::Health => AttributeValue::Health(payload.parse()?),
            Attribute::Kills => AttributeValue::Kills(payload.parse()?),
        })
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Colour(colour) => write!(f, "{colour}"),
            AttributeValue::Name(name) => write!(f, "{name}"),
            AttributeValue::Position(position) => write!(f, "{position}"),
            AttributeValue::Health(health) => write!(f, "{health}"),
            AttributeValue::Kills(kills) => write!(f, "{kills}"),
        }
    }
}

fn expect_len(tag: char, s: &str, expected: usize) -> Result<(), ProtocolError> {
    if !s.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    if s.len() != expected {
        return Err(ProtocolError::Length {
            tag,
            expected,
            found: s.len(),
        });
    }
    Ok(())
}
