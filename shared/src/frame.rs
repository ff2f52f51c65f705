use crate::values::{
    Attribute, AttributeValue, Colour, Direction, Health, Identity, LaserId, Name, Position,
};
use crate::{payload_width, ProtocolError, DELIMITER};
use serde::{Deserialize, Serialize};

/// Frames a client sends to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    Name(Name),
    Colour(Colour),
    Health(Health),
    Position(Position),
    Disconnect,
    SpawnLaser {
        direction: Direction,
        origin: Position,
    },
    LaserGone(LaserId),
    Kill {
        victim: Identity,
    },
}

impl ClientFrame {
    /// Wire form, delimiter included.
    pub fn encode(&self) -> String {
        match self {
            ClientFrame::Name(name) => format!("{DELIMITER}n{name}"),
            ClientFrame::Colour(colour) => format!("{DELIMITER}c{colour}"),
            ClientFrame::Health(health) => format!("{DELIMITER}h{health}"),
            ClientFrame::Position(position) => format!("{DELIMITER}p{position}"),
            ClientFrame::Disconnect => format!("{DELIMITER}x"),
            ClientFrame::SpawnLaser { direction, origin } => {
                format!("{DELIMITER}l{}{origin}", direction.as_char())
            }
            ClientFrame::LaserGone(laser_id) => format!("{DELIMITER}o{laser_id}"),
            ClientFrame::Kill { victim } => format!("{DELIMITER}k{victim}"),
        }
    }

    /// Decodes one frame; the leading delimiter is optional.
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let body = frame_body(frame)?;
        let (tag, payload) = split_tag(body)?;
        check_payload(tag, payload)?;

        match tag {
            'n' => Ok(ClientFrame::Name(payload.parse()?)),
            'c' => Ok(ClientFrame::Colour(payload.parse()?)),
            'h' => Ok(ClientFrame::Health(payload.parse()?)),
            'p' => Ok(ClientFrame::Position(payload.parse()?)),
            'x' => Ok(ClientFrame::Disconnect),
            'l' => {
                let (direction, origin) = payload.split_at(1);
                Ok(ClientFrame::SpawnLaser {
                    direction: Direction::from_char(direction.as_bytes()[0] as char)?,
                    origin: origin.parse()?,
                })
            }
            'o' => Ok(ClientFrame::LaserGone(payload.parse()?)),
            'k' => Ok(ClientFrame::Kill {
                victim: payload.parse()?,
            }),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }

    /// The attribute update carried by this frame, if it is one.
    pub fn attribute_value(&self) -> Option<AttributeValue> {
        match self {
            ClientFrame::Name(name) => Some(AttributeValue::Name(name.clone())),
            ClientFrame::Colour(colour) => Some(AttributeValue::Colour(*colour)),
            ClientFrame::Health(health) => Some(AttributeValue::Health(*health)),
            ClientFrame::Position(position) => Some(AttributeValue::Position(*position)),
            _ => None,
        }
    }
}

/// Frames the server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Another player's attribute, prefixed with that player's identity.
    Update {
        source: Identity,
        value: AttributeValue,
    },
    PlayerGone {
        source: Identity,
    },
    Heartbeat,
    Disconnect,
    LaserState {
        laser_id: LaserId,
        owner: Identity,
        colour: Colour,
        position: Position,
    },
    LaserGone(LaserId),
}

impl ServerFrame {
    pub fn encode(&self) -> String {
        match self {
            ServerFrame::Update { source, value } => {
                format!("{DELIMITER}{source}{}{value}", value.attribute().tag())
            }
            ServerFrame::PlayerGone { source } => format!("{DELIMITER}{source}z"),
            ServerFrame::Heartbeat => format!("{DELIMITER}u"),
            ServerFrame::Disconnect => format!("{DELIMITER}x"),
            ServerFrame::LaserState {
                laser_id,
                owner,
                colour,
                position,
            } => format!("{DELIMITER}v{laser_id}{owner}{colour}{position}"),
            ServerFrame::LaserGone(laser_id) => format!("{DELIMITER}o{laser_id}"),
        }
    }

    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        let body = frame_body(frame)?;
        let prefixed = body.len() >= 2 && body.as_bytes()[..2].iter().all(u8::is_ascii_digit);

        if prefixed {
            let source: Identity = body[..2].parse()?;
            let (tag, payload) = split_tag(&body[2..])?;
            check_payload(tag, payload)?;
            if tag == 'z' {
                return Ok(ServerFrame::PlayerGone { source });
            }
            let attribute = Attribute::from_tag(tag).ok_or(ProtocolError::UnknownTag(tag))?;
            return Ok(ServerFrame::Update {
                source,
                value: AttributeValue::parse(attribute, payload)?,
            });
        }

        let (tag, payload) = split_tag(body)?;
        check_payload(tag, payload)?;
        match tag {
            'u' => Ok(ServerFrame::Heartbeat),
            'x' => Ok(ServerFrame::Disconnect),
            'v' => Ok(ServerFrame::LaserState {
                laser_id: payload[..3].parse()?,
                owner: payload[3..5].parse()?,
                colour: payload[5..14].parse()?,
                position: payload[14..].parse()?,
            }),
            'o' => Ok(ServerFrame::LaserGone(payload.parse()?)),
            other => Err(ProtocolError::UnknownTag(other)),
        }
    }
}

fn frame_body(frame: &str) -> Result<&str, ProtocolError> {
    if !frame.is_ascii() {
        return Err(ProtocolError::NotAscii);
    }
    let body = frame.strip_prefix(DELIMITER).unwrap_or(frame);
    if body.is_empty() {
        return Err(ProtocolError::Empty);
    }
    Ok(body)
}

fn split_tag(body: &str) -> Result<(char, &str), ProtocolError> {
    let tag = *body.as_bytes().first().ok_or(ProtocolError::Empty)? as char;
    Ok((tag, &body[1..]))
}

fn check_payload(tag: char, payload: &str) -> Result<(), ProtocolError> {
    let Some(expected) = payload_width(tag) else {
        return Err(ProtocolError::UnknownTag(tag));
    };
    let fits = if tag == 'n' {
        (1..=expected).contains(&payload.len())
    } else {
        payload.len() == expected
    };
    if !fits {
        return Err(ProtocolError::Length {
            tag,
            expected,
            found: payload.len(),
        });
    }
    Ok(())
}
