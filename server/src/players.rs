//! Connected players and identity allocation.
//!
//! This module owns every connected player together with its transport:
//! - Identity allocation (smallest free 2-digit id) and reclamation
//! - Attribute updates and the derived ready status
//! - Scheduling diffs into the other players' outbound queues
//! - Removal, which closes the transport and announces the departure
//!
//! Identities are reused as soon as their holder leaves, so a newcomer can
//! inherit the id of a player that disconnected a moment ago. The diff queue
//! handles that by keeping tags queued after a removal notice.

use crate::connection::Connection;
use crate::diff::PendingUpdates;
use crate::error::SessionError;
use log::{debug, info};
use serde::Serialize;
use shared::{
    Attribute, AttributeValue, Colour, Health, Identity, Kills, Name, Position, ServerFrame,
    MAX_PLAYERS,
};
use std::collections::BTreeMap;
use std::fmt;

/// Everything a new player is told about an existing one and vice versa.
const BOOTSTRAP: [Attribute; 5] = [
    Attribute::Colour,
    Attribute::Name,
    Attribute::Position,
    Attribute::Health,
    Attribute::Kills,
];

/// Last known attribute values of a player.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    pub colour: Option<Colour>,
    pub name: Option<Name>,
    pub position: Option<Position>,
    pub health: Option<Health>,
    pub kills: u32,
}

impl Properties {
    /// Current value of `attribute`, or None while it is unset.
    ///
    /// A kill count of zero counts as unset, so it is never broadcast.
    pub fn value(&self, attribute: Attribute) -> Option<AttributeValue> {
        match attribute {
            Attribute::Colour => self.colour.map(AttributeValue::Colour),
            Attribute::Name => self.name.clone().map(AttributeValue::Name),
            Attribute::Position => self.position.map(AttributeValue::Position),
            Attribute::Health => self.health.map(AttributeValue::Health),
            Attribute::Kills => {
                (self.kills > 0).then(|| AttributeValue::Kills(Kills::saturating(self.kills)))
            }
        }
    }

    pub fn set(&mut self, value: AttributeValue) {
        match value {
            AttributeValue::Colour(colour) => self.colour = Some(colour),
            AttributeValue::Name(name) => self.name = Some(name),
            AttributeValue::Position(position) => self.position = Some(position),
            AttributeValue::Health(health) => self.health = Some(health),
            AttributeValue::Kills(kills) => self.kills = kills.value().into(),
        }
    }

    /// True once colour, name, position and health are all known.
    pub fn is_ready(&self) -> bool {
        self.colour.is_some() && self.name.is_some() && self.position.is_some() && self.health.is_some()
    }

    /// Forgets everything but the kill count.
    pub fn reset(&mut self) {
        *self = Self {
            kills: self.kills,
            ..Self::default()
        };
    }
}

#[derive(Debug)]
pub struct Player<C> {
    identity: Identity,
    properties: Properties,
    connection: C,
    pending: PendingUpdates,
}

impl<C> Player<C> {
    fn new(identity: Identity, connection: C) -> Self {
        Self {
            identity,
            properties: Properties::default(),
            connection,
            pending: PendingUpdates::new(),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn status(&self) -> bool {
        self.properties.is_ready()
    }

    pub fn colour_rgb(&self) -> Option<(u8, u8, u8)> {
        self.properties.colour.map(Colour::rgb)
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn pending(&self) -> &PendingUpdates {
        &self.pending
    }

    pub fn pending_mut(&mut self) -> &mut PendingUpdates {
        &mut self.pending
    }
}

/// Row of the administrative player listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayerSummary {
    pub identity: Identity,
    pub name: Option<String>,
    pub colour: Option<(u8, u8, u8)>,
    pub health: Option<u16>,
    pub kills: u32,
    pub status: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    ClientQuit,
    ConnectionLost,
    Kicked,
    Shutdown,
}

impl fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            RemovalReason::ClientQuit => "quit",
            RemovalReason::ConnectionLost => "connection lost",
            RemovalReason::Kicked => "kicked",
            RemovalReason::Shutdown => "server shutdown",
        };
        f.write_str(reason)
    }
}

pub struct PlayerRegistry<C> {
    players: BTreeMap<Identity, Player<C>>,
    capacity: usize,
}

impl<C: Connection> PlayerRegistry<C> {
    /// Creates an empty registry; capacity is capped at the 99 wire identities.
    pub fn new(capacity: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            capacity: capacity.min(MAX_PLAYERS),
        }
    }

    /// Registers a new connection under the smallest free identity.
    ///
    /// Existing players and the newcomer are queued each other's full state.
    /// When every identity is taken the connection is told to go away and
    /// closed.
    pub fn connect(&mut self, mut connection: C) -> Result<Identity, SessionError> {
        let Some(identity) = self.free_identity() else {
            let _ = connection.send(ServerFrame::Disconnect.encode().as_bytes());
            connection.close();
            return Err(SessionError::CapacityExhausted(self.capacity));
        };

        let mut player = Player::new(identity, connection);
        for other in self.players.values_mut() {
            other.pending.schedule_all(identity, &BOOTSTRAP);
            player.pending.schedule_all(other.identity, &BOOTSTRAP);
        }

        info!("Player {} connected ({} online)", identity, self.players.len() + 1);
        self.players.insert(identity, player);
        Ok(identity)
    }

    fn free_identity(&self) -> Option<Identity> {
        (0..self.capacity)
            .filter_map(|value| Identity::new(value as u8).ok())
            .find(|identity| !self.players.contains_key(identity))
    }

    /// Stores a new attribute value and queues it for every other player.
    pub fn apply(&mut self, identity: Identity, value: AttributeValue) -> Result<(), SessionError> {
        let attribute = value.attribute();
        let player = self
            .players
            .get_mut(&identity)
            .ok_or(SessionError::UnknownPlayer(identity))?;
        player.properties.set(value);

        for other in self.players.values_mut() {
            if other.identity != identity {
                other.pending.schedule(identity, attribute);
            }
        }
        Ok(())
    }

    /// Clears a player's attributes while keeping its connection open.
    pub fn reset(&mut self, identity: Identity) -> Result<(), SessionError> {
        let player = self
            .players
            .get_mut(&identity)
            .ok_or(SessionError::UnknownPlayer(identity))?;
        player.properties.reset();
        Ok(())
    }

    /// Credits a kill and queues the new count for everyone, the killer included.
    pub fn record_kill(&mut self, identity: Identity) -> Result<u32, SessionError> {
        let player = self
            .players
            .get_mut(&identity)
            .ok_or(SessionError::UnknownPlayer(identity))?;
        player.properties.kills += 1;
        let kills = player.properties.kills;

        for other in self.players.values_mut() {
            other.pending.schedule(identity, Attribute::Kills);
        }
        Ok(kills)
    }

    /// Disconnects a player and announces it to the rest.
    ///
    /// Returns false if the identity is not connected. A broken transport is
    /// not an error here; the goodbye frame is best effort.
    pub fn remove(&mut self, identity: Identity, reason: RemovalReason) -> bool {
        let Some(mut player) = self.players.remove(&identity) else {
            return false;
        };

        if let Err(e) = player.connection.send(ServerFrame::Disconnect.encode().as_bytes()) {
            debug!("Could not say goodbye to player {}: {}", identity, e);
        }
        player.connection.close();

        for other in self.players.values_mut() {
            other.pending.schedule_removal(identity);
        }

        info!("Player {} removed: {}", identity, reason);
        true
    }

    pub fn get(&self, identity: Identity) -> Option<&Player<C>> {
        self.players.get(&identity)
    }

    pub fn get_mut(&mut self, identity: Identity) -> Option<&mut Player<C>> {
        self.players.get_mut(&identity)
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.players.contains_key(&identity)
    }

    /// Snapshot of the connected identities, in ascending order.
    pub fn identities(&self) -> Vec<Identity> {
        self.players.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Player<C>> {
        self.players.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Player<C>> {
        self.players.values_mut()
    }

    pub fn summaries(&self) -> Vec<PlayerSummary> {
        self.players
            .values()
            .map(|player| PlayerSummary {
                identity: player.identity,
                name: player.properties.name.as_ref().map(|name| name.as_str().to_string()),
                colour: player.colour_rgb(),
                health: player.properties.health.map(Health::value),
                kills: player.properties.kills,
                status: player.status(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::testing::RecordingConnection;
    use crate::diff::Pending;
    use std::collections::BTreeSet;

    fn id(value: u8) -> Identity {
        Identity::new(value).unwrap()
    }

    fn ready_player(registry: &mut PlayerRegistry<RecordingConnection>, identity: Identity) {
        for value in [
            AttributeValue::Colour(Colour::new(0, 225, 0)),
            AttributeValue::Name(Name::new("Oliver").unwrap()),
            AttributeValue::Position(Position::new(100, 200).unwrap()),
            AttributeValue::Health(Health::new(10).unwrap()),
        ] {
            registry.apply(identity, value).unwrap();
        }
    }

    #[test]
    fn test_sequential_identities_are_distinct() {
        let mut registry = PlayerRegistry::new(MAX_PLAYERS);
        let ids: Vec<Identity> = (0..12)
            .map(|_| registry.connect(RecordingConnection::new()).unwrap())
            .collect();

        let rendered: Vec<String> = ids.iter().map(ToString::to_string).collect();
        assert_eq!(rendered[0], "00");
        assert_eq!(rendered[11], "11");
        let unique: BTreeSet<&String> = rendered.iter().collect();
        assert_eq!(unique.len(), 12);
        assert!(rendered.iter().all(|id| id.len() == 2));
    }

    #[test]
    fn test_freed_identity_is_reused_first() {
        let mut registry = PlayerRegistry::new(MAX_PLAYERS);
        for _ in 0..5 {
            registry.connect(RecordingConnection::new()).unwrap();
        }

        assert!(registry.remove(id(2), RemovalReason::ClientQuit));
        assert_eq!(registry.connect(RecordingConnection::new()).unwrap(), id(2));
        assert_eq!(registry.connect(RecordingConnection::new()).unwrap(), id(5));
    }

    #[test]
    fn test_capacity_exhausted_closes_connection() {
        let mut registry = PlayerRegistry::new(2);
        registry.connect(RecordingConnection::new()).unwrap();
        registry.connect(RecordingConnection::new()).unwrap();

        let rejected = RecordingConnection::new();
        let result = registry.connect(rejected.clone());
        assert!(matches!(result, Err(SessionError::CapacityExhausted(2))));
        assert_eq!(rejected.close_count(), 1);
        assert_eq!(rejected.take_frames(), vec!["x"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity_is_capped_by_wire_format() {
        let registry: PlayerRegistry<RecordingConnection> = PlayerRegistry::new(500);
        assert_eq!(registry.capacity(), MAX_PLAYERS);
    }

    #[test]
    fn test_bootstrap_schedules_both_ways() {
        let mut registry = PlayerRegistry::new(8);
        let a = registry.connect(RecordingConnection::new()).unwrap();
        let b = registry.connect(RecordingConnection::new()).unwrap();

        let expected: Vec<Pending> = BOOTSTRAP.iter().copied().map(Pending::Attribute).collect();
        assert_eq!(registry.get(a).unwrap().pending().pending_for(b), expected);
        assert_eq!(registry.get(b).unwrap().pending().pending_for(a), expected);
    }

    #[test]
    fn test_apply_updates_status_and_queues() {
        let mut registry = PlayerRegistry::new(8);
        let a = registry.connect(RecordingConnection::new()).unwrap();
        let b = registry.connect(RecordingConnection::new()).unwrap();
        let c = registry.connect(RecordingConnection::new()).unwrap();

        assert!(!registry.get(a).unwrap().status());
        ready_player(&mut registry, a);

        let player = registry.get(a).unwrap();
        assert!(player.status());
        assert_eq!(player.colour_rgb(), Some((0, 225, 0)));
        assert!(player.pending().pending_for(a).is_empty());
        assert_eq!(registry.get(b).unwrap().pending().pending_for(a).len(), 5);
        assert_eq!(registry.get(c).unwrap().pending().pending_for(a).len(), 5);
    }

    #[test]
    fn test_apply_unknown_identity() {
        let mut registry: PlayerRegistry<RecordingConnection> = PlayerRegistry::new(8);
        let result = registry.apply(id(7), AttributeValue::Health(Health::new(1).unwrap()));
        assert!(matches!(result, Err(SessionError::UnknownPlayer(_))));
    }

    #[test]
    fn test_reset_keeps_kills() {
        let mut registry = PlayerRegistry::new(8);
        let a = registry.connect(RecordingConnection::new()).unwrap();
        ready_player(&mut registry, a);
        registry.record_kill(a).unwrap();

        registry.reset(a).unwrap();
        let player = registry.get(a).unwrap();
        assert!(!player.status());
        assert_eq!(player.properties().kills, 1);
        assert_eq!(player.colour_rgb(), None);
    }

    #[test]
    fn test_record_kill_queues_everyone() {
        let mut registry = PlayerRegistry::new(8);
        let a = registry.connect(RecordingConnection::new()).unwrap();
        let b = registry.connect(RecordingConnection::new()).unwrap();

        assert_eq!(registry.record_kill(b).unwrap(), 1);
        assert_eq!(registry.record_kill(b).unwrap(), 2);
        assert!(registry
            .get(b)
            .unwrap()
            .pending()
            .pending_for(b)
            .contains(&Pending::Attribute(Attribute::Kills)));
        assert!(registry
            .get(a)
            .unwrap()
            .pending()
            .pending_for(b)
            .contains(&Pending::Attribute(Attribute::Kills)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = PlayerRegistry::new(8);
        let watcher = registry.connect(RecordingConnection::new()).unwrap();
        let leaver_conn = RecordingConnection::new();
        let leaver = registry.connect(leaver_conn.clone()).unwrap();

        assert!(registry.remove(leaver, RemovalReason::Kicked));
        assert!(!registry.remove(leaver, RemovalReason::Kicked));

        assert_eq!(leaver_conn.close_count(), 1);
        assert_eq!(leaver_conn.take_frames(), vec!["x"]);
        assert_eq!(
            registry.get(watcher).unwrap().pending().pending_for(leaver),
            &[Pending::Removed]
        );
    }

    #[test]
    fn test_remove_broken_connection() {
        let mut registry = PlayerRegistry::new(8);
        let conn = RecordingConnection::new();
        let identity = registry.connect(conn.clone()).unwrap();
        conn.fail_after(0);

        assert!(registry.remove(identity, RemovalReason::ConnectionLost));
        assert_eq!(conn.close_count(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_summaries() {
        let mut registry = PlayerRegistry::new(8);
        let a = registry.connect(RecordingConnection::new()).unwrap();
        let b = registry.connect(RecordingConnection::new()).unwrap();
        ready_player(&mut registry, a);

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(
            summaries[0],
            PlayerSummary {
                identity: a,
                name: Some("Oliver".to_string()),
                colour: Some((0, 225, 0)),
                health: Some(10),
                kills: 0,
                status: true,
            }
        );
        assert_eq!(summaries[1].identity, b);
        assert!(!summaries[1].status);
    }
}
