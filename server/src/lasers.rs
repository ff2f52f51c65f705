//! Laser projectiles.
//!
//! Lasers fly in a straight line at a fixed speed and die when they leave the
//! playfield or when any client reports them gone (after a hit). They are not
//! tied to their owner's connection; a laser fired by a player who has since
//! left keeps flying until it leaves the playfield.

use crate::players::Player;
use log::{debug, warn};
use shared::{Colour, Direction, Identity, LaserId, Position, ServerFrame, MAX_LASERS, PLAYFIELD_MAX};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Laser {
    laser_id: LaserId,
    owner: Identity,
    colour: Colour,
    x: i32,
    y: i32,
    direction: Direction,
}

impl Laser {
    /// Creates the laser already one step past `origin`.
    ///
    /// Clients time their hit detection on the first pushed position being
    /// one step ahead of where they fired, so this must stay.
    fn new(laser_id: LaserId, owner: Identity, colour: Colour, direction: Direction, origin: Position) -> Self {
        let mut laser = Self {
            laser_id,
            owner,
            colour,
            x: origin.x(),
            y: origin.y(),
            direction,
        };
        laser.advance();
        laser
    }

    pub fn advance(&mut self) {
        let (dx, dy) = self.direction.step();
        self.x += dx;
        self.y += dy;
    }

    pub fn in_bounds(&self) -> bool {
        (0..=PLAYFIELD_MAX).contains(&self.x) && (0..=PLAYFIELD_MAX).contains(&self.y)
    }

    pub fn laser_id(&self) -> LaserId {
        self.laser_id
    }

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn colour(&self) -> Colour {
        self.colour
    }

    pub fn position(&self) -> (i32, i32) {
        (self.x, self.y)
    }

    /// State push for clients; None while the position cannot be encoded.
    pub fn frame(&self) -> Option<ServerFrame> {
        let position = Position::new(self.x, self.y).ok()?;
        Some(ServerFrame::LaserState {
            laser_id: self.laser_id,
            owner: self.owner,
            colour: self.colour,
            position,
        })
    }
}

pub struct LaserRegistry {
    lasers: BTreeMap<LaserId, Laser>,
    capacity: usize,
}

impl LaserRegistry {
    pub fn new() -> Self {
        Self::with_capacity(MAX_LASERS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lasers: BTreeMap::new(),
            capacity: capacity.min(MAX_LASERS),
        }
    }

    /// Fires a laser for `owner`, taking the owner's current colour.
    ///
    /// Does nothing and returns None while the owner is not ready to play, or
    /// when every laser id is in use.
    pub fn spawn<C>(&mut self, owner: &Player<C>, direction: Direction, origin: Position) -> Option<LaserId> {
        if !owner.status() {
            return None;
        }
        let colour = owner.properties().colour?;

        let Some(laser_id) = self.free_id() else {
            warn!("Laser ids exhausted, dropping shot from player {}", owner.identity());
            return None;
        };

        let laser = Laser::new(laser_id, owner.identity(), colour, direction, origin);
        debug!(
            "Player {} fired laser {} {:?} from {}",
            owner.identity(),
            laser_id,
            direction,
            origin
        );
        self.lasers.insert(laser_id, laser);
        Some(laser_id)
    }

    fn free_id(&self) -> Option<LaserId> {
        (0..self.capacity)
            .filter_map(|value| LaserId::new(value as u16).ok())
            .find(|laser_id| !self.lasers.contains_key(laser_id))
    }

    /// Moves every laser one step, then drops those that left the playfield.
    pub fn tick(&mut self) -> Vec<LaserId> {
        for laser in self.lasers.values_mut() {
            laser.advance();
        }
        self.sweep()
    }

    /// Drops lasers outside the playfield without moving anything.
    pub fn sweep(&mut self) -> Vec<LaserId> {
        let gone: Vec<LaserId> = self
            .lasers
            .values()
            .filter(|laser| !laser.in_bounds())
            .map(Laser::laser_id)
            .collect();
        for laser_id in &gone {
            self.lasers.remove(laser_id);
        }
        gone
    }

    /// Removes a laser; returns false if it was already gone.
    pub fn remove(&mut self, laser_id: LaserId) -> bool {
        self.lasers.remove(&laser_id).is_some()
    }

    pub fn get(&self, laser_id: LaserId) -> Option<&Laser> {
        self.lasers.get(&laser_id)
    }

    /// Encoded state pushes for every live laser.
    pub fn frames(&self) -> Vec<String> {
        self.lasers
            .values()
            .filter_map(Laser::frame)
            .map(|frame| frame.encode())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lasers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lasers.is_empty()
    }
}

impl Default for LaserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
