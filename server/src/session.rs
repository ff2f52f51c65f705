//! Session lifecycle: frame dispatch, kills, removal and the output pass.
//!
//! The session composes the player registry and the laser registry and is
//! the only place that mutates them. The network layer feeds it raw frames
//! per identity and asks it to flush output for the connections that are
//! ready to take it.

use crate::connection::Connection;
use crate::diff;
use crate::error::SessionError;
use crate::lasers::LaserRegistry;
use crate::players::{PlayerRegistry, PlayerSummary, RemovalReason};
use log::{debug, info};
use shared::{AttributeValue, ClientFrame, Identity, LaserId, ServerFrame};
use std::io;

pub struct Session<C> {
    players: PlayerRegistry<C>,
    lasers: LaserRegistry,
}

impl<C: Connection> Session<C> {
    pub fn new(max_players: usize) -> Self {
        Self::with_registries(PlayerRegistry::new(max_players), LaserRegistry::new())
    }

    pub fn with_registries(players: PlayerRegistry<C>, lasers: LaserRegistry) -> Self {
        Self { players, lasers }
    }

    /// Registers a freshly accepted connection.
    pub fn connect(&mut self, connection: C) -> Result<Identity, SessionError> {
        self.players.connect(connection)
    }

    /// Decodes and applies one raw frame sent by `identity`.
    ///
    /// A frame that fails to decode is discarded; the caller logs the error
    /// and carries on with the rest of the batch.
    pub fn handle_frame(&mut self, identity: Identity, raw: &str) -> Result<(), SessionError> {
        let frame = ClientFrame::decode(raw).map_err(|source| SessionError::Malformed {
            frame: raw.to_string(),
            source,
        })?;
        self.dispatch(identity, frame)
    }

    pub fn dispatch(&mut self, identity: Identity, frame: ClientFrame) -> Result<(), SessionError> {
        if !self.players.contains(identity) {
            return Err(SessionError::UnknownPlayer(identity));
        }

        match frame {
            ClientFrame::Name(name) => self.players.apply(identity, AttributeValue::Name(name)),
            ClientFrame::Colour(colour) => {
                self.players.apply(identity, AttributeValue::Colour(colour))
            }
            ClientFrame::Health(health) => {
                self.players.apply(identity, AttributeValue::Health(health))
            }
            ClientFrame::Position(position) => {
                self.players.apply(identity, AttributeValue::Position(position))
            }
            ClientFrame::SpawnLaser { direction, origin } => {
                if let Some(owner) = self.players.get(identity) {
                    self.lasers.spawn(owner, direction, origin);
                }
                Ok(())
            }
            ClientFrame::LaserGone(laser_id) => {
                self.remove_laser(laser_id);
                Ok(())
            }
            ClientFrame::Kill { victim } => self.kill(identity, victim),
            ClientFrame::Disconnect => {
                self.players.remove(identity, RemovalReason::ClientQuit);
                Ok(())
            }
        }
    }

    /// `killer` reports having shot `victim`.
    ///
    /// The victim keeps its connection but loses every attribute until it
    /// announces them again. Reporting yourself only resets you.
    fn kill(&mut self, killer: Identity, victim: Identity) -> Result<(), SessionError> {
        if !self.players.contains(victim) {
            return Err(SessionError::UnknownPlayer(victim));
        }

        self.players.reset(victim)?;
        if killer == victim {
            info!("Player {} took themselves out", victim);
            return Ok(());
        }

        let kills = self.players.record_kill(killer)?;
        info!("Player {} killed player {} ({} kills)", killer, victim, kills);
        Ok(())
    }

    /// Removes a laser and tells every player it is gone.
    pub fn remove_laser(&mut self, laser_id: LaserId) -> bool {
        if !self.lasers.remove(laser_id) {
            return false;
        }
        self.announce_lasers_gone(&[laser_id]);
        true
    }

    /// Moves every laser one step; returns the ids that left the playfield.
    pub fn advance_lasers(&mut self) -> Vec<LaserId> {
        let gone = self.lasers.tick();
        self.announce_lasers_gone(&gone);
        gone
    }

    /// Drops lasers that are already outside the playfield.
    pub fn sweep_lasers(&mut self) -> Vec<LaserId> {
        let gone = self.lasers.sweep();
        self.announce_lasers_gone(&gone);
        gone
    }

    fn announce_lasers_gone(&mut self, gone: &[LaserId]) {
        if gone.is_empty() {
            return;
        }
        debug!("Lasers gone: {:?}", gone);
        for player in self.players.iter_mut() {
            for laser_id in gone {
                player.pending_mut().schedule_laser_gone(*laser_id);
            }
        }
    }

    /// One output pass over `observers`.
    ///
    /// Each observer gets the heartbeat, the state of every live laser, then
    /// whatever the diff queue owes it. Observers whose transport failed are
    /// returned with the error; the caller removes them once the pass is over.
    pub fn flush_outbound(&mut self, observers: &[Identity]) -> Vec<(Identity, io::Error)> {
        let heartbeat = ServerFrame::Heartbeat.encode();
        let laser_frames = self.lasers.frames();

        let mut failed = Vec::new();
        for &observer in observers {
            if let Err(e) = self.flush_to(observer, &heartbeat, &laser_frames) {
                failed.push((observer, e));
            }
        }
        failed
    }

    fn flush_to(&mut self, observer: Identity, heartbeat: &str, laser_frames: &[String]) -> io::Result<()> {
        let Some(player) = self.players.get_mut(observer) else {
            return Ok(());
        };

        let connection = player.connection_mut();
        connection.send(heartbeat.as_bytes())?;
        for frame in laser_frames {
            connection.send(frame.as_bytes())?;
        }

        diff::deliver(&mut self.players, observer)?;
        Ok(())
    }

    pub fn disconnect(&mut self, identity: Identity, reason: RemovalReason) -> bool {
        self.players.remove(identity, reason)
    }

    pub fn kick(&mut self, identity: Identity) -> bool {
        self.players.remove(identity, RemovalReason::Kicked)
    }

    pub fn list_players(&self) -> Vec<PlayerSummary> {
        self.players.summaries()
    }

    /// Says goodbye to every player; returns how many were connected.
    pub fn shutdown(&mut self) -> usize {
        let identities = self.players.identities();
        for identity in &identities {
            self.players.remove(*identity, RemovalReason::Shutdown);
        }
        identities.len()
    }

    pub fn connection_mut(&mut self, identity: Identity) -> Option<&mut C> {
        self.players
            .get_mut(identity)
            .map(|player| player.connection_mut())
    }

    pub fn players(&self) -> &PlayerRegistry<C> {
        &self.players
    }

    pub fn lasers(&self) -> &LaserRegistry {
        &self.lasers
    }
}
