//! Per-observer queue of updates that still have to be delivered.
//!
//! Each player keeps, for every other player it watches, the list of
//! attributes whose latest value it has not received yet. Changing an
//! attribute only queues the tag; the value itself is read at delivery time,
//! so a burst of position updates between two output passes costs one frame.

use crate::connection::Connection;
use crate::players::PlayerRegistry;
use shared::{Attribute, Identity, LaserId, ServerFrame};
use std::collections::BTreeMap;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Attribute(Attribute),
    /// The subject left; sent as a `z` frame regardless of any value.
    Removed,
}

/// What a delivered frame settles in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Subject(Identity, Pending),
    LaserGone(LaserId),
}

#[derive(Debug, Default)]
pub struct PendingUpdates {
    subjects: BTreeMap<Identity, Vec<Pending>>,
    lasers_gone: Vec<LaserId>,
}

impl PendingUpdates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `attribute` of `subject` unless it is already queued.
    pub fn schedule(&mut self, subject: Identity, attribute: Attribute) {
        let tags = self.subjects.entry(subject).or_default();
        let pending = Pending::Attribute(attribute);
        if !tags.contains(&pending) {
            tags.push(pending);
        }
    }

    pub fn schedule_all(&mut self, subject: Identity, attributes: &[Attribute]) {
        for attribute in attributes {
            self.schedule(subject, *attribute);
        }
    }

    /// Replaces everything queued for `subject` with a removal notice.
    pub fn schedule_removal(&mut self, subject: Identity) {
        self.subjects.insert(subject, vec![Pending::Removed]);
    }

    pub fn schedule_laser_gone(&mut self, laser_id: LaserId) {
        if !self.lasers_gone.contains(&laser_id) {
            self.lasers_gone.push(laser_id);
        }
    }

    pub fn pending_for(&self, subject: Identity) -> &[Pending] {
        self.subjects.get(&subject).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lasers_gone(&self) -> &[LaserId] {
        &self.lasers_gone
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty() && self.lasers_gone.is_empty()
    }

    /// Drops an entry after its frame went out.
    ///
    /// A delivered removal also drops whatever was queued before it; tags
    /// queued after it belong to a new player holding the reused identity.
    pub fn acknowledge(&mut self, entry: Entry) {
        let (subject, pending) = match entry {
            Entry::LaserGone(laser_id) => {
                self.lasers_gone.retain(|id| *id != laser_id);
                return;
            }
            Entry::Subject(subject, pending) => (subject, pending),
        };

        let Some(tags) = self.subjects.get_mut(&subject) else {
            return;
        };
        match pending {
            Pending::Removed => {
                if let Some(index) = tags.iter().position(|tag| *tag == Pending::Removed) {
                    tags.drain(..=index);
                }
            }
            Pending::Attribute(_) => tags.retain(|tag| *tag != pending),
        }
        if tags.is_empty() {
            self.subjects.remove(&subject);
        }
    }
}

/// Frames currently owed to `observer`, in delivery order.
///
/// Attributes whose value is still unset are skipped and stay queued, so a
/// frame with an empty payload is never produced.
pub fn outbound_frames<C: Connection>(players: &PlayerRegistry<C>, observer: Identity) -> Vec<(Entry, String)> {
    let Some(player) = players.get(observer) else {
        return Vec::new();
    };

    let mut frames: Vec<(Entry, String)> = player
        .pending()
        .lasers_gone
        .iter()
        .map(|laser_id| {
            (
                Entry::LaserGone(*laser_id),
                ServerFrame::LaserGone(*laser_id).encode(),
            )
        })
        .collect();

    for (subject, tags) in &player.pending().subjects {
        for pending in tags {
            let frame = match pending {
                Pending::Removed => Some(ServerFrame::PlayerGone { source: *subject }),
                Pending::Attribute(attribute) => players
                    .get(*subject)
                    .and_then(|source| source.properties().value(*attribute))
                    .map(|value| ServerFrame::Update {
                        source: *subject,
                        value,
                    }),
            };
            if let Some(frame) = frame {
                frames.push((Entry::Subject(*subject, *pending), frame.encode()));
            }
        }
    }

    frames
}

/// Sends everything owed to `observer` over its own connection.
///
/// Stops at the first write error and returns it; entries not yet written
/// stay queued for the next pass.
pub fn deliver<C: Connection>(players: &mut PlayerRegistry<C>, observer: Identity) -> io::Result<usize> {
    let frames = outbound_frames(players, observer);
    let Some(player) = players.get_mut(observer) else {
        return Ok(0);
    };

    let mut sent = 0;
    for (entry, frame) in frames {
        player.connection_mut().send(frame.as_bytes())?;
        player.pending_mut().acknowledge(entry);
        sent += 1;
    }
    Ok(sent)
}
