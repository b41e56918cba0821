//! Temporary voice rooms
//!
//! A room is created when a member joins an untracked voice channel and that
//! member becomes its author. When the author leaves, the room waits a bounded
//! time for the author to come back; if they don't, the channel is deleted.

use crate::platform::Platform;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serenity::all::{ChannelId, UserId};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A change in which voice channel a member occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoicePresenceChange {
    pub member: UserId,
    pub member_is_bot: bool,
    pub previous: Option<ChannelId>,
    pub next: Option<ChannelId>,
}

/// Room-relevant reading of a `VoicePresenceChange`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Join(ChannelId),
    Leave(ChannelId),
    Move { from: ChannelId, to: ChannelId },
}

impl VoicePresenceChange {
    /// `None` for bots and for updates that stay in the same channel (mute, deafen, ...)
    pub fn transition(&self) -> Option<Transition> {
        if self.member_is_bot {
            return None;
        }

        match (self.previous, self.next) {
            (Some(from), Some(to)) if from == to => None,
            (Some(from), Some(to)) => Some(Transition::Move { from, to }),
            (Some(from), None) => Some(Transition::Leave(from)),
            (None, Some(to)) => Some(Transition::Join(to)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Active,
    /// The author left and the deletion timer is running
    PendingDeletion,
}

/// Copy of a room's state at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSnapshot {
    pub id: ChannelId,
    pub author: UserId,
    pub members: HashSet<UserId>,
    pub state: RoomState,
}

struct PendingDeletion {
    /// Identifies this timer so a stale one never removes a newer room state
    token: u64,
    reentry: oneshot::Sender<UserId>,
    handle: JoinHandle<()>,
}

/// A tracked voice channel
struct Room {
    id: ChannelId,
    author: UserId,
    members: HashSet<UserId>,
    deletion: Option<PendingDeletion>,
}

impl Room {
    fn new(id: ChannelId, author: UserId) -> Self {
        Self {
            id,
            author,
            members: HashSet::from([author]),
            deletion: None,
        }
    }

    fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            author: self.author,
            members: self.members.clone(),
            state: if self.deletion.is_some() {
                RoomState::PendingDeletion
            } else {
                RoomState::Active
            },
        }
    }
}

/// Owner of all tracked rooms, keyed by channel id
pub struct RoomManager {
    rooms: Arc<DashMap<ChannelId, Room>>,
    platform: Arc<dyn Platform>,
    deletion_timeout: Duration,
    next_token: AtomicU64,
}

impl RoomManager {
    pub fn new(platform: Arc<dyn Platform>, deletion_timeout: Duration) -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
            platform,
            deletion_timeout,
            next_token: AtomicU64::new(0),
        }
    }

    /// Apply a voice-presence change, returning the transition it caused
    ///
    /// A move is applied as a leave from the old channel followed by a join
    /// to the new one. Must be called from within a Tokio runtime.
    pub fn handle(&self, change: VoicePresenceChange) -> Option<Transition> {
        let transition = change.transition()?;

        match transition {
            Transition::Join(channel) => self.join(change.member, channel),
            Transition::Leave(channel) => self.leave(change.member, channel),
            Transition::Move { from, to } => {
                self.leave(change.member, from);
                self.join(change.member, to);
            }
        }

        Some(transition)
    }

    fn join(&self, member: UserId, channel: ChannelId) {
        match self.rooms.entry(channel) {
            Entry::Occupied(mut entry) => {
                let room = entry.get_mut();
                room.members.insert(member);

                // Only the author coming back keeps the room alive
                if member == room.author {
                    if let Some(pending) = room.deletion.take() {
                        let _ = pending.reentry.send(member);
                        info!("Author {} returned to room {}", member, channel);
                    }
                }

                debug!("{} joined room {} ({} members)", member, channel, room.members.len());
            }
            Entry::Vacant(entry) => {
                entry.insert(Room::new(channel, member));
                info!("Tracking room {} created by {}", channel, member);
            }
        }
    }

    fn leave(&self, member: UserId, channel: ChannelId) {
        let Some(mut room) = self.rooms.get_mut(&channel) else {
            return;
        };

        room.members.remove(&member);
        debug!("{} left room {} ({} members)", member, channel, room.members.len());

        if member == room.author {
            self.begin_deletion(&mut room);
        }
    }

    fn begin_deletion(&self, room: &mut Room) {
        if let Some(prior) = room.deletion.take() {
            prior.handle.abort();
        }

        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (reentry, wait) = oneshot::channel();
        let handle = tokio::spawn(await_author(
            self.rooms.clone(),
            self.platform.clone(),
            room.id,
            token,
            wait,
            self.deletion_timeout,
        ));

        room.deletion = Some(PendingDeletion {
            token,
            reentry,
            handle,
        });

        info!(
            "Author {} left room {}, deleting in {:?} unless they return",
            room.author, room.id, self.deletion_timeout
        );
    }

    /// Stop tracking a channel that went away by other means
    pub fn forget(&self, channel: ChannelId) -> bool {
        match self.rooms.remove(&channel) {
            Some((_, room)) => {
                if let Some(pending) = room.deletion {
                    pending.handle.abort();
                }
                info!("Stopped tracking room {}", channel);
                true
            }
            None => false,
        }
    }

    pub fn room(&self, channel: ChannelId) -> Option<RoomSnapshot> {
        self.rooms.get(&channel).map(|room| room.snapshot())
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

/// Deletion timer for one room
async fn await_author(
    rooms: Arc<DashMap<ChannelId, Room>>,
    platform: Arc<dyn Platform>,
    channel: ChannelId,
    token: u64,
    reentry: oneshot::Receiver<UserId>,
    timeout: Duration,
) {
    match tokio::time::timeout(timeout, reentry).await {
        Ok(Ok(author)) => {
            debug!("Deletion of room {} cancelled by {}", channel, author);
            return;
        }
        // Room dropped without a re-entry
        Ok(Err(_)) => return,
        Err(_) => {}
    }

    info!("Author did not return to room {}, deleting channel", channel);
    if let Err(e) = platform.delete_channel(channel).await {
        warn!("Failed to delete room channel {}: {}", channel, e);
    }

    let removed = rooms.remove_if(&channel, |_, room| {
        room.deletion.as_ref().map(|pending| pending.token) == Some(token)
    });
    if removed.is_some() {
        debug!("Stopped tracking deleted room {}", channel);
    }
}
