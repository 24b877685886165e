//! Per-player action mailboxes bound to a tick

use std::collections::BTreeMap;

use super::physics::Direction;

/// A validated player command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Move(Direction),
    /// Absolute heading, already normalized to [0, 360)
    Turn { degrees: i32 },
    Shoot,
}

/// Result of handing an action to a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    /// Overwrote an action already queued for the same tick
    Replaced,
    Stale,
    Future,
    NotRunning,
    Eliminated,
    NotAPlayer,
}

impl SubmitOutcome {
    pub fn is_queued(self) -> bool {
        matches!(self, SubmitOutcome::Accepted | SubmitOutcome::Replaced)
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    tick: u64,
    action: Action,
}

/// One slot per player, holding at most one action for the current tick
#[derive(Debug, Default)]
pub struct ActionQueue {
    slots: BTreeMap<String, Slot>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `action` if it targets `current_tick`, replacing any action
    /// already queued for that tick.
    pub fn submit(
        &mut self,
        player_id: &str,
        current_tick: u64,
        action_tick: u64,
        action: Action,
    ) -> SubmitOutcome {
        if action_tick < current_tick {
            return SubmitOutcome::Stale;
        }
        if action_tick > current_tick {
            return SubmitOutcome::Future;
        }

        let slot = Slot {
            tick: action_tick,
            action,
        };
        match self.slots.insert(player_id.to_string(), slot) {
            Some(previous) if previous.tick == action_tick => SubmitOutcome::Replaced,
            _ => SubmitOutcome::Accepted,
        }
    }

    /// Take every action queued for `tick`, ascending by player id, and
    /// clear all slots.
    pub fn drain(&mut self, tick: u64) -> Vec<(String, Action)> {
        std::mem::take(&mut self.slots)
            .into_iter()
            .filter(|(_, slot)| slot.tick == tick)
            .map(|(player_id, slot)| (player_id, slot.action))
            .collect()
    }

    pub fn remove(&mut self, player_id: &str) {
        self.slots.remove(player_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
