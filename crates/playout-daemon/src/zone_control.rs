//! Zone-control sub-mode: browse the registry with the control surface and
//! commit a new control channel.

use playout_proto::protocol::{Gesture, Transport};
use std::time::Duration;
use tokio::time::Instant;

/// What the core has to do in response to a gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GestureOutcome {
    Entered { cursor: Option<String> },
    Moved { cursor: Option<String> },
    Committed { channel: Option<String> },
    Cancelled,
    /// Outside zone control the surface drives playback.
    Transport(Transport),
}

#[derive(Debug)]
pub struct ZoneControl {
    cursor: Option<String>,
    /// Set while active; refreshed by every gesture.
    last_update: Option<Instant>,
    timeout: Duration,
}

impl ZoneControl {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cursor: None,
            last_update: None,
            timeout,
        }
    }

    pub fn is_active(&self) -> bool {
        self.last_update.is_some()
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn enter(&mut self, selected: Option<String>, now: Instant) {
        self.cursor = selected;
        self.last_update = Some(now);
    }

    /// Leave the sub-mode and hand back the cursor for committing.
    pub fn commit(&mut self) -> Option<String> {
        self.last_update = None;
        self.cursor.take()
    }

    pub fn cancel(&mut self) {
        self.last_update = None;
        self.cursor = None;
    }

    pub fn timed_out(&self, now: Instant) -> bool {
        self.last_update
            .is_some_and(|at| now.saturating_duration_since(at) >= self.timeout)
    }

    /// Move the cursor one step through `ids`, wrapping at both ends.  A
    /// cursor that is unset or no longer listed restarts at the first id.
    pub fn step(&mut self, ids: &[String], forward: bool, now: Instant) -> Option<&str> {
        self.last_update = Some(now);
        if ids.is_empty() {
            self.cursor = None;
            return None;
        }
        let next = match self
            .cursor
            .as_deref()
            .and_then(|c| ids.iter().position(|id| id == c))
        {
            None => 0,
            Some(current) if forward => (current + 1) % ids.len(),
            Some(current) => {
                if current == 0 {
                    ids.len() - 1
                } else {
                    current - 1
                }
            }
        };
        self.cursor = Some(ids[next].clone());
        self.cursor.as_deref()
    }

    /// Map a gesture to its meaning in the current mode.
    pub fn handle_gesture(
        &mut self,
        gesture: Gesture,
        ids: &[String],
        selected: Option<String>,
        now: Instant,
    ) -> GestureOutcome {
        if !self.is_active() {
            return match gesture {
                Gesture::Up => {
                    self.enter(selected, now);
                    GestureOutcome::Entered {
                        cursor: self.cursor.clone(),
                    }
                }
                Gesture::Down => GestureOutcome::Transport(Transport::ShuffleMode),
                Gesture::Left => GestureOutcome::Transport(Transport::Previous),
                Gesture::Right => GestureOutcome::Transport(Transport::Next),
                Gesture::Confirm => GestureOutcome::Transport(Transport::PlayMode),
            };
        }

        match gesture {
            Gesture::Up | Gesture::Confirm => GestureOutcome::Committed {
                channel: self.commit(),
            },
            Gesture::Down => {
                self.cancel();
                GestureOutcome::Cancelled
            }
            Gesture::Left => GestureOutcome::Moved {
                cursor: self.step(ids, false, now).map(str::to_string),
            },
            Gesture::Right => GestureOutcome::Moved {
                cursor: self.step(ids, true, now).map(str::to_string),
            },
        }
    }
}
