use crate::model::ticks::Tick;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything placed on the score timeline at a tick offset.
pub trait TimelineEvent {
    fn tick_offset(&self) -> Tick;

    fn set_tick_offset(&mut self, tick: Tick);
}

/// Moves every event at or after `from` by `delta` ticks. Events are never pulled in front of
/// `from`, anything that would be is clamped onto it.
pub fn shift_ticks<E: TimelineEvent>(events: &mut [E], from: Tick, delta: i64) {
    for event in events.iter_mut().filter(|e| e.tick_offset() >= from) {
        let shifted = (event.tick_offset() as i64 + delta).clamp(from as i64, Tick::MAX as i64);
        event.set_tick_offset(shifted as Tick);
    }
}

/// Stable, so events sharing a tick keep their insertion order.
pub fn sort_by_tick<E: TimelineEvent>(events: &mut [E]) {
    events.sort_by_key(|e| e.tick_offset());
}

/// The last event at or before `tick`.
pub fn event_before<E: TimelineEvent>(events: &[E], tick: Tick) -> Option<&E> {
    let end = events.partition_point(|e| e.tick_offset() <= tick);
    end.checked_sub(1).map(|index| &events[index])
}

/// A named position in the score.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    offset: Tick,
    name: String,
}

impl Marker {
    pub fn new(name: impl Into<String>, offset: Tick) -> Self {
        Self {
            offset,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }
}

impl TimelineEvent for Marker {
    fn tick_offset(&self) -> Tick {
        self.offset
    }

    fn set_tick_offset(&mut self, tick: Tick) {
        self.offset = tick;
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.offset, self.name)
    }
}
