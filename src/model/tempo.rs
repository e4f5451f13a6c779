use crate::model::event::{TimelineEvent, event_before};
use crate::model::ticks::{QUARTER_TICK, Tick};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

pub const DEFAULT_TEMPO: u32 = 120;
pub const MIN_TEMPO: u32 = 1;
pub const MAX_TEMPO: u32 = 511;

const MS_PER_MINUTE: f64 = 60_000.0;

/// A tempo change, in quarter notes per minute, taking effect at a tick.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct TempoEvent {
    offset: Tick,
    tempo: u32,
}

pub type TempoList = Vec<TempoEvent>;

/// The score-wide tempo list. The score holds the only strong reference; tracks keep a weak view.
pub type SharedTempoList = Rc<RefCell<TempoList>>;

impl TempoEvent {
    /// A tempo of 0 is raised to [MIN_TEMPO].
    pub fn new(tempo: u32, offset: Tick) -> Self {
        Self {
            offset,
            tempo: tempo.max(MIN_TEMPO),
        }
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }
}

impl TimelineEvent for TempoEvent {
    fn tick_offset(&self) -> Tick {
        self.offset
    }

    fn set_tick_offset(&mut self, tick: Tick) {
        self.offset = tick;
    }
}

/// Inserts `event` in tick order, replacing an existing change at the same tick.
pub fn insert_tempo(list: &mut TempoList, event: TempoEvent) {
    match list.binary_search_by_key(&event.offset, |e| e.offset) {
        Ok(index) => list[index] = event,
        Err(index) => list.insert(index, event),
    }
}

/// Folds every change in `source` into `target`. The later merge wins on a shared tick.
pub fn merge_tempo_list(source: &[TempoEvent], target: &mut TempoList) {
    for event in source {
        insert_tempo(target, *event);
    }
}

/// Drops all but the last of several changes that ended up on the same tick.
pub fn dedup_tempo_list(list: &mut TempoList) {
    list.reverse();
    list.dedup_by_key(|e| e.offset);
    list.reverse();
}

pub fn tempo_on_tick(list: &[TempoEvent], tick: Tick) -> u32 {
    event_before(list, tick)
        .map(|e| e.tempo)
        .unwrap_or(DEFAULT_TEMPO)
}

/// Wall-clock position of `tick` under the tempo map.
pub fn ticks_to_ms(list: &[TempoEvent], tick: Tick) -> f64 {
    let ms_for = |ticks: Tick, tempo: u32| -> f64 {
        ticks as f64 * MS_PER_MINUTE / (tempo.max(MIN_TEMPO) as f64 * QUARTER_TICK as f64)
    };

    let mut ms = 0.0;
    let mut last_tick: Tick = 0;
    let mut last_tempo = DEFAULT_TEMPO;

    for event in list.iter().take_while(|e| e.offset < tick) {
        ms += ms_for(event.offset - last_tick, last_tempo);
        last_tick = event.offset;
        last_tempo = event.tempo;
    }

    ms + ms_for(tick - last_tick, last_tempo)
}

#[cfg(test)]
mod test {
    use super::*;

    fn tempos(list: &[(u32, Tick)]) -> TempoList {
        list.iter().map(|(t, o)| TempoEvent::new(*t, *o)).collect()
    }

    #[test]
    fn merge_keeps_order_and_replaces_same_tick() {
        let mut target = tempos(&[(120, 0), (140, 384)]);
        let source = tempos(&[(90, 192), (150, 384), (60, 768)]);

        merge_tempo_list(&source, &mut target);
        assert_eq!(
            target,
            tempos(&[(120, 0), (90, 192), (150, 384), (60, 768)])
        );
    }

    #[test]
    fn merging_twice_matches_merging_once() {
        let source = tempos(&[(90, 0), (150, 384)]);

        let mut once = tempos(&[(120, 0), (200, 96)]);
        merge_tempo_list(&source, &mut once);

        let mut twice = once.clone();
        merge_tempo_list(&source, &mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn dedup_keeps_the_last_change() {
        let mut list = tempos(&[(120, 0), (90, 96), (150, 96), (60, 192)]);
        dedup_tempo_list(&mut list);
        assert_eq!(list, tempos(&[(120, 0), (150, 96), (60, 192)]));
    }

    #[test]
    fn tempo_lookup_defaults_before_first_change() {
        let list = tempos(&[(150, 96)]);
        assert_eq!(tempo_on_tick(&list, 0), DEFAULT_TEMPO);
        assert_eq!(tempo_on_tick(&list, 96), 150);
        assert_eq!(tempo_on_tick(&[], 5000), DEFAULT_TEMPO);
    }

    #[test]
    fn wall_clock_follows_tempo_changes() {
        // one quarter at 120 is 500ms, one quarter at 60 is 1000ms
        let list = tempos(&[(60, 480)]);
        assert!((ticks_to_ms(&list, 480) - 500.0).abs() < 1e-9);
        assert!((ticks_to_ms(&list, 960) - 1500.0).abs() < 1e-9);
        assert!((ticks_to_ms(&[], 1920) - 2000.0).abs() < 1e-9);
    }

    #[test]
    fn zero_tempo_is_raised_to_the_minimum() {
        let list = tempos(&[(0, 0)]);
        assert_eq!(list[0].tempo(), MIN_TEMPO);
        assert!((ticks_to_ms(&list, 480) - 60_000.0).abs() < 1e-9);
    }
}
