use crate::error::{MmlError, Result};
use crate::mml_parser::MAX_PARTS;
use crate::model::event::{Marker, TimelineEvent, shift_ticks, sort_by_tick};
use crate::model::note::NoteEvent;
use crate::model::tempo::{
    SharedTempoList, TempoEvent, TempoList, dedup_tempo_list, insert_tempo, merge_tempo_list,
    tempo_on_tick, ticks_to_ms,
};
use crate::model::ticks::{Tick, ticks_for_duration};
use crate::model::track::Track;
use log::debug;
use std::cell::{Ref, RefCell};
use std::rc::Rc;

pub const MAX_TRACK: usize = 12;
pub const DEFAULT_TIME_COUNT: u32 = 4;
pub const DEFAULT_BASE_TIME: u32 = 4;
pub const MAX_TIME_COUNT: u32 = u8::MAX as u32;

/// A whole piece: up to [MAX_TRACK] tracks sharing one tempo list, plus markers and metadata.
#[derive(Debug)]
pub struct Score {
    pub(crate) tracks: Vec<Track>,
    pub(crate) tempo: SharedTempoList,
    pub(crate) markers: Vec<Marker>,
    pub(crate) title: String,
    pub(crate) author: String,
    pub(crate) time_count: u32,
    pub(crate) base_time: u32,
}

impl Default for Score {
    fn default() -> Self {
        Self::new()
    }
}

impl Score {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            tempo: Rc::new(RefCell::new(TempoList::new())),
            markers: Vec::new(),
            title: String::new(),
            author: String::new(),
            time_count: DEFAULT_TIME_COUNT,
            base_time: DEFAULT_BASE_TIME,
        }
    }

    /// Back to an empty 4/4 score. Tracks still attached to the old tempo list only hold a weak
    /// view of it, which reads as empty once the old list is dropped.
    pub(crate) fn reset(&mut self) {
        *self = Self::new();
    }

    /// Adds `track` and folds its tempo changes into the score's list. Returns the new track's
    /// index, or [MmlError::TooManyTracks] when the score is full.
    pub fn add_track(&mut self, mut track: Track) -> Result<usize> {
        if self.tracks.len() >= MAX_TRACK {
            return Err(MmlError::TooManyTracks(MAX_TRACK));
        }

        self.bind(&mut track);
        self.tracks.push(track);

        debug!("Added track {} to the score..!", self.tracks.len() - 1);
        Ok(self.tracks.len() - 1)
    }

    /// Replaces the track at `index`, returning the old one.
    pub fn set_track(&mut self, index: usize, mut track: Track) -> Result<Track> {
        if index >= self.tracks.len() {
            return Err(MmlError::TrackIndex(index));
        }

        self.bind(&mut track);
        Ok(std::mem::replace(&mut self.tracks[index], track))
    }

    pub fn remove_track(&mut self, index: usize) -> Option<Track> {
        (index < self.tracks.len()).then(|| self.tracks.remove(index))
    }

    fn bind(&mut self, track: &mut Track) {
        let events = track.tempo_events();
        merge_tempo_list(&events, &mut self.tempo.borrow_mut());
        track.attach(&self.tempo);

        if !events.is_empty() {
            debug!("Merged {} tempo change(s) into the score", events.len());
        }
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn tempo_events(&self) -> Ref<'_, TempoList> {
        self.tempo.borrow()
    }

    /// The shared list itself, for callers that want to edit it alongside the tracks.
    pub fn tempo_list(&self) -> &SharedTempoList {
        &self.tempo
    }

    pub fn add_tempo(&mut self, event: TempoEvent) {
        insert_tempo(&mut self.tempo.borrow_mut(), event);
    }

    pub fn tempo_at(&self, tick: Tick) -> u32 {
        tempo_on_tick(&self.tempo.borrow(), tick)
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn markers_mut(&mut self) -> &mut Vec<Marker> {
        &mut self.markers
    }

    pub fn add_marker(&mut self, marker: Marker) {
        let index = self
            .markers
            .partition_point(|m| m.tick_offset() <= marker.tick_offset());
        self.markers.insert(index, marker);
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn set_author(&mut self, author: impl Into<String>) {
        self.author = author.into();
    }

    pub fn time_count(&self) -> u32 {
        self.time_count
    }

    pub fn base_time(&self) -> u32 {
        self.base_time
    }

    /// `count` beats of a `base` note per measure. `count` is `1..=255`, the range of the MIDI
    /// time signature field, and `base` has to be a valid length (1..=64).
    pub fn set_time_signature(&mut self, count: u32, base: u32) -> Result<()> {
        if !(1..=MAX_TIME_COUNT).contains(&count) {
            return Err(MmlError::MalformedScore(format!(
                "time signature {count}/{base} needs 1 to {MAX_TIME_COUNT} beats"
            )));
        }
        ticks_for_duration(&base.to_string()).map_err(|_| {
            MmlError::MalformedScore(format!("time signature {count}/{base} has no valid base"))
        })?;

        self.time_count = count;
        self.base_time = base;
        Ok(())
    }

    pub fn time_signature_text(&self) -> String {
        format!("{}/{}", self.time_count, self.base_time)
    }

    pub fn beat_tick(&self) -> Tick {
        ticks_for_duration(&self.base_time.to_string()).unwrap_or(0)
    }

    pub fn measure_tick(&self) -> Tick {
        self.time_count.saturating_mul(self.beat_tick())
    }

    /// Opens `amount` ticks of silence at `position` across every part, the tempo list and the
    /// markers. Fails before touching anything if an event would be pushed past the tick range.
    pub fn insert_ticks(&mut self, position: Tick, amount: Tick) -> Result<()> {
        self.check_room(position, amount)?;

        let delta = amount as i64;
        for track in &mut self.tracks {
            for part in track.parts_mut() {
                part.shift_ticks(position, delta);
            }
        }
        shift_ticks(&mut self.tempo.borrow_mut(), position, delta);
        shift_ticks(&mut self.markers, position, delta);

        debug!("Inserted {amount} tick(s) at {position}");
        Ok(())
    }

    /// Cuts `[position, position + amount)` out of the score. Notes lose the part of them inside
    /// the window, tempo changes and markers inside it land on `position`.
    pub fn remove_ticks(&mut self, position: Tick, amount: Tick) {
        let delta = -(amount as i64);
        for track in &mut self.tracks {
            for part in track.parts_mut() {
                part.remove_ticks(position, amount);
            }
        }

        {
            let mut tempo = self.tempo.borrow_mut();
            shift_ticks(&mut tempo, position, delta);
            sort_by_tick(&mut tempo);
            dedup_tempo_list(&mut tempo);
        }
        shift_ticks(&mut self.markers, position, delta);
        sort_by_tick(&mut self.markers);

        debug!("Removed {amount} tick(s) at {position}");
    }

    pub fn insert_measure(&mut self, position: Tick) -> Result<()> {
        self.insert_ticks(position, self.measure_tick())
    }

    pub fn remove_measure(&mut self, position: Tick) {
        self.remove_ticks(position, self.measure_tick());
    }

    pub fn insert_beat(&mut self, position: Tick) -> Result<()> {
        self.insert_ticks(position, self.beat_tick())
    }

    pub fn remove_beat(&mut self, position: Tick) {
        self.remove_ticks(position, self.beat_tick());
    }

    fn check_room(&self, position: Tick, amount: Tick) -> Result<()> {
        let overflow = |offset: Tick| MmlError::TickOverflow { offset, amount };

        let note_ends = self
            .tracks
            .iter()
            .flat_map(|t| t.parts())
            .flat_map(|p| p.notes())
            .filter(|n| n.tick_offset() >= position)
            .map(|n| n.end_tick());
        let tempo = self.tempo.borrow();
        let points = tempo
            .iter()
            .map(|t| t.tick_offset())
            .chain(self.markers.iter().map(|m| m.tick_offset()))
            .filter(|offset| *offset >= position);

        match note_ends.chain(points).max() {
            Some(last) if last.checked_add(amount).is_none() => Err(overflow(last)),
            _ => Ok(()),
        }
    }

    pub fn total_tick_length(&self) -> Tick {
        self.tracks
            .iter()
            .map(|t| t.max_tick_length())
            .max()
            .unwrap_or(0)
    }

    /// Playing time of the whole score under its tempo list.
    pub fn duration_ms(&self) -> f64 {
        ticks_to_ms(&self.tempo.borrow(), self.total_tick_length())
    }

    /// For each track, the note sounding at `tick` in each of its parts.
    pub fn notes_at(&self, tick: Tick) -> Vec<[Option<&NoteEvent>; MAX_PARTS]> {
        self.tracks
            .iter()
            .map(|track| {
                std::array::from_fn(|index| track.part(index).and_then(|p| p.note_at(tick)))
            })
            .collect()
    }

    /// Encodes every track once, so a note that cannot be written shows up now rather than on
    /// the next save.
    pub fn generate_all(&self) -> Result<()> {
        for (index, track) in self.tracks.iter().enumerate() {
            track.to_mml().inspect_err(|e| {
                debug!("Track {index} failed to encode: {e}");
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn offsets(score: &Score, track: usize, part: usize) -> Vec<Tick> {
        score.tracks()[track].parts()[part]
            .notes()
            .iter()
            .map(|n| n.tick_offset())
            .collect()
    }

    fn two_note_score() -> Score {
        let mut score = Score::new();
        let mut track = Track::new();
        if let Some(part) = track.part_mut(0) {
            part.add_note(NoteEvent::new(48, 480, 0));
            part.add_note(NoteEvent::new(52, 480, 480));
        }
        score.add_track(track).unwrap();
        score
    }

    #[test]
    fn insert_measure_moves_later_notes() {
        env_logger::try_init().unwrap_or(());

        let mut score = two_note_score();
        assert_eq!(score.measure_tick(), 1920);
        assert_eq!(score.beat_tick(), 480);

        score.insert_ticks(960, 1920).unwrap();
        assert_eq!(offsets(&score, 0, 0), vec![0, 480]);

        score.insert_measure(480).unwrap();
        assert_eq!(offsets(&score, 0, 0), vec![0, 2400]);
    }

    #[test]
    fn thirteenth_track_is_rejected() {
        let mut score = Score::new();
        for _ in 0..MAX_TRACK {
            score.add_track(Track::new()).unwrap();
        }

        assert!(matches!(
            score.add_track(Track::new()),
            Err(MmlError::TooManyTracks(MAX_TRACK))
        ));
        assert_eq!(score.track_count(), MAX_TRACK);
    }

    #[test]
    fn track_tempo_is_merged_and_shared() {
        env_logger::try_init().unwrap_or(());

        let mut score = Score::new();
        score.add_track(Track::from_mml("MML@t150c1t90c1;").unwrap()).unwrap();
        score.add_track(Track::from_mml("MML@t100c1;").unwrap()).unwrap();

        assert_eq!(
            *score.tempo_events(),
            vec![TempoEvent::new(100, 0), TempoEvent::new(90, 1920)]
        );
        assert!(score.tracks().iter().all(|t| t.is_attached()));

        score.add_tempo(TempoEvent::new(200, 960));
        assert_eq!(score.tracks()[0].tempo_events().len(), 3);
        assert_eq!(score.tempo_at(0), 100);
        assert_eq!(score.tempo_at(1000), 200);
        assert_eq!(score.tempo_at(5000), 90);
    }

    #[test]
    fn set_track_checks_the_index() {
        let mut score = Score::new();
        assert!(matches!(
            score.set_track(0, Track::new()),
            Err(MmlError::TrackIndex(0))
        ));

        score.add_track(Track::new()).unwrap();
        let mut named = Track::new();
        named.set_name("lead");
        let old = score.set_track(0, named).unwrap();
        assert_eq!(old.name(), "");
        assert_eq!(score.track(0).map(|t| t.name()), Some("lead"));
        assert!(score.remove_track(0).is_some());
        assert!(score.remove_track(0).is_none());
    }

    #[test]
    fn insert_then_remove_restores_offsets() {
        let mut score = two_note_score();
        score.add_tempo(TempoEvent::new(150, 480));
        score.add_marker(Marker::new("verse", 960));

        score.insert_ticks(480, 960).unwrap();
        assert_eq!(offsets(&score, 0, 0), vec![0, 1440]);
        assert_eq!(score.markers()[0].tick_offset(), 1920);

        score.remove_ticks(480, 960);
        assert_eq!(offsets(&score, 0, 0), vec![0, 480]);
        assert_eq!(*score.tempo_events(), vec![TempoEvent::new(150, 480)]);
        assert_eq!(score.markers()[0].tick_offset(), 960);
    }

    #[test]
    fn removal_never_leaves_events_before_the_position() {
        let mut score = two_note_score();
        score.add_tempo(TempoEvent::new(150, 600));
        score.add_tempo(TempoEvent::new(90, 900));
        score.add_marker(Marker::new("a", 700));

        score.remove_ticks(240, 960);

        let notes: Vec<(Tick, Tick)> = score.tracks()[0].parts()[0]
            .notes()
            .iter()
            .map(|n| (n.tick_offset(), n.duration()))
            .collect();
        assert_eq!(notes, vec![(0, 240)]);
        assert_eq!(*score.tempo_events(), vec![TempoEvent::new(90, 240)]);
        assert_eq!(score.markers()[0].tick_offset(), 240);
    }

    #[test]
    fn overflowing_insert_changes_nothing() {
        let mut score = two_note_score();
        score.add_marker(Marker::new("end", Tick::MAX - 10));

        assert!(matches!(
            score.insert_ticks(0, 100),
            Err(MmlError::TickOverflow { .. })
        ));
        assert_eq!(offsets(&score, 0, 0), vec![0, 480]);
    }

    #[test]
    fn time_signature_drives_beats() {
        let mut score = Score::new();
        score.set_time_signature(6, 8).unwrap();
        assert_eq!(score.time_signature_text(), "6/8");
        assert_eq!(score.beat_tick(), 240);
        assert_eq!(score.measure_tick(), 1440);

        assert!(score.set_time_signature(0, 4).is_err());
        assert!(score.set_time_signature(3, 65).is_err());
        assert_eq!(score.time_signature_text(), "6/8");

        assert!(score.set_time_signature(256, 4).is_err());
        assert!(score.set_time_signature(u32::MAX, 4).is_err());
        score.set_time_signature(255, 1).unwrap();
        assert_eq!(score.measure_tick(), 255 * 1920);
    }

    #[test]
    fn reset_leaves_old_tempo_views_dead() {
        let mut score = Score::new();
        score.add_tempo(TempoEvent::new(90, 0));
        let index = score
            .add_track(Track::from_mml("MML@c;").unwrap())
            .unwrap();
        let orphan = score.remove_track(index).unwrap();
        assert_eq!(*orphan.tempo_events(), vec![TempoEvent::new(90, 0)]);

        score.reset();
        assert!(orphan.tempo_events().is_empty());
    }

    #[test]
    fn queries() {
        let mut score = two_note_score();
        assert_eq!(score.total_tick_length(), 960);
        assert!((score.duration_ms() - 1000.0).abs() < 1e-9);

        let sounding = score.notes_at(500);
        assert_eq!(sounding.len(), 1);
        assert_eq!(sounding[0][0].map(|n| n.pitch()), Some(52));
        assert!(sounding[0][1].is_none());

        assert!(score.generate_all().is_ok());
        if let Some(part) = score.track_mut(0).and_then(|t| t.part_mut(1)) {
            part.add_note(NoteEvent::new(-1, 480, 0));
        }
        assert!(score.generate_all().is_err());
    }
}
