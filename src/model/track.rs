use crate::error::Result;
use crate::mml_parser::{MAX_PARTS, TRACK_PREFIX, TRACK_TERMINATOR, parse_track};
use crate::model::event_list::EventList;
use crate::model::tempo::{SharedTempoList, TempoEvent, TempoList, insert_tempo};
use crate::model::ticks::Tick;
use std::cell::RefCell;
use std::rc::{Rc, Weak};

pub const DEFAULT_PROGRAM: i32 = 0;
/// No song (vocal) instrument assigned.
pub const NO_SONG_PROGRAM: i32 = -1;
pub const DEFAULT_PANPOT: i32 = 64;

/// Where a track reads and writes tempo changes.
#[derive(Debug, Clone)]
enum TempoBinding {
    /// Changes decoded from the track's own text, not yet part of a score.
    Private(TempoList),
    /// The owning score's list.
    Shared(Weak<RefCell<TempoList>>),
}

/// Up to four parts played by one instrument, plus the instrument settings.
#[derive(Debug, Clone)]
pub struct Track {
    name: String,
    program: i32,
    song_program: i32,
    panpot: i32,
    parts: Vec<EventList>,
    tempo: TempoBinding,
}

impl Default for Track {
    fn default() -> Self {
        Self::new()
    }
}

impl Track {
    /// An empty track with [MAX_PARTS] parts.
    pub fn new() -> Self {
        Self {
            name: String::new(),
            program: DEFAULT_PROGRAM,
            song_program: NO_SONG_PROGRAM,
            panpot: DEFAULT_PANPOT,
            parts: vec![EventList::new(); MAX_PARTS],
            tempo: TempoBinding::Private(TempoList::new()),
        }
    }

    /// Decodes a track from `MML@...;` text. Tempo changes stay private until the track is added
    /// to a score.
    pub fn from_mml(text: &str) -> Result<Self> {
        let decoded = parse_track(text)?;
        Ok(Self {
            parts: decoded.parts,
            tempo: TempoBinding::Private(decoded.tempo),
            ..Self::new()
        })
    }

    /// Points the track at the score-wide tempo list. Changes made through the track from here
    /// on are seen by the whole score.
    pub fn attach(&mut self, shared: &SharedTempoList) {
        self.tempo = TempoBinding::Shared(Rc::downgrade(shared));
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.tempo, TempoBinding::Shared(_))
    }

    /// A copy of the tempo changes this track currently sees.
    pub fn tempo_events(&self) -> TempoList {
        match &self.tempo {
            TempoBinding::Private(list) => list.clone(),
            TempoBinding::Shared(shared) => shared
                .upgrade()
                .map(|list| list.borrow().clone())
                .unwrap_or_default(),
        }
    }

    pub fn add_tempo(&mut self, event: TempoEvent) {
        match &mut self.tempo {
            TempoBinding::Private(list) => insert_tempo(list, event),
            TempoBinding::Shared(shared) => {
                if let Some(list) = shared.upgrade() {
                    insert_tempo(&mut list.borrow_mut(), event);
                }
            }
        }
    }

    /// Encodes every part. Tempo changes are written into the first part.
    pub fn to_mml(&self) -> Result<String> {
        let tempo = self.tempo_events();
        let mut parts = Vec::with_capacity(self.parts.len());

        for (index, part) in self.parts.iter().enumerate() {
            parts.push(if index == 0 {
                part.to_text_with_tempo(&tempo)?
            } else {
                part.to_text()?
            });
        }

        Ok(format!(
            "{}{}{}",
            TRACK_PREFIX,
            parts.join(","),
            TRACK_TERMINATOR
        ))
    }

    pub fn max_tick_length(&self) -> Tick {
        self.parts
            .iter()
            .map(|part| part.max_end_tick())
            .max()
            .unwrap_or(0)
    }

    pub fn parts(&self) -> &[EventList] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [EventList] {
        &mut self.parts
    }

    pub fn part(&self, index: usize) -> Option<&EventList> {
        self.parts.get(index)
    }

    pub fn part_mut(&mut self, index: usize) -> Option<&mut EventList> {
        self.parts.get_mut(index)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn program(&self) -> i32 {
        self.program
    }

    pub fn set_program(&mut self, program: i32) {
        self.program = program;
    }

    pub fn song_program(&self) -> i32 {
        self.song_program
    }

    pub fn set_song_program(&mut self, program: i32) {
        self.song_program = program;
    }

    pub fn panpot(&self) -> i32 {
        self.panpot
    }

    pub fn set_panpot(&mut self, panpot: i32) {
        self.panpot = panpot;
    }
}
