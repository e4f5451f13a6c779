use crate::error::{MmlError, Result};
use crate::model::event::TimelineEvent;
use crate::model::ticks::{REST, Tick, TuningBase, duration_token_for_ticks};
use serde::{Deserialize, Serialize};

pub const INIT_VELOCITY: u8 = 8;
pub const MAX_VELOCITY: u8 = 15;
pub const INIT_OCTAVE: i32 = 4;
/// Pitch of a note that has no name, used by editors for rest-only placeholders.
pub const UNDEFINED_PITCH: i32 = -1;

pub(crate) const MAX_OCTAVE_SHIFT: i32 = 8;
const NOTE_NAMES: [&str; 12] = [
    "c", "c+", "d", "d+", "e", "f", "f+", "g", "g+", "a", "a+", "b",
];

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NoteEvent {
    offset: Tick,
    pitch: i32,
    duration: Tick,
    velocity: u8,
    tuning: Option<TuningBase>,
}

/// What the reader of the MML text knows when the next note begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EncodeContext {
    pub end_tick: Tick,
    pub octave: i32,
    pub velocity: u8,
}

impl EncodeContext {
    /// State at the start of every part: octave 4, volume 8, tick 0.
    pub fn initial() -> Self {
        Self {
            end_tick: 0,
            octave: INIT_OCTAVE,
            velocity: INIT_VELOCITY,
        }
    }

    pub fn after(note: &NoteEvent) -> Self {
        Self {
            end_tick: note.end_tick(),
            octave: note.octave(),
            velocity: note.velocity,
        }
    }
}

impl NoteEvent {
    pub fn new(pitch: i32, duration: Tick, offset: Tick) -> Self {
        Self {
            offset,
            pitch,
            duration,
            velocity: INIT_VELOCITY,
            tuning: None,
        }
    }

    /// Fails with [MmlError::InvalidVelocity] outside `0..=15`; [NoteEvent::set_velocity] clamps
    /// instead.
    pub fn with_velocity(pitch: i32, duration: Tick, offset: Tick, velocity: i32) -> Result<Self> {
        if !(0..=MAX_VELOCITY as i32).contains(&velocity) {
            return Err(MmlError::InvalidVelocity(velocity));
        }

        Ok(Self {
            velocity: velocity as u8,
            ..Self::new(pitch, duration, offset)
        })
    }

    pub fn pitch(&self) -> i32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: i32) {
        self.pitch = pitch;
    }

    pub fn duration(&self) -> Tick {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Tick) {
        self.duration = duration;
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: i32) {
        self.velocity = velocity.clamp(0, MAX_VELOCITY as i32) as u8;
    }

    pub fn tuning(&self) -> Option<TuningBase> {
        self.tuning
    }

    pub fn set_tuning(&mut self, tuning: Option<TuningBase>) {
        self.tuning = tuning;
    }

    pub fn octave(&self) -> i32 {
        self.pitch / 12
    }

    pub fn end_tick(&self) -> Tick {
        self.offset + self.duration
    }

    pub fn contains_tick(&self, tick: Tick) -> bool {
        self.offset <= tick && tick < self.end_tick()
    }

    pub fn pitch_name(&self) -> Result<&'static str> {
        if self.pitch < 0 {
            return Err(MmlError::UndefinedPitch(self.pitch));
        }
        Ok(NOTE_NAMES[(self.pitch % 12) as usize])
    }

    /// MML text for this note. With a previous note, the rest filling the gap, the octave
    /// shifts and a volume change are written first; without one only the note itself is.
    pub fn encode(&self, previous: Option<&NoteEvent>) -> Result<String> {
        match previous {
            Some(previous) => self.encode_after(&EncodeContext::after(previous)),
            None => self.note_text(),
        }
    }

    pub(crate) fn encode_after(&self, context: &EncodeContext) -> Result<String> {
        let note = self.note_text()?;
        let mut text = String::new();

        if self.offset > context.end_tick {
            text.push_str(&duration_token_for_ticks(
                self.offset - context.end_tick,
                REST,
                None,
            )?);
        }

        text.push_str(&octave_shift(context.octave, self.octave())?);

        if context.velocity != self.velocity {
            text.push('v');
            text.push_str(&self.velocity.to_string());
        }

        text.push_str(&note);
        Ok(text)
    }

    fn note_text(&self) -> Result<String> {
        duration_token_for_ticks(self.duration, self.pitch_name()?, self.tuning)
    }
}

impl TimelineEvent for NoteEvent {
    fn tick_offset(&self) -> Tick {
        self.offset
    }

    fn set_tick_offset(&mut self, tick: Tick) {
        self.offset = tick;
    }
}

/// `<` lowers and `>` raises the octave by one.
pub fn octave_shift(from: i32, to: i32) -> Result<String> {
    let change = from - to;
    if change.abs() > MAX_OCTAVE_SHIFT {
        return Err(MmlError::OctaveShiftOutOfRange(change));
    }

    let step = if change > 0 { "<" } else { ">" };
    Ok(step.repeat(change.unsigned_abs() as usize))
}
