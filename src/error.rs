use crate::model::ticks::Tick;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MmlError>;

#[derive(Debug, Error)]
pub enum MmlError {
    /// A duration token that does not map to a positive tick count.
    #[error("malformed duration '{0}'")]
    MalformedDuration(String),

    /// A note whose pitch cannot be named (negative or undefined).
    #[error("undefined pitch {0}")]
    UndefinedPitch(i32),

    #[error("malformed score: {0}")]
    MalformedScore(String),

    #[error("invalid velocity {0}, expected 0..=15")]
    InvalidVelocity(i32),

    #[error("malformed MML at {position}: {reason}")]
    MalformedMml { position: usize, reason: String },

    #[error("octave shift of {0} exceeds the 8 step limit")]
    OctaveShiftOutOfRange(i32),

    #[error("score already holds the maximum of {0} tracks")]
    TooManyTracks(usize),

    #[error("no track at index {0}")]
    TrackIndex(usize),

    #[error("shifting by {amount} ticks overflows the event at tick {offset}")]
    TickOverflow { offset: Tick, amount: Tick },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MmlError {
    pub(crate) fn mml(position: usize, reason: impl Into<String>) -> Self {
        Self::MalformedMml {
            position,
            reason: reason.into(),
        }
    }
}
