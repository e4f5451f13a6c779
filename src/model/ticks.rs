use crate::error::{MmlError, Result};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub type Tick = u32;

pub const TICKS_PER_WHOLE: Tick = 1920;
pub const QUARTER_TICK: Tick = TICKS_PER_WHOLE / 4;
/// Length of a 64th note, the shortest named duration.
pub const MIN_TICK: Tick = TICKS_PER_WHOLE / 64;

pub const REST: &str = "r";
const TIE: &str = "&";
const MAX_LENGTH: u32 = 64;

/// Named durations used when writing ticks back out, longest first. Plain lengths come before
/// dotted ones of the same size so `c2` is preferred over `c3.`.
const DURATION_TABLE: &[(Tick, &str)] = &[
    (2880, "1."),
    (1920, "1"),
    (1440, "2."),
    (960, "2"),
    (960, "3."),
    (720, "4."),
    (640, "3"),
    (480, "4"),
    (480, "6."),
    (360, "8."),
    (320, "6"),
    (240, "8"),
    (240, "12."),
    (180, "16."),
    (160, "12"),
    (120, "16"),
    (120, "24."),
    (90, "32."),
    (80, "24"),
    (60, "32"),
    (60, "48."),
    (45, "64."),
    (40, "48"),
    (30, "64"),
];

/// Alternate duration base for notes that are played as a run of short repeated notes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TuningBase {
    L64,
    L32,
    L16,
}

impl TuningBase {
    pub fn length(self) -> u32 {
        match self {
            TuningBase::L64 => 64,
            TuningBase::L32 => 32,
            TuningBase::L16 => 16,
        }
    }

    pub fn tick(self) -> Tick {
        TICKS_PER_WHOLE / self.length()
    }
}

/// Parses a duration token such as `4`, `8.`, `2..` or `%30` (explicit ticks) into a tick count.
pub fn ticks_for_duration(token: &str) -> Result<Tick> {
    let malformed = || MmlError::MalformedDuration(token.to_string());

    if let Some(literal) = token.strip_prefix('%') {
        if literal.is_empty() || !literal.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }

        let ticks: Tick = literal.parse().map_err(|_| malformed())?;
        if ticks == 0 {
            return Err(malformed());
        }
        return Ok(ticks);
    }

    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let (digits, dots) = token.split_at(digits_end);

    if digits.is_empty() || !dots.chars().all(|c| c == '.') {
        return Err(malformed());
    }

    let length: u32 = digits.parse().map_err(|_| malformed())?;
    if !(1..=MAX_LENGTH).contains(&length) {
        return Err(malformed());
    }

    let mut addend = TICKS_PER_WHOLE / length;
    let mut ticks = addend;
    for _ in dots.chars() {
        addend /= 2;
        ticks += addend;
    }

    Ok(ticks)
}

/// Writes `ticks` as MML for the note name (or [REST]) given.
///
/// Notes are tied with `&` (`c4&c16`), rests are simply repeated (`r4r16`). Counts that no
/// combination of named lengths can express fall back to the explicit form `c%13`. With a tuning
/// base the note is written as untied repeats of the base length, provided the count divides
/// evenly.
pub fn duration_token_for_ticks(
    ticks: Tick,
    name: &str,
    tuning: Option<TuningBase>,
) -> Result<String> {
    if ticks == 0 {
        return Err(MmlError::MalformedDuration(format!("{name}%0")));
    }

    if let Some(base) = tuning {
        if ticks % base.tick() == 0 {
            let unit = format!("{name}{}", base.length());
            return Ok(unit.repeat((ticks / base.tick()) as usize));
        }
        return Ok(format!("{name}%{ticks}"));
    }

    let Some(pieces) = decompose(ticks) else {
        return Ok(format!("{name}%{ticks}"));
    };

    let separator = if name == REST { "" } else { TIE };
    Ok(pieces
        .iter()
        .map(|piece| format!("{name}{piece}"))
        .collect::<Vec<_>>()
        .join(separator))
}

/// Fewest-pieces table over every count below two whole notes: `(pieces, index of last piece)`.
fn decomposition_table() -> &'static [Option<(u32, usize)>] {
    static TABLE: OnceLock<Vec<Option<(u32, usize)>>> = OnceLock::new();

    TABLE.get_or_init(|| {
        let size = (TICKS_PER_WHOLE * 2) as usize;
        let mut best: Vec<Option<(u32, usize)>> = vec![None; size];
        best[0] = Some((0, usize::MAX));

        for value in 1..size {
            for (index, (piece_ticks, _)) in DURATION_TABLE.iter().enumerate() {
                let piece_ticks = *piece_ticks as usize;
                if piece_ticks > value {
                    continue;
                }

                if let Some((count, _)) = best[value - piece_ticks] {
                    let better = match best[value] {
                        Some((current, _)) => count + 1 < current,
                        None => true,
                    };
                    if better {
                        best[value] = Some((count + 1, index));
                    }
                }
            }
        }

        best
    })
}

/// Splits `ticks` into the fewest entries of [DURATION_TABLE], longest first.
fn decompose(ticks: Tick) -> Option<Vec<&'static str>> {
    let whole = TICKS_PER_WHOLE;
    let mut pieces: Vec<(Tick, &'static str)> = Vec::new();

    // Whole notes are split off eagerly, the table only covers what's left.
    let mut remainder = ticks;
    while remainder >= whole * 2 {
        pieces.push((whole, "1"));
        remainder -= whole;
    }

    let best = decomposition_table();
    let mut value = remainder as usize;
    best[value]?;

    while value > 0 {
        let (_, index) = best[value]?;
        pieces.push(DURATION_TABLE[index]);
        value -= DURATION_TABLE[index].0 as usize;
    }

    pieces.sort_by(|a, b| b.0.cmp(&a.0));
    Some(pieces.into_iter().map(|(_, text)| text).collect())
}
