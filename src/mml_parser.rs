use crate::error::{MmlError, Result};
use crate::model::event_list::EventList;
use crate::model::note::{INIT_OCTAVE, INIT_VELOCITY, MAX_VELOCITY, NoteEvent};
use crate::model::tempo::{MAX_TEMPO, MIN_TEMPO, TempoEvent, TempoList, insert_tempo, merge_tempo_list};
use crate::model::ticks::{QUARTER_TICK, Tick, ticks_for_duration};
use log::debug;

pub const MAX_PARTS: usize = 4;
pub const TRACK_PREFIX: &str = "MML@";
pub const TRACK_TERMINATOR: char = ';';

pub(crate) const MAX_OCTAVE: i32 = 9;
const MAX_NOTE_NUMBER: i32 = 127;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedPart {
    pub notes: EventList,
    pub tempo: TempoList,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedTrack {
    pub parts: Vec<EventList>,
    pub tempo: TempoList,
}

/// Decodes the MML of a single part, starting from `o4 v8 l4` at tick 0.
pub fn parse_part(text: &str) -> Result<DecodedPart> {
    PartParser::new(text, 0).run()
}

/// Decodes `MML@part1,part2,...;`. The prefix and terminator are optional, at most
/// [MAX_PARTS] parts are accepted and tempo changes from every part are merged.
pub fn parse_track(text: &str) -> Result<DecodedTrack> {
    let trimmed = text.trim();
    let leading = text.len() - text.trim_start().len();

    let (body, mut offset) = match trimmed
        .get(..TRACK_PREFIX.len())
        .filter(|prefix| prefix.eq_ignore_ascii_case(TRACK_PREFIX))
    {
        Some(_) => (&trimmed[TRACK_PREFIX.len()..], leading + TRACK_PREFIX.len()),
        None => (trimmed, leading),
    };
    let body = body.strip_suffix(TRACK_TERMINATOR).unwrap_or(body);

    let sections: Vec<&str> = body.split(',').collect();
    if sections.len() > MAX_PARTS {
        return Err(MmlError::mml(
            offset,
            format!("{} parts, at most {} allowed", sections.len(), MAX_PARTS),
        ));
    }

    let mut track = DecodedTrack::default();
    for section in sections {
        let part = PartParser::new(section, offset).run()?;
        merge_tempo_list(&part.tempo, &mut track.tempo);
        track.parts.push(part.notes);
        offset += section.len() + 1;
    }

    debug!(
        "Decoded track with {} part(s), {} note(s) and {} tempo change(s)",
        track.parts.len(),
        track.parts.iter().map(|p| p.len()).sum::<usize>(),
        track.tempo.len()
    );

    Ok(track)
}

struct PartParser<'a> {
    source: &'a str,
    base: usize,
    pos: usize,
    octave: i32,
    velocity: u8,
    default_length: Tick,
    tick: Tick,
    tie: bool,
    notes: Vec<NoteEvent>,
    tempo: TempoList,
}

impl<'a> PartParser<'a> {
    fn new(source: &'a str, base: usize) -> Self {
        Self {
            source,
            base,
            pos: 0,
            octave: INIT_OCTAVE,
            velocity: INIT_VELOCITY,
            default_length: QUARTER_TICK,
            tick: 0,
            tie: false,
            notes: Vec::new(),
            tempo: TempoList::new(),
        }
    }

    fn run(mut self) -> Result<DecodedPart> {
        while let Some(byte) = self.next_command() {
            let start = self.pos - 1;

            match byte.to_ascii_lowercase() {
                letter @ b'a'..=b'g' => {
                    let pitch = self.octave * 12 + pitch_class(letter) + self.accidentals();
                    let duration = self.duration()?;
                    self.note(pitch, duration, start)?;
                }
                b'r' => {
                    let duration = self.duration()?;
                    self.advance(duration, start)?;
                    self.tie = false;
                }
                b'n' => {
                    let number = self.number(start)?;
                    if number > MAX_NOTE_NUMBER {
                        return Err(self.error(start, format!("note number {number} out of range")));
                    }
                    self.note(number, self.default_length, start)?;
                }
                b'o' => {
                    let octave = self.number(start)?;
                    if octave > MAX_OCTAVE {
                        return Err(self.error(start, format!("octave {octave} out of range")));
                    }
                    self.octave = octave;
                }
                b'<' => self.octave -= 1,
                b'>' => self.octave += 1,
                b'l' => {
                    if !matches!(self.peek(), Some(b'0'..=b'9' | b'%')) {
                        return Err(self.error(start, "expected a length after 'l'"));
                    }
                    self.default_length = self.duration()?;
                }
                b'v' => {
                    let velocity = self.number(start)?;
                    if velocity > MAX_VELOCITY as i32 {
                        return Err(self.error(start, format!("volume {velocity} out of range")));
                    }
                    self.velocity = velocity as u8;
                }
                b't' => {
                    let tempo = self.number(start)?;
                    if !(MIN_TEMPO as i32..=MAX_TEMPO as i32).contains(&tempo) {
                        return Err(self.error(start, format!("tempo {tempo} out of range")));
                    }
                    insert_tempo(&mut self.tempo, TempoEvent::new(tempo as u32, self.tick));
                }
                b'&' => self.tie = true,
                _ => {
                    let found = self.source[start..].chars().next().unwrap_or('?');
                    return Err(self.error(start, format!("unexpected '{found}'")));
                }
            }
        }

        Ok(DecodedPart {
            notes: EventList::from_notes(self.notes),
            tempo: self.tempo,
        })
    }

    fn note(&mut self, pitch: i32, duration: Tick, start: usize) -> Result<()> {
        if pitch < 0 {
            return Err(self.error(start, "note below octave 0"));
        }

        let offset = self.tick;
        match self.notes.last_mut() {
            Some(last) if self.tie && last.pitch() == pitch && last.end_tick() == offset => {
                last.set_duration(last.duration() + duration);
            }
            _ => self.notes.push(NoteEvent::with_velocity(
                pitch,
                duration,
                offset,
                self.velocity as i32,
            )?),
        }

        self.advance(duration, start)?;
        self.tie = false;
        Ok(())
    }

    fn advance(&mut self, duration: Tick, start: usize) -> Result<()> {
        self.tick = self
            .tick
            .checked_add(duration)
            .ok_or_else(|| self.error(start, "part is too long"))?;
        Ok(())
    }

    fn accidentals(&mut self) -> i32 {
        let mut shift = 0;
        while let Some(byte) = self.peek() {
            match byte {
                b'+' | b'#' => shift += 1,
                b'-' => shift -= 1,
                _ => break,
            }
            self.pos += 1;
        }
        shift
    }

    /// An optional length after a note or rest. Dots alone extend the default length.
    fn duration(&mut self) -> Result<Tick> {
        let start = self.pos;
        match self.peek() {
            Some(b'%') => {
                self.pos += 1;
                self.skip_while(|b| b.is_ascii_digit());
                ticks_for_duration(&self.source[start..self.pos])
            }
            Some(b'0'..=b'9') => {
                self.skip_while(|b| b.is_ascii_digit());
                self.skip_while(|b| b == b'.');
                ticks_for_duration(&self.source[start..self.pos])
            }
            Some(b'.') => {
                let mut addend = self.default_length;
                let mut ticks = self.default_length;
                while self.peek() == Some(b'.') {
                    self.pos += 1;
                    addend /= 2;
                    ticks += addend;
                }
                Ok(ticks)
            }
            _ => Ok(self.default_length),
        }
    }

    fn number(&mut self, command: usize) -> Result<i32> {
        let start = self.pos;
        self.skip_while(|b| b.is_ascii_digit());

        let digits = &self.source[start..self.pos];
        if digits.is_empty() {
            let found = &self.source[command..start];
            return Err(self.error(command, format!("expected a number after '{found}'")));
        }

        digits
            .parse()
            .map_err(|_| self.error(start, format!("number {digits} out of range")))
    }

    fn next_command(&mut self) -> Option<u8> {
        self.skip_while(|b| b.is_ascii_whitespace());
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn skip_while<F: Fn(u8) -> bool>(&mut self, predicate: F) {
        while self.peek().is_some_and(&predicate) {
            self.pos += 1;
        }
    }

    fn error(&self, position: usize, reason: impl Into<String>) -> MmlError {
        MmlError::mml(self.base + position, reason)
    }
}

fn pitch_class(letter: u8) -> i32 {
    match letter {
        b'c' => 0,
        b'd' => 2,
        b'e' => 4,
        b'f' => 5,
        b'g' => 7,
        b'a' => 9,
        _ => 11,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::event::TimelineEvent;

    fn summary(part: &EventList) -> Vec<(i32, Tick, Tick, u8)> {
        part.notes()
            .iter()
            .map(|n| (n.pitch(), n.duration(), n.tick_offset(), n.velocity()))
            .collect()
    }

    #[test]
    fn notes_rests_and_lengths() {
        env_logger::try_init().unwrap_or(());

        let part = parse_part("c d8 r8 e4. l8 f g.").unwrap();
        assert_eq!(
            summary(&part.notes),
            vec![
                (48, 480, 0, 8),
                (50, 240, 480, 8),
                (52, 720, 960, 8),
                (53, 240, 1680, 8),
                (55, 360, 1920, 8),
            ]
        );
        assert!(part.tempo.is_empty());
    }

    #[test]
    fn octave_volume_and_accidentals() {
        let part = parse_part("o2 c+ > v12 d- < b# n60").unwrap();
        assert_eq!(
            summary(&part.notes),
            vec![
                (25, 480, 0, 8),
                (37, 480, 480, 12),
                (36, 480, 960, 12),
                (60, 480, 1440, 12),
            ]
        );
    }

    #[test]
    fn ties_join_same_pitch_only() {
        let part = parse_part("c4&c16 d8&e8 f8&r8").unwrap();
        assert_eq!(
            summary(&part.notes),
            vec![
                (48, 600, 0, 8),
                (50, 240, 600, 8),
                (52, 240, 840, 8),
                (53, 240, 1080, 8),
            ]
        );
    }

    #[test]
    fn tempo_inside_a_tie() {
        let part = parse_part("t120c8&t150c8r4t90").unwrap();
        assert_eq!(summary(&part.notes), vec![(48, 480, 0, 8)]);
        assert_eq!(
            part.tempo,
            vec![
                TempoEvent::new(120, 0),
                TempoEvent::new(150, 240),
                TempoEvent::new(90, 960),
            ]
        );
    }

    #[test]
    fn explicit_tick_lengths() {
        let part = parse_part("c%13 l%30 d").unwrap();
        assert_eq!(summary(&part.notes), vec![(48, 13, 0, 8), (50, 30, 13, 8)]);
    }

    #[test]
    fn track_parts_and_tempo_merge() {
        let track = parse_track("MML@t100cde,t140r1c,;").unwrap();
        assert_eq!(track.parts.len(), 3);
        assert_eq!(track.parts[0].len(), 3);
        assert_eq!(track.parts[1].len(), 1);
        assert!(track.parts[2].is_empty());
        // both parts set a tempo at tick 0, the later part wins
        assert_eq!(track.tempo, vec![TempoEvent::new(140, 0)]);

        let bare = parse_track("cde").unwrap();
        assert_eq!(bare.parts.len(), 1);
    }

    #[test]
    fn errors_carry_positions() {
        env_logger::try_init().unwrap_or(());

        match parse_track("MML@cde,cdx;") {
            Err(MmlError::MalformedMml { position, .. }) => assert_eq!(position, 10),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(parse_part("v16c"), Err(MmlError::MalformedMml { .. })));
        assert!(matches!(parse_part("o0c-"), Err(MmlError::MalformedMml { .. })));
        assert!(matches!(parse_part("t0"), Err(MmlError::MalformedMml { .. })));
        assert!(matches!(parse_part("c65"), Err(MmlError::MalformedDuration(_))));
        assert!(matches!(parse_part("l"), Err(MmlError::MalformedMml { .. })));
        assert!(matches!(
            parse_track("MML@a,b,c,d,e;"),
            Err(MmlError::MalformedMml { .. })
        ));
    }
}
