use crate::error::{MmlError, Result};
use crate::model::event::Marker;
use crate::model::score::{MAX_TRACK, Score};
use crate::model::ticks::Tick;
use crate::model::track::Track;
use log::{debug, warn};
use std::io::{Read, Write};

pub const SCORE_SECTION: &str = "[mml-score]";
pub const MARKER_SECTION: &str = "[marker]";
pub const SCORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Score,
    Marker,
    Unknown,
}

impl Section {
    fn from_header(line: &str) -> Option<Self> {
        if !(line.starts_with('[') && line.ends_with(']')) {
            return None;
        }

        Some(match line {
            SCORE_SECTION => Section::Score,
            MARKER_SECTION => Section::Marker,
            _ => Section::Unknown,
        })
    }
}

/// One line of the `[mml-score]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScoreLine<'a> {
    Version(&'a str),
    Title(&'a str),
    Author(&'a str),
    Time(u32, u32),
    MmlTrack(&'a str),
    Name(&'a str),
    Program(i32),
    SongProgram(i32),
    Panpot(i32),
    Ignored,
}

impl<'a> ScoreLine<'a> {
    fn parse(line: &'a str) -> Result<Self> {
        let Some((key, value)) = line.split_once('=') else {
            return Ok(ScoreLine::Ignored);
        };

        let number = || {
            value
                .trim()
                .parse::<i32>()
                .map_err(|_| MmlError::MalformedScore(format!("'{key}' expects a number: {line}")))
        };

        Ok(match key {
            "version" => ScoreLine::Version(value),
            "title" => ScoreLine::Title(value),
            "author" => ScoreLine::Author(value),
            "time" => {
                let (count, base) = parse_time(value).ok_or_else(|| {
                    MmlError::MalformedScore(format!("bad time signature '{value}'"))
                })?;
                ScoreLine::Time(count, base)
            }
            "mml-track" => ScoreLine::MmlTrack(value),
            "name" => ScoreLine::Name(value),
            "program" => ScoreLine::Program(number()?),
            "songProgram" => ScoreLine::SongProgram(number()?),
            "panpot" => ScoreLine::Panpot(number()?),
            _ => ScoreLine::Ignored,
        })
    }

    fn is_track_scoped(&self) -> bool {
        matches!(
            self,
            ScoreLine::Name(_)
                | ScoreLine::Program(_)
                | ScoreLine::SongProgram(_)
                | ScoreLine::Panpot(_)
        )
    }
}

fn parse_time(value: &str) -> Option<(u32, u32)> {
    let (count, base) = value.trim().split_once('/')?;
    Some((count.trim().parse().ok()?, base.trim().parse().ok()?))
}

/// Tracks and markers seen so far while reading a score.
struct ScoreReader {
    section: Option<Section>,
    found_section: bool,
    /// The last `mml-track` line was dropped, so its name/program lines are too.
    skipping_track: bool,
}

impl Score {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut score = Score::new();
        score.parse(reader)?;
        Ok(score)
    }

    /// Replaces this score with the one in `reader`. On any error the score is left empty.
    pub fn parse<R: Read>(&mut self, mut reader: R) -> Result<()> {
        self.reset();

        let mut text = String::new();
        let result = reader
            .read_to_string(&mut text)
            .map_err(MmlError::from)
            .and_then(|_| self.parse_text(&text))
            .and_then(|_| self.generate_all());

        if result.is_err() {
            self.reset();
        }
        result
    }

    fn parse_text(&mut self, text: &str) -> Result<()> {
        let mut state = ScoreReader {
            section: None,
            found_section: false,
            skipping_track: false,
        };

        for line in text.lines() {
            if let Some(section) = Section::from_header(line.trim()) {
                debug!("Reading section {}", line.trim());
                state.found_section |= section != Section::Unknown;
                state.section = Some(section);
                continue;
            }

            match state.section {
                Some(Section::Score) => self.read_score_line(line, &mut state)?,
                Some(Section::Marker) => self.read_marker_line(line)?,
                _ => {}
            }
        }

        if !state.found_section {
            return Err(MmlError::MalformedScore(format!(
                "no {SCORE_SECTION} or {MARKER_SECTION} section found"
            )));
        }

        debug!(
            "Read score '{}' with {} track(s) and {} marker(s)..!",
            self.title,
            self.tracks.len(),
            self.markers.len()
        );
        Ok(())
    }

    fn read_score_line(&mut self, line: &str, state: &mut ScoreReader) -> Result<()> {
        let parsed = ScoreLine::parse(line)?;

        if parsed.is_track_scoped() && state.skipping_track {
            return Ok(());
        }

        match parsed {
            ScoreLine::Version(version) => {
                if version.trim() != SCORE_VERSION.to_string() {
                    warn!("Unknown score version '{}', reading it anyway..!", version);
                }
            }
            ScoreLine::Title(title) => self.title = title.to_string(),
            ScoreLine::Author(author) => self.author = author.to_string(),
            ScoreLine::Time(count, base) => self.set_time_signature(count, base)?,
            ScoreLine::MmlTrack(mml) => {
                state.skipping_track = self.tracks.len() >= MAX_TRACK;
                if state.skipping_track {
                    warn!("Score holds more than {} tracks, dropping the rest..!", MAX_TRACK);
                } else {
                    self.add_track(Track::from_mml(mml)?)?;
                }
            }
            ScoreLine::Name(name) => {
                if let Some(track) = self.last_track(line) {
                    track.set_name(name);
                }
            }
            ScoreLine::Program(program) => {
                if let Some(track) = self.last_track(line) {
                    track.set_program(program);
                }
            }
            ScoreLine::SongProgram(program) => {
                if let Some(track) = self.last_track(line) {
                    track.set_song_program(program);
                }
            }
            ScoreLine::Panpot(panpot) => {
                if let Some(track) = self.last_track(line) {
                    track.set_panpot(panpot);
                }
            }
            ScoreLine::Ignored => {}
        }

        Ok(())
    }

    fn last_track(&mut self, line: &str) -> Option<&mut Track> {
        let track = self.tracks.last_mut();
        if track.is_none() {
            warn!("'{}' comes before any mml-track, ignoring it..!", line);
        }
        track
    }

    fn read_marker_line(&mut self, line: &str) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }

        let (tick, name) = line
            .split_once('=')
            .ok_or_else(|| MmlError::MalformedScore(format!("bad marker line '{line}'")))?;
        let tick: Tick = tick
            .trim()
            .parse()
            .map_err(|_| MmlError::MalformedScore(format!("bad marker tick '{tick}'")))?;

        self.add_marker(Marker::new(name, tick));
        Ok(())
    }

    /// The whole score as text. Nothing is returned if any track fails to encode.
    pub fn to_text(&self) -> Result<String> {
        let mut lines = vec![
            SCORE_SECTION.to_string(),
            format!("version={SCORE_VERSION}"),
            format!("title={}", self.title),
            format!("author={}", self.author),
            format!("time={}", self.time_signature_text()),
        ];

        for track in &self.tracks {
            lines.push(format!("mml-track={}", track.to_mml()?));
            lines.push(format!("name={}", track.name()));
            lines.push(format!("program={}", track.program()));
            lines.push(format!("songProgram={}", track.song_program()));
            lines.push(format!("panpot={}", track.panpot()));
        }

        if !self.markers.is_empty() {
            lines.push(MARKER_SECTION.to_string());
            lines.extend(self.markers.iter().map(|m| m.to_string()));
        }

        let mut text = lines.join("\n");
        text.push('\n');
        Ok(text)
    }

    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let text = self.to_text()?;
        writer.write_all(text.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Snapshot of the whole score, for undo.
    pub fn object_state(&self) -> Result<Vec<u8>> {
        Ok(self.to_text()?.into_bytes())
    }

    pub fn put_object_state(&mut self, state: &[u8]) -> Result<()> {
        self.parse(state)
    }
}
