use crate::mml_parser::MAX_PARTS;
use crate::model::note::{MAX_VELOCITY, NoteEvent};
use crate::model::score::{MAX_TRACK, Score};
use crate::model::tempo::{MAX_TEMPO, MIN_TEMPO, TempoEvent};
use crate::model::ticks::{QUARTER_TICK, Tick};
use crate::model::track::Track;
use anyhow::{Result, anyhow};
use log::{debug, warn};
use midly::{MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;
/// MIDI key of pitch 0 (`o0c`).
pub(crate) const KEY_OFFSET: i32 = 12;
pub(crate) const MAX_MIDI_VELOCITY: i32 = 127;

struct NoteInterval {
    key: u8,
    start_tick: u64,
    end_tick: u64,
    velocity: u8,
    channel: u8,
}

/// Everything read from one MIDI track before it becomes score tracks.
#[derive(Default)]
struct MidiTrack {
    name: Option<String>,
    programs: HashMap<u8, u8>,
    intervals: Vec<NoteInterval>,
}

pub fn import_midi_file<P: AsRef<Path>>(path: P) -> Result<Score> {
    let bytes = fs::read(path.as_ref()).map_err(|e| {
        anyhow!(
            "Failed to read MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })?;

    let title = path
        .as_ref()
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    midi_bytes_to_score(&bytes, title)
}

/// Builds a score from a Standard MIDI File. Each channel of each MIDI track becomes one score
/// track, with overlapping notes spread over its parts.
pub fn midi_bytes_to_score(bytes: &[u8], title: &str) -> Result<Score> {
    let smf = Smf::parse(bytes).map_err(|e| anyhow!("Failed to parse MIDI: {:?}", e))?;

    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(t) => t.as_int() as u64,
        Timing::Timecode(_fps, _subframe) => {
            return Err(anyhow!(
                "SMPTE timecode midi timing is not currently supported..!"
            ));
        }
    };
    if ticks_per_quarter == 0 {
        return Err(anyhow!("MIDI header declares 0 ticks per quarter note..!"));
    }

    debug!("Ticks per quarter note: {}", ticks_per_quarter);
    debug!(
        "MIDI format: {:?}, tracks: {}",
        smf.header.format,
        smf.tracks.len()
    );

    let rescale = |tick: u64| -> Result<Tick> {
        let scaled = (tick * QUARTER_TICK as u64 + ticks_per_quarter / 2) / ticks_per_quarter;
        Tick::try_from(scaled).map_err(|_| anyhow!("MIDI tick {} is out of range..!", tick))
    };

    let mut score = Score::new();
    score.set_title(title);

    let mut tempo_changes: Vec<(u64, u32)> = Vec::new();
    let mut time_signature: Option<(u8, u8)> = None;
    let mut midi_tracks: Vec<MidiTrack> = Vec::new();

    for (track_idx, track) in smf.tracks.iter().enumerate() {
        let mut abs_tick: u64 = 0;
        let mut current = MidiTrack::default();
        let mut open_notes: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track.iter() {
            abs_tick = abs_tick.saturating_add(event.delta.as_int() as u64);

            match &event.kind {
                TrackEventKind::Meta(meta) => match meta {
                    MetaMessage::Tempo(micro) => {
                        let mpqn: u32 = micro.as_int();
                        tempo_changes.push((abs_tick, mpqn));
                        debug!(
                            "Tempo change at tick {} -> {} us/qn (track {})",
                            abs_tick, mpqn, track_idx
                        );
                    }
                    MetaMessage::TimeSignature(numerator, denominator_power, _, _) => {
                        if time_signature.is_none() {
                            time_signature = Some((*numerator, *denominator_power));
                        } else {
                            debug!("Ignoring time signature change at tick {}", abs_tick);
                        }
                    }
                    MetaMessage::TrackName(bytes) => {
                        if current.name.is_none() {
                            let name = String::from_utf8_lossy(bytes).into_owned();
                            debug!("Track name: {}", name);
                            current.name = Some(name);
                        }
                    }
                    _ => {}
                },
                TrackEventKind::Midi { channel, message } => {
                    let ch: u8 = channel.as_int();

                    match message {
                        MidiMessage::NoteOn { key, vel } => {
                            let velocity: u8 = vel.as_int();

                            if velocity == 0 {
                                close_note(
                                    &mut open_notes,
                                    &mut current.intervals,
                                    ch,
                                    key.as_int(),
                                    abs_tick,
                                );
                            } else {
                                open_notes
                                    .entry((ch, key.as_int()))
                                    .or_default()
                                    .push((abs_tick, velocity));
                            }
                        }
                        MidiMessage::NoteOff { key, vel: _ } => {
                            close_note(
                                &mut open_notes,
                                &mut current.intervals,
                                ch,
                                key.as_int(),
                                abs_tick,
                            );
                        }
                        MidiMessage::ProgramChange { program } => {
                            current.programs.entry(ch).or_insert(program.as_int());
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for ((ch, key), stack) in open_notes.into_iter() {
            for (start_tick, velocity) in stack {
                let end_tick = if abs_tick > start_tick {
                    abs_tick
                } else {
                    start_tick + ticks_per_quarter
                };

                current.intervals.push(NoteInterval {
                    key,
                    start_tick,
                    end_tick,
                    velocity,
                    channel: ch,
                });

                warn!(
                    "Unclosed NoteOn for {}, channel: {} at tick: {} auto-closing at: {}..!",
                    key, ch, start_tick, end_tick
                );
            }
        }

        midi_tracks.push(current);
    }

    if let Some((numerator, denominator_power)) = time_signature {
        let base = 1u32.checked_shl(denominator_power as u32).unwrap_or(0);
        if let Err(e) = score.set_time_signature(numerator as u32, base) {
            warn!("Keeping 4/4, the MIDI time signature is unusable: {}..!", e);
        }
    }

    tempo_changes.sort_by_key(|(tick, _)| *tick);
    for (tick, mpqn) in tempo_changes {
        score.add_tempo(TempoEvent::new(bpm_for_mpqn(mpqn), rescale(tick)?));
    }

    for midi_track in midi_tracks {
        let mut by_channel: BTreeMap<u8, Vec<NoteInterval>> = BTreeMap::new();
        for interval in midi_track.intervals {
            by_channel.entry(interval.channel).or_default().push(interval);
        }

        for (channel, mut intervals) in by_channel {
            if score.track_count() >= MAX_TRACK {
                warn!(
                    "Score is limited to {} tracks, dropping channel {} of '{}'..!",
                    MAX_TRACK,
                    channel,
                    midi_track.name.as_deref().unwrap_or_default()
                );
                continue;
            }

            intervals.sort_by_key(|i| (i.start_tick, i.key));
            let mut track = build_track(&intervals, &rescale)?;
            if let Some(name) = &midi_track.name {
                track.set_name(name.clone());
            }
            if let Some(program) = midi_track.programs.get(&channel) {
                track.set_program(*program as i32);
            }

            score.add_track(track)?;
        }
    }

    debug!(
        "Imported '{}' with {} track(s) and {} tempo change(s)..!",
        score.title(),
        score.track_count(),
        score.tempo_events().len()
    );

    Ok(score)
}

/// Places sorted intervals into the first part that is free when each note starts.
fn build_track<F>(intervals: &[NoteInterval], rescale: &F) -> Result<Track>
where
    F: Fn(u64) -> Result<Tick>,
{
    let mut track = Track::new();
    let mut part_ends: [Tick; MAX_PARTS] = [0; MAX_PARTS];
    let mut used = [false; MAX_PARTS];

    for interval in intervals {
        let pitch = interval.key as i32 - KEY_OFFSET;
        if pitch < 0 {
            warn!("Dropping MIDI key {} as it is below o0c..!", interval.key);
            continue;
        }

        let start = rescale(interval.start_tick)?;
        let end = rescale(interval.end_tick)?;
        if end <= start {
            debug!(
                "Skipping zero length note {} at tick {}..!",
                interval.key, interval.start_tick
            );
            continue;
        }

        let Some(index) = (0..MAX_PARTS).find(|i| !used[*i] || part_ends[*i] <= start) else {
            warn!(
                "More than {} overlapping notes at tick {}, dropping key {}..!",
                MAX_PARTS, start, interval.key
            );
            continue;
        };

        let velocity = scale_velocity(interval.velocity);
        let note = NoteEvent::with_velocity(pitch, end - start, start, velocity)?;
        if let Some(part) = track.part_mut(index) {
            part.add_note(note);
        }
        used[index] = true;
        part_ends[index] = end;
    }

    Ok(track)
}

fn close_note(
    open_notes: &mut HashMap<(u8, u8), Vec<(u64, u8)>>,
    intervals: &mut Vec<NoteInterval>,
    ch: u8,
    key: u8,
    abs_tick: u64,
) {
    match open_notes.get_mut(&(ch, key)).and_then(|stack| stack.pop()) {
        Some((start_tick, velocity)) => intervals.push(NoteInterval {
            key,
            start_tick,
            end_tick: abs_tick,
            velocity,
            channel: ch,
        }),
        None => debug!(
            "Orphaned NoteOff for {} ch{} at tick {}..!",
            key, ch, abs_tick
        ),
    }
}

fn bpm_for_mpqn(mpqn: u32) -> u32 {
    if mpqn == 0 {
        return MAX_TEMPO;
    }
    let bpm = (MICROSECONDS_PER_MINUTE / mpqn as f64).round() as u32;
    bpm.clamp(MIN_TEMPO, MAX_TEMPO)
}

/// MIDI velocity `0..=127` onto the MML volume range `0..=15`.
fn scale_velocity(velocity: u8) -> i32 {
    let max = MAX_VELOCITY as i32;
    (velocity as i32 * max + MAX_MIDI_VELOCITY / 2) / MAX_MIDI_VELOCITY
}
