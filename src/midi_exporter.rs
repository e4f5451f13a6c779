use crate::midi_importer::{KEY_OFFSET, MAX_MIDI_VELOCITY};
use crate::model::event::TimelineEvent;
use crate::model::note::MAX_VELOCITY;
use crate::model::score::Score;
use crate::model::ticks::QUARTER_TICK;
use crate::model::track::Track;
use anyhow::{Result, anyhow};
use log::{debug, warn};
use midly::num::{u4, u7, u24};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;

const MICROSECONDS_PER_MINUTE: u32 = 60_000_000;
const DRUM_CHANNEL: u8 = 9;
const PAN_CONTROLLER: u8 = 10;
const MAX_DATA_BYTE: i32 = 127;

pub fn export_midi_file<P: AsRef<Path>>(score: &Score, path: P) -> Result<()> {
    let bytes = score_to_midi_bytes(score)?;
    fs::write(path.as_ref(), bytes).map_err(|e| {
        anyhow!(
            "Failed to write MIDI file {}: {}",
            path.as_ref().display(),
            e
        )
    })
}

/// Writes the score as a format 1 file: a conductor track with tempo and time signature, then
/// one track per score track, each on its own channel.
pub fn score_to_midi_bytes(score: &Score) -> Result<Vec<u8>> {
    let mut tracks = vec![conductor_track(score)];

    for (index, track) in score.tracks().iter().enumerate() {
        tracks.push(note_track(track, channel_for(index)));
    }

    let smf = Smf {
        header: Header {
            format: Format::Parallel,
            timing: Timing::Metrical((QUARTER_TICK as u16).into()),
        },
        tracks,
    };

    let mut out = Vec::new();
    smf.write(&mut out)
        .map_err(|e| anyhow!("Failed to write MIDI: {}", e))?;

    debug!(
        "Wrote {} track(s) as {} bytes of MIDI..!",
        score.track_count(),
        out.len()
    );
    Ok(out)
}

/// Channels in score order, stepping over the drum channel.
fn channel_for(index: usize) -> u8 {
    let channel = index as u8;
    if channel >= DRUM_CHANNEL {
        channel + 1
    } else {
        channel
    }
}

fn conductor_track(score: &Score) -> Vec<TrackEvent<'_>> {
    let mut events = vec![TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(score.title().as_bytes())),
    }];

    let denominator_power = score.base_time().trailing_zeros() as u8;
    events.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(
            score.time_count().min(u8::MAX as u32) as u8,
            denominator_power,
            24,
            8,
        )),
    });

    for tempo in score.tempo_events().iter() {
        // the slowest tempos need more microseconds than the field holds
        let mpqn =
            (MICROSECONDS_PER_MINUTE / tempo.tempo().max(1)).min(u24::max_value().as_int());
        events.push(TrackEvent {
            delta: tempo.tick_offset().into(),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(mpqn.into())),
        });
    }

    events.sort_by_key(|e| e.delta.as_int());
    convert_to_delta_times(&mut events);
    end_track(&mut events);
    events
}

fn note_track(track: &Track, channel: u8) -> Vec<TrackEvent<'_>> {
    let channel: u4 = channel.into();
    let data_byte = |value: i32| -> u7 { (value.clamp(0, MAX_DATA_BYTE) as u8).into() };

    let mut events = vec![
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(track.name().as_bytes())),
        },
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: data_byte(track.program()),
                },
            },
        },
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::Controller {
                    controller: PAN_CONTROLLER.into(),
                    value: data_byte(track.panpot()),
                },
            },
        },
    ];

    // (tick, is_on, event); offs sort ahead of ons on the same tick
    let mut timed: Vec<(u32, bool, TrackEventKind<'_>)> = Vec::new();
    for note in track.parts().iter().flat_map(|part| part.notes()) {
        let key = note.pitch() + KEY_OFFSET;
        if !(0..=MAX_DATA_BYTE).contains(&key) {
            warn!("Pitch {} has no MIDI key, skipping it..!", note.pitch());
            continue;
        }
        if note.velocity() == 0 {
            debug!("Skipping silent note at tick {}", note.tick_offset());
            continue;
        }

        let velocity = note.velocity() as i32 * MAX_MIDI_VELOCITY / MAX_VELOCITY as i32;
        timed.push((
            note.tick_offset(),
            true,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOn {
                    key: data_byte(key),
                    vel: data_byte(velocity),
                },
            },
        ));
        timed.push((
            note.end_tick(),
            false,
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::NoteOff {
                    key: data_byte(key),
                    vel: 0.into(),
                },
            },
        ));
    }

    timed.sort_by_key(|(tick, is_on, _)| (*tick, *is_on));
    events.extend(timed.into_iter().map(|(tick, _, kind)| TrackEvent {
        delta: tick.into(),
        kind,
    }));

    convert_to_delta_times(&mut events);
    end_track(&mut events);
    events
}

fn end_track(events: &mut Vec<TrackEvent<'_>>) {
    events.push(TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
}

/// Absolute ticks stored in `delta` become the distance from the previous event.
fn convert_to_delta_times(events: &mut [TrackEvent<'_>]) {
    let mut prev_tick = 0u32;
    for event in events.iter_mut() {
        let current_tick = event.delta.as_int();
        event.delta = current_tick.saturating_sub(prev_tick).into();
        prev_tick = current_tick;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::midi_importer::midi_bytes_to_score;
    use crate::model::note::NoteEvent;
    use crate::model::tempo::TempoEvent;

    #[test]
    fn header_and_track_count() {
        env_logger::try_init().unwrap_or(());

        let mut score = Score::new();
        score.add_track(Track::from_mml("MML@cde,efg;").unwrap()).unwrap();
        score.add_track(Track::new()).unwrap();

        let out = score_to_midi_bytes(&score).unwrap();
        assert_eq!(&out[0..4], b"MThd");
        // format 1
        assert_eq!((out[8], out[9]), (0x00, 0x01));
        // conductor plus two tracks
        assert_eq!((out[10], out[11]), (0x00, 0x03));
    }

    #[test]
    fn written_file_reads_back() {
        env_logger::try_init().unwrap_or(());

        let mut score = Score::new();
        score.set_title("loop");
        score.set_time_signature(6, 8).unwrap();
        score.add_tempo(TempoEvent::new(100, 0));
        score.add_tempo(TempoEvent::new(150, 1920));

        let mut track = Track::from_mml("MML@o5c4e8v15g8.,o3c2;").unwrap();
        track.set_name("keys");
        track.set_program(5);
        score.add_track(track).unwrap();

        let bytes = score_to_midi_bytes(&score).unwrap();
        let back = midi_bytes_to_score(&bytes, "loop").unwrap();

        assert_eq!(back.time_signature_text(), "6/8");
        assert_eq!(
            *back.tempo_events(),
            vec![TempoEvent::new(100, 0), TempoEvent::new(150, 1920)]
        );
        assert_eq!(back.track_count(), 1);

        let read = &back.tracks()[0];
        assert_eq!(read.name(), "keys");
        assert_eq!(read.program(), 5);

        let pitches = |track: &Track| -> Vec<(i32, u32, u32)> {
            let mut notes: Vec<(i32, u32, u32)> = track
                .parts()
                .iter()
                .flat_map(|p| p.notes())
                .map(|n| (n.pitch(), n.tick_offset(), n.duration()))
                .collect();
            notes.sort();
            notes
        };
        assert_eq!(pitches(read), pitches(&score.tracks()[0]));
        assert!(
            read.parts()
                .iter()
                .flat_map(|p| p.notes())
                .any(|n| n.velocity() == 15)
        );
    }

    #[test]
    fn slow_tempos_are_held_at_the_slowest_midi_tempo() {
        env_logger::try_init().unwrap_or(());

        let mut score = Score::new();
        score.add_tempo(TempoEvent::new(2, 0));
        score.add_tempo(TempoEvent::new(1, 1920));
        score.add_tempo(TempoEvent::new(60, 3840));

        let back = midi_bytes_to_score(&score_to_midi_bytes(&score).unwrap(), "").unwrap();
        assert_eq!(back.tempo_at(0), 4);
        assert_eq!(back.tempo_at(1920), 4);
        assert_eq!(back.tempo_at(3840), 60);
    }

    #[test]
    fn channels_skip_drums() {
        assert_eq!(channel_for(0), 0);
        assert_eq!(channel_for(8), 8);
        assert_eq!(channel_for(9), 10);
        assert_eq!(channel_for(11), 12);
    }

    #[test]
    fn unplayable_notes_are_left_out() {
        env_logger::try_init().unwrap_or(());

        let mut track = Track::new();
        if let Some(part) = track.part_mut(0) {
            part.add_note(NoteEvent::new(120, 480, 0));
            part.add_note(NoteEvent::with_velocity(48, 480, 480, 0).unwrap());
            part.add_note(NoteEvent::new(50, 480, 960));
        }
        let mut score = Score::new();
        score.add_track(track).unwrap();

        let back = midi_bytes_to_score(&score_to_midi_bytes(&score).unwrap(), "").unwrap();
        let notes = back.tracks()[0].parts()[0].notes();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].pitch(), 50);
    }
}
