use crate::error::Result;
use crate::mml_parser::MAX_OCTAVE;
use crate::model::event::{TimelineEvent, shift_ticks, sort_by_tick};
use crate::model::note::{EncodeContext, MAX_OCTAVE_SHIFT, NoteEvent};
use crate::model::tempo::TempoEvent;
use crate::model::ticks::{REST, Tick, duration_token_for_ticks};
use serde::{Deserialize, Serialize};

/// The notes of one part, kept in tick order.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct EventList {
    notes: Vec<NoteEvent>,
}

impl EventList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_notes(mut notes: Vec<NoteEvent>) -> Self {
        sort_by_tick(&mut notes);
        Self { notes }
    }

    pub fn notes(&self) -> &[NoteEvent] {
        &self.notes
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Inserts after any notes already starting on the same tick.
    pub fn add_note(&mut self, note: NoteEvent) {
        let index = self
            .notes
            .partition_point(|n| n.tick_offset() <= note.tick_offset());
        self.notes.insert(index, note);
    }

    pub fn remove_note(&mut self, index: usize) -> Option<NoteEvent> {
        (index < self.notes.len()).then(|| self.notes.remove(index))
    }

    /// Mutates the note at `index` and puts it back where its tick now belongs.
    pub fn update_note<F: FnOnce(&mut NoteEvent)>(&mut self, index: usize, update: F) -> bool {
        let Some(mut note) = self.remove_note(index) else {
            return false;
        };
        update(&mut note);
        self.add_note(note);
        true
    }

    pub fn clear(&mut self) {
        self.notes.clear();
    }

    /// The note sounding at `tick`, if any.
    pub fn note_at(&self, tick: Tick) -> Option<&NoteEvent> {
        let end = self.notes.partition_point(|n| n.tick_offset() <= tick);
        self.notes[..end].iter().rev().find(|n| n.contains_tick(tick))
    }

    pub fn max_end_tick(&self) -> Tick {
        self.notes.iter().map(|n| n.end_tick()).max().unwrap_or(0)
    }

    pub fn shift_ticks(&mut self, from: Tick, delta: i64) {
        shift_ticks(&mut self.notes, from, delta);
    }

    /// Cuts `[position, position + amount)` out of the timeline. Notes inside the window are
    /// dropped, notes crossing one of its edges lose the overlapping part, later notes move back.
    pub fn remove_ticks(&mut self, position: Tick, amount: Tick) {
        let cut_end = position.saturating_add(amount);

        self.notes.retain_mut(|note| {
            let start = note.tick_offset();
            let end = note.end_tick();
            if end <= position {
                return true;
            }

            let overlap = end.min(cut_end).saturating_sub(start.max(position));
            let new_start = if start >= cut_end {
                start - amount
            } else {
                start.min(position)
            };

            note.set_tick_offset(new_start);
            note.set_duration(note.duration() - overlap);
            note.duration() > 0
        });
    }

    /// MML for the whole part, each note written relative to the one before it.
    pub fn to_text(&self) -> Result<String> {
        self.to_text_with_tempo(&[])
    }

    /// Like [EventList::to_text], with `t` commands placed at their ticks. A tempo change landing
    /// inside a note splits it with a tie (`c8&t150c8`), one past the last note is reached with
    /// rests.
    pub fn to_text_with_tempo(&self, tempo: &[TempoEvent]) -> Result<String> {
        let mut text = String::new();
        let mut context = EncodeContext::initial();
        let mut tempo = tempo.iter().peekable();

        for note in &self.notes {
            while let Some(change) = tempo.next_if(|t| t.tick_offset() <= note.tick_offset()) {
                write_rest_to(&mut text, &mut context, change.tick_offset())?;
                text.push_str(&format!("t{}", change.tempo()));
            }
            write_octave_to(&mut text, &mut context, note.octave());

            let mut inside = Vec::new();
            while let Some(change) = tempo.next_if(|t| t.tick_offset() < note.end_tick()) {
                inside.push(change);
            }

            match inside.first() {
                None => text.push_str(&note.encode_after(&context)?),
                Some(first) => {
                    let name = note.pitch_name()?;
                    let mut head = note.clone();
                    head.set_duration(first.tick_offset() - note.tick_offset());
                    text.push_str(&head.encode_after(&context)?);
                    text.push('&');

                    let mut segment_start = first.tick_offset();
                    for (i, change) in inside.iter().enumerate() {
                        text.push_str(&format!("t{}", change.tempo()));

                        let segment_end = inside
                            .get(i + 1)
                            .map(|t| t.tick_offset())
                            .unwrap_or(note.end_tick());
                        if segment_end > segment_start {
                            text.push_str(&duration_token_for_ticks(
                                segment_end - segment_start,
                                name,
                                note.tuning(),
                            )?);
                            if segment_end < note.end_tick() {
                                text.push('&');
                            }
                            segment_start = segment_end;
                        }
                    }
                }
            }

            context = EncodeContext::after(note);
        }

        for change in tempo {
            write_rest_to(&mut text, &mut context, change.tick_offset())?;
            text.push_str(&format!("t{}", change.tempo()));
        }

        Ok(text)
    }
}

/// Leaps too wide for `<`/`>` are written as an absolute `o`; the note covers what is left.
fn write_octave_to(text: &mut String, context: &mut EncodeContext, octave: i32) {
    if (context.octave - octave).abs() > MAX_OCTAVE_SHIFT {
        let absolute = octave.clamp(0, MAX_OCTAVE);
        text.push_str(&format!("o{absolute}"));
        context.octave = absolute;
    }
}

fn write_rest_to(text: &mut String, context: &mut EncodeContext, tick: Tick) -> Result<()> {
    if tick > context.end_tick {
        text.push_str(&duration_token_for_ticks(
            tick - context.end_tick,
            REST,
            None,
        )?);
        context.end_tick = tick;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mml_parser::parse_part;
    use crate::model::ticks::TuningBase;

    fn note(pitch: i32, duration: Tick, offset: Tick, velocity: i32) -> NoteEvent {
        NoteEvent::with_velocity(pitch, duration, offset, velocity).unwrap()
    }

    fn offsets(list: &EventList) -> Vec<(Tick, Tick)> {
        list.notes()
            .iter()
            .map(|n| (n.tick_offset(), n.duration()))
            .collect()
    }

    #[test]
    fn note_at_finds_the_sounding_note() {
        let list = EventList::from_notes(vec![note(50, 480, 480, 8), note(48, 480, 0, 8)]);

        assert_eq!(list.note_at(0).map(|n| n.pitch()), Some(48));
        assert_eq!(list.note_at(479).map(|n| n.pitch()), Some(48));
        assert_eq!(list.note_at(480).map(|n| n.pitch()), Some(50));
        assert!(list.note_at(960).is_none());
        assert_eq!(list.max_end_tick(), 960);
    }

    #[test]
    fn add_note_keeps_tick_order() {
        let mut list = EventList::new();
        list.add_note(note(50, 480, 480, 8));
        list.add_note(note(48, 480, 0, 8));
        list.add_note(note(52, 240, 480, 8));

        let pitches: Vec<i32> = list.notes().iter().map(|n| n.pitch()).collect();
        assert_eq!(pitches, vec![48, 50, 52]);

        assert!(list.update_note(0, |n| n.set_tick_offset(1920)));
        assert_eq!(list.notes().last().map(|n| n.pitch()), Some(48));
        assert!(!list.update_note(10, |_| {}));
    }

    #[test]
    fn shift_clamps_at_the_boundary() {
        let mut list = EventList::from_notes(vec![
            note(48, 480, 0, 8),
            note(50, 480, 480, 8),
            note(52, 480, 2400, 8),
        ]);

        list.shift_ticks(480, -960);
        assert_eq!(offsets(&list), vec![(0, 480), (480, 480), (1440, 480)]);
    }

    #[test]
    fn remove_ticks_cuts_note_intervals() {
        let mut list = EventList::from_notes(vec![
            note(48, 960, 0, 8),    // crosses the start of the cut
            note(50, 240, 960, 8),  // fully inside
            note(52, 960, 1440, 8), // crosses the end of the cut
            note(53, 480, 2880, 8), // after
        ]);

        list.remove_ticks(480, 1440);
        assert_eq!(offsets(&list), vec![(0, 480), (480, 480), (1440, 480)]);
    }

    #[test]
    fn first_note_is_written_against_the_initial_state() {
        let list = EventList::from_notes(vec![note(30, 480, 480, 10)]);
        assert_eq!(list.to_text().unwrap(), "r4<<v10f+4");
    }

    #[test]
    fn decoding_written_text_restores_the_list() {
        let list = EventList::from_notes(vec![
            note(48, 480, 0, 8),
            note(55, 600, 480, 8),
            note(19, 13, 3000, 3),
            note(96, 1920, 3013, 15),
            note(60, 5000, 6000, 0),
        ]);

        let text = list.to_text().unwrap();
        assert_eq!(parse_part(&text).unwrap().notes, list);
    }

    #[test]
    fn tempo_changes_are_interleaved() {
        let list = EventList::from_notes(vec![note(48, 480, 0, 8)]);
        let tempo = vec![
            TempoEvent::new(120, 0),
            TempoEvent::new(150, 240),
            TempoEvent::new(90, 960),
        ];

        let text = list.to_text_with_tempo(&tempo).unwrap();
        assert_eq!(text, "t120c8&t150c8r4t90");

        let decoded = parse_part(&text).unwrap();
        assert_eq!(decoded.notes, list);
        assert_eq!(decoded.tempo, tempo);
    }

    #[test]
    fn tempo_only_part() {
        let text = EventList::new()
            .to_text_with_tempo(&[TempoEvent::new(100, 1920)])
            .unwrap();
        assert_eq!(text, "r1t100");
    }

    #[test]
    fn wide_octave_leaps_use_absolute_octaves() {
        let list = EventList::from_notes(vec![
            note(0, 480, 0, 8),
            note(115, 480, 480, 8),
            note(3, 480, 960, 8),
            note(122, 480, 1440, 8),
        ]);

        let text = list.to_text().unwrap();
        assert_eq!(text, "<<<<c4o9g4o0d+4o9>d4");
        assert_eq!(parse_part(&text).unwrap().notes, list);
    }

    #[test]
    fn tuning_notes_come_back_as_separate_notes() {
        let mut tuned = note(57, 120, 0, 8);
        tuned.set_tuning(Some(TuningBase::L64));
        let list = EventList::from_notes(vec![tuned]);

        let text = list.to_text().unwrap();
        assert_eq!(text, "a64a64a64a64");

        // the base length is not recorded in the text, only the repeats are
        let decoded = parse_part(&text).unwrap().notes;
        assert_eq!(offsets(&decoded), vec![(0, 30), (30, 30), (60, 30), (90, 30)]);
        assert!(decoded.notes().iter().all(|n| n.tuning().is_none()));
        assert_eq!(decoded.max_end_tick(), list.max_end_tick());
    }

    #[test]
    fn undefined_pitch_aborts_the_whole_part() {
        let list = EventList::from_notes(vec![note(48, 480, 0, 8), note(-1, 480, 480, 8)]);
        assert!(list.to_text().is_err());
    }
}
