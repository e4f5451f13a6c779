pub mod error;
mod midi_exporter;
mod midi_importer;
pub mod mml_parser;
pub mod model;
mod score_file;
mod util;

pub use error::{MmlError, Result};
pub use midi_exporter::*;
pub use midi_importer::*;
pub use mml_parser::{DecodedPart, DecodedTrack, parse_part, parse_track};
pub use model::config::*;
pub use model::event::{Marker, TimelineEvent};
pub use model::event_list::EventList;
pub use model::note::NoteEvent;
pub use model::score::Score;
pub use model::tempo::TempoEvent;
pub use model::ticks::{Tick, TuningBase};
pub use model::track::Track;
pub use score_file::*;
pub use util::*;
