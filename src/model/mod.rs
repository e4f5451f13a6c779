pub mod config;
pub mod event;
pub mod event_list;
pub mod note;
pub mod score;
pub mod tempo;
pub mod ticks;
pub mod track;
