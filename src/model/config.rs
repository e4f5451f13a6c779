use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mmlscore",
    about = "Read, edit and convert MML scores."
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Prints extra information to the terminal.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Converts a MIDI file into a score.
    Import {
        /// Path to the source MIDI file.
        midi: PathBuf,

        /// Where to write the score. Prints to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Shows the title, tracks and length of a score.
    Info {
        /// Path to the score file.
        score: PathBuf,
    },

    /// Writes a score out as a Standard MIDI File.
    Export {
        /// Path to the score file.
        score: PathBuf,

        /// Path of the MIDI file to create.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Inserts or removes whole measures or beats.
    Shift {
        /// Path to the score file.
        score: PathBuf,

        /// Measure (or beat) number to edit at, starting from 1.
        #[arg(long, default_value_t = 1)]
        at: u32,

        /// The unit of `--at` and `--count`. Supports measure|beat.
        #[arg(short, long, default_value = "measure")]
        unit: String,

        /// How many units to insert or remove.
        #[arg(short, long, default_value_t = 1)]
        count: u32,

        /// Remove instead of insert.
        #[arg(short, long, default_value_t = false)]
        remove: bool,

        /// Where to write the edited score. Prints to stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Prints notes, tempo changes and markers as JSON.
    Dump {
        /// Path to the score file.
        score: PathBuf,

        /// Indent the JSON output.
        #[arg(short, long, default_value_t = false)]
        pretty: bool,
    },
}
