use anyhow::{Result, anyhow};
use clap::Parser;
use log::{debug, info};
use mmlscore::{
    Args, Command, EventList, Marker, Score, TempoEvent, export_midi_file, import_midi_file,
    parse_edit_unit, unit_position, unit_ticks,
};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

#[derive(Serialize)]
struct ScoreDump<'a> {
    title: &'a str,
    author: &'a str,
    time: String,
    tempo: Vec<TempoEvent>,
    markers: &'a [Marker],
    tracks: Vec<TrackDump<'a>>,
}

#[derive(Serialize)]
struct TrackDump<'a> {
    name: &'a str,
    program: i32,
    song_program: i32,
    panpot: i32,
    parts: &'a [EventList],
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Import { midi, output } => {
            info!("Importing MIDI file: '{}'...", midi.display());
            let score = import_midi_file(&midi)?;
            debug!(
                "Imported '{}' with {} track(s)..!",
                score.title(),
                score.track_count()
            );
            write_score(&score, output.as_deref())?;
        }
        Command::Info { score } => {
            let score = load_score(&score)?;
            print_info(&score, args.verbose);
        }
        Command::Export { score, output } => {
            let loaded = load_score(&score)?;
            export_midi_file(&loaded, &output)?;
            info!("Wrote '{}'..!", output.display());
        }
        Command::Shift {
            score,
            at,
            unit,
            count,
            remove,
            output,
        } => {
            let mut loaded = load_score(&score)?;
            let unit = parse_edit_unit(&unit);
            let position = unit_position(&loaded, unit, at)
                .ok_or_else(|| anyhow!("{:?} {} is past the end of the tick range..!", unit, at))?;
            let amount = unit_ticks(&loaded, unit)
                .checked_mul(count)
                .ok_or_else(|| anyhow!("{} {:?}(s) is too many to shift by..!", count, unit))?;

            if remove {
                loaded.remove_ticks(position, amount);
            } else {
                loaded.insert_ticks(position, amount)?;
            }

            info!(
                "{} {} tick(s) at tick {}..!",
                if remove { "Removed" } else { "Inserted" },
                amount,
                position
            );
            write_score(&loaded, output.as_deref())?;
        }
        Command::Dump { score, pretty } => {
            let loaded = load_score(&score)?;
            println!("{}", dump_json(&loaded, pretty)?);
        }
    }

    Ok(())
}

fn load_score(path: &Path) -> Result<Score> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Failed to open score {}: {}", path.display(), e))?;
    Score::from_reader(file)
        .map_err(|e| anyhow!("Failed to read score {}: {}", path.display(), e))
}

fn write_score(score: &Score, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            let file = File::create(path)
                .map_err(|e| anyhow!("Failed to create {}: {}", path.display(), e))?;
            score.write_to(BufWriter::new(file))?;
            info!("Wrote '{}'..!", path.display());
        }
        None => score.write_to(io::stdout().lock())?,
    }
    Ok(())
}

fn print_info(score: &Score, verbose: bool) {
    println!("title:  {}", score.title());
    println!("author: {}", score.author());
    println!("time:   {}", score.time_signature_text());
    println!("tempo:  {} change(s), {} at start", score.tempo_events().len(), score.tempo_at(0));
    println!(
        "length: {} ticks, {:.1}s",
        score.total_tick_length(),
        score.duration_ms() / 1000.0
    );
    println!("tracks: {}", score.track_count());

    for (index, track) in score.tracks().iter().enumerate() {
        let notes: usize = track.parts().iter().map(|p| p.len()).sum();
        println!(
            "  {}: '{}' program={} notes={} end={}",
            index,
            track.name(),
            track.program(),
            notes,
            track.max_tick_length()
        );

        if verbose {
            for (part_index, part) in track.parts().iter().enumerate() {
                println!("     part {}: {} note(s)", part_index, part.len());
            }
        }
    }

    if !score.markers().is_empty() {
        println!("markers:");
        for marker in score.markers() {
            println!("  {}", marker);
        }
    }
}

fn dump_json(score: &Score, pretty: bool) -> Result<String> {
    let dump = ScoreDump {
        title: score.title(),
        author: score.author(),
        time: score.time_signature_text(),
        tempo: score.tempo_events().clone(),
        markers: score.markers(),
        tracks: score
            .tracks()
            .iter()
            .map(|track| TrackDump {
                name: track.name(),
                program: track.program(),
                song_program: track.song_program(),
                panpot: track.panpot(),
                parts: track.parts(),
            })
            .collect(),
    };

    let json = if pretty {
        serde_json::to_string_pretty(&dump)?
    } else {
        serde_json::to_string(&dump)?
    };
    Ok(json)
}
