use clap::Parser;
use tracing_subscriber::EnvFilter;

mod archive;
mod cli;
mod encoder;
mod ffmpeg;
mod metadata;
mod mixer;
mod muxer;
mod pipeline;
mod rtp;
mod timeline;

use cli::{Cli, Command, Selector};
use metadata::{filter_tracks, MediaClass, RecordingMetadata, TrackKind};
use pipeline::{Pipeline, RunOptions};

fn main() {
    if let Err(e) = try_main() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(format!("rawrec={default_level}").parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    run(cli)
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    if cli.input_file.is_none() && cli.input_s3.is_none() {
        return Err("either --inputFile or --inputS3 is required".into());
    }

    // Holds downloaded/unpacked input for the duration of the run.
    let stage_scratch = tempfile::tempdir()?;
    let input_dir = archive::stage_input(
        cli.input_file.as_deref(),
        cli.input_s3.as_deref(),
        stage_scratch.path(),
    )?;

    let metadata = metadata::parse_directory(&input_dir)?;

    match cli.command {
        Command::ListTracks { selector, json } => list_tracks(&metadata, &selector, json),
        Command::ExtractAudio { selector, fill_gaps } => {
            let pipeline = build_pipeline(&cli.output, metadata, &selector, MediaClass::Both)?;
            pipeline.extract(TrackKind::Audio, MediaClass::Both, fill_gaps)?;
            Ok(())
        }
        Command::ExtractVideo { selector, fill_gaps } => {
            let pipeline = build_pipeline(&cli.output, metadata, &selector, MediaClass::Both)?;
            pipeline.extract(TrackKind::Video, MediaClass::Both, fill_gaps)?;
            Ok(())
        }
        Command::MuxAv { selector, media } => {
            let pipeline = build_pipeline(&cli.output, metadata, &selector, media)?;
            pipeline.mux_av()?;
            Ok(())
        }
        Command::MixAudio {
            selector,
            no_fill_gaps,
            media,
        } => {
            let pipeline = build_pipeline(&cli.output, metadata, &selector, media)?;
            pipeline.mix_audio(!no_fill_gaps)?;
            Ok(())
        }
        Command::ProcessAll { selector, media } => {
            let pipeline = build_pipeline(&cli.output, metadata, &selector, media)?;
            pipeline.process_all()?;
            Ok(())
        }
    }
}

fn build_pipeline(
    output: &Option<std::path::PathBuf>,
    metadata: RecordingMetadata,
    selector: &Selector,
    media: MediaClass,
) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let output_dir = output
        .clone()
        .ok_or("--output is required for this command")?;
    Ok(Pipeline::new(
        metadata,
        RunOptions {
            user_id: selector.user_id.clone(),
            session_id: selector.session_id.clone(),
            track_id: selector.track_id.clone(),
            media,
            output_dir,
        },
    )?)
}

fn list_tracks(
    metadata: &RecordingMetadata,
    selector: &Selector,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracks = filter_tracks(
        &metadata.tracks,
        &selector.user_id,
        &selector.session_id,
        &selector.track_id,
    );

    if json {
        let listing = RecordingMetadata { tracks };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    if tracks.is_empty() {
        println!("no tracks");
        return Ok(());
    }
    for track in &tracks {
        let duration_ms: u64 = track
            .segments
            .iter()
            .map(|s| s.wallclock_duration_ms())
            .sum();
        println!(
            "{}\tuser={}\tsession={}\ttrack={}\tsegments={}\tduration={}s{}",
            track.kind,
            track.user_id,
            track.session_id,
            track.track_id,
            track.segments.len(),
            duration_ms / 1000,
            if track.is_screenshare { "\tscreenshare" } else { "" },
        );
        for segment in &track.segments {
            println!(
                "\t{}\tcodec={}\tpackets={}\tstart_ms={}\tend_ms={}",
                segment.base_filename,
                segment.codec,
                segment.packet_count,
                segment.first_unix_ms,
                segment.last_unix_ms,
            );
        }
    }
    Ok(())
}
