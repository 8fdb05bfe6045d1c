use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::metadata::MediaClass;

/// Flag names match the original tool so existing scripts keep working.
#[derive(Debug, Parser)]
#[command(
    name = "rawrec",
    version,
    about = "Turns raw per-participant call captures (rtpdump + SDP pairs) into playable media files"
)]
pub struct Cli {
    /// Recording input: a directory of segment files or a .tar.gz archive
    #[arg(long = "inputFile", global = true, value_name = "PATH")]
    pub input_file: Option<PathBuf>,

    /// Recording input: an s3://bucket/key archive, fetched with the aws cli
    #[arg(
        long = "inputS3",
        global = true,
        value_name = "S3_URI",
        conflicts_with = "input_file"
    )]
    pub input_s3: Option<String>,

    /// Directory for generated media files
    #[arg(long, global = true, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Hierarchical track selection: "*" (or empty) selects everything at
/// that level, and a wildcard at a higher level makes the lower
/// selectors ineffective.
#[derive(Debug, Clone, Args)]
pub struct Selector {
    #[arg(long = "userId", value_name = "ID", default_value = "*")]
    pub user_id: String,

    #[arg(long = "sessionId", value_name = "ID", default_value = "*")]
    pub session_id: String,

    #[arg(long = "trackId", value_name = "ID", default_value = "*")]
    pub track_id: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the tracks and segments found in the recording
    ListTracks {
        #[command(flatten)]
        selector: Selector,

        /// Emit the metadata as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Extract each audio track into one continuous per-track file
    ExtractAudio {
        #[command(flatten)]
        selector: Selector,

        /// Bridge inter-segment timing gaps with synthesized silence
        #[arg(long = "fill_gaps")]
        fill_gaps: bool,
    },

    /// Extract each video track into one continuous per-track file
    ExtractVideo {
        #[command(flatten)]
        selector: Selector,

        /// Bridge inter-segment timing gaps with black frames
        #[arg(long = "fill_gaps")]
        fill_gaps: bool,
    },

    /// Extract audio and video tracks and mux each pair into one file
    MuxAv {
        #[command(flatten)]
        selector: Selector,

        /// Which media class to include: camera, screen share, or both
        #[arg(long, value_enum, default_value_t)]
        media: MediaClass,
    },

    /// Extract all audio tracks and mix them into a single file
    MixAudio {
        #[command(flatten)]
        selector: Selector,

        /// Skip gap filling before the mix
        #[arg(long = "no-fill-gaps")]
        no_fill_gaps: bool,

        /// Which media class to include; screen-share audio is excluded
        /// unless asked for
        #[arg(long, value_enum, default_value_t)]
        media: MediaClass,
    },

    /// Extract audio and video with gap filling, then mux every pair
    ProcessAll {
        #[command(flatten)]
        selector: Selector,

        /// Which media class to include
        #[arg(long, value_enum, default_value_t = MediaClass::Both)]
        media: MediaClass,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_spelling_matches_the_original_tool() {
        let cli = Cli::try_parse_from([
            "rawrec",
            "extract-audio",
            "--inputFile",
            "/tmp/rec",
            "--output",
            "/tmp/out",
            "--userId",
            "alice",
            "--fill_gaps",
        ])
        .unwrap();
        assert_eq!(cli.input_file, Some(PathBuf::from("/tmp/rec")));
        match cli.command {
            Command::ExtractAudio { selector, fill_gaps } => {
                assert_eq!(selector.user_id, "alice");
                assert_eq!(selector.session_id, "*");
                assert!(fill_gaps);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_input_flags_are_mutually_exclusive() {
        let res = Cli::try_parse_from([
            "rawrec",
            "list-tracks",
            "--inputFile",
            "/tmp/rec",
            "--inputS3",
            "s3://bucket/rec.tar.gz",
        ]);
        assert!(res.is_err());
    }

    #[test]
    fn test_media_class_values() {
        let cli = Cli::try_parse_from([
            "rawrec",
            "mux-av",
            "--inputFile",
            "x",
            "--output",
            "y",
            "--media",
            "display",
        ])
        .unwrap();
        match cli.command {
            Command::MuxAv { media, .. } => assert_eq!(media, MediaClass::Display),
            _ => panic!("wrong command"),
        }
    }
}
