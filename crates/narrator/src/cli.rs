use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "narrator", version = VERSION)]
pub struct Args {
    /// URL to fetch and narrate, or the text itself
    #[arg(conflicts_with = "file")]
    pub input: Option<String>,

    /// Read narration text from a file ("-" for stdin)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Config file (TOML). Defaults to narrator.toml next to the executable, if present
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Synthesis voice
    #[arg(long)]
    pub voice: Option<String>,

    /// Playback rate multiplier
    #[arg(long)]
    pub rate: Option<f64>,

    /// Chunk number to start from (1-based)
    #[arg(long, default_value_t = 1)]
    pub start: usize,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Play without an audio device, following the wall clock
    #[arg(long)]
    pub silent: bool,

    /// Number of chunks synthesized ahead of playback
    #[arg(long)]
    pub prefetch_window: Option<usize>,

    /// Longest chunk sent to the synthesizer, in characters
    #[arg(long)]
    pub max_chunk_chars: Option<usize>,
}
