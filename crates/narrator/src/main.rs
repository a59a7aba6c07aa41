//! Narrator: reads an article or text aloud through a speech synthesis API.
//!
//! The text is split into paragraph chunks that are synthesized ahead of
//! playback and scheduled back to back on the output device, so narration
//! runs without gaps. Playback is controlled with short commands on stdin.

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use narrator::cli::Args;
use narrator::config::NarratorConfig;
use narrator::runtime::{self, InputSpec};

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,narrator=info,narration_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let mut config = NarratorConfig::resolve(args.config.as_deref())?;
    config.apply_args(&args);

    let input = match (&args.file, &args.input) {
        (Some(path), _) => InputSpec::File(path.clone()),
        (None, Some(text)) => InputSpec::Inline(text.clone()),
        (None, None) => return Err(anyhow!("nothing to narrate: pass a URL, text, or --file")),
    };

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(runtime::run(config, input, args.start))
}
