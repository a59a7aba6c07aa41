//! Narrator runtime.
//!
//! Wires the output backend, synthesis provider and engine together, starts
//! narration and services stdin commands until done.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use narration_player::output::{AudioOutput, CpalOutput, SilentOutput};
use narration_player::{ControlError, NarrationEvent, Narrator, PlaybackState, PlaybackTask, device};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::commands::{Command, HELP, parse_command};
use crate::config::NarratorConfig;
use crate::provider::HttpSynthesizer;
use crate::source::{WebTextSource, read_text_file};

const PREVIEW_CHARS: usize = 60;

/// Where the narration text comes from.
#[derive(Clone, Debug, PartialEq)]
pub enum InputSpec {
    /// A URL or literal text.
    Inline(String),
    /// A text file, or stdin for `-`.
    File(PathBuf),
}

impl InputSpec {
    fn reads_stdin(&self) -> bool {
        matches!(self, InputSpec::File(path) if path.as_os_str() == "-")
    }
}

#[derive(Debug, PartialEq)]
enum Flow {
    Continue,
    Quit,
}

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Narrate `input` starting at chunk `start` (1-based) and run the command loop.
pub async fn run(config: NarratorConfig, input: InputSpec, start: usize) -> Result<()> {
    let output = open_output(&config)?;
    let synthesizer = Arc::new(HttpSynthesizer::from_env(&config.synthesis)?);
    tracing::info!(
        endpoint = synthesizer.endpoint(),
        model = %config.synthesis.model,
        voice = %config.playback.voice,
        "synthesis provider"
    );

    let narrator = Narrator::new(config.playback.clone(), synthesizer, output);
    let mut events = narrator.subscribe();

    let source = WebTextSource::new(Duration::from_millis(config.source.timeout_ms.max(1)))?;
    let count = load_input(&narrator, &source, &input).await?;
    let first = start.saturating_sub(1);
    if first >= count {
        return Err(anyhow!("--start {start} is past the last chunk ({count})"));
    }
    tracing::info!(chunks = count, start = first + 1, "starting narration");
    watch(narrator.play(first, 0.0)?);

    let (interrupt_tx, mut interrupt_rx) = tokio::sync::mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("install ctrl-c handler")?;

    let mut stdin_open = !input.reads_stdin();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    if stdin_open {
        println!("{HELP}");
    }

    loop {
        tokio::select! {
            _ = interrupt_rx.recv() => {
                tracing::info!("interrupted");
                break;
            }
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(command)) => {
                        if apply_command(&narrator, command) == Flow::Quit {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                },
                Ok(None) => {
                    tracing::debug!("stdin closed; commands disabled");
                    stdin_open = false;
                }
                Err(e) => {
                    tracing::warn!("stdin read failed: {e}");
                    stdin_open = false;
                }
            },
            event = events.recv() => match event {
                Ok(NarrationEvent::Finished) => {
                    tracing::info!("narration finished");
                    break;
                }
                Ok(event) => log_event(&narrator, &event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    narrator.stop();
    Ok(())
}

fn open_output(config: &NarratorConfig) -> Result<Arc<dyn AudioOutput>> {
    if config.output.silent {
        tracing::info!("silent output (no audio device)");
        return Ok(Arc::new(SilentOutput::new()?));
    }
    let output = CpalOutput::open(config.output.device.as_deref())?;
    let info = output.info();
    tracing::info!(
        device = %info.device,
        rate_hz = info.sample_rate,
        channels = info.channels,
        format = %info.sample_format,
        "output device"
    );
    Ok(Arc::new(output))
}

async fn load_input(narrator: &Narrator, source: &WebTextSource, input: &InputSpec) -> Result<usize> {
    match input {
        InputSpec::Inline(text) => narrator
            .load_from(source, text)
            .await
            .context("load narration source"),
        InputSpec::File(path) => {
            let text = read_text_file(path).with_context(|| format!("read {:?}", path))?;
            match narrator.load_text(&text) {
                0 => Err(anyhow!("no text to narrate in {:?}", path)),
                count => Ok(count),
            }
        }
    }
}

/// Log how a playback loop ended. Active-path failures are also reported as events.
fn watch(task: PlaybackTask) {
    tokio::spawn(async move {
        match task.await {
            Ok(Ok(outcome)) => tracing::debug!(?outcome, "playback loop ended"),
            Ok(Err(e)) => tracing::debug!("playback loop stopped: {e}"),
            Err(e) => tracing::warn!("playback loop panicked: {e}"),
        }
    });
}

fn apply_command(narrator: &Narrator, command: Command) -> Flow {
    let result = match command {
        Command::Quit => return Flow::Quit,
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Pause => {
            if !narrator.pause() {
                println!("not playing");
            }
            Ok(())
        }
        Command::Resume => narrator.resume().map(watch),
        Command::Toggle => match narrator.state() {
            PlaybackState::Playing => {
                narrator.pause();
                Ok(())
            }
            PlaybackState::Paused => narrator.resume().map(watch),
            PlaybackState::Idle => narrator.play(0, 0.0).map(watch),
        },
        Command::Seek(number) => narrator.seek(number - 1).map(watch),
        Command::Next => {
            let target = narrator.current_index().map_or(0, |i| i + 1);
            narrator.seek(target).map(watch)
        }
        Command::Back => {
            let target = narrator.current_index().map_or(0, |i| i.saturating_sub(1));
            narrator.seek(target).map(watch)
        }
        Command::Rate(rate) => narrator.set_playback_rate(rate),
        Command::Voice(voice) => change_voice(narrator, &voice),
        Command::Status => {
            print_status(narrator);
            Ok(())
        }
        Command::Stop => {
            narrator.stop();
            Ok(())
        }
    };
    if let Err(e) = result {
        println!("{e}");
    }
    Flow::Continue
}

/// Switch voice and keep narrating if playback was running.
fn change_voice(narrator: &Narrator, voice: &str) -> Result<(), ControlError> {
    let was_playing = narrator.state() == PlaybackState::Playing;
    if !narrator.change_voice(voice) {
        println!("voice `{voice}` already selected");
        return Ok(());
    }
    if was_playing {
        narrator.resume().map(watch)?;
    }
    Ok(())
}

fn print_status(narrator: &Narrator) {
    match serde_json::to_string_pretty(&narrator.snapshot()) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!("status encode failed: {e}"),
    }
}

fn log_event(narrator: &Narrator, event: &NarrationEvent) {
    match event {
        NarrationEvent::ChunkScheduled {
            index,
            offset_seconds,
            duration_seconds,
            ..
        } => {
            let text = narrator.chunk(*index).map(|c| preview(&c.text)).unwrap_or_default();
            tracing::info!(
                chunk = index + 1,
                of = narrator.chunk_count(),
                offset = offset_seconds,
                duration = duration_seconds,
                "{text}"
            );
        }
        NarrationEvent::StateChanged { state, current_index } => {
            tracing::info!(?state, chunk = ?current_index.map(|i| i + 1), "state changed");
        }
        NarrationEvent::RateChanged { rate } => tracing::info!(rate, "rate changed"),
        NarrationEvent::VoiceChanged { voice } => tracing::info!(%voice, "voice changed"),
        NarrationEvent::PlaybackFailed(failure) => {
            tracing::warn!(chunk = failure.index + 1, "{}", failure.message);
            println!("playback paused at chunk {}; `r` retries", failure.index + 1);
        }
        NarrationEvent::ChunkFinished { index } => tracing::debug!(chunk = index + 1, "chunk finished"),
        NarrationEvent::SourceLoaded { chunk_count } => tracing::debug!(chunk_count, "source loaded"),
        NarrationEvent::Finished => {}
    }
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut out: String = flat.chars().take(PREVIEW_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> WebTextSource {
        WebTextSource::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("Line one.\nLine   two."), "Line one. Line two.");
        let long = "word ".repeat(40);
        let out = preview(&long);
        assert_eq!(out.chars().count(), PREVIEW_CHARS + 3);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn only_dash_file_reads_stdin() {
        assert!(InputSpec::File(PathBuf::from("-")).reads_stdin());
        assert!(!InputSpec::File(PathBuf::from("notes.txt")).reads_stdin());
        assert!(!InputSpec::Inline("-".to_string()).reads_stdin());
    }

    #[tokio::test]
    async fn file_input_loads_chunks() {
        let path = std::env::temp_dir().join(format!("narrator-runtime-{}.txt", std::process::id()));
        std::fs::write(&path, "First paragraph.\n\nSecond paragraph.").unwrap();
        let narrator = Narrator::new(
            Default::default(),
            Arc::new(HttpSynthesizer::new(&Default::default(), None).unwrap()),
            Arc::new(SilentOutput::new().unwrap()),
        );
        let count = load_input(&narrator, &source(), &InputSpec::File(path.clone())).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(count, 2);
        assert_eq!(narrator.chunk(1).unwrap().text, "Second paragraph.");
    }

    #[tokio::test]
    async fn empty_file_is_rejected() {
        let path = std::env::temp_dir().join(format!("narrator-empty-{}.txt", std::process::id()));
        std::fs::write(&path, "  \n\n ").unwrap();
        let narrator = Narrator::new(
            Default::default(),
            Arc::new(HttpSynthesizer::new(&Default::default(), None).unwrap()),
            Arc::new(SilentOutput::new().unwrap()),
        );
        let result = load_input(&narrator, &source(), &InputSpec::File(path.clone())).await;
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn commands_drive_the_narrator() {
        let narrator = Narrator::new(
            Default::default(),
            Arc::new(HttpSynthesizer::new(&Default::default(), None).unwrap()),
            Arc::new(SilentOutput::new().unwrap()),
        );
        assert_eq!(apply_command(&narrator, Command::Rate(1.5)), Flow::Continue);
        assert_eq!(narrator.snapshot().rate, 1.5);
        assert_eq!(apply_command(&narrator, Command::Pause), Flow::Continue);
        assert_eq!(narrator.state(), PlaybackState::Idle);
        assert_eq!(apply_command(&narrator, Command::Quit), Flow::Quit);
    }
}
