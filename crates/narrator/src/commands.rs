//! Interactive commands read from stdin while narrating.

use thiserror::Error;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Pause,
    Resume,
    Toggle,
    /// Seek to a chunk number, 1-based as typed.
    Seek(usize),
    Next,
    Back,
    Rate(f64),
    Voice(String),
    Status,
    Stop,
    Quit,
    Help,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandParseError {
    #[error("unknown command `{0}` (type `help`)")]
    Unknown(String),
    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),
    #[error("invalid argument `{value}` for `{command}`")]
    InvalidArgument { command: &'static str, value: String },
}

pub const HELP: &str = "commands: p|pause  r|resume  t|toggle  s|seek N  n|next  b|back  rate X  voice NAME  status  stop  q|quit";

/// Parse one input line. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, CommandParseError> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let arg = parts.next();
    let command = match word.to_ascii_lowercase().as_str() {
        "p" | "pause" => Command::Pause,
        "r" | "resume" => Command::Resume,
        "t" | "toggle" => Command::Toggle,
        "n" | "next" => Command::Next,
        "b" | "back" => Command::Back,
        "status" => Command::Status,
        "stop" => Command::Stop,
        "q" | "quit" | "exit" => Command::Quit,
        "h" | "help" | "?" => Command::Help,
        "s" | "seek" => {
            let value = arg.ok_or(CommandParseError::MissingArgument("seek"))?;
            match value.parse::<usize>() {
                Ok(n) if n >= 1 => Command::Seek(n),
                _ => {
                    return Err(CommandParseError::InvalidArgument {
                        command: "seek",
                        value: value.to_string(),
                    });
                }
            }
        }
        "rate" => {
            let value = arg.ok_or(CommandParseError::MissingArgument("rate"))?;
            match value.parse::<f64>() {
                Ok(rate) if rate.is_finite() && rate > 0.0 => Command::Rate(rate),
                _ => {
                    return Err(CommandParseError::InvalidArgument {
                        command: "rate",
                        value: value.to_string(),
                    });
                }
            }
        }
        "voice" => Command::Voice(arg.ok_or(CommandParseError::MissingArgument("voice"))?.to_string()),
        other => return Err(CommandParseError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
