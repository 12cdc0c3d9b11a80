//! Built-in command parser.
//!
//! Accepts either the plain field form (`test|hello|0`) or a single JSON
//! object field (`{"command":"random","args":[8]}`).

use serde::Deserialize;
use std::time::Duration;

use super::TaskError;
use crate::protocol::DELIMITER;

/// Parsed built-in command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Wait `delay`, then answer with `value`.
    Test { value: String, delay: Duration },
    /// Answer with a random `[A-Z0-9]` string of `length` characters.
    Random { length: usize },
    /// Wait the configured ping delay, then answer `pong` followed by `args`.
    Ping { args: Vec<String> },
}

/// JSON request payload.
#[derive(Debug, Deserialize)]
struct JsonCommand {
    command: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

/// Parse request fields into a [`Command`].
pub fn parse(fields: &[String], max_random_length: usize) -> Result<Command, TaskError> {
    let Some(first) = fields.first() else {
        return Err(TaskError::MissingCommand);
    };

    if first.trim_start().starts_with('{') {
        // The payload may itself contain delimiters, so rejoin before parsing.
        let raw = fields.join(&*DELIMITER.encode_utf8(&mut [0; 4]));
        let json: JsonCommand =
            serde_json::from_str(&raw).map_err(|e| TaskError::InvalidJson(e.to_string()))?;
        let args = json
            .args
            .into_iter()
            .map(json_arg)
            .collect::<Result<Vec<_>, _>>()?;
        return parse_named(&json.command, args, max_random_length);
    }

    parse_named(first, fields[1..].to_vec(), max_random_length)
}

fn parse_named(
    name: &str,
    mut args: Vec<String>,
    max_random_length: usize,
) -> Result<Command, TaskError> {
    match name.to_ascii_lowercase().as_str() {
        "test" => {
            if args.is_empty() {
                return Err(TaskError::MissingArgument("value"));
            }
            let delay = match args.get(1) {
                Some(raw) => parse_delay(raw)?,
                None => Duration::ZERO,
            };
            let value = args.remove(0);
            Ok(Command::Test { value, delay })
        }
        "random" => {
            let raw = args.first().ok_or(TaskError::MissingArgument("length"))?;
            let length: usize = raw.trim().parse().map_err(|_| invalid("length", raw))?;
            if length > max_random_length {
                return Err(invalid("length", raw));
            }
            Ok(Command::Random { length })
        }
        "ping" => Ok(Command::Ping { args }),
        "" => Err(TaskError::MissingCommand),
        _ => Err(TaskError::UnknownCommand(name.to_string())),
    }
}

/// Parse a delay in (possibly fractional) seconds.
fn parse_delay(raw: &str) -> Result<Duration, TaskError> {
    let secs: f64 = raw.trim().parse().map_err(|_| invalid("delay", raw))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(invalid("delay", raw));
    }
    Duration::try_from_secs_f64(secs).map_err(|_| invalid("delay", raw))
}

fn json_arg(value: serde_json::Value) -> Result<String, TaskError> {
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        other => Err(invalid("args", &other.to_string())),
    }
}

fn invalid(name: &'static str, value: &str) -> TaskError {
    TaskError::InvalidArgument {
        name,
        value: value.to_string(),
    }
}
