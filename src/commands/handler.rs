//! Built-in command handlers.

use rand::Rng;
use std::time::Duration;
use tracing::trace;

use super::parser::Command;

/// Alphabet for `random`: uppercase ASCII letters and digits.
pub const RANDOM_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Run a parsed command and return its payload fields.
///
/// Delays are tokio timers, so waiting never ties up a runtime thread.
pub async fn execute(command: Command, ping_delay: Duration) -> Vec<String> {
    match command {
        Command::Test { value, delay } => {
            if !delay.is_zero() {
                trace!(?delay, "test: sleeping");
                tokio::time::sleep(delay).await;
            }
            vec![value]
        }

        Command::Random { length } => vec![random_string(length)],

        Command::Ping { args } => {
            tokio::time::sleep(ping_delay).await;
            let mut payload = Vec::with_capacity(args.len() + 1);
            payload.push("pong".to_string());
            payload.extend(args);
            payload
        }
    }
}

/// Generate `length` characters drawn from [`RANDOM_CHARSET`].
pub fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| RANDOM_CHARSET[rng.gen_range(0..RANDOM_CHARSET.len())] as char)
        .collect()
}
