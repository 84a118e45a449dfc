//! Caller-facing text for operation outcomes.

use std::fmt::Display;

/// The literal message for an outcome, newline-terminated.
pub fn render<T: Display, E: Display>(outcome: &Result<T, E>) -> String {
    match outcome {
        Ok(value) => format!("{}\n", value),
        Err(err) => format!("{}\n", err),
    }
}
