//! Top-level error type for a sieve run.

use std::io;

use crate::bigint::ArithmeticError;
use crate::plan::Segment;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The run parameters were rejected before any worker started.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A big-integer operation left the representable range. Always fatal,
    /// the prime list could not be trusted.
    #[error("arithmetic error: {0}")]
    Arithmetic(#[from] ArithmeticError),
    /// Some segments were sieved but could not be persisted.
    #[error("failed to write {} of {total} segments{}", .failed.len(), first_failed(.failed))]
    IoFailure {
        failed: Vec<Segment>,
        total: usize,
        #[source]
        source: io::Error,
    },
    /// Setting up or finishing the output failed.
    #[error("output error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

fn first_failed(failed: &[Segment]) -> String {
    match failed.first() {
        Some(segment) => format!(" (first: {segment})"),
        None => String::new(),
    }
}
