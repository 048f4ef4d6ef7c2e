use rand::distr::{Alphanumeric, SampleString};

pub mod chunk;

pub mod chunk_processor;

pub mod execution;

pub mod execution_context;

pub mod item;

pub mod job;

pub mod launch;

pub mod listener;

pub mod parameters;

pub mod skip;

pub mod status;

pub mod step;

pub mod tasklet;

pub mod transaction;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
