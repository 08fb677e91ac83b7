//! promhouse common types, label names, and errors.
//!
//! This crate provides the foundational types shared by the other crates:
//! - The decoded remote-write / remote-read protocol model
//! - The immutable [`Sample`] record that flows from ingestion to the writers
//! - Well-known label names and their routing semantics
//! - The unified error taxonomy with stable codes

pub mod error;
pub mod labels;
pub mod remote;
pub mod sample;

pub use error::{Error, Result};
pub use remote::{
    Label, LabelMatcher, MatchType, QuerySpec, ReadRequest, SamplePoint, TimeSeries, WriteRequest,
};
pub use sample::Sample;
