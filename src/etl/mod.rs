//! Core ETL (Extract, Transform, Load) abstractions
//!
//! This module provides the stage traits, the orchestrating [`Pipeline`] and
//! the [`RunReport`] it produces.

mod extract;
mod load;
mod pipeline;
mod report;
mod transform;

pub use extract::{Extraction, Extractor, FetchOutcome, FetchReport};
pub use load::{LoadReport, Loader, SkippedRelation};
pub use pipeline::Pipeline;
pub use report::{BatchSummary, FailureRecord, RunReport, RunStatus, Stage, StageCounts};
pub use transform::Transformer;
