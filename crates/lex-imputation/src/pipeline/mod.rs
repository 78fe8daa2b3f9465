//! Chained equations engine.
//!
//! [`Imputer`] runs `m` independent chains over a working copy of the data,
//! reporting progress and honoring a [`CancellationToken`] between
//! iterations. Each chain visits variables in a [`VisitSequence`] and
//! records a [`ConvergenceTrace`].

mod builder;
mod chain;
pub mod progress;
pub mod trace;
pub mod visit;

pub use builder::{
    ImputationPlan, ImputationResult, ImputedDataset, Imputer, ImputerBuilder, LongRecord,
};
pub use progress::{
    CancellationToken, ClosureProgressReporter, ImputationStage, ProgressReporter, ProgressUpdate,
};
pub use trace::{ConvergenceTrace, FitWarning, LevelFrequency, TraceEntry, TraceStatistic};
pub use visit::VisitSequence;
