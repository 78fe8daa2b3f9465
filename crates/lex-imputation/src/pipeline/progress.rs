//! Progress reporting and cancellation for imputation runs.
//!
//! Chains run on rayon worker threads, so reporters and tokens are shared
//! across threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use lex_imputation::{CancellationToken, Imputer};
//!
//! let token = CancellationToken::new();
//! let imputer = Imputer::builder()
//!     .cancellation_token(token.clone())
//!     .on_progress(|update| eprintln!("[{:.0}%] {}", update.progress * 100.0, update.message))
//!     .build()?;
//!
//! // from another thread: token.cancel();
//! let result = imputer.impute(&dataset)?;
//! if result.cancelled {
//!     eprintln!("stopped early");
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Phases of an imputation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImputationStage {
    /// Building the predictor matrix, methods and visit sequence
    Initializing,
    /// Checking the plan against the dataset
    Validating,
    /// Running the chains
    Imputing,
    Complete,
    Cancelled,
    Failed,
}

impl ImputationStage {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Initializing => "Initializing",
            Self::Validating => "Validating Plan",
            Self::Imputing => "Imputing Values",
            Self::Complete => "Complete",
            Self::Cancelled => "Cancelled",
            Self::Failed => "Failed",
        }
    }

    /// Share of the overall run taken by this stage.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Initializing => 0.05,
            Self::Validating => 0.05,
            Self::Imputing => 0.90,
            Self::Complete | Self::Cancelled | Self::Failed => 0.0,
        }
    }

    /// Overall progress when this stage starts.
    pub fn base_progress(&self) -> f32 {
        match self {
            Self::Initializing => 0.0,
            Self::Validating => 0.05,
            Self::Imputing => 0.10,
            Self::Complete => 1.0,
            Self::Cancelled | Self::Failed => 0.0,
        }
    }
}

/// A progress notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub stage: ImputationStage,

    /// Finer position, e.g. `"Chain 2, iteration 3"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_stage: Option<String>,

    /// Overall progress (0.0 - 1.0)
    pub progress: f32,

    /// Progress within the stage (0.0 - 1.0)
    pub stage_progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_processed: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_total: Option<usize>,
}

impl ProgressUpdate {
    pub fn new(stage: ImputationStage, stage_progress: f32, message: impl Into<String>) -> Self {
        let stage_progress = stage_progress.clamp(0.0, 1.0);
        Self {
            stage,
            sub_stage: None,
            progress: (stage.base_progress() + stage.weight() * stage_progress).clamp(0.0, 1.0),
            stage_progress,
            message: message.into(),
            items_processed: None,
            items_total: None,
        }
    }

    /// Update counting finished work items (chain iterations while imputing).
    pub fn with_items(
        stage: ImputationStage,
        sub_stage: impl Into<String>,
        current: usize,
        total: usize,
        message: impl Into<String>,
    ) -> Self {
        let fraction = if total > 0 {
            current as f32 / total as f32
        } else {
            0.0
        };
        Self {
            sub_stage: Some(sub_stage.into()),
            items_processed: Some(current),
            items_total: Some(total),
            ..Self::new(stage, fraction, message)
        }
    }

    pub fn complete(message: impl Into<String>) -> Self {
        Self::new(ImputationStage::Complete, 1.0, message)
    }

    pub fn cancelled(completed_iterations: &[usize]) -> Self {
        Self::new(
            ImputationStage::Cancelled,
            0.0,
            format!(
                "Imputation cancelled; iterations completed per chain: {:?}",
                completed_iterations
            ),
        )
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ImputationStage::Failed, 0.0, message)
    }
}

/// Receiver of [`ProgressUpdate`]s. Called from worker threads; keep it cheap.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: ProgressUpdate);
}

/// [`ProgressReporter`] backed by a closure.
pub struct ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    callback: F,
}

impl<F> ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> ProgressReporter for ClosureProgressReporter<F>
where
    F: Fn(ProgressUpdate) + Send + Sync,
{
    fn report(&self, update: ProgressUpdate) {
        (self.callback)(update);
    }
}

/// Shared flag requesting that chains stop after their current iteration.
///
/// Chains check the token before every iteration. A cancelled run still
/// returns fully resolved datasets, each tagged with the iterations it
/// completed.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

static_assertions::assert_impl_all!(CancellationToken: Send, Sync);
static_assertions::assert_impl_all!(ProgressUpdate: Send, Sync);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // =========================================================================
    // Cancellation Tests
    // =========================================================================

    #[test]
    fn test_cancellation_token_shared_between_clones() {
        let token = CancellationToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());

        token.cancel();
        assert!(other.is_cancelled());

        other.reset();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_cancellation_visible_across_threads() {
        let token = CancellationToken::new();
        let worker = token.clone();
        token.cancel();
        let seen = std::thread::spawn(move || worker.is_cancelled())
            .join()
            .unwrap();
        assert!(seen);
    }

    // =========================================================================
    // Progress Update Tests
    // =========================================================================

    #[test]
    fn test_with_items_maps_into_imputing_share() {
        let update = ProgressUpdate::with_items(
            ImputationStage::Imputing,
            "Chain 1, iteration 5",
            5,
            10,
            "Imputing",
        );
        assert_eq!(update.stage_progress, 0.5);
        assert!((update.progress - 0.55).abs() < 1e-6);
        assert_eq!(update.items_processed, Some(5));
        assert_eq!(update.sub_stage.as_deref(), Some("Chain 1, iteration 5"));
    }

    #[test]
    fn test_stage_weights_sum_to_one() {
        let total: f32 = [
            ImputationStage::Initializing,
            ImputationStage::Validating,
            ImputationStage::Imputing,
        ]
        .iter()
        .map(|s| s.weight())
        .sum();
        assert!((total - 1.0).abs() < 1e-6);
        assert_eq!(ProgressUpdate::complete("done").progress, 1.0);
    }

    #[test]
    fn test_cancelled_update_lists_iterations() {
        let update = ProgressUpdate::cancelled(&[2, 3]);
        assert_eq!(update.stage, ImputationStage::Cancelled);
        assert!(update.message.contains("[2, 3]"));
    }

    #[test]
    fn test_progress_update_json() {
        let update = ProgressUpdate::new(ImputationStage::Validating, 1.0, "Plan checked");
        let json = serde_json::to_string(&update).unwrap();
        assert!(json.contains("\"stage\":\"validating\""));
        assert!(!json.contains("sub_stage"));
    }

    #[test]
    fn test_closure_reporter_from_worker_thread() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let reporter = Arc::new(ClosureProgressReporter::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let shared = reporter.clone();
        std::thread::spawn(move || {
            shared.report(ProgressUpdate::new(ImputationStage::Imputing, 0.1, "chain"))
        })
        .join()
        .unwrap();
        reporter.report(ProgressUpdate::complete("done"));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
