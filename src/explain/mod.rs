mod tracker;

pub use tracker::{ExplanationOutcome, ExplanationTracker, PendingExplanation, RequestState};
