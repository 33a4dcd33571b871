//! Handlers for operations that change local or remote state.

pub mod results;
pub mod submission;

pub use results::{ResultsError, ResultsHandler, ResultsOutcome};
pub use submission::{generate_patient_id, SubmissionError, SubmissionHandler, SubmissionOutcome};
