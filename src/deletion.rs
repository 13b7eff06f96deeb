mod confirmation;
mod service;

pub use confirmation::{ConfirmationDialog, ConfirmationService};
pub use service::{DeletionService, SafetyCheckResult};
