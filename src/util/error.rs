//! Error classification for acknowledgement decisions.
//!
//! Handlers return an error only to request a NACK; anything recognizable as
//! a stale precondition or an internal invariant breach is classified here
//! and resolved before the error can reach the consumer loop.

use anyhow::Error;

use crate::step::{InvariantViolation, StaleNotification, TransitionError};

/// A stale precondition: duplicate or out-of-order notification. Acknowledge
/// silently, log at warn.
pub(crate) fn is_stale(error: &Error) -> bool {
    if matches!(
        error.downcast_ref::<TransitionError>(),
        Some(TransitionError::Stale { .. })
    ) {
        return true;
    }
    error.downcast_ref::<StaleNotification>().is_some()
}

/// A logical invariant violation: the target entity is moved to its error
/// state and the message acknowledged.
pub(crate) fn is_invariant_violation(error: &Error) -> bool {
    if matches!(
        error.downcast_ref::<TransitionError>(),
        Some(TransitionError::Invalid { .. })
    ) {
        return true;
    }
    error.downcast_ref::<InvariantViolation>().is_some()
}
