//! Coroutine Errors
//!
//! Every fallible coroutine operation returns [`CoroutineError`]. Failures
//! never change coroutine state: a failed `call` leaves the coroutine Idle and
//! retryable.
//!
//! Panics are not errors here. A panic in a coroutine body or in a root-stack
//! callback is caught at the stack boundary and resumed on the caller's side,
//! so it unwinds through the caller exactly as if the body had run inline.

use crate::coroutine::CoroutineState;
use costack_core::AllocError;

#[derive(Debug)]
pub enum CoroutineError {
    /// The coroutine's stack could not be allocated
    AllocationFailure(AllocError),
    /// The operation is not allowed right now
    ///
    /// `state` is the coroutine's state, or `None` when the operation was
    /// attempted off the stack it must run on (e.g. yielding from the root
    /// stack).
    InvalidState {
        operation: &'static str,
        state: Option<CoroutineState>,
    },
}

impl std::fmt::Display for CoroutineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CoroutineError::AllocationFailure(e) => {
                write!(f, "Failed to allocate coroutine stack: {}", e)
            }
            CoroutineError::InvalidState {
                operation,
                state: Some(state),
            } => write!(f, "Cannot {} a coroutine that is {}", operation, state),
            CoroutineError::InvalidState {
                operation,
                state: None,
            } => write!(f, "Cannot {} outside the coroutine's own stack", operation),
        }
    }
}

impl std::error::Error for CoroutineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CoroutineError::AllocationFailure(e) => Some(e),
            CoroutineError::InvalidState { .. } => None,
        }
    }
}

impl From<AllocError> for CoroutineError {
    fn from(e: AllocError) -> Self {
        CoroutineError::AllocationFailure(e)
    }
}

/// Format a panic payload into an error message
pub fn format_panic_payload(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_invalid_state_messages() {
        let err = CoroutineError::InvalidState {
            operation: "resume",
            state: Some(CoroutineState::Finished),
        };
        assert_eq!(err.to_string(), "Cannot resume a coroutine that is finished");
        assert!(err.source().is_none());

        let err = CoroutineError::InvalidState {
            operation: "yield",
            state: None,
        };
        assert_eq!(
            err.to_string(),
            "Cannot yield outside the coroutine's own stack"
        );
    }

    #[test]
    fn test_allocation_failure_keeps_source() {
        let err: CoroutineError = AllocError::Overflow {
            requested: usize::MAX,
        }
        .into();
        assert!(matches!(err, CoroutineError::AllocationFailure(_)));
        assert!(err.to_string().starts_with("Failed to allocate coroutine stack"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_format_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("panic message");
        assert_eq!(format_panic_payload(&payload), "panic message");

        let payload: Box<dyn std::any::Any + Send> = Box::new("owned panic".to_string());
        assert_eq!(format_panic_payload(&payload), "owned panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new(17u8);
        assert_eq!(format_panic_payload(&payload), "unknown panic");
    }
}
