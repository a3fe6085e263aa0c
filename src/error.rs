use std::any::Any;
use std::fmt;

/// Errors produced by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
	/// A computed value re-entered its own evaluation.
	#[error("Cycle detected in computation {name}")]
	CyclicComputation { name: String },

	/// The reaction queue did not drain within the configured bound.
	/// The context has been reset when this is returned.
	#[error(
		"Reaction doesn't converge to a stable state after {iterations} iterations. \
		 Probably there is a cycle in the reactive function: {name}"
	)]
	CyclicReaction { name: String, iterations: usize },

	/// User code failed inside a tracking function, effect or action.
	#[error(transparent)]
	Caught(#[from] CaughtError),

	/// A `when_reaction` timed out before its predicate became true.
	#[error("When reaction {name} timed out")]
	Timeout { name: String },

	/// A read or write happened where the configured policy forbids it.
	#[error("{0}")]
	ContractViolation(String),
}

impl ReactiveError {
	/// Structural errors are never captured by error boundaries.
	pub fn is_structural(&self) -> bool {
		matches!(
			self,
			ReactiveError::CyclicComputation { .. }
				| ReactiveError::CyclicReaction { .. }
				| ReactiveError::ContractViolation(_)
		)
	}

	pub fn is_caught(&self) -> bool {
		matches!(self, ReactiveError::Caught(_))
	}

	/// Raise this error at the call site. The panic payload is the error
	/// itself, so an enclosing derivation recovers it unchanged.
	pub fn raise(self) -> ! {
		std::panic::panic_any(self)
	}

	pub(crate) fn violation(message: impl Into<String>) -> Self {
		ReactiveError::ContractViolation(message.into())
	}

	pub(crate) fn from_panic(payload: Box<dyn Any + Send>, origin: &str) -> Self {
		let payload = match payload.downcast::<ReactiveError>() {
			Ok(error) => return *error,
			Err(payload) => payload,
		};

		let message = if let Some(message) = payload.downcast_ref::<&'static str>() {
			(*message).to_owned()
		} else if let Some(message) = payload.downcast_ref::<String>() {
			message.clone()
		} else {
			"Box<dyn Any>".to_owned()
		};

		ReactiveError::Caught(CaughtError {
			origin: origin.to_owned(),
			message,
		})
	}
}

/// A failure raised by user code, captured by the derivation that ran it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtError {
	origin: String,
	message: String,
}

impl CaughtError {
	pub fn new(origin: impl Into<String>, message: impl Into<String>) -> Self {
		CaughtError {
			origin: origin.into(),
			message: message.into(),
		}
	}

	/// Name of the derivation or action the failure happened in.
	pub fn origin(&self) -> &str {
		&self.origin
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

impl fmt::Display for CaughtError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Caught error in {}: {}", self.origin, self.message)
	}
}

impl std::error::Error for CaughtError {}

pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Run user code, turning a panic into a `ReactiveError`.
pub(crate) fn catch_user<T>(origin: &str, func: impl FnOnce() -> T) -> Result<T> {
	std::panic::catch_unwind(std::panic::AssertUnwindSafe(func))
		.map_err(|payload| ReactiveError::from_panic(payload, origin))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn string_payloads_become_caught_errors() {
		let error = catch_user("Autorun@1", || -> () { panic!("boom {}", 42) }).unwrap_err();
		assert_eq!(
			error,
			ReactiveError::Caught(CaughtError::new("Autorun@1", "boom 42"))
		);
		assert!(error.is_caught());
		assert!(!error.is_structural());
	}

	#[test]
	fn reactive_payloads_are_preserved() {
		let error = catch_user("Computed@2", || -> () {
			ReactiveError::CyclicComputation {
				name: "Computed@2".into(),
			}
			.raise()
		})
		.unwrap_err();
		assert!(error.is_structural());
		assert_eq!(error.to_string(), "Cycle detected in computation Computed@2");
	}
}
