use std::fmt;
use std::rc::Rc;

use crate::scheduler::Scheduler;

/// When writing an observable is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WritePolicy {
	/// Observed observables may only change inside a batch.
	Observed,
	/// Every observable may only change inside a batch.
	Always,
	/// Writes are unrestricted.
	#[default]
	Never,
}

/// When reading an observable is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadPolicy {
	/// Reads must happen inside a batch or a derivation.
	Always,
	/// Reads are unrestricted.
	#[default]
	Never,
}

#[derive(Clone)]
pub struct ReactiveConfig {
	/// Let errors from user code escape instead of capturing them
	/// in the derivation that raised them.
	pub disable_error_boundaries: bool,
	pub write_policy: WritePolicy,
	pub read_policy: ReadPolicy,
	/// Upper bound on reaction drain rounds before the context gives up.
	/// Zero falls back to [`DEFAULT_MAX_ITERATIONS`].
	pub max_iterations: usize,
	/// Reject writes coming from a thread other than the one
	/// that created the context.
	pub enforce_write_on_main_thread: bool,
	/// Timer capability used by delayed reactions and `when` timeouts.
	pub scheduler: Option<Rc<dyn Scheduler>>,
}

pub const DEFAULT_MAX_ITERATIONS: usize = 100;

impl ReactiveConfig {
	pub fn with_scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
		self.scheduler = Some(scheduler);
		self
	}

	pub(crate) fn iteration_bound(&self) -> usize {
		match self.max_iterations {
			0 => DEFAULT_MAX_ITERATIONS,
			bound => bound,
		}
	}
}

impl Default for ReactiveConfig {
	fn default() -> Self {
		ReactiveConfig {
			disable_error_boundaries: false,
			write_policy: WritePolicy::Never,
			read_policy: ReadPolicy::Never,
			max_iterations: DEFAULT_MAX_ITERATIONS,
			enforce_write_on_main_thread: true,
			scheduler: None,
		}
	}
}

impl fmt::Debug for ReactiveConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReactiveConfig")
			.field("disable_error_boundaries", &self.disable_error_boundaries)
			.field("write_policy", &self.write_policy)
			.field("read_policy", &self.read_policy)
			.field("max_iterations", &self.max_iterations)
			.field(
				"enforce_write_on_main_thread",
				&self.enforce_write_on_main_thread,
			)
			.field("scheduler", &self.scheduler.is_some())
			.finish()
	}
}
