use std::cell::{Cell, RefCell};
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::time::Duration;

use crate::Result;

pub type Task = Box<dyn FnOnce() -> Result<()>>;

/// Timer capability used for delayed reactions and `when` timeouts.
///
/// Implementations must run tasks on the thread that owns the context.
pub trait Scheduler {
	fn submit(&self, after: Duration, task: Task) -> CancelToken;
}

/// Cancels a submitted task. Cancelling after the task ran has no effect.
#[derive(Clone, Default)]
pub struct CancelToken {
	cancelled: Rc<Cell<bool>>,
}

impl CancelToken {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn cancel(&self) {
		self.cancelled.set(true)
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancelled.get()
	}
}

impl fmt::Debug for CancelToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CancelToken")
			.field("cancelled", &self.is_cancelled())
			.finish()
	}
}

struct Scheduled {
	due: Duration,
	seq: u64,
	token: CancelToken,
	task: Task,
}

#[derive(Default)]
struct Timeline {
	now: Duration,
	seq: u64,
	queue: Vec<Scheduled>,
}

impl Timeline {
	/// Take the earliest live task due no later than `until`.
	fn pop_due(&mut self, until: Duration) -> (Option<Scheduled>, Vec<Scheduled>) {
		let (live, cancelled): (Vec<_>, Vec<_>) = mem::take(&mut self.queue)
			.into_iter()
			.partition(|scheduled| !scheduled.token.is_cancelled());
		self.queue = live;

		let next = self
			.queue
			.iter()
			.enumerate()
			.filter(|(_, scheduled)| scheduled.due <= until)
			.min_by_key(|(_, scheduled)| (scheduled.due, scheduled.seq))
			.map(|(index, _)| index);

		let next = next.map(|index| {
			let scheduled = self.queue.remove(index);
			self.now = scheduled.due;
			scheduled
		});

		(next, cancelled)
	}
}

/// A scheduler driven by a virtual clock. Tasks only run from `advance`.
#[derive(Default)]
pub struct ManualScheduler {
	timeline: RefCell<Timeline>,
}

impl ManualScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn now(&self) -> Duration {
		self.timeline.borrow().now
	}

	/// Number of tasks waiting to run.
	pub fn pending(&self) -> usize {
		self.timeline
			.borrow()
			.queue
			.iter()
			.filter(|scheduled| !scheduled.token.is_cancelled())
			.count()
	}

	/// Move the clock forward, running every task that becomes due in order.
	/// All due tasks run; the first error is returned.
	pub fn advance(&self, by: Duration) -> Result<()> {
		let until = self.now() + by;
		let mut first_error = None;

		loop {
			let (next, cancelled) = self.timeline.borrow_mut().pop_due(until);
			drop(cancelled);

			let scheduled = match next {
				Some(scheduled) => scheduled,
				None => break,
			};

			if let Err(error) = (scheduled.task)() {
				first_error.get_or_insert(error);
			}
		}

		self.timeline.borrow_mut().now = until;
		first_error.map_or(Ok(()), Err)
	}
}

impl Scheduler for ManualScheduler {
	fn submit(&self, after: Duration, task: Task) -> CancelToken {
		let token = CancelToken::new();
		let mut timeline = self.timeline.borrow_mut();
		timeline.seq += 1;
		let scheduled = Scheduled {
			due: timeline.now + after,
			seq: timeline.seq,
			token: token.clone(),
			task,
		};
		timeline.queue.push(scheduled);
		token
	}
}

impl fmt::Debug for ManualScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ManualScheduler")
			.field("now", &self.now())
			.field("pending", &self.pending())
			.finish()
	}
}
