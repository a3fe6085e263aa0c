use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace, warn};

use crate::context::ReactiveContext;
use crate::error::catch_user;
use crate::node::{Node, NodeId};
use crate::{ReactiveError, Reactive, Result};

pub type ReactionErrorHandler = Rc<dyn Fn(&ReactiveError, &Reaction)>;

type Invalidate = Box<dyn Fn(&Reaction) -> Result<()>>;

/// A derivation that produces side effects instead of a value.
///
/// When one of its dependencies changes the reaction is queued, and
/// `on_invalidate` runs once the outermost batch ends. It is up to
/// `on_invalidate` to call [`Reaction::track`] again.
#[derive(Clone)]
pub struct Reaction {
	body: Rc<ReactionBody>,
}

struct ReactionBody {
	ctx: ReactiveContext,
	id: NodeId,
	name: String,
	on_error: Option<ReactionErrorHandler>,
	on_invalidate: Invalidate,
	is_disposed: Cell<bool>,
	is_scheduled: Cell<bool>,
	is_running: Cell<bool>,
	/// Whether the last run ended with an error nobody handled.
	failed: Cell<bool>,
	this: Weak<ReactionBody>,
}

impl Reaction {
	pub(crate) fn new(
		ctx: &ReactiveContext,
		prefix: &str,
		name: Option<String>,
		on_error: Option<ReactionErrorHandler>,
		on_invalidate: impl Fn(&Reaction) -> Result<()> + 'static,
	) -> Self {
		let (id, name) = ctx.allocate(prefix, name);
		let body = Rc::new_cyclic(|this| ReactionBody {
			ctx: ctx.clone(),
			id,
			name: name.clone(),
			on_error,
			on_invalidate: Box::new(on_invalidate),
			is_disposed: Cell::new(false),
			is_scheduled: Cell::new(false),
			is_running: Cell::new(false),
			failed: Cell::new(false),
			this: this.clone(),
		});

		let reactive: Rc<dyn Reactive> = body.clone();
		ctx.register(id, Node::reaction(name, reactive));
		Reaction { body }
	}

	pub fn name(&self) -> &str {
		&self.body.name
	}

	pub fn context(&self) -> &ReactiveContext {
		&self.body.ctx
	}

	pub fn is_disposed(&self) -> bool {
		self.body.is_disposed.get()
	}

	/// Queue the reaction and drain the queue, unless a batch is open.
	///
	/// A reaction whose own first run fails is disposed. An error raised by
	/// another reaction of the same drain is returned as well, but leaves
	/// this one running.
	pub(crate) fn start(self) -> Result<Self> {
		self.body.ctx.schedule(self.body.id);
		match self.body.ctx.run_reactions() {
			Ok(()) => Ok(self),
			Err(error) if self.body.failed.get() => {
				if let Err(dispose_error) = self.try_dispose() {
					warn!(reaction = %self.body.name, %dispose_error, "dispose after failed start");
				}
				Err(error)
			}
			Err(error) => {
				warn!(reaction = %self.body.name, %error, "another reaction failed during start");
				Err(error)
			}
		}
	}

	/// Run `func` as this reaction, replacing its dependencies with what
	/// `func` reads. A failure of `func` is reported, not returned.
	pub fn track(&self, func: impl FnOnce()) -> Result<()> {
		let body = &self.body;
		let ctx = &body.ctx;

		ctx.start_batch();
		body.is_running.set(true);
		let outcome = ctx.track_derivation(body.id, &body.name, func);
		body.is_running.set(false);

		let caught = match &outcome {
			Ok(None) => ctx.caught_error(body.id),
			_ => None,
		};

		if body.is_disposed.get() {
			trace!(reaction = %body.name, "disposed while running");
			ctx.release(body.id);
		}

		let reported = match (outcome, caught) {
			(Err(error), _) => Err(error),
			(Ok(_), Some(error)) => self.report_error(error),
			(Ok(_), None) => Ok(()),
		};

		let flushed = ctx.end_batch();
		reported.and(flushed)
	}

	/// Deliver an error: to the reaction's own handler, then to the
	/// context handlers. Returns it if nobody took it.
	pub(crate) fn report_error(&self, error: ReactiveError) -> Result<()> {
		let body = &self.body;
		warn!(reaction = %body.name, %error, "reaction failed");

		if let Some(handler) = &body.on_error {
			return catch_user(&body.name, || handler(&error, self));
		}

		if body.ctx.boundaries_disabled() {
			return Err(error);
		}

		if body.ctx.notify_error_handlers(&error, self)? {
			Ok(())
		} else {
			Err(error)
		}
	}

	pub fn try_dispose(&self) -> Result<()> {
		let body = &self.body;
		if body.is_disposed.replace(true) {
			return Ok(());
		}

		debug!(reaction = %body.name, "disposed");
		if body.is_running.get() {
			// `track` detaches once the run is over
			return Ok(());
		}

		body.ctx.start_batch();
		body.ctx.release(body.id);
		body.ctx.end_batch()
	}

	pub fn dispose(&self) {
		self.try_dispose().unwrap_or_else(|error| error.raise())
	}
}

impl ReactionBody {
	fn invalidate(&self, reaction: &Reaction) -> Result<()> {
		match catch_user(&self.name, || (self.on_invalidate)(reaction)) {
			Ok(result) => result,
			Err(error) if error.is_caught() && !self.ctx.boundaries_disabled() => {
				self.ctx.set_caught_error(self.id, error.clone());
				reaction.report_error(error)
			}
			Err(error) => Err(error),
		}
	}
}

impl Reactive for ReactionBody {
	fn schedule(&self) -> bool {
		if self.is_disposed.get() || self.is_scheduled.get() {
			return false;
		}

		self.is_scheduled.set(true);
		true
	}

	fn unschedule(&self) {
		self.is_scheduled.set(false)
	}

	fn run_reaction(&self) -> Result<()> {
		if self.is_disposed.get() {
			return Ok(());
		}

		let reaction = match self.this.upgrade() {
			Some(body) => Reaction { body },
			None => return Ok(()),
		};

		self.ctx.start_batch();
		self.is_scheduled.set(false);
		let result = match self.ctx.should_compute(self.id) {
			Ok(true) => {
				trace!(reaction = %self.name, "running");
				self.invalidate(&reaction)
			}
			Ok(false) => Ok(()),
			Err(error) => Err(error),
		};

		self.failed.set(result.is_err());
		let flushed = self.ctx.end_batch();
		result.and(flushed)
	}
}

impl fmt::Debug for Reaction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Reaction")
			.field("name", &self.body.name)
			.field("disposed", &self.is_disposed())
			.finish()
	}
}
