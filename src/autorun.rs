use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

use crate::context::ReactiveContext;
use crate::disposer::Disposer;
use crate::reaction::{Reaction, ReactionErrorHandler};
use crate::scheduler::Scheduler;
use crate::{ReactiveError, Result};

/// Settings of an `autorun`.
#[derive(Clone, Default)]
pub struct AutorunOptions {
	name: Option<String>,
	on_error: Option<ReactionErrorHandler>,
}

impl AutorunOptions {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	pub fn on_error(mut self, handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Self {
		self.on_error = Some(Rc::new(handler));
		self
	}
}

/// Settings of a `reaction`.
pub struct ReactionOptions<T> {
	name: Option<String>,
	delay: Option<Duration>,
	equals: Option<Rc<dyn Fn(&T, &T) -> bool>>,
	on_error: Option<ReactionErrorHandler>,
}

impl<T> Default for ReactionOptions<T> {
	fn default() -> Self {
		ReactionOptions {
			name: None,
			delay: None,
			equals: None,
			on_error: None,
		}
	}
}

impl<T> Clone for ReactionOptions<T> {
	fn clone(&self) -> Self {
		ReactionOptions {
			name: self.name.clone(),
			delay: self.delay,
			equals: self.equals.clone(),
			on_error: self.on_error.clone(),
		}
	}
}

impl<T> ReactionOptions<T> {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Debounce re-evaluation: the first invalidation starts a timer, the
	/// ones that follow before it fires are absorbed.
	pub fn delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	pub fn equals(mut self, equals: impl Fn(&T, &T) -> bool + 'static) -> Self {
		self.equals = Some(Rc::new(equals));
		self
	}

	pub fn on_error(mut self, handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Self {
		self.on_error = Some(Rc::new(handler));
		self
	}
}

impl<T> fmt::Debug for ReactionOptions<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ReactionOptions")
			.field("name", &self.name)
			.field("delay", &self.delay)
			.field("equals", &self.equals.is_some())
			.field("on_error", &self.on_error.is_some())
			.finish()
	}
}

/// Create a reaction that re-runs `tracking` whenever what it read changes,
/// and run it once right away.
pub(crate) fn create_autorun(
	ctx: &ReactiveContext,
	prefix: &str,
	name: Option<String>,
	on_error: Option<ReactionErrorHandler>,
	tracking: impl Fn(&Reaction) + 'static,
) -> Result<Reaction> {
	let reaction = Reaction::new(ctx, prefix, name, on_error, move |reaction| {
		reaction.track(|| tracking(reaction))
	});

	debug!(reaction = reaction.name(), "created");
	reaction.start()
}

/// State shared between a `reaction` and its delayed runs.
struct Runner<T> {
	tracking: Box<dyn Fn() -> T>,
	effect: Box<dyn Fn(&T)>,
	equals: Rc<dyn Fn(&T, &T) -> bool>,
	last: RefCell<Option<T>>,
	first_run: Cell<bool>,
	is_scheduled: Cell<bool>,
}

impl<T: 'static> Runner<T> {
	fn run(&self, reaction: &Reaction) -> Result<()> {
		if reaction.is_disposed() {
			return Ok(());
		}

		let mut changed = false;
		reaction.track(|| {
			let next = (self.tracking)();
			let prev = self.last.borrow_mut().take();
			changed = match &prev {
				Some(prev) => !(self.equals)(prev, &next),
				None => true,
			};
			*self.last.borrow_mut() = Some(next);
		})?;

		if self.first_run.replace(false) || !changed {
			return Ok(());
		}

		let value = self.last.borrow_mut().take();
		let outcome = match &value {
			Some(value) => reaction
				.context()
				.run_action(reaction.name(), || (self.effect)(value)),
			None => Ok(()),
		};

		{
			let mut last = self.last.borrow_mut();
			if last.is_none() {
				*last = value;
			}
		}

		match outcome {
			Err(error) if error.is_caught() => reaction.report_error(error),
			outcome => outcome,
		}
	}
}

impl ReactiveContext {
	pub fn autorun(&self, func: impl Fn() + 'static) -> Disposer {
		self.try_autorun(func)
			.unwrap_or_else(|error| error.raise())
	}

	/// Run `func` now and again after every change of what it read.
	pub fn try_autorun(&self, func: impl Fn() + 'static) -> Result<Disposer> {
		self.try_autorun_with(AutorunOptions::default(), move |_| func())
	}

	pub fn try_autorun_with(
		&self,
		options: AutorunOptions,
		func: impl Fn(&Reaction) + 'static,
	) -> Result<Disposer> {
		create_autorun(self, "Autorun", options.name, options.on_error, func).map(Disposer::from)
	}

	pub fn reaction<T, F, E>(&self, tracking: F, effect: E, options: ReactionOptions<T>) -> Disposer
	where
		T: PartialEq + 'static,
		F: Fn() -> T + 'static,
		E: Fn(&T) + 'static,
	{
		self.try_reaction(tracking, effect, options)
			.unwrap_or_else(|error| error.raise())
	}

	/// Track `tracking` and call `effect` with its result each time the
	/// result changes. The first evaluation never calls `effect`.
	pub fn try_reaction<T, F, E>(
		&self,
		tracking: F,
		effect: E,
		options: ReactionOptions<T>,
	) -> Result<Disposer>
	where
		T: PartialEq + 'static,
		F: Fn() -> T + 'static,
		E: Fn(&T) + 'static,
	{
		let delayed = match options.delay {
			Some(delay) => Some((delay, self.require_scheduler("Delayed reactions")?)),
			None => None,
		};

		let equals: Rc<dyn Fn(&T, &T) -> bool> = match options.equals {
			Some(equals) => equals,
			None => Rc::new(|prev: &T, next: &T| prev == next),
		};

		let runner = Rc::new(Runner {
			tracking: Box::new(tracking),
			effect: Box::new(effect),
			equals,
			last: RefCell::new(None),
			first_run: Cell::new(true),
			is_scheduled: Cell::new(false),
		});

		let reaction = Reaction::new(self, "Reaction", options.name, options.on_error, move |reaction| {
			match &delayed {
				Some((delay, scheduler)) if !runner.first_run.get() => {
					if runner.is_scheduled.replace(true) {
						return Ok(());
					}

					debug!(reaction = reaction.name(), ?delay, "scheduled delayed run");
					let runner = runner.clone();
					let reaction = reaction.clone();
					scheduler.submit(
						*delay,
						Box::new(move || {
							runner.is_scheduled.set(false);
							runner.run(&reaction)
						}),
					);
					Ok(())
				}
				_ => runner.run(reaction),
			}
		});

		debug!(reaction = reaction.name(), "created");
		reaction.start().map(Disposer::from)
	}

	pub(crate) fn require_scheduler(&self, what: &str) -> Result<Rc<dyn Scheduler>> {
		self.scheduler().ok_or_else(|| {
			ReactiveError::violation(format!("{} require a scheduler in the reactive config", what))
		})
	}
}
