use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::autorun::create_autorun;
use crate::context::ReactiveContext;
use crate::disposer::Disposer;
use crate::reaction::{Reaction, ReactionErrorHandler};
use crate::scheduler::CancelToken;
use crate::{ReactiveError, Result};

/// Settings of a `when_reaction`.
#[derive(Clone, Default)]
pub struct WhenOptions {
	name: Option<String>,
	timeout: Option<Duration>,
	on_error: Option<ReactionErrorHandler>,
}

impl WhenOptions {
	pub fn name(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());
		self
	}

	/// Give up after `timeout`: the reaction is disposed and a
	/// `ReactiveError::Timeout` is reported.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	pub fn on_error(mut self, handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Self {
		self.on_error = Some(Rc::new(handler));
		self
	}
}

impl fmt::Debug for WhenOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("WhenOptions")
			.field("name", &self.name)
			.field("timeout", &self.timeout)
			.field("on_error", &self.on_error.is_some())
			.finish()
	}
}

type Effect = Box<dyn FnOnce()>;

impl ReactiveContext {
	pub fn when_reaction(
		&self,
		predicate: impl Fn() -> bool + 'static,
		effect: impl FnOnce() + 'static,
		options: WhenOptions,
	) -> Disposer {
		self.try_when_reaction(predicate, effect, options)
			.unwrap_or_else(|error| error.raise())
	}

	/// Wait for `predicate` to hold, then run `effect` once and dispose.
	pub fn try_when_reaction(
		&self,
		predicate: impl Fn() -> bool + 'static,
		effect: impl FnOnce() + 'static,
		options: WhenOptions,
	) -> Result<Disposer> {
		let timeout = match options.timeout {
			Some(timeout) => Some((timeout, self.require_scheduler("When timeouts")?)),
			None => None,
		};

		let effect: RefCell<Option<Effect>> = RefCell::new(Some(Box::new(effect)));
		let cancel: Rc<RefCell<Option<CancelToken>>> = Default::default();

		let reaction = create_autorun(self, "When", options.name, options.on_error, {
			let cancel = cancel.clone();
			move |reaction| {
				if !predicate() {
					return;
				}

				reaction.dispose();
				let token = cancel.borrow_mut().take();
				if let Some(token) = token {
					token.cancel();
				}

				let effect = effect.borrow_mut().take();
				if let Some(effect) = effect {
					debug!(reaction = reaction.name(), "condition met");
					reaction.context().action(effect);
				}
			}
		})?;

		if let Some((timeout, scheduler)) = timeout {
			if !reaction.is_disposed() {
				let handle = reaction.clone();
				let token = scheduler.submit(
					timeout,
					Box::new(move || {
						if handle.is_disposed() {
							return Ok(());
						}

						handle.try_dispose()?;
						let error = ReactiveError::Timeout {
							name: handle.name().to_owned(),
						};
						warn!(reaction = handle.name(), ?timeout, "timed out");
						handle.report_error(error)
					}),
				);
				*cancel.borrow_mut() = Some(token);
			}
		}

		Ok(Disposer::new(move || {
			let token = cancel.borrow_mut().take();
			if let Some(token) = token {
				token.cancel();
			}
			reaction.try_dispose()
		}))
	}
}
