use std::fmt;

use crate::context::ReactiveContext;
use crate::error::catch_user;
use crate::Result;

/// A reusable body that always runs as an action: untracked, batched and
/// allowed to change state whatever the write policy.
pub struct Action {
	ctx: ReactiveContext,
	name: String,
	body: Box<dyn Fn()>,
}

impl Action {
	pub fn new(ctx: &ReactiveContext, body: impl Fn() + 'static) -> Self {
		let (_, name) = ctx.allocate("Action", None);
		Self::with_name(ctx, name, body)
	}

	pub fn with_name(ctx: &ReactiveContext, name: impl Into<String>, body: impl Fn() + 'static) -> Self {
		Action {
			ctx: ctx.clone(),
			name: name.into(),
			body: Box::new(body),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn try_run(&self) -> Result<()> {
		self.ctx.run_action(&self.name, || (self.body)())
	}

	pub fn run(&self) {
		self.try_run().unwrap_or_else(|error| error.raise())
	}
}

impl fmt::Debug for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Action").field("name", &self.name).finish()
	}
}

impl ReactiveContext {
	pub fn action<T>(&self, func: impl FnOnce() -> T) -> T {
		self.try_action(func)
			.unwrap_or_else(|error| error.raise())
	}

	pub fn try_action<T>(&self, func: impl FnOnce() -> T) -> Result<T> {
		self.run_action("Action", func)
	}

	/// Coalesce writes into one flush. Unlike an action, reads inside a
	/// batch are still tracked and the write policy still applies.
	pub fn batch<T>(&self, func: impl FnOnce() -> T) -> T {
		self.try_batch(func)
			.unwrap_or_else(|error| error.raise())
	}

	pub fn try_batch<T>(&self, func: impl FnOnce() -> T) -> Result<T> {
		self.start_batch();
		let outcome = catch_user("batch", func);
		let flushed = self.end_batch();
		let value = outcome?;
		flushed?;
		Ok(value)
	}

	/// Every scope entered here is left again even when `func` fails.
	pub(crate) fn run_action<T>(&self, name: &str, func: impl FnOnce() -> T) -> Result<T> {
		let prev = self.start_untracked();
		self.start_batch();
		let allowed = self.start_allow_state_changes(true);

		let outcome = catch_user(name, func);

		self.end_untracked(prev);
		self.end_allow_state_changes(allowed);
		let flushed = self.end_batch();

		let value = outcome?;
		flushed?;
		Ok(value)
	}
}
