use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::mem;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::context::ReactiveContext;
use crate::error::catch_user;
use crate::node::{Node, NodeId};
use crate::value::Access;
use crate::{DerivationState, ReactiveError, Refresh, Result};

type Compute<T> = Box<dyn Fn() -> T>;
type Equals<T> = Box<dyn Fn(&T, &T) -> bool>;

/// A derived value, cached while something observes it.
///
/// An unobserved computed read outside of a batch evaluates on every read
/// and keeps no dependencies.
pub struct Computed<T> {
	body: Rc<ComputedBody<T>>,
}

pub(crate) struct ComputedBody<T> {
	ctx: ReactiveContext,
	id: NodeId,
	name: String,
	func: Compute<T>,
	equals: Equals<T>,
	value: RefCell<Option<T>>,
	is_computing: Cell<bool>,
}

impl<T> Clone for Computed<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Drop for ComputedBody<T> {
	fn drop(&mut self) {
		self.ctx.release(self.id)
	}
}

impl<T> Computed<T>
where
	T: Clone + 'static,
{
	pub fn new(ctx: &ReactiveContext, func: impl Fn() -> T + 'static) -> Self
	where
		T: PartialEq,
	{
		Self::create(ctx, None, Box::new(func), Box::new(|a, b| a == b))
	}

	pub fn with_name(
		ctx: &ReactiveContext,
		name: impl Into<String>,
		func: impl Fn() -> T + 'static,
	) -> Self
	where
		T: PartialEq,
	{
		Self::create(ctx, Some(name.into()), Box::new(func), Box::new(|a, b| a == b))
	}

	/// Use `equals` instead of `PartialEq` to decide whether a recomputed
	/// value differs from the cached one.
	pub fn with_equals(
		ctx: &ReactiveContext,
		func: impl Fn() -> T + 'static,
		equals: impl Fn(&T, &T) -> bool + 'static,
	) -> Self {
		Self::create(ctx, None, Box::new(func), Box::new(equals))
	}

	fn create(
		ctx: &ReactiveContext,
		name: Option<String>,
		func: Compute<T>,
		equals: Equals<T>,
	) -> Self {
		let (id, name) = ctx.allocate("Computed", name);
		let body = Rc::new_cyclic(|this: &Weak<ComputedBody<T>>| {
			let this: Weak<dyn Refresh> = this.clone();
			ctx.register(id, Node::computed(name.clone(), this));
			ComputedBody {
				ctx: ctx.clone(),
				id,
				name,
				func,
				equals,
				value: RefCell::new(None),
				is_computing: Cell::new(false),
			}
		});

		Computed { body }
	}

	pub fn name(&self) -> &str {
		&self.body.name
	}

	#[inline]
	pub fn try_get(&self) -> Result<T> {
		self.body.try_get()
	}

	#[inline]
	pub fn get(&self) -> T {
		self.try_get().unwrap_or_else(|error| error.raise())
	}

	pub fn try_with<R>(&self, func: impl FnOnce(&T) -> R) -> Result<R> {
		self.body.read()?;
		match &*self.body.value.borrow() {
			Some(value) => Ok(func(value)),
			None => unreachable!("computed {} has neither a value nor an error", self.body.name),
		}
	}

	pub fn with<R>(&self, func: impl FnOnce(&T) -> R) -> R {
		self.try_with(func).unwrap_or_else(|error| error.raise())
	}

	pub fn has_observers(&self) -> bool {
		self.body.ctx.has_observers(self.body.id)
	}

	pub fn state(&self) -> DerivationState {
		self.body.ctx.derivation_state(self.body.id)
	}

	pub(crate) fn body(&self) -> Rc<ComputedBody<T>> {
		self.body.clone()
	}
}

impl<T: 'static> ComputedBody<T> {
	/// Make the cached value current, or fail with the captured error.
	fn read(&self) -> Result<()> {
		if self.is_computing.get() {
			return Err(ReactiveError::CyclicComputation {
				name: self.name.clone(),
			});
		}

		let ctx = &self.ctx;
		if !ctx.in_batch() && !ctx.is_tracking() && !ctx.has_observers(self.id) {
			trace!(computed = %self.name, "computing unobserved value");
			ctx.start_batch();
			let computed = self.compute_value(false);
			let flushed = ctx.end_batch();
			let value = computed?;
			let prev = mem::replace(&mut *self.value.borrow_mut(), value);
			drop(prev);
			flushed?;
		} else {
			ctx.report_observed(self.id)?;
			if ctx.should_compute(self.id)? {
				ctx.start_batch();
				let changed = self.track_and_compute();
				if let Ok(true) = changed {
					ctx.propagate_change_confirmed(self.id);
				}
				let flushed = ctx.end_batch();
				changed?;
				flushed?;
			}
		}

		match ctx.caught_error(self.id) {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}

	fn compute_value(&self, track: bool) -> Result<Option<T>> {
		self.is_computing.set(true);
		self.ctx.push_computation();

		let outcome = if track {
			self.ctx.track_derivation(self.id, &self.name, || (self.func)())
		} else {
			self.ctx.guard_derivation(self.id, &self.name, || (self.func)())
		};

		self.ctx.pop_computation();
		self.is_computing.set(false);
		outcome
	}

	/// Re-evaluate with tracking. Returns whether observers must be told
	/// about a new value.
	fn track_and_compute(&self) -> Result<bool> {
		let was_suspended = self.ctx.derivation_state(self.id) == DerivationState::NotTracking;
		trace!(computed = %self.name, was_suspended, "recomputing");

		let next = self.compute_value(true)?;
		let failed = self.ctx.caught_error(self.id).is_some();

		let changed = was_suspended
			|| failed
			|| match (self.value.borrow().as_ref(), next.as_ref()) {
				(Some(prev), Some(next)) => {
					!catch_user(&self.name, || (self.equals)(prev, next))?
				}
				_ => true,
			};

		if changed {
			let prev = mem::replace(&mut *self.value.borrow_mut(), next);
			drop(prev);
		}

		Ok(changed)
	}
}

impl<T: Clone + 'static> ComputedBody<T> {
	fn try_get(&self) -> Result<T> {
		self.read()?;
		match &*self.value.borrow() {
			Some(value) => Ok(value.clone()),
			None => unreachable!("computed {} has neither a value nor an error", self.name),
		}
	}
}

impl<T: 'static> Refresh for ComputedBody<T> {
	fn refresh(&self) -> Result<()> {
		self.read()
	}

	fn suspend(&self) {
		debug!(computed = %self.name, "suspending");
		self.ctx.clear_observables(self.id);
		let prev = self.value.borrow_mut().take();
		drop(prev);
	}
}

impl<T: Clone + 'static> Access<T> for ComputedBody<T> {
	fn try_get(&self) -> Result<T> {
		ComputedBody::try_get(self)
	}

	fn name(&self) -> &str {
		&self.name
	}
}

impl ReactiveContext {
	pub fn computed<T, F>(&self, func: F) -> Computed<T>
	where
		T: Clone + PartialEq + 'static,
		F: Fn() -> T + 'static,
	{
		Computed::new(self, func)
	}

	pub fn computed_with_equals<T, F, E>(&self, func: F, equals: E) -> Computed<T>
	where
		T: Clone + 'static,
		F: Fn() -> T + 'static,
		E: Fn(&T, &T) -> bool + 'static,
	{
		Computed::with_equals(self, func, equals)
	}
}

impl<T> Debug for Computed<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Computed")
			.field("name", &self.body.name)
			.finish()
	}
}
