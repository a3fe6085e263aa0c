use std::cell::RefCell;
use std::fmt::{self, Debug};
use std::mem;
use std::rc::Rc;

use crate::atom::Atom;
use crate::context::ReactiveContext;
use crate::value::Access;
use crate::{Computed, Result};

/// A mutable value whose reads are tracked and whose writes notify
/// observers. A write of an equal value is ignored.
pub struct Observable<T> {
	body: Rc<ObservableBody<T>>,
}

pub(crate) struct ObservableBody<T> {
	atom: Atom,
	value: RefCell<T>,
}

impl<T> Clone for Observable<T> {
	fn clone(&self) -> Self {
		Self {
			body: self.body.clone(),
		}
	}
}

impl<T> Default for Observable<T>
where
	T: Default + Clone + PartialEq + 'static,
{
	fn default() -> Self {
		Observable::new(&ReactiveContext::main(), Default::default())
	}
}

pub trait Toggle {
	fn toggle(&mut self);
}

impl Toggle for bool {
	fn toggle(&mut self) {
		*self = !*self
	}
}

impl<T> Observable<T>
where
	T: Clone + PartialEq + 'static,
{
	pub fn new(ctx: &ReactiveContext, value: T) -> Self {
		Self::create(ctx, None, value)
	}

	pub fn with_name(ctx: &ReactiveContext, name: impl Into<String>, value: T) -> Self {
		Self::create(ctx, Some(name.into()), value)
	}

	fn create(ctx: &ReactiveContext, name: Option<String>, value: T) -> Self {
		Observable {
			body: Rc::new(ObservableBody {
				atom: Atom::create(ctx, "Observable", name),
				value: RefCell::new(value),
			}),
		}
	}

	pub fn atom(&self) -> &Atom {
		&self.body.atom
	}

	pub fn name(&self) -> &str {
		self.body.atom.name()
	}

	#[inline]
	pub fn try_get(&self) -> Result<T> {
		self.body.try_get()
	}

	#[inline]
	pub fn get(&self) -> T {
		self.try_get().unwrap_or_else(|error| error.raise())
	}

	/// Read the value without reporting the read.
	#[inline]
	pub fn get_untracked(&self) -> T {
		self.body.value.borrow().clone()
	}

	pub fn try_with<R>(&self, func: impl FnOnce(&T) -> R) -> Result<R> {
		self.body.observe()?;
		let value = self.body.value.borrow();
		Ok(func(&value))
	}

	pub fn with<R>(&self, func: impl FnOnce(&T) -> R) -> R {
		self.try_with(func).unwrap_or_else(|error| error.raise())
	}

	pub fn try_replace(&self, value: T) -> Result<T> {
		if *self.body.value.borrow() == value {
			return Ok(value);
		}

		let ctx = self.body.atom.context();
		ctx.enforce_write_policy(self.body.atom.id())?;
		let prev = mem::replace(&mut *self.body.value.borrow_mut(), value);
		self.body.atom.try_report_changed()?;
		Ok(prev)
	}

	#[inline]
	pub fn replace(&self, value: T) -> T {
		self.try_replace(value)
			.unwrap_or_else(|error| error.raise())
	}

	#[inline]
	pub fn try_set(&self, value: T) -> Result<()> {
		self.try_replace(value).map(drop)
	}

	#[inline]
	pub fn set(&self, value: T) {
		self.try_set(value).unwrap_or_else(|error| error.raise())
	}

	/// Modify a copy of the current value and write it back.
	pub fn try_update(&self, func: impl FnOnce(&mut T)) -> Result<()> {
		let mut value = self.get_untracked();
		func(&mut value);
		self.try_set(value)
	}

	#[inline]
	pub fn update(&self, func: impl FnOnce(&mut T)) {
		self.try_update(func)
			.unwrap_or_else(|error| error.raise())
	}

	#[inline]
	pub fn toggle(&self)
	where
		T: Toggle,
	{
		self.update(T::toggle)
	}

	pub fn map<F, R>(&self, func: F) -> Computed<R>
	where
		F: Fn(&T) -> R + 'static,
		R: Clone + PartialEq + 'static,
	{
		let this = self.clone();
		Computed::new(self.body.atom.context(), move || this.with(|value| func(value)))
	}
}

impl<T> ObservableBody<T> {
	fn observe(&self) -> Result<()> {
		let ctx = self.atom.context();
		ctx.enforce_read_policy(self.atom.id())?;
		self.atom.try_report_observed()
	}
}

impl<T: Clone> Access<T> for ObservableBody<T> {
	fn try_get(&self) -> Result<T> {
		self.observe()?;
		Ok(self.value.borrow().clone())
	}

	fn name(&self) -> &str {
		self.atom.name()
	}
}

impl<T> Observable<T> {
	pub(crate) fn body(&self) -> Rc<ObservableBody<T>> {
		self.body.clone()
	}
}

impl<T: Debug> Debug for Observable<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Observable")
			.field("name", &self.body.atom.name())
			.field("value", &*self.body.value.borrow())
			.finish()
	}
}

impl ReactiveContext {
	pub fn observable<T>(&self, value: T) -> Observable<T>
	where
		T: Clone + PartialEq + 'static,
	{
		Observable::new(self, value)
	}
}
