use std::fmt;
use std::rc::Rc;

use crate::{Computed, Observable, Result};

/// A read-only view over an observable or a computed value.
pub struct Value<T> {
	value: Rc<dyn Access<T>>,
}

impl<T> Clone for Value<T> {
	fn clone(&self) -> Self {
		Value {
			value: self.value.clone(),
		}
	}
}

impl<T> Value<T>
where
	T: 'static,
{
	pub(crate) fn new(value: Rc<dyn Access<T>>) -> Self {
		Value { value }
	}

	#[inline]
	pub fn try_get(&self) -> Result<T> {
		self.value.try_get()
	}

	#[inline]
	pub fn get(&self) -> T {
		self.try_get().unwrap_or_else(|error| error.raise())
	}

	pub fn name(&self) -> &str {
		self.value.name()
	}
}

pub(crate) trait Access<T> {
	fn try_get(&self) -> Result<T>;
	fn name(&self) -> &str;
}

impl<T> From<Observable<T>> for Value<T>
where
	T: Clone + 'static,
{
	fn from(observable: Observable<T>) -> Self {
		Value::new(observable.body())
	}
}

impl<T> From<Computed<T>> for Value<T>
where
	T: Clone + 'static,
{
	fn from(computed: Computed<T>) -> Self {
		Value::new(computed.body())
	}
}

impl<T> fmt::Debug for Value<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Value")
			.field("name", &self.value.name())
			.finish()
	}
}
