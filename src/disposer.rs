use std::cell::RefCell;
use std::fmt;

use smallvec::SmallVec;

use crate::reaction::Reaction;
use crate::Result;

type Dispose = Box<dyn FnOnce() -> Result<()>>;

/// Tears down whatever created it: a reaction or an error handler
/// registration. Disposing twice is a no-op.
pub struct Disposer {
	dispose: RefCell<Option<Dispose>>,
}

impl Disposer {
	pub(crate) fn new(dispose: impl FnOnce() -> Result<()> + 'static) -> Self {
		Disposer {
			dispose: RefCell::new(Some(Box::new(dispose))),
		}
	}

	pub fn is_disposed(&self) -> bool {
		self.dispose.borrow().is_none()
	}

	pub fn try_dispose(&self) -> Result<()> {
		let dispose = self.dispose.borrow_mut().take();
		match dispose {
			Some(dispose) => dispose(),
			None => Ok(()),
		}
	}

	pub fn dispose(&self) {
		self.try_dispose().unwrap_or_else(|error| error.raise())
	}
}

impl From<Reaction> for Disposer {
	fn from(reaction: Reaction) -> Self {
		Disposer::new(move || reaction.try_dispose())
	}
}

impl fmt::Debug for Disposer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Disposer")
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

/// A bag of disposers released together, e.g. when a view model goes away.
#[derive(Default)]
pub struct Disposers<const N: usize> {
	disposers: SmallVec<[Disposer; N]>,
}

impl<const N: usize> Disposers<N> {
	pub fn new() -> Self {
		Disposers {
			disposers: SmallVec::new(),
		}
	}

	pub fn add(&mut self, disposer: Disposer) {
		self.disposers.push(disposer);
	}

	pub fn len(&self) -> usize {
		self.disposers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.disposers.is_empty()
	}

	/// Dispose everything collected so far. Every disposer runs; the first
	/// error is returned.
	pub fn try_clear(&mut self) -> Result<()> {
		let mut first_error = None;
		for disposer in self.disposers.drain(..) {
			if let Err(error) = disposer.try_dispose() {
				first_error.get_or_insert(error);
			}
		}

		first_error.map_or(Ok(()), Err)
	}

	pub fn clear(&mut self) {
		self.try_clear().unwrap_or_else(|error| error.raise())
	}
}

impl<const N: usize> Extend<Disposer> for Disposers<N> {
	fn extend<I: IntoIterator<Item = Disposer>>(&mut self, iter: I) {
		self.disposers.extend(iter)
	}
}
