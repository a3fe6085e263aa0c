//! Declarative observables inspired by MobX.
//!
//! State lives in [`Observable`]s, derived values in [`Computed`]s and side
//! effects in reactions created by [`autorun`], [`reaction`] and
//! [`when_reaction`]. Reads made while a derivation runs are recorded as
//! dependencies; writes mark dependents stale and re-run affected reactions
//! once the outermost batch closes.
//!
//! Every graph belongs to a [`ReactiveContext`]. The free functions of this
//! crate use the per-thread default context, [`ReactiveContext::main`].

pub mod macros;

mod action;
mod atom;
mod autorun;
mod computed;
mod config;
mod context;
mod disposer;
mod error;
mod graph;
mod node;
mod observable;
mod reaction;
mod scheduler;
mod value;
mod when;

#[cfg(target_arch = "wasm32")]
mod timeout;

use std::time::Duration;

pub use action::Action;
pub use atom::Atom;
pub use autorun::{AutorunOptions, ReactionOptions};
pub use computed::Computed;
pub use config::{ReactiveConfig, ReadPolicy, WritePolicy, DEFAULT_MAX_ITERATIONS};
pub use context::ReactiveContext;
pub use disposer::{Disposer, Disposers};
pub use error::{CaughtError, ReactiveError, Result};
pub use observable::{Observable, Toggle};
pub use reaction::{Reaction, ReactionErrorHandler};
pub use scheduler::{CancelToken, ManualScheduler, Scheduler, Task};
pub use value::Value;
pub use when::WhenOptions;

#[cfg(target_arch = "wasm32")]
pub use timeout::TimeoutScheduler;

/// Cache validity of a derivation. Ordered from the strongest to the
/// weakest guarantee that no recomputation is needed.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum DerivationState {
	/// Not attached to the graph: the next read computes from scratch.
	NotTracking,
	UpToDate,
	/// An upstream computed may have changed; confirm before recomputing.
	PossiblyStale,
	Stale,
}

/// A computed value seen from the context.
pub(crate) trait Refresh: 'static {
	/// Bring the cached value up to date. Fails with the captured error,
	/// if the last evaluation raised one.
	fn refresh(&self) -> Result<()>;

	/// Drop the cached value and detach from every dependency.
	fn suspend(&self);
}

/// A reaction seen from the context.
pub(crate) trait Reactive: 'static {
	/// Flag the reaction as queued. Returns `false` if it already was,
	/// or if it can no longer run.
	fn schedule(&self) -> bool;

	fn unschedule(&self);

	fn run_reaction(&self) -> Result<()>;
}

pub fn observable<T>(value: T) -> Observable<T>
where
	T: Clone + PartialEq + 'static,
{
	ReactiveContext::main().observable(value)
}

pub fn computed<T, F>(func: F) -> Computed<T>
where
	T: Clone + PartialEq + 'static,
	F: Fn() -> T + 'static,
{
	ReactiveContext::main().computed(func)
}

pub fn autorun(func: impl Fn() + 'static) -> Disposer {
	ReactiveContext::main().autorun(func)
}

pub fn reaction<T, F, E>(tracking: F, effect: E, options: ReactionOptions<T>) -> Disposer
where
	T: PartialEq + 'static,
	F: Fn() -> T + 'static,
	E: Fn(&T) + 'static,
{
	ReactiveContext::main().reaction(tracking, effect, options)
}

pub fn when_reaction(
	predicate: impl Fn() -> bool + 'static,
	effect: impl FnOnce() + 'static,
	options: WhenOptions,
) -> Disposer {
	ReactiveContext::main().when_reaction(predicate, effect, options)
}

pub fn action<T>(func: impl FnOnce() -> T) -> T {
	ReactiveContext::main().action(func)
}

pub fn batch<T>(func: impl FnOnce() -> T) -> T {
	ReactiveContext::main().batch(func)
}

pub fn untracked<T>(func: impl FnOnce() -> T) -> T {
	ReactiveContext::main().untracked(func)
}

pub fn in_batch() -> bool {
	ReactiveContext::main().in_batch()
}

pub fn on_reaction_error(handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Disposer {
	ReactiveContext::main().on_reaction_error(handler)
}

/// Convenience for `when_reaction` with a timeout on the default context.
pub fn when_within(
	timeout: Duration,
	predicate: impl Fn() -> bool + 'static,
	effect: impl FnOnce() + 'static,
) -> Disposer {
	when_reaction(predicate, effect, WhenOptions::default().timeout(timeout))
}
