use std::cell::{Cell, Ref, RefCell, RefMut};
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::thread::{self, ThreadId};

use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::config::{ReactiveConfig, ReadPolicy, WritePolicy};
use crate::disposer::Disposer;
use crate::error::catch_user;
use crate::graph::{Changes, Graph, Listener};
use crate::node::{Hook, Node, NodeId};
use crate::reaction::{Reaction, ReactionErrorHandler};
use crate::scheduler::Scheduler;
use crate::{DerivationState, ReactiveError, Result};

struct ReactiveState {
	/// Depth of nested batches. Reactions run when it drops back to zero.
	batch: usize,
	/// Derivation whose reads are being recorded.
	tracking: Option<NodeId>,
	pending_reactions: Vec<NodeId>,
	is_running_reactions: bool,
	/// Atoms that may have lost their last observer during the batch.
	pending_unobservations: Vec<NodeId>,
	/// Depth of nested computed evaluations.
	computation_depth: usize,
	allow_state_changes: bool,
}

impl ReactiveState {
	fn new(config: &ReactiveConfig) -> Self {
		ReactiveState {
			batch: 0,
			tracking: None,
			pending_reactions: Vec::new(),
			is_running_reactions: false,
			pending_unobservations: Vec::new(),
			computation_depth: 0,
			allow_state_changes: config.write_policy == WritePolicy::Never,
		}
	}

	fn is_within_derivation(&self) -> bool {
		self.tracking.is_some() || self.computation_depth > 0
	}
}

struct ContextInner {
	config: RefCell<ReactiveConfig>,
	state: RefCell<ReactiveState>,
	graph: RefCell<Graph>,
	handlers: RefCell<Vec<(u64, ReactionErrorHandler)>>,
	next_handler: Cell<u64>,
	owner: ThreadId,
}

/// Owner of a dependency graph and of the batching machinery around it.
///
/// A context is a cheap handle: clones refer to the same graph. It is bound
/// to the thread that created it.
#[derive(Clone)]
pub struct ReactiveContext {
	inner: Rc<ContextInner>,
}

thread_local! {
	static MAIN: ReactiveContext = ReactiveContext::new(ReactiveConfig::default());
}

impl ReactiveContext {
	pub fn new(config: ReactiveConfig) -> Self {
		let state = ReactiveState::new(&config);
		ReactiveContext {
			inner: Rc::new(ContextInner {
				config: RefCell::new(config),
				state: RefCell::new(state),
				graph: RefCell::new(Graph::new()),
				handlers: RefCell::new(Vec::new()),
				next_handler: Cell::new(0),
				owner: thread::current().id(),
			}),
		}
	}

	/// The default context of the current thread.
	pub fn main() -> Self {
		MAIN.with(|ctx| ctx.clone())
	}

	pub fn config(&self) -> ReactiveConfig {
		self.inner.config.borrow().clone()
	}

	pub fn set_config(&self, config: ReactiveConfig) {
		let allow_state_changes = config.write_policy == WritePolicy::Never;
		debug!(?config, "reactive config replaced");
		*self.inner.config.borrow_mut() = config;
		self.state_mut().allow_state_changes = allow_state_changes;
	}

	pub fn update_config(&self, func: impl FnOnce(&mut ReactiveConfig)) {
		let mut config = self.config();
		func(&mut config);
		self.set_config(config)
	}

	pub fn in_batch(&self) -> bool {
		self.state().batch > 0
	}

	/// Whether a derivation is recording reads right now.
	pub fn is_tracking(&self) -> bool {
		self.state().tracking.is_some()
	}

	/// Register a handler for reaction errors that no reaction-level handler
	/// took care of.
	pub fn on_reaction_error(&self, handler: impl Fn(&ReactiveError, &Reaction) + 'static) -> Disposer {
		let id = self.inner.next_handler.get() + 1;
		self.inner.next_handler.set(id);
		self.inner
			.handlers
			.borrow_mut()
			.push((id, Rc::new(handler)));

		let ctx = self.clone();
		Disposer::new(move || {
			let removed = {
				let mut handlers = ctx.inner.handlers.borrow_mut();
				let index = handlers.iter().position(|(handler, _)| *handler == id);
				let removed = index.map(|index| handlers.remove(index));
				removed
			};
			drop(removed);
			Ok(())
		})
	}

	pub fn untracked<T>(&self, func: impl FnOnce() -> T) -> T {
		let prev = self.start_untracked();
		let outcome = catch_user("untracked", func);
		self.end_untracked(prev);
		outcome.unwrap_or_else(|error| error.raise())
	}

	fn state(&self) -> Ref<'_, ReactiveState> {
		self.inner.state.borrow()
	}

	fn state_mut(&self) -> RefMut<'_, ReactiveState> {
		self.inner.state.borrow_mut()
	}

	pub(crate) fn graph(&self) -> Ref<'_, Graph> {
		self.inner.graph.borrow()
	}

	fn graph_mut(&self) -> RefMut<'_, Graph> {
		self.inner.graph.borrow_mut()
	}

	pub(crate) fn boundaries_disabled(&self) -> bool {
		self.inner.config.borrow().disable_error_boundaries
	}

	pub(crate) fn scheduler(&self) -> Option<Rc<dyn Scheduler>> {
		self.inner.config.borrow().scheduler.clone()
	}

	/// Reserve an id. Unnamed nodes are called `Prefix@N`.
	pub(crate) fn allocate(&self, prefix: &str, name: Option<String>) -> (NodeId, String) {
		let id = self.graph_mut().next_id();
		let name = name.unwrap_or_else(|| format!("{}@{}", prefix, id.0));
		(id, name)
	}

	pub(crate) fn register(&self, id: NodeId, node: Node) {
		trace!(node = %node.name, "registered");
		self.graph_mut().insert(id, node);
	}

	/// Remove a node from the graph. Safe to call from `Drop`.
	pub(crate) fn release(&self, id: NodeId) {
		let mut changes = Changes::default();
		let node = match self.inner.graph.try_borrow_mut() {
			Ok(mut graph) => graph.release(id, &mut changes),
			Err(_) => {
				warn!(node = ?id, "graph is busy, node left in place");
				return;
			}
		};

		if let (Ok(mut graph), Ok(mut state)) = (
			self.inner.graph.try_borrow_mut(),
			self.inner.state.try_borrow_mut(),
		) {
			for atom in changes.unobserved {
				if graph.mark_pending_unobservation(atom) {
					state.pending_unobservations.push(atom);
				}
			}
		}

		drop(node);
	}

	pub(crate) fn add_listener(&self, id: NodeId, listener: Listener, hook: Hook) {
		self.graph_mut().add_listener(id, listener, hook)
	}

	pub(crate) fn has_observers(&self, id: NodeId) -> bool {
		self.graph().has_observers(id)
	}

	pub(crate) fn derivation_state(&self, id: NodeId) -> DerivationState {
		self.graph().state(id)
	}

	pub(crate) fn caught_error(&self, id: NodeId) -> Option<ReactiveError> {
		self.graph().error(id)
	}

	pub(crate) fn set_caught_error(&self, id: NodeId, error: ReactiveError) {
		self.graph_mut().set_error(id, Some(error))
	}

	pub(crate) fn start_batch(&self) {
		self.state_mut().batch += 1;
	}

	/// Close a batch. Closing the outermost one drains pending reactions and
	/// settles atoms that lost their observers.
	pub(crate) fn end_batch(&self) -> Result<()> {
		let outermost = {
			let mut state = self.state_mut();
			state.batch = state.batch.saturating_sub(1);
			state.batch == 0
		};

		if !outermost {
			return Ok(());
		}

		let flushed = self.run_reactions();
		let swept = self.sweep_unobservations();
		flushed.and(swept)
	}

	pub(crate) fn start_untracked(&self) -> Option<NodeId> {
		self.state_mut().tracking.take()
	}

	pub(crate) fn end_untracked(&self, prev: Option<NodeId>) {
		self.state_mut().tracking = prev;
	}

	pub(crate) fn start_allow_state_changes(&self, allow: bool) -> bool {
		mem::replace(&mut self.state_mut().allow_state_changes, allow)
	}

	pub(crate) fn end_allow_state_changes(&self, prev: bool) {
		self.state_mut().allow_state_changes = prev;
	}

	pub(crate) fn push_computation(&self) {
		self.state_mut().computation_depth += 1;
	}

	pub(crate) fn pop_computation(&self) {
		let mut state = self.state_mut();
		state.computation_depth = state.computation_depth.saturating_sub(1);
	}

	pub(crate) fn enforce_read_policy(&self, atom: NodeId) -> Result<()> {
		if self.inner.config.borrow().read_policy == ReadPolicy::Never {
			return Ok(());
		}

		let allowed = {
			let state = self.state();
			state.batch > 0 || state.is_within_derivation()
		};

		if allowed {
			Ok(())
		} else {
			Err(ReactiveError::violation(format!(
				"Observable values cannot be read outside actions and reactions. \
				 Make sure to wrap them inside an action or a reaction. Tried to read: {}",
				self.graph().name(atom)
			)))
		}
	}

	pub(crate) fn enforce_write_policy(&self, atom: NodeId) -> Result<()> {
		let config = self.inner.config.borrow();
		let state = self.state();
		let graph = self.graph();

		if config.enforce_write_on_main_thread && thread::current().id() != self.inner.owner {
			return Err(ReactiveError::violation(format!(
				"Observable values cannot be written outside main thread. Tried to modify: {}",
				graph.name(atom)
			)));
		}

		let observed = graph.has_observers(atom);
		if state.computation_depth > 0 && observed {
			return Err(ReactiveError::violation(format!(
				"Computed values are not allowed to cause side effects by changing \
				 observables that are already being observed. Tried to modify: {}",
				graph.name(atom)
			)));
		}

		if state.allow_state_changes || state.batch > 0 {
			return Ok(());
		}

		let forbidden = match config.write_policy {
			WritePolicy::Never => false,
			WritePolicy::Observed => observed,
			WritePolicy::Always => true,
		};

		if forbidden {
			Err(ReactiveError::violation(format!(
				"Changing observable values outside actions is not allowed. Please wrap the \
				 code in an action if this change is intended. Tried to modify: {}",
				graph.name(atom)
			)))
		} else {
			Ok(())
		}
	}

	/// Record a read of `atom` by the derivation being tracked.
	pub(crate) fn report_observed(&self, atom: NodeId) -> Result<()> {
		let (tracking, in_batch) = {
			let state = self.state();
			(state.tracking, state.batch > 0)
		};

		match tracking {
			Some(derivation) => {
				let hooks = {
					let mut graph = self.graph_mut();
					graph.add_dependency(derivation, atom);
					graph.mark_observed(atom)
				};
				self.run_hooks(atom, hooks)
			}
			None => {
				if in_batch && !self.has_observers(atom) {
					self.enqueue_for_unobservation(atom);
				}
				Ok(())
			}
		}
	}

	/// Signal a change of `atom` and flush the resulting reactions.
	pub(crate) fn report_changed(&self, atom: NodeId) -> Result<()> {
		self.start_batch();
		let mut changes = Changes::default();
		self.graph_mut().propagate_changed(atom, &mut changes);
		self.apply(changes);
		self.end_batch()
	}

	pub(crate) fn propagate_change_confirmed(&self, atom: NodeId) {
		self.graph_mut().propagate_change_confirmed(atom)
	}

	pub(crate) fn clear_observables(&self, derivation: NodeId) {
		let mut changes = Changes::default();
		self.graph_mut().clear_observables(derivation, &mut changes);
		self.apply(changes);
	}

	/// Run `func` as derivation `id`, recording every read as a dependency.
	///
	/// Caught errors are stored on the derivation and yield `Ok(None)`,
	/// unless error boundaries are disabled.
	pub(crate) fn track_derivation<T>(
		&self,
		id: NodeId,
		name: &str,
		func: impl FnOnce() -> T,
	) -> Result<Option<T>> {
		let prev = self.start_tracking(id);
		let outcome = catch_user(name, func);
		self.end_tracking(id, prev);
		self.settle(id, outcome)
	}

	/// Like `track_derivation`, without touching dependencies.
	pub(crate) fn guard_derivation<T>(
		&self,
		id: NodeId,
		name: &str,
		func: impl FnOnce() -> T,
	) -> Result<Option<T>> {
		let outcome = catch_user(name, func);
		self.settle(id, outcome)
	}

	fn start_tracking(&self, id: NodeId) -> Option<NodeId> {
		let prev = self.state_mut().tracking.replace(id);
		self.graph_mut().begin_tracking(id);
		prev
	}

	fn end_tracking(&self, id: NodeId, prev: Option<NodeId>) {
		self.state_mut().tracking = prev;
		let mut changes = Changes::default();
		self.graph_mut().bind_dependencies(id, &mut changes);
		self.apply(changes);
	}

	fn settle<T>(&self, id: NodeId, outcome: Result<T>) -> Result<Option<T>> {
		match outcome {
			Ok(value) => {
				self.graph_mut().set_error(id, None);
				Ok(Some(value))
			}
			Err(error) if error.is_caught() && !self.boundaries_disabled() => {
				debug!(derivation = ?id, %error, "captured error");
				self.graph_mut().set_error(id, Some(error));
				Ok(None)
			}
			Err(error) => Err(error),
		}
	}

	/// Decide whether derivation `id` must re-run. A possibly stale
	/// derivation first refreshes its computed dependencies, in read order.
	pub(crate) fn should_compute(&self, id: NodeId) -> Result<bool> {
		match self.derivation_state(id) {
			DerivationState::UpToDate => Ok(false),
			DerivationState::NotTracking | DerivationState::Stale => Ok(true),
			DerivationState::PossiblyStale => {
				let prev = self.start_untracked();
				let confirmed = self.confirm_staleness(id);
				self.end_untracked(prev);
				confirmed
			}
		}
	}

	fn confirm_staleness(&self, id: NodeId) -> Result<bool> {
		let observables = self.graph().observables(id);
		for atom in observables {
			let computed = self.graph().computed(atom);
			if let Some(computed) = computed {
				match computed.refresh() {
					Ok(()) => {}
					Err(error) if error.is_caught() && !self.boundaries_disabled() => {
						return Ok(true)
					}
					Err(error) => return Err(error),
				}

				if self.derivation_state(id) == DerivationState::Stale {
					return Ok(true);
				}
			}
		}

		self.graph_mut().reset_derivation_state(id);
		Ok(false)
	}

	fn apply(&self, changes: Changes) {
		for atom in changes.unobserved {
			self.enqueue_for_unobservation(atom);
		}

		for reaction in changes.stale {
			self.schedule(reaction);
		}
	}

	fn enqueue_for_unobservation(&self, atom: NodeId) {
		if self.graph_mut().mark_pending_unobservation(atom) {
			self.state_mut().pending_unobservations.push(atom);
		}
	}

	/// Queue a reaction for the next drain.
	pub(crate) fn schedule(&self, reaction: NodeId) {
		let reactive = self.graph().reactive(reaction);
		if let Some(reactive) = reactive {
			if reactive.schedule() {
				self.state_mut().pending_reactions.push(reaction);
			}
		}
	}

	/// Drain pending reactions unless a batch is open or a drain is already
	/// in progress.
	pub(crate) fn run_reactions(&self) -> Result<()> {
		{
			let state = self.state();
			if state.batch > 0 || state.is_running_reactions {
				return Ok(());
			}
		}

		self.run_reactions_internal()
	}

	fn run_reactions_internal(&self) -> Result<()> {
		self.state_mut().is_running_reactions = true;
		let max_iterations = self.inner.config.borrow().iteration_bound();

		let mut iterations = 0;
		let mut first_error = None;
		loop {
			let round = mem::take(&mut self.state_mut().pending_reactions);
			if round.is_empty() {
				break;
			}

			iterations += 1;
			if iterations >= max_iterations {
				let name = self.graph().name(round[0]);
				error!(reaction = %name, iterations, "reactions do not converge, resetting");
				self.reset_state(&round);
				return Err(ReactiveError::CyclicReaction {
					name,
					iterations: max_iterations,
				});
			}

			trace!(reactions = round.len(), iterations, "running reactions");
			for id in round {
				let reactive = self.graph().reactive(id);
				if let Some(reactive) = reactive {
					if let Err(error) = reactive.run_reaction() {
						first_error.get_or_insert(error);
					}
				}
			}
		}

		self.state_mut().is_running_reactions = false;
		first_error.map_or(Ok(()), Err)
	}

	/// Throw away every piece of batching state. Dropped reactions can be
	/// scheduled again afterwards.
	fn reset_state(&self, dropped: &[NodeId]) {
		let previous = {
			let config = self.inner.config.borrow();
			let mut state = self.state_mut();
			let fresh = ReactiveState::new(&config);
			let previous = mem::replace(&mut *state, fresh);
			previous
		};

		for &atom in &previous.pending_unobservations {
			self.graph_mut().clear_pending_unobservation(atom);
		}

		for &id in dropped.iter().chain(previous.pending_reactions.iter()) {
			self.graph_mut().settle_derivation(id);
			let reactive = self.graph().reactive(id);
			if let Some(reactive) = reactive {
				reactive.unschedule();
			}
		}
	}

	fn sweep_unobservations(&self) -> Result<()> {
		let mut first_error = None;
		loop {
			let pending = mem::take(&mut self.state_mut().pending_unobservations);
			if pending.is_empty() {
				break;
			}

			for atom in pending {
				let settled = self.graph_mut().settle_unobservation(atom);
				let unobservation = match settled {
					Some(unobservation) => unobservation,
					None => continue,
				};

				if let Err(error) = self.call_hooks(atom, unobservation.hooks) {
					first_error.get_or_insert(error);
				}

				if let Some(computed) = unobservation.computed {
					computed.suspend();
				}
			}
		}

		first_error.map_or(Ok(()), Err)
	}

	fn run_hooks(&self, atom: NodeId, hooks: SmallVec<[Hook; 1]>) -> Result<()> {
		if hooks.is_empty() {
			return Ok(());
		}

		self.call_hooks(atom, hooks)
	}

	fn call_hooks(&self, atom: NodeId, hooks: SmallVec<[Hook; 1]>) -> Result<()> {
		let name = self.graph().name(atom);
		let mut first_error = None;
		for hook in hooks {
			if let Err(error) = catch_user(&name, || hook()) {
				first_error.get_or_insert(error);
			}
		}

		first_error.map_or(Ok(()), Err)
	}

	/// Hand an error to the handlers registered on this context.
	/// Returns `false` if there are none.
	pub(crate) fn notify_error_handlers(
		&self,
		error: &ReactiveError,
		reaction: &Reaction,
	) -> Result<bool> {
		let handlers: SmallVec<[ReactionErrorHandler; 2]> = self
			.inner
			.handlers
			.borrow()
			.iter()
			.map(|(_, handler)| handler.clone())
			.collect();

		if handlers.is_empty() {
			return Ok(false);
		}

		for handler in handlers {
			catch_user(reaction.name(), || handler(error, reaction))?;
		}

		Ok(true)
	}
}

impl fmt::Debug for ReactiveContext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut debug = f.debug_struct("ReactiveContext");
		if let Ok(state) = self.inner.state.try_borrow() {
			debug
				.field("batch", &state.batch)
				.field("pending_reactions", &state.pending_reactions.len())
				.field("is_running_reactions", &state.is_running_reactions);
		}
		if let Ok(graph) = self.inner.graph.try_borrow() {
			debug.field("nodes", &graph.len());
		}
		debug.finish()
	}
}
