use std::mem;
use std::rc::Rc;

use fxhash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::node::{AtomNode, DerivationNode, Hook, Node, NodeId, NodeKind};
use crate::{DerivationState, ReactiveError, Reactive, Refresh};

/// Follow-up work produced by a graph mutation. The context applies it once
/// the graph borrow is released.
#[derive(Default)]
pub(crate) struct Changes {
	/// Reactions that just became stale and must be scheduled.
	pub stale: SmallVec<[NodeId; 4]>,
	/// Atoms that just lost their last observer.
	pub unobserved: SmallVec<[NodeId; 4]>,
}

/// What must happen to an atom that ended up without observers.
pub(crate) struct Unobservation {
	pub hooks: SmallVec<[Hook; 1]>,
	pub computed: Option<Rc<dyn Refresh>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum Listener {
	Observed,
	Unobserved,
}

/// Arena of every atom and derivation of one context, wired by id.
pub(crate) struct Graph {
	nodes: FxHashMap<NodeId, Node>,
	next_id: u64,
}

impl Graph {
	pub fn new() -> Self {
		Graph {
			nodes: FxHashMap::default(),
			next_id: 0,
		}
	}

	pub fn next_id(&mut self) -> NodeId {
		self.next_id += 1;
		NodeId(self.next_id)
	}

	pub fn insert(&mut self, id: NodeId, node: Node) {
		self.nodes.insert(id, node);
	}

	pub fn contains(&self, id: NodeId) -> bool {
		self.nodes.contains_key(&id)
	}

	pub fn len(&self) -> usize {
		self.nodes.len()
	}

	pub fn name(&self, id: NodeId) -> String {
		match self.nodes.get(&id) {
			Some(node) => node.name.clone(),
			None => format!("{:?}", id),
		}
	}

	fn atom(&self, id: NodeId) -> Option<&AtomNode> {
		self.nodes.get(&id).and_then(|node| node.atom.as_ref())
	}

	fn atom_mut(&mut self, id: NodeId) -> Option<&mut AtomNode> {
		self.nodes.get_mut(&id).and_then(|node| node.atom.as_mut())
	}

	fn derivation(&self, id: NodeId) -> Option<&DerivationNode> {
		self.nodes.get(&id).and_then(|node| node.derivation.as_ref())
	}

	fn derivation_mut(&mut self, id: NodeId) -> Option<&mut DerivationNode> {
		self.nodes.get_mut(&id).and_then(|node| node.derivation.as_mut())
	}

	pub fn computed(&self, id: NodeId) -> Option<Rc<dyn Refresh>> {
		match self.nodes.get(&id).map(|node| &node.kind) {
			Some(NodeKind::Computed(this)) => this.upgrade(),
			_ => None,
		}
	}

	pub fn reactive(&self, id: NodeId) -> Option<Rc<dyn Reactive>> {
		match self.nodes.get(&id).map(|node| &node.kind) {
			Some(NodeKind::Reaction(this)) => Some(this.clone()),
			_ => None,
		}
	}

	pub fn has_observers(&self, id: NodeId) -> bool {
		self.atom(id).map_or(false, |atom| !atom.observers.is_empty())
	}

	pub fn is_being_observed(&self, id: NodeId) -> bool {
		self.atom(id).map_or(false, |atom| atom.is_being_observed)
	}

	pub fn observer_count(&self, id: NodeId) -> usize {
		self.atom(id).map_or(0, |atom| atom.observers.len())
	}

	pub fn state(&self, id: NodeId) -> DerivationState {
		self.derivation(id)
			.map_or(DerivationState::NotTracking, |derivation| derivation.state)
	}

	pub fn observables(&self, id: NodeId) -> Vec<NodeId> {
		self.derivation(id)
			.map(|derivation| derivation.observables.clone())
			.unwrap_or_default()
	}

	pub fn error(&self, id: NodeId) -> Option<ReactiveError> {
		self.derivation(id)
			.and_then(|derivation| derivation.error.clone())
	}

	pub fn set_error(&mut self, id: NodeId, error: Option<ReactiveError>) {
		if let Some(derivation) = self.derivation_mut(id) {
			derivation.error = error;
		}
	}

	pub fn add_listener(&mut self, id: NodeId, listener: Listener, hook: Hook) {
		if let Some(atom) = self.atom_mut(id) {
			match listener {
				Listener::Observed => atom.on_observed.push(hook),
				Listener::Unobserved => atom.on_unobserved.push(hook),
			}
		}
	}

	/// Prepare a derivation for a fresh tracking run.
	pub fn begin_tracking(&mut self, id: NodeId) {
		self.reset_derivation_state(id);
		if let Some(derivation) = self.derivation_mut(id) {
			derivation.new_observables.clear();
			derivation.seen.clear();
		}
	}

	/// Record that `derivation` read `atom` during the tracking run in
	/// progress. Repeated reads are recorded once.
	pub fn add_dependency(&mut self, derivation: NodeId, atom: NodeId) {
		if derivation == atom || !self.nodes.contains_key(&atom) {
			return;
		}

		if let Some(derivation) = self.derivation_mut(derivation) {
			if derivation.seen.insert(atom) {
				derivation.new_observables.push(atom);
			}
		}
	}

	/// Flag an atom as observed. Returns the hooks to fire when this is the
	/// first observation since the atom was last unobserved.
	pub fn mark_observed(&mut self, id: NodeId) -> SmallVec<[Hook; 1]> {
		match self.atom_mut(id) {
			Some(atom) if !atom.is_being_observed => {
				atom.is_being_observed = true;
				atom.on_observed.clone()
			}
			_ => SmallVec::new(),
		}
	}

	pub fn add_observer(&mut self, atom: NodeId, derivation: NodeId) {
		let state = self.state(derivation);
		if let Some(atom) = self.atom_mut(atom) {
			atom.observers.insert(derivation);
			if atom.lowest_observer_state == DerivationState::NotTracking
				|| atom.lowest_observer_state > state
			{
				atom.lowest_observer_state = state;
			}
		}
	}

	/// Returns `true` if the atom has no observers left.
	pub fn remove_observer(&mut self, atom: NodeId, derivation: NodeId) -> bool {
		match self.atom_mut(atom) {
			Some(atom) => {
				atom.observers.shift_remove(&derivation);
				atom.observers.is_empty()
			}
			None => false,
		}
	}

	/// Replace the dependency set of `id` with what the last tracking run
	/// read. New edges inherit the staleness of computed dependencies that
	/// were invalidated while the run was in progress.
	pub fn bind_dependencies(&mut self, id: NodeId, out: &mut Changes) {
		let (previous, next) = match self.derivation_mut(id) {
			Some(derivation) => {
				derivation.seen.clear();
				(
					mem::take(&mut derivation.observables),
					mem::take(&mut derivation.new_observables),
				)
			}
			None => return,
		};

		let previous_set: FxHashSet<NodeId> = previous.iter().copied().collect();
		let next_set: FxHashSet<NodeId> = next.iter().copied().collect();

		let mut lowest = DerivationState::UpToDate;
		let mut bound = Vec::with_capacity(next.len());
		for atom in next {
			if !self.nodes.contains_key(&atom) {
				continue;
			}

			if !previous_set.contains(&atom) {
				self.add_observer(atom, id);
				if let Some(dependency) = self.derivation(atom) {
					if dependency.state > lowest {
						lowest = dependency.state;
					}
				}
			}

			bound.push(atom);
		}

		for atom in previous {
			if !next_set.contains(&atom) && self.remove_observer(atom, id) {
				out.unobserved.push(atom);
			}
		}

		if let Some(derivation) = self.derivation_mut(id) {
			derivation.observables = bound;
		}

		if lowest != DerivationState::UpToDate {
			if let Some(derivation) = self.derivation_mut(id) {
				derivation.state = lowest;
			}
			self.on_become_stale(id, out);
		}
	}

	/// Detach a derivation from every dependency.
	pub fn clear_observables(&mut self, id: NodeId, out: &mut Changes) {
		let observables = match self.derivation_mut(id) {
			Some(derivation) => {
				derivation.state = DerivationState::NotTracking;
				derivation.new_observables.clear();
				derivation.seen.clear();
				mem::take(&mut derivation.observables)
			}
			None => return,
		};

		for atom in observables {
			if self.remove_observer(atom, id) {
				out.unobserved.push(atom);
			}
		}
	}

	/// Mark a derivation up to date and let its dependencies know that at
	/// least one observer is settled.
	pub fn reset_derivation_state(&mut self, id: NodeId) {
		let observables = match self.derivation_mut(id) {
			Some(derivation) if derivation.state != DerivationState::UpToDate => {
				derivation.state = DerivationState::UpToDate;
				derivation.observables.clone()
			}
			_ => return,
		};

		for atom in observables {
			if let Some(atom) = self.atom_mut(atom) {
				atom.lowest_observer_state = DerivationState::UpToDate;
			}
		}
	}

	/// Forget the staleness a dropped derivation and the computeds below it
	/// were left with, so the next change propagates through them again.
	/// Their cached values are kept as they are.
	pub fn settle_derivation(&mut self, id: NodeId) {
		let mut stack = vec![id];
		while let Some(id) = stack.pop() {
			let observables = match self.derivation_mut(id) {
				Some(derivation) if derivation.state != DerivationState::NotTracking => {
					derivation.state = DerivationState::UpToDate;
					derivation.observables.clone()
				}
				_ => continue,
			};

			for atom in observables {
				if let Some(atom) = self.atom_mut(atom) {
					atom.lowest_observer_state = DerivationState::UpToDate;
				}
				if self.state(atom) > DerivationState::UpToDate {
					stack.push(atom);
				}
			}
		}
	}

	fn observers(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
		self.atom(id)
			.map(|atom| atom.observers.iter().copied().collect())
			.unwrap_or_default()
	}

	/// An observer has just left the up-to-date state.
	fn on_become_stale(&mut self, id: NodeId, out: &mut Changes) {
		let is_computed = match self.nodes.get(&id) {
			Some(node) => node.is_computed(),
			None => return,
		};

		if is_computed {
			self.propagate_possibly_changed(id, out);
		} else {
			out.stale.push(id);
		}
	}

	/// The value of `id` definitely changed.
	pub fn propagate_changed(&mut self, id: NodeId, out: &mut Changes) {
		match self.atom_mut(id) {
			Some(atom) if atom.lowest_observer_state != DerivationState::Stale => {
				atom.lowest_observer_state = DerivationState::Stale;
			}
			_ => return,
		}

		for observer in self.observers(id) {
			if self.state(observer) == DerivationState::UpToDate {
				self.on_become_stale(observer, out);
			}
			if let Some(derivation) = self.derivation_mut(observer) {
				derivation.state = DerivationState::Stale;
			}
		}
	}

	/// The computed `id` has a stale dependency and may change.
	pub fn propagate_possibly_changed(&mut self, id: NodeId, out: &mut Changes) {
		match self.atom_mut(id) {
			Some(atom) if atom.lowest_observer_state == DerivationState::UpToDate => {
				atom.lowest_observer_state = DerivationState::PossiblyStale;
			}
			_ => return,
		}

		for observer in self.observers(id) {
			if self.state(observer) == DerivationState::UpToDate {
				if let Some(derivation) = self.derivation_mut(observer) {
					derivation.state = DerivationState::PossiblyStale;
				}
				self.on_become_stale(observer, out);
			}
		}
	}

	/// The computed `id` was recomputed and its value did change.
	pub fn propagate_change_confirmed(&mut self, id: NodeId) {
		match self.atom_mut(id) {
			Some(atom) if atom.lowest_observer_state != DerivationState::Stale => {
				atom.lowest_observer_state = DerivationState::Stale;
			}
			_ => return,
		}

		for observer in self.observers(id) {
			match self.state(observer) {
				DerivationState::PossiblyStale => {
					if let Some(derivation) = self.derivation_mut(observer) {
						derivation.state = DerivationState::Stale;
					}
				}
				DerivationState::UpToDate => {
					if let Some(atom) = self.atom_mut(id) {
						atom.lowest_observer_state = DerivationState::UpToDate;
					}
				}
				_ => {}
			}
		}
	}

	/// Returns `true` if the atom was not queued yet.
	pub fn mark_pending_unobservation(&mut self, id: NodeId) -> bool {
		match self.atom_mut(id) {
			Some(atom) if !atom.is_pending_unobservation => {
				atom.is_pending_unobservation = true;
				true
			}
			_ => false,
		}
	}

	pub fn clear_pending_unobservation(&mut self, id: NodeId) {
		if let Some(atom) = self.atom_mut(id) {
			atom.is_pending_unobservation = false;
		}
	}

	/// Settle a queued atom. Returns `None` if it got observed again in the
	/// meantime.
	pub fn settle_unobservation(&mut self, id: NodeId) -> Option<Unobservation> {
		let node = self.nodes.get_mut(&id)?;
		let atom = node.atom.as_mut()?;
		atom.is_pending_unobservation = false;
		if !atom.observers.is_empty() {
			return None;
		}

		let hooks = if atom.is_being_observed {
			atom.is_being_observed = false;
			atom.on_unobserved.clone()
		} else {
			SmallVec::new()
		};

		let computed = match &node.kind {
			NodeKind::Computed(this) => this.upgrade(),
			_ => None,
		};

		Some(Unobservation { hooks, computed })
	}

	/// Remove a node and every edge touching it. The node is handed back so
	/// that it is dropped outside of the graph borrow.
	pub fn release(&mut self, id: NodeId, out: &mut Changes) -> Option<Node> {
		let node = self.nodes.remove(&id)?;

		if let Some(derivation) = &node.derivation {
			for &atom in &derivation.observables {
				if self.remove_observer(atom, id) {
					out.unobserved.push(atom);
				}
			}
		}

		if let Some(atom) = &node.atom {
			for &observer in &atom.observers {
				if let Some(derivation) = self.derivation_mut(observer) {
					derivation.observables.retain(|dependency| *dependency != id);
				}
			}
		}

		Some(node)
	}
}
