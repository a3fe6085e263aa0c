use std::fmt;
use std::rc::{Rc, Weak};

use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexSet;
use smallvec::SmallVec;

use crate::{DerivationState, ReactiveError, Reactive, Refresh};

/// Stable handle of a node in a context's graph arena.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u64);

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

pub(crate) type Hook = Rc<dyn Fn()>;

/// What kind of graph participant a node stands for.
pub(crate) enum NodeKind {
	/// A leaf: plain atoms and observables.
	Atom,
	/// An atom that is also a derivation. The arena does not own it.
	Computed(Weak<dyn Refresh>),
	/// A derivation with no atom half. Owned by the arena until disposed.
	Reaction(Rc<dyn Reactive>),
}

pub(crate) struct AtomNode {
	/// Derivations reading this atom, in subscription order.
	pub observers: IndexSet<NodeId, FxBuildHasher>,
	pub is_being_observed: bool,
	pub is_pending_unobservation: bool,
	pub lowest_observer_state: DerivationState,
	pub on_observed: SmallVec<[Hook; 1]>,
	pub on_unobserved: SmallVec<[Hook; 1]>,
}

impl AtomNode {
	pub fn new() -> Self {
		AtomNode {
			observers: IndexSet::default(),
			is_being_observed: false,
			is_pending_unobservation: false,
			lowest_observer_state: DerivationState::NotTracking,
			on_observed: SmallVec::new(),
			on_unobserved: SmallVec::new(),
		}
	}
}

pub(crate) struct DerivationNode {
	/// Atoms read during the last completed tracking run, in read order.
	pub observables: Vec<NodeId>,
	/// Atoms read during the tracking run in progress.
	pub new_observables: Vec<NodeId>,
	pub seen: FxHashSet<NodeId>,
	pub state: DerivationState,
	pub error: Option<ReactiveError>,
}

impl DerivationNode {
	pub fn new() -> Self {
		DerivationNode {
			observables: Vec::new(),
			new_observables: Vec::new(),
			seen: FxHashSet::default(),
			state: DerivationState::NotTracking,
			error: None,
		}
	}
}

pub(crate) struct Node {
	pub name: String,
	pub kind: NodeKind,
	pub atom: Option<AtomNode>,
	pub derivation: Option<DerivationNode>,
}

impl Node {
	pub fn atom(name: String) -> Self {
		Node {
			name,
			kind: NodeKind::Atom,
			atom: Some(AtomNode::new()),
			derivation: None,
		}
	}

	pub fn computed(name: String, this: Weak<dyn Refresh>) -> Self {
		Node {
			name,
			kind: NodeKind::Computed(this),
			atom: Some(AtomNode::new()),
			derivation: Some(DerivationNode::new()),
		}
	}

	pub fn reaction(name: String, this: Rc<dyn Reactive>) -> Self {
		Node {
			name,
			kind: NodeKind::Reaction(this),
			atom: None,
			derivation: Some(DerivationNode::new()),
		}
	}

	pub fn is_computed(&self) -> bool {
		matches!(self.kind, NodeKind::Computed(_))
	}
}
