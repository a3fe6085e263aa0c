use std::fmt;
use std::rc::Rc;

use crate::context::ReactiveContext;
use crate::graph::Listener;
use crate::node::{Node, NodeId};
use crate::Result;

/// The smallest observable unit: it carries no value, only the fact that
/// it was read or changed.
#[derive(Clone)]
pub struct Atom {
	body: Rc<AtomBody>,
}

struct AtomBody {
	ctx: ReactiveContext,
	id: NodeId,
	name: String,
}

impl Drop for AtomBody {
	fn drop(&mut self) {
		self.ctx.release(self.id)
	}
}

impl Atom {
	pub fn new(ctx: &ReactiveContext) -> Self {
		Self::create(ctx, "Atom", None)
	}

	pub fn with_name(ctx: &ReactiveContext, name: impl Into<String>) -> Self {
		Self::create(ctx, "Atom", Some(name.into()))
	}

	pub(crate) fn create(ctx: &ReactiveContext, prefix: &str, name: Option<String>) -> Self {
		let (id, name) = ctx.allocate(prefix, name);
		ctx.register(id, Node::atom(name.clone()));
		Atom {
			body: Rc::new(AtomBody {
				ctx: ctx.clone(),
				id,
				name,
			}),
		}
	}

	pub fn name(&self) -> &str {
		&self.body.name
	}

	pub fn context(&self) -> &ReactiveContext {
		&self.body.ctx
	}

	pub(crate) fn id(&self) -> NodeId {
		self.body.id
	}

	pub fn try_report_observed(&self) -> Result<()> {
		self.body.ctx.report_observed(self.body.id)
	}

	/// Record a read by the derivation currently being tracked, if any.
	pub fn report_observed(&self) {
		self.try_report_observed()
			.unwrap_or_else(|error| error.raise())
	}

	pub fn try_report_changed(&self) -> Result<()> {
		self.body.ctx.report_changed(self.body.id)
	}

	/// Mark every observer stale and run the reactions that depend on it,
	/// unless a batch is still open.
	pub fn report_changed(&self) {
		self.try_report_changed()
			.unwrap_or_else(|error| error.raise())
	}

	/// Called when the atom gains its first observer.
	pub fn on_become_observed(&self, hook: impl Fn() + 'static) {
		self.body
			.ctx
			.add_listener(self.body.id, Listener::Observed, Rc::new(hook))
	}

	/// Called once the atom has lost its last observer and the batch ended.
	pub fn on_become_unobserved(&self, hook: impl Fn() + 'static) {
		self.body
			.ctx
			.add_listener(self.body.id, Listener::Unobserved, Rc::new(hook))
	}

	pub fn is_being_observed(&self) -> bool {
		self.body.ctx.graph().is_being_observed(self.body.id)
	}

	pub fn has_observers(&self) -> bool {
		self.body.ctx.has_observers(self.body.id)
	}

	pub fn observer_count(&self) -> usize {
		self.body.ctx.graph().observer_count(self.body.id)
	}
}

impl fmt::Debug for Atom {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Atom").field("name", &self.body.name).finish()
	}
}
