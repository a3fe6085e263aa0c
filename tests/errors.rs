use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracked::macros::enclose;
use tracked::{
	Action, AutorunOptions, Computed, ReactionOptions, ReactiveConfig, ReactiveContext,
	ReactiveError, ReadPolicy, Reaction, WritePolicy,
};


use mock::History;

fn context_with(config: ReactiveConfig) -> ReactiveContext {
	mock::init_tracing();
	ReactiveContext::new(config)
}

fn context() -> ReactiveContext {
	context_with(ReactiveConfig::default())
}

fn message(error: &ReactiveError) -> String {
	match error {
		ReactiveError::Caught(caught) => caught.message().to_owned(),
		other => panic!("expected a caught error, got {:?}", other),
	}
}

#[test]
fn failing_first_run_is_returned_and_disposed() {
	let ctx = context();
	let x = ctx.observable(0);

	let result = ctx.try_autorun(enclose!((x) move || {
		x.get();
		panic!("exploded");
	}));

	let error = result.unwrap_err();
	assert_eq!(message(&error), "exploded");
	assert!(!x.atom().has_observers());
}

#[test]
fn failure_elsewhere_keeps_new_reaction_alive() {
	let ctx = context();
	let trigger = ctx.observable(0);
	let own = ctx.observable(0);
	let runs = Rc::new(Cell::new(0));

	let _bad = ctx.autorun(enclose!((trigger) move || {
		if trigger.get() > 0 {
			panic!("bad reaction");
		}
	}));

	let result = ctx.try_autorun(enclose!((trigger, own, runs) move || {
		own.get();
		runs.set(runs.get() + 1);
		trigger.set(1);
	}));

	let error = result.unwrap_err();
	assert_eq!(message(&error), "bad reaction");
	assert!(own.atom().has_observers());

	own.set(5);
	assert_eq!(runs.get(), 2);
}

#[test]
fn context_handlers_receive_reaction_errors() {
	let ctx = context();
	let x = ctx.observable(0);
	let errors = History::new();

	let handler = ctx.on_reaction_error(enclose!((errors) move |error: &ReactiveError, reaction: &Reaction| {
		errors.push((reaction.name().to_owned(), message(error)));
	}));

	let _autorun = ctx.try_autorun_with(
		AutorunOptions::default().name("guard"),
		enclose!((x) move |_: &Reaction| {
			if x.get() > 0 {
				panic!("too big");
			}
		}),
	)
	.unwrap();

	assert!(x.try_set(1).is_ok());
	assert_eq!(errors.values(), vec![("guard".to_owned(), "too big".to_owned())]);

	handler.dispose();
	let error = x.try_set(2).unwrap_err();
	assert_eq!(message(&error), "too big");
	assert_eq!(errors.len(), 1);
}

#[test]
fn reaction_handler_takes_effect_errors() {
	let ctx = context();
	let x = ctx.observable(0);
	let errors = History::new();
	let fallback = Rc::new(Cell::new(0));

	let _fallback = ctx.on_reaction_error(enclose!((fallback) move |_: &ReactiveError, _: &Reaction| {
		fallback.set(fallback.get() + 1);
	}));

	let _reaction = ctx.reaction(
		enclose!((x) move || x.get()),
		|value: &i32| {
			if *value == 2 {
				panic!("bad effect");
			}
		},
		ReactionOptions::default()
			.on_error(enclose!((errors) move |error: &ReactiveError, _: &Reaction| errors.push(message(error)))),
	);

	x.set(1);
	x.set(2);
	x.set(3);

	assert_eq!(errors.values(), vec!["bad effect".to_owned()]);
	assert_eq!(fallback.get(), 0);
}

#[test]
fn computed_errors_are_rethrown_until_recovered() {
	let ctx = context();
	let divisor = ctx.observable(0);
	let ratio = ctx.computed(enclose!((divisor) move || {
		let divisor = divisor.get();
		if divisor == 0 {
			panic!("division by zero");
		}
		100 / divisor
	}));

	let error = ratio.try_get().unwrap_err();
	assert_eq!(message(&error), "division by zero");

	let seen = History::new();
	let errors = History::new();
	let _autorun = ctx.try_autorun_with(
		AutorunOptions::default()
			.on_error(enclose!((errors) move |error: &ReactiveError, _: &Reaction| errors.push(message(error)))),
		enclose!((ratio, seen) move |_: &Reaction| seen.push(ratio.get())),
	)
	.unwrap();

	assert_eq!(errors.values(), vec!["division by zero".to_owned()]);
	assert_eq!(seen.len(), 0);

	divisor.set(4);
	assert_eq!(seen.values(), vec![25]);
	assert_eq!(ratio.get(), 25);
	assert_eq!(errors.len(), 1);
}

#[test]
fn self_referencing_computed_is_a_cycle() {
	let ctx = context();
	let slot: Rc<RefCell<Option<Computed<i32>>>> = Default::default();

	let looping = ctx.computed(enclose!((slot) move || {
		let inner = slot.borrow().clone();
		inner.map_or(0, |computed| computed.get() + 1)
	}));
	*slot.borrow_mut() = Some(looping.clone());

	let error = looping.try_get().unwrap_err();
	assert!(matches!(error, ReactiveError::CyclicComputation { .. }));
	assert!(error.is_structural());

	slot.borrow_mut().take();
	assert_eq!(looping.get(), 0);
}

#[test]
fn strict_reads_require_a_derivation() {
	let ctx = context_with(ReactiveConfig {
		read_policy: ReadPolicy::Always,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(1);

	let error = x.try_get().unwrap_err();
	assert!(matches!(error, ReactiveError::ContractViolation(_)));
	assert!(error.to_string().contains(x.name()));

	assert_eq!(ctx.action(|| x.get()), 1);
	assert_eq!(x.get_untracked(), 1);

	let seen = History::new();
	let _autorun = ctx.autorun(enclose!((x, seen) move || seen.push(x.get())));
	assert_eq!(seen.values(), vec![1]);
}

#[test]
fn observed_writes_require_an_action() {
	let ctx = context_with(ReactiveConfig {
		write_policy: WritePolicy::Observed,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(1);

	assert!(x.try_set(2).is_ok());

	let _autorun = ctx.autorun(enclose!((x) move || {
		x.get();
	}));

	let error = x.try_set(3).unwrap_err();
	assert!(matches!(error, ReactiveError::ContractViolation(_)));
	assert_eq!(x.get(), 2);

	ctx.action(|| x.set(3));
	assert_eq!(x.get(), 3);
}

#[test]
fn strict_writes_require_an_action() {
	let ctx = context_with(ReactiveConfig {
		write_policy: WritePolicy::Always,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(1);

	assert!(matches!(x.try_set(2), Err(ReactiveError::ContractViolation(_))));
	assert!(x.try_set(1).is_ok());

	let increment = Action::with_name(&ctx, "increment", enclose!((x) move || x.set(x.get() + 1)));
	increment.run();
	increment.run();
	assert_eq!(x.get(), 3);
	assert_eq!(increment.name(), "increment");
}

#[test]
fn computeds_cannot_write_observed_state() {
	let ctx = context();
	let x = ctx.observable(1);
	let y = ctx.observable(0);

	let _autorun = ctx.autorun(enclose!((y) move || {
		y.get();
	}));

	let sneaky = ctx.computed(enclose!((x, y) move || {
		y.set(x.get());
		x.get()
	}));

	let error = sneaky.try_get().unwrap_err();
	assert!(matches!(error, ReactiveError::ContractViolation(_)));
	assert_eq!(y.get(), 0);
}

#[test]
fn failing_actions_release_their_scope() {
	let ctx = context();
	let x = ctx.observable(0);
	let seen = History::new();
	let _autorun = ctx.autorun(enclose!((x, seen) move || seen.push(x.get())));

	let broken = Action::with_name(&ctx, "broken", enclose!((x) move || {
		x.set(1);
		panic!("half done");
	}));

	let error = broken.try_run().unwrap_err();
	match &error {
		ReactiveError::Caught(caught) => assert_eq!(caught.origin(), "broken"),
		other => panic!("expected a caught error, got {:?}", other),
	}

	assert!(!ctx.in_batch());
	assert!(!ctx.is_tracking());
	assert_eq!(seen.values(), vec![0, 1]);
}

#[test]
fn disabled_boundaries_let_errors_escape() {
	let ctx = context_with(ReactiveConfig {
		disable_error_boundaries: true,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(0);
	let handled = Rc::new(Cell::new(0));

	let _handler = ctx.on_reaction_error(enclose!((handled) move |_: &ReactiveError, _: &Reaction| {
		handled.set(handled.get() + 1);
	}));

	let _autorun = ctx.autorun(enclose!((x) move || {
		if x.get() > 0 {
			panic!("escaped");
		}
	}));

	let error = x.try_set(1).unwrap_err();
	assert_eq!(message(&error), "escaped");
	assert_eq!(handled.get(), 0);
	assert!(!ctx.in_batch());

	let halved = ctx.computed(enclose!((x) move || {
		if x.get() % 2 == 1 {
			panic!("odd");
		}
		x.get() / 2
	}));
	assert_eq!(message(&halved.try_get().unwrap_err()), "odd");
}
