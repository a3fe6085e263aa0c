use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use tracked::macros::enclose;
use tracked::{
	ManualScheduler, Reaction, ReactionOptions, ReactiveConfig, ReactiveContext, ReactiveError, WhenOptions,
	DEFAULT_MAX_ITERATIONS,
};


use mock::History;

fn context() -> ReactiveContext {
	mock::init_tracing();
	ReactiveContext::new(ReactiveConfig::default())
}

fn scheduled_context() -> (ReactiveContext, Rc<ManualScheduler>) {
	mock::init_tracing();
	let scheduler = Rc::new(ManualScheduler::new());
	let ctx = ReactiveContext::new(ReactiveConfig::default().with_scheduler(scheduler.clone()));
	(ctx, scheduler)
}

#[test]
fn reaction_runs_effect_only_on_change() {
	let ctx = context();
	let x = ctx.observable(10);
	let is_pair = ctx.computed(enclose!((x) move || x.get() % 2 == 0));
	let changes = Rc::new(Cell::new(1));

	let _reaction = ctx.reaction(
		enclose!((is_pair) move || is_pair.get()),
		enclose!((changes) move |_: &bool| changes.set(changes.get() + 1)),
		ReactionOptions::default(),
	);

	assert_eq!(changes.get(), 1);
	x.set(11);
	assert_eq!(changes.get(), 2);
	x.set(12);
	assert_eq!(changes.get(), 3);
	x.set(20);
	assert_eq!(changes.get(), 3);
}

#[test]
fn reaction_effect_receives_new_value() {
	let ctx = context();
	let x = ctx.observable(1);
	let seen = History::new();

	let disposer = ctx.reaction(
		enclose!((x) move || x.get() * 10),
		enclose!((seen) move |value: &i32| seen.push(*value)),
		ReactionOptions::default(),
	);

	x.set(2);
	x.set(3);
	disposer.dispose();
	x.set(4);

	assert_eq!(seen.values(), vec![20, 30]);
}

#[test]
fn reaction_uses_custom_equality() {
	let ctx = context();
	let x = ctx.observable(1);
	let seen = History::new();

	let _reaction = ctx.reaction(
		enclose!((x) move || x.get()),
		enclose!((seen) move |value: &i32| seen.push(*value)),
		ReactionOptions::default().equals(|a: &i32, b: &i32| a / 10 == b / 10),
	);

	x.set(5);
	x.set(9);
	x.set(12);
	x.set(15);
	x.set(31);

	assert_eq!(seen.values(), vec![12, 31]);
}

#[test]
fn reaction_effect_is_an_action() {
	let ctx = context();
	let x = ctx.observable(1);
	let mirror = ctx.observable(0);
	let unrelated = ctx.observable(0);
	let runs = Rc::new(Cell::new(0));

	let _reaction = ctx.reaction(
		enclose!((x) move || x.get()),
		enclose!((mirror, unrelated, runs) move |value: &i32| {
			unrelated.get();
			mirror.set(*value);
			runs.set(runs.get() + 1);
		}),
		ReactionOptions::default(),
	);

	x.set(2);
	assert_eq!(mirror.get(), 2);
	unrelated.set(1);
	assert_eq!(runs.get(), 1);
}

#[test]
fn delayed_reaction_coalesces_invalidations() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(1);
	let seen = History::new();

	let _reaction = ctx.reaction(
		enclose!((x) move || x.get()),
		enclose!((seen) move |value: &i32| seen.push(*value)),
		ReactionOptions::default().delay(Duration::from_millis(100)),
	);

	x.set(2);
	x.set(3);
	assert_eq!(seen.len(), 0);
	assert_eq!(scheduler.pending(), 1);

	scheduler.advance(Duration::from_millis(50)).unwrap();
	assert_eq!(seen.len(), 0);

	scheduler.advance(Duration::from_millis(50)).unwrap();
	assert_eq!(seen.values(), vec![3]);

	x.set(4);
	scheduler.advance(Duration::from_millis(100)).unwrap();
	assert_eq!(seen.values(), vec![3, 4]);
}

#[test]
fn delayed_reaction_disposed_before_firing_does_nothing() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(1);
	let seen = History::new();

	let disposer = ctx.reaction(
		enclose!((x) move || x.get()),
		enclose!((seen) move |value: &i32| seen.push(*value)),
		ReactionOptions::default().delay(Duration::from_millis(10)),
	);

	x.set(2);
	disposer.dispose();
	scheduler.advance(Duration::from_millis(10)).unwrap();

	assert_eq!(seen.len(), 0);
}

#[test]
fn delay_without_scheduler_is_rejected() {
	let ctx = context();
	let result = ctx.try_reaction(
		|| 1,
		|_: &i32| {},
		ReactionOptions::default().delay(Duration::from_millis(10)),
	);

	assert!(matches!(result, Err(ReactiveError::ContractViolation(_))));
}

#[test]
fn when_fires_once_and_disposes_itself() {
	let ctx = context();
	let x = ctx.observable(10);
	let history = History::new();
	let fired = Rc::new(Cell::new(0));

	let _autorun = ctx.autorun(enclose!((x, history) move || history.push(x.get())));
	let disposer = ctx.when_reaction(
		enclose!((x) move || x.get() == 12),
		enclose!((fired) move || fired.set(fired.get() + 1)),
		WhenOptions::default(),
	);

	for value in [11, 12, 20, 12, 24] {
		x.set(value);
	}

	assert_eq!(fired.get(), 1);
	assert_eq!(history.values(), vec![10, 11, 12, 20, 12, 24]);
	assert_eq!(x.atom().observer_count(), 1);

	disposer.dispose();
	assert_eq!(fired.get(), 1);
}

#[test]
fn when_already_true_fires_immediately() {
	let ctx = context();
	let fired = Rc::new(Cell::new(false));

	let disposer = ctx.when_reaction(
		|| true,
		enclose!((fired) move || fired.set(true)),
		WhenOptions::default(),
	);

	assert!(fired.get());
	assert!(disposer.try_dispose().is_ok());
}

#[test]
fn when_timeout_is_reported() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(0);
	let fired = Rc::new(Cell::new(false));
	let errors = History::new();

	let _disposer = ctx.when_reaction(
		enclose!((x) move || x.get() > 10),
		enclose!((fired) move || fired.set(true)),
		WhenOptions::default()
			.name("ready")
			.timeout(Duration::from_secs(1))
			.on_error(enclose!((errors) move |error: &ReactiveError, _: &Reaction| errors.push(error.clone()))),
	);

	scheduler.advance(Duration::from_secs(2)).unwrap();
	assert_eq!(
		errors.values(),
		vec![ReactiveError::Timeout {
			name: "ready".into()
		}]
	);

	x.set(20);
	assert!(!fired.get());
	assert!(!x.atom().has_observers());
}

#[test]
fn unhandled_when_timeout_fails_the_scheduler_run() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(0);

	let _disposer = ctx.when_reaction(
		enclose!((x) move || x.get() > 10),
		|| {},
		WhenOptions::default().timeout(Duration::from_millis(10)),
	);

	let result = scheduler.advance(Duration::from_millis(10));
	assert!(matches!(result, Err(ReactiveError::Timeout { .. })));
}

#[test]
fn when_timeout_reaches_context_handlers() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(0);
	let errors = History::new();

	let _handler = ctx.on_reaction_error(enclose!((errors) move |error: &ReactiveError, reaction: &Reaction| {
		errors.push((reaction.name().to_owned(), error.clone()));
	}));

	let _disposer = ctx.when_reaction(
		enclose!((x) move || x.get() > 10),
		|| {},
		WhenOptions::default().timeout(Duration::from_millis(10)),
	);

	assert!(scheduler.advance(Duration::from_millis(10)).is_ok());
	assert_eq!(
		errors.values(),
		vec![(
			"When@2".to_owned(),
			ReactiveError::Timeout {
				name: "When@2".into()
			}
		)]
	);
}

#[test]
fn satisfied_when_cancels_its_timeout() {
	let (ctx, scheduler) = scheduled_context();
	let x = ctx.observable(0);
	let fired = Rc::new(Cell::new(false));

	let _disposer = ctx.when_reaction(
		enclose!((x) move || x.get() > 10),
		enclose!((fired) move || fired.set(true)),
		WhenOptions::default().timeout(Duration::from_secs(1)),
	);

	assert_eq!(scheduler.pending(), 1);
	x.set(11);
	assert!(fired.get());
	assert_eq!(scheduler.pending(), 0);
	assert!(scheduler.advance(Duration::from_secs(2)).is_ok());
}

#[test]
fn diverging_reactions_reset_the_context() {
	mock::init_tracing();
	let ctx = ReactiveContext::new(ReactiveConfig {
		max_iterations: 10,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(0);
	let doubled = ctx.computed(enclose!((x) move || x.get() * 2));

	let xs = History::new();
	let doubles = History::new();
	let _watcher = ctx.autorun(enclose!((x, xs) move || xs.push(x.get())));
	let _derived = ctx.autorun(enclose!((doubled, doubles) move || doubles.push(doubled.get())));

	let looping = ctx.autorun(enclose!((x) move || {
		let value = x.get();
		if value > 0 {
			x.set(value + 1);
		}
	}));

	let error = x.try_set(1).unwrap_err();
	assert!(matches!(error, ReactiveError::CyclicReaction { iterations: 10, .. }));
	assert!(!ctx.in_batch());

	let y = ctx.observable(0);
	let seen = History::new();
	let _autorun = ctx.autorun(enclose!((y, seen) move || seen.push(y.get())));
	y.set(1);
	assert_eq!(seen.values(), vec![0, 1]);

	looping.dispose();
	assert_eq!(x.atom().observer_count(), 2);

	let before = xs.len();
	x.set(1000);
	assert_eq!(xs.len(), before + 1);
	assert_eq!(xs.values().last(), Some(&1000));
	assert_eq!(doubles.values().last(), Some(&2000));
}

#[test]
fn zero_iteration_bound_uses_the_default() {
	mock::init_tracing();
	let ctx = ReactiveContext::new(ReactiveConfig {
		max_iterations: 0,
		..ReactiveConfig::default()
	});
	let x = ctx.observable(0);
	let seen = History::new();
	let _autorun = ctx.autorun(enclose!((x, seen) move || seen.push(x.get())));

	x.set(1);
	assert_eq!(seen.values(), vec![0, 1]);

	let _looping = ctx.autorun(enclose!((x) move || {
		let value = x.get();
		if value > 1 {
			x.set(value + 1);
		}
	}));

	let error = x.try_set(2).unwrap_err();
	assert!(matches!(
		error,
		ReactiveError::CyclicReaction { iterations, .. } if iterations == DEFAULT_MAX_ITERATIONS
	));
}

#[test]
fn reactions_run_in_subscription_order() {
	let ctx = context();
	let x = ctx.observable(0);
	let order = History::new();

	let _first = ctx.autorun(enclose!((x, order) move || {
		x.get();
		order.push("first");
	}));
	let _second = ctx.autorun(enclose!((x, order) move || {
		x.get();
		order.push("second");
	}));
	let _third = ctx.autorun(enclose!((x, order) move || {
		x.get();
		order.push("third");
	}));

	x.set(1);
	assert_eq!(
		order.values(),
		vec!["first", "second", "third", "first", "second", "third"]
	);
}

#[test]
fn subscription_order_beats_creation_order() {
	let ctx = context();
	let gate = ctx.observable(false);
	let x = ctx.observable(0);
	let order = History::new();

	// created first, but only starts reading `x` once the gate opens
	let _late = ctx.autorun(enclose!((gate, x, order) move || {
		if gate.get() {
			x.get();
			order.push("late");
		}
	}));
	let _early = ctx.autorun(enclose!((x, order) move || {
		x.get();
		order.push("early");
	}));

	gate.set(true);
	x.set(1);
	assert_eq!(order.values(), vec!["early", "late", "early", "late"]);
}

#[test]
fn retriggered_reaction_runs_in_next_round() {
	let ctx = context();
	let x = ctx.observable(0);
	let y = ctx.observable(0);
	let order = History::new();

	let _reader = ctx.autorun(enclose!((x, y, order) move || {
		order.push(("reader", x.get(), y.get()));
	}));
	let _writer = ctx.autorun(enclose!((x, y, order) move || {
		let value = x.get();
		order.push(("writer", value, 0));
		if value > 0 {
			y.set(value * 10);
		}
	}));

	x.set(1);
	assert_eq!(
		order.values(),
		vec![
			("reader", 0, 0),
			("writer", 0, 0),
			("reader", 1, 0),
			("writer", 1, 0),
			("reader", 1, 10),
		]
	);
}

#[test]
fn reaction_can_dispose_itself_while_running() {
	let ctx = context();
	let x = ctx.observable(0);
	let runs = Rc::new(Cell::new(0));

	let _disposer = ctx.try_autorun_with(
		Default::default(),
		enclose!((x, runs) move |reaction: &Reaction| {
			runs.set(runs.get() + 1);
			if x.get() > 0 {
				reaction.dispose();
			}
		}),
	)
	.unwrap();

	x.set(1);
	x.set(2);
	assert_eq!(runs.get(), 2);
	assert!(!x.atom().has_observers());
}
