//! End-to-end runtime scenarios
//!
//! Each test builds a small component tree, drives it through a
//! [`RootRuntime`] and checks what reaches the outputs, the error hooks
//! and the inspector.

use crate::action::from_fn;
use crate::plugins::{self, Plugins};
use crate::*;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Slot<T> = Arc<Mutex<Option<T>>>;
type Log = Arc<Mutex<Vec<String>>>;

fn slot<T>() -> Slot<T> {
    Arc::new(Mutex::new(None))
}

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

/// Action that hands its emitter out and counts how often it is stopped
fn handed_out<E: Send + 'static>(
    key: &'static str,
    emitter: &Slot<Emitter<E>>,
    stops: &Arc<AtomicUsize>,
) -> impl Action<Event = E> {
    let (emitter, stops) = (emitter.clone(), stops.clone());
    from_fn(key, move |e| {
        *emitter.lock() = Some(e);
        Ok(Cancelable::new(move || {
            stops.fetch_add(1, Ordering::SeqCst);
        }))
    })
}

/// Action that records its start and stop in `log`
fn logged(log: &Log, name: String) -> impl Action<Event = ()> {
    let log = log.clone();
    from_fn(name.clone(), move |_emitter: Emitter<()>| {
        log.lock().push(format!("start:{name}"));
        Ok(Cancelable::new(move || log.lock().push(format!("stop:{name}"))))
    })
}

struct Reported {
    variant: String,
    kind: ComponentKind,
    message: String,
}

#[derive(Clone, Default)]
struct Errors(Arc<Mutex<Vec<Reported>>>);

impl Errors {
    fn handler(&self) -> impl Fn(&EngineError) + Send + Sync + 'static {
        let sink = self.0.clone();
        move |err: &EngineError| {
            let debug = format!("{err:?}");
            sink.lock().push(Reported {
                variant: debug.split_whitespace().next().unwrap_or_default().to_string(),
                kind: err.kind(),
                message: err.to_string(),
            });
        }
    }

    fn count(&self, variant: &str) -> usize {
        self.0.lock().iter().filter(|r| r.variant == variant).count()
    }

    fn of(&self, variant: &str) -> Vec<(ComponentKind, String)> {
        self.0
            .lock()
            .iter()
            .filter(|r| r.variant == variant)
            .map(|r| (r.kind, r.message.clone()))
            .collect()
    }

    fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

#[derive(Clone, Default)]
struct Trace(Arc<Mutex<Vec<TraceEvent>>>);

impl Trace {
    fn inspector(&self) -> impl Inspector + 'static {
        let sink = self.0.clone();
        move |event: &TraceEvent| sink.lock().push(event.clone())
    }

    fn position(&self, matches: impl Fn(&TraceEvent) -> bool) -> Option<usize> {
        self.0.lock().iter().position(matches)
    }

    fn last_position(&self, matches: impl Fn(&TraceEvent) -> bool) -> Option<usize> {
        self.0.lock().iter().rposition(matches)
    }

    fn count(&self, matches: impl Fn(&TraceEvent) -> bool) -> usize {
        self.0.lock().iter().filter(|event| matches(event)).count()
    }
}

// ---------------------------------------------------------------------------
// Components
// ---------------------------------------------------------------------------

/// Counts events from a long-running action
struct Counter {
    emitter: Slot<Emitter<()>>,
    stops: Arc<AtomicUsize>,
}

impl Component for Counter {
    type Input = ();
    type State = i32;
    type Output = i32;

    const KIND: ComponentKind = ComponentKind::new("counter");

    fn initial_state(&self, _: &()) -> i32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> i32 {
        ctx.action(handed_out("increment", &self.emitter, &self.stops), |t, ()| {
            Transition::to(*t.state() + 1)
        });
        *ctx.state()
    }
}

fn counter() -> (RootRuntime<Counter>, Slot<Emitter<()>>, Arc<AtomicUsize>) {
    let (emitter, stops) = (slot(), Arc::new(AtomicUsize::new(0)));
    let runtime = RootRuntime::builder(Counter {
        emitter: emitter.clone(),
        stops: stops.clone(),
    })
    .config(RuntimeConfig::testing())
    .build();
    (runtime, emitter, stops)
}

/// Leaf holding a single action
struct Ticker {
    stops: Arc<AtomicUsize>,
}

impl Component for Ticker {
    type Input = ();
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("ticker");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) {
        let stops = self.stops.clone();
        ctx.action(
            from_fn("tick", move |_emitter: Emitter<()>| {
                Ok(Cancelable::new(move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                }))
            }),
            |_, ()| Transition::none(),
        );
    }
}

#[derive(Clone, Debug, PartialEq)]
struct ToggleView {
    shown: bool,
    toggle: Listener<()>,
}

/// Shows a ticker child while its state is true
struct Toggle {
    stops: Arc<AtomicUsize>,
}

impl Component for Toggle {
    type Input = ();
    type State = bool;
    type Output = ToggleView;

    const KIND: ComponentKind = ComponentKind::new("toggle");

    fn initial_state(&self, _: &()) -> bool {
        true
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> ToggleView {
        let shown = *ctx.state();
        if shown {
            ctx.child(
                Ticker {
                    stops: self.stops.clone(),
                },
                (),
            );
        }
        ToggleView {
            shown,
            toggle: ctx.listener(|t, ()| Transition::to(!*t.state())),
        }
    }
}

struct Leaf;

impl Component for Leaf {
    type Input = i32;
    type State = ();
    type Output = i32;

    const KIND: ComponentKind = ComponentKind::new("leaf");

    fn initial_state(&self, _: &i32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> i32 {
        *ctx.input() * 10
    }
}

/// Declares `input` leaves, all under the key "a"
struct Fanout;

impl Component for Fanout {
    type Input = u32;
    type State = ();
    type Output = Vec<i32>;

    const KIND: ComponentKind = ComponentKind::new("fanout");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Vec<i32> {
        let count = *ctx.input();
        (0..count)
            .map(|i| ctx.keyed_child("a", Leaf, i as i32))
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq)]
struct StepView {
    step: u32,
    next: Listener<()>,
}

/// Re-keys its listener on every step
struct Stepper;

impl Component for Stepper {
    type Input = ();
    type State = u32;
    type Output = StepView;

    const KIND: ComponentKind = ComponentKind::new("stepper");

    fn initial_state(&self, _: &()) -> u32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> StepView {
        let step = *ctx.state();
        StepView {
            step,
            next: ctx.keyed_listener(step, |t, ()| Transition::to(*t.state() + 1)),
        }
    }
}

/// Returns a different output every time it runs
struct Restless {
    evaluations: Arc<AtomicUsize>,
}

impl Component for Restless {
    type Input = ();
    type State = ();
    type Output = usize;

    const KIND: ComponentKind = ComponentKind::new("restless");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, _ctx: &mut Context<'_, Self>) -> usize {
        self.evaluations.fetch_add(1, Ordering::SeqCst)
    }
}

/// One action keyed by its input topic, one that never changes
struct Poller {
    log: Log,
}

impl Component for Poller {
    type Input = u32;
    type State = ();
    type Output = u32;

    const KIND: ComponentKind = ComponentKind::new("poller");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> u32 {
        let topic = *ctx.input();
        ctx.action(logged(&self.log, format!("topic-{topic}")), |_, ()| {
            Transition::none()
        });
        ctx.action(logged(&self.log, "heartbeat".to_string()), |_, ()| {
            Transition::none()
        });
        topic
    }
}

#[derive(Clone, Debug, PartialEq)]
struct ChainView {
    count: u32,
    chain: Listener<()>,
}

/// `chain` commits, then its effects bump the state once more
struct Chain {
    log: Log,
}

impl Component for Chain {
    type Input = ();
    type State = u32;
    type Output = ChainView;

    const KIND: ComponentKind = ComponentKind::new("chain");

    fn initial_state(&self, _: &()) -> u32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> ChainView {
        let bump = ctx.listener(|t, ()| Transition::to(*t.state() + 1));
        let log = self.log.clone();
        let chain = ctx.listener(move |t, ()| {
            let count = *t.state() + 1;
            let first = log.clone();
            let (second, bump) = (log.clone(), bump.clone());
            Transition::to_with(
                count,
                Effect::immediate(move || first.lock().push(format!("first {count}"))),
            )
            .with_effect(Effect::immediate(move || {
                second.lock().push(format!("second {count}"));
                bump.send(());
            }))
        });
        ChainView {
            count: *ctx.state(),
            chain,
        }
    }
}

/// Two tickers plus an action of its own
struct Tree {
    emitter: Slot<Emitter<()>>,
    stops: Arc<AtomicUsize>,
}

impl Component for Tree {
    type Input = ();
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("tree");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) {
        for side in ["left", "right"] {
            ctx.keyed_child(
                side,
                Ticker {
                    stops: self.stops.clone(),
                },
                (),
            );
        }
        ctx.action(handed_out("own", &self.emitter, &self.stops), |_, ()| {
            Transition::none()
        });
    }
}

fn push(state: &[String], entry: impl Into<String>) -> Vec<String> {
    let mut next = state.to_vec();
    next.push(entry.into());
    next
}

/// Uses every built-in action
struct Lifecycle {
    log: Log,
}

impl Component for Lifecycle {
    type Input = u32;
    type State = Vec<String>;
    type Output = Vec<String>;

    const KIND: ComponentKind = ComponentKind::new("lifecycle");

    fn initial_state(&self, _: &u32) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Vec<String> {
        let data = *ctx.input();
        ctx.on_start(|t| Transition::to(push(t.state(), "started")));
        ctx.on_data(data, |t, data| {
            Transition::to(push(t.state(), format!("data {data}")))
        });
        let log = self.log.clone();
        ctx.on_terminate(move |t| {
            let (log, seen) = (log.clone(), t.state().len());
            Transition::run(move || log.lock().push(format!("terminated after {seen}")))
        });
        ctx.state().clone()
    }
}

/// Output is the input divided by ten
struct Echo {
    evaluations: Arc<AtomicUsize>,
}

impl Component for Echo {
    type Input = u32;
    type State = ();
    type Output = u32;

    const KIND: ComponentKind = ComponentKind::new("echo");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> u32 {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        *ctx.input() / 10
    }
}

/// Every transition queues an effect that fires the same listener again
struct Spinner {
    spin: Slot<Listener<()>>,
}

impl Component for Spinner {
    type Input = ();
    type State = u64;
    type Output = Listener<()>;

    const KIND: ComponentKind = ComponentKind::new("spinner");

    fn initial_state(&self, _: &()) -> u64 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Listener<()> {
        let again = self.spin.clone();
        let spin = ctx.listener(move |t, ()| {
            let again = again.clone();
            Transition::to_with(
                *t.state() + 1,
                Effect::immediate(move || {
                    let listener = again.lock().clone();
                    if let Some(listener) = listener {
                        listener.send(());
                    }
                }),
            )
        });
        *self.spin.lock() = Some(spin.clone());
        spin
    }
}

struct Fragile;

impl Component for Fragile {
    type Input = u32;
    type State = ();
    type Output = u32;

    const KIND: ComponentKind = ComponentKind::new("fragile");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> u32 {
        let input = *ctx.input();
        if input == 3 {
            panic!("three is not allowed");
        }
        input
    }
}

struct Holder;

impl Component for Holder {
    type Input = u32;
    type State = ();
    type Output = u32;

    const KIND: ComponentKind = ComponentKind::new("holder");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> u32 {
        ctx.child(Fragile, *ctx.input())
    }
}

/// Fires the listener it declared last time from inside its evaluation
struct Eager {
    poke: Slot<Listener<()>>,
    rejected: Slot<bool>,
}

impl Component for Eager {
    type Input = u32;
    type State = ();
    type Output = u32;

    const KIND: ComponentKind = ComponentKind::new("eager");

    fn initial_state(&self, _: &u32) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> u32 {
        let previous = self.poke.lock().clone();
        if let Some(poke) = previous {
            *self.rejected.lock() = Some(matches!(
                poke.try_send(()),
                Err(EngineError::TransitionDuringEvaluation { .. })
            ));
        }
        let poke = ctx.listener(|_, ()| Transition::none());
        *self.poke.lock() = Some(poke);
        *ctx.input()
    }
}

#[derive(Clone, Debug, PartialEq)]
struct NestedView {
    count: u32,
    outer: Listener<()>,
}

/// `outer` tries to fire `inner` while it is being applied
struct Nested {
    rejected: Slot<bool>,
}

impl Component for Nested {
    type Input = ();
    type State = u32;
    type Output = NestedView;

    const KIND: ComponentKind = ComponentKind::new("nested");

    fn initial_state(&self, _: &()) -> u32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> NestedView {
        let inner = ctx.listener(|t, ()| Transition::to(*t.state() + 1));
        let rejected = self.rejected.clone();
        let outer = ctx.listener(move |_, ()| {
            *rejected.lock() = Some(matches!(
                inner.try_send(()),
                Err(EngineError::ReentrantTransition { .. })
            ));
            Transition::none()
        });
        NestedView {
            count: *ctx.state(),
            outer,
        }
    }
}

/// Declares an action that cannot start
struct Flaky;

impl Component for Flaky {
    type Input = ();
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("flaky");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) {
        ctx.action(
            from_fn("connect", |_emitter: Emitter<()>| {
                Err(anyhow::anyhow!("connection refused"))
            }),
            |_, ()| Transition::none(),
        );
    }
}

/// Sends a message up to its parent when started
struct Reporter {
    evaluations: Arc<AtomicUsize>,
}

impl Component for Reporter {
    type Input = Listener<String>;
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("reporter");

    fn initial_state(&self, _: &Listener<String>) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) {
        self.evaluations.fetch_add(1, Ordering::SeqCst);
        ctx.on_start(|t| {
            let report = t.input().clone();
            Transition::run(move || report.send("hello".to_string()))
        });
    }
}

struct Inbox {
    evaluations: Arc<AtomicUsize>,
}

impl Component for Inbox {
    type Input = ();
    type State = Vec<String>;
    type Output = Vec<String>;

    const KIND: ComponentKind = ComponentKind::new("inbox");

    fn initial_state(&self, _: &()) -> Vec<String> {
        Vec::new()
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Vec<String> {
        let report = ctx.listener(|t, message: String| Transition::to(push(t.state(), message)));
        ctx.child(
            Reporter {
                evaluations: self.evaluations.clone(),
            },
            report,
        );
        ctx.state().clone()
    }
}

struct TwinA;
struct TwinB;

impl Component for TwinA {
    type Input = ();
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("twin");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, _ctx: &mut Context<'_, Self>) {}
}

impl Component for TwinB {
    type Input = ();
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("twin");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, _ctx: &mut Context<'_, Self>) {}
}

/// Declares a different type under the same kind and key depending on input
struct Twins;

impl Component for Twins {
    type Input = bool;
    type State = ();
    type Output = ();

    const KIND: ComponentKind = ComponentKind::new("twins");

    fn initial_state(&self, _: &bool) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) {
        if *ctx.input() {
            ctx.keyed_child("x", TwinA, ());
        } else {
            ctx.keyed_child("x", TwinB, ());
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
struct LauncherView {
    launch: Listener<()>,
    explode: Listener<()>,
}

struct Launcher {
    launched: Arc<AtomicUsize>,
}

impl Component for Launcher {
    type Input = ();
    type State = ();
    type Output = LauncherView;

    const KIND: ComponentKind = ComponentKind::new("launcher");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> LauncherView {
        let launched = self.launched.clone();
        LauncherView {
            launch: ctx.listener(move |_, ()| {
                let launched = launched.clone();
                Transition::effect(Effect::main(move || {
                    launched.fetch_add(1, Ordering::SeqCst);
                }))
            }),
            explode: ctx.listener(|_, ()| -> Transition<()> { panic!("handler exploded") }),
        }
    }
}

struct Recording(Arc<AtomicUsize>);

impl Dispatcher for Recording {
    fn dispatch(&self, job: dispatch::Job) {
        self.0.fetch_add(1, Ordering::SeqCst);
        job();
    }
}

/// One transition queuing two background effects, the first one slow
struct Backlog {
    log: Log,
    done: crossbeam::channel::Sender<()>,
}

impl Component for Backlog {
    type Input = ();
    type State = ();
    type Output = Listener<()>;

    const KIND: ComponentKind = ComponentKind::new("backlog");

    fn initial_state(&self, _: &()) {}

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> Listener<()> {
        let (log, done) = (self.log.clone(), self.done.clone());
        ctx.listener(move |_, ()| {
            let (first, second, done) = (log.clone(), log.clone(), done.clone());
            Transition::effect(Effect::background(move || {
                std::thread::sleep(std::time::Duration::from_millis(50));
                first.lock().push("first".to_string());
            }))
            .with_effect(Effect::background(move || {
                second.lock().push("second".to_string());
                let _ = done.send(());
            }))
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
struct RelayView {
    input: u32,
    count: u32,
    forward: Listener<u32>,
    stop: Listener<()>,
}

/// Listeners that call back into the runtime driving this component
struct Relay {
    runtime: Slot<Arc<RootRuntime<Relay>>>,
}

impl Component for Relay {
    type Input = u32;
    type State = u32;
    type Output = RelayView;

    const KIND: ComponentKind = ComponentKind::new("relay");

    fn initial_state(&self, _: &u32) -> u32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> RelayView {
        let runtime = self.runtime.clone();
        let forward = ctx.listener(move |t, next: u32| {
            let runtime = runtime.lock().clone();
            if let Some(runtime) = runtime {
                runtime.send_input(next);
            }
            Transition::to(*t.state() + 1)
        });
        let runtime = self.runtime.clone();
        let stop = ctx.listener(move |_, ()| {
            let runtime = runtime.lock().clone();
            if let Some(runtime) = runtime {
                runtime.terminate();
            }
            Transition::none()
        });
        RelayView {
            input: *ctx.input(),
            count: *ctx.state(),
            forward,
            stop,
        }
    }
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn test_counter_emits_initial_output_and_increments() {
    let (runtime, emitter, _) = counter();
    let outputs = runtime.subscribe();
    runtime.start();
    assert_eq!(outputs.drain(), vec![0]);

    let emitter = emitter.lock().clone().expect("action started");
    emitter.send(());
    assert_eq!(outputs.drain(), vec![1]);
    assert_eq!(runtime.last_output(), Some(1));
}

#[test]
fn test_events_queued_behind_busy_owner_apply_in_order() {
    let (runtime, emitter, _) = counter();
    let outputs = runtime.subscribe();
    runtime.start();
    assert_eq!(outputs.drain(), vec![0]);
    let emitter = emitter.lock().clone().expect("action started");

    let (entered_tx, entered_rx) = crossbeam::channel::bounded::<()>(0);
    let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
    let queue = runtime.queue();
    std::thread::scope(|scope| {
        scope.spawn(move || {
            queue.post(move || {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        });
        entered_rx.recv().unwrap();

        emitter.send(());
        emitter.send(());
        assert_eq!(queue.len(), 2);
        assert!(outputs.drain().is_empty());

        release_tx.send(()).unwrap();
    });

    assert_eq!(outputs.drain(), vec![1, 2]);
}

#[test]
fn test_concurrent_senders_lose_no_events() {
    let (runtime, emitter, _) = counter();
    runtime.start();
    let emitter = emitter.lock().clone().expect("action started");

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let emitter = emitter.clone();
            scope.spawn(move || {
                for _ in 0..100 {
                    emitter.send(());
                }
            });
        }
    });

    assert_eq!(runtime.last_output(), Some(400));
    assert!(runtime.queue().is_empty());
}

#[test]
fn test_removed_child_stops_action_before_next_output() {
    let stops = Arc::new(AtomicUsize::new(0));
    let trace = Trace::default();
    let runtime = RootRuntime::builder(Toggle {
        stops: stops.clone(),
    })
    .config(RuntimeConfig::testing())
    .inspector(trace.inspector())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let view = outputs.recv().unwrap();
    assert!(view.shown);
    assert_eq!(runtime.stats().running_actions, 1);

    view.toggle.send(());
    let view = outputs.recv().unwrap();
    assert!(!view.shown);
    assert_eq!(stops.load(Ordering::SeqCst), 1);

    let stopped = trace
        .position(|e| matches!(e, TraceEvent::ActionStopped { kind, .. } if *kind == Ticker::KIND))
        .expect("ticker action stopped");
    let emitted = trace
        .last_position(|e| matches!(e, TraceEvent::OutputEmitted { .. }))
        .unwrap();
    assert!(stopped < emitted);
    assert_eq!(
        trace.count(|e| matches!(e, TraceEvent::ComponentTerminated { kind, .. } if *kind == Ticker::KIND)),
        1
    );

    let snapshot = runtime.snapshot().unwrap();
    assert!(snapshot.children.is_empty());
}

#[test]
fn test_duplicate_child_keys_resolve_by_index() {
    let errors = Errors::default();
    let trace = Trace::default();
    let runtime = RootRuntime::builder(Fanout)
        .config(RuntimeConfig::testing())
        .on_error(errors.handler())
        .inspector(trace.inspector())
        .build();
    let outputs = runtime.subscribe();

    runtime.send_input(3);
    assert_eq!(outputs.drain(), vec![vec![0, 10, 20]]);

    let snapshot = runtime.snapshot().unwrap();
    let indices: Vec<u32> = snapshot.child_keys().iter().map(|id| id.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(errors.count("DuplicateChildKey"), 1);
    assert!(!runtime.is_terminated());

    runtime.send_input(2);
    assert_eq!(outputs.drain(), vec![vec![0, 10]]);
    assert_eq!(errors.count("DuplicateChildKey"), 1);

    let leaf_started = trace.count(|e| matches!(e, TraceEvent::ComponentStarted { kind, .. } if *kind == Leaf::KIND));
    let leaf_terminated =
        trace.count(|e| matches!(e, TraceEvent::ComponentTerminated { kind, .. } if *kind == Leaf::KIND));
    assert_eq!(leaf_started, 3);
    assert_eq!(leaf_terminated, 1);
}

#[test]
fn test_stale_listener_is_rejected() {
    let runtime = RootRuntime::builder(Stepper)
        .config(RuntimeConfig::testing())
        .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let first = outputs.recv().unwrap();
    first.next.send(());
    let second = outputs.recv().unwrap();
    assert_eq!(second.step, 1);
    assert_ne!(first.next, second.next);

    let err = first.next.try_send(()).unwrap_err();
    assert!(matches!(err, EngineError::StaleTransition { .. }));

    second.next.send(());
    assert_eq!(runtime.last_output().map(|view| view.step), Some(2));
}

#[test]
#[should_panic(expected = "is stale")]
fn test_stale_listener_send_panics() {
    let runtime = RootRuntime::new(Stepper);
    let outputs = runtime.subscribe();
    runtime.start();

    let first = outputs.recv().unwrap();
    first.next.send(());
    first.next.send(());
}

#[test]
fn test_listener_identity_survives_reevaluation() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let runtime = RootRuntime::new(Inbox {
        evaluations: evaluations.clone(),
    });
    let outputs = runtime.subscribe();
    runtime.start();

    assert_eq!(outputs.drain(), vec![vec!["hello".to_string()]]);
    // the parent re-evaluated, but handed the child an equal listener
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);
}

#[test]
fn test_validation_catches_non_idempotent_evaluation() {
    let errors = Errors::default();
    let evaluations = Arc::new(AtomicUsize::new(0));
    let runtime = RootRuntime::builder(Restless {
        evaluations: evaluations.clone(),
    })
    .config(RuntimeConfig::testing())
    .on_error(errors.handler())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();

    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(errors.of("Validation").len(), 1);
    assert_eq!(errors.of("Validation")[0].0, Restless::KIND);
    assert!(runtime.is_terminated());
    assert_eq!(outputs.recv(), None);
}

#[test]
fn test_actions_start_and_stop_once_per_key() {
    let log = log();
    let runtime = RootRuntime::builder(Poller { log: log.clone() })
        .config(RuntimeConfig::testing())
        .build();

    runtime.send_input(1);
    runtime.send_input(1);
    assert_eq!(*log.lock(), vec!["start:topic-1", "start:heartbeat"]);

    runtime.send_input(2);
    assert_eq!(
        *log.lock(),
        vec![
            "start:topic-1",
            "start:heartbeat",
            "stop:topic-1",
            "start:topic-2",
        ]
    );

    runtime.terminate();
    let log = log.lock();
    assert_eq!(log.len(), 6);
    assert!(log.contains(&"stop:topic-2".to_string()));
    assert!(log.contains(&"stop:heartbeat".to_string()));
}

#[test]
fn test_effects_run_in_order_after_commit() {
    let log = log();
    let runtime = RootRuntime::builder(Chain { log: log.clone() })
        .config(RuntimeConfig::testing())
        .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let view = outputs.recv().unwrap();
    view.chain.send(());

    assert_eq!(*log.lock(), vec!["first 1", "second 1"]);
    // the bump from the effect lands before anything is emitted
    let counts: Vec<u32> = outputs.drain().into_iter().map(|view| view.count).collect();
    assert_eq!(counts, vec![2]);
}

#[test]
fn test_terminate_stops_everything_once() {
    let (emitter, stops) = (slot(), Arc::new(AtomicUsize::new(0)));
    let trace = Trace::default();
    let runtime = RootRuntime::builder(Tree {
        emitter: emitter.clone(),
        stops: stops.clone(),
    })
    .config(RuntimeConfig::testing())
    .inspector(trace.inspector())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();
    assert_eq!(outputs.drain(), vec![()]);

    let stats = runtime.stats();
    assert_eq!(stats.nodes, 3);
    assert_eq!(stats.running_actions, 3);
    assert_eq!(stats.phase, Phase::Idle);
    assert_eq!(stats.queued_updates, 0);

    let emitter = emitter.lock().clone().expect("action started");
    runtime.terminate();
    assert!(runtime.is_terminated());
    assert_eq!(runtime.phase(), Phase::Terminated);
    assert_eq!(stops.load(Ordering::SeqCst), 3);
    assert!(!emitter.is_active());
    assert!(emitter.try_send(()).is_ok());
    assert!(runtime.snapshot().is_none());
    assert_eq!(outputs.recv(), None);

    let ticker_stopped = trace
        .last_position(|e| matches!(e, TraceEvent::ActionStopped { kind, .. } if *kind == Ticker::KIND))
        .unwrap();
    let own_stopped = trace
        .position(|e| matches!(e, TraceEvent::ActionStopped { kind, .. } if *kind == Tree::KIND))
        .unwrap();
    assert!(ticker_stopped < own_stopped);
    assert_eq!(
        trace.count(|e| matches!(e, TraceEvent::ComponentTerminated { .. })),
        3
    );

    runtime.terminate();
    runtime.send_input(());
    drop(runtime);
    assert_eq!(stops.load(Ordering::SeqCst), 3);
}

#[test]
fn test_builtin_actions() {
    let log = log();
    let runtime = RootRuntime::builder(Lifecycle { log: log.clone() })
        .config(RuntimeConfig::testing())
        .build();
    let outputs = runtime.subscribe();

    runtime.send_input(1);
    assert_eq!(outputs.drain(), vec![vec!["started", "data 1"]]);

    runtime.send_input(1);
    assert!(outputs.drain().is_empty());

    runtime.send_input(2);
    assert_eq!(outputs.drain(), vec![vec!["started", "data 1", "data 2"]]);
    assert!(log.lock().is_empty());

    runtime.terminate();
    assert_eq!(*log.lock(), vec!["terminated after 3"]);
}

#[test]
fn test_input_conflation_and_output_dedupe() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let runtime = RootRuntime::builder(Echo {
        evaluations: evaluations.clone(),
    })
    .config(RuntimeConfig::standard())
    .build();
    let outputs = runtime.subscribe();

    runtime.send_input(1);
    assert_eq!(outputs.drain(), vec![0]);
    assert_eq!(evaluations.load(Ordering::SeqCst), 1);

    let (entered_tx, entered_rx) = crossbeam::channel::bounded::<()>(0);
    let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
    let queue = runtime.queue();
    std::thread::scope(|scope| {
        scope.spawn(move || {
            queue.post(move || {
                entered_tx.send(()).unwrap();
                release_rx.recv().unwrap();
            })
        });
        entered_rx.recv().unwrap();

        runtime.send_input(15);
        runtime.send_input(27);
        runtime.send_input(34);
        assert_eq!(queue.len(), 1);

        release_tx.send(()).unwrap();
    });

    assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    assert_eq!(outputs.drain(), vec![3]);

    runtime.send_input(35);
    assert_eq!(evaluations.load(Ordering::SeqCst), 3);
    assert!(outputs.drain().is_empty());
}

#[test]
fn test_runaway_update_terminates_runtime() {
    let errors = Errors::default();
    let runtime = RootRuntime::builder(Spinner { spin: slot() })
        .config(RuntimeConfig::standard().with_max_passes(10))
        .on_error(errors.handler())
        .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let spin = outputs.recv().unwrap();
    spin.send(());

    assert_eq!(
        errors.of("RunawayUpdate"),
        vec![(
            Spinner::KIND,
            "update of `spinner` did not settle after 10 evaluation passes".to_string()
        )]
    );
    assert!(runtime.is_terminated());
}

#[test]
fn test_evaluation_panic_names_failing_component() {
    let errors = Errors::default();
    let runtime = RootRuntime::builder(Holder)
        .config(RuntimeConfig::testing())
        .on_error(errors.handler())
        .build();
    let outputs = runtime.subscribe();

    runtime.send_input(1);
    assert_eq!(outputs.drain(), vec![1]);

    runtime.send_input(3);
    let failures = errors.of("Evaluation");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Fragile::KIND);
    assert!(failures[0].1.contains("three is not allowed"));
    assert!(runtime.is_terminated());
    assert_eq!(outputs.recv(), None);
}

#[test]
fn test_kind_conflict_is_terminal() {
    let errors = Errors::default();
    let runtime = RootRuntime::builder(Twins)
        .config(RuntimeConfig::standard())
        .on_error(errors.handler())
        .build();

    runtime.send_input(true);
    assert!(errors.is_empty());

    runtime.send_input(false);
    assert_eq!(errors.count("KindConflict"), 1);
    assert!(runtime.is_terminated());
}

#[test]
fn test_transition_during_evaluation_is_rejected() {
    let rejected = slot();
    let runtime = RootRuntime::new(Eager {
        poke: slot(),
        rejected: rejected.clone(),
    });

    runtime.send_input(1);
    assert_eq!(*rejected.lock(), None);

    runtime.send_input(2);
    assert_eq!(*rejected.lock(), Some(true));
    assert_eq!(runtime.last_output(), Some(2));
}

#[test]
fn test_reentrant_transition_is_rejected() {
    let rejected = slot();
    let runtime = RootRuntime::builder(Nested {
        rejected: rejected.clone(),
    })
    .config(RuntimeConfig::testing())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let view = outputs.recv().unwrap();
    view.outer.send(());

    assert_eq!(*rejected.lock(), Some(true));
    assert_eq!(runtime.last_output().map(|view| view.count), Some(0));
    assert!(outputs.drain().is_empty());
}

#[test]
fn test_failed_action_start_is_reported() {
    let errors = Errors::default();
    let runtime = RootRuntime::builder(Flaky)
        .config(RuntimeConfig::testing())
        .on_error(errors.handler())
        .build();
    let outputs = runtime.subscribe();
    runtime.start();

    assert_eq!(outputs.drain(), vec![()]);
    let failures = errors.of("Action");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, Flaky::KIND);
    assert!(failures[0].1.contains("connection refused"));
    assert!(!runtime.is_terminated());

    let snapshot = runtime.snapshot().unwrap();
    assert_eq!(snapshot.actions.len(), 1);
    assert_eq!(snapshot.actions[0].status, ActionStatus::Failed);
}

#[test]
fn test_installed_plugins_route_effects_and_errors() {
    let _lock = plugins::TEST_LOCK.lock();
    let (dispatched, launched) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let errors = Errors::default();
    let handler = errors.handler();
    let _plugins = plugins::install_scoped(
        Plugins::new()
            .with_main_dispatcher(Recording(dispatched.clone()))
            .with_error_handler(move |err: &EngineError| {
                if err.kind() == Launcher::KIND {
                    handler(err);
                }
            }),
    );

    let runtime = RootRuntime::builder(Launcher {
        launched: launched.clone(),
    })
    .config(RuntimeConfig::testing())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();
    let view = outputs.recv().unwrap();

    view.launch.send(());
    assert_eq!(dispatched.load(Ordering::SeqCst), 1);
    assert_eq!(launched.load(Ordering::SeqCst), 1);

    view.explode.send(());
    let failures = errors.of("Transition");
    assert_eq!(failures.len(), 1);
    assert!(failures[0].1.contains("handler exploded"));
    assert!(!runtime.is_terminated());
}

#[test]
fn test_background_effects_keep_commit_order() {
    let _lock = plugins::TEST_LOCK.lock();
    let _plugins = plugins::install_scoped(
        Plugins::new().with_background_dispatcher(ThreadDispatcher::new("weft-test-bg")),
    );
    let log = log();
    let (done, finished) = crossbeam::channel::unbounded();
    let runtime = RootRuntime::builder(Backlog {
        log: log.clone(),
        done,
    })
    .config(RuntimeConfig::testing())
    .build();
    let outputs = runtime.subscribe();
    runtime.start();

    let flush = outputs.recv().unwrap();
    flush.send(());
    flush.send(());
    for _ in 0..2 {
        finished
            .recv_timeout(std::time::Duration::from_secs(5))
            .unwrap();
    }

    assert_eq!(*log.lock(), vec!["first", "second", "first", "second"]);
}

#[test]
fn test_runtime_calls_from_transitions_run_after_the_update() {
    let errors = Errors::default();
    let relay = slot();
    let runtime = Arc::new(
        RootRuntime::builder(Relay {
            runtime: relay.clone(),
        })
        .config(RuntimeConfig::testing())
        .on_error(errors.handler())
        .build(),
    );
    *relay.lock() = Some(runtime.clone());
    let outputs = runtime.subscribe();

    runtime.send_input(1);
    let view = outputs.recv().unwrap();
    view.forward.send(7);

    let seen: Vec<(u32, u32)> = outputs
        .drain()
        .iter()
        .map(|view| (view.input, view.count))
        .collect();
    assert_eq!(seen, vec![(1, 1), (7, 1)]);

    let view = runtime.last_output().unwrap();
    view.stop.send(());
    assert!(runtime.is_terminated());
    assert_eq!(outputs.recv(), None);
    assert!(errors.is_empty());

    relay.lock().take();
}
