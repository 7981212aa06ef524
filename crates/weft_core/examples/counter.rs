//! Counter Example
//!
//! A counter driven by a background ticker action, with a listener to reset it.
//!
//! Run with: cargo run -p weft_core --example counter
//! Set RUST_LOG=weft_core=debug to watch actions start and stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing_subscriber::EnvFilter;
use weft_core::action::from_fn;
use weft_core::plugins::{self, Plugins};
use weft_core::{
    Cancelable, Component, ComponentKind, Context, Effect, Emitter, Listener, RootRuntime, RuntimeConfig,
    ThreadDispatcher, TracingInspector, Transition,
};

#[derive(Clone, Debug, PartialEq)]
struct CounterView {
    count: u32,
    reset: Listener<()>,
}

struct Counter;

impl Component for Counter {
    type Input = Duration;
    type State = u32;
    type Output = CounterView;

    const KIND: ComponentKind = ComponentKind::new("counter");

    fn initial_state(&self, _: &Duration) -> u32 {
        0
    }

    fn evaluate(&self, ctx: &mut Context<'_, Self>) -> CounterView {
        let period = *ctx.input();
        // keyed by period: a new input restarts the ticker
        ctx.action(
            from_fn(format!("ticker-{}ms", period.as_millis()), move |emitter: Emitter<()>| {
                let running = Arc::new(AtomicBool::new(true));
                let alive = running.clone();
                thread::Builder::new()
                    .name("ticker".to_string())
                    .spawn(move || {
                        while alive.load(Ordering::Acquire) {
                            thread::sleep(period);
                            emitter.send(());
                        }
                    })?;
                Ok(Cancelable::new(move || running.store(false, Ordering::Release)))
            }),
            |t, ()| Transition::to(*t.state() + 1),
        );

        let reset = ctx.listener(|t, ()| {
            let previous = *t.state();
            Transition::to_with(
                0,
                Effect::background(move || tracing::info!(previous, "counter reset")),
            )
        });

        CounterView {
            count: *ctx.state(),
            reset,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let _plugins = plugins::install_scoped(
        Plugins::new()
            .with_inspector(TracingInspector)
            .with_background_dispatcher(ThreadDispatcher::new("weft-background")),
    );

    let runtime = RootRuntime::builder(Counter)
        .config(RuntimeConfig::standard().with_name("counter-example"))
        .on_error(|err| eprintln!("error: {err}"))
        .build();
    let mut outputs = runtime.subscribe();
    runtime.send_input(Duration::from_millis(100));

    for view in outputs.by_ref().take(5) {
        println!("count = {}", view.count);
    }

    if let Some(view) = runtime.last_output() {
        view.reset.send(());
    }
    runtime.send_input(Duration::from_millis(50));

    for view in outputs.by_ref().take(5) {
        println!("count = {}", view.count);
    }

    let stats = runtime.stats();
    println!(
        "pass {} | {} node(s) | {} running action(s)",
        stats.pass, stats.nodes, stats.running_actions
    );
    runtime.terminate();
}
