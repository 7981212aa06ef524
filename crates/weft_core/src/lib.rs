//! Weft Core Runtime
//!
//! Weft composes application state out of a tree of components:
//!
//! - **Components**: pure functions from (Input, State) to Output that
//!   declare children, listeners and actions while they evaluate
//! - **Transitions**: the only way state changes; state is committed before
//!   any effect runs
//! - **Actions**: long-lived processes started and stopped by declaration,
//!   keyed so they survive re-evaluation
//! - **Update Queue**: every external event is serialized through one queue,
//!   drained by whichever thread posts first
//!
//! # Example
//!
//! ```rust
//! use weft_core::{Component, ComponentKind, Context, Listener, RootRuntime, Transition};
//!
//! struct Counter;
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct View {
//!     count: i32,
//!     increment: Listener<()>,
//! }
//!
//! impl Component for Counter {
//!     type Input = ();
//!     type State = i32;
//!     type Output = View;
//!
//!     const KIND: ComponentKind = ComponentKind::new("counter");
//!
//!     fn initial_state(&self, _: &()) -> i32 {
//!         0
//!     }
//!
//!     fn evaluate(&self, ctx: &mut Context<'_, Self>) -> View {
//!         View {
//!             count: *ctx.state(),
//!             increment: ctx.listener(|t, ()| Transition::to(*t.state() + 1)),
//!         }
//!     }
//! }
//!
//! let runtime = RootRuntime::new(Counter);
//! let outputs = runtime.subscribe();
//! runtime.start();
//!
//! let view = outputs.recv().unwrap();
//! assert_eq!(view.count, 0);
//! view.increment.send(());
//! assert_eq!(outputs.recv().unwrap().count, 1);
//! ```

pub mod action;
mod children;
pub mod component;
pub mod config;
pub mod context;
pub mod dispatch;
mod engine;
pub mod error;
mod frame;
pub mod inspect;
pub mod key;
mod link;
pub mod listener;
mod manager;
pub mod pass;
pub mod plugins;
pub mod queue;
pub mod runtime;
pub mod snapshot;
pub mod transition;

#[cfg(test)]
mod tests;

pub use action::{Action, ActionSnapshot, ActionStatus, Cancelable, Emitter};
pub use component::{Component, ComponentKind};
pub use config::RuntimeConfig;
pub use context::{Context, TransitionContext};
pub use dispatch::{Dispatcher, InlineDispatcher, ThreadDispatcher};
pub use error::{EngineError, Result};
pub use inspect::{Inspector, TraceEvent, TracingInspector};
pub use key::{CallSite, ChildId, ChildKey, Key, Resolved};
pub use listener::Listener;
pub use pass::{Phase, ProcessingPass};
pub use plugins::{ErrorHandler, Plugins, PluginsGuard};
pub use queue::UpdateQueue;
pub use runtime::{OutputStream, RootRuntime, RuntimeBuilder, RuntimeStats};
pub use snapshot::NodeSnapshot;
pub use transition::{Effect, Effects, ExecutionClass, Transition, TransitionKind};
