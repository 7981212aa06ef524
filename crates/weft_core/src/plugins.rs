//! Process-wide plugin hooks
//!
//! Hooks installed here apply to every runtime in the process, in addition to
//! the hooks configured on each runtime's builder.
//!
//! ```ignore
//! use weft_core::plugins::{self, Plugins};
//!
//! plugins::set_plugins(
//!     Plugins::new()
//!         .with_error_handler(|err| eprintln!("weft: {err}"))
//!         .with_background_dispatcher(ThreadDispatcher::new("weft-bg")),
//! );
//! ```

use crate::dispatch::Dispatcher;
use crate::error::EngineError;
use crate::inspect::Inspector;
use parking_lot::RwLock;
use std::sync::Arc;

/// Callback type for reported engine errors
pub type ErrorHandler = Arc<dyn Fn(&EngineError) + Send + Sync>;

/// The installed process-wide hooks
#[derive(Clone, Default)]
pub struct Plugins {
    pub error_handler: Option<ErrorHandler>,
    pub inspector: Option<Arc<dyn Inspector>>,
    pub main_dispatcher: Option<Arc<dyn Dispatcher>>,
    pub background_dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl Plugins {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_error_handler(mut self, handler: impl Fn(&EngineError) + Send + Sync + 'static) -> Self {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_inspector(mut self, inspector: impl Inspector + 'static) -> Self {
        self.inspector = Some(Arc::new(inspector));
        self
    }

    pub fn with_main_dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.main_dispatcher = Some(Arc::new(dispatcher));
        self
    }

    pub fn with_background_dispatcher(mut self, dispatcher: impl Dispatcher + 'static) -> Self {
        self.background_dispatcher = Some(Arc::new(dispatcher));
        self
    }
}

impl std::fmt::Debug for Plugins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugins")
            .field("error_handler", &self.error_handler.is_some())
            .field("inspector", &self.inspector.is_some())
            .field("main_dispatcher", &self.main_dispatcher.is_some())
            .field("background_dispatcher", &self.background_dispatcher.is_some())
            .finish()
    }
}

static PLUGINS: RwLock<Option<Arc<Plugins>>> = RwLock::new(None);

/// Install process-wide hooks, returning the ones they replace
pub fn set_plugins(plugins: Plugins) -> Option<Arc<Plugins>> {
    PLUGINS.write().replace(Arc::new(plugins))
}

/// Remove the process-wide hooks
pub fn clear_plugins() -> Option<Arc<Plugins>> {
    PLUGINS.write().take()
}

/// Get the installed process-wide hooks
pub fn current_plugins() -> Option<Arc<Plugins>> {
    PLUGINS.read().clone()
}

/// Install hooks until the returned guard drops, then restore the previous ones
pub fn install_scoped(plugins: Plugins) -> PluginsGuard {
    PluginsGuard {
        previous: set_plugins(plugins),
    }
}

/// Restores the previously installed hooks on drop
#[must_use = "the hooks are uninstalled when the guard drops"]
pub struct PluginsGuard {
    previous: Option<Arc<Plugins>>,
}

impl Drop for PluginsGuard {
    fn drop(&mut self) {
        *PLUGINS.write() = self.previous.take();
    }
}

/// Serializes tests that touch the process-wide registry
#[cfg(test)]
pub(crate) static TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());
