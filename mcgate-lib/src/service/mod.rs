//! Listener lifecycle and live reconfiguration.

mod manager;
mod reload;

pub use manager::ServiceManager;
pub use reload::{ReloadAction, ReloadController, ReloadHandle, DEFAULT_DEBOUNCE};
