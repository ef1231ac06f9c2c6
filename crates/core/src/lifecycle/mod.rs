//! Process lifecycle: logging setup and shutdown.

pub mod logging;
pub mod shutdown;
