pub mod alerts;
pub mod live;
pub mod source;

pub use live::{run_live, run_live_with_shutdown, LiveSettings, ShutdownSignal};
