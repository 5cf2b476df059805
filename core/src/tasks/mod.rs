/// Background tasks bound to a cache session (run on a tokio `LocalSet`)
pub mod preload;
pub mod sweeper;

pub use preload::{spawn_preload, HistorySource};
pub use sweeper::EvictionSweeper;
