pub mod proxy;
pub mod tracker;

pub use proxy::{BatchCallback, CompletionProxy};
pub use tracker::BatchTracker;
