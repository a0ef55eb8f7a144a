pub mod runtime;
pub mod terraform;

pub use runtime::{ExecutorConfig, run};
