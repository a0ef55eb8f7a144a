pub mod gather;
pub mod module_reconciler;
pub mod run_hash;
pub mod state_reconciler;
