pub mod custom_rfc3339;
pub mod execution;
pub mod generic_map;
pub mod module;
pub mod state;

pub use execution::{Action, Approval, Execution, ExecutionCondition, ExecutionSpec, ExecutionStatus};
pub use generic_map::GenericMap;
pub use module::{GitSource, Module, ModuleSource, ModuleSpec, ModuleStatus};
pub use state::{DEFAULT_EXECUTOR_IMAGE, State, StateCondition, StateSpec, StateStatus, Variables};

pub type LabelMap = std::collections::BTreeMap<String, String>;
