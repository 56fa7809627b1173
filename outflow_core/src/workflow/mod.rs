//! Workflows: the create -> extract -> load -> report sequence and the engines
//! that start it on a schedule.

pub mod engine;
pub mod local;
pub mod scheduler;
pub mod sync_workflow;

pub use engine::{WorkflowEngine, WorkflowInfo, WorkflowKind};
pub use local::LocalWorkflowEngine;
pub use scheduler::SyncScheduler;
pub use sync_workflow::{SyncWorkflow, SyncWorkflowInput};
