//! Core domain types
//!
//! Every object the controller stores is a `{metadata, spec, status}` document.
//! Definitions (Task, Pipeline) only carry a spec. Runs (TaskRun, PipelineRun)
//! also carry an observed status written by the reconcilers, and targets
//! (Host, Cluster) carry the result of their last heartbeat.

pub mod meta;
pub mod object;
pub mod pipeline;
pub mod pipelinerun;
pub mod status;
pub mod target;
pub mod task;
pub mod taskrun;
pub mod variable;

pub use meta::{Kind, NamespacedName, ObjectMeta, OwnerRef};
pub use object::{DynObject, Resource, Stateful};
pub use status::RunStatus;
pub use variable::{Variable, VariableError, Variables};
