//! Core types shared by the wfstage crates.
//!
//! Nothing in here touches the network or spawns processes: these are the
//! workflow references, engine descriptors, materialization records, the
//! typed parameter tree, cache-slot digests and the [`Deadline`] guard that
//! the pipeline crate threads through every external call.

pub mod deadline;
pub mod digest;
pub mod error;
pub mod params;
pub mod types;

pub use deadline::Deadline;
pub use error::{Interrupted, ParamError};
pub use params::{FileRef, ParamNode, ParamTree};
pub use types::{
    Container, ContainerKind, EngineDescriptor, EngineKind, EngineVersion, Fingerprint,
    InputValue, LocalWorkflow, MaterializedContent, MaterializedEngine, MaterializedInput,
    MaterializedWorkflow, WorkflowReference,
};
