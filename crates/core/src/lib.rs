#![forbid(unsafe_code)]

//! Multi-parent tree engine: nodes that may sit under several parents at
//! once, reversible edits with exact undo/redo, and a per-parent order model
//! kept contiguous across every instance of a clone.

pub mod actions;
pub mod command;
pub mod config;
pub mod edit;
pub mod executor;
pub mod forest;
pub mod ids;
pub mod node;
pub mod order;
pub mod persist;
pub mod template;

pub use actions::BuildError;
pub use command::{Command, CommandKind, CommandPayload, InstanceRef, StoreOp};
pub use config::{ApplyMode, EngineConfig};
pub use executor::{ExecError, Executor, PersistOutcome, PersistPhase};
pub use forest::{Forest, ForestError, NodeImage, ReconstructReport, TreeInstance};
pub use ids::{IdError, NodeId, ParentRef, TemplateId, TreeId};
pub use node::{Node, NodeData, ShapeError};
pub use order::OrderError;
pub use persist::{MemoryStore, NodeStore, NodeUpdate, PersistError};
pub use template::{FieldKind, Template, TemplateField, TemplateSet};
