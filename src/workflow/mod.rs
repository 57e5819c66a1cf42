//! Conversational workflow engine.
//!
//! Sessions, role guard, event routing, the multi-select collection
//! pattern and cross-workflow navigation. Concrete dialogues live in
//! `crate::scenes`.

pub mod context;
pub mod definition;
pub mod event;
pub mod multiselect;
mod navigator;
pub mod registry;
pub mod role;
pub mod router;
pub mod session;
pub mod state;
pub mod transition;

pub use context::{Actor, RenderMode, WorkflowContext};
pub use definition::{Accept, CANCEL, Input, SKIP, StateSpec, Workflow, WorkflowDefinition};
pub use event::{Event, MediaKind};
pub use multiselect::{Collect, MultiSelect};
pub use registry::WorkflowRegistry;
pub use router::{Dispatch, EventRouter};
pub use session::{Session, SessionSnapshot, SessionStore};
pub use state::StateName;
pub use transition::{ChecklistOutcome, Params, Transition};
