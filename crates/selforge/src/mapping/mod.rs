//! The four mappers the generator drives.
//!
//! - [`types`]: object paths and subject names → type names and attributes
//! - [`actions`]: action names → object class and permissions
//! - [`paths`]: glob paths → file-context regex patterns and file types
//! - [`transitions`]: automatic domain-transition inference and the transition graph
//!
//! Mappers are constructed fresh for every compile invocation. Only the
//! `const` default tables are shared.

pub mod actions;
pub mod paths;
pub mod transitions;
pub mod types;

pub use actions::{ActionMapper, ActionMapping};
pub use paths::PathMapper;
pub use transitions::{
    AutoTransitionInferer, DeclaredTransition, InferredTransitions, TransitionGraph,
};
pub use types::TypeMapper;
