//! # selforge: tabular access-control rules → type-enforcement policy
//!
//! `selforge` compiles a rule table of subject/object/action/class/effect
//! rows (plus role and transition rows) into a [`CompiledPolicy`]: type
//! declarations, allow rules, type transitions, file contexts, capability
//! grants and port bindings, ready for a textual emitter.
//!
//! # Pipeline
//!
//! ```text
//! RawRule[] ─▶ decoder ─▶ analyzer ─▶ generator ─▶ optimizer ─▶ CompiledPolicy
//!                           │            │
//!                      conflicts,     mappers (types, actions,
//!                      statistics     paths, transitions)
//! ```
//!
//! - [`decoder`] interprets field content: `action::class` encodings,
//!   conditions, transition rows, boolean role rows.
//! - [`analyzer`] validates the model and every rule (fail-fast), then
//!   reports allow/deny conflicts as advisory warnings.
//! - [`generator`] drives the [`mapping`] modules to build the policy.
//! - [`optimizer`] merges, dedupes, removes subsumed rules and prunes unused
//!   types, producing deterministic output.
//!
//! # Example
//!
//! ```
//! use selforge::{CompileOptions, ModelDefinition, RawRule, compile};
//!
//! let rows = [RawRule::new("p", ["httpd_t", "/var/www/html/*", "read", "file", "allow"])];
//! let output = compile(&ModelDefinition::standard(), &rows, &CompileOptions::new("httpd"))?;
//!
//! let allow = output
//!     .policy
//!     .find_allow("httpd_t", "httpd_var_www_html_t", "file")
//!     .expect("allow rule");
//! assert_eq!(allow.permissions, ["getattr", "open", "read"]);
//! assert_eq!(output.policy.file_contexts[0].pattern, "/var/www/html(/.*)?");
//! # Ok::<(), selforge::CompileError>(())
//! ```
//!
//! The crate does no I/O and installs no `tracing` subscriber.

pub mod analyzer;
pub mod decoder;
mod error;
pub mod generator;
pub mod mapping;
pub mod optimizer;
mod pipeline;


pub use analyzer::{AnalysisReport, Analyzer, Conflict, Statistics};
pub use decoder::decode;
pub use error::{AnalysisError, CompileError, DecodeError, GenerateError, Result};
pub use generator::Generator;
pub use optimizer::{OptimizationReport, Optimizer};
pub use pipeline::{CompileOptions, CompileOutput, Compiler, compile};

// Re-export the data model so callers need a single dependency.
pub use selforge_types::{
    AllowRule, AutoTransitionRule, BooleanDecl, CapabilityGrant, CompiledPolicy, Condition,
    ConditionalBlock, DecodedPolicy, DecodedRule, FileContextEntry, FileType, ModelDefinition,
    PortBinding, Protocol, RawRule, RoleRow, TypeDecl, TypeTransitionRule,
};
