//! # selforge-types: Core types for `selforge`
//!
//! This crate contains the data model shared by every compiler stage:
//! - Raw rule rows as handed over by the rule-table parser ([`RawRule`], [`RowTag`])
//! - The decoded intermediate representation ([`DecodedRule`], [`TransitionInfo`],
//!   [`RoleRow`], [`DecodedPolicy`])
//! - The access-control model definition ([`ModelDefinition`])
//! - The compiled target policy object model ([`CompiledPolicy`] and its
//!   declarations, rules, file contexts, capability grants and port bindings)
//!
//! ## Pipeline
//!
//! ```text
//! RawRule ──decode──▶ DecodedRule ──generate──▶ CompiledPolicy ──optimize──▶ emitters
//! ```
//!
//! Raw and decoded rows live for one compile invocation. The compiled policy
//! is built once, rewritten in place by the optimizer, and then treated as
//! read-only by the textual emitters.

mod model;
mod policy;
mod rule;

pub use model::ModelDefinition;
pub use policy::{
    AllowRule, AutoTransitionRule, BooleanDecl, CapabilityGrant, CompiledPolicy, ConditionalBlock,
    FileContextEntry, FileType, PortBinding, TypeDecl, TypeTransitionRule,
};
pub use rule::{
    ClassSource, Condition, DecodedPolicy, DecodedRule, Effect, ObjectRef, Protocol, RawRule,
    RoleRow, RowTag, TransitionInfo,
};

/// Object class used for process (domain) operations.
pub const PROCESS_CLASS: &str = "process";

/// Object class assigned to paths when nothing more specific is known.
pub const FILE_CLASS: &str = "file";

/// Object class assigned to directory paths.
pub const DIR_CLASS: &str = "dir";

/// The path-root character every file object and file-context pattern starts with.
pub const PATH_ROOT: char = '/';

/// Target that names the source type itself in an allow rule.
pub const SELF_TARGET: &str = "self";

/// Suffix carried by every generated type name.
pub const TYPE_SUFFIX: &str = "_t";

/// Object classes that name filesystem objects.
pub const FILE_LIKE_CLASSES: &[&str] = &[
    "file",
    "dir",
    "lnk_file",
    "chr_file",
    "blk_file",
    "sock_file",
    "fifo_file",
];

/// Returns whether `class` names a filesystem object class.
pub fn is_file_like_class(class: &str) -> bool {
    FILE_LIKE_CLASSES.contains(&class)
}

/// Returns whether `class` names a capability class.
pub fn is_capability_class(class: &str) -> bool {
    matches!(class, "capability" | "capability2")
}
