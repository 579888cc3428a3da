//! The compiled target policy object model.
//!
//! Produced by the generator, rewritten in place by the optimizer and then
//! handed read-only to the textual emitters.

use std::collections::BTreeSet;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::rule::{Condition, Protocol};

// ============================================================================
// Declarations and rules
// ============================================================================

/// A type declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeDecl {
    /// Unique within a compiled policy.
    pub name: String,
    pub attributes: BTreeSet<String>,
    pub comment: Option<String>,
}

impl TypeDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: BTreeSet::new(),
            comment: None,
        }
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attributes.insert(attribute.into());
        self
    }

    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.attributes.contains(attribute)
    }
}

/// A permission grant: `allow source target:class { permissions }`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllowRule {
    pub source: String,
    pub target: String,
    pub class: String,
    /// Non-empty. Unique per rule; lexically sorted once optimized.
    pub permissions: Vec<String>,
}

impl AllowRule {
    pub fn new<I, S>(
        source: impl Into<String>,
        target: impl Into<String>,
        class: impl Into<String>,
        permissions: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut perms: Vec<String> = Vec::new();
        for perm in permissions {
            let perm = perm.into();
            if !perms.contains(&perm) {
                perms.push(perm);
            }
        }
        Self {
            source: source.into(),
            target: target.into(),
            class: class.into(),
            permissions: perms,
        }
    }

    /// The `(source, target, class)` grouping key.
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.source, &self.target, &self.class)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn permission_set(&self) -> BTreeSet<&str> {
        self.permissions.iter().map(String::as_str).collect()
    }
}

/// `type_transition source target:class new_type`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeTransitionRule {
    pub source: String,
    pub target: String,
    pub class: String,
    pub new_type: String,
}

impl TypeTransitionRule {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        class: impl Into<String>,
        new_type: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            class: class.into(),
            new_type: new_type.into(),
        }
    }

    pub fn mentions(&self, type_name: &str) -> bool {
        self.source == type_name || self.target == type_name || self.new_type == type_name
    }
}

// ============================================================================
// File contexts
// ============================================================================

/// Kind of filesystem object a file-context entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FileType {
    /// No type specifier: matches every kind of object.
    AllFiles,
    Regular,
    Directory,
    CharDevice,
    BlockDevice,
    Socket,
    Symlink,
    Pipe,
}

impl FileType {
    pub const ALL: [FileType; 8] = [
        FileType::AllFiles,
        FileType::Regular,
        FileType::Directory,
        FileType::CharDevice,
        FileType::BlockDevice,
        FileType::Socket,
        FileType::Symlink,
        FileType::Pipe,
    ];

    /// Human-readable tag, as carried in the object model.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllFiles => "all files",
            Self::Regular => "regular file",
            Self::Directory => "directory",
            Self::CharDevice => "character device",
            Self::BlockDevice => "block device",
            Self::Socket => "socket",
            Self::Symlink => "symbolic link",
            Self::Pipe => "named pipe",
        }
    }

    /// File-context specifier flag; empty for [`FileType::AllFiles`].
    pub fn spec_flag(self) -> &'static str {
        match self {
            Self::AllFiles => "",
            Self::Regular => "--",
            Self::Directory => "-d",
            Self::CharDevice => "-c",
            Self::BlockDevice => "-b",
            Self::Socket => "-s",
            Self::Symlink => "-l",
            Self::Pipe => "-p",
        }
    }

    /// Parses either the human-readable tag or the specifier flag.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|ft| ft.as_str() == value || (!value.is_empty() && ft.spec_flag() == value))
    }
}

impl Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path pattern → type mapping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileContextEntry {
    /// Regex pattern; always begins with the path-root character.
    pub pattern: String,
    pub file_type: FileType,
    pub target_type: String,
    pub comment: Option<String>,
}

impl FileContextEntry {
    pub fn new(
        pattern: impl Into<String>,
        file_type: FileType,
        target_type: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            file_type,
            target_type: target_type.into(),
            comment: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }
}

// ============================================================================
// Auxiliary collections
// ============================================================================

/// A capability granted to a domain.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub domain: String,
    pub capability: String,
}

/// A port number bound to a port type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub protocol: Protocol,
    pub port: String,
    pub type_name: String,
}

/// A policy boolean and its default value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BooleanDecl {
    pub name: String,
    pub default: bool,
}

/// Allow rules that only apply while `condition` holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConditionalBlock {
    pub condition: Condition,
    pub rules: Vec<AllowRule>,
}

/// A domain transition inferred from a declared process type-transition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AutoTransitionRule {
    pub source_domain: String,
    pub target_domain: String,
    pub entry_point: String,
    pub auto_inferred: bool,
    pub conditions: Vec<Condition>,
}

// ============================================================================
// CompiledPolicy
// ============================================================================

/// The aggregate compiler output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledPolicy {
    pub module_name: String,
    pub version: String,
    pub types: Vec<TypeDecl>,
    pub allow_rules: Vec<AllowRule>,
    pub type_transitions: Vec<TypeTransitionRule>,
    pub file_contexts: Vec<FileContextEntry>,
    pub capabilities: Vec<CapabilityGrant>,
    pub port_bindings: Vec<PortBinding>,
    pub booleans: Vec<BooleanDecl>,
    pub conditionals: Vec<ConditionalBlock>,
    pub auto_transitions: Vec<AutoTransitionRule>,
}

impl CompiledPolicy {
    /// Creates an empty policy for a module.
    pub fn new(module_name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            version: version.into(),
            ..Self::default()
        }
    }

    pub fn find_type(&self, name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|t| t.name == name)
    }

    /// Returns the first allow rule for `(source, target, class)`.
    pub fn find_allow(&self, source: &str, target: &str, class: &str) -> Option<&AllowRule> {
        self.allow_rules
            .iter()
            .find(|r| r.key() == (source, target, class))
    }

    pub fn type_names(&self) -> BTreeSet<&str> {
        self.types.iter().map(|t| t.name.as_str()).collect()
    }

    /// Total number of rules of every kind.
    pub fn rule_count(&self) -> usize {
        self.allow_rules.len()
            + self.type_transitions.len()
            + self.conditionals.iter().map(|b| b.rules.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_rule_dedupes_permissions_in_order() {
        let rule = AllowRule::new("a_t", "b_t", "file", ["read", "open", "read"]);
        assert_eq!(rule.permissions, vec!["read", "open"]);
        assert_eq!(rule.key(), ("a_t", "b_t", "file"));
    }

    #[test]
    fn file_type_parses_tags_and_flags() {
        for ft in FileType::ALL {
            assert_eq!(FileType::parse(ft.as_str()), Some(ft));
        }
        assert_eq!(FileType::parse("-d"), Some(FileType::Directory));
        assert_eq!(FileType::parse("--"), Some(FileType::Regular));
        assert_eq!(FileType::parse(""), None);
        assert_eq!(FileType::parse("door"), None);
    }

    #[test]
    fn type_decl_attributes_are_a_set() {
        let decl = TypeDecl::new("x_t")
            .with_attribute("file_type")
            .with_attributes(["file_type", "logfile"]);
        assert_eq!(decl.attributes.len(), 2);
        assert!(decl.has_attribute("logfile"));
    }

    #[test]
    fn compiled_policy_serializes() {
        let mut policy = CompiledPolicy::new("httpd", "1.0.0");
        policy
            .allow_rules
            .push(AllowRule::new("httpd_t", "etc_t", "file", ["read"]));
        let json = serde_json::to_string(&policy).expect("serialize policy");
        let back: CompiledPolicy = serde_json::from_str(&json).expect("deserialize policy");
        assert_eq!(back, policy);
    }
}
