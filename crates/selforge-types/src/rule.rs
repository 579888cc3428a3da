//! Raw rule rows and the decoded intermediate representation.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

// ============================================================================
// Raw rows
// ============================================================================

/// The tag in the first field of a rule row, selecting the row's grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowTag {
    /// Ordinary policy row (`p`).
    Policy,
    /// Transition policy row (`p2`).
    TransitionPolicy,
    /// Role/attribute relation row (`g`).
    Role,
}

impl RowTag {
    /// Parses a row tag, returning `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "p" => Some(Self::Policy),
            "p2" => Some(Self::TransitionPolicy),
            "g" => Some(Self::Role),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Policy => "p",
            Self::TransitionPolicy => "p2",
            Self::Role => "g",
        }
    }

    /// Field counts (excluding the tag) accepted for this row kind.
    ///
    /// - `p`: `sub, obj, act, eft` | `sub, obj, act, cls, eft` | `..., cond`
    /// - `p2`: `sub, obj, transition, new_type` | `..., cond`
    /// - `g`: `member, role`
    pub fn accepted_field_counts(self) -> &'static [usize] {
        match self {
            Self::Policy => &[4, 5, 6],
            Self::TransitionPolicy => &[4, 5],
            Self::Role => &[2],
        }
    }
}

impl Display for RowTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed row of the rule table.
///
/// Fields are already split by the parser; the decoder only interprets their
/// content. `fields` excludes the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRule {
    pub tag: String,
    pub fields: Vec<String>,
    /// 1-based source line, when the parser tracked one.
    pub line: Option<usize>,
}

impl RawRule {
    /// Creates a raw row from a tag and its fields. Fields are trimmed.
    pub fn new<I, S>(tag: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tag: tag.into().trim().to_string(),
            fields: fields
                .into_iter()
                .map(|f| f.as_ref().trim().to_string())
                .collect(),
            line: None,
        }
    }

    /// Attaches the source line number.
    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    /// Splits a comma-separated row (`p, httpd_t, /var/www/*, read, file, allow`).
    ///
    /// Commas inside a `{...}` brace group belong to the field. Returns
    /// `None` for blank lines and `#` comments.
    pub fn from_csv(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return None;
        }
        let mut parts = split_fields(trimmed).into_iter();
        let tag = parts.next()?;
        Some(Self::new(tag, parts))
    }

    /// Returns the field at `index`, or `""` when absent.
    pub fn field(&self, index: usize) -> &str {
        self.fields.get(index).map_or("", String::as_str)
    }
}

fn split_fields(line: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in line.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                fields.push(&line[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&line[start..]);
    fields
}

// ============================================================================
// Decoded values
// ============================================================================

/// Effect of an ordinary policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    /// Parses `allow` / `deny`. Anything else is not an effect.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }
}

impl Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A boolean guard attached to a rule (`name` or `!name`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Condition {
    pub boolean: String,
    pub negated: bool,
}

impl Condition {
    pub fn new(boolean: impl Into<String>) -> Self {
        Self {
            boolean: boolean.into(),
            negated: false,
        }
    }

    pub fn negated(boolean: impl Into<String>) -> Self {
        Self {
            boolean: boolean.into(),
            negated: true,
        }
    }

    /// Parses `name` / `!name`. Returns `None` for empty input.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        match value.strip_prefix('!') {
            Some(rest) if !rest.trim().is_empty() => Some(Self::negated(rest.trim())),
            Some(_) => None,
            None if value.is_empty() => None,
            None => Some(Self::new(value)),
        }
    }
}

impl Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "!{}", self.boolean)
        } else {
            f.write_str(&self.boolean)
        }
    }
}

/// Transport protocol of a network object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// The socket object class for this protocol.
    pub fn socket_class(self) -> &'static str {
        match self {
            Self::Tcp => "tcp_socket",
            Self::Udp => "udp_socket",
        }
    }

    /// Maps a socket class back to its protocol.
    pub fn from_socket_class(class: &str) -> Option<Self> {
        match class {
            "tcp_socket" => Some(Self::Tcp),
            "udp_socket" => Some(Self::Udp),
            _ => None,
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The object field of a rule, classified by shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectRef {
    /// Filesystem path or glob (`/var/www/*`).
    Path(String),
    /// `tcp:<port>` / `udp:<port>` network object.
    Network { protocol: Protocol, port: String },
    /// All-digit port number.
    Port(String),
    /// Bare token naming a type or attribute (`etc_t`, `tcp_socket`).
    Token(String),
}

impl ObjectRef {
    /// Classifies an object field.
    pub fn parse(object: &str) -> Self {
        if object.starts_with(crate::PATH_ROOT) {
            return Self::Path(object.to_string());
        }
        for (prefix, protocol) in [("tcp:", Protocol::Tcp), ("udp:", Protocol::Udp)] {
            if let Some(port) = object.strip_prefix(prefix) {
                return Self::Network {
                    protocol,
                    port: port.to_string(),
                };
            }
        }
        if !object.is_empty() && object.bytes().all(|b| b.is_ascii_digit()) {
            return Self::Port(object.to_string());
        }
        Self::Token(object.to_string())
    }

    pub fn is_path(&self) -> bool {
        matches!(self, Self::Path(_))
    }
}

/// Where a decoded rule's object class came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassSource {
    /// The row's class field.
    Explicit,
    /// An `action::class` encoding in the action field.
    Encoded,
    /// Inferred from the object (or the action's default class).
    Inferred,
}

/// A domain or file type-transition declared by a transition row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub source_type: String,
    /// The entry point (process class) or parent object (file classes).
    pub target_type: String,
    pub class: String,
    pub new_type: String,
}

impl TransitionInfo {
    pub fn is_process(&self) -> bool {
        self.class == crate::PROCESS_CLASS
    }
}

/// A raw rule plus the facts derived while decoding it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedRule {
    pub subject: String,
    pub object: String,
    pub object_ref: ObjectRef,
    /// The action with any `::class` encoding stripped.
    pub action: String,
    /// Never empty after decoding.
    pub class: String,
    pub class_source: ClassSource,
    /// Raw effect slot: `allow`/`deny` for ordinary rules, the new type for transitions.
    pub effect: String,
    pub condition: Option<Condition>,
    /// Present exactly for transition rows.
    pub transition: Option<TransitionInfo>,
    pub line: Option<usize>,
}

impl DecodedRule {
    pub fn is_transition(&self) -> bool {
        self.transition.is_some()
    }

    /// The parsed effect; `None` for transitions and invalid effect values.
    pub fn parsed_effect(&self) -> Option<Effect> {
        if self.is_transition() {
            None
        } else {
            Effect::parse(&self.effect)
        }
    }

    /// Short human-readable description used in diagnostics.
    pub fn describe(&self) -> String {
        match self.line {
            Some(line) => format!(
                "{} {} {} (line {line})",
                self.subject, self.action, self.object
            ),
            None => format!("{} {} {}", self.subject, self.action, self.object),
        }
    }
}

/// A decoded role/attribute row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleRow {
    /// `g, member, role`: the member's type carries `role` as an attribute.
    Attribute { member: String, role: String },
    /// `g, bool:<name>, true|false`: a policy boolean and its default.
    Boolean { name: String, default: bool },
}

/// Everything the decoder produced for one compile invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPolicy {
    pub rules: Vec<DecodedRule>,
    pub roles: Vec<RoleRow>,
}

impl DecodedPolicy {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.roles.is_empty()
    }

    /// Ordinary (non-transition) rules.
    pub fn policy_rules(&self) -> impl Iterator<Item = &DecodedRule> {
        self.rules.iter().filter(|r| !r.is_transition())
    }

    /// Declared transitions, in row order.
    pub fn transitions(&self) -> impl Iterator<Item = (&DecodedRule, &TransitionInfo)> {
        self.rules
            .iter()
            .filter_map(|r| r.transition.as_ref().map(|t| (r, t)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn from_csv_trims_and_skips_comments() {
        let row = RawRule::from_csv("p,  httpd_t , /var/www/*, read, file, allow").unwrap();
        assert_eq!(row.tag, "p");
        assert_eq!(row.fields, vec!["httpd_t", "/var/www/*", "read", "file", "allow"]);

        assert!(RawRule::from_csv("   ").is_none());
        assert!(RawRule::from_csv("# comment").is_none());
    }

    #[test]
    fn from_csv_keeps_brace_groups_whole() {
        let row = RawRule::from_csv("p, app_t, /etc/{a,b}/*.conf, read, file, allow").unwrap();
        assert_eq!(
            row.fields,
            vec!["app_t", "/etc/{a,b}/*.conf", "read", "file", "allow"]
        );

        let nested = RawRule::from_csv("p, app_t, /srv/{x,{y,z}}, read, allow").unwrap();
        assert_eq!(nested.fields[1], "/srv/{x,{y,z}}");
        assert_eq!(nested.fields.len(), 4);
    }

    #[test_case("/etc/passwd" => ObjectRef::Path("/etc/passwd".into()); "path")]
    #[test_case("tcp:8080" => ObjectRef::Network { protocol: Protocol::Tcp, port: "8080".into() }; "tcp")]
    #[test_case("udp:53" => ObjectRef::Network { protocol: Protocol::Udp, port: "53".into() }; "udp")]
    #[test_case("443" => ObjectRef::Port("443".into()); "port")]
    #[test_case("tcp_socket" => ObjectRef::Token("tcp_socket".into()); "token")]
    fn object_ref_classification(object: &str) -> ObjectRef {
        ObjectRef::parse(object)
    }

    #[test]
    fn condition_parsing() {
        assert_eq!(Condition::parse("httpd_can_network"), Some(Condition::new("httpd_can_network")));
        assert_eq!(Condition::parse("!ssh_login"), Some(Condition::negated("ssh_login")));
        assert_eq!(Condition::parse(""), None);
        assert_eq!(Condition::parse("!"), None);
        assert_eq!(Condition::negated("x").to_string(), "!x");
    }

    #[test]
    fn row_tag_round_trips_known_tags() {
        for tag in [RowTag::Policy, RowTag::TransitionPolicy, RowTag::Role] {
            assert_eq!(RowTag::parse(tag.as_str()), Some(tag));
        }
        assert_eq!(RowTag::parse("p3"), None);
    }

    #[test]
    fn transition_rules_have_no_effect() {
        let rule = DecodedRule {
            subject: "init_t".into(),
            object: "foo_exec_t".into(),
            object_ref: ObjectRef::Token("foo_exec_t".into()),
            action: "transition".into(),
            class: "process".into(),
            class_source: ClassSource::Inferred,
            effect: "allow".into(),
            condition: None,
            transition: Some(TransitionInfo {
                source_type: "init_t".into(),
                target_type: "foo_exec_t".into(),
                class: "process".into(),
                new_type: "allow".into(),
            }),
            line: Some(3),
        };
        assert_eq!(rule.parsed_effect(), None);
        assert_eq!(rule.describe(), "init_t transition foo_exec_t (line 3)");
    }
}
