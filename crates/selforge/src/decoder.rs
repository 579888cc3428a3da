//! Decoder: raw rule rows → annotated intermediate representation.
//!
//! Interprets field *content* only; the rule-table parser has already split
//! rows into fields. Decoding fails solely on structural problems (unknown
//! tag, wrong field count, a transition row without the `transition`
//! action). Everything else, including odd boolean encodings, is passed
//! through for the analyzer or degraded to a literal value.

use selforge_types::{
    ClassSource, Condition, DecodedPolicy, DecodedRule, ObjectRef, PROCESS_CLASS, RawRule,
    RoleRow, RowTag, TransitionInfo,
};
use tracing::debug;

use crate::error::DecodeError;
use crate::mapping::actions;

/// The action literal carried by transition rows.
pub const TRANSITION_ACTION: &str = "transition";

/// Separator of the `action::class` encoding.
const CLASS_SEPARATOR: &str = "::";

/// Prefix of the `bool:<name>` member encoding.
const BOOLEAN_PREFIX: &str = "bool:";

/// One decoded row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRow {
    Rule(DecodedRule),
    Role(RoleRow),
}

/// Decodes every row, failing on the first structural error.
pub fn decode(rows: &[RawRule]) -> Result<DecodedPolicy, DecodeError> {
    let mut decoded = DecodedPolicy::default();

    for row in rows {
        match decode_row(row)? {
            DecodedRow::Rule(rule) => decoded.rules.push(rule),
            DecodedRow::Role(role) => decoded.roles.push(role),
        }
    }

    debug!(
        rows = rows.len(),
        rules = decoded.rules.len(),
        transitions = decoded.transitions().count(),
        roles = decoded.roles.len(),
        "decoded rule table"
    );

    Ok(decoded)
}

/// Decodes a single row.
pub fn decode_row(row: &RawRule) -> Result<DecodedRow, DecodeError> {
    if row.tag.is_empty() {
        return Err(DecodeError::EmptyRow { line: row.line });
    }

    let tag = RowTag::parse(&row.tag).ok_or_else(|| DecodeError::UnknownTag {
        tag: row.tag.clone(),
        line: row.line,
    })?;

    let accepted = tag.accepted_field_counts();
    if !accepted.contains(&row.fields.len()) {
        return Err(DecodeError::FieldCount {
            tag: row.tag.clone(),
            expected: describe_counts(accepted),
            found: row.fields.len(),
            line: row.line,
        });
    }

    match tag {
        RowTag::Policy => Ok(DecodedRow::Rule(decode_policy_row(row))),
        RowTag::TransitionPolicy => decode_transition_row(row).map(DecodedRow::Rule),
        RowTag::Role => Ok(DecodedRow::Role(decode_role_row(row))),
    }
}

/// Splits `action::class`. An empty class after the separator counts as absent.
pub fn split_action(action: &str) -> (&str, Option<&str>) {
    match action.split_once(CLASS_SEPARATOR) {
        Some((name, class)) if !class.trim().is_empty() => (name.trim(), Some(class.trim())),
        Some((name, _)) => (name.trim(), None),
        None => (action, None),
    }
}

const SOCKET_SUFFIX: &str = "_socket";
const DEFAULT_PORT_CLASS: &str = "tcp_socket";

/// Infers the object class from the object's shape and the action. A bare
/// port takes the action's socket class, else `tcp_socket`.
pub fn infer_class(object: &ObjectRef, action: &str) -> String {
    match object {
        ObjectRef::Path(path) => {
            if path.ends_with(selforge_types::PATH_ROOT)
                || actions::default_class(action) == Some(selforge_types::DIR_CLASS)
            {
                selforge_types::DIR_CLASS.to_string()
            } else {
                selforge_types::FILE_CLASS.to_string()
            }
        }
        ObjectRef::Network { protocol, .. } => protocol.socket_class().to_string(),
        ObjectRef::Port(_) => actions::default_class(action)
            .filter(|class| class.ends_with(SOCKET_SUFFIX))
            .unwrap_or(DEFAULT_PORT_CLASS)
            .to_string(),
        ObjectRef::Token(_) => actions::default_class(action)
            .unwrap_or(selforge_types::FILE_CLASS)
            .to_string(),
    }
}

// ============================================================================
// Row kinds
// ============================================================================

fn decode_policy_row(row: &RawRule) -> DecodedRule {
    // sub, obj, act, eft | sub, obj, act, cls, eft | sub, obj, act, cls, eft, cond
    let (class_field, effect, condition) = match row.fields.len() {
        4 => ("", row.field(3), ""),
        5 => (row.field(3), row.field(4), ""),
        _ => (row.field(3), row.field(4), row.field(5)),
    };

    let subject = row.field(0);
    let object = row.field(1);
    let object_ref = ObjectRef::parse(object);
    let (action, encoded_class) = split_action(row.field(2));

    let (class, class_source) = if let Some(class) = encoded_class {
        (class.to_string(), ClassSource::Encoded)
    } else if !class_field.is_empty() {
        (class_field.to_string(), ClassSource::Explicit)
    } else {
        (infer_class(&object_ref, action), ClassSource::Inferred)
    };

    DecodedRule {
        subject: subject.to_string(),
        object: object.to_string(),
        object_ref,
        action: action.to_string(),
        class,
        class_source,
        effect: effect.to_string(),
        condition: Condition::parse(condition),
        transition: None,
        line: row.line,
    }
}

fn decode_transition_row(row: &RawRule) -> Result<DecodedRule, DecodeError> {
    // sub, obj, transition[::cls], new_type [, cond]
    let subject = row.field(0);
    let object = row.field(1);
    let (action, encoded_class) = split_action(row.field(2));
    let new_type = row.field(3);

    if action != TRANSITION_ACTION {
        return Err(DecodeError::InvalidTransition {
            reason: format!("action must be '{TRANSITION_ACTION}', found '{action}'"),
            line: row.line,
        });
    }

    let (class, class_source) = match encoded_class {
        Some(class) => (class.to_string(), ClassSource::Encoded),
        None => (PROCESS_CLASS.to_string(), ClassSource::Inferred),
    };

    let transition = TransitionInfo {
        source_type: subject.to_string(),
        target_type: object.to_string(),
        class: class.clone(),
        new_type: new_type.to_string(),
    };

    Ok(DecodedRule {
        subject: subject.to_string(),
        object: object.to_string(),
        object_ref: ObjectRef::parse(object),
        action: action.to_string(),
        class,
        class_source,
        effect: new_type.to_string(),
        condition: Condition::parse(row.field(4)),
        transition: Some(transition),
        line: row.line,
    })
}

fn decode_role_row(row: &RawRule) -> RoleRow {
    let member = row.field(0);
    let role = row.field(1);

    decode_boolean(member, role).unwrap_or_else(|| RoleRow::Attribute {
        member: member.to_string(),
        role: role.to_string(),
    })
}

/// Recognizes `bool:<name>` (default in the role field) and `<name>:<default>`.
///
/// Returns `None` for anything else so the row degrades to a literal attribute.
fn decode_boolean(member: &str, role: &str) -> Option<RoleRow> {
    if let Some(name) = member.strip_prefix(BOOLEAN_PREFIX) {
        return boolean_row(name, role);
    }
    let (name, value) = member.split_once(':')?;
    boolean_row(name, value)
}

fn boolean_row(name: &str, value: &str) -> Option<RoleRow> {
    let name = name.trim();
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_name {
        return None;
    }
    let default = match value.trim().to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => return None,
    };
    Some(RoleRow::Boolean {
        name: name.to_string(),
        default,
    })
}

fn describe_counts(counts: &[usize]) -> String {
    match counts {
        [] => String::new(),
        [only] => only.to_string(),
        [init @ .., last] => {
            let init: Vec<String> = init.iter().map(ToString::to_string).collect();
            format!("{} or {last}", init.join(", "))
        }
    }
}
