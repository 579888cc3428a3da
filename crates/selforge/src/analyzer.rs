//! Semantic analyzer: model completeness, rule well-formedness, conflict
//! detection and statistics.
//!
//! Validation is fail-fast and never mutates the decoded IR. Conflicts are
//! advisory: they are collected into the [`AnalysisReport`] and logged, but
//! never abort a compile.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use selforge_types::{DecodedPolicy, DecodedRule, Effect, ModelDefinition, PATH_ROOT};
use tracing::{info, warn};

use crate::error::AnalysisError;

/// Punctuation accepted in object patterns besides letters and digits.
const OBJECT_PUNCTUATION: &[char] = &['/', '*', '.', '-', '_', '?', '='];

/// Extra punctuation accepted with extended globs: brace groups, character
/// classes and `tcp:`/`udp:` network objects.
const EXTENDED_PUNCTUATION: &[char] = &['{', '}', ',', '[', ']', '^', ':'];

const WILDCARDS: &[char] = &['*', '?'];

// ============================================================================
// Report types
// ============================================================================

/// An allow rule and a deny rule whose scopes (heuristically) overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub allow_rule: DecodedRule,
    pub deny_rule: DecodedRule,
    pub reason: String,
}

/// Rule counts gathered during analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_rules: usize,
    pub allow_rules: usize,
    pub deny_rules: usize,
    pub transition_rules: usize,
    pub conditional_rules: usize,
    pub role_rows: usize,
    pub by_subject: BTreeMap<String, usize>,
    pub by_object: BTreeMap<String, usize>,
    pub by_action: BTreeMap<String, usize>,
    pub unique_subjects: usize,
    pub unique_objects: usize,
    pub unique_actions: usize,
}

impl Statistics {
    /// Counts every decoded rule and role row.
    pub fn collect(decoded: &DecodedPolicy) -> Self {
        let mut stats = Self {
            total_rules: decoded.rules.len(),
            role_rows: decoded.roles.len(),
            ..Self::default()
        };

        for rule in &decoded.rules {
            if rule.is_transition() {
                stats.transition_rules += 1;
            } else {
                match rule.parsed_effect() {
                    Some(Effect::Allow) => stats.allow_rules += 1,
                    Some(Effect::Deny) => stats.deny_rules += 1,
                    None => {}
                }
            }
            if rule.condition.is_some() {
                stats.conditional_rules += 1;
            }
            *stats.by_subject.entry(rule.subject.clone()).or_default() += 1;
            *stats.by_object.entry(rule.object.clone()).or_default() += 1;
            *stats.by_action.entry(rule.action.clone()).or_default() += 1;
        }

        stats.unique_subjects = stats.by_subject.len();
        stats.unique_objects = stats.by_object.len();
        stats.unique_actions = stats.by_action.len();
        stats
    }
}

/// Result of a successful analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub conflicts: Vec<Conflict>,
    pub statistics: Statistics,
}

impl AnalysisReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

// ============================================================================
// Analyzer
// ============================================================================

/// Stateless validator over the decoded IR.
#[derive(Debug, Clone, Copy, Default)]
pub struct Analyzer {
    extended_globs: bool,
}

impl Analyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Widens the object character set (see [`EXTENDED_PUNCTUATION`]).
    pub fn with_extended_globs(mut self, enabled: bool) -> Self {
        self.extended_globs = enabled;
        self
    }

    /// Validates the model and every rule, then detects conflicts.
    pub fn analyze(
        &self,
        model: &ModelDefinition,
        decoded: &DecodedPolicy,
    ) -> Result<AnalysisReport, AnalysisError> {
        validate_model(model)?;
        for rule in &decoded.rules {
            self.validate_rule(rule)?;
        }

        let conflicts = detect_conflicts(&decoded.rules);
        for conflict in &conflicts {
            warn!(
                subject = %conflict.allow_rule.subject,
                action = %conflict.allow_rule.action,
                class = %conflict.allow_rule.class,
                allow_object = %conflict.allow_rule.object,
                deny_object = %conflict.deny_rule.object,
                reason = %conflict.reason,
                "allow/deny conflict"
            );
        }

        let statistics = Statistics::collect(decoded);
        info!(
            rules = statistics.total_rules,
            roles = statistics.role_rows,
            conflicts = conflicts.len(),
            "analysis complete"
        );

        Ok(AnalysisReport {
            conflicts,
            statistics,
        })
    }

    /// Checks required fields, the effect and the object of one rule.
    pub fn validate_rule(&self, rule: &DecodedRule) -> Result<(), AnalysisError> {
        let required = [
            ("subject", &rule.subject),
            ("object", &rule.object),
            ("action", &rule.action),
            ("class", &rule.class),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(AnalysisError::EmptyField {
                    rule: rule.describe(),
                    field,
                });
            }
        }

        if rule.is_transition() {
            // The effect slot carries the new type.
            if rule.effect.is_empty() {
                return Err(AnalysisError::EmptyField {
                    rule: rule.describe(),
                    field: "new_type",
                });
            }
        } else if rule.parsed_effect().is_none() {
            return Err(AnalysisError::InvalidEffect {
                rule: rule.describe(),
                effect: rule.effect.clone(),
            });
        }

        self.validate_object(rule)
    }

    fn validate_object(&self, rule: &DecodedRule) -> Result<(), AnalysisError> {
        let object = rule.object.as_str();
        let invalid = |reason: String| AnalysisError::InvalidObject {
            rule: rule.describe(),
            object: object.to_string(),
            reason,
        };

        if let Some(c) = object.chars().find(|c| !self.is_object_char(*c)) {
            return Err(invalid(format!("character '{c}' is not allowed")));
        }

        let is_path = object.starts_with(PATH_ROOT);
        let is_identifier = object.contains('_')
            && object.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let is_port = object.bytes().all(|b| b.is_ascii_digit());
        let is_network = self.extended_globs && is_network_object(object);

        if is_path || is_identifier || is_port || is_network {
            Ok(())
        } else {
            Err(invalid(
                "expected an absolute path, an identifier containing '_' or a port number"
                    .to_string(),
            ))
        }
    }

    fn is_object_char(&self, c: char) -> bool {
        c.is_ascii_alphanumeric()
            || OBJECT_PUNCTUATION.contains(&c)
            || (self.extended_globs && EXTENDED_PUNCTUATION.contains(&c))
    }
}

/// Checks the model sections the compiler depends on.
pub fn validate_model(model: &ModelDefinition) -> Result<(), AnalysisError> {
    let sections = [
        ("request_definition", "r", &model.request_definition),
        ("policy_definition", "p", &model.policy_definition),
        ("matchers", "m", &model.matchers),
        ("policy_effect", "e", &model.policy_effect),
    ];

    for (section, key, entries) in sections {
        if entries.is_empty() {
            return Err(AnalysisError::MissingSection { section });
        }
        let expression = entries
            .get(key)
            .ok_or(AnalysisError::MissingKey { section, key })?;
        if expression.trim().is_empty() {
            return Err(AnalysisError::EmptyExpression { section, key });
        }
    }
    Ok(())
}

fn is_network_object(object: &str) -> bool {
    ["tcp:", "udp:"].iter().any(|prefix| {
        object
            .strip_prefix(prefix)
            .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
    })
}

// ============================================================================
// Conflict detection
// ============================================================================

/// Pairs every allow rule with every deny rule of the same subject, action
/// and class whose objects overlap.
pub fn detect_conflicts(rules: &[DecodedRule]) -> Vec<Conflict> {
    let mut by_subject: BTreeMap<&str, (Vec<&DecodedRule>, Vec<&DecodedRule>)> = BTreeMap::new();
    for rule in rules {
        let (allows, denies) = by_subject.entry(rule.subject.as_str()).or_default();
        match rule.parsed_effect() {
            Some(Effect::Allow) => allows.push(rule),
            Some(Effect::Deny) => denies.push(rule),
            None => {}
        }
    }

    let mut conflicts = Vec::new();
    for (allows, denies) in by_subject.values() {
        for allow in allows {
            for deny in denies {
                if allow.action != deny.action || allow.class != deny.class {
                    continue;
                }
                if let Some(reason) = objects_overlap(&allow.object, &deny.object) {
                    conflicts.push(Conflict {
                        allow_rule: (*allow).clone(),
                        deny_rule: (*deny).clone(),
                        reason,
                    });
                }
            }
        }
    }
    conflicts
}

/// Approximate overlap test between two object patterns.
///
/// Cases: identical strings; `a` ends in a wildcard and `b` starts with what
/// precedes it; the same with roles swapped; same parent directory with a
/// wildcard on either side. This can miss real overlaps and report spurious
/// ones on complex patterns.
pub fn objects_overlap(a: &str, b: &str) -> Option<String> {
    if a == b {
        return Some(format!("identical object '{a}'"));
    }
    if let Some(base) = wildcard_base(a) {
        if b.starts_with(base) {
            return Some(format!("'{a}' covers '{b}'"));
        }
    }
    if let Some(base) = wildcard_base(b) {
        if a.starts_with(base) {
            return Some(format!("'{b}' covers '{a}'"));
        }
    }
    match (parent(a), parent(b)) {
        (Some(pa), Some(pb)) if pa == pb && (a.contains(WILDCARDS) || b.contains(WILDCARDS)) => {
            Some(format!("'{a}' and '{b}' share directory '{pa}' and one is a wildcard"))
        }
        _ => None,
    }
}

/// The pattern with its trailing wildcard removed, if it has one.
fn wildcard_base(pattern: &str) -> Option<&str> {
    let base = pattern.trim_end_matches('*');
    (base.len() < pattern.len()).then_some(base)
}

fn parent(pattern: &str) -> Option<&str> {
    pattern.rfind(PATH_ROOT).map(|i| &pattern[..i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use selforge_types::RawRule;
    use test_case::test_case;

    fn decoded(lines: &[&str]) -> DecodedPolicy {
        let rows: Vec<RawRule> = lines
            .iter()
            .enumerate()
            .filter_map(|(i, l)| RawRule::from_csv(l).map(|r| r.with_line(i + 1)))
            .collect();
        decode(&rows).expect("decode")
    }

    fn analyze(lines: &[&str]) -> Result<AnalysisReport, AnalysisError> {
        Analyzer::new().analyze(&ModelDefinition::standard(), &decoded(lines))
    }

    #[test]
    fn model_sections_are_required() {
        let mut model = ModelDefinition::standard();
        model.request_definition.clear();
        assert_eq!(
            validate_model(&model),
            Err(AnalysisError::MissingSection {
                section: "request_definition"
            })
        );

        let model = ModelDefinition::standard().with_policy("p", "");
        assert_eq!(
            validate_model(&model),
            Err(AnalysisError::EmptyExpression {
                section: "policy_definition",
                key: "p"
            })
        );

        let mut model = ModelDefinition::standard();
        model.matchers.clear();
        model.matchers.insert("m2".into(), "true".into());
        assert_eq!(
            validate_model(&model),
            Err(AnalysisError::MissingKey {
                section: "matchers",
                key: "m"
            })
        );

        let model = ModelDefinition::standard().with_effect("e", "  ");
        assert!(matches!(
            validate_model(&model),
            Err(AnalysisError::EmptyExpression { key: "e", .. })
        ));
    }

    #[test]
    fn invalid_effect_is_fatal() {
        let err = analyze(&["p, app_t, /data/*, read, file, permit"]).expect_err("effect");
        assert_eq!(
            err,
            AnalysisError::InvalidEffect {
                rule: "app_t read /data/* (line 1)".into(),
                effect: "permit".into()
            }
        );
    }

    #[test]
    fn transitions_are_exempt_from_effect_validation() {
        let report = analyze(&["p2, init_t, httpd_exec_t, transition, httpd_t"]).expect("valid");
        assert_eq!(report.statistics.transition_rules, 1);
    }

    #[test]
    fn empty_field_is_fatal() {
        let err = analyze(&["p, , /data/*, read, file, allow"]).expect_err("subject");
        assert!(matches!(err, AnalysisError::EmptyField { field: "subject", .. }));
    }

    #[test_case("/var/www/*" => true; "path")]
    #[test_case("tcp_socket" => true; "identifier with underscore")]
    #[test_case("8080" => true; "port")]
    #[test_case("/srv/a=b-c.d?" => true; "allowed punctuation")]
    #[test_case("etc" => false; "identifier without underscore")]
    #[test_case("/etc/{a,b}" => false; "braces need extended globs")]
    #[test_case("tcp:80" => false; "network needs extended globs")]
    #[test_case("/etc/a b" => false; "space")]
    fn object_validation(object: &str) -> bool {
        let line = format!("p, app_t, {object}, read, file, allow");
        analyze(&[line.as_str()]).is_ok()
    }

    #[test_case("/etc/{a,b}/*.conf" => true; "braces")]
    #[test_case("/dev/sd[a-z]" => true; "class")]
    #[test_case("tcp:80" => true; "network")]
    #[test_case("udp:" => false; "network without port")]
    #[test_case("/etc/a;b" => false; "still rejects others")]
    fn extended_object_validation(object: &str) -> bool {
        let line = format!("p, app_t, {object}, read, file, allow");
        Analyzer::new()
            .with_extended_globs(true)
            .analyze(&ModelDefinition::standard(), &decoded(&[line.as_str()]))
            .is_ok()
    }

    #[test]
    fn identical_objects_conflict() {
        let report = analyze(&[
            "p, app_t, /data/*, read, file, allow",
            "p, app_t, /data/*, read, file, deny",
        ])
        .expect("conflicts are advisory");

        assert_eq!(report.conflicts.len(), 1);
        let conflict = &report.conflicts[0];
        assert_eq!(conflict.allow_rule.line, Some(1));
        assert_eq!(conflict.deny_rule.line, Some(2));
        assert!(conflict.reason.contains("identical"));
    }

    #[test]
    fn different_action_or_class_or_subject_never_conflicts() {
        let report = analyze(&[
            "p, app_t, /data/*, read, file, allow",
            "p, app_t, /data/*, write, file, deny",
            "p, app_t, /data/*, read, dir, deny",
            "p, other_t, /data/*, read, file, deny",
        ])
        .expect("valid");
        assert!(!report.has_conflicts());
    }

    #[test_case("/data/*", "/data/secret.txt" => true; "allow wildcard covers deny")]
    #[test_case("/data/report.txt", "/data/**" => true; "deny wildcard covers allow")]
    #[test_case("/data/a?.txt", "/data/b.txt" => true; "same parent with wildcard")]
    #[test_case("/data/a.txt", "/data/b.txt" => false; "same parent without wildcard")]
    #[test_case("/data/*", "/srv/data" => false; "disjoint")]
    fn overlap_heuristic(a: &str, b: &str) -> bool {
        objects_overlap(a, b).is_some()
    }

    #[test]
    fn statistics_are_counted() {
        let report = analyze(&[
            "p, httpd_t, /var/www/*, read, file, allow",
            "p, httpd_t, /var/log/httpd/*, write, file, allow, httpd_logging",
            "p, httpd_t, /etc/shadow, read, file, deny",
            "p2, init_t, httpd_exec_t, transition, httpd_t",
            "g, bool:httpd_logging, true",
        ])
        .expect("valid");

        let stats = &report.statistics;
        assert_eq!(stats.total_rules, 4);
        assert_eq!(stats.allow_rules, 2);
        assert_eq!(stats.deny_rules, 1);
        assert_eq!(stats.transition_rules, 1);
        assert_eq!(stats.conditional_rules, 1);
        assert_eq!(stats.role_rows, 1);
        assert_eq!(stats.by_subject.get("httpd_t"), Some(&3));
        assert_eq!(stats.by_action.get("read"), Some(&2));
        assert_eq!(stats.unique_subjects, 2);
        assert_eq!(stats.unique_objects, 4);
        assert_eq!(stats.unique_actions, 3);
    }
}
