//! Optimizer: in-place rewrite passes over a generated [`CompiledPolicy`].
//!
//! Passes run in a fixed order:
//!
//! 1. Merge allow rules by `(source, target, class)`
//! 2. Dedupe type declarations by name
//! 3. Dedupe file contexts by `(pattern, file type)`
//! 4. Eliminate redundant (strictly subsumed) allow rules
//! 5. Prune types no rule references, with their file contexts
//! 6. Normalize the auxiliary collections
//!
//! Every pass sorts its output, so the whole sequence is idempotent:
//! optimizing an optimized policy changes nothing. The optimizer cannot fail.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use selforge_types::{
    AllowRule, CompiledPolicy, Condition, ConditionalBlock, FileContextEntry, TypeDecl,
    is_file_like_class,
};
use tracing::{debug, info};

/// Permissions that imply `open` on file-like classes.
const IMPLIES_OPEN: &[&str] = &["read", "write", "append"];

const OPEN: &str = "open";

/// How much each pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub merged_rules: usize,
    pub duplicate_types: usize,
    pub duplicate_file_contexts: usize,
    pub redundant_rules: usize,
    pub pruned_types: usize,
    /// File contexts dropped because their target type was pruned.
    pub orphaned_file_contexts: usize,
}

impl OptimizationReport {
    pub fn total_removed(&self) -> usize {
        self.merged_rules
            + self.duplicate_types
            + self.duplicate_file_contexts
            + self.redundant_rules
            + self.pruned_types
            + self.orphaned_file_contexts
    }
}

/// Runs the optimization passes.
#[derive(Debug, Clone, Copy)]
pub struct Optimizer {
    eliminate_redundant: bool,
    prune_unused_types: bool,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self {
            eliminate_redundant: true,
            prune_unused_types: true,
        }
    }
}

impl Optimizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redundancy_elimination(mut self, enabled: bool) -> Self {
        self.eliminate_redundant = enabled;
        self
    }

    pub fn with_type_pruning(mut self, enabled: bool) -> Self {
        self.prune_unused_types = enabled;
        self
    }

    /// Rewrites `policy` in place.
    pub fn optimize(&self, policy: &mut CompiledPolicy) -> OptimizationReport {
        let mut report = OptimizationReport::default();

        // 1. Merge
        let before = rule_total(policy);
        policy.allow_rules = merge_allow_rules(std::mem::take(&mut policy.allow_rules));
        policy.conditionals = merge_conditionals(std::mem::take(&mut policy.conditionals));
        report.merged_rules = before - rule_total(policy);

        // 2. Types
        let before = policy.types.len();
        policy.types = dedupe_types(std::mem::take(&mut policy.types));
        report.duplicate_types = before - policy.types.len();

        // 3. File contexts
        let before = policy.file_contexts.len();
        policy.file_contexts = dedupe_file_contexts(std::mem::take(&mut policy.file_contexts));
        report.duplicate_file_contexts = before - policy.file_contexts.len();

        // 4. Redundancy
        if self.eliminate_redundant {
            let before = rule_total(policy);
            eliminate_redundant_in(policy);
            report.redundant_rules = before - rule_total(policy);
        }

        // 5. Prune
        if self.prune_unused_types {
            let contexts = policy.file_contexts.len();
            report.pruned_types = prune_unused_types(policy);
            report.orphaned_file_contexts = contexts - policy.file_contexts.len();
        }

        // 6. Auxiliary collections
        normalize(policy);

        info!(
            allow_rules = policy.allow_rules.len(),
            types = policy.types.len(),
            file_contexts = policy.file_contexts.len(),
            removed = report.total_removed(),
            "optimization complete"
        );
        report
    }
}

fn rule_total(policy: &CompiledPolicy) -> usize {
    policy.allow_rules.len() + policy.conditionals.iter().map(|b| b.rules.len()).sum::<usize>()
}

// ============================================================================
// Passes
// ============================================================================

/// Groups by `(source, target, class)`, unions permissions, adds `open`
/// where a file-like class is read or written, and sorts everything.
pub fn merge_allow_rules(rules: Vec<AllowRule>) -> Vec<AllowRule> {
    let mut groups: BTreeMap<(String, String, String), BTreeSet<String>> = BTreeMap::new();
    for rule in rules {
        groups
            .entry((rule.source, rule.target, rule.class))
            .or_default()
            .extend(rule.permissions);
    }

    groups
        .into_iter()
        .map(|((source, target, class), mut permissions)| {
            if is_file_like_class(&class) && IMPLIES_OPEN.iter().any(|p| permissions.contains(*p))
            {
                permissions.insert(OPEN.to_string());
            }
            AllowRule {
                source,
                target,
                class,
                permissions: permissions.into_iter().collect(),
            }
        })
        .collect()
}

/// Merges blocks sharing a condition, merges their rules and sorts blocks
/// by condition. Empty blocks are dropped.
fn merge_conditionals(blocks: Vec<ConditionalBlock>) -> Vec<ConditionalBlock> {
    let mut by_condition: BTreeMap<Condition, Vec<AllowRule>> = BTreeMap::new();
    for block in blocks {
        by_condition
            .entry(block.condition)
            .or_default()
            .extend(block.rules);
    }

    by_condition
        .into_iter()
        .map(|(condition, rules)| ConditionalBlock {
            condition,
            rules: merge_allow_rules(rules),
        })
        .filter(|block| !block.rules.is_empty())
        .collect()
}

/// Unions attribute sets of same-named declarations; sorted by name.
pub fn dedupe_types(types: Vec<TypeDecl>) -> Vec<TypeDecl> {
    let mut by_name: BTreeMap<String, TypeDecl> = BTreeMap::new();
    for decl in types {
        match by_name.get_mut(&decl.name) {
            Some(existing) => {
                existing.attributes.extend(decl.attributes);
                if existing.comment.is_none() {
                    existing.comment = decl.comment;
                }
            }
            None => {
                by_name.insert(decl.name.clone(), decl);
            }
        }
    }
    by_name.into_values().collect()
}

/// Keeps the first entry per `(pattern, file type)`; sorted by pattern.
pub fn dedupe_file_contexts(entries: Vec<FileContextEntry>) -> Vec<FileContextEntry> {
    let mut seen = BTreeSet::new();
    let mut kept: Vec<FileContextEntry> = entries
        .into_iter()
        .filter(|entry| seen.insert((entry.pattern.clone(), entry.file_type)))
        .collect();
    kept.sort_by(|a, b| {
        a.pattern
            .cmp(&b.pattern)
            .then_with(|| a.file_type.cmp(&b.file_type))
    });
    kept
}

/// Drops every rule whose permissions are a strict subset of another rule
/// with the same `(source, target, class)`.
///
/// Equal-size sets are never redundant, so two distinct rules can never
/// delete each other.
pub fn eliminate_redundant(rules: Vec<AllowRule>) -> Vec<AllowRule> {
    let mut groups: BTreeMap<(&str, &str, &str), Vec<BTreeSet<&str>>> = BTreeMap::new();
    for rule in &rules {
        groups.entry(rule.key()).or_default().push(rule.permission_set());
    }

    let redundant: Vec<bool> = rules
        .iter()
        .map(|rule| {
            let own = rule.permission_set();
            groups.get(&rule.key()).is_some_and(|sets| {
                sets.iter()
                    .any(|other| other.len() > own.len() && own.is_subset(other))
            })
        })
        .collect();

    rules
        .into_iter()
        .zip(redundant)
        .filter_map(|(rule, redundant)| {
            if redundant {
                debug!(
                    source = %rule.source,
                    target = %rule.target,
                    class = %rule.class,
                    "dropping subsumed rule"
                );
                None
            } else {
                Some(rule)
            }
        })
        .collect()
}

/// Redundancy within the unconditional list, within each block, and of
/// block rules an unconditional rule already covers.
fn eliminate_redundant_in(policy: &mut CompiledPolicy) {
    policy.allow_rules = eliminate_redundant(std::mem::take(&mut policy.allow_rules));

    let unconditional: BTreeMap<(&str, &str, &str), BTreeSet<&str>> = policy
        .allow_rules
        .iter()
        .map(|rule| (rule.key(), rule.permission_set()))
        .collect();

    let mut blocks = Vec::with_capacity(policy.conditionals.len());
    for block in &policy.conditionals {
        let rules: Vec<AllowRule> = eliminate_redundant(block.rules.clone())
            .into_iter()
            .filter(|rule| {
                !unconditional
                    .get(&rule.key())
                    .is_some_and(|covering| rule.permission_set().is_subset(covering))
            })
            .collect();
        if !rules.is_empty() {
            blocks.push(ConditionalBlock {
                condition: block.condition.clone(),
                rules,
            });
        }
    }
    policy.conditionals = blocks;
}

/// Removes declarations no allow rule, type transition or port binding
/// mentions, either by name or through one of their attributes. File
/// contexts labelling a removed type go with it. Returns how many types were
/// removed.
pub fn prune_unused_types(policy: &mut CompiledPolicy) -> usize {
    let mut referenced: BTreeSet<String> = BTreeSet::new();
    let all_rules = policy
        .allow_rules
        .iter()
        .chain(policy.conditionals.iter().flat_map(|b| b.rules.iter()));
    for rule in all_rules {
        referenced.insert(rule.source.clone());
        referenced.insert(rule.target.clone());
    }
    for transition in &policy.type_transitions {
        referenced.insert(transition.source.clone());
        referenced.insert(transition.target.clone());
        referenced.insert(transition.new_type.clone());
    }
    for binding in &policy.port_bindings {
        referenced.insert(binding.type_name.clone());
    }

    let mut removed: BTreeSet<String> = BTreeSet::new();
    policy.types.retain(|decl| {
        let keep = referenced.contains(&decl.name)
            || decl.attributes.iter().any(|a| referenced.contains(a));
        if !keep {
            debug!(type_name = %decl.name, "pruning unused type");
            removed.insert(decl.name.clone());
        }
        keep
    });
    policy
        .file_contexts
        .retain(|fc| !removed.contains(&fc.target_type));
    removed.len()
}

/// Sorts and dedupes the collections the other passes do not touch.
fn normalize(policy: &mut CompiledPolicy) {
    policy.type_transitions.sort();
    policy.type_transitions.dedup();
    policy.capabilities.sort();
    policy.capabilities.dedup();
    policy.port_bindings.sort();
    policy.port_bindings.dedup();
    policy.booleans.sort();
    policy.booleans.dedup();
    policy.auto_transitions.sort();
    policy.auto_transitions.dedup();
}
