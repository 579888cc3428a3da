//! Automatic domain-transition inference and the domain transition graph.
//!
//! A declared process transition becomes an auto-transition when the source
//! domain already holds an execute-capable allow rule on the entry point,
//! the entry point carries an executable suffix, and the new domain differs
//! from the source. Each
//! accepted candidate yields the allow rules a working transition needs plus
//! an [`AutoTransitionRule`] record.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use selforge_types::{
    AllowRule, AutoTransitionRule, Condition, FILE_CLASS, PROCESS_CLASS, SELF_TARGET,
};
use tracing::debug;

use super::types::is_executable_type;

const EXECUTE: &str = "execute";

/// A process transition declared by a transition row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DeclaredTransition {
    pub source_domain: String,
    pub entry_point: String,
    pub new_domain: String,
    pub condition: Option<Condition>,
}

impl DeclaredTransition {
    pub fn new(
        source_domain: impl Into<String>,
        entry_point: impl Into<String>,
        new_domain: impl Into<String>,
    ) -> Self {
        Self {
            source_domain: source_domain.into(),
            entry_point: entry_point.into(),
            new_domain: new_domain.into(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: Option<Condition>) -> Self {
        self.condition = condition;
        self
    }
}

/// Why a declared transition was not inferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The source domain cannot execute the entry point.
    NoExecuteAllow,
    /// The entry point lacks an executable suffix.
    NotExecutable,
    /// Source and new domain are the same.
    SameDomain,
}

/// Output of one inference run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferredTransitions {
    pub rules: Vec<AutoTransitionRule>,
    /// Synthesized allow rules, each paired with the guard of its transition.
    pub allow_rules: Vec<(Option<Condition>, AllowRule)>,
}

impl InferredTransitions {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Infers domain transitions against an allow-map keyed by source domain.
///
/// The map records, per source domain, the targets it may execute.
#[derive(Debug, Clone, Default)]
pub struct AutoTransitionInferer {
    allow_map: BTreeMap<String, BTreeSet<String>>,
}

impl AutoTransitionInferer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the allow-map from already generated rules.
    pub fn from_allow_rules<'a>(rules: impl IntoIterator<Item = &'a AllowRule>) -> Self {
        let mut inferer = Self::new();
        for rule in rules {
            inferer.record(rule);
        }
        inferer
    }

    /// Records `rule` in the allow-map when it grants `execute` on a file.
    pub fn record(&mut self, rule: &AllowRule) {
        if rule.class == FILE_CLASS && rule.has_permission(EXECUTE) {
            self.allow_map
                .entry(rule.source.clone())
                .or_default()
                .insert(rule.target.clone());
        }
    }

    pub fn can_execute(&self, domain: &str, entry_point: &str) -> bool {
        self.allow_map
            .get(domain)
            .is_some_and(|targets| targets.contains(entry_point))
    }

    /// Checks the candidate criteria, returning the first one that fails.
    pub fn check(&self, transition: &DeclaredTransition) -> Result<(), Rejection> {
        if transition.source_domain == transition.new_domain {
            return Err(Rejection::SameDomain);
        }
        if !is_executable_type(&transition.entry_point) {
            return Err(Rejection::NotExecutable);
        }
        if !self.can_execute(&transition.source_domain, &transition.entry_point) {
            return Err(Rejection::NoExecuteAllow);
        }
        Ok(())
    }

    /// Infers transitions from `declared`. Duplicate declarations infer once.
    pub fn infer(&self, declared: &[DeclaredTransition]) -> InferredTransitions {
        let mut inferred = InferredTransitions::default();
        let mut seen = BTreeSet::new();

        for transition in declared {
            if let Err(reason) = self.check(transition) {
                debug!(
                    source = %transition.source_domain,
                    entry_point = %transition.entry_point,
                    new_domain = %transition.new_domain,
                    ?reason,
                    "transition not inferred"
                );
                continue;
            }
            if !seen.insert(transition) {
                continue;
            }

            for rule in synthesize(transition) {
                inferred
                    .allow_rules
                    .push((transition.condition.clone(), rule));
            }
            inferred.rules.push(AutoTransitionRule {
                source_domain: transition.source_domain.clone(),
                target_domain: transition.new_domain.clone(),
                entry_point: transition.entry_point.clone(),
                auto_inferred: true,
                conditions: transition.condition.iter().cloned().collect(),
            });
        }

        debug!(
            declared = declared.len(),
            inferred = inferred.rules.len(),
            "inferred domain transitions"
        );
        inferred
    }
}

/// The allow rules a working domain transition needs.
fn synthesize(t: &DeclaredTransition) -> [AllowRule; 5] {
    let (src, entry, new) = (
        t.source_domain.as_str(),
        t.entry_point.as_str(),
        t.new_domain.as_str(),
    );
    [
        AllowRule::new(src, entry, FILE_CLASS, [EXECUTE, "read", "getattr", "open"]),
        AllowRule::new(new, entry, FILE_CLASS, ["entrypoint"]),
        AllowRule::new(src, new, PROCESS_CLASS, ["transition"]),
        AllowRule::new(new, src, PROCESS_CLASS, ["sigchld"]),
        AllowRule::new(new, SELF_TARGET, PROCESS_CLASS, ["fork", "sigchld", "signal"]),
    ]
}

// ============================================================================
// Transition graph
// ============================================================================

static NO_EDGES: BTreeSet<String> = BTreeSet::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Directed graph of domain transitions, keyed by domain name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitionGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
}

impl TransitionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from inferred transition records.
    pub fn from_rules<'a>(rules: impl IntoIterator<Item = &'a AutoTransitionRule>) -> Self {
        let mut graph = Self::new();
        for rule in rules {
            graph.add_edge(&rule.source_domain, &rule.target_domain);
        }
        graph
    }

    pub fn add_edge(&mut self, from: &str, to: &str) {
        self.edges
            .entry(from.to_string())
            .or_default()
            .insert(to.to_string());
        self.edges.entry(to.to_string()).or_default();
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.get(from).is_some_and(|n| n.contains(to))
    }

    pub fn domains(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    fn neighbors(&self, domain: &str) -> &BTreeSet<String> {
        self.edges.get(domain).unwrap_or(&NO_EDGES)
    }

    /// Breadth-first shortest path from `from` to `to`, both ends included.
    ///
    /// With `from == to` this is the shortest cycle through `from`.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let mut parents: BTreeMap<&str, &str> = BTreeMap::new();
        let mut visited: BTreeSet<&str> = BTreeSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node) {
                if next.as_str() == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = node;
                    path.push(cursor.to_string());
                    while let Some(parent) = parents.get(cursor) {
                        cursor = parent;
                        path.push(cursor.to_string());
                    }
                    path.reverse();
                    return Some(path);
                }
                if visited.insert(next.as_str()) {
                    parents.insert(next.as_str(), node);
                    queue.push_back(next.as_str());
                }
            }
        }
        None
    }

    /// A path is valid when it has at least two nodes and every hop is an edge.
    pub fn validate_path<S: AsRef<str>>(&self, path: &[S]) -> bool {
        path.len() >= 2
            && path
                .windows(2)
                .all(|hop| self.has_edge(hop[0].as_ref(), hop[1].as_ref()))
    }

    /// Every domain reachable from `start` in one or more hops.
    pub fn reachable_from(&self, start: &str) -> BTreeSet<String> {
        let mut reached: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            for next in self.neighbors(node) {
                if reached.insert(next.clone()) {
                    queue.push_back(next);
                }
            }
        }
        reached
    }

    /// Finds a transition loop, returned with its first domain repeated at
    /// the end.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut state: BTreeMap<&str, Visit> = BTreeMap::new();

        for start in self.edges.keys() {
            if state.contains_key(start.as_str()) {
                continue;
            }
            state.insert(start.as_str(), Visit::InProgress);
            let mut path: Vec<&str> = vec![start.as_str()];
            let mut stack = vec![self.neighbors(start).iter()];

            loop {
                let step = match stack.last_mut() {
                    Some(neighbors) => neighbors.next(),
                    None => break,
                };
                match step {
                    Some(next) => match state.get(next.as_str()) {
                        Some(Visit::InProgress) => {
                            let begin = path.iter().position(|n| *n == next.as_str())?;
                            let mut cycle: Vec<String> =
                                path[begin..].iter().map(ToString::to_string).collect();
                            cycle.push(next.clone());
                            return Some(cycle);
                        }
                        Some(Visit::Done) => {}
                        None => {
                            state.insert(next.as_str(), Visit::InProgress);
                            path.push(next.as_str());
                            stack.push(self.neighbors(next).iter());
                        }
                    },
                    None => {
                        stack.pop();
                        if let Some(done) = path.pop() {
                            state.insert(done, Visit::Done);
                        }
                    }
                }
            }
        }
        None
    }
}
