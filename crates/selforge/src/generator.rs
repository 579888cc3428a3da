//! Generator: decoded IR + mappers → [`CompiledPolicy`].
//!
//! A pure transform. Type declarations are merged by name as they are
//! produced (attribute sets are unioned); allow rules are emitted as-is and
//! left for the optimizer to merge. Deny rules produce nothing, the target
//! model being default-deny.

use std::collections::{BTreeMap, BTreeSet};

use selforge_types::{
    AllowRule, BooleanDecl, CapabilityGrant, CompiledPolicy, Condition, ConditionalBlock,
    DecodedPolicy, DecodedRule, Effect, FILE_CLASS, FileContextEntry, ObjectRef, PROCESS_CLASS,
    PortBinding, Protocol, RoleRow, SELF_TARGET, TYPE_SUFFIX, TransitionInfo, TypeDecl,
    TypeTransitionRule, is_capability_class, is_file_like_class,
};
use tracing::{debug, info, warn};

use crate::error::GenerateError;
use crate::mapping::types::{
    DOMAIN, EXEC_TYPE, FILE_TYPE, PORT_TYPE, attribute_name, ensure_type_suffix,
    is_executable_type,
};
use crate::mapping::{
    ActionMapper, AutoTransitionInferer, DeclaredTransition, PathMapper, TransitionGraph,
    TypeMapper,
};

/// Drives the mappers over a decoded rule set.
#[derive(Debug, Clone)]
pub struct Generator {
    module_name: String,
    version: String,
    types: TypeMapper,
    actions: ActionMapper,
    paths: PathMapper,
    auto_transitions: bool,
    file_contexts: bool,
}

impl Generator {
    /// Creates a generator with default mappers and every feature enabled.
    pub fn new(module_name: impl Into<String>, version: impl Into<String>) -> Self {
        let module_name = module_name.into();
        Self {
            types: TypeMapper::new(&module_name),
            module_name,
            version: version.into(),
            actions: ActionMapper::new(),
            paths: PathMapper::new(),
            auto_transitions: true,
            file_contexts: true,
        }
    }

    pub fn with_action_mapper(mut self, actions: ActionMapper) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_path_mapper(mut self, paths: PathMapper) -> Self {
        self.paths = paths;
        self
    }

    pub fn with_auto_transitions(mut self, enabled: bool) -> Self {
        self.auto_transitions = enabled;
        self
    }

    pub fn with_file_contexts(mut self, enabled: bool) -> Self {
        self.file_contexts = enabled;
        self
    }

    /// Guards against a missing decoded input.
    pub fn generate_from(
        &self,
        decoded: Option<&DecodedPolicy>,
    ) -> Result<CompiledPolicy, GenerateError> {
        decoded
            .map(|decoded| self.generate(decoded))
            .ok_or(GenerateError::MissingInput)
    }

    /// Builds the policy object model.
    pub fn generate(&self, decoded: &DecodedPolicy) -> CompiledPolicy {
        let mut builder = PolicyBuilder::new(CompiledPolicy::new(&self.module_name, &self.version));
        builder.role_attributes = decoded
            .roles
            .iter()
            .filter_map(|role| match role {
                RoleRow::Attribute { role, .. } => Some(attribute_name(role)),
                RoleRow::Boolean { .. } => None,
            })
            .filter(|attribute| !attribute.is_empty())
            .collect();

        for rule in decoded.policy_rules() {
            self.generate_rule(&mut builder, rule);
        }
        for role in &decoded.roles {
            self.generate_role(&mut builder, role);
        }

        let mut declared = Vec::new();
        for (rule, transition) in decoded.transitions() {
            if let Some(process) = self.generate_transition(&mut builder, rule, transition) {
                declared.push(process);
            }
        }

        if self.auto_transitions {
            // Built after the transition rules so their execute grants count.
            let inferer = AutoTransitionInferer::from_allow_rules(builder.all_allow_rules());
            let inferred = inferer.infer(&declared);
            for (condition, allow) in inferred.allow_rules {
                builder.allow(condition.as_ref(), allow);
            }
            builder.policy.auto_transitions = inferred.rules;

            let graph = TransitionGraph::from_rules(&builder.policy.auto_transitions);
            if let Some(cycle) = graph.find_cycle() {
                warn!(cycle = %cycle.join(" -> "), "domain transition loop");
            }
        }

        let policy = builder.finish();
        info!(
            module = %policy.module_name,
            types = policy.types.len(),
            allow_rules = policy.allow_rules.len(),
            type_transitions = policy.type_transitions.len(),
            file_contexts = policy.file_contexts.len(),
            conditionals = policy.conditionals.len(),
            auto_transitions = policy.auto_transitions.len(),
            "generation complete"
        );
        policy
    }

    // ========================================================================
    // Ordinary rules
    // ========================================================================

    fn generate_rule(&self, builder: &mut PolicyBuilder, rule: &DecodedRule) {
        if rule.parsed_effect() != Some(Effect::Allow) {
            debug!(rule = %rule.describe(), "deny rule generates nothing");
            return;
        }

        let domain = self.types.subject_to_type(&rule.subject);
        builder.declare(TypeDecl::new(&domain).with_attribute(DOMAIN));

        let mapping = self.actions.map(&rule.action, Some(&rule.class));
        let condition = rule.condition.as_ref();

        if is_capability_class(&mapping.class) {
            for capability in &mapping.permissions {
                builder.policy.capabilities.push(CapabilityGrant {
                    domain: domain.clone(),
                    capability: capability.clone(),
                });
            }
            builder.allow(
                condition,
                AllowRule::new(&domain, SELF_TARGET, &mapping.class, mapping.permissions),
            );
            return;
        }

        let target = match &rule.object_ref {
            ObjectRef::Path(path) => self.path_type(builder, path, rule),
            ObjectRef::Network { protocol, port } => {
                self.port_type(builder, *protocol, port)
            }
            ObjectRef::Port(port) => {
                let protocol = Protocol::from_socket_class(&mapping.class).unwrap_or(Protocol::Tcp);
                self.port_type(builder, protocol, port)
            }
            ObjectRef::Token(token) => self.token_type(builder, token, &mapping.class),
        };

        builder.allow(
            condition,
            AllowRule::new(domain, target, mapping.class, mapping.permissions),
        );
    }

    /// Declares the type of a path object and its file-context entry.
    fn path_type(&self, builder: &mut PolicyBuilder, path: &str, rule: &DecodedRule) -> String {
        let name = self.types.path_to_type(path);
        builder.declare(
            TypeDecl::new(&name)
                .with_attributes(self.types.infer_attributes(path))
                .with_comment(format!("files matching {path}")),
        );

        if self.file_contexts {
            builder.policy.file_contexts.push(
                FileContextEntry::new(
                    self.paths.compile_pattern(path),
                    self.paths.infer_file_type(path),
                    &name,
                )
                .with_comment(rule.describe()),
            );
        }
        name
    }

    fn port_type(&self, builder: &mut PolicyBuilder, protocol: Protocol, port: &str) -> String {
        let name = self.types.port_type(port);
        builder.declare(TypeDecl::new(&name).with_attribute(PORT_TYPE));
        builder.policy.port_bindings.push(PortBinding {
            protocol,
            port: port.to_string(),
            type_name: name.clone(),
        });
        name
    }

    /// Resolves a bare-token object. Type names (`_t`) are declared; role
    /// attributes and other tokens are used verbatim.
    fn token_type(&self, builder: &mut PolicyBuilder, token: &str, class: &str) -> String {
        if token == SELF_TARGET
            || builder.role_attributes.contains(token)
            || !token.ends_with(TYPE_SUFFIX)
        {
            debug!(%token, "token object used as an attribute");
            return token.to_string();
        }
        let name = token.to_string();
        let mut decl = TypeDecl::new(&name);
        if class == PROCESS_CLASS {
            decl = decl.with_attribute(DOMAIN);
        } else if is_executable_type(&name) {
            decl = decl.with_attribute(EXEC_TYPE);
        } else if is_file_like_class(class) {
            decl = decl.with_attribute(FILE_TYPE);
        }
        builder.declare(decl);
        name
    }

    // ========================================================================
    // Roles and transitions
    // ========================================================================

    fn generate_role(&self, builder: &mut PolicyBuilder, role: &RoleRow) {
        match role {
            RoleRow::Attribute { member, role } => {
                let attribute = attribute_name(role);
                if attribute.is_empty() {
                    debug!(%member, %role, "role without a usable attribute name");
                    return;
                }
                builder.declare(
                    TypeDecl::new(self.types.subject_to_type(member)).with_attribute(attribute),
                );
            }
            RoleRow::Boolean { name, default } => {
                builder.booleans.insert(name.clone(), *default);
            }
        }
    }

    /// Emits a declared transition. Process transitions are returned for
    /// auto-transition inference.
    fn generate_transition(
        &self,
        builder: &mut PolicyBuilder,
        rule: &DecodedRule,
        transition: &TransitionInfo,
    ) -> Option<DeclaredTransition> {
        let source = self.types.subject_to_type(&transition.source_type);
        let new_type = ensure_type_suffix(&transition.new_type);
        let target = match &rule.object_ref {
            ObjectRef::Path(path) => self.path_type(builder, path, rule),
            _ => ensure_type_suffix(&transition.target_type),
        };
        let condition = rule.condition.as_ref();

        builder.declare(TypeDecl::new(&source).with_attribute(DOMAIN));
        builder.policy.type_transitions.push(TypeTransitionRule::new(
            &source,
            &target,
            &transition.class,
            &new_type,
        ));

        if !transition.is_process() {
            builder.declare(TypeDecl::new(&new_type).with_attribute(FILE_TYPE));
            return None;
        }

        builder.declare(TypeDecl::new(&new_type).with_attribute(DOMAIN));
        builder.declare(TypeDecl::new(&target).with_attribute(EXEC_TYPE));

        builder.allow(condition, AllowRule::new(&source, &target, FILE_CLASS, ["execute"]));
        builder.allow(
            condition,
            AllowRule::new(&source, &new_type, PROCESS_CLASS, ["transition"]),
        );
        builder.allow(
            condition,
            AllowRule::new(&new_type, &target, FILE_CLASS, ["entrypoint"]),
        );

        Some(DeclaredTransition::new(source, target, new_type).with_condition(rule.condition.clone()))
    }
}

// ============================================================================
// PolicyBuilder
// ============================================================================

/// Accumulates fragments, merging type declarations by name.
struct PolicyBuilder {
    policy: CompiledPolicy,
    type_index: BTreeMap<String, usize>,
    conditionals: BTreeMap<Condition, Vec<AllowRule>>,
    booleans: BTreeMap<String, bool>,
    role_attributes: BTreeSet<String>,
}

impl PolicyBuilder {
    fn new(policy: CompiledPolicy) -> Self {
        Self {
            policy,
            type_index: BTreeMap::new(),
            conditionals: BTreeMap::new(),
            booleans: BTreeMap::new(),
            role_attributes: BTreeSet::new(),
        }
    }

    fn declare(&mut self, decl: TypeDecl) {
        match self.type_index.get(&decl.name) {
            Some(&index) => {
                let existing = &mut self.policy.types[index];
                existing.attributes.extend(decl.attributes);
                if existing.comment.is_none() {
                    existing.comment = decl.comment;
                }
            }
            None => {
                self.type_index
                    .insert(decl.name.clone(), self.policy.types.len());
                self.policy.types.push(decl);
            }
        }
    }

    fn allow(&mut self, condition: Option<&Condition>, rule: AllowRule) {
        if rule.permissions.is_empty() {
            return;
        }
        match condition {
            Some(condition) => self
                .conditionals
                .entry(condition.clone())
                .or_default()
                .push(rule),
            None => self.policy.allow_rules.push(rule),
        }
    }

    fn all_allow_rules(&self) -> impl Iterator<Item = &AllowRule> {
        self.policy
            .allow_rules
            .iter()
            .chain(self.conditionals.values().flatten())
    }

    fn finish(mut self) -> CompiledPolicy {
        // Guards referencing an undeclared boolean get a `false` default.
        for condition in self.conditionals.keys() {
            if !self.booleans.contains_key(&condition.boolean) {
                debug!(boolean = %condition.boolean, "declaring implicit boolean");
                self.booleans.insert(condition.boolean.clone(), false);
            }
        }

        self.policy.booleans = self
            .booleans
            .into_iter()
            .map(|(name, default)| BooleanDecl { name, default })
            .collect();
        self.policy.conditionals = self
            .conditionals
            .into_iter()
            .map(|(condition, rules)| ConditionalBlock { condition, rules })
            .collect();
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use selforge_types::{FileType, RawRule};

    fn generate_with(generator: &Generator, lines: &[&str]) -> CompiledPolicy {
        let rows: Vec<RawRule> = lines.iter().filter_map(|l| RawRule::from_csv(l)).collect();
        generator.generate(&decode(&rows).expect("decode"))
    }

    fn generate(lines: &[&str]) -> CompiledPolicy {
        generate_with(&Generator::new("httpd", "1.0.0"), lines)
    }

    #[test]
    fn path_rule_produces_type_allow_and_file_context() {
        let policy = generate(&["p, httpd_t, /var/www/html/*, read, file, allow"]);

        let decl = policy.find_type("httpd_var_www_html_t").expect("object type");
        assert_eq!(
            decl.attributes.iter().collect::<Vec<_>>(),
            vec!["file_type", "httpdcontent"]
        );
        assert!(policy.find_type("httpd_t").expect("domain").has_attribute("domain"));

        let allow = policy
            .find_allow("httpd_t", "httpd_var_www_html_t", "file")
            .expect("allow");
        assert_eq!(allow.permissions, vec!["read", "open", "getattr"]);

        assert_eq!(policy.file_contexts.len(), 1);
        let fc = &policy.file_contexts[0];
        assert_eq!(fc.pattern, "/var/www/html(/.*)?");
        assert_eq!(fc.file_type, FileType::AllFiles);
        assert_eq!(fc.target_type, "httpd_var_www_html_t");
    }

    #[test]
    fn deny_rules_generate_nothing() {
        let policy = generate(&["p, httpd_t, /etc/shadow, read, file, deny"]);
        assert!(policy.types.is_empty());
        assert!(policy.allow_rules.is_empty());
        assert!(policy.file_contexts.is_empty());
    }

    #[test]
    fn duplicate_types_are_merged_by_name() {
        let policy = generate(&[
            "p, httpd_t, /var/log/httpd/*, write, file, allow",
            "p, httpd_t, /var/log/httpd/*, read, file, allow",
            "g, httpd_t, web_domain",
        ]);
        assert_eq!(policy.types.len(), 2);
        let domain = policy.find_type("httpd_t").expect("domain");
        assert!(domain.has_attribute("domain"));
        assert!(domain.has_attribute("web_domain"));
        assert_eq!(policy.allow_rules.len(), 2);
    }

    #[test]
    fn port_objects() {
        let policy = generate(&[
            "p, httpd_t, 8080, bind, allow",
            "p, dns_t, udp:53, sendto, allow",
        ]);
        let tcp = policy.find_allow("httpd_t", "httpd_port_8080_t", "tcp_socket").expect("tcp");
        assert_eq!(tcp.permissions, vec!["bind", "name_bind"]);
        assert!(policy.find_type("httpd_port_53_t").expect("port").has_attribute("port_type"));
        assert_eq!(
            policy.port_bindings,
            vec![
                PortBinding {
                    protocol: Protocol::Tcp,
                    port: "8080".into(),
                    type_name: "httpd_port_8080_t".into()
                },
                PortBinding {
                    protocol: Protocol::Udp,
                    port: "53".into(),
                    type_name: "httpd_port_53_t".into()
                },
            ]
        );
    }

    #[test]
    fn capability_rules() {
        let policy = generate(&["p, httpd_t, httpd_t, net_bind_service, capability, allow"]);
        assert_eq!(
            policy.capabilities,
            vec![CapabilityGrant {
                domain: "httpd_t".into(),
                capability: "net_bind_service".into()
            }]
        );
        let allow = policy.find_allow("httpd_t", "self", "capability").expect("allow");
        assert_eq!(allow.permissions, vec!["net_bind_service"]);
    }

    #[test]
    fn token_objects() {
        let policy = generate(&[
            "p, httpd_t, etc_t, read, file, allow",
            "p, httpd_t, cgi_t, signal, allow",
            "p, httpd_t, php_exec_t, execute, file, allow",
        ]);
        assert!(policy.find_type("etc_t").expect("etc").has_attribute("file_type"));
        assert!(policy.find_type("cgi_t").expect("cgi").has_attribute("domain"));
        assert!(policy.find_type("php_exec_t").expect("php").has_attribute("exec_type"));
        assert!(policy.find_allow("httpd_t", "cgi_t", "process").is_some());
    }

    #[test]
    fn attribute_tokens_are_used_verbatim() {
        let policy = generate(&[
            "g, httpd_t, web_domain",
            "g, sshd_t, login_t",
            "p, init_t, web_domain, signal, allow",
            "p, init_t, login_t, signal, allow",
            "p, init_t, tcp_socket, read, allow",
        ]);

        let signal = policy.find_allow("init_t", "web_domain", "process").expect("attribute target");
        assert_eq!(signal.permissions, vec!["signal"]);
        assert!(policy.find_allow("init_t", "login_t", "process").is_some());
        assert!(policy.find_allow("init_t", "tcp_socket", "file").is_some());

        assert!(policy.find_type("web_domain").is_none());
        assert!(policy.find_type("web_domain_t").is_none());
        assert!(policy.find_type("tcp_socket_t").is_none());
        assert!(policy.find_type("login_t").is_none());
        assert!(policy.find_type("sshd_t").expect("member").has_attribute("login_t"));
    }

    #[test]
    fn conditional_rules_and_booleans() {
        let policy = generate(&[
            "p, httpd_t, /srv/upload/*, write, file, allow, httpd_upload",
            "p, httpd_t, /srv/cache/*, write, file, allow, !httpd_read_only",
            "g, bool:httpd_upload, true",
        ]);
        assert!(policy.allow_rules.is_empty());
        assert_eq!(policy.conditionals.len(), 2);
        assert_eq!(policy.conditionals[0].condition, Condition::negated("httpd_read_only"));
        assert_eq!(
            policy.booleans,
            vec![
                BooleanDecl { name: "httpd_read_only".into(), default: false },
                BooleanDecl { name: "httpd_upload".into(), default: true },
            ]
        );
    }

    #[test]
    fn process_transition_emits_derived_rules() {
        let generator = Generator::new("httpd", "1.0.0").with_auto_transitions(false);
        let policy = generate_with(&generator, &["p2, init_t, httpd_exec_t, transition, httpd_t"]);

        assert_eq!(
            policy.type_transitions,
            vec![TypeTransitionRule::new("init_t", "httpd_exec_t", "process", "httpd_t")]
        );
        assert!(policy.find_allow("init_t", "httpd_exec_t", "file").is_some());
        assert!(policy.find_allow("init_t", "httpd_t", "process").is_some());
        assert!(policy.find_allow("httpd_t", "httpd_exec_t", "file").is_some());
        assert!(policy.find_type("httpd_exec_t").expect("entry").has_attribute("exec_type"));
        assert!(policy.auto_transitions.is_empty());
    }

    #[test]
    fn file_transition_declares_new_file_type() {
        let policy = generate(&["p2, httpd_t, tmp_t, transition::file, httpd_tmp_t"]);
        assert_eq!(policy.type_transitions[0].class, "file");
        assert!(policy.find_type("httpd_tmp_t").expect("new").has_attribute("file_type"));
        assert_eq!(policy.allow_rules.len(), 0);
    }

    #[test]
    fn declared_transition_grants_execute_for_inference() {
        let policy = generate(&["p2, init_t, httpd_exec_t, transition, httpd_t"]);
        assert_eq!(policy.auto_transitions.len(), 1);
        assert_eq!(policy.auto_transitions[0].source_domain, "init_t");
        assert_eq!(policy.auto_transitions[0].target_domain, "httpd_t");
        assert!(policy.find_allow("httpd_t", "init_t", "process").is_some());
    }

    #[test]
    fn conditional_transition_infers_inside_its_block() {
        let policy = generate(&["p2, init_t, app_exec_t, transition, app_t, app_enabled"]);
        assert!(policy.allow_rules.is_empty());
        assert_eq!(
            policy.auto_transitions[0].conditions,
            vec![Condition::new("app_enabled")]
        );
        let block = &policy.conditionals[0];
        assert!(block.rules.iter().any(|r| r.key() == ("app_t", "self", "process")));
    }

    #[test]
    fn file_contexts_can_be_disabled() {
        let generator = Generator::new("httpd", "1.0.0").with_file_contexts(false);
        let policy = generate_with(&generator, &["p, httpd_t, /var/www/*, read, file, allow"]);
        assert!(policy.file_contexts.is_empty());
        assert!(policy.find_type("httpd_var_www_t").is_some());
    }

    #[test]
    fn missing_input_is_rejected() {
        let generator = Generator::new("httpd", "1.0.0");
        assert_eq!(generator.generate_from(None), Err(GenerateError::MissingInput));
        assert!(generator.generate_from(Some(&DecodedPolicy::default())).is_ok());
    }

    #[test]
    fn path_mapper_overrides_apply() {
        let generator = Generator::new("app", "1.0.0")
            .with_path_mapper(PathMapper::new().with_override("/opt/app/run", FileType::Pipe));
        let policy = generate_with(&generator, &["p, app_t, /opt/app/run, write, file, allow"]);
        assert_eq!(policy.file_contexts[0].file_type, FileType::Pipe);
    }
}
