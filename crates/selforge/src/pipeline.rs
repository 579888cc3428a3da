//! The compile pipeline: Decode → Analyze → Generate → Optimize.
//!
//! Each invocation builds fresh mappers from its [`CompileOptions`]. Any
//! stage error aborts the rest; conflicts ride along with a successful
//! result.

use std::collections::BTreeMap;

use selforge_config::SelforgeConfig;
use selforge_types::{CompiledPolicy, FileType, ModelDefinition, RawRule};
use tracing::{info, info_span, instrument};

use crate::analyzer::{Analyzer, Conflict, Statistics};
use crate::decoder;
use crate::error::{CompileError, Result};
use crate::generator::Generator;
use crate::mapping::{ActionMapper, ActionMapping, PathMapper};
use crate::optimizer::{OptimizationReport, Optimizer};

/// In-memory compile settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    pub module_name: String,
    pub version: String,
    pub extended_globs: bool,
    pub auto_transitions: bool,
    pub file_contexts: bool,
    pub optimize: bool,
    pub eliminate_redundant: bool,
    pub prune_unused_types: bool,
    pub action_overrides: BTreeMap<String, ActionMapping>,
    pub file_type_overrides: BTreeMap<String, FileType>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            module_name: "local".to_string(),
            version: "1.0.0".to_string(),
            extended_globs: false,
            auto_transitions: true,
            file_contexts: true,
            optimize: true,
            eliminate_redundant: true,
            prune_unused_types: true,
            action_overrides: BTreeMap::new(),
            file_type_overrides: BTreeMap::new(),
        }
    }
}

impl CompileOptions {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_extended_globs(mut self, enabled: bool) -> Self {
        self.extended_globs = enabled;
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

    pub fn with_optimizer(mut self, enabled: bool) -> Self {
        self.optimize = enabled;
        self
    }

    pub fn with_action_override<I, S>(
        mut self,
        action: impl Into<String>,
        class: impl Into<String>,
        permissions: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.action_overrides.insert(
            action.into(),
            ActionMapping {
                class: class.into(),
                permissions: permissions.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    pub fn with_file_type_override(mut self, path: impl Into<String>, file_type: FileType) -> Self {
        self.file_type_overrides.insert(path.into(), file_type);
        self
    }

    /// Validates and converts loaded configuration, rejecting unknown
    /// file-type names.
    pub fn from_config(config: &SelforgeConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CompileError::Config(e.to_string()))?;

        let mut file_type_overrides = BTreeMap::new();
        for (path, name) in &config.file_types {
            let file_type = FileType::parse(name).ok_or_else(|| {
                CompileError::Config(format!("file_types.\"{path}\": unknown file type '{name}'"))
            })?;
            file_type_overrides.insert(path.clone(), file_type);
        }

        let action_overrides = config
            .actions
            .iter()
            .map(|(action, spec)| {
                (
                    action.clone(),
                    ActionMapping {
                        class: spec.class.clone(),
                        permissions: spec.permissions.clone(),
                    },
                )
            })
            .collect();

        Ok(Self {
            module_name: config.module.name.clone(),
            version: config.module.version.clone(),
            extended_globs: config.analyzer.extended_globs,
            auto_transitions: config.generator.auto_transitions,
            file_contexts: config.generator.file_contexts,
            optimize: config.optimizer.enabled,
            eliminate_redundant: config.optimizer.eliminate_redundant,
            prune_unused_types: config.optimizer.prune_unused_types,
            action_overrides,
            file_type_overrides,
        })
    }
}

/// Everything a successful compile produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub policy: CompiledPolicy,
    pub conflicts: Vec<Conflict>,
    pub statistics: Statistics,
    /// `None` when the optimizer is disabled.
    pub report: Option<OptimizationReport>,
}

/// One configured compile invocation.
#[derive(Debug, Clone)]
pub struct Compiler {
    analyzer: Analyzer,
    generator: Generator,
    optimizer: Option<Optimizer>,
}

impl Compiler {
    /// Builds fresh mappers from `options`. Fails on an action override
    /// without a class or permissions.
    pub fn new(options: &CompileOptions) -> Result<Self> {
        let mut actions = ActionMapper::new();
        for (action, mapping) in &options.action_overrides {
            actions.register_override(action, &mapping.class, mapping.permissions.iter())?;
        }

        let mut paths = PathMapper::new();
        for (path, file_type) in &options.file_type_overrides {
            paths.register_override(path, *file_type);
        }

        let generator = Generator::new(&options.module_name, &options.version)
            .with_action_mapper(actions)
            .with_path_mapper(paths)
            .with_auto_transitions(options.auto_transitions)
            .with_file_contexts(options.file_contexts);

        let optimizer = options.optimize.then(|| {
            Optimizer::new()
                .with_redundancy_elimination(options.eliminate_redundant)
                .with_type_pruning(options.prune_unused_types)
        });

        Ok(Self {
            analyzer: Analyzer::new().with_extended_globs(options.extended_globs),
            generator,
            optimizer,
        })
    }

    /// Runs every stage over `rows`.
    #[instrument(skip_all, fields(rows = rows.len()))]
    pub fn compile(&self, model: &ModelDefinition, rows: &[RawRule]) -> Result<CompileOutput> {
        let decoded = {
            let _span = info_span!("decode").entered();
            decoder::decode(rows)?
        };

        let analysis = {
            let _span = info_span!("analyze").entered();
            self.analyzer.analyze(model, &decoded)?
        };

        let mut policy = {
            let _span = info_span!("generate").entered();
            self.generator.generate_from(Some(&decoded))?
        };

        let report = self.optimizer.map(|optimizer| {
            let _span = info_span!("optimize").entered();
            optimizer.optimize(&mut policy)
        });

        info!(
            module = %policy.module_name,
            types = policy.types.len(),
            rules = policy.rule_count(),
            conflicts = analysis.conflicts.len(),
            "compile complete"
        );

        Ok(CompileOutput {
            policy,
            conflicts: analysis.conflicts,
            statistics: analysis.statistics,
            report,
        })
    }
}

/// Compiles `rows` against `model` with fresh mappers.
pub fn compile(
    model: &ModelDefinition,
    rows: &[RawRule],
    options: &CompileOptions,
) -> Result<CompileOutput> {
    Compiler::new(options)?.compile(model, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerateError;

    #[test]
    fn options_from_default_config() {
        let options = CompileOptions::from_config(&SelforgeConfig::default()).expect("options");
        assert_eq!(options, CompileOptions::default());
    }

    #[test]
    fn options_from_config_convert_overrides() {
        let config = SelforgeConfig::from_toml_str(
            r#"
[module]
name = "httpd"
version = "2.1.0"

[analyzer]
extended_globs = true

[optimizer]
enabled = false

[actions.serve]
class = "file"
permissions = ["read", "getattr"]

[file_types]
"/srv/app.sock" = "socket"
"/srv/app.fifo" = "-p"
"#,
        )
        .expect("config");

        let options = CompileOptions::from_config(&config).expect("options");
        assert_eq!(options.module_name, "httpd");
        assert_eq!(options.version, "2.1.0");
        assert!(options.extended_globs);
        assert!(!options.optimize);
        assert_eq!(options.action_overrides["serve"].permissions, vec!["read", "getattr"]);
        assert_eq!(options.file_type_overrides["/srv/app.sock"], FileType::Socket);
        assert_eq!(options.file_type_overrides["/srv/app.fifo"], FileType::Pipe);
    }

    #[test]
    fn unknown_file_type_is_a_config_error() {
        let mut config = SelforgeConfig::default();
        config
            .file_types
            .insert("/srv/x".to_string(), "door".to_string());
        let err = CompileOptions::from_config(&config).expect_err("unknown file type");
        assert!(matches!(err, CompileError::Config(message) if message.contains("door")));
    }

    #[test]
    fn invalid_config_is_rejected_before_conversion() {
        let config = SelforgeConfig::from_toml_str(
            r#"
[actions.serve]
class = "file"
permissions = []
"#,
        )
        .expect("config");
        let err = CompileOptions::from_config(&config).expect_err("empty permissions");
        assert!(matches!(err, CompileError::Config(message) if message.contains("actions.serve")));
    }

    #[test]
    fn empty_action_override_fails_the_compile() {
        let rows = [RawRule::new("p", ["app_t", "/data/*", "serve", "file", "allow"])];
        let options =
            CompileOptions::new("app").with_action_override("serve", "file", Vec::<String>::new());
        let err = compile(&ModelDefinition::standard(), &rows, &options).expect_err("override");
        assert!(matches!(
            err,
            CompileError::Generate(GenerateError::InvalidOverride { ref action, .. }) if action == "serve"
        ));
    }

    #[test]
    fn disabled_optimizer_reports_nothing() {
        let rows = [RawRule::new("p", ["app_t", "/data/*", "read", "file", "allow"])];
        let output = compile(
            &ModelDefinition::standard(),
            &rows,
            &CompileOptions::new("app").with_optimizer(false),
        )
        .expect("compile");
        assert!(output.report.is_none());
        assert_eq!(output.policy.module_name, "app");
    }

    #[test]
    fn action_overrides_reach_the_generator() {
        let rows = [RawRule::new("p", ["app_t", "/data/*", "serve", "file", "allow"])];
        let options = CompileOptions::new("app").with_action_override("serve", "file", ["read", "map"]);
        let output = compile(&ModelDefinition::standard(), &rows, &options).expect("compile");
        let allow = output
            .policy
            .find_allow("app_t", "app_data_t", "file")
            .expect("allow");
        assert_eq!(allow.permissions, vec!["map", "open", "read"]);
    }
}
