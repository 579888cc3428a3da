//! Action mapper: action name → object class and permission list.
//!
//! The default table is a sorted `const` slice; each mapper turns it into a
//! `BTreeMap` on construction and never mutates it afterwards. Caller
//! overrides take priority over the table.

use std::collections::BTreeMap;

use selforge_types::DIR_CLASS;

use crate::error::GenerateError;

/// One default table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionSpec {
    pub action: &'static str,
    pub class: &'static str,
    pub permissions: &'static [&'static str],
}

const fn spec(
    action: &'static str,
    class: &'static str,
    permissions: &'static [&'static str],
) -> ActionSpec {
    ActionSpec {
        action,
        class,
        permissions,
    }
}

/// Default action table, sorted by action name.
pub const DEFAULT_ACTIONS: &[ActionSpec] = &[
    spec("accept", "tcp_socket", &["accept"]),
    spec("add_name", "dir", &["add_name", "write"]),
    spec("append", "file", &["append", "open"]),
    spec("bind", "tcp_socket", &["bind", "name_bind"]),
    spec("connect", "tcp_socket", &["connect", "name_connect"]),
    spec("create", "file", &["create", "write", "open"]),
    spec("delete", "file", &["unlink"]),
    spec("dyntransition", "process", &["dyntransition"]),
    spec("entrypoint", "file", &["entrypoint"]),
    spec("execute", "file", &["execute", "read", "open", "getattr"]),
    spec("fork", "process", &["fork"]),
    spec("getattr", "file", &["getattr"]),
    spec("ioctl", "file", &["ioctl"]),
    spec("link", "file", &["link"]),
    spec("list", "dir", &["read", "search", "getattr", "open"]),
    spec("listen", "tcp_socket", &["listen"]),
    spec("lock", "file", &["lock"]),
    spec("map", "file", &["map"]),
    spec("mkdir", "dir", &["create", "add_name", "write"]),
    spec("name_bind", "tcp_socket", &["name_bind"]),
    spec("open", "file", &["open"]),
    spec("ptrace", "process", &["ptrace"]),
    spec("read", "file", &["read", "open", "getattr"]),
    spec("recv", "tcp_socket", &["read", "recv_msg"]),
    spec("recvfrom", "udp_socket", &["read", "recvfrom"]),
    spec("relabel", "file", &["relabelfrom", "relabelto"]),
    spec("remove_name", "dir", &["remove_name", "write"]),
    spec("rename", "file", &["rename"]),
    spec("rmdir", "dir", &["rmdir"]),
    spec("search", "dir", &["search", "getattr"]),
    spec("send", "tcp_socket", &["write", "send_msg"]),
    spec("sendto", "udp_socket", &["write", "sendto"]),
    spec("setattr", "file", &["setattr"]),
    spec("sigchld", "process", &["sigchld"]),
    spec("sigkill", "process", &["sigkill"]),
    spec("signal", "process", &["signal"]),
    spec("sigstop", "process", &["sigstop"]),
    spec("transition", "process", &["transition"]),
    spec("unlink", "file", &["unlink"]),
    spec("watch", "file", &["watch"]),
    spec("write", "file", &["write", "append", "open"]),
];

/// File permission → directory permissions, applied when a caller's explicit
/// `dir` class differs from the action's default class.
const DIR_PERMISSION_REWRITES: &[(&str, &[&str])] = &[
    ("create", &["create", "add_name"]),
    ("read", &["read", "search"]),
    ("unlink", &["remove_name"]),
    ("write", &["write", "add_name", "remove_name"]),
];

/// Default class of `action` in the default table.
pub fn default_class(action: &str) -> Option<&'static str> {
    DEFAULT_ACTIONS
        .binary_search_by(|s| s.action.cmp(action))
        .ok()
        .map(|i| DEFAULT_ACTIONS[i].class)
}

/// Resolved class and ordered, duplicate-free permissions for an action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMapping {
    pub class: String,
    pub permissions: Vec<String>,
}

/// Maps actions to classes and permissions.
#[derive(Debug, Clone)]
pub struct ActionMapper {
    defaults: BTreeMap<&'static str, ActionSpec>,
    overrides: BTreeMap<String, ActionMapping>,
}

impl ActionMapper {
    /// Creates a mapper over the default table.
    pub fn new() -> Self {
        Self {
            defaults: DEFAULT_ACTIONS.iter().map(|s| (s.action, *s)).collect(),
            overrides: BTreeMap::new(),
        }
    }

    /// Registers an override (builder form).
    pub fn with_override<I, S>(
        mut self,
        action: impl Into<String>,
        class: impl Into<String>,
        permissions: I,
    ) -> Result<Self, GenerateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.register_override(action, class, permissions)?;
        Ok(self)
    }

    /// Registers an override that takes priority over the default table.
    ///
    /// An override needs a class and at least one permission.
    pub fn register_override<I, S>(
        &mut self,
        action: impl Into<String>,
        class: impl Into<String>,
        permissions: I,
    ) -> Result<(), GenerateError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let action = action.into();
        let class = class.into().trim().to_string();
        let permissions: Vec<String> = dedupe(
            permissions
                .into_iter()
                .map(|p| p.into().trim().to_string())
                .filter(|p| !p.is_empty()),
        );

        let invalid = |reason: &'static str| GenerateError::InvalidOverride {
            action: action.clone(),
            reason,
        };
        if class.is_empty() {
            return Err(invalid("empty class"));
        }
        if permissions.is_empty() {
            return Err(invalid("no permissions"));
        }

        self.overrides
            .insert(action, ActionMapping { class, permissions });
        Ok(())
    }

    pub fn has_mapping(&self, action: &str) -> bool {
        self.overrides.contains_key(action) || self.defaults.contains_key(action)
    }

    /// Maps `action`, optionally under a caller-supplied object class.
    ///
    /// Unknown actions fall back to the supplied class (or `file`) with the
    /// action name itself as the only permission.
    pub fn map(&self, action: &str, class: Option<&str>) -> ActionMapping {
        let class = class.map(str::trim).filter(|c| !c.is_empty());

        let base = if let Some(mapping) = self.overrides.get(action) {
            mapping.clone()
        } else if let Some(spec) = self.defaults.get(action) {
            ActionMapping {
                class: spec.class.to_string(),
                permissions: spec.permissions.iter().map(ToString::to_string).collect(),
            }
        } else {
            return ActionMapping {
                class: class.unwrap_or(selforge_types::FILE_CLASS).to_string(),
                permissions: vec![action.to_string()],
            };
        };

        match class {
            Some(requested) if requested != base.class => {
                let permissions = if requested == DIR_CLASS {
                    rewrite_for_dir(&base.permissions)
                } else {
                    base.permissions
                };
                ActionMapping {
                    class: requested.to_string(),
                    permissions,
                }
            }
            _ => base,
        }
    }
}

impl Default for ActionMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn rewrite_for_dir(permissions: &[String]) -> Vec<String> {
    dedupe(permissions.iter().flat_map(|perm| {
        DIR_PERMISSION_REWRITES
            .iter()
            .find(|(from, _)| *from == perm.as_str())
            .map_or_else(
                || vec![perm.clone()],
                |(_, to)| to.iter().map(ToString::to_string).collect(),
            )
    }))
}

fn dedupe(permissions: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for perm in permissions {
        if !out.contains(&perm) {
            out.push(perm);
        }
    }
    out
}
