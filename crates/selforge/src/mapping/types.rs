//! Type mapper: object paths and subject names → type names and attributes.

use std::collections::BTreeSet;

use selforge_types::{PATH_ROOT, TYPE_SUFFIX};

/// Attribute carried by executable types.
pub const EXEC_TYPE: &str = "exec_type";

/// Attribute carried by every non-executable file type.
pub const FILE_TYPE: &str = "file_type";

/// Attribute carried by subject domains.
pub const DOMAIN: &str = "domain";

/// Attribute carried by port types.
pub const PORT_TYPE: &str = "port_type";

/// Type-name suffixes that mark an executable entry point.
pub const EXECUTABLE_SUFFIXES: &[&str] = &["_exec_t", "_bin_t", "_cmd_t", "_program_t"];

/// Characters that end the literal part of a glob.
const GLOB_METACHARS: &[char] = &['*', '?', '[', '{'];

/// Substring rules for attribute inference, checked against the original path.
/// `(attribute, substrings, suffixes)`.
const ATTRIBUTE_RULES: &[(&str, &[&str], &[&str])] = &[
    ("lib_type", &["/lib"], &[]),
    ("logfile", &["/var/log"], &[".log"]),
    ("configfile", &["/etc"], &[".conf", ".cfg"]),
    ("pidfile", &["/var/run", "/run"], &[]),
    ("tmpfile", &["/tmp", "/var/tmp"], &[]),
    ("httpdcontent", &["/var/www", "/srv"], &[]),
];

/// Returns whether `type_name` ends in an executable suffix.
pub fn is_executable_type(type_name: &str) -> bool {
    EXECUTABLE_SUFFIXES
        .iter()
        .any(|suffix| type_name.ends_with(suffix))
}

/// Builds type names under a module prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeMapper {
    prefix: String,
}

impl TypeMapper {
    /// Creates a mapper for `module_name`. The name is sanitized like a path.
    pub fn new(module_name: &str) -> Self {
        Self {
            prefix: sanitize(module_name),
        }
    }

    /// The sanitized module prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `/var/www/html/*` under module `httpd` → `httpd_var_www_html_t`.
    pub fn path_to_type(&self, path: &str) -> String {
        let mut stem = sanitize(base_path(path));
        if stem.is_empty() {
            stem = "root".to_string();
        }

        let mut name = if self.prefix.is_empty()
            || stem == self.prefix
            || stem.starts_with(&format!("{}_", self.prefix))
        {
            stem
        } else {
            format!("{}_{stem}", self.prefix)
        };

        if !name.ends_with(TYPE_SUFFIX) {
            name.push_str(TYPE_SUFFIX);
        }
        name
    }

    /// Appends `_t` unless already present; nothing else changes.
    pub fn subject_to_type(&self, name: &str) -> String {
        ensure_type_suffix(name)
    }

    /// Port type for a port number: `<module>_port_<n>_t`.
    pub fn port_type(&self, port: &str) -> String {
        if self.prefix.is_empty() {
            format!("port_{port}{TYPE_SUFFIX}")
        } else {
            format!("{}_port_{port}{TYPE_SUFFIX}", self.prefix)
        }
    }

    /// Infers attributes from substrings of the original path.
    ///
    /// Executables (`/bin`, `/sbin`) get `exec_type` and never `file_type`;
    /// every other path gets `file_type` plus any matching category.
    pub fn infer_attributes(&self, path: &str) -> BTreeSet<String> {
        let mut attributes = BTreeSet::new();

        let executable = path.contains("/bin") || path.contains("/sbin");
        if executable {
            attributes.insert(EXEC_TYPE.to_string());
        }

        for (attribute, substrings, suffixes) in ATTRIBUTE_RULES {
            if substrings.iter().any(|s| path.contains(s))
                || suffixes.iter().any(|s| path.ends_with(s))
            {
                attributes.insert((*attribute).to_string());
            }
        }

        if !executable {
            attributes.insert(FILE_TYPE.to_string());
        }
        attributes
    }
}

/// Role names become attributes with the same sanitizing as type names.
pub fn attribute_name(role: &str) -> String {
    sanitize(role)
}

/// Appends `_t` unless `name` already ends with it.
pub fn ensure_type_suffix(name: &str) -> String {
    if name.ends_with(TYPE_SUFFIX) {
        name.to_string()
    } else {
        format!("{name}{TYPE_SUFFIX}")
    }
}

/// Cuts a glob back to its literal directory part.
///
/// `/etc/*.conf` → `/etc/`, `/var/www/**` → `/var/www/`, `/srv/app` → `/srv/app`.
fn base_path(path: &str) -> &str {
    match path.find(GLOB_METACHARS) {
        Some(index) => {
            let literal = &path[..index];
            match literal.rfind(PATH_ROOT) {
                Some(slash) => &literal[..=slash],
                None => "",
            }
        }
        None => path,
    }
}

/// Separators, dashes and dots become underscores; runs of underscores
/// collapse; leading and trailing underscores are dropped.
fn sanitize(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        let c = if matches!(c, '/' | '-' | '.') { '_' } else { c };
        if c == '_' && (out.is_empty() || out.ends_with('_')) {
            continue;
        }
        out.push(c);
    }
    while out.ends_with('_') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("/var/www/html/*" => "httpd_var_www_html_t"; "trailing star")]
    #[test_case("/var/www/html/**" => "httpd_var_www_html_t"; "double star")]
    #[test_case("/etc/*.conf" => "httpd_etc_t"; "star mid segment")]
    #[test_case("//var//log/httpd-access.log" => "httpd_var_log_httpd_access_log_t"; "repeated separators")]
    #[test_case("/etc/httpd/" => "httpd_etc_httpd_t"; "trailing separator")]
    #[test_case("/httpd/data" => "httpd_data_t"; "prefix already present")]
    #[test_case("/srv/cache_t" => "httpd_srv_cache_t"; "suffix already present")]
    #[test_case("/*" => "httpd_root_t"; "root")]
    fn path_to_type(path: &str) -> String {
        TypeMapper::new("httpd").path_to_type(path)
    }

    #[test]
    fn module_prefix_is_sanitized() {
        let mapper = TypeMapper::new("my-app.v2");
        assert_eq!(mapper.prefix(), "my_app_v2");
        assert_eq!(mapper.path_to_type("/opt/x"), "my_app_v2_opt_x_t");
        assert_eq!(mapper.port_type("8080"), "my_app_v2_port_8080_t");
    }

    #[test]
    fn subject_to_type_only_adds_suffix() {
        let mapper = TypeMapper::new("httpd");
        assert_eq!(mapper.subject_to_type("nginx"), "nginx_t");
        assert_eq!(mapper.subject_to_type("httpd_t"), "httpd_t");
        assert_eq!(mapper.subject_to_type("my-daemon"), "my-daemon_t");
    }

    fn attrs(path: &str) -> Vec<String> {
        TypeMapper::new("m").infer_attributes(path).into_iter().collect()
    }

    #[test]
    fn executables_are_not_file_types() {
        assert_eq!(attrs("/usr/bin/httpd"), vec!["exec_type"]);
        assert_eq!(attrs("/usr/sbin/sshd"), vec!["exec_type"]);
    }

    #[test]
    fn category_attributes() {
        assert_eq!(attrs("/var/www/html/*"), vec!["file_type", "httpdcontent"]);
        assert_eq!(attrs("/var/log/app/*"), vec!["file_type", "logfile"]);
        assert_eq!(attrs("/opt/app/out.log"), vec!["file_type", "logfile"]);
        assert_eq!(attrs("/etc/app/*"), vec!["configfile", "file_type"]);
        assert_eq!(attrs("/opt/app.cfg"), vec!["configfile", "file_type"]);
        assert_eq!(attrs("/var/run/app.pid"), vec!["file_type", "pidfile"]);
        assert_eq!(attrs("/tmp/app/*"), vec!["file_type", "tmpfile"]);
        assert_eq!(attrs("/usr/lib/app.so"), vec!["file_type", "lib_type"]);
        assert_eq!(attrs("/opt/data"), vec!["file_type"]);
    }

    #[test]
    fn role_attribute_names() {
        assert_eq!(attribute_name("web-content"), "web_content");
        assert_eq!(attribute_name("daemon.domain"), "daemon_domain");
    }

    #[test]
    fn executable_suffixes() {
        assert!(is_executable_type("httpd_exec_t"));
        assert!(is_executable_type("tool_bin_t"));
        assert!(is_executable_type("run_cmd_t"));
        assert!(is_executable_type("x_program_t"));
        assert!(!is_executable_type("httpd_t"));
        assert!(!is_executable_type("exec_t_file"));
    }
}
