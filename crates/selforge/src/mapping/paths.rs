//! Path mapper: glob-style object paths → file-context regex patterns and
//! file types.
//!
//! The rewrite order is load-bearing:
//!
//! 1. Brace groups `{a,b}` expand to `(a|b)` before anything is escaped. The
//!    group syntax is emitted as private-use placeholder characters and only
//!    restored at the very end, so the escaper never touches it.
//! 2. `/**` is handled before `/*`, since `/**` contains `/*`. A trailing
//!    `/**` becomes `(/.*)?`; an embedded one splits the path and the
//!    converted segments are joined with `/.*`.
//! 3. A plain trailing `/*` becomes `(/.*)?` after its converted prefix.
//! 4. Everything else is escaped span by span, leaving `[...]` character
//!    classes untouched, and wildcards are converted: `*` after a class →
//!    `[^/]*`, other `*` → `[^/]+`, `?` → `.`.

use std::collections::BTreeMap;

use selforge_types::FileType;

/// Suffix matching an optional subtree below a directory.
const SUBTREE: &str = "(/.*)?";

/// Replacement for an embedded `/**`.
const ANY_DEPTH: &str = "/.*";

const GROUP_OPEN: char = '\u{E000}';
const GROUP_ALT: char = '\u{E001}';
const GROUP_CLOSE: char = '\u{E002}';

const REGEX_METACHARS: &[char] = &[
    '.', '+', '(', ')', '|', '^', '$', '{', '}', '[', ']', '\\',
];

/// Device-name fragments of block devices under `/dev/`.
const BLOCK_DEVICE_FRAGMENTS: &[&str] = &["sd", "hd", "vd", "nvme", "loop", "dm-"];

/// Directories whose entries are IPC sockets.
const IPC_DIRECTORIES: &[&str] = &[
    "/.X11-unix/",
    "/run/dbus/",
    "/var/run/dbus/",
    "/run/systemd/journal/",
];

const SOCKET_SUFFIXES: &[&str] = &[".sock", ".socket"];

/// Extensions of regular files.
const REGULAR_FILE_EXTENSIONS: &[&str] = &[
    ".cfg", ".conf", ".crt", ".css", ".db", ".htm", ".html", ".ini", ".js", ".json", ".key",
    ".lock", ".log", ".pem", ".pid", ".py", ".service", ".sh", ".so", ".timer", ".txt", ".xml",
    ".yaml", ".yml",
];

/// Compiles paths and infers file types, honouring literal overrides.
#[derive(Debug, Clone, Default)]
pub struct PathMapper {
    overrides: BTreeMap<String, FileType>,
}

impl PathMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a file type for an exact path (builder form).
    pub fn with_override(mut self, path: impl Into<String>, file_type: FileType) -> Self {
        self.register_override(path, file_type);
        self
    }

    /// Registers a file type for an exact path; beats every inference rule.
    pub fn register_override(&mut self, path: impl Into<String>, file_type: FileType) {
        self.overrides.insert(path.into(), file_type);
    }

    /// Converts a glob-style path into a file-context regex.
    pub fn compile_pattern(&self, path: &str) -> String {
        compile_pattern(path)
    }

    /// Infers the file type from the raw, unconverted path.
    pub fn infer_file_type(&self, path: &str) -> FileType {
        if let Some(file_type) = self.overrides.get(path) {
            return *file_type;
        }
        infer_file_type(path)
    }
}

/// Converts a glob-style path into a file-context regex.
pub fn compile_pattern(path: &str) -> String {
    let expanded = expand_braces(path);

    let pattern = if let Some(prefix) = expanded.strip_suffix("/**") {
        if prefix.is_empty() {
            ANY_DEPTH.to_string()
        } else {
            format!("{}{SUBTREE}", convert_segments(prefix))
        }
    } else if expanded.contains("/**") {
        convert_segments(&expanded)
    } else if let Some(prefix) = expanded.strip_suffix("/*") {
        if prefix.is_empty() {
            ANY_DEPTH.to_string()
        } else {
            format!("{}{SUBTREE}", convert_glob(prefix))
        }
    } else {
        convert_glob(&expanded)
    };

    restore_groups(&pattern)
}

/// Infers the file type of a raw path, in priority order.
pub fn infer_file_type(path: &str) -> FileType {
    if path.ends_with('/') {
        return FileType::Directory;
    }
    if path.ends_with("/*") {
        return FileType::AllFiles;
    }
    if let Some(device) = path.strip_prefix("/dev/") {
        let is_block = device.split('/').any(|segment| {
            BLOCK_DEVICE_FRAGMENTS
                .iter()
                .any(|fragment| segment.starts_with(fragment))
        });
        return if is_block {
            FileType::BlockDevice
        } else {
            FileType::CharDevice
        };
    }
    if SOCKET_SUFFIXES.iter().any(|s| path.ends_with(s))
        || IPC_DIRECTORIES.iter().any(|d| path.contains(d))
    {
        return FileType::Socket;
    }
    if REGULAR_FILE_EXTENSIONS.iter().any(|e| path.ends_with(e)) {
        return FileType::Regular;
    }
    FileType::AllFiles
}

// ============================================================================
// Rewrite steps
// ============================================================================

/// Expands `{a,b,c}` into placeholder-delimited `(a|b|c)`. Nested groups
/// expand recursively; an unmatched `{` stays literal.
fn expand_braces(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        if chars[i] == '{' {
            if let Some(close) = matching_brace(&chars, i) {
                let alternatives: Vec<String> = split_alternatives(&chars[i + 1..close])
                    .into_iter()
                    .map(|alt| expand_braces(&alt))
                    .collect();
                out.push(GROUP_OPEN);
                out.push_str(&alternatives.join(&GROUP_ALT.to_string()));
                out.push(GROUP_CLOSE);
                i = close + 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

fn matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (offset, c) in chars[open..].iter().enumerate() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits group content on top-level commas.
fn split_alternatives(content: &[char]) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for &c in content {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

/// Splits on `/**`, converts each segment and joins with `/.*`.
fn convert_segments(path: &str) -> String {
    path.split("/**")
        .map(convert_glob)
        .collect::<Vec<_>>()
        .join(ANY_DEPTH)
}

/// Escapes regex metacharacters outside character classes and converts
/// wildcards.
fn convert_glob(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::with_capacity(glob.len() * 2);
    let mut after_class = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '[' {
            if let Some(end) = class_end(&chars, i) {
                out.extend(&chars[i..=end]);
                after_class = true;
                i = end + 1;
                continue;
            }
        }

        match c {
            '*' if after_class => out.push_str("[^/]*"),
            '*' => out.push_str("[^/]+"),
            '?' => out.push('.'),
            GROUP_OPEN | GROUP_ALT | GROUP_CLOSE => out.push(c),
            c if REGEX_METACHARS.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
        after_class = false;
        i += 1;
    }
    out
}

/// Index of the `]` closing the class opened at `open`, if any.
fn class_end(chars: &[char], open: usize) -> Option<usize> {
    let mut j = open + 1;
    if chars.get(j) == Some(&'^') {
        j += 1;
    }
    // A `]` right after the opener is a literal member.
    if chars.get(j) == Some(&']') {
        j += 1;
    }
    chars[j.min(chars.len())..]
        .iter()
        .position(|&c| c == ']')
        .map(|p| j + p)
}

fn restore_groups(pattern: &str) -> String {
    pattern
        .chars()
        .map(|c| match c {
            GROUP_OPEN => '(',
            GROUP_ALT => '|',
            GROUP_CLOSE => ')',
            c => c,
        })
        .collect()
}
