//! Read-only language descriptors.
//!
//! Population of the registry (discovering installed toolchains, admin
//! configuration) is out of scope; this module is the consumed shape plus
//! a couple of concrete entries needed to exercise the task types.

#[derive(Debug, Clone, Copy)]
pub struct Language {
    pub name: &'static str,
    pub source_extensions: &'static [&'static str],
    pub header_extensions: &'static [&'static str],
    pub object_extensions: &'static [&'static str],
    pub executable_extension: &'static str,
}

impl Language {
    /// The canonical (first-listed) source extension, substituted for the
    /// `%l` placeholder in manager/grader filenames.
    pub fn canonical_source_extension(&self) -> &'static str {
        self.source_extensions[0]
    }

    pub fn has_source_header_or_object_extension(&self, filename: &str) -> bool {
        self.source_extensions.iter().chain(self.header_extensions).chain(self.object_extensions).any(|ext| filename.ends_with(ext))
    }
}

pub const RUST: Language = Language {
    name: "Rust",
    source_extensions: &[".rs"],
    header_extensions: &[],
    object_extensions: &[],
    executable_extension: "",
};

pub const TRIVIAL_SHELL: Language = Language {
    name: "TrivialShell",
    source_extensions: &[".sh"],
    header_extensions: &[],
    object_extensions: &[],
    executable_extension: "",
};

/// Look up a language by the name a job's `language` field carries. The
/// registry itself (discovering installed toolchains from admin
/// configuration) is out of scope; this crate only consumes it.
pub fn lookup(name: &str) -> Option<&'static Language> {
    match name {
        "Rust" => Some(&RUST),
        "TrivialShell" => Some(&TRIVIAL_SHELL),
        _ => None,
    }
}

/// Replace the `%l` placeholder with the language's canonical source
/// extension.
pub fn expand_placeholder(filename: &str, language: &Language) -> String {
    filename.replace("%l", language.canonical_source_extension())
}

/// `compilation_commands(sources, executable) -> list<list<string>>`: one
/// outer element per sequential command (compile, then optionally package).
pub fn compilation_commands(language: &Language, sources: &[String], executable: &str) -> Vec<Vec<String>> {
    match language.name {
        "Rust" => {
            vec![vec!["/usr/bin/rustc".to_string(), "-O".to_string(), "-o".to_string(), executable.to_string(), sources[0].clone()]]
        }
        "TrivialShell" => {
            vec![vec!["/bin/cp".to_string(), sources[0].clone(), executable.to_string()], vec![
                "/bin/chmod".to_string(),
                "755".to_string(),
                executable.to_string(),
            ]]
        }
        other => panic!("no compilation commands known for language {other}"),
    }
}

/// `evaluation_commands(executable, main?, args?) -> list<list<string>>`.
pub fn evaluation_commands(language: &Language, executable: &str, main: Option<&str>, args: &[String]) -> Vec<Vec<String>> {
    let program = match language.name {
        "Rust" | "TrivialShell" => format!("./{}", main.unwrap_or(executable)),
        other => panic!("no evaluation commands known for language {other}"),
    };
    let mut command = vec![program];
    command.extend(args.iter().cloned());
    vec![command]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_expansion_uses_canonical_extension() {
        assert_eq!(expand_placeholder("grader.%l", &RUST), "grader.rs");
    }

    #[test]
    fn rust_compilation_command_matches_toolchain_invocation() {
        let commands = compilation_commands(&RUST, &["sum.rs".to_string()], "sum");
        assert_eq!(commands, vec![vec!["/usr/bin/rustc", "-O", "-o", "sum", "sum.rs"]]);
    }

    #[test]
    fn evaluation_command_defaults_main_to_executable_name() {
        let commands = evaluation_commands(&RUST, "sum", None, &[]);
        assert_eq!(commands, vec![vec!["./sum".to_string()]]);
    }

    #[test]
    fn lookup_resolves_known_language_names() {
        assert_eq!(lookup("Rust").unwrap().name, "Rust");
        assert_eq!(lookup("TrivialShell").unwrap().name, "TrivialShell");
        assert!(lookup("Nonexistent").is_none());
    }
}
