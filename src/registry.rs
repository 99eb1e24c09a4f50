use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Result, bail};

use crate::config::LanguageProfileConfig;

/// Declarative description of how one language is built and run.
///
/// Profiles are created once at startup and never mutated afterwards. Command
/// fields are templates; see [`CommandContext`] for the supported
/// placeholders.
#[derive(Debug, Clone)]
pub struct LanguageProfile {
    pub name: String,
    /// Matching file extensions, lowercase, without the leading dot.
    pub extensions: Vec<String>,
    /// File names recognized as the conventional entry point.
    pub entry_names: Vec<String>,
    /// Compile command template. `None` means the language is interpreted.
    pub compile_command: Option<Vec<String>>,
    /// Run command template.
    pub run_command: Vec<String>,
    pub run_timeout: Duration,
    pub memory_limit_kb: Option<u64>,
    /// Also apply the ceiling as a hard `RLIMIT_AS` at exec time. Only safe
    /// for native binaries: VM runtimes (JVM, V8) reserve multi-hundred-MB
    /// virtual ranges at startup and crash under an address-space cap, so
    /// they keep the sampled RSS ceiling only.
    pub hard_address_limit: bool,
    /// Expected wall-clock time of a well-behaved submission, used as the
    /// reference point for the execution speed bonus.
    pub baseline: Duration,
}

impl LanguageProfile {
    pub fn needs_compile(&self) -> bool {
        self.compile_command.is_some()
    }

    pub fn matches_extension(&self, extension: &str) -> bool {
        self.extensions.iter().any(|e| e == &extension.to_lowercase())
    }

    pub fn is_entry_name(&self, file_name: &str) -> bool {
        self.entry_names.iter().any(|n| n == file_name)
    }
}

/// Placeholder values substituted into profile command templates.
///
/// Supported placeholders: `%INPUT%` (entry source file), `%OUTPUT%` (built
/// artifact), `%CLASS%` (entry file stem, for bytecode runtimes) and `%DIR%`
/// (the run working directory).
pub struct CommandContext {
    pub input: String,
    pub output: String,
    pub class_name: String,
    pub dir: String,
}

impl CommandContext {
    pub fn expand(&self, template: &[String]) -> Vec<String> {
        let mut mapping = HashMap::<&str, &str>::new();
        mapping.insert("%INPUT%", &self.input);
        mapping.insert("%OUTPUT%", &self.output);
        mapping.insert("%CLASS%", &self.class_name);
        mapping.insert("%DIR%", &self.dir);

        template
            .iter()
            .map(|s| {
                let mut t = s.clone();
                for (k, v) in mapping.iter() {
                    t = t.replace(k, v);
                }
                t
            })
            .collect()
    }
}

/// Static mapping from file extension to language profile.
///
/// Adding a language is a data change here (or a config entry), never a new
/// code path downstream: every stage consumes the same uniform profile.
pub struct ToolchainRegistry {
    profiles: Vec<LanguageProfile>,
}

const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_BASELINE: Duration = Duration::from_secs(1);
const DEFAULT_MEMORY_LIMIT_KB: u64 = 262_144;

impl ToolchainRegistry {
    /// Registry with the built-in profiles: C, C++, Java, Python and
    /// JavaScript, covering compiled-native, compiled-to-bytecode and
    /// interpreted toolchains.
    pub fn with_defaults() -> Self {
        let profile = |name: &str,
                       extensions: &[&str],
                       entry_names: &[&str],
                       compile: Option<&[&str]>,
                       run: &[&str],
                       hard_address_limit: bool| {
            LanguageProfile {
                name: name.to_string(),
                extensions: extensions.iter().map(|s| s.to_string()).collect(),
                entry_names: entry_names.iter().map(|s| s.to_string()).collect(),
                compile_command: compile.map(|c| c.iter().map(|s| s.to_string()).collect()),
                run_command: run.iter().map(|s| s.to_string()).collect(),
                run_timeout: DEFAULT_RUN_TIMEOUT,
                memory_limit_kb: Some(DEFAULT_MEMORY_LIMIT_KB),
                hard_address_limit,
                baseline: DEFAULT_BASELINE,
            }
        };

        let profiles = vec![
            profile(
                "C",
                &["c"],
                &["main.c"],
                Some(&["gcc", "%INPUT%", "-O2", "-o", "%OUTPUT%"]),
                &["%OUTPUT%"],
                true,
            ),
            profile(
                "C++",
                &["cpp", "cc", "cxx"],
                &["main.cpp", "main.cc", "main.cxx"],
                Some(&["g++", "%INPUT%", "-O2", "-o", "%OUTPUT%"]),
                &["%OUTPUT%"],
                true,
            ),
            profile(
                "Java",
                &["java"],
                &["Main.java", "main.java"],
                Some(&["javac", "-d", "%DIR%", "%INPUT%"]),
                &["java", "-cp", "%DIR%", "%CLASS%"],
                false,
            ),
            profile(
                "Python",
                &["py"],
                &["main.py"],
                None,
                &["python3", "%INPUT%"],
                false,
            ),
            profile(
                "JavaScript",
                &["js"],
                &["main.js", "index.js"],
                None,
                &["node", "%INPUT%"],
                false,
            ),
        ];

        Self { profiles }
    }

    /// Builds a registry from the defaults plus configuration entries.
    ///
    /// An entry whose name matches a built-in profile patches that profile;
    /// any other entry appends a new language and must carry a run command.
    pub fn with_config(entries: &[LanguageProfileConfig]) -> Result<Self> {
        let mut registry = Self::with_defaults();

        for entry in entries {
            match registry
                .profiles
                .iter_mut()
                .find(|p| p.name == entry.name)
            {
                Some(profile) => {
                    if let Some(extensions) = &entry.extensions {
                        profile.extensions =
                            extensions.iter().map(|e| e.to_lowercase()).collect();
                    }
                    if let Some(entry_names) = &entry.entry_names {
                        profile.entry_names = entry_names.clone();
                    }
                    if let Some(compile) = &entry.compile_command {
                        profile.compile_command = Some(compile.clone());
                    }
                    if let Some(run) = &entry.run_command {
                        profile.run_command = run.clone();
                    }
                    if let Some(ms) = entry.run_timeout_ms {
                        profile.run_timeout = Duration::from_millis(ms);
                    }
                    if let Some(kb) = entry.memory_limit_kb {
                        profile.memory_limit_kb = Some(kb);
                    }
                    if let Some(hard) = entry.hard_address_limit {
                        profile.hard_address_limit = hard;
                    }
                    if let Some(ms) = entry.baseline_ms {
                        profile.baseline = Duration::from_millis(ms);
                    }
                }
                None => {
                    let Some(run_command) = entry.run_command.clone() else {
                        bail!("language `{}` has no run command", entry.name);
                    };
                    let Some(extensions) = entry.extensions.clone() else {
                        bail!("language `{}` has no extensions", entry.name);
                    };
                    registry.profiles.push(LanguageProfile {
                        name: entry.name.clone(),
                        extensions: extensions.iter().map(|e| e.to_lowercase()).collect(),
                        entry_names: entry.entry_names.clone().unwrap_or_default(),
                        compile_command: entry.compile_command.clone(),
                        run_command,
                        run_timeout: entry
                            .run_timeout_ms
                            .map(Duration::from_millis)
                            .unwrap_or(DEFAULT_RUN_TIMEOUT),
                        memory_limit_kb: entry.memory_limit_kb.or(Some(DEFAULT_MEMORY_LIMIT_KB)),
                        hard_address_limit: entry.hard_address_limit.unwrap_or(false),
                        baseline: entry
                            .baseline_ms
                            .map(Duration::from_millis)
                            .unwrap_or(DEFAULT_BASELINE),
                    });
                }
            }
        }

        Ok(registry)
    }

    /// Pure lookup: the profile owning `extension`, or `None`.
    pub fn resolve(&self, extension: &str) -> Option<&LanguageProfile> {
        let extension = extension.to_lowercase();
        self.profiles
            .iter()
            .find(|p| p.extensions.iter().any(|e| e == &extension))
    }

    /// Resolves the profile for a file path by its extension.
    pub fn resolve_path(&self, path: &Path) -> Option<&LanguageProfile> {
        let extension = path.extension()?.to_str()?;
        self.resolve(extension)
    }

    pub fn profiles(&self) -> &[LanguageProfile] {
        &self.profiles
    }
}
