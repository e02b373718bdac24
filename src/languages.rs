use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::config::LanguageConfig;

/// Working directory inside every isolated environment
pub const WORKDIR: &str = "/workspace";
/// Name of the staged stdin file
pub const INPUT_FILE: &str = "input.txt";

const WORKDIR_PLACEHOLDER: &str = "{workdir}";

/// How to stage, optionally compile, and run code for one language
///
/// Command templates are plain shell strings where `{workdir}` is replaced
/// with the environment's working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub name: String,
    pub image: String,
    pub file_name: String,
    pub compile: Option<String>,
    pub run: String,
}

impl LanguageProfile {
    pub fn new(name: &str, image: &str, file_name: &str, run: &str) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            file_name: file_name.to_string(),
            compile: None,
            run: run.to_string(),
        }
    }

    pub fn with_compile(mut self, compile: &str) -> Self {
        self.compile = Some(compile.to_string());
        self
    }

    /// Builds the shell command, chaining compile and run so a failed compile stops the run
    pub fn build_command(&self, workdir: &str) -> String {
        self.compile
            .iter()
            .chain(std::iter::once(&self.run))
            .map(|template| template.replace(WORKDIR_PLACEHOLDER, workdir))
            .collect::<Vec<_>>()
            .join(" && ")
    }

    fn check(&self) -> Result<(), ProfileError> {
        let missing = |what: &str| ProfileError::MissingReference {
            language: self.name.clone(),
            missing: what.to_string(),
        };

        if normalize(&self.name).is_empty() {
            return Err(ProfileError::EmptyIdentifier);
        }
        if !self.build_command(WORKDIR).contains(&self.file_name) {
            return Err(missing(&self.file_name));
        }
        if !self.run.contains(WORKDIR_PLACEHOLDER) {
            return Err(missing(WORKDIR_PLACEHOLDER));
        }
        if !self.run.contains(INPUT_FILE) {
            return Err(missing(INPUT_FILE));
        }
        Ok(())
    }
}

impl From<&LanguageConfig> for LanguageProfile {
    fn from(config: &LanguageConfig) -> Self {
        Self {
            name: config.name.clone(),
            image: config.image.clone(),
            file_name: config.file_name.clone(),
            compile: config.compile.clone(),
            run: config.run.clone(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("language {0} not supported")]
pub struct UnsupportedLanguage(pub String);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProfileError {
    #[error("language identifiers must not be empty")]
    EmptyIdentifier,
    #[error("command of language {language} does not reference {missing}")]
    MissingReference { language: String, missing: String },
}

/// Case-insensitive lookup table from language identifiers to profiles
///
/// Aliases share the same `Arc`, so every spelling of a language resolves
/// to the identical profile.
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    profiles: HashMap<String, Arc<LanguageProfile>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with python, cpp, java and go
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (profile, aliases) in builtin_profiles() {
            registry
                .register(profile, aliases)
                .expect("built-in language profiles are well-formed");
        }
        registry
    }

    /// Built-in profiles extended or replaced by the configured ones
    pub fn from_config(languages: &[LanguageConfig]) -> Result<Self, ProfileError> {
        let mut registry = Self::with_builtin();
        for language in languages {
            let aliases: Vec<&str> = language.aliases.iter().map(String::as_str).collect();
            registry.register(LanguageProfile::from(language), &aliases)?;
        }
        Ok(registry)
    }

    /// Adds a profile under its name and aliases
    ///
    /// Re-registering an existing name replaces the profile behind every
    /// identifier that pointed at the old one.
    pub fn register(
        &mut self,
        profile: LanguageProfile,
        aliases: &[&str],
    ) -> Result<Arc<LanguageProfile>, ProfileError> {
        profile.check()?;
        let key = normalize(&profile.name);
        let profile = Arc::new(profile);

        if let Some(previous) = self.profiles.get(&key).cloned() {
            log::info!("Replacing language profile {key}");
            for entry in self.profiles.values_mut() {
                if Arc::ptr_eq(entry, &previous) {
                    *entry = profile.clone();
                }
            }
        }

        self.profiles.insert(key, profile.clone());
        for alias in aliases {
            let alias = normalize(alias);
            if alias.is_empty() {
                return Err(ProfileError::EmptyIdentifier);
            }
            self.profiles.insert(alias, profile.clone());
        }
        Ok(profile)
    }

    pub fn resolve(&self, identifier: &str) -> Result<Arc<LanguageProfile>, UnsupportedLanguage> {
        self.profiles
            .get(&normalize(identifier))
            .cloned()
            .ok_or_else(|| UnsupportedLanguage(identifier.to_string()))
    }

    /// Canonical language names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.values().map(|p| p.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

fn normalize(identifier: &str) -> String {
    identifier.trim().to_lowercase()
}

fn builtin_profiles() -> [(LanguageProfile, &'static [&'static str]); 4] {
    [
        (
            LanguageProfile::new(
                "python",
                "python:3.11-slim",
                "main.py",
                "python {workdir}/main.py < {workdir}/input.txt",
            ),
            &["py", "python3"],
        ),
        (
            LanguageProfile::new(
                "cpp",
                "gcc:13",
                "main.cpp",
                "{workdir}/program < {workdir}/input.txt",
            )
            .with_compile("g++ -O2 -std=c++17 {workdir}/main.cpp -o {workdir}/program"),
            &["c++", "cxx"],
        ),
        (
            LanguageProfile::new(
                "java",
                "eclipse-temurin:17-jdk",
                "Main.java",
                "cd {workdir} && java Main < input.txt",
            )
            .with_compile("cd {workdir} && javac Main.java"),
            &[],
        ),
        (
            LanguageProfile::new(
                "go",
                "golang:1.23",
                "main.go",
                "{workdir}/program < {workdir}/input.txt",
            )
            .with_compile("cd {workdir} && go build -o program main.go"),
            &["golang"],
        ),
    ]
}
