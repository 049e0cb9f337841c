//! Per-language execution plans.
//!
//! The canonical source filename, container image, compile command and
//! run command are fixed per language. Images can be overridden per
//! language with `SANDBOX_IMAGE_{LANGUAGE}` for site-built images.

use crate::error::SandboxError;
use serde::{Deserialize, Serialize};

/// The supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Javascript,
    Typescript,
    Python,
    Java,
    Cpp,
    C,
    Go,
    Rust,
    Ruby,
    Php,
}

/// All supported languages, in API order.
pub const SUPPORTED_LANGUAGES: [Language; 10] = [
    Language::Javascript,
    Language::Typescript,
    Language::Python,
    Language::Java,
    Language::Cpp,
    Language::C,
    Language::Go,
    Language::Rust,
    Language::Ruby,
    Language::Php,
];

impl Language {
    /// Parse a case-folded, trimmed language tag.
    pub fn parse(tag: &str) -> Result<Self, SandboxError> {
        match tag.trim().to_lowercase().as_str() {
            "javascript" => Ok(Self::Javascript),
            "typescript" => Ok(Self::Typescript),
            "python" => Ok(Self::Python),
            "java" => Ok(Self::Java),
            "cpp" => Ok(Self::Cpp),
            "c" => Ok(Self::C),
            "go" => Ok(Self::Go),
            "rust" => Ok(Self::Rust),
            "ruby" => Ok(Self::Ruby),
            "php" => Ok(Self::Php),
            other => Err(SandboxError::UnsupportedLanguage(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Typescript => "typescript",
            Self::Python => "python",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Go => "go",
            Self::Rust => "rust",
            Self::Ruby => "ruby",
            Self::Php => "php",
        }
    }

    /// Blob key extension for stored code.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Javascript => "js",
            Self::Typescript => "ts",
            Self::Python => "py",
            Self::Java => "java",
            Self::Cpp => "cpp",
            Self::C => "c",
            Self::Go => "go",
            Self::Rust => "rs",
            Self::Ruby => "rb",
            Self::Php => "php",
        }
    }

    /// The execution plan for this language.
    pub fn plan(&self) -> LanguagePlan {
        let (default_image, source, compile, run, artifact): (
            &str,
            &str,
            Option<Vec<&str>>,
            Vec<&str>,
            Option<&str>,
        ) = match self {
            Self::Javascript => ("node:20-alpine", "solution.js", None, vec!["node", "solution.js"], None),
            Self::Typescript => (
                "denoland/deno:alpine",
                "solution.ts",
                None,
                vec!["deno", "run", "--quiet", "solution.ts"],
                None,
            ),
            Self::Python => (
                "python:3.12-alpine",
                "solution.py",
                None,
                vec!["python3", "solution.py"],
                None,
            ),
            Self::Java => (
                "eclipse-temurin:21",
                "Solution.java",
                Some(vec!["javac", "Solution.java"]),
                vec!["java", "-XX:+UseSerialGC", "Solution"],
                Some("Solution.class"),
            ),
            Self::Cpp => (
                "gcc:13",
                "solution.cpp",
                Some(vec!["g++", "-O2", "-std=c++17", "-o", "solution", "solution.cpp"]),
                vec!["./solution"],
                Some("solution"),
            ),
            Self::C => (
                "gcc:13",
                "solution.c",
                Some(vec!["gcc", "-O2", "-std=c17", "-o", "solution", "solution.c"]),
                vec!["./solution"],
                Some("solution"),
            ),
            Self::Go => (
                "golang:1.22-alpine",
                "solution.go",
                Some(vec!["go", "build", "-o", "solution", "solution.go"]),
                vec!["./solution"],
                Some("solution"),
            ),
            Self::Rust => (
                "rust:1.82-alpine",
                "solution.rs",
                Some(vec!["rustc", "-O", "-o", "solution", "solution.rs"]),
                vec!["./solution"],
                Some("solution"),
            ),
            Self::Ruby => (
                "ruby:3.3-alpine",
                "solution.rb",
                None,
                vec!["ruby", "solution.rb"],
                None,
            ),
            Self::Php => (
                "php:8.3-cli-alpine",
                "solution.php",
                None,
                vec!["php", "solution.php"],
                None,
            ),
        };

        let image = std::env::var(format!("SANDBOX_IMAGE_{}", self.as_str().to_uppercase()))
            .unwrap_or_else(|_| default_image.to_string());

        // Build caches must land on the tmpfs; the workspace is the only
        // other writable mount and it flips read-only for the run phase.
        let env = match self {
            Self::Go => vec![
                ("GOCACHE".to_string(), "/tmp/gocache".to_string()),
                ("GO111MODULE".to_string(), "off".to_string()),
            ],
            _ => vec![],
        };

        LanguagePlan {
            language: *self,
            image,
            source_filename: source.to_string(),
            compile: compile.map(|argv| argv.into_iter().map(String::from).collect()),
            run: run.into_iter().map(String::from).collect(),
            artifact: artifact.map(String::from),
            env,
        }
    }
}

/// How one language compiles and runs inside the sandbox.
#[derive(Debug, Clone)]
pub struct LanguagePlan {
    pub language: Language,
    /// Container image.
    pub image: String,
    /// Canonical filename the code is written to in the workspace.
    pub source_filename: String,
    /// Compile argv, when the language has a compile phase.
    pub compile: Option<Vec<String>>,
    /// Run argv.
    pub run: Vec<String>,
    /// Compiler output filename, when produced.
    pub artifact: Option<String>,
    /// Extra environment for both phases.
    pub env: Vec<(String, String)>,
}

impl LanguagePlan {
    pub fn needs_compile(&self) -> bool {
        self.compile.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_case_folds_and_trims() {
        assert_eq!(Language::parse(" Python ").unwrap(), Language::Python);
        assert_eq!(Language::parse("CPP").unwrap(), Language::Cpp);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        assert!(Language::parse("cobol").is_err());
        assert!(Language::parse("").is_err());
    }

    #[test]
    fn test_all_supported_round_trip() {
        for lang in SUPPORTED_LANGUAGES {
            assert_eq!(Language::parse(lang.as_str()).unwrap(), lang);
        }
    }

    #[test]
    fn test_canonical_filenames() {
        assert_eq!(Language::Javascript.plan().source_filename, "solution.js");
        assert_eq!(Language::Java.plan().source_filename, "Solution.java");
        assert_eq!(Language::Cpp.plan().source_filename, "solution.cpp");
        assert_eq!(Language::Rust.plan().source_filename, "solution.rs");
    }

    #[test]
    fn test_compiled_languages_have_compile_commands() {
        for lang in [Language::Java, Language::Cpp, Language::C, Language::Go, Language::Rust] {
            assert!(lang.plan().needs_compile(), "{:?} should compile", lang);
        }
        for lang in [
            Language::Javascript,
            Language::Typescript,
            Language::Python,
            Language::Ruby,
            Language::Php,
        ] {
            assert!(!lang.plan().needs_compile(), "{:?} should not compile", lang);
        }
    }

    #[test]
    fn test_extensions() {
        assert_eq!(Language::Python.extension(), "py");
        assert_eq!(Language::Rust.extension(), "rs");
        assert_eq!(Language::Ruby.extension(), "rb");
    }

    #[test]
    fn test_image_env_override() {
        temp_env::with_var(
            "SANDBOX_IMAGE_PYTHON",
            Some("registry.local/python-judge:1"),
            || {
                let plan = Language::Python.plan();
                assert_eq!(plan.image, "registry.local/python-judge:1");
            },
        );
    }
}
