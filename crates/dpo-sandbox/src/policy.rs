//! Snippet policy validation
//!
//! The validator is a pure function of its configuration and the snippet.
//! Checks run in a fixed order and the first failure wins:
//!
//! 1. allow-list of modules and module functions
//! 2. deny-list of dangerous patterns
//! 3. size and statement-count bounds
//! 4. grammar of the restricted language
//!
//! Anything that does not pass all four is rejected. Only a
//! [`ValidatedSnippet`] can be handed to the sandbox.

use crate::ast::Program;
use crate::builtins;
use crate::config::PolicyConfig;
use crate::error::PolicyViolation;
use crate::lexer::{tokenize, Spanned, Token};
use crate::parser::parse;
use crate::snippet::CodeSnippet;
use dpo_types::ContentHash;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Deny patterns: (category, expression)
static DENY_PATTERNS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    let raw: &[(&str, &str)] = &[
        (
            "process spawning",
            r"(?i)\b(subprocess|popen|spawn|fork|system|execv?p?e?|shell|command)\b",
        ),
        (
            "filesystem deletion",
            r"(?i)\b(rmtree|unlink|rmdir|remove_file|remove_dir|delete_file)\b|\brm\s+-",
        ),
        (
            "network access",
            r"(?i)\b(socket|urllib|requests|httpx?|urlopen|curl|wget)\b|[a-z]+://",
        ),
        (
            "dynamic evaluation",
            r"(?i)\b(eval|compile|getattr|setattr|delattr|globals|locals|vars|importlib|__import__|reflect)\b",
        ),
        ("environment access", r"(?i)\b(environ|getenv|putenv|setenv|env_var)\b"),
        ("dunder access", r"__\w+__"),
        ("file access", r"(?i)\b(open|read_file|write_file|file)\s*\("),
    ];
    raw.iter()
        .map(|(name, pattern)| (*name, Regex::new(pattern).expect("deny pattern is valid")))
        .collect()
});

/// A snippet that passed every policy check
///
/// Only [`PolicyValidator::validate`] constructs this type, so holding one
/// is proof the snippet was validated.
#[derive(Debug, Clone)]
pub struct ValidatedSnippet {
    source: Arc<str>,
    program: Arc<Program>,
    fingerprint: ContentHash,
}

impl ValidatedSnippet {
    /// Source text that was checked
    #[inline]
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Content hash of the source, used in cache keys
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        self.fingerprint
    }

    #[inline]
    pub(crate) fn program(&self) -> Arc<Program> {
        Arc::clone(&self.program)
    }
}

/// Result of validating a snippet
pub type ValidationOutcome = Result<ValidatedSnippet, PolicyViolation>;

/// Policy validator
#[derive(Debug, Clone, Default)]
pub struct PolicyValidator {
    config: PolicyConfig,
}

impl PolicyValidator {
    /// Validator enforcing `config`
    #[inline]
    #[must_use]
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    /// Active limits
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Validate a snippet
    ///
    /// # Errors
    /// The first [`PolicyViolation`] found, in check order.
    pub fn validate(&self, snippet: &CodeSnippet) -> ValidationOutcome {
        let tokens = tokenize(&snippet.source);

        self.check_allow_list(snippet, &tokens)?;
        check_deny_patterns(&snippet.source)?;
        self.check_complexity(&snippet.source, &tokens)?;

        let program = parse(&tokens).map_err(|e| PolicyViolation::Malformed {
            line: e.line,
            message: e.message,
        })?;

        tracing::debug!(
            bytes = snippet.source.len(),
            statements = program.statements.len(),
            "snippet validated"
        );

        Ok(ValidatedSnippet {
            fingerprint: ContentHash::compute(snippet.source.as_bytes()),
            source: Arc::from(snippet.source.as_str()),
            program: Arc::new(program),
        })
    }

    fn module_allowed(&self, module: &str) -> bool {
        builtins::module(module).is_some() && self.config.allowed_modules.iter().any(|m| m == module)
    }

    fn check_allow_list(&self, snippet: &CodeSnippet, tokens: &[Spanned]) -> Result<(), PolicyViolation> {
        for declared in &snippet.declared_imports {
            if !self.module_allowed(declared) {
                return Err(PolicyViolation::ForbiddenModule {
                    module: declared.clone(),
                });
            }
        }

        for (i, spanned) in tokens.iter().enumerate() {
            let next = tokens.get(i + 1).map(|s| &s.token);
            match (&spanned.token, next) {
                (Token::Import, Some(Token::Ident(module))) => {
                    if !self.module_allowed(module) {
                        return Err(PolicyViolation::ForbiddenModule {
                            module: module.clone(),
                        });
                    }
                }
                (Token::Ident(module), Some(Token::Dot)) => {
                    let function = match tokens.get(i + 2).map(|s| &s.token) {
                        Some(Token::Ident(f)) => f.as_str(),
                        _ => "",
                    };
                    if !self.module_allowed(module) {
                        return Err(PolicyViolation::ForbiddenModule {
                            module: module.clone(),
                        });
                    }
                    if !builtins::is_known(module, function) {
                        return Err(PolicyViolation::ForbiddenModule {
                            module: format!("{module}.{function}"),
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_complexity(&self, source: &str, tokens: &[Spanned]) -> Result<(), PolicyViolation> {
        if source.len() > self.config.max_bytes {
            return Err(PolicyViolation::SnippetTooComplex {
                reason: format!("{} bytes exceeds limit of {}", source.len(), self.config.max_bytes),
            });
        }
        let statements = count_statements(tokens);
        if statements > self.config.max_statements {
            return Err(PolicyViolation::SnippetTooComplex {
                reason: format!(
                    "{statements} statements exceeds limit of {}",
                    self.config.max_statements
                ),
            });
        }
        Ok(())
    }
}

fn check_deny_patterns(source: &str) -> Result<(), PolicyViolation> {
    for (category, re) in DENY_PATTERNS.iter() {
        if let Some(m) = re.find(source) {
            return Err(PolicyViolation::ForbiddenPattern {
                category: *category,
                matched: m.as_str().to_string(),
            });
        }
    }
    Ok(())
}

/// Non-empty runs of tokens between separators
fn count_statements(tokens: &[Spanned]) -> usize {
    tokens
        .split(|s| s.token == Token::Separator)
        .filter(|run| !run.is_empty())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> PolicyValidator {
        PolicyValidator::default()
    }

    #[test]
    fn every_deny_pattern_is_active() {
        assert_eq!(DENY_PATTERNS.len(), 7);
    }

    fn check(src: &str) -> ValidationOutcome {
        validator().validate(&CodeSnippet::new(src))
    }

    #[test]
    fn accepts_allow_listed_snippet() {
        let ok = check("import table\nimport stats\nstats.mean(table.column(df, \"sales\"))").unwrap();
        assert!(ok.source().contains("stats.mean"));
        assert!(!ok.fingerprint().is_zero());
    }

    #[test]
    fn forbidden_import() {
        assert!(matches!(
            check("import os\nos.listdir(\".\")"),
            Err(PolicyViolation::ForbiddenModule { module }) if module == "os"
        ));
    }

    #[test]
    fn unknown_function_on_allowed_module() {
        assert!(matches!(
            check("stats.launch(1)"),
            Err(PolicyViolation::ForbiddenModule { module }) if module == "stats.launch"
        ));
    }

    #[test]
    fn declared_imports_are_checked() {
        let snippet = CodeSnippet::new("1 + 1").with_imports(["stats", "pickle"]);
        assert!(matches!(
            validator().validate(&snippet),
            Err(PolicyViolation::ForbiddenModule { module }) if module == "pickle"
        ));
    }

    #[test]
    fn allow_list_is_checked_before_patterns() {
        // both a forbidden module and a deny pattern: the module check wins
        assert!(matches!(
            check("import os\nos.system(\"ls\")"),
            Err(PolicyViolation::ForbiddenModule { .. })
        ));
    }

    #[test]
    fn deny_patterns() {
        for (src, category) in [
            ("eval(\"1\")", "dynamic evaluation"),
            ("let p = \"http://x\"", "network access"),
            ("x.__class__", "dunder access"),
            ("let e = getenv", "environment access"),
            ("let f = subprocess", "process spawning"),
            ("let r = rmtree", "filesystem deletion"),
        ] {
            match check(src) {
                Err(PolicyViolation::ForbiddenPattern { category: c, .. }) => assert_eq!(c, category, "{src}"),
                Err(PolicyViolation::ForbiddenModule { .. }) if src.contains('.') => {}
                other => panic!("{src}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn complexity_bounds() {
        let config = PolicyConfig::default().with_max_statements(2);
        let v = PolicyValidator::new(config);
        assert!(matches!(
            v.validate(&CodeSnippet::new("let a = 1; let b = 2; a + b")),
            Err(PolicyViolation::SnippetTooComplex { .. })
        ));

        let long = format!("let s = \"{}\"", "a".repeat(10_000));
        assert!(matches!(check(&long), Err(PolicyViolation::SnippetTooComplex { .. })));
    }

    #[test]
    fn grammar_is_fail_closed() {
        assert!(matches!(check("for x in y: x"), Err(PolicyViolation::Malformed { .. })));
        assert!(matches!(check("let = 3"), Err(PolicyViolation::Malformed { .. })));
        assert!(matches!(check("df[0"), Err(PolicyViolation::Malformed { .. })));
        assert!(matches!(check("1 ` 2"), Err(PolicyViolation::Malformed { .. })));
    }

    #[test]
    fn restricted_allow_list_from_config() {
        let config = PolicyConfig::default().with_allowed_modules(["stats"]);
        let v = PolicyValidator::new(config);
        assert!(v.validate(&CodeSnippet::new("stats.sum([1, 2])")).is_ok());
        assert!(matches!(
            v.validate(&CodeSnippet::new("text.upper(\"a\")")),
            Err(PolicyViolation::ForbiddenModule { .. })
        ));
    }
}
