#![allow(clippy::result_large_err)] // Validation returns AppError directly to keep the offending symbol in context.

use crate::core::entities::ResourceLimits;
use crate::core::error::AppError;
use crate::core::types::ErrorCategory;
use regex::Regex;
use rhai::Engine;
use std::collections::HashSet;

/// Identifier that denotes the execution's capability table. Programs may
/// read it but never declare or assign it.
pub const RESERVED_CAPABILITY_TABLE: &str = "__runtime__";

const DENIED_MODULES: &[&str] = &[
    "os",
    "sys",
    "process",
    "subprocess",
    "cmd",
    "env",
    "ffi",
    "libc",
    "reflect",
];
const NETWORK_MODULES: &[&str] = &["net", "socket", "http"];
const FILE_IO_MODULES: &[&str] = &["fs", "io", "path"];
const DENIED_CALLS: &[&str] = &["eval", "exec", "compile", "system", "popen", "shell"];

/// Statically inspects program text before any execution. Pure function of
/// the text and the configured denylists; never evaluates anything.
///
/// The denylist scan runs before the parse pass so that a capability
/// reference inside a malformed program still classifies as a security
/// violation rather than a syntax error.
pub struct SecurityValidator {
    denied_modules: Vec<String>,
    import_pattern: Regex,
    module_ref_pattern: Regex,
    call_pattern: Regex,
    reserved_pattern: Regex,
    parse_engine: Engine,
}

impl SecurityValidator {
    pub fn new(limits: &ResourceLimits, extra_allowed_modules: &[String]) -> Result<Self, AppError> {
        let allowed: HashSet<&str> = extra_allowed_modules.iter().map(String::as_str).collect();

        let mut modules: Vec<String> = DENIED_MODULES
            .iter()
            .map(|m| m.to_string())
            .collect();
        if !limits.allow_network {
            modules.extend(NETWORK_MODULES.iter().map(|m| m.to_string()));
        }
        if !limits.allow_file_io {
            modules.extend(FILE_IO_MODULES.iter().map(|m| m.to_string()));
        }
        modules.retain(|m| !allowed.contains(m.as_str()));

        let module_alts = alternation(&modules);
        let call_alts = alternation(&DENIED_CALLS.iter().map(|c| c.to_string()).collect::<Vec<_>>());

        let import_pattern = compile_pattern(&format!(
            r#"\bimport\b[^;\n]*?\b({})\b"#,
            module_alts
        ))?;
        let module_ref_pattern =
            compile_pattern(&format!(r"\b({})\s*(?:::|\.)", module_alts))?;
        let call_pattern = compile_pattern(&format!(r"\b({})\s*\(", call_alts))?;
        let reserved_pattern = compile_pattern(&format!(
            r"(?:\b(?:let|const)\s+({res})\b|\b({res})\s*(?:=[^=]|\+=|-=|\*=|/=))",
            res = regex::escape(RESERVED_CAPABILITY_TABLE)
        ))?;

        // Bare engine used purely for the parse pass.
        let parse_engine = Engine::new_raw();

        Ok(Self {
            denied_modules: modules,
            import_pattern,
            module_ref_pattern,
            call_pattern,
            reserved_pattern,
            parse_engine,
        })
    }

    /// Validate program text. `Ok(())` means the program may be handed to the
    /// sandbox; any `Err` carries the reason and no execution occurs.
    pub fn validate(&self, program_text: &str) -> Result<(), AppError> {
        if let Some(cap) = self.import_pattern.captures(program_text) {
            let name = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Err(AppError::new(
                ErrorCategory::SecurityViolation,
                format!("import of denylisted capability module: {}", name),
            )
            .with_code("SBX-VAL-001"));
        }
        if let Some(cap) = self.module_ref_pattern.captures(program_text) {
            let name = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Err(AppError::new(
                ErrorCategory::SecurityViolation,
                format!("reference to denylisted capability module: {}", name),
            )
            .with_code("SBX-VAL-001"));
        }
        if let Some(cap) = self.call_pattern.captures(program_text) {
            let name = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
            return Err(AppError::new(
                ErrorCategory::SecurityViolation,
                format!("call to denylisted dynamic-execution primitive: {}", name),
            )
            .with_code("SBX-VAL-002"));
        }
        if self.reserved_pattern.is_match(program_text) {
            return Err(AppError::new(
                ErrorCategory::SecurityViolation,
                format!(
                    "mutation of reserved capability table identifier: {}",
                    RESERVED_CAPABILITY_TABLE
                ),
            )
            .with_code("SBX-VAL-003"));
        }

        if let Err(err) = self.parse_engine.compile(program_text) {
            // The denylist scan above already cleared the text of denied
            // module names; an engine-level rejection of a remaining
            // import statement is a capability denial, not bad syntax.
            if program_text
                .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                .any(|token| token == "import")
            {
                return Err(AppError::new(
                    ErrorCategory::SecurityViolation,
                    format!("module import denied: {}", err),
                )
                .with_code("SBX-VAL-001"));
            }
            return Err(AppError::new(
                ErrorCategory::ValidationError,
                format!("syntax error: {}", err),
            )
            .with_code("SBX-VAL-004"));
        }
        Ok(())
    }

    /// Whether a symbol that surfaced at run time (e.g. a dynamically built
    /// call that the static pass could not see) belongs to the denylist.
    pub fn is_denied_symbol(&self, symbol: &str) -> bool {
        let root = symbol
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .next()
            .unwrap_or(symbol);
        self.denied_modules.iter().any(|m| m == root)
            || DENIED_CALLS.contains(&root)
    }
}

fn alternation(names: &[String]) -> String {
    names
        .iter()
        .map(|n| regex::escape(n))
        .collect::<Vec<_>>()
        .join("|")
}

fn compile_pattern(pattern: &str) -> Result<Regex, AppError> {
    Regex::new(pattern).map_err(|e| {
        AppError::new(
            ErrorCategory::InternalError,
            format!("invalid validator pattern: {}", e),
        )
        .with_code("SBX-VAL-000")
    })
}
