//! Test manifest support (`shale test manifest.toml`).
//!
//! A manifest declares each case explicitly: the source (inline or a file
//! next to the manifest), the entry point, its arguments, and either an
//! expected result or an expected error substring. Nothing is implicit and
//! no state is shared between cases.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::compiler;
use crate::compiler::types::Type;
use crate::interp::{self, TypedValue};

#[derive(Debug, Serialize, Deserialize)]
pub struct TestManifest {
    #[serde(default, rename = "case")]
    pub cases: Vec<TestCase>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub name: String,
    /// Inline source text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Path to a source file, relative to the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Entry function to call.
    pub entry: String,
    /// int32 arguments for the entry point.
    #[serde(default)]
    pub args: Vec<i32>,
    /// Expected int32 result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expect: Option<i32>,
    /// Expected substring of the error (compile error or trap).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TestManifest {
    pub fn load(path: &Path) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
    }
}

/// The result of one case: `Ok` on pass, the failure reason otherwise.
#[derive(Debug)]
pub struct CaseOutcome {
    pub name: String,
    pub result: Result<(), String>,
}

impl CaseOutcome {
    pub fn passed(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every case in the manifest. `manifest_dir` anchors relative `file`
/// paths.
pub fn run_manifest(manifest_dir: &Path, manifest: &TestManifest) -> Vec<CaseOutcome> {
    manifest
        .cases
        .iter()
        .map(|case| CaseOutcome {
            name: case.name.clone(),
            result: run_case(manifest_dir, case),
        })
        .collect()
}

fn run_case(manifest_dir: &Path, case: &TestCase) -> Result<(), String> {
    let source = match (&case.source, &case.file) {
        (Some(source), None) => source.clone(),
        (None, Some(file)) => {
            let path = manifest_dir.join(file);
            fs::read_to_string(&path)
                .map_err(|e| format!("failed to read {}: {}", path.display(), e))?
        }
        (Some(_), Some(_)) => {
            return Err("case declares both `source` and `file`".to_string());
        }
        (None, None) => {
            return Err("case declares neither `source` nor `file`".to_string());
        }
    };

    let outcome = evaluate(&source, &case.entry, &case.args);
    match (&case.expect, &case.error) {
        (Some(expected), None) => match outcome {
            Ok(value) => match value.as_int32() {
                Some(got) if got == *expected => Ok(()),
                Some(got) => Err(format!("expected {}, got {}", expected, got)),
                None => Err(format!("expected {}, got non-int32 `{}`", expected, value)),
            },
            Err(e) => Err(format!("expected {}, got error: {}", expected, e)),
        },
        (None, Some(substring)) => match outcome {
            Ok(value) => Err(format!(
                "expected error containing {:?}, got result `{}`",
                substring, value
            )),
            Err(e) if e.contains(substring.as_str()) => Ok(()),
            Err(e) => Err(format!(
                "expected error containing {:?}, got: {}",
                substring, e
            )),
        },
        (Some(_), Some(_)) => Err("case declares both `expect` and `error`".to_string()),
        (None, None) => outcome.map(|_| ()),
    }
}

fn evaluate(source: &str, entry: &str, args: &[i32]) -> Result<TypedValue, String> {
    let program = compiler::check(source).map_err(|e| e.to_string())?;
    let args: Vec<TypedValue> = args.iter().map(|&v| TypedValue::int32(v)).collect();
    let type_args: Vec<Type> = Vec::new();
    interp::call_function(&program, entry, &type_args, args).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_parse() {
        let manifest: TestManifest = toml::from_str(
            r#"
            [[case]]
            name = "inc"
            source = "int32 main(int32 x) { return x + 1; }"
            entry = "main"
            args = [41]
            expect = 42

            [[case]]
            name = "missing-return"
            source = "int32 main() { }"
            entry = "main"
            error = "missing return"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.cases.len(), 2);
        assert_eq!(manifest.cases[0].args, vec![41]);
        assert_eq!(manifest.cases[1].error.as_deref(), Some("missing return"));
    }

    #[test]
    fn test_run_inline_cases() {
        let manifest: TestManifest = toml::from_str(
            r#"
            [[case]]
            name = "pass"
            source = "int32 main(int32 x) { return x + 1; }"
            entry = "main"
            args = [41]
            expect = 42

            [[case]]
            name = "wrong-expectation"
            source = "int32 main(int32 x) { return x + 1; }"
            entry = "main"
            args = [41]
            expect = 99

            [[case]]
            name = "expected-error"
            source = "int32 main() { }"
            entry = "main"
            error = "missing return"
            "#,
        )
        .unwrap();

        let outcomes = run_manifest(Path::new("."), &manifest);
        assert!(outcomes[0].passed());
        assert!(!outcomes[1].passed());
        assert!(outcomes[2].passed());
    }
}
