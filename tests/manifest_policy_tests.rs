#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Manifest policy tests for room-sync.
//!
//! These tests parse Cargo.toml and verify the lint, MSRV, feature, and
//! packaging settings the project relies on. A failure here means the
//! manifest drifted from the agreed-upon configuration.

use std::path::PathBuf;

use toml::{Table, Value};

/// Returns the project root directory (where Cargo.toml lives).
fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

/// Reads a file relative to the project root and returns its contents.
fn read_project_file(relative_path: &str) -> String {
    let path = project_root().join(relative_path);
    std::fs::read_to_string(&path).unwrap_or_else(|e| {
        panic!(
            "Failed to read '{}': {}. This file is required by project policy.",
            path.display(),
            e
        )
    })
}

fn manifest() -> Table {
    read_project_file("Cargo.toml")
        .parse::<Table>()
        .expect("Cargo.toml must be valid TOML")
}

fn table<'a>(parent: &'a Table, key: &str) -> &'a Table {
    parent
        .get(key)
        .and_then(Value::as_table)
        .unwrap_or_else(|| panic!("Cargo.toml is missing the [{key}] table"))
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: lint_policy
// ─────────────────────────────────────────────────────────────────────────────

mod lint_policy {
    use super::*;

    const REQUIRED_DENY_LINTS: &[&str] = &[
        "unwrap_used",
        "expect_used",
        "panic",
        "todo",
        "unimplemented",
        "indexing_slicing",
    ];

    #[test]
    fn cargo_toml_denies_all_panic_prone_lints() {
        let manifest = manifest();
        let clippy = table(table(&manifest, "lints"), "clippy");

        for lint in REQUIRED_DENY_LINTS {
            assert_eq!(
                clippy.get(*lint).and_then(Value::as_str),
                Some("deny"),
                "Cargo.toml must set `{lint} = \"deny\"` in [lints.clippy] to \
                 keep library code panic-free."
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: package_policy
// ─────────────────────────────────────────────────────────────────────────────

mod package_policy {
    use super::*;

    #[test]
    fn rust_version_is_pinned() {
        let manifest = manifest();
        let package = table(&manifest, "package");
        let msrv = package
            .get("rust-version")
            .and_then(Value::as_str)
            .expect("package.rust-version must be set");

        let parts: Vec<&str> = msrv.split('.').collect();
        assert_eq!(
            parts.len(),
            3,
            "rust-version must be a full MAJOR.MINOR.PATCH version, got {msrv}"
        );
        assert!(parts.iter().all(|p| p.parse::<u32>().is_ok()));
    }

    #[test]
    fn readme_is_packaged() {
        let manifest = manifest();
        let package = table(&manifest, "package");
        let include: Vec<&str> = package
            .get("include")
            .and_then(Value::as_array)
            .expect("package.include must be set")
            .iter()
            .filter_map(Value::as_str)
            .collect();

        assert!(include.contains(&"/README.md"));
        assert!(include.contains(&"/src/**"));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Module: feature_policy
// ─────────────────────────────────────────────────────────────────────────────

mod feature_policy {
    use super::*;

    #[test]
    fn memory_backend_is_a_default_feature() {
        let manifest = manifest();
        let features = table(&manifest, "features");
        let default: Vec<&str> = features
            .get("default")
            .and_then(Value::as_array)
            .expect("features.default must be set")
            .iter()
            .filter_map(Value::as_str)
            .collect();

        assert!(features.contains_key("memory-backend"));
        assert!(default.contains(&"memory-backend"));
    }

    #[test]
    fn demos_declare_required_features() {
        let manifest = manifest();
        let examples = manifest
            .get("example")
            .and_then(Value::as_array)
            .expect("at least one [[example]] must be declared");

        for example in examples {
            let example = example.as_table().expect("[[example]] must be a table");
            let name = example["name"].as_str().unwrap();
            let path = example["path"].as_str().unwrap();
            assert!(
                path.starts_with("demos/"),
                "example `{name}` must live under demos/, found {path}"
            );
            assert!(
                project_root().join(path).is_file(),
                "example `{name}` points at missing file {path}"
            );
            let required = example
                .get("required-features")
                .and_then(Value::as_array)
                .unwrap_or_else(|| panic!("example `{name}` must declare required-features"));
            assert!(required.iter().any(|f| f.as_str() == Some("memory-backend")));
        }
    }
}
