//! Integration tests for the repository analysis and script normalization
//! pipeline, using real temp directories in place of cloned trees.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use cfworkerbot::error::Error;
use cfworkerbot::services::normalizer::{
    analyze_tree, ensure_manifest, find_entry, normalize_script, RepoAnalysis, WorkerFormat,
};

const MODERN_WORKER: &str = "export default {\n  async fetch(request, env, ctx) {\n    return new Response('ok');\n  }\n};\n";

const LEGACY_WORKER: &str = "addEventListener('fetch', event => {\n  event.respondWith(handleRequest(event.request))\n})\n\nasync function handleRequest(request) {\n  return new Response('legacy');\n}\n";

fn write_tree(files: &[(&str, &str)]) -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp directory");
    for (path, content) in files {
        let full = temp.path().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }
    temp
}

fn read_manifest(tree: &Path) -> String {
    fs::read_to_string(tree.join("wrangler.toml")).unwrap()
}

// ============================================================================
// Entry discovery
// ============================================================================

#[test]
fn test_entry_candidates_are_checked_in_order() {
    // worker.js outranks src/index.js
    let temp = write_tree(&[("worker.js", MODERN_WORKER), ("src/index.js", LEGACY_WORKER)]);
    let entry = find_entry(temp.path()).unwrap();
    assert_eq!(entry.relative_path, "worker.js");

    // index.js outranks everything
    let temp = write_tree(&[("index.js", LEGACY_WORKER), ("worker.js", MODERN_WORKER)]);
    let entry = find_entry(temp.path()).unwrap();
    assert_eq!(entry.relative_path, "index.js");
}

#[test]
fn test_nested_entry_is_found() {
    let temp = write_tree(&[("src/index.js", MODERN_WORKER), ("README.md", "# demo")]);
    let entry = find_entry(temp.path()).unwrap();
    assert_eq!(entry.relative_path, "src/index.js");
    assert_eq!(entry.content, MODERN_WORKER);
}

#[test]
fn test_tree_without_entry_is_rejected() {
    let temp = write_tree(&[("README.md", "# demo"), ("lib/util.js", "export const x = 1;")]);
    assert!(matches!(find_entry(temp.path()), Err(Error::EntryPointNotFound)));
}

// ============================================================================
// Tree analysis
// ============================================================================

#[test]
fn test_analysis_reports_format_and_manifest_presence() {
    let temp = write_tree(&[
        ("index.js", LEGACY_WORKER),
        ("wrangler.toml", "name = \"old\"\n"),
    ]);

    let analysis = analyze_tree(temp.path(), "https://github.com/user/My_Project").unwrap();
    assert_eq!(analysis.worker_name, "my-project");
    assert_eq!(analysis.main_file, "index.js");
    assert_eq!(analysis.format, WorkerFormat::ServiceWorker);
    assert!(analysis.has_wrangler_toml);
    assert!(!analysis.needs_node_compat);
    assert!(analysis.generated_config.contains("name = \"my-project\""));
    assert!(analysis.generated_config.contains("main = \"index.js\""));
}

#[test]
fn test_analysis_flags_node_compat_from_any_scanned_file() {
    // The entry itself is clean; a sibling script pulls in a node builtin
    let temp = write_tree(&[
        ("index.js", MODERN_WORKER),
        ("helper.js", "const fs = require('fs');\nfunction read() { return fetch('x'); }\n"),
    ]);

    let analysis = analyze_tree(temp.path(), "https://github.com/user/repo").unwrap();
    assert!(analysis.needs_node_compat);
    assert!(analysis.generated_config.contains("nodejs_compat_v2"));
    assert!(analysis.worker_files.iter().any(|f| f.path == "helper.js"));
}

#[test]
fn test_analysis_of_scriptless_tree_fails() {
    let temp = write_tree(&[("README.md", "nothing here")]);
    let result = analyze_tree(temp.path(), "https://github.com/user/repo");
    assert!(matches!(result, Err(Error::EntryPointNotFound)));
}

#[test]
fn test_analysis_survives_json_caching() {
    let temp = write_tree(&[("index.js", MODERN_WORKER)]);
    let analysis = analyze_tree(temp.path(), "https://github.com/user/repo").unwrap();

    // The analysis is cached as a JSON value in the session store and read
    // back later by the deploy-from-analysis action
    let value = serde_json::to_value(&analysis).unwrap();
    let restored: RepoAnalysis = serde_json::from_value(value).unwrap();
    assert_eq!(restored.worker_name, analysis.worker_name);
    assert_eq!(restored.format, analysis.format);
    assert_eq!(restored.generated_config, analysis.generated_config);
}

// ============================================================================
// Manifest synthesis on the deploy path
// ============================================================================

#[test]
fn test_missing_manifest_is_generated() {
    let temp = write_tree(&[("index.js", MODERN_WORKER)]);

    let status = ensure_manifest(temp.path(), "demo", "index.js").unwrap();
    assert!(!status.existed);

    let manifest = read_manifest(temp.path());
    assert!(manifest.contains("name = \"demo\""));
    assert!(manifest.contains("main = \"index.js\""));
    assert!(manifest.contains("compatibility_date"));
    assert!(manifest.contains("format = \"modules\""));
}

#[test]
fn test_partial_manifest_is_patched_not_replaced() {
    let temp = write_tree(&[
        ("index.js", MODERN_WORKER),
        ("wrangler.toml", "name = \"keepme\"\nroute = \"example.com/*\"\n"),
    ]);

    let status = ensure_manifest(temp.path(), "demo", "index.js").unwrap();
    assert!(status.existed);

    let manifest = read_manifest(temp.path());
    // Existing keys survive
    assert!(manifest.contains("name = \"keepme\""));
    assert!(manifest.contains("route = \"example.com/*\""));
    // Missing required keys were filled in
    assert!(manifest.contains("compatibility_date"));
    assert!(manifest.contains("main = \"worker.js\""));
    assert!(manifest.contains("format = \"modules\""));
}

#[test]
fn test_complete_manifest_is_left_untouched() {
    let complete = "name = \"demo\"\nmain = \"index.js\"\ncompatibility_date = \"2025-06-01\"\n\n[build.upload]\nformat = \"modules\"\n";
    let temp = write_tree(&[("index.js", MODERN_WORKER), ("wrangler.toml", complete)]);

    ensure_manifest(temp.path(), "demo", "index.js").unwrap();
    assert_eq!(read_manifest(temp.path()), complete);

    // Running it twice changes nothing either
    ensure_manifest(temp.path(), "demo", "index.js").unwrap();
    assert_eq!(read_manifest(temp.path()), complete);
}

// ============================================================================
// End-to-end: analyze then normalize the entry
// ============================================================================

#[test]
fn test_legacy_tree_normalizes_to_modules() {
    let temp = write_tree(&[("index.js", LEGACY_WORKER)]);

    let entry = find_entry(temp.path()).unwrap();
    let script = normalize_script(&entry.content);

    assert!(script.contains("export default"));
    assert!(script.contains("async fetch(request, env, ctx)"));
    assert!(script.contains("return new Response('legacy');"));
    assert!(!script.contains("addEventListener"));
}
