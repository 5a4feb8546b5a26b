use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::format::today_iso_date;

/// Entry-point candidates, checked in order; first existing file wins.
const ENTRY_CANDIDATES: &[&str] = &[
    "index.js",
    "worker.js",
    "src/index.js",
    "src/worker.js",
    "main.js",
    "app.js",
];

/// Extra candidate consulted only by the analysis report scan.
const ANALYSIS_EXTRA_CANDIDATES: &[&str] = &["server.js"];

/// Placeholder worker name when none can be derived from the repository URL.
const DEFAULT_WORKER_NAME: &str = "my-worker";

fn export_default_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"export\s+default").expect("invalid regex"))
}

fn es_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"import\s+.*\s+from").expect("invalid regex"))
}

fn fetch_listener_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"addEventListener\s*\(\s*['"`]fetch['"`]"#).expect("invalid regex"))
}

fn node_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"import\s+.*\s+from\s+['"`]node:|require\s*\(\s*['"`]node:"#)
            .expect("invalid regex")
    })
}

fn node_builtin_require_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"require\s*\(\s*['"`](fs|path|crypto|buffer|stream|util)['"`]"#)
            .expect("invalid regex")
    })
}

fn node_global_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"process\.env|__dirname|__filename").expect("invalid regex"))
}

fn legacy_handler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?ms)async function handleRequest\(request\)\s*\{(.*?)^\}").expect("invalid regex")
    })
}

fn require_stmt_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"const\s+\w+\s*=\s*require\([^)]+\);?\s*").expect("invalid regex"))
}

fn module_exports_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"module\.exports\s*=\s*[^;]+;?\s*").expect("invalid regex"))
}

fn named_exports_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"exports\.\w+\s*=\s*[^;]+;?\s*").expect("invalid regex"))
}

fn top_level_fn_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)(?:async\s+)?function\s+(\w+)\s*\([^)]*\)\s*\{.*?\}").expect("invalid regex")
    })
}

fn repo_tail_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/([^/]+?)(?:\.git)?/?$").expect("invalid regex"))
}

/// Worker script module format as understood by the Workers runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerFormat {
    Modules,
    ServiceWorker,
}

impl fmt::Display for WorkerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerFormat::Modules => write!(f, "modules"),
            WorkerFormat::ServiceWorker => write!(f, "service-worker"),
        }
    }
}

/// Heuristic signals extracted from one script's raw text.
///
/// These are regex probes, not a parse: they classify the shapes Workers
/// code is usually written in and nothing more.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FormatSignals {
    pub has_export_default: bool,
    pub has_imports: bool,
    pub has_add_event_listener: bool,
    pub has_node_imports: bool,
    pub format: WorkerFormat,
    pub needs_node_compat: bool,
}

/// Classifies a script's module format and Node-compatibility needs.
pub fn classify(content: &str) -> FormatSignals {
    let has_export_default = export_default_re().is_match(content);
    let has_imports = es_import_re().is_match(content);
    let has_add_event_listener = fetch_listener_re().is_match(content);
    let has_node_imports = node_import_re().is_match(content);

    let format = if has_add_event_listener && !has_export_default {
        WorkerFormat::ServiceWorker
    } else {
        // A default export or ES import means modules; modules is also
        // the fallback for anything ambiguous.
        WorkerFormat::Modules
    };

    let needs_node_compat = has_node_imports
        || node_builtin_require_re().is_match(content)
        || node_global_re().is_match(content);

    FormatSignals {
        has_export_default,
        has_imports,
        has_add_event_listener,
        has_node_imports,
        format,
        needs_node_compat,
    }
}

/// The entry script found in a working tree.
#[derive(Debug, Clone)]
pub struct EntryScript {
    pub relative_path: String,
    pub content: String,
}

/// Searches the fixed candidate list against the working tree.
pub fn find_entry(tree: &Path) -> Result<EntryScript> {
    for candidate in ENTRY_CANDIDATES {
        let path = tree.join(candidate);
        if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            return Ok(EntryScript {
                relative_path: candidate.to_string(),
                content,
            });
        }
    }
    Err(Error::EntryPointNotFound)
}

/// Rewrites a script into the modern `fetch(request, env, ctx)` module
/// contract when it is recognizably in a legacy shape.
///
/// These are best-effort textual transformations, not AST rewrites: code
/// outside the expected shapes can come out semantically wrong. That is an
/// accepted limitation, not something to patch over here.
pub fn normalize_script(content: &str) -> String {
    // Strip a UTF-8 BOM if present
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);

    // Already modern: pass through unchanged
    if content.contains("export default") && content.contains("async fetch(") {
        return content.to_string();
    }

    // Legacy service-worker listener
    if content.contains("addEventListener") && content.contains("fetch") {
        return convert_legacy_worker(content);
    }

    // CommonJS style
    if content.contains("require(") || content.contains("module.exports") {
        return convert_commonjs_worker(content);
    }

    // Bare script with neither exports nor listeners: wrap it
    if !content.contains("export") && !content.contains("addEventListener") {
        return wrap_in_modern_format(content);
    }

    content.to_string()
}

/// Extracts the `handleRequest` body from a fetch-listener worker and
/// re-wraps it as a module export. Falls back to a stub module when the
/// handler doesn't match the expected shape.
fn convert_legacy_worker(content: &str) -> String {
    if let Some(caps) = legacy_handler_re().captures(content) {
        let body = &caps[1];
        return format!(
            "// Converted from legacy addEventListener format\n\
             export default {{\n  async fetch(request, env, ctx) {{{}\n  }}\n}};",
            body
        );
    }

    "// Converted from legacy format\n\
     export default {\n  async fetch(request, env, ctx) {\n    \
     return new Response('Hello from Cloudflare Worker!', {\n      \
     headers: { 'content-type': 'text/plain' }\n    });\n  }\n};"
        .to_string()
}

/// Strips CommonJS statements and wraps the first top-level function in a
/// module export that shields callers with a try/catch.
fn convert_commonjs_worker(content: &str) -> String {
    let stripped = require_stmt_re().replace_all(content, "");
    let stripped = module_exports_re().replace_all(&stripped, "");
    let stripped = named_exports_re().replace_all(&stripped, "");

    if let Some(caps) = top_level_fn_re().captures(&stripped) {
        let fn_name = &caps[1];
        return format!(
            "// Converted from Node.js format\n{}\n\n\
             export default {{\n  async fetch(request, env, ctx) {{\n    \
             try {{\n      return await {}(request, env, ctx);\n    \
             }} catch (error) {{\n      \
             return new Response('Internal Server Error', {{ status: 500 }});\n    }}\n  }}\n}};",
            stripped, fn_name
        );
    }

    wrap_in_modern_format(&stripped)
}

/// Appends a stub `fetch` handler after the original content.
fn wrap_in_modern_format(content: &str) -> String {
    format!(
        "// Auto-wrapped in modern Cloudflare Worker format\n{}\n\n\
         export default {{\n  async fetch(request, env, ctx) {{\n    \
         return new Response('Hello from Cloudflare Worker!', {{\n      \
         headers: {{ 'content-type': 'text/plain' }}\n    }});\n  }}\n}};",
        content
    )
}

/// Derives a worker name from the repository URL's final path segment:
/// lowercased, anything outside `[a-z0-9-]` replaced with a hyphen.
pub fn worker_name_from_repo(repo_url: &str) -> String {
    if let Some(caps) = repo_tail_re().captures(repo_url) {
        let tail = caps[1].to_lowercase();
        let name: String = tail
            .chars()
            .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' { c } else { '-' })
            .collect();
        if !name.is_empty() {
            return name;
        }
    }
    DEFAULT_WORKER_NAME.to_string()
}

/// Per-file report line for the analysis display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerFileReport {
    pub path: String,
    #[serde(flatten)]
    pub signals: FormatSignals,
}

/// Outcome of analyzing a working tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoAnalysis {
    pub repo_url: String,
    pub worker_name: String,
    pub main_file: String,
    pub format: WorkerFormat,
    pub needs_node_compat: bool,
    pub has_wrangler_toml: bool,
    pub compatibility_date: String,
    pub generated_config: String,
    pub worker_files: Vec<WorkerFileReport>,
}

/// Analyzes a cloned tree without modifying it: entry discovery, per-file
/// format signals, and a synthesized manifest. The caller owns the tree's
/// lifetime.
pub fn analyze_tree(tree: &Path, repo_url: &str) -> Result<RepoAnalysis> {
    let mut worker_files = Vec::new();

    for candidate in ENTRY_CANDIDATES.iter().chain(ANALYSIS_EXTRA_CANDIDATES) {
        let path = tree.join(candidate);
        if path.is_file() {
            let content = std::fs::read_to_string(&path)?;
            worker_files.push(WorkerFileReport {
                path: candidate.to_string(),
                signals: classify(&content),
            });
        }
    }

    // Sweep root and src/ for .js files the candidate list missed
    for dir in ["", "src"] {
        let scan_path = tree.join(dir);
        let Ok(entries) = std::fs::read_dir(&scan_path) else {
            continue;
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.ends_with(".js") {
                continue;
            }
            let rel = if dir.is_empty() { name.clone() } else { format!("{}/{}", dir, name) };
            if worker_files.iter().any(|w| w.path == rel) {
                continue;
            }
            if let Ok(content) = std::fs::read_to_string(entry.path()) {
                worker_files.push(WorkerFileReport {
                    path: rel,
                    signals: classify(&content),
                });
            }
        }
    }

    if worker_files.is_empty() {
        return Err(Error::EntryPointNotFound);
    }

    // The first candidate hit decides format and entry; node compat is
    // needed if any scanned file needs it
    let main = &worker_files[0];
    let format = main.signals.format;
    let main_file = main.path.clone();
    let needs_node_compat = worker_files.iter().any(|w| w.signals.needs_node_compat);

    let worker_name = worker_name_from_repo(repo_url);
    let compatibility_date = today_iso_date();
    let generated_config = generate_manifest(
        &worker_name,
        &main_file,
        &compatibility_date,
        format,
        needs_node_compat,
    );

    Ok(RepoAnalysis {
        repo_url: repo_url.to_string(),
        worker_name,
        main_file,
        format,
        needs_node_compat,
        has_wrangler_toml: tree.join("wrangler.toml").is_file(),
        compatibility_date,
        generated_config,
        worker_files,
    })
}

/// Renders a complete deployment manifest, including the commented optional
/// sections kept as authoring hints.
pub fn generate_manifest(
    worker_name: &str,
    main_file: &str,
    compatibility_date: &str,
    format: WorkerFormat,
    needs_node_compat: bool,
) -> String {
    let mut lines = vec![
        format!("name = \"{}\"", worker_name),
        format!("main = \"{}\"", main_file),
        format!("compatibility_date = \"{}\"", compatibility_date),
        String::new(),
        "[build.upload]".to_string(),
        format!("format = \"{}\"", format),
        String::new(),
    ];

    if needs_node_compat {
        lines.push("compatibility_flags = [\"nodejs_compat_v2\"]".to_string());
        lines.push(String::new());
    }

    lines.extend(
        [
            "# Environment variables (uncomment and modify as needed)",
            "# [vars]",
            "# API_KEY = \"your-api-key\"",
            "# ENVIRONMENT = \"production\"",
            "",
            "# KV Namespaces (uncomment and add your KV namespace ID)",
            "# [[kv_namespaces]]",
            "# binding = \"MY_KV\"",
            "# id = \"your-kv-namespace-id\"",
            "",
            "# Durable Objects (uncomment if using Durable Objects)",
            "# [[durable_objects.bindings]]",
            "# name = \"MY_DURABLE_OBJECT\"",
            "# class_name = \"MyDurableObject\"",
            "",
            "# R2 Buckets (uncomment if using R2 storage)",
            "# [[r2_buckets]]",
            "# binding = \"MY_BUCKET\"",
            "# bucket_name = \"my-bucket\"",
        ]
        .iter()
        .map(|s| s.to_string()),
    );

    lines.join("\n")
}

/// Fills the three required keys into an existing manifest without touching
/// unrelated content. A manifest that already declares modules format,
/// a compatibility date, and a main entry comes back byte-identical, so
/// patching is idempotent.
pub fn patch_manifest(content: &str, compatibility_date: &str) -> String {
    let has_modules_format = content.contains("format = \"modules\"");
    let has_compatibility_date = content.contains("compatibility_date");
    let has_main = content.contains("main =");

    if has_modules_format && has_compatibility_date && has_main {
        return content.to_string();
    }

    let mut processed = content.to_string();

    if !has_compatibility_date {
        processed = format!("compatibility_date = \"{}\"\n{}", compatibility_date, processed);
    }

    if !has_modules_format {
        processed.push_str("\n[build.upload]\nformat = \"modules\"\n");
    }

    if !has_main {
        processed = format!("main = \"worker.js\"\n{}", processed);
    }

    processed
}

/// Manifest state for a working tree after [`ensure_manifest`].
#[derive(Debug, Clone)]
pub struct ManifestStatus {
    /// Whether wrangler.toml existed before this call.
    pub existed: bool,
    pub content: String,
}

/// Reads the tree's wrangler.toml, patching missing required keys in place;
/// when absent, writes a freshly generated default. Creation-on-absence is
/// the intended behavior for the deploy path.
pub fn ensure_manifest(tree: &Path, worker_name: &str, main_file: &str) -> Result<ManifestStatus> {
    let manifest_path = tree.join("wrangler.toml");
    let today = today_iso_date();

    if manifest_path.is_file() {
        let existing = std::fs::read_to_string(&manifest_path)?;
        let patched = patch_manifest(&existing, &today);
        if patched != existing {
            std::fs::write(&manifest_path, &patched)?;
        }
        return Ok(ManifestStatus {
            existed: true,
            content: patched,
        });
    }

    let generated = generate_manifest(worker_name, main_file, &today, WorkerFormat::Modules, false);
    std::fs::write(&manifest_path, &generated)?;
    Ok(ManifestStatus {
        existed: false,
        content: generated,
    })
}
