use std::sync::OnceLock;
use regex::Regex;

/// Maximum accepted size for an uploaded script document (1 MiB).
pub const MAX_UPLOAD_BYTES: u32 = 1024 * 1024;

fn worker_name_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[a-z0-9-]{1,63}$").expect("Invalid worker name regex"))
}

fn github_url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^https://github\.com/[\w.-]+/[\w.-]+(?:\.git)?/?$")
            .expect("Invalid GitHub URL regex")
    })
}

fn github_analysis_url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^https://github\.com/[a-zA-Z0-9._-]+/[a-zA-Z0-9._-]+(\.git)?$")
            .expect("Invalid analysis URL regex")
    })
}

/// Validates a Cloudflare worker name: lowercase alphanumerics and hyphens,
/// 1-63 characters, no leading or trailing hyphen.
pub fn is_valid_worker_name(name: &str) -> bool {
    worker_name_regex().is_match(name) && !name.starts_with('-') && !name.ends_with('-')
}

/// Validates a GitHub HTTPS repository URL for the deploy flow.
pub fn is_valid_github_url(url: &str) -> bool {
    github_url_regex().is_match(url)
}

/// Validates a GitHub HTTPS repository URL for the analysis flow.
/// Same semantics as [`is_valid_github_url`] with a slightly stricter
/// character class and no trailing-slash tolerance.
pub fn is_valid_analysis_url(url: &str) -> bool {
    github_analysis_url_regex().is_match(url)
}

/// Heuristic gate for uploaded or pasted worker code. Not a parser: it
/// requires one Worker-ish token, one function-defining token, and balanced
/// braces/parens. Syntactically broken code whose braces happen to balance
/// will pass; that is an accepted limitation of this gate.
pub fn looks_like_worker_script(code: &str) -> bool {
    if code.trim().is_empty() {
        return false;
    }

    let has_worker_token = code.contains("addEventListener")
        || code.contains("fetch")
        || code.contains("Request")
        || code.contains("Response");

    let has_function = code.contains("function") || code.contains("=>");

    let count = |c: char| code.chars().filter(|&ch| ch == c).count();
    let balanced_braces = count('{') == count('}');
    let balanced_parens = count('(') == count(')');

    has_worker_token && has_function && balanced_braces && balanced_parens
}

/// Pre-download checks for a Telegram document upload: extension and size.
/// Returns a user-facing rejection reason on failure.
pub fn check_upload_document(file_name: &str, file_size: u32) -> Result<(), String> {
    if !file_name.ends_with(".js") {
        return Err("Only files with a .js extension are accepted.".to_string());
    }
    if file_size > MAX_UPLOAD_BYTES {
        return Err("File is too large. The maximum size is 1MB.".to_string());
    }
    Ok(())
}
