//! Summary hook injection.
//!
//! An augmented script is the composition of three parts: a preamble of
//! import declarations, the untouched original content, and the hook
//! function. Whether a script needs augmenting is decided by a single marker
//! check, which makes injection idempotent.
//!
//! Detection is a substring test on the raw text. A marker inside a comment or
//! string literal counts as a declaration, and the script is left alone.

use std::path::Path;

/// Identifier of the engine's end-of-test hook.
pub const HOOK_MARKER: &str = "handleSummary";

const HTML_REPORT_IMPORT: &str =
    "import { htmlReport } from \"https://raw.githubusercontent.com/benc-uk/k6-reporter/main/dist/bundle.js\";";
const TEXT_SUMMARY_IMPORT: &str =
    "import { textSummary } from \"https://jslib.k6.io/k6-summary/0.0.1/index.js\";";

/// Result of running the injector over a script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// The script already declares the hook and is returned unchanged.
    AlreadyInstrumented(String),
    /// The hook was added.
    Augmented(String),
}

impl Injection {
    /// Returns the script content to run.
    pub fn content(&self) -> &str {
        match self {
            Injection::AlreadyInstrumented(content) | Injection::Augmented(content) => content,
        }
    }

    /// Consumes the injection and returns the script content.
    pub fn into_content(self) -> String {
        match self {
            Injection::AlreadyInstrumented(content) | Injection::Augmented(content) => content,
        }
    }

    pub fn was_augmented(&self) -> bool {
        matches!(self, Injection::Augmented(_))
    }
}

/// Returns true if the script already declares the summary hook.
pub fn has_hook(content: &str) -> bool {
    content.contains(HOOK_MARKER)
}

/// Ensures `content` registers exactly one summary hook writing to `html_path`.
pub fn inject(content: &str, html_path: &Path) -> Injection {
    if has_hook(content) {
        return Injection::AlreadyInstrumented(content.to_string());
    }

    let preamble = preamble();
    let hook = hook_function(html_path);

    let mut augmented = String::with_capacity(preamble.len() + content.len() + hook.len() + 2);
    augmented.push_str(&preamble);
    augmented.push_str(content);
    if !content.is_empty() && !content.ends_with('\n') {
        augmented.push('\n');
    }
    augmented.push_str(&hook);

    Injection::Augmented(augmented)
}

/// Import declarations; the script language requires them before any use.
fn preamble() -> String {
    format!("{HTML_REPORT_IMPORT}\n{TEXT_SUMMARY_IMPORT}\n\n")
}

fn hook_function(html_path: &Path) -> String {
    format!(
        "\nexport function {HOOK_MARKER}(data) {{\n  \
         return {{\n    \
         {path}: htmlReport(data),\n    \
         stdout: textSummary(data, {{ indent: \" \", enableColors: true }}),\n  \
         }};\n\
         }}\n",
        path = js_string_literal(html_path),
    )
}

/// Renders a path as a double-quoted string literal.
fn js_string_literal(path: &Path) -> String {
    // JSON string syntax is a subset of the script language's literal syntax.
    serde_json::to_string(&path.to_string_lossy())
        .unwrap_or_else(|_| format!("\"{}\"", path.display()))
}
