//! Export: cell text cleanup, markdown and JSON rendering, atomic writes.
//!
//! Markdown is the cleaned cell texts of each page joined in detection
//! order, pages joined by the configured [`PageSeparator`]. JSON is the
//! whole [`Document`] tree under a small versioned envelope.
//!
//! ## Cleanup rules
//!
//! Applied per cell, in order:
//! 1. Strip an outer ```` ```markdown ```` fence
//! 2. CRLF → LF
//! 3. Strip a leading YAML front-matter block (the model's metadata header)
//! 4. Trim trailing whitespace per line
//! 5. Collapse runs of blank lines to one
//! 6. Remove invisible Unicode (zero-width spaces, BOM, soft hyphens)

use crate::config::PageSeparator;
use crate::document::Document;
use crate::error::ServiceError;
use crate::pipeline::staging::ensure_parent;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

pub const JSON_SCHEMA: &str = "pdf2md-server/document";
pub const JSON_VERSION: u32 = 1;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```$").expect("valid regex"));

static RE_FRONT_MATTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^---\n.*?\n---\n?").expect("valid regex"));

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Normalise one cell's transcription.
pub fn clean_cell_text(input: &str) -> String {
    let s = input.trim();
    let s = match RE_OUTER_FENCE.captures(s) {
        Some(caps) => caps[1].to_string(),
        None => s.to_string(),
    };
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s = RE_FRONT_MATTER.replace(&s, "").into_owned();
    let s = s
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let s = RE_BLANK_RUN.replace_all(&s, "\n\n").into_owned();
    let s = s.replace(['\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}'], "");
    s.trim().to_string()
}

/// Assemble the markdown document.
///
/// Pages with no text are skipped; the separator carries the 1-based
/// number of the page that follows it.
pub fn render_markdown(doc: &Document, separator: &PageSeparator) -> String {
    let mut out = String::new();
    for page in &doc.pages {
        let body = page
            .cells
            .iter()
            .map(|c| clean_cell_text(&c.text))
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        if body.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push_str(&separator.render(page.index + 1));
        }
        out.push_str(&body);
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

#[derive(Serialize)]
struct JsonEnvelope<'a> {
    schema: &'static str,
    version: u32,
    document: &'a Document,
}

/// Pretty JSON dump of the document.
pub fn render_json(doc: &Document) -> Result<String, ServiceError> {
    serde_json::to_string_pretty(&JsonEnvelope {
        schema: JSON_SCHEMA,
        version: JSON_VERSION,
        document: doc,
    })
    .map_err(|e| ServiceError::Conversion(format!("JSON export failed: {e}")))
}

/// Write `contents` to `path` through a temp file and rename.
pub async fn write_atomic(path: &Path, contents: &str) -> Result<(), ServiceError> {
    let write_err = |source| ServiceError::ArtifactWrite {
        path: path.to_path_buf(),
        source,
    };
    ensure_parent(path).await?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, contents).await.map_err(write_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_err)?;
    Ok(())
}

/// Render and write both artifacts. Returns the markdown.
pub async fn write_artifacts(
    doc: &Document,
    separator: &PageSeparator,
    markdown_path: &Path,
    json_path: &Path,
) -> Result<String, ServiceError> {
    let markdown = render_markdown(doc, separator);
    let json = render_json(doc)?;
    write_atomic(markdown_path, &markdown).await?;
    write_atomic(json_path, &json).await?;
    Ok(markdown)
}
