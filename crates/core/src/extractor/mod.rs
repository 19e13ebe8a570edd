//! Extractor: turns file bytes into an ordered sequence of spans.
//! Dispatches by extension to the tree-sitter AST walker, the Markdown
//! heading splitter, a sidecar renderer for opaque binary formats, or a
//! whole-file fallback span for everything else so no file is ever
//! silently dropped from the index.

#[cfg(feature = "treesitter")]
pub mod ast;
pub mod markdown;
pub mod sidecar;

use crate::error::Result;
use crate::hashing::span_hash;
use crate::types::{Span, SpanKind};

const OPAQUE_EXTENSIONS: &[&str] = &["pdf", "docx", "pptx", "rtf"];

pub fn is_opaque_format(ext: &str) -> bool {
    OPAQUE_EXTENSIONS.contains(&ext)
}

fn language_name(ext: &str) -> &'static str {
    match ext {
        "rs" => "rust",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "py" | "pyi" => "python",
        "go" => "go",
        "c" | "h" => "c",
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "java" => "java",
        "md" | "markdown" => "markdown",
        _ => "text",
    }
}

/// Extract spans for one file's current content. `ext` is the lowercased
/// extension without the dot; `sidecar_content`, when present, is the
/// rendered Markdown of an opaque source and takes priority over `content`.
pub fn extract_spans(file_path: &str, ext: &str, content: &str, sidecar_content: Option<&str>) -> Result<Vec<Span>> {
    if let Some(sidecar) = sidecar_content {
        return Ok(markdown::extract(file_path, sidecar));
    }

    if ext == "md" || ext == "markdown" {
        return Ok(markdown::extract(file_path, content));
    }

    #[cfg(feature = "treesitter")]
    {
        if ast::supports_ext(ext) {
            if let Some(spans) = ast::extract(file_path, content, ext, language_name(ext)) {
                if !spans.is_empty() {
                    return Ok(spans);
                }
            }
        }
    }

    Ok(vec![whole_file_span(file_path, ext, content)])
}

fn whole_file_span(file_path: &str, ext: &str, content: &str) -> Span {
    let hash = span_hash(content);
    Span {
        file_path: file_path.to_string(),
        symbol: file_path.to_string(),
        kind: SpanKind::TopLevelBlock,
        start_line: 1,
        end_line: content.lines().count().max(1),
        byte_start: 0,
        byte_end: content.len(),
        language: language_name(ext).to_string(),
        span_hash: hash,
        content: content.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_extension_yields_whole_file_span() {
        let spans = extract_spans("notes.txt", "txt", "just some plain notes", None).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].kind, SpanKind::TopLevelBlock);
    }

    #[test]
    fn markdown_extension_dispatches_to_heading_splitter() {
        let spans = extract_spans("README.md", "md", "# Title\n\nbody text\n", None).unwrap();
        assert!(spans.iter().any(|s| s.symbol == "# Title"));
    }

    #[test]
    fn sidecar_content_overrides_raw_bytes_dispatch() {
        let spans = extract_spans("doc.pdf", "pdf", "", Some("# Rendered\n\nfrom sidecar\n")).unwrap();
        assert!(spans.iter().any(|s| s.symbol == "# Rendered"));
    }

    #[test]
    fn rust_extension_dispatches_to_ast_walker() {
        let spans = extract_spans("a.rs", "rs", "fn foo() {}\n", None).unwrap();
        assert!(spans.iter().any(|s| s.symbol == "foo"));
    }
}
