//! Sidecar rendering for opaque binary formats.
//!
//! A thin, explicitly-scoped adapter trait with a single pure-Rust
//! implementation. Formats without an available renderer produce
//! `RagError::Extractor`, never a panic.

use crate::error::{RagError, Result};

/// Renders an opaque source file into Markdown text for downstream
/// extraction. Implementations are pure — no filesystem writes — so the
/// caller controls sidecar placement and orphan cleanup.
pub trait SidecarRenderer: Send + Sync {
    fn render(&self, bytes: &[u8]) -> Result<String>;
}

pub fn sidecar_path_for(rel_path: &str) -> String {
    format!("{rel_path}.sidecar.md")
}

/// Renders plain-text-recoverable RTF by stripping control words. PDF/DOCX/
/// PPTX rendering is intentionally out of scope — no pure-Rust renderer in
/// this crate's dependency stack covers them — so those extensions are
/// reported as unsupported rather than silently skipped.
pub struct RtfRenderer;

impl SidecarRenderer for RtfRenderer {
    fn render(&self, bytes: &[u8]) -> Result<String> {
        let text = String::from_utf8_lossy(bytes);
        let mut out = String::new();
        let mut chars = text.chars().peekable();
        let mut depth = 0i32;
        while let Some(c) = chars.next() {
            match c {
                '{' => depth += 1,
                '}' => depth -= 1,
                '\\' => {
                    while let Some(&next) = chars.peek() {
                        if next.is_alphanumeric() {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    if chars.peek() == Some(&' ') {
                        chars.next();
                    }
                }
                _ if depth <= 1 => out.push(c),
                _ => {}
            }
        }
        Ok(out.trim().to_string())
    }
}

pub fn renderer_for_ext(ext: &str) -> Option<Box<dyn SidecarRenderer>> {
    match ext {
        "rtf" => Some(Box::new(RtfRenderer)),
        _ => None,
    }
}

pub fn render_sidecar(ext: &str, bytes: &[u8]) -> Result<String> {
    let renderer = renderer_for_ext(ext)
        .ok_or_else(|| RagError::Extractor(format!("no sidecar renderer available for .{ext}")))?;
    renderer.render(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtf_strips_control_words() {
        let rtf = br"{\rtf1\ansi Hello \b World\b0 !}";
        let rendered = render_sidecar("rtf", rtf).unwrap();
        assert!(rendered.contains("Hello"));
        assert!(rendered.contains("World"));
        assert!(!rendered.contains("\\rtf1"));
    }

    #[test]
    fn unsupported_format_is_an_error_not_a_panic() {
        assert!(render_sidecar("pdf", b"%PDF-1.4").is_err());
    }

    #[test]
    fn sidecar_path_appends_suffix() {
        assert_eq!(sidecar_path_for("docs/spec.pdf"), "docs/spec.pdf.sidecar.md");
    }
}
