//! Heading-aware Markdown span extraction.
//!
//! Splits a document along its heading structure into retrievable spans
//! rather than treating the whole file as one opaque block.

use crate::hashing::span_hash;
use crate::types::{Span, SpanKind};

const SIZE_CEILING: usize = 2_500;

struct HeadingFrame {
    level: usize,
    title: String,
}

/// Extract one span per heading section, splitting any section whose body
/// exceeds [`SIZE_CEILING`] characters into multiple paragraph-aligned
/// spans sharing the same heading-path symbol.
pub fn extract(file_path: &str, content: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut stack: Vec<HeadingFrame> = Vec::new();
    let mut section_start_line = 1usize;
    let mut section_lines: Vec<&str> = Vec::new();
    let lines: Vec<&str> = content.lines().collect();

    let flush = |path: &str, lines: &[&str], start_line: usize, spans: &mut Vec<Span>| {
        if lines.is_empty() {
            return;
        }
        let body = lines.join("\n");
        if body.trim().is_empty() {
            return;
        }
        emit_sized(file_path, path, &body, start_line, spans);
    };

    for (idx, line) in lines.iter().enumerate() {
        if let Some((level, title)) = parse_heading(line) {
            flush(&heading_path(&stack), &section_lines, section_start_line, &mut spans);
            section_lines.clear();
            section_start_line = idx + 1;

            while stack.last().map(|f| f.level >= level).unwrap_or(false) {
                stack.pop();
            }
            stack.push(HeadingFrame { level, title });
        } else {
            section_lines.push(line);
        }
    }
    flush(&heading_path(&stack), &section_lines, section_start_line, &mut spans);

    spans
}

fn parse_heading(line: &str) -> Option<(usize, String)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = trimmed[level..].trim();
    if rest.is_empty() {
        return None;
    }
    Some((level, rest.to_string()))
}

fn heading_path(stack: &[HeadingFrame]) -> String {
    if stack.is_empty() {
        return "<preamble>".to_string();
    }
    stack
        .iter()
        .map(|f| format!("{} {}", "#".repeat(f.level), f.title))
        .collect::<Vec<_>>()
        .join(" > ")
}

fn emit_sized(file_path: &str, symbol: &str, body: &str, start_line: usize, spans: &mut Vec<Span>) {
    if body.len() <= SIZE_CEILING {
        push_span(file_path, symbol, body, start_line, start_line + body.lines().count().saturating_sub(1), spans);
        return;
    }

    let paragraphs: Vec<&str> = body.split("\n\n").collect();
    let mut chunk = String::new();
    let mut chunk_start_line = start_line;
    let mut cursor_line = start_line;

    for para in paragraphs {
        let para_lines = para.lines().count().max(1);
        if !chunk.is_empty() && chunk.len() + para.len() + 2 > SIZE_CEILING {
            let chunk_end_line = cursor_line.saturating_sub(1).max(chunk_start_line);
            push_span(file_path, symbol, &chunk, chunk_start_line, chunk_end_line, spans);
            chunk.clear();
            chunk_start_line = cursor_line;
        }
        if !chunk.is_empty() {
            chunk.push_str("\n\n");
        }
        chunk.push_str(para);
        cursor_line += para_lines + 1;
    }
    if !chunk.trim().is_empty() {
        let chunk_end_line = cursor_line.saturating_sub(1).max(chunk_start_line);
        push_span(file_path, symbol, &chunk, chunk_start_line, chunk_end_line, spans);
    }
}

fn push_span(file_path: &str, symbol: &str, content: &str, start_line: usize, end_line: usize, spans: &mut Vec<Span>) {
    let hash = span_hash(content);
    spans.push(Span {
        file_path: file_path.to_string(),
        symbol: symbol.to_string(),
        kind: SpanKind::DocSection,
        start_line,
        end_line,
        byte_start: 0,
        byte_end: content.len(),
        language: "markdown".to_string(),
        span_hash: hash,
        content: content.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_by_heading_path() {
        let doc = "# Install\n\nRun the installer.\n\n## Prereqs\n\nNeeds rust.\n";
        let spans = extract("README.md", doc);
        assert!(spans.iter().any(|s| s.symbol == "# Install"));
        assert!(spans.iter().any(|s| s.symbol == "# Install > ## Prereqs"));
    }

    #[test]
    fn oversized_section_splits_into_multiple_spans() {
        let para = "word ".repeat(600); // ~3000 chars, one paragraph
        let doc = format!("# Big\n\n{para}\n\n{para}\n");
        let spans = extract("doc.md", &doc);
        let big: Vec<_> = spans.iter().filter(|s| s.symbol == "# Big").collect();
        assert!(big.len() >= 2, "expected the oversized section to split, got {}", big.len());
        for s in &big {
            assert!(s.content.len() <= SIZE_CEILING + para.len());
        }
    }

    #[test]
    fn preamble_before_first_heading_gets_its_own_span() {
        let doc = "intro text\n\n# First\n\nbody\n";
        let spans = extract("doc.md", doc);
        assert!(spans.iter().any(|s| s.symbol == "<preamble>"));
    }
}
