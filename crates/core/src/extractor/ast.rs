//! tree-sitter-backed span extraction.
//!
//! `language_for_ext` picks a grammar, `walk_node`/`classify_node` descend
//! the parse tree, `extract_name` pulls the identifier for each span. The
//! walk produces `Span` records carrying content and byte offsets, ready
//! for `replace_spans`.

use crate::types::{Span, SpanKind};
use tree_sitter::{Language, Node, Parser};

fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
        "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "py" | "pyi" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" | "h" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

pub fn supports_ext(ext: &str) -> bool {
    language_for_ext(ext).is_some()
}

fn classify_node(kind: &str) -> Option<SpanKind> {
    match kind {
        "function_item" | "function_declaration" | "function_definition" => Some(SpanKind::Function),
        "method_definition" | "method_declaration" => Some(SpanKind::Method),
        "struct_item" | "struct_specifier" | "class_declaration" | "class_definition" | "class_specifier" => {
            Some(SpanKind::Class)
        }
        "trait_item" | "impl_item" | "interface_declaration" | "enum_item" | "enum_specifier" | "enum_declaration" => {
            Some(SpanKind::Class)
        }
        _ => None,
    }
}

fn is_go(ext: &str) -> bool {
    ext == "go"
}

fn extract_name<'a>(node: &Node<'a>, source: &'a [u8]) -> Option<String> {
    for field in ["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim().to_string();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }
    if node.kind() == "impl_item" {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }
    if matches!(node.kind(), "function_definition" | "function_item") {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(name_node) = decl.child_by_field_name("declarator") {
                if let Ok(text) = name_node.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
        }
    }
    None
}

fn walk(node: &Node, source: &[u8], ext: &str, file_path: &str, language: &str, out: &mut Vec<Span>, in_container: bool) {
    let kind = node.kind();
    if let Some(sym_kind) = classify_node(kind) {
        let name = extract_name(node, source).unwrap_or_else(|| "<anonymous>".to_string());
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;
        let final_kind = if in_container && sym_kind == SpanKind::Function && !is_go(ext) {
            SpanKind::Method
        } else {
            sym_kind
        };
        let content = node.utf8_text(source).unwrap_or("").to_string();
        let span_hash = crate::hashing::span_hash(&content);
        out.push(Span {
            file_path: file_path.to_string(),
            symbol: name,
            kind: final_kind,
            start_line,
            end_line,
            byte_start: node.start_byte(),
            byte_end: node.end_byte(),
            language: language.to_string(),
            span_hash,
            content,
        });

        let next_container = matches!(final_kind, SpanKind::Class);
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk(&child, source, ext, file_path, language, out, next_container);
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk(&child, source, ext, file_path, language, out, in_container);
        }
    }
}

/// Parse `content` and return its spans, or `None` if `ext` has no grammar.
pub fn extract(file_path: &str, content: &str, ext: &str, language: &str) -> Option<Vec<Span>> {
    let lang = language_for_ext(ext)?;
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;
    let tree = parser.parse(content, None)?;
    let root = tree.root_node();
    let source = content.as_bytes();

    let mut spans = Vec::new();
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        walk(&child, source, ext, file_path, language, &mut spans, false);
    }
    Some(spans)
}
