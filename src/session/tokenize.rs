//! Snippet tokenization using tree-sitter C/C++ grammars.
//!
//! Used to walk into call-flow children: a small text fragment (a hunk, a
//! few lines around a position) is parsed and its identifier positions are
//! recovered, offset by the anchor position of the fragment inside its file.
//! Whole-file analysis stays with the external indexer.

use std::path::Path;

/// Grammar choice for a snippet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetLanguage {
    C,
    Cpp,
}

/// Pick a grammar from a file extension. Headers without a C++ extension
/// parse as C; the C grammar is forgiving enough for shared headers.
pub fn language_for_path(path: &Path) -> SnippetLanguage {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        "c" | "h" => SnippetLanguage::C,
        _ => SnippetLanguage::Cpp,
    }
}

/// An identifier with its absolute position (0-indexed, protocol convention).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierToken {
    pub text: String,
    pub line: u32,
    pub character: u32,
}

/// Lightweight local parser for text fragments.
///
/// Grammar initialization failures degrade the tokenizer instead of failing
/// the session: `tokenize` then returns no tokens, which callers treat as
/// "nothing to walk into", not an error.
pub struct SnippetTokenizer {
    c: Option<tree_sitter::Parser>,
    cpp: Option<tree_sitter::Parser>,
}

impl SnippetTokenizer {
    pub fn new() -> Self {
        Self {
            c: make_parser(&tree_sitter_c::language(), "c"),
            cpp: make_parser(&tree_sitter_cpp::language(), "cpp"),
        }
    }

    /// True if at least one grammar backend loaded.
    pub fn available(&self) -> bool {
        self.c.is_some() || self.cpp.is_some()
    }

    /// Extract identifier tokens from a snippet.
    ///
    /// `anchor_line`/`anchor_character` locate the snippet's first byte
    /// within its file; returned positions are absolute.
    pub fn tokenize(
        &mut self,
        snippet: &str,
        language: SnippetLanguage,
        anchor_line: u32,
        anchor_character: u32,
    ) -> Vec<IdentifierToken> {
        let parser = match language {
            SnippetLanguage::C => self.c.as_mut().or(self.cpp.as_mut()),
            SnippetLanguage::Cpp => self.cpp.as_mut().or(self.c.as_mut()),
        };
        let parser = match parser {
            Some(p) => p,
            None => return Vec::new(),
        };

        let tree = match parser.parse(snippet, None) {
            Some(tree) => tree,
            None => return Vec::new(),
        };

        let mut tokens = Vec::new();
        collect_identifiers(
            &tree.root_node(),
            snippet.as_bytes(),
            anchor_line,
            anchor_character,
            &mut tokens,
        );
        tokens
    }
}

impl Default for SnippetTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

fn make_parser(language: &tree_sitter::Language, name: &str) -> Option<tree_sitter::Parser> {
    let mut parser = tree_sitter::Parser::new();
    match parser.set_language(language) {
        Ok(()) => Some(parser),
        Err(e) => {
            log::warn!("tree-sitter {} grammar unavailable: {}", name, e);
            None
        }
    }
}

fn collect_identifiers(
    node: &tree_sitter::Node,
    source: &[u8],
    anchor_line: u32,
    anchor_character: u32,
    out: &mut Vec<IdentifierToken>,
) {
    if matches!(
        node.kind(),
        "identifier" | "field_identifier" | "type_identifier"
    ) {
        let start = node.start_byte();
        let end = node.end_byte();
        if start <= end && end <= source.len() {
            if let Ok(text) = std::str::from_utf8(&source[start..end]) {
                let row = node.start_position().row as u32;
                let col = node.start_position().column as u32;
                out.push(IdentifierToken {
                    text: text.to_string(),
                    line: anchor_line + row,
                    // Columns only shift on the snippet's first line.
                    character: if row == 0 { anchor_character + col } else { col },
                });
            }
        }
        return;
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_identifiers(&child, source, anchor_line, anchor_character, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_language_for_path() {
        assert_eq!(language_for_path(&PathBuf::from("a.c")), SnippetLanguage::C);
        assert_eq!(language_for_path(&PathBuf::from("a.h")), SnippetLanguage::C);
        assert_eq!(
            language_for_path(&PathBuf::from("a.cpp")),
            SnippetLanguage::Cpp
        );
        assert_eq!(
            language_for_path(&PathBuf::from("a.hpp")),
            SnippetLanguage::Cpp
        );
    }

    #[test]
    fn test_tokenizer_available() {
        let tokenizer = SnippetTokenizer::new();
        assert!(tokenizer.available());
    }

    #[test]
    fn test_tokenize_c_call() {
        let mut tokenizer = SnippetTokenizer::new();
        let snippet = "int foo(void) { return bar(baz); }";
        let tokens = tokenizer.tokenize(snippet, SnippetLanguage::C, 10, 0);

        let names: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert!(names.contains(&"foo"));
        assert!(names.contains(&"bar"));
        assert!(names.contains(&"baz"));
        // Keywords are not identifiers.
        assert!(!names.contains(&"return"));
        assert!(!names.contains(&"int"));
    }

    #[test]
    fn test_anchor_offsets() {
        let mut tokenizer = SnippetTokenizer::new();
        let snippet = "x = f(y);\nz = g(w);";
        let tokens = tokenizer.tokenize(snippet, SnippetLanguage::C, 5, 4);

        let x = tokens.iter().find(|t| t.text == "x").unwrap();
        assert_eq!(x.line, 5);
        assert_eq!(x.character, 4); // first snippet line shifts by anchor column

        let z = tokens.iter().find(|t| t.text == "z").unwrap();
        assert_eq!(z.line, 6);
        assert_eq!(z.character, 0); // later lines keep their own columns
    }

    #[test]
    fn test_cpp_members() {
        let mut tokenizer = SnippetTokenizer::new();
        let snippet = "void Widget::render() { canvas.draw(shape); }";
        let tokens = tokenizer.tokenize(snippet, SnippetLanguage::Cpp, 0, 0);
        let names: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert!(names.contains(&"render"));
        assert!(names.contains(&"draw"));
        assert!(names.contains(&"canvas"));
    }

    #[test]
    fn test_garbage_snippet_yields_tokens_or_nothing() {
        // tree-sitter is error tolerant; the contract is only "never panic".
        let mut tokenizer = SnippetTokenizer::new();
        let tokens = tokenizer.tokenize("@@@ ;;; )))", SnippetLanguage::C, 0, 0);
        assert!(tokens.iter().all(|t| !t.text.is_empty()));
    }
}
