//! The token stream the parser consumes. Scanning itself is external
//! (§1 non-goals); this module only fixes the shape the scanner
//! produces and the parser assumes.

use serde::{Deserialize, Serialize};

/// The kind of a token, as fixed by §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    Keyword,
    Operator,
    Literal,
    /// A literal synthesized by the parser itself (e.g. by `convert`),
    /// not present in the original source text.
    SyntheticLiteral,
    Comment,
    EndOfFile,
}

/// A decoded literal value. Numeric literals, strings, and comment
/// text are assumed already decoded by the external scanner (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Integer(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

/// A single immutable token. `lowercase_lexeme` is computed lazily and
/// cached on first request, since case-insensitive keyword matching
/// (§4.B `incompleteCaseInsensitive`) is not needed for every token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    #[serde(skip)]
    lowercase_lexeme: std::cell::RefCell<Option<String>>,
    pub start: usize,
    pub line_number: usize,
    pub index: usize,
    pub literal_value: Option<LiteralValue>,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        lexeme: impl Into<String>,
        start: usize,
        line_number: usize,
        index: usize,
    ) -> Self {
        Self {
            kind,
            lexeme: lexeme.into(),
            lowercase_lexeme: std::cell::RefCell::new(None),
            start,
            line_number,
            index,
            literal_value: None,
        }
    }

    pub fn with_literal(mut self, value: LiteralValue) -> Self {
        self.literal_value = Some(value);
        self
    }

    pub fn end_of_file(index: usize, line_number: usize) -> Self {
        Self::new(TokenKind::EndOfFile, "", index, line_number, index)
    }

    /// The lowercased lexeme, computed once and cached.
    pub fn lowercase_lexeme(&self) -> String {
        if let Some(cached) = self.lowercase_lexeme.borrow().as_ref() {
            return cached.clone();
        }
        let lowered = self.lexeme.to_lowercase();
        *self.lowercase_lexeme.borrow_mut() = Some(lowered.clone());
        lowered
    }

    pub fn is_end_of_file(&self) -> bool {
        matches!(self.kind, TokenKind::EndOfFile)
    }
}
