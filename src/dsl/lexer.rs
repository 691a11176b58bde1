//! Tokenizer for the query DSL.
//!
//! A single regex cuts the text into openers (`path.method(`), closers,
//! separators, quoted strings and bare words. Whitespace is dropped; any
//! text no alternative covers is reported as a syntax issue.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::SyntaxIssue;

static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        (?P<opener>(?:\.?[A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)?\()
        | (?P<closer>\))
        | (?P<sep>,)
        | (?P<string>"(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*')
        | (?P<word>[^\s(),"']+)
        | (?P<ws>\s+)
        "#,
    )
    .unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `name(`, `path.method(`, a chained `.method(` or a bare `(`.
    Opener,
    Closer,
    Separator,
    /// Quoted string, quotes included.
    Str,
    Word,
}

/// A token with its byte offset in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub text: &'src str,
    pub offset: usize,
}

impl Token<'_> {
    pub fn end(&self) -> usize {
        self.offset + self.text.len()
    }
}

/// Split `text` into tokens. Uncovered text becomes one issue per gap.
pub fn tokenize(text: &str) -> (Vec<Token<'_>>, Vec<SyntaxIssue>) {
    let mut tokens = Vec::new();
    let mut issues = Vec::new();
    let mut cursor = 0;

    for caps in TOKEN.captures_iter(text) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        if whole.start() > cursor {
            issues.push(unexpected(text, cursor, whole.start()));
        }
        cursor = whole.end();

        let kind = if caps.name("opener").is_some() {
            TokenKind::Opener
        } else if caps.name("closer").is_some() {
            TokenKind::Closer
        } else if caps.name("sep").is_some() {
            TokenKind::Separator
        } else if caps.name("string").is_some() {
            TokenKind::Str
        } else if caps.name("word").is_some() {
            TokenKind::Word
        } else {
            continue;
        };
        tokens.push(Token {
            kind,
            text: whole.as_str(),
            offset: whole.start(),
        });
    }
    if cursor < text.len() {
        issues.push(unexpected(text, cursor, text.len()));
    }

    (tokens, issues)
}

fn unexpected(text: &str, start: usize, end: usize) -> SyntaxIssue {
    let fragment = &text[start..end];
    if fragment.starts_with('"') || fragment.starts_with('\'') {
        SyntaxIssue::new(start, "unterminated string")
    } else {
        SyntaxIssue::new(start, format!("unexpected '{}'", fragment))
    }
}

/// Strip the quotes of a string token and resolve escapes.
pub fn unquote(token: &str) -> String {
    let inner = token
        .get(1..token.len().saturating_sub(1))
        .unwrap_or_default();
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
