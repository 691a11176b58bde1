//! Call tree built from the token stream.
//!
//! Openers push a frame, separators close the current argument and a
//! closer pops the frame into a [`Call`] on its parent. Every call keeps
//! the raw text between its parentheses so literal arguments (`like(a b)`,
//! `raw(x > 1)`) can be taken verbatim.

use crate::error::SyntaxIssue;

use super::lexer::{unquote, Token, TokenKind};

/// One comma-separated argument: a sequence of nodes.
pub type Item<'src> = Vec<Node<'src>>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node<'src> {
    Word { text: &'src str, offset: usize },
    Str { value: String, offset: usize },
    Call(Call<'src>),
}

impl Node<'_> {
    pub fn offset(&self) -> usize {
        match self {
            Node::Word { offset, .. } | Node::Str { offset, .. } => *offset,
            Node::Call(call) => call.offset,
        }
    }
}

/// `path.method(args)`, `method(args)` or chained `.method(args)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Call<'src> {
    /// Dotted path before the method; `None` for bare and chained calls.
    pub path: Option<&'src str>,
    pub method: &'src str,
    /// Whether the opener started with `.`.
    pub chained: bool,
    pub offset: usize,
    /// Text between the parentheses.
    pub body: &'src str,
    pub args: Vec<Item<'src>>,
}

impl<'src> Call<'src> {
    fn from_opener(opener: &Token<'src>, body: &'src str, args: Vec<Item<'src>>) -> Self {
        let name = opener.text.trim_end_matches('(');
        let (chained, name) = match name.strip_prefix('.') {
            Some(rest) => (true, rest),
            None => (false, name),
        };
        let (path, method) = match name.rsplit_once('.') {
            Some((path, method)) => (Some(path), method),
            None => (None, name),
        };
        Self {
            path,
            method,
            chained,
            offset: opener.offset,
            body,
            args,
        }
    }
}

struct Frame<'src> {
    opener: Option<Token<'src>>,
    items: Vec<Item<'src>>,
    current: Item<'src>,
}

impl<'src> Frame<'src> {
    fn new(opener: Option<Token<'src>>) -> Self {
        Self {
            opener,
            items: Vec::new(),
            current: Vec::new(),
        }
    }

    fn into_items(mut self) -> Vec<Item<'src>> {
        if !self.current.is_empty() {
            self.items.push(self.current);
        }
        self.items
    }
}

/// Build the list of top-level items from `tokens` of `text`.
pub fn build<'src>(
    text: &'src str,
    tokens: &[Token<'src>],
    issues: &mut Vec<SyntaxIssue>,
) -> Vec<Item<'src>> {
    let mut stack = vec![Frame::new(None)];

    for token in tokens {
        match token.kind {
            TokenKind::Opener => stack.push(Frame::new(Some(*token))),
            TokenKind::Separator => {
                if let Some(frame) = stack.last_mut() {
                    if frame.current.is_empty() {
                        issues.push(SyntaxIssue::new(token.offset, "unexpected ','"));
                    } else {
                        let item = std::mem::take(&mut frame.current);
                        frame.items.push(item);
                    }
                }
            }
            TokenKind::Str => push(
                &mut stack,
                Node::Str {
                    value: unquote(token.text),
                    offset: token.offset,
                },
            ),
            TokenKind::Word => push(
                &mut stack,
                Node::Word {
                    text: token.text,
                    offset: token.offset,
                },
            ),
            TokenKind::Closer => {
                if stack.len() == 1 {
                    issues.push(SyntaxIssue::new(token.offset, "unexpected ')'"));
                    continue;
                }
                let Some(frame) = stack.pop() else {
                    continue;
                };
                let Some(opener) = frame.opener else {
                    continue;
                };
                let body = &text[opener.end()..token.offset];
                let call = Call::from_opener(&opener, body, frame.into_items());
                push(&mut stack, Node::Call(call));
            }
        }
    }

    while stack.len() > 1 {
        if let Some(Frame {
            opener: Some(opener),
            ..
        }) = stack.pop()
        {
            issues.push(SyntaxIssue::new(
                opener.offset,
                format!("unclosed '{}'", opener.text),
            ));
        }
    }

    stack.pop().map(Frame::into_items).unwrap_or_default()
}

fn push<'src>(stack: &mut [Frame<'src>], node: Node<'src>) {
    if let Some(frame) = stack.last_mut() {
        frame.current.push(node);
    }
}
