//! Parser for the serialized tree form, e.g. `(+ SE (* LIN PER))`.

use core::str::FromStr;

use super::{KernelTree, NodeId};
use crate::error::KernelError;
use crate::kernel::{BaseKind, CombRule, Leaf};

/// Deepest operator nesting accepted from text.
pub const MAX_DEPTH: usize = 512;

impl FromStr for KernelTree {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parser = Parser {
            src: s,
            pos: 0,
            depth: 0,
            tree: KernelTree::empty(),
        };
        let top = parser.expr()?;
        parser.skip_ws();
        if parser.pos < s.len() {
            return Err(parser.error("trailing input"));
        }
        let mut tree = parser.tree;
        tree.set_top(top);
        tree.compact();
        Ok(tree)
    }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
    tree: KernelTree,
}

impl<'a> Parser<'a> {
    fn error(&self, message: &str) -> KernelError {
        KernelError::Parse {
            pos: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_ws(&mut self) {
        let rest = &self.src[self.pos..];
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    /// Next run of characters up to whitespace or a parenthesis.
    fn word(&mut self) -> &'a str {
        let src = self.src;
        let rest = &src[self.pos..];
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '(' || c == ')')
            .unwrap_or(rest.len());
        self.pos += end;
        &rest[..end]
    }

    fn expr(&mut self) -> Result<NodeId, KernelError> {
        self.skip_ws();
        match self.peek() {
            None => Err(self.error("unexpected end of input")),
            Some(')') => Err(self.error("unexpected ')'")),
            Some('(') => {
                if self.depth == MAX_DEPTH {
                    return Err(self.error("nesting too deep"));
                }
                self.depth += 1;
                self.pos += 1;
                self.skip_ws();
                let start = self.pos;
                let tag = self.word();
                let Some(rule) = CombRule::from_tag(tag) else {
                    let message = format!("unknown operator '{}'", tag);
                    return Err(KernelError::Parse { pos: start, message });
                };
                let op = self.tree.new_operator(rule);
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some(')') => {
                            self.pos += 1;
                            self.depth -= 1;
                            return Ok(op);
                        }
                        None => return Err(self.error("unclosed '('")),
                        Some(_) => {
                            let child = self.expr()?;
                            self.tree.push_child(op, child);
                        }
                    }
                }
            }
            Some(_) => {
                let start = self.pos;
                let tag = self.word();
                match BaseKind::from_tag(tag) {
                    Some(kind) => Ok(self.tree.new_leaf(Leaf::new(kind))),
                    None => {
                        let message = format!("unknown base kernel '{}'", tag);
                        Err(KernelError::Parse { pos: start, message })
                    }
                }
            }
        }
    }
}
