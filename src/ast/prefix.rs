/*
Copyright 2025 Connor Nolan

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

//! The prefix text format exchanged between the front end and the back end:
//! `node ::= "nil" | "(" value node node ")"`. String literals are written
//! with surrounding double quotes; everything else is a bare word.

use crate::ast::{Ast, AstNode, AstValue, Operation};
use crate::errors::CompilerError;
use crate::names::NameTable;

pub fn write_ast(ast: &Ast) -> String {
    let mut out = String::new();
    write_node(ast.root.as_ref(), &ast.names, &mut out);
    out.push('\n');
    out
}

fn write_node(node: Option<&AstNode>, names: &NameTable, out: &mut String) {
    let Some(node) = node else {
        out.push_str("nil ");
        return;
    };

    out.push('(');
    match node.value {
        AstValue::Num(value) => out.push_str(&format!("{} ", value)),
        AstValue::Name(id) => out.push_str(&format!("{} ", names.text(id))),
        AstValue::StringLiteral(id) => out.push_str(&format!("\"{}\" ", names.text(id))),
        AstValue::Op(op) => out.push_str(&format!("{} ", op.long_name())),
    }

    write_node(node.left.as_deref(), names, out);
    write_node(node.right.as_deref(), names, out);

    out.push(')');
}

pub fn read_ast(text: &str) -> Result<Ast, CompilerError> {
    let mut cursor = Cursor::new(text);
    let mut names = NameTable::new();

    let root = read_node(&mut cursor, &mut names)?;

    Ok(Ast { root, names })
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str) -> Self {
        Cursor {
            bytes: text.as_bytes(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(byte)
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(byte) if byte.is_ascii_whitespace()) {
            self.bump();
        }
    }

    fn error(&self, reason: impl Into<String>) -> CompilerError {
        CompilerError::SyntaxError {
            line: self.line,
            column: self.column,
            reason: reason.into(),
        }
    }
}

fn read_node(
    cursor: &mut Cursor<'_>,
    names: &mut NameTable,
) -> Result<Option<AstNode>, CompilerError> {
    cursor.skip_whitespace();

    if cursor.peek() != Some(b'(') {
        let word = read_word(cursor);
        if word != "nil" {
            return Err(cursor.error(format!("expected 'nil' or '(', found '{}'", word)));
        }
        return Ok(None);
    }
    cursor.bump();

    cursor.skip_whitespace();
    let value = read_value(cursor, names)?;

    let left = read_node(cursor, names)?;
    let right = read_node(cursor, names)?;

    cursor.skip_whitespace();
    if cursor.peek() != Some(b')') {
        return Err(cursor.error("expected ')'"));
    }
    cursor.bump();

    Ok(Some(AstNode {
        value,
        left: left.map(AstNode::boxed),
        right: right.map(AstNode::boxed),
    }))
}

fn read_value(
    cursor: &mut Cursor<'_>,
    names: &mut NameTable,
) -> Result<AstValue, CompilerError> {
    match cursor.peek() {
        Some(b'"') => {
            cursor.bump();
            let mut body = String::new();
            loop {
                match cursor.bump() {
                    Some(b'"') => break,
                    Some(byte) => body.push(byte as char),
                    None => return Err(cursor.error("unterminated string literal")),
                }
            }
            Ok(AstValue::StringLiteral(names.intern(&body)))
        }
        Some(byte) if byte.is_ascii_digit() || byte == b'-' => {
            let word = read_word(cursor);
            let value = word
                .parse::<i64>()
                .map_err(|_| cursor.error(format!("malformed number '{}'", word)))?;
            Ok(AstValue::Num(value))
        }
        Some(_) => {
            let word = read_word(cursor);
            if word.is_empty() {
                return Err(cursor.error("expected a node value"));
            }
            if let Some(op) = Operation::from_long_name(&word) {
                Ok(AstValue::Op(op))
            } else {
                Ok(AstValue::Name(names.intern(&word)))
            }
        }
        None => Err(cursor.error("unexpected end of input")),
    }
}

fn read_word(cursor: &mut Cursor<'_>) -> String {
    let mut word = String::new();
    while let Some(byte) = cursor.peek() {
        if byte.is_ascii_whitespace() || byte == b'(' || byte == b')' {
            break;
        }
        word.push(byte as char);
        cursor.bump();
    }
    word
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_single_number() {
        let ast = Ast {
            root: Some(AstNode::num(57)),
            names: NameTable::new(),
        };
        assert_eq!(write_ast(&ast), "(57 nil nil )\n");
    }

    #[test]
    fn test_read_rejects_garbage() {
        assert!(read_ast("(BOGUS_OP nil nil").is_err());
        assert!(read_ast("random").is_err());
    }

    #[test]
    fn test_round_trip_with_literal() {
        let mut names = NameTable::new();
        let hi = names.intern("Hi");
        let ast = Ast {
            root: Some(AstNode::op(
                Operation::Print,
                Some(AstNode::string_literal(hi).boxed()),
                None,
            )),
            names,
        };

        let text = write_ast(&ast);
        let reread = read_ast(&text).unwrap();

        assert_eq!(reread, ast);
    }
}
