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

pub mod prefix;

use crate::names::{NameId, NameTable};

// Every operation the AST can carry. The long names double as the keywords
// of the textual prefix format exchanged between front end and back end.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Operation {
    Add,
    Sub,
    UnarySub,
    Mul,
    Div,
    Pow,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Cot,
    Assign,
    LineEnd,
    If,
    While,
    Less,
    Greater,
    LessEq,
    GreaterEq,
    Eq,
    NotEq,
    And,
    Or,
    Print,
    Read,
    Comma,
    TypeInt,
    Type,
    NewFunc,
    Func,
    FuncCall,
    Return,
}

impl Operation {
    pub fn long_name(self) -> &'static str {
        match self {
            Operation::Add => "ADD",
            Operation::Sub => "SUB",
            Operation::UnarySub => "UNARY_SUB",
            Operation::Mul => "MUL",
            Operation::Div => "DIV",
            Operation::Pow => "POW",
            Operation::Sqrt => "SQRT",
            Operation::Sin => "SIN",
            Operation::Cos => "COS",
            Operation::Tan => "TAN",
            Operation::Cot => "COT",
            Operation::Assign => "ASSIGN",
            Operation::LineEnd => "LINE_END",
            Operation::If => "IF",
            Operation::While => "WHILE",
            Operation::Less => "LESS",
            Operation::Greater => "GREATER",
            Operation::LessEq => "LESS_EQ",
            Operation::GreaterEq => "GREATER_EQ",
            Operation::Eq => "EQ",
            Operation::NotEq => "NOT_EQ",
            Operation::And => "AND",
            Operation::Or => "OR",
            Operation::Print => "PRINT",
            Operation::Read => "READ",
            Operation::Comma => "COMMA",
            Operation::TypeInt => "TYPE_INT",
            Operation::Type => "TYPE",
            Operation::NewFunc => "NEW_FUNC",
            Operation::Func => "FUNC",
            Operation::FuncCall => "FUNC_CALL",
            Operation::Return => "RETURN",
        }
    }

    pub fn from_long_name(name: &str) -> Option<Operation> {
        let op = match name {
            "ADD" => Operation::Add,
            "SUB" => Operation::Sub,
            "UNARY_SUB" => Operation::UnarySub,
            "MUL" => Operation::Mul,
            "DIV" => Operation::Div,
            "POW" => Operation::Pow,
            "SQRT" => Operation::Sqrt,
            "SIN" => Operation::Sin,
            "COS" => Operation::Cos,
            "TAN" => Operation::Tan,
            "COT" => Operation::Cot,
            "ASSIGN" => Operation::Assign,
            "LINE_END" => Operation::LineEnd,
            "IF" => Operation::If,
            "WHILE" => Operation::While,
            "LESS" => Operation::Less,
            "GREATER" => Operation::Greater,
            "LESS_EQ" => Operation::LessEq,
            "GREATER_EQ" => Operation::GreaterEq,
            "EQ" => Operation::Eq,
            "NOT_EQ" => Operation::NotEq,
            "AND" => Operation::And,
            "OR" => Operation::Or,
            "PRINT" => Operation::Print,
            "READ" => Operation::Read,
            "COMMA" => Operation::Comma,
            "TYPE_INT" => Operation::TypeInt,
            "TYPE" => Operation::Type,
            "NEW_FUNC" => Operation::NewFunc,
            "FUNC" => Operation::Func,
            "FUNC_CALL" => Operation::FuncCall,
            "RETURN" => Operation::Return,
            _ => return None,
        };
        Some(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AstValue {
    Num(i64),
    Name(NameId),
    StringLiteral(NameId),
    Op(Operation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AstNode {
    pub value: AstValue,
    pub left: Option<Box<AstNode>>,
    pub right: Option<Box<AstNode>>,
}

impl AstNode {
    pub fn num(value: i64) -> AstNode {
        AstNode {
            value: AstValue::Num(value),
            left: None,
            right: None,
        }
    }

    pub fn name(id: NameId) -> AstNode {
        AstNode {
            value: AstValue::Name(id),
            left: None,
            right: None,
        }
    }

    pub fn string_literal(id: NameId) -> AstNode {
        AstNode {
            value: AstValue::StringLiteral(id),
            left: None,
            right: None,
        }
    }

    pub fn op(
        operation: Operation,
        left: Option<Box<AstNode>>,
        right: Option<Box<AstNode>>,
    ) -> AstNode {
        AstNode {
            value: AstValue::Op(operation),
            left,
            right,
        }
    }

    pub fn boxed(self) -> Box<AstNode> {
        Box::new(self)
    }
}

/// A parsed program: the tree plus the table every `Name`/`StringLiteral`
/// node indexes into.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub root: Option<AstNode>,
    pub names: NameTable,
}
