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

//! Recursive-descent parser, one function per nonterminal:
//!
//! ```text
//! Program     -> Func+ ProgramEnd
//! Func        -> Type Name FuncParams? '57' Op '{'
//! FuncParams  -> (Type Name)+
//! Op          -> If | While | Block | VarDef | Assign | Print | Return
//! Block       -> '57' Op+ '{'
//! If          -> '57?' Or '57' Op          While -> '57!' Or '57' Op
//! VarDef      -> Type Name '==' Or         Assign -> Name '==' Or
//! Print       -> '.' (StringLiteral | Or)  Return -> Or
//! Or          -> And ('or' And)*           And -> Cmp ('and' Cmp)*
//! Cmp         -> AddSub (cmp-op AddSub)*
//! AddSub      -> MulDiv (add-op MulDiv)*   MulDiv -> Pow (mul-op Pow)*
//! Pow         -> Call ('^' Call)*
//! Call        -> Builtin | UserCall | Expr
//! Builtin     -> (sin|cos|tan|cot|sqrt) '(' Or ')' | '{'
//! UserCall    -> Name '{' Or* '57'
//! Expr        -> '(' Or ')' | Number | Name
//! ```
//!
//! Simple statements consume a trailing `57`; blocks, `if` and `while` do
//! not. A function body is always a block.

use crate::ast::{Ast, AstNode, Operation};
use crate::errors::CompilerError;
use crate::lexer::{tokenize, LangOp, Token, TokenValue};
use crate::names::{NameId, NameTable};

/// Lexes and parses a whole program.
pub fn parse_source(source: &str) -> Result<Ast, CompilerError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(&tokens);

    let root = parser.parse_program()?;

    log::debug!("parsed {} interned names", parser.names.len());

    Ok(Ast {
        root: Some(root),
        names: parser.names,
    })
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    names: NameTable,
    /// Names declared in the function being parsed (parameters and locals).
    scope: Vec<NameId>,
    /// Function names declared so far.
    functions: Vec<NameId>,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            names: NameTable::new(),
            scope: Vec::new(),
            functions: Vec::new(),
        }
    }

    fn current(&self) -> &Token {
        // The ProgramEnd sentinel is never consumed, so `pos` stays in range.
        &self.tokens[self.pos]
    }

    fn describe(value: &TokenValue) -> String {
        match value {
            TokenValue::Num(n) => format!("number {}", n),
            TokenValue::Name(name) => format!("name '{}'", name),
            TokenValue::StringLiteral(_) => "string literal".to_string(),
            TokenValue::Op(op) => format!("{:?}", op),
        }
    }

    fn syntax_error(&self, expected: &str) -> CompilerError {
        let token = self.current();
        CompilerError::SyntaxError {
            line: token.line,
            column: token.column,
            reason: format!("expected {}, found {}", expected, Self::describe(&token.value)),
        }
    }

    fn at_op(&self, op: LangOp) -> bool {
        self.current().value == TokenValue::Op(op)
    }

    fn at_op_ahead(&self, offset: usize, op: LangOp) -> bool {
        matches!(self.tokens.get(self.pos + offset),
                 Some(token) if token.value == TokenValue::Op(op))
    }

    fn consume_op(&mut self, op: LangOp, expected: &str) -> Result<(), CompilerError> {
        if !self.at_op(op) {
            return Err(self.syntax_error(expected));
        }
        self.pos += 1;
        Ok(())
    }

    // Program -> Func+ ProgramEnd
    fn parse_program(&mut self) -> Result<AstNode, CompilerError> {
        let mut root = self.parse_func()?;

        while !self.at_op(LangOp::ProgramEnd) {
            let func = self.parse_func()?;
            root = AstNode::op(Operation::NewFunc, Some(root.boxed()), Some(func.boxed()));
        }

        Ok(root)
    }

    // Func -> Type Name FuncParams? '57' Op '{'
    // The trailing '{' is consumed by the body block.
    fn parse_func(&mut self) -> Result<AstNode, CompilerError> {
        self.scope.clear();

        let type_node = self.parse_type()?;
        let mut func_name = self.declare_function()?;

        func_name.left = self.parse_func_params()?.map(AstNode::boxed);

        if !self.at_op(LangOp::FiftySeven) {
            return Err(self.syntax_error("'57' opening the function body"));
        }

        func_name.right = Some(self.parse_op()?.boxed());

        let func = AstNode::op(Operation::Func, Some(func_name.boxed()), None);
        Ok(AstNode::op(
            Operation::Type,
            Some(type_node.boxed()),
            Some(func.boxed()),
        ))
    }

    // Type -> '575757'
    fn parse_type(&mut self) -> Result<AstNode, CompilerError> {
        self.consume_op(LangOp::TypeInt, "a type")?;
        Ok(AstNode::op(Operation::TypeInt, None, None))
    }

    // FuncParams -> (Type Name)+   (comma-free, Pascal style)
    fn parse_func_params(&mut self) -> Result<Option<AstNode>, CompilerError> {
        if !self.at_op(LangOp::TypeInt) {
            return Ok(None);
        }

        let mut params = self.parse_one_param()?;

        while !self.at_op(LangOp::FiftySeven) {
            let param = self.parse_one_param()?;
            params = AstNode::op(Operation::Comma, Some(params.boxed()), Some(param.boxed()));
        }

        Ok(Some(params))
    }

    fn parse_one_param(&mut self) -> Result<AstNode, CompilerError> {
        let type_node = self.parse_type()?;
        let name = self.declare_name()?;
        Ok(AstNode::op(
            Operation::Type,
            Some(type_node.boxed()),
            Some(name.boxed()),
        ))
    }

    // Op -> If | While | Block | VarDef | Assign | Print | Return
    fn parse_op(&mut self) -> Result<AstNode, CompilerError> {
        if self.at_op(LangOp::If) {
            return self.parse_if();
        }
        if self.at_op(LangOp::While) {
            return self.parse_while();
        }
        if self.at_op(LangOp::FiftySeven) {
            return self.parse_block();
        }

        let op_node = if self.at_op(LangOp::Print) {
            self.parse_print()?
        } else if self.at_op(LangOp::TypeInt) {
            self.parse_var_def()?
        } else if matches!(self.current().value, TokenValue::Name(_))
            && self.at_op_ahead(1, LangOp::Assign)
        {
            self.parse_assign()?
        } else {
            self.parse_return()?
        };

        self.consume_op(LangOp::FiftySeven, "'57' after the statement")?;

        Ok(op_node)
    }

    // Block -> '57' Op+ '{'
    fn parse_block(&mut self) -> Result<AstNode, CompilerError> {
        self.consume_op(LangOp::FiftySeven, "'57' opening a block")?;

        let mut ops = Vec::new();
        loop {
            ops.push(self.parse_op()?);
            if self.at_op(LangOp::LBrace) {
                break;
            }
        }
        self.consume_op(LangOp::LBrace, "'{' closing the block")?;

        // Right-leaning LINE_END chain; the last link has no continuation.
        let mut chain = None;
        for op_node in ops.into_iter().rev() {
            chain = Some(AstNode::op(
                Operation::LineEnd,
                Some(op_node.boxed()),
                chain.map(AstNode::boxed),
            ));
        }
        Ok(chain.expect("block holds at least one statement"))
    }

    // If -> '57?' Or '57' Op
    fn parse_if(&mut self) -> Result<AstNode, CompilerError> {
        self.consume_op(LangOp::If, "'57?'")?;

        let condition = self.parse_or()?;
        self.consume_op(LangOp::FiftySeven, "'57' after the if condition")?;
        let body = self.parse_op()?;

        Ok(AstNode::op(
            Operation::If,
            Some(condition.boxed()),
            Some(body.boxed()),
        ))
    }

    // While -> '57!' Or '57' Op
    fn parse_while(&mut self) -> Result<AstNode, CompilerError> {
        self.consume_op(LangOp::While, "'57!'")?;

        let condition = self.parse_or()?;
        self.consume_op(LangOp::FiftySeven, "'57' after the while condition")?;
        let body = self.parse_op()?;

        Ok(AstNode::op(
            Operation::While,
            Some(condition.boxed()),
            Some(body.boxed()),
        ))
    }

    // VarDef -> Type Name '==' Or
    fn parse_var_def(&mut self) -> Result<AstNode, CompilerError> {
        let type_node = self.parse_type()?;
        let name = self.declare_name()?;

        self.consume_op(LangOp::Assign, "'==' after the variable name")?;
        let init = self.parse_or()?;

        let assign = AstNode::op(Operation::Assign, Some(name.boxed()), Some(init.boxed()));
        Ok(AstNode::op(
            Operation::Type,
            Some(type_node.boxed()),
            Some(assign.boxed()),
        ))
    }

    // Assign -> Name '==' Or
    fn parse_assign(&mut self) -> Result<AstNode, CompilerError> {
        let name = self.use_name()?;
        self.consume_op(LangOp::Assign, "'=='")?;
        let value = self.parse_or()?;

        Ok(AstNode::op(
            Operation::Assign,
            Some(name.boxed()),
            Some(value.boxed()),
        ))
    }

    // Print -> '.' (StringLiteral | Or)
    fn parse_print(&mut self) -> Result<AstNode, CompilerError> {
        self.consume_op(LangOp::Print, "'.'")?;

        let arg = if let TokenValue::StringLiteral(body) = self.current().value.clone() {
            let id = self.names.intern(&body);
            self.pos += 1;
            AstNode::string_literal(id)
        } else {
            self.parse_or()?
        };

        Ok(AstNode::op(Operation::Print, Some(arg.boxed()), None))
    }

    // Return -> Or
    fn parse_return(&mut self) -> Result<AstNode, CompilerError> {
        let value = self.parse_or()?;
        Ok(AstNode::op(Operation::Return, Some(value.boxed()), None))
    }

    // Or -> And ('or' And)*
    fn parse_or(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_and()?;

        while self.at_op(LangOp::Or) {
            self.pos += 1;
            let rhs = self.parse_and()?;
            expr = AstNode::op(Operation::Or, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // And -> Cmp ('and' Cmp)*
    fn parse_and(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_cmp()?;

        while self.at_op(LangOp::And) {
            self.pos += 1;
            let rhs = self.parse_cmp()?;
            expr = AstNode::op(Operation::And, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // Cmp -> AddSub (cmp-op AddSub)*
    fn parse_cmp(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_add_sub()?;

        loop {
            let operation = match self.current().value {
                TokenValue::Op(LangOp::Less) => Operation::Less,
                TokenValue::Op(LangOp::LessEq) => Operation::LessEq,
                TokenValue::Op(LangOp::Greater) => Operation::Greater,
                TokenValue::Op(LangOp::GreaterEq) => Operation::GreaterEq,
                TokenValue::Op(LangOp::Eq) => Operation::Eq,
                TokenValue::Op(LangOp::NotEq) => Operation::NotEq,
                _ => break,
            };
            self.pos += 1;

            let rhs = self.parse_add_sub()?;
            expr = AstNode::op(operation, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // AddSub -> MulDiv (add-op MulDiv)*
    fn parse_add_sub(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_mul_div()?;

        loop {
            let operation = match self.current().value {
                TokenValue::Op(LangOp::Add) => Operation::Add,
                TokenValue::Op(LangOp::Sub) => Operation::Sub,
                _ => break,
            };
            self.pos += 1;

            let rhs = self.parse_mul_div()?;
            expr = AstNode::op(operation, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // MulDiv -> Pow (mul-op Pow)*
    fn parse_mul_div(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_pow()?;

        loop {
            let operation = match self.current().value {
                TokenValue::Op(LangOp::Mul) => Operation::Mul,
                TokenValue::Op(LangOp::Div) => Operation::Div,
                _ => break,
            };
            self.pos += 1;

            let rhs = self.parse_pow()?;
            expr = AstNode::op(operation, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // Pow -> Call ('^' Call)*
    fn parse_pow(&mut self) -> Result<AstNode, CompilerError> {
        let mut expr = self.parse_call()?;

        while self.at_op(LangOp::Pow) {
            self.pos += 1;
            let rhs = self.parse_call()?;
            expr = AstNode::op(Operation::Pow, Some(expr.boxed()), Some(rhs.boxed()));
        }
        Ok(expr)
    }

    // Call -> Builtin | UserCall | Expr
    fn parse_call(&mut self) -> Result<AstNode, CompilerError> {
        if self.at_op(LangOp::Sin)
            || self.at_op(LangOp::Cos)
            || self.at_op(LangOp::Tan)
            || self.at_op(LangOp::Cot)
            || self.at_op(LangOp::Sqrt)
            || self.at_op(LangOp::LBrace)
        {
            return self.parse_builtin();
        }

        if matches!(self.current().value, TokenValue::Name(_)) && self.at_op_ahead(1, LangOp::LBrace)
        {
            return self.parse_user_call();
        }

        self.parse_expr()
    }

    // Builtin -> (sin|cos|tan|cot|sqrt) '(' Or ')' | '{'
    fn parse_builtin(&mut self) -> Result<AstNode, CompilerError> {
        if self.at_op(LangOp::LBrace) {
            self.pos += 1;
            return Ok(AstNode::op(Operation::Read, None, None));
        }

        let operation = match self.current().value {
            TokenValue::Op(LangOp::Sin) => Operation::Sin,
            TokenValue::Op(LangOp::Cos) => Operation::Cos,
            TokenValue::Op(LangOp::Tan) => Operation::Tan,
            TokenValue::Op(LangOp::Cot) => Operation::Cot,
            TokenValue::Op(LangOp::Sqrt) => Operation::Sqrt,
            _ => return Err(self.syntax_error("a built-in function")),
        };
        self.pos += 1;

        self.consume_op(LangOp::LBracket, "'(' after the built-in name")?;
        let arg = self.parse_or()?;
        self.consume_op(LangOp::RBracket, "')'")?;

        Ok(AstNode::op(operation, Some(arg.boxed()), None))
    }

    // UserCall -> Name '{' Or* '57'
    fn parse_user_call(&mut self) -> Result<AstNode, CompilerError> {
        let mut name = self.use_name()?;
        self.consume_op(LangOp::LBrace, "'{' opening the argument list")?;

        let mut args: Option<AstNode> = None;
        while !self.at_op(LangOp::FiftySeven) {
            let arg = self.parse_or()?;
            args = Some(match args {
                None => arg,
                Some(prev) => {
                    AstNode::op(Operation::Comma, Some(prev.boxed()), Some(arg.boxed()))
                }
            });
        }
        self.consume_op(LangOp::FiftySeven, "'57' closing the argument list")?;

        name.left = args.map(AstNode::boxed);
        Ok(AstNode::op(Operation::FuncCall, Some(name.boxed()), None))
    }

    // Expr -> '(' Or ')' | Number | Name
    fn parse_expr(&mut self) -> Result<AstNode, CompilerError> {
        if self.at_op(LangOp::LBracket) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.consume_op(LangOp::RBracket, "')'")?;
            return Ok(inner);
        }

        if let TokenValue::Num(value) = self.current().value {
            self.pos += 1;
            return Ok(AstNode::num(value));
        }

        self.use_name()
    }

    /// Identifier in a declaration context: interned globally and recorded
    /// in the current scope. Redeclaration is a semantic error.
    fn declare_name(&mut self) -> Result<AstNode, CompilerError> {
        let token = self.current().clone();
        let TokenValue::Name(text) = &token.value else {
            return Err(self.syntax_error("a name"));
        };

        let id = self.names.intern(text);
        if self.scope.contains(&id) {
            return Err(CompilerError::SemanticError {
                line: token.line,
                reason: format!("duplicate declaration of '{}'", text),
            });
        }
        self.scope.push(id);
        self.pos += 1;

        Ok(AstNode::name(id))
    }

    fn declare_function(&mut self) -> Result<AstNode, CompilerError> {
        let token = self.current().clone();
        let TokenValue::Name(text) = &token.value else {
            return Err(self.syntax_error("a function name"));
        };

        let id = self.names.intern(text);
        if self.functions.contains(&id) {
            return Err(CompilerError::SemanticError {
                line: token.line,
                reason: format!("duplicate definition of function '{}'", text),
            });
        }
        self.functions.push(id);
        self.pos += 1;

        Ok(AstNode::name(id))
    }

    /// Identifier in a use context: must already be known globally.
    fn use_name(&mut self) -> Result<AstNode, CompilerError> {
        let token = self.current().clone();
        let TokenValue::Name(text) = &token.value else {
            return Err(self.syntax_error("a name"));
        };

        let Some(id) = self.names.find(text) else {
            return Err(CompilerError::SemanticError {
                line: token.line,
                reason: format!("undeclared name '{}'", text),
            });
        };
        self.pos += 1;

        Ok(AstNode::name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstValue;

    fn op_of(node: &AstNode) -> Operation {
        match node.value {
            AstValue::Op(op) => op,
            _ => panic!("expected an operation node, got {:?}", node.value),
        }
    }

    #[test]
    fn test_minimal_function_shape() {
        let ast = parse_source("575757 main 57 0 57 {").unwrap();
        let root = ast.root.unwrap();

        // TYPE(TYPE_INT, FUNC(main))
        assert_eq!(op_of(&root), Operation::Type);
        let func = root.right.unwrap();
        assert_eq!(op_of(&func), Operation::Func);

        let name = func.left.unwrap();
        assert_eq!(name.value, AstValue::Name(ast.names.find("main").unwrap()));

        // body: LINE_END(RETURN(0), nil)
        let body = name.right.unwrap();
        assert_eq!(op_of(&body), Operation::LineEnd);
        assert_eq!(op_of(body.left.as_ref().unwrap()), Operation::Return);
        assert!(body.right.is_none());
    }

    #[test]
    fn test_token_not_glyph_selects_operation() {
        // Written '-', meaning ADD.
        let ast = parse_source("575757 main 57 2 - 3 57 {").unwrap();
        let root = ast.root.unwrap();
        let ret = root.right.unwrap().left.unwrap().right.unwrap().left.unwrap();

        assert_eq!(op_of(&ret), Operation::Return);
        assert_eq!(op_of(ret.left.as_ref().unwrap()), Operation::Add);
    }

    #[test]
    fn test_undeclared_name_is_semantic_error() {
        let err = parse_source("575757 main 57 ghost 57 {").unwrap_err();
        assert!(matches!(err, CompilerError::SemanticError { .. }), "{err:?}");
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let err = parse_source("575757 f 575757 x 575757 x 57 0 57 {").unwrap_err();
        assert!(matches!(err, CompilerError::SemanticError { .. }), "{err:?}");
    }

    #[test]
    fn test_missing_statement_terminator() {
        let err = parse_source("575757 main 57 . 1 {").unwrap_err();
        assert!(matches!(err, CompilerError::SyntaxError { .. }), "{err:?}");
    }

    #[test]
    fn test_two_functions_fold_into_new_func() {
        let source = "575757 one 57 1 57 { 575757 main 57 one { 57 57 {";
        let ast = parse_source(source).unwrap();
        let root = ast.root.unwrap();

        assert_eq!(op_of(&root), Operation::NewFunc);
        assert_eq!(op_of(root.left.as_ref().unwrap()), Operation::Type);
        assert_eq!(op_of(root.right.as_ref().unwrap()), Operation::Type);
    }

    #[test]
    fn test_call_arguments_fold_left() {
        let source = "575757 f 575757 a 575757 b 575757 c 57 a 57 { \
                      575757 main 57 f { 1 2 3 57 57 {";
        let ast = parse_source(source).unwrap();

        // main's return: FUNC_CALL(f), f.left = COMMA(COMMA(1, 2), 3)
        let root = ast.root.unwrap();
        let main_func = root.right.unwrap();
        let ret = main_func.right.unwrap().left.unwrap().right.unwrap().left.unwrap();
        let call = ret.left.unwrap();
        assert_eq!(op_of(&call), Operation::FuncCall);

        let args = call.left.unwrap().left.unwrap();
        assert_eq!(op_of(&args), Operation::Comma);
        assert_eq!(op_of(args.left.as_ref().unwrap()), Operation::Comma);
        assert_eq!(args.right.as_ref().unwrap().value, AstValue::Num(3));
    }
}
