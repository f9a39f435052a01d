//! Parser.
//!
//! Recursive descent over the token vector with precedence climbing for
//! binary operators. Every syntax error is reported as
//! `parse error (line N)` unless the lexer produced a more specific one.
//! Nesting deeper than [`MAX_NESTING_DEPTH`] fails with
//! `nesting too deep (line N)` instead of exhausting the native stack.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::Lexer;
use crate::string::JsString;
use crate::token::{Token, TokenKind};

type ParseResult<T> = Result<T, ParseError>;

/// Statements, expressions and operator chains nested inside each other.
pub const MAX_NESTING_DEPTH: usize = 256;

/// Names collected for the function currently being parsed.
#[derive(Default)]
struct FunctionScope {
    vars: Vec<JsString>,
    functions: Vec<Rc<FunctionNode>>,
    uses_arguments: bool,
}

impl FunctionScope {
    fn declare(&mut self, name: &JsString) {
        if !self.vars.contains(name) {
            self.vars.push(name.clone());
        }
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    scopes: Vec<FunctionScope>,
    /// Disallow `in` as a binary operator (for-in heads).
    no_in: bool,
    depth: usize,
}

impl Parser {
    pub fn new(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Parser {
            tokens,
            pos: 0,
            scopes: Vec::new(),
            no_in: false,
            depth: 0,
        })
    }

    /// Parse a whole program. The result is a nameless function node whose
    /// hoisted names belong to the global scope.
    pub fn parse_program(&mut self) -> ParseResult<FunctionNode> {
        self.scopes.push(FunctionScope::default());
        let mut body = Vec::new();
        while !self.is_eof() {
            body.push(self.parse_statement()?);
        }
        let scope = self.scopes.pop().unwrap_or_default();
        Ok(FunctionNode {
            name: None,
            params: Vec::new(),
            body,
            vars: scope.vars,
            functions: scope.functions,
            uses_arguments: scope.uses_arguments,
            line: 1,
        })
    }

    /// Parse source consisting of a single function expression.
    pub fn parse_function_source(&mut self) -> ParseResult<Rc<FunctionNode>> {
        self.scopes.push(FunctionScope::default());
        let parens = self.eat(&TokenKind::LeftParen);
        if !self.check(&TokenKind::Function) {
            return Err(self.error());
        }
        self.advance();
        let func = self.parse_function_rest(false)?;
        if parens {
            self.expect(&TokenKind::RightParen)?;
        }
        self.eat(&TokenKind::Semicolon);
        if !self.is_eof() {
            return Err(self.error());
        }
        Ok(func)
    }

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.parse_statement_inner();
        self.depth -= 1;
        stmt
    }

    fn parse_statement_inner(&mut self) -> ParseResult<Stmt> {
        let line = self.current().span.line;
        let kind = match &self.current().kind {
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            TokenKind::LeftBrace => StmtKind::Block(self.parse_block()?),
            TokenKind::Var | TokenKind::Let | TokenKind::Const => {
                self.advance();
                let decls = self.parse_declarations()?;
                self.consume_semicolon()?;
                StmtKind::Var(decls)
            }
            TokenKind::Function => {
                self.advance();
                let func = self.parse_function_rest(true)?;
                if let Some(name) = &func.name {
                    let scope = self.scope();
                    scope.declare(name);
                    scope.functions.push(func.clone());
                }
                StmtKind::FunctionDecl
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::While => {
                self.advance();
                let test = self.parse_paren_expression()?;
                let body = self.parse_statement()?;
                StmtKind::While(test, Box::new(body))
            }
            TokenKind::Do => {
                self.advance();
                let body = self.parse_statement()?;
                self.expect(&TokenKind::While)?;
                let test = self.parse_paren_expression()?;
                self.eat(&TokenKind::Semicolon);
                StmtKind::DoWhile(Box::new(body), test)
            }
            TokenKind::Break => {
                self.advance();
                self.consume_semicolon()?;
                StmtKind::Break
            }
            TokenKind::Continue => {
                self.advance();
                self.consume_semicolon()?;
                StmtKind::Continue
            }
            TokenKind::Return => {
                if self.scopes.len() < 2 {
                    return Err(self.error());
                }
                self.advance();
                let arg = if self.at_statement_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.consume_semicolon()?;
                StmtKind::Return(arg)
            }
            TokenKind::Throw => {
                self.advance();
                if self.current().newline_before {
                    return Err(self.error());
                }
                let arg = self.parse_expression()?;
                self.consume_semicolon()?;
                StmtKind::Throw(arg)
            }
            TokenKind::Try => self.parse_try()?,
            TokenKind::Switch => self.parse_switch()?,
            _ => {
                let expr = self.parse_expression()?;
                self.consume_semicolon()?;
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt { kind, line })
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(&TokenKind::LeftBrace)?;
        let mut body = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.is_eof() {
                return Err(self.error());
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_declarations(&mut self) -> ParseResult<Declarations> {
        let mut decls = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            self.scope().declare(&name);
            let init = if self.eat(&TokenKind::Equal) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            decls.push((name, init));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(decls)
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let test = self.parse_paren_expression()?;
        let consequent = self.parse_statement()?;
        let alternate = if self.eat(&TokenKind::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If(test, Box::new(consequent), alternate))
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect(&TokenKind::LeftParen)?;

        let mut init = None;
        if matches!(
            self.current().kind,
            TokenKind::Var | TokenKind::Let | TokenKind::Const
        ) {
            self.advance();
            let outer = core::mem::replace(&mut self.no_in, true);
            let decls = self.parse_declarations();
            self.no_in = outer;
            let decls = decls?;
            if decls.len() == 1 && decls[0].1.is_none() && self.eat(&TokenKind::In) {
                let name = decls[0].0.clone();
                return self.parse_for_in_rest(ForInTarget::Var(name));
            }
            init = Some(ForInit::Var(decls));
        } else if !self.check(&TokenKind::Semicolon) {
            let outer = core::mem::replace(&mut self.no_in, true);
            let expr = self.parse_expression();
            self.no_in = outer;
            let expr = expr?;
            if self.check(&TokenKind::In) {
                if !expr.is_reference() {
                    return Err(self.error());
                }
                self.advance();
                return self.parse_for_in_rest(ForInTarget::Expr(expr));
            }
            init = Some(ForInit::Expr(expr));
        }

        self.expect(&TokenKind::Semicolon)?;
        let test = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::Semicolon)?;
        let update = if self.check(&TokenKind::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(&TokenKind::RightParen)?;
        let body = self.parse_statement()?;

        Ok(StmtKind::For {
            init,
            test,
            update,
            body: Box::new(body),
        })
    }

    fn parse_for_in_rest(&mut self, target: ForInTarget) -> ParseResult<StmtKind> {
        let object = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        let body = self.parse_statement()?;
        Ok(StmtKind::ForIn {
            target,
            object,
            body: Box::new(body),
        })
    }

    fn parse_try(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let block = self.parse_block()?;
        let catch = if self.eat(&TokenKind::Catch) {
            self.expect(&TokenKind::LeftParen)?;
            let param = self.parse_identifier()?;
            self.expect(&TokenKind::RightParen)?;
            Some((param, self.parse_block()?))
        } else {
            None
        };
        let finally = if self.eat(&TokenKind::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if catch.is_none() && finally.is_none() {
            return Err(self.error());
        }
        Ok(StmtKind::Try {
            block,
            catch,
            finally,
        })
    }

    fn parse_switch(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let discriminant = self.parse_paren_expression()?;
        self.expect(&TokenKind::LeftBrace)?;
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat(&TokenKind::RightBrace) {
            let test = if self.eat(&TokenKind::Case) {
                Some(self.parse_expression()?)
            } else if self.eat(&TokenKind::Default) {
                if seen_default {
                    return Err(self.error());
                }
                seen_default = true;
                None
            } else {
                return Err(self.error());
            };
            self.expect(&TokenKind::Colon)?;
            let mut body = Vec::new();
            while !matches!(
                self.current().kind,
                TokenKind::Case | TokenKind::Default | TokenKind::RightBrace | TokenKind::Eof
            ) {
                body.push(self.parse_statement()?);
            }
            cases.push(Case { test, body });
        }
        Ok(StmtKind::Switch(discriminant, cases))
    }

    /// Parse everything after the `function` keyword.
    fn parse_function_rest(&mut self, require_name: bool) -> ParseResult<Rc<FunctionNode>> {
        let line = self.current().span.line;
        let name = match &self.current().kind {
            TokenKind::Identifier(_) => Some(self.parse_identifier()?),
            _ if require_name => return Err(self.error()),
            _ => None,
        };

        self.expect(&TokenKind::LeftParen)?;
        let mut params = Vec::new();
        if !self.eat(&TokenKind::RightParen) {
            loop {
                params.push(self.parse_identifier()?);
                if self.eat(&TokenKind::RightParen) {
                    break;
                }
                self.expect(&TokenKind::Comma)?;
            }
        }

        self.scopes.push(FunctionScope::default());
        let outer_no_in = core::mem::replace(&mut self.no_in, false);
        let body = self.parse_block();
        self.no_in = outer_no_in;
        let scope = self.scopes.pop().unwrap_or_default();
        let body = body?;

        Ok(Rc::new(FunctionNode {
            name,
            params,
            body,
            vars: scope.vars,
            functions: scope.functions,
            uses_arguments: scope.uses_arguments,
            line,
        }))
    }

    fn parse_paren_expression(&mut self) -> ParseResult<Expr> {
        self.expect(&TokenKind::LeftParen)?;
        let expr = self.parse_expression()?;
        self.expect(&TokenKind::RightParen)?;
        Ok(expr)
    }

    /// Expression including the comma operator.
    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        let first = self.parse_assignment()?;
        if !self.check(&TokenKind::Comma) {
            return Ok(first);
        }
        let mut exprs = alloc::vec![first];
        while self.eat(&TokenKind::Comma) {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(exprs))
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.parse_assignment_inner();
        self.depth -= 1;
        expr
    }

    fn parse_assignment_inner(&mut self) -> ParseResult<Expr> {
        let target = self.parse_conditional()?;
        let op = match self.current().kind {
            TokenKind::Equal => None,
            TokenKind::PlusEqual => Some(BinaryOp::Add),
            TokenKind::MinusEqual => Some(BinaryOp::Sub),
            TokenKind::StarEqual => Some(BinaryOp::Mul),
            TokenKind::SlashEqual => Some(BinaryOp::Div),
            TokenKind::PercentEqual => Some(BinaryOp::Mod),
            TokenKind::AmpersandEqual => Some(BinaryOp::BitAnd),
            TokenKind::PipeEqual => Some(BinaryOp::BitOr),
            TokenKind::CaretEqual => Some(BinaryOp::BitXor),
            TokenKind::LessLessEqual => Some(BinaryOp::Shl),
            TokenKind::GreaterGreaterEqual => Some(BinaryOp::Shr),
            TokenKind::GreaterGreaterGreaterEqual => Some(BinaryOp::UShr),
            _ => return Ok(target),
        };
        if !target.is_reference() {
            return Err(self.error());
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign(op, Box::new(target), Box::new(value)))
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let test = self.parse_binary(0)?;
        if !self.eat(&TokenKind::Question) {
            return Ok(test);
        }
        let outer = core::mem::replace(&mut self.no_in, false);
        let consequent = self.parse_assignment();
        self.no_in = outer;
        let consequent = consequent?;
        self.expect(&TokenKind::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional(
            Box::new(test),
            Box::new(consequent),
            Box::new(alternate),
        ))
    }

    fn binary_operator(&self) -> Option<(u8, Result<BinaryOp, LogicalOp>)> {
        let entry = match self.current().kind {
            TokenKind::PipePipe => (1, Err(LogicalOp::Or)),
            TokenKind::AmpersandAmpersand => (2, Err(LogicalOp::And)),
            TokenKind::Pipe => (3, Ok(BinaryOp::BitOr)),
            TokenKind::Caret => (4, Ok(BinaryOp::BitXor)),
            TokenKind::Ampersand => (5, Ok(BinaryOp::BitAnd)),
            TokenKind::EqualEqual => (6, Ok(BinaryOp::Equal)),
            TokenKind::NotEqual => (6, Ok(BinaryOp::NotEqual)),
            TokenKind::EqualEqualEqual => (6, Ok(BinaryOp::StrictEqual)),
            TokenKind::NotEqualEqual => (6, Ok(BinaryOp::StrictNotEqual)),
            TokenKind::Less => (7, Ok(BinaryOp::Less)),
            TokenKind::Greater => (7, Ok(BinaryOp::Greater)),
            TokenKind::LessEqual => (7, Ok(BinaryOp::LessEqual)),
            TokenKind::GreaterEqual => (7, Ok(BinaryOp::GreaterEqual)),
            TokenKind::InstanceOf => (7, Ok(BinaryOp::InstanceOf)),
            TokenKind::In if !self.no_in => (7, Ok(BinaryOp::In)),
            TokenKind::LessLess => (8, Ok(BinaryOp::Shl)),
            TokenKind::GreaterGreater => (8, Ok(BinaryOp::Shr)),
            TokenKind::GreaterGreaterGreater => (8, Ok(BinaryOp::UShr)),
            TokenKind::Plus => (9, Ok(BinaryOp::Add)),
            TokenKind::Minus => (9, Ok(BinaryOp::Sub)),
            TokenKind::Star => (10, Ok(BinaryOp::Mul)),
            TokenKind::Slash => (10, Ok(BinaryOp::Div)),
            TokenKind::Percent => (10, Ok(BinaryOp::Mod)),
            _ => return None,
        };
        Some(entry)
    }

    /// Precedence climbing; all binary operators are left associative.
    fn parse_binary(&mut self, min_prec: u8) -> ParseResult<Expr> {
        let mut left = self.parse_unary()?;
        // Each operator deepens the left spine of the tree.
        let depth = self.depth;
        while let Some((prec, op)) = self.binary_operator() {
            if prec < min_prec {
                break;
            }
            self.enter()?;
            self.advance();
            let right = self.parse_binary(prec + 1)?;
            left = match op {
                Ok(op) => Expr::Binary(op, Box::new(left), Box::new(right)),
                Err(op) => Expr::Logical(op, Box::new(left), Box::new(right)),
            };
        }
        self.depth = depth;
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.parse_unary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_unary_inner(&mut self) -> ParseResult<Expr> {
        let op = match self.current().kind {
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Minus,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::TypeOf => UnaryOp::TypeOf,
            TokenKind::Void => UnaryOp::Void,
            TokenKind::Delete => UnaryOp::Delete,
            TokenKind::PlusPlus | TokenKind::MinusMinus => {
                let increment = self.check(&TokenKind::PlusPlus);
                self.advance();
                let target = self.parse_unary()?;
                if !target.is_reference() {
                    return Err(self.error());
                }
                return Ok(Expr::Update {
                    increment,
                    prefix: true,
                    target: Box::new(target),
                });
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let argument = self.parse_unary()?;
        Ok(Expr::Unary(op, Box::new(argument)))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let expr = self.parse_call_member()?;
        let increment = match self.current().kind {
            TokenKind::PlusPlus => true,
            TokenKind::MinusMinus => false,
            _ => return Ok(expr),
        };
        if self.current().newline_before {
            return Ok(expr);
        }
        if !expr.is_reference() {
            return Err(self.error());
        }
        self.advance();
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn parse_call_member(&mut self) -> ParseResult<Expr> {
        let mut expr = if self.check(&TokenKind::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            expr = match self.current().kind {
                TokenKind::Dot | TokenKind::LeftBracket => self.parse_member_suffix(expr)?,
                TokenKind::LeftParen => {
                    let args = self.parse_arguments()?;
                    Expr::Call(Box::new(expr), args)
                }
                _ => return Ok(expr),
            };
        }
    }

    fn parse_new(&mut self) -> ParseResult<Expr> {
        self.advance();
        let mut callee = if self.check(&TokenKind::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        while matches!(
            self.current().kind,
            TokenKind::Dot | TokenKind::LeftBracket
        ) {
            callee = self.parse_member_suffix(callee)?;
        }
        let args = if self.check(&TokenKind::LeftParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::New(Box::new(callee), args))
    }

    fn parse_member_suffix(&mut self, object: Expr) -> ParseResult<Expr> {
        if self.eat(&TokenKind::Dot) {
            let name = self.parse_property_identifier()?;
            return Ok(Expr::Member(Box::new(object), name));
        }
        self.expect(&TokenKind::LeftBracket)?;
        let outer = core::mem::replace(&mut self.no_in, false);
        let index = self.parse_expression();
        self.no_in = outer;
        let index = index?;
        self.expect(&TokenKind::RightBracket)?;
        Ok(Expr::Index(Box::new(object), Box::new(index)))
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(&TokenKind::LeftParen)?;
        let outer = core::mem::replace(&mut self.no_in, false);
        let mut args = Vec::new();
        let result = loop {
            if self.eat(&TokenKind::RightParen) {
                break Ok(());
            }
            match self.parse_assignment() {
                Ok(arg) => args.push(arg),
                Err(err) => break Err(err),
            }
            if self.eat(&TokenKind::RightParen) {
                break Ok(());
            }
            if let Err(err) = self.expect(&TokenKind::Comma) {
                break Err(err);
            }
        };
        self.no_in = outer;
        result.map(|_| args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let token = self.current().clone();
        let expr = match token.kind {
            TokenKind::Number(n) => Expr::Number(n),
            TokenKind::String(units) => Expr::String(JsString::from_units(&units)),
            TokenKind::True => Expr::Boolean(true),
            TokenKind::False => Expr::Boolean(false),
            TokenKind::Null => Expr::Null,
            TokenKind::This => Expr::This,
            TokenKind::Identifier(_) => {
                let name = self.parse_identifier()?;
                if name.as_bytes() == b"arguments" {
                    self.scope().uses_arguments = true;
                }
                return Ok(Expr::Ident(name));
            }
            TokenKind::Function => {
                self.advance();
                return Ok(Expr::Function(self.parse_function_rest(false)?));
            }
            TokenKind::LeftParen => {
                self.advance();
                let outer = core::mem::replace(&mut self.no_in, false);
                let expr = self.parse_expression();
                self.no_in = outer;
                let expr = expr?;
                self.expect(&TokenKind::RightParen)?;
                return Ok(expr);
            }
            TokenKind::LeftBracket => return self.parse_array_literal(),
            TokenKind::LeftBrace => return self.parse_object_literal(),
            _ => return Err(self.error()),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expr> {
        self.advance();
        let outer = core::mem::replace(&mut self.no_in, false);
        let mut elements = Vec::new();
        let result = loop {
            if self.eat(&TokenKind::RightBracket) {
                break Ok(());
            }
            if self.eat(&TokenKind::Comma) {
                elements.push(None);
                continue;
            }
            match self.parse_assignment() {
                Ok(expr) => elements.push(Some(expr)),
                Err(err) => break Err(err),
            }
            if self.eat(&TokenKind::RightBracket) {
                break Ok(());
            }
            if let Err(err) = self.expect(&TokenKind::Comma) {
                break Err(err);
            }
        };
        self.no_in = outer;
        result.map(|_| Expr::Array(elements))
    }

    fn parse_object_literal(&mut self) -> ParseResult<Expr> {
        self.advance();
        let outer = core::mem::replace(&mut self.no_in, false);
        let mut props = Vec::new();
        let result = loop {
            if self.eat(&TokenKind::RightBrace) {
                break Ok(());
            }
            let key = match self.current().kind.clone() {
                TokenKind::String(units) => {
                    self.advance();
                    JsString::from_units(&units)
                }
                TokenKind::Number(n) => {
                    self.advance();
                    JsString::new(&crate::value::number_to_string(n))
                }
                _ => match self.parse_property_identifier() {
                    Ok(name) => name,
                    Err(err) => break Err(err),
                },
            };
            if let Err(err) = self.expect(&TokenKind::Colon) {
                break Err(err);
            }
            match self.parse_assignment() {
                Ok(value) => props.push((key, value)),
                Err(err) => break Err(err),
            }
            if self.eat(&TokenKind::RightBrace) {
                break Ok(());
            }
            if let Err(err) = self.expect(&TokenKind::Comma) {
                break Err(err);
            }
        };
        self.no_in = outer;
        result.map(|_| Expr::Object(props))
    }

    fn parse_identifier(&mut self) -> ParseResult<JsString> {
        match &self.current().kind {
            TokenKind::Identifier(name) => {
                let name = JsString::new(name);
                self.advance();
                Ok(name)
            }
            _ => Err(self.error()),
        }
    }

    /// Identifier or reserved word, as allowed after `.` and as object keys.
    fn parse_property_identifier(&mut self) -> ParseResult<JsString> {
        if let Some(word) = self.current().kind.keyword_text() {
            self.advance();
            return Ok(JsString::new(word));
        }
        self.parse_identifier()
    }

    // Helper methods

    fn scope(&mut self) -> &mut FunctionScope {
        if self.scopes.is_empty() {
            self.scopes.push(FunctionScope::default());
        }
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn is_eof(&self) -> bool {
        self.current().is_eof()
    }

    fn advance(&mut self) {
        if !self.is_eof() {
            self.pos += 1;
        }
    }

    fn check(&self, kind: &TokenKind) -> bool {
        core::mem::discriminant(&self.current().kind) == core::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn at_statement_end(&self) -> bool {
        self.check(&TokenKind::Semicolon)
            || self.check(&TokenKind::RightBrace)
            || self.is_eof()
            || self.current().newline_before
    }

    /// Automatic semicolon insertion.
    fn consume_semicolon(&mut self) -> ParseResult<()> {
        if self.eat(&TokenKind::Semicolon) || self.at_statement_end() {
            Ok(())
        } else {
            Err(self.error())
        }
    }

    fn enter(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(ParseError::new("nesting too deep", self.current().span.line));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self) -> ParseError {
        ParseError::new("parse error", self.current().span.line)
    }
}

/// Parse program source.
pub fn parse_program(source: &str) -> ParseResult<FunctionNode> {
    Parser::new(source)?.parse_program()
}

/// Parse the source of a single function expression.
pub fn parse_function(source: &str) -> ParseResult<Rc<FunctionNode>> {
    Parser::new(source)?.parse_function_source()
}
