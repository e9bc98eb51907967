//! Guest parser - tokenizer, AST types, and recursive descent parser
//!
//! Converts guest source text into a [`Module`]. Syntax errors are reported
//! as `ParseError` with line:column. `return` outside a function and
//! `break`/`continue` outside a loop are rejected here, so the interpreter
//! never sees them.
//!
//! Expression precedence, lowest first:
//!
//! ```text
//! a if c else b
//! or
//! and
//! not
//! == != < <= > >= in, not in, is, is not
//! + -
//! * / // %
//! unary - +
//! **
//! call, subscript, attribute
//! ```

pub mod ast;
pub mod tokenizer;

use std::rc::Rc;

use crate::{Error, Result};
use ast::*;
use tokenizer::{Span, SpannedToken, Token, Tokenizer};

/// Bound on syntactic nesting (brackets, blocks, unary chains)
pub const MAX_NESTING_DEPTH: usize = 64;

/// Bound on expression tree depth, counting every operator folded into a
/// left-associative chain (`a + b + c`, `f()()`, `x.y.z`) as one level
pub const MAX_EXPR_DEPTH: usize = 256;

/// Parse guest source text into a module AST
///
/// # Errors
/// Returns `ParseError` with line:column for syntax violations.
///
/// # Example
/// ```
/// let module = neofn_core::parser::parse_module("def handler(params): return params\n").unwrap();
/// assert_eq!(module.body.len(), 1);
/// ```
pub fn parse_module(source: &str) -> Result<Module> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens);
    parser.parse_module()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    function_depth: usize,
    loop_depth: usize,
    nesting: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Parser {
            tokens,
            pos: 0,
            function_depth: 0,
            loop_depth: 0,
            nesting: 0,
            depth: 0,
        }
    }

    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn peek_ahead(&self, offset: usize) -> &Token {
        self.tokens
            .get(self.pos + offset)
            .map(|t| &t.token)
            .unwrap_or(&Token::Eof)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.span)
            .unwrap_or(Span {
                line: 1,
                column: 1,
                offset: 0,
            })
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, context: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("Expected {} {}", token.describe(), context)))
        }
    }

    fn expect_identifier(&mut self, context: &str) -> Result<String> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(&format!("Expected identifier {}", context))),
        }
    }

    /// Run `f` one nesting level deeper
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.nesting >= MAX_NESTING_DEPTH || self.depth >= MAX_EXPR_DEPTH {
            return Err(self.error("Nesting too deep"));
        }
        let depth = self.depth;
        self.nesting += 1;
        self.depth += 1;
        let result = f(self);
        self.nesting -= 1;
        self.depth = depth;
        result
    }

    /// Run a left-folding loop; levels taken with [`Self::deepen`] are
    /// released when it returns
    fn folding(&mut self, f: impl FnOnce(&mut Self) -> Result<Expr>) -> Result<Expr> {
        let depth = self.depth;
        let result = f(self);
        self.depth = depth;
        result
    }

    /// Charge one tree level for a node folded onto the current chain
    fn deepen(&mut self) -> Result<()> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(self.error("Nesting too deep"));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, message: &str) -> Error {
        Error::ParseError(format!(
            "{}, found {} at {}",
            message,
            self.peek().describe(),
            self.span()
        ))
    }

    // ── Statements ─────────────────────────────────────────

    fn parse_module(&mut self) -> Result<Module> {
        let mut body = Vec::new();
        while !self.check(&Token::Eof) {
            if self.eat(&Token::Newline) {
                continue;
            }
            if self.check(&Token::Indent) {
                return Err(self.error("Unexpected indent"));
            }
            body.push(self.parse_statement()?);
        }
        Ok(Module { body })
    }

    fn parse_statement(&mut self) -> Result<Stmt> {
        let line = self.span().line;
        let kind = match self.peek() {
            Token::Def => self.parse_def(line)?,
            Token::If => self.parse_if()?,
            Token::While => self.parse_while()?,
            Token::For => self.parse_for()?,
            _ => {
                let kind = self.parse_simple_statement()?;
                self.end_of_statement()?;
                kind
            }
        };
        Ok(Stmt { kind, line })
    }

    fn end_of_statement(&mut self) -> Result<()> {
        if self.eat(&Token::Newline) || self.check(&Token::Eof) || self.check(&Token::Dedent) {
            Ok(())
        } else {
            Err(self.error("Expected end of statement"))
        }
    }

    /// `: NEWLINE INDENT stmt+ DEDENT` or `: simple_stmt NEWLINE`
    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.nested(Self::parse_block_inner)
    }

    fn parse_block_inner(&mut self) -> Result<Vec<Stmt>> {
        self.expect(&Token::Colon, "before block")?;

        if !self.eat(&Token::Newline) {
            let line = self.span().line;
            let kind = self.parse_simple_statement()?;
            self.end_of_statement()?;
            return Ok(vec![Stmt { kind, line }]);
        }

        if !self.eat(&Token::Indent) {
            return Err(self.error("Expected an indented block"));
        }
        let mut body = Vec::new();
        while !self.eat(&Token::Dedent) {
            if self.check(&Token::Eof) {
                break;
            }
            if self.eat(&Token::Newline) {
                continue;
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn parse_def(&mut self, line: usize) -> Result<StmtKind> {
        self.advance(); // def
        let name = self.expect_identifier("after 'def'")?;
        self.expect(&Token::LParen, "after function name")?;

        let mut params: Vec<Param> = Vec::new();
        while !self.check(&Token::RParen) {
            let param_name = self.expect_identifier("in parameter list")?;
            if params.iter().any(|p| p.name == param_name) {
                return Err(Error::ParseError(format!(
                    "Duplicate parameter '{}' in function '{}' at {}",
                    param_name,
                    name,
                    self.span()
                )));
            }
            let default = if self.eat(&Token::Assign) {
                Some(self.parse_expr()?)
            } else {
                if params.iter().any(|p| p.default.is_some()) {
                    return Err(Error::ParseError(format!(
                        "Non-default parameter '{}' follows default parameter at {}",
                        param_name,
                        self.span()
                    )));
                }
                None
            };
            params.push(Param {
                name: param_name,
                default,
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "to close parameter list")?;

        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;

        Ok(StmtKind::FunctionDef(Rc::new(FunctionDef {
            name,
            params,
            body: body?,
            line,
        })))
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.advance(); // if
        let mut branches = Vec::new();
        let test = self.parse_expr()?;
        let body = self.parse_block()?;
        branches.push((test, body));

        let mut orelse = Vec::new();
        loop {
            if self.eat(&Token::Elif) {
                let test = self.parse_expr()?;
                let body = self.parse_block()?;
                branches.push((test, body));
            } else if self.eat(&Token::Else) {
                orelse = self.parse_block()?;
                break;
            } else {
                break;
            }
        }
        Ok(StmtKind::If { branches, orelse })
    }

    fn parse_while(&mut self) -> Result<StmtKind> {
        self.advance(); // while
        let test = self.parse_expr()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(StmtKind::While { test, body: body? })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.advance(); // for
        let mut names = vec![self.expect_identifier("after 'for'")?];
        while self.eat(&Token::Comma) {
            names.push(self.expect_identifier("in 'for' target")?);
        }
        let target = if names.len() == 1 {
            Target::Name(names.remove(0))
        } else {
            Target::Unpack(names)
        };
        self.expect(&Token::In, "in 'for' statement")?;
        let iter = self.parse_expr_list()?;
        self.loop_depth += 1;
        let body = self.parse_block();
        self.loop_depth -= 1;
        Ok(StmtKind::For {
            target,
            iter,
            body: body?,
        })
    }

    fn parse_simple_statement(&mut self) -> Result<StmtKind> {
        match self.peek().clone() {
            Token::Return => {
                if self.function_depth == 0 {
                    return Err(self.error("'return' outside function"));
                }
                self.advance();
                if matches!(self.peek(), Token::Newline | Token::Eof | Token::Dedent) {
                    Ok(StmtKind::Return(None))
                } else {
                    Ok(StmtKind::Return(Some(self.parse_expr_list()?)))
                }
            }
            Token::Pass => {
                self.advance();
                Ok(StmtKind::Pass)
            }
            Token::Break | Token::Continue => {
                if self.loop_depth == 0 {
                    return Err(self.error("Loop control statement outside loop"));
                }
                if self.advance() == Token::Break {
                    Ok(StmtKind::Break)
                } else {
                    Ok(StmtKind::Continue)
                }
            }
            Token::Raise => {
                self.advance();
                Ok(StmtKind::Raise(self.parse_expr()?))
            }
            Token::Reserved(word) => Err(Error::ParseError(format!(
                "'{}' is not supported in guest code at {}",
                word,
                self.span()
            ))),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<StmtKind> {
        let span = self.span();
        let expr = self.parse_expr_list()?;

        let aug_op = match self.peek() {
            Token::PlusAssign => Some(BinOp::Add),
            Token::MinusAssign => Some(BinOp::Sub),
            Token::StarAssign => Some(BinOp::Mul),
            Token::SlashAssign => Some(BinOp::Div),
            Token::PercentAssign => Some(BinOp::Mod),
            _ => None,
        };

        if let Some(op) = aug_op {
            self.advance();
            let target = Self::to_target(expr, span)?;
            if matches!(target, Target::Unpack(_)) {
                return Err(Error::ParseError(format!(
                    "Augmented assignment to multiple targets at {}",
                    span
                )));
            }
            let value = self.parse_expr()?;
            return Ok(StmtKind::AugAssign { target, op, value });
        }

        if self.eat(&Token::Assign) {
            let target = Self::to_target(expr, span)?;
            let value = self.parse_expr_list()?;
            return Ok(StmtKind::Assign { target, value });
        }

        Ok(StmtKind::Expr(expr))
    }

    fn to_target(expr: Expr, span: Span) -> Result<Target> {
        match expr {
            Expr::Name(name) => Ok(Target::Name(name)),
            Expr::Subscript { object, index } => Ok(Target::Subscript {
                object: *object,
                index: *index,
            }),
            Expr::List(items) if !items.is_empty() => {
                let mut names = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Expr::Name(name) => names.push(name),
                        _ => {
                            return Err(Error::ParseError(format!(
                                "Cannot unpack into expression at {}",
                                span
                            )))
                        }
                    }
                }
                Ok(Target::Unpack(names))
            }
            _ => Err(Error::ParseError(format!(
                "Cannot assign to expression at {}",
                span
            ))),
        }
    }

    // ── Expressions ────────────────────────────────────────

    /// `expr (, expr)*`: more than one element builds a list
    fn parse_expr_list(&mut self) -> Result<Expr> {
        let first = self.parse_expr()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if matches!(
                self.peek(),
                Token::Newline | Token::Eof | Token::Assign | Token::Colon
            ) {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::List(items))
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        self.nested(Self::parse_conditional)
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let body = self.parse_or()?;
        if self.eat(&Token::If) {
            let test = self.parse_or()?;
            self.expect(&Token::Else, "in conditional expression")?;
            let orelse = self.parse_expr()?;
            return Ok(Expr::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        self.folding(|p| {
            let mut left = p.parse_and()?;
            while p.eat(&Token::Or) {
                p.deepen()?;
                let right = p.parse_and()?;
                left = Expr::BoolOp {
                    op: BoolOp::Or,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn parse_and(&mut self) -> Result<Expr> {
        self.folding(|p| {
            let mut left = p.parse_not()?;
            while p.eat(&Token::And) {
                p.deepen()?;
                let right = p.parse_not()?;
                left = Expr::BoolOp {
                    op: BoolOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.eat(&Token::Not) {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let left = self.parse_arith()?;
        let mut comparisons = Vec::new();
        loop {
            let op = match self.peek() {
                Token::EqEq => CmpOp::Eq,
                Token::NotEq => CmpOp::NotEq,
                Token::Lt => CmpOp::Lt,
                Token::LtEq => CmpOp::LtEq,
                Token::Gt => CmpOp::Gt,
                Token::GtEq => CmpOp::GtEq,
                Token::In => CmpOp::In,
                Token::Not if self.peek_ahead(1) == &Token::In => {
                    self.advance();
                    CmpOp::NotIn
                }
                Token::Is => {
                    if self.peek_ahead(1) == &Token::Not {
                        self.advance();
                        CmpOp::IsNot
                    } else {
                        CmpOp::Is
                    }
                }
                _ => break,
            };
            self.advance();
            comparisons.push((op, self.parse_arith()?));
        }
        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    fn parse_arith(&mut self) -> Result<Expr> {
        self.folding(|p| {
            let mut left = p.parse_term()?;
            loop {
                let op = match p.peek() {
                    Token::Plus => BinOp::Add,
                    Token::Minus => BinOp::Sub,
                    _ => break,
                };
                p.advance();
                p.deepen()?;
                let right = p.parse_term()?;
                left = Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn parse_term(&mut self) -> Result<Expr> {
        self.folding(|p| {
            let mut left = p.parse_unary()?;
            loop {
                let op = match p.peek() {
                    Token::Star => BinOp::Mul,
                    Token::Slash => BinOp::Div,
                    Token::DoubleSlash => BinOp::FloorDiv,
                    Token::Percent => BinOp::Mod,
                    _ => break,
                };
                p.advance();
                p.deepen()?;
                let right = p.parse_unary()?;
                left = Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }
            Ok(left)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        self.advance();
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_postfix()?;
        if self.eat(&Token::DoubleStar) {
            // Right associative, and binds tighter than a unary minus on its left
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        self.folding(|p| {
            let mut expr = p.parse_atom()?;
            loop {
                if !matches!(p.peek(), Token::LParen | Token::LBracket | Token::Dot) {
                    break;
                }
                p.deepen()?;
                match p.advance() {
                    Token::LParen => {
                        let (args, kwargs) = p.parse_call_arguments()?;
                        expr = Expr::Call {
                            func: Box::new(expr),
                            args,
                            kwargs,
                        };
                    }
                    Token::LBracket => {
                        expr = p.parse_subscript(expr)?;
                    }
                    _ => {
                        let name = p.expect_identifier("after '.'")?;
                        expr = Expr::Attribute {
                            object: Box::new(expr),
                            name,
                        };
                    }
                }
            }
            Ok(expr)
        })
    }

    fn parse_call_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>)> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(String, Expr)> = Vec::new();
        while !self.check(&Token::RParen) {
            if let (Token::Identifier(name), Token::Assign) =
                (self.peek().clone(), self.peek_ahead(1).clone())
            {
                self.advance();
                self.advance();
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(self.error(&format!("Repeated keyword argument '{}'", name)));
                }
                kwargs.push((name, self.parse_expr()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("Positional argument follows keyword argument"));
                }
                args.push(self.parse_expr()?);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen, "to close argument list")?;
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self, object: Expr) -> Result<Expr> {
        let lower = if self.check(&Token::Colon) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        if self.eat(&Token::Colon) {
            let upper = if self.check(&Token::RBracket) {
                None
            } else {
                Some(Box::new(self.parse_expr()?))
            };
            self.expect(&Token::RBracket, "to close slice")?;
            return Ok(Expr::Slice {
                object: Box::new(object),
                lower: lower.map(Box::new),
                upper,
            });
        }

        self.expect(&Token::RBracket, "to close subscript")?;
        match lower {
            Some(index) => Ok(Expr::Subscript {
                object: Box::new(object),
                index: Box::new(index),
            }),
            None => Err(self.error("Expected subscript expression")),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr> {
        match self.peek().clone() {
            Token::None => {
                self.advance();
                Ok(Expr::Literal(Literal::None))
            }
            Token::True => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            Token::False => {
                self.advance();
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            Token::IntegerLiteral(i) => {
                self.advance();
                Ok(Expr::Literal(Literal::Int(i)))
            }
            Token::FloatLiteral(f) => {
                self.advance();
                Ok(Expr::Literal(Literal::Float(f)))
            }
            Token::StringLiteral(s) => {
                self.advance();
                // Adjacent literals concatenate: "a" "b" == "ab"
                let mut value = s;
                while let Token::StringLiteral(next) = self.peek().clone() {
                    self.advance();
                    value.push_str(&next);
                }
                Ok(Expr::Literal(Literal::Str(value)))
            }
            Token::Identifier(name) => {
                self.advance();
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                self.advance();
                if self.eat(&Token::RParen) {
                    return Ok(Expr::List(Vec::new()));
                }
                let expr = self.parse_expr_list()?;
                self.expect(&Token::RParen, "to close parenthesis")?;
                Ok(expr)
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                while !self.check(&Token::RBracket) {
                    items.push(self.parse_expr()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket, "to close list")?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check(&Token::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(&Token::Colon, "after dict key")?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBrace, "to close dict")?;
                Ok(Expr::Dict(entries))
            }
            Token::Reserved(word) => Err(Error::ParseError(format!(
                "'{}' is not supported in guest code at {}",
                word,
                self.span()
            ))),
            _ => Err(self.error("Expected expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Module {
        parse_module(source).unwrap()
    }

    fn parse_err(source: &str) -> String {
        parse_module(source).unwrap_err().to_string()
    }

    fn single_expr(source: &str) -> Expr {
        let module = parse(source);
        match &module.body[0].kind {
            StmtKind::Expr(expr) => expr.clone(),
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_one_line_function() {
        let module = parse("def handler(params): return params[\"x\"] + 1");
        assert_eq!(module.body.len(), 1);
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected function definition");
        };
        assert_eq!(def.name, "handler");
        assert_eq!(def.params.len(), 1);
        assert_eq!(def.body.len(), 1);
        assert!(matches!(def.body[0].kind, StmtKind::Return(Some(_))));
    }

    #[test]
    fn test_parse_block_function_with_defaults() {
        let module = parse("def f(a, b=2):\n    c = a + b\n    return c\n");
        let StmtKind::FunctionDef(def) = &module.body[0].kind else {
            panic!("expected function definition");
        };
        assert_eq!(def.required_params(), 1);
        assert_eq!(def.body.len(), 2);
        assert_eq!(def.body[1].line, 3);
    }

    #[test]
    fn test_parse_if_elif_else() {
        let module = parse("x = 1\nif x > 1:\n    y = 1\nelif x == 1:\n    y = 2\nelse:\n    y = 3\n");
        let StmtKind::If { branches, orelse } = &module.body[1].kind else {
            panic!("expected if");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(orelse.len(), 1);
    }

    #[test]
    fn test_parse_for_unpack() {
        let module = parse("d = {}\nfor k, v in d.items():\n    pass\n");
        let StmtKind::For { target, .. } = &module.body[1].kind else {
            panic!("expected for");
        };
        assert_eq!(target, &Target::Unpack(vec!["k".into(), "v".into()]));
    }

    #[test]
    fn test_operator_precedence() {
        let expr = single_expr("1 + 2 * 3");
        let Expr::Binary { op, right, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinOp::Add);
        assert!(matches!(*right, Expr::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = single_expr("-2 ** 2");
        let Expr::Unary { op, operand } = expr else {
            panic!("expected unary");
        };
        assert_eq!(op, UnaryOp::Neg);
        assert!(matches!(*operand, Expr::Binary { op: BinOp::Pow, .. }));
    }

    #[test]
    fn test_not_in_and_is_not() {
        let expr = single_expr("a not in b");
        assert!(matches!(expr, Expr::Compare { ref comparisons, .. } if comparisons[0].0 == CmpOp::NotIn));
        let expr = single_expr("a is not None");
        assert!(matches!(expr, Expr::Compare { ref comparisons, .. } if comparisons[0].0 == CmpOp::IsNot));
    }

    #[test]
    fn test_chained_comparison() {
        let expr = single_expr("0 < x <= 10");
        let Expr::Compare { comparisons, .. } = expr else {
            panic!("expected comparison");
        };
        assert_eq!(comparisons.len(), 2);
    }

    #[test]
    fn test_call_with_keyword_arguments() {
        let expr = single_expr("neo_service.price_feed.get_price_history(\"NEO\", period=\"7d\")");
        let Expr::Call { func, args, kwargs } = expr else {
            panic!("expected call");
        };
        assert!(matches!(*func, Expr::Attribute { ref name, .. } if name == "get_price_history"));
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "period");
    }

    #[test]
    fn test_slice_and_subscript() {
        assert!(matches!(single_expr("xs[1:]"), Expr::Slice { upper: None, .. }));
        assert!(matches!(single_expr("xs[:2]"), Expr::Slice { lower: None, .. }));
        assert!(matches!(single_expr("xs[0]"), Expr::Subscript { .. }));
    }

    #[test]
    fn test_conditional_expression() {
        assert!(matches!(single_expr("a if c else b"), Expr::IfExp { .. }));
    }

    #[test]
    fn test_assignment_targets() {
        let module = parse("x = 1\nd = {}\nd['k'] = x\na, b = 1, 2\nx += 1\n");
        assert!(matches!(&module.body[0].kind, StmtKind::Assign { target: Target::Name(n), .. } if n == "x"));
        assert!(matches!(&module.body[2].kind, StmtKind::Assign { target: Target::Subscript { .. }, .. }));
        assert!(matches!(&module.body[3].kind, StmtKind::Assign { target: Target::Unpack(names), .. } if names.len() == 2));
        assert!(matches!(&module.body[4].kind, StmtKind::AugAssign { op: BinOp::Add, .. }));
    }

    #[test]
    fn test_dict_and_list_displays_span_lines() {
        let module = parse("x = {\n    'a': [1, 2],\n    'b': None,\n}\n");
        let StmtKind::Assign { value: Expr::Dict(entries), .. } = &module.body[0].kind else {
            panic!("expected dict assignment");
        };
        assert_eq!(entries.len(), 2);
    }

    // ── Errors ─────────────────────────────────────────

    #[test]
    fn test_return_outside_function() {
        assert!(parse_err("return 1").contains("'return' outside function"));
    }

    #[test]
    fn test_break_outside_loop() {
        assert!(parse_err("def f(x):\n    break\n").contains("outside loop"));
    }

    #[test]
    fn test_import_rejected() {
        let err = parse_err("import os\n");
        assert!(err.contains("'import' is not supported"));
    }

    #[test]
    fn test_missing_colon() {
        let err = parse_err("def f(x)\n    return x\n");
        assert!(err.starts_with("Parse error"));
        assert!(err.contains("1:9"));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(parse_err("f() = 1\n").contains("Cannot assign"));
    }

    #[test]
    fn test_unexpected_indent() {
        assert!(parse_err("  x = 1\n").contains("Unexpected indent"));
    }

    #[test]
    fn test_duplicate_parameter() {
        assert!(parse_err("def f(a, a): pass\n").contains("Duplicate parameter"));
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("x = {}1{}\n", "[".repeat(100), "]".repeat(100));
        assert!(parse_err(&deep).contains("Nesting too deep"));
        let unary = format!("x = {}1\n", "-".repeat(100));
        assert!(parse_err(&unary).contains("Nesting too deep"));
        let shallow = format!("x = {}1{}\n", "[".repeat(20), "]".repeat(20));
        assert!(parse_module(&shallow).is_ok());
    }

    #[test]
    fn test_operator_chain_depth_limit() {
        let sums = format!("x = 1{}\n", "+1".repeat(100_000));
        assert!(parse_err(&sums).contains("Nesting too deep"));
        let calls = format!("x = f{}\n", "()".repeat(1_000));
        assert!(parse_err(&calls).contains("Nesting too deep"));
        let attributes = format!("x = a{}\n", ".b".repeat(1_000));
        assert!(parse_err(&attributes).contains("Nesting too deep"));
        let powers = format!("x = 2{}\n", "**2".repeat(1_000));
        assert!(parse_err(&powers).contains("Nesting too deep"));
        let conjunctions = format!("x = a{}\n", " and a".repeat(1_000));
        assert!(parse_err(&conjunctions).contains("Nesting too deep"));

        let long_but_fine = format!("x = 1{}\n", "+1".repeat(200));
        assert!(parse_module(&long_but_fine).is_ok());
        // Sibling chains do not add up
        let siblings = format!("x = [{}]\n", vec!["1+1+1+1"; 300].join(", "));
        assert!(parse_module(&siblings).is_ok());
    }

    #[test]
    fn test_parse_determinism_100_iterations() {
        let source = "def handler(params):\n    return [x * 2, 3] if False else params\n";
        let first = parse_module(source);
        for i in 0..100 {
            assert_eq!(first, parse_module(source), "Determinism failure at iteration {}", i);
        }
    }
}
