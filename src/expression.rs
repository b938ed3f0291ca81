// src/expression.rs
//! Recursive-descent parser producing [`Stmt`] lists.
//!
//! Two entry points mirror the two calling conventions: [`parse_script`]
//! rejects top-level `return`, [`parse_function_body`] accepts it.
//!
//! Every entry point takes a nesting budget. Each nested statement or
//! expression, and each link of a left-associative chain such as `a + b + c`
//! or `a.b.c`, spends one unit; running out is an [`EvalError::Limit`].

use std::rc::Rc;

use crate::ast::{
    Arg, BinaryOp, DeclKind, Expr, FnBody, FunctionDef, LogicalOp, Prop, PropKey, Stmt, UnaryOp,
    UpdateOp,
};
use crate::errors::{EvalError, Result};
use crate::parser::{Parser, Spanned, TemplatePart, Token};

/// Parse source as a script; its completion value is the last expression statement run.
pub fn parse_script(input: &str, max_nesting: usize) -> Result<Vec<Stmt>> {
    let mut p = EParser::new(input, max_nesting)?;
    p.parse_program()
}

/// Parse source as the body of a function, where `return` is legal.
pub fn parse_function_body(input: &str, max_nesting: usize) -> Result<Vec<Stmt>> {
    let mut p = EParser::new(input, max_nesting)?;
    p.function_depth = 1;
    p.parse_program()
}

/// Parse a single expression; used for template substitutions.
pub fn parse_expression(input: &str, max_nesting: usize) -> Result<Expr> {
    parse_nested_expression(input, max_nesting, 0)
}

fn parse_nested_expression(input: &str, max_nesting: usize, depth: usize) -> Result<Expr> {
    let mut p = EParser::new(input, max_nesting)?;
    p.depth = depth;
    let expr = p.parse_sequence()?;
    if !p.at_eof() {
        return Err(p.error("trailing input"));
    }
    Ok(expr)
}

struct EParser {
    tokens: Vec<Spanned>,
    pos: usize,
    function_depth: usize,
    loop_depth: usize,
    depth: usize,
    max_depth: usize,
}

impl EParser {
    fn new(s: &str, max_depth: usize) -> Result<Self> {
        Ok(Self {
            tokens: Parser::new(s).tokenize()?,
            pos: 0,
            function_depth: 0,
            loop_depth: 0,
            depth: 0,
            max_depth,
        })
    }

    fn descend(&mut self) -> Result<()> {
        if self.depth >= self.max_depth {
            return Err(EvalError::Limit(format!(
                "expression nested deeper than {} at offset {}",
                self.max_depth,
                self.current().offset
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn nested<T>(&mut self, parse: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.descend()?;
        let out = parse(self);
        self.depth -= 1;
        out
    }

    fn parse_program(&mut self) -> Result<Vec<Stmt>> {
        let mut body = Vec::new();
        while !self.at_eof() {
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    /* ===================== Statements ===================== */

    fn parse_statement(&mut self) -> Result<Stmt> {
        self.nested(Self::parse_statement_inner)
    }

    fn parse_statement_inner(&mut self) -> Result<Stmt> {
        if self.is_punct("{") {
            // A leading brace is a block unless only an object literal makes sense.
            let save = (self.pos, self.depth);
            match self.parse_block() {
                Ok(body) => return Ok(Stmt::Block(body)),
                Err(e @ EvalError::Limit(_)) => return Err(e),
                Err(block_err) => {
                    (self.pos, self.depth) = save;
                    return self.parse_expression_statement().map_err(|_| block_err);
                }
            }
        }
        if self.eat_punct(";") {
            return Ok(Stmt::Empty);
        }
        let keyword = match self.peek() {
            Token::Ident(name) => name.clone(),
            _ => return self.parse_expression_statement(),
        };
        match keyword.as_str() {
            "let" | "const" | "var" => {
                let stmt = self.parse_declaration()?;
                self.consume_semicolon()?;
                Ok(stmt)
            }
            "if" => self.parse_if(),
            "while" => {
                self.advance();
                self.expect_punct("(")?;
                let test = self.parse_sequence()?;
                self.expect_punct(")")?;
                let body = self.parse_loop_body()?;
                Ok(Stmt::While { test, body: Box::new(body) })
            }
            "do" => {
                self.advance();
                let body = self.parse_loop_body()?;
                self.expect_keyword("while")?;
                self.expect_punct("(")?;
                let test = self.parse_sequence()?;
                self.expect_punct(")")?;
                self.eat_punct(";");
                Ok(Stmt::DoWhile { body: Box::new(body), test })
            }
            "for" => self.parse_for(),
            "return" => {
                if self.function_depth == 0 {
                    return Err(self.error("Illegal return statement"));
                }
                self.advance();
                let value = if self.statement_ends_here() {
                    None
                } else {
                    Some(self.parse_sequence()?)
                };
                self.consume_semicolon()?;
                Ok(Stmt::Return(value))
            }
            "break" | "continue" => {
                if self.loop_depth == 0 {
                    return Err(self.error(format!("Illegal {keyword} statement")));
                }
                self.advance();
                self.consume_semicolon()?;
                Ok(if keyword == "break" { Stmt::Break } else { Stmt::Continue })
            }
            "throw" => {
                self.advance();
                if self.current().newline_before {
                    return Err(self.error("Illegal newline after throw"));
                }
                let value = self.parse_sequence()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(value))
            }
            "try" => self.parse_try(),
            "function" if matches!(self.peek_at(1), Token::Ident(_)) => {
                self.advance();
                let def = self.parse_function_rest(false)?;
                Ok(Stmt::Function(def))
            }
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_expression_statement(&mut self) -> Result<Stmt> {
        let expr = self.parse_sequence()?;
        self.consume_semicolon()?;
        Ok(Stmt::Expr(expr))
    }

    fn parse_block(&mut self) -> Result<Vec<Stmt>> {
        self.expect_punct("{")?;
        let mut body = Vec::new();
        while !self.is_punct("}") {
            if self.at_eof() {
                return Err(self.error("expected '}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_declaration(&mut self) -> Result<Stmt> {
        let kind = self.parse_decl_kind()?;
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && kind == DeclKind::Const {
                return Err(self.error("Missing initializer in const declaration"));
            }
            decls.push((name, init));
            if !self.eat_punct(",") {
                break;
            }
        }
        Ok(Stmt::Declare { kind, decls })
    }

    fn parse_decl_kind(&mut self) -> Result<DeclKind> {
        let kind = match self.peek() {
            Token::Ident(k) if k == "let" => DeclKind::Let,
            Token::Ident(k) if k == "const" => DeclKind::Const,
            Token::Ident(k) if k == "var" => DeclKind::Var,
            _ => return Err(self.error("declaration expected")),
        };
        self.advance();
        Ok(kind)
    }

    fn parse_if(&mut self) -> Result<Stmt> {
        self.expect_keyword("if")?;
        self.expect_punct("(")?;
        let test = self.parse_sequence()?;
        self.expect_punct(")")?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat_keyword("else") {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(Stmt::If { test, consequent, alternate })
    }

    fn parse_for(&mut self) -> Result<Stmt> {
        self.expect_keyword("for")?;
        self.expect_punct("(")?;

        // for (x of xs) / for (const x in obj)
        let has_kind = matches!(self.peek(), Token::Ident(k) if k == "let" || k == "const" || k == "var");
        let name_at = if has_kind { 1 } else { 0 };
        if let (Token::Ident(_), Token::Ident(word)) = (self.peek_at(name_at), self.peek_at(name_at + 1)) {
            if word == "of" || word == "in" {
                let is_of = word == "of";
                let kind = if has_kind { self.parse_decl_kind()? } else { DeclKind::Var };
                let name = self.expect_ident()?;
                self.advance();
                let subject = self.parse_assignment()?;
                self.expect_punct(")")?;
                let body = Box::new(self.parse_loop_body()?);
                return Ok(if is_of {
                    Stmt::ForOf { kind, name, iterable: subject, body }
                } else {
                    Stmt::ForIn { kind, name, object: subject, body }
                });
            }
        }

        let init = if self.eat_punct(";") {
            None
        } else {
            let stmt = if has_kind {
                self.parse_declaration()?
            } else {
                Stmt::Expr(self.parse_sequence()?)
            };
            self.expect_punct(";")?;
            Some(Box::new(stmt))
        };
        let test = if self.is_punct(";") { None } else { Some(self.parse_sequence()?) };
        self.expect_punct(";")?;
        let update = if self.is_punct(")") { None } else { Some(self.parse_sequence()?) };
        self.expect_punct(")")?;
        let body = Box::new(self.parse_loop_body()?);
        Ok(Stmt::For { init, test, update, body })
    }

    fn parse_loop_body(&mut self) -> Result<Stmt> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    fn parse_try(&mut self) -> Result<Stmt> {
        self.expect_keyword("try")?;
        let block = self.parse_block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword("catch") {
            if self.eat_punct("(") {
                param = Some(self.expect_ident()?);
                self.expect_punct(")")?;
            }
            handler = Some(self.parse_block()?);
        }
        let finalizer = if self.eat_keyword("finally") {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error("Missing catch or finally after try"));
        }
        Ok(Stmt::Try { block, param, handler, finalizer })
    }

    // Cursor sits just past the `function` keyword.
    fn parse_function_rest(&mut self, is_expression: bool) -> Result<Rc<FunctionDef>> {
        let name = match self.peek() {
            Token::Ident(n) => {
                let n = n.clone();
                self.advance();
                Some(n)
            }
            _ if is_expression => None,
            _ => return Err(self.error("function name expected")),
        };
        self.expect_punct("(")?;
        let (params, rest) = self.parse_params()?;
        let body = self.parse_function_block()?;
        Ok(Rc::new(FunctionDef { name, params, rest, body: FnBody::Block(body), is_arrow: false }))
    }

    // Cursor sits just past `(`; consumes through `)`.
    fn parse_params(&mut self) -> Result<(Vec<String>, Option<String>)> {
        let mut params = Vec::new();
        let mut rest = None;
        while !self.eat_punct(")") {
            if self.eat_punct("...") {
                rest = Some(self.expect_ident()?);
                self.expect_punct(")")?;
                break;
            }
            params.push(self.expect_ident()?);
            if !self.eat_punct(",") {
                self.expect_punct(")")?;
                break;
            }
        }
        Ok((params, rest))
    }

    fn parse_function_block(&mut self) -> Result<Vec<Stmt>> {
        let saved_loops = std::mem::replace(&mut self.loop_depth, 0);
        self.function_depth += 1;
        let body = self.parse_block();
        self.function_depth -= 1;
        self.loop_depth = saved_loops;
        body
    }

    /* ===================== Expressions ===================== */

    fn parse_sequence(&mut self) -> Result<Expr> {
        let first = self.parse_assignment()?;
        if !self.is_punct(",") {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(",") {
            items.push(self.parse_assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn parse_assignment(&mut self) -> Result<Expr> {
        self.nested(Self::parse_assignment_inner)
    }

    fn parse_assignment_inner(&mut self) -> Result<Expr> {
        if let Some(arrow) = self.try_parse_arrow()? {
            return Ok(arrow);
        }
        let left = self.parse_conditional()?;
        let op = match self.peek() {
            Token::Punct("=") => None,
            Token::Punct("+=") => Some(BinaryOp::Add),
            Token::Punct("-=") => Some(BinaryOp::Sub),
            Token::Punct("*=") => Some(BinaryOp::Mul),
            Token::Punct("/=") => Some(BinaryOp::Div),
            Token::Punct("%=") => Some(BinaryOp::Rem),
            Token::Punct("**=") => Some(BinaryOp::Pow),
            Token::Punct("<<=") => Some(BinaryOp::Shl),
            Token::Punct(">>=") => Some(BinaryOp::Shr),
            Token::Punct(">>>=") => Some(BinaryOp::UShr),
            _ => return Ok(left),
        };
        if !left.is_assign_target() {
            return Err(self.error("Invalid left-hand side in assignment"));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::Assign { op, target: Box::new(left), value: Box::new(value) })
    }

    fn try_parse_arrow(&mut self) -> Result<Option<Expr>> {
        let (params, rest) = match (self.peek(), self.peek_at(1)) {
            (Token::Ident(name), Token::Punct("=>")) => {
                let name = name.clone();
                self.pos += 2;
                (vec![name], None)
            }
            (Token::Punct("("), _) => {
                let close = match self.matching_paren(self.pos) {
                    Some(close) => close,
                    None => return Ok(None),
                };
                if !matches!(self.tokens.get(close + 1).map(|t| &t.token), Some(Token::Punct("=>"))) {
                    return Ok(None);
                }
                self.advance();
                let params = self.parse_params()?;
                self.expect_punct("=>")?;
                params
            }
            _ => return Ok(None),
        };
        let body = if self.is_punct("{") {
            FnBody::Block(self.parse_function_block()?)
        } else {
            FnBody::Expr(self.parse_assignment()?)
        };
        Ok(Some(Expr::Function(Rc::new(FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
        }))))
    }

    fn matching_paren(&self, open: usize) -> Option<usize> {
        let mut depth = 0usize;
        for (i, t) in self.tokens.iter().enumerate().skip(open) {
            match t.token {
                Token::Punct("(") => depth += 1,
                Token::Punct(")") => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i);
                    }
                }
                Token::Eof => return None,
                _ => {}
            }
        }
        None
    }

    fn parse_conditional(&mut self) -> Result<Expr> {
        let test = self.parse_nullish()?;
        if !self.eat_punct("?") {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect_punct(":")?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn parse_nullish(&mut self) -> Result<Expr> {
        let mut left = self.parse_or()?;
        let mut links = 0;
        while self.eat_punct("??") {
            self.descend()?;
            links += 1;
            let right = self.parse_or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        let mut links = 0;
        while self.eat_punct("||") {
            self.descend()?;
            links += 1;
            let right = self.parse_and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_binary(0)?;
        let mut links = 0;
        while self.eat_punct("&&") {
            self.descend()?;
            links += 1;
            let right = self.parse_binary(0)?;
            left = logical(LogicalOp::And, left, right);
        }
        self.depth -= links;
        Ok(left)
    }

    // Precedence climbing over the left-associative binary operators.
    fn parse_binary(&mut self, min_prec: u8) -> Result<Expr> {
        let mut left = self.parse_exponent()?;
        let mut links = 0;
        while let Some((op, prec)) = self.peek_binary_op() {
            if prec < min_prec {
                break;
            }
            self.advance();
            self.descend()?;
            links += 1;
            let right = self.parse_binary(prec + 1)?;
            left = Expr::Binary { op, left: Box::new(left), right: Box::new(right) };
        }
        self.depth -= links;
        Ok(left)
    }

    fn peek_binary_op(&self) -> Option<(BinaryOp, u8)> {
        Some(match self.peek() {
            Token::Punct("|") => (BinaryOp::BitOr, 1),
            Token::Punct("^") => (BinaryOp::BitXor, 2),
            Token::Punct("&") => (BinaryOp::BitAnd, 3),
            Token::Punct("==") => (BinaryOp::Eq, 4),
            Token::Punct("!=") => (BinaryOp::NotEq, 4),
            Token::Punct("===") => (BinaryOp::StrictEq, 4),
            Token::Punct("!==") => (BinaryOp::StrictNotEq, 4),
            Token::Punct("<") => (BinaryOp::Lt, 5),
            Token::Punct("<=") => (BinaryOp::LtEq, 5),
            Token::Punct(">") => (BinaryOp::Gt, 5),
            Token::Punct(">=") => (BinaryOp::GtEq, 5),
            Token::Ident(k) if k == "in" => (BinaryOp::In, 5),
            Token::Ident(k) if k == "instanceof" => (BinaryOp::InstanceOf, 5),
            Token::Punct("<<") => (BinaryOp::Shl, 6),
            Token::Punct(">>") => (BinaryOp::Shr, 6),
            Token::Punct(">>>") => (BinaryOp::UShr, 6),
            Token::Punct("+") => (BinaryOp::Add, 7),
            Token::Punct("-") => (BinaryOp::Sub, 7),
            Token::Punct("*") => (BinaryOp::Mul, 8),
            Token::Punct("/") => (BinaryOp::Div, 8),
            Token::Punct("%") => (BinaryOp::Rem, 8),
            _ => return None,
        })
    }

    // `**` is right-associative and binds tighter than `*`.
    fn parse_exponent(&mut self) -> Result<Expr> {
        let base = self.parse_unary()?;
        if self.eat_punct("**") {
            let exponent = self.nested(Self::parse_exponent)?;
            return Ok(Expr::Binary {
                op: BinaryOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        let op = match self.peek() {
            Token::Punct("!") => Some(UnaryOp::Not),
            Token::Punct("-") => Some(UnaryOp::Neg),
            Token::Punct("+") => Some(UnaryOp::Plus),
            Token::Punct("~") => Some(UnaryOp::BitNot),
            Token::Ident(k) if k == "typeof" => Some(UnaryOp::TypeOf),
            Token::Ident(k) if k == "void" => Some(UnaryOp::Void),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let expr = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary { op, expr: Box::new(expr) });
        }
        let update = match self.peek() {
            Token::Punct("++") => Some(UpdateOp::Inc),
            Token::Punct("--") => Some(UpdateOp::Dec),
            _ => None,
        };
        if let Some(op) = update {
            self.advance();
            let target = self.nested(Self::parse_unary)?;
            if !target.is_assign_target() {
                return Err(self.error("Invalid left-hand side expression in prefix operation"));
            }
            return Ok(Expr::Update { op, prefix: true, target: Box::new(target) });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr> {
        let expr = self.parse_call_member()?;
        if self.current().newline_before {
            return Ok(expr);
        }
        let op = match self.peek() {
            Token::Punct("++") => UpdateOp::Inc,
            Token::Punct("--") => UpdateOp::Dec,
            _ => return Ok(expr),
        };
        if !expr.is_assign_target() {
            return Err(self.error("Invalid left-hand side expression in postfix operation"));
        }
        self.advance();
        Ok(Expr::Update { op, prefix: false, target: Box::new(expr) })
    }

    fn parse_call_member(&mut self) -> Result<Expr> {
        let mut expr = if self.eat_keyword("new") {
            let callee = self.parse_new_callee()?;
            let args = if self.eat_punct("(") { self.parse_args()? } else { Vec::new() };
            Expr::New { callee: Box::new(callee), args }
        } else {
            self.parse_primary()?
        };
        let mut links = 0;
        loop {
            if !matches!(self.peek(), Token::Punct("." | "?." | "[" | "(")) {
                self.depth -= links;
                return Ok(expr);
            }
            self.descend()?;
            links += 1;
            if self.eat_punct(".") {
                let property = self.expect_property_name()?;
                expr = Expr::Member { object: Box::new(expr), property, optional: false };
            } else if self.eat_punct("?.") {
                if self.eat_punct("(") {
                    let args = self.parse_args()?;
                    expr = Expr::Call { callee: Box::new(expr), args, optional: true };
                } else if self.eat_punct("[") {
                    let index = self.parse_sequence()?;
                    self.expect_punct("]")?;
                    expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional: true };
                } else {
                    let property = self.expect_property_name()?;
                    expr = Expr::Member { object: Box::new(expr), property, optional: true };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_sequence()?;
                self.expect_punct("]")?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index), optional: false };
            } else if self.eat_punct("(") {
                let args = self.parse_args()?;
                expr = Expr::Call { callee: Box::new(expr), args, optional: false };
            }
        }
    }

    // `new a.b.C(...)`: member accesses bind to the callee, the argument list does not.
    fn parse_new_callee(&mut self) -> Result<Expr> {
        let mut callee = self.parse_primary()?;
        let mut links = 0;
        while self.eat_punct(".") {
            self.descend()?;
            links += 1;
            let property = self.expect_property_name()?;
            callee = Expr::Member { object: Box::new(callee), property, optional: false };
        }
        self.depth -= links;
        Ok(callee)
    }

    // Cursor sits just past `(`; consumes through `)`.
    fn parse_args(&mut self) -> Result<Vec<Arg>> {
        self.parse_list(")")
    }

    fn parse_list(&mut self, close: &'static str) -> Result<Vec<Arg>> {
        let mut out = Vec::new();
        while !self.eat_punct(close) {
            if self.eat_punct("...") {
                out.push(Arg::Spread(self.parse_assignment()?));
            } else {
                out.push(Arg::Plain(self.parse_assignment()?));
            }
            if !self.eat_punct(",") {
                self.expect_punct(close)?;
                break;
            }
        }
        Ok(out)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let token = self.peek().clone();
        match token {
            Token::Num(n) => {
                self.advance();
                Ok(Expr::Num(n))
            }
            Token::Str(s) => {
                self.advance();
                Ok(Expr::Str(s))
            }
            Token::Template(parts) => {
                self.advance();
                self.build_template(parts)
            }
            Token::Regex { pattern, flags } => {
                self.advance();
                Ok(Expr::Regex { pattern, flags })
            }
            Token::Punct("(") => {
                self.advance();
                let inner = self.parse_sequence()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            Token::Punct("[") => {
                self.advance();
                Ok(Expr::Array(self.parse_list("]")?))
            }
            Token::Punct("{") => self.parse_object(),
            Token::Ident(name) => {
                self.advance();
                Ok(match name.as_str() {
                    "true" => Expr::Bool(true),
                    "false" => Expr::Bool(false),
                    "null" => Expr::Null,
                    "undefined" => Expr::Undefined,
                    "this" => Expr::This,
                    "function" => Expr::Function(self.parse_function_rest(true)?),
                    kw if is_reserved(kw) => return Err(self.error(format!("Unexpected token '{kw}'"))),
                    _ => Expr::Ident(name),
                })
            }
            Token::Eof => Err(self.error("Unexpected end of input")),
            Token::Punct(p) => Err(self.error(format!("Unexpected token '{p}'"))),
        }
    }

    fn build_template(&self, parts: Vec<TemplatePart>) -> Result<Expr> {
        let mut quasis = Vec::new();
        let mut exprs = Vec::new();
        for part in parts {
            match part {
                TemplatePart::Text(t) => quasis.push(t),
                TemplatePart::Expr(src) => {
                    exprs.push(parse_nested_expression(&src, self.max_depth, self.depth + 1)?)
                }
            }
        }
        Ok(Expr::Template { quasis, exprs })
    }

    fn parse_object(&mut self) -> Result<Expr> {
        self.expect_punct("{")?;
        let mut props = Vec::new();
        while !self.eat_punct("}") {
            if self.eat_punct("...") {
                props.push(Prop::Spread(self.parse_assignment()?));
            } else {
                let key = match self.peek().clone() {
                    Token::Ident(name) => {
                        self.advance();
                        PropKey::Static(name)
                    }
                    Token::Str(s) => {
                        self.advance();
                        PropKey::Static(s)
                    }
                    Token::Num(n) => {
                        self.advance();
                        PropKey::Static(crate::value::format_number(n))
                    }
                    Token::Punct("[") => {
                        self.advance();
                        let key = self.parse_assignment()?;
                        self.expect_punct("]")?;
                        PropKey::Computed(key)
                    }
                    _ => return Err(self.error("property name expected")),
                };
                if self.eat_punct(":") {
                    props.push(Prop::Init(key, self.parse_assignment()?));
                } else if self.eat_punct("(") {
                    // Method shorthand: `name() { ... }`
                    let (params, rest) = self.parse_params()?;
                    let body = self.parse_function_block()?;
                    let name = match &key {
                        PropKey::Static(n) => Some(n.clone()),
                        PropKey::Computed(_) => None,
                    };
                    let def = FunctionDef { name, params, rest, body: FnBody::Block(body), is_arrow: false };
                    props.push(Prop::Init(key, Expr::Function(Rc::new(def))));
                } else {
                    match key {
                        PropKey::Static(name) if !is_reserved(&name) => {
                            props.push(Prop::Init(PropKey::Static(name.clone()), Expr::Ident(name)))
                        }
                        _ => return Err(self.error("expected ':' in object literal")),
                    }
                }
            }
            if !self.eat_punct(",") {
                self.expect_punct("}")?;
                break;
            }
        }
        Ok(Expr::Object(props))
    }

    /* ===================== Token helpers ===================== */

    fn current(&self) -> &Spanned {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)].token
    }

    fn advance(&mut self) {
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn is_punct(&self, p: &str) -> bool {
        matches!(self.peek(), Token::Punct(q) if *q == p)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.is_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> Result<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if matches!(self.peek(), Token::Ident(k) if k == kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{kw}'")))
        }
    }

    fn expect_ident(&mut self) -> Result<String> {
        match self.peek() {
            Token::Ident(name) if !is_reserved(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("identifier expected")),
        }
    }

    // Property names may be reserved words: `obj.default`, `re.source`.
    fn expect_property_name(&mut self) -> Result<String> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("property name expected")),
        }
    }

    fn statement_ends_here(&self) -> bool {
        self.current().newline_before || self.at_eof() || self.is_punct(";") || self.is_punct("}")
    }

    // Automatic semicolon insertion: a statement may end at `;`, a line break, `}` or the end.
    fn consume_semicolon(&mut self) -> Result<()> {
        if self.eat_punct(";") || self.statement_ends_here() {
            Ok(())
        } else {
            let found = match self.peek() {
                Token::Punct(p) => (*p).to_string(),
                Token::Ident(name) => name.clone(),
                _ => "token".to_string(),
            };
            Err(self.error(format!("Unexpected {found}")))
        }
    }

    fn error(&self, msg: impl Into<String>) -> EvalError {
        EvalError::Parse(format!("{} at offset {}", msg.into(), self.current().offset))
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical { op, left: Box::new(left), right: Box::new(right) }
}

fn is_reserved(word: &str) -> bool {
    matches!(
        word,
        "let" | "const" | "var" | "if" | "else" | "while" | "do" | "for" | "return" | "break"
            | "continue" | "throw" | "try" | "catch" | "finally" | "function" | "new" | "typeof"
            | "void" | "in" | "instanceof" | "true" | "false" | "null" | "this" | "class"
            | "delete" | "switch" | "case" | "default" | "yield" | "import" | "export"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH: usize = 64;

    #[test]
    fn bare_expression_parses_as_script() {
        let stmts = parse_script("x + 1", DEPTH).unwrap();
        assert!(matches!(stmts.as_slice(), [Stmt::Expr(Expr::Binary { op: BinaryOp::Add, .. })]));
    }

    #[test]
    fn top_level_return_is_rejected_in_script_mode() {
        assert!(matches!(parse_script("return 1", DEPTH), Err(EvalError::Parse(_))));
        assert!(parse_function_body("if (x) { return 1; } return 2;", DEPTH).is_ok());
    }

    #[test]
    fn bare_object_literal_statement() {
        let stmts = parse_script("{iterations: 3, func: () => 'x'}", DEPTH).unwrap();
        assert!(matches!(stmts.as_slice(), [Stmt::Expr(Expr::Object(props))] if props.len() == 2));
    }

    #[test]
    fn block_statement_still_parses_as_block() {
        let stmts = parse_script("{ let a = 1; a }", DEPTH).unwrap();
        assert!(matches!(stmts.as_slice(), [Stmt::Block(_)]));
    }

    #[test]
    fn arrow_functions() {
        assert!(matches!(
            parse_expression("(a, b) => a + b", DEPTH).unwrap(),
            Expr::Function(def) if def.is_arrow && def.params == ["a", "b"]
        ));
        assert!(matches!(parse_expression("x => { return x }", DEPTH).unwrap(), Expr::Function(_)));
        // Parenthesised expression that is not followed by `=>`
        assert!(matches!(parse_expression("(a, b)", DEPTH).unwrap(), Expr::Sequence(_)));
    }

    #[test]
    fn precedence() {
        // 1 + 2 * 3 ** 2 groups as 1 + (2 * (3 ** 2))
        match parse_expression("1 + 2 * 3 ** 2", DEPTH).unwrap() {
            Expr::Binary { op: BinaryOp::Add, right, .. } => {
                assert!(matches!(*right, Expr::Binary { op: BinaryOp::Mul, .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn asi_splits_lines() {
        let stmts = parse_script("let a = 1\na + 1", DEPTH).unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(parse_script("a b", DEPTH).is_err());
    }

    #[test]
    fn break_outside_loop_is_rejected() {
        assert!(parse_script("break", DEPTH).is_err());
        assert!(parse_script("for (const x of xs) { if (x) break; }", DEPTH).is_ok());
    }

    #[test]
    fn nesting_past_the_budget_is_a_limit_error() {
        let arrays = format!("{}1{}", "[".repeat(40), "]".repeat(40));
        assert!(parse_script(&arrays, DEPTH).is_ok());
        let arrays = format!("{}1{}", "[".repeat(1000), "]".repeat(1000));
        assert!(matches!(parse_script(&arrays, DEPTH), Err(EvalError::Limit(_))));
        assert!(matches!(parse_script(&"-".repeat(500), DEPTH), Err(EvalError::Limit(_))));
        assert!(matches!(parse_script(&"{".repeat(500), DEPTH), Err(EvalError::Limit(_))));
    }

    #[test]
    fn long_chains_spend_the_budget_too() {
        assert!(parse_script(&format!("{}1", "1+".repeat(30)), DEPTH).is_ok());
        assert!(matches!(parse_script(&format!("{}1", "1+".repeat(20_000)), DEPTH), Err(EvalError::Limit(_))));
        assert!(matches!(parse_script(&format!("a{}", ".b".repeat(500)), DEPTH), Err(EvalError::Limit(_))));
        assert!(matches!(parse_script(&format!("a{}", "(1)".repeat(500)), DEPTH), Err(EvalError::Limit(_))));
        // Sibling chains do not add up.
        let siblings = vec!["1 + 1 + 1"; 50].join("; ");
        assert!(parse_script(&siblings, DEPTH).is_ok());
    }

    #[test]
    fn template_substitutions_share_the_budget() {
        let mut src = String::from("1");
        for _ in 0..100 {
            src = format!("`${{{src}}}`");
        }
        assert!(matches!(parse_script(&src, DEPTH), Err(EvalError::Limit(_))));
        assert!(parse_script("`a${`b${1}`}`", DEPTH).is_ok());
    }
}
