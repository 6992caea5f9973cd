//! A recursive descent parser for shale.
//!
//! Two places in the grammar need real backtracking: a statement beginning
//! with a type annotation (variable declaration) versus one beginning with
//! an expression, and `f<` starting an explicit-type-argument call versus a
//! comparison. Both are handled by saving and restoring the token cursor;
//! once a reading is committed, errors inside it are reported, not retried.

use crate::compiler::ast::*;
use crate::compiler::errors::SyntaxError;
use crate::compiler::lexer::{Span, Token, TokenKind};
use crate::compiler::types::AddressSpace;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, current: 0 }
    }

    pub fn parse(&mut self) -> Result<Program, SyntaxError> {
        let mut decls = Vec::new();

        while !self.is_at_end() {
            decls.push(self.decl()?);
        }

        Ok(Program { decls })
    }

    fn decl(&mut self) -> Result<Decl, SyntaxError> {
        if self.check(&TokenKind::Struct) {
            Ok(Decl::Struct(self.struct_decl()?))
        } else if self.check(&TokenKind::Protocol) {
            Ok(Decl::Protocol(self.protocol_decl()?))
        } else {
            Ok(Decl::Func(self.func_decl()?))
        }
    }

    fn struct_decl(&mut self) -> Result<StructDecl, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::Struct)?;
        let name = self.expect_ident()?;
        let type_params = self.type_params()?;

        self.expect(&TokenKind::LBrace)?;
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            let field_span = self.current_span();
            let ty = self.type_ann()?;
            let field_name = self.expect_ident()?;
            self.expect(&TokenKind::Semi)?;
            fields.push(FieldDecl {
                name: field_name,
                ty,
                span: field_span,
            });
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(StructDecl {
            name,
            span,
            type_params,
            fields,
        })
    }

    fn protocol_decl(&mut self) -> Result<ProtocolDecl, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::Protocol)?;
        let name = self.expect_ident()?;

        self.expect(&TokenKind::LBrace)?;
        let mut sigs = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            sigs.push(self.func_sig()?);
        }
        self.expect(&TokenKind::RBrace)?;

        Ok(ProtocolDecl { name, span, sigs })
    }

    fn func_sig(&mut self) -> Result<FuncSig, SyntaxError> {
        let span = self.current_span();
        let return_type = self.type_ann()?;
        let name = self.func_name()?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let ty = self.type_ann()?;
                // Parameter names are allowed but carry no meaning here.
                if self.check_ident() {
                    self.expect_ident()?;
                }
                params.push(ty);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        self.expect(&TokenKind::Semi)?;

        Ok(FuncSig {
            name,
            span,
            params,
            return_type,
        })
    }

    fn func_decl(&mut self) -> Result<FuncDecl, SyntaxError> {
        let span = self.current_span();
        let return_type = self.type_ann()?;
        let name = self.func_name()?;
        let type_params = self.type_params()?;

        self.expect(&TokenKind::LParen)?;
        let mut params = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                let param_span = self.current_span();
                let ty = self.type_ann()?;
                let param_name = self.expect_ident()?;
                params.push(Param {
                    name: param_name,
                    ty,
                    span: param_span,
                });
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;

        let body = self.block()?;

        Ok(FuncDecl {
            name,
            span,
            type_params,
            params,
            return_type,
            body,
        })
    }

    /// A function name: an identifier, or `operator` followed by an
    /// operator token (`operator+`, `operator==`, ...).
    fn func_name(&mut self) -> Result<String, SyntaxError> {
        if !self.match_token(&TokenKind::Operator) {
            return self.expect_ident();
        }
        let op = match self.peek_kind() {
            Some(TokenKind::Plus) => "+",
            Some(TokenKind::Minus) => "-",
            Some(TokenKind::Star) => "*",
            Some(TokenKind::Slash) => "/",
            Some(TokenKind::Percent) => "%",
            Some(TokenKind::EqEq) => "==",
            Some(TokenKind::NotEq) => "!=",
            Some(TokenKind::Lt) => "<",
            Some(TokenKind::Le) => "<=",
            Some(TokenKind::Gt) => ">",
            Some(TokenKind::Ge) => ">=",
            Some(TokenKind::Bang) => "!",
            _ => return Err(self.error("expected operator after 'operator'")),
        };
        self.advance();
        Ok(format!("operator{}", op))
    }

    /// `<T, U: Proto>` after a function or struct name; empty if absent.
    fn type_params(&mut self) -> Result<Vec<TypeParam>, SyntaxError> {
        let mut type_params = Vec::new();
        if !self.match_token(&TokenKind::Lt) {
            return Ok(type_params);
        }
        loop {
            let span = self.current_span();
            let name = self.expect_ident()?;
            let protocol = if self.match_token(&TokenKind::Colon) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            type_params.push(TypeParam {
                name,
                protocol,
                span,
            });
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Gt)?;
        Ok(type_params)
    }

    fn address_space(&mut self) -> Option<AddressSpace> {
        let space = match self.peek_kind() {
            Some(TokenKind::Thread) => AddressSpace::Thread,
            Some(TokenKind::Threadgroup) => AddressSpace::Threadgroup,
            Some(TokenKind::Device) => AddressSpace::Device,
            Some(TokenKind::Constant) => AddressSpace::Constant,
            _ => return None,
        };
        self.advance();
        Some(space)
    }

    fn type_ann(&mut self) -> Result<TypeAnn, SyntaxError> {
        let span = self.current_span();
        let space = self.address_space();

        let name = self.expect_ident()?;
        let mut ann = if self.check(&TokenKind::Lt) {
            let checkpoint = self.current;
            match self.type_args() {
                Ok(args) => TypeAnn {
                    kind: TypeAnnKind::Generic { name, args },
                    span,
                },
                Err(_) => {
                    self.current = checkpoint;
                    TypeAnn {
                        kind: TypeAnnKind::Named(name),
                        span,
                    }
                }
            }
        } else {
            TypeAnn {
                kind: TypeAnnKind::Named(name),
                span,
            }
        };

        // Suffix layers, left to right: `int32^[]` is an array reference
        // whose elements are pointers. The one written address space covers
        // every layer.
        let mut layered = false;
        loop {
            if self.match_token(&TokenKind::Caret) {
                let Some(space) = space else {
                    return Err(SyntaxError::new(
                        "pointer type requires an address space",
                        span,
                    ));
                };
                ann = TypeAnn {
                    kind: TypeAnnKind::Ptr {
                        space,
                        elem: Box::new(ann),
                    },
                    span,
                };
                layered = true;
            } else if self.check(&TokenKind::LBracket)
                && self.check_ahead(&TokenKind::RBracket, 1)
            {
                self.advance();
                self.advance();
                let Some(space) = space else {
                    return Err(SyntaxError::new(
                        "array reference type requires an address space",
                        span,
                    ));
                };
                ann = TypeAnn {
                    kind: TypeAnnKind::ArrayRef {
                        space,
                        elem: Box::new(ann),
                    },
                    span,
                };
                layered = true;
            } else {
                break;
            }
        }

        if space.is_some() && !layered {
            return Err(SyntaxError::new(
                "address space is only meaningful on a pointer or array reference type",
                span,
            ));
        }

        Ok(ann)
    }

    /// `<type, type, ...>` — committed once it parses; the expression
    /// grammar backtracks around this at call sites.
    fn type_args(&mut self) -> Result<Vec<TypeAnn>, SyntaxError> {
        self.expect(&TokenKind::Lt)?;
        let mut args = Vec::new();
        loop {
            args.push(self.type_ann()?);
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Gt)?;
        Ok(args)
    }

    fn block(&mut self) -> Result<Block, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::LBrace)?;

        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RBrace) && !self.is_at_end() {
            stmts.push(self.statement()?);
        }

        self.expect(&TokenKind::RBrace)?;
        Ok(Block { stmts, span })
    }

    fn statement(&mut self) -> Result<Stmt, SyntaxError> {
        match self.peek_kind() {
            Some(TokenKind::Return) => self.return_stmt(),
            Some(TokenKind::If) => self.if_stmt(),
            Some(TokenKind::While) => self.while_stmt(),
            Some(TokenKind::Break) => {
                let span = self.current_span();
                self.advance();
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Break(span))
            }
            Some(TokenKind::Continue) => {
                let span = self.current_span();
                self.advance();
                self.expect(&TokenKind::Semi)?;
                Ok(Stmt::Continue(span))
            }
            Some(TokenKind::LBrace) => Ok(Stmt::Block(self.block()?)),
            // An address space keyword can only start a declaration.
            Some(
                TokenKind::Thread
                | TokenKind::Threadgroup
                | TokenKind::Device
                | TokenKind::Constant,
            ) => self.var_decl_stmt(),
            _ => {
                if let Some(stmt) = self.try_var_decl()? {
                    return Ok(stmt);
                }
                self.assign_or_expr_stmt()
            }
        }
    }

    fn var_decl_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.current_span();
        let ty = self.type_ann()?;
        let name = self.expect_ident()?;
        let init = if self.match_token(&TokenKind::Eq) {
            Some(self.expression()?)
        } else {
            None
        };
        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::VarDecl {
            ty,
            name,
            init,
            span,
        })
    }

    /// Speculatively read a type annotation followed by a name. Only a `=`
    /// or `;` after the name commits the declaration reading; anything else
    /// rewinds so the statement parses as an expression (`a < b` must not
    /// be eaten as the start of a generic type).
    fn try_var_decl(&mut self) -> Result<Option<Stmt>, SyntaxError> {
        let checkpoint = self.current;
        let span = self.current_span();

        let Ok(ty) = self.type_ann() else {
            self.current = checkpoint;
            return Ok(None);
        };
        let Ok(name) = self.expect_ident() else {
            self.current = checkpoint;
            return Ok(None);
        };

        match self.peek_kind() {
            Some(TokenKind::Eq) => {
                self.advance();
                let init = self.expression()?;
                self.expect(&TokenKind::Semi)?;
                Ok(Some(Stmt::VarDecl {
                    ty,
                    name,
                    init: Some(init),
                    span,
                }))
            }
            Some(TokenKind::Semi) => {
                self.advance();
                Ok(Some(Stmt::VarDecl {
                    ty,
                    name,
                    init: None,
                    span,
                }))
            }
            _ => {
                self.current = checkpoint;
                Ok(None)
            }
        }
    }

    fn assign_or_expr_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.current_span();
        let expr = self.expression()?;

        if self.match_token(&TokenKind::Eq) {
            let value = self.expression()?;
            self.expect(&TokenKind::Semi)?;
            return Ok(Stmt::Assign {
                target: expr,
                value,
                span,
            });
        }

        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::Expr(expr))
    }

    fn return_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::Return)?;
        let value = if self.check(&TokenKind::Semi) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&TokenKind::Semi)?;
        Ok(Stmt::Return { value, span })
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::If)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let then_block = self.block()?;

        let else_block = if self.match_token(&TokenKind::Else) {
            if self.check(&TokenKind::If) {
                // `else if` is an else block containing a single if.
                let else_span = self.current_span();
                let nested = self.if_stmt()?;
                Some(Block {
                    stmts: vec![nested],
                    span: else_span,
                })
            } else {
                Some(self.block()?)
            }
        } else {
            None
        };

        Ok(Stmt::If {
            cond,
            then_block,
            else_block,
            span,
        })
    }

    fn while_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let span = self.current_span();
        self.expect(&TokenKind::While)?;
        self.expect(&TokenKind::LParen)?;
        let cond = self.expression()?;
        self.expect(&TokenKind::RParen)?;
        let body = self.block()?;
        Ok(Stmt::While { cond, body, span })
    }

    // Expressions, by descending precedence.

    fn expression(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.and_expr()?;
        while self.check(&TokenKind::OrOr) {
            let span = self.current_span();
            self.advance();
            let rhs = self.and_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op: BinOp::Or,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.equality_expr()?;
        while self.check(&TokenKind::AndAnd) {
            let span = self.current_span();
            self.advance();
            let rhs = self.equality_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op: BinOp::And,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn equality_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.relational_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::EqEq) => BinOp::Eq,
                Some(TokenKind::NotEq) => BinOp::Ne,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let rhs = self.relational_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn relational_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.additive_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Lt) => BinOp::Lt,
                Some(TokenKind::Le) => BinOp::Le,
                Some(TokenKind::Gt) => BinOp::Gt,
                Some(TokenKind::Ge) => BinOp::Ge,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let rhs = self.additive_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn additive_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.multiplicative_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Plus) => BinOp::Add,
                Some(TokenKind::Minus) => BinOp::Sub,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let rhs = self.multiplicative_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn multiplicative_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.unary_expr()?;
        loop {
            let op = match self.peek_kind() {
                Some(TokenKind::Star) => BinOp::Mul,
                Some(TokenKind::Slash) => BinOp::Div,
                Some(TokenKind::Percent) => BinOp::Rem,
                _ => break,
            };
            let span = self.current_span();
            self.advance();
            let rhs = self.unary_expr()?;
            expr = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(expr),
                    rhs: Box::new(rhs),
                },
                span,
            );
        }
        Ok(expr)
    }

    fn unary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.current_span();
        match self.peek_kind() {
            Some(TokenKind::Minus) => {
                self.advance();
                let operand = self.unary_expr()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Neg,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            Some(TokenKind::Bang) => {
                self.advance();
                let operand = self.unary_expr()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnOp::Not,
                        operand: Box::new(operand),
                    },
                    span,
                ))
            }
            Some(TokenKind::Caret) => {
                self.advance();
                let operand = self.unary_expr()?;
                Ok(Expr::new(ExprKind::Deref(Box::new(operand)), span))
            }
            Some(TokenKind::Amp) => {
                self.advance();
                let operand = self.unary_expr()?;
                Ok(Expr::new(ExprKind::AddrOf(Box::new(operand)), span))
            }
            _ => self.postfix_expr(),
        }
    }

    fn postfix_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary_expr()?;
        loop {
            if self.check(&TokenKind::LBracket) {
                let span = self.current_span();
                self.advance();
                let index = self.expression()?;
                self.expect(&TokenKind::RBracket)?;
                expr = Expr::new(
                    ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    span,
                );
            } else if self.check(&TokenKind::Dot) {
                let span = self.current_span();
                self.advance();
                let field = self.expect_ident()?;
                expr = Expr::new(
                    ExprKind::Field {
                        base: Box::new(expr),
                        field,
                    },
                    span,
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn primary_expr(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.current_span();

        match self.peek_kind().cloned() {
            Some(TokenKind::Int(value)) => {
                self.advance();
                Ok(Expr::new(ExprKind::IntLit(value), span))
            }
            Some(TokenKind::Uint(value)) => {
                self.advance();
                Ok(Expr::new(ExprKind::UintLit(value), span))
            }
            Some(TokenKind::Float(value)) => {
                self.advance();
                Ok(Expr::new(ExprKind::FloatLit(value), span))
            }
            Some(TokenKind::Double(value)) => {
                self.advance();
                Ok(Expr::new(ExprKind::DoubleLit(value), span))
            }
            Some(TokenKind::True) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(true), span))
            }
            Some(TokenKind::False) => {
                self.advance();
                Ok(Expr::new(ExprKind::BoolLit(false), span))
            }
            Some(TokenKind::Null) => {
                self.advance();
                Ok(Expr::new(ExprKind::Null, span))
            }
            Some(TokenKind::Ident(name)) => {
                self.advance();
                self.ident_or_call(name, span)
            }
            Some(TokenKind::LParen) => {
                self.advance();
                let expr = self.expression()?;
                self.expect(&TokenKind::RParen)?;
                Ok(expr)
            }
            _ => Err(self.error("expected expression")),
        }
    }

    /// An identifier that may head a call: `x`, `f(..)`, or `f<..>(..)`.
    /// `f<` only becomes a generic call if a type-argument list followed by
    /// `(` actually parses; otherwise it is `f` compared with something.
    fn ident_or_call(&mut self, name: String, span: Span) -> Result<Expr, SyntaxError> {
        if self.check(&TokenKind::LParen) {
            let args = self.call_args()?;
            return Ok(Expr::new(
                ExprKind::Call {
                    name,
                    type_args: Vec::new(),
                    args,
                },
                span,
            ));
        }

        if self.check(&TokenKind::Lt) {
            let checkpoint = self.current;
            if let Ok(type_args) = self.type_args()
                && self.check(&TokenKind::LParen)
            {
                let args = self.call_args()?;
                return Ok(Expr::new(
                    ExprKind::Call {
                        name,
                        type_args,
                        args,
                    },
                    span,
                ));
            }
            self.current = checkpoint;
        }

        Ok(Expr::new(ExprKind::Ident(name), span))
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.expect(&TokenKind::LParen)?;
        let mut args = Vec::new();
        if !self.check(&TokenKind::RParen) {
            loop {
                args.push(self.expression()?);
                if !self.match_token(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(args)
    }

    // Helper methods

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.current)
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.peek().map(|t| &t.kind)
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Eof) | None)
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek_kind() == Some(kind)
    }

    fn check_ident(&self) -> bool {
        matches!(self.peek_kind(), Some(TokenKind::Ident(_)))
    }

    fn check_ahead(&self, kind: &TokenKind, offset: usize) -> bool {
        self.tokens.get(self.current + offset).map(|t| &t.kind) == Some(kind)
    }

    fn advance(&mut self) -> Option<&Token> {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.tokens.get(self.current - 1)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SyntaxError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!("expected {:?}", kind)))
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        if let Some(TokenKind::Ident(name)) = self.peek_kind() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error("expected identifier"))
        }
    }

    fn current_span(&self) -> Span {
        self.peek().map(|t| t.span).unwrap_or(Span::new(1, 1))
    }

    fn error(&self, message: &str) -> SyntaxError {
        SyntaxError::new(message, self.current_span())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;

    fn parse(source: &str) -> Result<Program, SyntaxError> {
        let tokens = Lexer::new(source).scan_tokens()?;
        Parser::new(tokens).parse()
    }

    fn only_func(program: &Program) -> &FuncDecl {
        match &program.decls[0] {
            Decl::Func(f) => f,
            other => panic!("expected function, got {:?}", other),
        }
    }

    #[test]
    fn test_simple_function() {
        let program = parse("int32 foo(int32 x) { return x + 1; }").unwrap();
        let func = only_func(&program);
        assert_eq!(func.name, "foo");
        assert_eq!(func.params.len(), 1);
        assert_eq!(func.params[0].name, "x");
        assert!(func.type_params.is_empty());
        assert_eq!(func.body.stmts.len(), 1);
    }

    #[test]
    fn test_generic_function() {
        let program = parse("T id<T>(T x) { return x; }").unwrap();
        let func = only_func(&program);
        assert_eq!(func.type_params.len(), 1);
        assert_eq!(func.type_params[0].name, "T");
        assert!(func.type_params[0].protocol.is_none());
    }

    #[test]
    fn test_constrained_type_param() {
        let program = parse("T bar<T: primitive>(T x) { return x; }").unwrap();
        let func = only_func(&program);
        assert_eq!(
            func.type_params[0].protocol.as_deref(),
            Some("primitive")
        );
    }

    #[test]
    fn test_pointer_param_and_deref() {
        let program = parse("void store(device int32^ p) { ^p = 52; }").unwrap();
        let func = only_func(&program);
        match &func.params[0].ty.kind {
            TypeAnnKind::Ptr { space, elem } => {
                assert_eq!(*space, AddressSpace::Device);
                assert!(matches!(&elem.kind, TypeAnnKind::Named(n) if n == "int32"));
            }
            other => panic!("expected pointer annotation, got {:?}", other),
        }
        match &func.body.stmts[0] {
            Stmt::Assign { target, .. } => {
                assert!(matches!(&target.kind, ExprKind::Deref(_)));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_pointer_without_space_rejected() {
        assert!(parse("void f(int32^ p) { }").is_err());
    }

    #[test]
    fn test_array_ref_indexing() {
        let program = parse("int32 first(device int32[] a) { return a[0u]; }").unwrap();
        let func = only_func(&program);
        assert!(matches!(
            &func.params[0].ty.kind,
            TypeAnnKind::ArrayRef { .. }
        ));
    }

    #[test]
    fn test_struct_decl() {
        let program = parse("struct Foo { int32 x; int32 y; }").unwrap();
        match &program.decls[0] {
            Decl::Struct(s) => {
                assert_eq!(s.name, "Foo");
                assert_eq!(s.fields.len(), 2);
                assert_eq!(s.fields[1].name, "y");
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_struct_decl() {
        let program = parse("struct Box<T> { T value; }").unwrap();
        match &program.decls[0] {
            Decl::Struct(s) => {
                assert_eq!(s.type_params.len(), 1);
                assert_eq!(s.type_params[0].name, "T");
            }
            other => panic!("expected struct, got {:?}", other),
        }
    }

    #[test]
    fn test_protocol_decl() {
        let program =
            parse("protocol Addable { Addable operator+(Addable, Addable); }").unwrap();
        match &program.decls[0] {
            Decl::Protocol(p) => {
                assert_eq!(p.name, "Addable");
                assert_eq!(p.sigs.len(), 1);
                assert_eq!(p.sigs[0].name, "operator+");
                assert_eq!(p.sigs[0].params.len(), 2);
            }
            other => panic!("expected protocol, got {:?}", other),
        }
    }

    #[test]
    fn test_operator_overload_decl() {
        let program =
            parse("bool operator==(Foo a, Foo b) { return a.x == b.x; }").unwrap();
        assert_eq!(only_func(&program).name, "operator==");
    }

    #[test]
    fn test_explicit_type_arguments() {
        let program = parse("int32 f(int32 x) { return id<int32>(x); }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::Return { value: Some(e), .. } => match &e.kind {
                ExprKind::Call {
                    name, type_args, ..
                } => {
                    assert_eq!(name, "id");
                    assert_eq!(type_args.len(), 1);
                }
                other => panic!("expected call, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_less_than_is_not_a_generic_call() {
        let program = parse("bool f(int32 a, int32 b) { return a < b; }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::Return { value: Some(e), .. } => {
                assert!(matches!(
                    &e.kind,
                    ExprKind::Binary { op: BinOp::Lt, .. }
                ));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_var_decl_vs_expression_statement() {
        let program = parse(
            "int32 f(int32 a) { int32 x = 3; x = a; f(x); return x; }",
        )
        .unwrap();
        let func = only_func(&program);
        assert!(matches!(&func.body.stmts[0], Stmt::VarDecl { .. }));
        assert!(matches!(&func.body.stmts[1], Stmt::Assign { .. }));
        assert!(matches!(&func.body.stmts[2], Stmt::Expr(_)));
    }

    #[test]
    fn test_generic_var_decl() {
        let program = parse("void f() { Box<int32> b; b.value = 3; }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::VarDecl { ty, name, .. } => {
                assert_eq!(name, "b");
                assert!(matches!(&ty.kind, TypeAnnKind::Generic { .. }));
            }
            other => panic!("expected declaration, got {:?}", other),
        }
    }

    #[test]
    fn test_if_else_chain() {
        let program = parse(
            "int32 f(int32 x) { if (x < 0) { return 0; } else if (x < 10) { return 1; } else { return 2; } }",
        )
        .unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::If { else_block: Some(b), .. } => {
                assert!(matches!(&b.stmts[0], Stmt::If { .. }));
            }
            other => panic!("expected if with else, got {:?}", other),
        }
    }

    #[test]
    fn test_while_break_continue() {
        let program = parse(
            "void f() { while (true) { if (false) { break; } continue; } }",
        )
        .unwrap();
        let func = only_func(&program);
        assert!(matches!(&func.body.stmts[0], Stmt::While { .. }));
    }

    #[test]
    fn test_short_circuit_operators() {
        let program = parse("bool f(bool a, bool b) { return a && b || !a; }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::Return { value: Some(e), .. } => {
                assert!(matches!(
                    &e.kind,
                    ExprKind::Binary { op: BinOp::Or, .. }
                ));
            }
            other => panic!("expected return, got {:?}", other),
        }
    }

    #[test]
    fn test_null_literal() {
        let program = parse("void f(device int32^ p) { p = null; }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::Assign { value, .. } => {
                assert!(matches!(&value.kind, ExprKind::Null));
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_semicolon_is_error() {
        assert!(parse("int32 f() { return 1 }").is_err());
    }

    #[test]
    fn test_field_access_chain() {
        let program = parse("int32 f(Foo s) { return s.inner.x; }").unwrap();
        let func = only_func(&program);
        match &func.body.stmts[0] {
            Stmt::Return { value: Some(e), .. } => match &e.kind {
                ExprKind::Field { base, field } => {
                    assert_eq!(field, "x");
                    assert!(matches!(&base.kind, ExprKind::Field { .. }));
                }
                other => panic!("expected field access, got {:?}", other),
            },
            other => panic!("expected return, got {:?}", other),
        }
    }
}
