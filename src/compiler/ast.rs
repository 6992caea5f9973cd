//! Untyped syntax tree produced by the parser.
//!
//! Every node carries the [`Span`] of its first token. Binary and unary
//! operators are surface syntax only; the type checker desugars them into
//! `operator+`-style calls, except `&&`/`||` which stay built in for
//! short-circuit evaluation.

use crate::compiler::lexer::Span;
use crate::compiler::types::AddressSpace;

#[derive(Debug, Clone)]
pub struct Program {
    pub decls: Vec<Decl>,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Func(FuncDecl),
    Struct(StructDecl),
    Protocol(ProtocolDecl),
}

/// A declared type parameter, e.g. the `T: Addable` in `T sum<T: Addable>(..)`.
#[derive(Debug, Clone)]
pub struct TypeParam {
    pub name: String,
    pub protocol: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub span: Span,
    pub type_params: Vec<TypeParam>,
    pub params: Vec<Param>,
    pub return_type: TypeAnn,
    pub body: Block,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub ty: TypeAnn,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub span: Span,
    pub type_params: Vec<TypeParam>,
    pub fields: Vec<FieldDecl>,
}

#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: String,
    pub ty: TypeAnn,
    pub span: Span,
}

/// A protocol declaration. Inside the signatures, the protocol's own name
/// is a type annotation standing for "the type being constrained".
#[derive(Debug, Clone)]
pub struct ProtocolDecl {
    pub name: String,
    pub span: Span,
    pub sigs: Vec<FuncSig>,
}

/// A bodiless function signature, as required by a protocol. Parameter
/// names are optional in signatures and never used, so only types are kept.
#[derive(Debug, Clone)]
pub struct FuncSig {
    pub name: String,
    pub span: Span,
    pub params: Vec<TypeAnn>,
    pub return_type: TypeAnn,
}

/// A type as written in source, before name resolution.
#[derive(Debug, Clone)]
pub struct TypeAnn {
    pub kind: TypeAnnKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeAnnKind {
    /// `int32`, `bool`, a struct name, or a type parameter in scope.
    Named(String),
    /// `Box<int32>`.
    Generic { name: String, args: Vec<TypeAnn> },
    /// `device int32^`. The written address space covers every pointer or
    /// array-reference layer of the annotation.
    Ptr {
        space: AddressSpace,
        elem: Box<TypeAnn>,
    },
    /// `device int32[]`.
    ArrayRef {
        space: AddressSpace,
        elem: Box<TypeAnn>,
    },
}

#[derive(Debug, Clone)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    VarDecl {
        ty: TypeAnn,
        name: String,
        init: Option<Expr>,
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    Return {
        value: Option<Expr>,
        span: Span,
    },
    If {
        cond: Expr,
        then_block: Block,
        else_block: Option<Block>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Expr(Expr),
    Block(Block),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Return { span, .. }
            | Stmt::If { span, .. }
            | Stmt::While { span, .. } => *span,
            Stmt::Break(span) | Stmt::Continue(span) => *span,
            Stmt::Expr(e) => e.span,
            Stmt::Block(b) => b.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLit(i64),
    UintLit(u64),
    FloatLit(f64),
    DoubleLit(f64),
    BoolLit(bool),
    Null,
    Ident(String),
    Call {
        name: String,
        type_args: Vec<TypeAnn>,
        args: Vec<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary { op: UnOp, operand: Box<Expr> },
    /// `^p`.
    Deref(Box<Expr>),
    /// `&lvalue`.
    AddrOf(Box<Expr>),
    /// `a[i]`.
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `s.f`.
    Field { base: Box<Expr>, field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `&&`: built in, never an overload.
    And,
    /// `||`: built in, never an overload.
    Or,
}

impl BinOp {
    /// The overload name the checker resolves this operator against, or
    /// `None` for the short-circuit operators.
    pub fn operator_name(self) -> Option<&'static str> {
        match self {
            BinOp::Add => Some("operator+"),
            BinOp::Sub => Some("operator-"),
            BinOp::Mul => Some("operator*"),
            BinOp::Div => Some("operator/"),
            BinOp::Rem => Some("operator%"),
            BinOp::Eq => Some("operator=="),
            BinOp::Ne => Some("operator!="),
            BinOp::Lt => Some("operator<"),
            BinOp::Le => Some("operator<="),
            BinOp::Gt => Some("operator>"),
            BinOp::Ge => Some("operator>="),
            BinOp::And | BinOp::Or => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

impl UnOp {
    pub fn operator_name(self) -> &'static str {
        match self {
            UnOp::Neg => "operator-",
            UnOp::Not => "operator!",
        }
    }
}
