//! Checked program representation.
//!
//! The type checker lowers the untyped AST into these nodes: every
//! expression carries its resolved [`Type`], every call carries its
//! resolved target and type arguments, and surface operators are gone
//! (desugared into calls, except the short-circuit forms). This is the
//! representation the monomorphiser rewrites and the interpreter walks.

use std::collections::HashMap;

use crate::compiler::lexer::Span;
use crate::compiler::types::{StructRegistry, Type, TypeVarArena, TypeVarId};

/// Index into [`Program::funcs`].
pub type FuncId = usize;

/// The scalar a native arithmetic or comparison instance operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int32,
    Uint32,
    Float,
    Double,
    Bool,
}

impl ScalarKind {
    pub fn ty(self) -> Type {
        match self {
            ScalarKind::Int32 => Type::Int32,
            ScalarKind::Uint32 => Type::Uint32,
            ScalarKind::Float => Type::Float,
            ScalarKind::Double => Type::Double,
            ScalarKind::Bool => Type::Bool,
        }
    }
}

/// Intrinsic operations. These have no body; the interpreter dispatches on
/// the variant directly. Integer arithmetic wraps at the bit width; integer
/// `Div`/`Rem` by zero is a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOp {
    Add(ScalarKind),
    Sub(ScalarKind),
    Mul(ScalarKind),
    Div(ScalarKind),
    Rem(ScalarKind),
    Neg(ScalarKind),
    Not,
    Eq(ScalarKind),
    Ne(ScalarKind),
    Lt(ScalarKind),
    Le(ScalarKind),
    Gt(ScalarKind),
    Ge(ScalarKind),
    /// Pointer or array-reference identity, generic over the pointee.
    PtrEq,
    PtrNe,
}

/// A checked function: either defined (has a body) or native (has an op).
#[derive(Debug, Clone)]
pub struct TFunc {
    pub id: FuncId,
    pub name: String,
    pub span: Span,
    pub type_params: Vec<TypeVarId>,
    pub params: Vec<TParam>,
    pub return_type: Type,
    pub body: Option<TBlock>,
    pub native: Option<NativeOp>,
}

impl TFunc {
    pub fn is_native(&self) -> bool {
        self.native.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct TParam {
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct TBlock {
    pub stmts: Vec<TStmt>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TStmt {
    VarDecl {
        name: String,
        ty: Type,
        init: Option<TExpr>,
        span: Span,
    },
    Assign {
        target: TExpr,
        value: TExpr,
        span: Span,
    },
    Return {
        value: Option<TExpr>,
        span: Span,
    },
    If {
        cond: TExpr,
        then_block: TBlock,
        else_block: Option<TBlock>,
        span: Span,
    },
    While {
        cond: TExpr,
        body: TBlock,
        span: Span,
    },
    Break(Span),
    Continue(Span),
    Expr(TExpr),
    Block(TBlock),
}

impl TStmt {
    pub fn span(&self) -> Span {
        match self {
            TStmt::VarDecl { span, .. }
            | TStmt::Assign { span, .. }
            | TStmt::Return { span, .. }
            | TStmt::If { span, .. }
            | TStmt::While { span, .. } => *span,
            TStmt::Break(span) | TStmt::Continue(span) => *span,
            TStmt::Expr(e) => e.span,
            TStmt::Block(b) => b.span,
        }
    }
}

/// What a resolved call points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Direct(FuncId),
    /// A call through a constrained type variable: resolved against the
    /// protocol's required signatures for now, re-resolved to a concrete
    /// overload once monomorphisation substitutes the variable away.
    Protocol { name: String },
}

#[derive(Debug, Clone)]
pub struct TExpr {
    pub kind: TExprKind,
    pub ty: Type,
    pub span: Span,
}

impl TExpr {
    pub fn new(kind: TExprKind, ty: Type, span: Span) -> Self {
        Self { kind, ty, span }
    }
}

#[derive(Debug, Clone)]
pub enum TExprKind {
    IntLit(i32),
    UintLit(u32),
    FloatLit(f32),
    DoubleLit(f64),
    BoolLit(bool),
    /// `null`. The expression's `ty` is the pointer or array-reference type
    /// the context determined (or still a variable until substitution).
    NullLit,
    Local(String),
    Call {
        target: CallTarget,
        type_args: Vec<Type>,
        args: Vec<TExpr>,
    },
    /// Short-circuit `&&`; never an overload.
    And { lhs: Box<TExpr>, rhs: Box<TExpr> },
    /// Short-circuit `||`; never an overload.
    Or { lhs: Box<TExpr>, rhs: Box<TExpr> },
    Deref(Box<TExpr>),
    AddrOf(Box<TExpr>),
    Index {
        base: Box<TExpr>,
        index: Box<TExpr>,
    },
    Field {
        base: Box<TExpr>,
        field: String,
        /// Slot offset within the struct, bound by monomorphisation once
        /// the base type is concrete.
        offset: Option<usize>,
    },
    /// A defined call after inlining: evaluate `args`, bind them to
    /// `params` in a fresh scope, run `body`.
    InlinedCall(Box<FunctionBlock>),
}

/// The inlined form of a call to a defined function.
#[derive(Debug, Clone)]
pub struct FunctionBlock {
    pub func: FuncId,
    pub params: Vec<TParam>,
    pub args: Vec<TExpr>,
    pub body: TBlock,
    pub return_type: Type,
}

/// A protocol's required signatures. `self_var` is the rigid variable that
/// stands for "the constrained type" inside the signature types.
#[derive(Debug, Clone)]
pub struct ProtocolInfo {
    pub name: String,
    pub span: Span,
    pub self_var: TypeVarId,
    pub sigs: Vec<ProtocolSig>,
}

#[derive(Debug, Clone)]
pub struct ProtocolSig {
    pub name: String,
    pub span: Span,
    pub params: Vec<Type>,
    pub return_type: Type,
}

/// A fully checked program, ready for `interp::call_function`.
#[derive(Debug)]
pub struct Program {
    pub funcs: Vec<TFunc>,
    /// Overload sets, keyed by name. Identity is the full signature.
    pub overloads: HashMap<String, Vec<FuncId>>,
    pub structs: StructRegistry,
    pub protocols: HashMap<String, ProtocolInfo>,
    pub type_vars: TypeVarArena,
}

impl Program {
    pub fn func(&self, id: FuncId) -> &TFunc {
        &self.funcs[id]
    }

    pub fn overloads_of(&self, name: &str) -> &[FuncId] {
        self.overloads.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
