//! The tree-walking interpreter.
//!
//! `call_function` is the entry point and the trap boundary: it resolves
//! the named entry against the argument types, monomorphises it, binds
//! each parameter to a fresh block, and walks the inlined body. A trap
//! (null dereference, out-of-bounds index, integer division by zero)
//! unwinds straight back here; it is never retried and never converted
//! into a type error.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::compiler::errors::TypeError;
use crate::compiler::lexer::Span;
use crate::compiler::monomorphise::Monomorphiser;
use crate::compiler::resolver::resolve_call;
use crate::compiler::typed_ast::{
    CallTarget, FunctionBlock, NativeOp, Program, ScalarKind, TBlock, TExpr, TExprKind, TStmt,
};
use crate::compiler::types::Type;
use crate::interp::memory::{ArrayRef, MemoryBlock, Pointer, Slot};
use crate::interp::value::TypedValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapKind {
    NullDereference,
    OutOfBounds,
    DivideByZero,
}

/// A run-time trap with the location of the offending operation.
#[derive(Debug, Clone)]
pub struct TrapError {
    pub kind: TrapKind,
    pub span: Span,
}

impl TrapError {
    fn new(kind: TrapKind, span: Span) -> Self {
        Self { kind, span }
    }
}

impl fmt::Display for TrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.kind {
            TrapKind::NullDereference => "null dereference",
            TrapKind::OutOfBounds => "index out of bounds",
            TrapKind::DivideByZero => "division by zero",
        };
        write!(f, "trap: {} (at {}:{})", what, self.span.line, self.span.column)
    }
}

/// Failure at the `call_function` boundary: either resolution failed — the
/// entry call itself, or a protocol call re-resolved during inlining — or
/// evaluation trapped (dynamic).
#[derive(Debug, Clone)]
pub enum CallError {
    Type(TypeError),
    Trap(TrapError),
}

impl fmt::Display for CallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Type(e) => e.fmt(f),
            CallError::Trap(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CallError {}

impl From<TypeError> for CallError {
    fn from(e: TypeError) -> Self {
        CallError::Type(e)
    }
}

impl From<TrapError> for CallError {
    fn from(e: TrapError) -> Self {
        CallError::Trap(e)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    /// Report each inliner instantiation on stderr.
    pub trace_inline: bool,
}

/// Resolve, monomorphise, and run `name` with the given explicit type
/// arguments and argument values.
pub fn call_function(
    program: &Program,
    name: &str,
    type_args: &[Type],
    args: Vec<TypedValue>,
) -> Result<TypedValue, CallError> {
    call_function_with(program, name, type_args, args, CallOptions::default())
}

pub fn call_function_with(
    program: &Program,
    name: &str,
    type_args: &[Type],
    args: Vec<TypedValue>,
    options: CallOptions,
) -> Result<TypedValue, CallError> {
    let span = Span::new(0, 0);
    let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
    let resolved = resolve_call(program, &[], name, type_args, &arg_types, span)?;
    let CallTarget::Direct(func) = resolved.target else {
        unreachable!("entry resolution without a scope cannot target a protocol");
    };

    let mut evaluator = Evaluator { program };

    if program.func(func).is_native() {
        let op = program.func(func).native.unwrap_or_else(|| {
            unreachable!("native function without an op")
        });
        let args = bind_entry_args(program, args, &resolved.param_types);
        let values = args
            .into_iter()
            .map(|(_, v)| v)
            .collect::<Vec<_>>();
        return Ok(evaluator.apply_native(op, &values, span)?);
    }

    let mut mono = Monomorphiser::new(program, options.trace_inline);
    let instance = mono.instantiate(func, &resolved.type_args)?;

    let mut scope = Scope::new();
    for (param, (param_ty, value)) in instance
        .params
        .iter()
        .zip(bind_entry_args(program, args, &resolved.param_types))
    {
        let block = MemoryBlock::for_type(&param_ty, &program.structs);
        block.write(0, &value.slots);
        scope.insert(
            param.name.clone(),
            Local {
                block,
                ty: param_ty,
            },
        );
    }

    let mut env = Environment {
        scopes: vec![scope],
    };
    match evaluator.eval_block(&mut env, &instance.body)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal => {
            if instance.return_type == Type::Void {
                Ok(TypedValue::void())
            } else {
                unreachable!("missing return survived checking")
            }
        }
        Flow::Break | Flow::Continue => {
            unreachable!("loop flow escaped a function body")
        }
    }
}

/// Give each entry argument its resolved parameter type; a bare `null`
/// argument becomes a null value of the parameter's pointer type.
fn bind_entry_args(
    program: &Program,
    args: Vec<TypedValue>,
    param_types: &[Type],
) -> Vec<(Type, TypedValue)> {
    args.into_iter()
        .zip(param_types)
        .map(|(mut value, param_ty)| {
            if value.ty == Type::Null {
                let block = MemoryBlock::for_type(param_ty, &program.structs);
                value = TypedValue {
                    ty: param_ty.clone(),
                    slots: block.snapshot(),
                };
            }
            (param_ty.clone(), value)
        })
        .collect()
}

/// One live variable: a whole block holding a value of `ty` at offset 0.
struct Local {
    block: Rc<MemoryBlock>,
    ty: Type,
}

type Scope = HashMap<String, Local>;

/// The lexical environment of the function body currently executing.
/// Inlined calls swap in a fresh environment so callee bodies cannot see
/// caller locals.
struct Environment {
    scopes: Vec<Scope>,
}

impl Environment {
    fn lookup(&self, name: &str) -> &Local {
        self.scopes
            .iter()
            .rev()
            .find_map(|s| s.get(name))
            .unwrap_or_else(|| unreachable!("unbound local `{}` survived checking", name))
    }
}

/// Control flow out of a statement.
enum Flow {
    Normal,
    Return(TypedValue),
    Break,
    Continue,
}

/// A storage location: the result of evaluating an lvalue.
struct Place {
    block: Rc<MemoryBlock>,
    offset: usize,
}

struct Evaluator<'a> {
    program: &'a Program,
}

impl Evaluator<'_> {
    fn size_of(&self, ty: &Type) -> usize {
        ty.size(&self.program.structs)
    }

    fn eval_block(&mut self, env: &mut Environment, block: &TBlock) -> Result<Flow, TrapError> {
        env.scopes.push(Scope::new());
        for stmt in &block.stmts {
            match self.eval_stmt(env, stmt)? {
                Flow::Normal => {}
                flow => {
                    env.scopes.pop();
                    return Ok(flow);
                }
            }
        }
        env.scopes.pop();
        Ok(Flow::Normal)
    }

    fn eval_stmt(&mut self, env: &mut Environment, stmt: &TStmt) -> Result<Flow, TrapError> {
        match stmt {
            TStmt::VarDecl { name, ty, init, .. } => {
                let block = MemoryBlock::for_type(ty, &self.program.structs);
                if let Some(init) = init {
                    let value = self.eval_expr(env, init)?;
                    block.write(0, &value.slots);
                }
                let Some(scope) = env.scopes.last_mut() else {
                    unreachable!("no scope open");
                };
                scope.insert(
                    name.clone(),
                    Local {
                        block,
                        ty: ty.clone(),
                    },
                );
                Ok(Flow::Normal)
            }
            TStmt::Assign { target, value, .. } => {
                let value = self.eval_expr(env, value)?;
                let place = self.eval_place(env, target)?;
                place.block.write(place.offset, &value.slots);
                Ok(Flow::Normal)
            }
            TStmt::Return { value, .. } => {
                let value = match value {
                    Some(e) => self.eval_expr(env, e)?,
                    None => TypedValue::void(),
                };
                Ok(Flow::Return(value))
            }
            TStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                if self.eval_bool(env, cond)? {
                    self.eval_block(env, then_block)
                } else if let Some(else_block) = else_block {
                    self.eval_block(env, else_block)
                } else {
                    Ok(Flow::Normal)
                }
            }
            TStmt::While { cond, body, .. } => {
                while self.eval_bool(env, cond)? {
                    match self.eval_block(env, body)? {
                        Flow::Normal | Flow::Continue => {}
                        Flow::Break => break,
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            TStmt::Break(_) => Ok(Flow::Break),
            TStmt::Continue(_) => Ok(Flow::Continue),
            TStmt::Expr(e) => {
                self.eval_expr(env, e)?;
                Ok(Flow::Normal)
            }
            TStmt::Block(b) => self.eval_block(env, b),
        }
    }

    fn eval_bool(&mut self, env: &mut Environment, expr: &TExpr) -> Result<bool, TrapError> {
        let value = self.eval_expr(env, expr)?;
        match value.slots.as_slice() {
            [Slot::Bool(b)] => Ok(*b),
            _ => unreachable!("non-bool condition survived checking"),
        }
    }

    fn eval_expr(&mut self, env: &mut Environment, expr: &TExpr) -> Result<TypedValue, TrapError> {
        let span = expr.span;
        match &expr.kind {
            TExprKind::IntLit(v) => Ok(TypedValue::int32(*v)),
            TExprKind::UintLit(v) => Ok(TypedValue::uint32(*v)),
            TExprKind::FloatLit(v) => Ok(TypedValue::float(*v)),
            TExprKind::DoubleLit(v) => Ok(TypedValue::double(*v)),
            TExprKind::BoolLit(v) => Ok(TypedValue::bool(*v)),
            TExprKind::NullLit => {
                // Monomorphisation gave the literal its concrete pointer
                // or array-reference type.
                let slot = match &expr.ty {
                    Type::Ptr { .. } => Slot::Ptr(None),
                    Type::ArrayRef { .. } => Slot::ArrayRef(None),
                    other => unreachable!("null literal typed as `{}`", other),
                };
                Ok(TypedValue {
                    ty: expr.ty.clone(),
                    slots: vec![slot],
                })
            }
            TExprKind::Local(name) => {
                let local = env.lookup(name);
                Ok(TypedValue {
                    ty: local.ty.clone(),
                    slots: local.block.snapshot(),
                })
            }
            TExprKind::Call { target, args, .. } => {
                let values = args
                    .iter()
                    .map(|a| self.eval_expr(env, a))
                    .collect::<Result<Vec<_>, _>>()?;
                let CallTarget::Direct(id) = target else {
                    unreachable!("protocol call survived monomorphisation");
                };
                let Some(op) = self.program.func(*id).native else {
                    unreachable!("defined call survived inlining");
                };
                self.apply_native(op, &values, span)
            }
            TExprKind::InlinedCall(fb) => self.eval_inlined_call(env, fb),
            TExprKind::And { lhs, rhs } => {
                let result = self.eval_bool(env, lhs)? && self.eval_bool(env, rhs)?;
                Ok(TypedValue::bool(result))
            }
            TExprKind::Or { lhs, rhs } => {
                let result = self.eval_bool(env, lhs)? || self.eval_bool(env, rhs)?;
                Ok(TypedValue::bool(result))
            }
            TExprKind::Deref(inner) => {
                let pointer = self.eval_pointer(env, inner)?;
                let Some(pointer) = pointer else {
                    return Err(TrapError::new(TrapKind::NullDereference, span));
                };
                let size = self.size_of(&expr.ty);
                Ok(TypedValue {
                    ty: expr.ty.clone(),
                    slots: pointer.block.read(pointer.offset, size),
                })
            }
            TExprKind::AddrOf(inner) => {
                let place = self.eval_place(env, inner)?;
                Ok(TypedValue::ptr(
                    expr.ty.clone(),
                    Pointer {
                        block: place.block,
                        offset: place.offset,
                    },
                ))
            }
            TExprKind::Index { base, index } => {
                let elem_size = self.size_of(&expr.ty);
                let (aref, idx) = self.eval_index_parts(env, base, index)?;
                let offset = aref.ptr.offset + idx * elem_size;
                Ok(TypedValue {
                    ty: expr.ty.clone(),
                    slots: aref.ptr.block.read(offset, elem_size),
                })
            }
            TExprKind::Field { base, offset, .. } => {
                let base = self.eval_expr(env, base)?;
                let Some(offset) = offset else {
                    unreachable!("un-laid-out field reached evaluation");
                };
                let size = self.size_of(&expr.ty);
                Ok(TypedValue {
                    ty: expr.ty.clone(),
                    slots: base.slots[*offset..*offset + size].to_vec(),
                })
            }
        }
    }

    /// Evaluate a call that was inlined to a function-like block: evaluate
    /// the argument expressions in the caller's environment, then run the
    /// body in a fresh one with only the parameters bound.
    fn eval_inlined_call(
        &mut self,
        env: &mut Environment,
        fb: &FunctionBlock,
    ) -> Result<TypedValue, TrapError> {
        let mut scope = Scope::new();
        for (param, arg) in fb.params.iter().zip(&fb.args) {
            let value = self.eval_expr(env, arg)?;
            let block = MemoryBlock::for_type(&param.ty, &self.program.structs);
            block.write(0, &value.slots);
            scope.insert(
                param.name.clone(),
                Local {
                    block,
                    ty: param.ty.clone(),
                },
            );
        }

        let mut callee_env = Environment {
            scopes: vec![scope],
        };
        match self.eval_block(&mut callee_env, &fb.body)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => {
                if fb.return_type == Type::Void {
                    Ok(TypedValue::void())
                } else {
                    unreachable!("missing return survived checking")
                }
            }
            Flow::Break | Flow::Continue => {
                unreachable!("loop flow escaped a function body")
            }
        }
    }

    /// Evaluate an expression of pointer type down to its pointer slot.
    fn eval_pointer(
        &mut self,
        env: &mut Environment,
        expr: &TExpr,
    ) -> Result<Option<Pointer>, TrapError> {
        let value = self.eval_expr(env, expr)?;
        match value.slots.as_slice() {
            [Slot::Ptr(p)] => Ok(p.clone()),
            _ => unreachable!("non-pointer dereference survived checking"),
        }
    }

    /// Shared base/index evaluation for indexing in rvalue and lvalue
    /// position: traps on a null base and on an out-of-bounds (or
    /// negative) index.
    fn eval_index_parts(
        &mut self,
        env: &mut Environment,
        base: &TExpr,
        index: &TExpr,
    ) -> Result<(ArrayRef, usize), TrapError> {
        let base_value = self.eval_expr(env, base)?;
        let aref = match base_value.slots.as_slice() {
            [Slot::ArrayRef(Some(a))] => a.clone(),
            [Slot::ArrayRef(None)] => {
                return Err(TrapError::new(TrapKind::NullDereference, base.span));
            }
            _ => unreachable!("non-array-reference index survived checking"),
        };

        let index_value = self.eval_expr(env, index)?;
        let idx = match index_value.slots.as_slice() {
            [Slot::Uint(v)] => *v as usize,
            // A negative int32 index traps exactly like an over-large one.
            [Slot::Int(v)] if *v >= 0 => *v as usize,
            [Slot::Int(_)] => {
                return Err(TrapError::new(TrapKind::OutOfBounds, index.span));
            }
            _ => unreachable!("non-integer index survived checking"),
        };
        if idx >= aref.length {
            return Err(TrapError::new(TrapKind::OutOfBounds, index.span));
        }
        Ok((aref, idx))
    }

    /// Evaluate an expression in lvalue position down to a storage
    /// location.
    fn eval_place(&mut self, env: &mut Environment, expr: &TExpr) -> Result<Place, TrapError> {
        match &expr.kind {
            TExprKind::Local(name) => {
                let local = env.lookup(name);
                Ok(Place {
                    block: Rc::clone(&local.block),
                    offset: 0,
                })
            }
            TExprKind::Deref(inner) => {
                let pointer = self.eval_pointer(env, inner)?;
                let Some(pointer) = pointer else {
                    return Err(TrapError::new(TrapKind::NullDereference, expr.span));
                };
                Ok(Place {
                    block: pointer.block,
                    offset: pointer.offset,
                })
            }
            TExprKind::Index { base, index } => {
                let elem_size = self.size_of(&expr.ty);
                let (aref, idx) = self.eval_index_parts(env, base, index)?;
                Ok(Place {
                    block: aref.ptr.block,
                    offset: aref.ptr.offset + idx * elem_size,
                })
            }
            TExprKind::Field { base, offset, .. } => {
                let place = self.eval_place(env, base)?;
                let Some(offset) = offset else {
                    unreachable!("un-laid-out field reached evaluation");
                };
                Ok(Place {
                    block: place.block,
                    offset: place.offset + offset,
                })
            }
            _ => unreachable!("non-lvalue assignment survived checking"),
        }
    }

    // Native operations

    fn apply_native(
        &mut self,
        op: NativeOp,
        args: &[TypedValue],
        span: Span,
    ) -> Result<TypedValue, TrapError> {
        use NativeOp::*;
        match op {
            Add(k) => self.arith(k, args, span, |a, b| a.wrapping_add(b), |a, b| a.wrapping_add(b), |a, b| a + b, |a, b| a + b),
            Sub(k) => self.arith(k, args, span, |a, b| a.wrapping_sub(b), |a, b| a.wrapping_sub(b), |a, b| a - b, |a, b| a - b),
            Mul(k) => self.arith(k, args, span, |a, b| a.wrapping_mul(b), |a, b| a.wrapping_mul(b), |a, b| a * b, |a, b| a * b),
            Div(k) => {
                self.check_nonzero_divisor(k, args, span)?;
                self.arith(k, args, span, |a, b| a.wrapping_div(b), |a, b| a.wrapping_div(b), |a, b| a / b, |a, b| a / b)
            }
            Rem(k) => {
                self.check_nonzero_divisor(k, args, span)?;
                self.arith(k, args, span, |a, b| a.wrapping_rem(b), |a, b| a.wrapping_rem(b), |a, b| a % b, |a, b| a % b)
            }
            Neg(k) => match (k, args[0].slots.as_slice()) {
                (ScalarKind::Int32, [Slot::Int(v)]) => Ok(TypedValue::int32(v.wrapping_neg())),
                (ScalarKind::Float, [Slot::Float(v)]) => Ok(TypedValue::float(-v)),
                (ScalarKind::Double, [Slot::Double(v)]) => Ok(TypedValue::double(-v)),
                _ => unreachable!("negation operand mismatch"),
            },
            Not => match args[0].slots.as_slice() {
                [Slot::Bool(v)] => Ok(TypedValue::bool(!v)),
                _ => unreachable!("logical-not operand mismatch"),
            },
            Eq(k) => self.compare(k, args, CmpOp::Eq),
            Ne(k) => self.compare(k, args, CmpOp::Ne),
            Lt(k) => self.compare(k, args, CmpOp::Lt),
            Le(k) => self.compare(k, args, CmpOp::Le),
            Gt(k) => self.compare(k, args, CmpOp::Gt),
            Ge(k) => self.compare(k, args, CmpOp::Ge),
            PtrEq => Ok(TypedValue::bool(args[0].slots == args[1].slots)),
            PtrNe => Ok(TypedValue::bool(args[0].slots != args[1].slots)),
        }
    }

    fn check_nonzero_divisor(
        &self,
        kind: ScalarKind,
        args: &[TypedValue],
        span: Span,
    ) -> Result<(), TrapError> {
        let zero = match (kind, args[1].slots.as_slice()) {
            (ScalarKind::Int32, [Slot::Int(v)]) => *v == 0,
            (ScalarKind::Uint32, [Slot::Uint(v)]) => *v == 0,
            _ => false,
        };
        if zero {
            Err(TrapError::new(TrapKind::DivideByZero, span))
        } else {
            Ok(())
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn arith(
        &self,
        kind: ScalarKind,
        args: &[TypedValue],
        _span: Span,
        int_op: impl Fn(i32, i32) -> i32,
        uint_op: impl Fn(u32, u32) -> u32,
        float_op: impl Fn(f32, f32) -> f32,
        double_op: impl Fn(f64, f64) -> f64,
    ) -> Result<TypedValue, TrapError> {
        match (kind, args[0].slots.as_slice(), args[1].slots.as_slice()) {
            (ScalarKind::Int32, [Slot::Int(a)], [Slot::Int(b)]) => {
                Ok(TypedValue::int32(int_op(*a, *b)))
            }
            (ScalarKind::Uint32, [Slot::Uint(a)], [Slot::Uint(b)]) => {
                Ok(TypedValue::uint32(uint_op(*a, *b)))
            }
            (ScalarKind::Float, [Slot::Float(a)], [Slot::Float(b)]) => {
                Ok(TypedValue::float(float_op(*a, *b)))
            }
            (ScalarKind::Double, [Slot::Double(a)], [Slot::Double(b)]) => {
                Ok(TypedValue::double(double_op(*a, *b)))
            }
            _ => unreachable!("arithmetic operand mismatch"),
        }
    }

    fn compare(
        &self,
        kind: ScalarKind,
        args: &[TypedValue],
        op: CmpOp,
    ) -> Result<TypedValue, TrapError> {
        let result = match (kind, args[0].slots.as_slice(), args[1].slots.as_slice()) {
            (ScalarKind::Int32, [Slot::Int(a)], [Slot::Int(b)]) => op.apply(a, b),
            (ScalarKind::Uint32, [Slot::Uint(a)], [Slot::Uint(b)]) => op.apply(a, b),
            // PartialOrd gives IEEE semantics: NaN is unordered and
            // compares unequal.
            (ScalarKind::Float, [Slot::Float(a)], [Slot::Float(b)]) => op.apply(a, b),
            (ScalarKind::Double, [Slot::Double(a)], [Slot::Double(b)]) => op.apply(a, b),
            (ScalarKind::Bool, [Slot::Bool(a)], [Slot::Bool(b)]) => match op {
                CmpOp::Eq => a == b,
                CmpOp::Ne => a != b,
                _ => unreachable!("ordering comparison on bool"),
            },
            _ => unreachable!("comparison operand mismatch"),
        };
        Ok(TypedValue::bool(result))
    }
}

#[derive(Clone, Copy)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn apply<T: PartialOrd>(self, a: &T, b: &T) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}
