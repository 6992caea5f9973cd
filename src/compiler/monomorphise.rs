//! Monomorphisation by recursive inlining.
//!
//! An instantiation is a function plus a concrete type-argument tuple. Each
//! instantiation is computed once and memoized: the function's body with
//! its type parameters substituted away, every call to a defined function
//! replaced by an inlined [`FunctionBlock`], every call to a native left as
//! a direct call, and every field access re-bound to its laid-out offset.
//!
//! By the time this pass runs, the checker has already rejected recursion,
//! so a re-entered instantiation here is a pass-ordering bug and aborts. A
//! call that resolved against a protocol signature is re-resolved at the
//! concrete receiver type; that resolution can fail even though checking
//! passed, because an overload that could not match the rigid type variable
//! may match the concrete type and make the call ambiguous. Those failures
//! are type errors, surfaced at the call boundary.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::compiler::errors::TypeError;
use crate::compiler::resolver::resolve_call;
use crate::compiler::typed_ast::{
    CallTarget, FuncId, FunctionBlock, Program, TBlock, TExpr, TExprKind, TParam, TStmt,
};
use crate::compiler::types::{display_type, substitute, Type, TypeVarId};

/// A fully substituted, fully inlined function instance.
#[derive(Debug)]
pub struct InstantiatedFunc {
    pub name: String,
    pub params: Vec<TParam>,
    pub return_type: Type,
    pub body: TBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Instantiation {
    func: FuncId,
    type_args: Vec<Type>,
}

pub struct Monomorphiser<'a> {
    program: &'a Program,
    cache: HashMap<Instantiation, Rc<InstantiatedFunc>>,
    visiting: HashSet<Instantiation>,
    trace: bool,
}

impl<'a> Monomorphiser<'a> {
    pub fn new(program: &'a Program, trace: bool) -> Self {
        Self {
            program,
            cache: HashMap::new(),
            visiting: HashSet::new(),
            trace,
        }
    }

    /// The instance of `func` at `type_args`. `func` must be a defined
    /// function and `type_args` must be concrete and match its arity. Fails
    /// when a protocol-resolved call in the body turns out not to have a
    /// unique concrete overload at these type arguments.
    pub fn instantiate(
        &mut self,
        func: FuncId,
        type_args: &[Type],
    ) -> Result<Rc<InstantiatedFunc>, TypeError> {
        let key = Instantiation {
            func,
            type_args: type_args.to_vec(),
        };
        if let Some(cached) = self.cache.get(&key) {
            if self.trace {
                eprintln!("[inline] {} (cached)", self.mangled(func, type_args));
            }
            return Ok(Rc::clone(cached));
        }

        let f = self.program.func(func);
        assert!(
            f.type_params.len() == type_args.len(),
            "instantiating `{}` with {} type arguments, expected {}",
            f.name,
            type_args.len(),
            f.type_params.len()
        );
        if self.visiting.contains(&key) {
            panic!(
                "re-entered instantiation of `{}` while inlining it; \
                 a recursive call survived checking",
                self.mangled(func, type_args)
            );
        }
        if self.trace {
            eprintln!("[inline] {}", self.mangled(func, type_args));
        }
        self.visiting.insert(key.clone());

        let map: HashMap<TypeVarId, Type> = f
            .type_params
            .iter()
            .copied()
            .zip(type_args.iter().cloned())
            .collect();

        let Some(body) = &f.body else {
            panic!("inlining native function `{}`", f.name);
        };
        let body = match self.rewrite_block(body, &map) {
            Ok(body) => body,
            Err(e) => {
                self.visiting.remove(&key);
                return Err(e);
            }
        };
        let instance = Rc::new(InstantiatedFunc {
            name: f.name.clone(),
            params: f
                .params
                .iter()
                .map(|p| TParam {
                    name: p.name.clone(),
                    ty: substitute(&p.ty, &map),
                    span: p.span,
                })
                .collect(),
            return_type: substitute(&f.return_type, &map),
            body,
        });

        self.visiting.remove(&key);
        self.cache.insert(key, Rc::clone(&instance));
        Ok(instance)
    }

    fn mangled(&self, func: FuncId, type_args: &[Type]) -> String {
        let f = self.program.func(func);
        if type_args.is_empty() {
            f.name.clone()
        } else {
            let args = type_args
                .iter()
                .map(|t| display_type(t, &self.program.type_vars))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}<{}>", f.name, args)
        }
    }

    fn rewrite_block(
        &mut self,
        block: &TBlock,
        map: &HashMap<TypeVarId, Type>,
    ) -> Result<TBlock, TypeError> {
        Ok(TBlock {
            stmts: block
                .stmts
                .iter()
                .map(|s| self.rewrite_stmt(s, map))
                .collect::<Result<Vec<_>, _>>()?,
            span: block.span,
        })
    }

    fn rewrite_stmt(
        &mut self,
        stmt: &TStmt,
        map: &HashMap<TypeVarId, Type>,
    ) -> Result<TStmt, TypeError> {
        Ok(match stmt {
            TStmt::VarDecl {
                name,
                ty,
                init,
                span,
            } => TStmt::VarDecl {
                name: name.clone(),
                ty: substitute(ty, map),
                init: init.as_ref().map(|e| self.rewrite_expr(e, map)).transpose()?,
                span: *span,
            },
            TStmt::Assign {
                target,
                value,
                span,
            } => TStmt::Assign {
                target: self.rewrite_expr(target, map)?,
                value: self.rewrite_expr(value, map)?,
                span: *span,
            },
            TStmt::Return { value, span } => TStmt::Return {
                value: value.as_ref().map(|e| self.rewrite_expr(e, map)).transpose()?,
                span: *span,
            },
            TStmt::If {
                cond,
                then_block,
                else_block,
                span,
            } => TStmt::If {
                cond: self.rewrite_expr(cond, map)?,
                then_block: self.rewrite_block(then_block, map)?,
                else_block: else_block
                    .as_ref()
                    .map(|b| self.rewrite_block(b, map))
                    .transpose()?,
                span: *span,
            },
            TStmt::While { cond, body, span } => TStmt::While {
                cond: self.rewrite_expr(cond, map)?,
                body: self.rewrite_block(body, map)?,
                span: *span,
            },
            TStmt::Break(span) => TStmt::Break(*span),
            TStmt::Continue(span) => TStmt::Continue(*span),
            TStmt::Expr(e) => TStmt::Expr(self.rewrite_expr(e, map)?),
            TStmt::Block(b) => TStmt::Block(self.rewrite_block(b, map)?),
        })
    }

    fn rewrite_expr(
        &mut self,
        expr: &TExpr,
        map: &HashMap<TypeVarId, Type>,
    ) -> Result<TExpr, TypeError> {
        let ty = substitute(&expr.ty, map);
        let span = expr.span;
        let kind = match &expr.kind {
            TExprKind::Call {
                target,
                type_args,
                args,
            } => {
                let args: Vec<TExpr> = args
                    .iter()
                    .map(|a| self.rewrite_expr(a, map))
                    .collect::<Result<Vec<_>, _>>()?;
                let (func, type_args) = match target {
                    CallTarget::Direct(id) => (
                        *id,
                        type_args.iter().map(|t| substitute(t, map)).collect::<Vec<_>>(),
                    ),
                    CallTarget::Protocol { name } => self.resolve_protocol_call(name, &args, span)?,
                };
                self.inline_call(func, type_args, args)?
            }
            TExprKind::And { lhs, rhs } => TExprKind::And {
                lhs: Box::new(self.rewrite_expr(lhs, map)?),
                rhs: Box::new(self.rewrite_expr(rhs, map)?),
            },
            TExprKind::Or { lhs, rhs } => TExprKind::Or {
                lhs: Box::new(self.rewrite_expr(lhs, map)?),
                rhs: Box::new(self.rewrite_expr(rhs, map)?),
            },
            TExprKind::Deref(e) => TExprKind::Deref(Box::new(self.rewrite_expr(e, map)?)),
            TExprKind::AddrOf(e) => TExprKind::AddrOf(Box::new(self.rewrite_expr(e, map)?)),
            TExprKind::Index { base, index } => TExprKind::Index {
                base: Box::new(self.rewrite_expr(base, map)?),
                index: Box::new(self.rewrite_expr(index, map)?),
            },
            TExprKind::Field { base, field, .. } => {
                let base = self.rewrite_expr(base, map)?;
                let layout = self.program.structs.layout(&base.ty);
                let Some(offset) = layout.field(field).and_then(|f| f.offset) else {
                    panic!(
                        "field `{}` of `{}` has no laid-out offset after substitution",
                        field, base.ty
                    );
                };
                TExprKind::Field {
                    base: Box::new(base),
                    field: field.clone(),
                    offset: Some(offset),
                }
            }
            TExprKind::Local(name) => TExprKind::Local(name.clone()),
            TExprKind::IntLit(v) => TExprKind::IntLit(*v),
            TExprKind::UintLit(v) => TExprKind::UintLit(*v),
            TExprKind::FloatLit(v) => TExprKind::FloatLit(*v),
            TExprKind::DoubleLit(v) => TExprKind::DoubleLit(*v),
            TExprKind::BoolLit(v) => TExprKind::BoolLit(*v),
            TExprKind::NullLit => TExprKind::NullLit,
            TExprKind::InlinedCall(_) => {
                unreachable!("inlined call fed back into monomorphisation")
            }
        };
        Ok(TExpr::new(kind, ty, span))
    }

    /// A call that resolved against a protocol signature: the receiver type
    /// is concrete now, so re-resolve it against the program's overloads.
    /// The protocol check promised a matching overload exists, but an
    /// overload that failed against the rigid type variable can also match
    /// the concrete type, making the call ambiguous here.
    fn resolve_protocol_call(
        &self,
        name: &str,
        args: &[TExpr],
        span: crate::compiler::lexer::Span,
    ) -> Result<(FuncId, Vec<Type>), TypeError> {
        let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        let resolved = resolve_call(self.program, &[], name, &[], &arg_types, span)?;
        let CallTarget::Direct(id) = resolved.target else {
            panic!("protocol call `{}` re-resolved to a protocol target", name);
        };
        Ok((id, resolved.type_args))
    }

    fn inline_call(
        &mut self,
        func: FuncId,
        type_args: Vec<Type>,
        args: Vec<TExpr>,
    ) -> Result<TExprKind, TypeError> {
        let f = self.program.func(func);
        if f.is_native() {
            return Ok(TExprKind::Call {
                target: CallTarget::Direct(func),
                type_args,
                args,
            });
        }

        let instance = self.instantiate(func, &type_args)?;
        Ok(TExprKind::InlinedCall(Box::new(FunctionBlock {
            func,
            params: instance.params.clone(),
            args,
            body: instance.body.clone(),
            return_type: instance.return_type.clone(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Lexer;
    use crate::compiler::parser::Parser;
    use crate::compiler::typechecker::check_program;

    fn check(source: &str) -> Program {
        let tokens = Lexer::new(source).scan_tokens().expect("lexes");
        let ast = Parser::new(tokens).parse().expect("parses");
        check_program(&ast).expect("checks")
    }

    fn func_id(program: &Program, name: &str) -> FuncId {
        program.overloads_of(name)[0]
    }

    fn find_inlined(block: &TBlock) -> Vec<&FunctionBlock> {
        fn walk_expr<'a>(e: &'a TExpr, out: &mut Vec<&'a FunctionBlock>) {
            match &e.kind {
                TExprKind::InlinedCall(fb) => {
                    out.push(fb);
                    for a in &fb.args {
                        walk_expr(a, out);
                    }
                }
                TExprKind::Call { args, .. } => {
                    for a in args {
                        walk_expr(a, out);
                    }
                }
                TExprKind::And { lhs, rhs } | TExprKind::Or { lhs, rhs } => {
                    walk_expr(lhs, out);
                    walk_expr(rhs, out);
                }
                TExprKind::Deref(e) | TExprKind::AddrOf(e) => walk_expr(e, out),
                TExprKind::Index { base, index } => {
                    walk_expr(base, out);
                    walk_expr(index, out);
                }
                TExprKind::Field { base, .. } => walk_expr(base, out),
                _ => {}
            }
        }
        let mut out = Vec::new();
        for stmt in &block.stmts {
            match stmt {
                TStmt::Return { value: Some(e), .. } | TStmt::Expr(e) => walk_expr(e, &mut out),
                TStmt::VarDecl { init: Some(e), .. } => walk_expr(e, &mut out),
                _ => {}
            }
        }
        out
    }

    #[test]
    fn test_defined_callee_becomes_function_block() {
        let program = check(
            "int32 inc(int32 x) { return x + 1; }\nint32 foo(int32 x) { return inc(x); }",
        );
        let mut mono = Monomorphiser::new(&program, false);
        let instance = mono.instantiate(func_id(&program, "foo"), &[]).unwrap();
        let inlined = find_inlined(&instance.body);
        assert_eq!(inlined.len(), 1);
        assert_eq!(inlined[0].params[0].name, "x");
        assert_eq!(inlined[0].return_type, Type::Int32);
    }

    #[test]
    fn test_native_callee_stays_a_call() {
        let program = check("int32 foo(int32 x) { return x + 1; }");
        let mut mono = Monomorphiser::new(&program, false);
        let instance = mono.instantiate(func_id(&program, "foo"), &[]).unwrap();
        assert!(find_inlined(&instance.body).is_empty());
    }

    #[test]
    fn test_generic_instance_is_substituted() {
        let program = check(
            "T id<T>(T x) { return x; }\nint32 foo(int32 x) { return id(x); }",
        );
        let mut mono = Monomorphiser::new(&program, false);
        let instance = mono.instantiate(func_id(&program, "foo"), &[]).unwrap();
        let inlined = find_inlined(&instance.body);
        assert_eq!(inlined.len(), 1);
        assert_eq!(inlined[0].params[0].ty, Type::Int32);
        assert_eq!(inlined[0].return_type, Type::Int32);
    }

    #[test]
    fn test_instantiation_memoized() {
        let program = check("T id<T>(T x) { return x; }");
        let mut mono = Monomorphiser::new(&program, false);
        let id = func_id(&program, "id");
        let a = mono.instantiate(id, &[Type::Int32]).unwrap();
        let b = mono.instantiate(id, &[Type::Int32]).unwrap();
        assert!(Rc::ptr_eq(&a, &b));

        // A different type-argument tuple is a different instance.
        let c = mono.instantiate(id, &[Type::Float]).unwrap();
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(c.return_type, Type::Float);
    }

    #[test]
    fn test_field_offsets_bound_after_substitution() {
        let program = check(
            "struct Box<T> { T value; }\n\
             int32 get(Box<int32> b) { return b.value; }",
        );
        let mut mono = Monomorphiser::new(&program, false);
        let instance = mono.instantiate(func_id(&program, "get"), &[]).unwrap();
        let TStmt::Return { value: Some(e), .. } = &instance.body.stmts[0] else {
            panic!("expected return");
        };
        let TExprKind::Field { offset, .. } = &e.kind else {
            panic!("expected field access");
        };
        assert_eq!(*offset, Some(0));
    }

    #[test]
    fn test_protocol_call_re_resolved_to_concrete_overload() {
        let program = check(
            "protocol MyEq { bool same(MyEq, MyEq); }\n\
             bool same(int32 a, int32 b) { return a == b; }\n\
             bool both<T: MyEq>(T a, T b) { return same(a, b); }\n\
             bool f(int32 x) { return both(x, x); }",
        );
        let mut mono = Monomorphiser::new(&program, false);
        let instance = mono.instantiate(func_id(&program, "f"), &[]).unwrap();
        // f inlines both<int32>, whose body inlines the concrete `same`.
        let outer = find_inlined(&instance.body);
        assert_eq!(outer.len(), 1);
        let inner = find_inlined(&outer[0].body);
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].func, func_id(&program, "same"));
    }

    #[test]
    fn test_protocol_call_ambiguous_at_concrete_type_is_an_error() {
        // Inside `apply`, only the Scalable signature matches `scale(a)`
        // against the rigid T. At T = int32 the concrete overload and the
        // Sizable-constrained generic both match too, so re-resolution is
        // ambiguous and must fail as a type error, not abort.
        let program = check(
            "protocol Scalable { int32 scale(Scalable); }\n\
             protocol Sizable { int32 size(Sizable); }\n\
             int32 scale(int32 x) { return x + x; }\n\
             int32 scale<T: Sizable>(T x) { return size(x); }\n\
             int32 size(int32 x) { return 1; }\n\
             int32 apply<T: Scalable>(T a) { return scale(a); }\n\
             int32 f(int32 x) { return apply(x); }",
        );
        let mut mono = Monomorphiser::new(&program, false);
        let err = mono.instantiate(func_id(&program, "f"), &[]).unwrap_err();
        assert!(err.message.contains("ambiguous"), "{}", err.message);
    }
}
