//! The type checker: lowers the untyped AST into a checked [`Program`].
//!
//! Checking runs in phases: struct definitions (two passes, so fields can
//! reference structs declared later), protocols, native operator
//! registration, function signatures, then bodies. The first error aborts
//! the pipeline. Surface operators are desugared here into `operator+`-style
//! calls resolved by the resolver; `&&`/`||` stay built in.

use std::collections::{HashMap, HashSet};

use crate::compiler::ast;
use crate::compiler::errors::TypeError;
use crate::compiler::lexer::Span;
use crate::compiler::resolver::{resolve_call, same_signature};
use crate::compiler::typed_ast::{
    CallTarget, FuncId, NativeOp, Program, ProtocolInfo, ProtocolSig, ScalarKind, TBlock, TExpr,
    TExprKind, TFunc, TParam, TStmt,
};
use crate::compiler::types::{AddressSpace, StructDef, StructRegistry, Type, TypeVarArena, TypeVarId};
use crate::compiler::unify::equals;

pub fn check_program(ast: &ast::Program) -> Result<Program, TypeError> {
    let mut checker = Checker {
        program: Program {
            funcs: Vec::new(),
            overloads: HashMap::new(),
            structs: StructRegistry::new(),
            protocols: HashMap::new(),
            type_vars: TypeVarArena::new(),
        },
    };

    checker.collect_structs(ast)?;
    checker.collect_protocols(ast)?;
    checker.register_natives();
    let declared = checker.register_signatures(ast)?;

    // Bodies are checked against the finished signature table, then
    // installed all at once.
    let mut bodies = Vec::new();
    for &(id, decl) in &declared {
        let body = BodyChecker::new(&checker.program, id).check(decl)?;
        bodies.push((id, body));
    }
    for (id, body) in bodies {
        checker.program.funcs[id].body = Some(body);
    }

    checker.check_recursion()?;
    Ok(checker.program)
}

struct Checker {
    program: Program,
}

impl Checker {
    // Structs

    fn collect_structs(&mut self, ast: &ast::Program) -> Result<(), TypeError> {
        // First pass: names, arity, and type-parameter variables only, so
        // field types can reference any struct.
        let mut param_vars: HashMap<String, Vec<TypeVarId>> = HashMap::new();
        for decl in &ast.decls {
            let ast::Decl::Struct(s) = decl else { continue };
            if self.program.structs.contains(&s.name) {
                return Err(TypeError::new(
                    format!("duplicate struct `{}`", s.name),
                    s.span,
                ));
            }
            let vars = self.declare_type_params(&s.type_params)?;
            param_vars.insert(s.name.clone(), vars.clone());
            self.program.structs.define(StructDef {
                name: s.name.clone(),
                span: s.span,
                type_params: vars,
                fields: Vec::new(),
            });
        }

        // Second pass: field types.
        for decl in &ast.decls {
            let ast::Decl::Struct(s) = decl else { continue };
            let vars = &param_vars[&s.name];
            let scope: HashMap<String, Type> = s
                .type_params
                .iter()
                .zip(vars)
                .map(|(tp, &v)| (tp.name.clone(), Type::Var(v)))
                .collect();

            let mut fields = Vec::new();
            let mut seen = HashSet::new();
            for field in &s.fields {
                if !seen.insert(field.name.clone()) {
                    return Err(TypeError::new(
                        format!("duplicate field `{}` in struct `{}`", field.name, s.name),
                        field.span,
                    ));
                }
                let ty = self.resolve_type_ann(&field.ty, &scope)?;
                if ty == Type::Void {
                    return Err(TypeError::new(
                        format!("field `{}` cannot have type void", field.name),
                        field.span,
                    ));
                }
                fields.push((field.name.clone(), ty));
            }
            self.program.structs.define(StructDef {
                name: s.name.clone(),
                span: s.span,
                type_params: vars.clone(),
                fields,
            });
        }

        self.check_struct_cycles(ast)
    }

    /// A struct may not contain itself by value, directly or transitively.
    /// Pointer and array-reference fields break the containment chain.
    fn check_struct_cycles(&self, ast: &ast::Program) -> Result<(), TypeError> {
        fn contained_structs(ty: &Type, out: &mut Vec<String>) {
            if let Type::Struct { name, type_args } = ty {
                out.push(name.clone());
                for arg in type_args {
                    contained_structs(arg, out);
                }
            }
        }

        fn visit(
            structs: &StructRegistry,
            name: &str,
            stack: &mut Vec<String>,
            done: &mut HashSet<String>,
        ) -> bool {
            if done.contains(name) {
                return true;
            }
            if stack.iter().any(|n| n == name) {
                return false;
            }
            stack.push(name.to_string());
            let def = structs.def(name).cloned();
            if let Some(def) = def {
                for (_, fty) in &def.fields {
                    let mut contained = Vec::new();
                    contained_structs(fty, &mut contained);
                    for inner in contained {
                        if !visit(structs, &inner, stack, done) {
                            return false;
                        }
                    }
                }
            }
            stack.pop();
            done.insert(name.to_string());
            true
        }

        let mut done = HashSet::new();
        for decl in &ast.decls {
            let ast::Decl::Struct(s) = decl else { continue };
            let mut stack = Vec::new();
            if !visit(&self.program.structs, &s.name, &mut stack, &mut done) {
                return Err(TypeError::new(
                    format!("struct `{}` contains itself by value", s.name),
                    s.span,
                ));
            }
        }
        Ok(())
    }

    // Protocols

    fn collect_protocols(&mut self, ast: &ast::Program) -> Result<(), TypeError> {
        for decl in &ast.decls {
            let ast::Decl::Protocol(p) = decl else { continue };
            if self.program.protocols.contains_key(&p.name) || p.name == "primitive" {
                return Err(TypeError::new(
                    format!("duplicate protocol `{}`", p.name),
                    p.span,
                ));
            }
            let self_var = self.program.type_vars.fresh(&p.name, None);
            let scope = HashMap::from([(p.name.clone(), Type::Var(self_var))]);

            let mut sigs = Vec::new();
            for sig in &p.sigs {
                let params = sig
                    .params
                    .iter()
                    .map(|ann| self.resolve_type_ann(ann, &scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let return_type = self.resolve_type_ann(&sig.return_type, &scope)?;
                sigs.push(ProtocolSig {
                    name: sig.name.clone(),
                    span: sig.span,
                    params,
                    return_type,
                });
            }
            self.program.protocols.insert(
                p.name.clone(),
                ProtocolInfo {
                    name: p.name.clone(),
                    span: p.span,
                    self_var,
                    sigs,
                },
            );
        }
        Ok(())
    }

    // Native operators

    fn register_natives(&mut self) {
        use ScalarKind as S;
        let numerics = [S::Int32, S::Uint32, S::Float, S::Double];

        for k in numerics {
            let t = k.ty();
            self.add_native("operator+", NativeOp::Add(k), vec![], vec![t.clone(), t.clone()], t.clone());
            self.add_native("operator-", NativeOp::Sub(k), vec![], vec![t.clone(), t.clone()], t.clone());
            self.add_native("operator*", NativeOp::Mul(k), vec![], vec![t.clone(), t.clone()], t.clone());
            self.add_native("operator/", NativeOp::Div(k), vec![], vec![t.clone(), t.clone()], t.clone());
        }
        for k in [S::Int32, S::Uint32] {
            let t = k.ty();
            self.add_native("operator%", NativeOp::Rem(k), vec![], vec![t.clone(), t.clone()], t);
        }
        for k in [S::Int32, S::Float, S::Double] {
            let t = k.ty();
            self.add_native("operator-", NativeOp::Neg(k), vec![], vec![t.clone()], t);
        }
        self.add_native(
            "operator!",
            NativeOp::Not,
            vec![],
            vec![Type::Bool],
            Type::Bool,
        );

        for k in numerics {
            let t = k.ty();
            for (name, op) in [
                ("operator==", NativeOp::Eq(k)),
                ("operator!=", NativeOp::Ne(k)),
                ("operator<", NativeOp::Lt(k)),
                ("operator<=", NativeOp::Le(k)),
                ("operator>", NativeOp::Gt(k)),
                ("operator>=", NativeOp::Ge(k)),
            ] {
                self.add_native(name, op, vec![], vec![t.clone(), t.clone()], Type::Bool);
            }
        }
        for (name, op) in [
            ("operator==", NativeOp::Eq(S::Bool)),
            ("operator!=", NativeOp::Ne(S::Bool)),
        ] {
            self.add_native(name, op, vec![], vec![Type::Bool, Type::Bool], Type::Bool);
        }

        // Pointer and array-reference identity, one generic overload per
        // address space and shape.
        let spaces = [
            AddressSpace::Thread,
            AddressSpace::Threadgroup,
            AddressSpace::Device,
            AddressSpace::Constant,
        ];
        for space in spaces {
            for (name, op) in [("operator==", NativeOp::PtrEq), ("operator!=", NativeOp::PtrNe)] {
                let t = self.program.type_vars.fresh("T", None);
                let ptr = Type::ptr(space, Type::Var(t));
                self.add_native(name, op, vec![t], vec![ptr.clone(), ptr], Type::Bool);

                let u = self.program.type_vars.fresh("T", None);
                let aref = Type::array_ref(space, Type::Var(u));
                self.add_native(name, op, vec![u], vec![aref.clone(), aref], Type::Bool);
            }
        }
    }

    fn add_native(
        &mut self,
        name: &str,
        op: NativeOp,
        type_params: Vec<TypeVarId>,
        params: Vec<Type>,
        return_type: Type,
    ) {
        let id = self.program.funcs.len();
        let param_names = ["a", "b"];
        self.program.funcs.push(TFunc {
            id,
            name: name.to_string(),
            span: Span::new(0, 0),
            type_params,
            params: params
                .into_iter()
                .enumerate()
                .map(|(i, ty)| TParam {
                    name: param_names[i].to_string(),
                    ty,
                    span: Span::new(0, 0),
                })
                .collect(),
            return_type,
            body: None,
            native: Some(op),
        });
        self.program
            .overloads
            .entry(name.to_string())
            .or_default()
            .push(id);
    }

    // Function signatures

    fn register_signatures<'a>(
        &mut self,
        ast: &'a ast::Program,
    ) -> Result<Vec<(FuncId, &'a ast::FuncDecl)>, TypeError> {
        let mut declared = Vec::new();
        for decl in &ast.decls {
            let ast::Decl::Func(f) = decl else { continue };
            let vars = self.declare_type_params(&f.type_params)?;
            let scope: HashMap<String, Type> = f
                .type_params
                .iter()
                .zip(&vars)
                .map(|(tp, &v)| (tp.name.clone(), Type::Var(v)))
                .collect();

            let mut params = Vec::new();
            let mut seen = HashSet::new();
            for p in &f.params {
                if !seen.insert(p.name.clone()) {
                    return Err(TypeError::new(
                        format!("duplicate parameter `{}`", p.name),
                        p.span,
                    ));
                }
                let ty = self.resolve_type_ann(&p.ty, &scope)?;
                if ty == Type::Void {
                    return Err(TypeError::new(
                        format!("parameter `{}` cannot have type void", p.name),
                        p.span,
                    ));
                }
                params.push(TParam {
                    name: p.name.clone(),
                    ty,
                    span: p.span,
                });
            }
            let return_type = self.resolve_type_ann(&f.return_type, &scope)?;

            let id = self.program.funcs.len();
            let func = TFunc {
                id,
                name: f.name.clone(),
                span: f.span,
                type_params: vars,
                params,
                return_type,
                body: None,
                native: None,
            };

            for &other in self.program.overloads_of(&f.name) {
                if same_signature(&self.program, self.program.func(other), &func) {
                    return Err(TypeError::new(
                        format!("duplicate overload of `{}`", f.name),
                        f.span,
                    ));
                }
            }

            self.program.funcs.push(func);
            self.program
                .overloads
                .entry(f.name.clone())
                .or_default()
                .push(id);
            declared.push((id, f));
        }
        Ok(declared)
    }

    fn declare_type_params(
        &mut self,
        type_params: &[ast::TypeParam],
    ) -> Result<Vec<TypeVarId>, TypeError> {
        let mut vars = Vec::new();
        let mut seen = HashSet::new();
        for tp in type_params {
            if !seen.insert(tp.name.clone()) {
                return Err(TypeError::new(
                    format!("duplicate type parameter `{}`", tp.name),
                    tp.span,
                ));
            }
            if let Some(protocol) = &tp.protocol
                && protocol != "primitive"
                && !self.program.protocols.contains_key(protocol)
            {
                return Err(TypeError::new(
                    format!("unknown protocol `{}`", protocol),
                    tp.span,
                ));
            }
            vars.push(
                self.program
                    .type_vars
                    .fresh(&tp.name, tp.protocol.clone()),
            );
        }
        Ok(vars)
    }

    fn resolve_type_ann(
        &self,
        ann: &ast::TypeAnn,
        scope: &HashMap<String, Type>,
    ) -> Result<Type, TypeError> {
        resolve_type_ann(&self.program.structs, ann, scope)
    }

    // Recursion

    /// Recursion is rejected statically: the inliner cannot terminate on a
    /// cyclic call graph. Calls through a protocol constraint are treated
    /// conservatively as calls to every overload of that name.
    fn check_recursion(&self) -> Result<(), TypeError> {
        let mut edges: HashMap<FuncId, Vec<FuncId>> = HashMap::new();
        for func in &self.program.funcs {
            let Some(body) = &func.body else { continue };
            let mut targets = Vec::new();
            collect_block_calls(&self.program, body, &mut targets);
            edges.insert(func.id, targets);
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }
        fn visit(
            edges: &HashMap<FuncId, Vec<FuncId>>,
            marks: &mut HashMap<FuncId, Mark>,
            id: FuncId,
        ) -> Option<FuncId> {
            match marks.get(&id) {
                Some(Mark::Done) => return None,
                Some(Mark::Visiting) => return Some(id),
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(targets) = edges.get(&id) {
                for &t in targets {
                    if let Some(cycle) = visit(edges, marks, t) {
                        return Some(cycle);
                    }
                }
            }
            marks.insert(id, Mark::Done);
            None
        }

        let mut marks = HashMap::new();
        for id in edges.keys() {
            if let Some(offender) = visit(&edges, &mut marks, *id) {
                let func = self.program.func(offender);
                return Err(TypeError::new(
                    format!("recursive call involving `{}`", func.name),
                    func.span,
                ));
            }
        }
        Ok(())
    }
}

fn collect_block_calls(program: &Program, block: &TBlock, out: &mut Vec<FuncId>) {
    for stmt in &block.stmts {
        match stmt {
            TStmt::VarDecl { init, .. } => {
                if let Some(e) = init {
                    collect_expr_calls(program, e, out);
                }
            }
            TStmt::Assign { target, value, .. } => {
                collect_expr_calls(program, target, out);
                collect_expr_calls(program, value, out);
            }
            TStmt::Return { value, .. } => {
                if let Some(e) = value {
                    collect_expr_calls(program, e, out);
                }
            }
            TStmt::If {
                cond,
                then_block,
                else_block,
                ..
            } => {
                collect_expr_calls(program, cond, out);
                collect_block_calls(program, then_block, out);
                if let Some(b) = else_block {
                    collect_block_calls(program, b, out);
                }
            }
            TStmt::While { cond, body, .. } => {
                collect_expr_calls(program, cond, out);
                collect_block_calls(program, body, out);
            }
            TStmt::Break(_) | TStmt::Continue(_) => {}
            TStmt::Expr(e) => collect_expr_calls(program, e, out),
            TStmt::Block(b) => collect_block_calls(program, b, out),
        }
    }
}

fn collect_expr_calls(program: &Program, expr: &TExpr, out: &mut Vec<FuncId>) {
    match &expr.kind {
        TExprKind::Call { target, args, .. } => {
            match target {
                CallTarget::Direct(id) => out.push(*id),
                CallTarget::Protocol { name } => out.extend_from_slice(program.overloads_of(name)),
            }
            for a in args {
                collect_expr_calls(program, a, out);
            }
        }
        TExprKind::And { lhs, rhs } | TExprKind::Or { lhs, rhs } => {
            collect_expr_calls(program, lhs, out);
            collect_expr_calls(program, rhs, out);
        }
        TExprKind::Deref(e) | TExprKind::AddrOf(e) => collect_expr_calls(program, e, out),
        TExprKind::Index { base, index } => {
            collect_expr_calls(program, base, out);
            collect_expr_calls(program, index, out);
        }
        TExprKind::Field { base, .. } => collect_expr_calls(program, base, out),
        TExprKind::InlinedCall(_) => unreachable!("inlined call before monomorphisation"),
        _ => {}
    }
}

// Body checking

struct BodyChecker<'a> {
    program: &'a Program,
    func: FuncId,
    scopes: Vec<HashMap<String, Type>>,
    loop_depth: usize,
}

impl<'a> BodyChecker<'a> {
    fn new(program: &'a Program, func: FuncId) -> Self {
        Self {
            program,
            func,
            scopes: Vec::new(),
            loop_depth: 0,
        }
    }

    fn signature(&self) -> &TFunc {
        self.program.func(self.func)
    }

    fn check(mut self, decl: &ast::FuncDecl) -> Result<TBlock, TypeError> {
        let mut top = HashMap::new();
        for param in &self.signature().params {
            top.insert(param.name.clone(), param.ty.clone());
        }
        self.scopes.push(top);

        let body = self.check_block(&decl.body)?;
        self.scopes.pop();

        check_unreachable(&body)?;
        let sig = self.signature();
        if sig.return_type != Type::Void && !block_exits(&body) {
            return Err(TypeError::new(
                format!("missing return in function `{}`", sig.name),
                decl.span,
            ));
        }
        Ok(body)
    }

    // Scopes

    fn declare(&mut self, name: &str, ty: Type, span: Span) -> Result<(), TypeError> {
        let Some(scope) = self.scopes.last_mut() else {
            unreachable!("no scope open");
        };
        if scope.contains_key(name) {
            return Err(TypeError::new(
                format!("variable `{}` already declared in this scope", name),
                span,
            ));
        }
        scope.insert(name.to_string(), ty);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<&Type> {
        self.scopes.iter().rev().find_map(|s| s.get(name))
    }

    fn type_scope(&self) -> HashMap<String, Type> {
        let sig = self.signature();
        sig.type_params
            .iter()
            .map(|&v| (self.program.type_vars.name(v), Type::Var(v)))
            .collect()
    }

    // Statements

    fn check_block(&mut self, block: &ast::Block) -> Result<TBlock, TypeError> {
        self.scopes.push(HashMap::new());
        let mut stmts = Vec::new();
        for stmt in &block.stmts {
            stmts.push(self.check_stmt(stmt)?);
        }
        self.scopes.pop();
        Ok(TBlock {
            stmts,
            span: block.span,
        })
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> Result<TStmt, TypeError> {
        match stmt {
            ast::Stmt::VarDecl {
                ty,
                name,
                init,
                span,
            } => {
                let scope = self.type_scope();
                let declared = resolve_type_ann(&self.program.structs, ty, &scope)?;
                if declared == Type::Void {
                    return Err(TypeError::new(
                        format!("variable `{}` cannot have type void", name),
                        *span,
                    ));
                }
                let init = match init {
                    Some(e) => {
                        let e = self.check_expr(e)?;
                        Some(self.coerce(e, &declared)?)
                    }
                    None => None,
                };
                self.declare(name, declared.clone(), *span)?;
                Ok(TStmt::VarDecl {
                    name: name.clone(),
                    ty: declared,
                    init,
                    span: *span,
                })
            }
            ast::Stmt::Assign {
                target,
                value,
                span,
            } => {
                let (target, _) = self.check_lvalue(target)?;
                let value = self.check_expr(value)?;
                let value = self.coerce(value, &target.ty.clone())?;
                Ok(TStmt::Assign {
                    target,
                    value,
                    span: *span,
                })
            }
            ast::Stmt::Return { value, span } => {
                let return_type = self.signature().return_type.clone();
                let value = match (value, &return_type) {
                    (None, Type::Void) => None,
                    (None, _) => {
                        return Err(TypeError::new(
                            "missing value in return from non-void function",
                            *span,
                        ));
                    }
                    (Some(_), Type::Void) => {
                        return Err(TypeError::new(
                            "cannot return a value from a void function",
                            *span,
                        ));
                    }
                    (Some(e), _) => {
                        let e = self.check_expr(e)?;
                        Some(self.coerce(e, &return_type)?)
                    }
                };
                Ok(TStmt::Return { value, span: *span })
            }
            ast::Stmt::If {
                cond,
                then_block,
                else_block,
                span,
            } => {
                let cond = self.check_cond(cond)?;
                let then_block = self.check_block(then_block)?;
                let else_block = match else_block {
                    Some(b) => Some(self.check_block(b)?),
                    None => None,
                };
                Ok(TStmt::If {
                    cond,
                    then_block,
                    else_block,
                    span: *span,
                })
            }
            ast::Stmt::While { cond, body, span } => {
                let cond = self.check_cond(cond)?;
                self.loop_depth += 1;
                let body = self.check_block(body)?;
                self.loop_depth -= 1;
                Ok(TStmt::While {
                    cond,
                    body,
                    span: *span,
                })
            }
            ast::Stmt::Break(span) => {
                if self.loop_depth == 0 {
                    return Err(TypeError::new("break outside of a loop", *span));
                }
                Ok(TStmt::Break(*span))
            }
            ast::Stmt::Continue(span) => {
                if self.loop_depth == 0 {
                    return Err(TypeError::new("continue outside of a loop", *span));
                }
                Ok(TStmt::Continue(*span))
            }
            ast::Stmt::Expr(e) => Ok(TStmt::Expr(self.check_expr(e)?)),
            ast::Stmt::Block(b) => Ok(TStmt::Block(self.check_block(b)?)),
        }
    }

    fn check_cond(&mut self, cond: &ast::Expr) -> Result<TExpr, TypeError> {
        let cond = self.check_expr(cond)?;
        if cond.ty != Type::Bool {
            return Err(TypeError::mismatch(Type::Bool, cond.ty, cond.span));
        }
        Ok(cond)
    }

    /// Check that `value` is usable where `expected` is required, re-typing
    /// a `null` literal to the expected pointer type.
    fn coerce(&self, mut value: TExpr, expected: &Type) -> Result<TExpr, TypeError> {
        if value.ty == Type::Null {
            if !expected.accepts_null() {
                return Err(TypeError::mismatch(
                    expected.clone(),
                    Type::Null,
                    value.span,
                ));
            }
            value.ty = expected.clone();
            return Ok(value);
        }
        if equals(expected, &value.ty).is_none() {
            return Err(TypeError::mismatch(
                expected.clone(),
                value.ty.clone(),
                value.span,
            ));
        }
        Ok(value)
    }

    // Expressions

    fn check_expr(&mut self, expr: &ast::Expr) -> Result<TExpr, TypeError> {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::IntLit(value) => {
                let value = i32::try_from(*value).map_err(|_| {
                    TypeError::new(
                        format!("integer literal `{}` out of range for int32", value),
                        span,
                    )
                })?;
                Ok(TExpr::new(TExprKind::IntLit(value), Type::Int32, span))
            }
            ast::ExprKind::UintLit(value) => {
                let value = u32::try_from(*value).map_err(|_| {
                    TypeError::new(
                        format!("integer literal `{}u` out of range for uint32", value),
                        span,
                    )
                })?;
                Ok(TExpr::new(TExprKind::UintLit(value), Type::Uint32, span))
            }
            ast::ExprKind::FloatLit(value) => {
                // Literal text is always finite, so a non-finite narrowing
                // means the written value exceeds the type's range.
                let narrowed = *value as f32;
                if !narrowed.is_finite() {
                    return Err(TypeError::new(
                        format!("float literal `{}` out of range for float", value),
                        span,
                    ));
                }
                Ok(TExpr::new(TExprKind::FloatLit(narrowed), Type::Float, span))
            }
            ast::ExprKind::DoubleLit(value) => {
                if !value.is_finite() {
                    return Err(TypeError::new(
                        "decimal literal out of range for double".to_string(),
                        span,
                    ));
                }
                Ok(TExpr::new(TExprKind::DoubleLit(*value), Type::Double, span))
            }
            ast::ExprKind::BoolLit(value) => {
                Ok(TExpr::new(TExprKind::BoolLit(*value), Type::Bool, span))
            }
            ast::ExprKind::Null => Ok(TExpr::new(TExprKind::NullLit, Type::Null, span)),
            ast::ExprKind::Ident(name) => {
                let Some(ty) = self.lookup(name) else {
                    return Err(TypeError::new(
                        format!("unknown variable `{}`", name),
                        span,
                    ));
                };
                Ok(TExpr::new(TExprKind::Local(name.clone()), ty.clone(), span))
            }
            ast::ExprKind::Call {
                name,
                type_args,
                args,
            } => {
                let scope = self.type_scope();
                let explicit = type_args
                    .iter()
                    .map(|a| resolve_type_ann(&self.program.structs, a, &scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let args = args
                    .iter()
                    .map(|a| self.check_expr(a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.resolve_call_expr(name, explicit, args, span)
            }
            ast::ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(lhs)?;
                let rhs = self.check_expr(rhs)?;
                match op {
                    ast::BinOp::And | ast::BinOp::Or => {
                        let lhs = self.coerce(lhs, &Type::Bool)?;
                        let rhs = self.coerce(rhs, &Type::Bool)?;
                        let kind = if *op == ast::BinOp::And {
                            TExprKind::And {
                                lhs: Box::new(lhs),
                                rhs: Box::new(rhs),
                            }
                        } else {
                            TExprKind::Or {
                                lhs: Box::new(lhs),
                                rhs: Box::new(rhs),
                            }
                        };
                        Ok(TExpr::new(kind, Type::Bool, span))
                    }
                    _ => {
                        let name = op
                            .operator_name()
                            .unwrap_or_else(|| unreachable!("short-circuit op desugared"));
                        self.resolve_call_expr(name, Vec::new(), vec![lhs, rhs], span)
                    }
                }
            }
            ast::ExprKind::Unary { op, operand } => {
                let operand = self.check_expr(operand)?;
                self.resolve_call_expr(op.operator_name(), Vec::new(), vec![operand], span)
            }
            ast::ExprKind::Deref(inner) => {
                let inner = self.check_expr(inner)?;
                let Type::Ptr { elem, .. } = &inner.ty else {
                    return Err(TypeError::new(
                        format!("cannot dereference a value of type `{}`", self.display(&inner.ty)),
                        span,
                    ));
                };
                let elem = (**elem).clone();
                Ok(TExpr::new(TExprKind::Deref(Box::new(inner)), elem, span))
            }
            ast::ExprKind::AddrOf(inner) => {
                let (inner, space) = self.check_lvalue(inner)?;
                let ty = Type::ptr(space, inner.ty.clone());
                Ok(TExpr::new(TExprKind::AddrOf(Box::new(inner)), ty, span))
            }
            ast::ExprKind::Index { base, index } => {
                let base = self.check_expr(base)?;
                let index = self.check_expr(index)?;
                self.index_expr(base, index, span)
            }
            ast::ExprKind::Field { base, field } => {
                let base = self.check_expr(base)?;
                self.field_expr(base, field, span)
            }
        }
    }

    fn resolve_call_expr(
        &mut self,
        name: &str,
        explicit: Vec<Type>,
        mut args: Vec<TExpr>,
        span: Span,
    ) -> Result<TExpr, TypeError> {
        let arg_types: Vec<Type> = args.iter().map(|a| a.ty.clone()).collect();
        let resolved = resolve_call(
            self.program,
            &self.signature().type_params,
            name,
            &explicit,
            &arg_types,
            span,
        )?;
        // Null arguments take the parameter type the resolution determined.
        for (arg, param_ty) in args.iter_mut().zip(&resolved.param_types) {
            if arg.ty == Type::Null {
                arg.ty = param_ty.clone();
            }
        }
        Ok(TExpr::new(
            TExprKind::Call {
                target: resolved.target,
                type_args: resolved.type_args,
                args,
            },
            resolved.return_type,
            span,
        ))
    }

    fn index_expr(&self, base: TExpr, index: TExpr, span: Span) -> Result<TExpr, TypeError> {
        let Type::ArrayRef { elem, .. } = &base.ty else {
            return Err(TypeError::new(
                format!("cannot index a value of type `{}`", self.display(&base.ty)),
                span,
            ));
        };
        // int32 indices are accepted; negative values trap as out of
        // bounds at run time, same as an over-large uint32.
        if index.ty != Type::Uint32 && index.ty != Type::Int32 {
            return Err(TypeError::mismatch(Type::Uint32, index.ty, index.span));
        }
        let elem = (**elem).clone();
        Ok(TExpr::new(
            TExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
            elem,
            span,
        ))
    }

    fn field_expr(&self, base: TExpr, field: &str, span: Span) -> Result<TExpr, TypeError> {
        let Type::Struct { name, .. } = &base.ty else {
            return Err(TypeError::new(
                format!(
                    "cannot access field `{}` on a value of type `{}`",
                    field,
                    self.display(&base.ty)
                ),
                span,
            ));
        };
        let layout = self.program.structs.layout(&base.ty);
        let Some(f) = layout.field(field) else {
            return Err(TypeError::new(
                format!("struct `{}` has no field `{}`", name, field),
                span,
            ));
        };
        let (fty, offset) = (f.ty.clone(), f.offset);
        Ok(TExpr::new(
            TExprKind::Field {
                base: Box::new(base),
                field: field.to_string(),
                offset,
            },
            fty,
            span,
        ))
    }

    /// Check an expression in lvalue position, yielding the address space
    /// a pointer to it would live in.
    fn check_lvalue(&mut self, expr: &ast::Expr) -> Result<(TExpr, AddressSpace), TypeError> {
        let span = expr.span;
        match &expr.kind {
            ast::ExprKind::Ident(name) => {
                let Some(ty) = self.lookup(name) else {
                    return Err(TypeError::new(
                        format!("unknown variable `{}`", name),
                        span,
                    ));
                };
                Ok((
                    TExpr::new(TExprKind::Local(name.clone()), ty.clone(), span),
                    AddressSpace::Thread,
                ))
            }
            ast::ExprKind::Deref(inner) => {
                let inner = self.check_expr(inner)?;
                let Type::Ptr { space, elem } = &inner.ty else {
                    return Err(TypeError::new(
                        format!("cannot dereference a value of type `{}`", self.display(&inner.ty)),
                        span,
                    ));
                };
                let (space, elem) = (*space, (**elem).clone());
                Ok((
                    TExpr::new(TExprKind::Deref(Box::new(inner)), elem, span),
                    space,
                ))
            }
            ast::ExprKind::Index { base, index } => {
                let base = self.check_expr(base)?;
                let index = self.check_expr(index)?;
                let Type::ArrayRef { space, .. } = &base.ty else {
                    return Err(TypeError::new(
                        format!("cannot index a value of type `{}`", self.display(&base.ty)),
                        span,
                    ));
                };
                let space = *space;
                Ok((self.index_expr(base, index, span)?, space))
            }
            ast::ExprKind::Field { base, field } => {
                let (base, space) = self.check_lvalue(base)?;
                Ok((self.field_expr(base, field, span)?, space))
            }
            _ => Err(TypeError::new("expression is not an lvalue", span)),
        }
    }

    fn display(&self, ty: &Type) -> String {
        crate::compiler::types::display_type(ty, &self.program.type_vars)
    }
}

/// Resolve a written type annotation against the struct table and a scope
/// of named type variables (a declaration's type parameters, or a
/// protocol's own name).
fn resolve_type_ann(
    structs: &StructRegistry,
    ann: &ast::TypeAnn,
    scope: &HashMap<String, Type>,
) -> Result<Type, TypeError> {
    match &ann.kind {
        ast::TypeAnnKind::Named(name) => match name.as_str() {
            "int" | "int32" => Ok(Type::Int32),
            "uint" | "uint32" => Ok(Type::Uint32),
            "float" => Ok(Type::Float),
            "double" => Ok(Type::Double),
            "bool" => Ok(Type::Bool),
            "void" => Ok(Type::Void),
            _ => {
                if let Some(ty) = scope.get(name) {
                    return Ok(ty.clone());
                }
                let Some(def) = structs.def(name) else {
                    return Err(TypeError::new(format!("unknown type `{}`", name), ann.span));
                };
                if !def.type_params.is_empty() {
                    return Err(TypeError::new(
                        format!(
                            "struct `{}` expects {} type arguments",
                            name,
                            def.type_params.len()
                        ),
                        ann.span,
                    ));
                }
                Ok(Type::Struct {
                    name: name.clone(),
                    type_args: Vec::new(),
                })
            }
        },
        ast::TypeAnnKind::Generic { name, args } => {
            let Some(def) = structs.def(name) else {
                return Err(TypeError::new(format!("unknown type `{}`", name), ann.span));
            };
            if def.type_params.len() != args.len() {
                return Err(TypeError::new(
                    format!(
                        "struct `{}` expects {} type arguments, got {}",
                        name,
                        def.type_params.len(),
                        args.len()
                    ),
                    ann.span,
                ));
            }
            let type_args = args
                .iter()
                .map(|a| resolve_type_ann(structs, a, scope))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Type::Struct {
                name: name.clone(),
                type_args,
            })
        }
        ast::TypeAnnKind::Ptr { space, elem } => {
            Ok(Type::ptr(*space, resolve_type_ann(structs, elem, scope)?))
        }
        ast::TypeAnnKind::ArrayRef { space, elem } => Ok(Type::array_ref(
            *space,
            resolve_type_ann(structs, elem, scope)?,
        )),
    }
}

// Flow analysis

/// Whether execution of this block always leaves the enclosing function or
/// loop before falling off the end.
fn block_exits(block: &TBlock) -> bool {
    block.stmts.iter().any(stmt_exits)
}

fn stmt_exits(stmt: &TStmt) -> bool {
    match stmt {
        TStmt::Return { .. } | TStmt::Break(_) | TStmt::Continue(_) => true,
        TStmt::If {
            then_block,
            else_block: Some(else_block),
            ..
        } => block_exits(then_block) && block_exits(else_block),
        TStmt::Block(b) => block_exits(b),
        _ => false,
    }
}

/// A statement after one that always exits can never run.
fn check_unreachable(block: &TBlock) -> Result<(), TypeError> {
    for (i, stmt) in block.stmts.iter().enumerate() {
        if stmt_exits(stmt) && i + 1 < block.stmts.len() {
            return Err(TypeError::new(
                "unreachable statement",
                block.stmts[i + 1].span(),
            ));
        }
        match stmt {
            TStmt::If {
                then_block,
                else_block,
                ..
            } => {
                check_unreachable(then_block)?;
                if let Some(b) = else_block {
                    check_unreachable(b)?;
                }
            }
            TStmt::While { body, .. } => check_unreachable(body)?,
            TStmt::Block(b) => check_unreachable(b)?,
            _ => {}
        }
    }
    Ok(())
}
