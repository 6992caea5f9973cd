//! Overload and call resolution.
//!
//! For each candidate sharing the call's name — program overloads plus the
//! required signatures of protocols constraining type parameters in scope —
//! a fresh unification attempt is made: the candidate's type parameters are
//! alpha-renamed to fresh flexible variables, explicit type arguments are
//! unified positionally, each parameter is unified against the matching
//! argument type, and the context is verified. Exactly one candidate must
//! survive: zero is a resolution failure and two or more is an ambiguity;
//! there is no tie-breaking.

use std::collections::HashMap;

use crate::compiler::errors::TypeError;
use crate::compiler::lexer::Span;
use crate::compiler::typed_ast::{CallTarget, Program, ProtocolSig, TFunc};
use crate::compiler::types::{display_type, substitute, Type, TypeVarId};
use crate::compiler::unify::{ProtocolOracle, UnificationContext};

/// A successfully resolved call.
#[derive(Debug, Clone)]
pub struct ResolvedCall {
    pub target: CallTarget,
    /// One resolved type per candidate type parameter; empty for
    /// non-generic and protocol targets.
    pub type_args: Vec<Type>,
    /// Parameter types after substitution; the checker re-types `null`
    /// arguments against these.
    pub param_types: Vec<Type>,
    pub return_type: Type,
}

/// Protocol-satisfaction oracle backed by the program's overload sets.
pub struct ProgramOracle<'a> {
    pub program: &'a Program,
}

impl ProtocolOracle for ProgramOracle<'_> {
    fn satisfies(&self, ty: &Type, protocol: &str) -> bool {
        protocol_satisfied(self.program, ty, protocol)
    }
}

pub fn resolve_call(
    program: &Program,
    scope_type_params: &[TypeVarId],
    name: &str,
    explicit_type_args: &[Type],
    arg_types: &[Type],
    span: Span,
) -> Result<ResolvedCall, TypeError> {
    let mut matches = Vec::new();

    for &id in program.overloads_of(name) {
        if let Some(resolved) =
            try_direct_candidate(program, program.func(id), explicit_type_args, arg_types)
        {
            matches.push(resolved);
        }
    }

    for &tp in scope_type_params {
        let Some(protocol) = program.type_vars.protocol(tp) else {
            continue;
        };
        let Some(info) = program.protocols.get(&protocol) else {
            continue;
        };
        for sig in &info.sigs {
            if sig.name != name {
                continue;
            }
            if let Some(resolved) =
                try_protocol_candidate(info.self_var, tp, sig, explicit_type_args, arg_types)
            {
                matches.push(resolved);
            }
        }
    }

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(TypeError::new(
            format!(
                "no matching overload for `{}({})`",
                name,
                display_arg_types(program, arg_types)
            ),
            span,
        )),
        _ => Err(TypeError::new(
            format!(
                "ambiguous call to `{}({})`: {} candidates match",
                name,
                display_arg_types(program, arg_types),
                matches.len()
            ),
            span,
        )),
    }
}

fn display_arg_types(program: &Program, arg_types: &[Type]) -> String {
    arg_types
        .iter()
        .map(|t| display_type(t, &program.type_vars))
        .collect::<Vec<_>>()
        .join(", ")
}

fn try_direct_candidate(
    program: &Program,
    func: &TFunc,
    explicit_type_args: &[Type],
    arg_types: &[Type],
) -> Option<ResolvedCall> {
    if func.params.len() != arg_types.len() {
        return None;
    }
    if !explicit_type_args.is_empty() && explicit_type_args.len() != func.type_params.len() {
        return None;
    }

    let arena = &program.type_vars;
    let mut ctx = UnificationContext::new();
    let mut mapping = HashMap::new();
    let mut fresh_vars = Vec::new();
    for &tp in &func.type_params {
        let protocol = arena.protocol(tp);
        let fresh = arena.fresh(&arena.name(tp), protocol.clone());
        ctx.add_flexible(fresh, protocol);
        mapping.insert(tp, Type::Var(fresh));
        fresh_vars.push(fresh);
    }

    for (&fresh, explicit) in fresh_vars.iter().zip(explicit_type_args) {
        if !ctx.unify(&Type::Var(fresh), explicit) {
            return None;
        }
    }

    let param_types: Vec<Type> = func
        .params
        .iter()
        .map(|p| substitute(&p.ty, &mapping))
        .collect();
    for (param, arg) in param_types.iter().zip(arg_types) {
        if !ctx.unify(param, arg) {
            return None;
        }
    }

    let oracle = ProgramOracle { program };
    if !ctx.verify(&fresh_vars, arena, &oracle) {
        return None;
    }

    Some(ResolvedCall {
        target: CallTarget::Direct(func.id),
        type_args: fresh_vars
            .iter()
            .map(|&v| ctx.resolve(&Type::Var(v)))
            .collect(),
        param_types: param_types.iter().map(|t| ctx.resolve(t)).collect(),
        return_type: ctx.resolve(&substitute(&func.return_type, &mapping)),
    })
}

/// A candidate signature from the protocol constraining `scope_var`, with
/// the protocol's self variable standing for `scope_var` itself. No
/// alpha-renaming: the signature has no type parameters of its own.
fn try_protocol_candidate(
    self_var: TypeVarId,
    scope_var: TypeVarId,
    sig: &ProtocolSig,
    explicit_type_args: &[Type],
    arg_types: &[Type],
) -> Option<ResolvedCall> {
    if !explicit_type_args.is_empty() {
        return None;
    }
    if sig.params.len() != arg_types.len() {
        return None;
    }

    let mapping = HashMap::from([(self_var, Type::Var(scope_var))]);
    let mut ctx = UnificationContext::new();
    let param_types: Vec<Type> = sig.params.iter().map(|p| substitute(p, &mapping)).collect();
    for (param, arg) in param_types.iter().zip(arg_types) {
        if !ctx.unify(param, arg) {
            return None;
        }
    }

    Some(ResolvedCall {
        target: CallTarget::Protocol {
            name: sig.name.clone(),
        },
        type_args: Vec::new(),
        param_types,
        return_type: substitute(&sig.return_type, &mapping),
    })
}

/// Whether a concrete type satisfies every signature a protocol requires.
pub fn protocol_satisfied(program: &Program, ty: &Type, protocol: &str) -> bool {
    if protocol == "primitive" {
        return ty.is_primitive();
    }
    let Some(info) = program.protocols.get(protocol) else {
        return false;
    };
    info.sigs.iter().all(|sig| {
        let mapping = HashMap::from([(info.self_var, ty.clone())]);
        let params: Vec<Type> = sig.params.iter().map(|p| substitute(p, &mapping)).collect();
        let ret = substitute(&sig.return_type, &mapping);
        program
            .overloads_of(&sig.name)
            .iter()
            .any(|&id| signature_matches(program, program.func(id), &params, &ret))
    })
}

/// Whether `func` can provide exactly the signature `(params) -> ret`,
/// instantiating its type parameters if it has any.
fn signature_matches(program: &Program, func: &TFunc, params: &[Type], ret: &Type) -> bool {
    if func.params.len() != params.len() {
        return false;
    }

    let arena = &program.type_vars;
    let mut ctx = UnificationContext::new();
    let mut mapping = HashMap::new();
    let mut fresh_vars = Vec::new();
    for &tp in &func.type_params {
        let protocol = arena.protocol(tp);
        let fresh = arena.fresh(&arena.name(tp), protocol.clone());
        ctx.add_flexible(fresh, protocol);
        mapping.insert(tp, Type::Var(fresh));
        fresh_vars.push(fresh);
    }

    for (fp, want) in func.params.iter().zip(params) {
        if !ctx.unify(&substitute(&fp.ty, &mapping), want) {
            return false;
        }
    }
    if !ctx.unify(&substitute(&func.return_type, &mapping), ret) {
        return false;
    }

    let oracle = ProgramOracle { program };
    ctx.verify(&fresh_vars, arena, &oracle)
}

/// Whether two functions have the same full signature (the identity used
/// for duplicate-overload detection): same arity, same type-parameter
/// count and constraints, and identical parameter and return types up to
/// renaming of type parameters.
pub fn same_signature(program: &Program, a: &TFunc, b: &TFunc) -> bool {
    if a.params.len() != b.params.len() || a.type_params.len() != b.type_params.len() {
        return false;
    }
    let arena = &program.type_vars;
    for (&ta, &tb) in a.type_params.iter().zip(&b.type_params) {
        if arena.protocol(ta) != arena.protocol(tb) {
            return false;
        }
    }
    let mapping: HashMap<TypeVarId, Type> = b
        .type_params
        .iter()
        .zip(&a.type_params)
        .map(|(&tb, &ta)| (tb, Type::Var(ta)))
        .collect();

    a.params
        .iter()
        .zip(&b.params)
        .all(|(pa, pb)| pa.ty == substitute(&pb.ty, &mapping))
        && a.return_type == substitute(&b.return_type, &mapping)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Span;
    use crate::compiler::typed_ast::TParam;
    use crate::compiler::types::{AddressSpace, StructRegistry, TypeVarArena};

    fn param(name: &str, ty: Type) -> TParam {
        TParam {
            name: name.to_string(),
            ty,
            span: Span::new(1, 1),
        }
    }

    fn defined(id: usize, name: &str, type_params: Vec<TypeVarId>, params: Vec<TParam>, ret: Type) -> TFunc {
        TFunc {
            id,
            name: name.to_string(),
            span: Span::new(1, 1),
            type_params,
            params,
            return_type: ret,
            body: None,
            native: None,
        }
    }

    fn program_with(funcs: Vec<TFunc>, type_vars: TypeVarArena) -> Program {
        let mut overloads: HashMap<String, Vec<usize>> = HashMap::new();
        for f in &funcs {
            overloads.entry(f.name.clone()).or_default().push(f.id);
        }
        Program {
            funcs,
            overloads,
            structs: StructRegistry::new(),
            protocols: HashMap::new(),
            type_vars,
        }
    }

    #[test]
    fn test_exact_overload_selected() {
        let arena = TypeVarArena::new();
        let program = program_with(
            vec![
                defined(0, "f", vec![], vec![param("x", Type::Int32)], Type::Int32),
                defined(1, "f", vec![], vec![param("x", Type::Float)], Type::Float),
            ],
            arena,
        );

        let resolved =
            resolve_call(&program, &[], "f", &[], &[Type::Float], Span::new(1, 1)).unwrap();
        assert_eq!(resolved.target, CallTarget::Direct(1));
        assert_eq!(resolved.return_type, Type::Float);
    }

    #[test]
    fn test_no_matching_overload() {
        let arena = TypeVarArena::new();
        let program = program_with(
            vec![defined(0, "f", vec![], vec![param("x", Type::Int32)], Type::Int32)],
            arena,
        );

        let err =
            resolve_call(&program, &[], "f", &[], &[Type::Bool], Span::new(1, 1)).unwrap_err();
        assert!(err.message.contains("no matching overload"));
    }

    #[test]
    fn test_generic_inference() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let program = program_with(
            vec![defined(
                0,
                "id",
                vec![t],
                vec![param("x", Type::Var(t))],
                Type::Var(t),
            )],
            arena,
        );

        let resolved =
            resolve_call(&program, &[], "id", &[], &[Type::Int32], Span::new(1, 1)).unwrap();
        assert_eq!(resolved.type_args, vec![Type::Int32]);
        assert_eq!(resolved.return_type, Type::Int32);
    }

    #[test]
    fn test_explicit_type_argument_conflict() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let program = program_with(
            vec![defined(
                0,
                "id",
                vec![t],
                vec![param("x", Type::Var(t))],
                Type::Var(t),
            )],
            arena,
        );

        // id<float>(42 : int32) has no consistent binding for T.
        let err = resolve_call(
            &program,
            &[],
            "id",
            &[Type::Float],
            &[Type::Int32],
            Span::new(1, 1),
        )
        .unwrap_err();
        assert!(err.message.contains("no matching overload"));

        let resolved = resolve_call(
            &program,
            &[],
            "id",
            &[Type::Float],
            &[Type::Float],
            Span::new(1, 1),
        )
        .unwrap();
        assert_eq!(resolved.type_args, vec![Type::Float]);
    }

    #[test]
    fn test_null_argument_against_generic_pointer() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", Some("primitive".to_string()));
        let ptr_t = Type::ptr(AddressSpace::Device, Type::Var(t));
        let program = program_with(
            vec![defined(
                0,
                "bar",
                vec![t],
                vec![param("p", ptr_t.clone()), param("q", ptr_t)],
                Type::Var(t),
            )],
            arena,
        );

        // One real pointer pins T; the null argument just has to be
        // acceptable at that parameter type.
        let real = Type::ptr(AddressSpace::Device, Type::Int32);
        let resolved = resolve_call(
            &program,
            &[],
            "bar",
            &[],
            &[real.clone(), Type::Null],
            Span::new(1, 1),
        )
        .unwrap();
        assert_eq!(resolved.type_args, vec![Type::Int32]);
        assert_eq!(resolved.return_type, Type::Int32);
        assert_eq!(resolved.param_types[1], real);

        // Two nulls leave T undetermined: rejected at verify.
        let err = resolve_call(
            &program,
            &[],
            "bar",
            &[],
            &[Type::Null, Type::Null],
            Span::new(1, 1),
        )
        .unwrap_err();
        assert!(err.message.contains("no matching overload"));
    }

    #[test]
    fn test_ambiguous_call_rejected() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let u = arena.fresh("U", None);
        let program = program_with(
            vec![
                defined(0, "f", vec![t], vec![param("x", Type::Var(t))], Type::Var(t)),
                defined(1, "f", vec![u], vec![param("x", Type::Var(u))], Type::Var(u)),
            ],
            arena,
        );

        let err =
            resolve_call(&program, &[], "f", &[], &[Type::Int32], Span::new(1, 1)).unwrap_err();
        assert!(err.message.contains("ambiguous"));
    }

    #[test]
    fn test_same_signature_up_to_renaming() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let u = arena.fresh("U", None);
        let a = defined(0, "f", vec![t], vec![param("x", Type::Var(t))], Type::Var(t));
        let b = defined(1, "f", vec![u], vec![param("y", Type::Var(u))], Type::Var(u));
        let c = defined(
            2,
            "f",
            vec![],
            vec![param("x", Type::Int32)],
            Type::Int32,
        );
        let program = program_with(vec![a, b, c], arena);

        assert!(same_signature(
            &program,
            program.func(0),
            program.func(1)
        ));
        assert!(!same_signature(
            &program,
            program.func(0),
            program.func(2)
        ));
    }
}
