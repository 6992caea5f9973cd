//! Structural type unification over a union-find of type variables.
//!
//! A [`UnificationContext`] is a scratch object: one is created per
//! unification or overload-resolution attempt, and its bindings become
//! durable only when the caller reads resolved types out of a verified
//! context (the commit step). A failed attempt is simply dropped.
//!
//! Variables come in two flavors within a context:
//!
//! - *flexible* variables are registered with [`add_flexible`] and may bind
//!   to anything (these are the alpha-renamed copies of a candidate's type
//!   parameters during overload resolution);
//! - every other variable is *rigid*: it stands for an opaque type (the
//!   enclosing function's own type parameter) and unifies only with itself.
//!
//! The `null` literal type unifies with any pointer or array-reference type
//! and with any unbound flexible variable, recording a null obligation on
//! the variable; `verify` then insists that whatever the variable resolved
//! to accepts null. Unification is symmetric: exploration order never
//! changes the accept/reject outcome for a pair.
//!
//! [`add_flexible`]: UnificationContext::add_flexible

use std::collections::{HashMap, HashSet};

use crate::compiler::types::{Type, TypeVarArena, TypeVarId};

/// Answers "does concrete type `ty` satisfy protocol `protocol`?" during
/// `verify`. The built-in `primitive` protocol is handled internally; this
/// trait covers declared protocols, which need the program's overload sets.
pub trait ProtocolOracle {
    fn satisfies(&self, ty: &Type, protocol: &str) -> bool;
}

/// Oracle for contexts where no declared protocol can occur (plain equality
/// checks between already-checked types).
pub struct NoProtocols;

impl ProtocolOracle for NoProtocols {
    fn satisfies(&self, _ty: &Type, _protocol: &str) -> bool {
        false
    }
}

/// A union-find partition over type variables plus a binding from each
/// representative to the type it resolved to.
#[derive(Debug, Default)]
pub struct UnificationContext {
    parent: HashMap<TypeVarId, TypeVarId>,
    bindings: HashMap<TypeVarId, Type>,
    flexible: HashMap<TypeVarId, Option<String>>,
    null_obligations: HashSet<TypeVarId>,
}

impl UnificationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a variable that may bind during this attempt, with its
    /// protocol constraint (checked at `verify` time).
    pub fn add_flexible(&mut self, id: TypeVarId, protocol: Option<String>) {
        self.flexible.insert(id, protocol);
    }

    fn is_flexible(&self, id: TypeVarId) -> bool {
        self.flexible.contains_key(&id)
    }

    /// The representative of a variable's equivalence class. Idempotent:
    /// `find(find(x)) == find(x)`.
    pub fn find(&self, mut id: TypeVarId) -> TypeVarId {
        while let Some(&next) = self.parent.get(&id) {
            id = next;
        }
        id
    }

    /// One step of resolution: a variable becomes its representative's
    /// binding if there is one, otherwise the representative itself.
    fn normalize(&self, ty: &Type) -> Type {
        if let Type::Var(id) = ty {
            let rep = self.find(*id);
            if let Some(bound) = self.bindings.get(&rep) {
                return bound.clone();
            }
            return Type::Var(rep);
        }
        ty.clone()
    }

    /// Fully resolve a type: chase every variable through the union-find
    /// and its binding. Unbound variables stay as their representative.
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(id) => {
                let rep = self.find(*id);
                match self.bindings.get(&rep) {
                    Some(bound) => self.resolve(bound),
                    None => Type::Var(rep),
                }
            }
            Type::Ptr { space, elem } => Type::ptr(*space, self.resolve(elem)),
            Type::ArrayRef { space, elem } => Type::array_ref(*space, self.resolve(elem)),
            Type::Struct { name, type_args } => Type::Struct {
                name: name.clone(),
                type_args: type_args.iter().map(|t| self.resolve(t)).collect(),
            },
            _ => ty.clone(),
        }
    }

    /// Attempt to make `a` and `b` structurally equal, binding flexible
    /// variables as needed. Returns whether unification succeeded; bindings
    /// made during a failed attempt are only meaningful if the caller drops
    /// the whole context, which it should.
    pub fn unify(&mut self, a: &Type, b: &Type) -> bool {
        let a = self.normalize(a);
        let b = self.normalize(b);

        match (&a, &b) {
            (Type::Var(x), Type::Var(y)) if x == y => true,
            (Type::Var(x), Type::Var(y)) if self.is_flexible(*x) && self.is_flexible(*y) => {
                self.union(*x, *y);
                true
            }
            (Type::Var(x), other) if self.is_flexible(*x) => self.bind(*x, other),
            (other, Type::Var(y)) if self.is_flexible(*y) => self.bind(*y, other),
            // Two distinct rigid variables, or a rigid variable against a
            // concrete type: rigid variables are opaque.
            (Type::Var(_), _) | (_, Type::Var(_)) => false,
            (Type::Null, Type::Null) => true,
            (Type::Null, other) | (other, Type::Null) => other.accepts_null(),
            (
                Type::Ptr { space: s1, elem: e1 },
                Type::Ptr { space: s2, elem: e2 },
            ) => s1 == s2 && self.unify(e1, e2),
            (
                Type::ArrayRef { space: s1, elem: e1 },
                Type::ArrayRef { space: s2, elem: e2 },
            ) => s1 == s2 && self.unify(e1, e2),
            (
                Type::Struct {
                    name: n1,
                    type_args: a1,
                },
                Type::Struct {
                    name: n2,
                    type_args: a2,
                },
            ) => {
                if n1 != n2 || a1.len() != a2.len() {
                    return false;
                }
                let pairs: Vec<(Type, Type)> =
                    a1.iter().cloned().zip(a2.iter().cloned()).collect();
                pairs.iter().all(|(x, y)| self.unify(x, y))
            }
            _ => a == b,
        }
    }

    fn union(&mut self, x: TypeVarId, y: TypeVarId) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx != ry {
            self.parent.insert(rx, ry);
        }
    }

    fn bind(&mut self, var: TypeVarId, ty: &Type) -> bool {
        let rep = self.find(var);
        if let Type::Null = ty {
            // Null does not pin the variable down; it only obligates
            // whatever the variable eventually resolves to.
            self.null_obligations.insert(rep);
            return true;
        }
        if self.occurs(rep, ty) {
            return false;
        }
        self.bindings.insert(rep, ty.clone());
        true
    }

    /// Occurs check: binding `rep` to a type containing `rep` would make
    /// `find` cyclic.
    fn occurs(&self, rep: TypeVarId, ty: &Type) -> bool {
        match ty {
            Type::Var(id) => self.find(*id) == rep,
            Type::Ptr { elem, .. } | Type::ArrayRef { elem, .. } => self.occurs(rep, elem),
            Type::Struct { type_args, .. } => type_args.iter().any(|t| self.occurs(rep, t)),
            _ => false,
        }
    }

    fn has_null_obligation(&self, rep: TypeVarId) -> bool {
        self.null_obligations.iter().any(|id| self.find(*id) == rep)
    }

    /// Confirm that every variable in `required` resolved to a usable type
    /// consistent with its constraints. Unification steps may all succeed
    /// and the attempt still be rejected here — e.g. a variable that only
    /// ever unified with `null`.
    pub fn verify(
        &self,
        required: &[TypeVarId],
        arena: &TypeVarArena,
        oracle: &dyn ProtocolOracle,
    ) -> bool {
        for &var in required {
            let rep = self.find(var);
            let resolved = self.resolve(&Type::Var(rep));

            // Unbound, or bound to something containing an unbound flexible
            // variable: the call does not determine this type.
            if self.contains_unbound_flexible(&resolved) {
                return false;
            }

            if self.has_null_obligation(rep) && !resolved.accepts_null() {
                return false;
            }

            if let Some(protocol) = self.flexible.get(&var).cloned().flatten()
                && !self.satisfies(&resolved, &protocol, arena, oracle)
            {
                return false;
            }
        }
        true
    }

    fn contains_unbound_flexible(&self, ty: &Type) -> bool {
        match ty {
            Type::Var(id) => self.is_flexible(self.find(*id)) || self.is_flexible(*id),
            Type::Ptr { elem, .. } | Type::ArrayRef { elem, .. } => {
                self.contains_unbound_flexible(elem)
            }
            Type::Struct { type_args, .. } => {
                type_args.iter().any(|t| self.contains_unbound_flexible(t))
            }
            _ => false,
        }
    }

    fn satisfies(
        &self,
        ty: &Type,
        protocol: &str,
        arena: &TypeVarArena,
        oracle: &dyn ProtocolOracle,
    ) -> bool {
        // A rigid variable satisfies a protocol iff its own declared
        // constraint is that protocol.
        if let Type::Var(id) = ty {
            return arena.protocol(*id).as_deref() == Some(protocol);
        }
        if protocol == "primitive" {
            return ty.is_primitive();
        }
        oracle.satisfies(ty, protocol)
    }
}

/// Structural equality via unification in a fresh context: `Some` with the
/// context on success (the caller can read resolved types out of it), or
/// `None` on definite failure. No variables are registered as flexible
/// here, so there is nothing to `verify`; a caller that adds flexible
/// variables to the returned context must verify it itself.
pub fn equals(a: &Type, b: &Type) -> Option<UnificationContext> {
    let mut ctx = UnificationContext::new();
    if ctx.unify(a, b) { Some(ctx) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::types::AddressSpace;

    fn device_ptr(elem: Type) -> Type {
        Type::ptr(AddressSpace::Device, elem)
    }

    #[test]
    fn test_identical_concrete_types_unify() {
        assert!(equals(&Type::Int32, &Type::Int32).is_some());
        assert!(equals(&device_ptr(Type::Int32), &device_ptr(Type::Int32)).is_some());
        assert!(
            equals(
                &Type::array_ref(AddressSpace::Thread, Type::Float),
                &Type::array_ref(AddressSpace::Thread, Type::Float),
            )
            .is_some()
        );
    }

    #[test]
    fn test_different_concrete_types_fail() {
        assert!(equals(&Type::Int32, &Type::Uint32).is_none());
        assert!(equals(&Type::Int32, &Type::Float).is_none());
        assert!(equals(&device_ptr(Type::Int32), &device_ptr(Type::Float)).is_none());
        // Address spaces are part of the type.
        assert!(
            equals(
                &device_ptr(Type::Int32),
                &Type::ptr(AddressSpace::Thread, Type::Int32),
            )
            .is_none()
        );
        // Pointer vs array reference of the same element.
        assert!(
            equals(
                &device_ptr(Type::Int32),
                &Type::array_ref(AddressSpace::Device, Type::Int32),
            )
            .is_none()
        );
    }

    #[test]
    fn test_flexible_var_binds() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        assert!(ctx.unify(&Type::Var(t), &Type::Int32));
        assert_eq!(ctx.resolve(&Type::Var(t)), Type::Int32);
        assert!(ctx.verify(&[t], &arena, &NoProtocols));
    }

    #[test]
    fn test_conflicting_bindings_fail() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        assert!(ctx.unify(&Type::Var(t), &Type::Int32));
        assert!(!ctx.unify(&Type::Var(t), &Type::Float));
    }

    #[test]
    fn test_rigid_var_is_opaque() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let u = arena.fresh("U", None);

        let mut ctx = UnificationContext::new();
        // Not registered as flexible: stands for an opaque type.
        assert!(ctx.unify(&Type::Var(t), &Type::Var(t)));
        assert!(!ctx.unify(&Type::Var(t), &Type::Var(u)));
        assert!(!ctx.unify(&Type::Var(t), &Type::Int32));
        assert!(!ctx.unify(&Type::Int32, &Type::Var(t)));
    }

    #[test]
    fn test_flexible_binds_to_rigid() {
        let arena = TypeVarArena::new();
        let rigid = arena.fresh("T", None);
        let fresh = arena.fresh("T'", None);

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(fresh, None);
        assert!(ctx.unify(&Type::Var(fresh), &Type::Var(rigid)));
        assert_eq!(ctx.resolve(&Type::Var(fresh)), Type::Var(rigid));
        assert!(ctx.verify(&[fresh], &arena, &NoProtocols));
    }

    #[test]
    fn test_null_unifies_with_pointers_only() {
        assert!(equals(&Type::Null, &device_ptr(Type::Int32)).is_some());
        assert!(equals(&device_ptr(Type::Int32), &Type::Null).is_some());
        assert!(
            equals(&Type::Null, &Type::array_ref(AddressSpace::Device, Type::Int32)).is_some()
        );
        assert!(equals(&Type::Null, &Type::Int32).is_none());
        assert!(equals(&Type::Int32, &Type::Null).is_none());
        assert!(equals(&Type::Null, &Type::Null).is_some());
    }

    #[test]
    fn test_null_order_independence() {
        // For any (null, variable, pointer) pair ordering, the outcome is
        // the same: binding the variable and accepting null commute.
        let ptr = device_ptr(Type::Int32);

        for order in 0..2 {
            let arena = TypeVarArena::new();
            let t = arena.fresh("T", None);
            let var_ptr = device_ptr(Type::Var(t));

            let mut ctx = UnificationContext::new();
            ctx.add_flexible(t, None);
            if order == 0 {
                assert!(ctx.unify(&var_ptr, &ptr));
                assert!(ctx.unify(&var_ptr, &Type::Null));
            } else {
                assert!(ctx.unify(&var_ptr, &Type::Null));
                assert!(ctx.unify(&var_ptr, &ptr));
            }
            assert!(ctx.verify(&[t], &arena, &NoProtocols));
            assert_eq!(ctx.resolve(&Type::Var(t)), Type::Int32);
        }
    }

    #[test]
    fn test_null_obligation_on_bare_variable() {
        // T unified against null and then against a pointer type: fine.
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        assert!(ctx.unify(&Type::Var(t), &Type::Null));
        assert!(ctx.unify(&Type::Var(t), &device_ptr(Type::Int32)));
        assert!(ctx.verify(&[t], &arena, &NoProtocols));

        // T unified against null and then against int32: unify steps pass
        // but verify rejects, because int32 does not accept null.
        let t2 = arena.fresh("T", None);
        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t2, None);
        assert!(ctx.unify(&Type::Var(t2), &Type::Null));
        assert!(ctx.unify(&Type::Var(t2), &Type::Int32));
        assert!(!ctx.verify(&[t2], &arena, &NoProtocols));
    }

    #[test]
    fn test_unbound_variable_fails_verify() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        // Only ever saw null: nothing determines T.
        assert!(ctx.unify(&Type::Var(t), &Type::Null));
        assert!(!ctx.verify(&[t], &arena, &NoProtocols));
    }

    #[test]
    fn test_union_of_two_flexible_vars() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let u = arena.fresh("U", None);

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        ctx.add_flexible(u, None);
        assert!(ctx.unify(&Type::Var(t), &Type::Var(u)));
        assert!(ctx.unify(&Type::Var(u), &Type::Uint32));
        assert_eq!(ctx.resolve(&Type::Var(t)), Type::Uint32);
        assert!(ctx.verify(&[t, u], &arena, &NoProtocols));
    }

    #[test]
    fn test_occurs_check() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);
        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        assert!(!ctx.unify(&Type::Var(t), &device_ptr(Type::Var(t))));
    }

    #[test]
    fn test_primitive_protocol() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", Some("primitive".to_string()));

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, Some("primitive".to_string()));
        assert!(ctx.unify(&Type::Var(t), &Type::Int32));
        assert!(ctx.verify(&[t], &arena, &NoProtocols));

        let u = arena.fresh("U", Some("primitive".to_string()));
        let mut ctx = UnificationContext::new();
        ctx.add_flexible(u, Some("primitive".to_string()));
        let foo = Type::Struct {
            name: "Foo".to_string(),
            type_args: vec![],
        };
        assert!(ctx.unify(&Type::Var(u), &foo));
        assert!(!ctx.verify(&[u], &arena, &NoProtocols));
    }

    #[test]
    fn test_struct_unification() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);

        let box_var = Type::Struct {
            name: "Box".to_string(),
            type_args: vec![Type::Var(t)],
        };
        let box_int = Type::Struct {
            name: "Box".to_string(),
            type_args: vec![Type::Int32],
        };
        let other = Type::Struct {
            name: "Crate".to_string(),
            type_args: vec![Type::Int32],
        };

        let mut ctx = UnificationContext::new();
        ctx.add_flexible(t, None);
        assert!(ctx.unify(&box_var, &box_int));
        assert_eq!(ctx.resolve(&Type::Var(t)), Type::Int32);
        assert!(!ctx.unify(&box_int, &other));
    }
}
