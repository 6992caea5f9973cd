//! The simulated memory model.
//!
//! Storage is a set of [`MemoryBlock`]s: fixed-size slot sequences shared
//! via `Rc` and mutated through a `RefCell` (evaluation is single-threaded
//! by design). Every declared variable and bound parameter gets a fresh
//! block; pointers are non-owning `(block, offset)` aliases and array
//! references add a length for bounds checks. Address spaces are carried in
//! the type system only; they do not change this representation.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::compiler::types::{StructRegistry, Type};

/// One storage cell. Default initialization is per type: numbers zero,
/// booleans false, pointers and array references null.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Int(i32),
    Uint(u32),
    Float(f32),
    Double(f64),
    Bool(bool),
    Ptr(Option<Pointer>),
    ArrayRef(Option<ArrayRef>),
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Int(v) => write!(f, "{}", v),
            Slot::Uint(v) => write!(f, "{}u", v),
            Slot::Float(v) => write!(f, "{}f", v),
            Slot::Double(v) => write!(f, "{}", v),
            Slot::Bool(v) => write!(f, "{}", v),
            Slot::Ptr(None) | Slot::ArrayRef(None) => write!(f, "null"),
            Slot::Ptr(Some(p)) => write!(f, "ptr+{}", p.offset),
            Slot::ArrayRef(Some(a)) => write!(f, "ref+{}[{}]", a.ptr.offset, a.length),
        }
    }
}

/// A block of slots. Cloning the `Rc` aliases the same storage.
#[derive(Debug)]
pub struct MemoryBlock {
    slots: RefCell<Vec<Slot>>,
}

impl MemoryBlock {
    pub fn from_slots(slots: Vec<Slot>) -> Rc<Self> {
        Rc::new(Self {
            slots: RefCell::new(slots),
        })
    }

    /// A fresh block holding one default-initialized value of `ty`.
    pub fn for_type(ty: &Type, structs: &StructRegistry) -> Rc<Self> {
        let mut slots = Vec::new();
        default_slots(ty, structs, &mut slots);
        Self::from_slots(slots)
    }

    pub fn len(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy `count` slots out, starting at `offset`. Offsets are produced
    /// by the checker and the layout pass, so an out-of-range access here
    /// is an internal error, not a user trap.
    pub fn read(&self, offset: usize, count: usize) -> Vec<Slot> {
        self.slots.borrow()[offset..offset + count].to_vec()
    }

    pub fn write(&self, offset: usize, values: &[Slot]) {
        self.slots.borrow_mut()[offset..offset + values.len()].clone_from_slice(values);
    }

    pub fn snapshot(&self) -> Vec<Slot> {
        self.slots.borrow().clone()
    }
}

/// A non-owning alias into a block. Nullable at the slot level
/// (`Slot::Ptr(None)`); a `Pointer` value itself is always live.
#[derive(Debug, Clone)]
pub struct Pointer {
    pub block: Rc<MemoryBlock>,
    pub offset: usize,
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.block, &other.block) && self.offset == other.offset
    }
}

/// A bounds-carrying alias: a pointer to the first element plus an element
/// count. Every indexing operation checks against `length`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayRef {
    pub ptr: Pointer,
    pub length: usize,
}

/// Append the default value of `ty`, slot by slot.
///
/// Panics on a type with no concrete storage (a type variable or `void`):
/// the checker and monomorphiser guarantee those never reach storage
/// allocation.
pub fn default_slots(ty: &Type, structs: &StructRegistry, out: &mut Vec<Slot>) {
    match ty {
        Type::Int32 => out.push(Slot::Int(0)),
        Type::Uint32 => out.push(Slot::Uint(0)),
        Type::Float => out.push(Slot::Float(0.0)),
        Type::Double => out.push(Slot::Double(0.0)),
        Type::Bool => out.push(Slot::Bool(false)),
        Type::Ptr { .. } => out.push(Slot::Ptr(None)),
        Type::ArrayRef { .. } => out.push(Slot::ArrayRef(None)),
        Type::Struct { .. } => {
            let layout = structs.layout(ty);
            for field in &layout.fields {
                default_slots(&field.ty, structs, out);
            }
        }
        Type::Void | Type::Null | Type::Var(_) => {
            panic!("default value of a type without storage: {}", ty)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::lexer::Span;
    use crate::compiler::types::{AddressSpace, StructDef};

    #[test]
    fn test_default_slots_for_scalars() {
        let structs = StructRegistry::new();
        let block = MemoryBlock::for_type(&Type::Int32, &structs);
        assert_eq!(block.snapshot(), vec![Slot::Int(0)]);

        let block = MemoryBlock::for_type(
            &Type::ptr(AddressSpace::Device, Type::Int32),
            &structs,
        );
        assert_eq!(block.snapshot(), vec![Slot::Ptr(None)]);
    }

    #[test]
    fn test_default_slots_for_struct() {
        let mut structs = StructRegistry::new();
        structs.define(StructDef {
            name: "Foo".to_string(),
            span: Span::new(1, 1),
            type_params: vec![],
            fields: vec![
                ("x".to_string(), Type::Int32),
                ("flag".to_string(), Type::Bool),
                ("next".to_string(), Type::ptr(AddressSpace::Thread, Type::Int32)),
            ],
        });
        let ty = Type::Struct {
            name: "Foo".to_string(),
            type_args: vec![],
        };
        let block = MemoryBlock::for_type(&ty, &structs);
        assert_eq!(
            block.snapshot(),
            vec![Slot::Int(0), Slot::Bool(false), Slot::Ptr(None)]
        );
    }

    #[test]
    fn test_pointer_identity() {
        let a = MemoryBlock::from_slots(vec![Slot::Int(1), Slot::Int(2)]);
        let b = MemoryBlock::from_slots(vec![Slot::Int(1), Slot::Int(2)]);

        let p1 = Pointer {
            block: Rc::clone(&a),
            offset: 0,
        };
        let p2 = Pointer {
            block: Rc::clone(&a),
            offset: 0,
        };
        let p3 = Pointer {
            block: Rc::clone(&a),
            offset: 1,
        };
        let p4 = Pointer { block: b, offset: 0 };

        assert_eq!(p1, p2);
        assert_ne!(p1, p3);
        // Same contents, different block: not the same pointer.
        assert_ne!(p1, p4);
    }

    #[test]
    fn test_write_through_alias() {
        let block = MemoryBlock::from_slots(vec![Slot::Int(13)]);
        let alias = Rc::clone(&block);
        alias.write(0, &[Slot::Int(52)]);
        assert_eq!(block.read(0, 1), vec![Slot::Int(52)]);
    }
}
