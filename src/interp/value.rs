//! Typed values and the harness-facing buffer helper.

use std::fmt;
use std::rc::Rc;

use crate::compiler::types::{AddressSpace, StructRegistry, Type};
use crate::interp::memory::{default_slots, ArrayRef, MemoryBlock, Pointer, Slot};

/// The one value representation the interpreter produces and consumes: a
/// type descriptor plus its slot payload (multiple slots for structs, none
/// for `void`).
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    pub ty: Type,
    pub slots: Vec<Slot>,
}

impl TypedValue {
    pub fn int32(value: i32) -> Self {
        Self {
            ty: Type::Int32,
            slots: vec![Slot::Int(value)],
        }
    }

    pub fn uint32(value: u32) -> Self {
        Self {
            ty: Type::Uint32,
            slots: vec![Slot::Uint(value)],
        }
    }

    pub fn float(value: f32) -> Self {
        Self {
            ty: Type::Float,
            slots: vec![Slot::Float(value)],
        }
    }

    pub fn double(value: f64) -> Self {
        Self {
            ty: Type::Double,
            slots: vec![Slot::Double(value)],
        }
    }

    pub fn bool(value: bool) -> Self {
        Self {
            ty: Type::Bool,
            slots: vec![Slot::Bool(value)],
        }
    }

    pub fn void() -> Self {
        Self {
            ty: Type::Void,
            slots: Vec::new(),
        }
    }

    /// The `null` literal as a call argument: carries no payload until
    /// resolution determines the pointer type it stands for.
    pub fn null() -> Self {
        Self {
            ty: Type::Null,
            slots: Vec::new(),
        }
    }

    pub fn ptr(ty: Type, pointer: Pointer) -> Self {
        Self {
            ty,
            slots: vec![Slot::Ptr(Some(pointer))],
        }
    }

    pub fn array_ref(ty: Type, array_ref: ArrayRef) -> Self {
        Self {
            ty,
            slots: vec![Slot::ArrayRef(Some(array_ref))],
        }
    }

    pub fn as_int32(&self) -> Option<i32> {
        match self.slots.as_slice() {
            [Slot::Int(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn as_uint32(&self) -> Option<u32> {
        match self.slots.as_slice() {
            [Slot::Uint(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self.slots.as_slice() {
            [Slot::Float(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self.slots.as_slice() {
            [Slot::Double(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.slots.as_slice() {
            [Slot::Bool(v)] => Some(*v),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        self.ty == Type::Void
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slots.as_slice() {
            [] => write!(f, "void"),
            [slot] => write!(f, "{}", slot),
            slots => {
                write!(f, "{{")?;
                for (i, slot) in slots.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", slot)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// A device-space buffer for driving entry points from the harness: build
/// it from element values, pass it as a pointer or array-reference
/// argument, and read the backing slots back after the call.
#[derive(Debug, Clone)]
pub struct Buffer {
    block: Rc<MemoryBlock>,
    elem: Type,
    length: usize,
}

impl Buffer {
    /// A buffer of `length` default-initialized elements.
    pub fn new(elem: Type, length: usize, structs: &StructRegistry) -> Self {
        let mut slots = Vec::new();
        for _ in 0..length {
            default_slots(&elem, structs, &mut slots);
        }
        Self {
            block: MemoryBlock::from_slots(slots),
            elem,
            length,
        }
    }

    pub fn from_int32s(values: &[i32]) -> Self {
        Self {
            block: MemoryBlock::from_slots(values.iter().map(|&v| Slot::Int(v)).collect()),
            elem: Type::Int32,
            length: values.len(),
        }
    }

    pub fn from_uint32s(values: &[u32]) -> Self {
        Self {
            block: MemoryBlock::from_slots(values.iter().map(|&v| Slot::Uint(v)).collect()),
            elem: Type::Uint32,
            length: values.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// A `device elem^` to the first element.
    pub fn as_ptr(&self) -> TypedValue {
        TypedValue::ptr(
            Type::ptr(AddressSpace::Device, self.elem.clone()),
            Pointer {
                block: Rc::clone(&self.block),
                offset: 0,
            },
        )
    }

    /// A `device elem[]` covering the whole buffer.
    pub fn as_array_ref(&self) -> TypedValue {
        TypedValue::array_ref(
            Type::array_ref(AddressSpace::Device, self.elem.clone()),
            ArrayRef {
                ptr: Pointer {
                    block: Rc::clone(&self.block),
                    offset: 0,
                },
                length: self.length,
            },
        )
    }

    /// The backing slots, in storage order.
    pub fn slots(&self) -> Vec<Slot> {
        self.block.snapshot()
    }

    pub fn read_int32s(&self) -> Vec<i32> {
        self.slots()
            .into_iter()
            .map(|s| match s {
                Slot::Int(v) => v,
                other => panic!("non-int32 slot in int32 buffer: {}", other),
            })
            .collect()
    }
}
