//! Type definitions for the shale type system.
//!
//! Types are a closed sum. Struct types are nominal: `Type::Struct` carries
//! only the name and type arguments, and all layout questions (field types,
//! offsets, storage size) go through the [`StructRegistry`]. Type variables
//! are arena indices assigned at declaration time; the arena maps an id back
//! to its declared name and protocol constraint.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::compiler::lexer::Span;

/// A unique identifier for a type variable.
pub type TypeVarId = u32;

/// Address space annotation on pointer and array-reference types. Carried
/// through the type system; the interpreter's block/offset representation is
/// the same for all spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Thread,
    Threadgroup,
    Device,
    Constant,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Thread => write!(f, "thread"),
            AddressSpace::Threadgroup => write!(f, "threadgroup"),
            AddressSpace::Device => write!(f, "device"),
            AddressSpace::Constant => write!(f, "constant"),
        }
    }
}

/// Core type representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// 32-bit signed integer: `int32` / `int`
    Int32,
    /// 32-bit unsigned integer: `uint32` / `uint`
    Uint32,
    /// 32-bit IEEE 754: `float`
    Float,
    /// 64-bit IEEE 754: `double`
    Double,
    /// Boolean: `bool`
    Bool,
    /// Function-return-only type: `void`
    Void,
    /// The type of the `null` literal. Unifies with any pointer or
    /// array-reference type; never the type of a storage location.
    Null,
    /// Pointer: `space T^`
    Ptr {
        space: AddressSpace,
        elem: Box<Type>,
    },
    /// Array reference: `space T[]` — a (pointer, length) pair.
    ArrayRef {
        space: AddressSpace,
        elem: Box<Type>,
    },
    /// Nominal struct type, possibly generic: `Foo`, `Box<int32>`.
    Struct { name: String, type_args: Vec<Type> },
    /// A type variable (generic parameter or protocol self type).
    Var(TypeVarId),
}

impl Type {
    pub fn ptr(space: AddressSpace, elem: Type) -> Type {
        Type::Ptr {
            space,
            elem: Box::new(elem),
        }
    }

    pub fn array_ref(space: AddressSpace, elem: Type) -> Type {
        Type::ArrayRef {
            space,
            elem: Box::new(elem),
        }
    }

    /// Whether `null` is a valid value of this type.
    pub fn accepts_null(&self) -> bool {
        matches!(self, Type::Ptr { .. } | Type::ArrayRef { .. })
    }

    /// Whether this type satisfies the built-in `primitive` protocol:
    /// scalars and pointers, but not structs.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Type::Int32
                | Type::Uint32
                | Type::Float
                | Type::Double
                | Type::Bool
                | Type::Ptr { .. }
                | Type::ArrayRef { .. }
        )
    }

    /// Whether this type contains any type variables.
    pub fn contains_var(&self) -> bool {
        match self {
            Type::Var(_) => true,
            Type::Ptr { elem, .. } | Type::ArrayRef { elem, .. } => elem.contains_var(),
            Type::Struct { type_args, .. } => type_args.iter().any(|t| t.contains_var()),
            _ => false,
        }
    }

    /// A concrete type can back a storage location: no free type variables
    /// and not the null literal type.
    pub fn is_concrete(&self) -> bool {
        match self {
            Type::Null | Type::Var(_) => false,
            Type::Ptr { elem, .. } | Type::ArrayRef { elem, .. } => elem.is_concrete(),
            Type::Struct { type_args, .. } => type_args.iter().all(|t| t.is_concrete()),
            _ => true,
        }
    }

    /// Storage size in slots. Scalars, pointers, and array references take
    /// one slot; structs take the sum of their field sizes.
    ///
    /// Panics on non-concrete types: by the time storage is allocated, the
    /// checker and monomorphiser have substituted everything.
    pub fn size(&self, structs: &StructRegistry) -> usize {
        match self {
            Type::Int32 | Type::Uint32 | Type::Float | Type::Double | Type::Bool => 1,
            Type::Ptr { .. } | Type::ArrayRef { .. } => 1,
            Type::Void => 0,
            Type::Struct { .. } => {
                let layout = structs.layout(self);
                layout
                    .size
                    .unwrap_or_else(|| panic!("un-laid-out struct type: {}", self))
            }
            Type::Null | Type::Var(_) => panic!("storage size of non-concrete type: {}", self),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int32 => write!(f, "int32"),
            Type::Uint32 => write!(f, "uint32"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Bool => write!(f, "bool"),
            Type::Void => write!(f, "void"),
            Type::Null => write!(f, "null"),
            Type::Ptr { space, elem } => write!(f, "{} {}^", space, elem),
            Type::ArrayRef { space, elem } => write!(f, "{} {}[]", space, elem),
            Type::Struct { name, type_args } => {
                write!(f, "{}", name)?;
                if !type_args.is_empty() {
                    write!(f, "<")?;
                    for (i, arg) in type_args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", arg)?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Type::Var(id) => write!(f, "T{}", id),
        }
    }
}

/// Apply a type-variable substitution.
pub fn substitute(ty: &Type, map: &HashMap<TypeVarId, Type>) -> Type {
    match ty {
        Type::Var(id) => map.get(id).cloned().unwrap_or_else(|| ty.clone()),
        Type::Ptr { space, elem } => Type::ptr(*space, substitute(elem, map)),
        Type::ArrayRef { space, elem } => Type::array_ref(*space, substitute(elem, map)),
        Type::Struct { name, type_args } => Type::Struct {
            name: name.clone(),
            type_args: type_args.iter().map(|t| substitute(t, map)).collect(),
        },
        _ => ty.clone(),
    }
}

/// Declared information about a type variable.
#[derive(Debug, Clone)]
pub struct TypeVarInfo {
    pub name: String,
    /// Protocol constraint, e.g. `T:primitive`.
    pub protocol: Option<String>,
}

/// Arena of type variables. Every generic parameter and protocol self type
/// gets a stable id here at declaration time; overload resolution mints
/// fresh ids per attempt (alpha renaming) through the same arena.
///
/// Interior mutability keeps resolution usable behind a shared `&Program`.
#[derive(Debug, Default)]
pub struct TypeVarArena {
    vars: RefCell<Vec<TypeVarInfo>>,
}

impl TypeVarArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&self, name: &str, protocol: Option<String>) -> TypeVarId {
        let mut vars = self.vars.borrow_mut();
        let id = vars.len() as TypeVarId;
        vars.push(TypeVarInfo {
            name: name.to_string(),
            protocol,
        });
        id
    }

    pub fn info(&self, id: TypeVarId) -> TypeVarInfo {
        self.vars.borrow()[id as usize].clone()
    }

    pub fn name(&self, id: TypeVarId) -> String {
        self.vars.borrow()[id as usize].name.clone()
    }

    pub fn protocol(&self, id: TypeVarId) -> Option<String> {
        self.vars.borrow()[id as usize].protocol.clone()
    }
}

/// Render a type using the declared names of its type variables.
pub fn display_type(ty: &Type, vars: &TypeVarArena) -> String {
    match ty {
        Type::Var(id) => vars.name(*id),
        Type::Ptr { space, elem } => format!("{} {}^", space, display_type(elem, vars)),
        Type::ArrayRef { space, elem } => format!("{} {}[]", space, display_type(elem, vars)),
        Type::Struct { name, type_args } if !type_args.is_empty() => {
            let args = type_args
                .iter()
                .map(|t| display_type(t, vars))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{}<{}>", name, args)
        }
        _ => ty.to_string(),
    }
}

/// A struct definition: field types may reference the struct's own type
/// parameters.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub name: String,
    pub span: Span,
    pub type_params: Vec<TypeVarId>,
    pub fields: Vec<(String, Type)>,
}

/// A field of an instantiated struct. `offset` is `None` while any type
/// argument is still a type variable; layout happens once the arguments are
/// concrete.
#[derive(Debug, Clone)]
pub struct StructField {
    pub name: String,
    pub ty: Type,
    pub offset: Option<usize>,
}

/// A struct instantiated at particular type arguments.
#[derive(Debug, Clone)]
pub struct StructLayout {
    pub name: String,
    pub type_args: Vec<Type>,
    pub fields: Vec<StructField>,
    /// Total storage size in slots; `None` until the layout is concrete.
    pub size: Option<usize>,
}

impl StructLayout {
    pub fn field(&self, name: &str) -> Option<&StructField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Registry of struct definitions plus a memoized layout per (name, type
/// arguments) instantiation.
#[derive(Debug, Default)]
pub struct StructRegistry {
    defs: HashMap<String, StructDef>,
    layouts: RefCell<HashMap<Type, Rc<StructLayout>>>,
}

impl StructRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, def: StructDef) {
        self.defs.insert(def.name.clone(), def);
    }

    pub fn def(&self, name: &str) -> Option<&StructDef> {
        self.defs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    /// The layout of a struct type. Instantiates and memoizes on first use.
    ///
    /// Panics if `ty` is not a struct type or names an unknown struct; the
    /// checker validates both before anything asks for a layout.
    pub fn layout(&self, ty: &Type) -> Rc<StructLayout> {
        if let Some(layout) = self.layouts.borrow().get(ty) {
            return Rc::clone(layout);
        }

        let Type::Struct { name, type_args } = ty else {
            panic!("layout of non-struct type: {}", ty);
        };
        let def = self
            .defs
            .get(name)
            .unwrap_or_else(|| panic!("layout of unknown struct: {}", name))
            .clone();

        let map: HashMap<TypeVarId, Type> = def
            .type_params
            .iter()
            .copied()
            .zip(type_args.iter().cloned())
            .collect();

        let concrete = type_args.iter().all(|t| t.is_concrete());
        let mut fields = Vec::with_capacity(def.fields.len());
        let mut offset = 0usize;
        for (fname, fty) in &def.fields {
            let fty = substitute(fty, &map);
            if concrete {
                let size = fty.size(self);
                fields.push(StructField {
                    name: fname.clone(),
                    ty: fty,
                    offset: Some(offset),
                });
                offset += size;
            } else {
                fields.push(StructField {
                    name: fname.clone(),
                    ty: fty,
                    offset: None,
                });
            }
        }

        let layout = Rc::new(StructLayout {
            name: name.clone(),
            type_args: type_args.clone(),
            fields,
            size: concrete.then_some(offset),
        });
        self.layouts
            .borrow_mut()
            .insert(ty.clone(), Rc::clone(&layout));
        layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display() {
        assert_eq!(Type::Int32.to_string(), "int32");
        assert_eq!(Type::Uint32.to_string(), "uint32");
        assert_eq!(
            Type::ptr(AddressSpace::Device, Type::Int32).to_string(),
            "device int32^"
        );
        assert_eq!(
            Type::array_ref(AddressSpace::Thread, Type::Float).to_string(),
            "thread float[]"
        );
        assert_eq!(
            Type::Struct {
                name: "Box".to_string(),
                type_args: vec![Type::Int32],
            }
            .to_string(),
            "Box<int32>"
        );
    }

    #[test]
    fn test_accepts_null() {
        assert!(Type::ptr(AddressSpace::Device, Type::Int32).accepts_null());
        assert!(Type::array_ref(AddressSpace::Device, Type::Int32).accepts_null());
        assert!(!Type::Int32.accepts_null());
        assert!(!Type::Bool.accepts_null());
    }

    #[test]
    fn test_substitute() {
        let mut map = HashMap::new();
        map.insert(0, Type::Int32);
        let ty = Type::ptr(AddressSpace::Device, Type::Var(0));
        assert_eq!(
            substitute(&ty, &map),
            Type::ptr(AddressSpace::Device, Type::Int32)
        );
    }

    #[test]
    fn test_struct_layout() {
        let mut registry = StructRegistry::new();
        registry.define(StructDef {
            name: "Foo".to_string(),
            span: Span::new(1, 1),
            type_params: vec![],
            fields: vec![
                ("x".to_string(), Type::Int32),
                ("y".to_string(), Type::Int32),
            ],
        });

        let ty = Type::Struct {
            name: "Foo".to_string(),
            type_args: vec![],
        };
        let layout = registry.layout(&ty);
        assert_eq!(layout.size, Some(2));
        assert_eq!(layout.field("x").unwrap().offset, Some(0));
        assert_eq!(layout.field("y").unwrap().offset, Some(1));
        assert_eq!(ty.size(&registry), 2);
    }

    #[test]
    fn test_generic_struct_layout() {
        let arena = TypeVarArena::new();
        let t = arena.fresh("T", None);

        let mut registry = StructRegistry::new();
        registry.define(StructDef {
            name: "Pair".to_string(),
            span: Span::new(1, 1),
            type_params: vec![t],
            fields: vec![
                ("first".to_string(), Type::Var(t)),
                ("second".to_string(), Type::Var(t)),
            ],
        });

        // Instantiated at a concrete argument: laid out.
        let concrete = Type::Struct {
            name: "Pair".to_string(),
            type_args: vec![Type::Int32],
        };
        let layout = registry.layout(&concrete);
        assert_eq!(layout.size, Some(2));
        assert_eq!(layout.field("second").unwrap().ty, Type::Int32);
        assert_eq!(layout.field("second").unwrap().offset, Some(1));

        // Still generic: fields substituted but not laid out.
        let open = Type::Struct {
            name: "Pair".to_string(),
            type_args: vec![Type::Var(t)],
        };
        let layout = registry.layout(&open);
        assert_eq!(layout.size, None);
        assert_eq!(layout.field("first").unwrap().offset, None);
    }

    #[test]
    fn test_nested_struct_layout() {
        let mut registry = StructRegistry::new();
        registry.define(StructDef {
            name: "Inner".to_string(),
            span: Span::new(1, 1),
            type_params: vec![],
            fields: vec![
                ("a".to_string(), Type::Int32),
                ("b".to_string(), Type::Int32),
            ],
        });
        registry.define(StructDef {
            name: "Outer".to_string(),
            span: Span::new(2, 1),
            type_params: vec![],
            fields: vec![
                (
                    "inner".to_string(),
                    Type::Struct {
                        name: "Inner".to_string(),
                        type_args: vec![],
                    },
                ),
                ("c".to_string(), Type::Bool),
            ],
        });

        let ty = Type::Struct {
            name: "Outer".to_string(),
            type_args: vec![],
        };
        let layout = registry.layout(&ty);
        assert_eq!(layout.size, Some(3));
        assert_eq!(layout.field("c").unwrap().offset, Some(2));
    }
}
