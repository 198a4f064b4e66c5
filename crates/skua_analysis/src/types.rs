//! The value type system.
//!
//! Types compare structurally; a user-defined type is identified by its type
//! symbol, so two `User` types are equal exactly when they point at the same
//! struct. Printable forms need symbol names and therefore live on
//! [`SymbolTable`](crate::symbols::SymbolTable) (`type_to_string`).

use crate::symbols::SymbolId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Int,
    Float,
    Bool,
    String,
    Void,
}

impl Primitive {
    /// Everything except `string` and `void` participates in arithmetic.
    pub fn is_numeric(self) -> bool {
        !matches!(self, Primitive::String | Primitive::Void)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Primitive::Int)
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Bool => "bool",
            Primitive::String => "string",
            Primitive::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Primitive> {
        match name {
            "int" => Some(Primitive::Int),
            "float" => Some(Primitive::Float),
            "bool" => Some(Primitive::Bool),
            "string" => Some(Primitive::String),
            "void" => Some(Primitive::Void),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Type {
    Primitive(Primitive),
    /// A struct type; the payload is its type symbol.
    User(SymbolId),
    Array(Box<Type>),
    Tuple(Vec<Type>),
    Pointer(Box<Type>),
    /// Placeholder while a name has not resolved yet.
    Unresolved(String),
}

impl Type {
    pub const VOID: Type = Type::Primitive(Primitive::Void);
    pub const INT: Type = Type::Primitive(Primitive::Int);
    pub const FLOAT: Type = Type::Primitive(Primitive::Float);
    pub const BOOL: Type = Type::Primitive(Primitive::Bool);
    pub const STRING: Type = Type::Primitive(Primitive::String);

    /// The null-pointer value type, assignable to every pointer.
    pub fn null_pointer() -> Type {
        Type::Pointer(Box::new(Type::VOID))
    }

    pub fn pointer_to(pointee: Type) -> Type {
        Type::Pointer(Box::new(pointee))
    }

    pub fn array_of(element: Type) -> Type {
        Type::Array(Box::new(element))
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            Type::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_pointer(&self) -> Option<&Type> {
        match self {
            Type::Pointer(pointee) => Some(pointee),
            _ => None,
        }
    }

    pub fn as_user(&self) -> Option<SymbolId> {
        match self {
            Type::User(id) => Some(*id),
            _ => None,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::Void))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Type::Primitive(Primitive::String))
    }

    pub fn is_numeric(&self) -> bool {
        self.as_primitive().map(Primitive::is_numeric).unwrap_or(false)
    }

    pub fn is_integer(&self) -> bool {
        self.as_primitive().map(Primitive::is_integer).unwrap_or(false)
    }

    pub fn is_null_pointer(&self) -> bool {
        matches!(self, Type::Pointer(pointee) if pointee.is_void())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_predicate() {
        assert!(Type::INT.is_numeric());
        assert!(Type::FLOAT.is_numeric());
        assert!(Type::BOOL.is_numeric());
        assert!(!Type::STRING.is_numeric());
        assert!(!Type::VOID.is_numeric());
    }

    #[test]
    fn integer_predicate_is_int_only() {
        assert!(Type::INT.is_integer());
        assert!(!Type::FLOAT.is_integer());
        assert!(!Type::BOOL.is_integer());
    }

    #[test]
    fn structural_equality() {
        assert_eq!(Type::array_of(Type::INT), Type::array_of(Type::INT));
        assert_ne!(Type::array_of(Type::INT), Type::array_of(Type::FLOAT));
        assert_eq!(
            Type::Tuple(vec![Type::INT, Type::STRING]),
            Type::Tuple(vec![Type::INT, Type::STRING])
        );
        assert_ne!(
            Type::Tuple(vec![Type::INT]),
            Type::Tuple(vec![Type::INT, Type::INT])
        );
    }

    #[test]
    fn null_pointer_is_not_structurally_equal_to_other_pointers() {
        assert_ne!(Type::null_pointer(), Type::pointer_to(Type::INT));
        assert!(Type::null_pointer().is_null_pointer());
        assert!(!Type::pointer_to(Type::INT).is_null_pointer());
    }

    #[test]
    fn user_types_compare_by_symbol() {
        assert_eq!(Type::User(SymbolId(3)), Type::User(SymbolId(3)));
        assert_ne!(Type::User(SymbolId(3)), Type::User(SymbolId(4)));
    }
}
