//! Symbols and lexical scopes.
//!
//! Scopes and symbols live in two arenas owned by [`SymbolTable`]; every
//! cross-reference (parent scope, member scope, parameter list, parent
//! struct) is an index. Dropping the table drops the whole graph.
//!
//! Scope keys are mangled names for functions and plain names for everything
//! else, which is what makes overloading work: the per-base-name overload
//! sets are kept alongside the keyed map.

use std::collections::HashMap;

use crate::types::{Primitive, Type};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug)]
pub struct Scope {
    pub parent: Option<ScopeId>,
    /// Plain names, or mangled names for functions.
    pub symbols: HashMap<String, SymbolId>,
    /// Base function name -> overloads in registration order.
    pub overloads: HashMap<String, Vec<SymbolId>>,
}

#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub line: u32,
    pub column: u32,
    pub is_defined: bool,
    pub is_private: bool,
    pub is_builtin: bool,
    /// For variables: the scope the symbol was declared in. For functions:
    /// the function's own body scope (where `this` lives for methods).
    pub scope: ScopeId,
    pub kind: SymbolKind,
}

#[derive(Debug)]
pub enum SymbolKind {
    Variable(VariableData),
    Function(FunctionData),
    Type(TypeData),
}

#[derive(Debug)]
pub struct VariableData {
    pub data_type: Type,
    pub is_constant: bool,
    pub is_parameter: bool,
    pub is_struct_member: bool,
    /// The owning struct's type symbol, for members.
    pub parent_struct: Option<SymbolId>,
    pub has_default_value: bool,
    /// Slot number inside the enclosing function; -1 until assigned.
    pub local_index: i32,
}

impl VariableData {
    pub fn new(data_type: Type) -> Self {
        VariableData {
            data_type,
            is_constant: false,
            is_parameter: false,
            is_struct_member: false,
            parent_struct: None,
            has_default_value: false,
            local_index: -1,
        }
    }
}

#[derive(Debug)]
pub struct FunctionData {
    pub parameters: Vec<SymbolId>,
    pub return_types: Vec<Type>,
    pub is_struct_method: bool,
    /// Synthesized struct constructors; emitted as `<init>`.
    pub is_constructor: bool,
}

impl FunctionData {
    pub fn new() -> Self {
        FunctionData {
            parameters: Vec::new(),
            return_types: Vec::new(),
            is_struct_method: false,
            is_constructor: false,
        }
    }
}

impl Default for FunctionData {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct TypeData {
    pub member_scope: ScopeId,
    pub type_representation: Type,
}

impl Symbol {
    pub fn variable(name: impl Into<String>, line: u32, column: u32, scope: ScopeId, data: VariableData) -> Self {
        Symbol {
            name: name.into(),
            line,
            column,
            is_defined: false,
            is_private: false,
            is_builtin: false,
            scope,
            kind: SymbolKind::Variable(data),
        }
    }

    pub fn function(name: impl Into<String>, line: u32, column: u32, scope: ScopeId, data: FunctionData) -> Self {
        Symbol {
            name: name.into(),
            line,
            column,
            is_defined: false,
            is_private: false,
            is_builtin: false,
            scope,
            kind: SymbolKind::Function(data),
        }
    }

    pub fn type_symbol(name: impl Into<String>, line: u32, column: u32, scope: ScopeId, data: TypeData) -> Self {
        Symbol {
            name: name.into(),
            line,
            column,
            is_defined: false,
            is_private: false,
            is_builtin: false,
            scope,
            kind: SymbolKind::Type(data),
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, SymbolKind::Function(_))
    }

    pub fn is_type(&self) -> bool {
        matches!(self.kind, SymbolKind::Type(_))
    }

    pub fn as_variable(&self) -> Option<&VariableData> {
        match &self.kind {
            SymbolKind::Variable(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionData> {
        match &self.kind {
            SymbolKind::Function(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&TypeData> {
        match &self.kind {
            SymbolKind::Type(data) => Some(data),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    symbols: Vec<Symbol>,
    pub global_scope: ScopeId,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable {
            scopes: Vec::new(),
            symbols: Vec::new(),
            global_scope: ScopeId(0),
        };
        table.global_scope = table.new_scope(None);
        table
    }

    pub fn new_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope {
            parent,
            symbols: HashMap::new(),
            overloads: HashMap::new(),
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.0 as usize]
    }

    pub fn symbol_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.0 as usize]
    }

    /// Push a symbol into the arena without binding a scope key.
    pub fn alloc(&mut self, symbol: Symbol) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(symbol);
        id
    }

    /// Bind `id` in `scope`. Functions go under their mangled name and join
    /// the overload set of their base name. Returns the already-present
    /// symbol on key collision.
    pub fn insert(&mut self, scope: ScopeId, id: SymbolId) -> Result<(), SymbolId> {
        let symbol = self.symbol(id);
        let key = if symbol.is_function() {
            self.mangled_name(id)
        } else {
            symbol.name.clone()
        };
        let base_name = self.symbol(id).name.clone();
        let is_function = self.symbol(id).is_function();

        let scope_data = &mut self.scopes[scope.0 as usize];
        if let Some(&existing) = scope_data.symbols.get(&key) {
            return Err(existing);
        }
        scope_data.symbols.insert(key, id);
        if is_function {
            scope_data.overloads.entry(base_name).or_default().push(id);
        }
        Ok(())
    }

    /// Name lookup along the parent chain. A bare function name that only
    /// exists as an overload set yields an arbitrary overload, which is what
    /// non-call lookups expect.
    pub fn resolve(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope_data = self.scope(id);
            if let Some(&symbol) = scope_data.symbols.get(name) {
                return Some(symbol);
            }
            if let Some(overloads) = scope_data.overloads.get(name) {
                if let Some(&first) = overloads.first() {
                    return Some(first);
                }
            }
            current = scope_data.parent;
        }
        None
    }

    /// Overload resolution: the first scope up the chain that knows the base
    /// name decides. Exact parameter types win; otherwise any overload with
    /// the right arity; otherwise the call does not resolve. Implicit
    /// conversions are deliberately not consulted here.
    pub fn resolve_function_call(&self, scope: ScopeId, name: &str, args: &[Type]) -> Option<SymbolId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope_data = self.scope(id);
            if let Some(overloads) = scope_data.overloads.get(name) {
                for &candidate in overloads {
                    let data = match self.symbol(candidate).as_function() {
                        Some(data) => data,
                        None => continue,
                    };
                    if data.parameters.len() != args.len() {
                        continue;
                    }
                    let exact = data.parameters.iter().zip(args).all(|(&param, arg)| {
                        self.symbol(param)
                            .as_variable()
                            .map(|v| &v.data_type == arg)
                            .unwrap_or(false)
                    });
                    if exact {
                        return Some(candidate);
                    }
                }
                return overloads.iter().copied().find(|&candidate| {
                    self.symbol(candidate)
                        .as_function()
                        .map(|data| data.parameters.len() == args.len())
                        .unwrap_or(false)
                });
            }
            current = scope_data.parent;
        }
        None
    }

    /// True when `ancestor` is `scope` or one of its parents.
    pub fn scope_has_ancestor(&self, scope: ScopeId, ancestor: ScopeId) -> bool {
        let mut current = Some(scope);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.scope(id).parent;
        }
        false
    }

    // -- printable forms -----------------------------------------------------

    /// Canonical printable form, used in diagnostics and mangled names. The
    /// target VM represents pointer-to-primitive as a reference box, so that
    /// is its printable form; a pointer to a struct prints as the struct.
    pub fn type_to_string(&self, ty: &Type) -> String {
        match ty {
            Type::Primitive(p) => p.name().to_string(),
            Type::User(id) => self.symbol(*id).name.clone(),
            Type::Array(element) => format!("{}[]", self.type_to_string(element)),
            Type::Tuple(elements) => {
                let inner: Vec<String> = elements.iter().map(|t| self.type_to_string(t)).collect();
                format!("tuple<{}>", inner.join(", "))
            }
            Type::Pointer(pointee) => match pointee.as_ref() {
                Type::Primitive(p) => wrapper_class_name(*p).to_string(),
                other => self.type_to_string(other),
            },
            Type::Unresolved(name) => format!("unresolved<{name}>"),
        }
    }

    /// Scope key for a function: base name decorated with parameter types.
    pub fn mangled_name(&self, id: SymbolId) -> String {
        let symbol = self.symbol(id);
        let mut mangled = symbol.name.clone();
        mangled.push('_');
        if let Some(data) = symbol.as_function() {
            for &param in &data.parameters {
                match self.symbol(param).as_variable() {
                    Some(var) => mangled.push_str(&self.type_to_string(&var.data_type)),
                    None => mangled.push_str("unknown"),
                }
                mangled.push('_');
            }
        }
        mangled
    }

    /// Parameter types of a function symbol, cloned.
    pub fn parameter_types(&self, id: SymbolId) -> Vec<Type> {
        self.symbol(id)
            .as_function()
            .map(|data| {
                data.parameters
                    .iter()
                    .filter_map(|&p| self.symbol(p).as_variable().map(|v| v.data_type.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Boxed-wrapper class name the VM uses for a pointer to this primitive.
pub fn wrapper_class_name(kind: Primitive) -> &'static str {
    match kind {
        Primitive::Int => "IntReference",
        Primitive::Float => "FloatReference",
        Primitive::Bool => "BoolReference",
        Primitive::String => "StringReference",
        Primitive::Void => "VoidReference",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_function(table: &mut SymbolTable, scope: ScopeId, name: &str, params: &[Type]) -> SymbolId {
        let body = table.new_scope(Some(scope));
        let mut data = FunctionData::new();
        for (i, ty) in params.iter().enumerate() {
            let param = table.alloc(Symbol::variable(
                format!("p{i}"),
                0,
                0,
                body,
                VariableData {
                    is_parameter: true,
                    ..VariableData::new(ty.clone())
                },
            ));
            data.parameters.push(param);
        }
        data.return_types.push(Type::VOID);
        let id = table.alloc(Symbol::function(name, 0, 0, body, data));
        table.insert(scope, id).expect("no collision");
        id
    }

    #[test]
    fn resolve_walks_parent_chain() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        let inner = table.new_scope(Some(global));

        let var = table.alloc(Symbol::variable("x", 1, 0, global, VariableData::new(Type::INT)));
        table.insert(global, var).unwrap();

        assert_eq!(table.resolve(inner, "x"), Some(var));
        assert_eq!(table.resolve(inner, "missing"), None);
    }

    #[test]
    fn duplicate_plain_names_are_rejected() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        let first = table.alloc(Symbol::variable("x", 1, 0, global, VariableData::new(Type::INT)));
        table.insert(global, first).unwrap();
        let second = table.alloc(Symbol::variable("x", 2, 0, global, VariableData::new(Type::FLOAT)));
        assert_eq!(table.insert(global, second), Err(first));
    }

    #[test]
    fn mangled_names_separate_overloads() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        let by_int = add_function(&mut table, global, "f", &[Type::INT]);
        let by_float = add_function(&mut table, global, "f", &[Type::FLOAT]);

        assert_eq!(table.mangled_name(by_int), "f_int_");
        assert_eq!(table.mangled_name(by_float), "f_float_");
        assert_eq!(table.scope(global).overloads["f"].len(), 2);
    }

    #[test]
    fn same_signature_collides() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        add_function(&mut table, global, "f", &[Type::INT]);

        let body = table.new_scope(Some(global));
        let mut data = FunctionData::new();
        let param = table.alloc(Symbol::variable(
            "p0",
            0,
            0,
            body,
            VariableData {
                is_parameter: true,
                ..VariableData::new(Type::INT)
            },
        ));
        data.parameters.push(param);
        let dup = table.alloc(Symbol::function("f", 0, 0, body, data));
        assert!(table.insert(global, dup).is_err());
    }

    #[test]
    fn overload_resolution_prefers_exact_match() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        let by_int = add_function(&mut table, global, "f", &[Type::INT]);
        let by_float = add_function(&mut table, global, "f", &[Type::FLOAT]);

        assert_eq!(
            table.resolve_function_call(global, "f", &[Type::INT]),
            Some(by_int)
        );
        assert_eq!(
            table.resolve_function_call(global, "f", &[Type::FLOAT]),
            Some(by_float)
        );
        // No exact match: any overload with the right arity.
        let fallback = table.resolve_function_call(global, "f", &[Type::BOOL]);
        assert!(fallback == Some(by_int) || fallback == Some(by_float));
        // Wrong arity resolves to nothing.
        assert_eq!(table.resolve_function_call(global, "f", &[]), None);
    }

    #[test]
    fn bare_name_lookup_finds_an_overload() {
        let mut table = SymbolTable::new();
        let global = table.global_scope;
        let by_int = add_function(&mut table, global, "f", &[Type::INT]);
        add_function(&mut table, global, "f", &[Type::FLOAT]);

        // "f" is not a key (only "f_int_" and "f_float_" are), but the
        // overload set still answers.
        assert_eq!(table.resolve(global, "f"), Some(by_int));
    }

    #[test]
    fn pointer_printable_forms() {
        let table = SymbolTable::new();
        assert_eq!(table.type_to_string(&Type::pointer_to(Type::INT)), "IntReference");
        assert_eq!(table.type_to_string(&Type::pointer_to(Type::STRING)), "StringReference");
        assert_eq!(table.type_to_string(&Type::null_pointer()), "VoidReference");
        assert_eq!(table.type_to_string(&Type::array_of(Type::INT)), "int[]");
        assert_eq!(
            table.type_to_string(&Type::Tuple(vec![Type::INT, Type::BOOL])),
            "tuple<int, bool>"
        );
    }
}
