//! Semantic analysis: five passes over the parse tree sharing one
//! [`Analysis`] value and one [`ErrorReporter`].
//!
//! 1. symbol & scope collection
//! 2. default-constructor synthesis for structs
//! 3. special-method (`$toString` / `$destruct`) validation
//! 4. type checking
//! 5. use-before-definition checking
//!
//! No pass throws; everything lands in the reporter and downstream passes
//! substitute `void` placeholders where an earlier pass failed.

pub mod collect;
pub mod constructors;
pub mod defined;
pub mod diagnostics;
pub mod special;
pub mod symbols;
pub mod typecheck;
pub mod types;

use std::collections::{HashMap, HashSet};

use skua_frontend::ast::{NodeId, Program, TypeExpr, TypeExprKind};

pub use diagnostics::{Diagnostic, ErrorKind, ErrorReporter};
use symbols::{FunctionData, ScopeId, Symbol, SymbolId, SymbolTable, VariableData};
use types::{Primitive, Type};

/// Everything the semantic passes produce and code generation consumes.
#[derive(Debug)]
pub struct Analysis {
    pub table: SymbolTable,
    /// Scope-owning parse nodes (program, structs, functions, loops, branch
    /// blocks) to their scopes.
    pub scope_map: HashMap<NodeId, ScopeId>,
    /// Every expression node's resolved type; `void` doubles as the sentinel
    /// for expressions that failed to resolve.
    pub expression_types: HashMap<NodeId, Type>,
    /// Nodes at which an automatic value-to-string coercion was recognized
    /// and must be emitted.
    pub string_conversions: HashSet<NodeId>,
    /// Struct name to its synthesized constructor symbol.
    pub constructor_map: HashMap<String, SymbolId>,
    /// Call nodes to the function symbol they resolved to.
    pub resolved_calls: HashMap<NodeId, SymbolId>,
    /// Function definition nodes to their symbols.
    pub function_symbols: HashMap<NodeId, SymbolId>,
}

impl Analysis {
    fn new() -> Self {
        Analysis {
            table: SymbolTable::new(),
            scope_map: HashMap::new(),
            expression_types: HashMap::new(),
            string_conversions: HashSet::new(),
            constructor_map: HashMap::new(),
            resolved_calls: HashMap::new(),
            function_symbols: HashMap::new(),
        }
    }

    /// The recorded type of an expression node, `void` if unknown.
    pub fn expr_type(&self, id: NodeId) -> Type {
        self.expression_types.get(&id).cloned().unwrap_or(Type::VOID)
    }
}

/// Fresh analysis with built-ins registered; pass-level tests drive the
/// passes one by one against it.
#[cfg(test)]
pub(crate) fn empty_analysis() -> Analysis {
    let mut analysis = Analysis::new();
    register_builtins(&mut analysis.table);
    analysis
}

/// Run the full semantic pipeline.
pub fn analyze(program: &Program, reporter: &mut ErrorReporter) -> Analysis {
    let mut analysis = Analysis::new();
    register_builtins(&mut analysis.table);

    collect::run(program, &mut analysis, reporter);
    constructors::run(program, &mut analysis, reporter);
    special::run(program, &mut analysis, reporter);
    typecheck::run(program, &mut analysis, reporter);
    defined::run(program, &mut analysis, reporter);

    analysis
}

/// Resolve a syntactic type against a scope. `None` means some name in it did
/// not resolve to a type; the caller reports and substitutes.
pub fn resolve_type_expr(table: &SymbolTable, scope: ScopeId, ty: &TypeExpr) -> Option<Type> {
    match &ty.kind {
        TypeExprKind::Named(name) => {
            if let Some(primitive) = Primitive::from_name(name) {
                return Some(Type::Primitive(primitive));
            }
            let symbol = table.resolve(scope, name)?;
            table
                .symbol(symbol)
                .as_type()
                .map(|data| data.type_representation.clone())
        }
        TypeExprKind::Tuple(elems) => {
            let mut elements = Vec::with_capacity(elems.len());
            for elem in elems {
                elements.push(resolve_type_expr(table, scope, elem)?);
            }
            Some(Type::Tuple(elements))
        }
        TypeExprKind::Pointer(inner) => {
            Some(Type::pointer_to(resolve_type_expr(table, scope, inner)?))
        }
        TypeExprKind::Array(inner) => Some(Type::array_of(resolve_type_expr(table, scope, inner)?)),
    }
}

/// The built-in function set visible in the global scope. Single-character
/// positions (print terminators, read delimiters) are carried as `string`;
/// the type system has no `char`.
fn register_builtins(table: &mut SymbolTable) {
    let global = table.global_scope;
    let builtins: &[(&str, &[(&str, Type)], Type)] = &[
        ("println", &[("value", Type::STRING)], Type::VOID),
        ("print", &[("value", Type::STRING)], Type::VOID),
        (
            "print",
            &[("value", Type::STRING), ("end", Type::STRING)],
            Type::VOID,
        ),
        ("readline", &[], Type::STRING),
        ("read", &[], Type::STRING),
        ("read", &[("delimiter", Type::STRING)], Type::STRING),
        (
            "read",
            &[("delimiter", Type::STRING), ("max_chars", Type::INT)],
            Type::STRING,
        ),
        ("sqrt", &[("value", Type::FLOAT)], Type::FLOAT),
    ];

    for (name, params, ret) in builtins {
        let mut data = FunctionData::new();
        for (param_name, param_type) in params.iter() {
            let mut var = VariableData::new(param_type.clone());
            var.is_parameter = true;
            let mut symbol = Symbol::variable(*param_name, 0, 0, global, var);
            symbol.is_defined = true;
            symbol.is_builtin = true;
            data.parameters.push(table.alloc(symbol));
        }
        data.return_types.push(ret.clone());
        let mut symbol = Symbol::function(*name, 0, 0, global, data);
        symbol.is_defined = true;
        symbol.is_builtin = true;
        let id = table.alloc(symbol);
        // Built-in signatures are distinct by construction.
        let _ = table.insert(global, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_registered_with_overloads() {
        let mut table = SymbolTable::new();
        register_builtins(&mut table);
        let global = table.global_scope;

        assert!(table.resolve(global, "println_string_").is_some());
        assert!(table.resolve(global, "print_string_string_").is_some());
        assert!(table.resolve(global, "read_").is_some());
        assert!(table.resolve(global, "read_string_int_").is_some());
        assert!(table
            .resolve_function_call(global, "print", &[Type::STRING])
            .is_some());
        assert!(table
            .resolve_function_call(global, "sqrt", &[Type::FLOAT])
            .is_some());
    }
}
