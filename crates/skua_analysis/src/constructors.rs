//! Pass 2: default-constructor synthesis.
//!
//! Every struct gets a constructor whose parameter list is its public fields
//! in declaration order. The symbol lands in the struct's parent scope under
//! the struct's own name, so `new Point(...)` resolves like any overloaded
//! call; a user function with the same name is a redefinition.

use skua_frontend::ast::{Item, Program, StructDef};

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::symbols::{FunctionData, Symbol, SymbolKind, VariableData};
use crate::Analysis;

pub fn run(program: &Program, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    for item in &program.items {
        if let Item::Struct(def) = item {
            synthesize(def, analysis, reporter);
        }
    }
}

fn synthesize(def: &StructDef, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    let struct_scope = match analysis.scope_map.get(&def.id) {
        Some(&scope) => scope,
        None => return,
    };
    let struct_id = match analysis.table.resolve(struct_scope, &def.name) {
        Some(id) if analysis.table.symbol(id).is_type() => id,
        _ => {
            reporter.report(
                ErrorKind::UnresolvedReference,
                def.span.line,
                def.span.column,
                format!("unresolved reference to struct '{}'", def.name),
            );
            return;
        }
    };

    // Public fields, ordered by where they appear.
    let mut fields: Vec<_> = analysis
        .table
        .scope(struct_scope)
        .symbols
        .values()
        .copied()
        .filter(|&id| {
            let symbol = analysis.table.symbol(id);
            matches!(symbol.kind, SymbolKind::Variable(_)) && !symbol.is_private
        })
        .collect();
    fields.sort_by_key(|&id| {
        let symbol = analysis.table.symbol(id);
        (symbol.line, symbol.column)
    });

    let mut data = FunctionData::new();
    data.is_struct_method = true;
    data.is_constructor = true;
    for field_id in fields {
        let field = analysis.table.symbol(field_id);
        let (name, line, column, field_type, defaulted) = match field.as_variable() {
            Some(var) => (
                field.name.clone(),
                field.line,
                field.column,
                var.data_type.clone(),
                field.is_defined,
            ),
            None => continue,
        };
        let mut var = VariableData::new(field_type);
        var.is_parameter = true;
        var.has_default_value = defaulted;
        let mut param = Symbol::variable(name, line, column, struct_scope, var);
        param.is_defined = true;
        data.parameters.push(analysis.table.alloc(param));
    }
    data.return_types
        .push(crate::types::Type::User(struct_id));

    let mut symbol = Symbol::function(
        def.name.clone(),
        def.span.line,
        def.span.column,
        struct_scope,
        data,
    );
    symbol.is_defined = true;
    let ctor_id = analysis.table.alloc(symbol);
    analysis.constructor_map.insert(def.name.clone(), ctor_id);

    let parent = analysis
        .table
        .scope(struct_scope)
        .parent
        .unwrap_or(analysis.table.global_scope);
    if let Err(conflict) = analysis.table.insert(parent, ctor_id) {
        let existing = analysis.table.symbol(conflict);
        reporter.report(
            ErrorKind::Redefinition,
            def.span.line,
            def.span.column,
            format!(
                "redefinition of function '{}', previously declared at line {} column {}",
                def.name, existing.line, existing.column
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;
    use skua_frontend::parse_source;

    fn analyze_two(src: &str) -> (Analysis, ErrorReporter) {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = crate::empty_analysis();
        crate::collect::run(&parsed.program, &mut analysis, &mut reporter);
        run(&parsed.program, &mut analysis, &mut reporter);
        (analysis, reporter)
    }

    #[test]
    fn constructor_mirrors_public_fields_in_order() {
        let (analysis, reporter) =
            analyze_two("struct Point { x: int; y: float; private { hidden: bool; } }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let ctor = analysis.constructor_map["Point"];
        let data = analysis.table.symbol(ctor).as_function().unwrap();
        assert!(data.is_constructor);

        let params: Vec<(String, Type)> = data
            .parameters
            .iter()
            .map(|&p| {
                let symbol = analysis.table.symbol(p);
                (
                    symbol.name.clone(),
                    symbol.as_variable().unwrap().data_type.clone(),
                )
            })
            .collect();
        assert_eq!(
            params,
            vec![
                ("x".to_string(), Type::INT),
                ("y".to_string(), Type::FLOAT)
            ]
        );
    }

    #[test]
    fn defaulted_fields_carry_the_flag() {
        let (analysis, reporter) = analyze_two("struct Config { retries: int = 3; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let ctor = analysis.constructor_map["Config"];
        let data = analysis.table.symbol(ctor).as_function().unwrap();
        let param = analysis.table.symbol(data.parameters[0]);
        assert!(param.as_variable().unwrap().has_default_value);
    }

    #[test]
    fn constructor_collides_with_same_signature_function() {
        // The user function mangles to the same key as the synthesized
        // constructor (`Point_int_`).
        let (_, reporter) = analyze_two("fn Point(x: int) { } struct Point { x: int; }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Redefinition));
    }

    #[test]
    fn constructor_returns_the_struct_type() {
        let (analysis, reporter) = analyze_two("struct Point { x: int; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let ctor = analysis.constructor_map["Point"];
        let data = analysis.table.symbol(ctor).as_function().unwrap();
        assert!(matches!(data.return_types[0], Type::User(_)));
    }
}
