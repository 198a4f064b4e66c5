//! Pass 3: special-method validation.
//!
//! Inside a struct, `$`-prefixed names are reserved: `$toString` must be a
//! zero-parameter method returning `string`, `$destruct` a zero-parameter
//! method returning `void`, and nothing else is allowed. A struct without
//! `$toString` gets a stub whose behavior is the VM's default `toString`,
//! emitted as a single virtual call at conversion sites.

use skua_frontend::ast::{Item, Program, StructDef};

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::symbols::{FunctionData, ScopeId, Symbol, SymbolId};
use crate::types::Type;
use crate::Analysis;

pub fn run(program: &Program, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    for item in &program.items {
        if let Item::Struct(def) = item {
            validate(def, analysis, reporter);
        }
    }
}

fn validate(def: &StructDef, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    let scope = match analysis.scope_map.get(&def.id) {
        Some(&scope) => scope,
        None => return,
    };
    let line = def.name_span.line;
    let column = def.name_span.column;

    // Reject unsupported `$` names first.
    let mut special: Vec<String> = analysis
        .table
        .scope(scope)
        .overloads
        .keys()
        .filter(|name| name.starts_with('$'))
        .cloned()
        .collect();
    special.sort();
    for name in special {
        if name != "$toString" && name != "$destruct" {
            reporter.report(
                ErrorKind::UnresolvedReference,
                line,
                column,
                format!("unsupported special method '{}' in struct {}", name, def.name),
            );
        }
    }

    match resolve_local(analysis, scope, "$toString") {
        Some(id) => {
            let data = match analysis.table.symbol(id).as_function() {
                Some(data) => data,
                None => return,
            };
            if !data.parameters.is_empty() {
                reporter.report(
                    ErrorKind::TypeMismatch,
                    line,
                    column,
                    format!("$toString in struct {} must take no parameters", def.name),
                );
            }
            if data.return_types.len() != 1 || data.return_types[0] != Type::STRING {
                reporter.report(
                    ErrorKind::TypeMismatch,
                    line,
                    column,
                    format!("$toString in struct {} must return string", def.name),
                );
            }
        }
        None => add_default_to_string(analysis, scope),
    }

    if let Some(id) = resolve_local(analysis, scope, "$destruct") {
        let data = match analysis.table.symbol(id).as_function() {
            Some(data) => data,
            None => return,
        };
        if !data.parameters.is_empty() {
            reporter.report(
                ErrorKind::TypeMismatch,
                line,
                column,
                format!("$destruct in struct {} must take no parameters", def.name),
            );
        }
        if data.return_types.len() != 1 || data.return_types[0] != Type::VOID {
            reporter.report(
                ErrorKind::TypeMismatch,
                line,
                column,
                format!("$destruct in struct {} must return void", def.name),
            );
        }
    }
}

/// Lookup restricted to the struct's own scope; special methods never come
/// from enclosing scopes.
fn resolve_local(analysis: &Analysis, scope: ScopeId, name: &str) -> Option<SymbolId> {
    analysis
        .table
        .scope(scope)
        .overloads
        .get(name)
        .and_then(|overloads| overloads.first().copied())
}

fn add_default_to_string(analysis: &mut Analysis, scope: ScopeId) {
    let mut data = FunctionData::new();
    data.is_struct_method = true;
    data.return_types.push(Type::STRING);
    let mut symbol = Symbol::function("$toString", 0, 0, scope, data);
    symbol.is_defined = true;
    // The builtin marker tells codegen this stub has no emitted body; the
    // conversion site calls the VM's own toString instead.
    symbol.is_builtin = true;
    let id = analysis.table.alloc(symbol);
    let _ = analysis.table.insert(scope, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use skua_frontend::parse_source;

    fn analyze_three(src: &str) -> (Analysis, ErrorReporter) {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = crate::empty_analysis();
        crate::collect::run(&parsed.program, &mut analysis, &mut reporter);
        crate::constructors::run(&parsed.program, &mut analysis, &mut reporter);
        run(&parsed.program, &mut analysis, &mut reporter);
        (analysis, reporter)
    }

    fn struct_scope(analysis: &Analysis, src_struct: &str) -> ScopeId {
        analysis
            .scope_map
            .values()
            .copied()
            .find(|&s| analysis.table.scope(s).overloads.contains_key("$toString"))
            .unwrap_or_else(|| panic!("no scope with $toString for {src_struct}"))
    }

    #[test]
    fn valid_to_string_passes() {
        let (_, reporter) = analyze_three(
            "struct P { x: int; fn $toString() -> string { return \"p\"; } }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn to_string_with_parameters_is_rejected() {
        let (_, reporter) = analyze_three(
            "struct P { x: int; fn $toString(pad: int) -> string { return \"p\"; } }",
        );
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::TypeMismatch && d.message.contains("no parameters")));
    }

    #[test]
    fn to_string_with_wrong_return_is_rejected() {
        let (_, reporter) =
            analyze_three("struct P { x: int; fn $toString() -> int { return 1; } }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::TypeMismatch && d.message.contains("return string")));
    }

    #[test]
    fn destruct_must_return_void() {
        let (_, reporter) =
            analyze_three("struct P { x: int; fn $destruct() -> int { return 1; } }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::TypeMismatch && d.message.contains("return void")));
    }

    #[test]
    fn unknown_special_method_is_rejected() {
        let (_, reporter) = analyze_three("struct P { x: int; fn $clone() -> int { return 1; } }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::UnresolvedReference
                && d.message.contains("unsupported special method")));
    }

    #[test]
    fn missing_to_string_gets_a_stub() {
        let (analysis, reporter) = analyze_three("struct P { x: int; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let scope = struct_scope(&analysis, "P");
        let stub = resolve_local(&analysis, scope, "$toString").expect("stub injected");
        let symbol = analysis.table.symbol(stub);
        assert!(symbol.is_defined);
        assert!(symbol.is_builtin);
        assert_eq!(
            symbol.as_function().unwrap().return_types,
            vec![Type::STRING]
        );
    }
}
