//! Pass 1: symbol and scope construction.
//!
//! Creates a scope for the program, each struct body, each function body,
//! each loop statement and each branch block, registers every declared name,
//! and resolves declared types. Identifier uses are only checked for
//! resolvability here; type agreement is the checker's job.

use skua_frontend::ast::*;

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::symbols::{FunctionData, ScopeId, Symbol, SymbolId, VariableData};
use crate::types::Type;
use crate::{resolve_type_expr, Analysis};

pub fn run(program: &Program, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    let mut collector = Collector {
        analysis,
        reporter,
        scope: ScopeId(0),
    };
    collector.scope = collector.analysis.table.global_scope;
    collector.program(program);
}

struct Collector<'a> {
    analysis: &'a mut Analysis,
    reporter: &'a mut ErrorReporter,
    scope: ScopeId,
}

impl<'a> Collector<'a> {
    fn program(&mut self, program: &Program) {
        let scope = self.analysis.table.new_scope(Some(self.scope));
        self.analysis.scope_map.insert(program.id, scope);
        let saved = std::mem::replace(&mut self.scope, scope);

        for item in &program.items {
            match item {
                Item::Struct(def) => self.struct_def(def),
                Item::Function(def) => self.function(def, None),
            }
        }
        self.scope = saved;
    }

    fn struct_def(&mut self, def: &StructDef) {
        let member_scope = self.analysis.table.new_scope(Some(self.scope));
        self.analysis.scope_map.insert(def.id, member_scope);

        let symbol = Symbol::type_symbol(
            def.name.clone(),
            def.name_span.line,
            def.name_span.column,
            member_scope,
            crate::symbols::TypeData {
                member_scope,
                type_representation: Type::Unresolved(def.name.clone()),
            },
        );
        let struct_id = self.analysis.table.alloc(symbol);
        // The struct's own type points back at its symbol.
        if let crate::symbols::SymbolKind::Type(data) =
            &mut self.analysis.table.symbol_mut(struct_id).kind
        {
            data.type_representation = Type::User(struct_id);
        }

        if let Err(conflict) = self.analysis.table.insert(self.scope, struct_id) {
            self.report_conflict(
                ErrorKind::Redefinition,
                def.name_span,
                &format!("redefinition of struct '{}'", def.name),
                conflict,
            );
        }

        let saved = std::mem::replace(&mut self.scope, member_scope);
        // Members are visited in source order, exactly as written; a method
        // body can only see names collected before it.
        enum Member<'m> {
            Field(&'m FieldDecl),
            Method(&'m FunctionDef),
        }
        let mut members: Vec<(Span, Member)> = def
            .fields
            .iter()
            .map(|f| (f.span, Member::Field(f)))
            .chain(def.methods.iter().map(|m| (m.span, Member::Method(m))))
            .collect();
        members.sort_by_key(|(span, _)| (span.line, span.column));

        for (_, member) in members {
            match member {
                Member::Field(field) => self.field(field, struct_id),
                Member::Method(method) => self.function(method, Some(struct_id)),
            }
        }
        self.scope = saved;
    }

    fn field(&mut self, field: &FieldDecl, struct_id: SymbolId) {
        let data_type = self.resolve_declared_type(&field.ty, field.span);
        let mut data = VariableData::new(data_type);
        data.is_constant = field.is_const;
        data.is_struct_member = true;
        data.parent_struct = Some(struct_id);

        let mut symbol = Symbol::variable(
            field.name.clone(),
            field.span.line,
            field.span.column,
            self.scope,
            data,
        );
        symbol.is_private = field.is_private;
        symbol.is_defined = field.init.is_some();
        let id = self.analysis.table.alloc(symbol);
        if let Err(conflict) = self.analysis.table.insert(self.scope, id) {
            self.report_conflict(
                ErrorKind::Redeclaration,
                field.span,
                &format!("redeclaration of variable '{}'", field.name),
                conflict,
            );
        }

        if let Some(init) = &field.init {
            self.expr(init);
        }
    }

    fn function(&mut self, def: &FunctionDef, struct_id: Option<SymbolId>) {
        let fn_scope = self.analysis.table.new_scope(Some(self.scope));
        self.analysis.scope_map.insert(def.id, fn_scope);
        let parent_scope = self.scope;
        self.scope = fn_scope;

        let mut data = FunctionData::new();
        for param in &def.params {
            let param_type = self.resolve_declared_type(&param.ty, param.span);
            let mut var = VariableData::new(param_type);
            var.is_parameter = true;
            let mut symbol = Symbol::variable(
                param.name.clone(),
                def.name_span.line,
                def.name_span.column,
                fn_scope,
                var,
            );
            symbol.is_defined = true;
            let id = self.analysis.table.alloc(symbol);
            if let Err(conflict) = self.analysis.table.insert(fn_scope, id) {
                self.report_conflict(
                    ErrorKind::Redeclaration,
                    param.span,
                    &format!("redeclaration of variable '{}'", param.name),
                    conflict,
                );
            }
            data.parameters.push(id);
        }

        // Struct methods see the receiver as a plain local in slot 0, not as
        // a parameter.
        if let Some(struct_id) = struct_id {
            let struct_type = self
                .analysis
                .table
                .symbol(struct_id)
                .as_type()
                .map(|d| d.type_representation.clone())
                .unwrap_or(Type::VOID);
            let mut this_var = Symbol::variable(
                "this",
                def.name_span.line,
                def.name_span.column,
                fn_scope,
                VariableData::new(Type::pointer_to(struct_type)),
            );
            this_var.is_defined = true;
            let this_id = self.analysis.table.alloc(this_var);
            let _ = self.analysis.table.insert(fn_scope, this_id);
            data.is_struct_method = true;
        }

        match def.return_types.len() {
            0 => data.return_types.push(Type::VOID),
            1 => {
                let ty = self.resolve_declared_type(&def.return_types[0], def.span);
                data.return_types.push(ty);
            }
            _ => {
                let elems: Vec<Type> = def
                    .return_types
                    .iter()
                    .map(|t| self.resolve_declared_type(t, def.span))
                    .collect();
                data.return_types.push(Type::Tuple(elems));
            }
        }

        let mut symbol = Symbol::function(
            def.name.clone(),
            def.name_span.line,
            def.name_span.column,
            fn_scope,
            data,
        );
        symbol.is_private = def.is_private;
        symbol.is_defined = true; // recursion is legal
        let id = self.analysis.table.alloc(symbol);
        if let Err(conflict) = self.analysis.table.insert(parent_scope, id) {
            self.report_conflict(
                ErrorKind::Redefinition,
                def.name_span,
                &format!("redefinition of function '{}'", def.name),
                conflict,
            );
        }
        self.analysis.function_symbols.insert(def.id, id);

        self.block_statements(&def.body);
        self.scope = parent_scope;
    }

    fn block_statements(&mut self, block: &Block) {
        for stmt in &block.statements {
            self.stmt(stmt);
        }
    }

    fn scoped_block(&mut self, key: NodeId, block: &Block) {
        let scope = self.analysis.table.new_scope(Some(self.scope));
        self.analysis.scope_map.insert(key, scope);
        let saved = std::mem::replace(&mut self.scope, scope);
        self.block_statements(block);
        self.scope = saved;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => {
                self.declare_variable(
                    &decl.name,
                    decl.name_span,
                    &decl.ty,
                    decl.is_const,
                    decl.init.is_some(),
                );
                if let Some(init) = &decl.init {
                    self.expr(init);
                }
            }
            StmtKind::Destructure { items, value } => {
                for item in items {
                    self.declare_variable(&item.name, item.span, &item.ty, item.is_const, true);
                }
                self.expr(value);
            }
            StmtKind::Assign { target, value } => {
                self.expr(target);
                self.expr(value);
            }
            StmtKind::Return { value } => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Expr { expr } => self.expr(expr),
            StmtKind::If(if_stmt) => {
                for (condition, block) in &if_stmt.branches {
                    self.expr(condition);
                    self.scoped_block(block.id, block);
                }
                if let Some(block) = &if_stmt.else_block {
                    self.scoped_block(block.id, block);
                }
            }
            StmtKind::While { condition, body } | StmtKind::Until { condition, body } => {
                let scope = self.analysis.table.new_scope(Some(self.scope));
                self.analysis.scope_map.insert(stmt.id, scope);
                let saved = std::mem::replace(&mut self.scope, scope);
                self.expr(condition);
                self.block_statements(body);
                self.scope = saved;
            }
            StmtKind::For(for_stmt) => {
                // The init declaration lives in the loop's scope.
                let scope = self.analysis.table.new_scope(Some(self.scope));
                self.analysis.scope_map.insert(stmt.id, scope);
                let saved = std::mem::replace(&mut self.scope, scope);
                if let Some(init) = &for_stmt.init {
                    self.stmt(init);
                }
                self.expr(&for_stmt.condition);
                if let Some(update) = &for_stmt.update {
                    self.expr(update);
                }
                self.block_statements(&for_stmt.body);
                self.scope = saved;
            }
            StmtKind::Loop { body } => {
                let scope = self.analysis.table.new_scope(Some(self.scope));
                self.analysis.scope_map.insert(stmt.id, scope);
                let saved = std::mem::replace(&mut self.scope, scope);
                self.block_statements(body);
                self.scope = saved;
            }
            StmtKind::Break => {}
        }
    }

    fn declare_variable(
        &mut self,
        name: &str,
        span: Span,
        ty: &TypeExpr,
        is_const: bool,
        has_init: bool,
    ) {
        let data_type = self.resolve_declared_type(ty, span);
        let mut data = VariableData::new(data_type);
        data.is_constant = is_const;
        let mut symbol = Symbol::variable(name, span.line, span.column, self.scope, data);
        symbol.is_defined = has_init;
        let id = self.analysis.table.alloc(symbol);
        if let Err(conflict) = self.analysis.table.insert(self.scope, id) {
            self.report_conflict(
                ErrorKind::Redeclaration,
                span,
                &format!("redeclaration of variable '{name}'"),
                conflict,
            );
        }
    }

    /// Every identifier appearing in an expression must resolve to something;
    /// what it resolves to is checked later.
    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Variable(name) => {
                if self.analysis.table.resolve(self.scope, name).is_none() {
                    self.reporter.report(
                        ErrorKind::UnresolvedReference,
                        expr.span.line,
                        expr.span.column,
                        format!("unresolved variable {name}"),
                    );
                }
            }
            ExprKind::FieldAccess(access) => {
                self.expr(&access.head);
                for segment in &access.segments {
                    match &segment.kind {
                        FieldSegmentKind::Method(call) => {
                            for arg in &call.args {
                                self.expr(arg);
                            }
                        }
                        FieldSegmentKind::Index { index, .. } => self.expr(index),
                        FieldSegmentKind::Field(_) => {}
                    }
                }
            }
            ExprKind::Index { base, index } => {
                self.expr(base);
                self.expr(index);
            }
            ExprKind::Call(call) => {
                // The callee is looked up during type checking, with argument
                // types in hand; only the arguments are checked here.
                for arg in &call.args {
                    self.expr(arg);
                }
            }
            ExprKind::Unary { operand, .. }
            | ExprKind::Postfix { operand, .. }
            | ExprKind::Deref { operand }
            | ExprKind::Ref { operand } => self.expr(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Cast { operand, .. } => self.expr(operand),
            ExprKind::TupleLit(elems) | ExprKind::ArrayLit(elems) => {
                for elem in elems {
                    self.expr(elem);
                }
            }
            ExprKind::NewPrimitive { init, .. } => self.expr(init),
            ExprKind::NewArray { dims, .. } => {
                for dim in dims {
                    self.expr(dim);
                }
            }
            ExprKind::NewStruct { args, .. } => {
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::IfExpr {
                condition,
                then_value,
                else_value,
            } => {
                self.expr(condition);
                self.expr(then_value);
                self.expr(else_value);
            }
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::NullLit => {}
        }
    }

    fn resolve_declared_type(&mut self, ty: &TypeExpr, span: Span) -> Type {
        match resolve_type_expr(&self.analysis.table, self.scope, ty) {
            Some(resolved) => resolved,
            None => {
                self.reporter.report(
                    ErrorKind::UnresolvedReference,
                    span.line,
                    span.column,
                    format!("unresolved type {}", ty.display_name()),
                );
                Type::VOID
            }
        }
    }

    fn report_conflict(&mut self, kind: ErrorKind, span: Span, what: &str, conflict: SymbolId) {
        let existing = self.analysis.table.symbol(conflict);
        let message = format!(
            "{what}, previously declared at line {} column {}",
            existing.line, existing.column
        );
        self.reporter.report(kind, span.line, span.column, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skua_frontend::parse_source;

    fn collect(src: &str) -> (Analysis, ErrorReporter) {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = crate::empty_analysis();
        run(&parsed.program, &mut analysis, &mut reporter);
        (analysis, reporter)
    }

    #[test]
    fn collects_functions_and_variables() {
        let (analysis, reporter) = collect("fn main() { var x: int = 1; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let program_scope = *analysis.scope_map.values().next().expect("program scope");
        let main = analysis.table.resolve(program_scope, "main_");
        assert!(main.is_some());
    }

    #[test]
    fn struct_symbol_points_at_member_scope() {
        let (analysis, reporter) = collect("struct Point { x: int; y: int; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let mut found = false;
        for scope in analysis.scope_map.values() {
            if let Some(id) = analysis.table.resolve(*scope, "Point") {
                let symbol = analysis.table.symbol(id);
                if let Some(data) = symbol.as_type() {
                    assert_eq!(data.type_representation, Type::User(id));
                    assert!(analysis.table.resolve(data.member_scope, "x").is_some());
                    found = true;
                }
            }
        }
        assert!(found, "struct symbol not reachable");
    }

    #[test]
    fn struct_method_gets_this() {
        let (analysis, reporter) =
            collect("struct Point { x: int; fn get_x() -> int { return x; } }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());

        let method_scope = analysis
            .scope_map
            .values()
            .find_map(|&scope| {
                analysis
                    .table
                    .scope(scope)
                    .symbols
                    .contains_key("this")
                    .then_some(scope)
            })
            .expect("method scope with this");
        let this_id = analysis.table.resolve(method_scope, "this").unwrap();
        let this_type = &analysis.table.symbol(this_id).as_variable().unwrap().data_type;
        assert!(matches!(this_type, Type::Pointer(p) if matches!(**p, Type::User(_))));
    }

    #[test]
    fn unresolved_type_is_reported() {
        let (_, reporter) = collect("fn main() { var p: Missing* = nullptr; }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::UnresolvedReference && d.message.contains("Missing")));
    }

    #[test]
    fn unresolved_variable_is_reported() {
        let (_, reporter) = collect("fn main() { var x: int = y; }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::UnresolvedReference && d.message.contains("y")));
    }

    #[test]
    fn redeclaration_is_reported() {
        let (_, reporter) = collect("fn main() { var x: int = 1; var x: int = 2; }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Redeclaration));
    }

    #[test]
    fn struct_redefinition_is_reported() {
        let (_, reporter) = collect("struct A { x: int; } struct A { y: int; }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Redefinition));
    }

    #[test]
    fn overloads_do_not_collide() {
        let (_, reporter) = collect("fn f(a: int) { } fn f(a: float) { }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn same_signature_redefinition_is_reported() {
        let (_, reporter) = collect("fn f(a: int) { } fn f(a: int) { }");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::Redefinition));
    }

    #[test]
    fn loop_bodies_get_their_own_scopes() {
        let (analysis, reporter) = collect(
            "fn main() { while (true) { var x: int = 1; } while (true) { var x: int = 2; } }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        // program + main + two while scopes
        assert!(analysis.scope_map.len() >= 4);
    }

    #[test]
    fn multiple_returns_collapse_to_tuple() {
        let (analysis, reporter) = collect("fn divmod(a: int, b: int) -> (int, int) { }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let id = *analysis.function_symbols.values().next().unwrap();
        let data = analysis.table.symbol(id).as_function().unwrap();
        assert_eq!(
            data.return_types,
            vec![Type::Tuple(vec![Type::INT, Type::INT])]
        );
    }
}
