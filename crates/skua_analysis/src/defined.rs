//! Pass 5: use-before-definition checking.
//!
//! Final walk in source order. Reads and calls of symbols whose `is_defined`
//! bit is still false are reported; the bit flips when a definition point is
//! passed (function and struct headers, assignments to plain variables).
//! Declared-but-uninitialized variables are the interesting case: they become
//! defined at their first assignment, and uses before that point are errors.

use skua_frontend::ast::*;

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::symbols::ScopeId;
use crate::types::Primitive;
use crate::Analysis;

pub fn run(program: &Program, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    let mut pass = Definitions {
        scope: analysis.table.global_scope,
        analysis,
        reporter,
    };
    pass.program(program);
}

struct Definitions<'a> {
    analysis: &'a mut Analysis,
    reporter: &'a mut ErrorReporter,
    scope: ScopeId,
}

impl<'a> Definitions<'a> {
    fn program(&mut self, program: &Program) {
        if let Some(&scope) = self.analysis.scope_map.get(&program.id) {
            self.scope = scope;
        }
        for item in &program.items {
            match item {
                Item::Struct(def) => self.struct_def(def),
                Item::Function(def) => self.function(def),
            }
        }
    }

    fn struct_def(&mut self, def: &StructDef) {
        // The struct becomes usable at its header.
        if let Some(id) = self.analysis.table.resolve(self.scope, &def.name) {
            self.analysis.table.symbol_mut(id).is_defined = true;
        }

        let saved = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&def.id) {
            self.scope = scope;
        }
        for field in &def.fields {
            if let Some(init) = &field.init {
                self.expr(init);
            }
        }
        for method in &def.methods {
            self.function(method);
        }
        self.scope = saved;
    }

    fn function(&mut self, def: &FunctionDef) {
        if let Some(&symbol) = self.analysis.function_symbols.get(&def.id) {
            self.analysis.table.symbol_mut(symbol).is_defined = true;
        }

        let saved = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&def.id) {
            self.scope = scope;
        }
        for stmt in &def.body.statements {
            self.stmt(stmt);
        }
        self.scope = saved;
    }

    fn block(&mut self, key: NodeId, block: &Block) {
        let saved = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&key) {
            self.scope = scope;
        }
        for stmt in &block.statements {
            self.stmt(stmt);
        }
        self.scope = saved;
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => {
                if let Some(init) = &decl.init {
                    self.expr(init);
                }
            }
            StmtKind::Assign { target, value } => {
                // The target's inner expressions count as uses, except for a
                // plain variable target, which is a definition point.
                match &target.kind {
                    ExprKind::Variable(_) => {}
                    _ => self.expr(target),
                }
                self.expr(value);
                if let ExprKind::Variable(name) = &target.kind {
                    if let Some(id) = self.analysis.table.resolve(self.scope, name) {
                        self.analysis.table.symbol_mut(id).is_defined = true;
                    }
                }
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
                    self.block(block.id, block);
                }
                if let Some(block) = &if_stmt.else_block {
                    self.block(block.id, block);
                }
            }
            StmtKind::While { condition, body } | StmtKind::Until { condition, body } => {
                let saved = self.scope;
                if let Some(&scope) = self.analysis.scope_map.get(&stmt.id) {
                    self.scope = scope;
                }
                self.expr(condition);
                for inner in &body.statements {
                    self.stmt(inner);
                }
                self.scope = saved;
            }
            StmtKind::For(for_stmt) => {
                let saved = self.scope;
                if let Some(&scope) = self.analysis.scope_map.get(&stmt.id) {
                    self.scope = scope;
                }
                if let Some(init) = &for_stmt.init {
                    self.stmt(init);
                }
                self.expr(&for_stmt.condition);
                if let Some(update) = &for_stmt.update {
                    self.expr(update);
                }
                for inner in &for_stmt.body.statements {
                    self.stmt(inner);
                }
                self.scope = saved;
            }
            StmtKind::Loop { body } => {
                let saved = self.scope;
                if let Some(&scope) = self.analysis.scope_map.get(&stmt.id) {
                    self.scope = scope;
                }
                for inner in &body.statements {
                    self.stmt(inner);
                }
                self.scope = saved;
            }
            StmtKind::Break => {}
            StmtKind::Destructure { value, .. } => self.expr(value),
        }
    }

    fn check_use(&mut self, name: &str, span: Span, what: &str) {
        if let Some(id) = self.analysis.table.resolve(self.scope, name) {
            if !self.analysis.table.symbol(id).is_defined {
                self.reporter.report(
                    ErrorKind::UseBeforeDefinition,
                    span.line,
                    span.column,
                    format!("{what} '{name}' before its definition"),
                );
            }
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Variable(name) => self.check_use(name, expr.span, "use of"),
            ExprKind::Call(call) => {
                self.check_use(&call.name, expr.span, "call to function");
                for arg in &call.args {
                    self.expr(arg);
                }
            }
            ExprKind::Cast {
                operand, target, ..
            } => {
                self.expr(operand);
                if Primitive::from_name(&target.name).is_none() {
                    self.check_use(&target.name, target.span, "use of");
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
            ExprKind::Unary { operand, .. }
            | ExprKind::Postfix { operand, .. }
            | ExprKind::Deref { operand }
            | ExprKind::Ref { operand } => self.expr(operand),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
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
            ExprKind::NewStruct { name, args } => {
                self.check_use(name, expr.span, "use of");
                for arg in &args[..] {
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use skua_frontend::parse_source;

    fn check(src: &str) -> ErrorReporter {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = crate::empty_analysis();
        crate::collect::run(&parsed.program, &mut analysis, &mut reporter);
        crate::constructors::run(&parsed.program, &mut analysis, &mut reporter);
        crate::special::run(&parsed.program, &mut analysis, &mut reporter);
        crate::typecheck::run(&parsed.program, &mut analysis, &mut reporter);
        run(&parsed.program, &mut analysis, &mut reporter);
        reporter
    }

    fn has_ubd(reporter: &ErrorReporter) -> bool {
        reporter
            .diagnostics()
            .iter()
            .any(|d| d.kind == ErrorKind::UseBeforeDefinition)
    }

    #[test]
    fn uninitialized_use_is_reported() {
        let reporter = check("fn main() { var x: int; var y: int = x; }");
        assert!(has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn assignment_defines_the_variable() {
        let reporter = check("fn main() { var x: int; x = 1; var y: int = x; }");
        assert!(!has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn use_before_the_defining_assignment_is_reported() {
        let reporter = check("fn main() { var x: int; var y: int = x; x = 1; }");
        assert!(has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn self_assignment_of_undefined_is_reported() {
        let reporter = check("fn main() { var x: int; x = x + 1; }");
        assert!(has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn recursion_is_legal() {
        let reporter = check(
            "fn fact(n: int) -> int { if (n <= 1) { return 1; } return n * fact(n - 1); }",
        );
        assert!(!has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn initialized_declarations_are_defined() {
        let reporter = check("fn main() { var x: int = 1; var y: int = x; }");
        assert!(!has_ubd(&reporter), "{:?}", reporter.diagnostics());
    }
}
