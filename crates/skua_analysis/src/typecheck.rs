//! Pass 4: type checking.
//!
//! Annotates every expression node with a resolved type, checks assignments,
//! returns, calls, indexing, field access, casts and operator domains, and
//! records the sites where an automatic value-to-string coercion must be
//! emitted. Expressions that fail to resolve are annotated `void` so later
//! stages have something to look at.

use skua_frontend::ast::*;

use crate::diagnostics::{ErrorKind, ErrorReporter};
use crate::symbols::{ScopeId, SymbolId};
use crate::types::{Primitive, Type};
use crate::{resolve_type_expr, Analysis};

pub fn run(program: &Program, analysis: &mut Analysis, reporter: &mut ErrorReporter) {
    let mut checker = Checker {
        scope: analysis.table.global_scope,
        analysis,
        reporter,
        return_types: Vec::new(),
        loop_depth: 0,
    };
    checker.program(program);
}

struct Checker<'a> {
    analysis: &'a mut Analysis,
    reporter: &'a mut ErrorReporter,
    scope: ScopeId,
    /// Return types of the function being walked.
    return_types: Vec<Type>,
    loop_depth: u32,
}

impl<'a> Checker<'a> {
    fn report(&mut self, kind: ErrorKind, span: Span, message: impl Into<String>) {
        self.reporter.report(kind, span.line, span.column, message);
    }

    fn set_type(&mut self, id: NodeId, ty: Type) -> Type {
        self.analysis.expression_types.insert(id, ty.clone());
        ty
    }

    fn display(&self, ty: &Type) -> String {
        self.analysis.table.type_to_string(ty)
    }

    // -- structure -----------------------------------------------------------

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
        let saved = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&def.id) {
            self.scope = scope;
        }
        for field in &def.fields {
            if let Some(init) = &field.init {
                let init_type = self.expr(init);
                if let Some(declared) =
                    resolve_type_expr(&self.analysis.table, self.scope, &field.ty)
                {
                    if !self.compatible(&init_type, &declared, field.id) {
                        self.report(
                            ErrorKind::TypeMismatch,
                            init.span,
                            format!(
                                "Cannot initialize variable of type {} with value of type {}",
                                self.display(&declared),
                                self.display(&init_type)
                            ),
                        );
                    }
                }
            }
        }
        for method in &def.methods {
            self.function(method);
        }
        self.scope = saved;
    }

    fn function(&mut self, def: &FunctionDef) {
        let saved_scope = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&def.id) {
            self.scope = scope;
        }
        let saved_returns = std::mem::take(&mut self.return_types);
        if let Some(&symbol) = self.analysis.function_symbols.get(&def.id) {
            if let Some(data) = self.analysis.table.symbol(symbol).as_function() {
                self.return_types = data.return_types.clone();
            }
        }

        for stmt in &def.body.statements {
            self.stmt(stmt);
        }

        self.return_types = saved_returns;
        self.scope = saved_scope;
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

    // -- statements ----------------------------------------------------------

    fn stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => self.var_decl(stmt, decl),
            StmtKind::Assign { target, value } => self.assignment(stmt, target, value),
            StmtKind::Return { value } => self.return_stmt(stmt, value.as_ref()),
            StmtKind::Expr { expr } => {
                self.expr(expr);
            }
            StmtKind::If(if_stmt) => {
                for (condition, block) in &if_stmt.branches {
                    let cond_type = self.expr(condition);
                    self.require_condition(&cond_type, condition.span, "If condition");
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
                let cond_type = self.expr(condition);
                self.require_condition(&cond_type, condition.span, "Loop condition");
                self.loop_depth += 1;
                for inner in &body.statements {
                    self.stmt(inner);
                }
                self.loop_depth -= 1;
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
                let cond_type = self.expr(&for_stmt.condition);
                self.require_condition(&cond_type, for_stmt.condition.span, "Loop condition");
                if let Some(update) = &for_stmt.update {
                    self.expr(update);
                }
                self.loop_depth += 1;
                for inner in &for_stmt.body.statements {
                    self.stmt(inner);
                }
                self.loop_depth -= 1;
                self.scope = saved;
            }
            StmtKind::Loop { body } => {
                let saved = self.scope;
                if let Some(&scope) = self.analysis.scope_map.get(&stmt.id) {
                    self.scope = scope;
                }
                self.loop_depth += 1;
                for inner in &body.statements {
                    self.stmt(inner);
                }
                self.loop_depth -= 1;
                self.scope = saved;
            }
            StmtKind::Break => {
                if self.loop_depth == 0 {
                    self.report(ErrorKind::TypeMismatch, stmt.span, "break outside of loop");
                }
            }
            StmtKind::Destructure { items, value } => self.destructure(stmt, items, value),
        }
    }

    fn var_decl(&mut self, stmt: &Stmt, decl: &VarDecl) {
        let init = match &decl.init {
            Some(init) => init,
            None => return,
        };
        let init_type = self.expr(init);
        let declared = match resolve_type_expr(&self.analysis.table, self.scope, &decl.ty) {
            Some(declared) => declared,
            // Already reported during collection.
            None => return,
        };
        if !self.compatible(&init_type, &declared, stmt.id) {
            self.report(
                ErrorKind::TypeMismatch,
                init.span,
                format!(
                    "Cannot initialize variable of type {} with value of type {}",
                    self.display(&declared),
                    self.display(&init_type)
                ),
            );
        }
    }

    fn assignment(&mut self, stmt: &Stmt, target: &Expr, value: &Expr) {
        let target_type = self.expr(target);
        let description = match &target.kind {
            ExprKind::Index { .. } => "indexed element",
            ExprKind::Deref { .. } => "dereferenced pointer",
            _ => "variable",
        };

        let value_type = self.expr(value);
        if !self.compatible(&value_type, &target_type, stmt.id) {
            self.report(
                ErrorKind::TypeMismatch,
                value.span,
                format!(
                    "Cannot assign value of type {} to {} of type {}",
                    self.display(&value_type),
                    description,
                    self.display(&target_type)
                ),
            );
        }

        if let ExprKind::Variable(name) = &target.kind {
            if let Some(symbol) = self.analysis.table.resolve(self.scope, name) {
                let constant = self
                    .analysis
                    .table
                    .symbol(symbol)
                    .as_variable()
                    .map(|v| v.is_constant)
                    .unwrap_or(false);
                if constant {
                    self.report(
                        ErrorKind::AssignmentToConst,
                        stmt.span,
                        format!("Cannot assign to const variable '{name}'"),
                    );
                }
            }
        }
    }

    fn return_stmt(&mut self, stmt: &Stmt, value: Option<&Expr>) {
        let expected = self.return_types.first().cloned();
        match value {
            None => {
                let void_ok = match &expected {
                    None => true,
                    Some(ty) => ty.is_void(),
                };
                if !void_ok {
                    self.report(
                        ErrorKind::TypeMismatch,
                        stmt.span,
                        "Function expects return value(s) but none provided",
                    );
                }
            }
            Some(value) => {
                let value_type = self.expr(value);
                let expected = match expected {
                    Some(expected) => expected,
                    None => {
                        self.report(
                            ErrorKind::TypeMismatch,
                            value.span,
                            "Function has no return type specified",
                        );
                        return;
                    }
                };
                if !self.compatible(&value_type, &expected, stmt.id) {
                    self.report(
                        ErrorKind::TypeMismatch,
                        value.span,
                        format!(
                            "Return type mismatch: expected {} but got {}",
                            self.display(&expected),
                            self.display(&value_type)
                        ),
                    );
                }
            }
        }
    }

    fn destructure(&mut self, stmt: &Stmt, items: &[DestructureItem], value: &Expr) {
        let value_type = self.expr(value);
        let elements = match &value_type {
            Type::Tuple(elements) => elements.clone(),
            other => {
                let display = self.display(other);
                self.report(
                    ErrorKind::TypeMismatch,
                    stmt.span,
                    format!("Destructuring assignment requires a tuple type, got {display}"),
                );
                return;
            }
        };
        if items.len() != elements.len() {
            self.report(
                ErrorKind::TypeMismatch,
                stmt.span,
                "Destructuring assignment has incompatible number of elements",
            );
            return;
        }
        for (i, (item, element)) in items.iter().zip(&elements).enumerate() {
            let item_type = self
                .analysis
                .table
                .resolve(self.scope, &item.name)
                .and_then(|id| {
                    self.analysis
                        .table
                        .symbol(id)
                        .as_variable()
                        .map(|v| v.data_type.clone())
                })
                .unwrap_or(Type::VOID);
            self.set_type(item.id, item_type.clone());
            if !self.compatible(&item_type, element, stmt.id) {
                self.report(
                    ErrorKind::TypeMismatch,
                    item.span,
                    format!("Destructuring item {i} has incompatible type"),
                );
            }
        }
    }

    fn require_condition(&mut self, ty: &Type, span: Span, what: &str) {
        let ok = matches!(ty, Type::Pointer(_))
            || ty.as_primitive() == Some(Primitive::Bool);
        if !ok {
            let display = self.display(ty);
            self.report(
                ErrorKind::TypeMismatch,
                span,
                format!("{what} must be a boolean or pointer, got {display}"),
            );
        }
    }

    // -- expressions ---------------------------------------------------------

    fn expr(&mut self, expr: &Expr) -> Type {
        let ty = match &expr.kind {
            ExprKind::IntLit(_) => Type::INT,
            ExprKind::FloatLit(_) => Type::FLOAT,
            ExprKind::StringLit(_) => Type::STRING,
            ExprKind::BoolLit(_) => Type::BOOL,
            ExprKind::NullLit => Type::null_pointer(),
            ExprKind::Variable(name) => self
                .analysis
                .table
                .resolve(self.scope, name)
                .and_then(|id| {
                    self.analysis
                        .table
                        .symbol(id)
                        .as_variable()
                        .map(|v| v.data_type.clone())
                })
                // Unresolved names were reported during collection.
                .unwrap_or(Type::VOID),
            ExprKind::Call(call) => self.free_call(call),
            ExprKind::FieldAccess(access) => self.field_access(access),
            ExprKind::Index { base, index } => self.index_expr(base, index),
            ExprKind::Unary { op, operand } => self.unary(expr, *op, operand),
            ExprKind::Postfix { operand, .. } => self.postfix(expr, operand),
            ExprKind::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs),
            ExprKind::Cast {
                operand,
                target,
                bits,
            } => self.cast(expr, operand, target, *bits),
            ExprKind::Deref { operand } => self.deref(expr, operand),
            ExprKind::Ref { operand } => {
                let base = self.expr(operand);
                match base {
                    Type::Pointer(_) => base,
                    other => Type::pointer_to(other),
                }
            }
            ExprKind::TupleLit(elems) => {
                let types: Vec<Type> = elems.iter().map(|e| self.expr(e)).collect();
                Type::Tuple(types)
            }
            ExprKind::ArrayLit(elems) => self.array_literal(expr, elems),
            ExprKind::NewPrimitive { prim, init } => self.new_primitive(expr, prim, init),
            ExprKind::NewArray { elem, dims } => self.new_array(expr, elem, dims),
            ExprKind::NewStruct { name, args } => self.new_struct(expr, name, args),
            ExprKind::IfExpr {
                condition,
                then_value,
                else_value,
            } => self.if_expr(expr, condition, then_value, else_value),
        };
        self.set_type(expr.id, ty)
    }

    fn free_call(&mut self, call: &CallExpr) -> Type {
        let arg_types: Vec<Type> = call.args.iter().map(|a| self.expr(a)).collect();
        let symbol = match self
            .analysis
            .table
            .resolve_function_call(self.scope, &call.name, &arg_types)
        {
            Some(symbol) => symbol,
            None => {
                self.report(
                    ErrorKind::UnresolvedReference,
                    call.span,
                    format!("No matching function found for call to '{}'", call.name),
                );
                return self.set_type(call.id, Type::VOID);
            }
        };
        self.finish_call(call, symbol, &arg_types)
    }

    /// Shared tail of every call form: argument compatibility, result type,
    /// and the resolved-symbol record for codegen.
    fn finish_call(&mut self, call: &CallExpr, symbol: SymbolId, arg_types: &[Type]) -> Type {
        let param_types = self.analysis.table.parameter_types(symbol);
        self.check_arguments(&call.name, arg_types, &param_types, &call.args, call.span);
        self.analysis.resolved_calls.insert(call.id, symbol);

        let return_types = self
            .analysis
            .table
            .symbol(symbol)
            .as_function()
            .map(|data| data.return_types.clone())
            .unwrap_or_default();
        let result = match return_types.len() {
            0 => Type::VOID,
            1 => return_types.into_iter().next().expect("length checked"),
            _ => Type::Tuple(return_types),
        };
        self.set_type(call.id, result)
    }

    fn check_arguments(
        &mut self,
        name: &str,
        args: &[Type],
        params: &[Type],
        arg_nodes: &[Expr],
        span: Span,
    ) {
        if args.len() != params.len() {
            self.report(
                ErrorKind::TypeMismatch,
                span,
                format!(
                    "Function call to '{name}' with incorrect number of arguments. Expected {}, got {}",
                    params.len(),
                    args.len()
                ),
            );
            return;
        }
        for (i, ((arg, param), node)) in args.iter().zip(params).zip(arg_nodes).enumerate() {
            if !self.compatible(arg, param, node.id) {
                self.report(
                    ErrorKind::TypeMismatch,
                    node.span,
                    format!(
                        "Incompatible argument type for parameter {} of function '{name}'. Expected {}, got {}",
                        i + 1,
                        self.display(param),
                        self.display(arg)
                    ),
                );
            }
        }
    }

    fn field_access(&mut self, access: &FieldAccess) -> Type {
        let mut current = self.expr(&access.head);
        // An unresolved head was already reported; annotate the rest void
        // and move on.
        if current.is_void() {
            for segment in &access.segments {
                self.walk_segment_operands(segment);
                self.set_type(segment.id, Type::VOID);
            }
            return Type::VOID;
        }

        for segment in &access.segments {
            if segment.via_arrow {
                current = match current {
                    Type::Pointer(pointee) => *pointee,
                    other => {
                        let display = self.display(&other);
                        self.report(
                            ErrorKind::UnresolvedReference,
                            segment.span,
                            format!("Cannot dereference non-pointer type {display}"),
                        );
                        self.walk_segment_operands(segment);
                        return self.set_type(segment.id, Type::VOID);
                    }
                };
            }

            let next = match &segment.kind {
                FieldSegmentKind::Field(name) => {
                    match self.field_type(&current, name, segment.span) {
                        Some(ty) => ty,
                        None => {
                            self.walk_segment_operands(segment);
                            return self.set_type(segment.id, Type::VOID);
                        }
                    }
                }
                FieldSegmentKind::Method(call) => {
                    match self.method_call(&current, call, segment.span) {
                        Some(ty) => ty,
                        None => {
                            return self.set_type(segment.id, Type::VOID);
                        }
                    }
                }
                FieldSegmentKind::Index { name, index } => {
                    let field = match self.field_type(&current, name, segment.span) {
                        Some(ty) => ty,
                        None => {
                            self.expr(index);
                            return self.set_type(segment.id, Type::VOID);
                        }
                    };
                    let index_type = self.expr(index);
                    self.element_type(&field, index, &index_type, segment.span)
                }
            };
            self.set_type(segment.id, next.clone());
            current = next;
        }
        current
    }

    fn walk_segment_operands(&mut self, segment: &FieldSegment) {
        match &segment.kind {
            FieldSegmentKind::Method(call) => {
                for arg in &call.args {
                    self.expr(arg);
                }
                self.set_type(call.id, Type::VOID);
            }
            FieldSegmentKind::Index { index, .. } => {
                self.expr(index);
            }
            FieldSegmentKind::Field(_) => {}
        }
    }

    /// Type of `base.name` where `name` is a field or a numeric tuple index.
    fn field_type(&mut self, base: &Type, name: &str, span: Span) -> Option<Type> {
        match base {
            Type::User(struct_id) => {
                let member_scope = self.analysis.table.symbol(*struct_id).as_type()?.member_scope;
                let field = self
                    .analysis
                    .table
                    .scope(member_scope)
                    .symbols
                    .get(name)
                    .copied();
                match field.and_then(|id| {
                    let symbol = self.analysis.table.symbol(id);
                    symbol.as_variable().map(|v| (id, v.data_type.clone()))
                }) {
                    Some((id, ty)) => {
                        self.check_member_access(id, member_scope, name, base, span);
                        Some(ty)
                    }
                    None => {
                        let display = self.display(base);
                        self.report(
                            ErrorKind::UnresolvedReference,
                            span,
                            format!("Cannot resolve field '{name}' in type {display}"),
                        );
                        None
                    }
                }
            }
            Type::Tuple(elements) => match name.parse::<usize>() {
                Ok(index) if index < elements.len() => Some(elements[index].clone()),
                Ok(index) => {
                    self.report(
                        ErrorKind::OutOfBounds,
                        span,
                        format!("Index out of bounds for tuple type: {index}"),
                    );
                    None
                }
                Err(_) => {
                    let display = self.display(base);
                    self.report(
                        ErrorKind::UnresolvedReference,
                        span,
                        format!("Cannot resolve field '{name}' in type {display}"),
                    );
                    None
                }
            },
            other => {
                let display = self.display(other);
                self.report(
                    ErrorKind::UnresolvedReference,
                    span,
                    format!("Cannot resolve field '{name}' in type {display}"),
                );
                None
            }
        }
    }

    /// Private members are only reachable from inside the struct's scopes.
    fn check_member_access(
        &mut self,
        member: SymbolId,
        member_scope: ScopeId,
        name: &str,
        base: &Type,
        span: Span,
    ) {
        if !self.analysis.table.symbol(member).is_private {
            return;
        }
        if self.analysis.table.scope_has_ancestor(self.scope, member_scope) {
            return;
        }
        let display = self.display(base);
        self.report(
            ErrorKind::AccessViolation,
            span,
            format!("'{name}' is private in struct {display}"),
        );
    }

    fn method_call(&mut self, base: &Type, call: &CallExpr, span: Span) -> Option<Type> {
        let arg_types: Vec<Type> = call.args.iter().map(|a| self.expr(a)).collect();

        let struct_id = match base {
            Type::User(id) => *id,
            Type::Primitive(_) => {
                let display = self.display(base);
                self.report(
                    ErrorKind::UnresolvedReference,
                    span,
                    format!(
                        "Cannot call method '{}' on primitive type {display}",
                        call.name
                    ),
                );
                self.set_type(call.id, Type::VOID);
                return None;
            }
            other => {
                let display = self.display(other);
                self.report(
                    ErrorKind::UnresolvedReference,
                    span,
                    format!("Type {display} does not support method calls"),
                );
                self.set_type(call.id, Type::VOID);
                return None;
            }
        };

        let member_scope = self.analysis.table.symbol(struct_id).as_type()?.member_scope;
        match self
            .analysis
            .table
            .resolve_function_call(member_scope, &call.name, &arg_types)
        {
            Some(symbol) => {
                self.check_member_access(symbol, member_scope, &call.name, base, span);
                Some(self.finish_call(call, symbol, &arg_types))
            }
            None => {
                let display = self.display(base);
                self.report(
                    ErrorKind::UnresolvedReference,
                    span,
                    format!("Method '{}' not found in type {display}", call.name),
                );
                self.set_type(call.id, Type::VOID);
                None
            }
        }
    }

    fn index_expr(&mut self, base: &Expr, index: &Expr) -> Type {
        let index_type = self.expr(index);
        let base_type = self.expr(base);
        self.element_type(&base_type, index, &index_type, index.span)
    }

    /// Indexing rules shared by `a[i]` and `obj.items[i]`.
    fn element_type(
        &mut self,
        base_type: &Type,
        index: &Expr,
        index_type: &Type,
        span: Span,
    ) -> Type {
        if let Type::Tuple(elements) = base_type {
            // Tuples need a compile-time index.
            let literal = match &index.kind {
                ExprKind::IntLit(text) => parse_int_literal(text),
                _ => None,
            };
            return match literal {
                Some(value) if (value as usize) < elements.len() && value >= 0 => {
                    elements[value as usize].clone()
                }
                Some(value) => {
                    self.report(
                        ErrorKind::OutOfBounds,
                        span,
                        format!("Index out of bounds for tuple type: {value}"),
                    );
                    Type::VOID
                }
                None => {
                    let display = self.display(index_type);
                    self.report(
                        ErrorKind::TypeMismatch,
                        span,
                        format!("Index type mismatch: expected int but got {display}"),
                    );
                    Type::VOID
                }
            };
        }

        if !index_type.is_integer() {
            let display = self.display(index_type);
            self.report(
                ErrorKind::TypeMismatch,
                span,
                format!("Index type mismatch: expected int but got {display}"),
            );
            return Type::VOID;
        }

        match base_type {
            Type::Array(element) => (**element).clone(),
            Type::Pointer(pointee) => (**pointee).clone(),
            other => {
                let display = self.display(other);
                self.report(
                    ErrorKind::TypeMismatch,
                    span,
                    format!("Cannot index type {display} (not an array/pointer type)"),
                );
                Type::VOID
            }
        }
    }

    fn unary(&mut self, expr: &Expr, op: UnaryOp, operand: &Expr) -> Type {
        let operand_type = self.expr(operand);
        match op {
            UnaryOp::Not => {
                let ok = matches!(operand_type, Type::Pointer(_))
                    || operand_type.as_primitive() == Some(Primitive::Bool);
                if !ok {
                    let display = self.display(&operand_type);
                    self.report(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!("Logical NOT operator requires boolean operand, got {display}"),
                    );
                }
                Type::BOOL
            }
            UnaryOp::Neg | UnaryOp::Plus => {
                if !operand_type.is_numeric()
                    || operand_type.as_primitive() == Some(Primitive::Bool)
                {
                    let display = self.display(&operand_type);
                    let symbol = if op == UnaryOp::Neg { "-" } else { "+" };
                    self.report(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!(
                            "Unary operator {symbol} requires numeric non-boolean operand, got {display}"
                        ),
                    );
                    Type::INT
                } else {
                    operand_type
                }
            }
            UnaryOp::BitNot => {
                if !operand_type.is_integer() {
                    let display = self.display(&operand_type);
                    self.report(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!("Bitwise NOT operator requires integer operand, got {display}"),
                    );
                    Type::INT
                } else {
                    operand_type
                }
            }
            UnaryOp::PreInc | UnaryOp::PreDec => {
                if !operand_type.is_numeric()
                    || operand_type.as_primitive() == Some(Primitive::Bool)
                {
                    let display = self.display(&operand_type);
                    self.report(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!(
                            "Increment/decrement operator requires numeric operand, got {display}"
                        ),
                    );
                }
                operand_type
            }
        }
    }

    fn postfix(&mut self, expr: &Expr, operand: &Expr) -> Type {
        let operand_type = self.expr(operand);
        if !operand_type.is_numeric() {
            let display = self.display(&operand_type);
            self.report(
                ErrorKind::TypeMismatch,
                expr.span,
                format!("Postfix increment/decrement requires numeric type, got {display}"),
            );
        }
        operand_type
    }

    fn binary(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) -> Type {
        let left = self.expr(lhs);
        let right = self.expr(rhs);

        if op.is_arithmetic() {
            // `+` concatenates when either side is a string and the other is
            // convertible; codegen inserts the conversion.
            if op == BinaryOp::Add && (left.is_string() || right.is_string()) {
                let both = (left.is_string() || self.convertible_to_string(&left))
                    && (right.is_string() || self.convertible_to_string(&right));
                if both {
                    return Type::STRING;
                }
            }
            if op.is_integer_only() {
                if !left.is_integer() || !right.is_integer() {
                    self.report(
                        ErrorKind::TypeMismatch,
                        expr.span,
                        format!("Operator '{}' requires integer operands", op.symbol()),
                    );
                    return Type::INT;
                }
                return left;
            }
            if !left.is_numeric() || !right.is_numeric() {
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    format!("Operator '{}' requires numeric operands", op.symbol()),
                );
                return Type::INT;
            }
            return left;
        }

        if op.is_comparison() {
            let equality = matches!(op, BinaryOp::Eq | BinaryOp::Ne);
            let ok = if equality {
                (left.is_numeric() && right.is_numeric())
                    || (left.is_string() && right.is_string())
                    || (matches!(left, Type::Pointer(_)) && matches!(right, Type::Pointer(_)))
                    || left == right
            } else {
                left.is_numeric() && right.is_numeric()
            };
            if !ok {
                let (l, r) = (self.display(&left), self.display(&right));
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    format!(
                        "Operator '{}' cannot compare {l} and {r}",
                        op.symbol()
                    ),
                );
            }
            return Type::BOOL;
        }

        // Logical operators; pointers count as booleans.
        let valid = |ty: &Type| {
            matches!(ty, Type::Pointer(_)) || ty.as_primitive() == Some(Primitive::Bool)
        };
        if !valid(&left) || !valid(&right) {
            self.report(
                ErrorKind::TypeMismatch,
                expr.span,
                format!(
                    "Logical operator '{}' requires boolean operands or pointers",
                    op.symbol()
                ),
            );
        }
        Type::BOOL
    }

    fn cast(&mut self, expr: &Expr, operand: &Expr, target: &TypeName, bits: bool) -> Type {
        let source = self.expr(operand);
        let target_type = match Primitive::from_name(&target.name) {
            Some(primitive) => Some(Type::Primitive(primitive)),
            None => self
                .analysis
                .table
                .resolve(self.scope, &target.name)
                .and_then(|id| {
                    self.analysis
                        .table
                        .symbol(id)
                        .as_type()
                        .map(|data| data.type_representation.clone())
                }),
        };
        let target_type = match target_type {
            Some(ty) => ty,
            None => {
                self.report(
                    ErrorKind::TypeMismatch,
                    target.span,
                    "Invalid target type for cast",
                );
                return Type::VOID;
            }
        };

        if bits {
            let both_primitive =
                source.as_primitive().is_some() && target_type.as_primitive().is_some();
            if !both_primitive {
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    "bits_as cast can only be used between primitive types",
                );
            }
            return target_type;
        }

        let allowed = (source.as_primitive().is_some() && target_type.as_primitive().is_some())
            || (matches!(source, Type::Pointer(_)) && target_type.is_integer())
            || (matches!(source, Type::User(_)) && target_type.is_string());
        if !allowed {
            let (s, t) = (self.display(&source), self.display(&target_type));
            self.report(
                ErrorKind::TypeMismatch,
                expr.span,
                format!("Cannot cast {s} to {t}"),
            );
        }
        target_type
    }

    fn deref(&mut self, expr: &Expr, operand: &Expr) -> Type {
        let base = self.expr(operand);
        match base {
            Type::Pointer(pointee) => *pointee,
            other => {
                let display = self.display(&other);
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    format!("Cannot dereference non-pointer type {display}"),
                );
                Type::VOID
            }
        }
    }

    fn array_literal(&mut self, expr: &Expr, elems: &[Expr]) -> Type {
        let types: Vec<Type> = elems.iter().map(|e| self.expr(e)).collect();
        let element = match types.first() {
            Some(first) => first.clone(),
            None => Type::VOID,
        };
        if types.iter().any(|t| *t != element) {
            self.report(
                ErrorKind::TypeMismatch,
                expr.span,
                "Array literal elements must share one type",
            );
        }
        Type::array_of(element)
    }

    fn new_primitive(&mut self, expr: &Expr, prim: &str, init: &Expr) -> Type {
        let init_type = self.expr(init);
        let kind = match Primitive::from_name(prim) {
            Some(kind) if kind != Primitive::Void => kind,
            _ => {
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    "Invalid primitive type in allocation",
                );
                return Type::VOID;
            }
        };
        let target = Type::Primitive(kind);
        if !self.compatible(&init_type, &target, expr.id) {
            self.report(
                ErrorKind::TypeMismatch,
                init.span,
                format!(
                    "Cannot initialize {} allocation with value of type {}",
                    kind.name(),
                    self.display(&init_type)
                ),
            );
        }
        Type::pointer_to(target)
    }

    fn new_array(&mut self, expr: &Expr, elem: &TypeExpr, dims: &[Expr]) -> Type {
        for dim in dims {
            let dim_type = self.expr(dim);
            if !dim_type.is_integer() {
                let display = self.display(&dim_type);
                self.report(
                    ErrorKind::TypeMismatch,
                    dim.span,
                    format!("Array dimension must be int, got {display}"),
                );
            }
        }
        let element = match resolve_type_expr(&self.analysis.table, self.scope, elem) {
            Some(element) => element,
            None => {
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    "Invalid type in array allocation",
                );
                return Type::VOID;
            }
        };
        let mut ty = element;
        for _ in 0..dims.len() {
            ty = Type::array_of(ty);
        }
        ty
    }

    fn new_struct(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Type {
        let arg_types: Vec<Type> = args.iter().map(|a| self.expr(a)).collect();

        let struct_id = match self
            .analysis
            .table
            .resolve(self.scope, name)
            .filter(|&id| self.analysis.table.symbol(id).is_type())
        {
            Some(id) => id,
            None => {
                self.report(
                    ErrorKind::UnresolvedReference,
                    expr.span,
                    "Invalid struct type in allocation",
                );
                return Type::VOID;
            }
        };

        let constructor = self
            .analysis
            .table
            .resolve_function_call(self.scope, name, &arg_types)
            .filter(|&id| {
                self.analysis
                    .table
                    .symbol(id)
                    .as_function()
                    .map(|f| f.is_constructor)
                    .unwrap_or(false)
            })
            .or_else(|| self.analysis.constructor_map.get(name).copied());
        let constructor = match constructor {
            Some(ctor) => ctor,
            None => {
                self.report(
                    ErrorKind::TypeMismatch,
                    expr.span,
                    format!("Cannot find constructor for struct '{name}' with given parameters"),
                );
                return Type::VOID;
            }
        };

        let params = self.analysis.table.parameter_types(constructor);
        self.check_arguments(name, &arg_types, &params, args, expr.span);
        self.analysis.resolved_calls.insert(expr.id, constructor);

        let representation = self
            .analysis
            .table
            .symbol(struct_id)
            .as_type()
            .map(|d| d.type_representation.clone())
            .unwrap_or(Type::VOID);
        Type::pointer_to(representation)
    }

    fn if_expr(&mut self, expr: &Expr, condition: &Expr, then_value: &Expr, else_value: &Expr) -> Type {
        let cond_type = self.expr(condition);
        self.require_condition(&cond_type, condition.span, "If expression condition");

        let then_type = self.expr(then_value);
        let else_type = self.expr(else_value);

        if then_type == else_type {
            then_type
        } else if self.compatible(&then_type, &else_type, else_value.id) {
            else_type
        } else if self.compatible(&else_type, &then_type, then_value.id) {
            then_type
        } else {
            let (t, e) = (self.display(&then_type), self.display(&else_type));
            self.report(
                ErrorKind::TypeMismatch,
                expr.span,
                format!("Branches of if expression have incompatible types: {t} and {e}"),
            );
            then_type
        }
    }

    // -- compatibility -------------------------------------------------------

    /// True when `src` may flow into `tgt`. A successful value-to-string
    /// coercion records `tgt_node` as a conversion site for codegen.
    fn compatible(&mut self, src: &Type, tgt: &Type, tgt_node: NodeId) -> bool {
        if src == tgt {
            return true;
        }
        if tgt.is_string() && self.convertible_to_string(src) {
            self.analysis.string_conversions.insert(tgt_node);
            return true;
        }
        if let (Type::Pointer(src_pointee), Type::Pointer(_)) = (src, tgt) {
            if src_pointee.is_void() {
                return true;
            }
        }
        if let (Some(s), Some(t)) = (src.as_primitive(), tgt.as_primitive()) {
            return s.is_numeric() && t.is_numeric();
        }
        false
    }

    /// Primitives, pointers, and structs exposing `$toString : () -> string`
    /// convert to string. Every struct qualifies once the default stub is in.
    fn convertible_to_string(&self, ty: &Type) -> bool {
        match ty {
            Type::Primitive(_) | Type::Pointer(_) => true,
            Type::User(struct_id) => {
                let member_scope = match self.analysis.table.symbol(*struct_id).as_type() {
                    Some(data) => data.member_scope,
                    None => return false,
                };
                self.analysis
                    .table
                    .scope(member_scope)
                    .overloads
                    .get("$toString")
                    .and_then(|o| o.first())
                    .and_then(|&id| self.analysis.table.symbol(id).as_function())
                    .map(|data| {
                        data.parameters.is_empty()
                            && data.return_types.len() == 1
                            && data.return_types[0] == Type::STRING
                    })
                    .unwrap_or(false)
            }
            _ => false,
        }
    }
}

/// Decode a decimal/hex/binary literal the way emission does.
pub fn parse_int_literal(text: &str) -> Option<i64> {
    if let Some(hex) = text.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(bin) = text.strip_prefix("0b") {
        i64::from_str_radix(bin, 2).ok()
    } else {
        text.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skua_frontend::parse_source;

    fn check(src: &str) -> (Analysis, ErrorReporter) {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = crate::empty_analysis();
        crate::collect::run(&parsed.program, &mut analysis, &mut reporter);
        crate::constructors::run(&parsed.program, &mut analysis, &mut reporter);
        crate::special::run(&parsed.program, &mut analysis, &mut reporter);
        run(&parsed.program, &mut analysis, &mut reporter);
        (analysis, reporter)
    }

    fn kinds(reporter: &ErrorReporter) -> Vec<ErrorKind> {
        reporter.diagnostics().iter().map(|d| d.kind).collect()
    }

    #[test]
    fn clean_program_has_no_errors() {
        let (_, reporter) = check(
            "fn add(a: int, b: int) -> int { return a + b; }\n\
             fn main() { var x: int = add(1, 2); println(x); }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn every_expression_gets_a_type() {
        let (analysis, _) = check("fn main() { var x: int = 1 + 2 * 3; }");
        // literals, two binary nodes, and nothing missing: spot-check that
        // several types were recorded, all non-void.
        assert!(analysis.expression_types.len() >= 5);
        assert!(analysis
            .expression_types
            .values()
            .all(|t| *t == Type::INT));
    }

    #[test]
    fn implicit_string_conversion_is_recorded() {
        let (analysis, reporter) = check("fn main() { var x: int = 42; println(x); }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(
            !analysis.string_conversions.is_empty(),
            "int argument to println must record a conversion site"
        );
    }

    #[test]
    fn incompatible_init_is_reported() {
        let (_, reporter) = check("fn main() { var x: int = \"oops\"; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn numeric_widening_is_allowed() {
        let (_, reporter) = check("fn main() { var x: float = 1; var y: int = 2.5; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn null_pointer_assigns_to_any_pointer() {
        let (_, reporter) = check("fn main() { var p: int* = nullptr; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn pointer_types_do_not_mix() {
        let (_, reporter) =
            check("fn main() { var p: int* = new int(1); var q: float* = p; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn assignment_to_const_is_reported() {
        let (_, reporter) = check("fn main() { const x: int = 1; x = 2; }");
        assert!(kinds(&reporter).contains(&ErrorKind::AssignmentToConst));
    }

    #[test]
    fn return_type_mismatch_is_reported() {
        let (_, reporter) = check("fn f() -> int { return \"nope\"; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn void_function_rejects_return_value() {
        let (_, reporter) = check("fn f() { return 1; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn missing_return_value_is_reported() {
        let (_, reporter) = check("fn f() -> int { return; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn string_plus_int_concatenates() {
        let (analysis, reporter) = check("fn main() { var s: string = \"n=\" + 42; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(analysis
            .expression_types
            .values()
            .any(|t| *t == Type::STRING));
    }

    #[test]
    fn plus_with_unconvertible_operand_fails() {
        // A tuple is not convertible to string.
        let (_, reporter) = check("fn main() { var s: string = \"x\" + (1, 2); }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn shifts_reject_floats() {
        let (_, reporter) = check("fn main() { var x: int = 1 << 2.0; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn bitwise_not_rejects_bool() {
        let (_, reporter) = check("fn main() { var x: int = ~true; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn string_ordering_is_rejected() {
        let (_, reporter) = check("fn main() { var b: bool = \"a\" < \"b\"; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn string_equality_is_allowed() {
        let (_, reporter) = check("fn main() { var b: bool = \"a\" == \"b\"; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn logical_ops_accept_pointers() {
        let (_, reporter) =
            check("fn main() { var p: int* = nullptr; var b: bool = p && true; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn logical_ops_reject_ints() {
        let (_, reporter) = check("fn main() { var b: bool = 1 && 2; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn tuple_index_in_bounds() {
        let (_, reporter) = check("fn main() { var t: (int, string) = (1, \"a\"); var x: int = t[0]; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn tuple_index_out_of_bounds() {
        let (_, reporter) = check("fn main() { var t: (int, string) = (1, \"a\"); var x: int = t[4]; }");
        assert!(kinds(&reporter).contains(&ErrorKind::OutOfBounds));
    }

    #[test]
    fn tuple_field_access_by_number() {
        let (_, reporter) = check("fn main() { var t: (int, string) = (1, \"a\"); var x: int = t.0; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn index_requires_int() {
        let (_, reporter) =
            check("fn main() { var a: int[] = new int[3]; var x: int = a[1.5]; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn struct_field_access_resolves() {
        let (_, reporter) = check(
            "struct Point { x: int; y: int; }\n\
             fn main() { var p: Point* = new Point(1, 2); var x: int = p->x; }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn unknown_field_is_reported() {
        let (_, reporter) = check(
            "struct Point { x: int; }\n\
             fn main() { var p: Point* = new Point(1); var z: int = p->z; }",
        );
        assert!(kinds(&reporter).contains(&ErrorKind::UnresolvedReference));
    }

    #[test]
    fn private_field_from_outside_is_a_violation() {
        let (_, reporter) = check(
            "struct Vault { private { secret: int; } }\n\
             fn main() { var v: Vault* = new Vault(); var s: int = v->secret; }",
        );
        assert!(kinds(&reporter).contains(&ErrorKind::AccessViolation));
    }

    #[test]
    fn private_field_from_method_is_fine() {
        let (_, reporter) = check(
            "struct Vault { private { secret: int; } fn peek() -> int { return secret; } }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn method_call_through_pointer() {
        let (_, reporter) = check(
            "struct Counter { n: int; fn get() -> int { return n; } }\n\
             fn main() { var c: Counter* = new Counter(0); var v: int = c->get(); }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn missing_method_is_reported() {
        let (_, reporter) = check(
            "struct Counter { n: int; }\n\
             fn main() { var c: Counter* = new Counter(0); var v: int = c->missing(); }",
        );
        assert!(kinds(&reporter).contains(&ErrorKind::UnresolvedReference));
    }

    #[test]
    fn constructor_arity_mismatch() {
        let (_, reporter) = check(
            "struct Point { x: int; y: int; }\n\
             fn main() { var p: Point* = new Point(1); }",
        );
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn overload_resolution_picks_exact() {
        let (_, reporter) = check(
            "fn f(a: int) -> int { return 1; }\n\
             fn f(a: float) -> int { return 2; }\n\
             fn main() { var x: int = f(1); var y: int = f(2.0); }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn unknown_call_is_reported() {
        let (_, reporter) = check("fn main() { missing(); }");
        assert!(kinds(&reporter).contains(&ErrorKind::UnresolvedReference));
    }

    #[test]
    fn break_outside_loop_is_reported() {
        let (_, reporter) = check("fn main() { break; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn break_inside_loop_is_fine() {
        let (_, reporter) = check("fn main() { loop { break; } }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn deref_of_non_pointer_is_reported() {
        let (_, reporter) = check("fn main() { var x: int = 1; var y: int = *x; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn cast_rules() {
        let (_, reporter) = check(
            "fn main() {\n\
               var a: float = 1 as float;\n\
               var b: int = 2.5 as int;\n\
               var c: string = 3 as string;\n\
               var d: int = \"4\" as int;\n\
             }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn pointer_to_int_cast_is_allowed() {
        let (_, reporter) =
            check("fn main() { var p: int* = new int(1); var h: int = p as int; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn bits_cast_requires_primitives() {
        let (_, reporter) =
            check("fn main() { var p: int* = new int(1); var x: int = p bits_as int; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn if_expression_types_unify() {
        let (_, reporter) = check("fn main() { var x: float = true ? 1 : 2.5; }");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn if_expression_incompatible_branches() {
        let (_, reporter) = check("fn main() { var x: int = true ? 1 : \"s\"; }");
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn destructuring_checks_arity() {
        let (_, reporter) = check(
            "fn pair() -> (int, int) { return (1, 2); }\n\
             fn main() { var (a: int, b: int, c: int) = pair(); }",
        );
        assert!(kinds(&reporter).contains(&ErrorKind::TypeMismatch));
    }

    #[test]
    fn destructuring_of_tuple_works() {
        let (_, reporter) = check(
            "fn pair() -> (int, string) { return (1, \"x\"); }\n\
             fn main() { var (a: int, b: string) = pair(); }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
    }

    #[test]
    fn struct_to_string_conversion_site() {
        let (analysis, reporter) = check(
            "struct P { x: int; fn $toString() -> string { return \"p\"; } }\n\
             fn main() { var p: P* = new P(1); println(*p); }",
        );
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert!(!analysis.string_conversions.is_empty());
    }
}
