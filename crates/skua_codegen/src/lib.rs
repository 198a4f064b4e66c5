//! Stack-code generation.
//!
//! One walk per function body turns statements and expressions into the
//! linear instruction list of an [`ir::IrMethod`]. Expressions leave exactly
//! one value on the stack (none when void); statements leave the depth where
//! they found it. Control flow places labels allocated up front and tracked
//! in per-statement-kind maps; short-circuit operators keep their label
//! record keyed by expression node so nested chains never double-emit.

pub mod emit;
pub mod ir;
pub mod wrappers;

use std::collections::HashMap;

use skua_analysis::symbols::{ScopeId, SymbolId, SymbolTable};
use skua_analysis::types::{Primitive, Type};
use skua_analysis::Analysis;
use skua_frontend::ast::*;

use ir::{IrClass, IrInstruction, IrMethod};
use wrappers::primitive_descriptor;

/// JVM-style descriptor of a value type.
pub fn jvm_type(table: &SymbolTable, ty: &Type) -> String {
    match ty {
        Type::Primitive(p) => primitive_descriptor(*p).to_string(),
        Type::Array(element) => format!("[{}", jvm_type(table, element)),
        // Pointers print as their box or pointee class, structs as their
        // class name; tuples have no VM representation and keep the
        // printable form.
        other => table.type_to_string(other),
    }
}

/// Generate the full class list for a checked program: primitive boxes
/// first, then `Main`, then one class per struct.
pub fn generate(program: &Program, analysis: &mut Analysis) -> Vec<IrClass> {
    let mut generator = Generator {
        scope: analysis.table.global_scope,
        analysis,
        code: Vec::new(),
        local_index: 0,
        label_counter: 0,
        break_labels: Vec::new(),
        return_type: Type::VOID,
        if_labels: HashMap::new(),
        loop_labels: HashMap::new(),
        for_labels: HashMap::new(),
        expr_labels: HashMap::new(),
    };
    generator.compile(program)
}

struct IfLabels {
    end: String,
    branch_labels: Vec<String>,
}

struct LoopLabels {
    start: String,
    end: String,
}

struct ForLabels {
    condition: String,
    start: String,
    update: String,
    end: String,
}

/// Short-circuit bookkeeping per `&&`/`||` node.
struct ExprLabels {
    fallthrough: String,
    exit: String,
    processed: bool,
}

struct Generator<'a> {
    analysis: &'a mut Analysis,
    scope: ScopeId,
    code: Vec<IrInstruction>,
    local_index: i32,
    label_counter: u32,
    break_labels: Vec<String>,
    return_type: Type,
    if_labels: HashMap<NodeId, IfLabels>,
    loop_labels: HashMap<NodeId, LoopLabels>,
    for_labels: HashMap<NodeId, ForLabels>,
    expr_labels: HashMap<NodeId, ExprLabels>,
}

impl<'a> Generator<'a> {
    fn compile(&mut self, program: &Program) -> Vec<IrClass> {
        let mut classes = Vec::new();

        // Boxes for every primitive kind the checker saw, in fixed order.
        for kind in [
            Primitive::Int,
            Primitive::Float,
            Primitive::Bool,
            Primitive::String,
        ] {
            let used = self
                .analysis
                .expression_types
                .values()
                .any(|t| t.as_primitive() == Some(kind));
            if used {
                classes.push(wrappers::generate(&mut self.analysis.table, kind));
            }
        }

        if let Some(&scope) = self.analysis.scope_map.get(&program.id) {
            self.scope = scope;
        }

        let mut main_class = IrClass::new("Main");
        let mut struct_classes = Vec::new();
        for item in &program.items {
            match item {
                Item::Function(def) => {
                    if let Some(method) = self.emit_function(def) {
                        main_class.methods.push(method);
                    }
                }
                Item::Struct(def) => struct_classes.push(self.emit_struct(def)),
            }
        }

        classes.push(main_class);
        classes.extend(struct_classes);
        classes
    }

    // -- helpers -------------------------------------------------------------

    fn raw(&mut self, text: impl Into<String>) {
        self.code.push(IrInstruction::raw(text));
    }

    fn label(&mut self) -> String {
        let label = format!("L{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    fn place(&mut self, label: &str) {
        self.raw(format!("{label}:"));
    }

    fn ty(&self, id: NodeId) -> Type {
        self.analysis.expr_type(id)
    }

    fn prefix(ty: &Type) -> &'static str {
        match ty {
            Type::Primitive(Primitive::Int) | Type::Primitive(Primitive::Bool) => "i",
            Type::Primitive(Primitive::Float) => "f",
            _ => "a",
        }
    }

    fn desc(&self, ty: &Type) -> String {
        jvm_type(&self.analysis.table, ty)
    }

    fn wants_conversion(&self, id: NodeId) -> bool {
        self.analysis.string_conversions.contains(&id)
    }

    /// Slot of a variable symbol, assigned on first demand.
    fn slot_of(&mut self, symbol: SymbolId) -> i32 {
        let current = self
            .analysis
            .table
            .symbol(symbol)
            .as_variable()
            .map(|v| v.local_index)
            .unwrap_or(-1);
        if current >= 0 {
            return current;
        }
        let slot = self.local_index;
        self.local_index += 1;
        if let skua_analysis::symbols::SymbolKind::Variable(data) =
            &mut self.analysis.table.symbol_mut(symbol).kind
        {
            data.local_index = slot;
        }
        slot
    }

    fn resolve_var(&self, name: &str) -> Option<SymbolId> {
        self.analysis
            .table
            .resolve(self.scope, name)
            .filter(|&id| self.analysis.table.symbol(id).as_variable().is_some())
    }

    /// Name of the struct owning a member, for `getfield`/`putfield`.
    fn parent_struct_name(&self, symbol: SymbolId) -> Option<String> {
        let parent = self
            .analysis
            .table
            .symbol(symbol)
            .as_variable()?
            .parent_struct?;
        Some(self.analysis.table.symbol(parent).name.clone())
    }

    fn jump_if_false(&mut self, condition_type: &Type, label: &str) {
        if matches!(condition_type, Type::Pointer(_)) {
            self.raw(format!("ifnull {label}"));
        } else {
            self.raw(format!("ifeq {label}"));
        }
    }

    fn jump_if_true(&mut self, condition_type: &Type, label: &str) {
        if matches!(condition_type, Type::Pointer(_)) {
            self.raw(format!("ifnonnull {label}"));
        } else {
            self.raw(format!("ifne {label}"));
        }
    }

    /// Convert the stack top from `from` to a `java/lang/String`.
    fn emit_to_string(&mut self, from: &Type) {
        match from {
            Type::Primitive(Primitive::String) | Type::Primitive(Primitive::Void) => {}
            Type::Primitive(Primitive::Int) => {
                self.raw("invokestatic java/lang/Integer.toString (I)java/lang/String")
            }
            Type::Primitive(Primitive::Float) => {
                self.raw("invokestatic java/lang/Float.toString (F)java/lang/String")
            }
            Type::Primitive(Primitive::Bool) => {
                self.raw("invokestatic java/lang/Boolean.toString (Z)java/lang/String")
            }
            Type::User(id) => self.emit_user_to_string(*id),
            Type::Pointer(pointee) => match pointee.as_ref() {
                Type::User(id) => self.emit_user_to_string(*id),
                _ => self.raw(
                    "invokestatic java/lang/String.valueOf (java/lang/Object)java/lang/String",
                ),
            },
            _ => self
                .raw("invokestatic java/lang/String.valueOf (java/lang/Object)java/lang/String"),
        }
    }

    /// `$toString` call on a struct value; the injected default stub has no
    /// emitted body, so it routes to the VM's own `toString`.
    fn emit_user_to_string(&mut self, struct_id: SymbolId) {
        let table = &self.analysis.table;
        let stub = table
            .symbol(struct_id)
            .as_type()
            .and_then(|data| {
                table
                    .scope(data.member_scope)
                    .overloads
                    .get("$toString")
                    .and_then(|o| o.first())
            })
            .map(|&id| table.symbol(id).is_builtin)
            .unwrap_or(true);
        if stub {
            self.raw("invokevirtual java/lang/Object.toString() java/lang/String");
        } else {
            let name = self.analysis.table.symbol(struct_id).name.clone();
            self.raw(format!("invokevirtual {name}.$toString_() java/lang/String"));
        }
    }

    fn enter_scope(&mut self, key: NodeId) -> ScopeId {
        let saved = self.scope;
        if let Some(&scope) = self.analysis.scope_map.get(&key) {
            self.scope = scope;
        }
        saved
    }

    // -- functions and structs -----------------------------------------------

    fn emit_function(&mut self, def: &FunctionDef) -> Option<IrMethod> {
        let symbol = *self.analysis.function_symbols.get(&def.id)?;
        let data = self.analysis.table.symbol(symbol).as_function()?;
        let is_method = data.is_struct_method;
        let parameters = data.parameters.clone();
        self.return_type = data.return_types.first().cloned().unwrap_or(Type::VOID);

        let saved_scope = self.enter_scope(def.id);
        self.local_index = if is_method { 1 } else { 0 };
        // The receiver occupies slot 0.
        if is_method {
            if let Some(this) = self.resolve_var("this") {
                if let skua_analysis::symbols::SymbolKind::Variable(data) =
                    &mut self.analysis.table.symbol_mut(this).kind
                {
                    data.local_index = 0;
                }
            }
        }
        for param in parameters {
            self.slot_of(param);
        }

        self.code = Vec::new();
        for stmt in &def.body.statements {
            self.emit_stmt(stmt);
        }

        self.scope = saved_scope;
        Some(IrMethod {
            symbol,
            instructions: std::mem::take(&mut self.code),
        })
    }

    fn emit_struct(&mut self, def: &StructDef) -> IrClass {
        let mut class = IrClass::new(def.name.clone());
        let saved_scope = self.enter_scope(def.id);
        let member_scope = self.scope;

        // Fields in declaration order.
        for field in &def.fields {
            if let Some(&id) = self
                .analysis
                .table
                .scope(member_scope)
                .symbols
                .get(&field.name)
            {
                class.fields.push(id);
            }
        }

        for method in &def.methods {
            if let Some(emitted) = self.emit_function(method) {
                class.methods.push(emitted);
            }
        }

        if let Some(ctor) = self.emit_constructor(def) {
            class.methods.push(ctor);
        }

        self.scope = saved_scope;
        class
    }

    /// The synthesized constructor: chain to `Object.<init>`, run field
    /// default initializers, then store each public field from its parameter
    /// slot.
    fn emit_constructor(&mut self, def: &StructDef) -> Option<IrMethod> {
        let symbol = *self.analysis.constructor_map.get(&def.name)?;
        let parameters = self
            .analysis
            .table
            .symbol(symbol)
            .as_function()?
            .parameters
            .clone();

        self.code = Vec::new();
        self.local_index = 1 + parameters.len() as i32;
        self.raw("aload 0");
        self.raw("invokespecial java/lang/Object.<init>()V");

        // Defaults first, parameter stores second; a defaulted public field
        // is overwritten by its parameter.
        for field in &def.fields {
            let init = match &field.init {
                Some(init) => init,
                None => continue,
            };
            let field_type = self
                .resolve_var(&field.name)
                .and_then(|id| {
                    self.analysis
                        .table
                        .symbol(id)
                        .as_variable()
                        .map(|v| v.data_type.clone())
                })
                .unwrap_or(Type::VOID);
            self.raw("aload 0");
            self.emit_expr(init);
            if self.wants_conversion(field.id) {
                let from = self.ty(init.id);
                self.emit_to_string(&from);
            }
            let desc = self.desc(&field_type);
            self.raw(format!("putfield {}.{} {}", def.name, field.name, desc));
        }

        for (i, &param) in parameters.iter().enumerate() {
            let (name, param_type) = {
                let symbol = self.analysis.table.symbol(param);
                let ty = symbol
                    .as_variable()
                    .map(|v| v.data_type.clone())
                    .unwrap_or(Type::VOID);
                (symbol.name.clone(), ty)
            };
            self.raw("aload 0");
            self.raw(format!("{}load {}", Self::prefix(&param_type), i + 1));
            let desc = self.desc(&param_type);
            self.raw(format!("putfield {}.{} {}", def.name, name, desc));
        }
        self.raw("return");

        Some(IrMethod {
            symbol,
            instructions: std::mem::take(&mut self.code),
        })
    }

    // -- statements ----------------------------------------------------------

    fn emit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::VarDecl(decl) => self.emit_var_decl(stmt, decl),
            StmtKind::Assign { target, value } => self.emit_assign(stmt, target, value),
            StmtKind::Return { value } => self.emit_return(value.as_ref(), stmt.id),
            StmtKind::Expr { expr } => {
                self.emit_expr(expr);
                if !self.ty(expr.id).is_void() {
                    self.raw("pop");
                }
            }
            StmtKind::If(if_stmt) => self.emit_if(stmt, if_stmt),
            StmtKind::While { condition, body } => self.emit_while(stmt, condition, body),
            StmtKind::Until { condition, body } => self.emit_until(stmt, condition, body),
            StmtKind::For(for_stmt) => self.emit_for(stmt, for_stmt),
            StmtKind::Loop { body } => self.emit_loop(stmt, body),
            StmtKind::Break => {
                if let Some(label) = self.break_labels.last().cloned() {
                    self.raw(format!("goto {label}"));
                }
            }
            // Tuples have no VM representation; destructuring is validated
            // but not lowered.
            StmtKind::Destructure { .. } => {}
        }
    }

    fn emit_var_decl(&mut self, stmt: &Stmt, decl: &VarDecl) {
        let symbol = match self.resolve_var(&decl.name) {
            Some(symbol) => symbol,
            None => return,
        };
        let slot = self.slot_of(symbol);
        let init = match &decl.init {
            Some(init) => init,
            None => return,
        };
        self.emit_expr(init);
        if self.wants_conversion(stmt.id) {
            let from = self.ty(init.id);
            self.emit_to_string(&from);
        }
        let var_type = self
            .analysis
            .table
            .symbol(symbol)
            .as_variable()
            .map(|v| v.data_type.clone())
            .unwrap_or(Type::VOID);
        self.raw(format!("{}store {}", Self::prefix(&var_type), slot));
    }

    fn emit_assign(&mut self, stmt: &Stmt, target: &Expr, value: &Expr) {
        match &target.kind {
            ExprKind::Variable(name) => {
                let symbol = match self.resolve_var(name) {
                    Some(symbol) => symbol,
                    None => return,
                };
                let (is_member, var_type) = {
                    let data = self.analysis.table.symbol(symbol).as_variable();
                    (
                        data.map(|v| v.is_struct_member).unwrap_or(false),
                        data.map(|v| v.data_type.clone()).unwrap_or(Type::VOID),
                    )
                };
                if is_member {
                    self.raw("aload 0");
                    self.emit_expr(value);
                    self.emit_assign_conversion(stmt, value);
                    let owner = self.parent_struct_name(symbol).unwrap_or_default();
                    let desc = self.desc(&var_type);
                    self.raw(format!("putfield {owner}.{name} {desc}"));
                } else {
                    self.emit_expr(value);
                    self.emit_assign_conversion(stmt, value);
                    let slot = self.slot_of(symbol);
                    self.raw(format!("{}store {}", Self::prefix(&var_type), slot));
                }
            }
            ExprKind::Deref { operand } => {
                let pointee = match self.ty(operand.id) {
                    Type::Pointer(pointee) => *pointee,
                    _ => return,
                };
                let kind = match pointee.as_primitive() {
                    Some(kind) if kind != Primitive::Void => kind,
                    // Writing through a pointer to a struct value has no
                    // meaning on the VM; only boxes are writable.
                    _ => return,
                };
                self.emit_expr(operand);
                self.emit_expr(value);
                self.emit_assign_conversion(stmt, value);
                let class = skua_analysis::symbols::wrapper_class_name(kind);
                self.raw(format!(
                    "invokevirtual {class}.setValue({})V",
                    primitive_descriptor(kind)
                ));
            }
            ExprKind::Index { base, index } => {
                self.emit_expr(base);
                self.emit_expr(index);
                self.emit_expr(value);
                self.emit_assign_conversion(stmt, value);
                let element = self.ty(target.id);
                self.raw(element_store(&element));
            }
            ExprKind::FieldAccess(access) => self.emit_field_store(stmt, access, value),
            _ => {}
        }
    }

    fn emit_assign_conversion(&mut self, stmt: &Stmt, value: &Expr) {
        if self.wants_conversion(stmt.id) {
            let from = self.ty(value.id);
            self.emit_to_string(&from);
        }
    }

    fn emit_return(&mut self, value: Option<&Expr>, stmt_id: NodeId) {
        match value {
            Some(value) if !self.return_type.is_void() => {
                self.emit_expr(value);
                if self.wants_conversion(stmt_id) {
                    let from = self.ty(value.id);
                    self.emit_to_string(&from);
                }
                let prefix = Self::prefix(&self.return_type.clone());
                self.raw(format!("{prefix}return"));
            }
            _ => self.raw("return"),
        }
    }

    fn emit_if(&mut self, stmt: &Stmt, if_stmt: &IfStmt) {
        let end = self.label();
        self.if_labels.insert(
            stmt.id,
            IfLabels {
                end: end.clone(),
                branch_labels: Vec::new(),
            },
        );

        let count = if_stmt.branches.len();
        for (i, (condition, block)) in if_stmt.branches.iter().enumerate() {
            self.emit_expr(condition);
            let last = i + 1 == count;
            let false_target = if last && if_stmt.else_block.is_none() {
                end.clone()
            } else {
                let label = self.label();
                if let Some(labels) = self.if_labels.get_mut(&stmt.id) {
                    labels.branch_labels.push(label.clone());
                }
                label
            };
            let cond_type = self.ty(condition.id);
            self.jump_if_false(&cond_type, &false_target);

            let saved = self.enter_scope(block.id);
            for inner in &block.statements {
                self.emit_stmt(inner);
            }
            self.scope = saved;
            self.raw(format!("goto {end}"));
            if false_target != end {
                self.place(&false_target);
            }
        }

        if let Some(block) = &if_stmt.else_block {
            let saved = self.enter_scope(block.id);
            for inner in &block.statements {
                self.emit_stmt(inner);
            }
            self.scope = saved;
        }
        self.place(&end);
    }

    fn emit_while(&mut self, stmt: &Stmt, condition: &Expr, body: &Block) {
        let start = self.label();
        let end = self.label();
        self.loop_labels.insert(
            stmt.id,
            LoopLabels {
                start: start.clone(),
                end: end.clone(),
            },
        );

        let saved = self.enter_scope(stmt.id);
        self.place(&start);
        self.emit_expr(condition);
        let cond_type = self.ty(condition.id);
        self.jump_if_false(&cond_type, &end);

        self.break_labels.push(end.clone());
        for inner in &body.statements {
            self.emit_stmt(inner);
        }
        self.break_labels.pop();
        self.raw(format!("goto {start}"));
        self.place(&end);
        self.scope = saved;
    }

    fn emit_until(&mut self, stmt: &Stmt, condition: &Expr, body: &Block) {
        let start = self.label();
        let end = self.label();
        self.loop_labels.insert(
            stmt.id,
            LoopLabels {
                start: start.clone(),
                end: end.clone(),
            },
        );

        let saved = self.enter_scope(stmt.id);
        self.place(&start);
        self.break_labels.push(end.clone());
        for inner in &body.statements {
            self.emit_stmt(inner);
        }
        self.break_labels.pop();
        // Loop back while the condition is still false.
        self.emit_expr(condition);
        let cond_type = self.ty(condition.id);
        self.jump_if_false(&cond_type, &start);
        self.place(&end);
        self.scope = saved;
    }

    fn emit_loop(&mut self, stmt: &Stmt, body: &Block) {
        let start = self.label();
        let end = self.label();
        self.loop_labels.insert(
            stmt.id,
            LoopLabels {
                start: start.clone(),
                end: end.clone(),
            },
        );

        let saved = self.enter_scope(stmt.id);
        self.place(&start);
        self.break_labels.push(end.clone());
        for inner in &body.statements {
            self.emit_stmt(inner);
        }
        self.break_labels.pop();
        self.raw(format!("goto {start}"));
        self.place(&end);
        self.scope = saved;
    }

    fn emit_for(&mut self, stmt: &Stmt, for_stmt: &ForStmt) {
        let condition = self.label();
        let start = self.label();
        let update = self.label();
        let end = self.label();
        self.for_labels.insert(
            stmt.id,
            ForLabels {
                condition: condition.clone(),
                start: start.clone(),
                update: update.clone(),
                end: end.clone(),
            },
        );

        let saved = self.enter_scope(stmt.id);
        if let Some(init) = &for_stmt.init {
            self.emit_stmt(init);
        }
        self.place(&condition);
        self.emit_expr(&for_stmt.condition);
        let cond_type = self.ty(for_stmt.condition.id);
        self.jump_if_false(&cond_type, &end);
        self.raw(format!("goto {start}"));

        self.place(&update);
        if let Some(update_expr) = &for_stmt.update {
            self.emit_expr(update_expr);
            if !self.ty(update_expr.id).is_void() {
                self.raw("pop");
            }
        }
        self.raw(format!("goto {condition}"));

        self.place(&start);
        self.break_labels.push(end.clone());
        for inner in &for_stmt.body.statements {
            self.emit_stmt(inner);
        }
        self.break_labels.pop();
        self.raw(format!("goto {update}"));
        self.place(&end);
        self.scope = saved;
    }

    // -- expressions ---------------------------------------------------------

    fn emit_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::IntLit(text) => {
                let value = skua_analysis::typecheck::parse_int_literal(text).unwrap_or(0);
                self.raw(format!("ldc {value}"));
            }
            ExprKind::FloatLit(text) => self.raw(format!("ldc {text}")),
            ExprKind::StringLit(text) => self.raw(format!("ldc \"{text}\"")),
            ExprKind::BoolLit(true) => self.raw("iconst 1"),
            ExprKind::BoolLit(false) => self.raw("iconst 0"),
            ExprKind::NullLit => self.raw("aconst_null"),
            ExprKind::Variable(name) => self.emit_variable_load(name),
            ExprKind::FieldAccess(access) => {
                self.emit_access_chain(access, access.segments.len());
            }
            ExprKind::Index { base, index } => {
                self.emit_expr(base);
                self.emit_expr(index);
                let element = self.ty(expr.id);
                self.raw(element_load(&element));
            }
            ExprKind::Call(call) => self.emit_call(call),
            ExprKind::Unary { op, operand } => self.emit_unary(*op, operand),
            ExprKind::Postfix { op, operand } => self.emit_postfix(*op, operand),
            ExprKind::Binary { op, lhs, rhs } => self.emit_binary(expr, *op, lhs, rhs),
            ExprKind::Cast { operand, .. } => self.emit_cast(expr, operand),
            ExprKind::Deref { operand } => {
                self.emit_expr(operand);
                self.emit_unbox(&self.ty(operand.id));
            }
            ExprKind::Ref { operand } => self.emit_expr(operand),
            // No VM representation; validated by the checker only.
            ExprKind::TupleLit(_) => {}
            ExprKind::ArrayLit(elems) => self.emit_array_literal(expr, elems),
            ExprKind::NewPrimitive { prim, init } => self.emit_new_primitive(expr, prim, init),
            ExprKind::NewArray { dims, .. } => {
                for dim in dims {
                    self.emit_expr(dim);
                }
                let desc = self.desc(&self.ty(expr.id));
                self.raw(format!("multianewarray {desc} {}", dims.len()));
            }
            ExprKind::NewStruct { name, args } => self.emit_new_struct(expr, name, args),
            ExprKind::IfExpr {
                condition,
                then_value,
                else_value,
            } => self.emit_if_expr(condition, then_value, else_value),
        }
    }

    fn emit_variable_load(&mut self, name: &str) {
        let symbol = match self.resolve_var(name) {
            Some(symbol) => symbol,
            None => return,
        };
        let (is_member, var_type) = {
            let data = self.analysis.table.symbol(symbol).as_variable();
            (
                data.map(|v| v.is_struct_member).unwrap_or(false),
                data.map(|v| v.data_type.clone()).unwrap_or(Type::VOID),
            )
        };
        if is_member {
            let owner = self.parent_struct_name(symbol).unwrap_or_default();
            self.raw("aload 0");
            let desc = self.desc(&var_type);
            self.raw(format!("getfield {owner}.{name} {desc}"));
        } else {
            let slot = self.slot_of(symbol);
            self.raw(format!("{}load {}", Self::prefix(&var_type), slot));
        }
    }

    /// Emit the head and the first `upto` segments of a field-access chain,
    /// leaving that prefix's value on the stack. Returns the value's type.
    fn emit_access_chain(&mut self, access: &FieldAccess, upto: usize) -> Type {
        self.emit_expr(&access.head);
        let mut current = self.ty(access.head.id);

        for segment in access.segments.iter().take(upto) {
            if segment.via_arrow {
                // Dereference before the lookup; only boxed primitives need
                // an actual unbox call, object references are already
                // "dereferenced".
                if let Type::Pointer(pointee) = &current {
                    if pointee.as_primitive().is_some() {
                        self.emit_unbox(&current);
                    }
                    current = (**pointee).clone();
                }
            }

            let owner = match &current {
                Type::User(id) => self.analysis.table.symbol(*id).name.clone(),
                // Tuples and failed lookups have nothing to emit.
                _ => return self.ty(segment.id),
            };

            match &segment.kind {
                FieldSegmentKind::Field(name) => {
                    let field_type = self.ty(segment.id);
                    let desc = self.desc(&field_type);
                    self.raw(format!("getfield {owner}.{name} {desc}"));
                    current = field_type;
                }
                FieldSegmentKind::Method(call) => {
                    self.emit_arguments(&call.args);
                    if let Some(&symbol) = self.analysis.resolved_calls.get(&call.id) {
                        self.code.push(IrInstruction::Call(symbol));
                    }
                    current = self.ty(segment.id);
                }
                FieldSegmentKind::Index { name, index } => {
                    let declared = self.member_field_type(&owner, name);
                    let desc = self.desc(&declared);
                    self.raw(format!("getfield {owner}.{name} {desc}"));
                    self.emit_expr(index);
                    let element = self.ty(segment.id);
                    self.raw(element_load(&element));
                    current = element;
                }
            }
        }
        current
    }

    fn member_field_type(&self, owner: &str, field: &str) -> Type {
        let table = &self.analysis.table;
        table
            .resolve(self.scope, owner)
            .and_then(|id| table.symbol(id).as_type().map(|d| d.member_scope))
            .and_then(|scope| table.scope(scope).symbols.get(field).copied())
            .and_then(|id| table.symbol(id).as_variable().map(|v| v.data_type.clone()))
            .unwrap_or(Type::VOID)
    }

    fn emit_field_store(&mut self, stmt: &Stmt, access: &FieldAccess, value: &Expr) {
        let segments = &access.segments;
        let last = match segments.last() {
            Some(last) => last,
            None => return,
        };
        let before = self.emit_access_chain(access, segments.len() - 1);
        let owner_type = if last.via_arrow {
            match before {
                Type::Pointer(pointee) => *pointee,
                other => other,
            }
        } else {
            before
        };
        let owner = match owner_type {
            Type::User(id) => self.analysis.table.symbol(id).name.clone(),
            _ => return,
        };

        match &last.kind {
            FieldSegmentKind::Field(name) => {
                self.emit_expr(value);
                self.emit_assign_conversion(stmt, value);
                let field_type = self.member_field_type(&owner, name);
                let desc = self.desc(&field_type);
                self.raw(format!("putfield {owner}.{name} {desc}"));
            }
            FieldSegmentKind::Index { name, index } => {
                let declared = self.member_field_type(&owner, name);
                let desc = self.desc(&declared);
                self.raw(format!("getfield {owner}.{name} {desc}"));
                self.emit_expr(index);
                self.emit_expr(value);
                self.emit_assign_conversion(stmt, value);
                let element = self.ty(last.id);
                self.raw(element_store(&element));
            }
            FieldSegmentKind::Method(_) => {}
        }
    }

    fn emit_arguments(&mut self, args: &[Expr]) {
        for arg in args {
            self.emit_expr(arg);
            if self.wants_conversion(arg.id) {
                let from = self.ty(arg.id);
                self.emit_to_string(&from);
            }
        }
    }

    fn emit_call(&mut self, call: &CallExpr) {
        let resolved = self.analysis.resolved_calls.get(&call.id).copied();
        let is_builtin = resolved
            .map(|id| self.analysis.table.symbol(id).is_builtin)
            .unwrap_or(false);

        if is_builtin {
            self.emit_builtin_call(call);
            return;
        }

        let symbol = match resolved {
            Some(symbol) => symbol,
            None => return,
        };
        let (is_ctor, is_method, struct_name) = {
            let data = self.analysis.table.symbol(symbol).as_function();
            let is_ctor = data.map(|d| d.is_constructor).unwrap_or(false);
            let is_method = data.map(|d| d.is_struct_method).unwrap_or(false);
            let struct_name = data
                .and_then(|d| d.return_types.first())
                .and_then(|t| t.as_user())
                .map(|id| self.analysis.table.symbol(id).name.clone());
            (is_ctor, is_method, struct_name)
        };

        if is_ctor {
            // A bare `Point(...)` builds an instance just like `new`.
            if let Some(name) = struct_name {
                self.raw(format!("new {name}"));
                self.raw("dup");
            }
            self.emit_arguments(&call.args);
            self.code.push(IrInstruction::Call(symbol));
            return;
        }

        if is_method {
            // Implicit receiver: a sibling method called without a field
            // access loads `this` first.
            self.raw("aload 0");
        }
        self.emit_arguments(&call.args);
        self.code.push(IrInstruction::Call(symbol));
    }

    fn emit_builtin_call(&mut self, call: &CallExpr) {
        match call.name.as_str() {
            "println" | "print" => {
                for arg in &call.args {
                    self.raw("getstatic java/lang/System.out java/io/PrintStream");
                    self.emit_expr(arg);
                    if self.wants_conversion(arg.id) {
                        let from = self.ty(arg.id);
                        self.emit_to_string(&from);
                    }
                    let method = if call.name == "println" && call.args.len() == 1 {
                        "println"
                    } else {
                        "print"
                    };
                    self.raw(format!(
                        "invokevirtual java/io/PrintStream.{method}(java/lang/String)V"
                    ));
                }
            }
            "readline" | "read" => {
                self.raw("new java/util/Scanner");
                self.raw("dup");
                self.raw("getstatic java/lang/System.in java/io/InputStream");
                self.raw("invokespecial java/util/Scanner.<init>(java/io/InputStream)V");
                if call.name == "readline" {
                    self.raw("invokevirtual java/util/Scanner.nextLine()java/lang/String");
                } else {
                    self.raw("invokevirtual java/util/Scanner.next()java/lang/String");
                }
            }
            "sqrt" => {
                self.emit_arguments(&call.args);
                self.raw("invokestatic java/lang/Math.sqrt(F)F");
            }
            _ => {}
        }
    }

    fn emit_unary(&mut self, op: UnaryOp, operand: &Expr) {
        match op {
            UnaryOp::Plus => self.emit_expr(operand),
            UnaryOp::Neg => {
                self.emit_expr(operand);
                let ty = self.ty(operand.id);
                self.raw(format!("{}neg", Self::prefix(&ty)));
            }
            UnaryOp::BitNot => {
                self.emit_expr(operand);
                self.raw("iconst -1");
                self.raw("ixor");
            }
            UnaryOp::Not => {
                self.emit_expr(operand);
                let ty = self.ty(operand.id);
                let truthy = self.label();
                let done = self.label();
                if matches!(ty, Type::Pointer(_)) {
                    self.raw(format!("ifnull {truthy}"));
                } else {
                    self.raw(format!("ifeq {truthy}"));
                }
                self.raw("iconst 0");
                self.raw(format!("goto {done}"));
                self.place(&truthy);
                self.raw("iconst 1");
                self.place(&done);
            }
            UnaryOp::PreInc | UnaryOp::PreDec => {
                self.emit_expr(operand);
                let ty = self.ty(operand.id);
                self.emit_step(&ty, op == UnaryOp::PreInc);
                // The updated value is both the result and the write-back.
                self.raw("dup");
                self.emit_store_back(operand, &ty);
            }
        }
    }

    fn emit_postfix(&mut self, op: PostfixOp, operand: &Expr) {
        self.emit_expr(operand);
        let ty = self.ty(operand.id);
        if !self.is_storable(operand) {
            return;
        }
        // Keep the pre-update value underneath while storing the new one.
        self.raw("dup");
        self.emit_step(&ty, op == PostfixOp::Inc);
        self.emit_store_back(operand, &ty);
    }

    fn emit_step(&mut self, ty: &Type, increment: bool) {
        if ty.as_primitive() == Some(Primitive::Float) {
            self.raw("ldc 1.0");
            self.raw(if increment { "fadd" } else { "fsub" });
        } else {
            self.raw("ldc 1");
            self.raw(if increment { "iadd" } else { "isub" });
        }
    }

    fn is_storable(&self, operand: &Expr) -> bool {
        matches!(operand.kind, ExprKind::Variable(_))
    }

    /// Store the stack top back into a plain variable operand.
    fn emit_store_back(&mut self, operand: &Expr, ty: &Type) {
        let name = match &operand.kind {
            ExprKind::Variable(name) => name.clone(),
            _ => {
                // Not a storable location: drop the computed value.
                self.raw("pop");
                return;
            }
        };
        let symbol = match self.resolve_var(&name) {
            Some(symbol) => symbol,
            None => {
                self.raw("pop");
                return;
            }
        };
        let is_member = self
            .analysis
            .table
            .symbol(symbol)
            .as_variable()
            .map(|v| v.is_struct_member)
            .unwrap_or(false);
        if is_member {
            let owner = self.parent_struct_name(symbol).unwrap_or_default();
            let desc = self.desc(ty);
            self.raw("aload 0");
            self.raw("swap");
            self.raw(format!("putfield {owner}.{name} {desc}"));
        } else {
            let slot = self.slot_of(symbol);
            self.raw(format!("{}store {}", Self::prefix(ty), slot));
        }
    }

    fn emit_binary(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        if op.is_logical() {
            self.emit_logical(expr, op, lhs, rhs);
            return;
        }
        if op.is_comparison() {
            self.emit_comparison(op, lhs, rhs);
            return;
        }

        // String concatenation.
        if op == BinaryOp::Add && self.ty(expr.id).is_string() {
            self.emit_expr(lhs);
            let left = self.ty(lhs.id);
            if !left.is_string() {
                self.emit_to_string(&left);
            }
            self.emit_expr(rhs);
            let right = self.ty(rhs.id);
            if !right.is_string() {
                self.emit_to_string(&right);
            }
            self.raw(
                "invokedynamic makeConcatWithConstants(java/lang/String, java/lang/String)java/lang/String \"\\u0001\\u0001\"",
            );
            return;
        }

        self.emit_expr(lhs);
        self.emit_expr(rhs);
        let prefix = Self::prefix(&self.ty(expr.id));
        let mnemonic = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Rem => "rem",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::BitAnd => "and",
            BinaryOp::BitOr => "or",
            BinaryOp::BitXor => "xor",
            _ => return,
        };
        self.raw(format!("{prefix}{mnemonic}"));
    }

    /// Comparisons push 1 through a true-label, 0 on the fallthrough.
    fn emit_comparison(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        self.emit_expr(lhs);
        self.emit_expr(rhs);
        let operand_type = self.ty(lhs.id);
        let truthy = self.label();
        let done = self.label();

        match &operand_type {
            Type::Primitive(Primitive::Float) => {
                self.raw("fcmpg");
                let cc = condition_code(op);
                self.raw(format!("if{cc} {truthy}"));
            }
            Type::Primitive(Primitive::String) => {
                self.raw("invokevirtual java/lang/String.equals(java/lang/Object)Z");
                // `equals` already leaves a boolean; `!=` inverts it.
                if op == BinaryOp::Ne {
                    self.raw(format!("ifeq {truthy}"));
                } else {
                    self.raw(format!("ifne {truthy}"));
                }
            }
            Type::Primitive(_) => {
                let cc = condition_code(op);
                self.raw(format!("if_icmp{cc} {truthy}"));
            }
            _ => {
                // Reference comparison.
                let cc = if op == BinaryOp::Ne { "ne" } else { "eq" };
                self.raw(format!("if_acmp{cc} {truthy}"));
            }
        }
        self.raw("iconst 0");
        self.raw(format!("goto {done}"));
        self.place(&truthy);
        self.raw("iconst 1");
        self.place(&done);
    }

    fn emit_logical(&mut self, expr: &Expr, op: BinaryOp, lhs: &Expr, rhs: &Expr) {
        if self
            .expr_labels
            .get(&expr.id)
            .map(|l| l.processed)
            .unwrap_or(false)
        {
            return;
        }
        let fallthrough = self.label();
        let exit = self.label();
        self.expr_labels.insert(
            expr.id,
            ExprLabels {
                fallthrough: fallthrough.clone(),
                exit: exit.clone(),
                processed: false,
            },
        );

        if op == BinaryOp::And {
            self.emit_expr(lhs);
            let left = self.ty(lhs.id);
            self.jump_if_false(&left, &fallthrough);
            self.emit_expr(rhs);
            let right = self.ty(rhs.id);
            self.jump_if_false(&right, &fallthrough);
            self.raw("iconst 1");
            self.raw(format!("goto {exit}"));
            self.place(&fallthrough);
            self.raw("iconst 0");
            self.place(&exit);
        } else {
            self.emit_expr(lhs);
            let left = self.ty(lhs.id);
            self.jump_if_true(&left, &fallthrough);
            self.emit_expr(rhs);
            let right = self.ty(rhs.id);
            self.jump_if_true(&right, &fallthrough);
            self.raw("iconst 0");
            self.raw(format!("goto {exit}"));
            self.place(&fallthrough);
            self.raw("iconst 1");
            self.place(&exit);
        }

        if let Some(labels) = self.expr_labels.get_mut(&expr.id) {
            labels.processed = true;
        }
    }

    fn emit_cast(&mut self, expr: &Expr, operand: &Expr) {
        self.emit_expr(operand);
        let source = self.ty(operand.id);
        let target_type = self.ty(expr.id);

        match (&source, &target_type) {
            (Type::Pointer(_), Type::Primitive(Primitive::Int)) => {
                self.raw("invokestatic java/lang/System.identityHashCode(java/lang/Object)I");
            }
            (Type::User(id), Type::Primitive(Primitive::String)) => {
                self.emit_user_to_string(*id);
            }
            (Type::Primitive(from), Type::Primitive(to)) => {
                self.emit_primitive_cast(*from, *to);
            }
            _ => {}
        }
    }

    fn emit_primitive_cast(&mut self, from: Primitive, to: Primitive) {
        use Primitive::*;
        match (from, to) {
            (Int, Float) | (Bool, Float) => self.raw("i2f"),
            (Float, Int) | (Float, Bool) => self.raw("f2i"),
            (Int, String) | (Float, String) | (Bool, String) => {
                self.emit_to_string(&Type::Primitive(from))
            }
            (String, Int) => {
                self.raw("invokestatic java/lang/Integer.parseInt (java/lang/String)I")
            }
            (String, Float) => {
                self.raw("invokestatic java/lang/Float.parseFloat (java/lang/String)F")
            }
            (String, Bool) => {
                self.raw("invokestatic java/lang/Boolean.parseBoolean (java/lang/String)Z")
            }
            // Int and Bool share a JVM category; same-kind is a no-op.
            _ => {}
        }
    }

    fn emit_unbox(&mut self, pointer: &Type) {
        if let Type::Pointer(pointee) = pointer {
            if let Some(kind) = pointee.as_primitive() {
                if kind != Primitive::Void {
                    let class = skua_analysis::symbols::wrapper_class_name(kind);
                    self.raw(format!(
                        "invokevirtual {class}.getValue() {}",
                        primitive_descriptor(kind)
                    ));
                }
            }
        }
    }

    fn emit_array_literal(&mut self, expr: &Expr, elems: &[Expr]) {
        let array_type = self.ty(expr.id);
        let desc = self.desc(&array_type);
        let element = match &array_type {
            Type::Array(element) => (**element).clone(),
            _ => Type::VOID,
        };
        self.raw(format!("ldc {}", elems.len()));
        self.raw(format!("multianewarray {desc} 1"));
        for (i, elem) in elems.iter().enumerate() {
            self.raw("dup");
            self.raw(format!("ldc {i}"));
            self.emit_expr(elem);
            self.raw(element_store(&element));
        }
    }

    fn emit_new_primitive(&mut self, expr: &Expr, prim: &str, init: &Expr) {
        let kind = match Primitive::from_name(prim) {
            Some(kind) if kind != Primitive::Void => kind,
            _ => return,
        };
        let class = skua_analysis::symbols::wrapper_class_name(kind);
        self.raw(format!("new {class}"));
        self.raw("dup");
        self.emit_expr(init);
        if self.wants_conversion(expr.id) {
            let from = self.ty(init.id);
            self.emit_to_string(&from);
        }
        self.raw(format!(
            "invokespecial {class}.<init>({})V",
            primitive_descriptor(kind)
        ));
    }

    fn emit_new_struct(&mut self, expr: &Expr, name: &str, args: &[Expr]) {
        let symbol = match self.analysis.resolved_calls.get(&expr.id).copied() {
            Some(symbol) => symbol,
            None => return,
        };
        self.raw(format!("new {name}"));
        self.raw("dup");
        self.emit_arguments(args);
        self.code.push(IrInstruction::Call(symbol));
    }

    fn emit_if_expr(&mut self, condition: &Expr, then_value: &Expr, else_value: &Expr) {
        let otherwise = self.label();
        let done = self.label();

        self.emit_expr(condition);
        let cond_type = self.ty(condition.id);
        self.jump_if_false(&cond_type, &otherwise);

        self.emit_expr(then_value);
        if self.wants_conversion(then_value.id) {
            let from = self.ty(then_value.id);
            self.emit_to_string(&from);
        }
        self.raw(format!("goto {done}"));
        self.place(&otherwise);
        self.emit_expr(else_value);
        if self.wants_conversion(else_value.id) {
            let from = self.ty(else_value.id);
            self.emit_to_string(&from);
        }
        self.place(&done);
    }
}

fn condition_code(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Eq => "eq",
        BinaryOp::Ne => "ne",
        BinaryOp::Lt => "lt",
        BinaryOp::Gt => "gt",
        BinaryOp::Le => "le",
        BinaryOp::Ge => "ge",
        _ => "eq",
    }
}

fn element_load(element: &Type) -> &'static str {
    match element.as_primitive() {
        Some(Primitive::Int) => "iaload",
        Some(Primitive::Bool) => "baload",
        Some(Primitive::Float) => "faload",
        _ => "aaload",
    }
}

fn element_store(element: &Type) -> &'static str {
    match element.as_primitive() {
        Some(Primitive::Int) => "iastore",
        Some(Primitive::Bool) => "bastore",
        Some(Primitive::Float) => "fastore",
        _ => "aastore",
    }
}
