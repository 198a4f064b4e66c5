//! The textual assembly writer.
//!
//! One `.jasm` file per generated class. The output directory is cleared and
//! recreated first; directory or file failures are the only fatal errors of
//! the whole back end.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use skua_analysis::symbols::{SymbolId, SymbolTable};
use skua_analysis::types::Type;

use crate::ir::{IrClass, IrInstruction};
use crate::jvm_type;

/// Wipe and recreate `out_dir`, then write every class.
pub fn write_classes(classes: &[IrClass], table: &SymbolTable, out_dir: &Path) -> io::Result<()> {
    // A leftover directory from a previous run is expected; anything else
    // surfaces when create_dir_all runs.
    let _ = fs::remove_dir_all(out_dir);
    fs::create_dir_all(out_dir)?;

    for class in classes {
        let path = out_dir.join(format!("{}.jasm", class.name));
        let mut file = fs::File::create(&path)?;
        file.write_all(class_text(class, table).as_bytes())?;
    }
    Ok(())
}

/// Render one class in the `.jasm` layout.
pub fn class_text(class: &IrClass, table: &SymbolTable) -> String {
    let mut out = String::new();
    out.push_str(&format!("public class {} {{\n", class.name));

    if class.is_wrapper {
        if let Some(&field) = class.fields.first() {
            let desc = field_descriptor(table, field);
            out.push_str(&format!("private value {desc}\n"));
        }
    } else {
        for &field in &class.fields {
            let symbol = table.symbol(field);
            let access = if symbol.is_private { "private" } else { "public" };
            let desc = field_descriptor(table, field);
            out.push_str(&format!("{access} {} {desc}\n", symbol.name));
        }
    }

    for method in &class.methods {
        out.push_str(&method_signature(class, method.symbol, table));
        let mut last_line = String::new();
        for instruction in &method.instructions {
            let line = instruction_text(instruction, table);
            out.push_str(&line);
            out.push('\n');
            last_line = line;
        }
        if implicit_return_needed(method.symbol, table, &last_line) {
            out.push_str("return\n");
        }
        out.push_str("}\n");
    }

    out.push_str("}\n");
    out
}

fn field_descriptor(table: &SymbolTable, field: SymbolId) -> String {
    let ty = table
        .symbol(field)
        .as_variable()
        .map(|v| v.data_type.clone())
        .unwrap_or(Type::VOID);
    jvm_type(table, &ty)
}

fn method_signature(class: &IrClass, symbol: SymbolId, table: &SymbolTable) -> String {
    let name = table.symbol(symbol).name.clone();
    let data = table.symbol(symbol).as_function();
    let is_method = data.map(|d| d.is_struct_method).unwrap_or(false);
    let is_ctor = data.map(|d| d.is_constructor).unwrap_or(false) || name == "<init>";

    let params = parameter_list(symbol, table);
    let ret = data
        .and_then(|d| d.return_types.first())
        .map(|t| jvm_type(table, t))
        .unwrap_or_else(|| "V".to_string());

    if name == "main" && !is_method {
        return "public static main([java/lang/String)V{\n".to_string();
    }
    if is_ctor {
        return format!("public <init>({params})V{{\n");
    }
    if class.is_wrapper {
        // Box methods keep their plain names; the deref/unbox call sites
        // reference them unmangled.
        return format!("public {name}({params}){ret}{{\n");
    }
    if is_method {
        return format!("public {}({params}){ret}{{\n", table.mangled_name(symbol));
    }
    format!("public static {}({params}){ret}{{\n", table.mangled_name(symbol))
}

fn parameter_list(symbol: SymbolId, table: &SymbolTable) -> String {
    let types = table.parameter_types(symbol);
    let descs: Vec<String> = types.iter().map(|t| jvm_type(table, t)).collect();
    descs.join(", ")
}

/// Render a single instruction; `Call`s resolve to an invoke directive here.
pub fn instruction_text(instruction: &IrInstruction, table: &SymbolTable) -> String {
    match instruction {
        IrInstruction::Raw(text) => text.clone(),
        IrInstruction::Call(symbol) => call_text(*symbol, table),
    }
}

fn call_text(symbol: SymbolId, table: &SymbolTable) -> String {
    let data = table.symbol(symbol).as_function();
    let params = parameter_list(symbol, table);
    let ret = data
        .and_then(|d| d.return_types.first())
        .map(|t| jvm_type(table, t))
        .unwrap_or_else(|| "V".to_string());

    let is_ctor = data.map(|d| d.is_constructor).unwrap_or(false);
    if is_ctor {
        let class = data
            .and_then(|d| d.return_types.first())
            .map(|t| table.type_to_string(t))
            .unwrap_or_default();
        return format!("invokespecial {class}.<init>({params})V");
    }

    // A method's own scope holds `this`; its type names the receiver class.
    let receiver = table
        .resolve(table.symbol(symbol).scope, "this")
        .and_then(|id| table.symbol(id).as_variable().map(|v| v.data_type.clone()));
    match receiver {
        Some(this_type) => format!(
            "invokevirtual {}.{}({params}){ret}",
            table.type_to_string(&this_type),
            table.mangled_name(symbol)
        ),
        None => format!("invokestatic Main.{}({params}){ret}", table.mangled_name(symbol)),
    }
}

fn implicit_return_needed(symbol: SymbolId, table: &SymbolTable, last_line: &str) -> bool {
    let void = table
        .symbol(symbol)
        .as_function()
        .and_then(|d| d.return_types.first())
        .map(|t| t.is_void())
        .unwrap_or(false);
    void && last_line != "return"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate;
    use skua_analysis::{analyze, ErrorReporter};
    use skua_frontend::parse_source;

    fn compile(src: &str) -> (Vec<IrClass>, skua_analysis::Analysis) {
        let parsed = parse_source(src);
        assert!(parsed.is_ok(), "parse failed: {:?}", parsed.errors);
        let mut reporter = ErrorReporter::new();
        let mut analysis = analyze(&parsed.program, &mut reporter);
        assert!(
            !reporter.has_errors(),
            "semantic errors: {:?}",
            reporter.sorted()
        );
        let classes = generate(&parsed.program, &mut analysis);
        (classes, analysis)
    }

    fn class_named<'c>(classes: &'c [IrClass], name: &str) -> &'c IrClass {
        classes
            .iter()
            .find(|c| c.name == name)
            .unwrap_or_else(|| panic!("class {name} not generated"))
    }

    /// Body lines of the method whose signature starts with `signature`.
    fn body_of(text: &str, signature: &str) -> Vec<String> {
        let mut lines = text.lines();
        for line in lines.by_ref() {
            if line.starts_with(signature) {
                break;
            }
        }
        let mut body = Vec::new();
        for line in lines {
            if line == "}" {
                return body;
            }
            body.push(line.to_string());
        }
        panic!("method {signature} not found or unterminated");
    }

    fn main_body(src: &str) -> Vec<String> {
        let (classes, analysis) = compile(src);
        let text = class_text(class_named(&classes, "Main"), &analysis.table);
        body_of(&text, "public static main(")
    }

    #[test]
    fn s1_hello_world() {
        let body = main_body(r#"fn main() { println("Hello"); }"#);
        assert_eq!(
            body,
            vec![
                "getstatic java/lang/System.out java/io/PrintStream",
                "ldc \"Hello\"",
                "invokevirtual java/io/PrintStream.println(java/lang/String)V",
                "return",
            ]
        );
    }

    #[test]
    fn s2_int_print_with_coercion() {
        let body = main_body("fn main() { var x: int = 42; println(x); }");
        assert_eq!(
            body,
            vec![
                "ldc 42",
                "istore 0",
                "getstatic java/lang/System.out java/io/PrintStream",
                "iload 0",
                "invokestatic java/lang/Integer.toString (I)java/lang/String",
                "invokevirtual java/io/PrintStream.println(java/lang/String)V",
                "return",
            ]
        );
    }

    #[test]
    fn s3_struct_with_synthesized_constructor() {
        let (classes, analysis) = compile("struct Point { x: int; y: int; }");
        let text = class_text(class_named(&classes, "Point"), &analysis.table);

        assert!(text.contains("public x I\n"));
        assert!(text.contains("public y I\n"));

        let body = body_of(&text, "public <init>(I, I)V{");
        assert_eq!(
            body,
            vec![
                "aload 0",
                "invokespecial java/lang/Object.<init>()V",
                "aload 0",
                "iload 1",
                "putfield Point.x I",
                "aload 0",
                "iload 2",
                "putfield Point.y I",
                "return",
            ]
        );
    }

    #[test]
    fn s4_if_elseif_else_chain() {
        let body = main_body(
            "fn b() { } fn d() { } fn e() { }\n\
             fn main() { var a: bool = true; var c: bool = false;\n\
               if (a) { b(); } else if (c) { d(); } else { e(); } }",
        );
        // Skip the two variable initializations.
        let chain = &body[4..];
        assert_eq!(
            chain,
            &[
                "iload 0",
                "ifeq L1",
                "invokestatic Main.b_()V",
                "goto L0",
                "L1:",
                "iload 1",
                "ifeq L2",
                "invokestatic Main.d_()V",
                "goto L0",
                "L2:",
                "invokestatic Main.e_()V",
                "L0:",
                "return",
            ]
        );
    }

    #[test]
    fn s5_short_circuit_and() {
        let (classes, analysis) =
            compile("fn test(a: bool, b: bool) { var z: bool = a && b; }");
        let text = class_text(class_named(&classes, "Main"), &analysis.table);
        let body = body_of(&text, "public static test_bool_bool_(Z, Z)V{");
        assert_eq!(
            body,
            vec![
                "iload 0",
                "ifeq L0",
                "iload 1",
                "ifeq L0",
                "iconst 1",
                "goto L1",
                "L0:",
                "iconst 0",
                "L1:",
                "istore 2",
                "return",
            ]
        );
    }

    #[test]
    fn s6_boxed_pointer_alloc_and_deref() {
        let body = main_body("fn main() { var p: int* = new int(7); *p = 8; println(*p); }");
        assert_eq!(
            body,
            vec![
                "new IntReference",
                "dup",
                "ldc 7",
                "invokespecial IntReference.<init>(I)V",
                "astore 0",
                "aload 0",
                "ldc 8",
                "invokevirtual IntReference.setValue(I)V",
                "getstatic java/lang/System.out java/io/PrintStream",
                "aload 0",
                "invokevirtual IntReference.getValue() I",
                "invokestatic java/lang/Integer.toString (I)java/lang/String",
                "invokevirtual java/io/PrintStream.println(java/lang/String)V",
                "return",
            ]
        );
    }

    #[test]
    fn wrapper_classes_precede_user_classes() {
        let (classes, _) = compile("fn main() { var x: int = 1; }");
        let names: Vec<&str> = classes.iter().map(|c| c.name.as_str()).collect();
        let int_ref = names.iter().position(|n| *n == "IntReference").unwrap();
        let main = names.iter().position(|n| *n == "Main").unwrap();
        assert!(int_ref < main);
    }

    #[test]
    fn wrapper_class_file_shape() {
        let (classes, analysis) = compile("fn main() { var x: int = 1; }");
        let text = class_text(class_named(&classes, "IntReference"), &analysis.table);
        assert!(text.starts_with("public class IntReference {\n"));
        assert!(text.contains("private value I\n"));
        assert!(text.contains("public <init>(I)V{\n"));
        assert!(text.contains("public getValue()I{\n"));
        assert!(text.contains("public setValue(I)V{\n"));
    }

    #[test]
    fn while_loop_labels() {
        let body = main_body(
            "fn main() { var i: int = 0; while (i < 3) { i = i + 1; } }",
        );
        let loop_part = &body[2..];
        assert_eq!(
            loop_part,
            &[
                "L0:",
                "iload 0",
                "ldc 3",
                "if_icmplt L2",
                "iconst 0",
                "goto L3",
                "L2:",
                "iconst 1",
                "L3:",
                "ifeq L1",
                "iload 0",
                "ldc 1",
                "iadd",
                "istore 0",
                "goto L0",
                "L1:",
                "return",
            ]
        );
    }

    #[test]
    fn until_loop_checks_after_body() {
        let body = main_body("fn main() { var i: int = 0; until (i > 2) { i = i + 1; } }");
        // body then condition, jump back while false
        let text = body.join("\n");
        let start = text.find("L0:").expect("start label");
        let back_jump = text.find("ifeq L0").expect("loop-back jump");
        assert!(start < back_jump);
    }

    #[test]
    fn infinite_loop_and_break() {
        let body = main_body("fn main() { loop { break; } }");
        assert_eq!(body, vec!["L0:", "goto L1", "goto L0", "L1:", "return"]);
    }

    #[test]
    fn for_loop_block_layout() {
        let body = main_body(
            "fn main() { for (var i: int = 0; i < 2; i++) { println(\"x\"); } }",
        );
        let text = body.join("\n");
        // condition block jumps to end or start, update block pops and loops.
        assert!(text.contains("ifeq L3"));
        assert!(text.contains("goto L1"));
        assert!(text.contains("L2:"));
        assert!(text.contains("pop\ngoto L0"));
        // the body jumps to the update label
        assert!(text.contains("goto L2"));
    }

    #[test]
    fn string_concat_uses_indy_recipe() {
        let body = main_body("fn main() { var s: string = \"n=\" + 42; }");
        assert!(body.iter().any(|l| l.starts_with("invokedynamic makeConcatWithConstants")
            && l.ends_with("\"\\u0001\\u0001\"")));
        assert!(body
            .contains(&"invokestatic java/lang/Integer.toString (I)java/lang/String".to_string()));
    }

    #[test]
    fn struct_method_call_through_pointer() {
        let (classes, analysis) = compile(
            "struct Counter { n: int; fn get() -> int { return n; } }\n\
             fn main() { var c: Counter* = new Counter(5); var v: int = c->get(); }",
        );
        let text = class_text(class_named(&classes, "Main"), &analysis.table);
        let body = body_of(&text, "public static main(");
        assert!(body.contains(&"invokespecial Counter.<init>(I)V".to_string()));
        assert!(body.contains(&"invokevirtual Counter.get_()I".to_string()));

        let counter = class_text(class_named(&classes, "Counter"), &analysis.table);
        let getter = body_of(&counter, "public get_()I{");
        assert_eq!(
            getter,
            vec!["aload 0", "getfield Counter.n I", "ireturn"]
        );
    }

    #[test]
    fn field_defaults_run_before_parameter_stores() {
        let (classes, analysis) = compile("struct Config { retries: int = 3; }");
        let text = class_text(class_named(&classes, "Config"), &analysis.table);
        let body = body_of(&text, "public <init>(I)V{");
        assert_eq!(
            body,
            vec![
                "aload 0",
                "invokespecial java/lang/Object.<init>()V",
                "aload 0",
                "ldc 3",
                "putfield Config.retries I",
                "aload 0",
                "iload 1",
                "putfield Config.retries I",
                "return",
            ]
        );
    }

    #[test]
    fn array_literal_emission() {
        let body = main_body("fn main() { var a: int[] = {10, 20}; }");
        assert_eq!(
            body,
            vec![
                "ldc 2",
                "multianewarray [I 1",
                "dup",
                "ldc 0",
                "ldc 10",
                "iastore",
                "dup",
                "ldc 1",
                "ldc 20",
                "iastore",
                "astore 0",
                "return",
            ]
        );
    }

    #[test]
    fn multi_dimensional_allocation() {
        let body = main_body("fn main() { var g: int[][] = new int[2, 3]; }");
        assert!(body.contains(&"multianewarray [[I 2".to_string()));
    }

    #[test]
    fn pointer_cast_to_int() {
        let body = main_body(
            "fn main() { var p: int* = new int(1); var h: int = p as int; }",
        );
        assert!(body.contains(
            &"invokestatic java/lang/System.identityHashCode(java/lang/Object)I".to_string()
        ));
    }

    #[test]
    fn float_casts() {
        let body = main_body("fn main() { var f: float = 1 as float; var i: int = f as int; }");
        assert!(body.contains(&"i2f".to_string()));
        assert!(body.contains(&"f2i".to_string()));
    }

    #[test]
    fn labels_are_defined_once_and_referenced() {
        let body = main_body(
            "fn main() { var i: int = 0;\n\
               if (i < 3) { i = 1; } else { i = 2; }\n\
               while (i > 0) { i = i - 1; } }",
        );
        let mut defined = std::collections::HashMap::new();
        let mut referenced = std::collections::HashSet::new();
        for line in &body {
            if let Some(label) = line.strip_suffix(':') {
                *defined.entry(label.to_string()).or_insert(0) += 1;
            } else if let Some(idx) = line.rfind(' ') {
                let target = &line[idx + 1..];
                if target.starts_with('L') && target[1..].chars().all(|c| c.is_ascii_digit()) {
                    referenced.insert(target.to_string());
                }
            }
        }
        for (label, count) in &defined {
            assert_eq!(*count, 1, "label {label} defined more than once");
            assert!(referenced.contains(label), "label {label} never referenced");
        }
    }

    #[test]
    fn writes_one_file_per_class() {
        let (classes, analysis) = compile("struct P { x: int; } fn main() { }");
        let dir = tempfile::tempdir().expect("tempdir");
        write_classes(&classes, &analysis.table, dir.path()).expect("write");

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert!(names.contains(&"Main.jasm".to_string()));
        assert!(names.contains(&"P.jasm".to_string()));
        assert!(names.iter().all(|n| n.ends_with(".jasm")));
    }

    #[test]
    fn output_directory_is_recreated() {
        let (classes, analysis) = compile("fn main() { }");
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = dir.path().join("stale.jasm");
        std::fs::write(&stale, "old").expect("write stale");

        write_classes(&classes, &analysis.table, dir.path()).expect("write");
        assert!(!stale.exists(), "stale output must be removed");
        assert!(dir.path().join("Main.jasm").exists());
    }
}
