//! Primitive box synthesis.
//!
//! The target VM has no pointer-to-primitive, so `int*` and friends are
//! represented by small reference classes: a `value` field, a one-argument
//! constructor, `getValue`, and `setValue`. One class per primitive kind is
//! generated on demand and emitted before the user classes.

use skua_analysis::symbols::{
    wrapper_class_name, FunctionData, Symbol, SymbolTable, VariableData,
};
use skua_analysis::types::{Primitive, Type};

use crate::ir::{IrClass, IrInstruction, IrMethod};

/// Load/store instruction family for a primitive (`iload`, `fload`, ...).
pub fn instruction_prefix(kind: Primitive) -> &'static str {
    match kind {
        Primitive::Int | Primitive::Bool => "i",
        Primitive::Float => "f",
        Primitive::String => "a",
        Primitive::Void => "",
    }
}

/// JVM descriptor of a primitive value.
pub fn primitive_descriptor(kind: Primitive) -> &'static str {
    match kind {
        Primitive::Int => "I",
        Primitive::Float => "F",
        Primitive::Bool => "Z",
        Primitive::String => "java/lang/String",
        Primitive::Void => "V",
    }
}

/// Build the box class for `kind`, registering its symbols in the table.
pub fn generate(table: &mut SymbolTable, kind: Primitive) -> IrClass {
    let class_name = wrapper_class_name(kind);
    let desc = primitive_descriptor(kind);
    let prefix = instruction_prefix(kind);
    let value_type = Type::Primitive(kind);

    let mut class = IrClass::new(class_name);
    class.is_wrapper = true;

    let field_scope = table.new_scope(None);
    let mut field = Symbol::variable("value", 0, 0, field_scope, VariableData::new(value_type.clone()));
    field.is_defined = true;
    field.is_private = true;
    class.fields.push(table.alloc(field));

    // <init>(value)V
    let ctor_scope = table.new_scope(None);
    let mut ctor_data = FunctionData::new();
    let mut param = Symbol::variable(
        "value",
        0,
        0,
        ctor_scope,
        VariableData {
            is_parameter: true,
            ..VariableData::new(value_type.clone())
        },
    );
    param.is_defined = true;
    ctor_data.parameters.push(table.alloc(param));
    ctor_data.return_types.push(Type::VOID);
    ctor_data.is_struct_method = true;
    let mut ctor = Symbol::function("<init>", 0, 0, ctor_scope, ctor_data);
    ctor.is_defined = true;
    let ctor_id = table.alloc(ctor);
    class.methods.push(IrMethod {
        symbol: ctor_id,
        instructions: vec![
            IrInstruction::raw("aload 0"),
            IrInstruction::raw("invokespecial java/lang/Object.<init>()V"),
            IrInstruction::raw("aload 0"),
            IrInstruction::raw(format!("{prefix}load 1")),
            IrInstruction::raw(format!("putfield {class_name}.value {desc}")),
            IrInstruction::raw("return"),
        ],
    });

    // getValue() returning the primitive
    let getter_scope = table.new_scope(None);
    let mut getter_data = FunctionData::new();
    getter_data.return_types.push(value_type.clone());
    getter_data.is_struct_method = true;
    let mut getter = Symbol::function("getValue", 0, 0, getter_scope, getter_data);
    getter.is_defined = true;
    let getter_id = table.alloc(getter);
    class.methods.push(IrMethod {
        symbol: getter_id,
        instructions: vec![
            IrInstruction::raw("aload 0"),
            IrInstruction::raw(format!("getfield {class_name}.value {desc}")),
            IrInstruction::raw(format!("{prefix}return")),
        ],
    });

    // setValue(value)V
    let setter_scope = table.new_scope(None);
    let mut setter_data = FunctionData::new();
    let mut setter_param = Symbol::variable(
        "value",
        0,
        0,
        setter_scope,
        VariableData {
            is_parameter: true,
            ..VariableData::new(value_type)
        },
    );
    setter_param.is_defined = true;
    setter_data.parameters.push(table.alloc(setter_param));
    setter_data.return_types.push(Type::VOID);
    setter_data.is_struct_method = true;
    let mut setter = Symbol::function("setValue", 0, 0, setter_scope, setter_data);
    setter.is_defined = true;
    let setter_id = table.alloc(setter);
    class.methods.push(IrMethod {
        symbol: setter_id,
        instructions: vec![
            IrInstruction::raw("aload 0"),
            IrInstruction::raw(format!("{prefix}load 1")),
            IrInstruction::raw(format!("putfield {class_name}.value {desc}")),
            IrInstruction::raw("return"),
        ],
    });

    class
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapper_shape_is_fixed() {
        let mut table = SymbolTable::new();
        let class = generate(&mut table, Primitive::Int);

        assert_eq!(class.name, "IntReference");
        assert!(class.is_wrapper);
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.methods.len(), 3);

        let names: Vec<&str> = class
            .methods
            .iter()
            .map(|m| table.symbol(m.symbol).name.as_str())
            .collect();
        assert_eq!(names, vec!["<init>", "getValue", "setValue"]);

        let getter = table.symbol(class.methods[1].symbol).as_function().unwrap();
        assert_eq!(getter.return_types, vec![Type::INT]);
        assert!(getter.parameters.is_empty());

        let setter = table.symbol(class.methods[2].symbol).as_function().unwrap();
        assert_eq!(setter.return_types, vec![Type::VOID]);
        assert_eq!(setter.parameters.len(), 1);
    }

    #[test]
    fn bool_wrapper_uses_int_family_with_z_descriptor() {
        let mut table = SymbolTable::new();
        let class = generate(&mut table, Primitive::Bool);
        assert_eq!(class.name, "BoolReference");

        let ctor_lines: Vec<String> = class.methods[0]
            .instructions
            .iter()
            .map(|i| match i {
                IrInstruction::Raw(text) => text.clone(),
                IrInstruction::Call(_) => panic!("no calls in wrapper bodies"),
            })
            .collect();
        assert!(ctor_lines.contains(&"iload 1".to_string()));
        assert!(ctor_lines.contains(&"putfield BoolReference.value Z".to_string()));
    }
}
