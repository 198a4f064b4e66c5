//! The linear stack-code IR.

use skua_analysis::symbols::SymbolId;

/// One instruction of a method body.
#[derive(Debug, Clone)]
pub enum IrInstruction {
    /// Emitted verbatim into the assembly.
    Raw(String),
    /// An invocation of a known function; resolved to a concrete invoke
    /// directive (static/virtual/special) at emission time.
    Call(SymbolId),
}

impl IrInstruction {
    pub fn raw(text: impl Into<String>) -> Self {
        IrInstruction::Raw(text.into())
    }
}

/// A method: its signature lives on the function symbol, its body here.
#[derive(Debug)]
pub struct IrMethod {
    pub symbol: SymbolId,
    pub instructions: Vec<IrInstruction>,
}

/// A class to be written as one `.jasm` file.
#[derive(Debug)]
pub struct IrClass {
    pub name: String,
    /// Synthesized primitive box; carries the `private value` field.
    pub is_wrapper: bool,
    /// Field symbols in declaration order.
    pub fields: Vec<SymbolId>,
    pub methods: Vec<IrMethod>,
}

impl IrClass {
    pub fn new(name: impl Into<String>) -> Self {
        IrClass {
            name: name.into(),
            is_wrapper: false,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }
}
