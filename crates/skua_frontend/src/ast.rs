//! Parse-tree node definitions.
//!
//! Every node carries a `NodeId` assigned by the parser (dense, unique per
//! compilation) and a `Span` with the 1-based line and 0-based column of the
//! token that starts it. The semantic passes never mutate the tree; they hang
//! their results off annotation maps keyed by `NodeId`.

/// Identity of a parse-tree node, used as the key of every annotation map.
pub type NodeId = u32;

/// Source position of a node (line is 1-based, column 0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

impl Span {
    pub fn new(line: u32, column: u32) -> Self {
        Span { line, column }
    }
}

#[derive(Debug)]
pub struct Program {
    pub id: NodeId,
    pub span: Span,
    pub items: Vec<Item>,
}

#[derive(Debug)]
pub enum Item {
    Struct(StructDef),
    Function(FunctionDef),
}

#[derive(Debug)]
pub struct StructDef {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    /// Position of the name token, used for symbol locations.
    pub name_span: Span,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDef>,
}

/// A struct member variable. Access blocks and per-member access markers are
/// resolved by the parser into the `is_private` flag.
#[derive(Debug)]
pub struct FieldDecl {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
    pub init: Option<Expr>,
    pub is_private: bool,
    pub is_const: bool,
}

#[derive(Debug)]
pub struct FunctionDef {
    pub id: NodeId,
    pub span: Span,
    /// Includes the leading `$` for special methods.
    pub name: String,
    pub name_span: Span,
    pub params: Vec<Param>,
    /// Empty means void; more than one entry means a tuple of return types.
    pub return_types: Vec<TypeExpr>,
    pub body: Block,
    pub is_private: bool,
}

#[derive(Debug)]
pub struct Param {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub ty: TypeExpr,
}

#[derive(Debug)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub statements: Vec<Stmt>,
}

// ---------------------------------------------------------------------------
// Types as written in source
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TypeExpr {
    pub id: NodeId,
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Debug)]
pub enum TypeExprKind {
    /// A primitive or user-defined type name; resolution decides which.
    Named(String),
    Tuple(Vec<TypeExpr>),
    Pointer(Box<TypeExpr>),
    Array(Box<TypeExpr>),
}

impl TypeExpr {
    /// The source-ish rendering used in "unresolved type" diagnostics.
    pub fn display_name(&self) -> String {
        match &self.kind {
            TypeExprKind::Named(name) => name.clone(),
            TypeExprKind::Tuple(elems) => {
                let inner: Vec<String> = elems.iter().map(|t| t.display_name()).collect();
                format!("({})", inner.join(", "))
            }
            TypeExprKind::Pointer(inner) => format!("{}*", inner.display_name()),
            TypeExprKind::Array(inner) => format!("{}[]", inner.display_name()),
        }
    }
}

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Stmt {
    pub id: NodeId,
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
    VarDecl(VarDecl),
    /// `target = value;` where the target is a variable, field access,
    /// index expression or dereference.
    Assign { target: Expr, value: Expr },
    Return { value: Option<Expr> },
    /// An expression in statement position; a non-void result is discarded.
    Expr { expr: Expr },
    If(IfStmt),
    While { condition: Expr, body: Block },
    Until { condition: Expr, body: Block },
    For(ForStmt),
    /// `loop { ... }`, exits only through `break`.
    Loop { body: Block },
    Break,
    Destructure { items: Vec<DestructureItem>, value: Expr },
}

#[derive(Debug)]
pub struct VarDecl {
    pub name: String,
    pub name_span: Span,
    pub is_const: bool,
    pub ty: TypeExpr,
    pub init: Option<Expr>,
}

#[derive(Debug)]
pub struct IfStmt {
    /// `if` and `else if` arms in source order; each block is its own scope.
    pub branches: Vec<(Expr, Block)>,
    pub else_block: Option<Block>,
}

#[derive(Debug)]
pub struct ForStmt {
    pub init: Option<Box<Stmt>>,
    pub condition: Expr,
    pub update: Option<Expr>,
    pub body: Block,
}

#[derive(Debug)]
pub struct DestructureItem {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub is_const: bool,
    pub ty: TypeExpr,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    /// Decimal, hex (`0x..`) or binary (`0b..`) integer; the raw lexeme is
    /// kept and decoded at emission time.
    IntLit(String),
    /// Decimal float, `inf` or `nan`, kept as written.
    FloatLit(String),
    /// String content without the surrounding quotes, escapes verbatim.
    StringLit(String),
    BoolLit(bool),
    NullLit,
    Variable(String),
    FieldAccess(FieldAccess),
    Index { base: Box<Expr>, index: Box<Expr> },
    Call(CallExpr),
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// `x++` / `x--`; produces the pre-update value.
    Postfix { op: PostfixOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    Cast { operand: Box<Expr>, target: TypeName, bits: bool },
    Deref { operand: Box<Expr> },
    Ref { operand: Box<Expr> },
    TupleLit(Vec<Expr>),
    /// `{e0, e1, ...}`
    ArrayLit(Vec<Expr>),
    /// `new int(7)` — boxed primitive allocation.
    NewPrimitive { prim: String, init: Box<Expr> },
    /// `new T[d0, d1, ...]`
    NewArray { elem: TypeExpr, dims: Vec<Expr> },
    /// `new Struct(args)`
    NewStruct { name: String, args: Vec<Expr> },
    /// `cond ? a : b`
    IfExpr {
        condition: Box<Expr>,
        then_value: Box<Expr>,
        else_value: Box<Expr>,
    },
}

/// Cast target: a primitive name or a user-defined type name.
#[derive(Debug)]
pub struct TypeName {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
}

#[derive(Debug)]
pub struct CallExpr {
    pub id: NodeId,
    pub span: Span,
    pub name: String,
    pub args: Vec<Expr>,
}

/// A head expression followed by `.`/`->` segments.
#[derive(Debug)]
pub struct FieldAccess {
    pub head: Box<Expr>,
    pub segments: Vec<FieldSegment>,
}

#[derive(Debug)]
pub struct FieldSegment {
    pub id: NodeId,
    pub span: Span,
    /// True when this segment is reached through `->`; the left-hand value is
    /// a pointer and is dereferenced before the lookup.
    pub via_arrow: bool,
    pub kind: FieldSegmentKind,
}

#[derive(Debug)]
pub enum FieldSegmentKind {
    /// Plain field, or a numeric tuple index (`t.0`).
    Field(String),
    Method(CallExpr),
    /// An indexed field: `obj.items[i]`.
    Index { name: String, index: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Plus,
    BitNot,
    PreInc,
    PreDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Inc,
    Dec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add
                | BinaryOp::Sub
                | BinaryOp::Mul
                | BinaryOp::Div
                | BinaryOp::Rem
                | BinaryOp::Shl
                | BinaryOp::Shr
                | BinaryOp::BitAnd
                | BinaryOp::BitOr
                | BinaryOp::BitXor
        )
    }

    pub fn is_integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or)
    }

    /// Operator text for diagnostics.
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}
