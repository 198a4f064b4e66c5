//! Recursive-descent parser producing the `ast` node tree.
//!
//! The parser owns `NodeId` assignment. It recovers from statement- and
//! item-level errors by synchronizing to the next `;` or `}` so that a single
//! mistake does not hide the rest of the diagnostics.

use crate::ast::*;
use crate::lex::{tokenize, Lexeme, Token};

/// A syntax error with the position of the offending token.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub span: Span,
    pub message: String,
}

/// Result of running the front end over a source text.
pub struct ParseResult {
    pub program: Program,
    /// Lexical errors, positions included.
    pub lex_errors: Vec<(Span, String)>,
    /// Syntax errors in source order.
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    pub fn is_ok(&self) -> bool {
        self.lex_errors.is_empty() && self.errors.is_empty()
    }
}

/// Parse a whole compilation unit.
pub fn parse_source(source: &str) -> ParseResult {
    let (lexemes, lex_errors) = tokenize(source);
    let lex_errors = lex_errors
        .into_iter()
        .map(|e| (e.span, format!("unrecognized input '{}'", e.text)))
        .collect();

    let mut parser = Parser::new(lexemes);
    let program = parser.parse_program();
    ParseResult {
        program,
        lex_errors,
        errors: parser.errors,
    }
}

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    next_id: NodeId,
    errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ParseError>;

impl Parser {
    fn new(tokens: Vec<Lexeme>) -> Self {
        Parser {
            tokens,
            pos: 0,
            next_id: 0,
            errors: Vec::new(),
        }
    }

    fn id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).map(|l| l.token)
    }

    fn peek_at(&self, offset: usize) -> Option<Token> {
        self.tokens.get(self.pos + offset).map(|l| l.token)
    }

    fn span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|l| l.span)
            .or_else(|| self.tokens.last().map(|l| l.span))
            .unwrap_or_default()
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn bump(&mut self) -> Option<Lexeme> {
        let lexeme = self.tokens.get(self.pos).cloned();
        if lexeme.is_some() {
            self.pos += 1;
        }
        lexeme
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error<T>(&self, message: impl Into<String>) -> PResult<T> {
        Err(ParseError {
            span: self.span(),
            message: message.into(),
        })
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<Lexeme> {
        if self.peek() == Some(token) {
            Ok(self.bump().expect("peeked"))
        } else {
            let found = self
                .tokens
                .get(self.pos)
                .map(|l| format!("'{}'", l.text))
                .unwrap_or_else(|| "end of input".to_string());
            self.error(format!("expected {what}, found {found}"))
        }
    }

    fn expect_name(&mut self, what: &str) -> PResult<(String, Span)> {
        match self.peek() {
            Some(Token::Ident) | Some(Token::SpecialIdent) => {
                let lexeme = self.bump().expect("peeked");
                Ok((lexeme.text, lexeme.span))
            }
            _ => self.error(format!("expected {what}")),
        }
    }

    /// Skip ahead to a likely statement/item boundary after an error.
    fn synchronize(&mut self) {
        while let Some(token) = self.peek() {
            match token {
                Token::Semi => {
                    self.pos += 1;
                    return;
                }
                Token::RBrace | Token::Fn | Token::Struct => return,
                _ => self.pos += 1,
            }
        }
    }

    // -- items ---------------------------------------------------------------

    fn parse_program(&mut self) -> Program {
        let id = self.id();
        let span = self.span();
        let mut items = Vec::new();

        while !self.at_eof() {
            let result = match self.peek() {
                Some(Token::Struct) => self.parse_struct().map(Item::Struct),
                Some(Token::Fn) => self.parse_function(false).map(Item::Function),
                _ => self.error("expected 'struct' or 'fn' at top level"),
            };
            let before = self.pos;
            match result {
                Ok(item) => items.push(item),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                    // A stray '}' would otherwise stall the loop forever.
                    if self.peek() == Some(Token::RBrace) {
                        self.pos += 1;
                    }
                }
            }
            if self.pos == before {
                self.pos += 1;
            }
        }

        Program { id, span, items }
    }

    fn parse_struct(&mut self) -> PResult<StructDef> {
        let id = self.id();
        let span = self.span();
        self.expect(Token::Struct, "'struct'")?;
        let name = self.expect(Token::Ident, "struct name")?;
        self.expect(Token::LBrace, "'{'")?;

        let mut def = StructDef {
            id,
            span,
            name: name.text,
            name_span: name.span,
            fields: Vec::new(),
            methods: Vec::new(),
        };

        while !self.at_eof() && self.peek() != Some(Token::RBrace) {
            let before = self.pos;
            if let Err(err) = self.parse_struct_member(&mut def) {
                self.errors.push(err);
                self.synchronize();
            }
            if self.pos == before {
                self.pos += 1;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(def)
    }

    fn parse_struct_member(&mut self, def: &mut StructDef) -> PResult<()> {
        let mut private = false;
        if self.peek() == Some(Token::Private) || self.peek() == Some(Token::Public) {
            private = self.peek() == Some(Token::Private);
            self.pos += 1;
            if self.eat(Token::LBrace) {
                // Access block: every enclosed member inherits the marker.
                while !self.at_eof() && self.peek() != Some(Token::RBrace) {
                    self.parse_single_member(def, private)?;
                }
                self.expect(Token::RBrace, "'}'")?;
                return Ok(());
            }
        }
        self.parse_single_member(def, private)
    }

    fn parse_single_member(&mut self, def: &mut StructDef, private: bool) -> PResult<()> {
        if self.peek() == Some(Token::Fn) {
            let mut method = self.parse_function(private)?;
            method.is_private = private;
            def.methods.push(method);
            return Ok(());
        }

        let id = self.id();
        let span = self.span();
        let is_const = self.eat(Token::Const);
        let name = self.expect(Token::Ident, "member name")?;
        self.expect(Token::Colon, "':'")?;
        let ty = self.parse_type()?;
        let init = if self.eat(Token::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(Token::Semi, "';'")?;
        def.fields.push(FieldDecl {
            id,
            span,
            name: name.text,
            ty,
            init,
            is_private: private,
            is_const,
        });
        Ok(())
    }

    fn parse_function(&mut self, is_private: bool) -> PResult<FunctionDef> {
        let id = self.id();
        let span = self.span();
        self.expect(Token::Fn, "'fn'")?;
        let (name, name_span) = self.expect_name("function name")?;
        self.expect(Token::LParen, "'('")?;

        let mut params = Vec::new();
        if self.peek() != Some(Token::RParen) {
            loop {
                let pid = self.id();
                let pspan = self.span();
                let pname = self.expect(Token::Ident, "parameter name")?;
                self.expect(Token::Colon, "':'")?;
                let ty = self.parse_type()?;
                params.push(Param {
                    id: pid,
                    span: pspan,
                    name: pname.text,
                    ty,
                });
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;

        let mut return_types = Vec::new();
        if self.eat(Token::Arrow) {
            if self.eat(Token::LParen) {
                loop {
                    return_types.push(self.parse_type()?);
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RParen, "')'")?;
            } else {
                return_types.push(self.parse_type()?);
            }
        }

        let body = self.parse_block()?;
        Ok(FunctionDef {
            id,
            span,
            name,
            name_span,
            params,
            return_types,
            body,
            is_private,
        })
    }

    // -- types ---------------------------------------------------------------

    fn parse_type(&mut self) -> PResult<TypeExpr> {
        let id = self.id();
        let span = self.span();
        let mut ty = match self.peek() {
            Some(Token::Ident) => {
                let name = self.bump().expect("peeked");
                TypeExpr {
                    id,
                    span,
                    kind: TypeExprKind::Named(name.text),
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let mut elems = Vec::new();
                loop {
                    elems.push(self.parse_type()?);
                    if !self.eat(Token::Comma) {
                        break;
                    }
                }
                self.expect(Token::RParen, "')'")?;
                TypeExpr {
                    id,
                    span,
                    kind: TypeExprKind::Tuple(elems),
                }
            }
            _ => return self.error("expected a type"),
        };

        // Trailing '*'s wrap in pointers, then '[]' suffixes wrap in arrays,
        // so `int*[]` reads as "array of int pointers".
        while self.eat(Token::Star) {
            let id = self.id();
            ty = TypeExpr {
                id,
                span,
                kind: TypeExprKind::Pointer(Box::new(ty)),
            };
        }
        while self.peek() == Some(Token::LBracket) && self.peek_at(1) == Some(Token::RBracket) {
            self.pos += 2;
            let id = self.id();
            ty = TypeExpr {
                id,
                span,
                kind: TypeExprKind::Array(Box::new(ty)),
            };
        }
        Ok(ty)
    }

    // -- statements ----------------------------------------------------------

    fn parse_block(&mut self) -> PResult<Block> {
        let id = self.id();
        let span = self.span();
        self.expect(Token::LBrace, "'{'")?;
        let mut statements = Vec::new();
        while !self.at_eof() && self.peek() != Some(Token::RBrace) {
            let before = self.pos;
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(err) => {
                    self.errors.push(err);
                    self.synchronize();
                }
            }
            if self.pos == before {
                self.pos += 1;
            }
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Block {
            id,
            span,
            statements,
        })
    }

    fn parse_statement(&mut self) -> PResult<Stmt> {
        let id = self.id();
        let span = self.span();
        let kind = match self.peek() {
            Some(Token::Var) if self.peek_at(1) == Some(Token::LParen) => {
                self.parse_destructuring()?
            }
            Some(Token::Var) | Some(Token::Const) => {
                let is_const = self.peek() == Some(Token::Const);
                self.pos += 1;
                StmtKind::VarDecl(self.parse_var_decl_tail(is_const)?)
            }
            Some(Token::Return) => {
                self.pos += 1;
                let value = if self.peek() == Some(Token::Semi) {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.expect(Token::Semi, "';'")?;
                StmtKind::Return { value }
            }
            Some(Token::If) => self.parse_if()?,
            Some(Token::While) => {
                self.pos += 1;
                self.expect(Token::LParen, "'('")?;
                let condition = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_block()?;
                StmtKind::While { condition, body }
            }
            Some(Token::Until) => {
                self.pos += 1;
                self.expect(Token::LParen, "'('")?;
                let condition = self.parse_expression()?;
                self.expect(Token::RParen, "')'")?;
                let body = self.parse_block()?;
                StmtKind::Until { condition, body }
            }
            Some(Token::For) => self.parse_for()?,
            Some(Token::Loop) => {
                self.pos += 1;
                let body = self.parse_block()?;
                StmtKind::Loop { body }
            }
            Some(Token::Break) => {
                self.pos += 1;
                self.expect(Token::Semi, "';'")?;
                StmtKind::Break
            }
            _ => {
                let expr = self.parse_expression()?;
                if self.eat(Token::Assign) {
                    let value = self.parse_expression()?;
                    self.expect(Token::Semi, "';'")?;
                    StmtKind::Assign {
                        target: expr,
                        value,
                    }
                } else {
                    self.expect(Token::Semi, "';'")?;
                    StmtKind::Expr { expr }
                }
            }
        };
        Ok(Stmt { id, span, kind })
    }

    fn parse_var_decl_tail(&mut self, is_const: bool) -> PResult<VarDecl> {
        let name = self.expect(Token::Ident, "variable name")?;
        self.expect(Token::Colon, "':'")?;
        let ty = self.parse_type()?;
        let init = if self.eat(Token::Assign) {
            Some(self.parse_expression()?)
        } else {
            None
        };
        self.expect(Token::Semi, "';'")?;
        Ok(VarDecl {
            name: name.text,
            name_span: name.span,
            is_const,
            ty,
            init,
        })
    }

    fn parse_destructuring(&mut self) -> PResult<StmtKind> {
        self.expect(Token::Var, "'var'")?;
        self.expect(Token::LParen, "'('")?;
        let mut items = Vec::new();
        loop {
            let id = self.id();
            let span = self.span();
            let is_const = self.eat(Token::Const);
            let name = self.expect(Token::Ident, "name")?;
            self.expect(Token::Colon, "':'")?;
            let ty = self.parse_type()?;
            items.push(DestructureItem {
                id,
                span,
                name: name.text,
                is_const,
                ty,
            });
            if !self.eat(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RParen, "')'")?;
        self.expect(Token::Assign, "'='")?;
        let value = self.parse_expression()?;
        self.expect(Token::Semi, "';'")?;
        Ok(StmtKind::Destructure { items, value })
    }

    fn parse_if(&mut self) -> PResult<StmtKind> {
        let mut branches = Vec::new();
        let mut else_block = None;

        self.expect(Token::If, "'if'")?;
        loop {
            self.expect(Token::LParen, "'('")?;
            let condition = self.parse_expression()?;
            self.expect(Token::RParen, "')'")?;
            let block = self.parse_block()?;
            branches.push((condition, block));

            if self.eat(Token::Else) {
                if self.eat(Token::If) {
                    continue;
                }
                else_block = Some(self.parse_block()?);
            }
            break;
        }

        Ok(StmtKind::If(IfStmt {
            branches,
            else_block,
        }))
    }

    fn parse_for(&mut self) -> PResult<StmtKind> {
        self.expect(Token::For, "'for'")?;
        self.expect(Token::LParen, "'('")?;

        let init = match self.peek() {
            Some(Token::Semi) => {
                self.pos += 1;
                None
            }
            Some(Token::Var) | Some(Token::Const) => {
                let id = self.id();
                let span = self.span();
                let is_const = self.peek() == Some(Token::Const);
                self.pos += 1;
                let decl = self.parse_var_decl_tail(is_const)?;
                Some(Box::new(Stmt {
                    id,
                    span,
                    kind: StmtKind::VarDecl(decl),
                }))
            }
            _ => {
                let id = self.id();
                let span = self.span();
                let target = self.parse_expression()?;
                self.expect(Token::Assign, "'='")?;
                let value = self.parse_expression()?;
                self.expect(Token::Semi, "';'")?;
                Some(Box::new(Stmt {
                    id,
                    span,
                    kind: StmtKind::Assign { target, value },
                }))
            }
        };

        let condition = self.parse_expression()?;
        self.expect(Token::Semi, "';'")?;
        let update = if self.peek() == Some(Token::RParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_block()?;

        Ok(StmtKind::For(ForStmt {
            init,
            condition,
            update,
            body,
        }))
    }

    // -- expressions ---------------------------------------------------------

    fn parse_expression(&mut self) -> PResult<Expr> {
        let condition = self.parse_or()?;
        if self.eat(Token::Question) {
            let id = self.id();
            let span = condition.span;
            let then_value = self.parse_expression()?;
            self.expect(Token::Colon, "':'")?;
            let else_value = self.parse_expression()?;
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::IfExpr {
                    condition: Box::new(condition),
                    then_value: Box::new(then_value),
                    else_value: Box::new(else_value),
                },
            });
        }
        Ok(condition)
    }

    fn binary(&mut self, lhs: Expr, op: BinaryOp, rhs: Expr) -> Expr {
        let id = self.id();
        let span = lhs.span;
        Expr {
            id,
            span,
            kind: ExprKind::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
        }
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat(Token::OrOr) {
            let rhs = self.parse_and()?;
            lhs = self.binary(lhs, BinaryOp::Or, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_or()?;
        while self.eat(Token::AndAnd) {
            let rhs = self.parse_bit_or()?;
            lhs = self.binary(lhs, BinaryOp::And, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_xor()?;
        while self.eat(Token::Pipe) {
            let rhs = self.parse_bit_xor()?;
            lhs = self.binary(lhs, BinaryOp::BitOr, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_xor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bit_and()?;
        while self.eat(Token::Caret) {
            let rhs = self.parse_bit_and()?;
            lhs = self.binary(lhs, BinaryOp::BitXor, rhs);
        }
        Ok(lhs)
    }

    fn parse_bit_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        while self.eat(Token::Amp) {
            let rhs = self.parse_equality()?;
            lhs = self.binary(lhs, BinaryOp::BitAnd, rhs);
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = self.binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_shift()?;
            lhs = self.binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Shl) => BinaryOp::Shl,
                Some(Token::Shr) => BinaryOp::Shr,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = self.binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = self.binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_cast()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_cast()?;
            lhs = self.binary(lhs, op, rhs);
        }
        Ok(lhs)
    }

    fn parse_cast(&mut self) -> PResult<Expr> {
        let mut operand = self.parse_unary()?;
        loop {
            let bits = match self.peek() {
                Some(Token::As) => false,
                Some(Token::BitsAs) => true,
                _ => break,
            };
            self.pos += 1;
            let tid = self.id();
            let tspan = self.span();
            let name = self.expect(Token::Ident, "cast target type")?;
            let id = self.id();
            let span = operand.span;
            operand = Expr {
                id,
                span,
                kind: ExprKind::Cast {
                    operand: Box::new(operand),
                    target: TypeName {
                        id: tid,
                        span: tspan,
                        name: name.text,
                    },
                    bits,
                },
            };
        }
        Ok(operand)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let span = self.span();
        let op = match self.peek() {
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Minus) => Some(UnaryOp::Neg),
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Tilde) => Some(UnaryOp::BitNot),
            Some(Token::PlusPlus) => Some(UnaryOp::PreInc),
            Some(Token::MinusMinus) => Some(UnaryOp::PreDec),
            _ => None,
        };
        if let Some(op) = op {
            self.pos += 1;
            let operand = self.parse_unary()?;
            let id = self.id();
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            });
        }
        if self.eat(Token::Star) {
            let operand = self.parse_unary()?;
            let id = self.id();
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::Deref {
                    operand: Box::new(operand),
                },
            });
        }
        if self.eat(Token::Amp) {
            let operand = self.parse_unary()?;
            let id = self.id();
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::Ref {
                    operand: Box::new(operand),
                },
            });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::PlusPlus) | Some(Token::MinusMinus) => {
                    let op = if self.peek() == Some(Token::PlusPlus) {
                        PostfixOp::Inc
                    } else {
                        PostfixOp::Dec
                    };
                    self.pos += 1;
                    let id = self.id();
                    let span = expr.span;
                    expr = Expr {
                        id,
                        span,
                        kind: ExprKind::Postfix {
                            op,
                            operand: Box::new(expr),
                        },
                    };
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.parse_expression()?;
                    self.expect(Token::RBracket, "']'")?;
                    expr = self.attach_index(expr, index);
                }
                Some(Token::Dot) | Some(Token::Arrow) => {
                    let via_arrow = self.peek() == Some(Token::Arrow);
                    self.pos += 1;
                    let segment = self.parse_field_segment(via_arrow)?;
                    expr = match expr.kind {
                        ExprKind::FieldAccess(mut access) => {
                            access.segments.push(segment);
                            Expr {
                                id: expr.id,
                                span: expr.span,
                                kind: ExprKind::FieldAccess(access),
                            }
                        }
                        _ => {
                            let id = self.id();
                            let span = expr.span;
                            Expr {
                                id,
                                span,
                                kind: ExprKind::FieldAccess(FieldAccess {
                                    head: Box::new(expr),
                                    segments: vec![segment],
                                }),
                            }
                        }
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// `a.b[i]` indexes the trailing field; anything else indexes the whole
    /// expression parsed so far.
    fn attach_index(&mut self, expr: Expr, index: Expr) -> Expr {
        if let ExprKind::FieldAccess(mut access) = expr.kind {
            if matches!(
                access.segments.last().map(|s| &s.kind),
                Some(FieldSegmentKind::Field(_))
            ) {
                let last = access.segments.pop().expect("checked non-empty");
                let name = match last.kind {
                    FieldSegmentKind::Field(name) => name,
                    _ => unreachable!(),
                };
                access.segments.push(FieldSegment {
                    id: last.id,
                    span: last.span,
                    via_arrow: last.via_arrow,
                    kind: FieldSegmentKind::Index {
                        name,
                        index: Box::new(index),
                    },
                });
                return Expr {
                    id: expr.id,
                    span: expr.span,
                    kind: ExprKind::FieldAccess(access),
                };
            }
            let id = self.id();
            let span = expr.span;
            return Expr {
                id,
                span,
                kind: ExprKind::Index {
                    base: Box::new(Expr {
                        id: expr.id,
                        span: expr.span,
                        kind: ExprKind::FieldAccess(access),
                    }),
                    index: Box::new(index),
                },
            };
        }
        let id = self.id();
        let span = expr.span;
        Expr {
            id,
            span,
            kind: ExprKind::Index {
                base: Box::new(expr),
                index: Box::new(index),
            },
        }
    }

    fn parse_field_segment(&mut self, via_arrow: bool) -> PResult<FieldSegment> {
        let id = self.id();
        let span = self.span();

        // A bare number names a tuple element.
        if self.peek() == Some(Token::IntLit) {
            let index = self.bump().expect("peeked");
            return Ok(FieldSegment {
                id,
                span,
                via_arrow,
                kind: FieldSegmentKind::Field(index.text),
            });
        }

        let (name, name_span) = self.expect_name("field or method name")?;
        if self.peek() == Some(Token::LParen) {
            let call = self.parse_call_tail(name, name_span)?;
            return Ok(FieldSegment {
                id,
                span,
                via_arrow,
                kind: FieldSegmentKind::Method(call),
            });
        }
        if self.eat(Token::LBracket) {
            let index = self.parse_expression()?;
            self.expect(Token::RBracket, "']'")?;
            return Ok(FieldSegment {
                id,
                span,
                via_arrow,
                kind: FieldSegmentKind::Index {
                    name,
                    index: Box::new(index),
                },
            });
        }
        Ok(FieldSegment {
            id,
            span,
            via_arrow,
            kind: FieldSegmentKind::Field(name),
        })
    }

    fn parse_call_tail(&mut self, name: String, span: Span) -> PResult<CallExpr> {
        let id = self.id();
        self.expect(Token::LParen, "'('")?;
        let mut args = Vec::new();
        if self.peek() != Some(Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(CallExpr {
            id,
            span,
            name,
            args,
        })
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let id = self.id();
        let span = self.span();
        let kind = match self.peek() {
            Some(Token::IntLit) | Some(Token::HexLit) | Some(Token::BinLit) => {
                let lexeme = self.bump().expect("peeked");
                ExprKind::IntLit(lexeme.text)
            }
            Some(Token::FloatLit) => {
                let lexeme = self.bump().expect("peeked");
                ExprKind::FloatLit(lexeme.text)
            }
            Some(Token::Inf) | Some(Token::Nan) => {
                let lexeme = self.bump().expect("peeked");
                ExprKind::FloatLit(lexeme.text)
            }
            Some(Token::StringLit) => {
                let lexeme = self.bump().expect("peeked");
                let inner = lexeme.text[1..lexeme.text.len() - 1].to_string();
                ExprKind::StringLit(inner)
            }
            Some(Token::True) => {
                self.pos += 1;
                ExprKind::BoolLit(true)
            }
            Some(Token::False) => {
                self.pos += 1;
                ExprKind::BoolLit(false)
            }
            Some(Token::Nullptr) => {
                self.pos += 1;
                ExprKind::NullLit
            }
            Some(Token::Ident) | Some(Token::SpecialIdent) => {
                let lexeme = self.bump().expect("peeked");
                if self.peek() == Some(Token::LParen) {
                    ExprKind::Call(self.parse_call_tail(lexeme.text, lexeme.span)?)
                } else {
                    ExprKind::Variable(lexeme.text)
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let first = self.parse_expression()?;
                if self.eat(Token::Comma) {
                    let mut elems = vec![first];
                    if self.peek() != Some(Token::RParen) {
                        loop {
                            elems.push(self.parse_expression()?);
                            if !self.eat(Token::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Token::RParen, "')'")?;
                    ExprKind::TupleLit(elems)
                } else {
                    self.expect(Token::RParen, "')'")?;
                    return Ok(first);
                }
            }
            Some(Token::LBrace) => {
                self.pos += 1;
                let mut elems = Vec::new();
                if self.peek() != Some(Token::RBrace) {
                    loop {
                        elems.push(self.parse_expression()?);
                        if !self.eat(Token::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Token::RBrace, "'}'")?;
                ExprKind::ArrayLit(elems)
            }
            Some(Token::New) => {
                self.pos += 1;
                return self.parse_allocation(id, span);
            }
            _ => {
                let found = self
                    .tokens
                    .get(self.pos)
                    .map(|l| format!("'{}'", l.text))
                    .unwrap_or_else(|| "end of input".to_string());
                return self.error(format!("expected an expression, found {found}"));
            }
        };
        Ok(Expr { id, span, kind })
    }

    fn parse_allocation(&mut self, id: NodeId, span: Span) -> PResult<Expr> {
        let name = self.expect(Token::Ident, "type name after 'new'")?;

        // Pointer stars on the element type are only meaningful for arrays.
        let mut stars = 0;
        while self.peek() == Some(Token::Star) {
            stars += 1;
            self.pos += 1;
        }

        if self.eat(Token::LBracket) {
            let tid = self.id();
            let mut elem = TypeExpr {
                id: tid,
                span: name.span,
                kind: TypeExprKind::Named(name.text),
            };
            for _ in 0..stars {
                let pid = self.id();
                elem = TypeExpr {
                    id: pid,
                    span: name.span,
                    kind: TypeExprKind::Pointer(Box::new(elem)),
                };
            }
            let mut dims = Vec::new();
            loop {
                dims.push(self.parse_expression()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
            self.expect(Token::RBracket, "']'")?;
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::NewArray { elem, dims },
            });
        }

        if stars > 0 {
            return self.error("'*' is only allowed on array element types in 'new'");
        }

        self.expect(Token::LParen, "'('")?;
        if is_primitive_name(&name.text) {
            let init = self.parse_expression()?;
            self.expect(Token::RParen, "')'")?;
            return Ok(Expr {
                id,
                span,
                kind: ExprKind::NewPrimitive {
                    prim: name.text,
                    init: Box::new(init),
                },
            });
        }

        let mut args = Vec::new();
        if self.peek() != Some(Token::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        Ok(Expr {
            id,
            span,
            kind: ExprKind::NewStruct {
                name: name.text,
                args,
            },
        })
    }
}

pub fn is_primitive_name(name: &str) -> bool {
    matches!(name, "int" | "float" | "bool" | "string" | "void")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        let result = parse_source(src);
        assert!(
            result.is_ok(),
            "unexpected errors: {:?} {:?}",
            result.lex_errors,
            result.errors
        );
        result.program
    }

    fn main_body(src: &str) -> Vec<Stmt> {
        let program = parse_ok(src);
        match program.items.into_iter().next() {
            Some(Item::Function(f)) => f.body.statements,
            other => panic!("expected a function, got {other:?}"),
        }
    }

    #[test]
    fn hello_world() {
        let stmts = main_body(r#"fn main() { println("Hello"); }"#);
        assert_eq!(stmts.len(), 1);
        match &stmts[0].kind {
            StmtKind::Expr { expr } => match &expr.kind {
                ExprKind::Call(call) => {
                    assert_eq!(call.name, "println");
                    assert_eq!(call.args.len(), 1);
                }
                other => panic!("expected call, got {other:?}"),
            },
            other => panic!("expected expression statement, got {other:?}"),
        }
    }

    #[test]
    fn struct_with_access_block() {
        let program = parse_ok(
            "struct Point {\n  x: int;\n  private { secret: float; }\n  fn norm() -> float { return 0.0; }\n}",
        );
        match &program.items[0] {
            Item::Struct(def) => {
                assert_eq!(def.name, "Point");
                assert_eq!(def.fields.len(), 2);
                assert!(!def.fields[0].is_private);
                assert!(def.fields[1].is_private);
                assert_eq!(def.methods.len(), 1);
            }
            other => panic!("expected struct, got {other:?}"),
        }
    }

    #[test]
    fn pointer_and_array_types() {
        let stmts = main_body("fn main() { var xs: int*[] = nullptr; }");
        match &stmts[0].kind {
            StmtKind::VarDecl(decl) => match &decl.ty.kind {
                TypeExprKind::Array(inner) => {
                    assert!(matches!(inner.kind, TypeExprKind::Pointer(_)));
                }
                other => panic!("expected array type, got {other:?}"),
            },
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn field_access_chain_with_arrow() {
        let stmts = main_body("fn main() { var v: int = a.b->c; }");
        match &stmts[0].kind {
            StmtKind::VarDecl(decl) => match &decl.init.as_ref().unwrap().kind {
                ExprKind::FieldAccess(access) => {
                    assert_eq!(access.segments.len(), 2);
                    assert!(!access.segments[0].via_arrow);
                    assert!(access.segments[1].via_arrow);
                }
                other => panic!("expected field access, got {other:?}"),
            },
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn tuple_index_segment() {
        let stmts = main_body("fn main() { var v: int = t.0; }");
        match &stmts[0].kind {
            StmtKind::VarDecl(decl) => match &decl.init.as_ref().unwrap().kind {
                ExprKind::FieldAccess(access) => match &access.segments[0].kind {
                    FieldSegmentKind::Field(name) => assert_eq!(name, "0"),
                    other => panic!("expected field segment, got {other:?}"),
                },
                other => panic!("expected field access, got {other:?}"),
            },
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn short_circuit_precedence() {
        // `a && b || c` groups as `(a && b) || c`.
        let stmts = main_body("fn main() { var z: bool = a && b || c; }");
        match &stmts[0].kind {
            StmtKind::VarDecl(decl) => match &decl.init.as_ref().unwrap().kind {
                ExprKind::Binary { op, lhs, .. } => {
                    assert_eq!(*op, BinaryOp::Or);
                    assert!(matches!(
                        lhs.kind,
                        ExprKind::Binary {
                            op: BinaryOp::And,
                            ..
                        }
                    ));
                }
                other => panic!("expected binary, got {other:?}"),
            },
            other => panic!("expected declaration, got {other:?}"),
        }
    }

    #[test]
    fn allocations() {
        let stmts = main_body(
            "fn main() { var p: int* = new int(7); var a: int[] = new int[5]; var q: Point* = new Point(1, 2); }",
        );
        assert_eq!(stmts.len(), 3);
        let inits: Vec<&ExprKind> = stmts
            .iter()
            .map(|s| match &s.kind {
                StmtKind::VarDecl(d) => &d.init.as_ref().unwrap().kind,
                other => panic!("expected declaration, got {other:?}"),
            })
            .collect();
        assert!(matches!(inits[0], ExprKind::NewPrimitive { .. }));
        assert!(matches!(inits[1], ExprKind::NewArray { .. }));
        assert!(matches!(inits[2], ExprKind::NewStruct { .. }));
    }

    #[test]
    fn deref_assignment_target() {
        let stmts = main_body("fn main() { *p = 8; }");
        match &stmts[0].kind {
            StmtKind::Assign { target, .. } => {
                assert!(matches!(target.kind, ExprKind::Deref { .. }));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn for_loop_shape() {
        let stmts = main_body("fn main() { for (var i: int = 0; i < 10; i++) { break; } }");
        match &stmts[0].kind {
            StmtKind::For(for_stmt) => {
                assert!(for_stmt.init.is_some());
                assert!(for_stmt.update.is_some());
                assert_eq!(for_stmt.body.statements.len(), 1);
            }
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn destructuring_statement() {
        let stmts = main_body("fn main() { var (a: int, const b: string) = f(); }");
        match &stmts[0].kind {
            StmtKind::Destructure { items, .. } => {
                assert_eq!(items.len(), 2);
                assert!(!items[0].is_const);
                assert!(items[1].is_const);
            }
            other => panic!("expected destructuring, got {other:?}"),
        }
    }

    #[test]
    fn multiple_return_types() {
        let program = parse_ok("fn divmod(a: int, b: int) -> (int, int) { return (a, b); }");
        match &program.items[0] {
            Item::Function(f) => assert_eq!(f.return_types.len(), 2),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn error_recovery_keeps_going() {
        let result = parse_source("fn main() { var x: = 1; var y: int = 2; }");
        assert!(!result.errors.is_empty());
        // The second statement still parses.
        match &result.program.items[0] {
            Item::Function(f) => assert!(!f.body.statements.is_empty()),
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn node_ids_are_unique() {
        let program = parse_ok("fn main() { var x: int = 1 + 2 * 3; }");
        // Spot check: the program node exists and ids are dense enough to be
        // distinct (the parser increments a counter).
        assert_eq!(program.id, 0);
    }
}
