//! Token definitions and the lexer wrapper.
//!
//! Tokens are described with `logos`; the wrapper turns byte offsets into
//! line/column positions and collects unrecognized input as lexical errors
//! instead of failing.

use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"/\*[^*]*\*+(?:[^/*][^*]*\*+)*/")]
pub enum Token {
    // -- keywords ------------------------------------------------------------
    #[token("fn")]
    Fn,
    #[token("struct")]
    Struct,
    #[token("var")]
    Var,
    #[token("const")]
    Const,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("until")]
    Until,
    #[token("for")]
    For,
    #[token("loop")]
    Loop,
    #[token("break")]
    Break,
    #[token("new")]
    New,
    #[token("as")]
    As,
    #[token("bits_as")]
    BitsAs,
    #[token("private")]
    Private,
    #[token("public")]
    Public,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nullptr")]
    Nullptr,
    #[token("inf")]
    Inf,
    #[token("nan")]
    Nan,

    // -- literals and names --------------------------------------------------
    #[regex(r"[0-9]+\.[0-9]+")]
    FloatLit,
    #[regex(r"0x[0-9a-fA-F]+")]
    HexLit,
    #[regex(r"0b[01]+")]
    BinLit,
    #[regex(r"[0-9]+")]
    IntLit,
    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLit,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
    /// `$toString`, `$destruct`, ... — special method names.
    #[regex(r"\$[A-Za-z_][A-Za-z0-9_]*")]
    SpecialIdent,

    // -- punctuation ---------------------------------------------------------
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semi,
    #[token(":")]
    Colon,
    #[token("->")]
    Arrow,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,

    // -- operators -----------------------------------------------------------
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("=")]
    Assign,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
}

/// A token together with its source text and position.
#[derive(Debug, Clone)]
pub struct Lexeme {
    pub token: Token,
    pub text: String,
    pub span: Span,
}

/// A lexical error: input the token definitions do not cover.
#[derive(Debug, Clone)]
pub struct LexError {
    pub span: Span,
    pub text: String,
}

/// Tokenize `source`, splitting the result into recognized lexemes and
/// lexical errors. Both carry line/column positions.
pub fn tokenize(source: &str) -> (Vec<Lexeme>, Vec<LexError>) {
    let line_starts = line_starts(source);
    let mut lexemes = Vec::new();
    let mut errors = Vec::new();

    let mut lexer = Token::lexer(source);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = position_of(&line_starts, range.start);
        match result {
            Ok(token) => lexemes.push(Lexeme {
                token,
                text: lexer.slice().to_string(),
                span,
            }),
            Err(()) => errors.push(LexError {
                span,
                text: lexer.slice().to_string(),
            }),
        }
    }

    (lexemes, errors)
}

fn line_starts(source: &str) -> Vec<usize> {
    let mut starts = vec![0];
    for (i, b) in source.bytes().enumerate() {
        if b == b'\n' {
            starts.push(i + 1);
        }
    }
    starts
}

fn position_of(line_starts: &[usize], offset: usize) -> Span {
    let line = match line_starts.binary_search(&offset) {
        Ok(i) => i,
        Err(i) => i - 1,
    };
    Span::new(line as u32 + 1, (offset - line_starts[line]) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        let (lexemes, errors) = tokenize(src);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        lexemes.into_iter().map(|l| l.token).collect()
    }

    #[test]
    fn keywords_and_idents() {
        assert_eq!(
            tokens("fn main until foo"),
            vec![Token::Fn, Token::Ident, Token::Until, Token::Ident]
        );
    }

    #[test]
    fn numeric_literals() {
        assert_eq!(
            tokens("42 0x2A 0b101010 3.14"),
            vec![Token::IntLit, Token::HexLit, Token::BinLit, Token::FloatLit]
        );
    }

    #[test]
    fn special_ident_and_arrow() {
        assert_eq!(
            tokens("p->$toString()"),
            vec![
                Token::Ident,
                Token::Arrow,
                Token::SpecialIdent,
                Token::LParen,
                Token::RParen
            ]
        );
    }

    #[test]
    fn string_literal_keeps_escapes() {
        let (lexemes, _) = tokenize(r#""a\n\"b""#);
        assert_eq!(lexemes[0].token, Token::StringLit);
        assert_eq!(lexemes[0].text, r#""a\n\"b""#);
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            tokens("a // line\n/* block\nstill */ b"),
            vec![Token::Ident, Token::Ident]
        );
    }

    #[test]
    fn positions_are_line_and_column() {
        let (lexemes, _) = tokenize("a\n  b");
        assert_eq!(lexemes[0].span, Span::new(1, 0));
        assert_eq!(lexemes[1].span, Span::new(2, 2));
    }

    #[test]
    fn unknown_input_is_a_lex_error() {
        let (_, errors) = tokenize("a @ b");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].text, "@");
    }
}
