//! Tokenizing text memory images.
//!
//! The module's key data structure is the [`Token`] enum,
//! which lists all of the tokens which can appear in a text image.

use std::num::IntErrorKind;

use logos::{Lexer, Logos};

/// A unit of information in a text memory image.
#[derive(Debug, Logos, PartialEq, Eq, Clone)]
#[logos(skip r"[ \t]+", error = LexErr)]
pub enum Token {
    // These regexes match more than what is valid (e.g., `23trst` matches as unsigned)
    // so that the whole unit is reported as one bad number instead of being split up.

    /// An unsigned numeric value (e.g., `9`, `#14`, `x7F`, etc.)
    #[regex(r"\d\w*", lex_unsigned_dec)]
    #[regex(r"#\d?\w*", lex_unsigned_dec)]
    #[regex(r"[Xx][\dA-Fa-f]\w*", lex_unsigned_hex)]
    Unsigned(u16),

    /// A signed numeric value (e.g., `-9`, `#-14`, `x-7F`, etc.)
    #[regex(r"-\w*", lex_signed_dec)]
    #[regex(r"#-\w*", lex_signed_dec)]
    #[regex(r"[Xx]-\w*", lex_signed_hex)]
    Signed(i16),

    /// A label (e.g., `LOOP`, `GETC_ROUTINE`).
    #[regex(r"[A-Za-z_]\w*", |lx| lx.slice().to_string())]
    Ident(String),

    /// A directive (e.g., `.orig`, `.fill`), without the leading period.
    #[regex(r"\.[A-Za-z_]\w*", |lx| lx.slice()[1..].to_ascii_lowercase())]
    Directive(String),

    /// A colon, which can optionally appear after labels.
    #[token(":")]
    Colon,

    /// A comment, which starts with a semicolon and spans the remaining part of the line.
    #[regex(r";.*")]
    Comment,

    /// A new line.
    #[regex(r"\r?\n")]
    NewLine
}

/// Any errors raised in attempting to tokenize a text image.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, thiserror::Error)]
pub enum LexErr {
    /// Numeric literal (unsigned dec or hex) cannot fit within the range of a u16
    #[error("numeric token does not fit 16-bit unsigned integer")]
    DoesNotFitU16,
    /// Numeric literal (signed dec or hex) cannot fit within the range of a i16
    #[error("numeric token does not fit 16-bit signed integer")]
    DoesNotFitI16,
    /// Hex literal (starting with x) has invalid hex digits
    #[error("invalid hex literal")]
    InvalidHex,
    /// Hex literal (starting with x) doesn't have digits after it.
    #[error("hex literal has no digits")]
    InvalidHexEmpty,
    /// Numeric literal has invalid digits (i.e., not 0-9)
    #[error("invalid decimal literal")]
    InvalidNumeric,
    /// Numeric literal has no digits in it (it's just `#` or `#-`)
    #[error("decimal literal has no digits")]
    InvalidDecEmpty,
    /// Int parsing failed but the reason why is unknown
    #[error("could not parse integer")]
    UnknownIntErr,
    /// A symbol was used which cannot start any token
    #[default]
    #[error("unrecognized symbol")]
    InvalidSymbol
}

fn convert_int_error(e: &IntErrorKind, invalid: LexErr, empty: LexErr, overflow: LexErr, src: &str) -> LexErr {
    match e {
        IntErrorKind::Empty        => empty,
        IntErrorKind::InvalidDigit if src == "-" => empty,
        IntErrorKind::InvalidDigit => invalid,
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => overflow,
        _ => LexErr::UnknownIntErr,
    }
}
fn lex_unsigned_dec(lx: &Lexer<'_, Token>) -> Result<u16, LexErr> {
    let string = lx.slice().strip_prefix('#').unwrap_or(lx.slice());

    string.parse::<u16>()
        .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidDecEmpty, LexErr::DoesNotFitU16, string))
}
fn lex_signed_dec(lx: &Lexer<'_, Token>) -> Result<i16, LexErr> {
    let string = lx.slice().strip_prefix('#').unwrap_or(lx.slice());

    string.parse::<i16>()
        .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidNumeric, LexErr::InvalidDecEmpty, LexErr::DoesNotFitI16, string))
}
fn lex_unsigned_hex(lx: &Lexer<'_, Token>) -> Result<u16, LexErr> {
    let hex = &lx.slice()[1..];

    u16::from_str_radix(hex, 16)
        .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, LexErr::DoesNotFitU16, hex))
}
fn lex_signed_hex(lx: &Lexer<'_, Token>) -> Result<i16, LexErr> {
    let hex = &lx.slice()[1..];

    i16::from_str_radix(hex, 16)
        .map_err(|e| convert_int_error(e.kind(), LexErr::InvalidHex, LexErr::InvalidHexEmpty, LexErr::DoesNotFitI16, hex))
}

#[cfg(test)]
mod tests {
    use logos::Logos;

    use super::{LexErr, Token};

    fn lex_all(src: &str) -> Vec<Result<Token, LexErr>> {
        Token::lexer(src).collect()
    }

    #[test]
    fn test_numbers() {
        assert_eq!(lex_all("0 123 #100 x2110 XabCD 65535"), [
            Ok(Token::Unsigned(0)),
            Ok(Token::Unsigned(123)),
            Ok(Token::Unsigned(100)),
            Ok(Token::Unsigned(0x2110)),
            Ok(Token::Unsigned(0xABCD)),
            Ok(Token::Unsigned(65535)),
        ]);
        assert_eq!(lex_all("-1 #-300 x-8000"), [
            Ok(Token::Signed(-1)),
            Ok(Token::Signed(-300)),
            Ok(Token::Signed(-0x8000)),
        ]);
    }

    #[test]
    fn test_bad_numbers() {
        assert_eq!(lex_all("65536"), [Err(LexErr::DoesNotFitU16)]);
        assert_eq!(lex_all("-32769"), [Err(LexErr::DoesNotFitI16)]);
        assert_eq!(lex_all("x12345"), [Err(LexErr::DoesNotFitU16)]);
        assert_eq!(lex_all("x3G00"), [Err(LexErr::InvalidHex)]);
        assert_eq!(lex_all("12ab"), [Err(LexErr::InvalidNumeric)]);
        assert_eq!(lex_all("#"), [Err(LexErr::InvalidDecEmpty)]);
        assert_eq!(lex_all("x-"), [Err(LexErr::InvalidHexEmpty)]);
    }

    #[test]
    fn test_hex_like_labels() {
        assert_eq!(lex_all("xa_loop"), [Err(LexErr::InvalidHex)]);
        assert_eq!(lex_all("XAB"), [Ok(Token::Unsigned(0xAB))]);
        assert_eq!(lex_all("xloop"), [Ok(Token::Ident("xloop".to_string()))]);
    }

    #[test]
    fn test_lines() {
        let src = "  .ORIG x3000 ; start\nLOOP: .fill LOOP\r\n@";
        assert_eq!(lex_all(src), [
            Ok(Token::Directive("orig".to_string())),
            Ok(Token::Unsigned(0x3000)),
            Ok(Token::Comment),
            Ok(Token::NewLine),
            Ok(Token::Ident("LOOP".to_string())),
            Ok(Token::Colon),
            Ok(Token::Directive("fill".to_string())),
            Ok(Token::Ident("LOOP".to_string())),
            Ok(Token::NewLine),
            Err(LexErr::InvalidSymbol),
        ]);
    }
}
