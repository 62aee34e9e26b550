//! Assembly parser
//!
//! Works line by line on the token stream from [`crate::lexer`]. A line is
//! empty, a directive or an instruction:
//!
//! ```text
//! .output d
//! .inputs dd
//! .const d 2.0
//! .temps d
//!     mul_ddd r4, r1, r3
//!     func_ddn r0, r4, sqrt
//! ```

use crate::error::{AssemblerError, Result};
use crate::lexer::Token;
use fusevm_spec::{Constant, TypeCode};
use logos::Logos;
use std::ops::Range;

/// Instruction operand as written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Register(u8),
    Integer(i64),
    /// Function name or `all`
    Name(String),
}

/// An instruction line before opcode resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInstruction {
    pub line: usize,
    pub mnemonic: String,
    pub operands: Vec<Operand>,
}

/// Register-file directives
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    Output(TypeCode),
    Inputs(Vec<TypeCode>),
    Const(TypeCode, Constant),
    Temps(Vec<TypeCode>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Directive { line: usize, directive: Directive },
    Instruction(ParsedInstruction),
}

type Spanned = (Token, Range<usize>);

fn tokenize(line: usize, text: &str) -> Result<Vec<Spanned>> {
    let mut lex = Token::lexer(text);
    let mut tokens = Vec::new();
    while let Some(tok) = lex.next() {
        match tok {
            Ok(Token::Newline) => {}
            Ok(t) => tokens.push((t, lex.span())),
            Err(()) => {
                return Err(AssemblerError::SyntaxError {
                    line,
                    column: lex.span().start + 1,
                    message: format!("unexpected input '{}'", lex.slice()),
                })
            }
        }
    }
    Ok(tokens)
}

fn syntax(line: usize, span: &Range<usize>, message: impl Into<String>) -> AssemblerError {
    AssemblerError::SyntaxError {
        line,
        column: span.start + 1,
        message: message.into(),
    }
}

/// Parse a whole source text
pub fn parse(source: &str) -> Result<Vec<Statement>> {
    let mut statements = Vec::new();
    for (i, text) in source.lines().enumerate() {
        if let Some(statement) = parse_line(i + 1, text)? {
            statements.push(statement);
        }
    }
    Ok(statements)
}

/// Parse one source line; `None` for blank and comment-only lines
pub fn parse_line(line: usize, text: &str) -> Result<Option<Statement>> {
    let tokens = tokenize(line, text)?;
    let Some((first, span)) = tokens.first() else {
        return Ok(None);
    };
    match first {
        Token::Directive(name) => {
            let directive = parse_directive(line, name, &tokens[1..])?;
            Ok(Some(Statement::Directive { line, directive }))
        }
        Token::Identifier(mnemonic) => Ok(Some(Statement::Instruction(ParsedInstruction {
            line,
            mnemonic: mnemonic.to_lowercase(),
            operands: parse_operands(line, &tokens[1..])?,
        }))),
        _ => Err(syntax(line, span, "expected an instruction or directive")),
    }
}

/// Parse a single instruction from assembly text
pub fn parse_instruction(text: &str) -> Result<ParsedInstruction> {
    match parse_line(1, text)? {
        Some(Statement::Instruction(inst)) => Ok(inst),
        _ => Err(AssemblerError::SyntaxError {
            line: 1,
            column: 1,
            message: "expected an instruction".to_string(),
        }),
    }
}

/// Parse register name (`r0` to `r255`)
pub fn parse_register(name: &str) -> Result<u8> {
    let invalid = || AssemblerError::InvalidRegister {
        line: 1,
        register: name.to_string(),
    };
    match Token::lexer(name.trim()).next() {
        Some(Ok(Token::Register(n))) => u8::try_from(n).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

fn parse_operands(line: usize, tokens: &[Spanned]) -> Result<Vec<Operand>> {
    let mut operands = Vec::new();
    let mut expect_operand = true;
    for (tok, span) in tokens {
        if !expect_operand {
            if *tok != Token::Comma {
                return Err(syntax(line, span, "expected ','"));
            }
            expect_operand = true;
            continue;
        }
        let operand = match tok {
            Token::Register(n) => Operand::Register(u8::try_from(*n).map_err(|_| {
                AssemblerError::InvalidRegister {
                    line,
                    register: format!("r{}", n),
                }
            })?),
            Token::Integer(v) | Token::Hex(v) => Operand::Integer(*v),
            Token::Identifier(name) => Operand::Name(name.clone()),
            _ => return Err(syntax(line, span, "expected a register, number or name")),
        };
        operands.push(operand);
        expect_operand = false;
    }
    if expect_operand && !operands.is_empty() {
        let end = tokens.last().map_or(0..0, |(_, s)| s.clone());
        return Err(syntax(line, &end, "trailing ','"));
    }
    Ok(operands)
}

fn parse_types(line: usize, tokens: &[Spanned]) -> Result<Vec<TypeCode>> {
    let mut codes = Vec::new();
    for (tok, span) in tokens {
        let Token::Identifier(word) = tok else {
            return Err(syntax(line, span, "expected type codes"));
        };
        for c in word.chars() {
            codes.push(TypeCode::from_char(c).ok_or_else(|| AssemblerError::InvalidDirective {
                line,
                message: format!("unknown type code '{}'", c),
            })?);
        }
    }
    Ok(codes)
}

fn parse_directive(line: usize, name: &str, tokens: &[Spanned]) -> Result<Directive> {
    match name {
        "output" => match parse_types(line, tokens)?.as_slice() {
            [code] => Ok(Directive::Output(*code)),
            other => Err(AssemblerError::InvalidDirective {
                line,
                message: format!(".output takes one type code, found {}", other.len()),
            }),
        },
        "inputs" => Ok(Directive::Inputs(parse_types(line, tokens)?)),
        "temps" => Ok(Directive::Temps(parse_types(line, tokens)?)),
        "const" => {
            let Some(((Token::Identifier(ty), span), value)) = tokens.split_first() else {
                return Err(AssemblerError::InvalidDirective {
                    line,
                    message: ".const needs a type code and a value".to_string(),
                });
            };
            let mut chars = ty.chars();
            let code = match (chars.next().and_then(TypeCode::from_char), chars.next()) {
                (Some(code), None) => code,
                _ => return Err(syntax(line, span, format!("'{}' is not a type code", ty))),
            };
            Ok(Directive::Const(code, parse_constant(line, code, value)?))
        }
        other => Err(AssemblerError::InvalidDirective {
            line,
            message: format!("unknown directive .{}", other),
        }),
    }
}

fn number(tok: &Token) -> Option<f64> {
    match tok {
        Token::Integer(v) | Token::Hex(v) => Some(*v as f64),
        Token::Float(v) => Some(*v),
        _ => None,
    }
}

fn parse_constant(line: usize, code: TypeCode, tokens: &[Spanned]) -> Result<Constant> {
    let bad = |message: String| AssemblerError::InvalidImmediate { line, message };
    let kinds: Vec<&Token> = tokens.iter().map(|(t, _)| t).collect();

    let constant = match (code, kinds.as_slice()) {
        (TypeCode::Bool, [Token::Identifier(w)]) if w == "true" => Constant::Bool(true),
        (TypeCode::Bool, [Token::Identifier(w)]) if w == "false" => Constant::Bool(false),
        (TypeCode::Bool, [Token::Integer(v)]) if *v == 0 || *v == 1 => Constant::Bool(*v == 1),
        (TypeCode::Int, [Token::Integer(v) | Token::Hex(v)]) => {
            Constant::Int(i32::try_from(*v).map_err(|_| bad(format!("{} does not fit in int32", v)))?)
        }
        (TypeCode::Long, [Token::Integer(v) | Token::Hex(v)]) => Constant::Long(*v),
        (TypeCode::Float, [tok]) => Constant::Float(number(tok).ok_or_else(|| bad("expected a number".into()))? as f32),
        (TypeCode::Double, [tok]) => Constant::Double(number(tok).ok_or_else(|| bad("expected a number".into()))?),
        (TypeCode::Complex, [tok]) => {
            Constant::Complex(number(tok).ok_or_else(|| bad("expected a number".into()))?, 0.0)
        }
        (TypeCode::Complex, [Token::LParen, re, Token::Comma, im, Token::RParen]) => {
            match (number(re), number(im)) {
                (Some(re), Some(im)) => Constant::Complex(re, im),
                _ => return Err(bad("expected (real, imag)".into())),
            }
        }
        (TypeCode::Str, [Token::Str(bytes)]) => Constant::Str(bytes.clone()),
        (code, _) => return Err(bad(format!("not a valid '{}' constant", code))),
    };
    Ok(constant)
}
