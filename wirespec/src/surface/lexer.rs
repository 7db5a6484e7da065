use logos::Logos;

use crate::reporting::{LexerMessage, Message};
use crate::source::{BytePos, ByteRange};
use crate::surface::BaseType;

#[derive(Clone, Debug, PartialEq, Eq, Logos)]
pub enum Token<'source> {
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Name(&'source str),
    #[regex(r#""[a-zA-Z0-9_]+""#, |lex| &lex.slice()[1..(lex.slice().len() - 1)])]
    StringLiteral(&'source str),

    #[token("string", |_| BaseType::String)]
    #[token("double", |_| BaseType::Double)]
    #[token("int", |_| BaseType::Int)]
    #[token("uint", |_| BaseType::Uint)]
    #[token("bool", |_| BaseType::Bool)]
    #[token("ptr", |_| BaseType::Ptr)]
    #[token("buffer", |_| BaseType::Buffer)]
    BaseType(BaseType),

    #[token("type")]
    KeywordType,

    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("=")]
    Equals,
    #[token("|")]
    Pipe,
    #[token("?")]
    Question,
    #[token("{")]
    OpenBrace,
    #[token("}")]
    CloseBrace,
    #[token("(")]
    OpenParen,
    #[token(")")]
    CloseParen,
    #[regex(r"\[[ \t\r\n]*\]")]
    Brackets,
    #[regex(r"\[[ \t\r\n]*[0-9]+[ \t\r\n]*\]", fixed_arity)]
    FixedArity(u32),

    #[error]
    #[regex(r"\p{Whitespace}", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    Error,
}

fn fixed_arity<'source>(lexer: &mut logos::Lexer<'source, Token<'source>>) -> Option<u32> {
    let slice = lexer.slice();
    slice[1..(slice.len() - 1)].trim().parse().ok()
}

pub type Spanned<Tok, Loc> = (Loc, Tok, Loc);

/// Tokenize the combined source buffer.
///
/// An unexpected character is reported, then the rest of its line is
/// skipped. The returned range is the end of input.
pub fn tokens(
    source: &str,
) -> (
    Vec<Spanned<Token<'_>, BytePos>>,
    ByteRange,
    Vec<Message>,
) {
    assert!(
        source.len() <= u32::MAX as usize,
        "`source` must be less than 4GiB in length"
    );

    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut messages = Vec::new();

    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let start = span.start as BytePos;
        let end = span.end as BytePos;

        match token {
            Token::Error => {
                messages.push(Message::from(LexerMessage::UnexpectedCharacter {
                    range: ByteRange::new(start, end),
                }));
                let rest_of_line = lexer.remainder().find('\n');
                lexer.bump(rest_of_line.unwrap_or(lexer.remainder().len()));
            }
            token => tokens.push((start, token, end)),
        }
    }

    let eof = source.len() as BytePos;
    (tokens, ByteRange::new(eof, eof), messages)
}

impl<'source> Token<'source> {
    pub fn description(&self) -> &'static str {
        match self {
            Token::Name(_) => "name",
            Token::StringLiteral(_) => "string literal",
            Token::BaseType(_) => "base type",
            Token::KeywordType => "`type`",
            Token::Colon => "`:`",
            Token::Comma => "`,`",
            Token::Equals => "`=`",
            Token::Pipe => "`|`",
            Token::Question => "`?`",
            Token::OpenBrace => "`{`",
            Token::CloseBrace => "`}`",
            Token::OpenParen => "`(`",
            Token::CloseParen => "`)`",
            Token::Brackets => "`[]`",
            Token::FixedArity(_) => "array length",
            Token::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token<'_>> {
        let (tokens, _, messages) = tokens(source);
        assert!(messages.is_empty(), "{messages:?}");
        tokens.into_iter().map(|(_, token, _)| token).collect()
    }

    #[test]
    fn definition() {
        assert_eq!(
            kinds("type Point = { x: double, tags: string[] }"),
            [
                Token::KeywordType,
                Token::Name("Point"),
                Token::Equals,
                Token::OpenBrace,
                Token::Name("x"),
                Token::Colon,
                Token::BaseType(BaseType::Double),
                Token::Comma,
                Token::Name("tags"),
                Token::Colon,
                Token::BaseType(BaseType::String),
                Token::Brackets,
                Token::CloseBrace,
            ],
        );
    }

    #[test]
    fn keywords_are_not_prefixes() {
        assert_eq!(
            kinds("types integer buffered"),
            [
                Token::Name("types"),
                Token::Name("integer"),
                Token::Name("buffered"),
            ],
        );
    }

    #[test]
    fn arities() {
        assert_eq!(
            kinds(r#""red"[ ] int[ 4 ]?"#),
            [
                Token::StringLiteral("red"),
                Token::Brackets,
                Token::BaseType(BaseType::Int),
                Token::FixedArity(4),
                Token::Question,
            ],
        );
    }

    #[test]
    fn line_comments_are_skipped() {
        assert_eq!(
            kinds("// a comment\ntype // another\nA"),
            [Token::KeywordType, Token::Name("A")],
        );
    }

    #[test]
    fn unexpected_character_skips_the_rest_of_the_line() {
        let (tokens, eof, messages) = tokens("type A = $ int | bool\ntype B = int");

        assert_eq!(
            messages,
            [Message::from(LexerMessage::UnexpectedCharacter {
                range: ByteRange::new(9, 10),
            })],
        );
        let kinds = tokens.iter().map(|(_, token, _)| token.clone()).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                Token::KeywordType,
                Token::Name("A"),
                Token::Equals,
                Token::KeywordType,
                Token::Name("B"),
                Token::Equals,
                Token::BaseType(BaseType::Int),
            ],
        );
        assert_eq!(eof, ByteRange::new(34, 34));
    }

    #[test]
    fn oversized_arity_is_an_error() {
        let (_, _, messages) = tokens("int[99999999999]");
        assert_eq!(messages.len(), 1);
    }
}
