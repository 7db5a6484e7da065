//! Recursive descent parser for schema sources.
//!
//! ```text
//! program    := definition* EOF
//! definition := 'type' NAME '=' ( objectBody | unionBody )
//! objectBody := '{' ( NAME ':' typeExpr (',' NAME ':' typeExpr)* )? '}'
//! unionBody  := '|'? typeExpr ('|' typeExpr)*
//! typeExpr   := ( STRING | BASE_TYPE | NAME [ objectBody | '(' unionBody ')' ] ) extension*
//! extension  := '?' | '[]' | '[' NUMBER ']'
//! ```
//!
//! Names used as types must refer to a definition that has already been
//! completed. Object and union bodies written after a name register that name
//! as a new definition, in the same namespace as top-level definitions.

use fxhash::FxHashMap;

use crate::reporting::ParseMessage;
use crate::source::{BytePos, ByteRange};
use crate::surface::lexer::{Spanned, Token};
use crate::surface::{snake_to_camel, Arity, DefId, Definition, Field, Module};

/// Field names that would shadow the generated members of a struct or class.
const RESERVED_FIELDS: &[&str] = &[
    "constructor",
    "deserialize",
    "fixed_size",
    "release",
    "serialization_size",
    "serialize",
];

/// Host spellings that would shadow the generated members of a class.
const RESERVED_HOST_FIELDS: &[&str] = &["fixedSize", "serializationSize"];

/// Member names that would shadow the generated statics of an enum or union
/// class on the host side.
const RESERVED_MEMBERS: &[&str] = &[
    "classTypes",
    "constructor",
    "deserialize",
    "prototype",
    "symbolFromIndex",
    "symbolToIndex",
];

/// Keywords and alternative tokens of the compiled target. Fields, enum
/// members and definitions are spelled as they are written there.
const CPP_KEYWORDS: &[&str] = &[
    "alignas", "alignof", "and", "and_eq", "asm", "auto", "bitand", "bitor", "bool", "break",
    "case", "catch", "char", "char8_t", "char16_t", "char32_t", "class", "co_await",
    "co_return", "co_yield", "compl", "concept", "const", "const_cast", "consteval",
    "constexpr", "constinit", "continue", "decltype", "default", "delete", "do", "double",
    "dynamic_cast", "else", "enum", "explicit", "export", "extern", "false", "float", "for",
    "friend", "goto", "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept",
    "not", "not_eq", "nullptr", "operator", "or", "or_eq", "private", "protected", "public",
    "register", "reinterpret_cast", "requires", "return", "short", "signed", "sizeof",
    "static", "static_assert", "static_cast", "struct", "switch", "template", "this",
    "thread_local", "throw", "true", "try", "typedef", "typeid", "typename", "union",
    "unsigned", "using", "virtual", "void", "volatile", "wchar_t", "while", "xor", "xor_eq",
];

/// Reserved words of the host target, and type names of its declarations.
const HOST_KEYWORDS: &[&str] = &[
    "any", "arguments", "await", "bigint", "boolean", "break", "case", "catch", "class",
    "const", "continue", "debugger", "default", "delete", "do", "else", "enum", "eval",
    "export", "extends", "false", "finally", "for", "function", "if", "implements", "import",
    "in", "instanceof", "interface", "let", "never", "new", "null", "number", "object",
    "package", "private", "protected", "public", "return", "static", "super", "switch",
    "symbol", "this", "throw", "true", "try", "typeof", "undefined", "unknown", "var", "void",
    "while", "with", "yield",
];

/// Names that the generated sources declare or rely on at global scope.
const RUNTIME_NAMES: &[&str] = &[
    // compiled target
    "Inner", "SharedBuffer", "shared_count_create", "shared_count_decrement",
    "shared_count_increment", "size_t", "std", "uint8_t", "uint16_t", "uint32_t", "uint64_t",
    "int64_t", "uintptr_t", "wire_get", "wire_get_string", "wire_put", "wire_put_string",
    // host target
    "Array", "ArrayBuffer", "ArrayBufferView", "BigInt", "Boolean", "Cursor", "DataView",
    "Error", "Function", "Infinity", "Map", "Module", "NaN", "Number", "Object", "RangeError",
    "Readonly", "ReadonlyMap", "String", "Symbol", "TextDecoder", "TextEncoder", "Uint8Array",
    "WasmModule", "WebAssembly", "globalThis", "wasmMemory", "wireIO",
];

/// Suffix of the declaration alias emitted alongside each enum and union.
const ALIAS_SUFFIX: &str = "Union";

pub struct Parser<'source> {
    tokens: Vec<Spanned<Token<'source>, BytePos>>,
    position: usize,
    eof: ByteRange,
    module: Module,
    messages: Vec<ParseMessage>,
}

impl<'source> Parser<'source> {
    pub fn new(tokens: Vec<Spanned<Token<'source>, BytePos>>, eof: ByteRange) -> Parser<'source> {
        Parser {
            tokens,
            position: 0,
            eof,
            module: Module::default(),
            messages: Vec::new(),
        }
    }

    pub fn finish(self) -> (Module, Vec<ParseMessage>) {
        (self.module, self.messages)
    }

    /// Parse definitions until the end of input. A definition that fails to
    /// parse is recorded, and parsing resumes at the next `type` keyword.
    pub fn program(&mut self) {
        while self.peek().is_some() {
            if let Err(message) = self.definition() {
                self.messages.push(message);
                self.recover();
            }
        }
    }

    fn recover(&mut self) {
        while let Some(token) = self.peek() {
            if *token == Token::KeywordType {
                break;
            }
            self.position += 1;
        }
    }

    fn peek(&self) -> Option<&Token<'source>> {
        self.tokens.get(self.position).map(|(_, token, _)| token)
    }

    fn peek_range(&self) -> ByteRange {
        match self.tokens.get(self.position) {
            Some((start, _, end)) => ByteRange::new(*start, *end),
            None => self.eof,
        }
    }

    fn bump(&mut self) {
        self.position += 1;
    }

    fn unexpected(&self, expected: &'static str) -> ParseMessage {
        ParseMessage::UnexpectedToken {
            range: self.peek_range(),
            found: self.found(),
            expected,
        }
    }

    fn found(&self) -> &'static str {
        self.peek().map_or("end of input", Token::description)
    }

    /// Consume a token without data, leaving it in place if it does not
    /// match.
    fn expect(&mut self, expected: Token<'source>) -> Result<ByteRange, ParseMessage> {
        match self.peek() {
            Some(token) if *token == expected => {
                let range = self.peek_range();
                self.bump();
                Ok(range)
            }
            _ => Err(self.unexpected(expected.description())),
        }
    }

    fn expect_name(&mut self) -> Result<(ByteRange, &'source str), ParseMessage> {
        match self.peek() {
            Some(Token::Name(name)) => {
                let name = *name;
                let range = self.peek_range();
                self.bump();
                Ok((range, name))
            }
            _ => Err(self.unexpected("name")),
        }
    }

    fn definition(&mut self) -> Result<DefId, ParseMessage> {
        self.expect(Token::KeywordType)?;
        let (range, name) = self.expect_name()?;
        self.expect(Token::Equals)?;

        match self.peek() {
            Some(Token::OpenBrace) => self.object_body(range, name),
            _ => self.union_body(range, name),
        }
    }

    fn object_body(&mut self, range: ByteRange, name: &str) -> Result<DefId, ParseMessage> {
        self.expect(Token::OpenBrace)?;

        let mut fields = Vec::<Field>::new();
        while self.peek() != Some(&Token::CloseBrace) {
            if !fields.is_empty() {
                self.expect(Token::Comma)?;
            }

            let (field_range, field_name) = self.expect_name()?;
            self.expect(Token::Colon)?;
            let def = self.type_expr()?;

            if let Definition::StringLiteral(_) = self.module.definition(def) {
                return Err(ParseMessage::StringField { range: field_range });
            }
            if let Some(previous) = fields.iter().find(|field| field.name == field_name) {
                return Err(ParseMessage::DuplicateField {
                    range: field_range,
                    name: field_name.to_owned(),
                    previous: previous.range,
                });
            }

            let host_name = snake_to_camel(field_name);
            if field_name.starts_with('_')
                || field_name == name
                || CPP_KEYWORDS.contains(&field_name)
                || RESERVED_FIELDS.contains(&field_name)
                || RESERVED_FIELDS.contains(&host_name.as_str())
                || RESERVED_HOST_FIELDS.contains(&host_name.as_str())
            {
                return Err(ParseMessage::ReservedField {
                    range: field_range,
                    name: field_name.to_owned(),
                });
            }
            let collision = fields
                .iter()
                .find(|field| snake_to_camel(&field.name) == host_name);
            if let Some(previous) = collision {
                return Err(ParseMessage::FieldNameCollision {
                    range: field_range,
                    name: field_name.to_owned(),
                    host_name,
                    previous: previous.range,
                });
            }

            fields.push(Field {
                range: field_range,
                name: field_name.to_owned(),
                def,
            });
        }

        self.expect(Token::CloseBrace)?;

        let name = name.to_owned();
        self.define(range, Definition::Object { name, fields })
    }

    fn union_body(&mut self, range: ByteRange, name: &str) -> Result<DefId, ParseMessage> {
        if self.peek() == Some(&Token::Pipe) {
            self.bump();
        }

        let mut members = Vec::new();
        let mut variants = Vec::new();
        let mut keys = FxHashMap::<String, ByteRange>::default();

        loop {
            let member_range = self.peek_range();
            let def = self.type_expr()?;

            let key = self.module.structural_key(def);
            if let Some(previous) = keys.get(&key) {
                return Err(ParseMessage::RedundantMember {
                    range: member_range,
                    kind: key,
                    previous: *previous,
                });
            }

            let (member_name, is_enum_member) = match self.module.definition(def) {
                Definition::StringLiteral(value) => {
                    members.push(value.clone());
                    (value.as_str(), true)
                }
                _ => {
                    variants.push(def);
                    (key.as_str(), false)
                }
            };
            if !members.is_empty() && !variants.is_empty() {
                return Err(ParseMessage::MixedUnion {
                    range: member_range,
                });
            }
            // Enum members are enumerators of the compiled target
            let is_cpp_reserved = is_enum_member
                && (CPP_KEYWORDS.contains(&member_name)
                    || member_name.starts_with(|c: char| c.is_ascii_digit()));
            if is_cpp_reserved || RESERVED_MEMBERS.contains(&member_name) {
                return Err(ParseMessage::ReservedMember {
                    range: member_range,
                    name: member_name.to_owned(),
                });
            }
            keys.insert(key, member_range);

            if self.peek() != Some(&Token::Pipe) {
                break;
            }
            self.bump();
        }

        let name = name.to_owned();
        let definition = match members.is_empty() {
            true => Definition::Union { name, variants },
            false => Definition::Enum { name, members },
        };
        self.define(range, definition)
    }

    fn type_expr(&mut self) -> Result<DefId, ParseMessage> {
        let range = self.peek_range();

        let mut def = match self.peek().cloned() {
            Some(Token::StringLiteral(value)) => {
                self.bump();
                let definition = Definition::StringLiteral(value.to_owned());
                self.module.alloc(range, definition)
            }
            Some(Token::BaseType(base_type)) => {
                self.bump();
                self.module.alloc(range, Definition::Primitive(base_type))
            }
            Some(Token::Name(name)) => {
                self.bump();
                match self.peek() {
                    Some(Token::OpenBrace) => self.object_body(range, name)?,
                    Some(Token::OpenParen) => {
                        self.bump();
                        let def = self.union_body(range, name)?;
                        self.expect(Token::CloseParen)?;
                        def
                    }
                    _ => match self.module.lookup(name) {
                        Some(def) => def,
                        None => return Err(self.undefined_name(range, name)),
                    },
                }
            }
            _ => {
                return Err(ParseMessage::ExpectedDefinition {
                    range,
                    found: self.found(),
                })
            }
        };

        loop {
            let range = self.peek_range();
            let arity = match self.peek() {
                Some(Token::Question) => None,
                Some(Token::Brackets) => Some(Arity::Unbounded),
                Some(Token::FixedArity(len)) => Some(Arity::Fixed(*len)),
                _ => break,
            };
            self.bump();

            match (self.module.definition(def), arity) {
                (Definition::StringLiteral(_), _) => {
                    return Err(ParseMessage::StringExtension { range })
                }
                (Definition::Optional(_), None) => {
                    return Err(ParseMessage::NestedOptional { range })
                }
                _ => {}
            }

            let definition = match arity {
                None => Definition::Optional(def),
                Some(arity) => Definition::Array(def, arity),
            };
            def = self.module.alloc(range, definition);
        }

        Ok(def)
    }

    fn undefined_name(&self, range: ByteRange, name: &str) -> ParseMessage {
        let max_distance = usize::max(1, name.len() / 3);
        let suggestion = self
            .module
            .names
            .keys()
            .map(|candidate| (levenshtein::levenshtein(name, candidate), candidate))
            .filter(|(distance, _)| *distance <= max_distance)
            .min()
            .map(|(_, candidate)| candidate.clone());

        ParseMessage::UndefinedName {
            range,
            name: name.to_owned(),
            suggestion,
        }
    }

    /// Register a named definition. Redefining a name is an error, and
    /// poisons the existing definition so that neither is emitted.
    fn define(&mut self, range: ByteRange, definition: Definition) -> Result<DefId, ParseMessage> {
        let name = match definition.name() {
            Some(name) => name.to_owned(),
            None => unreachable!("only named definitions can be defined"),
        };

        if let Some(existing) = self.module.lookup(&name) {
            self.module.poisoned.insert(existing);
            return Err(ParseMessage::DuplicateDefinition {
                range,
                name,
                previous: self.module.node(existing).range,
            });
        }

        if name.starts_with('_')
            || CPP_KEYWORDS.contains(&name.as_str())
            || HOST_KEYWORDS.contains(&name.as_str())
            || RUNTIME_NAMES.contains(&name.as_str())
        {
            return Err(ParseMessage::ReservedDefinition { range, name });
        }
        self.check_alias(range, &name, &definition)?;

        let def = self.module.alloc(range, definition);
        self.module.names.insert(name, def);
        self.module.order.push(def);
        Ok(def)
    }

    /// Enums and unions declare an alias named after them on the host side,
    /// which must not name another definition.
    fn check_alias(
        &self,
        range: ByteRange,
        name: &str,
        definition: &Definition,
    ) -> Result<(), ParseMessage> {
        let has_alias = |definition: &Definition| {
            matches!(definition, Definition::Enum { .. } | Definition::Union { .. })
        };

        let alias = format!("{name}{ALIAS_SUFFIX}");
        if let Some(existing) = self.module.lookup(&alias).filter(|_| has_alias(definition)) {
            return Err(ParseMessage::AliasCollision {
                range,
                alias,
                owner: name.to_owned(),
                previous: self.module.node(existing).range,
            });
        }

        let owner = name.strip_suffix(ALIAS_SUFFIX).and_then(|owner| self.module.lookup(owner));
        match owner {
            Some(owner) if has_alias(self.module.definition(owner)) => {
                Err(ParseMessage::AliasCollision {
                    range,
                    alias: name.to_owned(),
                    owner: self.module.definition(owner).name().unwrap_or_default().to_owned(),
                    previous: self.module.node(owner).range,
                })
            }
            _ => Ok(()),
        }
    }
}
