//! Surface syntax of schema sources.

use std::fmt;

use fxhash::{FxHashMap, FxHashSet};

use crate::reporting::Message;
use crate::source::ByteRange;

pub mod lexer;
mod parser;

/// The base types of the schema language.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BaseType {
    String,
    Double,
    Int,
    Uint,
    Bool,
    Ptr,
    Buffer,
}

impl BaseType {
    pub fn name(self) -> &'static str {
        match self {
            BaseType::String => "string",
            BaseType::Double => "double",
            BaseType::Int => "int",
            BaseType::Uint => "uint",
            BaseType::Bool => "bool",
            BaseType::Ptr => "ptr",
            BaseType::Buffer => "buffer",
        }
    }
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The host spelling of a field name: an underscore between two word
/// characters is removed and the character after it upper-cased, so
/// `foo_bar` becomes `fooBar`.
pub fn snake_to_camel(name: &str) -> String {
    let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let chars = name.chars().collect::<Vec<_>>();
    let mut camel = String::with_capacity(name.len());

    let mut index = 0;
    while index < chars.len() {
        let c = chars[index];
        let joins_words = c == '_'
            && index > 0
            && is_word(chars[index - 1])
            && chars.get(index + 1).map_or(false, |next| is_word(*next));

        if joins_words {
            camel.extend(chars[index + 1].to_uppercase());
            index += 2;
        } else {
            camel.push(c);
            index += 1;
        }
    }

    camel
}

/// Index of a node in the definition arena of a [`Module`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefId(u32);

impl DefId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// The number of elements in an array.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Arity {
    Fixed(u32),
    Unbounded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Range of the field's name.
    pub range: ByteRange,
    pub name: String,
    pub def: DefId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Definition {
    Primitive(BaseType),
    /// A symbolic tag. Only valid as a member of an enum.
    StringLiteral(String),
    Object {
        name: String,
        fields: Vec<Field>,
    },
    Union {
        name: String,
        variants: Vec<DefId>,
    },
    Enum {
        name: String,
        members: Vec<String>,
    },
    Optional(DefId),
    Array(DefId, Arity),
}

impl Definition {
    /// The name of object, union and enum definitions.
    pub fn name(&self) -> Option<&str> {
        match self {
            Definition::Object { name, .. }
            | Definition::Union { name, .. }
            | Definition::Enum { name, .. } => Some(name),
            Definition::Primitive(_)
            | Definition::StringLiteral(_)
            | Definition::Optional(_)
            | Definition::Array(_, _) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Range of the token that started the definition. For named definitions
    /// this is the range of the name.
    pub range: ByteRange,
    pub definition: Definition,
}

/// A parsed set of schema sources.
#[derive(Debug, Clone, Default)]
pub struct Module {
    nodes: Vec<Node>,
    names: FxHashMap<String, DefId>,
    /// Named definitions in the order that they were completed.
    order: Vec<DefId>,
    /// Named definitions that were defined more than once.
    poisoned: FxHashSet<DefId>,
    base_types: FxHashSet<BaseType>,
}

impl Module {
    /// Parse the combined source buffer, returning the module along with the
    /// messages produced while lexing and parsing it.
    pub fn parse(source: &str) -> (Module, Vec<Message>) {
        let (tokens, eof, mut messages) = lexer::tokens(source);
        let mut parser = parser::Parser::new(tokens, eof);
        parser.program();

        let (module, parse_messages) = parser.finish();
        messages.extend(parse_messages.into_iter().map(Message::from));

        (module, messages)
    }

    pub fn node(&self, id: DefId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn definition(&self, id: DefId) -> &Definition {
        &self.node(id).definition
    }

    /// Look up a named definition.
    pub fn lookup(&self, name: &str) -> Option<DefId> {
        self.names.get(name).copied()
    }

    /// Named definitions in declaration order, including poisoned ones.
    pub fn definitions(&self) -> impl Iterator<Item = DefId> + '_ {
        self.order.iter().copied()
    }

    pub fn is_poisoned(&self, id: DefId) -> bool {
        self.poisoned.contains(&id)
    }

    /// Whether a base type was mentioned anywhere in the sources.
    pub fn uses(&self, base_type: BaseType) -> bool {
        self.base_types.contains(&base_type)
    }

    /// The key used to compare the members of unions and enums. Two members
    /// with the same key would be indistinguishable on the host side.
    pub fn structural_key(&self, id: DefId) -> String {
        match self.definition(id) {
            Definition::Primitive(base_type) => base_type.name().to_owned(),
            Definition::StringLiteral(value) => format!("\"{value}\""),
            Definition::Object { name, .. }
            | Definition::Union { name, .. }
            | Definition::Enum { name, .. } => name.clone(),
            Definition::Optional(inner) => format!("{}?", self.structural_key(*inner)),
            Definition::Array(inner, Arity::Unbounded) => {
                format!("{}[]", self.structural_key(*inner))
            }
            Definition::Array(inner, Arity::Fixed(len)) => {
                format!("{}[{len}]", self.structural_key(*inner))
            }
        }
    }

    fn alloc(&mut self, range: ByteRange, definition: Definition) -> DefId {
        if let Definition::Primitive(base_type) = definition {
            self.base_types.insert(base_type);
        }

        let id = DefId(self.nodes.len() as u32);
        self.nodes.push(Node { range, definition });
        id
    }
}
