//! Diagnostic messages used in the schema compiler.
//!
//! Every recoverable failure is one of these messages. They are returned as
//! values from the lexer, the parser and the layout resolver, collected by
//! the loop that drives each phase, and converted to [`Diagnostic`]s by the
//! driver in order to present them to the user.
//!
//! [`Diagnostic`]: codespan_reporting::diagnostic::Diagnostic

use codespan_reporting::diagnostic::{Diagnostic, Label};

use crate::layout::MAX_SIZE;
use crate::source::{ByteRange, FileId, SourceMap};

/// Global diagnostic messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Lexer(LexerMessage),
    Parse(ParseMessage),
    Layout(LayoutMessage),
}

impl From<LexerMessage> for Message {
    fn from(message: LexerMessage) -> Self {
        Message::Lexer(message)
    }
}

impl From<ParseMessage> for Message {
    fn from(message: ParseMessage) -> Self {
        Message::Parse(message)
    }
}

impl From<LayoutMessage> for Message {
    fn from(message: LayoutMessage) -> Self {
        Message::Layout(message)
    }
}

impl Message {
    pub fn to_diagnostic(&self, source_map: &SourceMap) -> Diagnostic<FileId> {
        let labels = Labels { source_map };

        match self {
            Message::Lexer(message) => message.to_diagnostic(labels),
            Message::Parse(message) => message.to_diagnostic(labels),
            Message::Layout(message) => message.to_diagnostic(labels),
        }
    }
}

/// Converts ranges in the combined source buffer into labels on the file
/// that they came from.
#[derive(Copy, Clone)]
struct Labels<'a> {
    source_map: &'a SourceMap,
}

impl<'a> Labels<'a> {
    fn primary(self, range: ByteRange, message: impl Into<String>) -> Vec<Label<FileId>> {
        let label = self.source_map.locate(range);
        label
            .map(|(file_id, range)| Label::primary(file_id, range).with_message(message))
            .into_iter()
            .collect()
    }

    fn note(self, range: ByteRange, message: impl Into<String>) -> Vec<Label<FileId>> {
        let label = self.source_map.locate(range);
        label
            .map(|(file_id, range)| Label::secondary(file_id, range).with_message(message))
            .into_iter()
            .collect()
    }
}

/// Messages produced during lexing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LexerMessage {
    UnexpectedCharacter { range: ByteRange },
}

impl LexerMessage {
    fn to_diagnostic(&self, labels: Labels<'_>) -> Diagnostic<FileId> {
        match self {
            LexerMessage::UnexpectedCharacter { range } => Diagnostic::error()
                .with_message("expected token")
                .with_labels(labels.primary(*range, "unexpected character"))
                .with_notes(vec![
                    "the rest of this line was skipped".to_owned()
                ]),
        }
    }
}

/// Messages produced during parsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMessage {
    UnexpectedToken {
        range: ByteRange,
        found: &'static str,
        expected: &'static str,
    },
    ExpectedDefinition {
        range: ByteRange,
        found: &'static str,
    },
    UndefinedName {
        range: ByteRange,
        name: String,
        suggestion: Option<String>,
    },
    DuplicateDefinition {
        range: ByteRange,
        name: String,
        previous: ByteRange,
    },
    DuplicateField {
        range: ByteRange,
        name: String,
        previous: ByteRange,
    },
    ReservedField {
        range: ByteRange,
        name: String,
    },
    FieldNameCollision {
        range: ByteRange,
        name: String,
        host_name: String,
        previous: ByteRange,
    },
    ReservedMember {
        range: ByteRange,
        name: String,
    },
    ReservedDefinition {
        range: ByteRange,
        name: String,
    },
    AliasCollision {
        range: ByteRange,
        alias: String,
        owner: String,
        previous: ByteRange,
    },
    StringField {
        range: ByteRange,
    },
    StringExtension {
        range: ByteRange,
    },
    NestedOptional {
        range: ByteRange,
    },
    MixedUnion {
        range: ByteRange,
    },
    RedundantMember {
        range: ByteRange,
        kind: String,
        previous: ByteRange,
    },
}

impl ParseMessage {
    fn to_diagnostic(&self, labels: Labels<'_>) -> Diagnostic<FileId> {
        match self {
            ParseMessage::UnexpectedToken {
                range,
                found,
                expected,
            } => Diagnostic::error()
                .with_message(format!("expected {expected}, got {found}"))
                .with_labels(labels.primary(*range, format!("unexpected {found}"))),
            ParseMessage::ExpectedDefinition { range, found } => Diagnostic::error()
                .with_message(format!("expected a definition, got {found}"))
                .with_labels(labels.primary(*range, "expected a definition"))
                .with_notes(vec![
                    "definitions are strings, base types, or names of earlier types".to_owned(),
                ]),
            ParseMessage::UndefinedName {
                range,
                name,
                suggestion,
            } => Diagnostic::error()
                .with_message(format!("`{name}` has not been defined"))
                .with_labels(labels.primary(*range, "undefined name"))
                .with_notes(match suggestion {
                    Some(suggestion) => vec![format!("help: did you mean `{suggestion}`?")],
                    None => Vec::new(),
                }),
            ParseMessage::DuplicateDefinition {
                range,
                name,
                previous,
            } => Diagnostic::error()
                .with_message(format!("`{name}` can only be defined once"))
                .with_labels(
                    [
                        labels.primary(*range, "redefined here"),
                        labels.note(*previous, "previously defined here"),
                    ]
                    .concat(),
                )
                .with_notes(vec![format!(
                    "neither definition of `{name}` will be emitted"
                )]),
            ParseMessage::DuplicateField {
                range,
                name,
                previous,
            } => Diagnostic::error()
                .with_message("duplicate field names")
                .with_labels(
                    [
                        labels.primary(*range, format!("`{name}` is already a field")),
                        labels.note(*previous, "other field here"),
                    ]
                    .concat(),
                ),
            ParseMessage::ReservedField { range, name } => Diagnostic::error()
                .with_message(format!("cannot have field named `{name}`"))
                .with_labels(labels.primary(*range, "reserved name"))
                .with_notes(vec![
                    "names starting with `_` are reserved, as are keywords and the names of generated members"
                        .to_owned(),
                ]),
            ParseMessage::FieldNameCollision {
                range,
                name,
                host_name,
                previous,
            } => Diagnostic::error()
                .with_message(format!(
                    "field `{name}` collides with another field named `{host_name}` on the host side"
                ))
                .with_labels(
                    [
                        labels.primary(*range, format!("spelled `{host_name}` on the host side")),
                        labels.note(*previous, "other field here"),
                    ]
                    .concat(),
                ),
            ParseMessage::ReservedMember { range, name } => Diagnostic::error()
                .with_message(format!("cannot have enum member named `{name}`"))
                .with_labels(labels.primary(*range, "reserved name"))
                .with_notes(vec![
                    "members must be identifiers that are not keywords or generated members"
                        .to_owned(),
                ]),
            ParseMessage::ReservedDefinition { range, name } => Diagnostic::error()
                .with_message(format!("cannot define a type named `{name}`"))
                .with_labels(labels.primary(*range, "reserved name"))
                .with_notes(vec![
                    "keywords and names used by the generated runtime are reserved".to_owned(),
                ]),
            ParseMessage::AliasCollision {
                range,
                alias,
                owner,
                previous,
            } => Diagnostic::error()
                .with_message(format!(
                    "`{alias}` is already declared as the alias of `{owner}`"
                ))
                .with_labels(
                    [
                        labels.primary(*range, "defined here"),
                        labels.note(*previous, "other definition here"),
                    ]
                    .concat(),
                )
                .with_notes(vec![format!(
                    "the members of enum or union `{owner}` are declared as `{owner}Union`"
                )]),
            ParseMessage::StringField { range } => Diagnostic::error()
                .with_message("string not allowed as field value")
                .with_labels(labels.primary(*range, "field defined here")),
            ParseMessage::StringExtension { range } => Diagnostic::error()
                .with_message("string not allowed here")
                .with_labels(labels.primary(*range, "cannot be applied to a string")),
            ParseMessage::NestedOptional { range } => Diagnostic::error()
                .with_message("optionals cannot be nested")
                .with_labels(labels.primary(*range, "already optional")),
            ParseMessage::MixedUnion { range } => Diagnostic::error()
                .with_message("enum/union cannot mix strings and definitions")
                .with_labels(labels.primary(*range, "mixed member")),
            ParseMessage::RedundantMember {
                range,
                kind,
                previous,
            } => Diagnostic::error()
                .with_message(format!("redundant enum or union members of kind {kind}"))
                .with_labels(
                    [
                        labels.primary(*range, "redundant member"),
                        labels.note(*previous, "other member here"),
                    ]
                    .concat(),
                ),
        }
    }
}

/// Messages produced while resolving layouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutMessage {
    AmbiguousDefinition {
        range: ByteRange,
        name: String,
        definition: ByteRange,
    },
    DefinitionTooLarge {
        range: ByteRange,
    },
}

impl LayoutMessage {
    fn to_diagnostic(&self, labels: Labels<'_>) -> Diagnostic<FileId> {
        match self {
            LayoutMessage::AmbiguousDefinition {
                range,
                name,
                definition,
            } => Diagnostic::error()
                .with_message(format!("`{name}` is undefined but used here"))
                .with_labels(
                    [
                        labels.primary(*range, "used here"),
                        labels.note(*definition, "defined more than once"),
                    ]
                    .concat(),
                ),
            LayoutMessage::DefinitionTooLarge { range } => Diagnostic::error()
                .with_message("definition is too large to encode")
                .with_labels(labels.primary(*range, "fixed size overflows here"))
                .with_notes(vec![format!(
                    "fixed sizes can be at most {MAX_SIZE} bytes"
                )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use codespan_reporting::diagnostic::{LabelStyle, Severity};

    use super::*;

    #[test]
    fn duplicate_definition_names_both_spans() {
        let mut source_map = SourceMap::new();
        let file_id = source_map
            .add("dup.spec".to_owned(), "type Dup = int\ntype Dup = int")
            .unwrap();

        let message = Message::from(ParseMessage::DuplicateDefinition {
            range: ByteRange::new(20, 23),
            name: "Dup".to_owned(),
            previous: ByteRange::new(5, 8),
        });
        let diagnostic = message.to_diagnostic(&source_map);

        assert_eq!(diagnostic.severity, Severity::Error);
        assert_eq!(diagnostic.message, "`Dup` can only be defined once");
        assert_eq!(diagnostic.labels.len(), 2);
        assert_eq!(diagnostic.labels[0].style, LabelStyle::Primary);
        assert_eq!(diagnostic.labels[0].file_id, file_id);
        assert_eq!(diagnostic.labels[0].range, 20..23);
        assert_eq!(diagnostic.labels[1].style, LabelStyle::Secondary);
        assert_eq!(diagnostic.labels[1].range, 5..8);
    }

    #[test]
    fn labels_are_relative_to_their_file() {
        let mut source_map = SourceMap::new();
        source_map.add("a.spec".to_owned(), "type A = int").unwrap();
        let b = source_map.add("b.spec".to_owned(), "$").unwrap();

        let message = Message::from(LexerMessage::UnexpectedCharacter {
            range: ByteRange::new(14, 15),
        });
        let diagnostic = message.to_diagnostic(&source_map);

        assert_eq!(diagnostic.labels[0].file_id, b);
        assert_eq!(diagnostic.labels[0].range, 0..1);
    }
}
