//! Emission of the compiled target, the host target and host declarations.
//!
//! Definitions are emitted in the order they were completed, so a generated
//! type only ever refers to types emitted before it. A definition whose
//! layout fails to resolve is skipped, and emission continues with the next.

use std::rc::Rc;

use crate::layout::{self, Meta};
use crate::reporting::Message;
use crate::surface::{BaseType, Module};

mod cpp;
mod dts;
mod js;

/// The three generated artifacts of a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Output {
    /// Compiled target source, written to `generated.hpp`.
    pub cpp: String,
    /// Host runtime source, written to `post.js`.
    pub js: String,
    /// Host declarations, written to `post.d.ts`.
    pub dts: String,
}

impl Output {
    pub const CPP_FILE: &'static str = "generated.hpp";
    pub const JS_FILE: &'static str = "post.js";
    pub const DTS_FILE: &'static str = "post.d.ts";
}

/// Name of the cursor argument of generated serialization methods.
const BUF: &str = "_buf";

pub fn emit(module: &Module) -> (Output, Vec<Message>) {
    let mut context = layout::Context::new(module);
    let mut messages = Vec::new();
    let mut emitted = Vec::<Rc<Meta>>::new();

    for def in module.definitions() {
        if module.is_poisoned(def) {
            continue;
        }

        match context.resolve_definition(def) {
            Ok(meta) => emitted.push(meta),
            Err(message) => {
                // Uses of the same ambiguous name are reported once
                let message = Message::from(message);
                if !messages.contains(&message) {
                    messages.push(message);
                }
            }
        }
    }

    let uses_buffer = module.uses(BaseType::Buffer);
    let output = Output {
        cpp: reindent(&cpp::module(uses_buffer, &emitted)),
        js: reindent(&js::module(uses_buffer, &emitted)),
        dts: reindent(&dts::module(uses_buffer, &emitted)),
    };

    (output, messages)
}

/// Indent C-style source text by bracket depth, one tab per level.
///
/// Lines are trimmed and blank lines dropped. A line is dedented if it closes
/// a bracket it did not open, and the lines after it are indented if it opens
/// a bracket it does not close.
pub fn reindent(text: &str) -> String {
    let mut output = String::with_capacity(text.len());
    let mut level = 0_usize;

    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let (opens, closes) = unbalanced_brackets(line);
        if closes {
            level = level.saturating_sub(1);
        }

        output.extend(std::iter::repeat('\t').take(level));
        output.push_str(line);
        output.push('\n');

        if opens {
            level += 1;
        }
    }

    output
}

/// Whether a line leaves a bracket open, and whether it closes one that was
/// opened on an earlier line.
fn unbalanced_brackets(line: &str) -> (bool, bool) {
    let mut opens = false;
    let mut closes = false;

    for (open, close) in [('{', '}'), ('(', ')'), ('[', ']')] {
        let mut depth = 0_i32;
        for c in line.chars() {
            if c == open {
                depth += 1;
            } else if c == close {
                depth -= 1;
            }
            closes |= depth < 0;
        }

        let mut depth = 0_i32;
        for c in line.chars().rev() {
            if c == open {
                depth -= 1;
            } else if c == close {
                depth += 1;
            }
            opens |= depth < 0;
        }
    }

    (opens, closes)
}

/// A valid JavaScript identifier, usable after `.` in property accesses.
fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Property access of a static member on the host side.
fn static_access(class: &str, member: &str) -> String {
    match is_identifier(member) {
        true => format!("{class}.{member}"),
        false => format!("{class}[\"{member}\"]"),
    }
}

/// Property key of a static member declaration on the host side.
fn static_key(member: &str) -> String {
    match is_identifier(member) {
        true => member.to_owned(),
        false => format!("[\"{member}\"]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(source: &str) -> (Output, Vec<Message>) {
        let (module, mut messages) = Module::parse(source);
        let (output, emit_messages) = emit(&module);
        messages.extend(emit_messages);
        (output, messages)
    }

    #[test]
    fn reindent_nested_blocks() {
        let text = "
            struct A {
                    void f() {
              if (x) {
                    y();
            } else {
            z(
            1,
            2);
            }
            }
            };
        ";

        assert_eq!(
            reindent(text),
            "struct A {\n\
             \tvoid f() {\n\
             \t\tif (x) {\n\
             \t\t\ty();\n\
             \t\t} else {\n\
             \t\t\tz(\n\
             \t\t\t\t1,\n\
             \t\t\t\t2);\n\
             \t\t}\n\
             \t}\n\
             };\n",
        );
    }

    #[test]
    fn reindent_drops_blank_lines() {
        assert_eq!(reindent("\n  a;\n\n\n  b;\n"), "a;\nb;\n");
    }

    #[test]
    fn reindent_balanced_lines() {
        assert_eq!(
            reindent("{\nstatic [\"int[]\"] = Symbol(\"int[]\");\nif (x) { y(); }\n}"),
            "{\n\tstatic [\"int[]\"] = Symbol(\"int[]\");\n\tif (x) { y(); }\n}\n",
        );
    }

    #[test]
    fn static_members() {
        assert_eq!(static_access("Color", "red"), "Color.red");
        assert_eq!(static_access("Shape", "int[]"), "Shape[\"int[]\"]");
        assert_eq!(static_access("Shape", "Point?"), "Shape[\"Point?\"]");
        assert_eq!(static_key("red"), "red");
        assert_eq!(static_key("Point?"), "[\"Point?\"]");
    }

    #[test]
    fn skips_broken_definitions() {
        let (output, messages) = compile(
            "type Bad = \"x\" | int
             type Good = { value: int }",
        );

        assert_eq!(messages.len(), 1);
        assert!(!output.cpp.contains("struct Bad"));
        assert!(!output.js.contains("class Bad"));
        assert!(output.cpp.contains("struct Good {"));
        assert!(output.js.contains("class Good {"));
        assert!(output.dts.contains("declare class Good {"));
    }

    #[test]
    fn neither_duplicate_is_emitted() {
        let (output, messages) = compile(
            "type Dup = { a: int }
             type Dup = { b: int }",
        );

        assert_eq!(messages.len(), 1);
        assert!(!output.cpp.contains("struct Dup"));
        assert!(!output.js.contains("Dup"));
        assert!(!output.dts.contains("Dup"));
    }

    #[test]
    fn ambiguous_uses_are_reported_once() {
        let (output, messages) = compile(
            "type Dup = { a: int }
             type Dup = { b: int }
             type User = { dup: Dup }
             type Users = User[]",
        );

        // The redefinition, then one failed use
        assert_eq!(messages.len(), 2);
        assert!(!output.cpp.contains("struct User"));
    }

    #[test]
    fn definitions_are_emitted_in_order() {
        let (output, messages) = compile(
            "type Shape = Circle { radius: double } | Square { side: double }",
        );
        assert!(messages.is_empty());

        let circle = output.cpp.find("struct Circle {").unwrap();
        let square = output.cpp.find("struct Square {").unwrap();
        let shape = output.cpp.find("struct Shape {").unwrap();
        assert!(circle < square && square < shape);
    }

    #[test]
    fn outputs_are_indented_with_tabs() {
        let (output, _) = compile("type Point = { x: double, y: double }");

        assert!(output.cpp.contains("struct Point {\n\tdouble x;\n\tdouble y;\n"));
        assert!(output.js.contains("class Point {\n\tconstructor(_x, _y) {\n\t\tthis.x = _x;\n"));
    }
}
