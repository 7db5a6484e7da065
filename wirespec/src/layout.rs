//! Wire layouts of schema definitions.
//!
//! Every definition is resolved to a [`Meta`]: the names of its type on both
//! targets, whether its encoded size is known ahead of time, and the shape
//! that the emitters and the reference codec dispatch on. Metas are computed
//! on demand and memoised by [`DefId`].
//!
//! All values are packed back to back in declaration order, little endian,
//! without padding.

use std::fmt;
use std::rc::Rc;

use fxhash::{FxHashMap, FxHashSet};

use crate::reporting::LayoutMessage;
use crate::source::ByteRange;
use crate::surface::{snake_to_camel, Arity, BaseType, DefId, Definition, Module};

/// Bytes taken by the element count of unbounded arrays and the byte length
/// of strings.
pub const COUNT_SIZE: u64 = 4;
/// Bytes taken by the presence flag of optionals.
pub const PRESENCE_SIZE: u64 = 1;
/// Bytes taken by a shared buffer: its address, length and count cell
/// address.
pub const BUFFER_SIZE: u64 = 24;
/// Largest fixed size of an encoded value, which must fit in 32-bit linear
/// memory.
pub const MAX_SIZE: u64 = u32::MAX as u64;

/// Longest fixed array declared as a tuple on the host side.
const MAX_TUPLE_ARITY: u32 = 16;
/// Longest element list of a tuple declaration, in bytes.
const MAX_TUPLE_WIDTH: usize = 256;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Size {
    Fixed(u64),
    Dynamic,
}

impl Size {
    pub fn fixed(self) -> Option<u64> {
        match self {
            Size::Fixed(size) => Some(size),
            Size::Dynamic => None,
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Fixed(size) => write!(f, "fixed({size})"),
            Size::Dynamic => write!(f, "dynamic"),
        }
    }
}

/// Width of the discriminant of enums and unions.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TagWidth {
    U8,
    U16,
    U32,
    U64,
}

impl TagWidth {
    pub fn bytes(self) -> u64 {
        match self {
            TagWidth::U8 => 1,
            TagWidth::U16 => 2,
            TagWidth::U32 => 4,
            TagWidth::U64 => 8,
        }
    }

    pub fn cpp_type(self) -> &'static str {
        match self {
            TagWidth::U8 => "uint8_t",
            TagWidth::U16 => "uint16_t",
            TagWidth::U32 => "uint32_t",
            TagWidth::U64 => "uint64_t",
        }
    }

    /// Suffix of the `wireIO` accessors for this width.
    pub fn js_accessor(self) -> &'static str {
        match self {
            TagWidth::U8 => "U8",
            TagWidth::U16 => "U16",
            TagWidth::U32 => "U32",
            TagWidth::U64 => "U64",
        }
    }
}

/// The narrowest tag able to distinguish `count` members.
pub fn bounded_int(count: u64) -> TagWidth {
    if count <= 1 << 8 {
        TagWidth::U8
    } else if count <= 1 << 16 {
        TagWidth::U16
    } else if count <= 1 << 32 {
        TagWidth::U32
    } else {
        TagWidth::U64
    }
}

#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub host_name: String,
    pub meta: Rc<Meta>,
}

#[derive(Debug)]
pub struct Variant {
    /// Structural key of the variant, which also names its marker on the host
    /// side.
    pub key: String,
    pub meta: Rc<Meta>,
}

#[derive(Debug)]
pub enum Shape {
    Primitive(BaseType),
    Optional(Rc<Meta>),
    Array(Rc<Meta>, Arity),
    Object(Vec<Field>),
    Enum(Vec<String>),
    Union(Vec<Variant>),
}

#[derive(Debug)]
pub struct Meta {
    /// Type name on the compiled target.
    pub cpp_name: String,
    /// Type name in the host declarations.
    pub host_name: String,
    pub size: Size,
    /// Whether host values hold shared buffers that must be released.
    pub release: bool,
    pub shape: Shape,
}

impl Meta {
    /// Object, enum and union definitions, which are emitted as types of their
    /// own and referred to by name.
    pub fn is_named(&self) -> bool {
        match self.shape {
            Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => true,
            Shape::Primitive(_) | Shape::Optional(_) | Shape::Array(_, _) => false,
        }
    }

    /// Whether host values are instances of a generated class.
    pub fn is_host_class(&self) -> bool {
        self.is_named() || matches!(self.shape, Shape::Primitive(BaseType::Buffer))
    }

    pub fn tag(&self) -> Option<TagWidth> {
        match &self.shape {
            Shape::Enum(members) => Some(bounded_int(members.len() as u64)),
            Shape::Union(variants) => Some(bounded_int(variants.len() as u64)),
            _ => None,
        }
    }
}

pub fn primitive_cpp_name(base_type: BaseType) -> &'static str {
    match base_type {
        BaseType::String => "std::string",
        BaseType::Double => "double",
        BaseType::Int => "int64_t",
        BaseType::Uint => "uint64_t",
        BaseType::Bool => "bool",
        BaseType::Ptr => "char*",
        BaseType::Buffer => "SharedBuffer",
    }
}

pub fn primitive_host_name(base_type: BaseType) -> &'static str {
    match base_type {
        BaseType::String => "string",
        BaseType::Double | BaseType::Int | BaseType::Uint | BaseType::Ptr => "number",
        BaseType::Bool => "boolean",
        BaseType::Buffer => "SharedBuffer",
    }
}

pub fn primitive_size(base_type: BaseType) -> Size {
    match base_type {
        BaseType::String => Size::Dynamic,
        BaseType::Bool => Size::Fixed(1),
        BaseType::Double | BaseType::Int | BaseType::Uint | BaseType::Ptr => Size::Fixed(8),
        BaseType::Buffer => Size::Fixed(BUFFER_SIZE),
    }
}

/// Resolves and memoises the layouts of the definitions in a module.
pub struct Context<'module> {
    module: &'module Module,
    metas: FxHashMap<DefId, Rc<Meta>>,
    in_progress: FxHashSet<DefId>,
}

impl<'module> Context<'module> {
    pub fn new(module: &'module Module) -> Context<'module> {
        Context {
            module,
            metas: FxHashMap::default(),
            in_progress: FxHashSet::default(),
        }
    }

    pub fn module(&self) -> &'module Module {
        self.module
    }

    /// Resolve a named definition of the module.
    pub fn resolve_definition(&mut self, def: DefId) -> Result<Rc<Meta>, LayoutMessage> {
        self.resolve(def, self.module.node(def).range)
    }

    /// Resolve the layout of a definition, used at `range`.
    pub fn resolve(&mut self, def: DefId, range: ByteRange) -> Result<Rc<Meta>, LayoutMessage> {
        if let Some(meta) = self.metas.get(&def) {
            return Ok(meta.clone());
        }

        let module = self.module;
        let node = module.node(def);
        if module.is_poisoned(def) {
            return Err(LayoutMessage::AmbiguousDefinition {
                range,
                name: node.definition.name().unwrap_or_default().to_owned(),
                definition: node.range,
            });
        }

        // Definitions only refer to definitions completed before them
        if !self.in_progress.insert(def) {
            panic!("definition {def:?} refers to itself");
        }
        let meta = self.compute(&node.definition, node.range);
        self.in_progress.remove(&def);

        let meta = Rc::new(meta?);
        self.metas.insert(def, meta.clone());
        Ok(meta)
    }

    fn compute(&mut self, definition: &Definition, range: ByteRange) -> Result<Meta, LayoutMessage> {
        match definition {
            Definition::Primitive(base_type) => Ok(Meta {
                cpp_name: primitive_cpp_name(*base_type).to_owned(),
                host_name: primitive_host_name(*base_type).to_owned(),
                size: primitive_size(*base_type),
                release: *base_type == BaseType::Buffer,
                shape: Shape::Primitive(*base_type),
            }),
            Definition::StringLiteral(value) => {
                unreachable!("string literal \"{value}\" outside of an enum")
            }
            Definition::Optional(inner) => {
                let inner = self.resolve(*inner, range)?;
                Ok(Meta {
                    cpp_name: format!("std::optional<{}>", inner.cpp_name),
                    host_name: format!("{} | null", inner.host_name),
                    size: match inner.size {
                        Size::Fixed(size) => fixed_size(range, size.checked_add(PRESENCE_SIZE))?,
                        Size::Dynamic => Size::Dynamic,
                    },
                    release: inner.release,
                    shape: Shape::Optional(inner),
                })
            }
            Definition::Array(inner, arity) => {
                let inner = self.resolve(*inner, range)?;
                let (cpp_name, host_name, size) = match (arity, inner.size) {
                    (Arity::Unbounded, _) => (
                        format!("std::vector<{}>", inner.cpp_name),
                        format!("readonly {}[]", parenthesize(&inner.host_name)),
                        Size::Dynamic,
                    ),
                    (Arity::Fixed(len), inner_size) => (
                        format!("std::array<{}, {len}>", inner.cpp_name),
                        fixed_array_host_name(&inner.host_name, *len),
                        match inner_size {
                            Size::Fixed(size) => {
                                fixed_size(range, size.checked_mul(u64::from(*len)))?
                            }
                            Size::Dynamic => Size::Dynamic,
                        },
                    ),
                };

                Ok(Meta {
                    cpp_name,
                    host_name,
                    size,
                    release: inner.release,
                    shape: Shape::Array(inner, *arity),
                })
            }
            Definition::Object { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|field| {
                        Ok(Field {
                            name: field.name.clone(),
                            host_name: snake_to_camel(&field.name),
                            meta: self.resolve(field.def, field.range)?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                let sizes = fields
                    .iter()
                    .map(|field| field.meta.size.fixed())
                    .collect::<Option<Vec<_>>>();
                let size = match sizes {
                    Some(sizes) => {
                        fixed_size(range, sizes.into_iter().try_fold(0, u64::checked_add))?
                    }
                    None => Size::Dynamic,
                };

                Ok(Meta {
                    cpp_name: name.clone(),
                    host_name: name.clone(),
                    size,
                    release: fields.iter().any(|field| field.meta.release),
                    shape: Shape::Object(fields),
                })
            }
            Definition::Enum { name, members } => Ok(Meta {
                cpp_name: name.clone(),
                host_name: name.clone(),
                size: Size::Fixed(bounded_int(members.len() as u64).bytes()),
                release: false,
                shape: Shape::Enum(members.clone()),
            }),
            Definition::Union { name, variants } => {
                let variants = variants
                    .iter()
                    .map(|variant| {
                        let range = self.module.node(*variant).range;
                        Ok(Variant {
                            key: self.module.structural_key(*variant),
                            meta: self.resolve(*variant, range)?,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                // Fixed only when every variant has the same fixed size
                let tag = bounded_int(variants.len() as u64);
                let payload = variants
                    .iter()
                    .map(|variant| variant.meta.size.fixed())
                    .reduce(|first, next| match (first, next) {
                        (Some(first), Some(next)) if first == next => Some(first),
                        _ => None,
                    })
                    .flatten();

                Ok(Meta {
                    cpp_name: name.clone(),
                    host_name: name.clone(),
                    size: match payload {
                        Some(size) => fixed_size(range, size.checked_add(tag.bytes()))?,
                        None => Size::Dynamic,
                    },
                    release: variants.iter().any(|variant| variant.meta.release),
                    shape: Shape::Union(variants),
                })
            }
        }
    }
}

/// A fixed size, or an error if it overflowed or does not fit in memory.
fn fixed_size(range: ByteRange, size: Option<u64>) -> Result<Size, LayoutMessage> {
    match size {
        Some(size) if size <= MAX_SIZE => Ok(Size::Fixed(size)),
        _ => Err(LayoutMessage::DefinitionTooLarge { range }),
    }
}

/// Short fixed arrays are tuples on the host side, and longer ones plain
/// arrays.
fn fixed_array_host_name(inner: &str, len: u32) -> String {
    let width = inner.len().saturating_mul(len as usize);
    match len <= MAX_TUPLE_ARITY && width <= MAX_TUPLE_WIDTH {
        true => format!("readonly [{}]", vec![inner; len as usize].join(", ")),
        false => format!("readonly {}[]", parenthesize(inner)),
    }
}

/// Wrap a host type in parentheses if it would not bind as an array element.
fn parenthesize(host_name: &str) -> String {
    match host_name.contains(' ') {
        true => format!("({host_name})"),
        false => host_name.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(source: &str, name: &str) -> Rc<Meta> {
        let (module, messages) = Module::parse(source);
        assert!(messages.is_empty(), "{messages:?}");

        let mut context = Context::new(&module);
        let def = module.lookup(name).unwrap();
        context.resolve_definition(def).unwrap()
    }

    #[test]
    fn bounded_int_widths() {
        assert_eq!(bounded_int(1), TagWidth::U8);
        assert_eq!(bounded_int(3), TagWidth::U8);
        assert_eq!(bounded_int(256), TagWidth::U8);
        assert_eq!(bounded_int(257), TagWidth::U16);
        assert_eq!(bounded_int(65536), TagWidth::U16);
        assert_eq!(bounded_int(65537), TagWidth::U32);
        assert_eq!(bounded_int(1 << 32), TagWidth::U32);
        assert_eq!(bounded_int((1 << 32) + 1), TagWidth::U64);
    }

    #[test]
    fn point_is_fixed() {
        let meta = resolve("type Point = { x: double, y: double }", "Point");
        assert_eq!(meta.size, Size::Fixed(16));
        assert!(!meta.release);
    }

    #[test]
    fn color_is_an_enum_with_a_byte_tag() {
        let meta = resolve(r#"type Color = "red" | "green" | "blue""#, "Color");
        assert!(matches!(&meta.shape, Shape::Enum(members) if members.len() == 3));
        assert_eq!(meta.tag(), Some(TagWidth::U8));
        assert_eq!(meta.size, Size::Fixed(1));
    }

    #[test]
    fn list_is_dynamic() {
        let meta = resolve("type List = int[]", "List");
        assert_eq!(meta.size, Size::Dynamic);

        match &meta.shape {
            Shape::Union(variants) => {
                assert_eq!(variants[0].meta.cpp_name, "std::vector<int64_t>");
                assert_eq!(variants[0].meta.host_name, "readonly number[]");
            }
            shape => panic!("expected a union, found {shape:?}"),
        }
    }

    #[test]
    fn primitive_sizes() {
        let meta = resolve(
            "type All = { a: bool, b: double, c: int, d: uint, e: ptr, f: buffer }",
            "All",
        );
        assert_eq!(meta.size, Size::Fixed(1 + 8 + 8 + 8 + 8 + 24));
        assert!(meta.release);

        let meta = resolve("type Text = { a: string }", "Text");
        assert_eq!(meta.size, Size::Dynamic);
    }

    #[test]
    fn optionals_are_fixed_when_their_payload_is() {
        let meta = resolve("type A = { a: double?, b: bool? }", "A");
        assert_eq!(meta.size, Size::Fixed(9 + 2));

        let meta = resolve("type B = { a: string? }", "B");
        assert_eq!(meta.size, Size::Dynamic);
    }

    #[test]
    fn fixed_arrays() {
        let meta = resolve("type A = { a: int[4], b: bool[0] }", "A");
        assert_eq!(meta.size, Size::Fixed(32));

        let meta = resolve("type B = { a: string[2] }", "B");
        assert_eq!(meta.size, Size::Dynamic);

        match &meta.shape {
            Shape::Object(fields) => {
                assert_eq!(fields[0].meta.cpp_name, "std::array<std::string, 2>");
                assert_eq!(fields[0].meta.host_name, "readonly [string, string]");
            }
            shape => panic!("expected an object, found {shape:?}"),
        }
    }

    #[test]
    fn long_fixed_arrays_are_plain_arrays_on_the_host() {
        let meta = resolve("type A = { a: int[17], b: bool[16], c: int?[3][2] }", "A");

        match &meta.shape {
            Shape::Object(fields) => {
                assert_eq!(fields[0].meta.host_name, "readonly number[]");
                assert_eq!(fields[0].meta.cpp_name, "std::array<int64_t, 17>");
                assert_eq!(fields[1].meta.host_name.matches("boolean").count(), 16);
                assert_eq!(
                    fields[2].meta.host_name,
                    "readonly [readonly [number | null, number | null, number | null], \
                     readonly [number | null, number | null, number | null]]",
                );
            }
            shape => panic!("expected an object, found {shape:?}"),
        }
        assert_eq!(meta.size, Size::Fixed(17 * 8 + 16 + 6 * 9));

        let meta = resolve("type B = { a: int[100000000] }", "B");
        assert_eq!(meta.size, Size::Fixed(800_000_000));
        match &meta.shape {
            Shape::Object(fields) => assert_eq!(fields[0].meta.host_name, "readonly number[]"),
            shape => panic!("expected an object, found {shape:?}"),
        }

        let meta = resolve("type C = { a: int[16][16][16][16][16][16][16] }", "C");
        assert_eq!(meta.size, Size::Fixed(8 << 28));
        match &meta.shape {
            Shape::Object(fields) => assert!(fields[0].meta.host_name.len() < 1024),
            shape => panic!("expected an object, found {shape:?}"),
        }
    }

    #[test]
    fn oversized_definitions_fail() {
        let cases = [
            ("type A = { a: int[4000000000] }", ByteRange::new(17, 29)),
            ("type A = { a: int[536870912] }", ByteRange::new(17, 28)),
            ("type A = { a: bool[4294967295]? }", ByteRange::new(30, 31)),
            ("type A = { a: int[300000000], b: int[300000000] }", ByteRange::new(5, 6)),
            (
                "type B = { a: bool[4294967295] } type A = bool[4294967295] | B",
                ByteRange::new(38, 39),
            ),
            ("type A = { a: int[65536][65536][65536] }", ByteRange::new(24, 31)),
        ];

        for (source, range) in cases {
            let (module, messages) = Module::parse(source);
            assert!(messages.is_empty(), "{source}: {messages:?}");

            let mut context = Context::new(&module);
            let a = module.lookup("A").unwrap();
            assert_eq!(
                context.resolve_definition(a).unwrap_err(),
                LayoutMessage::DefinitionTooLarge { range },
                "{source}",
            );
        }
    }

    #[test]
    fn largest_fixed_size() {
        let meta = resolve("type A = { a: bool[4294967295] }", "A");
        assert_eq!(meta.size, Size::Fixed(MAX_SIZE));
    }

    #[test]
    fn union_sizes() {
        let meta = resolve("type Same = int | double | uint", "Same");
        assert_eq!(meta.size, Size::Fixed(9));

        let meta = resolve("type Mixed = int | bool", "Mixed");
        assert_eq!(meta.size, Size::Dynamic);

        let meta = resolve("type Text = int | string", "Text");
        assert_eq!(meta.size, Size::Dynamic);
    }

    #[test]
    fn nested_host_names() {
        let meta = resolve("type A = { a: int?[], b: string[][] }", "A");

        match &meta.shape {
            Shape::Object(fields) => {
                assert_eq!(fields[0].meta.host_name, "readonly (number | null)[]");
                assert_eq!(fields[0].meta.cpp_name, "std::vector<std::optional<int64_t>>");
                assert_eq!(fields[1].meta.host_name, "readonly (readonly string[])[]");
            }
            shape => panic!("expected an object, found {shape:?}"),
        }
    }

    #[test]
    fn field_host_names() {
        let meta = resolve("type A = { first_name: string }", "A");

        match &meta.shape {
            Shape::Object(fields) => {
                assert_eq!(fields[0].name, "first_name");
                assert_eq!(fields[0].host_name, "firstName");
            }
            shape => panic!("expected an object, found {shape:?}"),
        }
    }

    #[test]
    fn metas_are_shared() {
        let (module, _) = Module::parse(
            "type Point = { x: double }
             type Line = { start: Point, end: Point }",
        );
        let mut context = Context::new(&module);

        let point = context.resolve_definition(module.lookup("Point").unwrap()).unwrap();
        let line = context.resolve_definition(module.lookup("Line").unwrap()).unwrap();

        match &line.shape {
            Shape::Object(fields) => {
                assert!(Rc::ptr_eq(&fields[0].meta, &point));
                assert!(Rc::ptr_eq(&fields[1].meta, &point));
            }
            shape => panic!("expected an object, found {shape:?}"),
        }
    }

    #[test]
    fn uses_of_poisoned_definitions_fail() {
        let (module, messages) = Module::parse(
            "type Dup = { a: int }
             type Dup = { b: int }
             type User = { dup: Dup }",
        );
        assert_eq!(messages.len(), 1);

        let mut context = Context::new(&module);
        let user = module.lookup("User").unwrap();
        let message = context.resolve_definition(user).unwrap_err();

        assert!(matches!(
            message,
            LayoutMessage::AmbiguousDefinition { name, definition, .. }
                if name == "Dup" && definition == ByteRange::new(5, 8),
        ));
    }
}
