//! Emission of host declarations for the generated classes.

use std::rc::Rc;

use itertools::Itertools;

use crate::emit::{static_access, static_key};
use crate::layout::{Field, Meta, Shape, Variant};

const PRELUDE: &str = "
type Cursor = { offset: number };
";

const SHARED_BUFFER: &str = "
declare class SharedBuffer {
    readonly address: number;
    readonly size: number;
    readonly count: number;
    readonly buf: Uint8Array;
    constructor(source: ArrayBuffer | ArrayBufferView | { address: number, size: number, count: number });
    static deserialize(source: Cursor): SharedBuffer;
    serializationSize(): number;
    serialize(target: Cursor): void;
    release(): void;
}
";

pub fn module(uses_buffer: bool, metas: &[Rc<Meta>]) -> String {
    let mut output = String::from(PRELUDE);
    if uses_buffer {
        output.push_str(SHARED_BUFFER);
    }

    for meta in metas {
        output.push_str(&definition(meta));
    }

    let classes = uses_buffer
        .then_some("SharedBuffer")
        .into_iter()
        .chain(metas.iter().map(|meta| meta.host_name.as_str()))
        .collect::<Vec<_>>();

    let mut exports = vec!["Cursor".to_owned()];
    for class in &classes {
        exports.push((*class).to_owned());
    }
    for meta in metas {
        if let Shape::Enum(_) | Shape::Union(_) = meta.shape {
            exports.push(union_alias(meta));
        }
    }

    let members = uses_buffer
        .then(|| "SharedBuffer: typeof SharedBuffer;".to_owned())
        .into_iter()
        .chain(metas.iter().map(|meta| module_member(meta)))
        .join("\n");

    output.push_str(&format!(
        "
        export type {{ {} }};
        interface WasmModule {{
            {members}
        }}
        export {{}};
        ",
        exports.join(", "),
    ));

    output
}

fn union_alias(meta: &Meta) -> String {
    format!("{}Union", meta.host_name)
}

/// The type of constructed and deserialized instances. Union instances are
/// narrowed by their `type`.
fn instance_type(meta: &Meta) -> String {
    match meta.shape {
        Shape::Union(_) => format!("{} & {}", meta.host_name, union_alias(meta)),
        _ => meta.host_name.clone(),
    }
}

fn module_member(meta: &Meta) -> String {
    let class = &meta.host_name;
    match &meta.shape {
        Shape::Union(variants) => format!(
            "{class}: {{ new(arg: {}): {} }} & typeof {class};",
            union_constructor_arg(meta, variants),
            instance_type(meta),
        ),
        _ => format!("{class}: typeof {class};"),
    }
}

fn union_constructor_arg(meta: &Meta, variants: &[Variant]) -> String {
    let class_types = variants
        .iter()
        .filter(|variant| variant.meta.is_host_class())
        .map(|variant| variant.meta.host_name.as_str());
    std::iter::once(format!("Readonly<{}>", union_alias(meta)))
        .chain(class_types.map(str::to_owned))
        .join(" | ")
}

fn definition(meta: &Meta) -> String {
    let class = &meta.host_name;
    let (alias, members) = match &meta.shape {
        Shape::Object(fields) => (String::new(), object_members(fields)),
        Shape::Enum(members) => enum_members(meta, members),
        Shape::Union(variants) => union_members(meta, variants),
        Shape::Primitive(_) | Shape::Optional(_) | Shape::Array(_, _) => {
            unreachable!("anonymous definition `{class}`")
        }
    };
    let release = match meta.release {
        true => "release(): void;",
        false => "",
    };
    let instance = instance_type(meta);

    format!(
        "
        {alias}
        declare class {class} {{
            {members}
            static deserialize(source: Cursor): {instance};
            serializationSize(): number;
            serialize(target: Cursor): void;
            {release}
        }}
        ",
    )
}

fn object_members(fields: &[Field]) -> String {
    let properties = fields
        .iter()
        .map(|field| format!("readonly {}: {};", field.host_name, field.meta.host_name))
        .join("\n");
    let params = fields
        .iter()
        .map(|field| format!("{}: {}", field.host_name, field.meta.host_name))
        .join(", ");

    format!("{properties}\nconstructor({params});")
}

fn marker_declarations<'a>(keys: impl Iterator<Item = &'a str>) -> String {
    keys.map(|key| format!("static readonly {}: unique symbol;", static_key(key)))
        .join("\n")
}

fn enum_members(meta: &Meta, members: &[String]) -> (String, String) {
    let class = &meta.host_name;
    let union = union_alias(meta);
    let symbols = members
        .iter()
        .map(|member| format!("typeof {}", static_access(class, member)))
        .join(" | ");

    let alias = format!("type {union} = {symbols};");
    let members = format!(
        "
        {}
        static readonly symbolToIndex: ReadonlyMap<{union}, number>;
        static readonly symbolFromIndex: readonly {union}[];
        readonly value: {union};
        constructor(value: {union});
        ",
        marker_declarations(members.iter().map(String::as_str)),
    );

    (alias, members)
}

fn union_members(meta: &Meta, variants: &[Variant]) -> (String, String) {
    let class = &meta.host_name;
    let union = union_alias(meta);
    let cases = variants
        .iter()
        .map(|variant| {
            format!(
                "{{ type: typeof {}, value: {} }}",
                static_access(class, &variant.key),
                variant.meta.host_name,
            )
        })
        .join(" | ");

    let class_types_member = match variants.iter().any(|variant| variant.meta.is_host_class()) {
        true => format!("static readonly classTypes: ReadonlyMap<Function, {union}[\"type\"]>;"),
        false => String::new(),
    };
    let arg = union_constructor_arg(meta, variants);

    let alias = format!("type {union} = {cases};");
    let members = format!(
        "
        {}
        static readonly symbolToIndex: ReadonlyMap<{union}[\"type\"], number>;
        static readonly symbolFromIndex: readonly {union}[\"type\"][];
        {class_types_member}
        readonly type: {union}[\"type\"];
        readonly value: {union}[\"value\"];
        constructor(arg: {arg});
        ",
        marker_declarations(variants.iter().map(|variant| variant.key.as_str())),
    );

    (alias, members)
}

#[cfg(test)]
mod tests {
    use crate::emit::{emit, Output};
    use crate::surface::Module;

    fn compile(source: &str) -> Output {
        let (module, messages) = Module::parse(source);
        assert!(messages.is_empty(), "{messages:?}");
        let (output, messages) = emit(&module);
        assert!(messages.is_empty(), "{messages:?}");
        output
    }

    #[test]
    fn object_declarations() {
        let output = compile("type Person = { first_name: string, age: int?, tags: string[] }");

        assert!(output.dts.starts_with("type Cursor = { offset: number };\n"));
        assert!(output.dts.contains(
            "declare class Person {\n\
             \treadonly firstName: string;\n\
             \treadonly age: number | null;\n\
             \treadonly tags: readonly string[];\n\
             \tconstructor(firstName: string, age: number | null, tags: readonly string[]);\n\
             \tstatic deserialize(source: Cursor): Person;\n\
             \tserializationSize(): number;\n\
             \tserialize(target: Cursor): void;\n\
             }\n",
        ));
    }

    #[test]
    fn epilogue() {
        let output = compile(
            r#"type Color = "red" | "green"
               type Blob = { data: buffer, color: Color }"#,
        );

        assert!(output.dts.ends_with(
            "export type { Cursor, SharedBuffer, Color, Blob, ColorUnion };\n\
             interface WasmModule {\n\
             \tSharedBuffer: typeof SharedBuffer;\n\
             \tColor: typeof Color;\n\
             \tBlob: typeof Blob;\n\
             }\n\
             export {};\n",
        ));
        assert!(output.dts.contains("\trelease(): void;\n}\n"));
    }

    #[test]
    fn enum_declarations() {
        let output = compile(r#"type Color = "red" | "green""#);

        assert!(output.dts.contains("type ColorUnion = typeof Color.red | typeof Color.green;\n"));
        assert!(output.dts.contains("\tstatic readonly red: unique symbol;\n"));
        assert!(output.dts.contains("\treadonly value: ColorUnion;\n\tconstructor(value: ColorUnion);\n"));
    }

    #[test]
    fn union_declarations() {
        let output = compile("type Shape = Circle { radius: double } | int[3]");

        assert!(output.dts.contains(
            "type ShapeUnion = { type: typeof Shape.Circle, value: Circle } | \
             { type: typeof Shape[\"int[3]\"], value: readonly [number, number, number] };\n",
        ));
        assert!(output.dts.contains("\tstatic readonly [\"int[3]\"]: unique symbol;\n"));
        assert!(output.dts.contains("\tconstructor(arg: Readonly<ShapeUnion> | Circle);\n"));
        assert!(output.dts.contains("\tstatic deserialize(source: Cursor): Shape & ShapeUnion;\n"));
        assert!(output.dts.contains("\tstatic deserialize(source: Cursor): Circle;\n"));
        assert!(output.dts.contains(
            "\tShape: { new(arg: Readonly<ShapeUnion> | Circle): Shape & ShapeUnion } & typeof Shape;\n",
        ));
        assert!(output.dts.contains("\tCircle: typeof Circle;\n"));
    }

    #[test]
    fn unions_without_classes_link_type_and_value() {
        let output = compile("type Value = int | string");

        assert!(output.dts.contains(
            "type ValueUnion = { type: typeof Value.int, value: number } | \
             { type: typeof Value.string, value: string };\n",
        ));
        assert!(output.dts.contains("\tstatic deserialize(source: Cursor): Value & ValueUnion;\n"));
        assert!(output.dts.contains(
            "\tValue: { new(arg: Readonly<ValueUnion>): Value & ValueUnion } & typeof Value;\n",
        ));
    }
}
