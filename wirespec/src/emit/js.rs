//! Emission of the host runtime: one class per definition, reading and
//! writing linear memory through the `wireIO` helpers over a `{ offset }`
//! cursor.

use std::rc::Rc;

use itertools::Itertools;

use crate::emit::{static_access, static_key, BUF};
use crate::layout::{Field, Meta, Shape, Size, Variant, COUNT_SIZE, PRESENCE_SIZE};
use crate::surface::{Arity, BaseType};

const PRELUDE: &str = r#"
const wireIO = {
    buffer: null,
    view: null,
    bytes: null,
    refresh() {
        if (this.buffer !== wasmMemory.buffer) {
            this.buffer = wasmMemory.buffer;
            this.view = new DataView(this.buffer);
            this.bytes = new Uint8Array(this.buffer);
        }
    },
    toSafeNumber(value) {
        if (value > BigInt(Number.MAX_SAFE_INTEGER) || value < BigInt(Number.MIN_SAFE_INTEGER)) {
            throw new RangeError("integer out of safe range: " + value);
        }
        return Number(value);
    },
    advance(cursor, size) {
        this.refresh();
        const offset = cursor.offset;
        cursor.offset += size;
        return offset;
    },
    getU8(cursor) {
        const offset = this.advance(cursor, 1);
        return this.view.getUint8(offset);
    },
    setU8(cursor, value) {
        const offset = this.advance(cursor, 1);
        this.view.setUint8(offset, value);
    },
    getU16(cursor) {
        const offset = this.advance(cursor, 2);
        return this.view.getUint16(offset, true);
    },
    setU16(cursor, value) {
        const offset = this.advance(cursor, 2);
        this.view.setUint16(offset, value, true);
    },
    getU32(cursor) {
        const offset = this.advance(cursor, 4);
        return this.view.getUint32(offset, true);
    },
    setU32(cursor, value) {
        const offset = this.advance(cursor, 4);
        this.view.setUint32(offset, value, true);
    },
    getU64(cursor) {
        const offset = this.advance(cursor, 8);
        return this.toSafeNumber(this.view.getBigUint64(offset, true));
    },
    setU64(cursor, value) {
        const offset = this.advance(cursor, 8);
        this.view.setBigUint64(offset, BigInt(value), true);
    },
    getI64(cursor) {
        const offset = this.advance(cursor, 8);
        return this.toSafeNumber(this.view.getBigInt64(offset, true));
    },
    setI64(cursor, value) {
        const offset = this.advance(cursor, 8);
        this.view.setBigInt64(offset, BigInt(value), true);
    },
    getF64(cursor) {
        const offset = this.advance(cursor, 8);
        return this.view.getFloat64(offset, true);
    },
    setF64(cursor, value) {
        const offset = this.advance(cursor, 8);
        this.view.setFloat64(offset, value, true);
    },
    zero(cursor, size) {
        const offset = this.advance(cursor, size);
        this.bytes.fill(0, offset, offset + size);
    },
    encoder: new TextEncoder(),
    decoder: new TextDecoder(),
    stringSize(value) {
        return this.encoder.encode(value).length;
    },
    getString(cursor) {
        const size = this.getU32(cursor);
        const offset = this.advance(cursor, size);
        return this.decoder.decode(this.bytes.slice(offset, offset + size));
    },
    setString(cursor, value) {
        const encoded = this.encoder.encode(value);
        this.setU32(cursor, encoded.length);
        const offset = this.advance(cursor, encoded.length);
        this.bytes.set(encoded, offset);
    },
};
"#;

const SHARED_BUFFER: &str = r#"
class SharedBuffer {
    constructor(source) {
        if (source instanceof ArrayBuffer || ArrayBuffer.isView(source)) {
            const bytes = source instanceof ArrayBuffer ? new Uint8Array(source) : new Uint8Array(source.buffer, source.byteOffset, source.byteLength);
            const address = _malloc(bytes.length);
            wireIO.refresh();
            wireIO.bytes.set(bytes, address);
            this.address = address;
            this.size = bytes.length;
            this.count = _shared_count_create(1);
        } else {
            this.address = source.address;
            this.size = source.size;
            this.count = source.count;
            if (source instanceof SharedBuffer && this.count !== 0) {
                _shared_count_increment(this.count);
            }
        }
    }
    get buf() {
        wireIO.refresh();
        return wireIO.bytes.subarray(this.address, this.address + this.size);
    }
    release() {
        if (this.count !== 0 && _shared_count_decrement(this.count) === 1) {
            _free(this.address);
        }
        this.address = 0;
        this.size = 0;
        this.count = 0;
    }
    serializationSize() {
        return 24;
    }
    serialize(_buf) {
        if (this.count !== 0) {
            _shared_count_increment(this.count);
        }
        wireIO.setU64(_buf, this.address);
        wireIO.setU64(_buf, this.size);
        wireIO.setU64(_buf, this.count);
    }
    static deserialize(_buf) {
        const address = wireIO.getU64(_buf);
        const size = wireIO.getU64(_buf);
        const count = wireIO.getU64(_buf);
        return new SharedBuffer({ address, size, count });
    }
}
"#;

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
        .chain(metas.iter().map(|meta| meta.host_name.as_str()));
    for class in classes {
        output.push_str(&format!("Module[\"{class}\"] = {class};\n"));
    }

    output
}

fn definition(meta: &Meta) -> String {
    let body = match &meta.shape {
        Shape::Object(fields) => object_body(meta, fields),
        Shape::Enum(members) => enum_body(meta, members),
        Shape::Union(variants) => union_body(meta, variants),
        Shape::Primitive(_) | Shape::Optional(_) | Shape::Array(_, _) => {
            unreachable!("anonymous definition `{}`", meta.host_name)
        }
    };

    format!(
        "
        class {} {{
            {body}
        }}
        ",
        meta.host_name,
    )
}

fn object_body(meta: &Meta, fields: &[Field]) -> String {
    let class = &meta.host_name;
    let params = fields.iter().map(|field| format!("_{}", field.host_name)).join(", ");
    let assignments = fields
        .iter()
        .map(|field| format!("this.{0} = _{0};", field.host_name))
        .join("\n");

    let size = match meta.size {
        Size::Fixed(size) => size.to_string(),
        Size::Dynamic => {
            let fixed = fields.iter().filter_map(|field| field.meta.size.fixed()).sum::<u64>();
            let dynamic = fields
                .iter()
                .filter(|field| field.meta.size == Size::Dynamic)
                .map(|field| size_expr(&field.meta, &this(field), &format!("_{}", field.host_name)));
            let fixed = (fixed > 0).then(|| fixed.to_string());
            fixed.into_iter().chain(dynamic).join(" + ")
        }
    };

    let serialize = fields
        .iter()
        .map(|field| serialize(&field.meta, &this(field), &format!("_{}", field.host_name)))
        .join("\n");
    let deserialize = fields
        .iter()
        .map(|field| deserialize(&field.meta, &format!("_{}", field.host_name)))
        .join("\n");

    let release = match meta.release {
        true => {
            let fields = fields
                .iter()
                .filter(|field| field.meta.release)
                .map(|field| release(&field.meta, &this(field), &format!("_{}", field.host_name)))
                .join("\n");
            format!("release() {{\n{fields}\n}}")
        }
        false => String::new(),
    };

    format!(
        "
        constructor({params}) {{
            {assignments}
        }}
        serializationSize() {{
            return {size};
        }}
        serialize({BUF}) {{
            {serialize}
        }}
        static deserialize({BUF}) {{
            {deserialize}
            return new {class}({params});
        }}
        {release}
        ",
    )
}

fn this(field: &Field) -> String {
    format!("this.{}", field.host_name)
}

/// Marker symbols and the tables mapping them to and from tag values.
fn markers<'a>(class: &str, keys: impl Iterator<Item = &'a str> + Clone) -> String {
    let statics = keys
        .clone()
        .map(|key| format!("static {} = Symbol(\"{key}\");", static_key(key)))
        .join("\n");
    let to_index = keys
        .clone()
        .enumerate()
        .map(|(index, key)| format!("[{}, {index}]", static_access(class, key)))
        .join(", ");
    let from_index = keys.map(|key| static_access(class, key)).join(", ");

    format!(
        "
        {statics}
        static symbolToIndex = new Map([{to_index}]);
        static symbolFromIndex = [{from_index}];
        ",
    )
}

fn enum_body(meta: &Meta, members: &[String]) -> String {
    let class = &meta.host_name;
    let markers = markers(class, members.iter().map(String::as_str));
    let tag = tag_accessor(meta);
    let size = meta.size.fixed().unwrap_or(1);
    let count = members.len();
    let invalid = format!("throw new Error(\"invalid value of enum {class}\");");

    format!(
        "
        {markers}
        constructor(value) {{
            if (!{class}.symbolToIndex.has(value)) {{
                {invalid}
            }}
            this.value = value;
        }}
        serializationSize() {{
            return {size};
        }}
        serialize({BUF}) {{
            wireIO.set{tag}({BUF}, {class}.symbolToIndex.get(this.value));
        }}
        static deserialize({BUF}) {{
            const _tag = wireIO.get{tag}({BUF});
            if (_tag >= {count}) {{
                {invalid}
            }}
            return new {class}({class}.symbolFromIndex[_tag]);
        }}
        ",
    )
}

fn union_body(meta: &Meta, variants: &[Variant]) -> String {
    let class = &meta.host_name;
    let markers = markers(class, variants.iter().map(|variant| variant.key.as_str()));
    let tag = tag_accessor(meta);
    let tag_size = meta.tag().map_or(1, |tag| tag.bytes());
    let invalid = format!("throw new Error(\"invalid value of union {class}\");");

    let class_types = variants
        .iter()
        .filter(|variant| variant.meta.is_host_class())
        .map(|variant| format!("[{}, {}]", variant.meta.host_name, static_access(class, &variant.key)))
        .join(", ");
    let (class_types, construct_instance) = match class_types.is_empty() {
        true => (String::new(), String::new()),
        false => (
            format!("static classTypes = new Map([{class_types}]);"),
            format!(
                "
                if ({class}.classTypes.has(arg.constructor)) {{
                    this.type = {class}.classTypes.get(arg.constructor);
                    this.value = arg;
                    return;
                }}
                ",
            ),
        ),
    };

    let size = match meta.size {
        Size::Fixed(size) => format!("return {size};"),
        Size::Dynamic => {
            let cases = variants
                .iter()
                .enumerate()
                .map(|(index, variant)| {
                    let size = size_expr(&variant.meta, "this.value", &format!("_{index}"));
                    format!("case {}: return {tag_size} + {size};", static_access(class, &variant.key))
                })
                .join("\n");
            format!("switch (this.type) {{\n{cases}\ndefault: {invalid}\n}}")
        }
    };

    let serialize_cases = variants
        .iter()
        .enumerate()
        .map(|(index, variant)| {
            format!(
                "case {}: {{\n{}\nbreak;\n}}",
                static_access(class, &variant.key),
                serialize(&variant.meta, "this.value", &format!("_{index}")),
            )
        })
        .join("\n");

    let deserialize_cases = variants
        .iter()
        .enumerate()
        .map(|(index, variant)| {
            let temporary = format!("_{index}");
            format!(
                "case {index}: {{\n{}\nreturn new {class}({{ type: {}, value: {temporary} }});\n}}",
                deserialize(&variant.meta, &temporary),
                static_access(class, &variant.key),
            )
        })
        .join("\n");

    let release = match meta.release {
        true => {
            let cases = variants
                .iter()
                .enumerate()
                .filter(|(_, variant)| variant.meta.release)
                .map(|(index, variant)| {
                    format!(
                        "case {}: {{\n{}\nbreak;\n}}",
                        static_access(class, &variant.key),
                        release(&variant.meta, "this.value", &format!("_{index}")),
                    )
                })
                .join("\n");
            format!("release() {{\nswitch (this.type) {{\n{cases}\ndefault: break;\n}}\n}}")
        }
        false => String::new(),
    };

    format!(
        "
        {markers}
        {class_types}
        constructor(arg) {{
            {construct_instance}
            if (!{class}.symbolToIndex.has(arg.type)) {{
                {invalid}
            }}
            this.type = arg.type;
            this.value = arg.value;
        }}
        serializationSize() {{
            {size}
        }}
        serialize({BUF}) {{
            wireIO.set{tag}({BUF}, {class}.symbolToIndex.get(this.type));
            switch (this.type) {{
                {serialize_cases}
                default: {invalid}
            }}
        }}
        static deserialize({BUF}) {{
            switch (wireIO.get{tag}({BUF})) {{
                {deserialize_cases}
                default: {invalid}
            }}
        }}
        {release}
        ",
    )
}

fn tag_accessor(meta: &Meta) -> &'static str {
    meta.tag().map_or("U8", |tag| tag.js_accessor())
}

/// An expression computing the encoded size of `expr`.
fn size_expr(meta: &Meta, expr: &str, name: &str) -> String {
    if let Size::Fixed(size) = meta.size {
        return size.to_string();
    }

    match &meta.shape {
        Shape::Primitive(BaseType::String) => format!("({COUNT_SIZE} + wireIO.stringSize({expr}))"),
        Shape::Primitive(base_type) => unreachable!("{base_type} has a fixed size"),
        Shape::Optional(inner) => {
            let inner = size_expr(inner, expr, &format!("{name}Inner"));
            format!("({expr} != null ? {PRESENCE_SIZE} + {inner} : {PRESENCE_SIZE})")
        }
        Shape::Array(inner, arity) => {
            let count = match arity {
                Arity::Unbounded => format!("{COUNT_SIZE} + "),
                Arity::Fixed(_) => String::new(),
            };
            match inner.size {
                Size::Fixed(size) => format!("({count}{expr}.length * {size})"),
                Size::Dynamic => {
                    let total = format!("{name}Total");
                    let elem = format!("{name}Elem");
                    let elem_size = size_expr(inner, &elem, &elem);
                    format!("({count}{expr}.reduce(({total}, {elem}) => {total} + {elem_size}, 0))")
                }
            }
        }
        Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => format!("{expr}.serializationSize()"),
    }
}

/// Statements writing `expr` to the cursor.
fn serialize(meta: &Meta, expr: &str, name: &str) -> String {
    match &meta.shape {
        Shape::Primitive(base_type) => match base_type {
            BaseType::Bool => format!("wireIO.setU8({BUF}, {expr} ? 1 : 0);"),
            BaseType::Double => format!("wireIO.setF64({BUF}, {expr});"),
            BaseType::Int => format!("wireIO.setI64({BUF}, {expr});"),
            BaseType::Uint | BaseType::Ptr => format!("wireIO.setU64({BUF}, {expr});"),
            BaseType::String => format!("wireIO.setString({BUF}, {expr});"),
            BaseType::Buffer => format!("{expr}.serialize({BUF});"),
        },
        Shape::Optional(inner) => {
            let present = serialize(inner, expr, &format!("{name}Inner"));
            let padding = match inner.size {
                Size::Fixed(size) => format!("wireIO.zero({BUF}, {size});"),
                Size::Dynamic => String::new(),
            };
            format!(
                "
                if ({expr} != null) {{
                    wireIO.setU8({BUF}, 1);
                    {present}
                }} else {{
                    wireIO.setU8({BUF}, 0);
                    {padding}
                }}
                ",
            )
        }
        Shape::Array(inner, arity) => {
            let count = match arity {
                Arity::Unbounded => format!("wireIO.setU32({BUF}, {expr}.length);"),
                Arity::Fixed(len) => format!(
                    "if ({expr}.length !== {len}) {{ throw new Error(\"expected {len} elements, got \" + {expr}.length); }}",
                ),
            };
            let elem = format!("{name}Elem");
            format!(
                "
                {count}
                for (const {elem} of {expr}) {{
                    {}
                }}
                ",
                serialize(inner, &elem, &elem),
            )
        }
        Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => format!("{expr}.serialize({BUF});"),
    }
}

/// Statements declaring `var` and reading it from the cursor.
fn deserialize(meta: &Meta, var: &str) -> String {
    match &meta.shape {
        Shape::Primitive(base_type) => match base_type {
            BaseType::Bool => format!("const {var} = wireIO.getU8({BUF}) !== 0;"),
            BaseType::Double => format!("const {var} = wireIO.getF64({BUF});"),
            BaseType::Int => format!("const {var} = wireIO.getI64({BUF});"),
            BaseType::Uint | BaseType::Ptr => format!("const {var} = wireIO.getU64({BUF});"),
            BaseType::String => format!("const {var} = wireIO.getString({BUF});"),
            BaseType::Buffer => format!("const {var} = SharedBuffer.deserialize({BUF});"),
        },
        Shape::Optional(inner) => {
            let inner_var = format!("{var}Inner");
            let absent = match inner.size {
                Size::Fixed(size) => format!("else {{\n{BUF}.offset += {size};\n}}"),
                Size::Dynamic => String::new(),
            };
            format!(
                "
                let {var} = null;
                if (wireIO.getU8({BUF}) !== 0) {{
                    {}
                    {var} = {inner_var};
                }} {absent}
                ",
                deserialize(inner, &inner_var),
            )
        }
        Shape::Array(inner, arity) => {
            let length = match arity {
                Arity::Unbounded => format!("wireIO.getU32({BUF})"),
                Arity::Fixed(len) => len.to_string(),
            };
            let elem = format!("{var}Elem");
            format!(
                "
                const {var} = Array.from({{ length: {length} }}, () => {{
                    {}
                    return {elem};
                }});
                ",
                deserialize(inner, &elem),
            )
        }
        Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => {
            format!("const {var} = {}.deserialize({BUF});", meta.host_name)
        }
    }
}

/// Statements releasing the shared buffers held by `expr`.
fn release(meta: &Meta, expr: &str, name: &str) -> String {
    match &meta.shape {
        Shape::Primitive(BaseType::Buffer) | Shape::Object(_) | Shape::Union(_) => {
            format!("{expr}.release();")
        }
        Shape::Primitive(_) | Shape::Enum(_) => String::new(),
        Shape::Optional(inner) => format!(
            "if ({expr} != null) {{\n{}\n}}",
            release(inner, expr, &format!("{name}Inner")),
        ),
        Shape::Array(inner, _) => {
            let elem = format!("{name}Elem");
            format!("for (const {elem} of {expr}) {{\n{}\n}}", release(inner, &elem, &elem))
        }
    }
}
