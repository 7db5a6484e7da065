//! Emission of the compiled target: one aggregate struct per definition, each
//! with a size computation, a serializer and a static deserializer over a
//! `char*&` cursor.
//!
//! Temporaries are named after the field or variant that they belong to,
//! prefixed with an underscore so that they can not collide with fields.

use std::rc::Rc;

use itertools::Itertools;

use crate::emit::BUF;
use crate::layout::{primitive_cpp_name, Field, Meta, Shape, Size, Variant, COUNT_SIZE, PRESENCE_SIZE};
use crate::surface::{Arity, BaseType};

const PRELUDE: &str = r#"
#pragma once

#include <emscripten.h>

#include <array>
#include <atomic>
#include <cstdint>
#include <cstdlib>
#include <cstring>
#include <numeric>
#include <optional>
#include <stdexcept>
#include <string>
#include <utility>
#include <variant>
#include <vector>

template <class T>
inline void wire_put(char*& _buf, T value) {
    std::memcpy(_buf, &value, sizeof(T));
    _buf += sizeof(T);
}

template <class T>
inline T wire_get(char*& _buf) {
    T value;
    std::memcpy(&value, _buf, sizeof(T));
    _buf += sizeof(T);
    return value;
}

inline void wire_put_string(char*& _buf, std::string const& value) {
    wire_put<uint32_t>(_buf, static_cast<uint32_t>(value.size()));
    std::memcpy(_buf, value.data(), value.size());
    _buf += value.size();
}

inline std::string wire_get_string(char*& _buf) {
    uint32_t size = wire_get<uint32_t>(_buf);
    std::string value(_buf, size);
    _buf += size;
    return value;
}
"#;

const SHARED_BUFFER: &str = r#"
extern "C" inline EMSCRIPTEN_KEEPALIVE std::atomic<uint32_t>* shared_count_create(uint32_t initial) {
    return new std::atomic<uint32_t>(initial);
}

extern "C" inline EMSCRIPTEN_KEEPALIVE uint32_t shared_count_increment(std::atomic<uint32_t>* count) {
    return count->fetch_add(1) + 1;
}

extern "C" inline EMSCRIPTEN_KEEPALIVE uint32_t shared_count_decrement(std::atomic<uint32_t>* count) {
    uint32_t previous = count->fetch_sub(1);
    if (previous == 1) {
        delete count;
    }
    return previous;
}

class SharedBuffer {
    char* data_ = nullptr;
    size_t size_ = 0;
    std::atomic<uint32_t>* count_ = nullptr;

    SharedBuffer(char* data, size_t size, std::atomic<uint32_t>* count) : data_(data), size_(size), count_(count) {}

public:
    SharedBuffer() = default;

    SharedBuffer(char* data, size_t size) : data_(data), size_(size), count_(shared_count_create(1)) {}

    SharedBuffer(SharedBuffer const& other) : data_(other.data_), size_(other.size_), count_(other.count_) {
        if (count_ != nullptr) {
            shared_count_increment(count_);
        }
    }

    SharedBuffer(SharedBuffer&& other) noexcept : data_(other.data_), size_(other.size_), count_(other.count_) {
        other.data_ = nullptr;
        other.size_ = 0;
        other.count_ = nullptr;
    }

    SharedBuffer& operator=(SharedBuffer other) noexcept {
        std::swap(data_, other.data_);
        std::swap(size_, other.size_);
        std::swap(count_, other.count_);
        return *this;
    }

    ~SharedBuffer() {
        release();
    }

    char* data() const {
        return data_;
    }

    size_t size() const {
        return size_;
    }

    void release() {
        if (count_ != nullptr && shared_count_decrement(count_) == 1) {
            std::free(data_);
        }
        data_ = nullptr;
        size_ = 0;
        count_ = nullptr;
    }

    static constexpr size_t fixed_size = 24;

    size_t serialization_size() const {
        return fixed_size;
    }

    void serialize(char*& _buf) const {
        if (count_ != nullptr) {
            shared_count_increment(count_);
        }
        wire_put<uint64_t>(_buf, static_cast<uint64_t>(reinterpret_cast<uintptr_t>(data_)));
        wire_put<uint64_t>(_buf, static_cast<uint64_t>(size_));
        wire_put<uint64_t>(_buf, static_cast<uint64_t>(reinterpret_cast<uintptr_t>(count_)));
    }

    static SharedBuffer deserialize(char*& _buf) {
        char* data = reinterpret_cast<char*>(static_cast<uintptr_t>(wire_get<uint64_t>(_buf)));
        size_t size = static_cast<size_t>(wire_get<uint64_t>(_buf));
        auto* count = reinterpret_cast<std::atomic<uint32_t>*>(static_cast<uintptr_t>(wire_get<uint64_t>(_buf)));
        return SharedBuffer(data, size, count);
    }
};
"#;

pub fn module(uses_buffer: bool, metas: &[Rc<Meta>]) -> String {
    let mut output = String::from(PRELUDE);
    if uses_buffer {
        output.push_str(SHARED_BUFFER);
    }

    for meta in metas {
        output.push_str(&definition(meta));
    }

    output
}

fn definition(meta: &Meta) -> String {
    let name = &meta.cpp_name;
    let (members, methods) = match &meta.shape {
        Shape::Object(fields) => (object_members(fields), object_methods(meta, fields)),
        Shape::Enum(members) => (enum_members(meta, members), enum_methods(meta, members)),
        Shape::Union(variants) => (union_members(variants), union_methods(meta, variants)),
        Shape::Primitive(_) | Shape::Optional(_) | Shape::Array(_, _) => {
            unreachable!("anonymous definition `{name}`")
        }
    };

    let fixed_size = match meta.size {
        Size::Fixed(size) => format!("static constexpr size_t fixed_size = {size};"),
        Size::Dynamic => String::new(),
    };

    format!(
        "
        struct {name} {{
            {members}
            {fixed_size}
            {methods}
        }};
        ",
    )
}

fn object_members(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|field| format!("{} {};", field.meta.cpp_name, field.name))
        .join("\n")
}

fn object_methods(meta: &Meta, fields: &[Field]) -> String {
    let name = &meta.cpp_name;

    let size = match meta.size {
        Size::Fixed(size) => size.to_string(),
        Size::Dynamic => {
            let fixed = fields.iter().filter_map(|field| field.meta.size.fixed()).sum::<u64>();
            let dynamic = fields
                .iter()
                .filter(|field| field.meta.size == Size::Dynamic)
                .map(|field| size_expr(&field.meta, &format!("this->{}", field.name), &format!("_{}", field.name)));
            let fixed = (fixed > 0).then(|| fixed.to_string());
            fixed.into_iter().chain(dynamic).join(" + ")
        }
    };

    let serialize = fields
        .iter()
        .map(|field| serialize(&field.meta, &format!("this->{}", field.name), &format!("_{}", field.name)))
        .join("\n");

    let deserialize = fields
        .iter()
        .map(|field| deserialize(&field.meta, &format!("_{}", field.name)))
        .join("\n");
    let initializers = fields
        .iter()
        .map(|field| format!(".{0} = std::move(_{0})", field.name))
        .join(", ");

    format!(
        "
        size_t serialization_size() const {{
            return {size};
        }}

        void serialize(char*& {BUF}) const {{
            {serialize}
        }}

        static {name} deserialize(char*& {BUF}) {{
            {deserialize}
            return {name} {{ {initializers} }};
        }}
        ",
    )
}

fn enum_members(meta: &Meta, members: &[String]) -> String {
    let tag = tag_type(meta);
    let first = members.first().map_or("", String::as_str);
    format!(
        "
        enum class Inner : {tag} {{ {} }};
        Inner value = Inner::{first};
        ",
        members.join(", "),
    )
}

fn enum_methods(meta: &Meta, members: &[String]) -> String {
    let name = &meta.cpp_name;
    let tag = tag_type(meta);
    let count = members.len();

    format!(
        "
        size_t serialization_size() const {{
            return fixed_size;
        }}

        void serialize(char*& {BUF}) const {{
            wire_put<{tag}>({BUF}, static_cast<{tag}>(value));
        }}

        static {name} deserialize(char*& {BUF}) {{
            {tag} _tag = wire_get<{tag}>({BUF});
            if (_tag >= {count}) {{
                throw std::runtime_error(\"invalid value of enum {name}\");
            }}
            return {name} {{ static_cast<Inner>(_tag) }};
        }}
        ",
    )
}

fn union_members(variants: &[Variant]) -> String {
    let types = variants.iter().map(|variant| variant.meta.cpp_name.as_str()).join(", ");
    format!("std::variant<{types}> value;")
}

fn union_methods(meta: &Meta, variants: &[Variant]) -> String {
    let name = &meta.cpp_name;
    let tag = tag_type(meta);
    let invalid = format!("throw std::runtime_error(\"invalid value of union {name}\");");

    let size = match meta.size {
        Size::Fixed(_) => "return fixed_size;".to_owned(),
        Size::Dynamic => {
            let mut cases = String::new();
            for (index, variant) in variants.iter().enumerate() {
                let value = format!("std::get<{index}>(value)");
                let size = size_expr(&variant.meta, &value, &format!("_{index}"));
                cases.push_str(&format!("case {index}: return {} + {size};\n", tag_bytes(meta)));
            }
            format!(
                "
                switch (value.index()) {{
                    {cases}
                    default: {invalid}
                }}
                ",
            )
        }
    };

    let mut serialize_cases = String::new();
    let mut deserialize_cases = String::new();
    for (index, variant) in variants.iter().enumerate() {
        let value = format!("std::get<{index}>(value)");
        let temporary = format!("_{index}");
        serialize_cases.push_str(&format!(
            "
            case {index}: {{
                {}
                break;
            }}
            ",
            serialize(&variant.meta, &value, &temporary),
        ));
        deserialize_cases.push_str(&format!(
            "
            case {index}: {{
                {}
                return {name} {{ decltype({name}::value)(std::in_place_index<{index}>, std::move({temporary})) }};
            }}
            ",
            deserialize(&variant.meta, &temporary),
        ));
    }

    format!(
        "
        size_t serialization_size() const {{
            {size}
        }}

        void serialize(char*& {BUF}) const {{
            wire_put<{tag}>({BUF}, static_cast<{tag}>(value.index()));
            switch (value.index()) {{
                {serialize_cases}
                default: {invalid}
            }}
        }}

        static {name} deserialize(char*& {BUF}) {{
            switch (wire_get<{tag}>({BUF})) {{
                {deserialize_cases}
                default: {invalid}
            }}
        }}
        ",
    )
}

fn tag_type(meta: &Meta) -> &'static str {
    meta.tag().map_or("uint8_t", |tag| tag.cpp_type())
}

fn tag_bytes(meta: &Meta) -> u64 {
    meta.tag().map_or(1, |tag| tag.bytes())
}

/// An expression computing the encoded size of `expr`.
fn size_expr(meta: &Meta, expr: &str, name: &str) -> String {
    if let Size::Fixed(size) = meta.size {
        return size.to_string();
    }

    match &meta.shape {
        Shape::Primitive(BaseType::String) => format!("({COUNT_SIZE} + {expr}.size())"),
        Shape::Primitive(base_type) => unreachable!("{base_type} has a fixed size"),
        Shape::Optional(inner) => {
            let inner = size_expr(inner, &format!("(*{expr})"), &format!("{name}_inner"));
            format!("({expr} ? {PRESENCE_SIZE} + {inner} : {PRESENCE_SIZE})")
        }
        Shape::Array(inner, arity) => {
            let count = match arity {
                Arity::Unbounded => format!("{COUNT_SIZE} + "),
                Arity::Fixed(_) => String::new(),
            };
            match inner.size {
                Size::Fixed(size) => format!("({count}{expr}.size() * {size})"),
                Size::Dynamic => {
                    let total = format!("{name}_total");
                    let elem = format!("{name}_elem");
                    let elem_size = size_expr(inner, &elem, &elem);
                    format!(
                        "({count}std::accumulate({expr}.begin(), {expr}.end(), size_t(0), \
                         [](size_t {total}, {} const& {elem}) {{ return {total} + {elem_size}; }}))",
                        inner.cpp_name,
                    )
                }
            }
        }
        Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => format!("{expr}.serialization_size()"),
    }
}

/// Statements writing `expr` to the cursor.
fn serialize(meta: &Meta, expr: &str, name: &str) -> String {
    match &meta.shape {
        Shape::Primitive(base_type) => match base_type {
            BaseType::Bool => format!("wire_put<uint8_t>({BUF}, {expr} ? 1 : 0);"),
            BaseType::Double | BaseType::Int | BaseType::Uint => {
                format!("wire_put<{}>({BUF}, {expr});", primitive_cpp_name(*base_type))
            }
            BaseType::Ptr => format!(
                "wire_put<uint64_t>({BUF}, static_cast<uint64_t>(reinterpret_cast<uintptr_t>({expr})));",
            ),
            BaseType::String => format!("wire_put_string({BUF}, {expr});"),
            BaseType::Buffer => format!("{expr}.serialize({BUF});"),
        },
        Shape::Optional(inner) => {
            let present = serialize(inner, &format!("(*{expr})"), &format!("{name}_inner"));
            // Absent fixed payloads are zero filled to keep the size constant
            let padding = match inner.size {
                Size::Fixed(size) => format!("std::memset({BUF}, 0, {size});\n{BUF} += {size};"),
                Size::Dynamic => String::new(),
            };
            format!(
                "
                if ({expr}) {{
                    wire_put<uint8_t>({BUF}, 1);
                    {present}
                }} else {{
                    wire_put<uint8_t>({BUF}, 0);
                    {padding}
                }}
                ",
            )
        }
        Shape::Array(inner, arity) => {
            let count = match arity {
                Arity::Unbounded => format!("wire_put<uint32_t>({BUF}, static_cast<uint32_t>({expr}.size()));"),
                Arity::Fixed(_) => String::new(),
            };
            let elem = format!("{name}_elem");
            format!(
                "
                {count}
                for (auto const& {elem} : {expr}) {{
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
    let cpp_name = &meta.cpp_name;

    match &meta.shape {
        Shape::Primitive(base_type) => match base_type {
            BaseType::Bool => format!("bool {var} = wire_get<uint8_t>({BUF}) != 0;"),
            BaseType::Double | BaseType::Int | BaseType::Uint => {
                format!("{cpp_name} {var} = wire_get<{cpp_name}>({BUF});")
            }
            BaseType::Ptr => format!(
                "char* {var} = reinterpret_cast<char*>(static_cast<uintptr_t>(wire_get<uint64_t>({BUF})));",
            ),
            BaseType::String => format!("std::string {var} = wire_get_string({BUF});"),
            BaseType::Buffer => format!("SharedBuffer {var} = SharedBuffer::deserialize({BUF});"),
        },
        Shape::Optional(inner) => {
            let inner_var = format!("{var}_inner");
            let absent = match inner.size {
                Size::Fixed(size) => format!("else {{\n{BUF} += {size};\n}}"),
                Size::Dynamic => String::new(),
            };
            format!(
                "
                {cpp_name} {var};
                if (wire_get<uint8_t>({BUF}) != 0) {{
                    {}
                    {var} = std::move({inner_var});
                }} {absent}
                ",
                deserialize(inner, &inner_var),
            )
        }
        Shape::Array(inner, arity) => {
            let declaration = match arity {
                Arity::Unbounded => format!("{cpp_name} {var}(wire_get<uint32_t>({BUF}));"),
                Arity::Fixed(_) => format!("{cpp_name} {var};"),
            };
            let elem = format!("{var}_elem");
            format!(
                "
                {declaration}
                for (auto& {var}_slot : {var}) {{
                    {}
                    {var}_slot = std::move({elem});
                }}
                ",
                deserialize(inner, &elem),
            )
        }
        Shape::Object(_) | Shape::Enum(_) | Shape::Union(_) => {
            format!("{cpp_name} {var} = {cpp_name}::deserialize({BUF});")
        }
    }
}
