//! Runs the generated host runtime under `node`, and compares the bytes that
//! it writes with the reference codec. Skipped when `node` is not installed.

use std::process::Command;

use wirespec::binary::{self, Value};
use wirespec::emit;
use wirespec::layout::Context;
use wirespec::surface::Module;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const SCHEMA: &str = r#"
type Color = "red" | "green" | "blue"
type Point = { x: double, y: double }
type Scalar = int | double
type Shape = Circle { radius: double, center: Point } | Polygon { points: Point[] } | int[3]
type Entry = {
    name: string,
    color: Color,
    tags: string[],
    score: int?,
    missing: double?,
    label: string?,
    grid: uint[2][2],
    shapes: Shape[],
    flag: bool,
    address: ptr
}
"#;

/// Serializes a value at offset 8, deserializes it again and serializes the
/// copy elsewhere. Prints the name, `serializationSize()`, the number of bytes
/// written, and both encodings in hex.
const HARNESS: &str = r#"
function hex(bytes) {
    return Array.from(bytes, (byte) => byte.toString(16).padStart(2, "0")).join("");
}

function check(name, value) {
    const size = value.serializationSize();
    const cursor = { offset: 8 };
    value.serialize(cursor);
    const written = cursor.offset - 8;
    const bytes = new Uint8Array(wasmMemory.buffer, 8, written).slice();

    const copy = value.constructor.deserialize({ offset: 8 });
    const again = { offset: 32768 };
    copy.serialize(again);
    const bytesAgain = new Uint8Array(wasmMemory.buffer, 32768, again.offset - 32768).slice();

    console.log([name, size, written, hex(bytes), hex(bytesAgain)].join(" "));
}
"#;

fn node_available() -> bool {
    Command::new("node")
        .arg("--version")
        .output()
        .map_or(false, |output| output.status.success())
}

fn record(fields: &[(&str, Value)]) -> Value {
    Value::Record(
        fields
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect(),
    )
}

fn point(x: f64, y: f64) -> Value {
    record(&[("x", Value::Double(x)), ("y", Value::Double(y))])
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Each case: a definition, a host expression constructing a value of it, and
/// the same value for the reference codec.
fn cases() -> Vec<(&'static str, &'static str, Value)> {
    vec![
        ("Color", "new Color(Color.blue)", Value::Enum(2)),
        ("Point", "new Point(1.5, -2.25)", point(1.5, -2.25)),
        (
            "Scalar",
            "new Scalar({ type: Scalar.double, value: 2.5 })",
            Value::Union(1, Box::new(Value::Double(2.5))),
        ),
        (
            "Shape",
            "new Shape(new Circle(0.5, new Point(3, 4)))",
            Value::Union(
                0,
                Box::new(record(&[
                    ("radius", Value::Double(0.5)),
                    ("center", point(3.0, 4.0)),
                ])),
            ),
        ),
        (
            "Shape",
            r#"new Shape({ type: Shape["int[3]"], value: [7, -8, 9] })"#,
            Value::Union(
                2,
                Box::new(Value::Array(vec![Value::Int(7), Value::Int(-8), Value::Int(9)])),
            ),
        ),
        (
            "Entry",
            r#"new Entry(
                "wire é",
                new Color(Color.green),
                ["a", "bc"],
                -42,
                null,
                "yes",
                [[1, 2], [3, 4]],
                [
                    new Shape({ type: Shape.Polygon, value: new Polygon([new Point(0, 0), new Point(-1, 2)]) }),
                    new Shape({ type: Shape["int[3]"], value: [1, 2, 3] }),
                ],
                true,
                4096,
            )"#,
            record(&[
                ("name", Value::String("wire \u{e9}".to_owned())),
                ("color", Value::Enum(1)),
                (
                    "tags",
                    Value::Array(vec![
                        Value::String("a".to_owned()),
                        Value::String("bc".to_owned()),
                    ]),
                ),
                ("score", Value::Optional(Some(Box::new(Value::Int(-42))))),
                ("missing", Value::Optional(None)),
                (
                    "label",
                    Value::Optional(Some(Box::new(Value::String("yes".to_owned())))),
                ),
                (
                    "grid",
                    Value::Array(vec![
                        Value::Array(vec![Value::Uint(1), Value::Uint(2)]),
                        Value::Array(vec![Value::Uint(3), Value::Uint(4)]),
                    ]),
                ),
                (
                    "shapes",
                    Value::Array(vec![
                        Value::Union(
                            1,
                            Box::new(record(&[(
                                "points",
                                Value::Array(vec![point(0.0, 0.0), point(-1.0, 2.0)]),
                            )])),
                        ),
                        Value::Union(
                            2,
                            Box::new(Value::Array(vec![
                                Value::Int(1),
                                Value::Int(2),
                                Value::Int(3),
                            ])),
                        ),
                    ]),
                ),
                ("flag", Value::Bool(true)),
                ("address", Value::Ptr(4096)),
            ]),
        ),
    ]
}

#[test]
fn host_runtime_matches_reference_codec() -> TestResult {
    if !node_available() {
        eprintln!("skipping: `node` is not installed");
        return Ok(());
    }

    let (module, messages) = Module::parse(SCHEMA);
    assert!(messages.is_empty(), "{messages:?}");
    let (output, messages) = emit::emit(&module);
    assert!(messages.is_empty(), "{messages:?}");

    let cases = cases();
    let mut script = String::from(
        "const wasmMemory = new WebAssembly.Memory({ initial: 1 });\nconst Module = {};\n",
    );
    script.push_str(&output.js);
    script.push_str(HARNESS);
    for (name, expr, _) in &cases {
        script.push_str(&format!("check({name:?}, {expr});\n"));
    }

    let script_path =
        std::env::temp_dir().join(format!("wirespec-node-{}.js", std::process::id()));
    std::fs::write(&script_path, &script)?;
    let result = Command::new("node").arg(&script_path).output();
    std::fs::remove_file(&script_path)?;
    let result = result?;

    let stdout = String::from_utf8(result.stdout)?;
    let stderr = String::from_utf8_lossy(&result.stderr);
    assert!(result.status.success(), "node failed:\n{stderr}");

    let lines = stdout.lines().collect::<Vec<_>>();
    assert_eq!(lines.len(), cases.len(), "{stdout}");

    let mut context = Context::new(&module);
    for ((name, expr, value), line) in cases.iter().zip(lines) {
        let meta = context.resolve_definition(module.lookup(name).unwrap()).unwrap();
        let mut expected = Vec::new();
        binary::write(&meta, value, &mut expected)?;

        let columns = line.split(' ').collect::<Vec<_>>();
        assert_eq!(columns.len(), 5, "{line}");
        assert_eq!(columns[0], *name);
        assert_eq!(columns[1], expected.len().to_string(), "serializationSize of {expr}");
        assert_eq!(columns[2], expected.len().to_string(), "bytes written by {expr}");
        assert_eq!(columns[3], hex(&expected), "encoding of {expr}");
        assert_eq!(columns[4], columns[3], "round trip of {expr}");
        if let Some(size) = meta.size.fixed() {
            assert_eq!(size, expected.len() as u64, "fixed size of {name}");
        }
    }

    Ok(())
}
