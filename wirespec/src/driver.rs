use std::cell::RefCell;
use std::io::{Read, Write};
use std::path::Path;

use codespan_reporting::diagnostic::{Diagnostic, Severity};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice, WriteColor};

use crate::binary;
use crate::emit::{self, Output};
use crate::layout;
use crate::reporting::Message;
use crate::source::{FileId, SourceMap};
use crate::surface::Module;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Error,
}

impl Status {
    pub fn exit_code(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }
}

/// The colour choice for a standard stream, based on whether it is a
/// terminal.
pub fn default_color_choice(stream: atty::Stream) -> ColorChoice {
    match atty::is(stream) {
        true => ColorChoice::Auto,
        false => ColorChoice::Never,
    }
}

pub struct Driver {
    source_map: SourceMap,

    seen_errors: RefCell<bool>,
    codespan_config: codespan_reporting::term::Config,
    diagnostic_writer: RefCell<Box<dyn WriteColor>>,

    emit_width: usize,
    emit_writer: RefCell<Box<dyn WriteColor>>,
}

impl Driver {
    pub fn new() -> Driver {
        Driver {
            source_map: SourceMap::new(),

            seen_errors: RefCell::new(false),
            codespan_config: codespan_reporting::term::Config::default(),
            diagnostic_writer: RefCell::new(Box::new(BufferedStandardStream::stderr(
                default_color_choice(atty::Stream::Stderr),
            ))),

            emit_width: usize::MAX,
            emit_writer: RefCell::new(Box::new(BufferedStandardStream::stdout(
                default_color_choice(atty::Stream::Stdout),
            ))),
        }
    }

    /// Setup a global panic hook
    pub fn install_panic_hook(&self) {
        // Use the currently set codespan configuration
        let term_config = self.codespan_config.clone();
        // Fetch the default hook (which prints the panic message and an optional backtrace)
        let default_hook = std::panic::take_hook();

        std::panic::set_hook(Box::new(move |info| {
            let location = info.location();
            let message = if let Some(message) = info.payload().downcast_ref::<String>() {
                message.as_str()
            } else if let Some(message) = info.payload().downcast_ref::<&str>() {
                message
            } else {
                "unknown panic type"
            };

            let diagnostic = Diagnostic::bug()
                .with_message(format!("compiler panicked at '{message}'"))
                .with_notes(vec![
                    match location {
                        Some(location) => format!("panicked at: {location}"),
                        None => "panicked at: unknown location".to_owned(),
                    },
                    "please file a bug report, including the schemas that caused it".to_owned(),
                ]);

            let mut writer = BufferedStandardStream::stderr(default_color_choice(atty::Stream::Stderr));
            let dummy_files = SimpleFiles::<String, String>::new();

            default_hook(info);
            eprintln!();
            // Nothing is left to report a failure to
            let _ = codespan_reporting::term::emit(&mut writer, &term_config, &dummy_files, &diagnostic);
            let _ = writer.flush();
        }));
    }

    /// Set the writer to use when rendering diagnostics
    pub fn set_diagnostic_writer(&mut self, stream: impl 'static + WriteColor) {
        self.diagnostic_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// Set the width to use when emitting decoded data
    pub fn set_emit_width(&mut self, emit_width: usize) {
        self.emit_width = emit_width;
    }

    /// Set the writer to use when emitting layouts and decoded data
    pub fn set_emit_writer(&mut self, stream: impl 'static + WriteColor) {
        self.emit_writer = RefCell::new(Box::new(stream) as Box<dyn WriteColor>);
    }

    /// The status of the session so far.
    pub fn status(&self) -> Status {
        match *self.seen_errors.borrow() {
            true => Status::Error,
            false => Status::Ok,
        }
    }

    /// Load a source string into the source map.
    pub fn load_source_string(&mut self, name: String, source: String) -> Option<FileId> {
        match self.source_map.add(name.clone(), &source) {
            Ok(file_id) => Some(file_id),
            Err(error) => {
                let diagnostic = Diagnostic::error().with_message(format!(
                    "couldn't load `{name}`: sources would be {} bytes long in total",
                    error.actual_len,
                ));
                self.emit_diagnostic(diagnostic);
                None
            }
        }
    }

    /// Load a source file into the source map using a reader.
    pub fn load_source(&mut self, name: String, mut reader: impl Read) -> Option<FileId> {
        let mut source = String::new();
        match reader.read_to_string(&mut source) {
            Ok(_) => self.load_source_string(name, source),
            Err(error) => {
                self.emit_read_diagnostic(name, error);
                None
            }
        }
    }

    /// Load a source file into the source map from the given path.
    pub fn load_source_path(&mut self, path: &Path) -> Option<FileId> {
        match std::fs::File::open(path) {
            Ok(file) => self.load_source(path.display().to_string(), file),
            Err(error) => {
                self.emit_read_diagnostic(path.display(), error);
                None
            }
        }
    }

    /// Read all the bytes from a reader into a vector.
    pub fn read_bytes(&mut self, name: String, mut reader: impl Read) -> Option<Vec<u8>> {
        let mut bytes = Vec::new();
        match reader.read_to_end(&mut bytes) {
            Ok(_) => Some(bytes),
            Err(error) => {
                self.emit_read_diagnostic(name, error);
                None
            }
        }
    }

    /// Read all the bytes in a given file.
    pub fn read_bytes_path(&mut self, path: &Path) -> Option<Vec<u8>> {
        match std::fs::File::open(path) {
            Ok(file) => self.read_bytes(path.display().to_string(), file),
            Err(error) => {
                self.emit_read_diagnostic(path.display(), error);
                None
            }
        }
    }

    /// Parse the loaded sources, reporting any problems found.
    fn parse_module(&self) -> Module {
        let (module, messages) = Module::parse(self.source_map.buffer());
        self.emit_messages(messages);
        module
    }

    /// Compile the loaded sources. Definitions with errors are left out of the
    /// output.
    pub fn compile(&self) -> Output {
        let module = self.parse_module();
        let (output, messages) = emit::emit(&module);
        self.emit_messages(messages);
        output
    }

    /// Compile the loaded sources and write the generated files to `out_dir`.
    /// The files are written even if errors were reported.
    pub fn compile_and_write(&self, out_dir: &Path) -> Status {
        let output = self.compile();

        if let Err(error) = std::fs::create_dir_all(out_dir) {
            self.emit_write_diagnostic(out_dir.display(), error);
            return Status::Error;
        }

        let files = [
            (Output::CPP_FILE, &output.cpp),
            (Output::JS_FILE, &output.js),
            (Output::DTS_FILE, &output.dts),
        ];
        for (name, contents) in files {
            let path = out_dir.join(name);
            if let Err(error) = std::fs::write(&path, contents) {
                self.emit_write_diagnostic(path.display(), error);
            }
        }

        self.status()
    }

    /// Compile the loaded sources, only reporting diagnostics.
    pub fn check(&self) -> Status {
        self.compile();
        self.status()
    }

    /// Print the size classification of every definition.
    pub fn emit_layouts(&self) -> Status {
        let module = self.parse_module();
        let mut context = layout::Context::new(&module);
        let mut messages = Vec::new();

        for def in module.definitions() {
            if module.is_poisoned(def) {
                continue;
            }
            match context.resolve_definition(def) {
                Ok(meta) => self.emit_line(&format!("{}: {}", meta.host_name, meta.size)),
                Err(message) => {
                    let message = Message::from(message);
                    if !messages.contains(&message) {
                        messages.push(message);
                    }
                }
            }
        }

        self.emit_messages(messages);
        self.status()
    }

    /// Decode `bytes` as a value of the definition named `type_name`, and
    /// print it.
    pub fn read_and_emit_value(&self, type_name: &str, bytes: &[u8]) -> Status {
        let module = self.parse_module();
        if self.status() == Status::Error {
            return Status::Error;
        }

        let def = match module.lookup(type_name) {
            Some(def) => def,
            None => {
                self.emit_diagnostic(
                    Diagnostic::error().with_message(format!("`{type_name}` has not been defined")),
                );
                return Status::Error;
            }
        };

        let mut context = layout::Context::new(&module);
        let meta = match context.resolve_definition(def) {
            Ok(meta) => meta,
            Err(message) => {
                self.emit_messages([Message::from(message)]);
                return Status::Error;
            }
        };

        let mut reader = bytes;
        match binary::read(&meta, &mut reader) {
            Ok(value) => {
                let doc = binary::doc(&meta, &value);
                self.emit_line(&doc.pretty(self.emit_width).to_string());
                if !reader.is_empty() {
                    self.emit_diagnostic(Diagnostic::warning().with_message(format!(
                        "{} bytes left over after reading `{type_name}`",
                        reader.len(),
                    )));
                }
            }
            Err(error) => {
                let defined_at = self.source_map.quote(module.node(def).range.start());
                self.emit_diagnostic(
                    Diagnostic::error()
                        .with_message(format!("failed to read `{type_name}`: {error}"))
                        .with_notes(
                            defined_at
                                .map(|location| format!("`{type_name}` is defined at {location}"))
                                .into_iter()
                                .collect(),
                        ),
                );
            }
        }

        self.status()
    }

    fn emit_line(&self, line: &str) {
        let mut emit_writer = self.emit_writer.borrow_mut();
        writeln!(emit_writer, "{line}").unwrap();
        emit_writer.flush().unwrap();
    }

    fn emit_messages(&self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.emit_diagnostic(message.to_diagnostic(&self.source_map));
        }
    }

    fn emit_diagnostic(&self, diagnostic: Diagnostic<FileId>) {
        let mut writer = self.diagnostic_writer.borrow_mut();
        let config = &self.codespan_config;
        let files = self.source_map.files();

        codespan_reporting::term::emit(&mut *writer, config, files, &diagnostic).unwrap();
        writer.flush().unwrap();

        if diagnostic.severity >= Severity::Error {
            *self.seen_errors.borrow_mut() = true;
        }
    }

    fn emit_read_diagnostic(&self, name: impl std::fmt::Display, error: std::io::Error) {
        let diagnostic =
            Diagnostic::error().with_message(format!("couldn't read `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }

    fn emit_write_diagnostic(&self, name: impl std::fmt::Display, error: std::io::Error) {
        let diagnostic =
            Diagnostic::error().with_message(format!("couldn't write `{name}`: {error}"));
        self.emit_diagnostic(diagnostic);
    }
}

impl Default for Driver {
    fn default() -> Self {
        Self::new()
    }
}
