use std::path::PathBuf;

use clap::Parser;
use codespan_reporting::term::termcolor::{BufferedStandardStream, ColorChoice};

/// A schema compiler for byte-compatible C++ and JavaScript serializers
#[derive(Parser)]
#[clap(author, version, about)]
enum Cli {
    /// Compile schemas, writing `generated.hpp`, `post.js` and `post.d.ts`
    ///
    /// The files are written even if some definitions had errors. Those
    /// definitions are left out of the output.
    Compile {
        /// Directory to write the generated files to
        #[clap(long = "out-dir", name = "OUT_DIR", default_value = ".")]
        out_dir: PathBuf,
        #[clap(flatten)]
        sources: Sources,
    },
    /// Check schemas for errors without writing any output
    Check {
        #[clap(flatten)]
        sources: Sources,
    },
    /// Print whether the encoded size of each definition is fixed or dynamic
    Layout {
        #[clap(flatten)]
        sources: Sources,
    },
    /// Decode a binary message, printing the result to stdout
    #[clap(after_help = DATA_COMMAND_AFTER_HELP)]
    Data {
        /// Name of the definition to decode the message as
        #[clap(long = "type", name = "TYPE")]
        type_name: String,
        /// Path to the binary message to read from
        #[clap(name = "BINARY_FILE")]
        binary_file: PathOrStdin,
        #[clap(flatten)]
        sources: Sources,
    },
}

const DATA_COMMAND_AFTER_HELP: &str = "\
Examples:

  $ wirespec data --type Point point.bin schema/geometry.spec
  $ wirespec data --type Message - schema/*.spec < message.bin
";

#[derive(clap::Args)]
struct Sources {
    /// When to use colour in diagnostics: `auto`, `always` or `never`
    #[clap(long = "color", name = "WHEN", value_parser = parse_color_choice)]
    color: Option<ColorChoice>,
    /// Schema files, concatenated in the order given (`-` reads from stdin)
    #[clap(name = "FILES", required = true)]
    files: Vec<PathOrStdin>,
}

fn parse_color_choice(src: &str) -> Result<ColorChoice, String> {
    match src {
        "auto" => Ok(wirespec::default_color_choice(atty::Stream::Stderr)),
        "always" => Ok(ColorChoice::Always),
        "never" => Ok(ColorChoice::Never),
        _ => Err(format!("expected `auto`, `always` or `never`, found `{src}`")),
    }
}

#[derive(Clone, Debug)]
enum PathOrStdin {
    StdIn,
    Path(PathBuf),
}

impl std::str::FromStr for PathOrStdin {
    type Err = std::convert::Infallible;

    fn from_str(src: &str) -> Result<PathOrStdin, std::convert::Infallible> {
        match src {
            "-" => Ok(PathOrStdin::StdIn),
            _ => Ok(PathOrStdin::Path(PathBuf::from(src))),
        }
    }
}

fn unwrap_or_exit<T>(option: Option<T>) -> T {
    option.unwrap_or_else(|| std::process::exit(wirespec::Status::Error.exit_code()))
}

fn load_file_or_exit(driver: &mut wirespec::Driver, file: PathOrStdin) -> wirespec::source::FileId {
    unwrap_or_exit(match file {
        PathOrStdin::StdIn => driver.load_source("<stdin>".to_owned(), std::io::stdin()),
        PathOrStdin::Path(path) => driver.load_source_path(&path),
    })
}

fn read_bytes_or_exit(driver: &mut wirespec::Driver, file: PathOrStdin) -> Vec<u8> {
    unwrap_or_exit(match file {
        PathOrStdin::StdIn => driver.read_bytes("<stdin>".to_owned(), std::io::stdin()),
        PathOrStdin::Path(path) => driver.read_bytes_path(&path),
    })
}

/// Set up a driver with every schema file loaded.
fn load_driver_or_exit(sources: Sources) -> wirespec::Driver {
    let mut driver = wirespec::Driver::new();
    driver.install_panic_hook();
    driver.set_emit_width(get_pretty_width());
    if let Some(color) = sources.color {
        driver.set_diagnostic_writer(BufferedStandardStream::stderr(color));
    }

    for file in sources.files {
        load_file_or_exit(&mut driver, file);
    }

    driver
}

const MAX_PRETTY_WIDTH: usize = 80;

fn get_pretty_width() -> usize {
    let term_width = termsize::get().map_or(usize::MAX, |size| usize::from(size.cols));
    std::cmp::min(term_width, MAX_PRETTY_WIDTH)
}

fn main() -> ! {
    let status = match Cli::parse() {
        Cli::Compile { out_dir, sources } => {
            let driver = load_driver_or_exit(sources);
            driver.compile_and_write(&out_dir)
        }
        Cli::Check { sources } => {
            let driver = load_driver_or_exit(sources);
            driver.check()
        }
        Cli::Layout { sources } => {
            let driver = load_driver_or_exit(sources);
            driver.emit_layouts()
        }
        Cli::Data {
            type_name,
            binary_file,
            sources,
        } => {
            let mut driver = load_driver_or_exit(sources);
            let data = read_bytes_or_exit(&mut driver, binary_file);
            driver.read_and_emit_value(&type_name, &data)
        }
    };

    std::process::exit(status.exit_code());
}
