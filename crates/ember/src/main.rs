/// Command-line front end: compile a script and print its listing.
///
/// The compiler emits `tracing` events, but this binary installs no
/// subscriber, so they are dropped. Hosts that embed `ember-compiler`
/// install their own subscriber to see them.
use std::io::Read;

use ember_compiler::{compile, disassemble, CompileOptions, FalsyPolicy};

const USAGE: &str = "usage: ember [options] [script | -]
  -e chunk     compile the string 'chunk'
  -s           strip debug information
  -c           canonical emptiness: only nil and false are empty for ?? and ?:>
  -b name      global table providing the bit operations (default 'bit')
  -v           show version information
  -            read the script from stdin";

fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut script_file: Option<String> = None;
    let mut exec_chunks: Vec<String> = Vec::new();
    let mut options = CompileOptions::new("=(command line)");
    let mut show_version = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-v" => show_version = true,
            "-s" => options = options.strip_debug(true),
            "-c" => options = options.falsy(FalsyPolicy::canonical()),
            "-e" | "-b" => {
                let Some(value) = args.get(i + 1) else {
                    fail(&format!("'{}' needs argument", args[i]));
                };
                if args[i] == "-e" {
                    exec_chunks.push(value.clone());
                } else {
                    options = options.bit_library(value.as_str());
                }
                i += 1;
            }
            "-h" | "--help" => {
                println!("{USAGE}");
                return;
            }
            arg if arg.starts_with("-e") => exec_chunks.push(arg[2..].to_string()),
            arg if arg.starts_with('-') && arg != "-" => {
                eprintln!("ember: unrecognized option '{arg}'");
                fail(USAGE);
            }
            arg => {
                if script_file.is_some() {
                    fail("only one script may be given");
                }
                script_file = Some(arg.to_string());
            }
        }
        i += 1;
    }

    if show_version {
        println!("Ember {}", env!("CARGO_PKG_VERSION"));
        if script_file.is_none() && exec_chunks.is_empty() {
            return;
        }
    }

    for chunk in &exec_chunks {
        list(chunk.as_bytes(), &options);
    }

    match script_file.as_deref() {
        Some("-") => {
            let mut buf = Vec::new();
            if let Err(e) = std::io::stdin().read_to_end(&mut buf) {
                fail(&format!("cannot read stdin: {e}"));
            }
            list(&buf, &CompileOptions { chunk_name: "=stdin".into(), ..options });
        }
        Some(path) => {
            let source = match std::fs::read(path) {
                Ok(data) => data,
                Err(e) => fail(&format!("cannot open {path}: {e}")),
            };
            let chunk_name = format!("@{path}");
            list(strip_shebang(&source), &CompileOptions { chunk_name, ..options });
        }
        None if exec_chunks.is_empty() => fail(USAGE),
        None => {}
    }
}

/// Compile one chunk and print its listing, or exit with the error.
fn list(source: &[u8], options: &CompileOptions) {
    match compile(source, options) {
        Ok(chunk) => print!("{}", disassemble(&chunk)),
        Err(e) => fail(&e.to_string()),
    }
}

fn fail(msg: &str) -> ! {
    eprintln!("ember: {msg}");
    std::process::exit(1);
}

/// Skip a leading `#` line, keeping its newline so line numbers stay put.
fn strip_shebang(source: &[u8]) -> &[u8] {
    if source.first() == Some(&b'#') {
        let end = source.iter().position(|&b| b == b'\n').unwrap_or(source.len());
        &source[end..]
    } else {
        source
    }
}
