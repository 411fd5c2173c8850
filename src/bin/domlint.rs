//! domlint -- parse, normalize, and re-serialize XML documents.
//!
//! Covers the everyday workflow around the DOM engine: parse one or more
//! files (optionally recovering from errors), apply configuration-driven
//! normalization, and write the result back out pretty-printed, canonical,
//! or re-encoded.

use std::fmt::Write as _;
use std::fs;
use std::io::{self, Read, Write};
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;

use domoxide::config::DomConfig;
use domoxide::normalize;
use domoxide::parser::{self, ParseOptions};
use domoxide::serial;
use domoxide::tree::{Document, NodeId, NodeKind};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// domlint -- parse, normalize, and re-serialize XML files.
#[derive(Parser, Debug)]
#[command(name = "domlint", version, about, long_about = None)]
#[allow(clippy::struct_excessive_bools)]
struct Cli {
    /// XML files to process (use `-` for stdin).
    #[arg(required = true)]
    files: Vec<String>,

    /// Print parse diagnostics during processing.
    #[arg(long)]
    verbose: bool,

    // -- Parsing options ---------------------------------------------------
    /// Recover from parsing errors (produce a partial tree).
    #[arg(long)]
    recover: bool,

    /// Expand entity references into their content.
    #[arg(long)]
    noent: bool,

    /// Reject documents that carry a DOCTYPE.
    #[arg(long)]
    nodtd: bool,

    // -- Processing options ------------------------------------------------
    /// Normalize the tree in place before output.
    #[arg(long)]
    normalize: bool,

    // -- Output options ----------------------------------------------------
    /// Do not output the result tree.
    #[arg(long)]
    noout: bool,

    /// Pretty-print (indent) the output.
    #[arg(long)]
    format: bool,

    /// Canonical-form output: no declaration or DOCTYPE, expanded
    /// entities, sorted attributes, explicit end tags.
    #[arg(long)]
    canonical: bool,

    /// Output in the given encoding (e.g., UTF-8, ISO-8859-1).
    #[arg(long, value_name = "ENCODING")]
    encode: Option<String>,

    /// Save output to a file instead of stdout.
    #[arg(long, value_name = "FILE")]
    output: Option<String>,

    // -- Debug options -----------------------------------------------------
    /// Print a textual representation of the document tree.
    #[arg(long)]
    debug: bool,

    /// Print timing information for reading, parsing, and output.
    #[arg(long)]
    timing: bool,
}

// ---------------------------------------------------------------------------
// Exit codes
// ---------------------------------------------------------------------------

const EXIT_SUCCESS: u8 = 0;
const EXIT_PARSE_ERROR: u8 = 1;
const EXIT_IO_ERROR: u8 = 2;
const EXIT_OUTPUT_ERROR: u8 = 3;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut worst_exit: u8 = EXIT_SUCCESS;

    for file in &cli.files {
        let exit = process_file(&cli, file);
        if exit > worst_exit {
            worst_exit = exit;
        }
    }

    ExitCode::from(worst_exit)
}

/// Processes a single input file and returns an exit code.
fn process_file(cli: &Cli, filename: &str) -> u8 {
    // -- Read input --------------------------------------------------------
    let start_read = Instant::now();

    let input = match read_input(filename) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("{filename}: failed to read: {e}");
            return EXIT_IO_ERROR;
        }
    };

    if cli.timing {
        let elapsed = start_read.elapsed();
        eprintln!("Reading file {filename} took {elapsed:?}");
    }

    // -- Parse -------------------------------------------------------------
    let start_parse = Instant::now();

    let options = parse_options(cli);
    let mut doc = match parser::parse_bytes_with_options(&input, &options) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("{filename}: {e}");
            if cli.verbose {
                for diag in &e.diagnostics {
                    eprintln!("{filename}: {diag}");
                }
            }
            return EXIT_PARSE_ERROR;
        }
    };

    if cli.timing {
        let elapsed = start_parse.elapsed();
        eprintln!("Parsing took {elapsed:?}");
    }

    if cli.verbose {
        for diag in &doc.diagnostics {
            eprintln!("{filename}: {diag}");
        }
    }

    // -- Normalization -----------------------------------------------------
    if cli.normalize {
        let config = output_config(cli);
        if let Err(e) = normalize::normalize_with(&mut doc, &config) {
            eprintln!("{filename}: normalization failed: {e}");
            return EXIT_OUTPUT_ERROR;
        }
    }

    // -- Debug tree --------------------------------------------------------
    if cli.debug {
        let debug_output = format_debug_tree(&doc);
        return write_output(cli, debug_output.as_bytes());
    }

    // -- Serialization / output --------------------------------------------
    if cli.noout {
        return EXIT_SUCCESS;
    }

    let start_serial = Instant::now();
    doc.config = output_config(cli);

    let mut bytes = match serial::write_to_bytes(&doc, cli.encode.as_deref()) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("{filename}: serialization failed: {e}");
            return EXIT_OUTPUT_ERROR;
        }
    };
    if bytes.last() != Some(&b'\n') {
        bytes.push(b'\n');
    }

    let exit = write_output(cli, &bytes);

    if cli.timing {
        let elapsed = start_serial.elapsed();
        eprintln!("Serializing took {elapsed:?}");
    }

    exit
}

/// Builds parse options from the CLI flags.
fn parse_options(cli: &Cli) -> ParseOptions {
    let mut options = ParseOptions::default().recover(cli.recover);
    if cli.noent {
        let _ = options.config.set("entities", false);
    }
    if cli.nodtd {
        let _ = options.config.set("disallow-doctype", true);
    }
    options
}

/// Builds the configuration driving normalization and serialization.
fn output_config(cli: &Cli) -> DomConfig {
    let mut config = DomConfig::new();
    if cli.canonical {
        let _ = config.set("canonical-form", true);
    }
    if cli.format {
        let _ = config.set("format-pretty-print", true);
    }
    if cli.noent {
        let _ = config.set("entities", false);
    }
    config
}

// ---------------------------------------------------------------------------
// Input reading
// ---------------------------------------------------------------------------

/// Reads input bytes from a file or stdin (when filename is `-`). Bytes,
/// not text: encoding detection belongs to the parser.
fn read_input(filename: &str) -> io::Result<Vec<u8>> {
    if filename == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        fs::read(filename)
    }
}

// ---------------------------------------------------------------------------
// Output writing
// ---------------------------------------------------------------------------

/// Writes output to stdout or to the file specified by --output.
fn write_output(cli: &Cli, content: &[u8]) -> u8 {
    if let Some(ref output_file) = cli.output {
        if let Err(e) = fs::write(output_file, content) {
            eprintln!("{output_file}: failed to write: {e}");
            return EXIT_IO_ERROR;
        }
    } else {
        let mut stdout = io::stdout();
        if stdout.write_all(content).and_then(|()| stdout.flush()).is_err() {
            return EXIT_IO_ERROR;
        }
    }
    EXIT_SUCCESS
}

// ---------------------------------------------------------------------------
// Debug tree
// ---------------------------------------------------------------------------

/// Produces a textual representation of the document tree: one node per
/// line, indented to show structure.
fn format_debug_tree(doc: &Document) -> String {
    let mut output = String::new();
    output.push_str("DOCUMENT\n");
    for child in doc.children(doc.root()) {
        format_debug_node(doc, child, 1, &mut output);
    }
    output
}

fn format_debug_node(doc: &Document, id: NodeId, depth: usize, out: &mut String) {
    let indent: String = "  ".repeat(depth);

    match &doc.node(id).kind {
        NodeKind::Element {
            namespace,
            attributes,
            ..
        } => {
            out.push_str(&indent);
            out.push_str("ELEMENT ");
            out.push_str(&doc.qualified_name(id).unwrap_or_default());
            if let Some(ns) = namespace {
                let _ = write!(out, " ns={ns}");
            }
            out.push('\n');
            for &attr in attributes {
                out.push_str(&indent);
                out.push_str("  ATTRIBUTE ");
                out.push_str(&doc.qualified_name(attr).unwrap_or_default());
                out.push('=');
                out.push_str(&doc.attribute_node_value(attr));
                out.push('\n');
            }
            for child in doc.children(id) {
                format_debug_node(doc, child, depth + 1, out);
            }
        }
        NodeKind::Text { content } => {
            out.push_str(&indent);
            out.push_str("TEXT ");
            out.push_str(&content.replace('\n', "\\n"));
            out.push('\n');
        }
        NodeKind::CData { content } => {
            out.push_str(&indent);
            out.push_str("CDATA ");
            out.push_str(content);
            out.push('\n');
        }
        NodeKind::Comment { content } => {
            out.push_str(&indent);
            out.push_str("COMMENT ");
            out.push_str(content);
            out.push('\n');
        }
        NodeKind::ProcessingInstruction { target, data } => {
            out.push_str(&indent);
            out.push_str("PI ");
            out.push_str(target);
            if let Some(d) = data {
                out.push(' ');
                out.push_str(d);
            }
            out.push('\n');
        }
        NodeKind::EntityRef { name } => {
            out.push_str(&indent);
            out.push_str("ENTITY_REF ");
            out.push_str(name);
            out.push('\n');
            for child in doc.children(id) {
                format_debug_node(doc, child, depth + 1, out);
            }
        }
        NodeKind::DocumentType {
            name,
            public_id,
            system_id,
            ..
        } => {
            out.push_str(&indent);
            out.push_str("DOCTYPE ");
            out.push_str(name);
            if let Some(pub_id) = public_id {
                let _ = write!(out, " PUBLIC \"{pub_id}\"");
            }
            if let Some(sys_id) = system_id {
                let _ = write!(out, " SYSTEM \"{sys_id}\"");
            }
            out.push('\n');
        }
        _ => {}
    }
}
