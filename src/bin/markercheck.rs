use std::{fs, path::Path, process::ExitCode};

use anyhow::Context;
use clap::{CommandFactory, Parser};
use simple_logger::SimpleLogger;

use markercheck::{
    book_id::StandardCanon,
    cli::Cli,
    diagnostics::{write_diagnostics, ValidatingSink},
    parser::Parser as MarkerParser,
    scanner::Tokenizer,
    stylesheet,
};

const STYLESHEET_FILENAME: &str = "usfm.sty";

fn main() -> ExitCode {
    SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_colors(true)
        .with_timestamps(false)
        .init()
        .unwrap();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            println!("{e}");
            return ExitCode::from(1);
        }
    };

    run(args)
}

fn run(args: Cli) -> ExitCode {
    let catalog = stylesheet::load_or_fallback(Path::new(STYLESHEET_FILENAME));

    let source = match read_source(&args.usfm_file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("markercheck: {e:#}");
            let _ = Cli::command().print_help();
            println!();
            return ExitCode::from(1);
        }
    };

    let tokens = Tokenizer::new(&catalog).tokenize(&source);
    let oracle = StandardCanon;
    let mut sink = ValidatingSink::new(&catalog, &oracle, &args.book_code, args.usfm2);
    let mut parser = MarkerParser::new(&tokens);
    parser.process_all(&mut sink);
    parser.close_all(&mut sink);

    let diagnostics = sink.into_diagnostics();
    let stdout = std::io::stdout();
    let _ = write_diagnostics(&diagnostics, &mut stdout.lock());

    if diagnostics.is_empty() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

fn read_source(path: &str) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("cannot read {path}"))
}
