//! Punto de entrada ("driver").
//!
//! Este módulo orquesta las diferentes fases del proceso de
//! compilación o interpretación y expone una CLI.

use anyhow::{self, bail, Context};
use clap::{self, crate_version, Arg, ArgMatches, Command};
use flc::{
    error::Diagnostics,
    interp::{Interpreter, Memory},
    lex::tokenize,
    link::{sibling, LinkOptions},
    parse::parse,
    preprocess::{default_include_paths, Preprocessor},
    source::Source,
    target::{OutputMode, TargetKind},
};

use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::{
    fs,
    io::{self, BufWriter},
    path::Path,
    process,
    str::FromStr,
};

fn main() {
    let args = cli().get_matches();

    let level = match args.occurrences_of("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    // Solo falla si ya existe un logger
    let _ = TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto);

    let code = match run(&args) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("error: {:?}", error);
            1
        }
    };

    process::exit(code);
}

fn cli() -> Command<'static> {
    Command::new("flc")
        .version(crate_version!())
        .about("Compiler and interpreter for the firestorm language")
        .arg(
            Arg::new("input")
                .required(true)
                .value_name("INPUT")
                .help("Source file"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .takes_value(true)
                .value_name("FILE")
                .required_unless_present("interpret")
                .help("Output file, its extension selects the output mode"),
        )
        .arg(
            Arg::new("target")
                .short('t')
                .long("target")
                .takes_value(true)
                .value_name("TARGET")
                .default_value(TargetKind::NAMES[0])
                .help("Target: x86_64-linux-nasm, riscv64-linux-gnu or bytecode"),
        )
        .arg(
            Arg::new("include")
                .short('i')
                .long("include")
                .takes_value(true)
                .multiple_occurrences(true)
                .value_name("DIR")
                .help("Additional include path"),
        )
        .arg(
            Arg::new("strip")
                .short('s')
                .long("strip")
                .help("Strip executables"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .multiple_occurrences(true)
                .help("Increase log verbosity"),
        )
        .arg(
            Arg::new("dump")
                .long("dump")
                .help("Write token and AST dumps next to the output"),
        )
        .arg(
            Arg::new("interpret")
                .short('r')
                .long("interpret")
                .help("Interpret the program instead of compiling it"),
        )
        .arg(
            Arg::new("arg")
                .short('a')
                .long("arg")
                .takes_value(true)
                .multiple_occurrences(true)
                .allow_hyphen_values(true)
                .value_name("ARG")
                .help("Program argument for the interpreter"),
        )
        .arg(
            Arg::new("leaks")
                .short('l')
                .long("leaks")
                .requires("interpret")
                .help("Report heap leaks after interpretation"),
        )
        .arg(
            Arg::new("heap")
                .long("heap")
                .takes_value(true)
                .value_name("CELLS")
                .default_value("1024")
                .help("Interpreter heap capacity"),
        )
}

fn run(args: &ArgMatches) -> anyhow::Result<i32> {
    // Se extraen argumentos necesarios
    let input = args.value_of("input").unwrap();
    let target_name = args.value_of("target").unwrap();
    let kind = match TargetKind::from_str(target_name) {
        Ok(kind) => kind,
        Err(()) => bail!("Unknown target: {}", target_name),
    };

    let mut include_paths = default_include_paths(kind.name());
    include_paths.extend(args.values_of("include").into_iter().flatten().map(Into::into));

    let text = fs::read_to_string(input).with_context(|| format!("Failed to read: {}", input))?;
    let text = Preprocessor::new(include_paths)
        .preprocess(&text)
        .context("Preprocessing failed")?;

    let source = Source::new(input, text);

    let tokens = match tokenize(source.text()) {
        Ok(tokens) => tokens,
        Err(errors) => {
            eprint!("{}", Diagnostics::new(&source, errors));
            return Ok(1);
        }
    };

    let ast = match parse(&tokens) {
        Ok(ast) => ast,
        Err(error) => {
            eprint!("{}", Diagnostics::new(&source, [error]));
            return Ok(1);
        }
    };

    if args.is_present("dump") {
        let base = Path::new(args.value_of("output").unwrap_or(input));

        let tokens: String = tokens.iter().map(|token| format!("{:?}\n", token)).collect();
        fs::write(sibling(base, "tokens"), tokens).context("Failed to write token dump")?;
        fs::write(sibling(base, "ast"), format!("{:#?}\n", ast)).context("Failed to write AST dump")?;
    }

    if args.is_present("interpret") {
        let capacity = args.value_of("heap").unwrap();
        let capacity = capacity
            .parse()
            .with_context(|| format!("Bad heap capacity: {}", capacity))?;

        let mut argv = vec![input];
        argv.extend(args.values_of("arg").into_iter().flatten());

        let output = BufWriter::new(io::stdout().lock());
        let mut interpreter = Interpreter::new(&ast, Memory::new(capacity), output)
            .context("Failed to initialize globals")?;

        let code = interpreter.run(&argv).context("Runtime error")?;
        if args.is_present("leaks") {
            for leak in interpreter.memory().leaks() {
                eprintln!("Leak at: {} with size {}", leak.ptr, leak.len);
            }
        }

        return Ok(code as i32);
    }

    let output = Path::new(args.value_of("output").unwrap());
    let mode = match OutputMode::from_path(output) {
        Some(mode) => mode,
        None => bail!("Cannot infer output mode from: {}", output.display()),
    };

    let mut options = LinkOptions::empty();
    if args.is_present("strip") {
        options |= LinkOptions::STRIP;
    }

    let target = kind.build(options);
    let text = target
        .generate(&ast)
        .with_context(|| format!("Code generation failed for {}", target.name()))?;

    target
        .compile(mode, output, &text)
        .with_context(|| format!("Failed to generate: {}", output.display()))?;

    Ok(0)
}
