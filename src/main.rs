use std::io;

use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use sjit::{Object, compile, read_all, read_str};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliConfig {
    source: Option<String>,
    repl: bool,
    help: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            source: None,
            repl: false,
            help: false,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_cli_args(&args).map_err(io::Error::other)?;
    if cli.help {
        print_usage();
        return Ok(());
    }
    if cli.repl || cli.source.is_none() {
        return run_repl();
    }

    let source_path = cli.source.as_deref().unwrap_or_default();
    let source = std::fs::read_to_string(source_path)?;
    for form in read_all(&source)? {
        let result = eval_form(&form)?;
        println!("=> {result}");
    }
    Ok(())
}

fn eval_form(form: &Object) -> Result<Object, Box<dyn std::error::Error>> {
    match form {
        // Bare atoms are self-evaluating.
        Object::Atom(_) => Ok(form.clone()),
        Object::List(list) => {
            let region = compile(list)?;
            Ok(region.invoke()?)
        }
    }
}

fn run_repl() -> Result<(), Box<dyn std::error::Error>> {
    println!("sjit REPL");
    println!("one S-expression per line, e.g. (+ 1 2); ctrl-d quits");
    let mut editor = DefaultEditor::new()?;
    loop {
        match editor.readline("sjit> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line);
                let form = match read_str(line) {
                    Ok(form) => form,
                    Err(err) => {
                        println!("read error: {err}");
                        continue;
                    }
                };
                match eval_form(&form) {
                    Ok(result) => println!("=> {result}"),
                    Err(err) => println!("error: {err}"),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("bye");
                break;
            }
            Err(err) => {
                return Err(Box::new(io::Error::other(err.to_string())));
            }
        }
    }
    Ok(())
}

fn parse_cli_args(args: &[String]) -> Result<CliConfig, String> {
    let mut cfg = CliConfig::default();
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => cfg.help = true,
            "--repl" => cfg.repl = true,
            other if other.starts_with('-') => {
                return Err(format!("unknown flag '{other}'"));
            }
            other => {
                if cfg.source.is_some() {
                    return Err("more than one source file given".to_string());
                }
                cfg.source = Some(other.to_string());
            }
        }
    }
    Ok(cfg)
}

fn print_usage() {
    println!("usage: sjit [OPTIONS] [SOURCE]");
    println!();
    println!("Compile and run each top-level S-expression in SOURCE.");
    println!("With no SOURCE, start the interactive REPL.");
    println!();
    println!("options:");
    println!("  --repl       start the REPL even if a source file is given");
    println!("  -h, --help   show this help");
}
