use std::fs;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};

use keikaku::interpreter::error::RuntimeError;
use keikaku::voice::{self, ConsoleVoice};
use keikaku::{Interpreter, ScriptError, Value};

fn main() -> ExitCode {
    let mut args = std::env::args();
    let prog = args.next().unwrap_or_else(|| "keikaku".to_string());
    let rest: Vec<String> = args.collect();

    match rest.as_slice() {
        [] => {
            run_repl();
            ExitCode::SUCCESS
        }
        [flag] if flag == "--help" || flag == "-h" => {
            println!("{}", voice::usage(&prog));
            ExitCode::SUCCESS
        }
        [flag] if flag == "--version" || flag == "-v" => {
            println!("{}", voice::version());
            ExitCode::SUCCESS
        }
        [path] => match run_file(path) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("{err:#}");
                ExitCode::FAILURE
            }
        },
        _ => {
            println!("{}", voice::usage(&prog));
            ExitCode::FAILURE
        }
    }
}

fn run_file(path: &str) -> Result<ExitCode> {
    if !std::path::Path::new(path).exists() {
        eprintln!("{}", voice::file_missing(path));
        return Ok(ExitCode::FAILURE);
    }
    let source = fs::read_to_string(path).with_context(|| format!("Reading {path}"))?;

    let mut interp = Interpreter::new(Box::new(ConsoleVoice));
    match run_source_chunk(&mut interp, &source, false) {
        Outcome::Ok => Ok(ExitCode::SUCCESS),
        Outcome::Error => Ok(ExitCode::FAILURE),
        Outcome::Terminated(code) => Ok(if code == 0 {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(code.clamp(0, 255) as u8)
        }),
    }
}

enum Outcome {
    Ok,
    Error,
    Terminated(i32),
}

/// Run one chunk of source; syntax and runtime errors have already been
/// narrated through the voice channel, so only the outcome matters here.
fn run_source_chunk(interp: &mut Interpreter, source: &str, show_result: bool) -> Outcome {
    match keikaku::run_source(interp, source) {
        Ok(value) => {
            if show_result && !matches!(value, Value::Null) {
                println!("  {}", value.to_display());
                println!("  {}", next_result_message());
            }
            Outcome::Ok
        }
        Err(ScriptError::Runtime(RuntimeError::Terminated { code })) => {
            println!("  The scenario terminates. Exit code: {code}");
            Outcome::Terminated(code)
        }
        Err(err @ (ScriptError::Lex(_) | ScriptError::Syntax(_))) => {
            // Frontend errors bypass the interpreter's own narration.
            println!("{}", voice::syntax_error(&err.to_string(), err.line()));
            Outcome::Error
        }
        Err(ScriptError::Runtime(_)) => Outcome::Error,
    }
}

fn next_result_message() -> &'static str {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    let index = NEXT.fetch_add(1, Ordering::Relaxed) % voice::RESULT_MESSAGES.len();
    voice::RESULT_MESSAGES[index]
}

fn run_repl() {
    println!("{}", voice::welcome());

    let mut interp = Interpreter::new(Box::new(ConsoleVoice));
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("{}", voice::repl_prompt());
        let _ = io::stdout().flush();

        let Some(Ok(line)) = lines.next() else {
            println!();
            break;
        };
        let line = line.trim_end().to_string();

        if line == "conclude" {
            println!("{}", voice::goodbye());
            break;
        }
        if line.is_empty() {
            continue;
        }

        // A trailing ':' opens a block: keep reading until a blank line.
        let source = if line.ends_with(':') {
            let mut buffer = line;
            buffer.push('\n');
            loop {
                print!("{}", voice::continuation_prompt());
                let _ = io::stdout().flush();
                let Some(Ok(next)) = lines.next() else {
                    break;
                };
                if next.trim().is_empty() {
                    break;
                }
                buffer.push_str(&next);
                buffer.push('\n');
            }
            buffer
        } else {
            line
        };

        if let Outcome::Terminated(_) = run_source_chunk(&mut interp, &source, true) {
            break;
        }
    }
}
