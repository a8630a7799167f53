use std::{
    env, fs,
    io::{self, BufRead, Write},
    process::ExitCode,
    time::Instant,
};

use squill::{Config, ReplProgress, ReplSession, run_source};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("--help" | "-h") => {
            eprintln!("usage: squill [script.scm]");
            ExitCode::SUCCESS
        }
        Some(path) => run_file(path),
        None => repl(),
    }
}

fn run_file(path: &str) -> ExitCode {
    let code = match fs::read_to_string(path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {path}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let start = Instant::now();
    match run_source(path, &code, Config::default()) {
        Ok(value) => {
            eprintln!("done in {:?}", start.elapsed());
            println!("= {value}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("error after {:?}:\n{err}", start.elapsed());
            ExitCode::FAILURE
        }
    }
}

fn repl() -> ExitCode {
    let mut session = ReplSession::new(Config::default());
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    loop {
        // `.` marks a form continued from previous lines
        let prompt = if session.is_pending() { "." } else { ">" };
        print!("{prompt} ");
        io::stdout().flush().ok();
        let Some(Ok(line)) = lines.next() else {
            // Ctrl-D
            return ExitCode::SUCCESS;
        };
        match session.execute(&line) {
            Ok(ReplProgress::Complete(value)) => println!("= {value}"),
            Ok(ReplProgress::Incomplete) => {}
            Err(err) => eprintln!("{err}"),
        }
    }
}
