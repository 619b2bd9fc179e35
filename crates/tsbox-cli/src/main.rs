use std::{env, fs, process::ExitCode, time::Instant};

use tsbox_core::format::display_value;
use tsbox_core::sandbox::{EvalOptions, Sandbox, SandboxOptions};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let file_path = if args.len() > 1 { &args[1] } else { "example.ts" };
    let code = match read_file(file_path) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut sandbox = match Sandbox::new(SandboxOptions::default()) {
        Ok(s) => s,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let start = Instant::now();
    match sandbox.evaluate(&code, EvalOptions::default()) {
        Ok(value) => {
            let elapsed = start.elapsed();
            eprintln!("success after: {elapsed:?}\n{}", display_value(&value));
            ExitCode::SUCCESS
        }
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after: {elapsed:?}\n{err}");
            ExitCode::FAILURE
        }
    }
}

fn read_file(file_path: &str) -> Result<String, String> {
    eprintln!("Reading file: {file_path}");
    match fs::metadata(file_path) {
        Ok(metadata) => {
            if !metadata.is_file() {
                return Err(format!("Error: {file_path} is not a file"));
            }
        }
        Err(err) => {
            return Err(format!("Error reading {file_path}: {err}"));
        }
    }
    match fs::read_to_string(file_path) {
        Ok(contents) => Ok(contents),
        Err(err) => Err(format!("Error reading file: {err}")),
    }
}
