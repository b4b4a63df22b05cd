// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Tobias Sarnowski

//! `viua-link -o <output> --entry <symbol> <input...>`: a minimal front end
//! over [`viua_elf::link`], enough for linker tests to drive from the
//! command line without hand-building `LinkInput`s.

use std::process::ExitCode;

use viua_elf::{link, LinkInput, Module};

fn main() -> ExitCode {
    match run(std::env::args().skip(1).collect()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("viua-link: {message}");
            ExitCode::from(2)
        }
    }
}

fn run(argv: Vec<String>) -> Result<(), String> {
    let mut output = None;
    let mut entry = "main/0".to_string();
    let mut input_paths = Vec::new();

    let mut args = argv.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => output = Some(args.next().ok_or("-o requires a path")?),
            "--entry" => entry = args.next().ok_or("--entry requires a symbol name")?,
            path => input_paths.push(path.to_string()),
        }
    }
    let output = output.ok_or("missing -o <output>")?;
    if input_paths.is_empty() {
        return Err("no input modules given".to_string());
    }

    let mut inputs = Vec::with_capacity(input_paths.len());
    for path in &input_paths {
        let bytes = std::fs::read(path).map_err(|e| format!("cannot read `{path}`: {e}"))?;
        let module = Module::from_bytes(&bytes).map_err(|e| format!("`{path}` is not a valid module: {e}"))?;
        inputs.push(LinkInput { name: path.clone(), module });
    }

    let linked = link(&entry, inputs).map_err(|e| format!("link failed: {e}"))?;
    std::fs::write(&output, linked.to_bytes()).map_err(|e| format!("cannot write `{output}`: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_output_flag_is_an_error() {
        assert!(run(vec!["a.o".to_string()]).is_err());
    }

    #[test]
    fn missing_inputs_is_an_error() {
        assert!(run(vec!["-o".to_string(), "out".to_string()]).is_err());
    }

    #[test]
    fn default_entry_symbol_is_main_zero_arity() {
        let mut output = None;
        let mut entry = "main/0".to_string();
        let mut args = vec!["-o".to_string(), "out".to_string()].into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-o" | "--output" => output = args.next(),
                "--entry" => entry = args.next().unwrap(),
                _ => {}
            }
        }
        assert_eq!(output, Some("out".to_string()));
        assert_eq!(entry, "main/0");
    }
}
