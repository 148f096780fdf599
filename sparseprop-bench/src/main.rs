//! Benchmark driver.
//!
//! Usage:
//!   sparseprop-bench einsum <file> <density> <sparse|dense> <run_fw> <run_lat> <run_bw> <seed>
//!   sparseprop-bench graph <name> <row_density> <col_density> <format> <propagate> <seed>
//!   sparseprop-bench format <rows> <cols> <fmt_out> <fmt_left> <fmt_right> \
//!                          <row_sp_L> <col_sp_L> <row_sp_R> <col_sp_R>
//!   sparseprop-bench proptime
//!
//! Exit codes: 0 on success, 1 on usage errors, 2 on parse/build errors.

mod commands;
mod graphs;

use std::path::Path;
use std::process::ExitCode;
use std::str::FromStr;

const EXIT_USAGE: u8 = 1;
const EXIT_PARSE: u8 = 2;

fn usage(program: &str) -> ExitCode {
    eprintln!("Usage: {program} <einsum|graph|format|proptime> [args...]");
    ExitCode::from(EXIT_USAGE)
}

/// Parse one positional argument, naming it in the error message.
fn arg<T: FromStr>(args: &[String], idx: usize, name: &str) -> Result<T, String> {
    let raw = args
        .get(idx)
        .ok_or_else(|| format!("missing argument <{name}>"))?;
    raw.parse()
        .map_err(|_| format!("invalid value '{raw}' for <{name}>"))
}

fn flag(args: &[String], idx: usize, name: &str) -> Result<bool, String> {
    Ok(arg::<u8>(args, idx, name)? != 0)
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("sparseprop-bench");
    let Some(command) = args.get(1) else {
        return usage(program);
    };

    let parsed = match command.as_str() {
        "einsum" => {
            if args.len() != 9 {
                return usage(program);
            }
            let sparse = match args[4].as_str() {
                "sparse" => true,
                "dense" => false,
                other => {
                    eprintln!("expected 'sparse' or 'dense', found '{other}'");
                    return ExitCode::from(EXIT_USAGE);
                }
            };
            (|| -> Result<_, String> {
                Ok((
                    args[2].clone(),
                    arg::<f64>(&args, 3, "density")?,
                    sparse,
                    flag(&args, 5, "run_fw")?,
                    flag(&args, 6, "run_lat")?,
                    flag(&args, 7, "run_bw")?,
                    arg::<u64>(&args, 8, "seed")?,
                ))
            })()
            .map(|(file, density, sparse, fw, lat, bw, seed)| {
                commands::run_einsum(Path::new(&file), density, sparse, fw, lat, bw, seed)
            })
        }
        "graph" => {
            if args.len() != 8 {
                return usage(program);
            }
            (|| -> Result<_, String> {
                Ok((
                    args[2].clone(),
                    arg::<f64>(&args, 3, "row_density")?,
                    arg::<f64>(&args, 4, "col_density")?,
                    args[5].clone(),
                    flag(&args, 6, "propagate")?,
                    arg::<u64>(&args, 7, "seed")?,
                ))
            })()
            .map(|(name, rd, cd, fmt, prop, seed)| {
                commands::run_graph(&name, rd, cd, &fmt, prop, seed)
            })
        }
        "format" => {
            if args.len() != 11 {
                return usage(program);
            }
            (|| -> Result<_, String> {
                Ok((
                    arg::<usize>(&args, 2, "rows")?,
                    arg::<usize>(&args, 3, "cols")?,
                    args[4].clone(),
                    args[5].clone(),
                    args[6].clone(),
                    arg::<f64>(&args, 7, "row_sp_L")?,
                    arg::<f64>(&args, 8, "col_sp_L")?,
                    arg::<f64>(&args, 9, "row_sp_R")?,
                    arg::<f64>(&args, 10, "col_sp_R")?,
                ))
            })()
            .map(|(rows, cols, fo, fl, fr, rl, cl, rr, cr)| {
                commands::run_format(rows, cols, &fo, &fl, &fr, rl, cl, rr, cr)
            })
        }
        "proptime" => {
            if args.len() != 2 {
                return usage(program);
            }
            Ok(commands::run_proptime())
        }
        _ => {
            eprintln!("unknown benchmark '{command}'");
            return usage(program);
        }
    };

    match parsed {
        Err(message) => {
            eprintln!("{message}");
            ExitCode::from(EXIT_USAGE)
        }
        Ok(Err(error)) => {
            eprintln!("{error}");
            ExitCode::from(EXIT_PARSE)
        }
        Ok(Ok(())) => ExitCode::SUCCESS,
    }
}
