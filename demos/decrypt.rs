use rpgm_decrypter_lib::{detect, Decrypter, Reporter};
use std::{env::args, path::PathBuf, process::ExitCode};

struct Console;

impl Reporter for Console {
    fn log(&mut self, message: &str) {
        println!("{message}");
    }
}

fn main() -> ExitCode {
    let mut args = args().skip(1);

    let (Some(input), Some(output)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from)) else {
        eprintln!("Usage: decrypt <archive or game directory> <output directory> [--force]");
        return ExitCode::FAILURE;
    };

    println!("Detected: {}", detect(&input));

    let mut decrypter = Decrypter::new();

    // When `true`, overwrites files that already exist in the output directory.
    decrypter.set_force(args.any(|arg| arg == "--force"));

    match decrypter.decrypt(&input, &output, Console) {
        Ok(outcome) => {
            if let Some(key) = outcome.key {
                println!("Key: {key}");
            }

            for (path, err) in &outcome.failures {
                eprintln!("{}: {err}", path.display());
            }

            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{err}");
            ExitCode::FAILURE
        }
    }
}
