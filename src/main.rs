use bbreplay::cli::Options;
use bbreplay::events::LoggingObserver;
use bbreplay::flags::Flags;
use bbreplay::replay_engine::ReplayEngine;
use bbreplay::snapshot;
use std::fs::File;
use std::process::ExitCode;
use structopt::StructOpt;

fn main() -> ExitCode {
    let options = Options::from_args();

    Flags::set(Flags {
        show_bb: options.show_bb,
        show_libcall: options.show_libcall,
        compat_and_mismatch: options.compat_and_mismatch,
    });

    let primary_log = options.primary_log.to_string_lossy().to_string();
    let mut engine = match ReplayEngine::open(&primary_log, options.filter.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("bbreplay: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Some(snapshot_path) = &options.snapshot {
        match File::open(snapshot_path) {
            Ok(mut f) => {
                if let Err(e) = snapshot::restore_symbols(&mut f, engine.symbols_mut()) {
                    eprintln!("bbreplay: failed to restore snapshot {:?}: {}", snapshot_path, e);
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => {
                eprintln!("bbreplay: failed to open snapshot {:?}: {}", snapshot_path, e);
                return ExitCode::FAILURE;
            }
        }
    }

    let mut observer = LoggingObserver::default();
    while engine.step(&mut observer) {}
    let summaries = engine.summary(&mut observer);

    if let Some(save_path) = &options.save_snapshot {
        match File::create(save_path) {
            Ok(mut f) => {
                if let Err(e) = snapshot::save_symbols(engine.symbols(), &mut f) {
                    eprintln!("bbreplay: failed to save snapshot {:?}: {}", save_path, e);
                    return ExitCode::FAILURE;
                }
            }
            Err(e) => {
                eprintln!("bbreplay: failed to create snapshot {:?}: {}", save_path, e);
                return ExitCode::FAILURE;
            }
        }
    }

    if options.json_summary {
        match serde_json::to_string(&summaries) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("bbreplay: failed to serialize summary: {}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
