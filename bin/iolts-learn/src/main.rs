use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use iolts::dot;
use iolts_learning::{run_approximated_lstar, IoltsSul, LstarConfig, SimulatedIolts};

struct Args {
    model: PathBuf,
    out_dir: PathBuf,
    config: LstarConfig,
    seed: u64,
}

fn parse_args() -> Result<Args, String> {
    let mut model = None;
    let mut out_dir = PathBuf::from(".");
    let mut config = LstarConfig::default();
    let mut seed = 0u64;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next()
                .ok_or_else(|| format!("{name} expects a value"))
        };
        match arg.as_str() {
            "--query-threshold" => {
                config.query_threshold = value("--query-threshold")?
                    .parse()
                    .map_err(|e| format!("bad query threshold: {e}"))?;
            }
            "--completeness-threshold" => {
                config.completeness_threshold = value("--completeness-threshold")?
                    .parse()
                    .map_err(|e| format!("bad completeness threshold: {e}"))?;
            }
            "--seed" => {
                seed = value("--seed")?
                    .parse()
                    .map_err(|e| format!("bad seed: {e}"))?;
            }
            "--print-level" => {
                config.print_level = value("--print-level")?
                    .parse()
                    .map_err(|e| format!("bad print level: {e}"))?;
            }
            "--no-reset" => config.enable_reset = false,
            other if model.is_none() => model = Some(PathBuf::from(other)),
            other => out_dir = PathBuf::from(other),
        }
    }

    let model = model.ok_or_else(|| {
        "usage: iolts-learn MODEL.dot [OUT_DIR] [--query-threshold Q] \
         [--completeness-threshold C] [--seed N] [--print-level L] [--no-reset]"
            .to_string()
    })?;
    Ok(Args {
        model,
        out_dir,
        config,
        seed,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let mut machine = match dot::load(&args.model) {
        Ok(machine) => machine,
        Err(err) => {
            error!(model = %args.model.display(), %err, "cannot load the model");
            return ExitCode::FAILURE;
        }
    };
    machine.make_input_complete();
    info!(
        states = machine.size(),
        inputs = machine.input_alphabet().len(),
        outputs = machine.output_alphabet().len(),
        "loaded model"
    );

    let mut sul = IoltsSul::with_seed(
        SimulatedIolts::with_seed(machine, args.seed),
        args.config.query_threshold,
        args.config.completeness_threshold,
        args.seed,
    );

    let learned = match run_approximated_lstar(&mut sul, &mut (), &args.config) {
        Ok(learned) => learned,
        Err(err) => {
            error!(%err, "learning failed");
            return ExitCode::FAILURE;
        }
    };

    for (name, hypothesis) in [
        ("h_minus.dot", &learned.h_minus),
        ("h_plus.dot", &learned.h_plus),
        ("h_star.dot", &learned.h_star),
    ] {
        let path = args.out_dir.join(name);
        if let Err(err) = dot::store(hypothesis, &path) {
            error!(path = %path.display(), %err, "cannot write hypothesis");
            return ExitCode::FAILURE;
        }
        info!(path = %path.display(), states = hypothesis.size(), "wrote hypothesis");
    }
    println!("{}", learned.info);
    ExitCode::SUCCESS
}
