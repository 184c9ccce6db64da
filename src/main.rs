//! `offload` command line: add two random arrays on the selected device and
//! report the kernel execution time.

use std::process;

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;

use offload::host::{preview, random_array};
use offload::telemetry::{LogExporter, MetricsExporter};
use offload::{Config, Error, Pipeline, Result};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of elements per array.
    #[arg(value_name = "ELEMENTS")]
    elements: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    setup_logging();

    if let Err(err) = run(cli) {
        report(&err);
        process::exit(1);
    }
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::from_env()?;
    if let Some(n) = cli.elements {
        config.elements = n;
        config.validate()?;
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let a = random_array(config.elements, &mut rng);
    let b = random_array(config.elements, &mut rng);

    println!("{}", preview(&a, config.preview_threshold));
    println!("{}", preview(&b, config.preview_threshold));

    tracing::info!(
        elements = config.elements,
        bytes_per_buffer = config.buffer_bytes::<i32>(),
        "inputs generated"
    );

    let pipeline = Pipeline::new(&config)?;
    tracing::debug!(
        entry_points = ?pipeline.program().compiled().entry_points(),
        kernel = pipeline.kernel().name(),
        "program ready"
    );
    let report = pipeline.run(&a, &b)?;

    println!("{}", preview(&report.output, config.preview_threshold));
    println!("Kernel Execution Time: {:.6} ms", report.elapsed.as_millis_f64());
    tracing::info!(device = %report.device, windows = report.windows, "run complete");

    LogExporter.export(&pipeline.metrics().snapshot())?;
    if let Some(path) = &config.metrics_json {
        pipeline.export_metrics(path)?;
    }

    Ok(())
}

fn report(err: &Error) {
    eprintln!("error during {}: {}", err.stage(), err);
}
