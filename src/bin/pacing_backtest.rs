use std::path::PathBuf;

use clap::Parser;
use pacing_backtest::{
    backtest_config_from_env, init_logging, logging_config_from_env, parse_experiment,
    render_report, run_backtest, ExperimentName, KeyedTableEnrichment, SeriesEnrichment,
};

/// Scores a pacing forecast backtest against ground truth.
#[derive(Parser, Debug)]
#[command(name = "pacing_backtest", version, about)]
struct Args {
    /// Experiment to evaluate (cg, volatility, electricity, traffic, favorita).
    #[arg(default_value = "cg", value_parser = parse_experiment)]
    experiment: ExperimentName,

    /// Root folder holding `data/<experiment>/` and receiving `results/<experiment>/`.
    #[arg(default_value = ".")]
    output_folder: PathBuf,

    /// CSV keyed on campaign_id and date whose other columns are appended to the results.
    #[arg(long = "enrich", value_name = "PATH")]
    enrich: Vec<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let config = backtest_config_from_env(args.experiment, &args.output_folder);

    let tables = args
        .enrich
        .iter()
        .map(|path| KeyedTableEnrichment::from_path(path))
        .collect::<Result<Vec<_>, _>>()?;
    let enrichments: Vec<&dyn SeriesEnrichment> = tables
        .iter()
        .map(|table| table as &dyn SeriesEnrichment)
        .collect();

    let run = run_backtest(&config, &enrichments)?;

    print!("{}", render_report(&run.report));
    println!("Results written to {}", run.results_path.display());

    Ok(())
}
