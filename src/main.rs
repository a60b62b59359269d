//! # Sweep Bench - Main Entry Point
//!
//! Drives the three stages around an external benchmark run:
//!
//! 1. **plan**: enumerate iterations and print the program arguments of each
//! 2. **analyze**: turn each trial folder's logs into a per-trial CSV row
//! 3. **summarize**: reduce the per-trial CSV to one knee row per configuration
//!
//! ## Error Handling
//!
//! Everything below `main` returns `anyhow::Result`. Iterations with missing
//! or malformed logs are skipped with a warning inside the analysis. Any
//! error that reaches `main` is logged and the process exits with code 1.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use sweep_bench::{
    cli::{Args, Command, ExpType, ExperimentArgs},
    logging::init_logging,
    space::KvTraces,
    AnalysisConfig, Iteration, IterationSpace, MachineConfig, PlanEntry, ResultsManager,
    RunContext, SummaryAnalyzer, SweepTables, TrialAnalyzer, TrialTable,
};
use tracing::{debug, error, info};

fn main() {
    let args = Args::parse();

    // Held until exit so the file writer flushes.
    let _guard = match init_logging(args.verbose, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            std::process::exit(1);
        }
    };

    info!("Starting sweep-bench {}", sweep_bench::VERSION);
    debug!("Configuration: {:?}", args);

    if let Err(e) = run(args.command) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Plan { experiment, time } => plan(&experiment, time),
        Command::Analyze {
            experiment,
            output,
            strip_threshold,
            print_stats,
        } => analyze(&experiment, &output, strip_threshold, print_stats),
        Command::Summarize {
            folder,
            input,
            output,
            saturation_threshold,
        } => summarize(&folder, &input, &output, saturation_threshold),
    }
}

/// Everything needed to enumerate the iterations of an experiment.
struct Setup {
    machine: MachineConfig,
    space: IterationSpace,
    traces: Option<KvTraces>,
}

impl Setup {
    fn load(args: &ExperimentArgs) -> Result<Self> {
        let machine = MachineConfig::from_file(&args.config)?;
        let tables = match &args.sweep_config {
            Some(path) => SweepTables::from_file(path)?,
            None => SweepTables::default(),
        };
        let space = IterationSpace::new(args.experiment, tables, machine.max_clients);
        Ok(Self {
            machine,
            space,
            traces: args.kv_traces(),
        })
    }

    fn iterations<'a>(&'a self, args: &ExperimentArgs) -> Result<Box<dyn Iterator<Item = Iteration> + 'a>> {
        match args.exp_type {
            ExpType::Individual => {
                let request = args.individual.request(args.experiment)?;
                let iterations = self
                    .space
                    .individual(request, &args.folder, args.analysis_only)?;
                Ok(Box::new(iterations.into_iter()))
            }
            ExpType::Sweep => {
                info!(
                    "Enumerating {} sweep over {:?}",
                    self.space.kind(),
                    args.looping_variable
                );
                Ok(self
                    .space
                    .sweep(args.looping_variable, self.traces.as_ref())?)
            }
        }
    }
}

fn plan(args: &ExperimentArgs, time: u64) -> Result<()> {
    let setup = Setup::load(args)?;
    let ctx = RunContext::new(&setup.machine, &args.folder, time)?;
    let mut count = 0;
    for iteration in setup.iterations(args)? {
        let entry = PlanEntry::new(&iteration, &ctx)?;
        println!("{}", serde_json::to_string(&entry)?);
        count += 1;
    }
    info!("Planned {} iterations", count);
    Ok(())
}

fn analyze(args: &ExperimentArgs, output: &Path, strip_threshold: f64, print_stats: bool) -> Result<()> {
    let setup = Setup::load(args)?;
    let config = AnalysisConfig::new(strip_threshold, sweep_bench::defaults::SATURATION_THRESHOLD)?;
    let analyzer = TrialAnalyzer::new(&config, setup.machine.client_hosts.clone(), print_stats);

    let iterations: Vec<Iteration> = setup.iterations(args)?.collect();
    let rows = analyzer.analyze_all(&args.folder, &iterations)?;
    let table = TrialTable::from_rows(args.experiment.axis_names(), &rows)?;

    let results = ResultsManager::new(&args.folder, output, Path::new(sweep_bench::defaults::SUMMARY_FILE));
    results
        .write_trials(&table)
        .with_context(|| format!("writing {:?}", results.trials_file()))
}

fn summarize(folder: &Path, input: &Path, output: &Path, saturation_threshold: f64) -> Result<()> {
    let config = AnalysisConfig::new(sweep_bench::defaults::STRIP_THRESHOLD, saturation_threshold)?;
    let results = ResultsManager::new(folder, input, output);
    let trials = results
        .read_trials()
        .with_context(|| format!("reading {:?}", results.trials_file()))?;
    info!(
        "Summarising {} trial rows over {} axes",
        trials.records.len(),
        trials.axis_names.len()
    );
    let summary = SummaryAnalyzer::new(config.saturation_threshold).summarize(&trials);
    results.write_summary(&summary)
}
