use anyhow::Context;
use at_engine::logging::init_logging;
use at_engine::{
    load_tasks, write_report, EvaluatorConfig, FileSink, Generator, GeneratorConfig, SearchConfig,
    SearchDriver, Toolchain,
};
use at_optimizer::{
    build_sampler, DistanceMetric, LossFunction, SamplerConfig, DEFAULT_REGULARIZATION,
};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info;

#[derive(Parser)]
#[command(name = "autotest", about = "Goal-directed test generation")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search for inputs hitting every target in the tests file
    Run(RunArgs),

    /// Run the generator once and print the parameters it declares
    Discover(DiscoverArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Compiler command used for C/C++ sources
    #[arg(long, default_value = "g++ -std=c++11 -O2")]
    compile_command: String,

    /// Directory for compiled executables
    #[arg(long, default_value = ".autotest-build")]
    build_dir: PathBuf,
}

#[derive(Args)]
struct RunArgs {
    /// Generator source or executable
    #[arg(long, default_value = "gen.cpp")]
    generator: PathBuf,

    /// Model solution source or executable
    #[arg(long, default_value = "sol.cpp")]
    solution: PathBuf,

    /// Task table
    #[arg(long, default_value = "tests.txt")]
    tests: PathBuf,

    /// Generator calls per task
    #[arg(short = 'n', long, default_value_t = 50)]
    n_iterations: usize,

    #[arg(long, default_value = "out")]
    output_dir: PathBuf,

    #[arg(long, default_value = "{name}.in")]
    in_pattern: String,

    #[arg(long, default_value = "{name}.ok")]
    ans_pattern: String,

    /// Sampling strategy: tpe or random
    #[arg(long, default_value = "tpe")]
    sampler: String,

    /// RNG seed for reproducible runs
    #[arg(long)]
    seed: Option<u64>,

    /// Distance between outputs and targets: absolute or squared
    #[arg(long, default_value = "absolute")]
    distance: DistanceMetric,

    /// Weight of the L2 penalty on sampled float parameters
    #[arg(long, default_value_t = DEFAULT_REGULARIZATION)]
    regularization: f64,

    /// Solution wall-clock limit
    #[arg(long, default_value_t = 10)]
    timeout_secs: u64,

    /// Write a JSON summary of the run here
    #[arg(long)]
    report: Option<PathBuf>,

    #[command(flatten)]
    build: BuildArgs,
}

#[derive(Args)]
struct DiscoverArgs {
    /// Generator source or executable
    #[arg(long, default_value = "gen.cpp")]
    generator: PathBuf,

    #[arg(long)]
    seed: Option<u64>,

    #[command(flatten)]
    build: BuildArgs,
}

async fn prepare(build: &BuildArgs, path: &Path) -> anyhow::Result<PathBuf> {
    let toolchain = Toolchain::from_command_line(&build.compile_command)?;
    let exe = toolchain
        .prepare(path, &build.build_dir)
        .await
        .with_context(|| format!("preparing {}", path.display()))?;
    Ok(exe)
}

fn clean_build_dir(build: &BuildArgs) {
    if build.build_dir.exists() {
        info!("Cleaning up...");
        if let Err(e) = std::fs::remove_dir_all(&build.build_dir) {
            tracing::warn!("Failed to remove {}: {}", build.build_dir.display(), e);
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let tasks =
        load_tasks(&args.tests).with_context(|| format!("reading {}", args.tests.display()))?;
    let generator = prepare(&args.build, &args.generator).await?;
    let solution = prepare(&args.build, &args.solution).await?;

    let sampler_config = SamplerConfig::new(&args.sampler).with_seed(args.seed);
    let mut sampler = build_sampler(&sampler_config)?;
    info!("Using {} sampler", sampler.name());

    let driver = SearchDriver::new(
        GeneratorConfig::new(generator),
        EvaluatorConfig::new(solution).with_timeout_ms(args.timeout_secs * 1000),
        SearchConfig::default()
            .with_iterations(args.n_iterations)
            .with_loss(LossFunction::new(args.distance, args.regularization)),
    );
    let mut sink =
        FileSink::new(&args.output_dir).with_patterns(&args.in_pattern, &args.ans_pattern);

    let started = Instant::now();
    let mut statuses = Vec::with_capacity(tasks.len());
    let outcome = driver
        .run_into(&tasks, sampler.as_mut(), &mut sink, &mut statuses)
        .await;

    // The report also covers the task that aborted the run.
    if let Some(path) = &args.report {
        write_report(path, &statuses)?;
    }
    outcome?;

    info!(
        "Generated {} tests in {:.3} s ({} trials, {} parameters)",
        statuses.len(),
        started.elapsed().as_secs_f64(),
        sampler.context().history.len(),
        sampler.context().registry.len()
    );
    clean_build_dir(&args.build);
    info!("Done!");
    Ok(())
}

async fn discover(args: DiscoverArgs) -> anyhow::Result<()> {
    let generator = prepare(&args.build, &args.generator).await?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let (registry, feed) = Generator::new(GeneratorConfig::new(generator))
        .discover(&mut rng)
        .await?;
    info!("Generator declared {} parameters", registry.len());

    let report = serde_json::json!({
        "parameters": registry.iter().collect::<Vec<_>>(),
        "sample": feed,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    clean_build_dir(&args.build);
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Discover(args) => discover(args).await,
    }
}
