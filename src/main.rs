use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};

use rational_spacetime::denominators;
use rational_spacetime::persist;
use rational_spacetime::stats;
use rational_spacetime::{CellQuery, Dim, EngineConfig, IndexKind, Origin, TrajectoryAggregator};

#[derive(Debug, Parser)]
#[command(name = "rational-spacetime", version, about = "Aggregate rational trajectories into spacetime grids")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the rational set for a denominator and aggregate it.
    Run(RunArgs),
    /// Print the cells of a saved grid document.
    Inspect(InspectArgs),
    /// List the divisors of base^T - 1 and flag the special ones.
    Denominators(DenominatorArgs),
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Denominator n; every m in [0, n] is aggregated.
    #[arg(short, long)]
    number: u64,
    /// JSON config file; flags below override its values.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=3))]
    dim: Option<u8>,
    /// Cycle modulus T.
    #[arg(short = 'T', long)]
    period: Option<usize>,
    /// Last time step.
    #[arg(short, long)]
    max: Option<usize>,
    /// Grid backend: dense, lazy or octree.
    #[arg(long)]
    index: Option<IndexKind>,
    #[arg(long)]
    octree_depth: Option<usize>,
    /// Record which rationals visit every cell.
    #[arg(long)]
    track_rationals: bool,
    #[arg(short, long)]
    workers: Option<usize>,
    /// Treat n as special (boundary exclusion in the accumulators).
    #[arg(long, conflicts_with = "auto_special")]
    special: bool,
    /// Decide the special flag from n, dim and T.
    #[arg(long)]
    auto_special: bool,
    /// Time step every trajectory starts from.
    #[arg(long, default_value_t = 0)]
    origin_time: usize,
    /// Where to write the grid document.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct InspectArgs {
    file: PathBuf,
    /// Only print the cells of this time step.
    #[arg(short, long)]
    time: Option<usize>,
    /// Read the parity accumulators instead of the per-step grids.
    #[arg(short, long)]
    accumulate: bool,
    #[arg(long, default_value_t = IndexKind::Lazy)]
    index: IndexKind,
}

#[derive(Debug, Args)]
struct DenominatorArgs {
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(1..=3))]
    dim: u8,
    /// Cycle modulus T.
    #[arg(short = 'T', long)]
    period: u32,
    #[arg(long)]
    special_only: bool,
}

fn parse_dim(value: u8) -> Result<Dim> {
    Dim::try_from(value).map_err(anyhow::Error::msg)
}

fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_path(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(dim) = args.dim {
        config.dim = parse_dim(dim)?;
    }
    if let Some(period) = args.period {
        config.t_modulus = period;
    }
    if let Some(max) = args.max {
        config.max = max;
    }
    if let Some(index) = args.index {
        config.index = index;
    }
    if let Some(depth) = args.octree_depth {
        config.octree_depth = depth;
    }
    if args.track_rationals {
        config.track_rationals = true;
    }
    if args.workers.is_some() {
        config.workers = args.workers;
    }

    let special = if args.auto_special {
        let t = u32::try_from(config.t_modulus).context("T does not fit in 32 bits")?;
        denominators::is_special(config.dim, t, args.number)
    } else {
        args.special
    };

    log::info!(
        "n={} dim={} T={} max={} index={} special={special}",
        args.number,
        config.dim,
        config.t_modulus,
        config.max,
        config.index
    );
    let start = Instant::now();
    let mut aggregator = TrajectoryAggregator::new(config).context("invalid configuration")?;
    aggregator
        .set_rational_set(args.number, special)
        .context("building the rational set")?;
    aggregator
        .add_rational_set(special, Origin::new(args.origin_time, [0.0; 3]))
        .context("aggregating trajectories")?;
    log::info!("done in {:.2?}", start.elapsed());

    println!("per-step grids:");
    for summary in stats::summarize(&aggregator, false) {
        println!("  {summary}");
    }
    println!("accumulators:");
    for t in [0, 1].into_iter().filter(|&t| t <= aggregator.len()) {
        println!("  {}", stats::summarize_step(&aggregator, t, true));
    }

    if let Some(path) = &args.output {
        aggregator
            .save_to_path(path)
            .with_context(|| format!("writing {}", path.display()))?;
        log::info!("grid document written to {}", path.display());
    }
    Ok(())
}

fn inspect(args: InspectArgs) -> Result<()> {
    let document = persist::load_from_path(&args.file)
        .with_context(|| format!("reading {}", args.file.display()))?;
    let config = EngineConfig::default().with_index(args.index);
    let space = persist::load(&document, &config).context("invalid grid document")?;

    println!(
        "dim={} n={} special={} T={} max={}",
        document.dim, document.num, document.special, document.t_modulus, document.max
    );
    match args.time {
        Some(t) => {
            if t > space.len() {
                bail!("time step {t} is beyond max={}", space.len());
            }
            for cell in space.get_cells(t, args.accumulate) {
                println!(
                    "  pos={:?} count={} time={:.4} next_digits={:?}",
                    cell.pos, cell.count, cell.time, cell.next_digits
                );
                for family in cell.rationals.iter().flatten() {
                    println!(
                        "    family {} m={:?} count={} time={}",
                        family.digits, family.members, family.count, family.time
                    );
                }
            }
        }
        None => {
            for summary in stats::summarize(&space, args.accumulate) {
                println!("  {summary}");
            }
        }
    }
    Ok(())
}

fn list_denominators(args: DenominatorArgs) -> Result<()> {
    let dim = parse_dim(args.dim)?;
    let entries = denominators::catalog(dim, args.period).context("building the catalog")?;
    println!("{:>20} {:>6} {:>6} {:>8}  factors", "n", "period", "prime", "special");
    for entry in entries.iter().filter(|e| e.special || !args.special_only) {
        let factors: Vec<String> = entry
            .factors
            .iter()
            .map(|&(p, e)| if e == 1 { p.to_string() } else { format!("{p}^{e}") })
            .collect();
        println!(
            "{:>20} {:>6} {:>6} {:>8}  {}",
            entry.n,
            entry.period,
            entry.prime,
            entry.special,
            factors.join(" * ")
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run(args),
        Command::Inspect(args) => inspect(args),
        Command::Denominators(args) => list_denominators(args),
    }
}
