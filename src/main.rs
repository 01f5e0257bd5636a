#![deny(clippy::all)]

use std::fs::read_to_string;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};

use groac::counting::ActionsCounter;
use groac::encoder::{Encoder, EncodingMode};
use groac::pipeline::Pipeline;
use groac::solver::{CancelToken, Solver};
use groac::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
enum Encoding {
    /// Enforce preconditions directly against the chosen parameter values.
    #[default]
    Extensional,
    /// Re-guess every precondition occurrence through a choice rule.
    Choices,
    /// Guess/check pairs with symmetry breaking between identical occurrences.
    Parity,
}

impl From<Encoding> for EncodingMode {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Extensional => EncodingMode::Extensional,
            Encoding::Choices => EncodingMode::ChoiceGuess,
            Encoding::Parity => EncodingMode::GuessCheckParity,
        }
    }
}

/// Count the number of ground actions a full grounding would produce,
/// without executing that grounding.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the problem instance file.
    #[arg(short, long)]
    instance: PathBuf,
    /// Path to the domain file; deduced from the instance path when absent.
    #[arg(long)]
    domain: Option<PathBuf>,
    /// Model output file.
    #[arg(short, long, default_value = "output.model")]
    model_output: PathBuf,
    /// Theory output file.
    #[arg(short, long, default_value = "output.theory")]
    theory_output: PathBuf,
    /// Output file for the theory that keeps the action predicates.
    #[arg(long, default_value = "output-with-actions.theory")]
    theory_with_actions_output: PathBuf,
    /// Remove model and theory files after a successful run.
    #[arg(short, long)]
    remove_files: bool,
    /// Ask the translator to add inequalities to the rules.
    #[arg(long)]
    inequality_rules: bool,
    /// Encoding used for the per-schema counting programs.
    #[arg(short, long, value_enum, default_value_t = Encoding::Extensional)]
    encoding: Encoding,
    /// Log every counted ground action.
    #[arg(short, long)]
    output: bool,
    /// Per-schema bound on counted actions; 0 counts them all, anything
    /// else degrades the total to a lower bound.
    #[arg(short, long, default_value_t = 0)]
    bound: u64,
    /// Quickly estimate instead of counting exactly (might underestimate).
    #[arg(long)]
    greedy: bool,
    /// Number of schemas counted concurrently.
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,
    /// Counter binary; `--greedy` switches to its `_nopp` variant.
    #[arg(long, default_value = "lpcnt")]
    counter: PathBuf,
    /// PDDL-to-logic-program translator binary.
    #[arg(long, default_value = "pddl_to_prolog.py")]
    translator: PathBuf,
    /// Grounder binary.
    #[arg(long, default_value = "gringo")]
    grounder: PathBuf,
    /// Rule optimizer binary; defaults to $LPOPT_BIN_PATH.
    #[arg(long)]
    lpopt: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    anyhow::ensure!(
        args.instance.is_file(),
        "instance file {} does not exist",
        args.instance.display()
    );
    let domain = match &args.domain {
        Some(domain) => domain.clone(),
        None => utils::find_domain_filename(&args.instance)
            .context("could not find a domain file matching the instance file")?,
    };
    anyhow::ensure!(
        domain.is_file(),
        "domain file {} does not exist",
        domain.display()
    );
    anyhow::ensure!(
        !(args.greedy && args.bound != 0),
        "--greedy only works with bound 0 (i.e., no bound)"
    );

    let counter_bin = if args.greedy {
        let mut name = args.counter.as_os_str().to_owned();
        name.push("_nopp");
        PathBuf::from(name)
    } else {
        args.counter.clone()
    };

    if args.jobs > 1 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(args.jobs)
            .build_global()
            .context("could not size the worker pool")?;
    }

    let pipeline = Pipeline::new(
        args.translator.clone(),
        args.lpopt.clone(),
        args.grounder.clone(),
    )?;
    pipeline.translate(
        &domain,
        &args.instance,
        &args.theory_output,
        &args.theory_with_actions_output,
        args.inequality_rules,
    )?;
    pipeline.optimize(&args.theory_output)?;
    pipeline.ground(&args.theory_output, &args.model_output)?;

    // interrupts must take the whole counter brood down with them
    let cancel = CancelToken::new();
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("could not install signal handlers")?;
    {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                cancel.cancel();
                std::process::exit(1);
            }
        });
    }

    let facts = read_to_string(&args.model_output)
        .with_context(|| format!("could not read model {}", args.model_output.display()))?;
    let theory = read_to_string(&args.theory_with_actions_output).with_context(|| {
        format!(
            "could not read theory {}",
            args.theory_with_actions_output.display()
        )
    })?;

    let mode = EncodingMode::from(args.encoding);
    let actions = ActionsCounter::new(
        facts,
        theory,
        Encoder::new(mode, args.output),
        Solver::new(
            counter_bin,
            // the greedy variant takes no bound argument at all
            (!args.greedy).then_some(args.bound),
            args.output,
            mode == EncodingMode::Extensional,
        ),
    );
    let aggregate = actions.count_actions(args.jobs, &cancel)?;
    tracing::info!("# of actions: {aggregate}");

    // bounded runs keep the intermediate files around for inspection
    if aggregate.bounded {
        std::process::exit(groac::BOUNDED_EXIT);
    }

    if args.remove_files {
        tracing::info!("removing intermediate files");
        for path in [
            &args.model_output,
            &args.theory_output,
            &args.theory_with_actions_output,
        ] {
            utils::silent_remove(path);
        }
    }
    tracing::info!("done");
    Ok(())
}
