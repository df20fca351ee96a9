//! ═══════════════════════════════════════════════════════════════════════════════
//! VARFLIP — Entry Point
//! ═══════════════════════════════════════════════════════════════════════════════
//! Single binary, subcommand dispatch. Attacks read JSON Lines and append
//! one JSON Lines record per processed example.
//! ═══════════════════════════════════════════════════════════════════════════════

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use varflip::attack::{DemoExample, MhmAttacker};
use varflip::export::jsonl::read_jsonl;
use varflip::export::{AttackInput, AttackRecord, JsonlSink};
use varflip::program::{PositionMap, Program};
use varflip::{
    AttackConfig, AttackEnv, AttackMethod, AttackResult, CandidateSource, DemoAttacker,
    GeneticAttacker, GreedyAttacker, IdentifierExtractor, Language, SuccessCriterion, Vocabulary,
};

/// Success ratio for generation oracles when the config asks for label flips
const DEFAULT_SCORE_RATIO: f64 = 0.5;

#[derive(Parser)]
#[command(name = "varflip")]
#[command(about = "Identifier-renaming adversarial attacks on code models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Attack every program of a JSON Lines file
    Attack {
        /// Search strategy: greedy, ga, mhm, mhm-random
        #[arg(short, long, default_value = "greedy")]
        method: AttackMethod,

        /// Input JSON Lines ({"code", "label", "substitutes"} per line)
        #[arg(short, long)]
        input: PathBuf,

        /// Oracle endpoint (overrides config)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Append one result record per example here
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Random seed (overrides config)
        #[arg(short, long)]
        seed: Option<u64>,
    },

    /// Attack in-context demonstrations of a generation model
    Demo {
        /// Input JSON Lines ({"query", "reference", "demos"} per line)
        #[arg(short, long)]
        input: PathBuf,

        /// Oracle endpoint (overrides config)
        #[arg(short, long)]
        endpoint: Option<String>,

        /// JSON config file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Adversarial demonstrations output
        #[arg(long, default_value = "adv_demo.jsonl")]
        demo_out: PathBuf,

        /// Model answers output
        #[arg(long, default_value = "adv_answer.jsonl")]
        answer_out: PathBuf,
    },

    /// Show the attackable identifiers of a source file
    Inspect {
        /// Source file
        file: PathBuf,

        /// Source language: c, cpp, java
        #[arg(short, long, default_value = "c")]
        language: Language,
    },

    /// Write the effective configuration as JSON
    Config {
        /// Destination path
        #[arg(short, long)]
        write: PathBuf,

        /// Start from this config instead of defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Attack {
            method,
            input,
            endpoint,
            config,
            output,
            seed,
        } => run_attack(method, &input, endpoint.as_deref(), config.as_deref(), output, seed),
        Commands::Demo {
            input,
            endpoint,
            config,
            demo_out,
            answer_out,
        } => run_demo(&input, endpoint.as_deref(), config.as_deref(), demo_out, answer_out),
        Commands::Inspect { file, language } => run_inspect(&file, language),
        Commands::Config { write, config } => {
            let config = AttackConfig::load(config.as_deref()).context("loading config")?;
            config
                .save(&write)
                .with_context(|| format!("writing {}", write.display()))?;
            println!("Config written to {}", write.display());
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<AttackConfig> {
    AttackConfig::load(path).with_context(|| match path {
        Some(p) => format!("loading config {}", p.display()),
        None => "loading default config".to_string(),
    })
}

fn run_attack(
    method: AttackMethod,
    input: &Path,
    endpoint: Option<&str>,
    config_path: Option<&Path>,
    output: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(seed) = seed {
        config.seed = seed;
    }
    let inputs: Vec<AttackInput> =
        read_jsonl(input).with_context(|| format!("reading {}", input.display()))?;

    let oracle = config.http_oracle(endpoint)?;
    let features = config.feature_builder();
    let extractor = config.language.extractor();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let sink = output.map(JsonlSink::new);

    let programs: Vec<Program> = inputs.iter().map(|i| Program::parse(&i.code)).collect();
    let vocabulary = Vocabulary::from_programs(programs.iter());

    info!(
        method = %method,
        examples = inputs.len(),
        oracle = %varflip::Oracle::describe(&oracle),
        seed = config.seed,
        "attack run start"
    );

    let mut tally: BTreeMap<i8, usize> = BTreeMap::new();
    for (input, program) in inputs.iter().zip(programs.iter()) {
        let table = input.substitutes.sanitize(program, &extractor);
        let env = AttackEnv::new(&oracle, &features, config.success);

        let result: AttackResult = match method {
            AttackMethod::Greedy => GreedyAttacker::new(env).attack(program, &table, input.label)?,
            AttackMethod::Ga => GeneticAttacker::new(env, config.genetic.clone(), config.batch_size)
                .attack(program, &table, input.label, None, &mut rng)?,
            AttackMethod::Mhm | AttackMethod::MhmRandom => {
                let source = if method == AttackMethod::Mhm {
                    CandidateSource::Substitutes
                } else {
                    CandidateSource::Vocabulary(&vocabulary)
                };
                MhmAttacker::new(env, config.mhm.clone(), Box::new(config.language.extractor()))
                    .attack(program, &table, input.label, source, &mut rng)?
            }
            AttackMethod::Demo => {
                anyhow::bail!("use `varflip demo` for demonstration attacks");
            }
        };

        *tally.entry(result.outcome.code()).or_default() += 1;
        println!(
            "[{}] {} changed_var={} changed_pos={}",
            input.id.as_deref().unwrap_or("-"),
            result.outcome,
            result.nb_changed_var,
            result.nb_changed_pos
        );

        if let Some(sink) = &sink {
            sink.append(&AttackRecord::new(input.id.clone(), result))
                .with_context(|| format!("appending to {}", sink.path().display()))?;
        }
    }

    println!();
    println!("Outcomes:");
    for (code, count) in &tally {
        println!("  {:>3}: {}", code, count);
    }
    let succeeded = tally.get(&1).copied().unwrap_or(0);
    let attempted: usize = tally
        .iter()
        .filter(|(code, _)| **code == 1 || **code == -1)
        .map(|(_, n)| n)
        .sum();
    if attempted > 0 {
        println!(
            "  success rate: {:.1}% ({}/{})",
            100.0 * succeeded as f64 / attempted as f64,
            succeeded,
            attempted
        );
    }
    Ok(())
}

fn run_demo(
    input: &Path,
    endpoint: Option<&str>,
    config_path: Option<&Path>,
    demo_out: PathBuf,
    answer_out: PathBuf,
) -> Result<()> {
    let config = load_config(config_path)?;
    let examples: Vec<DemoExample> =
        read_jsonl(input).with_context(|| format!("reading {}", input.display()))?;

    let oracle = config.http_oracle(endpoint)?;
    let features = config.feature_builder();
    let success = match config.success {
        SuccessCriterion::LabelFlip => {
            warn!("label flips are meaningless for demonstrations; using a score ratio");
            SuccessCriterion::ScoreRatio {
                ratio: DEFAULT_SCORE_RATIO,
            }
        }
        other => other,
    };
    let attacker = DemoAttacker::new(
        AttackEnv::new(&oracle, &features, success),
        JsonlSink::new(demo_out),
        JsonlSink::new(answer_out),
    );

    for (i, example) in examples.iter().enumerate() {
        let result = attacker.attack(example)?;
        println!(
            "[{}] {} changed_var={} changed_pos={}",
            i, result.outcome, result.nb_changed_var, result.nb_changed_pos
        );
    }
    Ok(())
}

fn run_inspect(file: &Path, language: Language) -> Result<()> {
    let source =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let program = Program::parse(&source);
    let extractor = language.extractor();
    let identifiers = extractor.extract(&program);
    let positions = PositionMap::build(&program.words(), &identifiers);

    println!("\x1b[36m═══════════════════════════════════════════════════════════════\x1b[0m");
    println!("\x1b[36m {} ({}, {} tokens)\x1b[0m", file.display(), language, program.len());
    println!("\x1b[36m═══════════════════════════════════════════════════════════════\x1b[0m");
    for (name, occ) in positions.iter() {
        println!("  {:<24} {:?}", name, occ);
    }
    Ok(())
}
