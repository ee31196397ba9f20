use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::SeedableRng;
use rand::rngs::StdRng;

use mba_deobf::bitwise_table::BitwiseTable;
use mba_deobf::expr::{Expr, Width};
use mba_deobf::formatter::Formatter;
use mba_deobf::optimizer::{Optimizer, OptimizerConfig};
use mba_deobf::oracle::{MAX_CLASS_SIZE, NUM_TEST_VECTORS, OracleBuildConfig, build_oracle, compile_corpus};

#[derive(Parser)]
#[command(name = "mba", about = "Simplify mixed boolean-arithmetic expressions")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Parse a corpus of ExprOp(...) lines into a stream of encoded expressions
    Compile {
        corpus: PathBuf,
        output: PathBuf,
    },

    /// Fingerprint a compiled corpus and write an oracle file
    BuildOracle {
        input: PathBuf,
        output: PathBuf,

        /// Number of test vectors
        #[arg(long, default_value_t = NUM_TEST_VECTORS)]
        vectors: usize,

        /// Number of expressions kept per equivalence class
        #[arg(long, default_value_t = MAX_CLASS_SIZE)]
        class_size: usize,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Simplify an expression such as "(x & y) + (x | y)"
    Simplify {
        expr: String,

        /// Width of the variables and constants in bytes
        #[arg(long, default_value_t = 8)]
        width: u8,

        /// Oracle file built with build-oracle
        #[arg(long)]
        oracle: Option<PathBuf>,

        /// Timeout of z3 proofs in milliseconds, 0 disables them
        #[arg(long, default_value_t = 1000)]
        smt_timeout: u32,

        /// Reject candidates whose proof timed out
        #[arg(long)]
        distrust_timeouts: bool,

        /// Do not compute nonlinear normal forms
        #[arg(long)]
        no_nonlinear: bool,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, value_enum, default_value_t = OutputFormat::C)]
        format: OutputFormat,

        /// Maximum number of optimization passes
        #[arg(long, default_value_t = 8)]
        max_passes: usize,

        /// Print candidate statistics to stderr
        #[arg(long)]
        stats: bool,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// C expression
    C,
    /// SMT-LIB2 term
    Smt,
    /// C function taking the variables as parameters
    Function,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    match Cli::parse().command {
        Cmd::Compile { corpus, output } => {
            let input = File::open(&corpus)
                .with_context(|| format!("can not open {}", corpus.display()))?;
            let out = File::create(&output)
                .with_context(|| format!("can not create {}", output.display()))?;
            let n = compile_corpus(BufReader::new(input), &mut BufWriter::new(out))
                .with_context(|| format!("compiling {}", corpus.display()))?;
            log::info!("compiled {n} expressions into {}", output.display());
        },

        Cmd::BuildOracle { input, output, vectors, class_size, seed } => {
            let file = File::open(&input)
                .with_context(|| format!("can not open {}", input.display()))?;
            let out = File::create(&output)
                .with_context(|| format!("can not create {}", output.display()))?;
            let mut rng = match seed {
                Some(s) => StdRng::seed_from_u64(s),
                None => StdRng::from_rng(&mut rand::rng()),
            };
            let cfg = OracleBuildConfig { num_vectors: vectors, max_class_size: class_size };
            build_oracle(&mut BufReader::new(file), &mut BufWriter::new(out), &cfg, &mut rng)
                .with_context(|| format!("building oracle from {}", input.display()))?;
        },

        Cmd::Simplify {
            expr,
            width,
            oracle,
            smt_timeout,
            distrust_timeouts,
            no_nonlinear,
            seed,
            format,
            max_passes,
            stats,
        } => {
            let width = Width::from_bytes(width)
                .with_context(|| format!("invalid width {width}, expected 1, 2, 4 or 8"))?;
            let mut e = Expr::from_string(&expr, width)
                .with_context(|| format!("can not parse '{expr}'"))?;

            let config = OptimizerConfig {
                smt_timeout_ms: smt_timeout,
                trust_smt_timeouts: !distrust_timeouts,
                oracle_path: oracle,
                nonlinear: !no_nonlinear,
                seed,
                ..Default::default()
            };

            let table = BitwiseTable::new();
            let mut optimizer = Optimizer::new(config, &table);
            optimizer.optimize_to_fixpoint(&mut e, max_passes);

            match format {
                OutputFormat::C => println!("{e}"),
                OutputFormat::Smt => println!("{}", e.display(Formatter::SmtLib)),
                OutputFormat::Function => println!("{}", e.display_function("f")),
            }

            if stats {
                eprint!("{}", optimizer.stats());
            }
        },
    }

    Ok(())
}
