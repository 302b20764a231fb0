use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use retype::cadence::CadenceConfig;
use retype::inject::EnigoInjector;
use retype::llm::{GeneratedSolution, SolutionSource};
use retype::normalize::{normalize, TextKind};
use retype::session::{SessionEvent, StartOutcome, Typist, DEFAULT_COUNTDOWN_SECS};

const DEFAULT_LLM_MODEL: &str = retype::llm::openrouter::DEFAULT_MODEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    /// Normalize line endings, expand tabs, trim outer whitespace.
    Code,
    /// Normalize line endings, collapse whitespace and blank-line runs.
    Prose,
    /// Type the input exactly as read.
    Raw,
}

impl FormatArg {
    fn apply(self, text: &str) -> String {
        match self {
            FormatArg::Code => normalize(text, TextKind::Code),
            FormatArg::Prose => normalize(text, TextKind::Prose),
            FormatArg::Raw => text.to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "retype")]
#[command(about = "Types text into the focused window with a human cadence", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Type text from a file into the currently focused window
    Type {
        /// Input text file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        input: PathBuf,

        /// Cleanup applied to the text before typing.
        ///
        /// - code: normalize line endings, expand tabs, trim outer whitespace
        /// - prose: normalize line endings, collapse whitespace and blank-line runs
        /// - raw: type the input exactly as read
        #[arg(long, value_enum, default_value_t = FormatArg::Prose)]
        format: FormatArg,

        /// Countdown seconds before typing starts (0 starts immediately)
        #[arg(long, default_value_t = DEFAULT_COUNTDOWN_SECS)]
        countdown: u32,

        /// Minimum delay between ordinary characters, in milliseconds
        #[arg(long, default_value_t = 8)]
        min_delay: u64,

        /// Maximum delay between ordinary characters, in milliseconds
        #[arg(long, default_value_t = 28)]
        max_delay: u64,

        /// Optional RNG seed (for debugging)
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Ask a model to solve a problem, then type the solution
    Solution {
        /// Problem statement file, or '-' for stdin
        #[arg(long, value_name = "PATH")]
        problem: PathBuf,

        /// OpenRouter model name.
        ///
        /// Requires `--features llm` at build time and OPENROUTER_API_KEY.
        #[arg(long, default_value_t = DEFAULT_LLM_MODEL.to_string())]
        model: String,

        /// Countdown seconds before typing starts (0 starts immediately)
        #[arg(long, default_value_t = DEFAULT_COUNTDOWN_SECS)]
        countdown: u32,

        /// Optional RNG seed (for debugging)
        #[arg(long)]
        seed: Option<u64>,
    },
}

/// A solution that has already been fetched; typing it must not go back to
/// the network.
struct FetchedSolution {
    solution: GeneratedSolution,
}

impl SolutionSource for FetchedSolution {
    fn solution_text(&self) -> Result<Option<String>> {
        Ok(Some(self.solution.code.clone()))
    }
}

fn read_input(path: &PathBuf) -> Result<String> {
    if path.as_os_str() == std::ffi::OsStr::new("-") {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("failed to read stdin")?;
        return Ok(buf);
    }

    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn build_typist(
    cadence: CadenceConfig,
    countdown: u32,
    seed: Option<u64>,
) -> Result<Arc<Typist<EnigoInjector>>> {
    let injector = EnigoInjector::new().context("failed to initialize the keystroke backend")?;

    let mut typist = Typist::new(injector)
        .with_cadence(cadence)
        .with_countdown_secs(countdown);
    if let Some(seed) = seed {
        typist = typist.with_seed(seed);
    }

    Ok(Arc::new(typist))
}

fn install_cancel_handler(typist: &Arc<Typist<EnigoInjector>>) -> Result<()> {
    let typist = Arc::clone(typist);
    ctrlc::set_handler(move || {
        eprintln!("\nStopping...");
        typist.cancel_typing();
    })
    .context("failed to install the Ctrl+C handler")
}

/// Print countdown progress as it happens. Terminal outcomes are reported
/// from the start call's return value, so they are not echoed here.
fn spawn_event_printer(events: Receiver<SessionEvent>) {
    thread::spawn(move || {
        for event in events {
            match event {
                SessionEvent::Countdown { seconds_left } => eprintln!("{seconds_left}..."),
                SessionEvent::Started => eprintln!("0... typing!"),
                SessionEvent::Finished | SessionEvent::Cancelled => {}
            }
        }
    });
}

fn announce_start(countdown: u32) {
    if countdown > 0 {
        eprintln!("Focus the target window. Typing starts in {countdown}s...");
    } else {
        eprintln!("Typing into the focused window...");
    }
}

fn report_outcome(outcome: StartOutcome) {
    match outcome {
        StartOutcome::Completed { typed } => eprintln!("Done. {typed} characters typed."),
        StartOutcome::Cancelled { typed } => eprintln!("Cancelled after {typed} characters."),
        StartOutcome::Busy => eprintln!("Another typing session is already running."),
        StartOutcome::Empty => eprintln!("Nothing to type."),
    }
}

#[cfg(feature = "llm")]
fn fetch_solution(model: &str, problem: &str) -> Result<GeneratedSolution> {
    use retype::llm::openrouter::SolutionClient;

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async {
        let client = SolutionClient::from_env()?.with_model(model.to_string());
        client
            .generate_solution(problem)
            .await
            .context("OpenRouter solution request failed")
    })
}

#[cfg(not(feature = "llm"))]
fn fetch_solution(_model: &str, _problem: &str) -> Result<GeneratedSolution> {
    use anyhow::anyhow;

    Err(anyhow!("LLM support is disabled (build with --features llm)"))
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Command::Type {
            input,
            format,
            countdown,
            min_delay,
            max_delay,
            seed,
        } => {
            let text = format.apply(&read_input(&input)?);
            if text.is_empty() {
                eprintln!("Nothing to type.");
                return Ok(());
            }

            let cadence = CadenceConfig {
                min_delay_ms: min_delay,
                max_delay_ms: max_delay,
            };
            let typist = build_typist(cadence, countdown, seed)?;
            spawn_event_printer(typist.subscribe());
            install_cancel_handler(&typist)?;

            announce_start(countdown);
            let outcome = typist.start_typing_with_countdown(&text, countdown)?;
            report_outcome(outcome);
        }
        Command::Solution {
            problem,
            model,
            countdown,
            seed,
        } => {
            let problem_text = read_input(&problem)?;

            let typist = build_typist(CadenceConfig::default(), countdown, seed)?;
            spawn_event_printer(typist.subscribe());

            eprintln!("Requesting a solution from {model}...");
            let solution = fetch_solution(&model, &problem_text)?;
            eprintln!(
                "Solution received: {} lines of {}.",
                solution.code.lines().count(),
                solution.language
            );

            // Ctrl+C before this point aborts the process; from here on it
            // cancels the typing session instead.
            install_cancel_handler(&typist)?;

            announce_start(countdown);
            let outcome = typist.type_current_solution(&FetchedSolution { solution })?;
            report_outcome(outcome);
        }
    }

    Ok(())
}
