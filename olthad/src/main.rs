//! Command-line driver for the OLTHAD traversal engine.
//!
//! `olthad run` reads one environment snapshot per stdin line and prints the
//! skill invocation the engine decides on for each, until the root task
//! concludes. Prompts are answered by the command configured in
//! `.olthad/config.toml`.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;

use olthad::agents::{
    AgentName, DeliberationHooks, PreDeliberation, ProposedUpdate, RetryWarning,
};
use olthad::exit_codes;
use olthad::io::config::{OlthadConfig, load_config, write_config};
use olthad::io::deliberator::{ChunkHandler, CommandDeliberator};
use olthad::{Engine, EnvSnapshot};

const DEFAULT_CONFIG_PATH: &str = ".olthad/config.toml";

#[derive(Parser)]
#[command(
    name = "olthad",
    version,
    about = "Deliberative task-hierarchy traversal driven by environment snapshots"
)]
struct Cli {
    /// Log engine progress to stderr (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write `.olthad/config.toml` with default settings.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Pursue a root task, one stdin snapshot per step.
    Run {
        /// Root task text.
        #[arg(long)]
        task: String,

        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Show every proposed tree change and ask for approval on stdin.
        #[arg(long)]
        review: bool,

        /// File whose contents are added to every system prompt.
        #[arg(long)]
        context_file: Option<PathBuf>,

        /// Echo deliberator output to stderr as it arrives.
        #[arg(long)]
        stream: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    olthad::logging::init(cli.verbose);
    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Init { force } => {
            cmd_init(Path::new(DEFAULT_CONFIG_PATH), force)?;
            Ok(exit_codes::OK)
        }
        Command::Run {
            task,
            config,
            review,
            context_file,
            stream,
        } => {
            let domain_context = context_file
                .map(|path| {
                    fs::read_to_string(&path)
                        .with_context(|| format!("read {}", path.display()))
                })
                .transpose()?;
            cmd_run(RunArgs {
                task,
                config: &config,
                review,
                domain_context,
                stream,
            })
            .await
        }
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        eprintln!("{} already exists; pass --force to overwrite", path.display());
        return Ok(());
    }
    write_config(path, &OlthadConfig::default())
}

struct RunArgs<'a> {
    task: String,
    config: &'a Path,
    review: bool,
    domain_context: Option<String>,
    stream: bool,
}

type StdinLines = Arc<Mutex<Lines<BufReader<Stdin>>>>;

async fn cmd_run(args: RunArgs<'_>) -> Result<i32> {
    let config = load_config(args.config)?;
    let deliberator = CommandDeliberator::new(
        &config.deliberator.command,
        config.deliberator_output_limit_bytes,
    )?;
    let input: StdinLines = Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines()));
    let hooks = TerminalHooks {
        review: args.review,
        domain_context: args.domain_context,
        input: input.clone(),
    };

    let mut builder = Engine::builder(args.task, Arc::new(deliberator))
        .config(config)
        .hooks(Arc::new(hooks));
    if args.stream {
        let echo: ChunkHandler = Arc::new(|chunk: &str, index: Option<usize>| match index {
            Some(index) => eprint!("[{index}] {chunk}"),
            None => eprint!("{chunk}"),
        });
        builder = builder.chunk_handler(echo);
    }
    let mut engine = builder.build()?;

    loop {
        let line = input
            .lock()
            .await
            .next_line()
            .await
            .context("read snapshot from stdin")?;
        let Some(line) = line else {
            eprintln!("stdin closed before the root task concluded");
            return Ok(exit_codes::INPUT_CLOSED);
        };
        if line.trim().is_empty() {
            continue;
        }

        match engine
            .next_skill_invocation(EnvSnapshot::parse_lenient(&line))
            .await?
        {
            Some(skill) => {
                let mut stdout = std::io::stdout().lock();
                writeln!(stdout, "{skill}").context("write skill invocation")?;
                stdout.flush().context("flush stdout")?;
            }
            None => {
                eprintln!("root task concluded");
                eprintln!("{}", engine.render_tree());
                return Ok(exit_codes::OK);
            }
        }
    }
}

/// Hooks reporting to the terminal, with optional interactive review.
struct TerminalHooks {
    review: bool,
    domain_context: Option<String>,
    input: StdinLines,
}

#[async_trait]
impl DeliberationHooks for TerminalHooks {
    async fn before_deliberation(&self, event: PreDeliberation<'_>) {
        let node = event.current_node_id.unwrap_or("-");
        if event.n_samples > 1 {
            eprintln!("{} on {node} ({} samples)", event.agent, event.n_samples);
        } else {
            eprintln!("{} on {node}", event.agent);
        }
    }

    async fn on_retry(&self, warning: RetryWarning<'_>) {
        eprintln!(
            "{} sample {} attempt {}/{} failed: {}",
            warning.agent, warning.sample, warning.attempt, warning.max_tries, warning.error
        );
    }

    async fn approve(&self, proposal: ProposedUpdate<'_>) -> bool {
        if !self.review {
            return true;
        }
        eprintln!("{} proposes:", proposal.agent);
        for line in proposal.diff {
            eprintln!("{line}");
        }
        loop {
            eprint!("approve? [y/n] ");
            let answer = match self.input.lock().await.next_line().await {
                Ok(Some(answer)) => answer,
                // Nothing left to review with.
                Ok(None) | Err(_) => return true,
            };
            match answer.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => continue,
            }
        }
    }

    async fn domain_context(&self, _agent: AgentName) -> Option<String> {
        self.domain_context.clone()
    }
}
