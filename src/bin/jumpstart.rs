use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chromium_jumpstart::host_deps::host_dependencies;
use chromium_jumpstart::preflight;
use chromium_jumpstart::process::shell_quote;
use chromium_jumpstart::project::build_dir_name;
use chromium_jumpstart::tools::DepotToolsSource;
use chromium_jumpstart::{
    run_init, AcquisitionMethod, EnvironmentOutcome, InitReport, InitRequest, Operator,
    ProvisionSettings,
};
use clap::{Args, Parser, Subcommand};
use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "jumpstart")]
#[command(about = "Bootstrap a Chromium checkout and scaffold projects against it", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the Chromium checkout (once) and create a new project
    Init(InitArgs),
}

#[derive(Args)]
struct InitArgs {
    /// Project name; prompted for when omitted
    #[arg(long)]
    name: Option<String>,

    /// Directory that receives the project [default: current directory]
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Where the Chromium source lives [default: ~/chromium_src]
    #[arg(long)]
    install_path: Option<PathBuf>,

    /// Plain `git clone` instead of depot_tools `fetch` + `gclient sync`
    #[arg(long)]
    direct_clone: bool,

    /// Start from this configuration file instead of the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Do not install OS build dependencies
    #[arg(long)]
    skip_os_deps: bool,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let Commands::Init(args) = cli.command;

    let method = if args.direct_clone {
        AcquisitionMethod::DirectClone
    } else {
        AcquisitionMethod::ToolingFetch
    };
    let settings = match ProvisionSettings::from_env(args.install_path.clone(), method) {
        Ok(settings) => settings,
        Err(err) => {
            report_failure(&err, None);
            return ExitCode::FAILURE;
        }
    };

    match init(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report_failure(&err, Some(&settings));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chromium_jumpstart=info,jumpstart=info".into()),
        )
        .init();
}

fn init(args: &InitArgs, settings: &ProvisionSettings) -> Result<()> {
    preflight::check_host_tools()?;

    let parent_dir = match &args.dir {
        Some(dir) => dir.clone(),
        None => env::current_dir().context("Failed to read current directory")?,
    };
    let request = InitRequest {
        name: args.name.clone(),
        parent_dir,
        seed_config: args.config.clone(),
    };
    let host_deps = host_dependencies(args.skip_os_deps);

    println!();
    println!("{}", style("Setting up Chromium Jumpstart environment").bold());
    println!("  Source:   {}", settings.source_dir.display());
    println!("  Tools:    {}", settings.depot_tools_dir.display());
    println!("  Logs:     {}", settings.log_dir.display());
    println!();

    let mut operator = TerminalOperator::new();
    let result = run_init(&request, settings, host_deps.as_ref(), &mut operator);
    operator.end_progress();

    print_summary(&result?);
    Ok(())
}

fn print_summary(report: &InitReport) {
    let scaffold = &report.scaffold;

    let tools_origin = match report.depot_tools.source {
        DepotToolsSource::Configured => "configured",
        DepotToolsSource::SystemPath => "found in PATH",
        DepotToolsSource::ClonedNow => "cloned now",
    };

    println!();
    println!(
        "  depot_tools: {} ({tools_origin})",
        report.depot_tools.dir.display()
    );
    match report.environment {
        EnvironmentOutcome::AlreadyProvisioned => {
            println!("  Chromium source already provisioned, skipped download")
        }
        EnvironmentOutcome::ProvisionedNow { attempts } => {
            println!("  Chromium source provisioned ({attempts} attempt(s))")
        }
    }
    if !report.build_files_generated {
        println!(
            "  {} build files not generated; run gn gen yourself",
            style("warning:").yellow().bold()
        );
    }
    println!();
    println!(
        "{}",
        style(format!("Project '{}' is ready!", scaffold.name))
            .green()
            .bold()
    );
    println!(
        "  Navigate to the project: cd {}",
        scaffold.project_dir.display()
    );
    println!("  Modify your config:      {}", scaffold.config_path.display());
    println!(
        "  Start building:          cd {} && ninja -C {}",
        report.checkout.display(),
        build_dir_name(&scaffold.name)
    );
}

fn report_failure(err: &anyhow::Error, settings: Option<&ProvisionSettings>) {
    let retry = env::args()
        .map(|arg| {
            if arg.chars().any(char::is_whitespace) {
                shell_quote(&arg)
            } else {
                arg
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    eprintln!();
    eprintln!("{} {:#}", style("error:").red().bold(), err);
    if let Some(settings) = settings {
        eprintln!("  Fetch logs: {}", settings.log_dir.display());
    }
    eprintln!("  Re-run:     {}", retry);
}

/// Prompts and live progress on stderr, so stdout stays the summary.
struct TerminalOperator {
    term: Term,
    spinner: Option<ProgressBar>,
}

impl TerminalOperator {
    fn new() -> Self {
        Self {
            term: Term::stderr(),
            spinner: None,
        }
    }

    fn spinner(&mut self) -> &ProgressBar {
        self.spinner.get_or_insert_with(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(template) = ProgressStyle::with_template("{spinner:.cyan} [{elapsed}] {msg}")
            {
                bar.set_style(template);
            }
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }
}

impl Operator for TerminalOperator {
    fn ask(&mut self, question: &str) -> io::Result<String> {
        self.end_progress();
        self.term
            .write_str(&format!("{} ", style(question).bold()))?;
        Ok(self.term.read_line()?.trim().to_string())
    }

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        self.end_progress();
        loop {
            self.term
                .write_str(&format!("{} [y/N] ", style(question).bold()))?;
            match self.term.read_line()?.trim().to_ascii_lowercase().as_str() {
                "y" | "yes" => return Ok(true),
                "" | "n" | "no" => return Ok(false),
                _ => self.term.write_line("Please answer y or n.")?,
            }
        }
    }

    fn progress(&mut self, line: &str) {
        let width = usize::from(self.term.size().1).saturating_sub(20).max(20);
        let line = console::truncate_str(line, width, "...").into_owned();
        self.spinner().set_message(line);
    }

    fn end_progress(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }
}
