//! ACE Governor command line
//!
//! Runs the monitor in the foreground, inspects processes and services, and
//! manages the configuration file. The tray shell lives in `tray_main.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use ace_governor::core::error::ConfigLoadError;
use ace_governor::{GovernorConfig, ServiceAction};

#[derive(Parser)]
#[command(name = "ace-governor")]
#[command(about = "Keeps anti-cheat helper processes on a short leash", long_about = None)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor continuously until Ctrl-C
    Run,

    /// Run a single cycle and print what it did
    Once,

    /// Show anti-cheat services and matching processes
    Status {
        #[arg(long)]
        json: bool,
    },

    /// Control an anti-cheat service
    Service {
        action: ServiceCommand,

        /// Service name, or `all` for every known service
        name: String,
    },

    /// Show the effective configuration
    Config {
        /// Write the default configuration if no file exists yet
        #[arg(long)]
        init: bool,
    },

    /// Launch the system tray icon
    Tray,
}

#[derive(Clone, Copy, ValueEnum)]
enum ServiceCommand {
    Start,
    Stop,
    Disable,
    Delete,
}

impl From<ServiceCommand> for ServiceAction {
    fn from(cmd: ServiceCommand) -> Self {
        match cmd {
            ServiceCommand::Start => ServiceAction::Start,
            ServiceCommand::Stop => ServiceAction::Stop,
            ServiceCommand::Disable => ServiceAction::Disable,
            ServiceCommand::Delete => ServiceAction::Delete,
        }
    }
}

impl Commands {
    /// The tray runs its own runtime next to the winit event loop, so only
    /// the foreground monitor is driven by one built here.
    fn needs_runtime(&self) -> bool {
        matches!(self, Commands::Run)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(GovernorConfig::default_path);

    let loaded = if config_path.exists() {
        Some(GovernorConfig::load(&config_path))
    } else {
        None
    };
    let config = match &loaded {
        Some(Ok(config)) => config.clone(),
        _ => GovernorConfig::default(),
    };

    init_logging(&config, cli.verbose)?;
    if let Some(Err(e)) = &loaded {
        warn!(path = %config_path.display(), error = %e, "Config unreadable, using defaults");
    }

    match cli.command {
        Commands::Config { init } => show_config(&config, &config_path, init, &loaded),
        command if command.needs_runtime() => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_monitor(config))
        }
        command => run_platform_command(command, config, &config_path),
    }
}

fn init_logging(config: &GovernorConfig, verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| e as Box<dyn std::error::Error>)
}

fn show_config(
    config: &GovernorConfig,
    path: &Path,
    init: bool,
    loaded: &Option<Result<GovernorConfig, ConfigLoadError>>,
) -> Result<(), Box<dyn std::error::Error>> {
    if init {
        if path.exists() {
            println!("Config already exists: {}", path.display());
        } else {
            GovernorConfig::default().save(path)?;
            println!("Wrote default config: {}", path.display());
        }
        return Ok(());
    }

    let source = match loaded {
        Some(Ok(_)) => path.display().to_string(),
        Some(Err(_)) => format!("defaults ({} is invalid)", path.display()),
        None => "defaults".to_string(),
    };
    println!("# Effective configuration from {}", source);
    println!("{}", toml::to_string_pretty(config)?);

    let (_, errors) = config.rule_set();
    for err in errors {
        println!("# skipped: {}", err);
    }
    Ok(())
}

#[cfg(not(windows))]
async fn run_monitor(_config: GovernorConfig) -> Result<(), Box<dyn std::error::Error>> {
    Err("this command requires Windows".into())
}

#[cfg(windows)]
async fn run_monitor(config: GovernorConfig) -> Result<(), Box<dyn std::error::Error>> {
    let _privileges = ace_governor::security::PrivilegeManager::acquire();
    ace_governor::windows::process::lower_own_priority();
    commands::run(&config, ace_governor::create_platform()).await
}

#[cfg(not(windows))]
fn run_platform_command(
    _command: Commands,
    _config: GovernorConfig,
    _path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    Err("this command requires Windows".into())
}

#[cfg(windows)]
fn run_platform_command(
    command: Commands,
    config: GovernorConfig,
    path: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    use ace_governor::create_platform;
    use ace_governor::security::PrivilegeManager;

    if let Commands::Tray = command {
        println!("Starting system tray icon...");
        return ace_governor::tray::TrayApp::new(config, path.to_path_buf()).run();
    }

    let privileges = PrivilegeManager::acquire();
    match command {
        Commands::Once => commands::once(&config, create_platform()),
        Commands::Status { json } => commands::status(&config, create_platform(), json),
        Commands::Service { action, name } => {
            if !privileges.can_control_services() {
                warn!("Service control usually needs an elevated prompt");
            }
            commands::service(&config, create_platform(), action.into(), &name)
        }
        Commands::Run | Commands::Tray | Commands::Config { .. } => Ok(()),
    }
}

#[cfg(windows)]
mod commands {
    use std::error::Error;
    use std::time::Instant;
    use tokio::sync::broadcast;
    use tracing::{info, warn};

    use ace_governor::monitor::ServiceOutcome;
    use ace_governor::{
        spawn_monitor, GovernorConfig, MonitorEvent, MonitorLoop, Platform, ServiceAction,
        ServiceController, ServiceDescriptor,
    };

    pub async fn run(config: &GovernorConfig, platform: Platform) -> Result<(), Box<dyn Error>> {
        let (handle, join) = spawn_monitor(config, platform);
        let mut events = handle.subscribe();
        if !config.enabled {
            handle.start().await?;
        }
        info!(interval_secs = config.poll_interval().as_secs(), "Monitoring, press Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => break,
                event = events.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => warn!(missed = n, "Event stream lagged"),
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }

        handle.stop().await?;
        handle.shutdown().await;
        join.await?;
        let snapshot = handle.snapshot();
        info!(
            cycles = snapshot.cycles,
            skipped = snapshot.skipped_cycles,
            dialogs_closed = snapshot.dialogs_closed,
            "Monitor stopped"
        );
        Ok(())
    }

    fn log_event(event: &MonitorEvent) {
        match event {
            MonitorEvent::ServiceActionResult {
                descriptor,
                action,
                outcome,
            } => info!(service = %descriptor.service_name, %action, outcome = ?outcome, "Service action"),
            MonitorEvent::CycleError { kind, detail } => warn!(%kind, %detail, "Cycle error"),
            // The loop already logs the rest with full context.
            _ => {}
        }
    }

    pub fn once(config: &GovernorConfig, platform: Platform) -> Result<(), Box<dyn Error>> {
        let (events, _) = broadcast::channel(64);
        let mut monitor = MonitorLoop::new(config, platform, events);
        monitor.start();
        let report = monitor.run_cycle(Instant::now())?;

        println!("Cycle complete:");
        println!("  Matched:    {}", report.matched);
        println!("  Applied:    {}", report.applied);
        println!("  Unchanged:  {}", report.unchanged);
        println!("  Partial:    {}", report.partial_failures);
        println!("  Dialogs:    {}", report.dialogs_closed);
        println!("  Trimmed:    {}", report.trimmed);
        println!("  Duration:   {} ms", report.duration.as_millis());

        for entry in monitor.snapshot(&[]).applied {
            let profile = entry
                .profile
                .map(|p| p.to_string())
                .unwrap_or_else(|| "not applied".into());
            println!("  {:>6}  {:<20} {}", entry.pid, entry.name, profile);
        }
        Ok(())
    }

    pub fn status(config: &GovernorConfig, mut platform: Platform, json: bool) -> Result<(), Box<dyn Error>> {
        let controller = ServiceController::new(platform.services.clone(), config.service_timeout());
        let services = controller.report_all();

        let (rules, _) = config.rule_set();
        let processes: Vec<(u32, String, String)> = platform
            .processes
            .snapshot(&|name| rules.contains(name))
            .records
            .into_iter()
            .filter_map(|record| {
                rules
                    .match_name(&record.name)
                    .map(|rule| (record.pid, record.name.clone(), rule.profile.to_string()))
            })
            .collect();

        if json {
            let value = serde_json::json!({
                "services": services,
                "processes": processes
                    .iter()
                    .map(|(pid, name, profile)| serde_json::json!({ "pid": pid, "name": name, "rule_profile": profile }))
                    .collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
            return Ok(());
        }

        println!("Services:");
        for report in &services {
            let kind = if report.descriptor.kernel_mode { "kernel" } else { "user" };
            if report.exists {
                println!(
                    "  {:<28} {:<8} {:<9} start={:?}",
                    report.descriptor.service_name, kind, report.state, report.start_type
                );
            } else {
                println!("  {:<28} {:<8} not installed", report.descriptor.service_name, kind);
            }
        }

        println!("Processes:");
        if processes.is_empty() {
            println!("  none running");
        }
        for (pid, name, profile) in &processes {
            println!("  {:>6}  {:<20} rule: {}", pid, name, profile);
        }
        Ok(())
    }

    pub fn service(
        config: &GovernorConfig,
        platform: Platform,
        action: ServiceAction,
        name: &str,
    ) -> Result<(), Box<dyn Error>> {
        let targets: Vec<ServiceDescriptor> = if name.eq_ignore_ascii_case("all") {
            ServiceDescriptor::known()
        } else {
            match ServiceDescriptor::find(name) {
                Some(d) => vec![d],
                None => return Err(format!("unknown service '{}'", name).into()),
            }
        };

        let controller = ServiceController::new(platform.services, config.service_timeout());
        let mut failed = 0;
        for descriptor in &targets {
            let outcome: ServiceOutcome = controller.perform(descriptor, action);
            match outcome {
                Ok(state) => println!("  {:<28} {} -> {}", descriptor.service_name, action, state),
                Err(e) => {
                    failed += 1;
                    println!("  {:<28} {} failed: {}", descriptor.service_name, action, e);
                }
            }
        }

        if failed > 0 {
            return Err(format!("{} of {} service actions failed", failed, targets.len()).into());
        }
        Ok(())
    }
}
