use std::env;
use std::fmt;
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use log::{LevelFilter, debug, error, info, warn};
use tokio::net::TcpListener;

use chatbridge::api::{self, AppState};
use chatbridge::client::ClientAdapter;
use chatbridge::config::{
    self as settings, APP_NAME, AppConfig, default_config_dir, default_data_dir,
    default_state_dir, env_prefix, expand_path, expand_str_path, write_default_config,
};
use chatbridge::driver::DriverKind;
use chatbridge::hub::EventHub;

fn main() {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "{err:?}");
        std::process::exit(1);
    }
}

#[tokio::main]
async fn async_main(ctx: RuntimeContext, cmd: ServeCommand) -> Result<()> {
    handle_serve(&ctx, cmd).await
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();

    let ctx = RuntimeContext::new(cli.common.clone())?;
    ctx.init_logging()?;
    debug!("resolved paths: {}", ctx.paths);

    match cli.command {
        Command::Serve(cmd) => async_main(ctx, cmd),
        Command::Init(cmd) => handle_init(&ctx, cmd),
        Command::Config { command } => handle_config(&ctx, command),
        Command::Completions { shell } => handle_completions(shell),
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Chatbridge - REST and WebSocket bridge for an automated messaging client.",
    propagate_version = true
)]
struct Cli {
    #[command(flatten)]
    common: CommonOpts,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Args)]
struct CommonOpts {
    /// Config file (or directory holding config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    /// Raise log verbosity; repeat for trace
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Same as -v
    #[arg(long, global = true)]
    debug: bool,
    /// Same as -vv
    #[arg(long, global = true)]
    trace: bool,
    /// Write logs as JSON lines
    #[arg(long, global = true)]
    json: bool,
    /// When to colour log output
    #[arg(long, value_enum, default_value_t = ColorOption::Auto, global = true)]
    color: ColorOption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorOption {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the HTTP and WebSocket server
    Serve(ServeCommand),
    /// Create config directories and default files
    Init(InitCommand),
    /// Inspect and manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Args)]
struct ServeCommand {
    /// Host address to bind to (overrides server.host)
    #[arg(long)]
    host: Option<String>,
    /// Port to listen on (overrides server.port)
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,
    /// Messaging driver to run (overrides driver.kind)
    #[arg(long, value_enum)]
    driver: Option<DriverArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DriverArg {
    Sidecar,
    Memory,
}

impl From<DriverArg> for DriverKind {
    fn from(arg: DriverArg) -> Self {
        match arg {
            DriverArg::Sidecar => DriverKind::Sidecar,
            DriverArg::Memory => DriverKind::Memory,
        }
    }
}

#[derive(Debug, Clone, Args)]
struct InitCommand {
    /// Overwrite an existing config with defaults
    #[arg(long = "force")]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Output the effective configuration
    Show {
        #[arg(long, value_enum, default_value_t = ShowFormat::Toml)]
        format: ShowFormat,
    },
    /// Print the resolved config file path
    Path,
    /// Regenerate the default configuration file
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ShowFormat {
    Toml,
    Json,
    Yaml,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    common: CommonOpts,
    paths: AppPaths,
    config: AppConfig,
}

impl RuntimeContext {
    fn new(common: CommonOpts) -> Result<Self> {
        let paths = AppPaths::discover(common.config.clone())?;
        if !paths.config_file.exists() {
            write_default_config(&paths.config_file)?;
        }
        let config = settings::load_config(&paths.config_file, &env_prefix())?;
        let paths = paths.apply_overrides(&config)?;
        for dir in [&paths.data_dir, &paths.state_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating directory {}", dir.display()))?;
        }
        Ok(Self {
            common,
            paths,
            config,
        })
    }

    fn init_logging(&self) -> Result<()> {
        use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

        let level = self.log_level();
        let level_name = level.to_string().to_lowercase();
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("chatbridge={level_name},tower_http={level_name}"))
        });

        if self.common.json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .ok();
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_ansi(self.use_color()))
                .try_init()
                .ok();
        }

        // Library internals log through the `log` facade
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .try_init()
            .ok();

        Ok(())
    }

    fn log_level(&self) -> LevelFilter {
        if self.common.quiet {
            return LevelFilter::Error;
        }
        let verbosity = if self.common.trace {
            2
        } else if self.common.debug {
            self.common.verbose.max(1)
        } else {
            self.common.verbose
        };
        match verbosity {
            0 => self
                .config
                .logging
                .level
                .parse()
                .unwrap_or(LevelFilter::Info),
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn use_color(&self) -> bool {
        match self.common.color {
            ColorOption::Always => true,
            ColorOption::Never => false,
            ColorOption::Auto => env::var_os("NO_COLOR").is_none() && io::stderr().is_terminal(),
        }
    }
}

#[derive(Debug, Clone)]
struct AppPaths {
    config_file: PathBuf,
    data_dir: PathBuf,
    state_dir: PathBuf,
}

impl AppPaths {
    fn discover(override_path: Option<PathBuf>) -> Result<Self> {
        let config_file = match override_path {
            Some(path) => {
                let expanded = expand_path(path)?;
                if expanded.is_dir() {
                    expanded.join("config.toml")
                } else {
                    expanded
                }
            }
            None => default_config_dir()?.join("config.toml"),
        };

        if config_file.parent().is_none() {
            return Err(anyhow!("invalid config file path: {config_file:?}"));
        }

        Ok(Self {
            config_file,
            data_dir: default_data_dir()?,
            state_dir: default_state_dir()?,
        })
    }

    fn apply_overrides(mut self, cfg: &AppConfig) -> Result<Self> {
        if let Some(ref data_override) = cfg.paths.data_dir {
            self.data_dir = expand_str_path(data_override)?;
        }
        if let Some(ref state_override) = cfg.paths.state_dir {
            self.state_dir = expand_str_path(state_override)?;
        }
        Ok(self)
    }
}

impl fmt::Display for AppPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "config: {}, data: {}, state: {}",
            self.config_file.display(),
            self.data_dir.display(),
            self.state_dir.display()
        )
    }
}

fn handle_init(ctx: &RuntimeContext, cmd: InitCommand) -> Result<()> {
    // RuntimeContext already wrote a missing config.
    if !cmd.force {
        println!("config: {}", ctx.paths.config_file.display());
        return Ok(());
    }
    write_default_config(&ctx.paths.config_file)
}

fn handle_config(ctx: &RuntimeContext, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show { format } => {
            let rendered = match format {
                ShowFormat::Toml => toml::to_string_pretty(&ctx.config)
                    .context("serializing config to TOML")?,
                ShowFormat::Json => serde_json::to_string_pretty(&ctx.config)
                    .context("serializing config to JSON")?,
                ShowFormat::Yaml => {
                    serde_yaml::to_string(&ctx.config).context("serializing config to YAML")?
                }
            };
            println!("{rendered}");
            Ok(())
        }
        ConfigCommand::Path => {
            println!("{}", ctx.paths.config_file.display());
            Ok(())
        }
        ConfigCommand::Reset => write_default_config(&ctx.paths.config_file),
    }
}

fn handle_completions(shell: Shell) -> Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, APP_NAME, &mut io::stdout());
    Ok(())
}

async fn handle_serve(ctx: &RuntimeContext, cmd: ServeCommand) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(kind) = cmd.driver {
        config.driver.kind = kind.into();
    }
    let host = cmd.host.unwrap_or_else(|| config.server.host.clone());
    let port = cmd.port.unwrap_or(config.server.port);

    let api_key = config
        .api
        .resolve_api_key()
        .context("resolving api.api_key")?;
    if api_key.is_none() {
        warn!("No api.api_key configured; /api/bot/* will reject every request");
    }

    let factory = config
        .driver_factory(&ctx.paths.data_dir)
        .context("creating messaging driver")?;
    let options = config
        .client_options(&ctx.paths.data_dir)
        .context("resolving client options")?;
    info!(
        "Using {} driver (relay mode: {:?})",
        config.driver.kind, config.relay.mode
    );

    let hub = EventHub::new();
    let client = ClientAdapter::new(factory, hub, options);
    let state = AppState::new(client.clone(), config.relay.clone(), api_key);

    // A failing start is retried by the reconnect policy.
    if let Err(e) = client.initialize().await {
        error!("Initial client start failed: {}", e);
    }

    let app = api::create_router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .context("invalid address")?;
    info!("Listening on http://{}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .context("binding to address")?;

    let client_for_shutdown = client.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("failed to install signal handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        info!("Shutdown signal received, stopping messaging client...");
        client_for_shutdown.shutdown().await;
        info!("Shutdown complete");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("running server")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_config_show_format() {
        let cli = Cli::parse_from(["chatbridge", "config", "show", "--format", "yaml"]);
        assert!(matches!(
            cli.command,
            Command::Config {
                command: ConfigCommand::Show {
                    format: ShowFormat::Yaml
                }
            }
        ));
        assert!(Cli::try_parse_from(["chatbridge", "--yaml", "config", "show"]).is_err());
        assert!(Cli::try_parse_from(["chatbridge", "--diagnostics", "serve"]).is_err());
    }
}
