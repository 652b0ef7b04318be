use std::{sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    tracing::{error, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    webgate_browser::{BrowserHandle, ChromiumFactory, LaunchSettings, Viewport},
    webgate_config::{Severity, WebgateConfig, validate},
    webgate_gateway::{Dispatcher, build_state, run_server, run_stdio, tools::build_registry},
};

#[derive(Parser)]
#[command(name = "webgate", about = "webgate — browser automation gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "WEBGATE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Address to bind to (overrides config value).
    #[arg(long, global = true)]
    host: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Also serve newline-framed JSON-RPC on stdin/stdout.
    #[arg(long, global = true, default_value_t = false)]
    stdio: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway (default when no subcommand is provided).
    Gateway,
    /// Validate the configuration and print every diagnostic.
    Doctor,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the resolved effective configuration as TOML.
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(cli))
}

fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // Logs go to stderr: stdout belongs to the stdio transport.
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        None | Some(Commands::Gateway) => run_gateway(cli).await,
        Some(Commands::Doctor) => doctor(cli.config.as_deref()),
        Some(Commands::Config {
            action: ConfigAction::Show,
        }) => {
            let config = load_config(&cli)?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        },
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<WebgateConfig> {
    let mut config = match cli.config {
        Some(ref path) => webgate_config::load_config(path)?,
        None => webgate_config::discover_and_load(),
    };
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    Ok(config)
}

fn doctor(path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let result = validate(path);
    if let Some(ref config_path) = result.config_path {
        println!("checking {}", config_path.display());
    }
    for diagnostic in &result.diagnostics {
        let path = if diagnostic.path.is_empty() {
            String::new()
        } else {
            format!(" [{}]", diagnostic.path)
        };
        println!(
            "{}{path}: {} ({})",
            diagnostic.severity, diagnostic.message, diagnostic.category
        );
    }
    println!(
        "{} error(s), {} warning(s)",
        result.count(Severity::Error),
        result.count(Severity::Warning)
    );
    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_gateway(cli: Cli) -> anyhow::Result<()> {
    let serve_stdio = cli.stdio;
    let config = load_config(&cli)?;

    // A config with out-of-range values never starts; every violation is
    // reported at once.
    let config_toml = toml::to_string(&config)?;
    let validation = validate::validate_toml_str(&config_toml);
    if validation.has_errors() {
        for diagnostic in validation
            .diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
        {
            error!(path = %diagnostic.path, "{}", diagnostic.message);
        }
        anyhow::bail!("configuration is invalid");
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting webgate");

    let browser = Arc::new(
        BrowserHandle::launch(&LaunchSettings {
            chrome_path: config.browser.chrome_path.clone(),
            headless: config.browser.headless,
            default_viewport: Viewport {
                width: config.browser.viewport_width,
                height: config.browser.viewport_height,
            },
            request_timeout: Duration::from_millis(config.browser.navigation_timeout_ms),
            extra_args: config.browser.chrome_args.clone(),
        })
        .await?,
    );

    let factory = Arc::new(ChromiumFactory::new(browser.clone()));
    let state = build_state(config, factory).await;

    state.pool.start().await?;
    state.sessions.start_reaper().await;

    let registry = Arc::new(build_registry());
    let dispatcher = Dispatcher::new(state.clone(), registry);

    let server = {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { run_server(dispatcher).await })
    };

    let stdio = serve_stdio.then(|| {
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move { run_stdio(dispatcher).await })
    });

    // Run until a transport dies or we get a shutdown signal.
    tokio::select! {
        result = server => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "server exited with error");
            }
        },
        result = async {
            match stdio {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "stdio transport exited with error");
            } else {
                info!("stdio transport closed");
            }
        },
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        },
    }

    // Teardown order: drain the scheduler so queued and in-flight operations
    // settle, then sessions (they release contexts), then the pool, then the
    // browser process.
    state.scheduler.shutdown(Duration::from_secs(5)).await;
    state.sessions.shutdown().await;
    state.pool.shutdown().await;
    browser.close().await;
    info!("webgate stopped");
    Ok(())
}

/// Resolve on SIGINT or, on unix, SIGTERM (what `kill` and container
/// orchestrators send).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
