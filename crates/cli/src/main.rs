mod service_commands;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "pipedeck", version, about = "pipedeck: dashboards for your mods")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Pipedeck service management.
    #[command(arg_required_else_help = true)]
    Service {
        #[command(subcommand)]
        action: service_commands::ServiceAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "pipedeck starting");

    match cli.command {
        Commands::Service { action } => service_commands::handle_service(action).await,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        clap::{CommandFactory, error::ErrorKind},
        service_commands::ServiceAction,
    };

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_service_start_flags() {
        let cli = Cli::try_parse_from([
            "pipedeck",
            "--log-level",
            "debug",
            "service",
            "start",
            "--mod-location",
            "/srv/mod",
            "--port",
            "9100",
            "--listen",
            "0.0.0.0",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        assert!(!cli.json_logs);
        let Commands::Service {
            action: ServiceAction::Start(args),
        } = cli.command;
        assert_eq!(args.mod_location.as_deref(), Some("/srv/mod".as_ref()));
        assert_eq!(args.port, Some(9100));
        assert_eq!(args.listen.as_deref(), Some("0.0.0.0"));
        assert!(args.install_dir.is_none());
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pipedeck", "service", "start", "--json-logs"]).unwrap();
        assert!(cli.json_logs);
    }

    #[test]
    fn service_without_action_shows_help() {
        let err = Cli::try_parse_from(["pipedeck", "service"]).err().unwrap();
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn service_rejects_positional_args() {
        assert!(Cli::try_parse_from(["pipedeck", "service", "start", "extra"]).is_err());
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["pipedeck", "service", "start", "--port", "70000"]).is_err());
    }
}
