//! XDS command-line client binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::error::ErrorKind;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use xds_cli::cli::Cli;
use xds_cli::commands::Command;
use xds_cli::session::OutputSink;
use xds_cli::{CliError, EffectiveConfig, OutputFormat, XdsContext};

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => e.exit(),
        Err(e) => {
            // Usage errors are validation errors: status 2 belongs to a lost connection.
            let _ = e.print();
            return ExitCode::FAILURE;
        }
    };

    // Configuration errors are reported before logging is set up.
    let cfg = match EffectiveConfig::from_process(&cli.global) {
        Ok(cfg) => cfg,
        Err(e) => return report(&e),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_directive)),
        )
        .with_writer(io::stderr)
        .init();
    cfg.log_summary();

    let command = match Command::from_cli(&cli.command, &cfg) {
        Ok(command) => command,
        Err(e) => return report(&e),
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cfg, command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}

async fn run(cfg: EffectiveConfig, command: Command) -> Result<(), CliError> {
    let format = OutputFormat::new(cfg.format);
    let output = Arc::new(OutputSink::stdio(cfg.timestamp));

    let ctx = XdsContext::connect(cfg, Arc::clone(&output)).await?;
    let mut stdout = io::stdout();
    let result = command.execute(&ctx, &mut stdout, &format, output).await;
    ctx.close().await;
    result
}

fn report(err: &CliError) -> ExitCode {
    let message = err.to_string();
    if !message.is_empty() {
        eprintln!("{message}");
    }
    ExitCode::from(exit_status(err))
}

/// Exit code as observed by a shell.
fn exit_status(err: &CliError) -> u8 {
    (err.exit_code() & 0xff) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use xds_cli::cli::{Commands, MiscCommands};
    use xds_cli::Format;

    #[test]
    fn cli_parses_misc_version() {
        let cli = Cli::parse_from(["xds-cli", "misc", "version"]);
        match cli.command {
            Commands::Misc { command } => {
                assert!(matches!(command, MiscCommands::Version { verbose: false }));
            }
            _ => panic!("expected misc command"),
        }
    }

    #[test]
    fn cli_respects_format_flag() {
        let cli = Cli::parse_from(["xds-cli", "--format", "json", "misc", "status"]);
        assert_eq!(cli.global.format, Format::Json);
    }

    #[test]
    fn exit_status_truncates_remote_codes() {
        let err = CliError::Remote {
            code: 3,
            message: "build failed".into(),
        };
        assert_eq!(exit_status(&err), 3);

        let err = CliError::Remote {
            code: 257,
            message: String::new(),
        };
        assert_eq!(exit_status(&err), 1);
    }

    #[test]
    fn exit_status_never_reports_success_for_failures() {
        for code in [256, 512, -256] {
            let err = CliError::Remote {
                code,
                message: String::new(),
            };
            assert_eq!(exit_status(&err), 1, "code {code}");
        }
    }

    #[test]
    fn exit_status_for_lost_transport() {
        assert_eq!(exit_status(&CliError::TransportLost("reset".into())), 2);
        assert_eq!(exit_status(&CliError::Validation("bad".into())), 1);
    }

    #[tokio::test]
    async fn run_without_agent_fails() {
        let cli = Cli::parse_from(["xds-cli", "-u", "127.0.0.1:1", "misc", "version"]);
        let cfg = EffectiveConfig::resolve(&cli.global, &std::collections::HashMap::new()).unwrap();
        let command = Command::from_cli(&cli.command, &cfg).unwrap();

        let err = run(cfg, command).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
