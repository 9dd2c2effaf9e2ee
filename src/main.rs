mod config;
mod environment;
mod phase;
mod report;
mod signals;
mod supervisor;

use clap::Parser;
use config::{ProbeConfig, Timeouts};
use report::Report;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Run a dev-server command for a bounded time, forward its early output,
/// then interrupt and kill it and report what happened.
#[derive(Parser, Debug)]
#[command(name = "devprobe", version, about)]
pub struct Cli {
    /// Command to run instead of the configured one (replaces it entirely)
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,

    /// Config file path
    #[arg(short, long, default_value = "devprobe.toml")]
    config: PathBuf,

    /// Seconds before the command is interrupted (overrides config)
    #[arg(long, value_name = "SECS")]
    run_timeout: Option<u64>,

    /// Seconds to keep reading output after the interrupt (overrides config)
    #[arg(long, value_name = "SECS")]
    soft_timeout: Option<u64>,

    /// Seconds to wait for the process to be reaped after the kill (overrides config)
    #[arg(long, value_name = "SECS")]
    kill_timeout: Option<u64>,

    /// Output polling interval in milliseconds (overrides config)
    #[arg(long, value_name = "MS")]
    poll_interval_ms: Option<u64>,

    /// Print the resolved command, timeouts and environment, don't run
    #[arg(long)]
    dry_run: bool,

    /// Debug logging (signal delivery, pipe state)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply CLI overrides on top of the file config.
    fn merge_into(&self, config: &mut ProbeConfig) {
        if !self.command.is_empty() {
            config.command.args = self.command.clone();
        }
        if let Some(secs) = self.run_timeout {
            config.timeouts.run_secs = secs;
        }
        if let Some(secs) = self.soft_timeout {
            config.timeouts.soft_stop_secs = secs;
        }
        if let Some(secs) = self.kill_timeout {
            config.timeouts.hard_kill_secs = secs;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.timeouts.poll_interval_ms = ms;
        }
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "devprobe=debug" } else { "devprobe=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Resolve the config file plus CLI overrides. A broken config file falls
/// back to defaults: this tool never fails because of its own settings.
fn resolve_config(cli: &Cli) -> ProbeConfig {
    let mut config = match config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "using default config");
            ProbeConfig::default()
        }
    };
    cli.merge_into(&mut config);
    config
}

fn write_dry_run<W: std::io::Write>(
    out: &mut W,
    args: &[String],
    timeouts: &Timeouts,
    env: &BTreeMap<String, String>,
) -> std::io::Result<()> {
    writeln!(out, "command: {}", args.join(" "))?;
    writeln!(
        out,
        "timeouts: run={}s soft_stop={}s hard_kill={}s poll={}ms",
        timeouts.run.as_secs(),
        timeouts.soft_stop.as_secs(),
        timeouts.hard_kill.as_secs(),
        timeouts.poll_interval.as_millis()
    )?;
    for (key, value) in env {
        writeln!(out, "env: {key}={value}")?;
    }
    writeln!(out, "Dry run: not running.")
}

/// Supervise `args` and write the whole stdout transcript to `out`: banner,
/// child output (or the spawn failure), a blank line, then the summary.
async fn supervise_to<W: AsyncWrite + Unpin>(
    out: &mut W,
    args: &[String],
    env: &BTreeMap<String, String>,
    timeouts: Timeouts,
) -> Report {
    let started = std::time::Instant::now();
    let report = match supervisor::run(args, env, timeouts, &mut *out).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "supervision did not start");
            let line = format!("[debug] {e}\n");
            let _ = out.write_all(line.as_bytes()).await;
            Report::not_started(started.elapsed())
        }
    };

    let summary = format!("\n{}\n", report.summary_line());
    let _ = out.write_all(summary.as_bytes()).await;
    let _ = out.flush().await;
    report
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = resolve_config(&cli);
    let args = config.default_args();
    let timeouts = config.timeouts.resolve();
    let env = environment::child_overrides(&config.env);

    if cli.dry_run {
        let stdout = std::io::stdout();
        if let Err(e) = write_dry_run(&mut stdout.lock(), &args, &timeouts, &env) {
            tracing::debug!(error = %e, "failed to write dry run");
        }
        return;
    }

    supervise_to(&mut tokio::io::stdout(), &args, &env, timeouts).await;
    // Non-zero child exits are diagnostic output, never our exit status.
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("devprobe").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_no_command_uses_default_dev_server() {
        let cli = parse(&[]);
        let mut config = ProbeConfig::default();
        cli.merge_into(&mut config);
        assert_eq!(
            config.default_args(),
            vec!["npx", "expo", "start", "--web", "--localhost", "--max-workers", "2"]
        );
    }

    #[test]
    fn test_command_replaces_default_entirely() {
        let cli = parse(&["npm", "run", "web", "--port", "8081"]);
        let mut config = ProbeConfig::default();
        cli.merge_into(&mut config);
        assert_eq!(config.default_args(), vec!["npm", "run", "web", "--port", "8081"]);
    }

    #[test]
    fn test_flags_before_command_are_options() {
        let cli = parse(&["--run-timeout", "5", "-v", "yarn", "start", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.run_timeout, Some(5));
        assert_eq!(cli.command, vec!["yarn", "start", "-v"]);
    }

    #[test]
    fn test_timeout_flags_override_config() {
        let cli = parse(&[
            "--run-timeout",
            "10",
            "--soft-timeout",
            "1",
            "--kill-timeout",
            "4",
            "--poll-interval-ms",
            "100",
        ]);
        let mut config = ProbeConfig::default();
        cli.merge_into(&mut config);
        let t = config.timeouts.resolve();
        assert_eq!(t.run, Duration::from_secs(10));
        assert_eq!(t.soft_stop, Duration::from_secs(1));
        assert_eq!(t.hard_kill, Duration::from_secs(4));
        assert_eq!(t.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_broken_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devprobe.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let cli = parse(&["--config", path.to_str().unwrap(), "--soft-timeout", "7"]);

        let config = resolve_config(&cli);
        assert_eq!(config.command, config::CommandConfig::default());
        assert_eq!(config.timeouts.soft_stop_secs, 7);
        assert_eq!(config.timeouts.run_secs, 25);
    }

    #[test]
    fn test_config_file_command_used_without_cli_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("devprobe.toml");
        std::fs::write(&path, "[command]\nargs = [\"pnpm\", \"dev\"]\n").unwrap();
        let cli = parse(&["-c", path.to_str().unwrap()]);

        assert_eq!(resolve_config(&cli).default_args(), vec!["pnpm", "dev"]);
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_transcript_ends_with_blank_line_and_summary() {
        let mut out = Vec::new();
        let env = environment::child_overrides(&BTreeMap::new());
        let report = supervise_to(&mut out, &sh("echo hello"), &env, Timeouts::default()).await;
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("[debug] running: sh -c echo hello\n"));
        assert!(text.contains("hello\n\n[debug] printed_logs=True exit=0 runtime="));
        assert!(text.ends_with("s\n"));
        assert_eq!(text.matches("printed_logs=").count(), 1);
        assert_eq!(report.exit, Some(0));
    }

    #[tokio::test]
    async fn test_spawn_failure_transcript_still_has_summary() {
        let mut out = Vec::new();
        let args = vec!["nonexistent-xyz".to_string()];
        let report = supervise_to(&mut out, &args, &BTreeMap::new(), Timeouts::default()).await;
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "[debug] running: nonexistent-xyz");
        assert!(lines[1].starts_with("[debug] failed to spawn nonexistent-xyz: "));
        assert_eq!(lines[2], "");
        assert!(lines[3].starts_with("[debug] printed_logs=False exit=None runtime="));
        assert_eq!(report.exit, None);
    }

    #[test]
    fn test_dry_run_lists_command_timeouts_and_forced_env() {
        let config = ProbeConfig::default();
        let env = environment::child_overrides(&config.env);
        let mut out = Vec::new();
        write_dry_run(&mut out, &config.default_args(), &config.timeouts.resolve(), &env).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "command: npx expo start --web --localhost --max-workers 2");
        assert_eq!(lines[1], "timeouts: run=25s soft_stop=3s hard_kill=2s poll=500ms");
        assert!(lines.contains(&"env: CI=1"));
        assert!(lines.contains(&"env: NODE_OPTIONS=--dns-result-order=ipv4first"));
        assert_eq!(lines.last(), Some(&"Dry run: not running."));
    }
}
