use cpwatchd::daemon::{CliOverrides, DaemonConfig, DaemonRuntime};
use cpwatchd::logging::init_tracing;
use tracing::error;

const USAGE: &str = "\
Usage: cpwatchd [--address HOST] [--password PASSWORD] [--root DIR]

Mirrors a CircuitPython board's filesystem into DIR over the Web Workflow API
and keeps both sides in sync.

  --address HOST       Device address (env CPWATCH_ADDRESS)
  --password PASSWORD  Web Workflow password (env CPWATCH_PASSWORD)
  --root DIR           Local mirror directory, wiped on start (env CPWATCH_LOCAL_ROOT,
                       default ./CIRCUITPYTHON)
  -h, --help           Show this help

Intervals: CPWATCH_REMOTE_POLL_SECS (120), CPWATCH_WRITABLE_POLL_SECS (5),
CPWATCH_DEBOUNCE_MS (500). Extra ignore entries, comma separated:
CPWATCH_IGNORE_NAMES, CPWATCH_IGNORE_EXTENSIONS. Log level: RUST_LOG (info).";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    Run(CliOverrides),
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut overrides = CliOverrides::default();
    let mut args = args.into_iter().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg, None),
        };
        let slot = match flag.as_str() {
            "--help" | "-h" => return Ok(CliMode::Help),
            "--address" => &mut overrides.address,
            "--password" => &mut overrides.password,
            "--root" => &mut overrides.local_root,
            other => anyhow::bail!("unknown argument: {other}"),
        };
        let value = match inline.or_else(|| args.next()) {
            Some(value) => value,
            None => anyhow::bail!("{flag} requires a value"),
        };
        *slot = Some(value);
    }
    Ok(CliMode::Run(overrides))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let overrides = match parse_cli_mode(std::env::args())? {
        CliMode::Help => {
            println!("{USAGE}");
            return Ok(());
        }
        CliMode::Run(overrides) => overrides,
    };
    init_tracing();

    let config = DaemonConfig::from_env(overrides)?;
    let daemon = match DaemonRuntime::bootstrap(config).await {
        Ok(daemon) => daemon,
        Err(err) => {
            error!(action = "ERROR", "{err:#}");
            std::process::exit(1);
        }
    };
    daemon.run().await
}
