use clap::Parser;
use conclave_core::config::CouncilConfig;
use conclave_council::Council;
use tracing::warn;

/// Run a council of LLM participants around a shared discussion
/// transcript, with an interactive host front-end in the foreground.
#[derive(Parser, Debug)]
#[command(name = "conclave", version, about)]
struct Cli {
    /// Config file (default: ~/.conclave/conclave.toml)
    #[arg(long)]
    config: Option<String>,

    /// Override the directory session directories are created under
    #[arg(long)]
    session_root: Option<String>,

    /// Reuse the `live` session directory instead of a timestamped one
    #[arg(long)]
    resume: bool,

    /// Host command and arguments (overrides the config's host table)
    #[arg(last = true)]
    host_command: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conclave=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            // single diagnostic line; everything else went through logs
            eprintln!("conclave: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = match CouncilConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            warn!(error = %e, "config load failed; starting with defaults");
            CouncilConfig::default()
        }
        Err(e) => return Err(e.into()),
    };

    if let Some(root) = cli.session_root {
        config.session.root = root;
    }
    if cli.resume {
        config.session.resume = true;
    }
    if let Some((command, args)) = cli.host_command.split_first() {
        config.host.command = command.clone();
        config.host.args = args.to_vec();
    }

    if config.host.command.is_empty() {
        anyhow::bail!("no host command configured (set [host] command or pass one after --)");
    }

    let council = Council::bootstrap(config).await?;
    Ok(council.run().await?)
}
