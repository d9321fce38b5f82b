use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;

use galion_supervisor::{HealthCheck, Result, Supervisor, SupervisorConfig, SupervisorError};

#[derive(Parser)]
#[command(
    name = "galion-supervisor",
    version,
    about = "Launch services, wait for them to become healthy, report the result"
)]
struct Cli {
    /// Path to Supervisorfile.hcl
    #[arg(short, long, env = "SUPERVISOR_FILE", default_value = "Supervisorfile.hcl")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch all (or named) services and probe them until healthy or out of retries
    Run {
        /// Run only these services
        services: Vec<String>,
        /// Report format
        #[arg(long, value_enum, default_value_t = Format::Table)]
        format: Format,
        /// Probe services one after another instead of concurrently
        #[arg(long)]
        sequential: bool,
    },
    /// Validate Supervisorfile.hcl without launching anything
    Validate,
    /// Generate a new Supervisorfile.hcl in the current directory
    Init,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let loaded = match cli.command {
        Commands::Run { .. } | Commands::Validate => Some(SupervisorConfig::from_file(&cli.file)),
        Commands::Init => None,
    };
    let level = log_level(&cli.command, loaded.as_ref().and_then(|r| r.as_ref().ok()));

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    match run(cli, loaded).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {e}", "[supervisor]".red().bold());
            std::process::exit(2);
        }
    }
}

/// Default tracing level: the config's `log_level` for `run`, quiet otherwise.
fn log_level(command: &Commands, cfg: Option<&SupervisorConfig>) -> String {
    match (command, cfg) {
        (Commands::Run { .. }, Some(cfg)) => cfg.settings.log_level.clone(),
        (Commands::Run { .. }, None) => "info".into(),
        _ => "warn".into(),
    }
}

async fn run(cli: Cli, loaded: Option<Result<SupervisorConfig>>) -> Result<i32> {
    let load = |file: &PathBuf| loaded.unwrap_or_else(|| SupervisorConfig::from_file(file));

    match cli.command {
        Commands::Run {
            services,
            format,
            sequential,
        } => {
            let mut cfg = load(&cli.file)?;
            if sequential {
                cfg.settings.concurrent = false;
            }
            if !services.is_empty() {
                if let Some(unknown) = services.iter().find(|s| !cfg.services.contains_key(*s)) {
                    return Err(SupervisorError::Config(format!(
                        "unknown service '{unknown}' (not in {})",
                        cli.file.display()
                    )));
                }
                cfg.services.retain(|name, _| services.contains(name));
            }

            let sup = Supervisor::from_config(&cfg)?;
            let cancel = sup.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("\n{} interrupted, finishing report...", "→".yellow());
                    cancel.cancel();
                }
            });

            let report = sup.run_all().await;
            match format {
                Format::Table => print!("{}", report.render_table()),
                Format::Json => println!(
                    "{}",
                    report
                        .to_json()
                        .map_err(|e| SupervisorError::Config(format!("encode report: {e}")))?
                ),
            }
            Ok(report.exit_code())
        }

        Commands::Validate => {
            let cfg = load(&cli.file)?;
            println!(
                "{} {} is valid ({} services)",
                "✓".green(),
                cli.file.display(),
                cfg.services.len()
            );
            for (name, svc) in &cfg.services {
                let target = match &svc.health {
                    HealthCheck::Http { url, .. } => url.clone(),
                    HealthCheck::Tcp { address } => format!("tcp://{address}"),
                    HealthCheck::Process { name: Some(p) } => format!("process '{p}'"),
                    HealthCheck::Process { name: None } => "pid".into(),
                };
                println!(
                    "  {} {} {}",
                    name.cyan(),
                    svc.cmd,
                    format!(
                        "→ {} {target} ×{} every {}ms",
                        svc.health.kind(),
                        svc.max_retries,
                        svc.interval.as_millis()
                    )
                    .dimmed()
                );
            }
            Ok(0)
        }

        Commands::Init => {
            let path = &cli.file;
            if path.exists() {
                return Err(SupervisorError::Config(format!(
                    "{} already exists, delete it first or pass a different --file",
                    path.display()
                )));
            }
            std::fs::write(path, INIT_TEMPLATE)
                .map_err(|e| SupervisorError::Config(format!("write {}: {e}", path.display())))?;
            println!("{} created {}", "✓".green(), path.display().to_string().cyan());
            println!(
                "  edit it, then run {} to launch and check your services",
                "galion-supervisor run".cyan()
            );
            Ok(0)
        }
    }
}

const INIT_TEMPLATE: &str = r#"# Supervisorfile.hcl, generated by `galion-supervisor init`
# `galion-supervisor run` launches every service and waits for it to become healthy.

supervisor {
  log_level  = "info"
  log_dir    = ".supervisor/logs"
  concurrent = true
}

service "backend" {
  cmd = "uvicorn main:app --host 0.0.0.0 --port 8000"
  dir = "./backend"

  env = {
    PYTHONUNBUFFERED = "1"
  }

  health {
    type     = "http"
    url      = "http://localhost:8000/health"
    status   = 200
    interval = "2s"
    timeout  = "1s"
    retries  = 30
  }
}

service "frontend" {
  cmd = "npm run start"
  dir = "./frontend"

  health {
    type          = "http"
    url           = "http://localhost:3000"
    initial_delay = "3s"
    retries       = 30
  }
}

# service "worker" {
#   cmd = "pm2 start ecosystem.config.js"
#
#   health {
#     type    = "process"
#     process = "node"
#     retries = 5
#   }
# }
"#;
