use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tanuki_api::{bootstrap, PlanAction, Provider, Registry};
use tanuki_core::access::render_value_list;
use tanuki_core::{AccessDomain, CompositeId};
use tanuki_hub::ProviderConfig;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod files;

use files::{split_address, Manifest, StateFile};

#[derive(Parser, Debug)]
#[command(name = "tanukictl", version, about = "Tanuki CLI: declarative GitLab resources")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// State file tracking applied objects
    #[arg(long = "state", global = true, env = "TANUKI_STATE", default_value = "tanuki.state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered resource types
    Resources,
    /// Show the access levels each domain accepts
    Levels {
        /// Only this domain, e.g. "branch-protection"
        domain: Option<String>,
    },
    /// Encode or decode composite ids
    Id {
        #[command(subcommand)]
        op: IdOp,
    },
    /// Compare a manifest with the state file (no network)
    Plan {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
    },
    /// Create, update, replace or delete objects until GitLab matches the manifest
    Apply {
        #[arg(short = 'f', long = "file")]
        file: PathBuf,
        /// Re-read tracked objects before planning
        #[arg(long = "refresh", action = ArgAction::SetTrue)]
        refresh: bool,
    },
    /// Start tracking an existing object
    Import {
        /// `<type>.<name>`, e.g. gitlab_project.svc
        address: String,
        /// GitLab id, e.g. "42" or "42:main"
        id: String,
        /// Manifest whose provider block supplies connection settings
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },
    /// Delete every tracked object, newest first
    Destroy {
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum IdOp {
    Encode { parts: Vec<String> },
    Decode {
        id: String,
        #[arg(long = "arity", default_value_t = 2)]
        arity: usize,
    },
}

fn init_tracing() {
    let env = std::env::var("TANUKI_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("TANUKI_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid TANUKI_METRICS_ADDR; expected host:port");
        }
    }
}

/// Cancel in-flight work on Ctrl-C; pending waits stop at their next tick.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let t = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received; cancelling");
            t.cancel();
        }
    });
    token
}

async fn connect(file: Option<&Path>) -> Result<Provider> {
    let cfg = match file {
        Some(path) => Manifest::load(path)?.provider,
        None => ProviderConfig::default(),
    };
    Provider::connect(cfg).await.context("connecting to GitLab")
}

fn print_json<T: serde::Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

#[derive(serde::Serialize)]
struct PlannedRow {
    address: String,
    #[serde(flatten)]
    action: PlanAction,
}

/// Plan every declared object, then every tracked object the manifest no longer declares.
fn plan_all(registry: &Registry, manifest: &Manifest, state: &StateFile) -> Result<Vec<PlannedRow>> {
    let mut rows = Vec::new();
    for d in &manifest.resources {
        let addr = d.address();
        let action = registry.plan(&d.kind, state.get(&addr), Some(&d.attributes)).with_context(|| format!("planning {}", addr))?;
        rows.push(PlannedRow { address: addr, action });
    }
    let declared: std::collections::BTreeSet<String> = manifest.resources.iter().map(|d| d.address()).collect();
    for addr in state.reverse_order().into_iter().filter(|a| !declared.contains(a)) {
        rows.push(PlannedRow { address: addr, action: PlanAction::Delete });
    }
    Ok(rows)
}

fn render_action(a: &PlanAction) -> String {
    match a {
        PlanAction::Create => "create".into(),
        PlanAction::Update { changed } => format!("update ({})", changed.join(", ")),
        PlanAction::Replace { attributes } => format!("replace ({})", attributes.join(", ")),
        PlanAction::Delete => "delete".into(),
        PlanAction::NoOp => "no change".into(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Resources => {
            let registry = bootstrap()?;
            let rows: Vec<_> = registry
                .names()
                .filter_map(|n| registry.get(n).map(|r| (n, r.id_arity(), r.force_new())))
                .collect();
            match cli.output {
                Output::Human => {
                    println!("TYPE                          ID-PARTS  REPLACE-ON");
                    for (name, arity, force_new) in rows {
                        let fnew = if force_new.is_empty() { "-".to_string() } else { force_new.join(",") };
                        println!("{:<29} {:<9} {}", name, arity, fnew);
                    }
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Row<'a> { name: &'a str, id_parts: usize, replace_on: &'a [&'a str] }
                    let rows: Vec<_> = rows.into_iter().map(|(name, id_parts, replace_on)| Row { name, id_parts, replace_on }).collect();
                    print_json(&rows)?;
                }
            }
        }
        Commands::Levels { domain } => {
            let domains: Vec<AccessDomain> = match domain {
                Some(d) => vec![d.parse::<AccessDomain>()?],
                None => AccessDomain::all().to_vec(),
            };
            match cli.output {
                Output::Human => {
                    for d in domains {
                        println!("{:<20} {}", d.name(), render_value_list(d.valid_names()));
                    }
                }
                Output::Json => {
                    let map: std::collections::BTreeMap<_, _> = domains.into_iter().map(|d| (d.name(), d.valid_names())).collect();
                    print_json(&map)?;
                }
            }
        }
        Commands::Id { op } => match op {
            IdOp::Encode { parts } => println!("{}", CompositeId::encode(parts)?),
            IdOp::Decode { id, arity } => {
                let id = CompositeId::decode(&id, arity)?;
                match cli.output {
                    Output::Human => id.parts().iter().for_each(|p| println!("{}", p)),
                    Output::Json => print_json(&id.parts())?,
                }
            }
        },
        Commands::Plan { file } => {
            let manifest = Manifest::load(&file)?;
            let state = StateFile::load(&cli.state)?;
            let registry = bootstrap()?;
            let rows = plan_all(&registry, &manifest, &state)?;
            info!(objects = rows.len(), "plan: computed");
            match cli.output {
                Output::Human => {
                    for r in &rows {
                        println!("{:<40} {}", r.address, render_action(&r.action));
                    }
                }
                Output::Json => print_json(&rows)?,
            }
        }
        Commands::Apply { file, refresh } => {
            let manifest = Manifest::load(&file)?;
            let mut state = StateFile::load(&cli.state)?;
            let provider = Provider::connect(manifest.provider.clone()).await.context("connecting to GitLab")?;
            let cancel = cancel_on_ctrl_c();

            if refresh {
                for addr in state.reverse_order() {
                    let (kind, _) = split_address(&addr)?;
                    let Some(prior) = state.get(&addr).cloned() else { continue };
                    match provider.read(kind, &prior, &cancel).await? {
                        Some(st) => state.put(&addr, st),
                        None => {
                            warn!(address = %addr, "refresh: object vanished; dropping from state");
                            state.remove(&addr);
                        }
                    }
                }
                state.save(&cli.state)?;
            }

            let mut failed = 0usize;
            let rows = plan_all(provider.registry(), &manifest, &state)?;
            for row in rows {
                if row.action.is_noop() {
                    continue;
                }
                let (kind, _) = split_address(&row.address)?;
                let desired = manifest.resources.iter().find(|d| d.address() == row.address).map(|d| &d.attributes);
                let prior = state.get(&row.address).cloned();
                match provider.apply(kind, prior.as_ref(), desired, &cancel).await {
                    Ok(Some(st)) => state.put(&row.address, st),
                    Ok(None) => state.remove(&row.address),
                    Err(e) => {
                        failed += 1;
                        error!(address = %row.address, error = %e, "apply: failed");
                        eprintln!("{}: {}", row.address, e);
                        if e.kind() == tanuki_core::ErrorKind::Cancelled {
                            break;
                        }
                        continue;
                    }
                }
                state.save(&cli.state)?;
                if cli.output == Output::Human {
                    println!("{:<40} {}", row.address, render_action(&row.action));
                }
            }
            if cli.output == Output::Json {
                print_json(&state)?;
            }
            if failed > 0 {
                bail!("{} object(s) failed to apply", failed);
            }
        }
        Commands::Import { address: addr, id, file } => {
            let (kind, _) = split_address(&addr)?;
            let mut state = StateFile::load(&cli.state)?;
            if state.get(&addr).is_some() {
                bail!("{} is already tracked", addr);
            }
            let provider = connect(file.as_deref()).await?;
            let cancel = cancel_on_ctrl_c();
            let st = provider.import(kind, &id, &cancel).await.with_context(|| format!("importing {}", addr))?;
            state.put(&addr, st.clone());
            state.save(&cli.state)?;
            match cli.output {
                Output::Human => println!("imported {} (id {})", addr, st.id),
                Output::Json => print_json(&st)?,
            }
        }
        Commands::Destroy { file } => {
            let mut state = StateFile::load(&cli.state)?;
            let provider = connect(file.as_deref()).await?;
            let cancel = cancel_on_ctrl_c();
            for addr in state.reverse_order() {
                let (kind, _) = split_address(&addr)?;
                let Some(st) = state.get(&addr).cloned() else { continue };
                provider.delete(kind, &st, &cancel).await.with_context(|| format!("destroying {}", addr))?;
                state.remove(&addr);
                state.save(&cli.state)?;
                if cli.output == Output::Human {
                    println!("{:<40} deleted", addr);
                }
            }
        }
    }

    Ok(())
}
