use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use http::request::Parts;
use passgate_api::UserPrincipal;
use passgate_auth::{PrincipalGetter, RequestScope};
use passgate_core::{
    CONFIG_FILE, PassgateConfig, default_config_dir, load_config_from_dir,
    write_default_config_file,
};
use passgate_runtime::PrincipalChain;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "passgate", about = "Resolve request principals from forwarded credentials")]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a commented passgate.toml
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Validate the configuration and build every getter
    Check {
        /// Skip building review clients and OIDC discovery
        #[arg(long)]
        offline: bool,
    },
    /// Resolve the principal of a synthetic request
    Resolve {
        #[arg(long = "header", value_parser = parse_key_val)]
        headers: Vec<(String, String)>,
        #[arg(long = "cookie", value_parser = parse_key_val)]
        cookies: Vec<(String, String)>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let cfg_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);

    match cli.command {
        Commands::Init { force } => {
            match write_default_config_file(&cfg_dir, force)? {
                Some(path) => pout(
                    cli.json,
                    serde_json::json!({"message":"init complete","config":path}),
                    &format!("Wrote {}", path.display()),
                )?,
                None => pout(
                    cli.json,
                    serde_json::json!({"message":"config exists","config_dir":cfg_dir}),
                    &format!(
                        "{} already exists in {}, use --force to overwrite",
                        CONFIG_FILE,
                        cfg_dir.display()
                    ),
                )?,
            }
        }
        Commands::Check { offline } => {
            let cfg = load(&cfg_dir)?;
            let getters: Vec<_> = cfg
                .getters
                .iter()
                .map(|g| serde_json::json!({"kind": g.kind.as_str(), "transport": g.transport()}))
                .collect();
            if !offline {
                let chain = PrincipalChain::from_config(&cfg).await?;
                info!(getters = chain.len(), "configuration built");
            }
            pout(
                cli.json,
                serde_json::json!({"ok":true,"offline":offline,"getters":getters}),
                &format!("Configuration OK ({} getters)", getters.len()),
            )?;
        }
        Commands::Resolve {
            headers,
            cookies,
            timeout_ms,
        } => {
            let cfg = load(&cfg_dir)?;
            let chain = PrincipalChain::from_config(&cfg).await?;
            let req = build_request(&headers, &cookies)?;

            let cancel = CancellationToken::new();
            let mut scope = RequestScope::with_cancellation(cancel.clone());
            if let Some(ms) = timeout_ms {
                scope = scope.with_timeout(Duration::from_millis(ms));
            }
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, cancelling resolution");
                    cancel.cancel();
                }
            });

            match chain.principal(&req, &scope).await {
                Ok(Some(principal)) => print_principal(cli.json, &principal)?,
                Ok(None) => pout(
                    cli.json,
                    serde_json::json!({"ok":true,"principal":null}),
                    "No credential found",
                )?,
                Err(e) => {
                    if cli.json {
                        let report = serde_json::json!({
                            "ok": false,
                            "kind": format!("{:?}", e.kind()).to_lowercase(),
                            "error": e.to_string(),
                        });
                        println!("{}", serde_json::to_string_pretty(&report)?);
                    }
                    bail!("{:?}: {e}", e.kind());
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load(cfg_dir: &std::path::Path) -> anyhow::Result<PassgateConfig> {
    load_config_from_dir(cfg_dir).with_context(|| {
        format!(
            "no usable {CONFIG_FILE} in {}; run `passgate init` first",
            cfg_dir.display()
        )
    })
}

fn build_request(headers: &[(String, String)], cookies: &[(String, String)]) -> anyhow::Result<Parts> {
    let mut builder = http::Request::builder().uri("/");
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !cookies.is_empty() {
        let cookie = cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ");
        builder = builder.header(http::header::COOKIE, cookie);
    }
    let (parts, ()) = builder.body(()).context("invalid request header")?.into_parts();
    Ok(parts)
}

fn print_principal(json_mode: bool, principal: &UserPrincipal) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(principal)?;
    value["token"] = serde_json::json!("<redacted>");
    let groups: Vec<&str> = principal.groups.iter().map(String::as_str).collect();
    let text = format!(
        "id:     {}\ngroups: {}\ntoken:  <redacted, {} bytes>",
        principal.id.as_deref().unwrap_or("-"),
        if groups.is_empty() { "-".to_string() } else { groups.join(", ") },
        principal.token().len()
    );
    pout(json_mode, serde_json::json!({"ok":true,"principal":value}), &text)
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s.find('=').ok_or_else(|| "must be NAME=VALUE".to_string())?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn pout(json_mode: bool, value: serde_json::Value, text: &str) -> anyhow::Result<()> {
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("{text}");
    }
    Ok(())
}
