use std::{env, fs};

use clap::Parser;
use cli::{Args, Commands};
use error::{CliError, ErrorContext, Result};
use get::{get_package, GetRequest};
use logging::setup_logging;
use parcel_config::config::{self, generate_default_config, get_config, Config, CONFIG_PATH};
use parcel_fetch::http_client::configure_http_client;
use parcel_utils::path::resolve_path;
use parse::parse_location;
use tracing::{info, warn};
use tree::show_tree;
use ureq::{
    http::{HeaderMap, HeaderName, HeaderValue},
    Proxy,
};
use utils::{parse_headers, COLOR, PROGRESS};

mod cli;
mod error;
mod get;
mod logging;
mod parse;
mod progress;
mod tree;
mod utils;

fn set_config_path(path: &str) -> Result<()> {
    let path = resolve_path(path)?;
    let path = if path.is_absolute() {
        path
    } else {
        env::current_dir()
            .with_context(|| "retrieving current directory".into())?
            .join(path)
    };
    *CONFIG_PATH.write().unwrap() = path;
    Ok(())
}

fn setup_http_client(args: &Args, config: Option<&Config>) -> Result<()> {
    let proxy = args
        .proxy
        .as_deref()
        .map(|proxy| {
            Proxy::new(proxy).map_err(|source| CliError::Proxy {
                proxy: proxy.to_string(),
                source,
            })
        })
        .transpose()?;
    let user_agent = args
        .user_agent
        .clone()
        .or_else(|| config.map(Config::user_agent));
    let headers = args.header.as_deref().map(|headers| {
        parse_headers(headers)
            .into_iter()
            .filter_map(|(key, value)| {
                let key = key.parse::<HeaderName>().ok()?;
                let value = value.parse::<HeaderValue>().ok()?;
                Some((key, value))
            })
            .collect::<HeaderMap>()
    });

    configure_http_client(|client| {
        if proxy.is_some() {
            client.proxy = proxy;
        }
        if user_agent.is_some() {
            client.user_agent = user_agent;
        }
        if headers.is_some() {
            client.headers = headers;
        }
    });
    Ok(())
}

fn print_config() -> Result<()> {
    let config_path = CONFIG_PATH.read().unwrap().clone();
    let content = match fs::read_to_string(&config_path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("Config file {} not found", config_path.display());
            Config::default_config().to_annotated_document()?.to_string()
        }
        Err(err) => {
            return Err(CliError::Io {
                action: format!("read {}", config_path.display()),
                source: err,
            })
        }
    };
    info!("{}", content.trim_end());
    Ok(())
}

fn print_env() -> Result<()> {
    let config = get_config();
    info!("PARCEL_CONFIG={}", CONFIG_PATH.read().unwrap().display());
    info!("PARCEL_GIT={}", config.git_binary()?.display());
    info!("PARCEL_MAX_DEPTH={}", config.max_depth());
    info!("PARCEL_USER_AGENT={}", config.user_agent());
    Ok(())
}

async fn handle_cli() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args);

    if args.no_color {
        *COLOR.write().unwrap() = false;
    }
    if args.no_progress || args.quiet {
        *PROGRESS.write().unwrap() = false;
    }

    if let Some(ref path) = args.config {
        set_config_path(path)?;
    }

    if let Commands::DefConfig = args.command {
        return Ok(generate_default_config()?);
    }

    config::init()?;
    setup_http_client(&args, Some(&get_config()))?;

    match args.command {
        Commands::Get {
            location,
            dest,
            clean,
            timeout,
            parallel,
        } => {
            get_package(GetRequest {
                location,
                dest,
                clean,
                timeout,
                parallel,
                json: args.json,
            })
            .await?
        }
        Commands::Parse {
            location,
            stdin,
            stdout,
        } => parse_location(&location, stdin, stdout, args.json)?,
        Commands::Tree { dir } => show_tree(&dir, args.json)?,
        Commands::Config => print_config()?,
        Commands::Env => print_env()?,
        Commands::DefConfig => unreachable!(),
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .build(),
        )
    }))
    .ok();

    if let Err(err) = handle_cli().await {
        progress::stop();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(1);
    }
}
