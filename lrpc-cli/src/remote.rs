//! Client commands: call, get, set.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use lrpc::{ClientConfig, DEFAULT_PORT, Handle, Proxy};

use crate::json;

/// Where and how to reach the server.
#[derive(clap::Args)]
pub struct Target {
    /// Server address (host:port).
    #[arg(short, long, default_value_t = format!("127.0.0.1:{DEFAULT_PORT}"))]
    pub addr: String,

    /// Talk over a serial device instead of TCP.
    #[arg(long, value_name = "DEVICE")]
    pub serial: Option<PathBuf>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,

    /// Client settings file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Seconds to wait for a call's result (default: forever).
    #[arg(long)]
    pub wait: Option<f64>,
}

impl Target {
    fn open(&self) -> Result<Handle> {
        let mut config = match &self.config {
            Some(p) => ClientConfig::load(p)
                .with_context(|| format!("failed to load {}", p.display()))?,
            None => ClientConfig::default(),
        };
        if let Some(secs) = self.wait {
            let wait = Duration::try_from_secs_f64(secs).context("invalid --wait")?;
            config = config.wait_timeout(Some(wait));
        }
        match &self.serial {
            Some(dev) => Handle::open_serial(dev, self.baud, config)
                .with_context(|| format!("failed to open {}", dev.display())),
            None => Handle::connect(self.addr.as_str(), config)
                .with_context(|| format!("failed to connect to {}", self.addr)),
        }
    }
}

/// Arguments for `lrpc call`.
#[derive(clap::Args)]
pub struct CallArgs {
    #[command(flatten)]
    pub target: Target,

    /// Dotted path of the function (e.g. `math.max`).
    pub path: String,

    /// Arguments, each parsed as JSON or taken as a plain string.
    #[arg(allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Arguments for `lrpc get`.
#[derive(clap::Args)]
pub struct GetArgs {
    #[command(flatten)]
    pub target: Target,

    /// Dotted path of the value.
    pub path: String,
}

/// Arguments for `lrpc set`.
#[derive(clap::Args)]
pub struct SetArgs {
    #[command(flatten)]
    pub target: Target,

    /// Dotted path to assign (e.g. `config.name`).
    pub path: String,

    /// New value, parsed as JSON or taken as a plain string.
    #[arg(allow_hyphen_values = true)]
    pub value: String,
}

/// Builds the proxy chain for a dotted path.
fn resolve<'h>(handle: &'h Handle, path: &str) -> Result<Proxy<'h>> {
    let mut segments = path.split('.').filter(|s| !s.is_empty());
    let first = segments.next().context("empty path")?;
    let mut proxy = handle.index(first)?;
    for seg in segments {
        proxy = proxy.index(seg)?;
    }
    Ok(proxy)
}

pub fn call(args: &CallArgs) -> Result<()> {
    let handle = args.target.open()?;
    let values: Vec<_> = args.args.iter().map(|a| json::parse_arg(a)).collect();
    let results = resolve(&handle, &args.path)?.call(&values)?;
    for v in &results {
        println!("{}", json::to_json(v));
    }
    handle.close();
    Ok(())
}

pub fn get(args: &GetArgs) -> Result<()> {
    let handle = args.target.open()?;
    let value = resolve(&handle, &args.path)?.get()?;
    println!("{}", serde_json::to_string_pretty(&json::to_json(&value))?);
    handle.close();
    Ok(())
}

pub fn set(args: &SetArgs) -> Result<()> {
    let handle = args.target.open()?;
    let value = json::parse_arg(&args.value);
    match args.path.rsplit_once('.') {
        Some((table, key)) => resolve(&handle, table)?.set(key, value)?,
        None => handle.set(args.path.as_str(), value)?,
    }
    handle.close();
    Ok(())
}
