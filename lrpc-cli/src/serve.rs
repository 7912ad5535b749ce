//! `lrpc serve`: a small namespace for trying clients against.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use lrpc::transport::SerialTransport;
use lrpc::{Connection, HostError, Namespace, Server, ServerConfig, Value};
use signal_hook::consts::{SIGINT, SIGTERM};

/// Arguments for `lrpc serve`.
#[derive(clap::Args)]
pub struct ServeArgs {
    /// Address to bind.
    #[arg(long)]
    pub address: Option<IpAddr>,

    /// Port to listen on.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Pending-connection queue length.
    #[arg(long)]
    pub backlog: Option<i32>,

    /// Server settings file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Serve one peer on a serial device instead of listening.
    #[arg(long, value_name = "DEVICE", conflicts_with_all = ["address", "port", "backlog"])]
    pub serial: Option<PathBuf>,

    /// Serial baud rate.
    #[arg(long, default_value_t = 115_200)]
    pub baud: u32,
}

pub fn run(args: &ServeArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(p) => {
            ServerConfig::load(p).with_context(|| format!("failed to load {}", p.display()))?
        }
        None => ServerConfig::default(),
    };
    if let Some(a) = args.address {
        config = config.address(a);
    }
    if let Some(p) = args.port {
        config = config.port(p);
    }
    if let Some(b) = args.backlog {
        config = config.backlog(b);
    }

    if let Some(dev) = &args.serial {
        let port = SerialTransport::open(dev, args.baud, config.communication_timeout)
            .with_context(|| format!("failed to open {}", dev.display()))?;
        let mut conn = Connection::new(Box::new(port), config.native_format());
        let mut ns = demo();
        lrpc::serve(&mut conn, &mut ns)?;
        return Ok(());
    }

    let mut server = Server::bind(&config, demo())
        .with_context(|| format!("failed to bind {}:{}", config.address, config.port))?;
    for sig in [SIGINT, SIGTERM] {
        signal_hook::flag::register(sig, server.stop_flag())?;
    }
    eprintln!("listening on {}", server.local_addr()?);
    server.run()?;
    Ok(())
}

fn numbers(args: &[Value]) -> Result<Vec<f64>, HostError> {
    args.iter()
        .map(|a| {
            a.as_f64().ok_or_else(|| {
                HostError::failed(format!("expected number, got {}", a.type_name()))
            })
        })
        .collect()
}

fn extreme(args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Vec<Value>, HostError> {
    let xs = numbers(args)?;
    let first = xs
        .first()
        .copied()
        .ok_or_else(|| HostError::failed("at least one number expected"))?;
    Ok(vec![Value::from(xs.into_iter().fold(first, pick))])
}

/// The demo namespace.
fn demo() -> Namespace {
    let mut calls = 0i64;
    let mut ns = Namespace::new();
    ns.register("add", |args| {
        Ok(vec![Value::from(numbers(&args)?.into_iter().sum::<f64>())])
    })
    .register("echo", |args| Ok(args))
    .register("concat", |args| {
        let mut out = Vec::new();
        for a in &args {
            match a {
                Value::String(s) => out.extend_from_slice(s),
                other => out.extend_from_slice(other.to_string().as_bytes()),
            }
        }
        Ok(vec![Value::String(out)])
    })
    .register("counter", move |_| {
        calls += 1;
        Ok(vec![Value::integer(calls)])
    })
    .register("math.max", |args| extreme(&args, f64::max))
    .register("math.min", |args| extreme(&args, f64::min))
    .insert("math.pi", std::f64::consts::PI)
    .insert("config.name", "lrpc demo")
    .insert("config.version", env!("CARGO_PKG_VERSION"));
    ns
}
