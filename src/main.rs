use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use dprcon::{
    client::DEFAULT_TIMEOUT,
    clock::MonotonicClock,
    config::{PingConfig, Profiles, RconConfig, RconOverrides},
    dns::{AddressFamily, DEFAULT_PORT},
    master,
    ping::{self, PingEvent, PingProtocol, Pinger},
    stats::PingStats,
};
use log::{debug, info};
use tokio::signal;

#[derive(Parser)]
#[command(name = "dprcon")]
#[command(about = "Rcon, status and ping client for Quake and DarkPlaces servers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute an rcon command
    Rcon(RconArgs),
    /// Show server info and players
    Status {
        #[arg(short, long)]
        server: String,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT.as_secs_f64())]
        timeout: f64,
    },
    /// Measure round trip time to a server
    Ping(PingArgs),
    /// List servers known to a master server
    Servers {
        #[arg(short, long, default_value = master::DEFAULT_MASTER)]
        master: String,
        #[arg(long, default_value = "Xonotic")]
        game: String,
        #[arg(long, default_value_t = 3)]
        protocol: u32,
        #[arg(long, default_value_t = 2.0)]
        timeout: f64,
    },
}

#[derive(Args)]
struct RconArgs {
    /// Profile file, ~/.xrcon.ini by default
    #[arg(long)]
    config: Option<PathBuf>,
    /// Server profile from the config file
    #[arg(short, long)]
    name: Option<String>,
    #[arg(short, long)]
    server: Option<String>,
    /// Asked for interactively when neither given nor in the profile
    #[arg(short, long, env = "DPRCON_PASSWORD", hide_env_values = true)]
    password: Option<String>,
    /// 0: plain text password, 1: time based HMAC, 2: challenge based HMAC
    #[arg(short = 't', long = "type", value_parser = clap::value_parser!(i64).range(0..=2))]
    secure: Option<i64>,
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(required = true, trailing_var_arg = true)]
    command: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Q2,
    Q3,
    Qfusion,
}

impl From<ProtocolArg> for PingProtocol {
    fn from(arg: ProtocolArg) -> Self {
        match arg {
            ProtocolArg::Q2 => PingProtocol::Q2,
            ProtocolArg::Q3 => PingProtocol::Q3,
            ProtocolArg::Qfusion => PingProtocol::QFusion,
        }
    }
}

#[derive(Args)]
struct PingArgs {
    #[arg(short = 't', long = "protocol", value_enum, default_value = "q2")]
    protocol: ProtocolArg,
    /// UDP port where to send packets
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,
    /// Interval in seconds between packets
    #[arg(short, long, default_value_t = PingConfig::DEFAULT_INTERVAL.as_secs_f64())]
    interval: f64,
    #[arg(short, long, default_value_t = 0)]
    count: u64,
    /// Use only IPv4
    #[arg(short = '4', conflicts_with = "ipv6")]
    ipv4: bool,
    /// Use only IPv6
    #[arg(short = '6')]
    ipv6: bool,
    server: String,
}

fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).with_context(|| format!("bad duration {value}"))
}

async fn rcon(args: RconArgs) -> Result<()> {
    let profiles = match &args.config {
        Some(path) => Profiles::load(path)?,
        None => Profiles::load_default()?,
    };
    let overrides = RconOverrides {
        server: args.server,
        password: args.password,
        secure_rcon: args.secure,
        timeout: args.timeout.map(seconds).transpose()?,
    };
    let config = profiles.rcon_config(args.name.as_deref(), overrides, || {
        rpassword::prompt_password("Password: ")
    })?;

    let mut client = config.client()?;
    client
        .connect()
        .await
        .with_context(|| format!("can't connect to {}", config.server))?;

    let output = client.execute(args.command.join(" "), config.timeout).await;
    client.close()?;

    print!("{}", String::from_utf8_lossy(&output?));
    Ok(())
}

async fn status(server: String, timeout: f64) -> Result<()> {
    let config = RconConfig {
        server,
        timeout: seconds(timeout)?,
        ..RconConfig::default()
    };
    let mut client = config.client()?;
    client.connect().await?;
    let status = client.get_status().await;
    client.close()?;
    let status = status.context("no status reply")?;

    let mut vars: Vec<_> = status.vars.iter().collect();
    vars.sort();
    for (key, value) in vars {
        println!(
            "{:<20} {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }

    println!("\n{} players", status.players.len());
    for player in &status.players {
        println!(
            "{:>6} {:>5} {}",
            player.frags,
            player.ping,
            String::from_utf8_lossy(&player.name)
        );
    }
    Ok(())
}

fn print_summary(server: &str, stats: &PingStats) {
    println!("\n--- {} ping statistics ---", server);
    println!("{}", stats);
}

async fn xping(args: PingArgs) -> Result<()> {
    let family = match (args.ipv4, args.ipv6) {
        (true, _) => AddressFamily::V4,
        (_, true) => AddressFamily::V6,
        _ => AddressFamily::Any,
    };
    let config = PingConfig {
        server: args.server,
        port: args.port,
        protocol: args.protocol.into(),
        interval: seconds(args.interval)?,
        count: args.count,
        family,
    };
    config.validate()?;

    let target = ping::find_server(&config.server, config.port, config.family)
        .await
        .context("can't find server")?;
    let socket = ping::make_socket(target).await?;
    println!("XPING {} ({}) port: {}", config.server, target.ip(), config.port);

    let mut pinger = Pinger::new(socket, MonotonicClock::new(), target, config.protocol)
        .with_callback(move |event| match event {
            PingEvent::Reply { rtt, .. } => println!(
                "{} port={} time={:.2} ms",
                target.ip(),
                target.port(),
                rtt.as_secs_f64() * 1000.0
            ),
            PingEvent::Duplicate { .. } => {
                println!("{} port={} DUPLICATE", target.ip(), target.port())
            }
            PingEvent::Lost { seq } => debug!("no reply for probe {}", seq),
        });

    // Ctrl-C only stops the loop, the statistics gathered so far still get
    // printed
    let result = tokio::select! {
        result = pinger.do_ping(config.count, config.interval) => result,
        _ = signal::ctrl_c() => {
            info!("interrupted");
            Ok(())
        }
    };

    print_summary(&config.server, pinger.stats());
    Ok(result?)
}

async fn servers(master_server: String, game: String, protocol: u32, timeout: f64) -> Result<()> {
    let (host, port) = dprcon::dns::parse_server_addr(&master_server, master::DEFAULT_MASTER_PORT)?;
    let servers = master::query_master(&host, port, &game, protocol, seconds(timeout)?).await?;
    for server in &servers {
        println!("{}", server);
    }
    info!("{} servers", servers.len());
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match Cli::parse().command {
        Command::Rcon(args) => rcon(args).await,
        Command::Status { server, timeout } => status(server, timeout).await,
        Command::Ping(args) => xping(args).await,
        Command::Servers {
            master: master_server,
            game,
            protocol,
            timeout,
        } => servers(master_server, game, protocol, timeout).await,
    }
}
