use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use gcs_proto::geo::coords_valid;
use gcs_proto::waypoints::{MissionDump, MissionRow, WaypointFile};

use gcs_fc::autodetect::autodetect;
use gcs_fc::{
    CancelHandle, CommandConfig, ConnectOptions, HomeConfig, LinkConfig, MavlinkTransport, MissionConfig,
    ModeConfig, ModeConfirm, Session,
};

#[derive(Debug, Parser)]
#[command(name = "gcs", version, about = "Mini GCS - MAVLink commands and mission transfer")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate the config file without touching the link.
    Doctor,
    /// Probe candidate endpoints for a vehicle heartbeat.
    Probe,
    /// Connect and print what the vehicle reports.
    Status,
    Arm {
        /// Skip pre-arm checks.
        #[arg(long)]
        force: bool,
    },
    Disarm {
        #[arg(long)]
        force: bool,
    },
    /// Take off to ALT metres (vehicle must be armed in GUIDED).
    Takeoff { alt: f32 },
    Land,
    /// Switch flight mode by name, e.g. GUIDED or AUTO.
    Mode {
        name: String,
        /// Wait until the heartbeat reports the new mode.
        #[arg(long)]
        strict: bool,
    },
    /// Set home to LAT LON ALT, or to [home] from the config.
    Home {
        lat: Option<f64>,
        lon: Option<f64>,
        alt: Option<f64>,
    },
    Mission {
        #[command(subcommand)]
        cmd: MissionCmd,
    },
}

#[derive(Debug, Subcommand)]
enum MissionCmd {
    /// Upload a waypoint file (TOML).
    Upload { file: String },
    /// Download the vehicle's mission as TOML.
    Download {
        #[arg(long)]
        out: Option<String>,
    },
    /// Clear the vehicle's mission.
    Clear,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    #[serde(default)]
    link: LinkConfig,
    #[serde(default)]
    command: CommandConfig,
    #[serde(default)]
    mode: ModeConfig,
    #[serde(default)]
    mission: MissionConfig,

    home: Option<HomeConfig>,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path))?;
    toml::from_str(&s).context("parse config toml")
}

// Blocking MAVLink readers can stay parked in recv on a silent link.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")?;
    let res = rt.block_on(run(cfg, cli.cmd));
    rt.shutdown_timeout(SHUTDOWN_GRACE);
    res
}

async fn run(cfg: Config, cmd: Command) -> Result<()> {
    // Ctrl-C aborts whatever wait is in flight
    let cancel = CancelHandle::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Probe => probe(&cfg, cancel).await?,
        cmd => vehicle_cmd(&cfg, cmd, cancel).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    let link = &cfg.link;
    match link.endpoint.as_deref() {
        Some(ep) => {
            anyhow::ensure!(!ep.trim().is_empty(), "link.endpoint is empty");
            gcs_fc::transport::normalize_endpoint(ep, link.transport().default_baud)
                .context("link.endpoint")?;
        }
        None => {
            anyhow::ensure!(!link.candidates().is_empty(), "no link.endpoint and no autodetect candidates");
            info!("doctor: no endpoint, autodetect over {} candidate(s)", link.candidates().len());
        }
    }
    anyhow::ensure!(link.heartbeat_timeout_ms.unwrap_or(1) > 0, "link.heartbeat_timeout_ms must be > 0");
    anyhow::ensure!(link.probe_timeout_ms.unwrap_or(1) > 0, "link.probe_timeout_ms must be > 0");
    anyhow::ensure!(cfg.command.ack_timeout_ms.unwrap_or(1) > 0, "command.ack_timeout_ms must be > 0");
    anyhow::ensure!(cfg.mode.timeout_ms.unwrap_or(1) > 0, "mode.timeout_ms must be > 0");
    anyhow::ensure!(cfg.mission.item_timeout_ms.unwrap_or(1) > 0, "mission.item_timeout_ms must be > 0");
    anyhow::ensure!(cfg.mission.default_altitude() > 0.0, "mission.default_altitude_m must be > 0");

    if let Some(home) = &cfg.home {
        anyhow::ensure!(coords_valid(home.lat, home.lon), "home lat/lon out of range");
        anyhow::ensure!(home.alt.is_finite(), "home.alt invalid");
    } else {
        info!("doctor: no [home] section (gcs home needs explicit coordinates)");
    }

    info!("doctor: OK");
    Ok(())
}

async fn probe(cfg: &Config, cancel: CancelHandle) -> Result<()> {
    let link = &cfg.link;
    let mut candidates: Vec<String> = link.endpoint.iter().cloned().collect();
    candidates.extend(link.candidates());

    let res = autodetect(&candidates, link.probe_timeout(), link.local(), cancel, link.transport()).await?;
    match &res.chosen {
        Some(ep) => println!("CHOSEN: {}", ep),
        None => println!("CHOSEN: none"),
    }
    for p in res.probes {
        println!("probe endpoint={} hb={} {}ms note={}", p.endpoint, p.hb_seen, p.elapsed_ms, p.note);
    }
    Ok(())
}

async fn connect(cfg: &Config, cancel: CancelHandle) -> Result<Session<MavlinkTransport>> {
    let link = &cfg.link;
    let endpoint = match link.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(ep) => ep.to_string(),
        None => {
            let res = autodetect(&link.candidates(), link.probe_timeout(), link.local(), cancel.clone(), link.transport())
                .await?;
            res.chosen.context("autodetect failed: no heartbeat found")?
        }
    };

    let opts = ConnectOptions {
        wait: link.heartbeat_wait(),
        target_sys: link.target_sys,
        cancel,
    };
    Session::connect(&endpoint, link.local(), &link.transport(), opts)
        .await
        .with_context(|| format!("connect {}", endpoint))
}

async fn vehicle_cmd(cfg: &Config, cmd: Command, cancel: CancelHandle) -> Result<()> {
    let mut session = connect(cfg, cancel).await?;
    let policy = cfg.command.policy();

    let res = async {
        match cmd {
            Command::Status => {
                let st = session.status();
                println!("remote={} local={}", st.remote, st.local);
                println!("vehicle={:?} autopilot={:?}", st.vehicle_type, st.autopilot);
                println!("armed={}", st.armed);
                println!("mode={} ({:?})", st.mode.unwrap_or("?"), st.custom_mode);
                println!("last_heartbeat_age={:?}", st.hb_age());
                let names: Vec<&str> = session.mode_table().names().collect();
                println!("modes={}", names.join(","));
            }
            Command::Arm { force } => {
                let r = session.arm(force, policy).await?;
                println!("ARM: {:?} (exchange {})", r.result, r.token);
            }
            Command::Disarm { force } => {
                let r = session.disarm(force, policy).await?;
                println!("DISARM: {:?} (exchange {})", r.result, r.token);
            }
            Command::Takeoff { alt } => {
                anyhow::ensure!(alt > 0.0, "takeoff altitude must be > 0");
                let r = session.takeoff(alt, policy).await?;
                println!("TAKEOFF: {:?} (exchange {})", r.result, r.token);
            }
            Command::Land => {
                let r = session.land(policy).await?;
                println!("LAND: {:?} (exchange {})", r.result, r.token);
            }
            Command::Mode { name, strict } => {
                let confirm = if strict { ModeConfirm::Strict } else { cfg.mode.confirm() };
                let id = session.set_mode(&name, cfg.mode.timeout(), confirm).await?;
                println!("MODE: {} (id {})", name.to_ascii_uppercase(), id);
            }
            Command::Home { lat, lon, alt } => {
                let (lat, lon, alt, timeout) = match (lat, lon, alt, &cfg.home) {
                    (Some(lat), Some(lon), Some(alt), home) => {
                        let timeout = home.as_ref().map(|h| h.ack_timeout()).unwrap_or(Duration::from_secs(5));
                        (lat, lon, alt, timeout)
                    }
                    (None, None, None, Some(h)) => (h.lat, h.lon, h.alt, h.ack_timeout()),
                    (None, None, None, None) => anyhow::bail!("no coordinates given and no [home] in config"),
                    _ => anyhow::bail!("give all of LAT LON ALT or none"),
                };
                anyhow::ensure!(coords_valid(lat, lon), "lat/lon out of range");
                let ok = session.set_home(lat, lon, alt, timeout).await;
                println!("HOME: {} ({:.7}, {:.7}, {}m)", if ok { "accepted" } else { "not accepted" }, lat, lon, alt);
                anyhow::ensure!(ok, "vehicle did not accept the home position");
            }
            Command::Mission { cmd } => mission_cmd(cfg, &mut session, cmd).await?,
            // handled in main, no link needed
            Command::Doctor | Command::Probe => {}
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    session.disconnect();
    res
}

async fn mission_cmd(cfg: &Config, session: &mut Session<MavlinkTransport>, cmd: MissionCmd) -> Result<()> {
    let transfer = cfg.mission.transfer();
    match cmd {
        MissionCmd::Upload { file } => {
            let s = std::fs::read_to_string(&file).with_context(|| format!("read waypoints {}", file))?;
            let wp: WaypointFile = toml::from_str(&s).context("parse waypoints toml")?;
            for (i, w) in wp.waypoints.iter().enumerate() {
                anyhow::ensure!(coords_valid(w.lat, w.lon), "waypoint {} out of range", i + 1);
            }
            let alt = wp.altitude_m.unwrap_or(cfg.mission.default_altitude());
            let report = session.upload_waypoints(&wp.coords(), alt, transfer).await?;
            println!(
                "UPLOAD: {}/{} items, ack={:?} (exchange {})",
                report.sent, report.total, report.final_ack, report.token
            );
            info!("switch the vehicle to AUTO to fly the mission");
        }
        MissionCmd::Download { out } => {
            let items = session.download_mission(transfer).await?;
            let dump = MissionDump {
                items: items.iter().map(MissionRow::from).collect(),
            };
            let text = toml::to_string_pretty(&dump).context("serialize mission")?;
            match out {
                Some(path) => {
                    std::fs::write(&path, text).with_context(|| format!("write {}", path))?;
                    println!("DOWNLOAD: {} items -> {}", items.len(), path);
                }
                None => print!("{}", text),
            }
        }
        MissionCmd::Clear => {
            session.clear_mission()?;
            println!("CLEAR: sent");
        }
    }
    Ok(())
}
