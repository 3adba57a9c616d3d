mod baseline;
mod collector;
mod config;
mod diagnostics;
mod message;
mod sensor;
mod shutdown;
mod stream;

use std::env;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use baseline::{BaselineManager, FileBaselineStore};
use collector::{CollectorLoop, LoopExit};
use config::SystemConfig;
use log::{error, info, warn};
use sensor::{SensorClient, Sgp30Client};
use shutdown::ShutdownFlag;
use stream::CollectorStream;

const PROBE_BACKOFF: Duration = Duration::from_secs(1);

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        let program = args.first().map(String::as_str).unwrap_or("aircast");
        eprintln!("usage: {} <IP_ADDRESS> <PORT>", program);
        process::exit(2);
    }

    let addr = match parse_collector_addr(&args[1], &args[2]) {
        Ok(addr) => addr,
        Err(reason) => {
            error!("fatal: {}", reason);
            process::exit(1);
        }
    };

    if let Err(err) = run(addr) {
        error!("fatal: {:#}", err);
        process::exit(1);
    }
}

fn parse_collector_addr(ip: &str, port: &str) -> Result<SocketAddr, String> {
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| format!("{:?} is not an IPv4 address", ip))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("{:?} is not a port number", port))?;
    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}

fn run(addr: SocketAddr) -> Result<()> {
    info!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    let config = SystemConfig::from_env();

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || handler_flag.set()).context("installing signal handler")?;

    let mut sensor = Sgp30Client::open(&config.sensor.i2c_device)
        .with_context(|| format!("opening I2C bus {}", config.sensor.i2c_device))?;

    // The loop cannot run without a sensor; block here until one answers.
    if !sensor::wait_until_ready(&mut sensor, &shutdown, PROBE_BACKOFF) {
        info!("stopped before the sensor became ready");
        sensor.release();
        return Ok(());
    }

    log_identity(&mut sensor);

    let store = FileBaselineStore::new(&config.baseline.store_path);
    let mut baseline = BaselineManager::new(
        store,
        config.baseline.max_age,
        config.baseline.persist_interval_cycles,
    );
    baseline.startup(&mut sensor);
    info!("calibration state: {:?}", baseline.state());

    log_initial_raw(&mut sensor);

    if let Some(mg) = config.sensor.absolute_humidity_mg_m3 {
        match sensor.set_absolute_humidity(mg) {
            Ok(()) => info!("humidity compensation enabled at {} mg/m^3", mg),
            Err(err) => warn!("enabling humidity compensation failed: {}", err),
        }
    }

    let mut stream = CollectorStream::connect(addr)
        .with_context(|| format!("connecting to collector at {}", addr))?;

    let mut collector = CollectorLoop::new(
        baseline,
        config.sampling.interval,
        config.sampling.stats_interval_cycles,
    );
    let exit = collector.run(&mut sensor, &mut stream, &shutdown);
    match exit {
        LoopExit::ConnectionClosed => info!("collector connection closed, shutting down"),
        LoopExit::Cancelled => info!("stopped by signal"),
    }

    // Release the socket and the sensor bus explicitly; a closed peer or a
    // signal is an orderly exit, not an abort.
    stream.close();
    sensor.release();
    Ok(())
}

fn log_identity(sensor: &mut dyn SensorClient) {
    match sensor.identify() {
        Ok(identity) => info!(
            "sensor {} feature set 0x{:02x}",
            identity.product, identity.feature_set_version
        ),
        Err(err) => warn!("reading feature set failed: {}", err),
    }
    match sensor.serial_id() {
        Ok(serial) => info!("sensor serial {:012x}", serial),
        Err(err) => warn!("reading serial ID failed: {}", err),
    }
}

fn log_initial_raw(sensor: &mut dyn SensorClient) {
    match sensor.read_raw() {
        Ok(raw) => info!(
            "ethanol raw signal {}, H2 raw signal {}",
            raw.ethanol, raw.h2
        ),
        Err(err) => warn!("reading initial raw signals failed: {}", err),
    }
}
