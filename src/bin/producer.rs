use clap::{App, Arg};
use lifelink::collaborators::InMemoryDirectory;
use lifelink::config::LifelinkConfig;
use lifelink::generator::SignalGenerator;
use lifelink::producer::TelemetryProducer;
use lifelink::profile::SubjectProfile;
use lifelink::relay::{RelayLink, TcpConnector};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("lifelink-producer")
        .version("0.1.0")
        .about("Simulates subjects and streams their telemetry to the aggregator")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("address")
                .short("a")
                .long("address")
                .value_name("ADDR")
                .help("Aggregator address")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("interval")
                .short("i")
                .long("interval")
                .value_name("MS")
                .help("Milliseconds between cycles")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(ms) if ms > 0 => Ok(()),
                    _ => Err("Interval must be a positive number".into()),
                }),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Base seed for reproducible runs")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be a valid number".into()),
                }),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => LifelinkConfig::from_file(path)?,
        None => LifelinkConfig::default(),
    };
    if let Some(address) = matches.value_of("address") {
        config.relay.address = address.to_string();
    }
    if let Some(interval) = matches.value_of("interval") {
        config.producer.tick_interval_ms = interval.parse()?;
    }
    if let Some(seed) = matches.value_of("seed") {
        config.producer.seed = Some(seed.parse()?);
    }

    println!("LifeLink Producer");
    println!("=================");

    let (link, link_task) = RelayLink::spawn(TcpConnector::new(config.relay.address.clone()), &config.relay);
    let producer = Arc::new(TelemetryProducer::new(
        config.producer.clone(),
        SignalGenerator::new(config.simulation.clone()),
        Arc::new(link.clone()),
    ));

    let subjects = if config.subjects.is_empty() {
        vec![SubjectProfile::default()]
    } else {
        config.subjects.clone()
    };
    let directory = InMemoryDirectory::new(subjects);
    let added = producer.load_from_directory(&directory).await;
    if added == 0 {
        warn!("no subjects registered; nothing will be published");
    }
    info!("simulating {} subject(s), relaying to {}", added, config.relay.address);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_producer = Arc::clone(&producer);
    let producer_task = tokio::spawn(async move { run_producer.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    let _ = shutdown_tx.send(true);
    producer_task.await?;

    let stats = producer.stats().await;
    let link_stats = link.stats();
    info!(
        "cycles={} published={} skipped={} tick_errors={} sent={} lost_in_flight={} epochs={}",
        stats.cycles,
        stats.published,
        stats.skipped,
        stats.tick_errors,
        link_stats.sent,
        link_stats.lost_in_flight,
        link_stats.epoch
    );

    // The link task keeps reconnecting while any handle lives
    link_task.abort();
    println!("LifeLink Producer stopped");

    Ok(())
}
