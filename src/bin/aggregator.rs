use clap::{App, Arg};
use lifelink::aggregator::Aggregator;
use lifelink::collaborators::{LoggingDispatcher, MemoryArchive};
use lifelink::config::LifelinkConfig;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time;
use tracing::{error, info, warn};

const STATS_INTERVAL_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("lifelink-aggregator")
        .version("0.1.0")
        .about("Receives subject telemetry and pushes alerts to live consumers")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("producer-bind")
                .long("producer-bind")
                .value_name("ADDR")
                .help("Address producers connect to")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("consumer-bind")
                .long("consumer-bind")
                .value_name("ADDR")
                .help("Address consumers subscribe on")
                .takes_value(true),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => LifelinkConfig::from_file(path)?,
        None => LifelinkConfig::default(),
    };
    if let Some(addr) = matches.value_of("producer-bind") {
        config.aggregator.producer_bind = addr.to_string();
    }
    if let Some(addr) = matches.value_of("consumer-bind") {
        config.aggregator.consumer_bind = addr.to_string();
    }

    println!("LifeLink Aggregator");
    println!("===================");

    let (aggregator, hook_worker) = Aggregator::new(config.aggregator.alerts)
        .with_dispatcher(Arc::new(LoggingDispatcher))
        .with_archive(Arc::new(MemoryArchive::new()))
        .spawn_hook_worker();
    let aggregator = Arc::new(aggregator);

    let producers = TcpListener::bind(&config.aggregator.producer_bind).await?;
    info!("accepting producers on {}", config.aggregator.producer_bind);
    let consumers = TcpListener::bind(&config.aggregator.consumer_bind).await?;
    info!("accepting consumers on {}", config.aggregator.consumer_bind);

    let producer_server = tokio::spawn(accept_producers(producers, Arc::clone(&aggregator)));
    let consumer_server = tokio::spawn(accept_consumers(consumers, Arc::clone(&aggregator)));

    let stats_aggregator = Arc::clone(&aggregator);
    let stats_task = tokio::spawn(async move {
        let mut interval = time::interval(Duration::from_secs(STATS_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let stats = stats_aggregator.stats();
            info!(
                "received={} malformed={} alerts={} delivered={} dropped={} hook_drops={} consumers={}",
                stats.messages_received,
                stats.malformed_messages,
                stats.alerts_raised,
                stats.alerts_delivered,
                stats.alerts_dropped,
                stats.hook_jobs_dropped,
                stats_aggregator.registry().len()
            );
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    producer_server.abort();
    consumer_server.abort();
    stats_task.abort();
    drop(aggregator);
    if time::timeout(Duration::from_secs(2), hook_worker).await.is_err() {
        warn!("hook worker still busy at exit");
    }
    println!("LifeLink Aggregator stopped");

    Ok(())
}

async fn accept_producers(listener: TcpListener, aggregator: Arc<Aggregator>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("producer connected: {}", addr);
                let aggregator = Arc::clone(&aggregator);
                tokio::spawn(async move {
                    match aggregator.serve_producer(stream).await {
                        Ok(count) => info!("producer {} disconnected after {} messages", addr, count),
                        Err(e) => warn!("producer {} error: {}", addr, e),
                    }
                });
            }
            Err(e) => error!("failed to accept producer: {}", e),
        }
    }
}

async fn accept_consumers(listener: TcpListener, aggregator: Arc<Aggregator>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("consumer connected: {}", addr);
                let aggregator = Arc::clone(&aggregator);
                tokio::spawn(async move {
                    if let Err(e) = aggregator.serve_consumer(stream).await {
                        warn!("consumer {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => error!("failed to accept consumer: {}", e),
        }
    }
}
