use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use lifelink::activity::{Activity, UnknownActivity};
use lifelink::config::{LifelinkConfig, DEFAULT_CONSUMER_BIND};
use lifelink::generator::{SignalGenerator, SubjectSimulator};
use lifelink::producer::local_now;
use lifelink::profile::{FitnessLevel, Gender, SubjectProfile};
use lifelink::protocol::{encode_line, AlertMessage, HealthSnapshot, SessionSummary, SubscribeRequest};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_SESSION: &str = "resting,walking,running,exercising,resting";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subject_args = [
        Arg::with_name("subject")
            .long("subject")
            .value_name("ID")
            .help("Subject identifier")
            .takes_value(true)
            .default_value("USER001"),
        Arg::with_name("age")
            .long("age")
            .value_name("YEARS")
            .takes_value(true)
            .default_value("30")
            .validator(|v| match v.parse::<u32>() {
                Ok(_) => Ok(()),
                Err(_) => Err("Age must be a whole number".into()),
            }),
        Arg::with_name("gender")
            .long("gender")
            .takes_value(true)
            .possible_values(&["M", "F"])
            .default_value("M"),
        Arg::with_name("weight")
            .long("weight")
            .value_name("KG")
            .takes_value(true)
            .default_value("70"),
        Arg::with_name("height")
            .long("height")
            .value_name("CM")
            .takes_value(true)
            .default_value("170"),
        Arg::with_name("fitness")
            .long("fitness")
            .takes_value(true)
            .possible_values(&["low", "average", "high"])
            .default_value("average"),
        Arg::with_name("seed")
            .long("seed")
            .value_name("SEED")
            .help("Seed for a reproducible run")
            .takes_value(true),
    ];

    let matches = App::new("lifelink")
        .version("0.1.0")
        .about("LifeLink operator console")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table"])
                .default_value("table")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("watch")
                .about("Stream live alerts for one subject")
                .arg(Arg::with_name("subject").required(true).help("Subject identifier"))
                .arg(
                    Arg::with_name("address")
                        .short("a")
                        .long("address")
                        .value_name("ADDR")
                        .help("Aggregator consumer address")
                        .takes_value(true)
                        .default_value(DEFAULT_CONSUMER_BIND),
                ),
        )
        .subcommand(
            SubCommand::with_name("snapshot")
                .about("Simulate one reading and print its health snapshot")
                .args(&subject_args)
                .arg(
                    Arg::with_name("activity")
                        .long("activity")
                        .takes_value(true)
                        .possible_values(&activity_names())
                        .default_value("resting"),
                ),
        )
        .subcommand(
            SubCommand::with_name("session")
                .about("Simulate an activity sequence and summarise it")
                .args(&subject_args)
                .arg(
                    Arg::with_name("activities")
                        .long("activities")
                        .value_name("LIST")
                        .help("Comma separated activities, one tick each")
                        .takes_value(true)
                        .default_value(DEFAULT_SESSION),
                )
                .arg(
                    Arg::with_name("duration")
                        .long("duration")
                        .value_name("SECONDS")
                        .help("Simulated seconds per tick")
                        .takes_value(true)
                        .default_value("60"),
                ),
        )
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => LifelinkConfig::from_file(path)?,
        None => LifelinkConfig::default(),
    };
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("watch", Some(sub)) => handle_watch(sub).await,
        ("snapshot", Some(sub)) => handle_snapshot(sub, &config, format),
        ("session", Some(sub)) => handle_session(sub, &config, format),
        _ => Ok(()),
    }
}

fn activity_names() -> Vec<&'static str> {
    Activity::ALL.iter().map(|a| a.as_str()).collect()
}

fn parse_activities(list: &str) -> Result<Vec<Activity>, UnknownActivity> {
    list.split(',').map(|name| name.trim().parse::<Activity>()).collect()
}

fn profile_from_args(matches: &ArgMatches<'_>) -> Result<SubjectProfile, Box<dyn std::error::Error>> {
    let gender = match matches.value_of("gender") {
        Some("F") => Gender::Female,
        _ => Gender::Male,
    };
    let fitness_level = match matches.value_of("fitness") {
        Some("low") => FitnessLevel::Low,
        Some("high") => FitnessLevel::High,
        _ => FitnessLevel::Average,
    };

    let profile = SubjectProfile::new(
        matches.value_of("subject").unwrap_or("USER001"),
        matches.value_of("age").unwrap_or("30").parse()?,
        gender,
        matches.value_of("weight").unwrap_or("70").parse()?,
        matches.value_of("height").unwrap_or("170").parse()?,
        fitness_level,
    );
    profile.validate()?;
    Ok(profile)
}

fn seed_from_args(matches: &ArgMatches<'_>, config: &LifelinkConfig) -> Result<Option<u64>, Box<dyn std::error::Error>> {
    match matches.value_of("seed") {
        Some(seed) => Ok(Some(seed.parse()?)),
        None => Ok(config.producer.seed),
    }
}

async fn handle_watch(matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let subject = matches.value_of("subject").unwrap_or_default();
    let address = matches.value_of("address").unwrap_or(DEFAULT_CONSUMER_BIND);

    println!("{} {}", "Watching alerts for".bright_blue().bold(), subject.bright_cyan());
    println!("{} {} (Press Ctrl+C to stop)", "Connecting to".dimmed(), address);

    let stream = TcpStream::connect(address).await?;
    let (reader, mut writer) = stream.into_split();
    let request = encode_line(&SubscribeRequest { subscribe: subject.to_string() })?;
    writer.write_all(request.as_bytes()).await?;

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<AlertMessage>(&line) {
            Ok(alert) => println!(
                "{} {} {}",
                local_now().format("%H:%M:%S").to_string().dimmed(),
                "ALERT".bright_red().bold(),
                alert.alert.red()
            ),
            Err(_) => println!("{} {}", "?".yellow(), line),
        }
    }

    println!("{}", "Aggregator closed the connection".yellow());
    Ok(())
}

fn handle_snapshot(matches: &ArgMatches<'_>, config: &LifelinkConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let profile = profile_from_args(matches)?;
    let activity = matches.value_of("activity").unwrap_or("resting");
    let now = local_now();

    let generator = SignalGenerator::new(config.simulation.clone());
    let mut simulator = SubjectSimulator::new(generator, profile, seed_from_args(matches, config)?, now)?;
    let message = simulator.tick_as(activity, config.producer.duration_seconds, now)?;
    let snapshot = HealthSnapshot::from_message(&message);

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    let vitals = &snapshot.vital_signs;
    let wellness = &snapshot.wellness_scores;
    let performance = &snapshot.performance_metrics;
    println!("\n{}", format!("Health Snapshot: {}", snapshot.subject_id).bright_blue().bold());
    println!("{}", "═══════════════════════════════".bright_blue());
    println!("{} {}", "Activity:".bright_white(), snapshot.activity.to_string().bright_cyan());
    println!("{} {} bpm", "Heart Rate:".bright_white(), colour_heart_rate(vitals.heart_rate, config));
    println!("{} {}", "Blood Pressure:".bright_white(), vitals.blood_pressure);
    println!("{} {}%", "Blood Oxygen:".bright_white(), vitals.blood_oxygen);
    println!("{} {} °C", "Temperature:".bright_white(), vitals.temperature);
    println!("{} {} /min", "Respiratory Rate:".bright_white(), vitals.respiratory_rate);
    println!("{} {}", "Stress:".bright_white(), colour_stress(wellness.stress_level, config));
    println!("{} {}", "Energy:".bright_white(), wellness.energy_level);
    println!("{} {}", "Recovery Score:".bright_white(), wellness.recovery_score);
    println!("{} {:?}", "Cardio Fitness:".bright_white(), wellness.cardio_fitness);
    println!("{} {}", "Steps:".bright_white(), performance.steps_today);
    println!("{} {} kcal", "Calories:".bright_white(), performance.calories_burned);
    println!("{} {}", "VO2 Max:".bright_white(), performance.vo2_max);
    Ok(())
}

fn handle_session(matches: &ArgMatches<'_>, config: &LifelinkConfig, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let profile = profile_from_args(matches)?;
    let duration: u32 = matches.value_of("duration").unwrap_or("60").parse()?;
    let activities = parse_activities(matches.value_of("activities").unwrap_or(DEFAULT_SESSION))?;

    let start = local_now();
    let generator = SignalGenerator::new(config.simulation.clone());
    let mut simulator = SubjectSimulator::new(generator, profile, seed_from_args(matches, config)?, start)?;

    let mut messages = Vec::with_capacity(activities.len());
    let mut at = start;
    for activity in activities {
        at += chrono::Duration::seconds(i64::from(duration));
        simulator.set_activity(activity);
        let message = simulator.tick(duration, at)?;

        if format == "table" {
            let metrics = &message.physiological_metrics;
            println!(
                "{:<10} HR {:>3}  Stress {:>3}  BP {}/{}  Steps {:>6}",
                activity.to_string().bright_cyan(),
                metrics.heart_rate,
                metrics.stress_level,
                metrics.systolic_bp,
                metrics.diastolic_bp,
                message.session_totals.total_steps
            );
        }
        messages.push(message);
    }

    let Some(summary) = SessionSummary::from_messages(&messages) else {
        println!("{}", "No activities given".yellow());
        return Ok(());
    };

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let covered: Vec<_> = summary.activities_covered.iter().map(|a| a.as_str()).collect();
    println!("\n{}", "Session Summary".bright_blue().bold());
    println!("{}", "═══════════════".bright_blue());
    println!("{} {}", "Subject:".bright_white(), summary.subject_id);
    println!("{} {} s", "Duration:".bright_white(), summary.total_duration);
    println!("{} {}", "Activities:".bright_white(), covered.join(", "));
    println!("{} {} bpm", "Average HR:".bright_white(), summary.avg_heart_rate);
    println!("{} {}", "Max Stress:".bright_white(), summary.max_stress);
    println!("{} {} kcal", "Calories:".bright_white(), summary.total_calories);
    Ok(())
}

fn colour_heart_rate(heart_rate: u32, config: &LifelinkConfig) -> ColoredString {
    if f64::from(heart_rate) > config.aggregator.alerts.heart_rate_high {
        heart_rate.to_string().bright_red()
    } else {
        heart_rate.to_string().bright_green()
    }
}

fn colour_stress(stress: u32, config: &LifelinkConfig) -> ColoredString {
    if f64::from(stress) > config.aggregator.alerts.stress_high {
        stress.to_string().bright_red()
    } else {
        stress.to_string().bright_green()
    }
}
