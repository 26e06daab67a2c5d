//! quizgate CLI: generate a quiz through the full gateway or inspect the
//! effective configuration.
//!
//! Usage:
//!   quizgate generate <topic> [difficulty] [quiz_type]   Generate one quiz
//!   quizgate config                                      Print effective config

use anyhow::{bail, Context};
use quizgate::config::GatewayConfig;
use quizgate::tasks::{QuizTasks, QuizType};
use quizgate::RequestCoordinator;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quizgate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "generate" => cmd_generate(&args[2..]).await,
        "config" => cmd_config(),
        "version" | "--version" | "-V" => {
            println!("quizgate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"quizgate: rate-limited, cached quiz generation

USAGE:
    quizgate <COMMAND> [ARGS]

COMMANDS:
    generate <topic> [difficulty] [quiz_type]   Generate a quiz (defaults: medium, MCQ)
    config                                      Print the effective configuration
    version                                     Show version information
    help                                        Show this help message

ENVIRONMENT:
    QUIZGATE_CONFIG             YAML configuration file
    OPENAI_API_KEY              Upstream API key
    RUST_LOG                    Log filter (default: quizgate=info)"#
    );
}

async fn cmd_generate(args: &[String]) -> anyhow::Result<()> {
    let Some(topic) = args.first() else {
        bail!("Usage: quizgate generate <topic> [difficulty] [quiz_type]");
    };
    let difficulty = args.get(1).map(String::as_str).unwrap_or("medium");
    let quiz_type: QuizType = args
        .get(2)
        .map(String::as_str)
        .unwrap_or("MCQ")
        .parse()?;

    let config = GatewayConfig::from_env().context("loading configuration")?;
    if config.upstream.api_key.is_none() {
        eprintln!("warning: OPENAI_API_KEY is not set; the upstream will likely reject the request");
    }
    let coordinator = RequestCoordinator::from_config(&config).context("building coordinator")?;
    let tasks = QuizTasks::new(coordinator);

    let quiz = tasks
        .generate_quiz("cli", topic, difficulty, quiz_type.as_str())
        .await
        .with_context(|| format!("generating {} quiz about '{}'", quiz_type, topic))?;

    println!("{}", quiz.text);
    eprintln!(
        "-- model: {}, source: {:?}, attempts: {}, fingerprint: {}",
        quiz.model, quiz.source, quiz.attempts, quiz.fingerprint
    );
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("loading configuration")?;
    config.validate()?;
    print!("{}", serde_yaml::to_string(&config)?);
    println!(
        "# upstream.api_key: {}",
        if config.upstream.api_key.is_some() { "set" } else { "unset" }
    );
    Ok(())
}
