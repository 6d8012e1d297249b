use clap::Parser;
use std::path::PathBuf;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

use wagpt::{Bot, BrowserSession, ChatPage, CompletionClient, Config};

#[derive(Parser)]
#[command(name = "wagpt")]
#[command(about = "WhatsApp Web auto-responder backed by a completion API")]
#[command(version)]
struct Cli {
    /// Config file to run
    config: PathBuf,

    /// Run the browser headless (overrides config)
    #[arg(long)]
    headless: bool,

    /// Validate config without running
    #[arg(long)]
    check: bool,

    /// Verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (only errors)
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> wagpt::Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let level = if cli.quiet {
        Level::ERROR
    } else {
        match cli.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    };

    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    let mut config = Config::load(&cli.config)?;

    if cli.check {
        println!("Config valid: {}", config.name);
        println!("  Chat: {}", config.chat);
        println!("  Trigger: {}", config.trigger);
        println!("  Model: {}", config.completion.model);
        println!("  Poll interval: {}ms", config.poll.interval_ms);
        return Ok(());
    }

    if cli.headless {
        config.browser.headless = true;
    }

    let completion = CompletionClient::from_env(&config.completion)?;

    println!("Running: {}", config.name);
    let session = BrowserSession::launch(&config.browser).await?;

    let outcome = run_bot(&config, &session, completion).await;
    if let Err(ref err) = outcome {
        error!("{err}");
    }

    println!("Press Enter to close the browser...");
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let _ = std::io::stdin().read_line(&mut line);
    })
    .await;

    session.close().await?;

    if outcome.is_err() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_bot(
    config: &Config,
    session: &BrowserSession,
    completion: CompletionClient,
) -> wagpt::Result<()> {
    let chat = ChatPage::new(session.page());
    chat.wait_until_ready(config.poll.ready_timeout()).await?;
    chat.open_chat(&config.chat).await?;

    let mut bot = Bot::new(config, session.page(), completion);
    bot.run().await
}
