use std::env;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;

use cfworkerbot::config::Settings;
use cfworkerbot::services;
use cfworkerbot::services::cloudflare::CloudflareApi;
use cfworkerbot::services::git::GitService;
use cfworkerbot::services::session::SessionStore;
use cfworkerbot::services::telegram::{AppState, Command};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_help() {
    println!("cfworkerbot {} - Telegram bot that deploys Cloudflare Workers", VERSION);
    println!();
    println!("USAGE:");
    println!("    cfworkerbot [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -h, --help       Print help information");
    println!("    -v, --version    Print version information");
    println!();
    println!("CONFIGURATION:");
    println!("    Bot token:  BOT_TOKEN environment variable, or \"bot_token\"");
    println!("                in ~/.cfworkerbot/settings.json");
    println!("    Sessions:   ~/.cfworkerbot/sessions.json");
}

fn print_version() {
    println!("cfworkerbot {}", VERSION);
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() > 1 {
        match args[1].as_str() {
            "-h" | "--help" => {
                print_help();
                return;
            }
            "-v" | "--version" => {
                print_version();
                return;
            }
            _ => {
                eprintln!("Unknown option: {}", args[1]);
                eprintln!("Use --help for usage information");
                std::process::exit(1);
            }
        }
    }

    let settings = match Settings::load_with_error() {
        Ok(settings) => settings,
        Err(e) => {
            println!("  ⚠ {e}, using defaults");
            Settings::default()
        }
    };

    let Some(token) = settings.resolve_bot_token() else {
        eprintln!("Error: no Telegram bot token configured.");
        eprintln!("Set the BOT_TOKEN environment variable, or add \"bot_token\"");
        eprintln!("to ~/.cfworkerbot/settings.json");
        std::process::exit(1);
    };

    let Some(sessions_path) = Settings::sessions_path() else {
        eprintln!("Error: could not determine the home directory.");
        std::process::exit(1);
    };
    let sessions = match SessionStore::open(sessions_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: could not open the session store: {e}");
            std::process::exit(1);
        }
    };

    let git = GitService::new(settings.clone_temp_dir());
    if let Err(e) = git.cleanup_all().await {
        println!("  ⚠ Failed to clean up leftover clone directories: {e}");
    }

    let cloudflare = CloudflareApi::new(&settings.cloudflare_api_base, &settings.workers_subdomain);
    let bot = Bot::new(token);

    println!("cfworkerbot {} starting", VERSION);

    if let Err(e) = bot.set_my_commands(Command::bot_commands()).await {
        println!("  ⚠ Failed to set bot commands: {e}");
    }

    println!("  ✓ Bot connected, listening for updates");

    let state = Arc::new(AppState::new(sessions, cloudflare, git));
    services::telegram::run(bot, state).await;

    println!("  ✓ Shutdown complete");
}
