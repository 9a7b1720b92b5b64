// ============================================================================
// polyworld — terminal front-end for the Polyworld operator engine
// ============================================================================
// Usage:
//   polyworld chat                     Interactive chat session
//   polyworld store show               Show the local client store
//   polyworld store export             Export the store as JSON
//   polyworld store clear              Forget the device identity
//
// Inside `chat`, plain lines go to the engine (commands like `buypoli` or
// `showembers` included). Local directives:
//   /select <id>     switch to an Ember from the gallery
//   /train           start or resume Ember training
//   /avatar <file>   provide the avatar capture during training
//   /upload <file>   attach the long description file during training
//   /tts on|off      toggle spoken output
//   /quit            leave
// ============================================================================

use std::io::Write as _;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use polyworld_core::config::GatewayConfig;
use polyworld_core::render::EmberCard;
use polyworld_core::timers::Milestone;
use polyworld_core::{
    ChatEngine, ChatSurface, Gateway, HttpGateway, LocalStore, ProcessOutcome, RenderOp, Role,
    SignerError, SpeechSynth, StaticToken, TxRequest, VoiceProfile, WalletSigner,
};

/// Polyworld conversational operator
#[derive(Parser)]
#[command(name = "polyworld", version, about = "Chat-driven token operator and Ember trainer")]
struct Cli {
    /// Path to the client store (default: ~/.polyworld/client.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive chat session against the remote gateway
    Chat {
        /// Start with spoken output disabled
        #[arg(long)]
        no_tts: bool,
    },

    /// Inspect or manage the local client store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Show the device identity and preferences
    Show,
    /// Export the store contents as JSON
    Export,
    /// Forget the device identity and primary address
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Chat { no_tts } => cmd_chat(cli.db_path, no_tts).await,
        Commands::Store { command } => cmd_store(cli.db_path, command),
    }
}

// ============================================================================
// Chat session
// ============================================================================

async fn cmd_chat(db_path: Option<String>, no_tts: bool) -> Result<()> {
    let store = Arc::new(LocalStore::open(db_path.as_deref())?);
    let config = GatewayConfig::from_env();
    let token = std::env::var("POLYWORLD_API_TOKEN").ok();
    let gateway: Arc<dyn Gateway> = Arc::new(HttpGateway::new(config, Arc::new(StaticToken(token))));
    let signer: Arc<dyn WalletSigner> = Arc::new(NoWalletSigner);
    let surface: Arc<dyn ChatSurface> = Arc::new(ConsoleSurface);
    let synth: Arc<dyn SpeechSynth> = Arc::new(ConsoleSynth);

    let mut engine = ChatEngine::new(gateway, signer, synth, surface, store);
    if no_tts {
        engine.set_tts_enabled(false);
    }
    let burn = engine.burn_loop();
    let _burn_task = burn.spawn();

    println!("Polyworld operator. Type a message, a command (buypoli, showembers…), or /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(directive) = line.strip_prefix('/') {
            if !run_directive(&mut engine, directive).await? {
                break;
            }
            continue;
        }
        if engine.process(line).await == ProcessOutcome::Busy {
            println!("(still working on the previous message)");
        }
    }
    Ok(())
}

/// Returns false when the session should end.
async fn run_directive(engine: &mut ChatEngine, directive: &str) -> Result<bool> {
    let (verb, rest) = directive
        .split_once(char::is_whitespace)
        .unwrap_or((directive, ""));
    let arg = rest.trim();
    match verb {
        "quit" | "exit" => return Ok(false),
        "select" if !arg.is_empty() => engine.select_ember(arg).await,
        "train" => engine.continue_or_start_training().await,
        "avatar" if !arg.is_empty() => {
            let bytes =
                std::fs::read(arg).with_context(|| format!("could not read {}", arg))?;
            engine.set_avatar_draft(format!("hex:{}", hex::encode(bytes)));
        }
        "upload" if !arg.is_empty() => {
            let content = std::fs::read_to_string(arg)
                .with_context(|| format!("could not read {}", arg))?;
            engine.handle_description_upload(&content).await;
        }
        "tts" => match arg {
            "on" => engine.set_tts_enabled(true),
            "off" => engine.set_tts_enabled(false),
            _ => println!("usage: /tts on|off"),
        },
        _ => println!(
            "directives: /select <id>, /train, /avatar <file>, /upload <file>, /tts on|off, /quit"
        ),
    }
    Ok(true)
}

// ============================================================================
// Console collaborators
// ============================================================================

struct ConsoleSurface;

impl ChatSurface for ConsoleSurface {
    fn render(&self, op: RenderOp) {
        match op {
            RenderOp::Bubble { role, text } => {
                let prefix = match role {
                    Role::User => "you ",
                    Role::Assistant => "poly",
                    Role::System => "sys ",
                };
                println!("{} | {}", prefix, text);
            }
            RenderOp::Status { text }
            | RenderOp::BlinkStart { text }
            | RenderOp::BlinkStop { text } => println!("     ·· {}", text),
            RenderOp::PromptHint { text } => println!("     [{}]", text),
            RenderOp::PromptReset => {}
            RenderOp::Thinking { speaker, on } => {
                if on {
                    println!("     {} is thinking…", speaker);
                }
            }
            RenderOp::Qr { payload } => println!("     QR: {}", payload),
            RenderOp::CameraVisible { .. } | RenderOp::ChatVisible { .. } => {}
            RenderOp::MountAvatarCapture { ember_id } => {
                println!("     (avatar capture ready for {}; use /avatar <file>)", ember_id);
            }
            RenderOp::FileUploadVisible { visible } => {
                if visible {
                    println!("     (attach the description with /upload <file>)");
                }
            }
            RenderOp::EmberGallery { cards, offer_create } => {
                print_gallery(&cards, offer_create);
            }
            RenderOp::SelectEmber { name, .. } => println!("     ── {} has joined ──", name),
            RenderOp::RestoreHost => println!("     ── Polistar has returned ──"),
            RenderOp::ShowAddress { short } => match short {
                Some(short) => println!("     wallet {}", short),
                None => println!("     wallet (none)"),
            },
            RenderOp::BalanceUpdate { label, amount } => {
                println!("     {:<12} {:.2}", label, amount);
            }
        }
    }
}

fn print_gallery(cards: &[EmberCard], offer_create: bool) {
    if cards.is_empty() {
        println!("     (no embers yet)");
    }
    for card in cards {
        let mut line = format!("     • {} [{}]", card.name, card.id);
        if let Some(tagline) = &card.tagline {
            line.push_str(&format!(" — {}", tagline));
        }
        if card.in_training {
            line.push_str(" (in training)");
        } else if card.minted {
            line.push_str(" (minted)");
        }
        println!("{}", line);
    }
    if offer_create {
        println!("     (type /train to raise a new Ember)");
    }
}

/// Spoken output as a console line; the terminal has no synthesizer.
struct ConsoleSynth;

#[async_trait]
impl SpeechSynth for ConsoleSynth {
    async fn speak(&self, text: &str, profile: &VoiceProfile) {
        println!("🔊 [{}] {}", profile.lang, text);
    }

    fn cancel(&self) {}
}

/// The terminal has no browser wallet; flows that need one report it.
struct NoWalletSigner;

#[async_trait]
impl WalletSigner for NoWalletSigner {
    async fn connect(&self) -> Result<String, SignerError> {
        Err(SignerError::Unavailable(
            "no browser wallet in a terminal session".to_string(),
        ))
    }

    async fn sign_message(&self, _message: &str) -> Result<String, SignerError> {
        Err(SignerError::Unavailable(
            "no browser wallet in a terminal session".to_string(),
        ))
    }

    async fn send_transaction(&self, _tx: &TxRequest) -> Result<String, SignerError> {
        Err(SignerError::Unavailable(
            "no browser wallet in a terminal session".to_string(),
        ))
    }
}

// ============================================================================
// Store inspection
// ============================================================================

fn cmd_store(db_path: Option<String>, command: StoreCommands) -> Result<()> {
    let store = LocalStore::open(db_path.as_deref())?;
    match command {
        StoreCommands::Show => store_show(&store),
        StoreCommands::Export => store_export(&store),
        StoreCommands::Clear => store_clear(&store),
    }
}

fn store_show(store: &LocalStore) -> Result<()> {
    println!("=== Polyworld Client Store ===");
    println!("Store: {}", store.path().display());
    println!();
    match store.load_user()? {
        Some(user) => {
            println!("User:     {}", user.address);
            println!(
                "Wallet:   {}",
                if user.generated { "generated on-device" } else { "connected" }
            );
        }
        None => println!("User:     (none)"),
    }
    match store.primary_address()? {
        Some(address) => println!("Primary:  {}", address),
        None => println!("Primary:  (none)"),
    }
    println!("TTS:      {}", if store.tts_enabled()? { "on" } else { "off" });
    println!(
        "Debug:    {}",
        if store.training_debug()? { "on" } else { "off" }
    );
    println!();
    println!("Rewards:");
    for milestone in Milestone::ALL {
        println!(
            "  {:<10} {}",
            milestone.flag_key(),
            if store.milestone_granted(milestone.flag_key())? {
                "granted"
            } else {
                "pending"
            }
        );
    }
    Ok(())
}

fn store_export(store: &LocalStore) -> Result<()> {
    let milestones: Vec<serde_json::Value> = Milestone::ALL
        .iter()
        .map(|m| {
            Ok(serde_json::json!({
                "key": m.flag_key(),
                "granted": store.milestone_granted(m.flag_key())?,
            }))
        })
        .collect::<Result<_>>()?;

    let export = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "store": store.path().display().to_string(),
        "user": store.load_user()?,
        "primary_address": store.primary_address()?,
        "tts_enabled": store.tts_enabled()?,
        "training_debug": store.training_debug()?,
        "milestones": milestones,
    });

    println!("{}", serde_json::to_string_pretty(&export)?);
    Ok(())
}

fn store_clear(store: &LocalStore) -> Result<()> {
    store.clear_user()?;
    println!("Device identity cleared.");
    Ok(())
}
