//! Tune command implementations

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tune_agent::{
    register_spotify_tools, AgentLoop, AgentSettings, CredentialCache, CredentialProvider,
    SpotifyClient, SpotifyRefreshCredentials, StaticCredentials, ToolRegistry, TurnError,
    TurnReply,
};
use tune_checkpoint::{CheckpointError, CheckpointStore, FileCheckpointStore};
use tune_config::{self, Config};
use tune_provider::openai::OpenAiCompatProvider;
use tune_provider::{ErrorKind, Message, Provider, Role};

/// Thread used when `--thread` is not given
pub const DEFAULT_THREAD: &str = "spotify_playlist_thread";

/// Initialize config and checkpoint directory
pub async fn init_command() -> Result<()> {
    println!("♪ Initializing Tune...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = tune_config::init()
        .await
        .context("failed to initialize config")?;

    println!("Config:  {}", tune_config::config_path().display());
    println!("Threads: {}", config.checkpoint_dir().display());

    println!("\n♪ Tune initialized");
    println!("\nNext steps:");
    println!("  1. Add your model API key to ~/.tune/config.json (or set GROQ_API_KEY)");
    println!("  2. Add a Spotify access token and user id (or SPOTIFY_ACCESS_TOKEN / SPOTIFY_USER_ID)");
    println!("  3. Start chatting: tune engage -m \"Create a playlist for my morning workout\"");

    Ok(())
}

fn credentials(config: &Config) -> Arc<dyn CredentialProvider> {
    if config.spotify_can_refresh() {
        debug!("using refresh-token credentials");
        Arc::new(SpotifyRefreshCredentials::from_config(config))
    } else {
        Arc::new(StaticCredentials::from_config(config))
    }
}

fn checkpoint_store(config: &Config) -> Arc<FileCheckpointStore> {
    Arc::new(FileCheckpointStore::new(config.checkpoint_dir()))
}

/// Wire model, Spotify tools and checkpoint store into an agent
fn build_agent(config: &Config) -> Result<AgentLoop> {
    let provider = OpenAiCompatProvider::new(
        config.api_key().unwrap_or_default(),
        config.api_base(),
        Some(config.default_model()),
    );
    if !provider.is_configured() {
        return Err(TurnError {
            kind: ErrorKind::ModelInvocationError,
            detail: format!(
                "no model API key configured; set model.api_key in {} or {}",
                tune_config::config_path().display(),
                tune_config::MODEL_API_KEY_ENV
            ),
        }
        .into());
    }

    let cache = Arc::new(CredentialCache::new(credentials(config)));
    let client = Arc::new(SpotifyClient::new(&config.spotify.api_base, cache));

    let mut registry = ToolRegistry::new();
    register_spotify_tools(&mut registry, client).context("failed to register Spotify tools")?;

    Ok(AgentLoop::new(
        Arc::new(provider),
        Arc::new(registry),
        checkpoint_store(config),
        AgentSettings::from_config(config),
    ))
}

/// Run one turn, cancelling it on Ctrl-C
async fn run_turn(agent: &AgentLoop, thread: &str, input: &str) -> Result<TurnReply> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling turn");
            on_interrupt.cancel();
        }
    });

    let result = agent.run_turn_with_cancel(thread, input, cancel).await;
    watcher.abort();

    let reply = result.map_err(TurnError::from)?;
    if reply.replayed {
        info!("thread {} already answered this message, replaying", thread);
    }
    debug!("turn path: {:?}", reply.path);
    Ok(reply)
}

/// Chat with the agent
pub async fn engage_command(message: Option<String>, thread: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let agent = build_agent(&config)?;

    if let Some(msg) = message {
        let reply = run_turn(&agent, &thread, &msg).await?;
        println!("\n♪ {}", reply.text);
        return Ok(());
    }

    println!("♪ Interactive mode on thread {} (type 'exit' to quit)", thread);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        print!("♪ ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        match run_turn(&agent, &thread, input).await {
            Ok(reply) => println!("\n♪ {}\n", reply.text),
            Err(e) => eprintln!("{:#}\n", e),
        }
    }

    Ok(())
}

/// Show configuration status
pub async fn status_command() -> Result<()> {
    let config_path = tune_config::config_path();
    let config = Config::load().await.context("failed to load config")?;
    let threads = config.checkpoint_dir();

    println!("♪ Tune Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:      {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "Threads:     {} {}",
        threads.display(),
        if threads.exists() { "[OK]" } else { "[Missing]" }
    );
    println!("Model:       {}", config.default_model());
    println!(
        "API Key:     {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );

    let spotify = if config.spotify_can_refresh() {
        "[Refresh token]"
    } else if config.spotify_access_token().is_some() {
        "[Access token]"
    } else {
        "[Missing]"
    };
    println!("Spotify:     {}", spotify);
    println!(
        "User ID:     {}",
        config
            .spotify_user_id()
            .unwrap_or_else(|| "[Missing]".to_string())
    );
    println!(
        "Budget:      {} tool round trips per turn",
        config.agent.max_round_trips
    );

    println!("\n♪ Ready");

    Ok(())
}

/// List stored threads
pub async fn threads_list_command() -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let store = checkpoint_store(&config);

    let ids = store.list().await.context("failed to list threads")?;
    if ids.is_empty() {
        println!("No stored threads");
        return Ok(());
    }

    println!("Threads:");
    for id in ids {
        match store.get(&id).await {
            Ok(thread) => println!(
                "  {} - {} messages, {} turns, updated {}",
                thread.id,
                thread.len(),
                thread.turn_count,
                thread.updated_at.format("%Y-%m-%d %H:%M")
            ),
            Err(e) => println!("  {} - [unreadable: {}]", id, e),
        }
    }

    Ok(())
}

fn print_message(message: &Message) {
    match message.role {
        Role::Tool => {
            let name = message.name.as_deref().unwrap_or("tool");
            match &message.error {
                Some(failure) => println!("  ✗ {}: {}: {}", name, failure.kind, failure.detail),
                None => println!("  ← {}: {}", name, message.content),
            }
        }
        role => {
            if !message.content.is_empty() {
                println!("[{}] {}", role.as_str(), message.content);
            }
            for call in &message.tool_calls {
                println!("  → {}({})", call.name, call.arguments);
            }
        }
    }
}

/// Print a thread's messages
pub async fn threads_show_command(id: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let store = checkpoint_store(&config);

    let thread = match store.get(&id).await {
        Ok(thread) => thread,
        Err(CheckpointError::NotFound(_)) => {
            println!("✗ Thread {} not found", id);
            return Ok(());
        }
        Err(e) => return Err(e).context(format!("failed to read thread {}", id)),
    };

    println!("♪ Thread {} ({} messages)", thread.id, thread.len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for message in &thread.messages {
        print_message(message);
    }

    Ok(())
}

/// Delete a thread
pub async fn threads_delete_command(id: String) -> Result<()> {
    let config = Config::load().await.context("failed to load config")?;
    let store = checkpoint_store(&config);

    if store
        .delete(&id)
        .await
        .with_context(|| format!("failed to delete thread {}", id))?
    {
        println!("✓ Thread {} deleted", id);
    } else {
        println!("✗ Thread {} not found", id);
    }

    Ok(())
}
