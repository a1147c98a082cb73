use circuit::config;
use circuit::CircuitClient;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "circuit")]
#[command(about = "Circuit CLI", long_about = None)]
struct Cli {
    /// Config file path (default: CIRCUIT_CONFIG_PATH or ~/.circuit/config.json)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init,

    /// Post a text message to a conversation.
    Post {
        /// Conversation id (default from config)
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Message text
        text: String,
    },

    /// Print the presence of a user.
    Presence {
        /// User id
        user_id: String,
    },

    /// Manage webhooks registered for this account.
    Webhooks {
        #[command(subcommand)]
        action: WebhookAction,
    },

    /// Start the webhook server and print new text items (and presence changes) until interrupted.
    Listen {
        /// Conversation id (default from config)
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,

        /// Webhook server port (default from config or 80)
        #[arg(long, short)]
        port: Option<u16>,

        /// Subscribe to presence changes of these users (repeatable)
        #[arg(long = "presence", value_name = "USER_ID")]
        presence: Vec<String>,

        /// Reply to each text item with this message
        #[arg(long, value_name = "TEXT")]
        reply: Option<String>,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// List registered webhooks as JSON.
    List,
    /// Delete all registered webhooks.
    Delete,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("circuit {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init) => run_init(cli.config),
        Some(Commands::Post { conversation, text }) => {
            run_post(cli.config, conversation, text).await
        }
        Some(Commands::Presence { user_id }) => run_presence(cli.config, user_id).await,
        Some(Commands::Webhooks { action }) => run_webhooks(cli.config, action).await,
        Some(Commands::Listen {
            conversation,
            port,
            presence,
            reply,
        }) => run_listen(cli.config, conversation, port, presence, reply).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = config::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

fn load(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
) -> anyhow::Result<config::Config> {
    let (mut config, path) = config::load_config(config_path)?;
    log::debug!("using config {}", path.display());
    if let Some(c) = conversation {
        config.circuit.conversation_id = Some(c);
    }
    Ok(config)
}

async fn run_post(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
    text: String,
) -> anyhow::Result<()> {
    let client = CircuitClient::new(load(config_path, conversation)?)?;
    let item = client.post_text_message(&text).await?;
    println!("{}", item.item_id);
    Ok(())
}

async fn run_presence(
    config_path: Option<std::path::PathBuf>,
    user_id: String,
) -> anyhow::Result<()> {
    let client = CircuitClient::new(load(config_path, None)?)?;
    println!("{}", client.get_user_presence(&user_id).await?);
    Ok(())
}

async fn run_webhooks(
    config_path: Option<std::path::PathBuf>,
    action: WebhookAction,
) -> anyhow::Result<()> {
    let client = CircuitClient::new(load(config_path, None)?)?;
    match action {
        WebhookAction::List => {
            let hooks = client.rest().list_webhooks().await?;
            println!("{}", serde_json::to_string_pretty(&hooks)?);
        }
        WebhookAction::Delete => {
            client.rest().delete_all_webhooks().await?;
            println!("deleted all webhooks");
        }
    }
    Ok(())
}

async fn run_listen(
    config_path: Option<std::path::PathBuf>,
    conversation: Option<String>,
    port: Option<u16>,
    presence: Vec<String>,
    reply: Option<String>,
) -> anyhow::Result<()> {
    let mut config = load(config_path, conversation)?;
    if let Some(p) = port {
        config.webhooks.port = p;
    }
    let client = std::sync::Arc::new(CircuitClient::connect(config).await?);

    subscribe_or_close(&client, &presence, reply).await?;

    println!("listening for webhooks, press Ctrl+C to stop");
    client.run().await;
    Ok(())
}

/// Subscribe, or remove whatever was already registered and stop the server when any step fails.
async fn subscribe_or_close(
    client: &std::sync::Arc<CircuitClient>,
    presence: &[String],
    reply: Option<String>,
) -> anyhow::Result<()> {
    if let Err(e) = subscribe(client, presence, reply).await {
        client.close().await;
        return Err(e);
    }
    Ok(())
}

/// Register the text item and presence callbacks for `listen`.
async fn subscribe(
    client: &std::sync::Arc<CircuitClient>,
    presence: &[String],
    reply: Option<String>,
) -> anyhow::Result<()> {
    if client.conversation_id().await.is_some() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        client
            .set_on_new_text_item_callback(move |item| {
                println!("[{}] {}", item.creator_id.as_deref().unwrap_or("?"), item.content());
                let _ = tx.send(item.item_id);
            })
            .await?;
        if let Some(text) = reply {
            let replier = client.clone();
            tokio::spawn(async move {
                while let Some(item_id) = rx.recv().await {
                    if let Err(e) = replier.post_text_message(&text).await {
                        log::warn!("reply to {} failed: {}", item_id, e);
                    }
                }
            });
        }
    } else if presence.is_empty() {
        anyhow::bail!("nothing to listen for: set a conversation id or pass --presence");
    }

    for user_id in presence {
        client
            .set_on_user_presence_change(user_id, |state| {
                println!("presence {} -> {}", state.user_id, state.state);
            })
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use circuit::api::RestClient;

    fn unreachable_client() -> std::sync::Arc<CircuitClient> {
        let mut config = config::Config::default();
        config.webhooks.bind = "127.0.0.1".to_string();
        config.webhooks.port = 0;
        config.webhooks.public_url = Some("http://device.test".to_string());
        let rest = RestClient::with_authorization("http://127.0.0.1:1", "Basic dGVzdDp0ZXN0");
        std::sync::Arc::new(CircuitClient::with_rest_client(config, rest))
    }

    #[tokio::test]
    async fn failed_subscription_stops_webhook_server() {
        let client = unreachable_client();
        let err = subscribe_or_close(&client, &["alice".to_string()], None).await;
        assert!(err.is_err());
        assert!(client.server_addr().await.is_none());
    }

    #[tokio::test]
    async fn nothing_to_listen_for_is_an_error() {
        let client = unreachable_client();
        let err = subscribe_or_close(&client, &[], None).await.unwrap_err();
        assert!(err.to_string().contains("nothing to listen for"));
    }
}
