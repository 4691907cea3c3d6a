use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use tandem_a2a::cards::{calendar_card, quote_card};
use tandem_a2a::{
    A2aClient, A2aServer, AgentCard, AgentTurnExecutor, CredentialProvider, InMemoryTaskStore,
    InstalledAppFlow, Message, OAuthClient, RemoteAgentConnection, RequestHandler,
    SendMessageTool, verifier_from_config,
};
use tandem_core::agents::{self, AgentDefinition};
use tandem_core::content::{Content, Part};
use tandem_core::providers::GeminiModel;
use tandem_core::runtime::runner::run_to_final;
use tandem_core::tools::ToolRegistry;
use tandem_core::tools::calendar::CalendarClient;
use tandem_core::{
    AgentRuntime, DEFAULT_USER_ID, InMemorySessionService, LlmCredentials, LlmRunner, TandemConfig,
};

const QUOTE_AGENT_PORT: u16 = 10003;
const DEFAULT_HOST_MODEL: &str = "gemini-2.0-flash";

#[derive(Parser)]
#[command(name = "tandem", version, about = "A2A calendar and quote agents")]
struct Cli {
    /// Config file (defaults to $TANDEM_CONFIG, then <config dir>/tandem/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the calendar agent (requires a Google bearer token per request)
    CalendarAgent {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Serve the Einstein quote agent
    QuoteAgent {
        #[arg(long)]
        host: Option<String>,
        #[arg(long, default_value_t = QUOTE_AGENT_PORT)]
        port: u16,
    },
    /// Run the OAuth installed-app flow and print the access token
    Token,
    /// Print a remote agent's card
    Card {
        /// Base URL of the agent, e.g. http://localhost:10004
        url: String,
    },
    /// Send one message to a remote agent and print its answer
    Send {
        url: String,
        message: String,
        /// Use this access token instead of running the OAuth flow
        #[arg(long, env = "TANDEM_ACCESS_TOKEN")]
        token: Option<String>,
        /// Conversation to continue
        #[arg(long)]
        context_id: Option<String>,
    },
    /// Chat with a host agent that delegates to remote agents
    Host {
        /// Base URLs of the remote agents
        #[arg(long = "agent", required = true)]
        agents: Vec<String>,
        #[arg(long, env = "TANDEM_ACCESS_TOKEN")]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TandemConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::CalendarAgent { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            let card = calendar_card(
                &host,
                port,
                &config.oauth.auth_uri,
                &config.oauth.token_uri,
                &config.oauth.scopes,
            );
            let agent = agents::calendar_agent(CalendarClient::new(config.calendar.api_base.clone()));
            serve_agent(&config, card, agent, &host, port).await
        }
        Commands::QuoteAgent { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let card = quote_card(&host, port);
            serve_agent(&config, card, agents::quote_agent(), &host, port).await
        }
        Commands::Token => cmd_token(&config).await,
        Commands::Card { url } => {
            let card = A2aClient::new().fetch_agent_card(&url, None).await?;
            println!("{}", serde_json::to_string_pretty(&card)?);
            Ok(())
        }
        Commands::Send {
            url,
            message,
            token,
            context_id,
        } => {
            let credentials = credential_provider(&config, token);
            let connection = RemoteAgentConnection::connect(&url, credentials).await?;
            let mut message = Message::user_text(message);
            if let Some(context_id) = context_id {
                message = message.with_context_id(context_id);
            }
            let result = connection.send_message(message).await?;
            println!("{}", result.text());
            Ok(())
        }
        Commands::Host { agents, token } => cmd_host(&config, agents, token).await,
    }
}

fn gemini_model(config: &TandemConfig, default_model: &str) -> Result<GeminiModel> {
    let credentials = LlmCredentials::from_env()?;
    let name = config
        .llm
        .model
        .clone()
        .unwrap_or_else(|| default_model.to_string());
    let mut model = GeminiModel::new(name, credentials);
    if let Some(base) = &config.llm.api_base {
        model = model.with_api_base(base.clone());
    }
    Ok(model)
}

async fn serve_agent(
    config: &TandemConfig,
    card: AgentCard,
    agent: AgentDefinition,
    host: &str,
    port: u16,
) -> Result<()> {
    let model = gemini_model(config, &agent.model)?;
    let annotate_time = agent.record_time;
    let runner = LlmRunner::new(
        card.name.clone(),
        agent,
        Arc::new(model),
        Arc::new(InMemorySessionService::new()),
    )
    .with_max_llm_calls(config.llm.max_llm_calls);

    let executor = AgentTurnExecutor::new(Arc::new(runner)).with_time_annotation(annotate_time);
    let handler = RequestHandler::new(Arc::new(executor), Arc::new(InMemoryTaskStore::new()));
    let verifier = verifier_from_config(&config.auth, &card);

    A2aServer::new(card, handler, verifier)
        .serve(&format!("{}:{}", host, port))
        .await
}

fn credential_provider(config: &TandemConfig, token: Option<String>) -> Arc<CredentialProvider> {
    match token.filter(|t| !t.is_empty()) {
        Some(token) => Arc::new(CredentialProvider::with_token(token)),
        None => Arc::new(CredentialProvider::new(Box::new(InstalledAppFlow::new(
            OAuthClient::from(&config.oauth),
        )))),
    }
}

async fn cmd_token(config: &TandemConfig) -> Result<()> {
    let client = OAuthClient::from(&config.oauth);
    let flow = InstalledAppFlow::new(client.clone());
    let token = flow.run_local_server(&client).await?;
    println!("Access token: {}", token.access_token);
    if let Some(refresh) = &token.refresh_token {
        println!("Refresh token: {}", refresh);
    }
    Ok(())
}

async fn cmd_host(config: &TandemConfig, urls: Vec<String>, token: Option<String>) -> Result<()> {
    let credentials = credential_provider(config, token);
    let mut connections = Vec::new();
    for url in &urls {
        match RemoteAgentConnection::connect(url, credentials.clone()).await {
            Ok(conn) => connections.push(Arc::new(conn)),
            Err(e) => warn!("Skipping agent at {}: {:#}", url, e),
        }
    }
    if connections.is_empty() {
        anyhow::bail!("None of the remote agents could be reached");
    }

    let send_tool = SendMessageTool::new(connections);
    let roster = send_tool.roster();
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(send_tool));
    let agent = agents::host_agent(DEFAULT_HOST_MODEL, tools, &roster);

    let model = gemini_model(config, &agent.model)?;
    let runner = LlmRunner::new(
        "Host Agent",
        agent,
        Arc::new(model),
        Arc::new(InMemorySessionService::new()),
    )
    .with_max_llm_calls(config.llm.max_llm_calls);

    let session_id = uuid::Uuid::new_v4().to_string();
    runner.sessions().upsert(&session_id).await?;
    info!("Host session {} ready; agents:\n{}", session_id, roster);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        let message = Content::user(vec![Part::text(line)]);
        match run_to_final(&runner, DEFAULT_USER_ID, &session_id, message).await {
            Ok(reply) => println!("{}", reply.text()),
            Err(e) => eprintln!("error: {:#}", e),
        }
    }
    Ok(())
}
