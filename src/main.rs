// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod config;

use std::io::Write;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{AgentCommands, Cli, Commands, SessionCommands};
use config::{Config, StoreBackend};
use manifold_agent::{AgentLibrary, AgentRunOptions, AgentRunner};
use manifold_core::{Embedder, Orchestrator, TurnInput, TurnOutcome};
use manifold_model::{
    Ctx, Delta, Error, GenerateOptions, Message, ProviderRegistry, Session, SessionFilter,
};
use manifold_server::AppState;
use manifold_store::{FileStore, MemoryStore, SessionStore};
use manifold_tools::Toolkit;

#[tokio::main]
async fn main() {
    // Select the ring crypto backend before any TLS client is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e:#}");
            exit_code_for(&e)
        }
    };
    std::process::exit(code);
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Map the error taxonomy onto the documented exit codes:
/// 1 user error, 2 provider error, 3 session/store error, 4 cancelled.
fn exit_code_for(e: &anyhow::Error) -> i32 {
    match e.downcast_ref::<Error>() {
        Some(Error::Cancelled) => 4,
        Some(Error::SessionBusy(_) | Error::Store(_) | Error::Conflict(_)) => 3,
        Some(
            Error::Transient(_)
            | Error::Permanent(_)
            | Error::RateLimited { .. }
            | Error::MaxTokens { .. }
            | Error::Refusal { .. }
            | Error::PauseTurn { .. }
            | Error::MalformedToolArguments { .. }
            | Error::ToolLoopLimit { .. }
            | Error::UnsupportedAttachment(_)
            | Error::UnsupportedFeature(_)
            | Error::InvalidOutput(_)
            | Error::Http(_),
        ) => 2,
        Some(_) => 1,
        None => 1,
    }
}

struct Runtime {
    config: Config,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<Orchestrator>,
    toolkit: Toolkit,
    agents: AgentLibrary,
}

async fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let mut registry = ProviderRegistry::new();
    if config.providers.is_empty() {
        // No explicit configuration: register every driver whose credentials
        // are available.  The mock driver needs none and always registers.
        for meta in manifold_model::list_drivers() {
            match manifold_model::from_credentials(meta.id, None, None) {
                Ok(p) => registry.register(p)?,
                Err(e) => debug!(provider = meta.id, "skipping provider: {e}"),
            }
        }
    } else {
        for (name, pc) in &config.providers {
            let id = pc.provider.as_deref().unwrap_or(name.as_str());
            let key = pc
                .api_key
                .clone()
                .or_else(|| pc.api_key_env.as_ref().and_then(|v| std::env::var(v).ok()));
            let provider = manifold_model::from_credentials(id, key, pc.base_url.clone())
                .with_context(|| format!("configuring provider '{name}'"))?;
            registry.register(provider)?;
        }
    }
    let registry = Arc::new(registry);

    let store: Arc<dyn SessionStore> = match config.store.backend {
        StoreBackend::Memory => Arc::new(MemoryStore::new()),
        StoreBackend::File => Arc::new(FileStore::open(config.store.session_dir()).await?),
    };
    let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&registry), store));

    let agents = match agents_dir(&config) {
        Some(dir) => AgentLibrary::load_dir(&dir)?,
        None => AgentLibrary::new(),
    };

    Ok(Runtime {
        config,
        registry,
        orchestrator,
        toolkit: Toolkit::new(),
        agents,
    })
}

fn agents_dir(config: &Config) -> Option<std::path::PathBuf> {
    if let Some(dir) = &config.agents_dir {
        return Some(dir.clone());
    }
    let default = dirs::config_dir()?.join("manifold/agents");
    default.is_dir().then_some(default)
}

/// Root context for one CLI invocation; Ctrl-C cancels it.
fn signal_ctx() -> Ctx {
    let ctx = Ctx::background();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    ctx
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        cli::print_completions(*shell);
        return Ok(());
    }

    let config = config::load(cli.config.as_deref())?;
    let rt = build_runtime(config).await?;
    let ctx = signal_ctx();

    match cli.command {
        Commands::Completions { .. } => unreachable!("handled above"),

        Commands::Providers { json } => {
            let registered = rt.registry.names();
            if json {
                let rows: Vec<_> = manifold_model::list_drivers()
                    .iter()
                    .filter(|d| registered.iter().any(|r| r == d.id))
                    .map(|d| {
                        serde_json::json!({
                            "id": d.id, "name": d.name, "description": d.description
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for meta in manifold_model::list_drivers() {
                    if registered.iter().any(|r| r == meta.id) {
                        println!("{:<12} {:<16} {}", meta.id, meta.name, meta.description);
                    }
                }
            }
        }

        Commands::Models { provider, json } => {
            let models = match provider {
                Some(p) => rt.registry.get(&p)?.list_models(&ctx).await?,
                None => rt.registry.list_models(&ctx).await?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&models)?);
            } else {
                for m in models {
                    let caps = &m.capabilities;
                    let mut flags = Vec::new();
                    if caps.chat {
                        flags.push("chat");
                    }
                    if caps.embedding {
                        flags.push("embed");
                    }
                    if caps.vision {
                        flags.push("vision");
                    }
                    if caps.function_calling {
                        flags.push("tools");
                    }
                    if caps.thinking {
                        flags.push("thinking");
                    }
                    println!("{}/{:<32} {}", m.provider, m.id, flags.join(","));
                }
            }
        }

        Commands::Ask {
            prompt,
            model,
            system,
            attach,
            stream,
            temperature,
            max_tokens,
            num_completions,
        } => {
            let model = resolve_model(model, &rt.config)?;
            let mut options = GenerateOptions::new();
            options.system_prompt = system;
            options.temperature = temperature;
            options.max_tokens = max_tokens;
            options.num_completions = num_completions;

            let mut attachments = Vec::with_capacity(attach.len());
            for path in &attach {
                attachments.push(
                    manifold_attach::from_path(path)
                        .map_err(|e| Error::BadParameter(e.to_string()))?,
                );
            }
            let message = Message::user_with_attachments(prompt, attachments);

            let out = run_printed_turn(stream, |sink| async {
                rt.orchestrator
                    .run_detached(&ctx, &model, message, &options, None, sink)
                    .await
            })
            .await?;
            for alt in &out.alternates {
                println!("---");
                println!("{}", alt.text());
            }
        }

        Commands::Chat { session, prompt, model, stream } => {
            run_printed_turn(stream, |sink| async {
                rt.orchestrator
                    .run_turn(
                        &ctx,
                        &session,
                        TurnInput::UserMessage(Message::user(prompt)),
                        model.as_deref(),
                        &GenerateOptions::default(),
                        None,
                        sink,
                    )
                    .await
            })
            .await?;
        }

        Commands::Embed { text, model } => {
            let model = resolve_model(model, &rt.config)?;
            let embedder = Embedder::new(Arc::clone(&rt.registry));
            let vectors = embedder
                .embed_batch(&ctx, &model, &text, &GenerateOptions::default())
                .await?;
            for v in vectors {
                println!("{}", serde_json::to_string(&v)?);
            }
        }

        Commands::Agent { command } => match command {
            AgentCommands::List => {
                for name in rt.agents.names() {
                    let def = rt.agents.get(&name)?;
                    println!(
                        "{:<24} model={} tools=[{}]",
                        def.name,
                        def.model.as_deref().unwrap_or("-"),
                        def.tools.join(",")
                    );
                }
            }
            AgentCommands::Run { name, input, keep_session } => {
                let def = rt.agents.get(&name)?.clone();
                let input: serde_json::Value = match input {
                    Some(raw) => serde_json::from_str(&raw)
                        .map_err(|e| Error::BadParameter(format!("--input is not JSON: {e}")))?,
                    None => serde_json::json!({}),
                };
                let runner =
                    AgentRunner::new(Arc::clone(&rt.orchestrator), rt.toolkit.clone());
                let opts = AgentRunOptions {
                    ephemeral: !keep_session,
                    keep_session_on_failure: keep_session,
                    ..Default::default()
                };
                let out = runner.run(&ctx, &def, &input, &opts).await?;
                match out.output {
                    Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                    None => println!("{}", out.text),
                }
            }
        },

        Commands::Sessions { command } => match command {
            SessionCommands::List => {
                let sessions = rt
                    .orchestrator
                    .store()
                    .list(&SessionFilter::default())
                    .await?;
                for s in sessions {
                    println!(
                        "{}  {:<20} {:<24} {} msgs  {}",
                        s.id,
                        s.label,
                        s.default_model.as_deref().unwrap_or("-"),
                        s.message_count,
                        s.updated_at.format("%Y-%m-%d %H:%M:%S"),
                    );
                }
            }
            SessionCommands::Show { id } => {
                let session = rt.orchestrator.store().get(&id).await?;
                println!("{}", serde_json::to_string_pretty(&session)?);
            }
            SessionCommands::New { label, model, system } => {
                let mut session = Session::new(label);
                session.default_model = model.or_else(|| rt.config.default_model.clone());
                session.system_prompt = system;
                let id = rt.orchestrator.store().create(session).await?;
                println!("{id}");
            }
            SessionCommands::Delete { id } => {
                rt.orchestrator.store().delete(&id).await?;
            }
        },

        Commands::Serve { addr } => {
            let state = Arc::new(AppState::new(
                Arc::clone(&rt.orchestrator),
                rt.toolkit.clone(),
                rt.agents.clone(),
            ));
            manifold_server::serve(addr, state).await?;
        }
    }
    Ok(())
}

fn resolve_model(flag: Option<String>, config: &Config) -> anyhow::Result<String> {
    flag.or_else(|| config.default_model.clone()).ok_or_else(|| {
        Error::BadParameter("no model given (use --model or set default_model)".into()).into()
    })
}

/// Run one turn, printing streamed text deltas as they arrive (or the final
/// text in one piece), and return the outcome.
async fn run_printed_turn<F, Fut>(stream: bool, turn: F) -> anyhow::Result<TurnOutcome>
where
    F: FnOnce(Option<manifold_model::DeltaSink>) -> Fut,
    Fut: std::future::Future<Output = manifold_model::Result<TurnOutcome>>,
{
    if !stream {
        let out = turn(None).await?;
        println!("{}", out.message.text());
        return Ok(out);
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<Delta>(64);
    let printer = tokio::spawn(async move {
        let mut stdout = std::io::stdout();
        while let Some(delta) = rx.recv().await {
            if let Delta::Text { text } = delta {
                let _ = write!(stdout, "{text}");
                let _ = stdout.flush();
            }
        }
    });
    let result = turn(Some(tx)).await;
    let _ = printer.await;
    println!();
    Ok(result?)
}
