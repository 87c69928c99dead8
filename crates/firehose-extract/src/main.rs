use clap::Parser;
use firehose_extract::{
    auth::{Authenticator, DEFAULT_TOKEN_TTL, JwtAuthenticator, StaticToken},
    channel::ChannelFactory,
    config::{AuthConfig, CliArgs, RunConfig, resume_command},
    engine::{ConnectionMode, Connections, Extractor},
    processors::ProcessorRegistry,
    sink::JsonlSink,
    telemetry::init_telemetry,
};
use std::{process::ExitCode, sync::Arc};
use tokio::signal;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    let providers = init_telemetry(&config.logging)?;

    let code = match run(config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    };

    providers.shutdown();
    Ok(code)
}

async fn run(config: RunConfig) -> anyhow::Result<ExitCode> {
    tracing::debug!(
        "Starting extraction on {} with engine config: {:?}",
        config.channel.uri(),
        config.engine
    );

    // Fail on a bad processor before touching the network.
    let processor = ProcessorRegistry::with_builtins().resolve(
        &config.processor,
        config.chain.block_type_url(),
        config.check_processor_type,
    )?;

    let token = authenticate(&config.auth).await?;
    let factory = ChannelFactory::new(config.channel.clone(), &token)?;
    let connections = match config.engine.connection_mode {
        ConnectionMode::Shared => Connections::Shared(factory.connect_client().await?),
        ConnectionMode::PerWorker => Connections::PerWorker(Arc::new(factory)),
    };

    let extractor = Arc::new(Extractor::new(
        config.engine.clone(),
        connections,
        config.template.clone(),
        processor,
    ));
    let signal_task = tokio::spawn(shutdown_signal(Arc::clone(&extractor)));

    let result = extractor
        .run(config.period.start(), config.period.end())
        .await;
    signal_task.abort();
    let result = result?;

    let sink = JsonlSink::new(&config.output);
    let written = sink.write_all(&result.items)?;
    tracing::info!(
        "Finished block streaming, wrote {} rows of data to {}",
        written,
        sink.path().display()
    );

    if result.is_complete() {
        return Ok(ExitCode::SUCCESS);
    }

    for failure in &result.failures {
        tracing::error!("{failure}");
        tracing::warn!(
            "Resume with: {}",
            resume_command(&config, failure.remaining())
        );
    }

    Ok(ExitCode::FAILURE)
}

async fn authenticate(auth: &AuthConfig) -> anyhow::Result<String> {
    let authenticator: Box<dyn Authenticator> = match auth {
        AuthConfig::None => return Ok(String::new()),
        AuthConfig::Static(token) => Box::new(StaticToken::new(token.clone())),
        AuthConfig::Jwt {
            endpoint,
            api_key,
            cache,
            timeout,
        } => Box::new(
            JwtAuthenticator::new(endpoint.clone(), api_key.clone(), *timeout)?
                .with_cache(cache.clone(), DEFAULT_TOKEN_TTL),
        ),
    };

    Ok(authenticator.get_token().await?)
}

async fn shutdown_signal(extractor: Arc<Extractor>) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }

    tracing::info!("Shutdown signal received, cancelling stream workers...");
    extractor.shutdown();
}
