use std::{io::Write, process, sync::Arc};

use gazette::{
    application::{
        articles::{ArticleCacheConfig, ArticleCacheManager},
        error::AppError,
    },
    cache::{CacheConfig, CacheManager},
    config::{self, Command},
    infra::{error::InfraError, telemetry},
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let report = error.report();
    if dispatcher::has_been_set() {
        error!(error = %report.chain(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %report.chain(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let cache_config = CacheConfig::from(&settings);
    let cache = Arc::new(CacheManager::connect(&cache_config).await?);
    info!(
        context = cache.context().as_str(),
        backend = cache.backend_name(),
        "cache ready"
    );
    let articles = Arc::new(ArticleCacheManager::new(
        Arc::clone(&cache),
        ArticleCacheConfig::from(&settings.articles),
    ));

    match cli_args.command {
        Command::Maintain(args) => {
            if args.once {
                let report = articles.perform_maintenance().await?;
                return print_json(&report);
            }
            run_maintenance(&articles, settings.maintenance.cadence).await
        }
        Command::Stats => print_json(&cache.stats().await?),
        Command::Invalidate(args) => {
            let tags: Vec<String> = args
                .tags
                .iter()
                .map(|tag| tag.trim().to_string())
                .filter(|tag| !tag.is_empty())
                .collect();
            if tags.is_empty() {
                return Err(AppError::validation("at least one non-empty tag is required"));
            }
            let removed = cache.invalidate_by_tags(&tags).await?;
            print_json(&serde_json::json!({ "tags": tags, "removed": removed }))
        }
        Command::Clear(args) => {
            let removed = cache.clear(args.pattern.as_deref()).await?;
            print_json(&serde_json::json!({ "pattern": args.pattern, "removed": removed }))
        }
        Command::Article(args) => match articles.get_article(&args.identifier).await? {
            Some(article) => print_json(&article),
            None => Err(AppError::not_found(format!("article `{}`", args.identifier))),
        },
    }
}

async fn run_maintenance(
    articles: &Arc<ArticleCacheManager>,
    cadence: std::time::Duration,
) -> Result<(), AppError> {
    info!(cadence_secs = cadence.as_secs(), "maintenance loop started");
    let mut handle = articles.spawn_maintenance(cadence);

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            handle.abort();
            let _ = handle.await;
            signal.map_err(InfraError::from)?;
        }
        joined = &mut handle => {
            let reason = match joined {
                Err(err) if err.is_panic() => "panicked",
                _ => "exited",
            };
            return Err(AppError::unexpected(format!("maintenance loop {reason}")));
        }
    }

    info!("maintenance loop stopped");
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).map_err(InfraError::from)?;
    writeln!(stdout).map_err(InfraError::from)?;
    Ok(())
}
