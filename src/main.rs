use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use color_eyre::eyre::{Result, bail};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use picgrid::application::ImageWidth;
use picgrid::domain::entities::{ImageTier, LoadState};
use picgrid::infrastructure::{
    AppConfig, CliArgs, ConnectivityMonitor, DiskImageCache, HttpImageFetcher,
    HttpReachabilityProbe, ImageEvent, ImageEventKind, ImageLoader, StorageManager,
};
use picgrid::presentation::{EventReporter, ImageDimensions, ReportSummary};

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    if let Some(log_path) = config.effective_log_path() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry().with(filter).init();
    }

    Ok(())
}

fn load_config(args: &CliArgs) -> Result<AppConfig> {
    let storage = StorageManager::new()?;
    let mut config = storage.load_config(args.config.as_deref())?;
    config.merge_with_args(args);
    Ok(config)
}

fn report_event<W: std::io::Write>(
    reporter: &mut EventReporter<W>,
    loader: &ImageLoader,
    event: &ImageEvent,
) -> Result<()> {
    let dimensions = match event.kind {
        ImageEventKind::Loaded { .. } => ImageDimensions::lookup(loader, &event.url),
        _ => None,
    };
    reporter.report(event, dimensions)?;
    Ok(())
}

fn all_settled(loader: &ImageLoader, urls: &[String]) -> bool {
    urls.iter().all(|url| loader.state(url).is_terminal())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = CliArgs::parse();
    let config = load_config(&args)?;

    init_logging(&config)?;

    info!(version = picgrid::VERSION, "Starting picgrid");

    let image_width = ImageWidth::new();
    if !image_width.set(config.preview.width) {
        bail!("preview width must be greater than zero");
    }

    let fetcher = Arc::new(HttpImageFetcher::new(&config.fetcher_config())?);
    let disk_cache = Arc::new(
        DiskImageCache::new(
            config.cache.effective_directory(),
            config.cache.disk_budget(),
        )
        .await?,
    );
    let probe = Arc::new(HttpReachabilityProbe::new(
        config.connectivity.probe_url.clone(),
        config.connectivity.probe_timeout(),
    )?);
    let monitor = Arc::new(ConnectivityMonitor::new(
        probe,
        config.connectivity.probe_interval(),
    ));
    monitor.start();

    let (event_tx, mut events) = mpsc::unbounded_channel();
    let loader = ImageLoader::new(
        config.loader_config(),
        fetcher,
        disk_cache,
        monitor.clone(),
        image_width,
        &event_tx,
    );

    if args.clear_cache {
        loader.clear_all().await?;
    }

    for url in &args.urls {
        loader.request_load(url);
    }

    let mut reporter = EventReporter::new(std::io::stdout());
    let mut ticker = tokio::time::interval(SETTLE_POLL_INTERVAL);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        if !args.watch && all_settled(&loader, &args.urls) {
            break;
        }

        tokio::select! {
            Some(event) = events.recv() => {
                report_event(&mut reporter, &loader, &event)?;
            }
            _ = ticker.tick() => {}
            result = &mut interrupted => {
                result?;
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    while let Ok(event) = events.try_recv() {
        report_event(&mut reporter, &loader, &event)?;
    }

    let states: Vec<LoadState> = args.urls.iter().map(|url| loader.state(url)).collect();
    let summary = ReportSummary::from_states(&states);
    reporter.finish(&summary)?;

    info!(
        %summary,
        memory = %loader.memory_cache_stats(ImageTier::Original),
        "Finished"
    );

    loader.shutdown().await;
    monitor.stop();

    if summary.failed > 0 {
        bail!("{} image(s) failed to load", summary.failed);
    }
    Ok(())
}
