use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global log subscriber. Call once from the embedding binary;
/// a second call reports the conflict instead of panicking.
pub fn init_logging(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("log subscriber already installed: {e}"))
}
