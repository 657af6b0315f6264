use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global subscriber. Level comes from `PUNCHCARD_LOG`
/// (error/warn/info/debug/trace), defaulting to info.
pub fn init() {
    let level = std::env::var("PUNCHCARD_LOG")
        .ok()
        .and_then(|raw| raw.parse::<Level>().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
