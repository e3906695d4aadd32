use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

/// Progress goes to stderr at info level; `--verbose` adds debug output such
/// as rendered prompts.
pub fn init(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let _ = fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .try_init();
    Ok(())
}
