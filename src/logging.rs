//! Logging initialization, shared by both subcommands.

/// Initializes the `env_logger` subscriber at `info` (or `debug` under
/// `--verbose`) unless `RUST_LOG` is already set.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(default_level);
    env_logger::Builder::from_env(env).init();
}
