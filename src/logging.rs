use env_logger;

/// Initialize the logger with the specified verbosity level
///
/// `RUST_LOG` takes precedence over the verbosity-derived filter.
///
/// # Arguments
/// * `verbose` - Verbosity level (0=warn, 1=info, 2=debug, 3+=trace)
pub fn setup_logger(verbose: u8) {
    let env_filter = default_filter(verbose);

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(env_filter))
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false)
        .init();
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "leaselock=warn",
        1 => "leaselock=info",
        2 => "leaselock=debug",
        _ => "leaselock=trace",
    }
}
