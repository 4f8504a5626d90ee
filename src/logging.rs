use log::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
}

/// Human log output goes to stderr so stdout stays parseable under `--json`.
pub fn init(verbosity: Verbosity) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    match verbosity {
        Verbosity::Quiet => {
            builder.filter_level(LevelFilter::Warn);
        }
        Verbosity::Verbose => {
            builder.filter_level(LevelFilter::Debug);
        }
        Verbosity::Normal => {}
    }
    builder.filter_module("reqwest", LevelFilter::Warn);
    builder.filter_module("pdf_extract", LevelFilter::Off);
    builder.filter_module("lopdf", LevelFilter::Off);
    builder.format_timestamp_secs();
    let _ = builder.target(env_logger::Target::Stderr).try_init();
}
