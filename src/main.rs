use std::{error::Error, path::PathBuf, process, sync::Arc, time::Duration};

use clap::{command, Parser, ValueHint};
use log::{debug, error, info, LevelFilter};
use url::Url;

use playhost::{
    api::ApiClient,
    config::Config,
    events,
    http::{self, Transport},
    rate_limit::RateLimiter,
    remote::WebApiEngine,
    session::{Context, Outcome, Session},
    signal,
    storage::SessionStorage,
    token::{CallbackAuthority, TokenProvider},
    ui::Console,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, PartialEq, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Written by the OAuth callback with the `access_token` of the
    /// authorized account. Keep this file private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value = Config::DEFAULT_SECRETS_FILE, env = "PLAYHOST_SECRETS_FILE")]
    secrets_file: PathBuf,

    /// Device to claim
    ///
    /// Name of the Spotify Connect device to control, as it appears in
    /// Spotify clients.
    #[arg(short, long, default_value = Config::DEFAULT_DEVICE_NAME, env = "PLAYHOST_NAME")]
    name: String,

    /// Web API base URL
    #[arg(long, value_hint = ValueHint::Url, default_value = Config::DEFAULT_API_URL, env = "PLAYHOST_API_URL")]
    api_url: Url,

    /// Logout endpoint of the OAuth callback
    ///
    /// Called with GET when the session resets.
    #[arg(long, value_hint = ValueHint::Url, env = "PLAYHOST_LOGOUT_URL")]
    logout_url: Option<Url>,

    /// Page to continue at after a reset
    #[arg(long, value_hint = ValueHint::Url, env = "PLAYHOST_ENTRY_PAGE")]
    entry_page: Option<Url>,

    /// Seconds between polls of the playback state
    #[arg(long, value_name = "SECONDS", default_value_t = 12, value_parser = clap::value_parser!(u64).range(1..))]
    poll_interval: u64,

    /// Log links to the web player pages of each new track
    #[arg(long, default_value_t = false, env = "PLAYHOST_LINKS")]
    links: bool,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

fn config(args: Args) -> Config {
    let mut config = Config::new();
    config.secrets_file = args.secrets_file;
    config.device_name = args.name;
    config.api_url = args.api_url;
    config.logout_url = args.logout_url;
    config.entry_page = args.entry_page;
    config.poll_interval = Duration::from_secs(args.poll_interval);
    config.backoff_interval = config.backoff_interval.max(config.poll_interval);
    config.use_links = args.links;
    config
}

/// Builds a session around a fresh context. Only the transport and the rate
/// limiter survive restarts.
fn session(
    config: &Config,
    transport: &Arc<dyn Transport>,
    limiter: &Arc<RateLimiter>,
) -> Session<WebApiEngine, Console> {
    let context = Context::with_limiter(SessionStorage::new(), Arc::clone(limiter));

    let authority = CallbackAuthority::new(
        &config.secrets_file,
        config.logout_url.clone(),
        Arc::clone(transport),
    );
    let tokens = TokenProvider::new(context.storage.clone(), Arc::new(authority));
    let api = ApiClient::new(
        Arc::clone(transport),
        tokens,
        &context,
        config.api_url.clone(),
    );

    let (events, inbound) = events::channel();
    let engine = WebApiEngine::new(
        api.clone(),
        config.device_name.clone(),
        config.volume,
        events.clone(),
    );

    Session::new(
        config,
        context,
        api,
        engine,
        Console::new(config.use_links),
        events,
        inbound,
    )
}

/// Main application loop.
///
/// # Errors
///
/// Returns an error when the HTTP client or the signal handlers cannot be
/// set up.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = config(args);
    if !config.secrets_file.exists() {
        info!(
            "waiting for the OAuth callback to write {}",
            config.secrets_file.display()
        );
    }

    let transport: Arc<dyn Transport> = Arc::new(http::Client::new(&config)?);
    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit_window,
        config.rate_limit_ceiling,
    ));
    let mut signals = signal::Handler::new()?;
    let mut session = session(&config, &transport, &limiter);

    // Restart after sleeping some duration to prevent accidental denial of
    // service attacks on the Spotify infrastructure. The initial connection
    // happens immediately.
    let restart_timer = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(restart_timer);

    // Main application loop. This restarts the session when it gets reset
    // for whatever reason: a failed device lookup, a revoked token or simply
    // a disconnection from the user. Each restart picks up a fresh token.
    loop {
        tokio::select! {
            // Prioritize signals.
            biased;

            signal = signals.recv() => {
                if signal.is_shutdown() {
                    info!("shutting down gracefully");
                    session.shutdown().await;
                    break Ok(());
                }

                // A fresh session reloads the token and claims the device
                // anew.
                info!("{signal} received; reconnecting");
                session.shutdown().await;
                session = self::session(&config, &transport, &limiter);
            }

            result = session.run(), if restart_timer.is_elapsed() => {
                match result {
                    Ok(Outcome::Shutdown) => break Ok(()),
                    Ok(Outcome::Reset { redirect }) => debug!("session reset (redirect: {redirect})"),
                    Err(e) => error!("{e}"),
                }

                session = self::session(&config, &transport, &limiter);

                // Sleep with jitter to prevent thundering herds. Subsecond
                // precision further prevents that by spreading requests
                // when users are launching this from some crontab.
                let duration = Duration::from_millis(fastrand::u64(5_000..6_000));
                info!("restarting in {:.1}s", duration.as_secs_f32());
                restart_timer.as_mut().reset(tokio::time::Instant::now() + duration);
            }

            () = &mut restart_timer, if !restart_timer.is_elapsed() => {}
        }
    }
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and starts the main application loop.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
