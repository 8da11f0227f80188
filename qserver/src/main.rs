mod config;

use clap::{App, Arg};
use qcommon::logging;
use qcore::{DirtyBroker, MonitorRegistry};

use config::ServerConfig;

/// The collaborators the dispatch core needs but doesn't implement: the
/// process-wide registries, plus whatever store/command-table/replication
/// wiring the surrounding server builds. Event-loop and socket plumbing live
/// outside this crate; this binary only gets as far as constructing the
/// pieces they'd be handed.
struct Runtime {
    config: ServerConfig,
    monitors: MonitorRegistry,
    dirty_broker: DirtyBroker,
}

impl Runtime {
    fn new(config: ServerConfig) -> Runtime {
        Runtime {
            config,
            monitors: MonitorRegistry::new(),
            dirty_broker: DirtyBroker::new(),
        }
    }
}

pub fn main() {
    let matches = App::new("qserver")
        .version("0.1.0")
        .author("Bush Hammer Industries")
        .about("Redis-compatible protocol core: dispatch only, no event loop.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the server's TOML configuration file")
                .required(false),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(path) => ServerConfig::load(path),
        None => ServerConfig::default(),
    };

    let log = logging::init(&config.logging);
    logging::info!(log, "starting qserver";
        "address" => &config.network.address,
        "max_clients" => config.network.max_clients,
        "databases" => config.server.databases,
    );

    let runtime = Runtime::new(config);
    logging::debug!(log, "dispatch core ready";
        "monitors_empty" => runtime.monitors.is_empty(),
    );

    logging::warn!(
        log,
        "no event loop wired up: this binary constructs the dispatch core's \
         collaborators and stops there, matching the core's scope"
    );
}
