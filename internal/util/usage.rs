const USAGE: &str = "\
pgedge-init: bootstraps the databases of one pgEdge cluster node

USAGE:
    pgedge-init [OPTIONS]

OPTIONS:
    -h, --help           Print this help message and exit
    -v, --version        Print version and exit

FILES:
    PGEDGE_CLUSTER_SPEC               Cluster spec JSON         [/home/pgedge/cluster.json]
    PGEDGE_INIT_STATUS_FILE           Progress record           [/data/init-status.json]
    FORCE_INIT                        Ignore the progress record for this run [false]

IDENTITY:
    NODE_NAME                         This node's name          [n1]
    NODE_ID                           This node's id in the spec
    PGV                               Postgres major version: 15, 16 or 17

SEED DATABASE (removed after the first run):
    INIT_DATABASE                     Seed database name
    INIT_USERNAME                     Seed user
    INIT_PASSWORD                     Seed password

TIMING (milliseconds unless noted):
    PGEDGE_RETRY_DELAY_MS             Wait between attempts     [2000]
    PGEDGE_RETRY_MAX_DELAY_MS         Backoff ceiling           [=retry delay]
    PGEDGE_RETRY_BACKOFF              Backoff factor            [1]
    PGEDGE_RETRY_JITTER_MS            Random extra wait         [0]
    PGEDGE_RETRY_MAX_ATTEMPTS         Give up after N attempts  [unbounded]
    PGEDGE_STARTUP_DELAY_MS           Wait for the local engine [3000]
    PGEDGE_SETTLE_DELAY_MS            Pause after node init     [5000]
    PGEDGE_SUBSCRIBE_PAUSE_MS         Pause before sub_create   [2000]
    PGEDGE_CONNECT_TIMEOUT_MS         Per-connection timeout    [5000]

OTHER:
    RUST_LOG                          Log filter                [info]
";

pub fn print_usage() {
    print!("{USAGE}");
}

pub fn print_version(version: &str) {
    println!("pgedge-init {version}");
}

fn handle_cli_flags_from_args(args: &[String], version: &str) -> bool {
    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                return true;
            }
            "-v" | "--version" => {
                print_version(version);
                return true;
            }
            _ => {}
        }
    }
    false
}

/// Check CLI args for --help/-h or --version/-v.
/// Returns `true` if a flag was handled (caller should exit).
pub fn handle_cli_flags(version: &str) -> bool {
    let args: Vec<String> = std::env::args().skip(1).collect();
    handle_cli_flags_from_args(&args, version)
}
