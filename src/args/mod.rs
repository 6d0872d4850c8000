//! Program arguments and the hand-rolled parser for them.

mod parser;

pub use parser::*;

/// The signaling server assumed when `--signaling` isn't given.
pub const DEFAULT_SIGNALING_SERVER: &str = "127.0.0.1:4590";

/// The label announced to the signaling service when `--name` isn't given.
pub const DEFAULT_PEER_NAME: &str = "peer";

/// Gets a small string with this program's name and version.
pub fn get_version_string() -> String {
    format!(
        concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"), " ({} {})"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}

/// Gets a string with this program's help documentation.
pub fn get_help_string() -> &'static str {
    concat!(
        "Usage: burrow <mode> [options...]\n",
        "\n",
        "Modes:\n",
        "  host                           Expose a local TCP service to the peer\n",
        "  join <session-code>            Consume the peer's service on a local port\n",
        "\n",
        "Options:\n",
        "  -t, --target-port <port>       (host) The local service to expose\n",
        "  -l, --listen-port <port>       (join) The local port that mirrors the remote service\n",
        "  -g, --signaling <host:port>    The signaling server (default 127.0.0.1:4590)\n",
        "  -n, --name <label>             The label announced to the signaling service\n",
        "  -v, --verbose                  Print additional information\n",
        "  -s, --silent                   Print errors only\n",
        "  -h, --help                     Print this help menu and exit\n",
        "  -V, --version                  Print version information and exit\n",
        "\n",
        "The host prints a session code; hand it to the peer, who joins with it. Once\n",
        "both peers are connected, anything that connects to the join side's listen\n",
        "port reaches the host side's target port.\n",
    )
}

/// The result of parsing the program's arguments.
#[derive(Debug, PartialEq)]
pub enum ArgumentsRequest {
    /// Print the help menu to stdout and exit.
    Help,

    /// Print this program's version to stdout and exit.
    Version,

    /// Run with the provided arguments.
    Run(StartupArguments),
}

/// Specifies the information on how the program should run.
#[derive(Debug, PartialEq)]
pub struct StartupArguments {
    /// Whether to print additional information.
    pub verbose: bool,

    /// Whether to print errors only.
    pub silent: bool,

    /// The signaling server, as a `host:port` string.
    pub signaling_server: String,

    /// The label this peer announces to the signaling service.
    pub peer_name: String,

    /// Whether to run as the host or the join side of a tunnel.
    pub startup_mode: StartupMode,
}

/// Specifies whether the program hosts a service or joins a session.
#[derive(Debug, PartialEq)]
pub enum StartupMode {
    Host(StartHostConfig),
    Join(StartJoinConfig),
}

/// Configuration for hosting: which local service the peer gets to reach.
#[derive(Debug, PartialEq)]
pub struct StartHostConfig {
    pub target_port: u16,
}

/// Configuration for joining: which session, and where to listen locally.
#[derive(Debug, PartialEq)]
pub struct StartJoinConfig {
    pub session_id: String,
    pub listen_port: u16,
}
