use std::fmt;

use super::{
    ArgumentsRequest, StartHostConfig, StartJoinConfig, StartupArguments, StartupMode, DEFAULT_PEER_NAME, DEFAULT_SIGNALING_SERVER,
};

#[derive(Debug, PartialEq, Eq)]
pub enum ArgumentsError {
    UnknownArgument(String),
    MissingMode,
    ModeAlreadySet(String),
    MissingValue(String),
    InvalidPort(String, String),
    HostFoundJoinArgument(String),
    JoinFoundHostArgument(String),
    MissingTargetPort,
    MissingListenPort,
    MissingSessionId,
}

impl fmt::Display for ArgumentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownArgument(arg) => write!(f, "Unknown argument: {arg}"),
            Self::MissingMode => write!(f, "A mode must be specified, either host or join"),
            Self::ModeAlreadySet(arg) => write!(f, "A mode was already specified, but {arg} is specifying another one"),
            Self::MissingValue(arg) => write!(f, "Expected a value after {arg}"),
            Self::InvalidPort(arg, value) => write!(f, "Invalid port number \"{value}\" after {arg}"),
            Self::HostFoundJoinArgument(arg) => write!(f, "{arg} only makes sense when joining, but the mode is host"),
            Self::JoinFoundHostArgument(arg) => write!(f, "{arg} only makes sense when hosting, but the mode is join"),
            Self::MissingTargetPort => write!(f, "When hosting, the target port of the exposed service must be specified"),
            Self::MissingListenPort => write!(f, "When joining, the local port to listen on must be specified"),
            Self::MissingSessionId => write!(f, "When joining, a session code must be specified after join"),
        }
    }
}

struct StartupArgumentsParser {
    verbose: bool,
    silent: bool,
    signaling_server: Option<String>,
    peer_name: Option<String>,
    mode: Option<ParsedMode>,
    target_port: Option<(String, u16)>,
    listen_port: Option<(String, u16)>,
}

enum ParsedMode {
    Host,
    Join(String),
}

fn parse_port_arg<T: Iterator<Item = String>>(args: &mut T, arg: String) -> Result<(String, u16), ArgumentsError> {
    let value = args.next().ok_or_else(|| ArgumentsError::MissingValue(arg.clone()))?;
    match value.parse::<u16>() {
        Ok(port) => Ok((arg, port)),
        Err(_) => Err(ArgumentsError::InvalidPort(arg, value)),
    }
}

fn parse_string_arg<T: Iterator<Item = String>>(args: &mut T, arg: String) -> Result<String, ArgumentsError> {
    args.next().ok_or(ArgumentsError::MissingValue(arg))
}

/// Parses the program's arguments, the first of which is taken to be the program's
/// name and ignored.
pub fn parse_arguments<T: Iterator<Item = String>>(mut args: T) -> Result<ArgumentsRequest, ArgumentsError> {
    let mut parser = StartupArgumentsParser {
        verbose: false,
        silent: false,
        signaling_server: None,
        peer_name: None,
        mode: None,
        target_port: None,
        listen_port: None,
    };

    args.next();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(ArgumentsRequest::Help),
            "-V" | "--version" => return Ok(ArgumentsRequest::Version),
            "-v" | "--verbose" => parser.verbose = true,
            "-s" | "--silent" => parser.silent = true,
            "-g" | "--signaling" => parser.signaling_server = Some(parse_string_arg(&mut args, arg)?),
            "-n" | "--name" => parser.peer_name = Some(parse_string_arg(&mut args, arg)?),
            "-t" | "--target-port" => parser.target_port = Some(parse_port_arg(&mut args, arg)?),
            "-l" | "--listen-port" => parser.listen_port = Some(parse_port_arg(&mut args, arg)?),
            "host" => match parser.mode {
                None => parser.mode = Some(ParsedMode::Host),
                Some(_) => return Err(ArgumentsError::ModeAlreadySet(arg)),
            },
            "join" => match parser.mode {
                None => {
                    let session_id = args.next().ok_or(ArgumentsError::MissingSessionId)?;
                    parser.mode = Some(ParsedMode::Join(session_id));
                }
                Some(_) => return Err(ArgumentsError::ModeAlreadySet(arg)),
            },
            _ => return Err(ArgumentsError::UnknownArgument(arg)),
        }
    }

    let startup_mode = match parser.mode {
        None => return Err(ArgumentsError::MissingMode),
        Some(ParsedMode::Host) => {
            if let Some((arg, _)) = parser.listen_port {
                return Err(ArgumentsError::HostFoundJoinArgument(arg));
            }

            let target_port = match parser.target_port {
                Some((_, port)) => port,
                None => return Err(ArgumentsError::MissingTargetPort),
            };

            StartupMode::Host(StartHostConfig { target_port })
        }
        Some(ParsedMode::Join(session_id)) => {
            if let Some((arg, _)) = parser.target_port {
                return Err(ArgumentsError::JoinFoundHostArgument(arg));
            }

            let listen_port = match parser.listen_port {
                Some((_, port)) => port,
                None => return Err(ArgumentsError::MissingListenPort),
            };

            StartupMode::Join(StartJoinConfig { session_id, listen_port })
        }
    };

    Ok(ArgumentsRequest::Run(StartupArguments {
        verbose: parser.verbose,
        silent: parser.silent,
        signaling_server: parser.signaling_server.unwrap_or_else(|| DEFAULT_SIGNALING_SERVER.to_string()),
        peer_name: parser.peer_name.unwrap_or_else(|| DEFAULT_PEER_NAME.to_string()),
        startup_mode,
    }))
}

#[cfg(test)]
mod tests {
    use super::{parse_arguments, ArgumentsError};
    use crate::args::{ArgumentsRequest, StartupMode, DEFAULT_SIGNALING_SERVER};

    fn parse(args: &[&str]) -> Result<ArgumentsRequest, ArgumentsError> {
        let full: Vec<String> = std::iter::once("burrow").chain(args.iter().copied()).map(String::from).collect();
        parse_arguments(full.into_iter())
    }

    #[test]
    fn test_host_mode() {
        let request = parse(&["host", "--target-port", "8080"]).unwrap();
        let ArgumentsRequest::Run(args) = request else {
            panic!("Expected a run request")
        };

        assert_eq!(args.signaling_server, DEFAULT_SIGNALING_SERVER);
        match args.startup_mode {
            StartupMode::Host(config) => assert_eq!(config.target_port, 8080),
            other => panic!("Expected host mode, got {other:?}"),
        }
    }

    #[test]
    fn test_join_mode_with_options() {
        let request = parse(&["-v", "join", "s123", "-l", "6000", "--signaling", "signal.example:9", "--name", "grace"]).unwrap();
        let ArgumentsRequest::Run(args) = request else {
            panic!("Expected a run request")
        };

        assert!(args.verbose);
        assert_eq!(args.signaling_server, "signal.example:9");
        assert_eq!(args.peer_name, "grace");
        match args.startup_mode {
            StartupMode::Join(config) => {
                assert_eq!(config.session_id, "s123");
                assert_eq!(config.listen_port, 6000);
            }
            other => panic!("Expected join mode, got {other:?}"),
        }
    }

    #[test]
    fn test_help_and_version_win() {
        assert_eq!(parse(&["--help"]), Ok(ArgumentsRequest::Help));
        assert_eq!(parse(&["host", "-V"]), Ok(ArgumentsRequest::Version));
    }

    #[test]
    fn test_rejections() {
        assert_eq!(parse(&[]), Err(ArgumentsError::MissingMode));
        assert_eq!(parse(&["host"]), Err(ArgumentsError::MissingTargetPort));
        assert_eq!(parse(&["join", "s1"]), Err(ArgumentsError::MissingListenPort));
        assert_eq!(parse(&["join"]), Err(ArgumentsError::MissingSessionId));
        assert_eq!(parse(&["--nonsense"]), Err(ArgumentsError::UnknownArgument("--nonsense".to_string())));
        assert_eq!(
            parse(&["host", "-t", "eighty"]),
            Err(ArgumentsError::InvalidPort("-t".to_string(), "eighty".to_string()))
        );
        assert_eq!(parse(&["host", "-t"]), Err(ArgumentsError::MissingValue("-t".to_string())));
        assert_eq!(parse(&["host", "-t", "80", "join", "s1"]), Err(ArgumentsError::ModeAlreadySet("join".to_string())));
        assert_eq!(
            parse(&["host", "-t", "80", "-l", "90"]),
            Err(ArgumentsError::HostFoundJoinArgument("-l".to_string()))
        );
        assert_eq!(
            parse(&["join", "s1", "-l", "90", "--target-port", "80"]),
            Err(ArgumentsError::JoinFoundHostArgument("--target-port".to_string()))
        );
    }
}
