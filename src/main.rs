use std::{env, net::Ipv4Addr, process::exit, rc::Rc};

use tokio::{net::TcpListener, task::LocalSet};

use burrow::{
    adapter::{client::run_client_adapter, host::run_host_adapter, AdapterGuard},
    args::{self, ArgumentsRequest, StartupArguments, StartupMode},
    session::{
        establish::{establish_client, establish_host},
        signaling::SignalingClient,
        state::StateMachine,
        SessionError,
    },
};

fn main() {
    let arguments = match args::parse_arguments(env::args()) {
        Err(error) => {
            eprintln!("{error}\n\nType 'burrow --help' for a help menu");
            exit(1);
        }
        Ok(arguments) => arguments,
    };

    let startup_args = match arguments {
        ArgumentsRequest::Version => {
            println!("{}", args::get_version_string());
            return;
        }
        ArgumentsRequest::Help => {
            println!("{}", args::get_help_string());
            return;
        }
        ArgumentsRequest::Run(startup_args) => startup_args,
    };

    let default_filter = match (startup_args.verbose, startup_args.silent) {
        (true, _) => "debug",
        (false, true) => "error",
        (false, false) => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    let runtime_result = tokio::runtime::Builder::new_current_thread().enable_all().build();

    let result = match runtime_result {
        Ok(runtime) => LocalSet::new().block_on(&runtime, async_main(startup_args)),
        Err(error) => {
            eprintln!("Failed to start Tokio runtime: {error}");
            exit(1);
        }
    };

    if let Err(error) = result {
        log::error!("Finished with error: {error}");
        exit(1);
    }
}

async fn async_main(startup_args: StartupArguments) -> Result<(), SessionError> {
    let state = StateMachine::new();

    {
        let state = Rc::clone(&state);
        tokio::task::spawn_local(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                state.request_abort();
            }
        });
    }

    let result = run_peer(&state, startup_args).await;

    // However the run ended, recover the machine to disconnected before leaving.
    state.fail();
    let _ = state.reset();
    result
}

async fn run_peer(state: &Rc<StateMachine>, startup_args: StartupArguments) -> Result<(), SessionError> {
    let signaling = SignalingClient::new(startup_args.signaling_server);
    log::info!("Using signaling server {}", signaling.server());

    match startup_args.startup_mode {
        StartupMode::Host(config) => {
            let peer = establish_host(state, &signaling, &startup_args.peer_name).await?;

            if let Some(_guard) = AdapterGuard::acquire() {
                run_host_adapter(peer.channel, config.target_port).await;
            }

            shut_down(peer.connection, peer.endpoint).await;
        }
        StartupMode::Join(config) => {
            // Binding before joining catches a busy port without burning a session.
            let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, config.listen_port)).await?;

            let peer = establish_client(state, &signaling, &startup_args.peer_name, &config.session_id).await?;

            if let Some(_guard) = AdapterGuard::acquire() {
                run_client_adapter(peer.channel, listener).await;
            }

            shut_down(peer.connection, peer.endpoint).await;
        }
    }

    Ok(())
}

async fn shut_down(connection: quinn::Connection, endpoint: quinn::Endpoint) {
    log::info!("Tunnel ended, closing the peer connection");
    connection.close(0u32.into(), b"done");
    endpoint.wait_idle().await;
}
