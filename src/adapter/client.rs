//! The client-side adapter: exposes the remote service on a local listening port.
//!
//! Each accepted local connection gets a fresh connection identifier and announces
//! itself to the peer with a CONNECT chunk before any data flows.

use std::rc::Rc;

use burrow_proto::packet::PacketEvent;
use tokio::net::TcpListener;

use crate::{
    channel::{ChannelReceiver, ChannelSender},
    sender::FlowSender,
};

use super::{bind_socket, new_socket_table, run_demux, send_control, spawn_socket_tasks, AdapterMode, SocketTable};

/// Runs the client adapter until the channel closes, tunneling every connection
/// accepted on `listener` to the peer's service.
pub async fn run_client_adapter(channel: (ChannelSender, ChannelReceiver), listener: TcpListener) {
    let (sender, receiver) = channel;
    let flow = FlowSender::new(sender);
    let table = new_socket_table();

    match listener.local_addr() {
        Ok(address) => log::info!("Client adapter listening on {address}"),
        Err(_) => log::info!("Client adapter listening"),
    }

    let accept_handle = tokio::task::spawn_local(run_accept_loop(listener, Rc::clone(&table), flow.clone()));
    run_demux(receiver, Rc::clone(&table), flow.clone(), AdapterMode::Client).await;
    accept_handle.abort();
    flow.close();
}

async fn run_accept_loop(listener: TcpListener, table: SocketTable, flow: FlowSender) {
    let mut next_connection_id = 0u16;

    loop {
        let (stream, from) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(error) => {
                log::warn!("Error accepting incoming connection: {error}");
                continue;
            }
        };

        let connection_id = match allocate_connection_id(&table, &mut next_connection_id) {
            Some(connection_id) => connection_id,
            None => {
                log::warn!("Rejecting connection from {from}: all 65536 connection identifiers are bound");
                continue;
            }
        };

        log::info!("Accepted connection {connection_id} from {from}");
        let write_rx = bind_socket(&table, connection_id);

        // CONNECT goes out before any data so the peer binds the identifier first.
        send_control(&table, &flow, connection_id, PacketEvent::Connect);
        spawn_socket_tasks(Rc::clone(&table), flow.clone(), connection_id, stream, write_rx);
    }
}

/// Hands out the next identifier from a wrapping counter, skipping identifiers that
/// are still bound. Returns `None` only with all 65536 in use at once.
fn allocate_connection_id(table: &SocketTable, next: &mut u16) -> Option<u16> {
    let table_ref = table.borrow();

    for _ in 0..=u16::MAX {
        let candidate = *next;
        *next = next.wrapping_add(1);

        if !table_ref.contains_key(&candidate) {
            return Some(candidate);
        }
    }

    None
}
