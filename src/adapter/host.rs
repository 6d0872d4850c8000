//! The host-side adapter: owns the real TCP service end of the tunnel.
//!
//! Every CONNECT the peer sends opens one fresh outbound TCP connection to the
//! configured local service; DATA and CLOSE route to whatever that connection
//! identifier is bound to.

use std::rc::Rc;

use crate::{
    channel::{ChannelReceiver, ChannelSender},
    sender::FlowSender,
};

use super::{new_socket_table, run_demux, AdapterMode};

/// Runs the host adapter until the channel closes, forwarding tunneled connections
/// to `127.0.0.1:<target_port>`.
pub async fn run_host_adapter(channel: (ChannelSender, ChannelReceiver), target_port: u16) {
    let (sender, receiver) = channel;
    let flow = FlowSender::new(sender);
    let table = new_socket_table();

    log::info!("Host adapter ready, tunneled connections will reach 127.0.0.1:{target_port}");
    run_demux(receiver, Rc::clone(&table), flow.clone(), AdapterMode::Host { target_port }).await;
    flow.close();
}
