//! Helpers shared by the integration tests.

use std::{future::Future, time::Duration};

use tokio::{
    net::TcpListener,
    sync::mpsc,
    task::LocalSet,
};

/// Runs a future on a current-thread runtime inside a `LocalSet`, the same
/// environment the program itself runs in. Panics if the whole test exceeds a
/// generous timeout, so a deadlock fails instead of hanging the suite.
pub fn run_local<F: Future>(future: F) -> F::Output {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
    runtime.block_on(LocalSet::new().run_until(async {
        tokio::time::timeout(Duration::from_secs(60), future).await.expect("Test timed out")
    }))
}

/// Spawns a local echo service, returning its port and a receiver that yields one
/// unit per connection whose echo loop has ended.
pub async fn spawn_echo_server() -> (u16, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    tokio::task::spawn_local(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };

            let done_tx = done_tx.clone();
            tokio::task::spawn_local(async move {
                let (mut read_half, mut write_half) = stream.split();
                let _ = tokio::io::copy(&mut read_half, &mut write_half).await;
                let _ = done_tx.send(());
            });
        }
    });

    (port, done_rx)
}
