//! Accept loop
//!
//! One task owns the listener: each iteration checks the shutdown flag,
//! runs one scheduler pass, then waits up to the accept deadline for a new
//! connection and hands it to a freshly spawned session actor.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use crate::error::NetError;
use crate::net::Listener;
use crate::registry::Registry;
use crate::{scheduler, session};

/// Run the server until the shutdown flag flips or the listener dies.
///
/// A flipped shutdown flag is a clean stop and returns `Ok`; a fatal
/// accept failure is returned to the caller. Running session actors are
/// not cancelled either way; they finish on their next socket deadline or
/// EOF once the listener is gone.
pub async fn run(
    listener: Listener,
    registry: Arc<Registry>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), NetError> {
    loop {
        if *shutdown.borrow() {
            break;
        }

        scheduler::run_pass(&registry).await;

        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    session::handle_connection(registry, stream, addr).await;
                });
            }
            Err(NetError::Timeout) => continue,
            Err(e) => {
                error!("Failed to accept connection: {}", e);
                return Err(e);
            }
        }
    }

    info!("Server has been stopped");
    Ok(())
}
