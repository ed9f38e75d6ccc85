//! Glue between the bus and the router: decode one inbound message, run it
//! through the engine, encode the response for the outbound topic.

use crate::messages::RouterCommand;
use crate::router::TrainRouter;

pub struct Dispatcher {
    router: TrainRouter,
}

impl Dispatcher {
    pub fn new(router: TrainRouter) -> Self {
        Self { router }
    }

    /// Handle one raw message body. Returns the serialized response to
    /// publish, or `None` for malformed payloads — the caller still
    /// acknowledges the bus message either way, since redelivery would
    /// replay non-idempotent registry moves.
    pub async fn handle(&self, body: &[u8]) -> Option<Vec<u8>> {
        let command = match RouterCommand::from_bytes(body) {
            Ok(command) => command,
            Err(e) => {
                tracing::error!(error = %e, "Dropping malformed message");
                return None;
            }
        };

        tracing::debug!(?command, "Received command");
        let response = self.router.process(&command).await;
        Some(response.to_queue_message())
    }
}
