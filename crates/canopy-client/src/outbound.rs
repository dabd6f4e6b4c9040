//! Sending side of the coordinator connection, as seen by the handlers.

use std::future::Future;

use canopy_net::{LinkError, LinkHandle};
use canopy_shared::protocol::Envelope;

pub trait Outbound: Clone + Send + Sync + 'static {
    fn send_envelope(&self, envelope: Envelope) -> impl Future<Output = Result<(), LinkError>> + Send;

    /// Treat the current connection as unusable and reconnect.
    fn reset_connection(&self) -> impl Future<Output = Result<(), LinkError>> + Send;
}

impl Outbound for LinkHandle {
    async fn send_envelope(&self, envelope: Envelope) -> Result<(), LinkError> {
        self.send(envelope).await
    }

    async fn reset_connection(&self) -> Result<(), LinkError> {
        self.reset().await
    }
}
