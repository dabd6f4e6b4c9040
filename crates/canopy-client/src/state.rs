//! Runtime state shared by the router and both coordinators.

use std::sync::Mutex;

use canopy_shared::types::RegistrationState;

/// Per-process client state.
///
/// Held behind an `Arc` and handed to each service at startup. The node
/// registry lives elsewhere; this only carries what is not persisted.
#[derive(Debug)]
pub struct ClientState {
    client_id: String,
    registration: Mutex<RegistrationState>,
}

impl ClientState {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            registration: Mutex::new(RegistrationState::default()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn registration(&self) -> RegistrationState {
        match self.registration.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_registration(&self, next: RegistrationState) {
        let mut guard = match self.registration.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *guard != next {
            tracing::debug!(from = ?*guard, to = ?next, "Registration state changed");
        }
        *guard = next;
    }

    /// Move to `AwaitingDomainConfirm` unless a handshake is already underway.
    pub fn begin_handshake(&self) {
        if self.registration() == RegistrationState::Unregistered {
            self.set_registration(RegistrationState::AwaitingDomainConfirm);
        }
    }

    pub fn reset_registration(&self) {
        self.set_registration(RegistrationState::Unregistered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_and_reset() {
        let state = ClientState::new("client-1");
        assert_eq!(state.registration(), RegistrationState::Unregistered);

        state.begin_handshake();
        assert_eq!(state.registration(), RegistrationState::AwaitingDomainConfirm);

        state.set_registration(RegistrationState::Registered);
        state.begin_handshake();
        assert!(state.registration().is_registered());

        state.reset_registration();
        assert_eq!(state.registration(), RegistrationState::Unregistered);
    }
}
