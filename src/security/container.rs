use std::collections::BTreeMap;

use super::{Role, SecurityParameters};
use crate::message::ProtocolVersion;

/// Epoch indexed registry of [`SecurityParameters`].
///
/// Epoch 0 always exists. A new handshake allocates a pending epoch at
/// `current + 1` which becomes current on ChangeCipherSpec.
#[derive(Debug)]
pub struct SecurityParameterContainer {
    role: Role,
    parameters: BTreeMap<u16, SecurityParameters>,
    current: u16,
    pending: Option<u16>,
}

impl SecurityParameterContainer {
    pub fn new(role: Role) -> Self {
        let mut parameters = BTreeMap::new();
        parameters.insert(0, SecurityParameters::new(0, role, None));

        SecurityParameterContainer {
            role,
            parameters,
            current: 0,
            pending: None,
        }
    }

    pub fn current(&self) -> u16 {
        self.current
    }

    pub fn pending(&self) -> Option<u16> {
        self.pending
    }

    /// The epoch 0 parameters.
    pub fn first(&self) -> &SecurityParameters {
        &self.parameters[&0]
    }

    pub fn first_mut(&mut self) -> &mut SecurityParameters {
        self.get_mut(0).expect("epoch 0 always exists")
    }

    pub fn get(&self, epoch: u16) -> Option<&SecurityParameters> {
        self.parameters.get(&epoch)
    }

    pub fn get_mut(&mut self, epoch: u16) -> Option<&mut SecurityParameters> {
        self.parameters.get_mut(&epoch)
    }

    /// Allocate pending parameters at `current + 1`, replacing any earlier pending
    /// parameters that never became current.
    pub fn init_new(&mut self, version: ProtocolVersion) -> &mut SecurityParameters {
        let epoch = self.current.wrapping_add(1);

        if let Some(old) = self.pending.take() {
            if old != epoch {
                self.parameters.remove(&old);
            }
        }

        trace!("New pending epoch {}", epoch);
        self.pending = Some(epoch);

        let parameters = SecurityParameters::new(epoch, self.role, Some(version));
        self.parameters.insert(epoch, parameters);
        self.parameters
            .get_mut(&epoch)
            .expect("pending epoch was just inserted")
    }

    /// Activate the pending epoch following `epoch`.
    ///
    /// Mismatching epochs, and pending parameters that can't derive keys, are
    /// logged and ignored. Returns whether the current epoch changed.
    pub fn change_cipher(&mut self, epoch: u16) -> bool {
        let Some(pending) = self.pending else {
            warn!("ChangeCipherSpec in epoch {} without a pending epoch", epoch);
            return false;
        };

        if epoch.wrapping_add(1) != pending {
            warn!(
                "Trying to change cipher from {} -> {}, pending epoch is {}",
                epoch,
                epoch.wrapping_add(1),
                pending
            );
            return false;
        }

        let Some(parameters) = self.parameters.get_mut(&pending) else {
            return false;
        };

        if let Err(e) = parameters.derive_keys() {
            warn!("Can't activate epoch {}: {}", pending, e);
            return false;
        }

        debug!("Epoch {} is now current", pending);
        self.current = pending;
        self.pending = None;

        true
    }
}
