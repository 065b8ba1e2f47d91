// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::handle::Handle;
use crate::registry::Registry;

/// Payload of the per-context TPM object
#[derive(Debug, Clone)]
pub struct TpmObject {
    /// Owner authorization
    pub owner_policy: Handle,
    pub operator_policy: Handle,
}

impl TpmObject {
    pub(crate) fn clear_policy(&mut self, policy: Handle) {
        if self.owner_policy == policy {
            self.owner_policy = Handle::NULL;
        }
        if self.operator_policy == policy {
            self.operator_policy = Handle::NULL;
        }
    }
}

impl Registry {
    pub fn is_tpm(&self, handle: Handle) -> bool {
        self.tpms.contains(handle)
    }

    /// Owner policy of the TPM object
    pub fn tpm_policy(&self, tpm: Handle) -> Result<Handle> {
        self.tpms.with_record(tpm, |r| r.payload.owner_policy)
    }

    pub fn tpm_operator_policy(&self, tpm: Handle) -> Result<Handle> {
        self.tpms.with_record(tpm, |r| r.payload.operator_policy)
    }
}
