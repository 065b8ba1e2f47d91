// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::registry::Registry;

/// Payload of a delegation family object, a local view of a TPM family row
#[derive(Debug, Clone, Default)]
pub struct DelFamily {
    pub family_id: u32,
    pub label: u8,
    pub verification_count: u32,
    pub enabled: bool,
    pub locked: bool,
}

impl Registry {
    pub fn create_delfamily(&self, ctx: Handle) -> Result<Handle> {
        self.delfamilies
            .add(ctx, ObjectFlags::empty(), DelFamily::default())
    }

    pub fn is_delfamily(&self, handle: Handle) -> bool {
        self.delfamilies.contains(handle)
    }

    /// Load the family row as read back from the TPM
    pub fn set_delfamily(&self, family: Handle, row: DelFamily) -> Result<()> {
        self.delfamilies
            .with_record_mut(family, |r| r.payload = row)
    }

    pub fn delfamily(&self, family: Handle) -> Result<DelFamily> {
        self.delfamilies
            .with_record(family, |r| r.payload.clone())
    }

    pub fn set_delfamily_enabled(&self, family: Handle, enabled: bool) -> Result<()> {
        self.delfamilies
            .with_record_mut(family, |r| r.payload.enabled = enabled)
    }

    pub fn set_delfamily_locked(&self, family: Handle, locked: bool) -> Result<()> {
        self.delfamilies
            .with_record_mut(family, |r| r.payload.locked = locked)
    }
}
