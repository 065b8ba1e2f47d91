// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::registry::Registry;

/// Indices with the D bit set are locked after TPM_NV_LOCK
const NV_INDEX_D_BIT: u32 = 0x1000_0000;

/// Payload of an NV storage object
#[derive(Debug, Clone, Default)]
pub struct NvStore {
    pub index: u32,
    /// TPM_NV_PER_* bits
    pub permissions: u32,
    pub data_size: u32,
    pub policy: Handle,
    pub read_st_clear: bool,
    pub write_st_clear: bool,
    pub write_define: bool,
}

impl Registry {
    pub fn create_nvstore(&self, ctx: Handle) -> Result<Handle> {
        let policy = self
            .contexts
            .with_record(ctx, |r| r.payload.default_policy)?;
        self.nvstores.add(
            ctx,
            ObjectFlags::empty(),
            NvStore {
                policy,
                ..Default::default()
            },
        )
    }

    pub fn is_nvstore(&self, handle: Handle) -> bool {
        self.nvstores.contains(handle)
    }

    pub fn set_nv_index(&self, nv: Handle, index: u32) -> Result<()> {
        if index & NV_INDEX_D_BIT != 0 {
            return Err(TspiError::BadParameter);
        }
        self.nvstores
            .with_record_mut(nv, |r| r.payload.index = index)
    }

    pub fn nv_index(&self, nv: Handle) -> Result<u32> {
        self.nvstores.with_record(nv, |r| r.payload.index)
    }

    pub fn set_nv_permissions(&self, nv: Handle, permissions: u32) -> Result<()> {
        self.nvstores
            .with_record_mut(nv, |r| r.payload.permissions = permissions)
    }

    pub fn nv_permissions(&self, nv: Handle) -> Result<u32> {
        self.nvstores.with_record(nv, |r| r.payload.permissions)
    }

    pub fn set_nv_data_size(&self, nv: Handle, size: u32) -> Result<()> {
        self.nvstores
            .with_record_mut(nv, |r| r.payload.data_size = size)
    }

    pub fn nv_data_size(&self, nv: Handle) -> Result<u32> {
        self.nvstores.with_record(nv, |r| r.payload.data_size)
    }

    pub fn nv_policy(&self, nv: Handle) -> Result<Handle> {
        self.nvstores.with_record(nv, |r| r.payload.policy)
    }

    /// Record the state bits reported by TPM_NV_DATA_PUBLIC
    pub fn set_nv_state(
        &self,
        nv: Handle,
        read_st_clear: bool,
        write_st_clear: bool,
        write_define: bool,
    ) -> Result<()> {
        self.nvstores.with_record_mut(nv, |r| {
            r.payload.read_st_clear = read_st_clear;
            r.payload.write_st_clear = write_st_clear;
            r.payload.write_define = write_define;
        })
    }

    pub fn nv_state(&self, nv: Handle) -> Result<(bool, bool, bool)> {
        self.nvstores.with_record(nv, |r| {
            (
                r.payload.read_st_clear,
                r.payload.write_st_clear,
                r.payload.write_define,
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv_defaults_and_index() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let nv = reg.create_nvstore(ctx).unwrap();
        assert_eq!(reg.nv_index(nv).unwrap(), 0);
        assert_eq!(
            reg.nv_policy(nv).unwrap(),
            reg.context_default_policy(ctx).unwrap()
        );
        reg.set_nv_index(nv, 0x0001_1000).unwrap();
        reg.set_nv_data_size(nv, 64).unwrap();
        assert_eq!(reg.nv_index(nv).unwrap(), 0x0001_1000);
        assert_eq!(reg.nv_data_size(nv).unwrap(), 64);
        assert!(matches!(
            reg.set_nv_index(nv, 0x1000_0001),
            Err(TspiError::BadParameter)
        ));
    }
}
