// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::constants::TPM_SHA1_160_HASH_LEN;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::registry::Registry;
use crate::types::Digest;

/// TPM_MS_RESTRICT_MIGRATE
pub const PAYLOAD_MIGRATE_RESTRICTED: u8 = 0x04;

/// Payload of a migration data object
#[derive(Debug, Clone, Default)]
pub struct MigData {
    pub migration_blob: Vec<u8>,
    pub rewrapped: Vec<u8>,
    pub ticket: Vec<u8>,
    /// Digest of the migration selection authority
    pub msa_digest: Option<Digest>,
    pub approval_hmac: Option<Digest>,
    pub payload_type: u8,
}

fn digest_from(bytes: &[u8]) -> Result<Digest> {
    if bytes.len() != TPM_SHA1_160_HASH_LEN {
        return Err(TspiError::InvalidAttribData);
    }
    bytes.try_into().map_err(|_| TspiError::InvalidAttribData)
}

impl Registry {
    pub fn create_migdata(&self, ctx: Handle) -> Result<Handle> {
        self.migdata.add(
            ctx,
            ObjectFlags::empty(),
            MigData {
                payload_type: PAYLOAD_MIGRATE_RESTRICTED,
                ..Default::default()
            },
        )
    }

    pub fn is_migdata(&self, handle: Handle) -> bool {
        self.migdata.contains(handle)
    }

    pub fn set_migration_blob(&self, mig: Handle, blob: &[u8]) -> Result<()> {
        self.migdata
            .with_record_mut(mig, |r| r.payload.migration_blob = blob.to_vec())
    }

    pub fn migration_blob(&self, mig: Handle) -> Result<Vec<u8>> {
        self.migdata
            .with_record(mig, |r| r.payload.migration_blob.clone())
    }

    pub fn set_rewrapped_blob(&self, mig: Handle, blob: &[u8]) -> Result<()> {
        self.migdata
            .with_record_mut(mig, |r| r.payload.rewrapped = blob.to_vec())
    }

    pub fn rewrapped_blob(&self, mig: Handle) -> Result<Vec<u8>> {
        self.migdata
            .with_record(mig, |r| r.payload.rewrapped.clone())
    }

    pub fn set_migration_ticket(&self, mig: Handle, ticket: &[u8]) -> Result<()> {
        self.migdata
            .with_record_mut(mig, |r| r.payload.ticket = ticket.to_vec())
    }

    pub fn migration_ticket(&self, mig: Handle) -> Result<Vec<u8>> {
        self.migdata
            .with_record(mig, |r| r.payload.ticket.clone())
    }

    pub fn set_msa_digest(&self, mig: Handle, digest: &[u8]) -> Result<()> {
        let digest = digest_from(digest)?;
        self.migdata
            .with_record_mut(mig, |r| r.payload.msa_digest = Some(digest))
    }

    pub fn msa_digest(&self, mig: Handle) -> Result<Digest> {
        self.migdata
            .with_record(mig, |r| r.payload.msa_digest)?
            .ok_or(TspiError::InvalidAttribData)
    }

    pub fn set_msa_approval_hmac(&self, mig: Handle, hmac: &[u8]) -> Result<()> {
        let hmac = digest_from(hmac)?;
        self.migdata
            .with_record_mut(mig, |r| r.payload.approval_hmac = Some(hmac))
    }

    pub fn msa_approval_hmac(&self, mig: Handle) -> Result<Digest> {
        self.migdata
            .with_record(mig, |r| r.payload.approval_hmac)?
            .ok_or(TspiError::InvalidAttribData)
    }

    pub fn migration_payload_type(&self, mig: Handle) -> Result<u8> {
        self.migdata.with_record(mig, |r| r.payload.payload_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_msa_digest_length() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let mig = reg.create_migdata(ctx).unwrap();
        assert!(reg.msa_digest(mig).is_err());
        assert!(matches!(
            reg.set_msa_digest(mig, &[1; 21]),
            Err(TspiError::InvalidAttribData)
        ));
        reg.set_msa_digest(mig, &[1; 20]).unwrap();
        assert_eq!(reg.msa_digest(mig).unwrap(), [1; 20]);
        assert_eq!(
            reg.migration_payload_type(mig).unwrap(),
            PAYLOAD_MIGRATE_RESTRICTED
        );
    }
}
