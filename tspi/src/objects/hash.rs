// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use sha1::{Digest as _, Sha1};

use crate::constants::{hash_init, TPM_SHA1_160_HASH_LEN};
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::registry::Registry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Sha1,
    /// Caller supplied digest of any algorithm; never computed here
    Other,
}

/// Payload of a hash object
#[derive(Clone)]
pub struct HashObject {
    pub alg: HashAlg,
    pub value: Option<Vec<u8>>,
    /// Optional algorithm identifier blob, set through attributes
    pub identifier: Vec<u8>,
    hasher: Option<Sha1>,
}

impl std::fmt::Debug for HashObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashObject")
            .field("alg", &self.alg)
            .field("value", &self.value.as_ref().map(hex::encode))
            .field("updating", &self.hasher.is_some())
            .finish()
    }
}

impl HashObject {
    fn new(alg: HashAlg) -> Self {
        Self {
            alg,
            value: None,
            identifier: Vec::new(),
            hasher: None,
        }
    }

    fn set_value(&mut self, value: &[u8]) -> Result<()> {
        match self.alg {
            HashAlg::Sha1 if value.len() != TPM_SHA1_160_HASH_LEN => {
                return Err(TspiError::HashInvalidLength)
            }
            HashAlg::Other if value.is_empty() => return Err(TspiError::HashInvalidLength),
            _ => {}
        }
        self.value = Some(value.to_vec());
        self.hasher = None;
        Ok(())
    }

    fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.alg != HashAlg::Sha1 {
            return Err(TspiError::HashInvalidAlg);
        }
        let hasher = self.hasher.get_or_insert_with(Sha1::new);
        hasher.update(data);
        self.value = Some(hasher.clone().finalize().to_vec());
        Ok(())
    }
}

impl Registry {
    pub fn create_hash(&self, ctx: Handle, init_flags: u32) -> Result<Handle> {
        let alg = match init_flags {
            hash_init::DEFAULT | hash_init::SHA1 => HashAlg::Sha1,
            hash_init::OTHER => HashAlg::Other,
            _ => return Err(TspiError::InvalidInitFlags(init_flags)),
        };
        self.hashes
            .add(ctx, ObjectFlags::empty(), HashObject::new(alg))
    }

    pub fn is_hash(&self, handle: Handle) -> bool {
        self.hashes.contains(handle)
    }

    pub fn hash_alg(&self, hash: Handle) -> Result<HashAlg> {
        self.hashes.with_record(hash, |r| r.payload.alg)
    }

    /// Replace the digest. The previous value is kept if `value` is rejected.
    pub fn set_hash_value(&self, hash: Handle, value: &[u8]) -> Result<()> {
        self.hashes
            .with_record_mut(hash, |r| r.payload.set_value(value))?
    }

    pub fn hash_value(&self, hash: Handle) -> Result<Vec<u8>> {
        self.hashes
            .with_record(hash, |r| r.payload.value.clone())?
            .ok_or(TspiError::HashNoData)
    }

    /// Feed more data into a running SHA-1
    pub fn update_hash_value(&self, hash: Handle, data: &[u8]) -> Result<()> {
        self.hashes
            .with_record_mut(hash, |r| r.payload.update(data))?
    }

    pub fn set_hash_identifier(&self, hash: Handle, identifier: &[u8]) -> Result<()> {
        self.hashes
            .with_record_mut(hash, |r| r.payload.identifier = identifier.to_vec())
    }

    pub fn hash_identifier(&self, hash: Handle) -> Result<Vec<u8>> {
        self.hashes
            .with_record(hash, |r| r.payload.identifier.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::sha1;

    fn setup(flags: u32) -> (Registry, Handle) {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let h = reg.create_hash(ctx, flags).unwrap();
        (reg, h)
    }

    #[test]
    fn test_sha1_length_is_enforced() {
        let (reg, h) = setup(hash_init::SHA1);
        assert!(matches!(reg.hash_value(h), Err(TspiError::HashNoData)));
        reg.set_hash_value(h, &[1; 20]).unwrap();
        assert!(matches!(
            reg.set_hash_value(h, &[2; 19]),
            Err(TspiError::HashInvalidLength)
        ));
        assert_eq!(reg.hash_value(h).unwrap(), vec![1; 20]);
    }

    #[test]
    fn test_other_accepts_any_nonempty() {
        let (reg, h) = setup(hash_init::OTHER);
        reg.set_hash_value(h, &[9; 48]).unwrap();
        assert!(reg.set_hash_value(h, &[]).is_err());
        assert!(matches!(
            reg.update_hash_value(h, b"abc"),
            Err(TspiError::HashInvalidAlg)
        ));
        assert_eq!(reg.hash_value(h).unwrap().len(), 48);
    }

    #[test]
    fn test_update_accumulates() {
        let (reg, h) = setup(hash_init::DEFAULT);
        reg.update_hash_value(h, b"hello ").unwrap();
        reg.update_hash_value(h, b"world").unwrap();
        assert_eq!(
            reg.hash_value(h).unwrap(),
            sha1(&[&b"hello world"[..]]).to_vec()
        );
    }
}
