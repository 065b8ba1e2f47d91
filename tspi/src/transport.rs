// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Injected collaborators: the TPM command table and the persistent key store
//!
//! The registry never builds or parses wire bytes. Every TPM operation goes
//! through a [`Transport`] that takes already-computed authorization blocks
//! and hands back the return code, output parameters and response
//! authorization for the caller to verify.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use crate::auth::{ResponseAuth, TpmAuth};
use crate::error::{Result, TspiError};
use crate::types::{Nonce, TpmPubKey};

/// Result of TPM_OIAP
#[derive(Debug, Clone)]
pub struct OiapResponse {
    pub auth_handle: u32,
    pub nonce_even: Nonce,
}

/// Result of TPM_OSAP
#[derive(Debug, Clone)]
pub struct OsapResponse {
    pub auth_handle: u32,
    pub nonce_even: Nonce,
    pub nonce_even_osap: Nonce,
}

/// Result of TPM_LoadKey2
#[derive(Debug, Clone)]
pub struct LoadKeyResponse {
    pub return_code: u32,
    pub key_handle: u32,
    /// Absent when the command carried no authorization or failed
    pub auth: Option<ResponseAuth>,
}

/// Input of TPM_ChangeAuth
#[derive(Debug, Clone)]
pub struct ChangeAuthRequest {
    pub parent_handle: u32,
    pub protocol_id: u16,
    pub enc_new_auth: [u8; 20],
    pub entity_type: u16,
    pub enc_data: Vec<u8>,
    pub parent_auth: TpmAuth,
    pub entity_auth: TpmAuth,
}

/// Result of TPM_ChangeAuth
#[derive(Debug, Clone)]
pub struct ChangeAuthResponse {
    pub return_code: u32,
    pub out_data: Vec<u8>,
    pub parent_auth: Option<ResponseAuth>,
    pub entity_auth: Option<ResponseAuth>,
}

/// Input of TPM_TakeOwnership
#[derive(Debug, Clone)]
pub struct TakeOwnershipRequest {
    pub protocol_id: u16,
    pub enc_owner_auth: Vec<u8>,
    pub enc_srk_auth: Vec<u8>,
    /// TPM_KEY template for the new SRK
    pub srk_params: Vec<u8>,
    pub owner_auth: TpmAuth,
}

/// Result of TPM_TakeOwnership
#[derive(Debug, Clone)]
pub struct TakeOwnershipResponse {
    pub return_code: u32,
    /// TPM_KEY of the new SRK
    pub srk_key: Vec<u8>,
    pub auth: Option<ResponseAuth>,
}

/// TPM command table
pub trait Transport: Send + Sync {
    fn oiap(&self) -> Result<OiapResponse>;

    fn osap(&self, entity_type: u16, entity_value: u32, nonce_odd_osap: &Nonce) -> Result<OsapResponse>;

    fn terminate_handle(&self, auth_handle: u32) -> Result<()>;

    fn read_pubek(&self) -> Result<TpmPubKey>;

    fn load_key2(&self, parent_handle: u32, key_blob: &[u8], auth: Option<&TpmAuth>) -> Result<LoadKeyResponse>;

    /// TPM_EvictKey: drop a loaded key from the TPM
    fn evict_key(&self, key_handle: u32) -> Result<()>;

    fn change_auth(&self, req: &ChangeAuthRequest) -> Result<ChangeAuthResponse>;

    fn take_ownership(&self, req: &TakeOwnershipRequest) -> Result<TakeOwnershipResponse>;
}

/// Key blob as kept by a persistent store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredKey {
    pub uuid: Uuid,
    pub parent: Uuid,
    pub blob: Vec<u8>,
}

/// Persistent key store lookups
pub trait KeyStore: Send + Sync {
    fn get_key_by_uuid(&self, uuid: &Uuid) -> Result<StoredKey>;

    /// Lookup by TPM_PUBKEY bytes
    fn get_key_by_public(&self, public: &[u8]) -> Result<StoredKey>;
}

/// In-process key store, keyed by UUID
#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<Uuid, (StoredKey, Vec<u8>)>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key` under its UUID together with its TPM_PUBKEY bytes
    pub fn register(&self, key: StoredKey, public: Vec<u8>) {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.uuid, (key, public));
    }

    pub fn unregister(&self, uuid: &Uuid) -> Result<StoredKey> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uuid)
            .map(|(key, _)| key)
            .ok_or(TspiError::KeyNotFound)
    }
}

impl KeyStore for MemoryKeyStore {
    fn get_key_by_uuid(&self, uuid: &Uuid) -> Result<StoredKey> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(uuid)
            .map(|(key, _)| key.clone())
            .ok_or(TspiError::KeyNotFound)
    }

    fn get_key_by_public(&self, public: &[u8]) -> Result<StoredKey> {
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|(_, p)| p == public)
            .map(|(key, _)| key.clone())
            .ok_or(TspiError::KeyNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_lookups() {
        let store = MemoryKeyStore::new();
        let uuid = Uuid::from_u128(42);
        let key = StoredKey {
            uuid,
            parent: Uuid::from_u128(1),
            blob: vec![1, 2, 3],
        };
        store.register(key.clone(), vec![9, 9]);
        assert_eq!(store.get_key_by_uuid(&uuid).unwrap(), key);
        assert_eq!(store.get_key_by_public(&[9, 9]).unwrap(), key);
        assert!(matches!(
            store.get_key_by_public(&[8]),
            Err(TspiError::KeyNotFound)
        ));
        store.unregister(&uuid).unwrap();
        assert!(store.get_key_by_uuid(&uuid).is_err());
    }
}
