// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Object registry and authorization engine for a TSS 1.2 service provider
//!
//! Applications talk to the TPM through opaque handles. A [`Registry`] owns
//! every object those handles name: contexts, policies, RSA keys, encrypted
//! data, PCR composites, hashes, NV indices, delegation families and
//! migration data. Each object belongs to exactly one context and disappears
//! with it.
//!
//! ## Features
//!
//! - **Per-kind object lists**: checkout guards give exclusive access to one
//!   record at a time
//! - **Policy secrets**: plain, SHA-1, popup and callback modes with
//!   always/counter/timer lifetimes
//! - **Authorization protocols**: OIAP and OSAP HMACs, ADIP secret
//!   encryption and XOR masking
//! - **Immutable keys**: a key is editable until its blob is materialized,
//!   after which only the canonical load path may replace it
//!
//! TPM commands are issued through an injected [`Transport`] and persistent
//! keys are looked up through an injected [`KeyStore`].
//!
//! ## Example
//!
//! ```no_run
//! use tspi::{Registry, RegistryConfig, SecretMode};
//!
//! let reg = Registry::new(RegistryConfig::from_env()?);
//! let ctx = reg.create_context()?;
//! let policy = reg.context_default_policy(ctx)?;
//! reg.set_secret(policy, SecretMode::Plain, b"owner")?;
//! reg.close_context(ctx)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

mod attrib;
mod auth;
mod commands;
mod config;
pub mod constants;
mod crypto;
mod error;
mod handle;
mod list;
mod marshal;
mod objects;
mod policy;
mod registry;
mod session;
mod transport;
mod types;

pub use auth::{
    adip_encrypt, auth_hmac, osap_shared_secret, verify_auth_hmac, xor_mask, NoncePair,
    ParamDigest, ResponseAuth, TpmAuth,
};
pub use config::{HashMode, RegistryConfig, VersionMode, CONFIG_ENV, DEFAULT_CONFIG_PATH};
pub use crypto::{hash_popup_secret, hmac_sha1, mgf1_sha1, random_nonce, sha1};
pub use error::{Result, TspiError};
pub use handle::{Handle, HandleAllocator};
pub use list::{ObjectFlags, ObjectKind, ObjectList, Record, RecordGuard};
pub use marshal::{BlobReader, BlobWriter, Marshal, Unmarshal};
pub use objects::{EncDataType, HashAlg, KeyUsage, PcrStructType, SRK_UUID};
pub use policy::{
    CallbackSlot, DelegationInfo, HmacRequest, OsapNonces, OwnershipSecrets, PolicyCallback,
    PolicyType, Secret, SecretLifetime, SecretMode, SecretPrompt, SecretRequest, XorRequest,
};
pub use registry::Registry;
pub use session::{AuthSession, SessionKind};
pub use transport::{
    ChangeAuthRequest, ChangeAuthResponse, KeyStore, LoadKeyResponse, MemoryKeyStore,
    OiapResponse, OsapResponse, StoredKey, TakeOwnershipRequest, TakeOwnershipResponse, Transport,
};
pub use types::*;
