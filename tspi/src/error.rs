// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Error type shared by every registry and authorization operation.

use thiserror::Error;

use crate::constants::tss_rc;

#[derive(Debug, Error)]
pub enum TspiError {
    #[error("invalid handle")]
    InvalidHandle,
    #[error("handle refers to an object of a different type")]
    InvalidObjectType,
    #[error("object is not accessible in its current state")]
    InvalidObjectAccess,
    #[error("bad parameter")]
    BadParameter,
    #[error("invalid attribute flag 0x{0:08x}")]
    InvalidAttribFlag(u32),
    #[error("invalid attribute subflag 0x{0:08x}")]
    InvalidAttribSubflag(u32),
    #[error("invalid attribute data")]
    InvalidAttribData,
    #[error("invalid object init flags 0x{0:08x}")]
    InvalidInitFlags(u32),
    #[error("out of memory")]
    OutOfMemory,
    #[error("handle space exhausted")]
    HandlesExhausted,
    #[error("hash value has an invalid length")]
    HashInvalidLength,
    #[error("hash object holds no data")]
    HashNoData,
    #[error("hash algorithm does not support this operation")]
    HashInvalidAlg,
    #[error("key has no migration policy")]
    KeyNoMigrationPolicy,
    #[error("policy has no secret")]
    PolicyNoSecret,
    #[error("policy secret has expired")]
    SecretExpired,
    #[error("context is silent, secret prompt refused")]
    SilentContext,
    #[error("no PCRs selected")]
    NoPcrsSet,
    #[error("key is not loaded")]
    KeyNotLoaded,
    #[error("public key not available")]
    PublicKeyUnavailable,
    #[error("key not found in persistent storage")]
    KeyNotFound,
    #[error("response authorization validation failed")]
    ValidationFailed,
    #[error("invalid key usage")]
    InvalidKeyUsage,
    #[error("invalid encryption scheme")]
    InvalidEncScheme,
    #[error("invalid signature scheme")]
    InvalidSigScheme,
    #[error("delegation information not set")]
    DelegationNotSet,
    #[error("malformed blob: {0}")]
    BadBlob(String),
    #[error("TPM returned error 0x{0:08x}")]
    Tpm(u32),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("not implemented")]
    NotImplemented,
    #[error("configuration error: {0}")]
    Config(String),
}

impl TspiError {
    /// TSS result code for this error.
    ///
    /// Local failures are tagged with the TSP layer; TPM codes pass through
    /// untouched so callers see exactly what the device returned.
    pub fn code(&self) -> u32 {
        let local = match self {
            TspiError::Tpm(code) => return *code,
            TspiError::InvalidHandle => tss_rc::INVALID_HANDLE,
            TspiError::InvalidObjectType => tss_rc::INVALID_OBJECT_TYPE,
            TspiError::InvalidObjectAccess => tss_rc::INVALID_OBJ_ACCESS,
            TspiError::BadParameter | TspiError::BadBlob(_) => tss_rc::BAD_PARAMETER,
            TspiError::InvalidAttribFlag(_) => tss_rc::INVALID_ATTRIB_FLAG,
            TspiError::InvalidAttribSubflag(_) => tss_rc::INVALID_ATTRIB_SUBFLAG,
            TspiError::InvalidAttribData => tss_rc::INVALID_ATTRIB_DATA,
            TspiError::InvalidInitFlags(_) => tss_rc::INVALID_OBJECT_INITFLAG,
            TspiError::OutOfMemory | TspiError::HandlesExhausted => tss_rc::OUTOFMEMORY,
            TspiError::HashInvalidLength => tss_rc::HASH_INVALID_LENGTH,
            TspiError::HashNoData => tss_rc::HASH_NO_DATA,
            TspiError::HashInvalidAlg => tss_rc::HASH_INVALID_ALG,
            TspiError::KeyNoMigrationPolicy => tss_rc::KEY_NO_MIGRATION_POLICY,
            TspiError::PolicyNoSecret => tss_rc::POLICY_NO_SECRET,
            TspiError::SecretExpired => tss_rc::SECRET_EXPIRED,
            TspiError::SilentContext => tss_rc::SILENT_CONTEXT,
            TspiError::NoPcrsSet => tss_rc::NO_PCRS_SET,
            TspiError::KeyNotLoaded => tss_rc::KEY_NOT_LOADED,
            TspiError::PublicKeyUnavailable => tss_rc::KEY_NOT_SET,
            TspiError::KeyNotFound => tss_rc::PS_KEY_NOTFOUND,
            TspiError::ValidationFailed => tss_rc::TSP_AUTHFAIL,
            TspiError::InvalidKeyUsage => tss_rc::INVALID_KEYUSAGE,
            TspiError::InvalidEncScheme => tss_rc::INVALID_ENCSCHEME,
            TspiError::InvalidSigScheme => tss_rc::INVALID_SIGSCHEME,
            TspiError::DelegationNotSet => tss_rc::DELEGATION_NOTSET,
            TspiError::Transport(_) => tss_rc::COMM_FAILURE,
            TspiError::Internal(_) | TspiError::Config(_) => tss_rc::INTERNAL_ERROR,
            TspiError::NotImplemented => tss_rc::NOTIMPL,
        };
        tss_rc::LAYER_TSP | local
    }
}

pub type Result<T> = std::result::Result<T, TspiError>;
