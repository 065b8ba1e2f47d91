// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Attribute get/set keyed by object kind, flag and sub-flag
//!
//! Unknown flags for a kind are `InvalidAttribFlag`; a known flag with an
//! unknown sub-flag is `InvalidAttribSubflag`; a value out of range is
//! `InvalidAttribData`.

use std::time::SystemTime;

use uuid::Uuid;

use crate::config::{HashMode, VersionMode};
use crate::constants::attrib::{context, delfamily, encdata, hash, key, migdata, nv, pcrs, policy};
use crate::constants::{hash_init, tss};
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectKind;
use crate::objects::{EncDataType, HashAlg, KeyUsage, PcrStructType};
use crate::policy::{CallbackSlot, DelegationInfo, SecretLifetime};
use crate::registry::Registry;
use crate::types::PcrInfo;

fn as_bool(value: u32) -> Result<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(TspiError::InvalidAttribData),
    }
}

fn as_u8(value: u32) -> Result<u8> {
    u8::try_from(value).map_err(|_| TspiError::InvalidAttribData)
}

fn utf8(data: &[u8]) -> Result<&str> {
    std::str::from_utf8(data).map_err(|_| TspiError::InvalidAttribData)
}

fn callback_slot(flag: u32) -> Option<CallbackSlot> {
    match flag {
        policy::CALLBACK_HMAC => Some(CallbackSlot::Hmac),
        policy::CALLBACK_XOR_ENC => Some(CallbackSlot::XorEnc),
        policy::CALLBACK_TAKEOWNERSHIP => Some(CallbackSlot::TakeOwnership),
        policy::CALLBACK_CHANGEAUTHASYM => Some(CallbackSlot::ChangeAuthAsym),
        policy::CALLBACK_SEALX_MASK => Some(CallbackSlot::SealxMask),
        _ => None,
    }
}

fn pcr_info_field(info: Option<PcrInfo>, sub_flag: u32, at_creation: u32, at_release: u32, selection: u32) -> Result<Vec<u8>> {
    if sub_flag != at_creation && sub_flag != at_release && sub_flag != selection {
        return Err(TspiError::InvalidAttribSubflag(sub_flag));
    }
    let info = info.ok_or(TspiError::NoPcrsSet)?;
    Ok(if sub_flag == at_creation {
        info.digest_at_creation()
            .ok_or(TspiError::InvalidAttribSubflag(sub_flag))?
            .to_vec()
    } else if sub_flag == at_release {
        info.digest_at_release().to_vec()
    } else {
        info.release_selection().bitmap.clone()
    })
}

impl Registry {
    fn kind_of(&self, handle: Handle) -> Result<ObjectKind> {
        self.object_kind(handle).ok_or(TspiError::InvalidHandle)
    }

    pub fn get_attrib_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        match self.kind_of(handle)? {
            ObjectKind::Context => self.context_get_u32(handle, flag, sub_flag),
            ObjectKind::Policy => self.policy_get_u32(handle, flag, sub_flag),
            ObjectKind::RsaKey => self.key_get_u32(handle, flag, sub_flag),
            ObjectKind::EncData => self.encdata_get_u32(handle, flag, sub_flag),
            ObjectKind::Hash => match flag {
                hash::ALGORITHM => Ok(match self.hash_alg(handle)? {
                    HashAlg::Sha1 => hash_init::SHA1,
                    HashAlg::Other => hash_init::OTHER,
                }),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Pcrs => self.pcrs_get_u32(handle, flag, sub_flag),
            ObjectKind::NvStore => self.nv_get_u32(handle, flag, sub_flag),
            ObjectKind::DelFamily => self.delfamily_get_u32(handle, flag, sub_flag),
            ObjectKind::MigData => match (flag, sub_flag) {
                (migdata::PAYLOAD_TYPE, migdata::PT_MIGRATE_RESTRICTED) => {
                    Ok(self.migration_payload_type(handle)? as u32)
                }
                (migdata::PAYLOAD_TYPE, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Tpm => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    pub fn set_attrib_u32(&self, handle: Handle, flag: u32, sub_flag: u32, value: u32) -> Result<()> {
        match self.kind_of(handle)? {
            ObjectKind::Context => self.context_set_u32(handle, flag, sub_flag, value),
            ObjectKind::Policy => self.policy_set_u32(handle, flag, sub_flag, value),
            ObjectKind::RsaKey => self.key_set_u32(handle, flag, sub_flag, value),
            ObjectKind::EncData => match (flag, sub_flag) {
                (encdata::SEAL, encdata::SEAL_PROTECT_MODE) => {
                    self.set_encdata_sealx(handle, as_bool(value)?)
                }
                (encdata::SEAL, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Pcrs => self.pcrs_set_u32(handle, flag, sub_flag, value),
            ObjectKind::NvStore => match flag {
                nv::INDEX => self.set_nv_index(handle, value),
                nv::PERMISSIONS => self.set_nv_permissions(handle, value),
                nv::DATASIZE => self.set_nv_data_size(handle, value),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::DelFamily => match (flag, sub_flag) {
                (delfamily::STATE, delfamily::STATE_LOCKED) => {
                    self.set_delfamily_locked(handle, as_bool(value)?)
                }
                (delfamily::STATE, delfamily::STATE_ENABLED) => {
                    self.set_delfamily_enabled(handle, as_bool(value)?)
                }
                (delfamily::STATE, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Hash | ObjectKind::MigData | ObjectKind::Tpm => {
                Err(TspiError::InvalidAttribFlag(flag))
            }
        }
    }

    pub fn get_attrib_data(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<Vec<u8>> {
        match self.kind_of(handle)? {
            ObjectKind::Context => match flag {
                context::MACHINE_NAME => Ok(self.machine_name(handle)?.into_bytes()),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Policy => match (flag, sub_flag) {
                (policy::POPUPSTRING, _) => Ok(self
                    .popup_string(handle)?
                    .unwrap_or_default()
                    .into_bytes()),
                (
                    policy::DELEGATION_INFO,
                    policy::DELEGATION_OWNER_BLOB | policy::DELEGATION_KEY_BLOB,
                ) => Ok(self.delegation(handle)?.blob),
                (policy::DELEGATION_INFO, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::RsaKey => self.key_get_data(handle, flag, sub_flag),
            ObjectKind::EncData => match flag {
                encdata::BLOB if sub_flag == encdata::BLOB_BLOB => self.encdata_blob(handle),
                encdata::BLOB => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                encdata::PCR => pcr_info_field(
                    self.encdata_pcr_info(handle)?,
                    sub_flag,
                    encdata::PCR_DIGEST_ATCREATION,
                    encdata::PCR_DIGEST_ATRELEASE,
                    encdata::PCR_SELECTION,
                ),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Hash => match flag {
                hash::IDENTIFIER => self.hash_identifier(handle),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::MigData => match (flag, sub_flag) {
                (migdata::MIGRATIONBLOB, migdata::MIGRATIONBLOB_MIGBLOB) => {
                    self.migration_blob(handle)
                }
                (migdata::MIGRATIONBLOB, migdata::MIGRATIONBLOB_REWRAPPED) => {
                    self.rewrapped_blob(handle)
                }
                (migdata::MIGRATIONTICKET, _) => self.migration_ticket(handle),
                (migdata::AUTHORITY_DATA, migdata::AUTHORITY_DIGEST) => {
                    Ok(self.msa_digest(handle)?.to_vec())
                }
                (migdata::AUTHORITY_DATA, migdata::AUTHORITY_APPROVAL_HMAC) => {
                    Ok(self.msa_approval_hmac(handle)?.to_vec())
                }
                (migdata::MIGRATIONBLOB | migdata::AUTHORITY_DATA, _) => {
                    Err(TspiError::InvalidAttribSubflag(sub_flag))
                }
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Tpm | ObjectKind::Pcrs | ObjectKind::NvStore | ObjectKind::DelFamily => {
                Err(TspiError::InvalidAttribFlag(flag))
            }
        }
    }

    pub fn set_attrib_data(&self, handle: Handle, flag: u32, sub_flag: u32, data: &[u8]) -> Result<()> {
        match self.kind_of(handle)? {
            ObjectKind::Context => match flag {
                context::MACHINE_NAME => self.set_machine_name(handle, utf8(data)?),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Policy => match (flag, sub_flag) {
                (policy::POPUPSTRING, _) => self.set_popup_string(handle, utf8(data)?),
                (
                    policy::DELEGATION_INFO,
                    policy::DELEGATION_OWNER_BLOB | policy::DELEGATION_KEY_BLOB,
                ) => {
                    let mut info = self.delegation(handle).unwrap_or_default();
                    info.blob_type = sub_flag;
                    info.blob = data.to_vec();
                    self.set_delegation(handle, info)
                }
                (policy::DELEGATION_INFO, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::RsaKey => self.key_set_data(handle, flag, sub_flag, data),
            ObjectKind::EncData => match (flag, sub_flag) {
                (encdata::BLOB, encdata::BLOB_BLOB) => self.set_encdata_blob(handle, data),
                (encdata::BLOB, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Hash => match flag {
                hash::IDENTIFIER => self.set_hash_identifier(handle, data),
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::MigData => match (flag, sub_flag) {
                (migdata::MIGRATIONBLOB, migdata::MIGRATIONBLOB_MIGBLOB) => {
                    self.set_migration_blob(handle, data)
                }
                (migdata::MIGRATIONBLOB, migdata::MIGRATIONBLOB_REWRAPPED) => {
                    self.set_rewrapped_blob(handle, data)
                }
                (migdata::MIGRATIONTICKET, _) => self.set_migration_ticket(handle, data),
                (migdata::AUTHORITY_DATA, migdata::AUTHORITY_DIGEST) => {
                    self.set_msa_digest(handle, data)
                }
                (migdata::AUTHORITY_DATA, migdata::AUTHORITY_APPROVAL_HMAC) => {
                    self.set_msa_approval_hmac(handle, data)
                }
                (migdata::MIGRATIONBLOB | migdata::AUTHORITY_DATA, _) => {
                    Err(TspiError::InvalidAttribSubflag(sub_flag))
                }
                _ => Err(TspiError::InvalidAttribFlag(flag)),
            },
            ObjectKind::Tpm | ObjectKind::Pcrs | ObjectKind::NvStore | ObjectKind::DelFamily => {
                Err(TspiError::InvalidAttribFlag(flag))
            }
        }
    }

    // context

    fn context_get_u32(&self, ctx: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        match flag {
            context::SILENT_MODE => Ok(if self.is_silent(ctx)? {
                context::SILENT
            } else {
                context::NOT_SILENT
            }),
            context::SECRET_HASH_MODE => {
                if sub_flag != context::SECRET_HASH_MODE_POPUP {
                    return Err(TspiError::InvalidAttribSubflag(sub_flag));
                }
                Ok(self.context_hash_mode(ctx)?.to_u32())
            }
            context::VERSION_MODE => Ok(match self.version_mode(ctx)? {
                VersionMode::V1_1 => context::VERSION_V1_1,
                VersionMode::V1_2 => context::VERSION_V1_2,
            }),
            context::CONNECTION_VERSION => self.connection_version(ctx),
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    fn context_set_u32(&self, ctx: Handle, flag: u32, sub_flag: u32, value: u32) -> Result<()> {
        match flag {
            context::SILENT_MODE => match value {
                context::SILENT => self.set_silent_mode(ctx, true),
                context::NOT_SILENT => self.set_silent_mode(ctx, false),
                _ => Err(TspiError::InvalidAttribData),
            },
            context::SECRET_HASH_MODE => {
                if sub_flag != context::SECRET_HASH_MODE_POPUP {
                    return Err(TspiError::InvalidAttribSubflag(sub_flag));
                }
                let mode = HashMode::from_u32(value).ok_or(TspiError::InvalidAttribData)?;
                self.set_context_hash_mode(ctx, mode)
            }
            context::VERSION_MODE => {
                let mode = match value {
                    context::VERSION_V1_1 => VersionMode::V1_1,
                    context::VERSION_V1_2 => VersionMode::V1_2,
                    context::VERSION_AUTO => {
                        if self.connection_version(ctx)? == context::CONNECTION_VERSION_1_1 {
                            VersionMode::V1_1
                        } else {
                            VersionMode::V1_2
                        }
                    }
                    _ => return Err(TspiError::InvalidAttribData),
                };
                self.set_version_mode(ctx, mode)
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    // policy

    fn policy_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        if let Some(slot) = callback_slot(flag) {
            return Ok(self.has_callback(handle, slot)? as u32);
        }
        match flag {
            policy::SECRET_LIFETIME => {
                let lifetime = self.lifetime(handle)?;
                match (sub_flag, lifetime) {
                    (policy::LIFETIME_ALWAYS, l) => Ok((l == SecretLifetime::Always) as u32),
                    (policy::LIFETIME_COUNTER, SecretLifetime::Counter(n)) => Ok(n),
                    (policy::LIFETIME_TIMER, SecretLifetime::Timer { expires_at, .. }) => {
                        let left = expires_at
                            .duration_since(SystemTime::now())
                            .map(|d| d.as_secs())
                            .unwrap_or(0);
                        Ok(u32::try_from(left).unwrap_or(u32::MAX))
                    }
                    (policy::LIFETIME_COUNTER | policy::LIFETIME_TIMER, _) => {
                        Err(TspiError::InvalidAttribData)
                    }
                    _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                }
            }
            policy::DELEGATION_INFO => {
                let info = self.delegation(handle)?;
                match sub_flag {
                    policy::DELEGATION_TYPE => Ok(info.blob_type),
                    policy::DELEGATION_INDEX => Ok(info.index),
                    policy::DELEGATION_PER1 => Ok(info.per1),
                    policy::DELEGATION_PER2 => Ok(info.per2),
                    policy::DELEGATION_LABEL => Ok(info.label as u32),
                    policy::DELEGATION_FAMILYID => Ok(info.family_id),
                    policy::DELEGATION_VERCOUNT => Ok(info.verification_count),
                    _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                }
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    fn policy_set_u32(&self, handle: Handle, flag: u32, sub_flag: u32, value: u32) -> Result<()> {
        if let Some(slot) = callback_slot(flag) {
            // callbacks are installed with `set_callback`; zero removes one
            if value != 0 {
                return Err(TspiError::InvalidAttribData);
            }
            return self.clear_callback(handle, slot);
        }
        match flag {
            policy::SECRET_LIFETIME => {
                let lifetime = match sub_flag {
                    policy::LIFETIME_ALWAYS => SecretLifetime::Always,
                    policy::LIFETIME_COUNTER => SecretLifetime::Counter(value),
                    policy::LIFETIME_TIMER => SecretLifetime::timer(value),
                    _ => return Err(TspiError::InvalidAttribSubflag(sub_flag)),
                };
                self.set_lifetime(handle, lifetime)
            }
            policy::DELEGATION_INFO => {
                let mut info: DelegationInfo = self.delegation(handle).unwrap_or_default();
                match sub_flag {
                    policy::DELEGATION_TYPE => info.blob_type = value,
                    policy::DELEGATION_INDEX => info.index = value,
                    policy::DELEGATION_PER1 => info.per1 = value,
                    policy::DELEGATION_PER2 => info.per2 = value,
                    policy::DELEGATION_LABEL => info.label = as_u8(value)?,
                    policy::DELEGATION_FAMILYID => info.family_id = value,
                    policy::DELEGATION_VERCOUNT => info.verification_count = value,
                    _ => return Err(TspiError::InvalidAttribSubflag(sub_flag)),
                }
                self.set_delegation(handle, info)
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    // key

    fn key_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        match flag {
            key::INFO => match sub_flag {
                key::INFO_SIZE => self.key_size(handle),
                key::INFO_USAGE => Ok(self.key_usage(handle)?.to_tss()),
                key::INFO_KEYFLAGS => self.key_flags(handle),
                key::INFO_AUTHUSAGE => Ok(match self.key_auth_data_usage(handle)? {
                    crate::constants::tpm_auth::NEVER => tss::KEYAUTH_AUTH_NEVER,
                    crate::constants::tpm_auth::PRIV_USE_ONLY => tss::KEYAUTH_AUTH_PRIV_USE_ONLY,
                    _ => tss::KEYAUTH_AUTH_ALWAYS,
                }),
                key::INFO_AUTHDATAUSAGE => Ok(self.key_auth_data_usage(handle)? as u32),
                key::INFO_ALGORITHM => self.key_algorithm(handle),
                key::INFO_SIGSCHEME => self.key_sig_scheme(handle),
                key::INFO_ENCSCHEME => self.key_enc_scheme(handle),
                key::INFO_MIGRATABLE => Ok((self.key_flags(handle)?
                    & crate::constants::tpm_key_flags::MIGRATABLE
                    != 0) as u32),
                key::INFO_VOLATILE => Ok((self.key_flags(handle)?
                    & crate::constants::tpm_key_flags::IS_VOLATILE
                    != 0) as u32),
                key::INFO_KEYSTRUCT => Ok(if self.key_is_key12(handle)? {
                    key::KEYSTRUCT_KEY12
                } else {
                    key::KEYSTRUCT_KEY
                }),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::RSAKEY_INFO => match sub_flag {
                key::RSA_KEYSIZE => self.key_size(handle),
                key::RSA_PRIMES => self.key_num_primes(handle),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::REGISTER => Ok(match self.key_registration(handle)? {
                (true, _) => key::REGISTER_USER,
                (false, true) => key::REGISTER_SYSTEM,
                (false, false) => key::REGISTER_NO,
            }),
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    fn key_set_u32(&self, handle: Handle, flag: u32, sub_flag: u32, value: u32) -> Result<()> {
        match flag {
            key::INFO => match sub_flag {
                key::INFO_SIZE => self.set_key_size(handle, value),
                key::INFO_USAGE => {
                    let usage = KeyUsage::from_tss(value).ok_or(TspiError::InvalidAttribData)?;
                    self.set_key_usage(handle, usage)
                }
                key::INFO_KEYFLAGS => self.set_key_flags(handle, value),
                key::INFO_AUTHUSAGE => {
                    let usage = match value {
                        tss::KEYAUTH_AUTH_NEVER => crate::constants::tpm_auth::NEVER,
                        tss::KEYAUTH_AUTH_ALWAYS => crate::constants::tpm_auth::ALWAYS,
                        tss::KEYAUTH_AUTH_PRIV_USE_ONLY => crate::constants::tpm_auth::PRIV_USE_ONLY,
                        _ => return Err(TspiError::InvalidAttribData),
                    };
                    self.set_key_auth_data_usage(handle, usage)
                }
                key::INFO_AUTHDATAUSAGE => self.set_key_auth_data_usage(handle, as_u8(value)?),
                key::INFO_ALGORITHM => self.set_key_algorithm(handle, value),
                key::INFO_SIGSCHEME => self.set_key_sig_scheme(handle, value),
                key::INFO_ENCSCHEME => self.set_key_enc_scheme(handle, value),
                key::INFO_MIGRATABLE => self.set_key_migratable(handle, as_bool(value)?),
                key::INFO_VOLATILE => self.set_key_volatile(handle, as_bool(value)?),
                key::INFO_KEYSTRUCT => match value {
                    key::KEYSTRUCT_KEY => self.set_key_struct(handle, false),
                    key::KEYSTRUCT_KEY12 => self.set_key_struct(handle, true),
                    _ => Err(TspiError::InvalidAttribData),
                },
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::RSAKEY_INFO => match sub_flag {
                key::RSA_KEYSIZE => self.set_key_size(handle, value),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::REGISTER => match value {
                key::REGISTER_USER => self.set_key_registration(handle, true, false),
                key::REGISTER_SYSTEM => self.set_key_registration(handle, false, true),
                key::REGISTER_NO => self.set_key_registration(handle, false, false),
                _ => Err(TspiError::InvalidAttribData),
            },
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    fn key_get_data(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<Vec<u8>> {
        match flag {
            key::BLOB => match sub_flag {
                key::BLOB_BLOB => self.key_blob(handle),
                key::BLOB_PUBLIC_KEY => self.key_public_blob(handle),
                key::BLOB_PRIVATE_KEY => self.key_private_blob(handle),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::RSAKEY_INFO => match sub_flag {
                key::RSA_EXPONENT => self.key_exponent(handle),
                key::RSA_MODULUS => self.key_modulus(handle),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::UUID => Ok(self.key_uuid(handle)?.as_bytes().to_vec()),
            key::PCR => pcr_info_field(
                self.key_pcr_info(handle)?,
                sub_flag,
                key::PCR_DIGEST_ATCREATION,
                key::PCR_DIGEST_ATRELEASE,
                key::PCR_SELECTION,
            ),
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    fn key_set_data(&self, handle: Handle, flag: u32, sub_flag: u32, data: &[u8]) -> Result<()> {
        match flag {
            key::BLOB => match sub_flag {
                // whole-blob replacement is the canonical load path
                key::BLOB_BLOB => self.materialize_key(handle, data),
                key::BLOB_PUBLIC_KEY => self.set_key_public_blob(handle, data),
                key::BLOB_PRIVATE_KEY => self.set_key_private_blob(handle, data),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::RSAKEY_INFO => match sub_flag {
                key::RSA_EXPONENT => self.set_key_exponent(handle, data),
                key::RSA_MODULUS => self.set_key_modulus(handle, data),
                _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            },
            key::UUID => {
                let uuid = Uuid::from_slice(data).map_err(|_| TspiError::InvalidAttribData)?;
                self.set_key_uuid(handle, uuid)
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    // encrypted data

    fn encdata_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        match (flag, sub_flag) {
            (encdata::SEAL, encdata::SEAL_PROTECT_MODE) => {
                Ok(self.encdata_sealx(handle)? as u32)
            }
            (encdata::SEAL, _) => Err(TspiError::InvalidAttribSubflag(sub_flag)),
            (encdata::TYPE, _) => Ok(self.encdata_type(handle).map(EncDataType::to_u32)?),
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    // PCR composite

    fn pcrs_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        if flag != pcrs::INFO {
            return Err(TspiError::InvalidAttribFlag(flag));
        }
        let (release, creation) = self.pcr_locality(handle)?;
        match sub_flag {
            pcrs::INFO_SHORT_LOCALITY | pcrs::INFO_LONG_LOCALITY_RELEASE => Ok(release as u32),
            pcrs::INFO_LONG_LOCALITY_CREATION => Ok(creation as u32),
            pcrs::INFO_STRUCT_TYPE => Ok(self.pcrs_struct_type(handle)?.to_u32()),
            _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
        }
    }

    fn pcrs_set_u32(&self, handle: Handle, flag: u32, sub_flag: u32, value: u32) -> Result<()> {
        if flag != pcrs::INFO {
            return Err(TspiError::InvalidAttribFlag(flag));
        }
        let structure = self.pcrs_struct_type(handle)?;
        match (sub_flag, structure) {
            (pcrs::INFO_SHORT_LOCALITY, PcrStructType::InfoShort)
            | (pcrs::INFO_LONG_LOCALITY_RELEASE, PcrStructType::InfoLong) => {
                self.set_pcr_locality(handle, Some(as_u8(value)?), None)
            }
            (pcrs::INFO_LONG_LOCALITY_CREATION, PcrStructType::InfoLong) => {
                self.set_pcr_locality(handle, None, Some(as_u8(value)?))
            }
            (
                pcrs::INFO_SHORT_LOCALITY
                | pcrs::INFO_LONG_LOCALITY_RELEASE
                | pcrs::INFO_LONG_LOCALITY_CREATION,
                _,
            ) => Err(TspiError::InvalidObjectType),
            _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
        }
    }

    // NV index

    fn nv_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        match flag {
            nv::INDEX => self.nv_index(handle),
            nv::PERMISSIONS => self.nv_permissions(handle),
            nv::DATASIZE => self.nv_data_size(handle),
            nv::STATE => {
                let (read_st_clear, write_st_clear, write_define) = self.nv_state(handle)?;
                match sub_flag {
                    nv::STATE_READSTCLEAR => Ok(read_st_clear as u32),
                    nv::STATE_WRITESTCLEAR => Ok(write_st_clear as u32),
                    nv::STATE_WRITEDEFINE => Ok(write_define as u32),
                    _ => Err(TspiError::InvalidAttribSubflag(sub_flag)),
                }
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }

    // delegation family

    fn delfamily_get_u32(&self, handle: Handle, flag: u32, sub_flag: u32) -> Result<u32> {
        let row = self.delfamily(handle)?;
        match (flag, sub_flag) {
            (delfamily::STATE, delfamily::STATE_LOCKED) => Ok(row.locked as u32),
            (delfamily::STATE, delfamily::STATE_ENABLED) => Ok(row.enabled as u32),
            (delfamily::INFO, delfamily::INFO_LABEL) => Ok(row.label as u32),
            (delfamily::INFO, delfamily::INFO_VERCOUNT) => Ok(row.verification_count),
            (delfamily::INFO, delfamily::INFO_FAMILYID) => Ok(row.family_id),
            (delfamily::STATE | delfamily::INFO, _) => {
                Err(TspiError::InvalidAttribSubflag(sub_flag))
            }
            _ => Err(TspiError::InvalidAttribFlag(flag)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{encdata_init, key_init, pcrs_init};

    fn setup() -> (Registry, Handle) {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        (reg, ctx)
    }

    #[test]
    fn test_context_attributes() {
        let (reg, ctx) = setup();
        reg.set_attrib_u32(ctx, context::SILENT_MODE, 0, context::SILENT)
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(ctx, context::SILENT_MODE, 0).unwrap(),
            context::SILENT
        );
        assert!(matches!(
            reg.set_attrib_u32(ctx, context::SILENT_MODE, 0, 7),
            Err(TspiError::InvalidAttribData)
        ));
        assert!(matches!(
            reg.get_attrib_u32(ctx, context::SECRET_HASH_MODE, 9),
            Err(TspiError::InvalidAttribSubflag(9))
        ));
        reg.set_attrib_u32(
            ctx,
            context::SECRET_HASH_MODE,
            context::SECRET_HASH_MODE_POPUP,
            context::HASH_MODE_NULL,
        )
        .unwrap();
        assert_eq!(reg.context_hash_mode(ctx).unwrap(), HashMode::Null);
        reg.set_attrib_data(ctx, context::MACHINE_NAME, 0, b"host")
            .unwrap();
        assert_eq!(
            reg.get_attrib_data(ctx, context::MACHINE_NAME, 0).unwrap(),
            b"host"
        );
        assert!(matches!(
            reg.get_attrib_u32(ctx, 0x7777, 0),
            Err(TspiError::InvalidAttribFlag(0x7777))
        ));
    }

    #[test]
    fn test_version_mode_auto_follows_connection() {
        let (reg, ctx) = setup();
        reg.set_connection_version(ctx, context::CONNECTION_VERSION_1_1)
            .unwrap();
        reg.set_attrib_u32(ctx, context::VERSION_MODE, 0, context::VERSION_AUTO)
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(ctx, context::VERSION_MODE, 0).unwrap(),
            context::VERSION_V1_1
        );
    }

    #[test]
    fn test_policy_lifetime_attributes() {
        let (reg, ctx) = setup();
        let p = reg.context_default_policy(ctx).unwrap();
        assert_eq!(
            reg.get_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_ALWAYS)
                .unwrap(),
            1
        );
        reg.set_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_COUNTER, 3)
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_COUNTER)
                .unwrap(),
            3
        );
        assert!(matches!(
            reg.get_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_TIMER),
            Err(TspiError::InvalidAttribData)
        ));
        reg.set_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_TIMER, 60)
            .unwrap();
        let left = reg
            .get_attrib_u32(p, policy::SECRET_LIFETIME, policy::LIFETIME_TIMER)
            .unwrap();
        assert!(left <= 60 && left >= 58);
        assert!(matches!(
            reg.set_attrib_u32(p, policy::SECRET_LIFETIME, 0x42, 1),
            Err(TspiError::InvalidAttribSubflag(0x42))
        ));
    }

    #[test]
    fn test_policy_delegation_attributes() {
        let (reg, ctx) = setup();
        let p = reg.context_default_policy(ctx).unwrap();
        assert!(matches!(
            reg.get_attrib_u32(p, policy::DELEGATION_INFO, policy::DELEGATION_INDEX),
            Err(TspiError::DelegationNotSet)
        ));
        reg.set_attrib_u32(p, policy::DELEGATION_INFO, policy::DELEGATION_INDEX, 4)
            .unwrap();
        reg.set_attrib_data(p, policy::DELEGATION_INFO, policy::DELEGATION_KEY_BLOB, &[1, 2])
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(p, policy::DELEGATION_INFO, policy::DELEGATION_INDEX)
                .unwrap(),
            4
        );
        assert_eq!(
            reg.get_attrib_u32(p, policy::DELEGATION_INFO, policy::DELEGATION_TYPE)
                .unwrap(),
            policy::DELEGATION_KEY_BLOB
        );
        assert!(matches!(
            reg.set_attrib_u32(p, policy::DELEGATION_INFO, policy::DELEGATION_LABEL, 300),
            Err(TspiError::InvalidAttribData)
        ));
    }

    #[test]
    fn test_key_info_attributes_and_finalization() {
        let (reg, ctx) = setup();
        let k = reg.create_key(ctx, key_init::TYPE_BIND).unwrap();
        assert_eq!(
            reg.get_attrib_u32(k, key::INFO, key::INFO_USAGE).unwrap(),
            tss::KEYUSAGE_BIND
        );
        reg.set_attrib_u32(k, key::INFO, key::INFO_SIZE, 1024).unwrap();
        assert_eq!(
            reg.get_attrib_u32(k, key::RSAKEY_INFO, key::RSA_KEYSIZE)
                .unwrap(),
            1024
        );
        reg.set_attrib_u32(k, key::INFO, key::INFO_MIGRATABLE, 1).unwrap();
        assert_eq!(
            reg.get_attrib_u32(k, key::INFO, key::INFO_MIGRATABLE).unwrap(),
            1
        );
        assert!(matches!(
            reg.get_attrib_u32(k, key::INFO, 0x9999),
            Err(TspiError::InvalidAttribSubflag(0x9999))
        ));

        let blob = reg.get_attrib_data(k, key::BLOB, key::BLOB_BLOB).unwrap();
        reg.set_attrib_data(k, key::BLOB, key::BLOB_BLOB, &blob).unwrap();
        assert!(matches!(
            reg.set_attrib_u32(k, key::INFO, key::INFO_SIZE, 2048),
            Err(TspiError::InvalidObjectAccess)
        ));
        assert!(matches!(
            reg.set_attrib_data(k, key::RSAKEY_INFO, key::RSA_EXPONENT, &[3]),
            Err(TspiError::InvalidObjectAccess)
        ));
        assert_eq!(
            reg.get_attrib_data(k, key::BLOB, key::BLOB_BLOB).unwrap(),
            blob
        );
        // registration is not structural
        reg.set_attrib_u32(k, key::REGISTER, 0, key::REGISTER_USER)
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(k, key::REGISTER, 0).unwrap(),
            key::REGISTER_USER
        );
    }

    #[test]
    fn test_key_uuid_and_pcr_attributes() {
        let (reg, ctx) = setup();
        let k = reg.create_key(ctx, 0).unwrap();
        let uuid = Uuid::from_u128(0xABCD);
        reg.set_attrib_data(k, key::UUID, 0, uuid.as_bytes()).unwrap();
        assert_eq!(reg.key_uuid(k).unwrap(), uuid);
        assert!(matches!(
            reg.get_attrib_data(k, key::PCR, key::PCR_DIGEST_ATRELEASE),
            Err(TspiError::NoPcrsSet)
        ));
        let pcrs = reg.create_pcrs(ctx, pcrs_init::INFO_LONG).unwrap();
        reg.set_pcr_value(pcrs, 2, &[4; 20]).unwrap();
        reg.set_key_pcrs(k, pcrs).unwrap();
        assert_eq!(
            reg.get_attrib_data(k, key::PCR, key::PCR_DIGEST_ATRELEASE)
                .unwrap(),
            reg.pcr_composite_hash(pcrs).unwrap().to_vec()
        );
        assert_eq!(
            reg.get_attrib_data(k, key::PCR, key::PCR_SELECTION).unwrap(),
            vec![0x04, 0, 0]
        );
    }

    #[test]
    fn test_encdata_and_pcrs_attributes() {
        let (reg, ctx) = setup();
        let data = reg.create_encdata(ctx, encdata_init::SEAL).unwrap();
        reg.set_attrib_u32(data, encdata::SEAL, encdata::SEAL_PROTECT_MODE, 1)
            .unwrap();
        assert!(reg.encdata_sealx(data).unwrap());
        assert_eq!(
            reg.get_attrib_u32(data, encdata::TYPE, 0).unwrap(),
            encdata_init::SEAL
        );

        let short = reg.create_pcrs(ctx, pcrs_init::INFO_SHORT).unwrap();
        reg.set_attrib_u32(short, pcrs::INFO, pcrs::INFO_SHORT_LOCALITY, 0x03)
            .unwrap();
        assert_eq!(
            reg.get_attrib_u32(short, pcrs::INFO, pcrs::INFO_SHORT_LOCALITY)
                .unwrap(),
            3
        );
        assert!(matches!(
            reg.set_attrib_u32(short, pcrs::INFO, pcrs::INFO_LONG_LOCALITY_CREATION, 1),
            Err(TspiError::InvalidObjectType)
        ));
    }

    #[test]
    fn test_unknown_handle_and_tpm() {
        let (reg, ctx) = setup();
        assert!(matches!(
            reg.get_attrib_u32(Handle(0xFFFF_FF00), 1, 0),
            Err(TspiError::InvalidHandle)
        ));
        let tpm = reg.tpm_object(ctx).unwrap();
        assert!(matches!(
            reg.get_attrib_u32(tpm, 1, 0),
            Err(TspiError::InvalidAttribFlag(1))
        ));
    }

    #[test]
    fn test_nv_attributes() {
        let (reg, ctx) = setup();
        let nv = reg.create_nvstore(ctx).unwrap();
        reg.set_attrib_u32(nv, nv::INDEX, 0, 0x0001_1100).unwrap();
        reg.set_attrib_u32(nv, nv::PERMISSIONS, 0, 0x0004_0000).unwrap();
        reg.set_attrib_u32(nv, nv::DATASIZE, 0, 64).unwrap();
        assert_eq!(reg.get_attrib_u32(nv, nv::INDEX, 0).unwrap(), 0x0001_1100);
        assert_eq!(
            reg.get_attrib_u32(nv, nv::PERMISSIONS, 0).unwrap(),
            0x0004_0000
        );
        assert_eq!(reg.get_attrib_u32(nv, nv::DATASIZE, 0).unwrap(), 64);

        // the D bit marks a TPM-reserved index
        assert!(matches!(
            reg.set_attrib_u32(nv, nv::INDEX, 0, 0x1000_0001),
            Err(TspiError::BadParameter)
        ));
        assert_eq!(reg.get_attrib_u32(nv, nv::INDEX, 0).unwrap(), 0x0001_1100);

        assert!(matches!(
            reg.set_attrib_u32(nv, 0x55, 0, 1),
            Err(TspiError::InvalidAttribFlag(0x55))
        ));
        assert!(matches!(
            reg.get_attrib_u32(nv, 0x55, 0),
            Err(TspiError::InvalidAttribFlag(0x55))
        ));
    }
}
