// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! RSA key objects
//!
//! A key starts as an editable template built from its init flags. Once it
//! is loaded from or committed to the TPM it is structurally final: the
//! `KEY_SET` flag is raised and every structural setter fails with
//! `InvalidObjectAccess`. From then on the blob can only change through
//! [`Registry::materialize_key`].

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::VersionMode;
use crate::constants::*;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::{ObjectFlags, Record};
use crate::marshal::{Marshal, Unmarshal};
use crate::registry::Registry;
use crate::types::{
    KeyInfo, KeyParms, KeyStructure, PcrInfo, RsaKeyParms, TpmKey, TpmPubKey, TpmVersion,
};

/// Well-known UUID of the storage root key
pub const SRK_UUID: Uuid = Uuid::from_u128(1);

/// Size of the SRK public key placeholder, in bytes
const SRK_PLACEHOLDER_LEN: usize = 256;

const DEFAULT_KEY_BITS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Bind,
    Identity,
    Legacy,
    Signing,
    Storage,
    AuthChange,
    Migrate,
}

impl KeyUsage {
    /// TSS_KEYUSAGE_* value
    pub fn to_tss(self) -> u32 {
        match self {
            KeyUsage::Bind => tss::KEYUSAGE_BIND,
            KeyUsage::Identity => tss::KEYUSAGE_IDENTITY,
            KeyUsage::Legacy => tss::KEYUSAGE_LEGACY,
            KeyUsage::Signing => tss::KEYUSAGE_SIGN,
            KeyUsage::Storage => tss::KEYUSAGE_STORAGE,
            KeyUsage::AuthChange => tss::KEYUSAGE_AUTHCHANGE,
            KeyUsage::Migrate => tss::KEYUSAGE_MIGRATE,
        }
    }

    pub fn from_tss(v: u32) -> Option<Self> {
        match v {
            tss::KEYUSAGE_BIND => Some(KeyUsage::Bind),
            tss::KEYUSAGE_IDENTITY => Some(KeyUsage::Identity),
            tss::KEYUSAGE_LEGACY => Some(KeyUsage::Legacy),
            tss::KEYUSAGE_SIGN => Some(KeyUsage::Signing),
            tss::KEYUSAGE_STORAGE => Some(KeyUsage::Storage),
            tss::KEYUSAGE_AUTHCHANGE => Some(KeyUsage::AuthChange),
            tss::KEYUSAGE_MIGRATE => Some(KeyUsage::Migrate),
            _ => None,
        }
    }

    /// TPM_KEY_USAGE value stored in the blob
    pub fn to_tpm(self) -> u16 {
        match self {
            KeyUsage::Bind => tpm_key_usage::BIND,
            KeyUsage::Identity => tpm_key_usage::IDENTITY,
            KeyUsage::Legacy => tpm_key_usage::LEGACY,
            KeyUsage::Signing => tpm_key_usage::SIGNING,
            KeyUsage::Storage => tpm_key_usage::STORAGE,
            KeyUsage::AuthChange => tpm_key_usage::AUTHCHANGE,
            KeyUsage::Migrate => tpm_key_usage::MIGRATE,
        }
    }

    pub fn from_tpm(v: u16) -> Option<Self> {
        match v {
            tpm_key_usage::BIND => Some(KeyUsage::Bind),
            tpm_key_usage::IDENTITY => Some(KeyUsage::Identity),
            tpm_key_usage::LEGACY => Some(KeyUsage::Legacy),
            tpm_key_usage::SIGNING => Some(KeyUsage::Signing),
            tpm_key_usage::STORAGE => Some(KeyUsage::Storage),
            tpm_key_usage::AUTHCHANGE => Some(KeyUsage::AuthChange),
            tpm_key_usage::MIGRATE => Some(KeyUsage::Migrate),
            _ => None,
        }
    }

    fn default_schemes(self) -> (u16, u16) {
        match self {
            KeyUsage::Signing | KeyUsage::Identity => (tpm_es::NONE, tpm_ss::RSASSAPKCS1V15_SHA1),
            KeyUsage::Legacy => (tpm_es::RSAESOAEP_SHA1_MGF1, tpm_ss::RSASSAPKCS1V15_SHA1),
            KeyUsage::Storage | KeyUsage::Bind | KeyUsage::AuthChange | KeyUsage::Migrate => {
                (tpm_es::RSAESOAEP_SHA1_MGF1, tpm_ss::NONE)
            }
        }
    }

    fn accepts_enc_scheme(self, es: u16) -> bool {
        match self {
            KeyUsage::Signing | KeyUsage::Identity => es == tpm_es::NONE,
            KeyUsage::Storage | KeyUsage::Migrate | KeyUsage::AuthChange => {
                es == tpm_es::RSAESOAEP_SHA1_MGF1
            }
            KeyUsage::Bind | KeyUsage::Legacy => {
                es == tpm_es::RSAESOAEP_SHA1_MGF1 || es == tpm_es::RSAESPKCSV15
            }
        }
    }

    fn accepts_sig_scheme(self, ss: u16) -> bool {
        match self {
            KeyUsage::Signing | KeyUsage::Legacy => matches!(
                ss,
                tpm_ss::RSASSAPKCS1V15_SHA1 | tpm_ss::RSASSAPKCS1V15_DER | tpm_ss::RSASSAPKCS1V15_INFO
            ),
            KeyUsage::Identity => ss == tpm_ss::RSASSAPKCS1V15_SHA1,
            KeyUsage::Storage | KeyUsage::Bind | KeyUsage::AuthChange | KeyUsage::Migrate => {
                ss == tpm_ss::NONE
            }
        }
    }
}

fn enc_scheme_to_tss(es: u16) -> u32 {
    match es {
        tpm_es::RSAESPKCSV15 => tss::ES_RSAESPKCSV15,
        tpm_es::RSAESOAEP_SHA1_MGF1 => tss::ES_RSAESOAEP_SHA1_MGF1,
        _ => tss::ES_NONE,
    }
}

fn enc_scheme_from_tss(v: u32) -> Option<u16> {
    match v {
        tss::ES_NONE => Some(tpm_es::NONE),
        tss::ES_RSAESPKCSV15 => Some(tpm_es::RSAESPKCSV15),
        tss::ES_RSAESOAEP_SHA1_MGF1 => Some(tpm_es::RSAESOAEP_SHA1_MGF1),
        _ => None,
    }
}

fn sig_scheme_to_tss(ss: u16) -> u32 {
    match ss {
        tpm_ss::RSASSAPKCS1V15_SHA1 => tss::SS_RSASSAPKCS1V15_SHA1,
        tpm_ss::RSASSAPKCS1V15_DER => tss::SS_RSASSAPKCS1V15_DER,
        tpm_ss::RSASSAPKCS1V15_INFO => tss::SS_RSASSAPKCS1V15_INFO,
        _ => tss::SS_NONE,
    }
}

fn sig_scheme_from_tss(v: u32) -> Option<u16> {
    match v {
        tss::SS_NONE => Some(tpm_ss::NONE),
        tss::SS_RSASSAPKCS1V15_SHA1 => Some(tpm_ss::RSASSAPKCS1V15_SHA1),
        tss::SS_RSASSAPKCS1V15_DER => Some(tpm_ss::RSASSAPKCS1V15_DER),
        tss::SS_RSASSAPKCS1V15_INFO => Some(tpm_ss::RSASSAPKCS1V15_INFO),
        _ => None,
    }
}

/// Payload of a key object
#[derive(Debug, Clone)]
pub struct RsaKey {
    pub key: TpmKey,
    pub uuid: Uuid,
    /// Handle the transport assigned when the key was loaded
    pub tcs_handle: Option<u32>,
    pub usage_policy: Handle,
    pub migration_policy: Handle,
    pub is_srk: bool,
}

impl RsaKey {
    pub(crate) fn clear_policy(&mut self, policy: Handle) {
        if self.usage_policy == policy {
            self.usage_policy = Handle::NULL;
        }
        if self.migration_policy == policy {
            self.migration_policy = Handle::NULL;
        }
    }

    fn usage(&self) -> Result<KeyUsage> {
        KeyUsage::from_tpm(self.key.key_usage).ok_or(TspiError::InvalidKeyUsage)
    }

    /// SRK whose public part has not been read back from the TPM yet
    fn has_placeholder_public(&self) -> bool {
        (self.is_srk || self.uuid == SRK_UUID) && self.key.pub_key.iter().all(|b| *b == 0)
    }

    fn public_modulus(&self) -> Result<Vec<u8>> {
        if self.has_placeholder_public() {
            return Err(TspiError::PublicKeyUnavailable);
        }
        Ok(self.key.pub_key.clone())
    }
}

fn key_size_from_flags(flags: u32) -> Result<u32> {
    Ok(match flags & key_init::SIZE_BITMASK {
        key_init::SIZE_DEFAULT => DEFAULT_KEY_BITS,
        key_init::SIZE_512 => 512,
        key_init::SIZE_1024 => 1024,
        key_init::SIZE_2048 => 2048,
        key_init::SIZE_4096 => 4096,
        key_init::SIZE_8192 => 8192,
        key_init::SIZE_16384 => 16384,
        _ => return Err(TspiError::InvalidInitFlags(flags)),
    })
}

fn key_usage_from_flags(flags: u32) -> Result<KeyUsage> {
    Ok(match flags & key_init::TYPE_BITMASK {
        key_init::TYPE_DEFAULT | key_init::TYPE_LEGACY => KeyUsage::Legacy,
        key_init::TYPE_SIGNING => KeyUsage::Signing,
        key_init::TYPE_STORAGE => KeyUsage::Storage,
        key_init::TYPE_IDENTITY => KeyUsage::Identity,
        key_init::TYPE_AUTHCHANGE => KeyUsage::AuthChange,
        key_init::TYPE_BIND => KeyUsage::Bind,
        key_init::TYPE_MIGRATE => KeyUsage::Migrate,
        _ => return Err(TspiError::InvalidInitFlags(flags)),
    })
}

/// Build the editable key template described by `flags`
fn key_template(flags: u32, version_mode: VersionMode) -> Result<(RsaKey, ObjectFlags)> {
    const KNOWN: u32 = key_init::AUTHORIZATION
        | key_init::AUTHORIZATION_PRIV_USE_ONLY
        | key_init::VOLATILE
        | key_init::MIGRATABLE
        | key_init::TYPE_BITMASK
        | key_init::SIZE_BITMASK
        | key_init::CERTIFIED_MIGRATABLE
        | key_init::STRUCT_BITMASK
        | key_init::TEMPLATE_BITMASK;
    if flags & !KNOWN != 0 {
        return Err(TspiError::InvalidInitFlags(flags));
    }

    let mut obj_flags = ObjectFlags::empty();
    match flags & key_init::TEMPLATE_BITMASK {
        0 => {}
        key_init::TSP_SRK => {
            let (es, ss) = KeyUsage::Storage.default_schemes();
            let key = TpmKey {
                structure: KeyStructure::Key(TpmVersion::V1_1),
                key_usage: tpm_key_usage::STORAGE,
                key_flags: 0,
                auth_data_usage: tpm_auth::ALWAYS,
                algorithm_parms: KeyParms::rsa(es, ss, &RsaKeyParms::new(2048)),
                pcr_info: Vec::new(),
                pub_key: vec![0u8; SRK_PLACEHOLDER_LEN],
                enc_data: Vec::new(),
            };
            obj_flags.insert(ObjectFlags::USAGE_AUTH);
            return Ok((
                RsaKey {
                    key,
                    uuid: SRK_UUID,
                    tcs_handle: Some(tpm_kh::SRK),
                    usage_policy: Handle::NULL,
                    migration_policy: Handle::NULL,
                    is_srk: true,
                },
                obj_flags,
            ));
        }
        _ => return Err(TspiError::InvalidInitFlags(flags)),
    }

    let usage = key_usage_from_flags(flags)?;
    let bits = key_size_from_flags(flags)?;
    let structure = match flags & key_init::STRUCT_BITMASK {
        key_init::STRUCT_DEFAULT => match version_mode {
            VersionMode::V1_1 => KeyStructure::Key(TpmVersion::V1_1),
            VersionMode::V1_2 => KeyStructure::Key12,
        },
        key_init::STRUCT_KEY => KeyStructure::Key(TpmVersion::V1_1),
        key_init::STRUCT_KEY12 => KeyStructure::Key12,
        _ => return Err(TspiError::InvalidInitFlags(flags)),
    };

    let auth_data_usage = if flags & key_init::AUTHORIZATION != 0 {
        obj_flags.insert(ObjectFlags::USAGE_AUTH);
        tpm_auth::ALWAYS
    } else if flags & key_init::AUTHORIZATION_PRIV_USE_ONLY != 0 {
        obj_flags.insert(ObjectFlags::USAGE_AUTH);
        tpm_auth::PRIV_USE_ONLY
    } else {
        tpm_auth::NEVER
    };

    let mut key_flags = 0;
    if flags & key_init::VOLATILE != 0 {
        key_flags |= tpm_key_flags::IS_VOLATILE;
    }
    if flags & key_init::MIGRATABLE != 0 {
        key_flags |= tpm_key_flags::MIGRATABLE;
        obj_flags.insert(ObjectFlags::MIGRATION_AUTH);
    }
    if flags & key_init::CERTIFIED_MIGRATABLE != 0 {
        key_flags |= tpm_key_flags::MIGRATABLE | tpm_key_flags::MIGRATE_AUTHORITY;
        obj_flags.insert(ObjectFlags::MIGRATION_AUTH);
    }

    let (es, ss) = usage.default_schemes();
    let key = TpmKey {
        structure,
        key_usage: usage.to_tpm(),
        key_flags,
        auth_data_usage,
        algorithm_parms: KeyParms::rsa(es, ss, &RsaKeyParms::new(bits)),
        pcr_info: Vec::new(),
        pub_key: Vec::new(),
        enc_data: Vec::new(),
    };
    Ok((
        RsaKey {
            key,
            uuid: Uuid::nil(),
            tcs_handle: None,
            usage_policy: Handle::NULL,
            migration_policy: Handle::NULL,
            is_srk: false,
        },
        obj_flags,
    ))
}

/// Object flags implied by a finished key blob
fn flags_for_blob(key: &TpmKey) -> ObjectFlags {
    let mut flags = ObjectFlags::empty().with(ObjectFlags::KEY_SET);
    flags.set(
        ObjectFlags::USAGE_AUTH,
        key.auth_data_usage != tpm_auth::NEVER,
    );
    flags.set(
        ObjectFlags::MIGRATION_AUTH,
        key.key_flags & tpm_key_flags::MIGRATABLE != 0,
    );
    flags.set(ObjectFlags::PCRS, !key.pcr_info.is_empty());
    flags
}

impl Registry {
    /// Create a key template from TSS key init flags
    pub fn create_key(&self, ctx: Handle, init_flags: u32) -> Result<Handle> {
        let (version_mode, usage_policy) = self
            .contexts
            .with_record(ctx, |r| (r.payload.version_mode, r.payload.default_policy))?;
        let (mut key, flags) = key_template(init_flags, version_mode)?;
        key.usage_policy = usage_policy;
        let handle = self.keys.add(ctx, flags, key)?;
        debug!(%handle, init_flags, "key created");
        Ok(handle)
    }

    /// Create a structurally final key from a complete blob
    pub fn create_key_from_blob(&self, ctx: Handle, blob: &[u8], uuid: Option<Uuid>) -> Result<Handle> {
        let usage_policy = self
            .contexts
            .with_record(ctx, |r| r.payload.default_policy)?;
        let key = TpmKey::from_bytes(blob)?;
        let flags = flags_for_blob(&key);
        let uuid = uuid.unwrap_or_else(Uuid::nil);
        self.keys.add(
            ctx,
            flags,
            RsaKey {
                key,
                uuid,
                tcs_handle: None,
                usage_policy,
                migration_policy: Handle::NULL,
                is_srk: uuid == SRK_UUID,
            },
        )
    }

    pub fn is_key(&self, handle: Handle) -> bool {
        self.keys.contains(handle)
    }

    /// Replace the key structure with a parsed blob and mark it final.
    ///
    /// This is the one path that may change a finished key.
    pub fn materialize_key(&self, key: Handle, blob: &[u8]) -> Result<()> {
        let parsed = TpmKey::from_bytes(blob)?;
        let mut r = self.keys.get(key)?;
        let registered = r.flags.bits() & (ObjectFlags::USER_PS | ObjectFlags::SYSTEM_PS);
        r.flags = ObjectFlags::new(flags_for_blob(&parsed).bits() | registered);
        r.payload.key = parsed;
        info!(%key, "key materialized");
        Ok(())
    }

    /// Apply a structural change, refusing once the key is final
    fn mutate_key(&self, key: Handle, f: impl FnOnce(&mut Record<RsaKey>) -> Result<()>) -> Result<()> {
        let mut r = self.keys.get(key)?;
        r.ensure_mutable()?;
        f(&mut r)
    }

    fn read_key<R>(&self, key: Handle, f: impl FnOnce(&RsaKey) -> Result<R>) -> Result<R> {
        let r = self.keys.get(key)?;
        f(&r.payload)
    }

    pub fn is_key_set(&self, key: Handle) -> Result<bool> {
        self.keys.with_record(key, |r| r.is_key_set())
    }

    pub fn key_usage_policy(&self, key: Handle) -> Result<Handle> {
        self.keys.with_record(key, |r| r.payload.usage_policy)
    }

    pub fn key_migration_policy(&self, key: Handle) -> Result<Handle> {
        let policy = self.keys.with_record(key, |r| r.payload.migration_policy)?;
        if policy.is_null() {
            return Err(TspiError::KeyNoMigrationPolicy);
        }
        Ok(policy)
    }

    // structural setters

    pub fn set_key_usage(&self, key: Handle, usage: KeyUsage) -> Result<()> {
        self.mutate_key(key, |r| {
            let (es, ss) = usage.default_schemes();
            let k = &mut r.payload.key;
            k.key_usage = usage.to_tpm();
            k.algorithm_parms.enc_scheme = es;
            k.algorithm_parms.sig_scheme = ss;
            Ok(())
        })
    }

    pub fn set_key_size(&self, key: Handle, bits: u32) -> Result<()> {
        if !matches!(bits, 512 | 1024 | 2048 | 4096 | 8192 | 16384) {
            return Err(TspiError::BadParameter);
        }
        self.mutate_key(key, |r| {
            let mut rsa = r.payload.key.rsa_parms()?;
            rsa.key_length = bits;
            r.payload.key.set_rsa_parms(&rsa);
            Ok(())
        })
    }

    pub fn set_key_flags(&self, key: Handle, key_flags: u32) -> Result<()> {
        self.mutate_key(key, |r| {
            r.payload.key.key_flags = key_flags;
            r.flags.set(
                ObjectFlags::MIGRATION_AUTH,
                key_flags & tpm_key_flags::MIGRATABLE != 0,
            );
            Ok(())
        })
    }

    pub fn set_key_migratable(&self, key: Handle, on: bool) -> Result<()> {
        self.mutate_key(key, |r| {
            set_bit(&mut r.payload.key.key_flags, tpm_key_flags::MIGRATABLE, on);
            r.flags.set(ObjectFlags::MIGRATION_AUTH, on);
            Ok(())
        })
    }

    pub fn set_key_volatile(&self, key: Handle, on: bool) -> Result<()> {
        self.mutate_key(key, |r| {
            set_bit(&mut r.payload.key.key_flags, tpm_key_flags::IS_VOLATILE, on);
            Ok(())
        })
    }

    /// Set TPM_AUTH_DATA_USAGE
    pub fn set_key_auth_data_usage(&self, key: Handle, usage: u8) -> Result<()> {
        if !matches!(usage, tpm_auth::NEVER | tpm_auth::ALWAYS | tpm_auth::PRIV_USE_ONLY) {
            return Err(TspiError::BadParameter);
        }
        self.mutate_key(key, |r| {
            r.payload.key.auth_data_usage = usage;
            r.flags.set(ObjectFlags::USAGE_AUTH, usage != tpm_auth::NEVER);
            Ok(())
        })
    }

    /// Only RSA is supported
    pub fn set_key_algorithm(&self, key: Handle, tss_alg: u32) -> Result<()> {
        if tss_alg != tss::ALG_RSA {
            return Err(TspiError::BadParameter);
        }
        self.mutate_key(key, |r| {
            r.payload.key.algorithm_parms.algorithm_id = TPM_ALG_RSA;
            Ok(())
        })
    }

    /// Set the encryption scheme from a TSS_ES_* value
    pub fn set_key_enc_scheme(&self, key: Handle, tss_es: u32) -> Result<()> {
        let es = enc_scheme_from_tss(tss_es).ok_or(TspiError::InvalidEncScheme)?;
        self.mutate_key(key, |r| {
            if !r.payload.usage()?.accepts_enc_scheme(es) {
                return Err(TspiError::InvalidEncScheme);
            }
            r.payload.key.algorithm_parms.enc_scheme = es;
            Ok(())
        })
    }

    /// Set the signature scheme from a TSS_SS_* value
    pub fn set_key_sig_scheme(&self, key: Handle, tss_ss: u32) -> Result<()> {
        let ss = sig_scheme_from_tss(tss_ss).ok_or(TspiError::InvalidSigScheme)?;
        self.mutate_key(key, |r| {
            if !r.payload.usage()?.accepts_sig_scheme(ss) {
                return Err(TspiError::InvalidSigScheme);
            }
            r.payload.key.algorithm_parms.sig_scheme = ss;
            Ok(())
        })
    }

    pub fn set_key_exponent(&self, key: Handle, exponent: &[u8]) -> Result<()> {
        self.mutate_key(key, |r| {
            let mut rsa = r.payload.key.rsa_parms()?;
            rsa.exponent = exponent.to_vec();
            r.payload.key.set_rsa_parms(&rsa);
            Ok(())
        })
    }

    pub fn set_key_modulus(&self, key: Handle, modulus: &[u8]) -> Result<()> {
        self.mutate_key(key, |r| {
            r.payload.key.pub_key = modulus.to_vec();
            Ok(())
        })
    }

    /// Set algorithm parameters and modulus from TPM_PUBKEY bytes
    pub fn set_key_public_blob(&self, key: Handle, public: &[u8]) -> Result<()> {
        let public = TpmPubKey::from_bytes(public)?;
        self.mutate_key(key, |r| {
            r.payload.key.algorithm_parms = public.algorithm_parms;
            r.payload.key.pub_key = public.pub_key;
            Ok(())
        })
    }

    pub fn set_key_private_blob(&self, key: Handle, enc_data: &[u8]) -> Result<()> {
        self.mutate_key(key, |r| {
            r.payload.key.enc_data = enc_data.to_vec();
            Ok(())
        })
    }

    pub fn set_key_parms(&self, key: Handle, parms: KeyParms) -> Result<()> {
        if parms.algorithm_id == TPM_ALG_RSA {
            parms.rsa_parms()?;
        }
        self.mutate_key(key, |r| {
            r.payload.key.algorithm_parms = parms;
            Ok(())
        })
    }

    /// Switch between TPM_KEY and TPM_KEY12 layouts
    pub fn set_key_struct(&self, key: Handle, key12: bool) -> Result<()> {
        self.mutate_key(key, |r| {
            r.payload.key.structure = if key12 {
                KeyStructure::Key12
            } else {
                KeyStructure::Key(TpmVersion::V1_1)
            };
            Ok(())
        })
    }

    pub fn set_key_uuid(&self, key: Handle, uuid: Uuid) -> Result<()> {
        self.mutate_key(key, |r| {
            r.payload.uuid = uuid;
            Ok(())
        })
    }

    /// Bind the key to the PCR state described by a PCR composite object
    pub fn set_key_pcrs(&self, key: Handle, pcrs: Handle) -> Result<()> {
        let info = self.pcr_info(pcrs)?;
        // structure check and store under one checkout
        self.mutate_key(key, |r| {
            let bytes = match (&info, r.payload.key.is_key12()) {
                (PcrInfo::Info { .. }, false) | (PcrInfo::Long { .. }, true) => info.to_bytes(),
                _ => return Err(TspiError::BadParameter),
            };
            r.payload.key.pcr_info = bytes;
            r.flags.insert(ObjectFlags::PCRS);
            Ok(())
        })
    }

    // readers

    pub fn key_usage(&self, key: Handle) -> Result<KeyUsage> {
        self.read_key(key, |k| k.usage())
    }

    /// Modulus size in bits
    pub fn key_size(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| Ok(k.key.rsa_parms()?.key_length))
    }

    pub fn key_flags(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| Ok(k.key.key_flags))
    }

    pub fn key_auth_data_usage(&self, key: Handle) -> Result<u8> {
        self.read_key(key, |k| Ok(k.key.auth_data_usage))
    }

    pub fn key_enc_scheme(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| Ok(enc_scheme_to_tss(k.key.algorithm_parms.enc_scheme)))
    }

    pub fn key_sig_scheme(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| Ok(sig_scheme_to_tss(k.key.algorithm_parms.sig_scheme)))
    }

    pub fn key_algorithm(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| match k.key.algorithm_parms.algorithm_id {
            TPM_ALG_RSA => Ok(tss::ALG_RSA),
            _ => Err(TspiError::InvalidAttribData),
        })
    }

    pub fn key_is_key12(&self, key: Handle) -> Result<bool> {
        self.read_key(key, |k| Ok(k.key.is_key12()))
    }

    pub fn key_exponent(&self, key: Handle) -> Result<Vec<u8>> {
        self.read_key(key, |k| {
            let exp = k.key.rsa_parms()?.exponent;
            Ok(if exp.is_empty() {
                crate::crypto::DEFAULT_EXPONENT.to_vec()
            } else {
                exp
            })
        })
    }

    pub fn key_num_primes(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| Ok(k.key.rsa_parms()?.num_primes))
    }

    pub fn key_modulus(&self, key: Handle) -> Result<Vec<u8>> {
        self.read_key(key, |k| k.public_modulus())
    }

    /// TPM_PUBKEY bytes
    pub fn key_public_blob(&self, key: Handle) -> Result<Vec<u8>> {
        self.read_key(key, |k| {
            k.public_modulus()?;
            Ok(k.key.public().to_bytes())
        })
    }

    /// Full TPM_KEY / TPM_KEY12 bytes
    pub fn key_blob(&self, key: Handle) -> Result<Vec<u8>> {
        self.read_key(key, |k| Ok(k.key.to_bytes()))
    }

    /// Wrapped private part
    pub fn key_private_blob(&self, key: Handle) -> Result<Vec<u8>> {
        self.read_key(key, |k| Ok(k.key.enc_data.clone()))
    }

    pub fn key_uuid(&self, key: Handle) -> Result<Uuid> {
        self.read_key(key, |k| Ok(k.uuid))
    }

    pub fn key_pcr_info(&self, key: Handle) -> Result<Option<PcrInfo>> {
        self.read_key(key, |k| {
            if k.key.pcr_info.is_empty() {
                Ok(None)
            } else {
                PcrInfo::parse_key_pcr_info(&k.key.pcr_info).map(Some)
            }
        })
    }

    /// Handle the transport loaded this key under
    pub fn key_tcs_handle(&self, key: Handle) -> Result<u32> {
        self.read_key(key, |k| k.tcs_handle.ok_or(TspiError::KeyNotLoaded))
    }

    pub(crate) fn set_key_tcs_handle(&self, key: Handle, tcs_handle: u32) -> Result<()> {
        self.keys
            .with_record_mut(key, |r| r.payload.tcs_handle = Some(tcs_handle))
    }

    /// Mark the key as registered in a persistent store
    pub fn set_key_registration(&self, key: Handle, user: bool, system: bool) -> Result<()> {
        self.keys.with_record_mut(key, |r| {
            r.flags.set(ObjectFlags::USER_PS, user);
            r.flags.set(ObjectFlags::SYSTEM_PS, system);
        })
    }

    pub fn key_registration(&self, key: Handle) -> Result<(bool, bool)> {
        self.keys.with_record(key, |r| {
            (
                r.flags.contains(ObjectFlags::USER_PS),
                r.flags.contains(ObjectFlags::SYSTEM_PS),
            )
        })
    }

    /// Key object visible to `ctx` carrying `uuid`
    pub fn find_key_by_uuid(&self, ctx: Handle, uuid: Uuid) -> Option<Handle> {
        self.keys
            .find_by(|r| r.is_visible_to(ctx) && r.payload.uuid == uuid)
    }

    /// Key object visible to `ctx` whose modulus matches `modulus`
    pub fn find_key_by_public(&self, ctx: Handle, modulus: &[u8]) -> Option<Handle> {
        self.keys.find_by(|r| {
            r.is_visible_to(ctx) && !modulus.is_empty() && r.payload.key.pub_key == modulus
        })
    }

    pub fn key_info(&self, key: Handle) -> Result<KeyInfo> {
        let r = self.keys.get(key)?;
        let k = &r.payload;
        Ok(KeyInfo {
            uuid: k.uuid,
            usage: k.usage().map(KeyUsage::to_tss).unwrap_or(u32::MAX),
            size: k.key.rsa_parms().map(|p| p.key_length).unwrap_or(0),
            key12: k.key.is_key12(),
            finalized: r.is_key_set(),
            modulus: k.key.pub_key.clone(),
        })
    }
}

fn set_bit(word: &mut u32, bit: u32, on: bool) {
    if on {
        *word |= bit;
    } else {
        *word &= !bit;
    }
}
