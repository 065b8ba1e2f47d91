// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! TPM 1.2 data types

use serde::{Deserialize, Serialize};
use serde_human_bytes as hex_bytes;

use crate::constants::*;
use crate::error::{Result, TspiError};
use crate::marshal::*;

/// 20-byte digest, nonce or authorization secret
pub type Digest = [u8; TPM_SHA1_160_HASH_LEN];

/// TPM_NONCE
pub type Nonce = Digest;

/// TPM_STRUCT_VER / TPM_VERSION
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TpmVersion {
    pub major: u8,
    pub minor: u8,
    pub rev_major: u8,
    pub rev_minor: u8,
}

impl TpmVersion {
    /// Version stamped into TPM_KEY structures
    pub const V1_1: TpmVersion = TpmVersion {
        major: 1,
        minor: 1,
        rev_major: 0,
        rev_minor: 0,
    };
}

impl Marshal for TpmVersion {
    fn marshal(&self, buf: &mut BlobWriter) {
        buf.put_u8(self.major);
        buf.put_u8(self.minor);
        buf.put_u8(self.rev_major);
        buf.put_u8(self.rev_minor);
    }
}

impl Unmarshal for TpmVersion {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        Ok(Self {
            major: buf.get_u8()?,
            minor: buf.get_u8()?,
            rev_major: buf.get_u8()?,
            rev_minor: buf.get_u8()?,
        })
    }
}

/// TPM_RSA_KEY_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyParms {
    pub key_length: u32,
    pub num_primes: u32,
    /// Empty means the default exponent 65537
    pub exponent: Vec<u8>,
}

impl RsaKeyParms {
    pub fn new(key_length: u32) -> Self {
        Self {
            key_length,
            num_primes: 2,
            exponent: Vec::new(),
        }
    }
}

impl Marshal for RsaKeyParms {
    fn marshal(&self, buf: &mut BlobWriter) {
        buf.put_u32(self.key_length);
        buf.put_u32(self.num_primes);
        buf.put_sized(&self.exponent);
    }
}

impl Unmarshal for RsaKeyParms {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        Ok(Self {
            key_length: buf.get_u32()?,
            num_primes: buf.get_u32()?,
            exponent: buf.get_sized()?,
        })
    }
}

/// TPM_KEY_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyParms {
    pub algorithm_id: u32,
    pub enc_scheme: u16,
    pub sig_scheme: u16,
    /// Algorithm specific parameters; `TPM_RSA_KEY_PARMS` for RSA keys
    pub parms: Vec<u8>,
}

impl KeyParms {
    pub fn rsa(enc_scheme: u16, sig_scheme: u16, rsa: &RsaKeyParms) -> Self {
        Self {
            algorithm_id: TPM_ALG_RSA,
            enc_scheme,
            sig_scheme,
            parms: rsa.to_bytes(),
        }
    }

    pub fn rsa_parms(&self) -> Result<RsaKeyParms> {
        if self.algorithm_id != TPM_ALG_RSA {
            return Err(TspiError::BadParameter);
        }
        RsaKeyParms::from_bytes(&self.parms)
    }
}

impl Marshal for KeyParms {
    fn marshal(&self, buf: &mut BlobWriter) {
        buf.put_u32(self.algorithm_id);
        buf.put_u16(self.enc_scheme);
        buf.put_u16(self.sig_scheme);
        buf.put_sized(&self.parms);
    }
}

impl Unmarshal for KeyParms {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        Ok(Self {
            algorithm_id: buf.get_u32()?,
            enc_scheme: buf.get_u16()?,
            sig_scheme: buf.get_u16()?,
            parms: buf.get_sized()?,
        })
    }
}

/// Leading structure of a key blob
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStructure {
    /// TPM_KEY with its version field
    Key(TpmVersion),
    /// TPM_KEY12
    Key12,
}

/// TPM_KEY / TPM_KEY12
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmKey {
    pub structure: KeyStructure,
    pub key_usage: u16,
    pub key_flags: u32,
    pub auth_data_usage: u8,
    pub algorithm_parms: KeyParms,
    pub pcr_info: Vec<u8>,
    /// Modulus (TPM_STORE_PUBKEY contents)
    pub pub_key: Vec<u8>,
    /// Wrapped private part
    pub enc_data: Vec<u8>,
}

impl TpmKey {
    pub fn is_key12(&self) -> bool {
        self.structure == KeyStructure::Key12
    }

    pub fn rsa_parms(&self) -> Result<RsaKeyParms> {
        self.algorithm_parms.rsa_parms()
    }

    pub fn set_rsa_parms(&mut self, rsa: &RsaKeyParms) {
        self.algorithm_parms.parms = rsa.to_bytes();
    }

    /// The TPM_PUBKEY for this key
    pub fn public(&self) -> TpmPubKey {
        TpmPubKey {
            algorithm_parms: self.algorithm_parms.clone(),
            pub_key: self.pub_key.clone(),
        }
    }
}

impl Marshal for TpmKey {
    fn marshal(&self, buf: &mut BlobWriter) {
        match self.structure {
            KeyStructure::Key(ver) => ver.marshal(buf),
            KeyStructure::Key12 => {
                buf.put_u16(tpm_tag::KEY12);
                buf.put_u16(0);
            }
        }
        buf.put_u16(self.key_usage);
        buf.put_u32(self.key_flags);
        buf.put_u8(self.auth_data_usage);
        self.algorithm_parms.marshal(buf);
        buf.put_sized(&self.pcr_info);
        buf.put_sized(&self.pub_key);
        buf.put_sized(&self.enc_data);
    }
}

impl Unmarshal for TpmKey {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        let lead = buf.peek_bytes(2)?;
        let structure = if u16::from_be_bytes([lead[0], lead[1]]) == tpm_tag::KEY12 {
            buf.get_u16()?;
            let fill = buf.get_u16()?;
            if fill != 0 {
                return Err(TspiError::BadBlob(format!("TPM_KEY12 fill 0x{fill:04x}")));
            }
            KeyStructure::Key12
        } else {
            KeyStructure::Key(TpmVersion::unmarshal(buf)?)
        };
        Ok(Self {
            structure,
            key_usage: buf.get_u16()?,
            key_flags: buf.get_u32()?,
            auth_data_usage: buf.get_u8()?,
            algorithm_parms: KeyParms::unmarshal(buf)?,
            pcr_info: buf.get_sized()?,
            pub_key: buf.get_sized()?,
            enc_data: buf.get_sized()?,
        })
    }
}

/// TPM_PUBKEY
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmPubKey {
    pub algorithm_parms: KeyParms,
    pub pub_key: Vec<u8>,
}

impl Marshal for TpmPubKey {
    fn marshal(&self, buf: &mut BlobWriter) {
        self.algorithm_parms.marshal(buf);
        buf.put_sized(&self.pub_key);
    }
}

impl Unmarshal for TpmPubKey {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        Ok(Self {
            algorithm_parms: KeyParms::unmarshal(buf)?,
            pub_key: buf.get_sized()?,
        })
    }
}

/// TPM_PCR_SELECTION
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PcrSelection {
    pub bitmap: Vec<u8>,
}

impl PcrSelection {
    /// Selection wide enough to address `pcrs` registers
    pub fn with_capacity(pcrs: u32) -> Self {
        Self {
            bitmap: vec![0u8; pcrs.div_ceil(8).max(3) as usize],
        }
    }

    pub fn select(&mut self, index: u32) {
        let byte = (index / 8) as usize;
        if self.bitmap.len() <= byte {
            self.bitmap.resize(byte + 1, 0);
        }
        self.bitmap[byte] |= 1 << (index % 8);
    }

    pub fn is_selected(&self, index: u32) -> bool {
        let byte = (index / 8) as usize;
        self.bitmap
            .get(byte)
            .is_some_and(|b| b & (1 << (index % 8)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|b| *b == 0)
    }

    /// Selected indices in ascending order
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.bitmap.len() as u32 * 8).filter(|i| self.is_selected(*i))
    }
}

impl Marshal for PcrSelection {
    fn marshal(&self, buf: &mut BlobWriter) {
        buf.put_sized_u16(&self.bitmap);
    }
}

impl Unmarshal for PcrSelection {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self> {
        Ok(Self {
            bitmap: buf.get_sized_u16()?,
        })
    }
}

/// TPM_PCR_INFO, TPM_PCR_INFO_LONG and TPM_PCR_INFO_SHORT
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PcrInfo {
    Info {
        selection: PcrSelection,
        digest_at_release: Digest,
        digest_at_creation: Digest,
    },
    Long {
        locality_at_creation: u8,
        locality_at_release: u8,
        creation_selection: PcrSelection,
        release_selection: PcrSelection,
        digest_at_creation: Digest,
        digest_at_release: Digest,
    },
    Short {
        selection: PcrSelection,
        locality_at_release: u8,
        digest_at_release: Digest,
    },
}

impl PcrInfo {
    /// Parse either a TPM_PCR_INFO or a tagged TPM_PCR_INFO_LONG
    pub fn parse_key_pcr_info(data: &[u8]) -> Result<Self> {
        let mut buf = BlobReader::new(data);
        let info = if buf.peek_bytes(2)? == tpm_tag::PCR_INFO_LONG.to_be_bytes() {
            buf.get_u16()?;
            PcrInfo::Long {
                locality_at_creation: buf.get_u8()?,
                locality_at_release: buf.get_u8()?,
                creation_selection: PcrSelection::unmarshal(&mut buf)?,
                release_selection: PcrSelection::unmarshal(&mut buf)?,
                digest_at_creation: buf.get_array()?,
                digest_at_release: buf.get_array()?,
            }
        } else {
            PcrInfo::Info {
                selection: PcrSelection::unmarshal(&mut buf)?,
                digest_at_release: buf.get_array()?,
                digest_at_creation: buf.get_array()?,
            }
        };
        buf.finish()?;
        Ok(info)
    }

    pub fn release_selection(&self) -> &PcrSelection {
        match self {
            PcrInfo::Info { selection, .. } | PcrInfo::Short { selection, .. } => selection,
            PcrInfo::Long {
                release_selection, ..
            } => release_selection,
        }
    }

    pub fn digest_at_release(&self) -> &Digest {
        match self {
            PcrInfo::Info {
                digest_at_release, ..
            }
            | PcrInfo::Long {
                digest_at_release, ..
            }
            | PcrInfo::Short {
                digest_at_release, ..
            } => digest_at_release,
        }
    }

    pub fn digest_at_creation(&self) -> Option<&Digest> {
        match self {
            PcrInfo::Info {
                digest_at_creation, ..
            }
            | PcrInfo::Long {
                digest_at_creation, ..
            } => Some(digest_at_creation),
            PcrInfo::Short { .. } => None,
        }
    }
}

impl Marshal for PcrInfo {
    fn marshal(&self, buf: &mut BlobWriter) {
        match self {
            PcrInfo::Info {
                selection,
                digest_at_release,
                digest_at_creation,
            } => {
                selection.marshal(buf);
                buf.put_bytes(digest_at_release);
                buf.put_bytes(digest_at_creation);
            }
            PcrInfo::Long {
                locality_at_creation,
                locality_at_release,
                creation_selection,
                release_selection,
                digest_at_creation,
                digest_at_release,
            } => {
                buf.put_u16(tpm_tag::PCR_INFO_LONG);
                buf.put_u8(*locality_at_creation);
                buf.put_u8(*locality_at_release);
                creation_selection.marshal(buf);
                release_selection.marshal(buf);
                buf.put_bytes(digest_at_creation);
                buf.put_bytes(digest_at_release);
            }
            PcrInfo::Short {
                selection,
                locality_at_release,
                digest_at_release,
            } => {
                selection.marshal(buf);
                buf.put_u8(*locality_at_release);
                buf.put_bytes(digest_at_release);
            }
        }
    }
}

/// Summary of a key object, suitable for logging and the self-test report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyInfo {
    pub uuid: uuid::Uuid,
    pub usage: u32,
    pub size: u32,
    pub key12: bool,
    pub finalized: bool,
    #[serde(with = "hex_bytes")]
    pub modulus: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_key(structure: KeyStructure) -> TpmKey {
        TpmKey {
            structure,
            key_usage: tpm_key_usage::SIGNING,
            key_flags: tpm_key_flags::MIGRATABLE,
            auth_data_usage: tpm_auth::ALWAYS,
            algorithm_parms: KeyParms::rsa(
                tpm_es::NONE,
                tpm_ss::RSASSAPKCS1V15_SHA1,
                &RsaKeyParms::new(2048),
            ),
            pcr_info: Vec::new(),
            pub_key: vec![0xAB; 256],
            enc_data: vec![0xCD; 16],
        }
    }

    #[test]
    fn test_key12_is_detected_by_tag() {
        let key = sample_key(KeyStructure::Key12);
        let bytes = key.to_bytes();
        assert_eq!(&bytes[..4], &[0x00, 0x28, 0x00, 0x00]);
        let parsed = TpmKey::from_bytes(&bytes).unwrap();
        assert!(parsed.is_key12());
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_key11_keeps_version() {
        let key = sample_key(KeyStructure::Key(TpmVersion::V1_1));
        let parsed = TpmKey::from_bytes(&key.to_bytes()).unwrap();
        assert_eq!(parsed.structure, KeyStructure::Key(TpmVersion::V1_1));
        assert_eq!(parsed.rsa_parms().unwrap().key_length, 2048);
    }

    #[test]
    fn test_truncated_key_is_rejected() {
        let bytes = sample_key(KeyStructure::Key12).to_bytes();
        assert!(TpmKey::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn test_pcr_selection_bits() {
        let mut sel = PcrSelection::with_capacity(TPM_MAX_PCRS);
        assert_eq!(sel.bitmap.len(), 3);
        assert!(sel.is_empty());
        sel.select(0);
        sel.select(17);
        assert!(sel.is_selected(17));
        assert!(!sel.is_selected(16));
        assert_eq!(sel.indices().collect::<Vec<_>>(), vec![0, 17]);
    }

    #[test]
    fn test_pcr_info_long_parse() {
        let mut sel = PcrSelection::with_capacity(24);
        sel.select(7);
        let info = PcrInfo::Long {
            locality_at_creation: 1,
            locality_at_release: 0x1f,
            creation_selection: sel.clone(),
            release_selection: sel,
            digest_at_creation: [1; 20],
            digest_at_release: [2; 20],
        };
        let parsed = PcrInfo::parse_key_pcr_info(&info.to_bytes()).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.digest_at_release(), &[2; 20]);
    }
}
