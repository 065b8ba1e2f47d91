// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! PCR composite objects
//!
//! A composite collects a selection of PCR indices and their expected values.
//! Keys and sealed data bind to it through the PCR info structure it renders.

use std::collections::BTreeMap;

use crate::constants::{pcrs_init, TPM_MAX_PCRS, TPM_SHA1_160_HASH_LEN};
use crate::crypto::sha1;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::marshal::{BlobWriter, Marshal};
use crate::registry::Registry;
use crate::types::{Digest, PcrInfo, PcrSelection};

/// Localities 0 through 4
const ALL_LOCALITIES: u8 = 0x1F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcrStructType {
    /// TPM_PCR_INFO
    Info,
    /// TPM_PCR_INFO_LONG
    InfoLong,
    /// TPM_PCR_INFO_SHORT
    InfoShort,
}

impl PcrStructType {
    pub fn to_u32(self) -> u32 {
        match self {
            PcrStructType::Info => pcrs_init::INFO,
            PcrStructType::InfoLong => pcrs_init::INFO_LONG,
            PcrStructType::InfoShort => pcrs_init::INFO_SHORT,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            pcrs_init::DEFAULT | pcrs_init::INFO => Some(PcrStructType::Info),
            pcrs_init::INFO_LONG => Some(PcrStructType::InfoLong),
            pcrs_init::INFO_SHORT => Some(PcrStructType::InfoShort),
            _ => None,
        }
    }
}

/// Payload of a PCR composite object
#[derive(Debug, Clone)]
pub struct PcrComposite {
    pub structure: PcrStructType,
    /// Release selection
    pub selection: PcrSelection,
    pub creation_selection: PcrSelection,
    pub values: BTreeMap<u32, Digest>,
    pub locality_at_release: u8,
    pub locality_at_creation: u8,
}

impl PcrComposite {
    fn new(structure: PcrStructType) -> Self {
        Self {
            structure,
            selection: PcrSelection::with_capacity(TPM_MAX_PCRS),
            creation_selection: PcrSelection::with_capacity(TPM_MAX_PCRS),
            values: BTreeMap::new(),
            locality_at_release: ALL_LOCALITIES,
            locality_at_creation: 0,
        }
    }

    /// SHA-1 over the TPM_PCR_COMPOSITE for `selection`
    fn composite_hash(&self, selection: &PcrSelection) -> Result<Digest> {
        if selection.is_empty() {
            return Err(TspiError::NoPcrsSet);
        }
        let mut values = Vec::new();
        for index in selection.indices() {
            let value = self.values.get(&index).ok_or(TspiError::NoPcrsSet)?;
            values.extend_from_slice(value);
        }
        let mut buf = BlobWriter::new();
        selection.marshal(&mut buf);
        buf.put_sized(&values);
        Ok(sha1(&[buf.as_bytes()]))
    }

    fn to_pcr_info(&self) -> Result<PcrInfo> {
        let digest_at_release = self.composite_hash(&self.selection)?;
        Ok(match self.structure {
            PcrStructType::Info => PcrInfo::Info {
                selection: self.selection.clone(),
                digest_at_release,
                digest_at_creation: digest_at_release,
            },
            PcrStructType::InfoLong => {
                let digest_at_creation = if self.creation_selection.is_empty() {
                    [0u8; TPM_SHA1_160_HASH_LEN]
                } else {
                    self.composite_hash(&self.creation_selection)?
                };
                PcrInfo::Long {
                    locality_at_creation: self.locality_at_creation,
                    locality_at_release: self.locality_at_release,
                    creation_selection: self.creation_selection.clone(),
                    release_selection: self.selection.clone(),
                    digest_at_creation,
                    digest_at_release,
                }
            }
            PcrStructType::InfoShort => PcrInfo::Short {
                selection: self.selection.clone(),
                locality_at_release: self.locality_at_release,
                digest_at_release,
            },
        })
    }
}

fn check_index(index: u32) -> Result<()> {
    if index >= TPM_MAX_PCRS {
        return Err(TspiError::BadParameter);
    }
    Ok(())
}

impl Registry {
    pub fn create_pcrs(&self, ctx: Handle, init_flags: u32) -> Result<Handle> {
        let structure =
            PcrStructType::from_u32(init_flags).ok_or(TspiError::InvalidInitFlags(init_flags))?;
        self.pcrs
            .add(ctx, ObjectFlags::empty(), PcrComposite::new(structure))
    }

    pub fn is_pcrs(&self, handle: Handle) -> bool {
        self.pcrs.contains(handle)
    }

    pub fn pcrs_struct_type(&self, pcrs: Handle) -> Result<PcrStructType> {
        self.pcrs.with_record(pcrs, |r| r.payload.structure)
    }

    /// Record the expected value of a register and select it for release
    pub fn set_pcr_value(&self, pcrs: Handle, index: u32, value: &[u8]) -> Result<()> {
        check_index(index)?;
        let value: Digest = value
            .try_into()
            .map_err(|_| TspiError::BadParameter)?;
        self.pcrs.with_record_mut(pcrs, |r| {
            r.payload.values.insert(index, value);
            r.payload.selection.select(index);
        })
    }

    pub fn pcr_value(&self, pcrs: Handle, index: u32) -> Result<Digest> {
        check_index(index)?;
        self.pcrs
            .with_record(pcrs, |r| r.payload.values.get(&index).copied())?
            .ok_or(TspiError::BadParameter)
    }

    /// Select a register for release without giving it a value
    pub fn select_pcr_index(&self, pcrs: Handle, index: u32) -> Result<()> {
        check_index(index)?;
        self.pcrs
            .with_record_mut(pcrs, |r| r.payload.selection.select(index))
    }

    /// Select a register for the creation digest of a TPM_PCR_INFO_LONG
    pub fn select_pcr_index_at_creation(&self, pcrs: Handle, index: u32) -> Result<()> {
        check_index(index)?;
        self.pcrs.with_record_mut(pcrs, |r| {
            if r.payload.structure != PcrStructType::InfoLong {
                return Err(TspiError::InvalidObjectType);
            }
            r.payload.creation_selection.select(index);
            Ok(())
        })?
    }

    pub fn pcr_selection(&self, pcrs: Handle) -> Result<PcrSelection> {
        self.pcrs
            .with_record(pcrs, |r| r.payload.selection.clone())
    }

    pub fn set_pcr_locality(&self, pcrs: Handle, at_release: Option<u8>, at_creation: Option<u8>) -> Result<()> {
        for locality in at_release.iter().chain(at_creation.iter()) {
            if *locality > ALL_LOCALITIES {
                return Err(TspiError::BadParameter);
            }
        }
        self.pcrs.with_record_mut(pcrs, |r| {
            if r.payload.structure == PcrStructType::Info {
                return Err(TspiError::InvalidObjectType);
            }
            if let Some(l) = at_release {
                r.payload.locality_at_release = l;
            }
            if let Some(l) = at_creation {
                r.payload.locality_at_creation = l;
            }
            Ok(())
        })?
    }

    pub fn pcr_locality(&self, pcrs: Handle) -> Result<(u8, u8)> {
        self.pcrs.with_record(pcrs, |r| {
            (r.payload.locality_at_release, r.payload.locality_at_creation)
        })
    }

    /// Digest of the selected registers' expected values
    pub fn pcr_composite_hash(&self, pcrs: Handle) -> Result<Digest> {
        let r = self.pcrs.get(pcrs)?;
        r.payload.composite_hash(&r.payload.selection)
    }

    /// PCR info structure matching the composite's struct type
    pub fn pcr_info(&self, pcrs: Handle) -> Result<PcrInfo> {
        let r = self.pcrs.get(pcrs)?;
        r.payload.to_pcr_info()
    }
}
