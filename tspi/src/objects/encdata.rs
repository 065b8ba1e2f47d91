// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use crate::constants::encdata_init;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::marshal::{BlobReader, Marshal, Unmarshal};
use crate::registry::Registry;
use crate::types::{PcrInfo, TpmVersion};

/// TPM_TAG_STORED_DATA12
const TAG_STORED_DATA12: u16 = 0x0016;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncDataType {
    Seal,
    Bind,
    Legacy,
}

impl EncDataType {
    pub fn to_u32(self) -> u32 {
        match self {
            EncDataType::Seal => encdata_init::SEAL,
            EncDataType::Bind => encdata_init::BIND,
            EncDataType::Legacy => encdata_init::LEGACY,
        }
    }
}

/// Payload of an encrypted data object
#[derive(Debug, Clone)]
pub struct EncData {
    pub kind: EncDataType,
    pub blob: Vec<u8>,
    /// PCR binding the data was or will be sealed to
    pub pcr_info: Option<PcrInfo>,
    pub usage_policy: Handle,
    /// Seal with the Sealx ordinal and mask the payload
    pub sealx: bool,
}

/// Seal info carried by a TPM_STORED_DATA or TPM_STORED_DATA12
fn stored_data_seal_info(blob: &[u8]) -> Result<Option<PcrInfo>> {
    let mut buf = BlobReader::new(blob);
    let long = buf.peek_bytes(2)? == TAG_STORED_DATA12.to_be_bytes();
    if long {
        buf.get_u16()?;
        // TPM_ENTITY_TYPE
        buf.get_u16()?;
    } else {
        TpmVersion::unmarshal(&mut buf)?;
    }
    let seal_info = buf.get_sized()?;
    buf.get_sized()?;
    buf.finish()?;
    if seal_info.is_empty() {
        return Ok(None);
    }
    PcrInfo::parse_key_pcr_info(&seal_info).map(Some)
}

impl Registry {
    pub fn create_encdata(&self, ctx: Handle, init_flags: u32) -> Result<Handle> {
        let kind = match init_flags {
            encdata_init::SEAL => EncDataType::Seal,
            encdata_init::BIND => EncDataType::Bind,
            encdata_init::LEGACY => EncDataType::Legacy,
            _ => return Err(TspiError::InvalidInitFlags(init_flags)),
        };
        let usage_policy = self
            .contexts
            .with_record(ctx, |r| r.payload.default_policy)?;
        self.encdata.add(
            ctx,
            ObjectFlags::empty(),
            EncData {
                kind,
                blob: Vec::new(),
                pcr_info: None,
                usage_policy,
                sealx: false,
            },
        )
    }

    pub fn is_encdata(&self, handle: Handle) -> bool {
        self.encdata.contains(handle)
    }

    pub fn encdata_type(&self, encdata: Handle) -> Result<EncDataType> {
        self.encdata.with_record(encdata, |r| r.payload.kind)
    }

    pub fn encdata_usage_policy(&self, encdata: Handle) -> Result<Handle> {
        self.encdata
            .with_record(encdata, |r| r.payload.usage_policy)
    }

    /// Store an encrypted blob. Sealed blobs must parse as stored data and
    /// their seal info replaces the current PCR binding.
    pub fn set_encdata_blob(&self, encdata: Handle, blob: &[u8]) -> Result<()> {
        let kind = self.encdata_type(encdata)?;
        let seal_info = match kind {
            EncDataType::Seal => stored_data_seal_info(blob)?,
            _ => None,
        };
        self.encdata.with_record_mut(encdata, |r| {
            r.payload.blob = blob.to_vec();
            if kind == EncDataType::Seal {
                r.flags.set(ObjectFlags::PCRS, seal_info.is_some());
                r.payload.pcr_info = seal_info;
            }
        })
    }

    pub fn encdata_blob(&self, encdata: Handle) -> Result<Vec<u8>> {
        let blob = self
            .encdata
            .with_record(encdata, |r| r.payload.blob.clone())?;
        if blob.is_empty() {
            return Err(TspiError::InvalidAttribData);
        }
        Ok(blob)
    }

    /// Bind the data to a PCR composite ahead of sealing
    pub fn set_encdata_pcrs(&self, encdata: Handle, pcrs: Handle) -> Result<()> {
        let info = self.pcr_info(pcrs)?;
        self.encdata.with_record_mut(encdata, |r| {
            if r.payload.kind != EncDataType::Seal {
                return Err(TspiError::InvalidObjectType);
            }
            r.payload.pcr_info = Some(info);
            r.flags.insert(ObjectFlags::PCRS);
            Ok(())
        })?
    }

    pub fn encdata_pcr_info(&self, encdata: Handle) -> Result<Option<PcrInfo>> {
        self.encdata
            .with_record(encdata, |r| r.payload.pcr_info.clone())
    }

    /// PCR info bytes for a seal command, empty when unbound
    pub fn encdata_pcr_info_bytes(&self, encdata: Handle) -> Result<Vec<u8>> {
        Ok(self
            .encdata_pcr_info(encdata)?
            .map(|info| info.to_bytes())
            .unwrap_or_default())
    }

    pub fn set_encdata_sealx(&self, encdata: Handle, on: bool) -> Result<()> {
        self.encdata.with_record_mut(encdata, |r| {
            if r.payload.kind != EncDataType::Seal {
                return Err(TspiError::InvalidObjectType);
            }
            r.payload.sealx = on;
            Ok(())
        })?
    }

    pub fn encdata_sealx(&self, encdata: Handle) -> Result<bool> {
        self.encdata.with_record(encdata, |r| r.payload.sealx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::pcrs_init;
    use crate::marshal::BlobWriter;

    fn stored_data12(seal_info: &[u8]) -> Vec<u8> {
        let mut buf = BlobWriter::new();
        buf.put_u16(TAG_STORED_DATA12);
        buf.put_u16(0x0003);
        buf.put_sized(seal_info);
        buf.put_sized(&[0x5A; 32]);
        buf.into_vec()
    }

    #[test]
    fn test_seal_blob_carries_pcr_info() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let pcrs = reg.create_pcrs(ctx, pcrs_init::INFO_LONG).unwrap();
        reg.set_pcr_value(pcrs, 4, &[3; 20]).unwrap();
        let info = reg.pcr_info(pcrs).unwrap();

        let data = reg.create_encdata(ctx, encdata_init::SEAL).unwrap();
        assert!(reg.encdata_blob(data).is_err());
        reg.set_encdata_blob(data, &stored_data12(&info.to_bytes()))
            .unwrap();
        assert_eq!(reg.encdata_pcr_info(data).unwrap(), Some(info));

        reg.set_encdata_blob(data, &stored_data12(&[])).unwrap();
        assert_eq!(reg.encdata_pcr_info(data).unwrap(), None);
        assert!(reg.set_encdata_blob(data, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_bind_blob_is_opaque() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let data = reg.create_encdata(ctx, encdata_init::BIND).unwrap();
        reg.set_encdata_blob(data, &[1, 2, 3]).unwrap();
        assert_eq!(reg.encdata_blob(data).unwrap(), vec![1, 2, 3]);
        assert!(matches!(
            reg.set_encdata_sealx(data, true),
            Err(TspiError::InvalidObjectType)
        ));
        assert_eq!(
            reg.encdata_usage_policy(data).unwrap(),
            reg.context_default_policy(ctx).unwrap()
        );
    }
}
