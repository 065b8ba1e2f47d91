// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! TPM 1.2 structure marshalling
//!
//! Big-endian writers and readers for the key, PCR info and public key blobs
//! that cross the registry boundary. Command encoding belongs to the
//! transport; these buffers only cover structures stored in objects.

use crate::error::{Result, TspiError};

/// Buffer for building TPM structures
#[derive(Debug, Default)]
pub struct BlobWriter {
    data: Vec<u8>,
}

impl BlobWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// 4-byte size prefix followed by the data (TPM 1.2 sized buffers)
    pub fn put_sized(&mut self, data: &[u8]) {
        self.put_u32(data.len() as u32);
        self.put_bytes(data);
    }

    /// 2-byte size prefix followed by the data
    pub fn put_sized_u16(&mut self, data: &[u8]) {
        self.put_u16(data.len() as u16);
        self.put_bytes(data);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }
}

/// Cursor over a TPM structure
#[derive(Debug)]
pub struct BlobReader<'a> {
    data: &'a [u8],
    pos: usize,
}

fn underflow(what: &str, want: usize, have: usize) -> TspiError {
    TspiError::BadBlob(format!(
        "buffer underflow reading {what} ({want} wanted, {have} remaining)"
    ))
}

impl<'a> BlobReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(underflow(what, len, self.remaining()));
        }
        let data: &'a [u8] = self.data;
        let v = &data[self.pos..self.pos + len];
        self.pos += len;
        Ok(v)
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "u8")?[0])
    }

    pub fn get_u16(&mut self) -> Result<u16> {
        let b = self.take(2, "u16")?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let b = self.take(4, "u32")?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        Ok(self.take(len, "bytes")?.to_vec())
    }

    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, "array")?);
        Ok(out)
    }

    /// 4-byte size prefix followed by the data
    pub fn get_sized(&mut self) -> Result<Vec<u8>> {
        let size = self.get_u32()? as usize;
        self.get_bytes(size)
    }

    /// 2-byte size prefix followed by the data
    pub fn get_sized_u16(&mut self) -> Result<Vec<u8>> {
        let size = self.get_u16()? as usize;
        self.get_bytes(size)
    }

    /// Peek at bytes without advancing position
    pub fn peek_bytes(&self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(underflow("peek", len, self.remaining()));
        }
        let data: &'a [u8] = self.data;
        Ok(&data[self.pos..self.pos + len])
    }

    /// Error unless every byte was consumed
    pub fn finish(&self) -> Result<()> {
        if self.remaining() != 0 {
            return Err(TspiError::BadBlob(format!(
                "{} trailing bytes",
                self.remaining()
            )));
        }
        Ok(())
    }
}

/// Types that serialize to a TPM 1.2 structure
pub trait Marshal {
    fn marshal(&self, buf: &mut BlobWriter);

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BlobWriter::new();
        self.marshal(&mut buf);
        buf.into_vec()
    }
}

/// Types that parse from a TPM 1.2 structure
pub trait Unmarshal: Sized {
    fn unmarshal(buf: &mut BlobReader) -> Result<Self>;

    /// Parse a complete blob, rejecting trailing bytes
    fn from_bytes(data: &[u8]) -> Result<Self> {
        let mut buf = BlobReader::new(data);
        let v = Self::unmarshal(&mut buf)?;
        buf.finish()?;
        Ok(v)
    }
}
