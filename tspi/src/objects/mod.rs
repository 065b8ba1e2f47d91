// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Payloads and typed accessors for each object kind

mod context;
mod delfamily;
mod encdata;
mod hash;
mod migdata;
mod nvstore;
mod pcrs;
mod rsakey;
mod tpm;

pub use context::ContextObject;
pub use delfamily::DelFamily;
pub use encdata::{EncData, EncDataType};
pub use hash::{HashAlg, HashObject};
pub use migdata::MigData;
pub use nvstore::NvStore;
pub use pcrs::{PcrComposite, PcrStructType};
pub use rsakey::{KeyUsage, RsaKey, SRK_UUID};
pub use tpm::TpmObject;
