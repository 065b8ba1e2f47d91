// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: BUSL-1.1

//! TSS 1.2 / TPM 1.2 constants: ordinals, result codes, init flags and the
//! attribute flag table.

/// TPM 1.2 command ordinals (TPM_ORD_*) used by the authorization engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmOrd {
    Oiap = 0x0000000A,
    Osap = 0x0000000B,
    ChangeAuth = 0x0000000C,
    TakeOwnership = 0x0000000D,
    ChangeAuthOwner = 0x00000010,
    Seal = 0x00000017,
    Unseal = 0x00000018,
    UnBind = 0x0000001E,
    CreateWrapKey = 0x0000001F,
    LoadKey = 0x00000020,
    GetPubKey = 0x00000021,
    Sign = 0x0000003C,
    Sealx = 0x0000003D,
    LoadKey2 = 0x00000041,
    ReadPubek = 0x0000007C,
    TerminateHandle = 0x00000096,
    NvWriteValueAuth = 0x000000CD,
    NvReadValueAuth = 0x000000D0,
}

impl TpmOrd {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 1.2 result codes the engine inspects directly
pub mod tpm_rc {
    pub const SUCCESS: u32 = 0x00000000;
    pub const AUTHFAIL: u32 = 0x00000001;
    pub const BAD_PARAMETER: u32 = 0x00000003;
    pub const INVALID_KEYHANDLE: u32 = 0x0000000C;
    pub const AUTH2FAIL: u32 = 0x0000001D;
    pub const INVALID_AUTHHANDLE: u32 = 0x00000022;
    pub const OWNER_SET: u32 = 0x00000014;
}

/// TSS result codes (TSS_E_*) and layer tags
pub mod tss_rc {
    pub const LAYER_TPM: u32 = 0x0000;
    pub const LAYER_TDDL: u32 = 0x1000;
    pub const LAYER_TCS: u32 = 0x2000;
    pub const LAYER_TSP: u32 = 0x3000;

    pub const FAIL: u32 = 0x002;
    pub const BAD_PARAMETER: u32 = 0x003;
    pub const INTERNAL_ERROR: u32 = 0x004;
    pub const OUTOFMEMORY: u32 = 0x005;
    pub const NOTIMPL: u32 = 0x006;
    pub const COMM_FAILURE: u32 = 0x011;
    pub const PS_KEY_NOTFOUND: u32 = 0x020;
    pub const INVALID_OBJECT_TYPE: u32 = 0x101;
    pub const HASH_INVALID_ALG: u32 = 0x105;
    pub const HASH_INVALID_LENGTH: u32 = 0x106;
    pub const HASH_NO_DATA: u32 = 0x107;
    pub const INVALID_ATTRIB_FLAG: u32 = 0x109;
    pub const INVALID_ATTRIB_SUBFLAG: u32 = 0x10A;
    pub const INVALID_ATTRIB_DATA: u32 = 0x10B;
    pub const INVALID_OBJECT_INITFLAG: u32 = 0x10C;
    pub const NO_PCRS_SET: u32 = 0x10D;
    pub const KEY_NOT_LOADED: u32 = 0x10E;
    pub const KEY_NOT_SET: u32 = 0x10F;
    pub const TSP_AUTHFAIL: u32 = 0x113;
    pub const KEY_NO_MIGRATION_POLICY: u32 = 0x115;
    pub const POLICY_NO_SECRET: u32 = 0x116;
    pub const INVALID_OBJ_ACCESS: u32 = 0x117;
    pub const INVALID_ENCSCHEME: u32 = 0x118;
    pub const INVALID_SIGSCHEME: u32 = 0x119;
    pub const INVALID_KEYUSAGE: u32 = 0x123;
    pub const INVALID_HANDLE: u32 = 0x126;
    pub const SILENT_CONTEXT: u32 = 0x127;
    pub const DELEGATION_NOTSET: u32 = 0x129;
    pub const SECRET_EXPIRED: u32 = 0x140;
}

/// TPM 1.2 entity types (TPM_ET_*) for OSAP
pub mod tpm_et {
    pub const KEYHANDLE: u16 = 0x0001;
    pub const OWNER: u16 = 0x0002;
    pub const DATA: u16 = 0x0003;
    pub const SRK: u16 = 0x0004;
    pub const KEY: u16 = 0x0005;
    pub const NV: u16 = 0x000B;
}

/// TPM 1.2 protocol ids (TPM_PID_*)
pub mod tpm_pid {
    pub const OIAP: u16 = 0x0001;
    pub const OSAP: u16 = 0x0002;
    pub const ADIP: u16 = 0x0003;
    pub const ADCP: u16 = 0x0004;
    pub const OWNER: u16 = 0x0005;
}

/// TPM 1.2 reserved key handles
pub mod tpm_kh {
    pub const SRK: u32 = 0x40000000;
    pub const OWNER: u32 = 0x40000001;
    pub const EK: u32 = 0x40000006;
}

/// Structure tags
pub mod tpm_tag {
    pub const RQU_COMMAND: u16 = 0x00C1;
    pub const RQU_AUTH1_COMMAND: u16 = 0x00C2;
    pub const RQU_AUTH2_COMMAND: u16 = 0x00C3;
    pub const RSP_COMMAND: u16 = 0x00C4;
    pub const RSP_AUTH1_COMMAND: u16 = 0x00C5;
    pub const RSP_AUTH2_COMMAND: u16 = 0x00C6;
    pub const PCR_INFO_LONG: u16 = 0x0006;
    pub const KEY12: u16 = 0x0028;
}

pub const TPM_ALG_RSA: u32 = 0x00000001;

/// TPM key usage values (TPM_KEY_*)
pub mod tpm_key_usage {
    pub const SIGNING: u16 = 0x0010;
    pub const STORAGE: u16 = 0x0011;
    pub const IDENTITY: u16 = 0x0012;
    pub const AUTHCHANGE: u16 = 0x0013;
    pub const BIND: u16 = 0x0014;
    pub const LEGACY: u16 = 0x0015;
    pub const MIGRATE: u16 = 0x0016;
}

/// TPM_KEY_FLAGS bits
pub mod tpm_key_flags {
    pub const REDIRECTION: u32 = 0x00000001;
    pub const MIGRATABLE: u32 = 0x00000002;
    pub const IS_VOLATILE: u32 = 0x00000004;
    pub const PCR_IGNORED_ON_READ: u32 = 0x00000008;
    pub const MIGRATE_AUTHORITY: u32 = 0x00000010;
}

/// TPM_AUTH_DATA_USAGE values
pub mod tpm_auth {
    pub const NEVER: u8 = 0x00;
    pub const ALWAYS: u8 = 0x01;
    pub const PRIV_USE_ONLY: u8 = 0x03;
}

/// TPM encryption schemes (TPM_ES_*)
pub mod tpm_es {
    pub const NONE: u16 = 0x0001;
    pub const RSAESPKCSV15: u16 = 0x0002;
    pub const RSAESOAEP_SHA1_MGF1: u16 = 0x0003;
}

/// TPM signature schemes (TPM_SS_*)
pub mod tpm_ss {
    pub const NONE: u16 = 0x0001;
    pub const RSASSAPKCS1V15_SHA1: u16 = 0x0002;
    pub const RSASSAPKCS1V15_DER: u16 = 0x0003;
    pub const RSASSAPKCS1V15_INFO: u16 = 0x0004;
}

/// TSS-side scheme, algorithm and usage identifiers exposed through attributes
pub mod tss {
    pub const ALG_RSA: u32 = 0x00000020;

    pub const ES_NONE: u32 = 0x00000010;
    pub const ES_RSAESPKCSV15: u32 = 0x00000011;
    pub const ES_RSAESOAEP_SHA1_MGF1: u32 = 0x00000012;

    pub const SS_NONE: u32 = 0x00000010;
    pub const SS_RSASSAPKCS1V15_SHA1: u32 = 0x00000011;
    pub const SS_RSASSAPKCS1V15_DER: u32 = 0x00000012;
    pub const SS_RSASSAPKCS1V15_INFO: u32 = 0x00000013;

    pub const KEYUSAGE_BIND: u32 = 0x00;
    pub const KEYUSAGE_IDENTITY: u32 = 0x01;
    pub const KEYUSAGE_LEGACY: u32 = 0x02;
    pub const KEYUSAGE_SIGN: u32 = 0x03;
    pub const KEYUSAGE_STORAGE: u32 = 0x04;
    pub const KEYUSAGE_AUTHCHANGE: u32 = 0x05;
    pub const KEYUSAGE_MIGRATE: u32 = 0x06;

    pub const KEYAUTH_AUTH_NEVER: u32 = 0x10;
    pub const KEYAUTH_AUTH_ALWAYS: u32 = 0x11;
    pub const KEYAUTH_AUTH_PRIV_USE_ONLY: u32 = 0x12;
}

/// Object types accepted by `create_object` (TSS_OBJECT_TYPE_*)
pub mod object_type {
    pub const POLICY: u32 = 0x01;
    pub const RSAKEY: u32 = 0x02;
    pub const ENCDATA: u32 = 0x03;
    pub const PCRS: u32 = 0x04;
    pub const HASH: u32 = 0x05;
    pub const DELFAMILY: u32 = 0x06;
    pub const NV: u32 = 0x07;
    pub const MIGDATA: u32 = 0x08;
}

/// Key init flags (TSS_KEY_*)
pub mod key_init {
    pub const NO_AUTHORIZATION: u32 = 0x00000000;
    pub const AUTHORIZATION: u32 = 0x00000001;
    pub const AUTHORIZATION_PRIV_USE_ONLY: u32 = 0x00000002;
    pub const VOLATILE: u32 = 0x00000004;
    pub const MIGRATABLE: u32 = 0x00000008;

    pub const TYPE_DEFAULT: u32 = 0x00000000;
    pub const TYPE_SIGNING: u32 = 0x00000010;
    pub const TYPE_STORAGE: u32 = 0x00000020;
    pub const TYPE_IDENTITY: u32 = 0x00000030;
    pub const TYPE_AUTHCHANGE: u32 = 0x00000040;
    pub const TYPE_BIND: u32 = 0x00000050;
    pub const TYPE_LEGACY: u32 = 0x00000060;
    pub const TYPE_MIGRATE: u32 = 0x00000070;
    pub const TYPE_BITMASK: u32 = 0x000000F0;

    pub const SIZE_DEFAULT: u32 = 0x00000000;
    pub const SIZE_512: u32 = 0x00000100;
    pub const SIZE_1024: u32 = 0x00000200;
    pub const SIZE_2048: u32 = 0x00000300;
    pub const SIZE_4096: u32 = 0x00000400;
    pub const SIZE_8192: u32 = 0x00000500;
    pub const SIZE_16384: u32 = 0x00000600;
    pub const SIZE_BITMASK: u32 = 0x00000F00;

    pub const CERTIFIED_MIGRATABLE: u32 = 0x00001000;

    pub const STRUCT_DEFAULT: u32 = 0x00000000;
    pub const STRUCT_KEY: u32 = 0x00004000;
    pub const STRUCT_KEY12: u32 = 0x00008000;
    pub const STRUCT_BITMASK: u32 = 0x0001C000;

    pub const EMPTY_KEY: u32 = 0x00000000;
    pub const TSP_SRK: u32 = 0x04000000;
    pub const TEMPLATE_BITMASK: u32 = 0xFC000000;
}

/// Hash init flags (TSS_HASH_*)
pub mod hash_init {
    pub const DEFAULT: u32 = 0x00000000;
    pub const SHA1: u32 = 0x00000001;
    pub const OTHER: u32 = 0xFFFFFFFF;
}

/// PCR composite init flags (TSS_PCRS_STRUCT_*)
pub mod pcrs_init {
    pub const DEFAULT: u32 = 0x00000000;
    pub const INFO: u32 = 0x00000001;
    pub const INFO_LONG: u32 = 0x00000002;
    pub const INFO_SHORT: u32 = 0x00000003;
}

/// Sealed/encrypted data init flags (TSS_ENCDATA_*)
pub mod encdata_init {
    pub const SEAL: u32 = 0x00000001;
    pub const BIND: u32 = 0x00000002;
    pub const LEGACY: u32 = 0x00000003;
}

/// Policy types (TSS_POLICY_*)
pub mod policy_init {
    pub const USAGE: u32 = 0x00000001;
    pub const MIGRATION: u32 = 0x00000002;
    pub const OPERATOR: u32 = 0x00000003;
}

/// Secret modes (TSS_SECRET_MODE_*)
pub mod secret_mode {
    pub const NONE: u32 = 0x00000800;
    pub const SHA1: u32 = 0x00001000;
    pub const PLAIN: u32 = 0x00001800;
    pub const POPUP: u32 = 0x00002000;
    pub const CALLBACK: u32 = 0x00002800;
}

/// Secret lifetimes (TSS_SECRET_LIFETIME_*)
pub mod secret_lifetime {
    pub const ALWAYS: u32 = 0x00000001;
    pub const COUNTER: u32 = 0x00000002;
    pub const TIMER: u32 = 0x00000003;
}

/// Attribute flags and sub-flags, grouped by object kind (TSS_TSPATTRIB_*)
pub mod attrib {
    pub mod context {
        pub const SILENT_MODE: u32 = 0x00000001;
        pub const MACHINE_NAME: u32 = 0x00000002;
        pub const VERSION_MODE: u32 = 0x00000003;
        pub const CONNECTION_VERSION: u32 = 0x00000005;
        pub const SECRET_HASH_MODE: u32 = 0x00000006;

        pub const SECRET_HASH_MODE_POPUP: u32 = 0x00000001;

        pub const NOT_SILENT: u32 = 0x00000000;
        pub const SILENT: u32 = 0x00000001;
        pub const HASH_MODE_NOT_NULL: u32 = 0x00000000;
        pub const HASH_MODE_NULL: u32 = 0x00000001;

        pub const VERSION_AUTO: u32 = 0x00000001;
        pub const VERSION_V1_1: u32 = 0x00000002;
        pub const VERSION_V1_2: u32 = 0x00000003;

        pub const CONNECTION_VERSION_1_1: u32 = 0x00000001;
        pub const CONNECTION_VERSION_1_2: u32 = 0x00000002;
    }

    pub mod policy {
        pub const CALLBACK_HMAC: u32 = 0x00000080;
        pub const CALLBACK_XOR_ENC: u32 = 0x00000100;
        pub const CALLBACK_TAKEOWNERSHIP: u32 = 0x00000180;
        pub const CALLBACK_CHANGEAUTHASYM: u32 = 0x00000200;
        pub const SECRET_LIFETIME: u32 = 0x00000280;
        pub const POPUPSTRING: u32 = 0x00000300;
        pub const CALLBACK_SEALX_MASK: u32 = 0x00000380;
        pub const DELEGATION_INFO: u32 = 0x00000001;

        // SECRET_LIFETIME sub-flags
        pub const LIFETIME_ALWAYS: u32 = 0x00000001;
        pub const LIFETIME_COUNTER: u32 = 0x00000002;
        pub const LIFETIME_TIMER: u32 = 0x00000003;

        // DELEGATION_INFO sub-flags
        pub const DELEGATION_TYPE: u32 = 0x00000001;
        pub const DELEGATION_INDEX: u32 = 0x00000002;
        pub const DELEGATION_PER1: u32 = 0x00000003;
        pub const DELEGATION_PER2: u32 = 0x00000004;
        pub const DELEGATION_LABEL: u32 = 0x00000005;
        pub const DELEGATION_FAMILYID: u32 = 0x00000006;
        pub const DELEGATION_VERCOUNT: u32 = 0x00000007;
        pub const DELEGATION_OWNER_BLOB: u32 = 0x00000008;
        pub const DELEGATION_KEY_BLOB: u32 = 0x00000009;
    }

    pub mod key {
        pub const BLOB: u32 = 0x00000040;
        pub const INFO: u32 = 0x00000080;
        pub const UUID: u32 = 0x000000C0;
        pub const PCR: u32 = 0x00000100;
        pub const RSAKEY_INFO: u32 = 0x00000140;
        pub const REGISTER: u32 = 0x00000180;

        // BLOB sub-flags
        pub const BLOB_BLOB: u32 = 0x00000008;
        pub const BLOB_PUBLIC_KEY: u32 = 0x00000010;
        pub const BLOB_PRIVATE_KEY: u32 = 0x00000028;

        // INFO sub-flags
        pub const INFO_SIZE: u32 = 0x00000080;
        pub const INFO_USAGE: u32 = 0x00000100;
        pub const INFO_KEYFLAGS: u32 = 0x00000180;
        pub const INFO_AUTHUSAGE: u32 = 0x00000200;
        pub const INFO_ALGORITHM: u32 = 0x00000280;
        pub const INFO_SIGSCHEME: u32 = 0x00000300;
        pub const INFO_ENCSCHEME: u32 = 0x00000380;
        pub const INFO_MIGRATABLE: u32 = 0x00000400;
        pub const INFO_VOLATILE: u32 = 0x00000500;
        pub const INFO_AUTHDATAUSAGE: u32 = 0x00000580;
        pub const INFO_KEYSTRUCT: u32 = 0x00000700;

        // RSAKEY_INFO sub-flags
        pub const RSA_EXPONENT: u32 = 0x00001000;
        pub const RSA_MODULUS: u32 = 0x00002000;
        pub const RSA_KEYSIZE: u32 = 0x00003000;
        pub const RSA_PRIMES: u32 = 0x00004000;

        // PCR sub-flags
        pub const PCR_DIGEST_ATCREATION: u32 = 0x00008000;
        pub const PCR_DIGEST_ATRELEASE: u32 = 0x00010000;
        pub const PCR_SELECTION: u32 = 0x00018000;

        // REGISTER values
        pub const REGISTER_USER: u32 = 0x02000000;
        pub const REGISTER_SYSTEM: u32 = 0x04000000;
        pub const REGISTER_NO: u32 = 0x06000000;

        pub const KEYSTRUCT_KEY: u32 = 0x00000001;
        pub const KEYSTRUCT_KEY12: u32 = 0x00000002;
    }

    pub mod encdata {
        pub const BLOB: u32 = 0x00000008;
        pub const PCR: u32 = 0x00000010;
        pub const SEAL: u32 = 0x00000020;

        pub const BLOB_BLOB: u32 = 0x00000001;
        pub const PCR_DIGEST_ATCREATION: u32 = 0x00000002;
        pub const PCR_DIGEST_ATRELEASE: u32 = 0x00000003;
        pub const PCR_SELECTION: u32 = 0x00000004;
        pub const SEAL_PROTECT_MODE: u32 = 0x00000001;
        pub const TYPE: u32 = 0x00000005;
    }

    pub mod nv {
        pub const INDEX: u32 = 0x00000001;
        pub const PERMISSIONS: u32 = 0x00000002;
        pub const STATE: u32 = 0x00000003;
        pub const DATASIZE: u32 = 0x00000004;

        pub const STATE_READSTCLEAR: u32 = 0x00100000;
        pub const STATE_WRITESTCLEAR: u32 = 0x00200000;
        pub const STATE_WRITEDEFINE: u32 = 0x00300000;
    }

    pub mod delfamily {
        pub const STATE: u32 = 0x00000001;
        pub const INFO: u32 = 0x00000002;

        pub const STATE_LOCKED: u32 = 0x00000001;
        pub const STATE_ENABLED: u32 = 0x00000002;
        pub const INFO_LABEL: u32 = 0x00000003;
        pub const INFO_VERCOUNT: u32 = 0x00000004;
        pub const INFO_FAMILYID: u32 = 0x00000005;
    }

    pub mod migdata {
        pub const MIGRATIONBLOB: u32 = 0x00000010;
        pub const MIGRATIONTICKET: u32 = 0x00000020;
        pub const AUTHORITY_DATA: u32 = 0x00000030;
        pub const PAYLOAD_TYPE: u32 = 0x00000060;

        pub const MIGRATIONBLOB_MIGBLOB: u32 = 0x00000100;
        pub const MIGRATIONBLOB_REWRAPPED: u32 = 0x00000200;
        pub const AUTHORITY_DIGEST: u32 = 0x00000301;
        pub const AUTHORITY_APPROVAL_HMAC: u32 = 0x00000302;
        pub const PT_MIGRATE_RESTRICTED: u32 = 0x00000601;
    }

    pub mod hash {
        pub const IDENTIFIER: u32 = 0x00001000;
        pub const ALGORITHM: u32 = 0x00002000;
    }

    pub mod pcrs {
        pub const INFO: u32 = 0x00000001;

        pub const INFO_SHORT_LOCALITY: u32 = 0x00000001;
        pub const INFO_LONG_LOCALITY_RELEASE: u32 = 0x00000002;
        pub const INFO_LONG_LOCALITY_CREATION: u32 = 0x00000003;
        pub const INFO_STRUCT_TYPE: u32 = 0x00000004;
    }
}

/// Size of every TPM 1.2 digest, nonce and authorization secret
pub const TPM_SHA1_160_HASH_LEN: usize = 20;

/// Maximum number of PCRs addressable by a selection bitmap
pub const TPM_MAX_PCRS: u32 = 24;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_init_masks_do_not_overlap() {
        assert_eq!(key_init::TYPE_BITMASK & key_init::SIZE_BITMASK, 0);
        assert_eq!(key_init::SIZE_BITMASK & key_init::STRUCT_BITMASK, 0);
        assert_eq!(key_init::STRUCT_BITMASK & key_init::TEMPLATE_BITMASK, 0);
    }

    #[test]
    fn test_ordinals() {
        assert_eq!(TpmOrd::LoadKey2.to_u32(), 0x41);
        assert_eq!(TpmOrd::ChangeAuth.to_u32(), 0x0C);
    }
}
