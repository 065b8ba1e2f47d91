// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

use tracing::info;

use crate::config::{HashMode, VersionMode};
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::policy::PolicyType;
use crate::registry::Registry;

use super::TpmObject;

/// Payload of a context object
#[derive(Debug, Clone)]
pub struct ContextObject {
    /// Popups are refused
    pub silent: bool,
    pub machine_name: String,
    pub version_mode: VersionMode,
    /// TPM version reported by the transport, 0 while unknown
    pub connection_version: u32,
    pub hash_mode: HashMode,
    /// Usage policy new objects start with
    pub default_policy: Handle,
    pub tpm: Handle,
}

impl Registry {
    /// Open a context together with its default policy and TPM object
    pub fn create_context(&self) -> Result<Handle> {
        let ctx = self.contexts.add_self_owned(
            ObjectFlags::empty(),
            ContextObject {
                silent: self.config.silent_by_default,
                machine_name: String::new(),
                version_mode: self.config.version_mode,
                connection_version: 0,
                hash_mode: self.config.popup_hash_mode,
                default_policy: Handle::NULL,
                tpm: Handle::NULL,
            },
        )?;
        if let Err(e) = self.populate_context(ctx) {
            // drop whatever was created so far
            let _ = self.close_context(ctx);
            return Err(e);
        }
        info!(%ctx, "context opened");
        Ok(ctx)
    }

    fn populate_context(&self, ctx: Handle) -> Result<()> {
        let default_policy = self.create_policy(ctx, PolicyType::Usage)?;
        let owner_policy = self.create_policy(ctx, PolicyType::Usage)?;
        let tpm = self.tpms.add(
            ctx,
            ObjectFlags::empty(),
            TpmObject {
                owner_policy,
                operator_policy: Handle::NULL,
            },
        )?;
        self.contexts.with_record_mut(ctx, |r| {
            r.payload.default_policy = default_policy;
            r.payload.tpm = tpm;
        })
    }

    pub fn is_context(&self, handle: Handle) -> bool {
        self.contexts.contains(handle)
    }

    /// The context's default usage policy, `Handle::NULL` once it was closed
    pub fn context_default_policy(&self, ctx: Handle) -> Result<Handle> {
        self.contexts.with_record(ctx, |r| r.payload.default_policy)
    }

    /// TPM object created with the context
    pub fn tpm_object(&self, ctx: Handle) -> Result<Handle> {
        self.contexts.with_record(ctx, |r| r.payload.tpm)
    }

    pub fn set_silent_mode(&self, ctx: Handle, silent: bool) -> Result<()> {
        self.contexts
            .with_record_mut(ctx, |r| r.payload.silent = silent)
    }

    pub fn is_silent(&self, ctx: Handle) -> Result<bool> {
        self.contexts.with_record(ctx, |r| r.payload.silent)
    }

    pub fn set_machine_name(&self, ctx: Handle, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(TspiError::BadParameter);
        }
        self.contexts
            .with_record_mut(ctx, |r| r.payload.machine_name = name.to_string())
    }

    pub fn machine_name(&self, ctx: Handle) -> Result<String> {
        self.contexts
            .with_record(ctx, |r| r.payload.machine_name.clone())
    }

    pub fn set_version_mode(&self, ctx: Handle, mode: VersionMode) -> Result<()> {
        self.contexts
            .with_record_mut(ctx, |r| r.payload.version_mode = mode)
    }

    pub fn version_mode(&self, ctx: Handle) -> Result<VersionMode> {
        self.contexts.with_record(ctx, |r| r.payload.version_mode)
    }

    pub fn set_connection_version(&self, ctx: Handle, version: u32) -> Result<()> {
        self.contexts
            .with_record_mut(ctx, |r| r.payload.connection_version = version)
    }

    pub fn connection_version(&self, ctx: Handle) -> Result<u32> {
        self.contexts
            .with_record(ctx, |r| r.payload.connection_version)
    }

    pub fn set_context_hash_mode(&self, ctx: Handle, mode: HashMode) -> Result<()> {
        self.contexts
            .with_record_mut(ctx, |r| r.payload.hash_mode = mode)
    }

    pub fn context_hash_mode(&self, ctx: Handle) -> Result<HashMode> {
        self.contexts.with_record(ctx, |r| r.payload.hash_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    #[test]
    fn test_context_comes_with_policy_and_tpm() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let policy = reg.context_default_policy(ctx).unwrap();
        let tpm = reg.tpm_object(ctx).unwrap();
        assert!(reg.is_policy(policy));
        assert!(reg.is_tpm(tpm));
        assert_ne!(reg.tpm_policy(tpm).unwrap(), policy);
        assert_eq!(reg.policies.owner_of(policy).unwrap(), ctx);
        assert_eq!(reg.contexts.owner_of(ctx).unwrap(), ctx);
    }

    #[test]
    fn test_config_defaults_flow_into_context() {
        let reg = Registry::new(RegistryConfig {
            silent_by_default: true,
            popup_hash_mode: HashMode::Null,
            ..Default::default()
        });
        let ctx = reg.create_context().unwrap();
        assert!(reg.is_silent(ctx).unwrap());
        assert_eq!(reg.context_hash_mode(ctx).unwrap(), HashMode::Null);
        let policy = reg.context_default_policy(ctx).unwrap();
        assert_eq!(
            reg.policies.with_record(policy, |r| r.payload.hash_mode).unwrap(),
            HashMode::Null
        );
    }

    #[test]
    fn test_machine_name() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        assert!(reg.set_machine_name(ctx, "").is_err());
        reg.set_machine_name(ctx, "localhost").unwrap();
        assert_eq!(reg.machine_name(ctx).unwrap(), "localhost");
    }
}
