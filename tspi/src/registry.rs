// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Object registry
//!
//! The [`Registry`] owns one [`ObjectList`] per object kind plus the injected
//! collaborators (TPM transport, persistent key store, passphrase prompt).
//! Operations that touch several kinds take each list's lock in turn and
//! never hold two at once.

use std::sync::Arc;

use tracing::{debug, info};

use crate::config::RegistryConfig;
use crate::constants::{encdata_init, hash_init, object_type, pcrs_init};
use crate::error::{Result, TspiError};
use crate::handle::{Handle, HandleAllocator};
use crate::list::{ObjectKind, ObjectList};
use crate::objects::{
    ContextObject, DelFamily, EncData, HashObject, MigData, NvStore, PcrComposite, RsaKey,
    TpmObject,
};
use crate::policy::{Policy, PolicyType, SecretPrompt};
use crate::transport::{KeyStore, Transport};

/// Process-wide object registry
pub struct Registry {
    pub(crate) config: RegistryConfig,
    pub(crate) contexts: ObjectList<ContextObject>,
    pub(crate) tpms: ObjectList<TpmObject>,
    pub(crate) policies: ObjectList<Policy>,
    pub(crate) keys: ObjectList<RsaKey>,
    pub(crate) encdata: ObjectList<EncData>,
    pub(crate) pcrs: ObjectList<PcrComposite>,
    pub(crate) hashes: ObjectList<HashObject>,
    pub(crate) nvstores: ObjectList<NvStore>,
    pub(crate) delfamilies: ObjectList<DelFamily>,
    pub(crate) migdata: ObjectList<MigData>,
    pub(crate) transport: Option<Arc<dyn Transport>>,
    pub(crate) key_store: Option<Arc<dyn KeyStore>>,
    pub(crate) prompt: Option<Arc<dyn SecretPrompt>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("contexts", &self.contexts)
            .field("policies", &self.policies)
            .field("keys", &self.keys)
            .finish_non_exhaustive()
    }
}

impl Registry {
    pub fn new(config: RegistryConfig) -> Self {
        let allocator = Arc::new(HandleAllocator::new());
        Self {
            config,
            contexts: ObjectList::new(ObjectKind::Context, allocator.clone()),
            tpms: ObjectList::new(ObjectKind::Tpm, allocator.clone()),
            policies: ObjectList::new(ObjectKind::Policy, allocator.clone()),
            keys: ObjectList::new(ObjectKind::RsaKey, allocator.clone()),
            encdata: ObjectList::new(ObjectKind::EncData, allocator.clone()),
            pcrs: ObjectList::new(ObjectKind::Pcrs, allocator.clone()),
            hashes: ObjectList::new(ObjectKind::Hash, allocator.clone()),
            nvstores: ObjectList::new(ObjectKind::NvStore, allocator.clone()),
            delfamilies: ObjectList::new(ObjectKind::DelFamily, allocator.clone()),
            migdata: ObjectList::new(ObjectKind::MigData, allocator.clone()),
            transport: None,
            key_store: None,
            prompt: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_key_store(mut self, store: Arc<dyn KeyStore>) -> Self {
        self.key_store = Some(store);
        self
    }

    pub fn with_prompt(mut self, prompt: Arc<dyn SecretPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> Result<&dyn Transport> {
        self.transport
            .as_deref()
            .ok_or_else(|| TspiError::Transport("no transport configured".into()))
    }

    pub(crate) fn key_store(&self) -> Result<&dyn KeyStore> {
        self.key_store.as_deref().ok_or(TspiError::KeyNotFound)
    }

    /// Kind of the object behind `handle`, probing one list at a time
    pub fn object_kind(&self, handle: Handle) -> Option<ObjectKind> {
        if self.contexts.contains(handle) {
            Some(ObjectKind::Context)
        } else if self.tpms.contains(handle) {
            Some(ObjectKind::Tpm)
        } else if self.policies.contains(handle) {
            Some(ObjectKind::Policy)
        } else if self.keys.contains(handle) {
            Some(ObjectKind::RsaKey)
        } else if self.encdata.contains(handle) {
            Some(ObjectKind::EncData)
        } else if self.pcrs.contains(handle) {
            Some(ObjectKind::Pcrs)
        } else if self.hashes.contains(handle) {
            Some(ObjectKind::Hash)
        } else if self.nvstores.contains(handle) {
            Some(ObjectKind::NvStore)
        } else if self.delfamilies.contains(handle) {
            Some(ObjectKind::DelFamily)
        } else if self.migdata.contains(handle) {
            Some(ObjectKind::MigData)
        } else {
            None
        }
    }

    pub fn is_kind(&self, handle: Handle, kind: ObjectKind) -> bool {
        match kind {
            ObjectKind::Context => self.contexts.contains(handle),
            ObjectKind::Tpm => self.tpms.contains(handle),
            ObjectKind::Policy => self.policies.contains(handle),
            ObjectKind::RsaKey => self.keys.contains(handle),
            ObjectKind::EncData => self.encdata.contains(handle),
            ObjectKind::Pcrs => self.pcrs.contains(handle),
            ObjectKind::Hash => self.hashes.contains(handle),
            ObjectKind::NvStore => self.nvstores.contains(handle),
            ObjectKind::DelFamily => self.delfamilies.contains(handle),
            ObjectKind::MigData => self.migdata.contains(handle),
        }
    }

    /// Create an object from a TSS object type and init flags
    pub fn create_object(&self, ctx: Handle, kind: u32, init_flags: u32) -> Result<Handle> {
        if !self.is_context(ctx) {
            return Err(TspiError::InvalidHandle);
        }
        match kind {
            object_type::POLICY => {
                let policy_type = PolicyType::from_u32(init_flags)
                    .ok_or(TspiError::InvalidInitFlags(init_flags))?;
                self.create_policy(ctx, policy_type)
            }
            object_type::RSAKEY => self.create_key(ctx, init_flags),
            object_type::ENCDATA => match init_flags {
                encdata_init::SEAL | encdata_init::BIND | encdata_init::LEGACY => {
                    self.create_encdata(ctx, init_flags)
                }
                _ => Err(TspiError::InvalidInitFlags(init_flags)),
            },
            object_type::PCRS => match init_flags {
                pcrs_init::DEFAULT
                | pcrs_init::INFO
                | pcrs_init::INFO_LONG
                | pcrs_init::INFO_SHORT => self.create_pcrs(ctx, init_flags),
                _ => Err(TspiError::InvalidInitFlags(init_flags)),
            },
            object_type::HASH => match init_flags {
                hash_init::DEFAULT | hash_init::SHA1 | hash_init::OTHER => {
                    self.create_hash(ctx, init_flags)
                }
                _ => Err(TspiError::InvalidInitFlags(init_flags)),
            },
            object_type::NV => self.create_nvstore(ctx),
            object_type::DELFAMILY => self.create_delfamily(ctx),
            object_type::MIGDATA => self.create_migdata(ctx),
            _ => {
                debug!(kind, "unknown object type");
                Err(TspiError::InvalidObjectType)
            }
        }
    }

    /// Remove one object owned by `ctx`.
    ///
    /// Closing a policy also clears every reference to it held by objects of
    /// the same context. Contexts and TPM objects go away with
    /// [`Registry::close_context`] only.
    pub fn close_object(&self, ctx: Handle, handle: Handle) -> Result<()> {
        match self.object_kind(handle) {
            Some(ObjectKind::Policy) => {
                self.policies.remove(handle, ctx)?;
                self.remove_policy_refs(handle, ctx);
                Ok(())
            }
            Some(ObjectKind::RsaKey) => self.keys.remove(handle, ctx),
            Some(ObjectKind::EncData) => self.encdata.remove(handle, ctx),
            Some(ObjectKind::Pcrs) => self.pcrs.remove(handle, ctx),
            Some(ObjectKind::Hash) => self.hashes.remove(handle, ctx),
            Some(ObjectKind::NvStore) => self.nvstores.remove(handle, ctx),
            Some(ObjectKind::DelFamily) => self.delfamilies.remove(handle, ctx),
            Some(ObjectKind::MigData) => self.migdata.remove(handle, ctx),
            Some(ObjectKind::Context) | Some(ObjectKind::Tpm) => Err(TspiError::InvalidObjectType),
            None => Err(TspiError::InvalidHandle),
        }
    }

    /// Reset every weak reference to `policy` held by objects owned by `ctx`
    pub(crate) fn remove_policy_refs(&self, policy: Handle, ctx: Handle) {
        let cleared = self.keys.for_each_clear_weak_ref(
            ctx,
            |k| k.usage_policy == policy || k.migration_policy == policy,
            |k| k.clear_policy(policy),
        ) + self.tpms.for_each_clear_weak_ref(
            ctx,
            |t| t.owner_policy == policy || t.operator_policy == policy,
            |t| t.clear_policy(policy),
        ) + self.encdata.for_each_clear_weak_ref(
            ctx,
            |e| e.usage_policy == policy,
            |e| e.usage_policy = Handle::NULL,
        ) + self.nvstores.for_each_clear_weak_ref(
            ctx,
            |n| n.policy == policy,
            |n| n.policy = Handle::NULL,
        ) + self.contexts.for_each_clear_weak_ref(
            ctx,
            |c| c.default_policy == policy,
            |c| c.default_policy = Handle::NULL,
        );
        debug!(%policy, %ctx, cleared, "policy references cleared");
    }

    /// Bind `policy` to `object` in the slot selected by the policy type
    pub fn assign_policy(&self, policy: Handle, object: Handle) -> Result<()> {
        let policy_type = self.policy_type(policy)?;
        let kind = self.object_kind(object).ok_or(TspiError::InvalidHandle)?;
        match (policy_type, kind) {
            (PolicyType::Usage, ObjectKind::RsaKey) => self
                .keys
                .with_record_mut(object, |r| r.payload.usage_policy = policy),
            (PolicyType::Migration, ObjectKind::RsaKey) => self
                .keys
                .with_record_mut(object, |r| r.payload.migration_policy = policy),
            (PolicyType::Usage, ObjectKind::Tpm) => self
                .tpms
                .with_record_mut(object, |r| r.payload.owner_policy = policy),
            (PolicyType::Operator, ObjectKind::Tpm) => self
                .tpms
                .with_record_mut(object, |r| r.payload.operator_policy = policy),
            (PolicyType::Usage, ObjectKind::EncData) => self
                .encdata
                .with_record_mut(object, |r| r.payload.usage_policy = policy),
            (PolicyType::Usage, ObjectKind::NvStore) => self
                .nvstores
                .with_record_mut(object, |r| r.payload.policy = policy),
            (PolicyType::Usage, ObjectKind::Context) => self
                .contexts
                .with_record_mut(object, |r| r.payload.default_policy = policy),
            _ => Err(TspiError::BadParameter),
        }?;
        debug!(%policy, %object, ?policy_type, "policy assigned");
        Ok(())
    }

    /// Tear down `ctx` and every object it owns
    pub fn close_context(&self, ctx: Handle) -> Result<()> {
        if !self.is_context(ctx) {
            return Err(TspiError::InvalidHandle);
        }
        let closed = self.keys.close_context(ctx)
            + self.encdata.close_context(ctx)
            + self.pcrs.close_context(ctx)
            + self.hashes.close_context(ctx)
            + self.nvstores.close_context(ctx)
            + self.delfamilies.close_context(ctx)
            + self.migdata.close_context(ctx)
            + self.policies.close_context(ctx)
            + self.tpms.close_context(ctx)
            + self.contexts.close_context(ctx);
        info!(%ctx, closed, "context closed");
        Ok(())
    }

    /// Total number of live objects, all kinds
    pub fn object_count(&self) -> usize {
        self.contexts.len()
            + self.tpms.len()
            + self.policies.len()
            + self.keys.len()
            + self.encdata.len()
            + self.pcrs.len()
            + self.hashes.len()
            + self.nvstores.len()
            + self.delfamilies.len()
            + self.migdata.len()
    }

    /// Make `handle` visible to another context without changing its owner
    pub fn connect_object(&self, handle: Handle, ctx: Handle) -> Result<()> {
        if !self.is_context(ctx) {
            return Err(TspiError::InvalidHandle);
        }
        match self.object_kind(handle).ok_or(TspiError::InvalidHandle)? {
            ObjectKind::Context => self.contexts.connect(handle, ctx),
            ObjectKind::Tpm => self.tpms.connect(handle, ctx),
            ObjectKind::Policy => self.policies.connect(handle, ctx),
            ObjectKind::RsaKey => self.keys.connect(handle, ctx),
            ObjectKind::EncData => self.encdata.connect(handle, ctx),
            ObjectKind::Pcrs => self.pcrs.connect(handle, ctx),
            ObjectKind::Hash => self.hashes.connect(handle, ctx),
            ObjectKind::NvStore => self.nvstores.connect(handle, ctx),
            ObjectKind::DelFamily => self.delfamilies.connect(handle, ctx),
            ObjectKind::MigData => self.migdata.connect(handle, ctx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{key_init, policy_init};

    #[test]
    fn test_create_object_dispatch() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let h = reg
            .create_object(ctx, object_type::HASH, hash_init::SHA1)
            .unwrap();
        assert_eq!(reg.object_kind(h), Some(ObjectKind::Hash));
        let p = reg
            .create_object(ctx, object_type::POLICY, policy_init::USAGE)
            .unwrap();
        assert!(reg.is_kind(p, ObjectKind::Policy));
        assert!(!reg.is_kind(p, ObjectKind::Hash));
        assert!(matches!(
            reg.create_object(ctx, 0x99, 0),
            Err(TspiError::InvalidObjectType)
        ));
        assert!(matches!(
            reg.create_object(ctx, object_type::HASH, 7),
            Err(TspiError::InvalidInitFlags(7))
        ));
        assert!(matches!(
            reg.create_object(Handle(0xdead), object_type::HASH, 0),
            Err(TspiError::InvalidHandle)
        ));
    }

    #[test]
    fn test_close_object_scoped_to_owner() {
        let reg = Registry::default();
        let a = reg.create_context().unwrap();
        let b = reg.create_context().unwrap();
        let key = reg.create_key(b, key_init::SIZE_2048).unwrap();
        assert!(matches!(
            reg.close_object(a, key),
            Err(TspiError::InvalidHandle)
        ));
        assert!(reg.keys.checkout(key).is_some());
        reg.close_object(b, key).unwrap();
        assert!(reg.object_kind(key).is_none());
    }

    #[test]
    fn test_context_and_tpm_not_closable_individually() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let tpm = reg.tpm_object(ctx).unwrap();
        assert!(matches!(
            reg.close_object(ctx, tpm),
            Err(TspiError::InvalidObjectType)
        ));
        assert!(matches!(
            reg.close_object(ctx, ctx),
            Err(TspiError::InvalidObjectType)
        ));
    }

    #[test]
    fn test_assign_policy_slots() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let key = reg.create_key(ctx, 0).unwrap();
        let mig = reg.create_policy(ctx, PolicyType::Migration).unwrap();
        let op = reg.create_policy(ctx, PolicyType::Operator).unwrap();
        assert!(matches!(
            reg.key_migration_policy(key),
            Err(TspiError::KeyNoMigrationPolicy)
        ));
        reg.assign_policy(mig, key).unwrap();
        assert_eq!(reg.key_migration_policy(key).unwrap(), mig);
        // operator policies only fit the TPM object
        assert!(matches!(
            reg.assign_policy(op, key),
            Err(TspiError::BadParameter)
        ));
        let tpm = reg.tpm_object(ctx).unwrap();
        reg.assign_policy(op, tpm).unwrap();
        assert_eq!(reg.tpm_operator_policy(tpm).unwrap(), op);
    }

    #[test]
    fn test_close_context_counts_everything() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        reg.create_key(ctx, 0).unwrap();
        reg.create_hash(ctx, hash_init::SHA1).unwrap();
        assert!(reg.object_count() > 0);
        reg.close_context(ctx).unwrap();
        assert_eq!(reg.object_count(), 0);
        assert!(matches!(
            reg.close_context(ctx),
            Err(TspiError::InvalidHandle)
        ));
    }
}
