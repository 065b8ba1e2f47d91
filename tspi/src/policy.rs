// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Policy objects: secrets, acquisition strategies and expiry
//!
//! A policy holds at most one 20-byte secret. How the secret is obtained is
//! governed by its [`SecretMode`]; how long it stays usable by its
//! [`SecretLifetime`]. Secrets are zeroed on flush, on expiry and when the
//! policy is dropped.
//!
//! Callbacks never run with the policy list locked, so they are free to call
//! back into the registry.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tracing::{debug, warn};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::auth::{self, NoncePair};
use crate::config::HashMode;
use crate::constants::{policy_init, secret_lifetime, secret_mode};
use crate::crypto::{self, digest_eq};
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::list::ObjectFlags;
use crate::registry::Registry;
use crate::types::{Digest, Nonce, TpmPubKey};

/// A 20-byte authorization secret, zeroed on drop
#[derive(Clone, PartialEq, Eq, Default, Zeroize, ZeroizeOnDrop)]
pub struct Secret([u8; 20]);

impl Secret {
    pub fn new(bytes: Digest) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &Digest {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// How a policy obtains its secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretMode {
    /// Object needs no authorization; the secret is all zeros
    None,
    /// Caller supplied the 20-byte digest directly
    Sha1,
    /// Caller supplied plain bytes; the secret is their SHA-1
    Plain,
    /// Ask the registered prompt on first use
    Popup,
    /// Ask the application callbacks on every use
    Callback,
}

impl SecretMode {
    pub fn to_u32(self) -> u32 {
        match self {
            SecretMode::None => secret_mode::NONE,
            SecretMode::Sha1 => secret_mode::SHA1,
            SecretMode::Plain => secret_mode::PLAIN,
            SecretMode::Popup => secret_mode::POPUP,
            SecretMode::Callback => secret_mode::CALLBACK,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            secret_mode::NONE => Some(SecretMode::None),
            secret_mode::SHA1 => Some(SecretMode::Sha1),
            secret_mode::PLAIN => Some(SecretMode::Plain),
            secret_mode::POPUP => Some(SecretMode::Popup),
            secret_mode::CALLBACK => Some(SecretMode::Callback),
            _ => None,
        }
    }
}

/// Expiration rule for a stored secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretLifetime {
    Always,
    /// Remaining authorized uses
    Counter(u32),
    /// Valid for `seconds` from when it was armed
    Timer {
        seconds: u32,
        expires_at: SystemTime,
    },
}

impl SecretLifetime {
    pub fn timer(seconds: u32) -> Self {
        SecretLifetime::Timer {
            seconds,
            expires_at: SystemTime::now() + Duration::from_secs(seconds as u64),
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        match self {
            SecretLifetime::Always => false,
            SecretLifetime::Counter(n) => *n == 0,
            SecretLifetime::Timer { expires_at, .. } => now >= *expires_at,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            SecretLifetime::Always => secret_lifetime::ALWAYS,
            SecretLifetime::Counter(_) => secret_lifetime::COUNTER,
            SecretLifetime::Timer { .. } => secret_lifetime::TIMER,
        }
    }

    /// Restart a timer from now; other lifetimes are unchanged
    fn rearm(&mut self) {
        if let SecretLifetime::Timer { seconds, .. } = *self {
            *self = SecretLifetime::timer(seconds);
        }
    }
}

/// What a policy authorizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyType {
    Usage,
    Migration,
    Operator,
}

impl PolicyType {
    pub fn to_u32(self) -> u32 {
        match self {
            PolicyType::Usage => policy_init::USAGE,
            PolicyType::Migration => policy_init::MIGRATION,
            PolicyType::Operator => policy_init::OPERATOR,
        }
    }

    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            policy_init::USAGE => Some(PolicyType::Usage),
            policy_init::MIGRATION => Some(PolicyType::Migration),
            policy_init::OPERATOR => Some(PolicyType::Operator),
            _ => None,
        }
    }
}

/// Nonces exchanged when an OSAP session was opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsapNonces {
    pub nonce_even_osap: Nonce,
    pub nonce_odd_osap: Nonce,
}

/// Input of one authorization HMAC
#[derive(Debug, Clone)]
pub struct HmacRequest {
    pub ordinal: u32,
    pub param_digest: Digest,
    pub nonces: NoncePair,
    pub continue_session: bool,
    /// Present for OSAP sessions; the HMAC key is then the shared secret
    pub osap: Option<OsapNonces>,
    /// Recomputing a response HMAC rather than authorizing a command
    pub verify: bool,
}

/// Input of an XOR masking operation
#[derive(Debug, Clone, Copy)]
pub struct XorRequest {
    pub nonces: NoncePair,
    pub osap: OsapNonces,
}

/// Context passed to the secret acquisition callback
#[derive(Debug, Clone, Copy)]
pub struct SecretRequest {
    pub policy: Handle,
    /// The secret is being established for a new object
    pub new_auth: bool,
}

/// Encrypted secrets handed to TakeOwnership
#[derive(Debug, Clone)]
pub struct OwnershipSecrets {
    pub enc_owner_auth: Vec<u8>,
    pub enc_srk_auth: Vec<u8>,
}

pub type AcquireSecretFn = Arc<dyn Fn(&SecretRequest) -> Result<Secret> + Send + Sync>;
pub type HmacFn = Arc<dyn Fn(&HmacRequest) -> Result<Digest> + Send + Sync>;
pub type XorFn = Arc<dyn Fn(&XorRequest, &[u8]) -> Result<Vec<u8>> + Send + Sync>;
pub type TakeOwnershipFn = Arc<dyn Fn(&TpmPubKey) -> Result<OwnershipSecrets> + Send + Sync>;
pub type ChangeAuthAsymFn = Arc<dyn Fn(&TpmPubKey) -> Result<Vec<u8>> + Send + Sync>;

/// Application callback installed on a policy
#[derive(Clone)]
pub enum PolicyCallback {
    AcquireSecret(AcquireSecretFn),
    Hmac(HmacFn),
    XorEnc(XorFn),
    TakeOwnership(TakeOwnershipFn),
    ChangeAuthAsym(ChangeAuthAsymFn),
    SealxMask(XorFn),
}

impl fmt::Debug for PolicyCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PolicyCallback::AcquireSecret(_) => "AcquireSecret",
            PolicyCallback::Hmac(_) => "Hmac",
            PolicyCallback::XorEnc(_) => "XorEnc",
            PolicyCallback::TakeOwnership(_) => "TakeOwnership",
            PolicyCallback::ChangeAuthAsym(_) => "ChangeAuthAsym",
            PolicyCallback::SealxMask(_) => "SealxMask",
        };
        write!(f, "PolicyCallback::{name}")
    }
}

/// Slot selector for clearing or probing a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSlot {
    AcquireSecret,
    Hmac,
    XorEnc,
    TakeOwnership,
    ChangeAuthAsym,
    SealxMask,
}

#[derive(Clone, Default)]
struct Callbacks {
    acquire: Option<AcquireSecretFn>,
    hmac: Option<HmacFn>,
    xor: Option<XorFn>,
    take_ownership: Option<TakeOwnershipFn>,
    change_auth_asym: Option<ChangeAuthAsymFn>,
    sealx_mask: Option<XorFn>,
}

impl Callbacks {
    fn is_set(&self, slot: CallbackSlot) -> bool {
        match slot {
            CallbackSlot::AcquireSecret => self.acquire.is_some(),
            CallbackSlot::Hmac => self.hmac.is_some(),
            CallbackSlot::XorEnc => self.xor.is_some(),
            CallbackSlot::TakeOwnership => self.take_ownership.is_some(),
            CallbackSlot::ChangeAuthAsym => self.change_auth_asym.is_some(),
            CallbackSlot::SealxMask => self.sealx_mask.is_some(),
        }
    }

    fn clear(&mut self, slot: CallbackSlot) {
        match slot {
            CallbackSlot::AcquireSecret => self.acquire = None,
            CallbackSlot::Hmac => self.hmac = None,
            CallbackSlot::XorEnc => self.xor = None,
            CallbackSlot::TakeOwnership => self.take_ownership = None,
            CallbackSlot::ChangeAuthAsym => self.change_auth_asym = None,
            CallbackSlot::SealxMask => self.sealx_mask = None,
        }
    }
}

/// Delegation row attached to a policy
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DelegationInfo {
    /// Owner or key delegation blob
    pub blob_type: u32,
    pub index: u32,
    pub per1: u32,
    pub per2: u32,
    pub label: u8,
    pub family_id: u32,
    pub verification_count: u32,
    pub blob: Vec<u8>,
}

/// Payload of a policy object
pub struct Policy {
    pub policy_type: PolicyType,
    secret: Secret,
    secret_set: bool,
    pub mode: SecretMode,
    pub lifetime: SecretLifetime,
    pub hash_mode: HashMode,
    pub popup: Option<String>,
    callbacks: Callbacks,
    pub delegation: Option<DelegationInfo>,
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policy")
            .field("policy_type", &self.policy_type)
            .field("secret_set", &self.secret_set)
            .field("mode", &self.mode)
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl Policy {
    pub fn new(policy_type: PolicyType, hash_mode: HashMode) -> Self {
        Self {
            policy_type,
            secret: Secret::default(),
            secret_set: false,
            mode: SecretMode::Popup,
            lifetime: SecretLifetime::Always,
            hash_mode,
            popup: None,
            callbacks: Callbacks::default(),
            delegation: None,
        }
    }

    pub fn is_secret_set(&self) -> bool {
        self.secret_set
    }

    pub fn stored_secret_is_zero(&self) -> bool {
        self.secret.is_zero()
    }

    fn store(&mut self, secret: Digest) {
        self.secret = Secret::new(secret);
        self.secret_set = true;
        self.lifetime.rearm();
    }

    /// Zero the secret and mark it unset
    pub fn flush(&mut self) {
        self.secret.zeroize();
        self.secret_set = false;
    }

    /// Replace the secret according to `mode`
    pub fn set_secret(&mut self, mode: SecretMode, bytes: &[u8]) -> Result<()> {
        if self.mode == SecretMode::Callback && matches!(mode, SecretMode::Sha1 | SecretMode::Plain)
        {
            return Err(TspiError::BadParameter);
        }
        match mode {
            SecretMode::None => self.store([0u8; 20]),
            SecretMode::Sha1 => {
                let digest: Digest = bytes.try_into().map_err(|_| TspiError::BadParameter)?;
                self.store(digest);
            }
            SecretMode::Plain => self.store(crypto::sha1(&[bytes])),
            SecretMode::Popup | SecretMode::Callback => self.flush(),
        }
        self.mode = mode;
        Ok(())
    }

    /// Expire the secret if its lifetime is over
    fn check_lifetime(&mut self) -> Result<()> {
        if self.lifetime.is_expired(SystemTime::now()) {
            self.flush();
            return Err(TspiError::SecretExpired);
        }
        Ok(())
    }

    pub fn set_callback(&mut self, callback: PolicyCallback) {
        match callback {
            PolicyCallback::AcquireSecret(f) => self.callbacks.acquire = Some(f),
            PolicyCallback::Hmac(f) => self.callbacks.hmac = Some(f),
            PolicyCallback::XorEnc(f) => self.callbacks.xor = Some(f),
            PolicyCallback::TakeOwnership(f) => self.callbacks.take_ownership = Some(f),
            PolicyCallback::ChangeAuthAsym(f) => self.callbacks.change_auth_asym = Some(f),
            PolicyCallback::SealxMask(f) => self.callbacks.sealx_mask = Some(f),
        }
    }

    pub fn clear_callback(&mut self, slot: CallbackSlot) {
        self.callbacks.clear(slot)
    }

    pub fn has_callback(&self, slot: CallbackSlot) -> bool {
        self.callbacks.is_set(slot)
    }

    fn hmac_callback(&self) -> Option<HmacFn> {
        match self.mode {
            SecretMode::Callback => self.callbacks.hmac.clone(),
            _ => None,
        }
    }
}

/// Interactive passphrase source for popup-mode policies
pub trait SecretPrompt: Send + Sync {
    /// Return the passphrase. `confirm` asks for a re-entry check because the
    /// secret is being set on a new object.
    fn prompt(&self, message: &str, confirm: bool) -> Result<String>;
}

impl Registry {
    /// Create a policy owned by `ctx`, inheriting the context's hash mode
    pub fn create_policy(&self, ctx: Handle, policy_type: PolicyType) -> Result<Handle> {
        let hash_mode = self.contexts.with_record(ctx, |r| r.payload.hash_mode)?;
        self.policies
            .add(ctx, ObjectFlags::empty(), Policy::new(policy_type, hash_mode))
    }

    pub fn is_policy(&self, handle: Handle) -> bool {
        self.policies.contains(handle)
    }

    pub fn policy_type(&self, policy: Handle) -> Result<PolicyType> {
        self.policies.with_record(policy, |r| r.payload.policy_type)
    }

    pub fn secret_mode(&self, policy: Handle) -> Result<SecretMode> {
        self.policies.with_record(policy, |r| r.payload.mode)
    }

    pub fn set_secret(&self, policy: Handle, mode: SecretMode, bytes: &[u8]) -> Result<()> {
        let mut record = self.policies.get(policy)?;
        record.payload.set_secret(mode, bytes)?;
        debug!(%policy, ?mode, "policy secret set");
        Ok(())
    }

    pub fn flush_secret(&self, policy: Handle) -> Result<()> {
        self.policies.with_record_mut(policy, |r| r.payload.flush())
    }

    pub fn is_secret_set(&self, policy: Handle) -> Result<bool> {
        self.policies.with_record(policy, |r| r.payload.is_secret_set())
    }

    /// True when the stored secret buffer holds only zero bytes
    pub fn policy_secret_is_clear(&self, policy: Handle) -> Result<bool> {
        self.policies
            .with_record(policy, |r| r.payload.stored_secret_is_zero())
    }

    pub fn set_lifetime(&self, policy: Handle, lifetime: SecretLifetime) -> Result<()> {
        self.policies
            .with_record_mut(policy, |r| r.payload.lifetime = lifetime)
    }

    pub fn lifetime(&self, policy: Handle) -> Result<SecretLifetime> {
        self.policies.with_record(policy, |r| r.payload.lifetime)
    }

    /// Consume one use of a counter-limited secret
    pub fn dec_counter(&self, policy: Handle) -> Result<()> {
        self.policies.with_record_mut(policy, |r| {
            if let SecretLifetime::Counter(n) = &mut r.payload.lifetime {
                *n = n.saturating_sub(1);
            }
        })
    }

    pub fn set_popup_string(&self, policy: Handle, message: &str) -> Result<()> {
        self.policies
            .with_record_mut(policy, |r| r.payload.popup = Some(message.to_string()))
    }

    pub fn popup_string(&self, policy: Handle) -> Result<Option<String>> {
        self.policies.with_record(policy, |r| r.payload.popup.clone())
    }

    pub fn set_policy_hash_mode(&self, policy: Handle, mode: HashMode) -> Result<()> {
        self.policies
            .with_record_mut(policy, |r| r.payload.hash_mode = mode)
    }

    pub fn set_callback(&self, policy: Handle, callback: PolicyCallback) -> Result<()> {
        debug!(%policy, ?callback, "policy callback installed");
        self.policies
            .with_record_mut(policy, |r| r.payload.set_callback(callback))
    }

    pub fn clear_callback(&self, policy: Handle, slot: CallbackSlot) -> Result<()> {
        self.policies
            .with_record_mut(policy, |r| r.payload.clear_callback(slot))
    }

    pub fn has_callback(&self, policy: Handle, slot: CallbackSlot) -> Result<bool> {
        self.policies
            .with_record(policy, |r| r.payload.has_callback(slot))
    }

    pub fn set_delegation(&self, policy: Handle, info: DelegationInfo) -> Result<()> {
        self.policies
            .with_record_mut(policy, |r| r.payload.delegation = Some(info))
    }

    pub fn delegation(&self, policy: Handle) -> Result<DelegationInfo> {
        self.policies
            .with_record(policy, |r| r.payload.delegation.clone())?
            .ok_or(TspiError::DelegationNotSet)
    }

    /// Obtain the policy secret.
    ///
    /// An unset popup secret is prompted for and stored; callback secrets are
    /// fetched on every call and never stored. Expired secrets are zeroed and
    /// reported as `SecretExpired`.
    pub fn get_secret(&self, policy: Handle, new_auth: bool) -> Result<Secret> {
        let (mode, set, popup, owner, hash_mode, acquire) = {
            let r = self.policies.get(policy)?;
            (
                r.payload.mode,
                r.payload.secret_set,
                r.payload.popup.clone(),
                r.owner,
                r.payload.hash_mode,
                r.payload.callbacks.acquire.clone(),
            )
        };

        let mut acquired = None;
        if !set {
            match mode {
                SecretMode::Popup => {
                    let digest = self.prompt_secret(owner, popup, hash_mode, new_auth)?;
                    let mut r = self.policies.get(policy)?;
                    r.payload.store(digest);
                }
                SecretMode::Callback => {
                    let acquire = acquire.ok_or(TspiError::PolicyNoSecret)?;
                    acquired = Some(acquire(&SecretRequest { policy, new_auth })?);
                }
                SecretMode::None | SecretMode::Sha1 | SecretMode::Plain => {
                    return Err(TspiError::PolicyNoSecret)
                }
            }
        }

        let mut r = self.policies.get(policy)?;
        if let Err(e) = r.payload.check_lifetime() {
            warn!(%policy, "policy secret expired");
            return Err(e);
        }
        match acquired {
            Some(secret) => Ok(secret),
            None if r.payload.secret_set => Ok(r.payload.secret.clone()),
            // flushed by another thread between the two checkouts
            None => Err(TspiError::PolicyNoSecret),
        }
    }

    fn prompt_secret(
        &self,
        ctx: Handle,
        popup: Option<String>,
        hash_mode: HashMode,
        confirm: bool,
    ) -> Result<Digest> {
        let silent = self.contexts.with_record(ctx, |r| r.payload.silent)?;
        if silent {
            return Err(TspiError::SilentContext);
        }
        let prompt = self.prompt.as_ref().ok_or(TspiError::PolicyNoSecret)?;
        let message = popup.unwrap_or_else(|| self.config.default_popup_message.clone());
        let passphrase = Zeroizing::new(prompt.prompt(&message, confirm)?);
        Ok(crypto::hash_popup_secret(
            &passphrase,
            hash_mode.includes_nul(),
        ))
    }

    /// OSAP shared secret for `policy` and the session's OSAP nonces
    pub fn osap_shared_secret(&self, policy: Handle, osap: &OsapNonces) -> Result<Secret> {
        let secret = self.get_secret(policy, false)?;
        auth::osap_shared_secret(
            secret.as_bytes(),
            &osap.nonce_even_osap,
            &osap.nonce_odd_osap,
        )
        .map(Secret::new)
    }

    /// Authorization HMAC for a command (or expected HMAC of a response).
    ///
    /// Callback-mode policies with an HMAC callback compute it externally.
    pub fn do_hmac(&self, policy: Handle, req: &HmacRequest) -> Result<Digest> {
        let callback = self
            .policies
            .with_record(policy, |r| r.payload.hmac_callback())?;
        if let Some(callback) = callback {
            return callback(req);
        }
        let key = match &req.osap {
            Some(osap) => self.osap_shared_secret(policy, osap)?,
            None => self.get_secret(policy, false)?,
        };
        auth::auth_hmac(
            key.as_bytes(),
            &req.param_digest,
            &req.nonces,
            req.continue_session,
        )
    }

    /// Check a TPM response HMAC; a mismatch is `ValidationFailed`
    pub fn validate_response_hmac(
        &self,
        policy: Handle,
        req: &HmacRequest,
        returned: &Digest,
    ) -> Result<()> {
        let req = HmacRequest {
            verify: true,
            ..req.clone()
        };
        let expected = self.do_hmac(policy, &req)?;
        if !digest_eq(&expected, returned) {
            warn!(%policy, ordinal = req.ordinal, "response authorization mismatch");
            return Err(TspiError::ValidationFailed);
        }
        Ok(())
    }

    /// XOR-mask `data` under the OSAP session key of `policy`
    pub fn do_xor(&self, policy: Handle, req: &XorRequest, data: &[u8]) -> Result<Vec<u8>> {
        let callback = self
            .policies
            .with_record(policy, |r| r.payload.callbacks.xor.clone())?;
        if let Some(callback) = callback {
            return callback(req, data);
        }
        let key = self.osap_shared_secret(policy, &req.osap)?;
        Ok(auth::xor_mask(key.as_bytes(), &req.nonces, data))
    }

    /// Mask Sealx input data; same keystream as [`Registry::do_xor`]
    pub fn sealx_mask(&self, policy: Handle, req: &XorRequest, data: &[u8]) -> Result<Vec<u8>> {
        let callback = self
            .policies
            .with_record(policy, |r| r.payload.callbacks.sealx_mask.clone())?;
        if let Some(callback) = callback {
            return callback(req, data);
        }
        let key = self.osap_shared_secret(policy, &req.osap)?;
        Ok(auth::xor_mask(key.as_bytes(), &req.nonces, data))
    }

    /// Encrypt new authorization data for ChangeAuth-style commands
    pub fn encrypt_new_auth(
        &self,
        policy: Handle,
        req: &XorRequest,
        new_secret: &Secret,
    ) -> Result<Digest> {
        let callback = self
            .policies
            .with_record(policy, |r| r.payload.callbacks.xor.clone())?;
        if let Some(callback) = callback {
            let out = callback(req, new_secret.as_bytes())?;
            return out.as_slice().try_into().map_err(|_| TspiError::BadParameter);
        }
        let key = self.osap_shared_secret(policy, &req.osap)?;
        Ok(auth::adip_encrypt(
            new_secret.as_bytes(),
            key.as_bytes(),
            &req.nonces.nonce_even,
        ))
    }

    pub(crate) fn take_ownership_callback(&self, policy: Handle) -> Result<Option<TakeOwnershipFn>> {
        self.policies
            .with_record(policy, |r| r.payload.callbacks.take_ownership.clone())
    }

    /// Encrypt a new secret under a public key through the asymmetric
    /// change-auth callback
    pub fn change_auth_asym(&self, policy: Handle, key: &TpmPubKey) -> Result<Vec<u8>> {
        let callback = self
            .policies
            .with_record(policy, |r| r.payload.callbacks.change_auth_asym.clone())?
            .ok_or(TspiError::NotImplemented)?;
        callback(key)
    }
}
