// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Authorized TPM commands
//!
//! Each command builds its input parameter digest, authorizes it through the
//! policies involved, calls the transport and then checks the response HMAC.
//! A response whose HMAC does not verify is a failure even when the TPM
//! reported success. Usage counters are only consumed once a response has
//! been verified.

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{ParamDigest, ResponseAuth};
use crate::constants::{key_init, tpm_auth, tpm_et, tpm_kh, tpm_pid, tpm_rc, TpmOrd};
use crate::crypto::rsa_encrypt_oaep_tcpa;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::marshal::{Marshal, Unmarshal};
use crate::objects::SRK_UUID;
use crate::policy::OwnershipSecrets;
use crate::registry::Registry;
use crate::session::AuthSession;
use crate::transport::{ChangeAuthRequest, TakeOwnershipRequest};
use crate::types::TpmKey;

fn check_return_code(ordinal: TpmOrd, return_code: u32) -> Result<()> {
    if return_code != tpm_rc::SUCCESS {
        debug!(?ordinal, return_code = %format!("0x{return_code:08x}"), "TPM command failed");
        return Err(TspiError::Tpm(return_code));
    }
    Ok(())
}

fn require_auth(auth: Option<ResponseAuth>) -> Result<ResponseAuth> {
    auth.ok_or(TspiError::ValidationFailed)
}

impl Registry {
    /// Load `key` under the already loaded `parent` with TPM_LoadKey2.
    ///
    /// On success the key records its transport handle and becomes
    /// structurally final. A key whose load response fails verification is
    /// evicted again.
    pub fn load_key(&self, key: Handle, parent: Handle) -> Result<u32> {
        let parent_handle = self.key_tcs_handle(parent)?;
        let parent_policy = self.key_usage_policy(parent)?;
        let needs_auth = self.key_auth_data_usage(parent)? != tpm_auth::NEVER;
        let blob = self.key_blob(key)?;
        let ordinal = TpmOrd::LoadKey2;

        let mut session = if needs_auth {
            Some(AuthSession::oiap(self, parent_policy)?)
        } else {
            None
        };

        let result = (|| -> Result<u32> {
            let auth = match session.as_mut() {
                Some(s) => {
                    let digest = ParamDigest::command(ordinal.to_u32()).bytes(&blob).finish();
                    Some(s.authorize(self, ordinal.to_u32(), digest, false)?)
                }
                None => None,
            };

            let transport = self.transport()?;
            let resp = transport.load_key2(parent_handle, &blob, auth.as_ref())?;
            if let Err(e) = check_return_code(ordinal, resp.return_code) {
                if let Some(s) = session.as_mut() {
                    s.mark_closed();
                }
                return Err(e);
            }

            if let Some(s) = session.as_mut() {
                let digest = ParamDigest::response(resp.return_code, ordinal.to_u32()).finish();
                let verified = require_auth(resp.auth)
                    .and_then(|auth| s.verify(self, ordinal.to_u32(), digest, &auth));
                if let Err(e) = verified {
                    // the TPM holds a key the caller never sees
                    if let Err(evict) = transport.evict_key(resp.key_handle) {
                        warn!(
                            tcs_handle = resp.key_handle,
                            error = %evict,
                            "failed to evict unverified key"
                        );
                    }
                    return Err(e);
                }
            }
            Ok(resp.key_handle)
        })();

        let tcs_handle = match result {
            Ok(tcs_handle) => tcs_handle,
            Err(e) => {
                if let Some(s) = session {
                    let _ = s.close(self);
                }
                warn!(%key, %parent, error = %e, "load key failed");
                return Err(e);
            }
        };
        if let Some(s) = session {
            s.close(self)?;
            self.dec_counter(parent_policy)?;
        }

        self.set_key_tcs_handle(key, tcs_handle)?;
        self.materialize_key(key, &blob)?;
        debug!(%key, %parent, tcs_handle, "key loaded");
        Ok(tcs_handle)
    }

    /// Materialize the key registered under `uuid` and load it, loading its
    /// ancestors first. The SRK resolves to a template bound to the TPM's
    /// fixed SRK handle.
    pub fn load_key_by_uuid(&self, ctx: Handle, uuid: Uuid) -> Result<Handle> {
        let existing = self.find_key_by_uuid(ctx, uuid);
        if let Some(existing) = existing {
            if self.key_tcs_handle(existing).is_ok() {
                return Ok(existing);
            }
        }
        if uuid == SRK_UUID {
            return self.create_key(ctx, key_init::TSP_SRK);
        }

        let stored = self.key_store()?.get_key_by_uuid(&uuid)?;
        let parent = self.load_key_by_uuid(ctx, stored.parent)?;
        // an unloaded object already carrying the UUID is loaded in place
        let key = match existing {
            Some(existing) => existing,
            None => self.create_key_from_blob(ctx, &stored.blob, Some(uuid))?,
        };
        if let Err(e) = self.load_key(key, parent) {
            // leave no half-loaded object behind
            if existing.is_none() {
                self.close_object(ctx, key)?;
            }
            return Err(e);
        }
        self.set_key_registration(key, true, false)?;
        Ok(key)
    }

    /// Change the usage secret of `object` to the one held by `new_policy`.
    ///
    /// The parent authorizes through OSAP, which also encrypts the new
    /// secret; the object's current secret authorizes through OIAP. The
    /// re-wrapped blob replaces the key through the canonical load path and
    /// `new_policy` becomes the object's usage policy.
    pub fn change_auth(&self, object: Handle, parent: Handle, new_policy: Handle) -> Result<()> {
        if !self.is_key(object) {
            return Err(TspiError::InvalidObjectType);
        }
        let parent_handle = self.key_tcs_handle(parent)?;
        let parent_policy = self.key_usage_policy(parent)?;
        let entity_policy = self.key_usage_policy(object)?;
        let new_secret = self.get_secret(new_policy, true)?;
        let key_blob = self.key_blob(object)?;
        let mut key = TpmKey::from_bytes(&key_blob)?;
        let ordinal = TpmOrd::ChangeAuth;

        let mut parent_session =
            AuthSession::osap(self, parent_policy, tpm_et::KEYHANDLE, parent_handle)?;
        let mut entity_session = match AuthSession::oiap(self, entity_policy) {
            Ok(s) => s,
            Err(e) => {
                parent_session.close(self)?;
                return Err(e);
            }
        };

        let result = (|| -> Result<Vec<u8>> {
            let xor = parent_session.xor_request()?;
            let enc_new_auth = self.encrypt_new_auth(parent_policy, &xor, &new_secret)?;
            let digest = ParamDigest::command(ordinal.to_u32())
                .u16(tpm_pid::ADCP)
                .bytes(&enc_new_auth)
                .u16(tpm_et::KEY)
                .sized(&key.enc_data)
                .finish();
            let parent_auth = parent_session.authorize(self, ordinal.to_u32(), digest, false)?;
            let entity_auth = entity_session.authorize(self, ordinal.to_u32(), digest, false)?;

            let resp = self.transport()?.change_auth(&ChangeAuthRequest {
                parent_handle,
                protocol_id: tpm_pid::ADCP,
                enc_new_auth,
                entity_type: tpm_et::KEY,
                enc_data: key.enc_data.clone(),
                parent_auth,
                entity_auth,
            })?;
            if let Err(e) = check_return_code(ordinal, resp.return_code) {
                parent_session.mark_closed();
                entity_session.mark_closed();
                return Err(e);
            }

            let out = ParamDigest::response(resp.return_code, ordinal.to_u32())
                .sized(&resp.out_data)
                .finish();
            parent_session.verify(self, ordinal.to_u32(), out, &require_auth(resp.parent_auth)?)?;
            entity_session.verify(self, ordinal.to_u32(), out, &require_auth(resp.entity_auth)?)?;
            Ok(resp.out_data)
        })();

        let out_data = match result {
            Ok(out_data) => out_data,
            Err(e) => {
                let _ = parent_session.close(self);
                let _ = entity_session.close(self);
                warn!(%object, error = %e, "change auth failed");
                return Err(e);
            }
        };
        parent_session.close(self)?;
        entity_session.close(self)?;
        self.dec_counter(parent_policy)?;
        self.dec_counter(entity_policy)?;

        key.enc_data = out_data;
        self.materialize_key(object, &key.to_bytes())?;
        self.assign_policy(new_policy, object)?;
        info!(%object, "usage secret changed");
        Ok(())
    }

    /// Take ownership of the TPM behind `tpm`, creating the SRK described
    /// by the template key `srk`.
    ///
    /// The owner and SRK secrets are OAEP-encrypted under the endorsement
    /// key unless the owner policy carries a take-ownership callback. The
    /// command is authorized with the new owner secret, and the returned SRK
    /// blob materializes `srk`.
    pub fn take_ownership(&self, tpm: Handle, srk: Handle) -> Result<()> {
        let owner_policy = self.tpm_policy(tpm)?;
        let srk_policy = self.key_usage_policy(srk)?;
        let srk_params = self.key_blob(srk)?;
        let ordinal = TpmOrd::TakeOwnership;

        let pubek = self.transport()?.read_pubek()?;
        let secrets = match self.take_ownership_callback(owner_policy)? {
            Some(callback) => callback(&pubek)?,
            None => {
                let exponent = pubek.algorithm_parms.rsa_parms()?.exponent;
                let owner_secret = self.get_secret(owner_policy, true)?;
                let srk_secret = self.get_secret(srk_policy, true)?;
                OwnershipSecrets {
                    enc_owner_auth: rsa_encrypt_oaep_tcpa(
                        &pubek.pub_key,
                        &exponent,
                        owner_secret.as_bytes(),
                    )?,
                    enc_srk_auth: rsa_encrypt_oaep_tcpa(
                        &pubek.pub_key,
                        &exponent,
                        srk_secret.as_bytes(),
                    )?,
                }
            }
        };

        let mut session = AuthSession::oiap(self, owner_policy)?;
        let result = (|| -> Result<Vec<u8>> {
            let digest = ParamDigest::command(ordinal.to_u32())
                .u16(tpm_pid::OWNER)
                .sized(&secrets.enc_owner_auth)
                .sized(&secrets.enc_srk_auth)
                .bytes(&srk_params)
                .finish();
            let owner_auth = session.authorize(self, ordinal.to_u32(), digest, false)?;

            let resp = self.transport()?.take_ownership(&TakeOwnershipRequest {
                protocol_id: tpm_pid::OWNER,
                enc_owner_auth: secrets.enc_owner_auth,
                enc_srk_auth: secrets.enc_srk_auth,
                srk_params,
                owner_auth,
            })?;
            if let Err(e) = check_return_code(ordinal, resp.return_code) {
                session.mark_closed();
                return Err(e);
            }

            let out = ParamDigest::response(resp.return_code, ordinal.to_u32())
                .bytes(&resp.srk_key)
                .finish();
            session.verify(self, ordinal.to_u32(), out, &require_auth(resp.auth)?)?;
            Ok(resp.srk_key)
        })();

        let srk_key = match result {
            Ok(srk_key) => srk_key,
            Err(e) => {
                let _ = session.close(self);
                warn!(%tpm, error = %e, "take ownership failed");
                return Err(e);
            }
        };
        session.close(self)?;
        self.dec_counter(owner_policy)?;

        self.materialize_key(srk, &srk_key)?;
        self.set_key_tcs_handle(srk, tpm_kh::SRK)?;
        info!(%tpm, %srk, "ownership taken");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_need_a_transport() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let srk = reg.create_key(ctx, key_init::TSP_SRK).unwrap();
        let key = reg.create_key(ctx, 0).unwrap();
        assert!(matches!(
            reg.load_key(key, srk),
            Err(TspiError::Transport(_))
        ));
        // nothing was finalized
        assert!(!reg.is_key_set(key).unwrap());
    }

    #[test]
    fn test_parent_must_be_loaded() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let parent = reg.create_key(ctx, key_init::TYPE_STORAGE).unwrap();
        let key = reg.create_key(ctx, 0).unwrap();
        assert!(matches!(
            reg.load_key(key, parent),
            Err(TspiError::KeyNotLoaded)
        ));
        assert!(matches!(
            reg.change_auth(key, parent, reg.context_default_policy(ctx).unwrap()),
            Err(TspiError::KeyNotLoaded)
        ));
    }

    #[test]
    fn test_srk_uuid_resolves_without_store() {
        let reg = Registry::default();
        let ctx = reg.create_context().unwrap();
        let srk = reg.load_key_by_uuid(ctx, SRK_UUID).unwrap();
        assert_eq!(reg.key_tcs_handle(srk).unwrap(), tpm_kh::SRK);
        assert_eq!(reg.load_key_by_uuid(ctx, SRK_UUID).unwrap(), srk);
        assert!(matches!(
            reg.load_key_by_uuid(ctx, Uuid::from_u128(7)),
            Err(TspiError::KeyNotFound)
        ));
    }
}
