// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: an in-memory TPM 1.2 that checks command authorization
//! and signs its responses, plus a canned passphrase prompt.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use rand::rngs::OsRng;
use rand::RngCore;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey};
use sha1::Sha1;
use tspi::constants::{tpm_auth, tpm_es, tpm_et, tpm_kh, tpm_key_usage, tpm_rc, tpm_ss, TpmOrd};
use tspi::{
    adip_encrypt, auth_hmac, osap_shared_secret, random_nonce, ChangeAuthRequest,
    ChangeAuthResponse, Digest, KeyParms, KeyStructure, LoadKeyResponse, Marshal, MemoryKeyStore,
    NoncePair, Nonce, OiapResponse, OsapResponse, ParamDigest, Registry, RegistryConfig,
    ResponseAuth, Result, RsaKeyParms, SecretPrompt, StoredKey, TakeOwnershipRequest,
    TakeOwnershipResponse, TpmAuth, TpmKey, TpmPubKey, Transport, TspiError, Unmarshal,
};
use uuid::Uuid;

pub fn init_logging() {
    tracing_subscriber::fmt::try_init().ok();
}

fn endorsement_key() -> &'static RsaPrivateKey {
    static EK: OnceLock<RsaPrivateKey> = OnceLock::new();
    EK.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 1024).expect("generate endorsement key"))
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut out = vec![0u8; len];
    OsRng.fill_bytes(&mut out);
    out
}

/// Key blob whose wrapped private part is simply its usage secret
pub fn wrapped_key(key_usage: u16, auth_data_usage: u8, secret: &Digest) -> TpmKey {
    TpmKey {
        structure: KeyStructure::Key12,
        key_usage,
        key_flags: 0,
        auth_data_usage,
        algorithm_parms: KeyParms::rsa(
            tpm_es::RSAESOAEP_SHA1_MGF1,
            tpm_ss::NONE,
            &RsaKeyParms::new(2048),
        ),
        pcr_info: Vec::new(),
        pub_key: random_bytes(256),
        enc_data: secret.to_vec(),
    }
}

struct Session {
    nonce_even: Nonce,
    /// OSAP shared secret; OIAP sessions key with the entity secret
    shared_secret: Option<Digest>,
}

struct LoadedKey {
    key: TpmKey,
    secret: Digest,
}

#[derive(Default)]
struct State {
    next_handle: u32,
    sessions: HashMap<u32, Session>,
    keys: HashMap<u32, LoadedKey>,
    owner_secret: Option<Digest>,
}

impl State {
    fn allocate(&mut self) -> u32 {
        self.next_handle += 1;
        0x0200_0000 + self.next_handle
    }

    /// Check one authorization block, returning the HMAC key it used
    fn check_auth(
        &mut self,
        auth: &TpmAuth,
        entity_secret: &Digest,
        digest: &Digest,
    ) -> std::result::Result<Digest, u32> {
        let session = self
            .sessions
            .get(&auth.auth_handle)
            .ok_or(tpm_rc::INVALID_AUTHHANDLE)?;
        let key = session.shared_secret.unwrap_or(*entity_secret);
        let nonces = NoncePair {
            nonce_even: session.nonce_even,
            nonce_odd: auth.nonce_odd,
        };
        let expected = auth_hmac(&key, digest, &nonces, auth.continue_session)
            .map_err(|_| tpm_rc::AUTHFAIL)?;
        if expected != auth.hmac {
            self.sessions.remove(&auth.auth_handle);
            return Err(tpm_rc::AUTHFAIL);
        }
        Ok(key)
    }

    fn fail(&mut self, auths: &[&TpmAuth]) {
        for auth in auths {
            self.sessions.remove(&auth.auth_handle);
        }
    }
}

/// In-memory TPM 1.2 behind the [`Transport`] command table
pub struct LoopbackTpm {
    state: Mutex<State>,
    tamper: AtomicBool,
    link_down: AtomicBool,
    commands: AtomicU32,
}

impl LoopbackTpm {
    /// TPM without an owner or SRK
    pub fn unowned() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            tamper: AtomicBool::new(false),
            link_down: AtomicBool::new(false),
            commands: AtomicU32::new(0),
        })
    }

    /// Owned TPM with its SRK loaded at the reserved handle
    pub fn owned(owner_secret: Digest, srk_secret: Digest) -> Arc<Self> {
        let tpm = Self::unowned();
        {
            let mut state = tpm.state.lock().unwrap();
            state.owner_secret = Some(owner_secret);
            state.keys.insert(
                tpm_kh::SRK,
                LoadedKey {
                    key: wrapped_key(tpm_key_usage::STORAGE, tpm_auth::ALWAYS, &srk_secret),
                    secret: srk_secret,
                },
            );
        }
        tpm
    }

    /// Corrupt every response HMAC from now on
    pub fn set_tamper(&self, on: bool) {
        self.tamper.store(on, Ordering::SeqCst);
    }

    /// Fail authorized commands at the transport layer before they reach
    /// the TPM
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::SeqCst);
    }

    fn link(&self) -> Result<()> {
        if self.link_down.load(Ordering::SeqCst) {
            return Err(TspiError::Transport("link dropped".into()));
        }
        Ok(())
    }

    /// Number of authorized commands received
    pub fn commands(&self) -> u32 {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    /// Keys resident in the TPM, the SRK included
    pub fn loaded_keys(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    pub fn owner_secret(&self) -> Option<Digest> {
        self.state.lock().unwrap().owner_secret
    }

    /// Usage secret of the key loaded at `handle`
    pub fn key_secret(&self, handle: u32) -> Option<Digest> {
        self.state
            .lock()
            .unwrap()
            .keys
            .get(&handle)
            .map(|k| k.secret)
    }

    fn respond(
        &self,
        state: &mut State,
        auth: &TpmAuth,
        key: &Digest,
        out_digest: &Digest,
    ) -> ResponseAuth {
        let nonce_even = random_nonce();
        let nonces = NoncePair {
            nonce_even,
            nonce_odd: auth.nonce_odd,
        };
        let mut hmac = auth_hmac(key, out_digest, &nonces, auth.continue_session)
            .expect("response hmac");
        if self.tamper.load(Ordering::SeqCst) {
            hmac[0] ^= 0x01;
        }
        if auth.continue_session {
            if let Some(session) = state.sessions.get_mut(&auth.auth_handle) {
                session.nonce_even = nonce_even;
            }
        } else {
            state.sessions.remove(&auth.auth_handle);
        }
        ResponseAuth {
            nonce_even,
            continue_session: auth.continue_session,
            hmac,
        }
    }
}

fn secret_from(bytes: &[u8]) -> std::result::Result<Digest, u32> {
    bytes.try_into().map_err(|_| tpm_rc::BAD_PARAMETER)
}

impl Transport for LoopbackTpm {
    fn oiap(&self) -> Result<OiapResponse> {
        let mut state = self.state.lock().unwrap();
        let auth_handle = state.allocate();
        let nonce_even = random_nonce();
        state.sessions.insert(
            auth_handle,
            Session {
                nonce_even,
                shared_secret: None,
            },
        );
        Ok(OiapResponse {
            auth_handle,
            nonce_even,
        })
    }

    fn osap(&self, entity_type: u16, entity_value: u32, nonce_odd_osap: &Nonce) -> Result<OsapResponse> {
        let mut state = self.state.lock().unwrap();
        let secret = match entity_type {
            tpm_et::KEYHANDLE => state
                .keys
                .get(&entity_value)
                .map(|k| k.secret)
                .ok_or(TspiError::Tpm(tpm_rc::INVALID_KEYHANDLE))?,
            tpm_et::OWNER => state
                .owner_secret
                .ok_or(TspiError::Tpm(tpm_rc::AUTHFAIL))?,
            _ => return Err(TspiError::Tpm(tpm_rc::BAD_PARAMETER)),
        };
        let nonce_even_osap = random_nonce();
        let shared = osap_shared_secret(&secret, &nonce_even_osap, nonce_odd_osap)?;
        let auth_handle = state.allocate();
        let nonce_even = random_nonce();
        state.sessions.insert(
            auth_handle,
            Session {
                nonce_even,
                shared_secret: Some(shared),
            },
        );
        Ok(OsapResponse {
            auth_handle,
            nonce_even,
            nonce_even_osap,
        })
    }

    fn terminate_handle(&self, auth_handle: u32) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .sessions
            .remove(&auth_handle)
            .map(|_| ())
            .ok_or(TspiError::Tpm(tpm_rc::INVALID_AUTHHANDLE))
    }

    fn read_pubek(&self) -> Result<TpmPubKey> {
        let ek = endorsement_key();
        Ok(TpmPubKey {
            algorithm_parms: KeyParms::rsa(
                tpm_es::RSAESOAEP_SHA1_MGF1,
                tpm_ss::NONE,
                &RsaKeyParms::new(1024),
            ),
            pub_key: ek.n().to_bytes_be(),
        })
    }

    fn load_key2(&self, parent_handle: u32, key_blob: &[u8], auth: Option<&TpmAuth>) -> Result<LoadKeyResponse> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.link()?;
        let ordinal = TpmOrd::LoadKey2.to_u32();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let failed = |state: &mut State, code: u32| -> Result<LoadKeyResponse> {
            if let Some(a) = auth {
                state.fail(&[a]);
            }
            Ok(LoadKeyResponse {
                return_code: code,
                key_handle: 0,
                auth: None,
            })
        };

        let Some(parent) = state.keys.get(&parent_handle) else {
            return failed(state, tpm_rc::INVALID_KEYHANDLE);
        };
        let parent_secret = parent.secret;
        let needs_auth = parent.key.auth_data_usage != tpm_auth::NEVER;

        let hmac_key = match (needs_auth, auth) {
            (false, _) => None,
            (true, None) => return failed(state, tpm_rc::AUTHFAIL),
            (true, Some(a)) => {
                let digest = ParamDigest::command(ordinal).bytes(key_blob).finish();
                match state.check_auth(a, &parent_secret, &digest) {
                    Ok(key) => Some(key),
                    Err(code) => return failed(state, code),
                }
            }
        };

        let Ok(key) = TpmKey::from_bytes(key_blob) else {
            return failed(state, tpm_rc::BAD_PARAMETER);
        };
        let Ok(secret) = secret_from(&key.enc_data) else {
            return failed(state, tpm_rc::BAD_PARAMETER);
        };
        let key_handle = state.allocate();
        state.keys.insert(key_handle, LoadedKey { key, secret });

        let resp_auth = match (hmac_key, auth) {
            (Some(k), Some(a)) => {
                let out = ParamDigest::response(tpm_rc::SUCCESS, ordinal).finish();
                Some(self.respond(state, a, &k, &out))
            }
            _ => None,
        };
        Ok(LoadKeyResponse {
            return_code: tpm_rc::SUCCESS,
            key_handle,
            auth: resp_auth,
        })
    }

    fn evict_key(&self, key_handle: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if key_handle == tpm_kh::SRK {
            return Err(TspiError::Tpm(tpm_rc::INVALID_KEYHANDLE));
        }
        state
            .keys
            .remove(&key_handle)
            .map(|_| ())
            .ok_or(TspiError::Tpm(tpm_rc::INVALID_KEYHANDLE))
    }

    fn change_auth(&self, req: &ChangeAuthRequest) -> Result<ChangeAuthResponse> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        let ordinal = TpmOrd::ChangeAuth.to_u32();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let failed = |state: &mut State, code: u32| -> Result<ChangeAuthResponse> {
            state.fail(&[&req.parent_auth, &req.entity_auth]);
            Ok(ChangeAuthResponse {
                return_code: code,
                out_data: Vec::new(),
                parent_auth: None,
                entity_auth: None,
            })
        };

        let Some(parent_secret) = state.keys.get(&req.parent_handle).map(|k| k.secret) else {
            return failed(state, tpm_rc::INVALID_KEYHANDLE);
        };
        let Ok(entity_secret) = secret_from(&req.enc_data) else {
            return failed(state, tpm_rc::BAD_PARAMETER);
        };
        let osap_nonce_even = match state.sessions.get(&req.parent_auth.auth_handle) {
            Some(Session {
                shared_secret: Some(_),
                nonce_even,
            }) => *nonce_even,
            _ => return failed(state, tpm_rc::AUTHFAIL),
        };

        let digest = ParamDigest::command(ordinal)
            .u16(req.protocol_id)
            .bytes(&req.enc_new_auth)
            .u16(req.entity_type)
            .sized(&req.enc_data)
            .finish();
        let parent_key = match state.check_auth(&req.parent_auth, &parent_secret, &digest) {
            Ok(key) => key,
            Err(code) => return failed(state, code),
        };
        let entity_key = match state.check_auth(&req.entity_auth, &entity_secret, &digest) {
            Ok(key) => key,
            Err(_) => return failed(state, tpm_rc::AUTH2FAIL),
        };

        let new_secret = adip_encrypt(&req.enc_new_auth, &parent_key, &osap_nonce_even);
        let out_data = new_secret.to_vec();
        let out = ParamDigest::response(tpm_rc::SUCCESS, ordinal)
            .sized(&out_data)
            .finish();
        let parent_auth = self.respond(state, &req.parent_auth, &parent_key, &out);
        let entity_auth = self.respond(state, &req.entity_auth, &entity_key, &out);
        Ok(ChangeAuthResponse {
            return_code: tpm_rc::SUCCESS,
            out_data,
            parent_auth: Some(parent_auth),
            entity_auth: Some(entity_auth),
        })
    }

    fn take_ownership(&self, req: &TakeOwnershipRequest) -> Result<TakeOwnershipResponse> {
        self.commands.fetch_add(1, Ordering::SeqCst);
        self.link()?;
        let ordinal = TpmOrd::TakeOwnership.to_u32();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let failed = |state: &mut State, code: u32| -> Result<TakeOwnershipResponse> {
            state.fail(&[&req.owner_auth]);
            Ok(TakeOwnershipResponse {
                return_code: code,
                srk_key: Vec::new(),
                auth: None,
            })
        };

        if state.owner_secret.is_some() {
            return failed(state, tpm_rc::OWNER_SET);
        }
        let ek = endorsement_key();
        let decrypt = |data: &[u8]| {
            ek.decrypt(Oaep::new_with_label::<Sha1, _>("TCPA"), data)
                .map_err(|_| tpm_rc::BAD_PARAMETER)
                .and_then(|plain| secret_from(&plain))
        };
        let (owner_secret, srk_secret) =
            match (decrypt(&req.enc_owner_auth), decrypt(&req.enc_srk_auth)) {
                (Ok(owner), Ok(srk)) => (owner, srk),
                (Err(code), _) | (_, Err(code)) => return failed(state, code),
            };

        let digest = ParamDigest::command(ordinal)
            .u16(req.protocol_id)
            .sized(&req.enc_owner_auth)
            .sized(&req.enc_srk_auth)
            .bytes(&req.srk_params)
            .finish();
        let key = match state.check_auth(&req.owner_auth, &owner_secret, &digest) {
            Ok(key) => key,
            Err(code) => return failed(state, code),
        };

        let Ok(mut srk) = TpmKey::from_bytes(&req.srk_params) else {
            return failed(state, tpm_rc::BAD_PARAMETER);
        };
        srk.pub_key = random_bytes(256);
        srk.enc_data = srk_secret.to_vec();
        let srk_key = srk.to_bytes();
        state.owner_secret = Some(owner_secret);
        state.keys.insert(
            tpm_kh::SRK,
            LoadedKey {
                key: srk,
                secret: srk_secret,
            },
        );

        let out = ParamDigest::response(tpm_rc::SUCCESS, ordinal)
            .bytes(&srk_key)
            .finish();
        let auth = self.respond(state, &req.owner_auth, &key, &out);
        Ok(TakeOwnershipResponse {
            return_code: tpm_rc::SUCCESS,
            srk_key,
            auth: Some(auth),
        })
    }
}

/// Prompt that always answers with the same passphrase
pub struct FixedPrompt {
    pub passphrase: String,
    pub calls: AtomicU32,
}

impl FixedPrompt {
    pub fn new(passphrase: &str) -> Arc<Self> {
        Arc::new(Self {
            passphrase: passphrase.to_string(),
            calls: AtomicU32::new(0),
        })
    }
}

impl SecretPrompt for FixedPrompt {
    fn prompt(&self, _message: &str, _confirm: bool) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.passphrase.clone())
    }
}

/// Registry wired to `tpm` and a fresh in-memory key store
pub fn registry(tpm: Arc<LoopbackTpm>) -> (Registry, Arc<MemoryKeyStore>) {
    init_logging();
    let store = Arc::new(MemoryKeyStore::new());
    let reg = Registry::new(RegistryConfig::default())
        .with_transport(tpm)
        .with_key_store(store.clone());
    (reg, store)
}

/// Register `key` in `store` as a child of `parent`
pub fn register_key(store: &MemoryKeyStore, uuid: Uuid, parent: Uuid, key: &TpmKey) {
    store.register(
        StoredKey {
            uuid,
            parent,
            blob: key.to_bytes(),
        },
        key.public().to_bytes(),
    );
}
