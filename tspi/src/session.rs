// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 1.2 authorization sessions

use tracing::debug;

use crate::auth::{NoncePair, ResponseAuth, TpmAuth};
use crate::crypto::random_nonce;
use crate::error::{Result, TspiError};
use crate::handle::Handle;
use crate::policy::{HmacRequest, OsapNonces, XorRequest};
use crate::registry::Registry;
use crate::types::{Digest, Nonce};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Oiap,
    Osap(OsapNonces),
}

/// Authorization session bound to one policy
#[derive(Debug)]
pub struct AuthSession {
    pub handle: u32,
    pub kind: SessionKind,
    policy: Handle,
    nonce_even: Nonce,
    nonce_odd: Nonce,
    /// `nonce_odd` was generated and not yet used by `authorize`
    prepared: bool,
    open: bool,
}

impl AuthSession {
    /// Start an OIAP session authorized by `policy`
    pub fn oiap(reg: &Registry, policy: Handle) -> Result<Self> {
        let resp = reg.transport()?.oiap()?;
        debug!(handle = resp.auth_handle, %policy, "OIAP session started");
        Ok(Self {
            handle: resp.auth_handle,
            kind: SessionKind::Oiap,
            policy,
            nonce_even: resp.nonce_even,
            nonce_odd: [0u8; 20],
            prepared: false,
            open: true,
        })
    }

    /// Start an OSAP session for an entity whose secret lives in `policy`
    pub fn osap(reg: &Registry, policy: Handle, entity_type: u16, entity_value: u32) -> Result<Self> {
        let nonce_odd_osap = random_nonce();
        let resp = reg
            .transport()?
            .osap(entity_type, entity_value, &nonce_odd_osap)?;
        debug!(
            handle = resp.auth_handle,
            %policy,
            entity_type,
            entity_value,
            "OSAP session started"
        );
        Ok(Self {
            handle: resp.auth_handle,
            kind: SessionKind::Osap(OsapNonces {
                nonce_even_osap: resp.nonce_even_osap,
                nonce_odd_osap,
            }),
            policy,
            nonce_even: resp.nonce_even,
            nonce_odd: [0u8; 20],
            prepared: false,
            open: true,
        })
    }

    pub fn policy(&self) -> Handle {
        self.policy
    }

    /// Latest even nonce received from the TPM
    pub fn nonce_even(&self) -> &Nonce {
        &self.nonce_even
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    fn osap_nonces(&self) -> Option<OsapNonces> {
        match self.kind {
            SessionKind::Oiap => None,
            SessionKind::Osap(n) => Some(n),
        }
    }

    /// Generate the odd nonce for the next command and return the pair
    pub fn prepare(&mut self) -> NoncePair {
        self.nonce_odd = random_nonce();
        self.prepared = true;
        self.nonces()
    }

    fn nonces(&self) -> NoncePair {
        NoncePair {
            nonce_even: self.nonce_even,
            nonce_odd: self.nonce_odd,
        }
    }

    /// Nonces and OSAP parameters for masking data sent with the next
    /// command. Calls [`AuthSession::prepare`] if that has not happened yet.
    pub fn xor_request(&mut self) -> Result<XorRequest> {
        let osap = self.osap_nonces().ok_or(TspiError::BadParameter)?;
        if !self.prepared {
            self.prepare();
        }
        Ok(XorRequest {
            nonces: self.nonces(),
            osap,
        })
    }

    /// Authorization block for a command with input digest `param_digest`
    pub fn authorize(
        &mut self,
        reg: &Registry,
        ordinal: u32,
        param_digest: Digest,
        continue_session: bool,
    ) -> Result<TpmAuth> {
        if !self.open {
            return Err(TspiError::Internal(format!(
                "session 0x{:08x} already closed",
                self.handle
            )));
        }
        if !self.prepared {
            self.prepare();
        }
        self.prepared = false;
        let hmac = reg.do_hmac(
            self.policy,
            &HmacRequest {
                ordinal,
                param_digest,
                nonces: self.nonces(),
                continue_session,
                osap: self.osap_nonces(),
                verify: false,
            },
        )?;
        Ok(TpmAuth {
            auth_handle: self.handle,
            nonce_odd: self.nonce_odd,
            continue_session,
            hmac,
        })
    }

    /// Check the response HMAC over `out_digest` and roll the even nonce
    pub fn verify(
        &mut self,
        reg: &Registry,
        ordinal: u32,
        out_digest: Digest,
        resp: &ResponseAuth,
    ) -> Result<()> {
        let req = HmacRequest {
            ordinal,
            param_digest: out_digest,
            nonces: NoncePair {
                nonce_even: resp.nonce_even,
                nonce_odd: self.nonce_odd,
            },
            continue_session: resp.continue_session,
            osap: self.osap_nonces(),
            verify: true,
        };
        reg.validate_response_hmac(self.policy, &req, &resp.hmac)?;
        self.nonce_even = resp.nonce_even;
        self.open = resp.continue_session;
        Ok(())
    }

    /// Release the session handle unless the TPM already closed it
    pub fn close(mut self, reg: &Registry) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        debug!(handle = self.handle, "terminating session");
        reg.transport()?.terminate_handle(self.handle)
    }

    /// The TPM closed the session on its side (failed command)
    pub(crate) fn mark_closed(&mut self) {
        self.open = false;
    }
}
