// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TSS 1.2 registry self-test CLI
//!
//! Exercises the object registry against an in-process instance.
//!
//! Usage:
//!   tspi-selftest [command]
//!
//! Commands:
//!   hash        - Hash object set/update/identifier
//!   key         - Key templates, blobs and finalization
//!   policy      - Secrets, lifetimes and assignment
//!   context     - Context teardown and handle isolation
//!   all         - Run all tests

use std::env;

use anyhow::{bail, Context as _, Result};
use tracing_subscriber::EnvFilter;
use tspi::constants::{attrib, hash_init, key_init, pcrs_init};
use tspi::{PolicyType, Registry, RegistryConfig, SecretLifetime, SecretMode, TspiError};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("all");

    println!("=== TSS 1.2 Registry Self-Test ===\n");

    let config = match RegistryConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            println!("✗ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    let reg = Registry::new(config);

    match command {
        "hash" => report("Hash", test_hash(&reg)),
        "key" => report("Key", test_key(&reg)),
        "policy" => report("Policy", test_policy(&reg)),
        "context" => report("Context", test_context(&reg)),
        "all" => {
            report("Hash", test_hash(&reg));
            report("Key", test_key(&reg));
            report("Policy", test_policy(&reg));
            report("Context", test_context(&reg));
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Available commands: hash, key, policy, context, all");
            std::process::exit(1);
        }
    }
}

fn report(name: &str, result: Result<()>) {
    match result {
        Ok(()) => println!("✓ {} test passed\n", name),
        Err(e) => println!("✗ {} test failed: {:#}\n", name, e),
    }
}

fn test_hash(reg: &Registry) -> Result<()> {
    println!("--- Test: Hash Objects ---");
    let ctx = reg.create_context()?;

    let hash = reg.create_hash(ctx, hash_init::SHA1)?;
    reg.update_hash_value(hash, b"hello ")?;
    reg.update_hash_value(hash, b"world")?;
    let value = reg.hash_value(hash)?;
    println!("  SHA1(\"hello world\") = {}", hex::encode(&value));
    if hex::encode(&value) != "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed" {
        bail!("unexpected digest");
    }

    match reg.set_hash_value(hash, &[0u8; 19]) {
        Err(TspiError::HashInvalidLength) => println!("✓ Short SHA-1 value rejected"),
        other => bail!("short value accepted: {:?}", other),
    }

    let other = reg.create_hash(ctx, hash_init::OTHER)?;
    reg.set_hash_value(other, &[0xAB; 32])?;
    reg.set_attrib_data(other, attrib::hash::IDENTIFIER, 0, b"sha256")?;
    println!(
        "✓ OTHER hash holds {} bytes, identifier {:?}",
        reg.hash_value(other)?.len(),
        String::from_utf8_lossy(&reg.get_attrib_data(other, attrib::hash::IDENTIFIER, 0)?)
    );

    reg.close_context(ctx)?;
    Ok(())
}

fn test_key(reg: &Registry) -> Result<()> {
    println!("--- Test: Key Objects ---");
    let ctx = reg.create_context()?;

    let key = reg.create_key(ctx, key_init::TYPE_STORAGE | key_init::SIZE_1024)?;
    println!(
        "  Storage key: {} bits, key12={}",
        reg.get_attrib_u32(key, attrib::key::RSAKEY_INFO, attrib::key::RSA_KEYSIZE)?,
        reg.key_is_key12(key)?
    );

    let pcrs = reg.create_pcrs(ctx, pcrs_init::INFO_LONG)?;
    reg.set_pcr_value(pcrs, 7, &[0x07; 20])?;
    reg.set_key_pcrs(key, pcrs)?;
    let at_release =
        reg.get_attrib_data(key, attrib::key::PCR, attrib::key::PCR_DIGEST_ATRELEASE)?;
    println!("✓ Bound to PCR 7, digestAtRelease {}", hex::encode(at_release));

    let blob = reg.key_blob(key)?;
    reg.materialize_key(key, &blob)?;
    println!("✓ Materialized {}-byte blob", blob.len());

    match reg.set_key_size(key, 2048) {
        Err(TspiError::InvalidObjectAccess) => println!("✓ Finalized key refuses edits"),
        other => bail!("finalized key accepted an edit: {:?}", other),
    }

    let srk = reg.create_key(ctx, key_init::TSP_SRK)?;
    match reg.key_public_blob(srk) {
        Err(TspiError::PublicKeyUnavailable) => println!("✓ SRK template has no public key"),
        other => bail!("SRK template exposed a public key: {:?}", other),
    }

    let info = reg.key_info(key)?;
    println!(
        "  {}",
        serde_json::to_string(&info).context("failed to encode key info")?
    );

    reg.close_context(ctx)?;
    Ok(())
}

fn test_policy(reg: &Registry) -> Result<()> {
    println!("--- Test: Policy Objects ---");
    let ctx = reg.create_context()?;

    let policy = reg.create_policy(ctx, PolicyType::Usage)?;
    reg.set_secret(policy, SecretMode::Plain, b"password")?;
    let secret = reg.get_secret(policy, false)?;
    println!("✓ Plain secret hashed ({} bytes)", secret.as_bytes().len());

    reg.set_lifetime(policy, SecretLifetime::Counter(1))?;
    reg.dec_counter(policy)?;
    match reg.get_secret(policy, false) {
        Err(TspiError::SecretExpired) => println!("✓ Counter lifetime expires after one use"),
        other => bail!("counter did not expire: {:?}", other),
    }
    if reg.is_secret_set(policy)? {
        bail!("expired secret was not flushed");
    }

    let key = reg.create_key(ctx, key_init::TYPE_BIND)?;
    let usage = reg.create_policy(ctx, PolicyType::Usage)?;
    reg.assign_policy(usage, key)?;
    if reg.key_usage_policy(key)? != usage {
        bail!("policy not assigned");
    }
    reg.close_object(ctx, usage)?;
    println!(
        "✓ Closing an assigned policy clears the key's reference ({})",
        reg.key_usage_policy(key)?
    );

    reg.close_context(ctx)?;
    Ok(())
}

fn test_context(reg: &Registry) -> Result<()> {
    println!("--- Test: Context Teardown ---");
    let before = reg.object_count();

    let a = reg.create_context()?;
    let b = reg.create_context()?;
    let key_a = reg.create_key(a, 0)?;
    let _ = reg.create_hash(b, hash_init::SHA1)?;
    println!("  Contexts {} and {} hold {} objects", a, b, reg.object_count() - before);

    match reg.close_object(b, key_a) {
        Err(TspiError::InvalidHandle) => println!("✓ Foreign context cannot close a key"),
        other => bail!("foreign close was not refused: {:?}", other),
    }

    reg.close_context(a)?;
    if reg.object_kind(key_a).is_some() {
        bail!("key survived its context");
    }
    println!("✓ Context {} torn down", a);

    reg.close_context(b)?;
    if reg.object_count() != before {
        bail!("{} objects leaked", reg.object_count() - before);
    }
    if reg.object_kind(b).is_some() {
        bail!("context handle still resolves");
    }
    println!("✓ No objects left behind");
    Ok(())
}
