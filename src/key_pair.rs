//! Key pair convergence

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use md5::Md5;
use sha2::{Digest, Sha256};

use crate::cloud::KeyPairApi;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{Error, Result};

/// Key pair name for a business key
pub fn name_for(business_key: &str) -> String {
    format!("key-{}", business_key)
}

/// MD5 fingerprint of a public key line such as
/// `ssh-rsa AAAAB3Nza... user@host`, as colon-separated lowercase hex.
/// This is the form EC2 and CloudStack report for imported key pairs.
pub fn fingerprint_public_key(public_key: &str) -> Result<String> {
    let blob = decode_public_key(public_key)?;
    let digest = Md5::digest(&blob);
    let hex: Vec<String> = digest.iter().map(|b| format!("{:02x}", b)).collect();
    Ok(hex.join(":"))
}

/// OpenSSH `SHA256:` fingerprint of a public key line
pub fn sha256_fingerprint(public_key: &str) -> Result<String> {
    let blob = decode_public_key(public_key)?;
    Ok(format!("SHA256:{}", STANDARD_NO_PAD.encode(Sha256::digest(&blob))))
}

/// Compare a provider-reported fingerprint with `public_key`, in whichever
/// of the two forms the provider used
pub fn fingerprint_matches(reported: &str, public_key: &str) -> Result<bool> {
    let reported = reported.trim();
    if reported.starts_with("SHA256:") {
        return Ok(reported == sha256_fingerprint(public_key)?);
    }
    Ok(reported.eq_ignore_ascii_case(&fingerprint_public_key(public_key)?))
}

/// Decoded key blob. It must start with a length-prefixed key type that
/// matches the type token of the line.
fn decode_public_key(public_key: &str) -> Result<Vec<u8>> {
    let mut parts = public_key.split_whitespace();
    let key_type = parts
        .next()
        .ok_or_else(|| Error::validation("public key is empty"))?;
    let encoded = parts
        .next()
        .ok_or_else(|| Error::validation(format!("{} public key has no key data", key_type)))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|e| Error::validation(format!("public key is not valid base64: {}", e)))?;

    let embedded = read_string(&blob)
        .ok_or_else(|| Error::validation("public key blob is truncated"))?;
    if embedded != key_type.as_bytes() {
        return Err(Error::validation(format!(
            "public key blob is {}, line says {}",
            String::from_utf8_lossy(embedded),
            key_type
        )));
    }

    Ok(blob)
}

/// First SSH wire-format string of `blob`
fn read_string(blob: &[u8]) -> Option<&[u8]> {
    let len_bytes: [u8; 4] = blob.get(..4)?.try_into().ok()?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    blob.get(4..4usize.checked_add(len)?)
}

/// What [`ensure`] had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPairOutcome {
    Imported,
    Unchanged,
    Replaced,
}

/// Make `key_name` hold exactly `public_key`.
///
/// An existing key pair with the same fingerprint is left alone. A different
/// one is deleted and re-imported.
pub async fn ensure<C>(client: &C, key_name: &str, public_key: &str, retry: &RetryPolicy) -> Result<KeyPairOutcome>
where
    C: KeyPairApi + ?Sized,
{
    match retry_transient("import_key_pair", retry, || client.import_key_pair(key_name, public_key)).await {
        Ok(()) => {
            tracing::info!(key_pair = %key_name, "Imported key pair");
            return Ok(KeyPairOutcome::Imported);
        }
        Err(e) if e.is_already_exists() => {}
        Err(e) => return Err(e.into()),
    }

    let existing = retry_transient("describe_key_pair", retry, || client.describe_key_pair(key_name)).await?;
    if fingerprint_matches(&existing, public_key)? {
        tracing::debug!(key_pair = %key_name, fingerprint = %existing, "Key pair already up to date");
        return Ok(KeyPairOutcome::Unchanged);
    }

    tracing::warn!(
        key_pair = %key_name,
        existing = %existing,
        "Key pair fingerprint mismatch, replacing"
    );
    retry_transient("delete_key_pair", retry, || client.delete_key_pair(key_name)).await?;
    retry_transient("import_key_pair", retry, || client.import_key_pair(key_name, public_key)).await?;
    Ok(KeyPairOutcome::Replaced)
}

/// Delete the key pair; a missing one counts as deleted
pub async fn delete<C>(client: &C, key_name: &str, retry: &RetryPolicy) -> Result<()>
where
    C: KeyPairApi + ?Sized,
{
    match retry_transient("delete_key_pair", retry, || client.delete_key_pair(key_name)).await {
        Ok(()) => {
            tracing::info!(key_pair = %key_name, "Deleted key pair");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
