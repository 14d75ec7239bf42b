//! Identifier and host-name derivation.
//!
//! Pure functions: the host name, DNS seed, and backend project name are all
//! derived from the owner reference so that every external resource of a
//! machine can be found again from the persisted record alone.

use std::sync::LazyLock;

use regex::Regex;

use crate::domain::error::MachineError;

/// Prefix of machine identifiers.
pub const MACHINE_ID_PREFIX: &str = "m-";

/// Prefix of queue task identifiers.
pub const TASK_ID_PREFIX: &str = "t-";

/// Prefix of compute instance names.
pub const HOST_PREFIX: &str = "dm-";

/// RFC 1123 label limit.
const MAX_LABEL_LEN: usize = 63;

static DOMAIN_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").ok()
});

/// Generate a unique identifier: `prefix` followed by 16 lowercase hex characters.
///
/// Entropy sources: nanosecond timestamp and two independent `RandomState` hashes.
#[must_use]
pub fn generate_id(prefix: &str) -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    hasher.write_u64(RandomState::new().build_hasher().finish());
    hasher.write_u64(RandomState::new().build_hasher().finish());
    format!("{prefix}{:016x}", hasher.finish())
}

/// Validates machine ID format: `m-` followed by exactly 16 lowercase hex characters.
///
/// Machine IDs become file names in the state directory, so anything else is rejected.
///
/// # Errors
///
/// Returns `MachineError::InvalidId` if the ID doesn't match.
pub fn validate_machine_id(id: &str) -> Result<(), MachineError> {
    let valid = id.len() == MACHINE_ID_PREFIX.len() + 16
        && id.starts_with(MACHINE_ID_PREFIX)
        && id[MACHINE_ID_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c));
    if valid {
        Ok(())
    } else {
        Err(MachineError::InvalidId(id.to_string()))
    }
}

/// Lowercase the owner reference and collapse every run of non-alphanumerics
/// into a single `-`.
///
/// # Errors
///
/// Returns `MachineError::InvalidOwner` if nothing alphanumeric remains.
pub fn slugify_owner(owner_ref: &str) -> Result<String, MachineError> {
    let mut slug = String::with_capacity(owner_ref.len());
    for c in owner_ref.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        return Err(MachineError::InvalidOwner(owner_ref.to_string()));
    }
    Ok(slug)
}

fn truncate_label(label: &str, max: usize) -> String {
    let cut: String = label.chars().take(max).collect();
    cut.trim_end_matches('-').to_string()
}

/// Compute instance name for an owner: `dm-<slug>`, at most 63 characters.
///
/// # Errors
///
/// Returns `MachineError::InvalidOwner` if the owner has no usable characters.
pub fn host_name(owner_ref: &str) -> Result<String, MachineError> {
    let slug = slugify_owner(owner_ref)?;
    Ok(format!(
        "{HOST_PREFIX}{}",
        truncate_label(&slug, MAX_LABEL_LEN - HOST_PREFIX.len())
    ))
}

/// DNS label the machine's subdomain is built from.
#[must_use]
pub fn subdomain_seed(host_name: &str) -> String {
    host_name
        .strip_prefix(HOST_PREFIX)
        .unwrap_or(host_name)
        .to_string()
}

/// Fully-qualified domain for a seed under the configured base domain.
#[must_use]
pub fn domain_for(seed: &str, base_domain: &str) -> String {
    format!("{seed}.{base_domain}")
}

/// Name of the managed backend project paired with a machine.
#[must_use]
pub fn backend_project_name(host_name: &str) -> String {
    host_name.to_string()
}

/// Returns `true` for a lowercase multi-label domain such as `dev.example.com`.
#[must_use]
pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253 && DOMAIN_RE.as_ref().is_some_and(|re| re.is_match(domain))
}
