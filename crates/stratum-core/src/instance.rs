//! Per-process instance identity.
//!
//! Every process participating in the shared cache computes a stable
//! identity once at startup. Invalidation messages carry it so that
//! subscribers can discard their own echoes.

use std::sync::OnceLock;

static INSTANCE_ID: OnceLock<String> = OnceLock::new();

/// The identity of this process, computed once and immutable afterwards.
///
/// The preferred form is `hostname:pid`. If the hostname cannot be
/// resolved, a short random hex identifier is used instead so that two
/// processes on the same broken host still tell each other apart.
pub fn instance_id() -> &'static str {
    INSTANCE_ID.get_or_init(compute_instance_id)
}

fn compute_instance_id() -> String {
    match hostname::get() {
        Ok(name) => format!("{}:{}", name.to_string_lossy(), std::process::id()),
        Err(_) => fallback_id(),
    }
}

fn fallback_id() -> String {
    format!("{:08x}", rand::random::<u32>())
}
