#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod error;

pub use error::report_error;

fn digest_prefix(data: &[u8]) -> u64 {
	let digest = blake3::hash(data);
	let mut prefix = [0; 8];
	prefix.copy_from_slice(&digest.as_bytes()[..8]);
	u64::from_be_bytes(prefix)
}

/// Hashes a list of ids so clients can cheaply ask "is my id list still the same?".
///
/// The list is hashed in the order it was given, two lists holding the same ids in a different
/// order produce different hashes. Callers are expected to always submit the ids in their storage
/// order. An empty list always hashes to `0`.
#[must_use]
pub fn id_hash(ids: &[String]) -> u64 {
	if ids.is_empty() {
		return 0;
	}

	let Ok(data) = serde_json::to_vec(ids) else {
		return 0;
	};

	digest_prefix(&data)
}

/// Stable 64 bits hash of a routing key, the same key always maps to the same value across
/// processes and restarts.
#[must_use]
pub fn key_hash(key: &str) -> u64 {
	digest_prefix(key.as_bytes())
}

/// Builds a sharding function spreading keys over `lanes` workers by their [`key_hash`].
#[must_use]
pub fn hash_sharding(lanes: usize) -> impl Fn(&str) -> usize + Clone + Send + Sync + 'static {
	let lanes = lanes.max(1);
	let modulus = u64::try_from(lanes).unwrap_or(u64::MAX);

	// The remainder is always below `lanes`, so the conversion back never fails
	move |key| usize::try_from(key_hash(key) % modulus).map_or(0, |lane| lane.min(lanes - 1))
}
