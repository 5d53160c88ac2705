#![forbid(unsafe_code)]

use core::fmt::Write as _;

use roomsync_domain::{ResourceKind, RoomId};
use roomsync_store::{Store, hashes};
use sha2::{Digest, Sha256};

/// Stable fingerprint of a canonical projection encoding.
pub fn fingerprint(bytes: &[u8]) -> String {
	let digest = Sha256::digest(bytes);
	let mut out = String::with_capacity(digest.len() * 2);
	for b in digest {
		let _ = write!(out, "{b:02x}");
	}
	out
}

/// Per-(room, resource) change suppression. One canonical hash per room,
/// not per client: every client in a room sees the same projection.
#[derive(Debug, Clone)]
pub struct ChangeHashCache {
	store: Store,
}

impl ChangeHashCache {
	pub fn new(store: Store) -> Self {
		Self { store }
	}

	/// Compare `candidate` against the stored fingerprint for
	/// `(room, kind)`. On change the new fingerprint is stored in the same
	/// transaction and `true` is returned; otherwise nothing is mutated.
	pub async fn should_emit(
		&self,
		room: &RoomId,
		kind: ResourceKind,
		candidate: &[u8],
		now: i64,
	) -> anyhow::Result<bool> {
		let hash = fingerprint(candidate);

		let mut tx = self.store.begin().await?;
		let stored = hashes::get_in(&mut *tx, room, kind).await?;
		if stored.as_deref() == Some(hash.as_str()) {
			return Ok(false);
		}

		hashes::put_in(&mut *tx, room, kind, &hash, now).await?;
		tx.commit().await?;
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fingerprint_is_stable_and_value_sensitive() {
		let a = fingerprint(b"[\"alice\",\"bob\"]");
		let b = fingerprint(b"[\"alice\",\"bob\"]");
		let c = fingerprint(b"[\"alice\"]");

		assert_eq!(a, b);
		assert_ne!(a, c);
		assert_eq!(a.len(), 64);
	}

	#[tokio::test]
	async fn should_emit_only_on_change() {
		let store = Store::in_memory().await.expect("store");
		let cache = ChangeHashCache::new(store);
		let room = RoomId::new("a").expect("valid RoomId");

		assert!(
			cache
				.should_emit(&room, ResourceKind::UserList, b"v1", 1)
				.await
				.expect("gate")
		);
		assert!(
			!cache
				.should_emit(&room, ResourceKind::UserList, b"v1", 2)
				.await
				.expect("gate")
		);
		assert!(
			cache
				.should_emit(&room, ResourceKind::UserList, b"v2", 3)
				.await
				.expect("gate")
		);

		// A different resource kind keeps its own fingerprint.
		assert!(
			cache
				.should_emit(&room, ResourceKind::RoomSettings, b"v1", 4)
				.await
				.expect("gate")
		);
	}
}
