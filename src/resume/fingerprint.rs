//! Session fingerprint
//!
//! Item ids are `pre_sum[group] + index`, so what an id points at depends on
//! the order of groups, the iteration direction and the exact references in
//! each group. The fingerprint hashes all of it: the direction flag, then for
//! every group its identity, its size and its references in iteration order.
//! References are sorted and de-duplicated before they get here, so the order
//! they were supplied in never matters.

use crate::transport::{MessageId, PeerRef};
use sha2::{Digest, Sha256};

/// Domain separator so fingerprints never collide with other digests
const FINGERPRINT_DOMAIN: &[u8] = b"courier/download/v2";

/// Compute the fingerprint of ordered `(group, references)` pairs
pub fn fingerprint<'a, I>(groups: I, desc: bool) -> String
where
    I: IntoIterator<Item = (&'a PeerRef, &'a [MessageId])>,
{
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    hasher.update([u8::from(desc)]);
    for (peer, messages) in groups {
        hasher.update(peer.0.to_le_bytes());
        hasher.update((messages.len() as u64).to_le_bytes());
        for id in messages {
            hasher.update(id.to_le_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
