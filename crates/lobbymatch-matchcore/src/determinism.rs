//! Digests over grouping passes.
//!
//! Two workers holding the same pool snapshot must propose the same groups.
//! The pass digest makes that checkable from logs without comparing full
//! payloads: it covers ticket ids, party sizes, and ratings, in order.

use lobbymatch_types::ShardKey;
use sha2::{Digest, Sha256};

use crate::ProposedGroup;

/// Deterministic digest over one pass's proposals for a shard.
#[must_use]
pub fn compute_pass_digest(shard: &ShardKey, groups: &[ProposedGroup]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"lobbymatch:pass_digest:v1:");
    hasher.update(shard.to_string().as_bytes());
    hasher.update((groups.len() as u64).to_le_bytes());

    for group in groups {
        hasher.update((group.tickets.len() as u64).to_le_bytes());
        for ticket in &group.tickets {
            hasher.update(ticket.id.0.as_bytes());
            hasher.update(ticket.party_size.to_le_bytes());
            hasher.update(ticket.skill_rating.to_string().as_bytes());
        }
    }

    let result = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&result);
    digest
}

/// Short hex prefix of the pass digest, for log fields.
#[must_use]
pub fn pass_digest_hex(shard: &ShardKey, groups: &[ProposedGroup]) -> String {
    hex::encode(&compute_pass_digest(shard, groups)[..8])
}
