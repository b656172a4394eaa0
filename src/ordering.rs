//! Ordering resolution
//!
//! Sorts keyed members into their final merge order. Resolution never fails:
//! ambiguity and missing sequence numbers are reported as warnings.

use crate::archive::ArchiveMember;
use crate::error::Warning;
use crate::sequence::SequenceKey;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Member with its parsed key and final 0-based position
#[derive(Debug, Clone)]
pub struct OrderedMember {
    member: ArchiveMember,
    key: SequenceKey,
    position: usize,
}

impl OrderedMember {
    pub fn member(&self) -> &ArchiveMember {
        &self.member
    }

    pub fn key(&self) -> &SequenceKey {
        &self.key
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn name(&self) -> &str {
        self.member.name()
    }

    pub fn bytes(&self) -> &[u8] {
        self.member.bytes()
    }
}

/// Ordered members plus the warnings raised while ordering
#[derive(Debug)]
pub struct Resolution {
    pub ordered: Vec<OrderedMember>,
    pub warnings: Vec<Warning>,
}

/// Deterministic sort with group ranks and archive-order tie-breaks
pub struct OrderingResolver;

impl OrderingResolver {
    /// Order members by `(group rank, part number, archive index)`, then append
    /// unordered members in archive order. A lone member is trivially ordered.
    pub fn resolve(keyed: Vec<(ArchiveMember, SequenceKey)>) -> Resolution {
        let mut keyed = keyed;
        keyed.sort_by_key(|(member, _)| member.archive_index());
        let lone = keyed.len() == 1;

        let (mut ordered, unordered): (Vec<_>, Vec<_>) =
            keyed.into_iter().partition(|(_, key)| key.is_ordered());

        // group rank = first occurrence in archive order
        let mut ranks: HashMap<Option<String>, usize> = HashMap::new();
        for (_, key) in &ordered {
            let next = ranks.len();
            ranks.entry(key.group_label.clone()).or_insert(next);
        }
        let rank = |key: &SequenceKey| ranks.get(&key.group_label).copied().unwrap_or(usize::MAX);

        ordered.sort_by(|(a_member, a_key), (b_member, b_key)| {
            rank(a_key)
                .cmp(&rank(b_key))
                .then(a_key.part_number.cmp(&b_key.part_number))
                .then(a_member.archive_index().cmp(&b_member.archive_index()))
        });

        let mut warnings = Vec::new();
        for run in ordered.chunk_by(|(_, a), (_, b)| a.collides_with(b)) {
            if run.len() > 1 {
                let members: Vec<String> = run.iter().map(|(m, _)| m.name().to_string()).collect();
                warn!(key = %run[0].1, members = ?members, "Duplicate sequence key");
                warnings.push(Warning::DuplicateSequenceKey {
                    key: run[0].1.to_string(),
                    members,
                });
            }
        }

        for (member, _) in unordered.iter().filter(|_| !lone) {
            debug!(member = %member.name(), "No sequence number; appending");
            warnings.push(Warning::UnorderedMember {
                member: member.name().to_string(),
            });
        }

        let ordered = ordered
            .into_iter()
            .chain(unordered)
            .enumerate()
            .map(|(position, (member, key))| OrderedMember {
                member,
                key,
                position,
            })
            .collect();

        Resolution { ordered, warnings }
    }
}
