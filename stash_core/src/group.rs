//! Size-bounded grouping of attachments for batched fetches and deletes.

use serde::{Deserialize, Serialize};

/// Upper bound on the number of members in one group.
pub const MAX_GROUP_MEMBERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub size: u64,
}

impl AttachmentDescriptor {
    pub fn new(id: impl Into<String>, size: u64) -> Self {
        Self {
            id: id.into(),
            size,
        }
    }
}

/// Partitions `items` into groups whose sizes sum to at most `max_group_size`
/// and that hold at most [`MAX_GROUP_MEMBERS`] items each.
///
/// Greedy largest-first: each group is seeded with the largest remaining
/// item, then the remaining items are scanned in descending order and every
/// item that still fits is taken. Items larger than `max_group_size` end up
/// alone in their own group. Ties keep their input order.
///
/// This is deliberately not an optimal packing.
pub fn group_by_size(
    mut items: Vec<AttachmentDescriptor>,
    max_group_size: u64,
) -> Vec<Vec<AttachmentDescriptor>> {
    items.sort_by(|a, b| b.size.cmp(&a.size));

    let mut groups = Vec::new();
    while !items.is_empty() {
        let seed = items.remove(0);
        let mut sum = seed.size;
        let mut group = vec![seed];

        let mut j = 0;
        while j < items.len() && sum < max_group_size && group.len() < MAX_GROUP_MEMBERS {
            if sum.saturating_add(items[j].size) <= max_group_size {
                sum += items[j].size;
                group.push(items.remove(j));
            } else {
                j += 1;
            }
        }

        groups.push(group);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ids(groups: &[Vec<AttachmentDescriptor>]) -> Vec<Vec<&str>> {
        groups
            .iter()
            .map(|g| g.iter().map(|a| a.id.as_str()).collect())
            .collect()
    }

    #[test]
    fn largest_first_fill() {
        let items = vec![
            AttachmentDescriptor::new("1", 9),
            AttachmentDescriptor::new("2", 5),
            AttachmentDescriptor::new("3", 5),
            AttachmentDescriptor::new("4", 1),
        ];
        let groups = group_by_size(items, 10);

        assert_eq!(ids(&groups), vec![vec!["1", "4"], vec!["2", "3"]]);
        let sizes: Vec<Vec<u64>> = groups
            .iter()
            .map(|g| g.iter().map(|a| a.size).collect())
            .collect();
        assert_eq!(sizes, vec![vec![9, 1], vec![5, 5]]);
    }

    #[test]
    fn member_cap_applies_despite_size_headroom() {
        let items = (0..101)
            .map(|i| AttachmentDescriptor::new(i.to_string(), 1))
            .collect();
        let groups = group_by_size(items, 1000);

        assert_eq!(groups.len(), 11);
        assert!(groups[..10].iter().all(|g| g.len() == MAX_GROUP_MEMBERS));
        assert_eq!(groups[10].len(), 1);
    }

    #[test]
    fn oversized_items_form_singletons() {
        let items = vec![
            AttachmentDescriptor::new("big", 50),
            AttachmentDescriptor::new("huge", 70),
            AttachmentDescriptor::new("small", 3),
        ];
        let groups = group_by_size(items, 10);
        assert_eq!(ids(&groups), vec![vec!["huge"], vec!["big"], vec!["small"]]);
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_size(Vec::new(), 10).is_empty());
    }

    proptest! {
        #[test]
        fn groups_partition_input(
            sizes in proptest::collection::vec(0u64..200, 0..80),
            max in 1u64..400,
        ) {
            let items: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, size)| AttachmentDescriptor::new(i.to_string(), *size))
                .collect();
            let groups = group_by_size(items, max);

            let mut seen = HashSet::new();
            for group in &groups {
                prop_assert!(!group.is_empty());
                prop_assert!(group.len() <= MAX_GROUP_MEMBERS);
                let sum: u64 = group.iter().map(|a| a.size).sum();
                prop_assert!(group.len() == 1 || sum <= max);
                for item in group {
                    prop_assert!(seen.insert(item.id.clone()));
                }
            }
            prop_assert_eq!(seen.len(), sizes.len());
        }
    }
}
