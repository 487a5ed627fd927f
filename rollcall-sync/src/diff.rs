//! Membership differ.
//!
//! Pure set arithmetic over two [`MemberMap`]s. Both inputs are assumed to be
//! keyed by normalized identities; nothing here re-normalizes.

use serde::Serialize;

use rollcall_core::types::{Identity, MemberMap, Role};

/// A member whose role differs between desired and current.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleChange {
    pub identity: Identity,
    pub from: Option<Role>,
    pub to: Option<Role>,
}

/// Operations that take `current` to `desired`.
///
/// The three lists are pairwise disjoint and sorted by identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipDiff {
    pub to_add: Vec<(Identity, Option<Role>)>,
    pub to_remove: Vec<Identity>,
    pub to_update: Vec<RoleChange>,
}

impl MembershipDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

/// Compute adds, removes and role updates.
pub fn diff(desired: &MemberMap, current: &MemberMap) -> MembershipDiff {
    let mut out = MembershipDiff::default();

    for (identity, role) in desired {
        match current.get(identity) {
            None => out.to_add.push((identity.clone(), *role)),
            Some(existing) if existing != role => out.to_update.push(RoleChange {
                identity: identity.clone(),
                from: *existing,
                to: *role,
            }),
            Some(_) => {}
        }
    }

    out.to_remove = current
        .keys()
        .filter(|identity| !desired.contains_key(*identity))
        .cloned()
        .collect();

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn map(entries: &[(&str, Option<Role>)]) -> MemberMap {
        entries
            .iter()
            .map(|(id, role)| (Identity::from(*id), *role))
            .collect()
    }

    #[test]
    fn sales_scenario() {
        let desired = map(&[
            ("user1@corp.test", Some(Role::Member)),
            ("user2@corp.test", Some(Role::Member)),
            ("user3@corp.test", Some(Role::Member)),
        ]);
        let current = map(&[
            ("user1@corp.test", Some(Role::Member)),
            ("user4@corp.test", Some(Role::Member)),
        ]);

        let d = diff(&desired, &current);
        let added: Vec<&str> = d.to_add.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(added, vec!["user2@corp.test", "user3@corp.test"]);
        assert_eq!(d.to_remove, vec![Identity::from("user4@corp.test")]);
        assert!(d.to_update.is_empty());
    }

    #[test]
    fn role_changes_are_updates_not_add_remove() {
        let desired = map(&[("a", Some(Role::Manager)), ("b", Some(Role::Member))]);
        let current = map(&[("a", Some(Role::Member)), ("b", None)]);

        let d = diff(&desired, &current);
        assert!(d.to_add.is_empty());
        assert!(d.to_remove.is_empty());
        assert_eq!(
            d.to_update,
            vec![
                RoleChange {
                    identity: Identity::from("a"),
                    from: Some(Role::Member),
                    to: Some(Role::Manager),
                },
                RoleChange {
                    identity: Identity::from("b"),
                    from: None,
                    to: Some(Role::Member),
                },
            ]
        );
    }

    #[test]
    fn equal_maps_yield_nothing() {
        let desired = map(&[("a", Some(Role::Member)), ("b", None), ("c", Some(Role::Manager))]);
        assert!(diff(&desired, &desired.clone()).is_empty());
        assert!(diff(&MemberMap::new(), &MemberMap::new()).is_empty());
    }

    /// Exhaustive check of the partition invariants over a small universe.
    #[test]
    fn outputs_partition_the_union() {
        let roles = [None, Some(Role::Member), Some(Role::Manager)];
        let ids = ["a", "b", "c"];
        // Each identity is absent or present with one of three roles: 4 states.
        let states = 4usize;
        let combos = states.pow(ids.len() as u32);

        for d_code in 0..combos {
            for c_code in 0..combos {
                let mut desired = MemberMap::new();
                let mut current = MemberMap::new();
                let (mut dc, mut cc) = (d_code, c_code);
                for id in ids {
                    if dc % states > 0 {
                        desired.insert(Identity::from(id), roles[dc % states - 1]);
                    }
                    if cc % states > 0 {
                        current.insert(Identity::from(id), roles[cc % states - 1]);
                    }
                    dc /= states;
                    cc /= states;
                }

                let out = diff(&desired, &current);
                let add: BTreeSet<_> = out.to_add.iter().map(|(id, _)| id.clone()).collect();
                let remove: BTreeSet<_> = out.to_remove.iter().cloned().collect();
                let update: BTreeSet<_> = out.to_update.iter().map(|c| c.identity.clone()).collect();

                assert_eq!(update.len(), out.to_update.len(), "duplicate role update");
                assert!(add.is_disjoint(&remove));
                assert!(add.is_disjoint(&update));
                assert!(remove.is_disjoint(&update));
                assert!(add.iter().all(|id| !current.contains_key(id)));
                assert!(remove.iter().all(|id| !desired.contains_key(id)));
                for (id, role) in &desired {
                    if let Some(existing) = current.get(id) {
                        assert_eq!(update.contains(id), existing != role);
                    }
                }

                // Applying the diff yields the desired map.
                let mut applied = current.clone();
                for id in &remove {
                    applied.remove(id);
                }
                for (id, role) in &out.to_add {
                    applied.insert(id.clone(), *role);
                }
                for change in &out.to_update {
                    applied.insert(change.identity.clone(), change.to);
                }
                assert_eq!(applied, desired);
            }
        }
    }
}
