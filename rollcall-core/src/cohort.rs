//! Desired-set builder: partition a population into per-value cohorts.
//!
//! Matching is case-insensitive on the trimmed attribute. Any user with at
//! least one direct report, whether declared on the user or implied by
//! someone else's manager attribute, is tagged [`Role::Manager`].

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::slug::{department_value, region_value};
use crate::types::{
    normalize, Cohort, CohortKind, CohortMember, Role, SkipReason, SkippedCohort, UserRecord,
};

/// Value used for the single population-wide cohort.
pub const ALL_COHORT_VALUE: &str = "employees";

/// Builds cohorts over one immutable population.
pub struct CohortBuilder<'a> {
    users: &'a [UserRecord],
    managers: HashSet<String>,
}

impl<'a> CohortBuilder<'a> {
    pub fn new(users: &'a [UserRecord]) -> Self {
        let mut managers = HashSet::new();
        for user in users {
            if user.has_direct_reports() {
                managers.insert(normalize(&user.dn));
            }
            if let Some(manager) = user.manager.as_deref() {
                let dn = normalize(manager);
                if !dn.is_empty() {
                    managers.insert(dn);
                }
            }
        }
        Self { users, managers }
    }

    pub fn role_of(&self, user: &UserRecord) -> Role {
        if self.managers.contains(&normalize(&user.dn)) {
            Role::Manager
        } else {
            Role::Member
        }
    }

    /// Distinct non-empty cohort values for `kind`, sorted.
    ///
    /// For managers the value is the normalized manager DN.
    pub fn values(&self, kind: CohortKind) -> Vec<String> {
        let mut values = BTreeSet::new();
        match kind {
            CohortKind::Department => {
                for user in self.users {
                    values.insert(department_value(&user.department));
                }
            }
            CohortKind::Region => {
                for user in self.users {
                    values.insert(region_value(&user.region));
                }
            }
            CohortKind::Manager => {
                for user in self.users {
                    if let Some(manager) = user.manager.as_deref() {
                        values.insert(normalize(manager));
                    }
                    if user.has_direct_reports() {
                        values.insert(normalize(&user.dn));
                    }
                }
            }
            CohortKind::All => {
                values.insert(ALL_COHORT_VALUE.to_string());
            }
        }
        values.remove("");
        values.into_iter().collect()
    }

    /// Build one cohort per value of `kind`. Cohorts that cannot be formed are
    /// returned as skips rather than as empty cohorts.
    pub fn build(&self, kind: CohortKind) -> Vec<Result<Cohort, SkippedCohort>> {
        self.values(kind)
            .into_iter()
            .map(|value| self.cohort(kind, &value))
            .collect()
    }

    /// Build the cohort for a single value.
    pub fn cohort(&self, kind: CohortKind, value: &str) -> Result<Cohort, SkippedCohort> {
        let cohort = match kind {
            CohortKind::Department | CohortKind::Region => {
                let key = value.trim().to_lowercase();
                let members = self
                    .users
                    .iter()
                    .filter(|user| {
                        let attr = match kind {
                            CohortKind::Department => &user.department,
                            _ => &user.region,
                        };
                        attr.trim().to_lowercase() == key
                    })
                    .map(|user| self.member(user))
                    .collect();
                Cohort {
                    kind,
                    key,
                    value: value.to_string(),
                    display: value.to_string(),
                    members,
                }
            }
            CohortKind::Manager => self.manager_cohort(value)?,
            CohortKind::All => Cohort {
                kind,
                key: ALL_COHORT_VALUE.to_string(),
                value: ALL_COHORT_VALUE.to_string(),
                display: "All Employees".to_string(),
                members: self.users.iter().map(|user| self.member(user)).collect(),
            },
        };

        if cohort.is_empty() {
            return Err(SkippedCohort {
                kind,
                value: value.to_string(),
                reason: SkipReason::NoMembers,
            });
        }
        Ok(cohort)
    }

    /// Manager plus every direct report. The manager is always included.
    fn manager_cohort(&self, manager_dn: &str) -> Result<Cohort, SkippedCohort> {
        let key = normalize(manager_dn);
        let by_dn: HashMap<String, &UserRecord> = self
            .users
            .iter()
            .map(|user| (normalize(&user.dn), user))
            .collect();

        let Some(manager) = by_dn.get(&key).copied() else {
            return Err(SkippedCohort {
                kind: CohortKind::Manager,
                value: manager_dn.to_string(),
                reason: SkipReason::ManagerNotFound,
            });
        };

        let declared: HashSet<String> = manager
            .direct_reports
            .iter()
            .map(|dn| normalize(dn))
            .collect();

        let mut seen = HashSet::from([key.clone()]);
        let mut members = vec![self.member(manager)];
        for user in self.users {
            let dn = normalize(&user.dn);
            let reports_here = user
                .manager
                .as_deref()
                .map(|m| normalize(m) == key)
                .unwrap_or(false);
            if (reports_here || declared.contains(&dn)) && seen.insert(dn) {
                members.push(self.member(user));
            }
        }

        let value = if manager.account_name.trim().is_empty() {
            manager.display_name.clone()
        } else {
            manager.account_name.clone()
        };
        let display = if manager.display_name.trim().is_empty() {
            value.clone()
        } else {
            manager.display_name.clone()
        };

        Ok(Cohort {
            kind: CohortKind::Manager,
            key,
            value,
            display,
            members,
        })
    }

    fn member(&self, user: &UserRecord) -> CohortMember {
        CohortMember {
            user: user.clone(),
            role: self.role_of(user),
        }
    }
}
