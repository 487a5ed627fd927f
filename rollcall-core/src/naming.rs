//! Group descriptor derivation.
//!
//! A descriptor is a pure function of (cohort kind, cohort value, naming
//! templates, email domain). Two runs over the same population always
//! resolve to the same group names and addresses.

use crate::config::NamingConfig;
use crate::slug::slug;
use crate::types::{Cohort, CohortKind, GroupDescriptor, SkipReason, SkippedCohort};

/// Derive the descriptor for `cohort`.
///
/// Fails with [`SkipReason::EmptySlug`] when the name template needs a slug
/// and the cohort value produces none.
pub fn describe(
    cohort: &Cohort,
    naming: &NamingConfig,
    email_domain: &str,
) -> Result<GroupDescriptor, SkippedCohort> {
    describe_value(cohort.kind, &cohort.value, &cohort.display, naming, email_domain)
}

/// Same as [`describe`] but from raw parts; used by the `plan` and `slug` commands.
pub fn describe_value(
    kind: CohortKind,
    value: &str,
    display: &str,
    naming: &NamingConfig,
    email_domain: &str,
) -> Result<GroupDescriptor, SkippedCohort> {
    let template = naming.template(kind);
    let slug = slug(value);
    if slug.is_empty() && template.name.contains("{slug}") {
        return Err(SkippedCohort {
            kind,
            value: value.to_string(),
            reason: SkipReason::EmptySlug,
        });
    }

    let name = expand(&template.name, &slug, display);
    let label = expand(&template.label, &slug, display);
    let domain = email_domain.trim().trim_start_matches('@').to_lowercase();

    Ok(GroupDescriptor {
        kind,
        value: value.to_string(),
        address: format!("{name}@{domain}"),
        description: format!("{label} distribution group"),
        slug,
        name,
        label,
    })
}

fn expand(template: &str, slug: &str, value: &str) -> String {
    template.replace("{slug}", slug).replace("{value}", value)
}
