//! Population files.
//!
//! A population file is a YAML document with a top-level `users` list; each
//! entry deserializes into a [`UserRecord`]:
//!
//! ```yaml
//! users:
//!   - dn: CN=Ann Lee,OU=Staff,DC=corp,DC=test
//!     email: ann@corp.test
//!     account_name: alee
//!     display_name: Ann Lee
//!     department: Sales
//!     region: TX
//!     manager: CN=Bo Diaz,OU=Staff,DC=corp,DC=test
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};
use crate::types::{UserFilter, UserRecord};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Population {
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

impl Population {
    /// Users that pass `filter`, in file order.
    pub fn filtered(&self, filter: &UserFilter) -> Vec<UserRecord> {
        self.users
            .iter()
            .filter(|user| filter.matches(user))
            .cloned()
            .collect()
    }
}

/// Read a population file. A missing file is an error; an empty file is an
/// empty population.
pub fn load_population(path: &Path) -> Result<Population, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::PopulationNotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    if contents.trim().is_empty() {
        return Ok(Population::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_and_filters() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("people.yaml");
        std::fs::write(
            &path,
            r#"
users:
  - dn: CN=Ann,OU=Staff
    email: ann@corp.test
    department: Sales
  - dn: CN=Old,OU=Archived Users
    email: old@corp.test
  - dn: CN=Off,OU=Staff
    email: off@corp.test
    enabled: false
  - dn: CN=NoMail,OU=Staff
"#,
        )
        .unwrap();

        let population = load_population(&path).expect("load");
        assert_eq!(population.users.len(), 4);
        let kept = population.filtered(&UserFilter::default());
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].dn, "CN=Ann,OU=Staff");
        assert!(kept[0].enabled);
    }

    #[test]
    fn missing_population_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load_population(&dir.path().join("none.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::PopulationNotFound { .. }));
    }

    #[test]
    fn empty_file_is_empty_population() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert!(load_population(&path).unwrap().users.is_empty());
    }
}
