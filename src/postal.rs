//! Postal code directory used to pre-fill address fields.
//!
//! The directory is a JSON object mapping eight-digit CEPs to addresses. Lookups
//! are best effort: callers log failures and carry on.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::church::Address;
use crate::db::digits_only;
use crate::error::{ServiceError, ServiceResult};
use crate::service::AddressLookup;

#[derive(Debug, Default)]
pub struct PostalDirectory {
    entries: HashMap<String, Address>,
}

impl PostalDirectory {
    /// Load from a file; a missing or malformed file gives an empty directory.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return PostalDirectory::default();
        }
        let parsed = fs::read_to_string(path)
            .map_err(ServiceError::from)
            .and_then(|s| serde_json::from_str::<HashMap<String, Address>>(&s).map_err(ServiceError::from));
        match parsed {
            Ok(raw) => {
                let entries = raw.into_iter().map(|(k, v)| (digits_only(&k), v)).collect();
                PostalDirectory { entries }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "postal directory unavailable");
                PostalDirectory::default()
            }
        }
    }

    pub fn insert(&mut self, zip_code: &str, address: Address) {
        self.entries.insert(digits_only(zip_code), address);
    }
}

impl AddressLookup for PostalDirectory {
    fn lookup(&self, zip_code: &str) -> ServiceResult<Address> {
        let key = digits_only(zip_code);
        if key.len() != 8 {
            return Err(ServiceError::Lookup(format!("'{}' is not an 8-digit CEP", zip_code)));
        }
        debug!(zip = %key, "postal lookup");
        self.entries
            .get(&key)
            .cloned()
            .ok_or_else(|| ServiceError::Lookup(format!("CEP {} not found", zip_code)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_normalises_keys() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("postal_codes.json");
        fs::write(&file, r#"{"01310-100": {"street": "Avenida Paulista", "city": "São Paulo", "state": "SP"}}"#).unwrap();
        let directory = PostalDirectory::load(&file);
        let address = directory.lookup("01310100").unwrap();
        assert_eq!(address.street, "Avenida Paulista");
        assert!(directory.lookup("99999-999").is_err());
        assert!(directory.lookup("123").is_err());
    }

    #[test]
    fn test_malformed_file_is_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("postal_codes.json");
        fs::write(&file, "not json").unwrap();
        assert!(PostalDirectory::load(&file).lookup("01310100").is_err());
    }
}
