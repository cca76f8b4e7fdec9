//! Map an object key to the rules of the source it belongs to.
//!
//! Two lookups: the routing record stored under the key's directory, then the rules record
//! of the first routing entry whose pattern matches the file name.

use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::rules::{RoutingRecord, RuleDescriptor};
use crate::store::RuleStore;

/// A file whose source and rules are known.
#[derive(Debug, Clone)]
pub struct ResolvedFile {
    /// Directory part of the object key.
    pub document_key: String,
    /// Last segment of the object key.
    pub file_name: String,
    /// Source identity the file was routed to.
    pub district_key: String,
    pub output_base_file_name: String,
    pub descriptor: RuleDescriptor,
}

#[derive(Debug, Clone)]
pub enum Resolution {
    Resolved(ResolvedFile),
    /// No routing record, or no entry matching the file name.
    Unresolved { document_key: String, file_name: String },
}

/// Split `dir/sub/file.csv` into (`dir/sub`, `file.csv`). Keys without `/` have an empty
/// directory.
pub fn split_object_key(key: &str) -> (&str, &str) {
    key.rsplit_once('/').unwrap_or(("", key))
}

/// Resolve the rules for `object_key`.
pub fn resolve_rules(store: &dyn RuleStore, object_key: &str) -> IngestionResult<Resolution> {
    let (document_key, file_name) = split_object_key(object_key);
    let unresolved = || Resolution::Unresolved {
        document_key: document_key.to_string(),
        file_name: file_name.to_string(),
    };

    let Some(record) = store.get(document_key)? else {
        debug!(document_key, "no routing record");
        return Ok(unresolved());
    };
    let routing = RoutingRecord::from_record(document_key, record)?;
    let Some(entry) = routing.route(file_name) else {
        debug!(document_key, file_name, "no routing entry matches");
        return Ok(unresolved());
    };

    let district_key = entry.district_key.clone();
    let record = store
        .get(&district_key)?
        .ok_or_else(|| IngestionError::InvalidRules {
            key: district_key.clone(),
            message: format!("routed from '{document_key}' but no rules record exists"),
        })?;
    let descriptor = RuleDescriptor::from_record(&district_key, record)?;
    debug!(document_key, file_name, district_key = %district_key, "resolved rules");

    Ok(Resolution::Resolved(ResolvedFile {
        document_key: document_key.to_string(),
        file_name: file_name.to_string(),
        district_key,
        output_base_file_name: entry.output_base_file_name.clone(),
        descriptor,
    }))
}
