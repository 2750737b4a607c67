//! Required-field checks for document-generation payloads.

use std::collections::{BTreeSet, HashSet};

use signflow_types::FormField;
use thiserror::Error;

/// Every required field that was absent or empty, sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required fields: {}", .missing.join(", "))]
pub struct ValidationError {
    pub missing: Vec<String>,
}

/// Checks `filled` against the provider's `requirements`.
///
/// Only fields the provider flags as required are checked. A required field
/// counts as present when some generated field of that name has a non-empty
/// value. The result does not depend on the order of either list.
pub fn validate_required_fields(requirements: &[FormField], filled: &[FormField]) -> Result<(), ValidationError> {
    let present: HashSet<&str> = filled
        .iter()
        .filter(|field| !field.value.is_empty())
        .map(|field| field.name.as_str())
        .collect();

    let missing: BTreeSet<&str> = requirements
        .iter()
        .filter(|field| field.is_required())
        .map(|field| field.name.as_str())
        .filter(|name| !present.contains(name))
        .collect();

    if missing.is_empty() {
        return Ok(());
    }
    Err(ValidationError {
        missing: missing.into_iter().map(str::to_owned).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn required(name: &str) -> FormField {
        FormField {
            name: name.into(),
            value: String::new(),
            required: Some("true".into()),
        }
    }

    fn optional(name: &str) -> FormField {
        FormField {
            name: name.into(),
            value: String::new(),
            required: Some("false".into()),
        }
    }

    #[test]
    fn all_required_fields_present_passes() {
        let requirements = vec![required("vendorName"), required("signerName"), optional("notes")];
        let filled = vec![FormField::filled("vendorName", "Acme"), FormField::filled("signerName", "Jo")];

        assert_eq!(validate_required_fields(&requirements, &filled), Ok(()));
    }

    #[test]
    fn reports_every_missing_field_at_once() {
        let requirements = vec![required("vendorTaxId"), required("vendorName"), required("signerName")];
        let filled = vec![FormField::filled("signerName", "Jo"), FormField::filled("vendorName", "")];

        let error = validate_required_fields(&requirements, &filled).unwrap_err();
        assert_eq!(error.missing, vec!["vendorName", "vendorTaxId"]);
        assert_eq!(error.to_string(), "missing required fields: vendorName, vendorTaxId");
    }

    #[test]
    fn outcome_is_independent_of_field_order() {
        let requirements = vec![required("a"), required("b"), required("c"), optional("d")];
        let filled = vec![FormField::filled("c", "3"), FormField::filled("d", "")];

        let forward = validate_required_fields(&requirements, &filled);
        let mut reversed_requirements = requirements.clone();
        reversed_requirements.reverse();
        let mut reversed_filled = filled.clone();
        reversed_filled.reverse();
        let backward = validate_required_fields(&reversed_requirements, &reversed_filled);

        assert_eq!(forward, backward);
        assert_eq!(forward.unwrap_err().missing, vec!["a", "b"]);
    }

    #[test]
    fn duplicated_requirements_are_reported_once() {
        let requirements = vec![required("vendorName"), required("vendorName")];
        let error = validate_required_fields(&requirements, &[]).unwrap_err();
        assert_eq!(error.missing, vec!["vendorName"]);
    }

    #[test]
    fn unflagged_fields_are_not_required() {
        let requirements = vec![FormField::filled("notes", "")];
        assert!(validate_required_fields(&requirements, &[]).is_ok());
    }
}
