//! Document-generation field payloads.
//!
//! A [`TemplateFieldRequest`] is built once per run from caller-supplied
//! parameters. The fill-fields activity stamps the provider's document id into
//! it and turns it into the provider-facing [`FormFieldsRequest`]. Supporting a
//! new template means adding a variant here together with its field list.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Template families the orchestrator knows how to populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Nda,
}

impl TemplateKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nda => "nda",
        }
    }
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied field values, tagged by template kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum TemplateFieldRequest {
    Nda(NdaTemplateFields),
}

impl TemplateFieldRequest {
    pub fn kind(&self) -> TemplateKind {
        match self {
            Self::Nda(_) => TemplateKind::Nda,
        }
    }

    /// Records the provider-assigned document id the fields belong to.
    pub fn stamp_document_id(&mut self, document_id: impl Into<String>) {
        match self {
            Self::Nda(fields) => fields.document_id = Some(document_id.into()),
        }
    }

    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::Nda(fields) => fields.document_id.as_deref(),
        }
    }

    /// Produces the provider-facing field list for the stamped document.
    ///
    /// An unstamped request produces a document entry with an empty id, which
    /// the provider rejects; callers stamp first.
    pub fn form_fields(&self) -> FormFieldsRequest {
        let (document_id, fields) = match self {
            Self::Nda(nda) => (nda.document_id.clone().unwrap_or_default(), nda.field_list()),
        };
        FormFieldsRequest {
            documents: vec![DocumentFields { document_id, fields }],
        }
    }
}

/// Field values for the mutual NDA template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NdaTemplateFields {
    pub vendor_name: String,
    pub signer_name: String,
    #[serde(rename = "vendorTaxId")]
    pub vendor_tax_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

impl NdaTemplateFields {
    fn field_list(&self) -> Vec<FormField> {
        vec![
            FormField::filled("vendorName", &self.vendor_name),
            FormField::filled("signerName", &self.signer_name),
            FormField::filled("vendorTaxId", &self.vendor_tax_id),
        ]
    }
}

/// A single document-generation form field.
///
/// The provider encodes `required` as the strings `"true"` / `"false"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormField {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<String>,
}

impl FormField {
    pub fn filled(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            required: None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.required.as_deref().is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true"))
    }
}

/// Field list for one document of an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFields {
    #[serde(rename = "documentId")]
    pub document_id: String,
    #[serde(rename = "docGenFormFieldList", default)]
    pub fields: Vec<FormField>,
}

/// Body of the provider's `docGenFormFields` read and write endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFieldsRequest {
    #[serde(rename = "docGenFormFields", default)]
    pub documents: Vec<DocumentFields>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn nda() -> TemplateFieldRequest {
        TemplateFieldRequest::Nda(NdaTemplateFields {
            vendor_name: "Acme".into(),
            signer_name: "Jo".into(),
            vendor_tax_id: "123".into(),
            document_id: None,
        })
    }

    #[test]
    fn request_uses_type_and_data_envelope() {
        let value = serde_json::to_value(nda()).unwrap();
        assert_eq!(
            value,
            json!({"type": "nda", "data": {"vendorName": "Acme", "signerName": "Jo", "vendorTaxId": "123"}})
        );
    }

    #[test]
    fn stamped_request_generates_provider_field_list() {
        let mut request = nda();
        request.stamp_document_id("doc-1");

        let generated = serde_json::to_value(request.form_fields()).unwrap();
        assert_eq!(
            generated,
            json!({
                "docGenFormFields": [{
                    "documentId": "doc-1",
                    "docGenFormFieldList": [
                        {"name": "vendorName", "value": "Acme"},
                        {"name": "signerName", "value": "Jo"},
                        {"name": "vendorTaxId", "value": "123"}
                    ]
                }]
            })
        );
    }

    #[test]
    fn required_flag_is_parsed_from_string() {
        let fields: FormFieldsRequest = serde_json::from_value(json!({
            "docGenFormFields": [{
                "documentId": "1",
                "docGenFormFieldList": [
                    {"name": "vendorName", "required": "true", "type": "TextBox"},
                    {"name": "notes", "required": "false"},
                    {"name": "extra"}
                ]
            }]
        }))
        .unwrap();

        let required: Vec<_> = fields.documents[0].fields.iter().filter(|field| field.is_required()).map(|field| field.name.as_str()).collect();
        assert_eq!(required, vec!["vendorName"]);
    }
}
