use crate::types::{FormIndexEntry, FormRecord, IndexDocument};
use std::collections::BTreeMap;

/// Collects one entry per form id. A later record for the same id replaces the earlier one.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    forms: BTreeMap<String, FormIndexEntry>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry that was replaced, if any.
    pub fn record(&mut self, form: &FormRecord) -> Option<FormIndexEntry> {
        let entry = FormIndexEntry {
            form_id: form.form_id.clone(),
            field_count: form.fields.len(),
            file_reference: form.file_name(),
        };
        self.forms.insert(form.form_id.clone(), entry)
    }

    pub fn build(self, tax_year: i32) -> IndexDocument {
        IndexDocument {
            tax_year,
            form_count: self.forms.len(),
            forms: self.forms,
        }
    }
}
