use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic type inferred from a field's naming convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeTag {
    Usd,
    Bool,
    Enum,
    String,
    Int,
    Date,
    Tin,
    Ein,
    Decimal,
    Group,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub type_: TypeTag,
}

/// Everything extracted from one form stylesheet. Fields are unique by path and sorted by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRecord {
    pub form_id: String,
    pub tax_year: i32,
    pub fields: Vec<Field>,
}

impl FormRecord {
    pub fn file_name(&self) -> String {
        form_file_name(&self.form_id)
    }
}

pub fn form_file_name(form_id: &str) -> String {
    format!("{form_id}.json")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormIndexEntry {
    #[serde(skip)]
    pub form_id: String,
    pub field_count: usize,
    #[serde(rename = "file")]
    pub file_reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDocument {
    pub tax_year: i32,
    pub form_count: usize,
    pub forms: BTreeMap<String, FormIndexEntry>,
}

/// Why a stylesheet produced no form record. None of these abort a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Unreadable(String),
    NotParseable(String),
    NotAFormDocument,
}

impl SkipReason {
    pub fn as_str(&self) -> &str {
        match self {
            SkipReason::Unreadable(_) => "unreadable",
            SkipReason::NotParseable(_) => "not_parseable",
            SkipReason::NotAFormDocument => "not_a_form_stylesheet",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            SkipReason::Unreadable(detail) | SkipReason::NotParseable(detail) => Some(detail),
            SkipReason::NotAFormDocument => None,
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail() {
            Some(detail) => write!(f, "{}: {}", self.as_str(), detail),
            None => f.write_str(self.as_str()),
        }
    }
}
