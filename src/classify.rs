use crate::types::TypeTag;

/// Suffix table checked top to bottom; the first match wins.
pub const SUFFIX_TYPES: &[(&str, TypeTag)] = &[
    ("Amt", TypeTag::Usd),
    ("Ind", TypeTag::Bool),
    ("Cd", TypeTag::Enum),
    ("Txt", TypeTag::String),
    ("Nm", TypeTag::String),
    ("Desc", TypeTag::String),
    ("Cnt", TypeTag::Int),
    ("Num", TypeTag::String),
    ("Dt", TypeTag::Date),
    ("SSN", TypeTag::Tin),
    ("EIN", TypeTag::Ein),
    ("PIN", TypeTag::String),
    ("Pct", TypeTag::Decimal),
    ("Rt", TypeTag::Decimal),
    ("Grp", TypeTag::Group),
];

pub fn classify(name: &str) -> TypeTag {
    SUFFIX_TYPES
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix))
        .map(|(_, tag)| *tag)
        .unwrap_or(TypeTag::Unknown)
}
