use crate::classify::classify;
use crate::normalize::{HeuristicNormalizer, PathNormalizer};
use crate::types::{Field, FormRecord, SkipReason};
use quick_xml::escape::{resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path};
use std::sync::LazyLock;

pub const XSL_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// Variable every MeF stylesheet uses for the return document.
pub const ROOT_DOCUMENT_REF: &str = "$RtnDoc/";

static TAX_YEAR_DIR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^20\d{2}$").unwrap());
static ENTITY_DECL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<!ENTITY\s+([A-Za-z_][\w.:-]*)\s+(?:"([^"]*)"|'([^']*)')\s*>"#).unwrap()
});

/// An `xsl:param` or `xsl:variable` carrying a `select` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub name: String,
    pub select: String,
}

/// Bindings and every `select` attribute of a document, in document order.
#[derive(Debug, Default)]
pub struct ScannedDocument {
    pub bindings: Vec<Binding>,
    pub selects: Vec<String>,
}

pub struct Analyzer {
    normalizer: Box<dyn PathNormalizer>,
    fallback_year: i32,
}

impl Analyzer {
    pub fn new(fallback_year: i32) -> Self {
        Self::with_normalizer(Box::new(HeuristicNormalizer), fallback_year)
    }

    pub fn with_normalizer(normalizer: Box<dyn PathNormalizer>, fallback_year: i32) -> Self {
        Self {
            normalizer,
            fallback_year,
        }
    }

    pub fn analyze_file(&self, path: &Path) -> Result<FormRecord, SkipReason> {
        let bytes = std::fs::read(path)
            .map_err(|e| SkipReason::Unreadable(format!("{}: {e}", path.display())))?;
        let xml = String::from_utf8(bytes)
            .map_err(|e| SkipReason::NotParseable(format!("not valid UTF-8: {e}")))?;
        self.analyze_document(&xml, path)
    }

    /// Builds the form record for one stylesheet. `location` is where the document is stored;
    /// only its directories are consulted (for the tax year).
    pub fn analyze_document(&self, xml: &str, location: &Path) -> Result<FormRecord, SkipReason> {
        let scanned = scan_document(xml)?;

        let root = find_root_binding(&scanned.bindings).ok_or(SkipReason::NotAFormDocument)?;
        let form_id = derive_form_id(&root.select).ok_or(SkipReason::NotAFormDocument)?;

        let paths: BTreeSet<String> = scanned
            .selects
            .iter()
            .filter_map(|select| self.normalizer.normalize(select, &root.name))
            .collect();

        Ok(FormRecord {
            form_id,
            tax_year: derive_tax_year(location, self.fallback_year),
            fields: assemble_fields(paths),
        })
    }
}

pub fn find_root_binding(bindings: &[Binding]) -> Option<&Binding> {
    bindings
        .iter()
        .find(|binding| binding.select.contains(ROOT_DOCUMENT_REF))
}

/// The first location step after `$RtnDoc/`, without predicates.
// Stops at `/` and any non-name character as well as `[`, so the id is always a single step
// and `<form_id>.json` stays a flat file name; `$RtnDoc/IRS1040/Line1` gives `IRS1040`.
pub fn derive_form_id(select: &str) -> Option<String> {
    let (_, rest) = select.split_once(ROOT_DOCUMENT_REF)?;
    let form_id: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
        .collect();

    if form_id.is_empty() {
        None
    } else {
        Some(form_id)
    }
}

/// First directory named like `20xx`, walking from the root toward the file.
pub fn derive_tax_year(location: &Path, fallback_year: i32) -> i32 {
    let Some(dir) = location.parent() else {
        return fallback_year;
    };

    dir.components()
        .filter_map(|component| match component {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .find(|part| TAX_YEAR_DIR_RE.is_match(part))
        .and_then(|part| part.parse().ok())
        .unwrap_or(fallback_year)
}

pub fn assemble_fields(paths: BTreeSet<String>) -> Vec<Field> {
    paths
        .into_iter()
        .map(|path| {
            let name = path.rsplit('/').next().unwrap_or(&path).to_string();
            let type_ = classify(&name);
            Field { name, path, type_ }
        })
        .collect()
}

pub fn scan_document(xml: &str) -> Result<ScannedDocument, SkipReason> {
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
    let mut reader = NsReader::from_str(xml);
    let mut scanned = ScannedDocument::default();
    let mut entities: HashMap<String, String> = HashMap::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader.read_event().map_err(|e| {
            SkipReason::NotParseable(format!("at byte {}: {e}", reader.error_position()))
        })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                if depth == 0 && seen_root {
                    return Err(SkipReason::NotParseable(
                        "more than one root element".to_string(),
                    ));
                }
                seen_root = true;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
                collect_element(&reader, e, &entities, &mut scanned)?;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::DocType(ref e) => {
                entities = declared_entities(&String::from_utf8_lossy(e));
            }
            Event::Text(ref e) if depth == 0 => {
                if !e.iter().all(u8::is_ascii_whitespace) {
                    return Err(SkipReason::NotParseable(
                        "text outside the root element".to_string(),
                    ));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(SkipReason::NotParseable(
                    "CDATA outside the root element".to_string(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(SkipReason::NotParseable("no root element".to_string()));
    }
    if depth != 0 {
        return Err(SkipReason::NotParseable(format!(
            "{depth} element(s) left unclosed"
        )));
    }

    Ok(scanned)
}

/// General entities from a DOCTYPE internal subset, with character references resolved.
/// Parameter entities and external entities are not expanded.
fn declared_entities(doctype: &str) -> HashMap<String, String> {
    ENTITY_DECL_RE
        .captures_iter(doctype)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_string();
            let raw = caps.get(2).or_else(|| caps.get(3))?.as_str();
            let value = quick_xml::escape::unescape(raw)
                .map(|v| v.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            Some((name, value))
        })
        .collect()
}

fn collect_element(
    reader: &NsReader<&[u8]>,
    e: &BytesStart,
    entities: &HashMap<String, String>,
    scanned: &mut ScannedDocument,
) -> Result<(), SkipReason> {
    let (namespace, local_name) = reader.resolve_element(e.name());
    let is_xsl = match namespace {
        ResolveResult::Bound(Namespace(uri)) => uri == XSL_NAMESPACE.as_bytes(),
        ResolveResult::Unknown(prefix) => {
            return Err(SkipReason::NotParseable(format!(
                "undeclared namespace prefix `{}`",
                String::from_utf8_lossy(&prefix)
            )));
        }
        ResolveResult::Unbound => false,
    };
    let is_binding = is_xsl && matches!(local_name.as_ref(), b"param" | b"variable");

    let mut name = None;
    let mut select = None;
    for attr in e.attributes() {
        let attr =
            attr.map_err(|err| SkipReason::NotParseable(format!("malformed attribute: {err}")))?;
        match attr.key.as_ref() {
            b"select" => select = Some(decode_attr_value(&attr.value, entities)?),
            b"name" if is_binding => name = Some(decode_attr_value(&attr.value, entities)?),
            _ => {}
        }
    }

    let Some(select) = select else {
        return Ok(());
    };
    if let Some(name) = name {
        scanned.bindings.push(Binding {
            name,
            select: select.clone(),
        });
    }
    scanned.selects.push(select);
    Ok(())
}

fn decode_attr_value(
    bytes: &[u8],
    entities: &HashMap<String, String>,
) -> Result<String, SkipReason> {
    let raw = std::str::from_utf8(bytes)
        .map_err(|e| SkipReason::NotParseable(format!("attribute is not UTF-8: {e}")))?;
    unescape_with(raw, |entity| {
        resolve_predefined_entity(entity).or_else(|| entities.get(entity).map(String::as_str))
    })
    .map(|value| value.into_owned())
    .map_err(|e| SkipReason::NotParseable(format!("bad entity in attribute: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeTag;
    use std::path::PathBuf;

    fn stylesheet(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
{body}
</xsl:stylesheet>"#
        )
    }

    #[test]
    fn derives_form_id_from_root_binding() {
        assert_eq!(derive_form_id("$RtnDoc/IRS1040").as_deref(), Some("IRS1040"));
        assert_eq!(
            derive_form_id("$RtnDoc/IRS8949[1]").as_deref(),
            Some("IRS8949")
        );
        assert_eq!(
            derive_form_id("$RtnDoc/IRS1040ScheduleA/Line1").as_deref(),
            Some("IRS1040ScheduleA")
        );
        assert_eq!(derive_form_id("$RtnDoc/[1]"), None);
        assert_eq!(derive_form_id("$Other/IRS1040"), None);
    }

    #[test]
    fn tax_year_comes_from_first_year_directory() {
        let path = PathBuf::from("/tmp/irs_mef_x/2024/mef/Stylesheets/2025/IRS1040.xsl");
        assert_eq!(derive_tax_year(&path, 1999), 2024);
    }

    #[test]
    fn tax_year_ignores_file_name_and_near_misses() {
        let path = PathBuf::from("/tmp/1999/20245/PY2025/2025.xsl");
        assert_eq!(derive_tax_year(&path, 2023), 2023);
    }

    #[test]
    fn root_binding_follows_document_order_across_params_and_variables() {
        let xml = stylesheet(
            r#"<xsl:variable name="First" select="$RtnDoc/IRS1040"/>
               <xsl:param name="Second" select="$RtnDoc/IRS1040ScheduleB"/>"#,
        );
        let scanned = scan_document(&xml).unwrap();
        let root = find_root_binding(&scanned.bindings).unwrap();
        assert_eq!(root.name, "First");
    }

    #[test]
    fn non_xsl_elements_are_not_bindings() {
        let xml = stylesheet(
            r#"<param name="Fake" select="$RtnDoc/IRS1040"/>
               <xsl:template match="/"><xsl:value-of select="$Fake/LineAmt"/></xsl:template>"#,
        );
        let scanned = scan_document(&xml).unwrap();
        assert!(scanned.bindings.is_empty());
        assert_eq!(scanned.selects.len(), 2);
    }

    #[test]
    fn attribute_entities_are_unescaped() {
        let xml = stylesheet(
            r#"<xsl:param name="FormData" select="$RtnDoc/IRS1040"/>
               <xsl:if test="1"><xsl:value-of select="$FormData/LossAmt &lt; 0"/></xsl:if>"#,
        );
        let record = Analyzer::new(2025)
            .analyze_document(&xml, Path::new("2025/IRS1040.xsl"))
            .unwrap();
        assert_eq!(record.fields.len(), 1);
        assert_eq!(record.fields[0].path, "LossAmt");
    }

    #[test]
    fn merges_duplicate_paths_and_sorts_fields() {
        let xml = stylesheet(
            r#"<xsl:param name="FormData" select="$RtnDoc/IRS1040"/>
               <xsl:template match="/">
                 <xsl:value-of select="$FormData/WagesAmt"/>
                 <xsl:value-of select="$FormData/Address[1]/CityNm"/>
                 <xsl:value-of select="$FormData/WagesAmt * -1"/>
                 <xsl:value-of select="$FormData/@SSN"/>
               </xsl:template>"#,
        );
        let record = Analyzer::new(2025)
            .analyze_document(&xml, Path::new("2025/IRS1040.xsl"))
            .unwrap();
        let paths: Vec<_> = record.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["Address/CityNm", "SSN", "WagesAmt"]);
        assert_eq!(record.fields[0].name, "CityNm");
        assert_eq!(record.fields[0].type_, TypeTag::String);
        assert_eq!(record.fields[1].type_, TypeTag::Tin);
    }

    #[test]
    fn unclosed_document_is_not_parseable() {
        let xml = r#"<xsl:stylesheet xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:param name="FormData" select="$RtnDoc/IRS1040"/>"#;
        let err = scan_document(xml).unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");
    }

    #[test]
    fn mismatched_end_tag_is_not_parseable() {
        let err = scan_document("<a><b></a></b>").unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");
    }

    #[test]
    fn undeclared_prefix_is_not_parseable() {
        let err = scan_document(r#"<xsl:stylesheet><xsl:param name="x"/></xsl:stylesheet>"#)
            .unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");
    }

    #[test]
    fn empty_document_is_not_parseable() {
        let err = scan_document("   ").unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");
    }

    #[test]
    fn doctype_entities_in_attributes_are_resolved() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE xsl:stylesheet [
  <!ENTITY nbsp "&#160;">
  <!ENTITY sep '/'>
]>
<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:param name="FormData" select="$RtnDoc/IRS1040"/>
  <xsl:template match="/">
    <xsl:with-param name="Sep" select="'&nbsp;'"/>
    <xsl:value-of select="$FormData/WagesAmt"/>
    <xsl:value-of select="$FormData/FilerAddress&sep;CityNm"/>
    <span>&nbsp;</span>
  </xsl:template>
</xsl:stylesheet>"#;
        let record = Analyzer::new(2025)
            .analyze_document(xml, Path::new("2025/IRS1040.xsl"))
            .unwrap();
        let paths: Vec<_> = record.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["FilerAddress/CityNm", "WagesAmt"]);
    }

    #[test]
    fn declared_entities_resolve_character_references() {
        let entities = declared_entities(r#"html [ <!ENTITY nbsp "&#160;"> <!ENTITY % p "x"> ]"#);
        assert_eq!(entities.get("nbsp").map(String::as_str), Some("\u{a0}"));
        assert_eq!(entities.len(), 1);
    }

    #[test]
    fn undeclared_entity_in_attribute_is_not_parseable() {
        let xml = stylesheet(
            r#"<xsl:param name="FormData" select="$RtnDoc/IRS1040"/>
               <xsl:value-of select="'&nbsp;'"/>"#,
        );
        let err = scan_document(&xml).unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");
    }

    #[test]
    fn text_after_root_is_not_parseable() {
        let xml = format!(
            "{}\ntrailing",
            stylesheet(r#"<xsl:param name="FormData" select="$RtnDoc/IRS1040"/>"#)
        );
        let err = scan_document(&xml).unwrap_err();
        assert_eq!(err.as_str(), "not_parseable");

        let padded = format!(
            "{}\n\n  ",
            stylesheet(r#"<xsl:param name="FormData" select="$RtnDoc/IRS1040"/>"#)
        );
        assert!(scan_document(&padded).is_ok());
    }
}
