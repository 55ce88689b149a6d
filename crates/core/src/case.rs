//! Fault case records and the knowledge-base loader.
//!
//! The knowledge base is a JSONL file with one case per line (a whole JSON
//! array is also accepted). Upstream ingestion attaches arbitrary extra
//! fields; those are preserved verbatim in `extra` and never interpreted.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A record in the fault-case knowledge base.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultCase {
    /// Stable unique identifier (primary key)
    pub id: String,

    /// Normalized free-text fault description
    #[serde(default)]
    pub text: String,

    /// Structured facet: vehicle system (制动 / 发动机 / ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    /// Structured facet: affected part
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicletype: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub faultcode: Option<String>,

    /// Non-negative prior-likelihood proxy
    #[serde(default)]
    pub popularity: f64,

    /// Raw payload fields preserved verbatim from upstream ingestion
    #[serde(flatten, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FaultCase {
    /// A case is retrievable only when it carries non-empty text.
    pub fn is_retrievable(&self) -> bool {
        !self.id.is_empty() && !self.text.trim().is_empty()
    }
}

/// Load fault cases from a JSONL file (or a whole JSON array).
///
/// Blank lines are skipped. A malformed line is a hard error carrying the
/// line number, so broken exports fail loudly at startup instead of silently
/// shrinking the knowledge base. Cases without id or text are dropped.
pub fn load_cases(path: impl AsRef<Path>) -> Result<Vec<FaultCase>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)?;
    // Strip a UTF-8 BOM some exporters prepend
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let mut cases: Vec<FaultCase> = Vec::new();

    if raw.trim_start().starts_with('[') {
        cases = serde_json::from_str(raw)
            .map_err(|e| Error::Data(format!("{}: not a valid JSON array: {e}", path.display())))?;
    } else {
        for (lineno, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let case: FaultCase = serde_json::from_str(line).map_err(|e| {
                Error::Data(format!(
                    "{}:{}: not valid JSON: {e}",
                    path.display(),
                    lineno + 1
                ))
            })?;
            cases.push(case);
        }
    }

    cases.retain(FaultCase::is_retrievable);
    if cases.is_empty() {
        return Err(Error::Data(format!(
            "{}: no retrievable cases",
            path.display()
        )));
    }
    Ok(cases)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().expect("tempfile");
        f.write_all(content.as_bytes()).expect("write");
        f
    }

    #[test]
    fn loads_jsonl_and_skips_blank_lines() {
        let f = write_temp(
            "{\"id\":\"P001\",\"text\":\"制动踏板变软\",\"system\":\"制动\",\"popularity\":120}\n\
             \n\
             {\"id\":\"P002\",\"text\":\"发动机怠速异响\"}\n",
        );
        let cases = load_cases(f.path()).expect("load");
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].id, "P001");
        assert_eq!(cases[0].system.as_deref(), Some("制动"));
        assert_eq!(cases[0].popularity, 120.0);
    }

    #[test]
    fn loads_json_array() {
        let f = write_temp(r#"[{"id":"A","text":"t1"},{"id":"B","text":"t2"}]"#);
        let cases = load_cases(f.path()).expect("load");
        assert_eq!(cases.len(), 2);
    }

    #[test]
    fn preserves_unknown_fields() {
        let f = write_temp("{\"id\":\"P1\",\"text\":\"x\",\"searchNum\":42,\"solution\":\"更换\"}\n");
        let cases = load_cases(f.path()).expect("load");
        assert_eq!(cases[0].extra["searchNum"], 42);
        assert_eq!(cases[0].extra["solution"], "更换");
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let f = write_temp("{\"id\":\"P1\",\"text\":\"ok\"}\n{broken\n");
        let err = load_cases(f.path()).unwrap_err();
        assert!(err.to_string().contains(":2:"), "got: {err}");
    }

    #[test]
    fn drops_cases_without_text() {
        let f = write_temp("{\"id\":\"P1\",\"text\":\"ok\"}\n{\"id\":\"P2\",\"text\":\"  \"}\n");
        let cases = load_cases(f.path()).expect("load");
        assert_eq!(cases.len(), 1);
    }
}
