//! Query normalization.
//!
//! Canonicalizes user queries before retrieval: width folding, whitespace
//! collapse, ASCII lowercasing, and fixed abbreviation / misspelling tables.
//! The function is deterministic and idempotent, so normalized text can be
//! fed back through without changing.

use once_cell::sync::Lazy;
use regex::Regex;

/// Romanized misspellings of common domain terms, mapped to the canonical
/// Chinese form. Longer keys are listed before their prefixes so plain
/// string replacement stays unambiguous.
static MISSPELLINGS: &[(&str, &str)] = &[
    ("fa men", "阀门"),
    ("famen", "阀门"),
    ("you yi xiang", "有异响"),
    ("youyixiang", "有异响"),
    ("sha che", "刹车"),
    ("shache", "刹车"),
];

/// ASCII abbreviations mapped to their canonical uppercase form.
/// Matched on word boundaries only, so fragments inside longer
/// alphanumerics are left alone.
static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        ("abs", "ABS"),
        ("esp", "ESP"),
        ("epb", "EPB"),
        ("ecu", "ECU"),
        ("eps", "EPS"),
        ("dpf", "DPF"),
    ]
    .iter()
    .map(|(k, v)| {
        let re = Regex::new(&format!(r"\b{k}\b")).expect("abbreviation pattern is valid");
        (re, *v)
    })
    .collect()
});

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// OBD-style diagnostic trouble codes (P0420, U0100, ...), canonicalized to
/// uppercase so they survive the ASCII lowercasing step.
static FAULT_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([pbcu])(\d{4})\b").expect("fault code pattern"));

/// Map fullwidth ASCII and ideographic spaces to their halfwidth forms.
fn fullwidth_to_halfwidth(s: &str) -> String {
    s.chars()
        .map(|ch| match ch as u32 {
            0x3000 => ' ',
            code @ 0xFF01..=0xFF5E => {
                char::from_u32(code - 0xFEE0).unwrap_or(ch)
            }
            _ => ch,
        })
        .collect()
}

/// Canonicalize a query string.
///
/// `normalize_query(normalize_query(q)) == normalize_query(q)` for any input.
pub fn normalize_query(q: &str) -> String {
    let q = fullwidth_to_halfwidth(q.trim());
    let q = WHITESPACE.replace_all(&q, " ");

    // Lowercase ASCII only; CJK text is untouched
    let mut out: String = q
        .chars()
        .map(|ch| {
            if ch.is_ascii() {
                ch.to_ascii_lowercase()
            } else {
                ch
            }
        })
        .collect();

    for (wrong, right) in MISSPELLINGS {
        out = out.replace(wrong, right);
    }
    for (re, canonical) in ABBREVIATIONS.iter() {
        out = re.replace_all(&out, *canonical).into_owned();
    }
    out = FAULT_CODE
        .replace_all(&out, |caps: &regex::Captures| {
            format!("{}{}", caps[1].to_ascii_uppercase(), &caps[2])
        })
        .into_owned();

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_and_collapses_whitespace() {
        assert_eq!(normalize_query("  刹车  发软\t异响 "), "刹车 发软 异响");
    }

    #[test]
    fn folds_fullwidth_characters() {
        assert_eq!(normalize_query("ＡＢＳ 灯亮"), "ABS 灯亮");
        assert_eq!(normalize_query("刹车　异响"), "刹车 异响");
    }

    #[test]
    fn expands_abbreviations_on_word_boundaries() {
        assert_eq!(normalize_query("abs 灯亮"), "ABS 灯亮");
        assert_eq!(normalize_query("Esp report"), "ESP report");
        // no boundary, no replacement
        assert_eq!(normalize_query("absolutely"), "absolutely");
    }

    #[test]
    fn fixes_common_misspellings() {
        assert_eq!(normalize_query("famen 漏气"), "阀门 漏气");
        assert_eq!(normalize_query("车子 youyixiang"), "车子 有异响");
    }

    #[test]
    fn canonicalizes_fault_codes() {
        assert_eq!(normalize_query("报 p0420 故障码"), "报 P0420 故障码");
        // five-digit token is not a DTC
        assert_eq!(normalize_query("p04201"), "p04201");
    }

    #[test]
    fn is_idempotent() {
        for q in [
            "  ＡＢＳ famen 刹车发软  p0420 ",
            "you yi xiang",
            "普通中文查询",
            "",
        ] {
            let once = normalize_query(q);
            assert_eq!(normalize_query(&once), once, "not idempotent for {q:?}");
        }
    }

    #[test]
    fn empty_stays_empty() {
        assert_eq!(normalize_query("   "), "");
    }
}
