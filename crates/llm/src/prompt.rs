//! Prompt construction for the closed-set picker.

use serde::{Deserialize, Serialize};

use crate::picker::PickCandidate;

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// The instruction that pins the model to the closed set and the JSON
/// output shape.
pub(crate) const SYSTEM_PROMPT: &str = "你是故障现象归一化器。只能从候选中选择一个 ID，\
或返回 UNKNOWN。仅输出 JSON：{\"chosen_id\":\"<ID或UNKNOWN>\",\"confidence\":0-1,\
\"reason\":\"<不超过20字>\"}";

/// Truncate to at most `max_chars` characters (not bytes; the texts are
/// mostly CJK).
pub(crate) fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Render the user prompt: the query followed by the numbered candidate
/// list, each candidate truncated before prompting.
pub(crate) fn build_user_prompt(
    query: &str,
    candidates: &[PickCandidate],
    max_query_len: usize,
    max_candidate_len: usize,
) -> String {
    let mut out = format!("用户输入：{}\n\n候选(仅可选其一)：\n", truncate_chars(query, max_query_len));
    for (i, candidate) in candidates.iter().enumerate() {
        let mut line = format!(
            "{}) {{id:\"{}\", text:\"{}\"",
            i + 1,
            candidate.id,
            truncate_chars(&candidate.text, max_candidate_len),
        );
        if let Some(system) = candidate.system.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!(", system:\"{system}\""));
        }
        if let Some(part) = candidate.part.as_deref().filter(|s| !s.is_empty()) {
            line.push_str(&format!(", part:\"{part}\""));
        }
        line.push('}');
        out.push_str(&line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, text: &str) -> PickCandidate {
        PickCandidate {
            id: id.to_string(),
            text: text.to_string(),
            system: None,
            part: None,
        }
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("低速刹车异响", 4), "低速刹车");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn prompt_numbers_candidates_and_truncates() {
        let candidates = vec![
            candidate("P006", "低速刹车时有金属摩擦异响"),
            candidate("P007", "发动机怠速异响"),
        ];
        let prompt = build_user_prompt("车子有异响", &candidates, 200, 6);
        assert!(prompt.contains("1) {id:\"P006\", text:\"低速刹车时有\"}"));
        assert!(prompt.contains("2) {id:\"P007\", text:\"发动机怠速异\"}"));
        assert!(prompt.starts_with("用户输入：车子有异响"));
    }

    #[test]
    fn prompt_includes_facets_when_present() {
        let mut c = candidate("P001", "制动踏板变软");
        c.system = Some("制动".to_string());
        c.part = Some("制动踏板".to_string());
        let prompt = build_user_prompt("q", &[c], 200, 300);
        assert!(prompt.contains("system:\"制动\""));
        assert!(prompt.contains("part:\"制动踏板\""));
    }

    #[test]
    fn roles_serialize_lowercase() {
        let m = Message {
            role: Role::System,
            content: "x".to_string(),
        };
        let v = serde_json::to_value(&m).expect("json");
        assert_eq!(v["role"], "system");
    }
}
