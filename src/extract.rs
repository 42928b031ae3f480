//! SQL extraction from model output
//!
//! Grammar accepted, anywhere in the response:
//!
//! ```text
//! "```sql" [spaces or tabs] newline  BODY  "```"
//! ```
//!
//! The tag is matched case-insensitively and must be exactly `sql`
//! (`sqlite`, `sql2` and untagged fences do not count). The first matching
//! block wins; later blocks are ignored, and nothing checks that the first
//! block is the final query rather than an example quoted in the
//! explanation. The body is returned trimmed and is not validated as SQL.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

use crate::{QueryBotError, Result};

fn sql_fence() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?is)```sql[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

/// Extract the first fenced SQL block from `llm_text`
pub fn extract_sql(llm_text: &str) -> Result<String> {
    let captures = sql_fence().captures(llm_text).ok_or_else(|| {
        QueryBotError::ExtractionFailure("no ```sql fenced block in the response".to_string())
    })?;

    let sql = captures
        .get(1)
        .map(|m| m.as_str().trim())
        .unwrap_or_default();
    if sql.is_empty() {
        return Err(QueryBotError::ExtractionFailure(
            "the ```sql fenced block is empty".to_string(),
        ));
    }

    let blocks = sql_fence().find_iter(llm_text).count();
    if blocks > 1 {
        debug!("Response holds {} SQL blocks; using the first", blocks);
    }
    info!("Extracted SQL query: {}", sql);
    Ok(sql.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_single_block() {
        let text = "1. Objective: list rows\n\n```sql\nSELECT * FROM people;\n```\n5. Explanation";
        assert_eq!(extract_sql(text).unwrap(), "SELECT * FROM people;");
    }

    #[test]
    fn test_extract_trims_and_keeps_inner_lines() {
        let text = "```sql\n\n  SELECT a,\n         b\n  FROM t\n\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT a,\n         b\n  FROM t");
    }

    #[test]
    fn test_extract_first_of_many() {
        let text = "```sql\nSELECT 1;\n```\nthen\n```sql\nSELECT 2;\n```";
        assert_eq!(extract_sql(text).unwrap(), "SELECT 1;");
    }

    #[test]
    fn test_extract_tag_case_and_trailing_space() {
        assert_eq!(extract_sql("```SQL  \nSELECT 1\n```").unwrap(), "SELECT 1");
        assert_eq!(extract_sql("```sql\r\nSELECT 1\r\n```").unwrap(), "SELECT 1");
    }

    #[test]
    fn test_extract_rejects_other_fences() {
        for text in [
            "SELECT * FROM t;",
            "```\nSELECT 1\n```",
            "```sqlite\nSELECT 1\n```",
            "```python\nprint(1)\n```",
            "```sql SELECT 1```",
        ] {
            let err = extract_sql(text).unwrap_err();
            assert!(
                matches!(err, QueryBotError::ExtractionFailure(_)),
                "{:?} should not extract",
                text
            );
        }
    }

    #[test]
    fn test_extract_rejects_empty_block() {
        assert!(matches!(
            extract_sql("```sql\n   \n```").unwrap_err(),
            QueryBotError::ExtractionFailure(_)
        ));
    }

    #[test]
    fn test_extract_unterminated_block() {
        assert!(extract_sql("```sql\nSELECT 1;\n").is_err());
    }
}
