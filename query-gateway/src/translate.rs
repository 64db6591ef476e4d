//! Pure translators from the log and trace query dialects into SQL
//! search statements. No I/O, no shared state; the destination table is
//! the only input beyond the query text.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static LOG_PIPELINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\|([=!~]{1,2})\s*"([^"]*)""#).expect("log pipeline regex"));
static AND_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i) and ").expect("conjunction regex"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("empty logql")]
    EmptyLogQl,
    #[error("invalid selector")]
    InvalidSelector,
    #[error("empty traceql")]
    EmptyTraceQl,
    #[error("must start with FROM")]
    MissingFrom,
    #[error("missing stream")]
    MissingStream,
}

/// Translates `{k=v, k2!=v2} |= "literal" ...` into a SQL search over
/// `table`. Selector pairs match the JSON label map; pipeline segments
/// match the message column.
pub fn translate_logql(query: &str, table: &str) -> Result<String, TranslateError> {
    let mut query = query.trim();
    if query.is_empty() {
        return Err(TranslateError::EmptyLogQl);
    }

    let mut table = sanitize_identifier(table);
    if table.is_empty() {
        table = "logs".to_string();
    }

    let mut conditions = Vec::new();
    if let Some(rest) = query.strip_prefix('{') {
        let Some(close) = rest.find('}') else {
            return Err(TranslateError::InvalidSelector);
        };
        let selector = &rest[..close];
        query = rest[close + 1..].trim();
        for part in selector.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some((key, value)) = part.split_once("!=") {
                conditions.push(format!(
                    "labels->>'{}' <> '{}'",
                    sanitize_identifier(key),
                    escape_value(value)
                ));
            } else if let Some((key, value)) = part.split_once('=') {
                conditions.push(format!(
                    "labels->>'{}' = '{}'",
                    sanitize_identifier(key),
                    escape_value(value)
                ));
            }
        }
    }

    for caps in LOG_PIPELINE.captures_iter(query) {
        let value = escape_value(&caps[2]);
        match &caps[1] {
            "=" => conditions.push(format!("message ILIKE '%{value}%'")),
            "!=" => conditions.push(format!("message NOT ILIKE '%{value}%'")),
            "~" => conditions.push(format!("message ~ '{value}'")),
            "!~" => conditions.push(format!("message !~ '{value}'")),
            _ => {}
        }
    }

    if conditions.is_empty() {
        conditions.push("1=1".to_string());
    }

    Ok(format!(
        "SELECT * FROM {table} WHERE {}",
        conditions.join(" AND ")
    ))
}

/// Translates `FROM <stream> [WHERE a=b AND c>n ...]` into a SQL search
/// over `table`. String operators compare the JSON attribute map;
/// numeric comparisons use the raw identifier.
pub fn translate_traceql(query: &str, table: &str) -> Result<String, TranslateError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(TranslateError::EmptyTraceQl);
    }

    let mut table = sanitize_identifier(table);
    if table.is_empty() {
        table = "traces".to_string();
    }

    let lower = query.to_ascii_lowercase();
    if !lower.starts_with("from") {
        return Err(TranslateError::MissingFrom);
    }

    let mut tokens = query.split_whitespace();
    tokens.next();
    let Some(stream) = tokens.next() else {
        return Err(TranslateError::MissingStream);
    };

    let mut conditions = vec![format!("trace_stream='{}'", escape_value(stream))];

    if let Some(where_idx) = lower.find(" where ") {
        let cond_expr = query[where_idx + 7..].trim();
        if !cond_expr.is_empty() {
            for part in AND_SPLIT.split(cond_expr) {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                if let Some((key, value)) = part.split_once("!=") {
                    conditions.push(format!(
                        "attributes->>'{}' <> '{}'",
                        sanitize_identifier(key),
                        escape_value(value)
                    ));
                } else if let Some((key, value)) = part.split_once('=') {
                    conditions.push(format!(
                        "attributes->>'{}' = '{}'",
                        sanitize_identifier(key),
                        escape_value(value)
                    ));
                } else if let Some((key, value)) = part.split_once('>') {
                    conditions.push(format!("{} > {}", sanitize_identifier(key), value.trim()));
                } else if let Some((key, value)) = part.split_once('<') {
                    conditions.push(format!("{} < {}", sanitize_identifier(key), value.trim()));
                }
            }
        }
    }

    Ok(format!(
        "SELECT * FROM {table} WHERE {}",
        conditions.join(" AND ")
    ))
}

/// Trims, strips quoting, and folds internal spaces to underscores.
fn sanitize_identifier(input: &str) -> String {
    input
        .trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '\''))
        .replace(' ', "_")
}

/// Strips quoting and doubles embedded single quotes.
fn escape_value(input: &str) -> String {
    input
        .trim()
        .trim_matches(|c| matches!(c, '"' | '`' | '\''))
        .replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logql_selector_and_pipeline() {
        let sql = translate_logql(r#"{service="gw"} |= "err""#, "logs").expect("translate");
        assert_eq!(
            sql,
            "SELECT * FROM logs WHERE labels->>'service' = 'gw' AND message ILIKE '%err%'"
        );
    }

    #[test]
    fn logql_inequality_and_negated_pipeline() {
        let sql = translate_logql(r#"{env!="prod"} |!= "debug" |~ "^ERROR""#, "app_logs")
            .expect("translate");
        assert_eq!(
            sql,
            "SELECT * FROM app_logs WHERE labels->>'env' <> 'prod' \
             AND message NOT ILIKE '%debug%' AND message ~ '^ERROR'"
        );
    }

    #[test]
    fn logql_empty_selector_yields_tautology() {
        let sql = translate_logql("{}", "logs").expect("translate");
        assert_eq!(sql, "SELECT * FROM logs WHERE 1=1");
    }

    #[test]
    fn logql_escapes_embedded_quotes() {
        let sql = translate_logql(r#"{service="o'brien"}"#, "logs").expect("translate");
        assert_eq!(sql, "SELECT * FROM logs WHERE labels->>'service' = 'o''brien'");
    }

    #[test]
    fn logql_sanitizes_table_names() {
        let sql = translate_logql("{}", "`my logs`").expect("translate");
        assert_eq!(sql, "SELECT * FROM my_logs WHERE 1=1");
        let sql = translate_logql("{}", "").expect("translate");
        assert_eq!(sql, "SELECT * FROM logs WHERE 1=1");
    }

    #[test]
    fn logql_errors() {
        assert_eq!(translate_logql("", "logs"), Err(TranslateError::EmptyLogQl));
        assert_eq!(
            translate_logql("   ", "logs"),
            Err(TranslateError::EmptyLogQl)
        );
        assert_eq!(
            translate_logql("{service=", "logs"),
            Err(TranslateError::InvalidSelector)
        );
    }

    #[test]
    fn traceql_stream_and_conditions() {
        let sql = translate_traceql(r#"FROM ingest WHERE service="gw" AND duration>100"#, "traces")
            .expect("translate");
        assert_eq!(
            sql,
            "SELECT * FROM traces WHERE trace_stream='ingest' \
             AND attributes->>'service' = 'gw' AND duration > 100"
        );
    }

    #[test]
    fn traceql_keywords_are_case_insensitive() {
        let sql = translate_traceql("from ingest where env!=prod and latency<50", "traces")
            .expect("translate");
        assert_eq!(
            sql,
            "SELECT * FROM traces WHERE trace_stream='ingest' \
             AND attributes->>'env' <> 'prod' AND latency < 50"
        );
    }

    #[test]
    fn traceql_without_where_selects_stream_only() {
        let sql = translate_traceql("FROM checkout", "traces").expect("translate");
        assert_eq!(sql, "SELECT * FROM traces WHERE trace_stream='checkout'");
    }

    #[test]
    fn traceql_errors() {
        assert_eq!(
            translate_traceql("", "traces"),
            Err(TranslateError::EmptyTraceQl)
        );
        assert_eq!(
            translate_traceql("SELECT * FROM traces", "traces"),
            Err(TranslateError::MissingFrom)
        );
        assert_eq!(
            translate_traceql("FROM", "traces"),
            Err(TranslateError::MissingStream)
        );
    }

    #[test]
    fn translators_are_deterministic() {
        let query = r#"{service="gw"} |= "err""#;
        assert_eq!(
            translate_logql(query, "logs"),
            translate_logql(query, "logs")
        );
        let query = "FROM ingest WHERE duration>100";
        assert_eq!(
            translate_traceql(query, "traces"),
            translate_traceql(query, "traces")
        );
    }
}
