use serde_json::{Value, json};

/// Why a candidate statement was refused by the read-only check.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardrailViolation {
    pub message: String,
    pub details: Value,
}

/// Accepts exactly one SELECT, WITH ... SELECT or EXPLAIN ... SELECT
/// statement. Keywords inside string literals and comments are ignored.
pub fn validate_read_only_sql(raw_sql: &str) -> Result<(), GuardrailViolation> {
    let masked = mask_literals_and_comments(raw_sql);
    let candidate = strip_trailing_semicolons(&masked);
    if candidate.is_empty() {
        return Err(violation(
            "SQL statement is empty",
            json!({"reason": "empty_statement"}),
        ));
    }

    if candidate.contains(';') {
        return Err(violation(
            "multiple statements are not allowed; submit exactly one read-only statement",
            json!({"reason": "multi_statement"}),
        ));
    }

    let normalized = candidate.to_ascii_lowercase();
    if let Some(keyword) = first_mutating_keyword(&normalized) {
        return Err(violation(
            format!("mutating SQL keyword `{keyword}` is not allowed"),
            json!({"reason": "mutating_statement", "detected_keyword": keyword}),
        ));
    }

    let words = words(&normalized);
    let leading = words.iter().take(4).map(|word| word.text).collect::<Vec<_>>();
    let allowed = match leading.as_slice() {
        ["select", ..] | ["explain", "select", ..] => true,
        ["explain", "query", "plan", "select", ..] => true,
        ["with", ..] => true,
        _ => false,
    };
    if !allowed {
        let leading_keyword = leading.first().copied().unwrap_or("unknown");
        return Err(violation(
            "only SELECT, WITH ... SELECT and EXPLAIN ... SELECT statements are allowed",
            json!({"reason": "unsupported_statement", "leading_keyword": leading_keyword}),
        ));
    }

    if leading.first() == Some(&"with") {
        let verb = main_statement_verb(&words);
        if verb != Some("select") {
            return Err(violation(
                "a WITH clause must be followed by a SELECT",
                json!({
                    "reason": "unsupported_statement",
                    "leading_keyword": "with",
                    "statement_keyword": verb.unwrap_or("unknown")
                }),
            ));
        }
    }

    Ok(())
}

fn strip_trailing_semicolons(sql: &str) -> &str {
    let mut candidate = sql.trim();
    while let Some(stripped) = candidate.strip_suffix(';') {
        candidate = stripped.trim_end();
    }
    candidate
}

/// Blanks out `'...'` literals, quoted identifiers (`"..."`, `` `...` ``,
/// `[...]`), `-- ...` and `/* ... */` comments so that their content cannot
/// trip the keyword scan.
fn mask_literals_and_comments(sql: &str) -> String {
    let mut masked = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\'' | '"' | '`' => {
                masked.push(ch);
                masked.push(ch);
                while let Some(inner) = chars.next() {
                    if inner == ch {
                        if chars.peek() == Some(&ch) {
                            chars.next();
                            continue;
                        }
                        break;
                    }
                }
            }
            '[' => {
                masked.push_str("[]");
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                }
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        masked.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut previous = '\0';
                for inner in chars.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
                masked.push(' ');
            }
            other => masked.push(other),
        }
    }
    masked
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Word<'a> {
    text: &'a str,
    depth: usize,
    /// Next non-blank character after the word, if any.
    next: Option<char>,
}

/// Splits masked SQL into identifier-like words, recording the parenthesis
/// depth each word sits at.
fn words(normalized_sql: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    for (index, ch) in normalized_sql.char_indices() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            start.get_or_insert(index);
            continue;
        }
        if let Some(begin) = start.take() {
            words.push(word_at(normalized_sql, begin, index, depth));
        }
        match ch {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    if let Some(begin) = start {
        words.push(word_at(normalized_sql, begin, normalized_sql.len(), depth));
    }
    words
}

fn word_at(sql: &str, begin: usize, end: usize, depth: usize) -> Word<'_> {
    Word {
        text: &sql[begin..end],
        depth,
        next: sql[end..].chars().find(|ch| !ch.is_whitespace()),
    }
}

fn first_mutating_keyword(normalized_sql: &str) -> Option<String> {
    const MUTATING_KEYWORDS: &[&str] = &[
        "insert", "update", "delete", "create", "alter", "drop", "replace", "truncate", "attach",
        "detach", "pragma", "vacuum", "reindex", "analyze", "begin", "commit", "rollback",
        "savepoint",
    ];

    words(normalized_sql).into_iter().find_map(|word| {
        // `replace(x, y, z)` is the scalar string function.
        let is_call = word.text == "replace" && word.next == Some('(');
        (MUTATING_KEYWORDS.contains(&word.text) && !is_call).then(|| word.text.to_string())
    })
}

/// The verb that follows the CTE list of a `WITH` statement.
fn main_statement_verb<'a>(words: &[Word<'a>]) -> Option<&'a str> {
    const STATEMENT_VERBS: &[&str] = &["select", "values", "insert", "update", "delete", "replace"];

    words
        .iter()
        .filter(|word| word.depth == 0)
        .map(|word| word.text)
        .find(|text| STATEMENT_VERBS.contains(text))
}

fn violation(message: impl Into<String>, details: Value) -> GuardrailViolation {
    GuardrailViolation {
        message: message.into(),
        details: json!({
            "allowed_forms": [
                "SELECT ...",
                "WITH ... SELECT ...",
                "EXPLAIN SELECT ...",
                "EXPLAIN QUERY PLAN SELECT ..."
            ],
            "guardrail": "read_only_sql_single_statement",
            "violation": details
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::validate_read_only_sql;

    #[test]
    fn plain_selects_and_ctes_pass() {
        validate_read_only_sql("SELECT 1;").expect("select passes");
        validate_read_only_sql(
            "WITH totals AS (SELECT category, SUM(amount) AS total FROM sales GROUP BY category) SELECT * FROM totals",
        )
        .expect("cte passes");
        validate_read_only_sql("EXPLAIN QUERY PLAN SELECT * FROM sales").expect("explain passes");
    }

    #[test]
    fn keywords_inside_literals_and_comments_are_ignored() {
        validate_read_only_sql("SELECT * FROM notes WHERE body = 'please delete me' -- drop later")
            .expect("literal keywords are ignored");
        validate_read_only_sql("SELECT replace(name, 'a', 'b') FROM products")
            .expect("replace() is a scalar function");
    }

    #[test]
    fn mutating_statements_are_rejected() {
        let violation = validate_read_only_sql("DROP TABLE sales").expect_err("drop is refused");
        assert_eq!(violation.details["violation"]["detected_keyword"], "drop");

        let violation =
            validate_read_only_sql("WITH c AS (SELECT 1 AS a) REPLACE INTO sales SELECT * FROM c")
                .expect_err("cte-prefixed replace is refused");
        assert_eq!(violation.details["violation"]["detected_keyword"], "replace");

        let violation = validate_read_only_sql("REPLACE INTO sales (id) VALUES (1)")
            .expect_err("bare replace is refused");
        assert_eq!(violation.details["violation"]["reason"], "mutating_statement");

        let violation =
            validate_read_only_sql("SELECT 1; DELETE FROM sales").expect_err("chain is refused");
        assert_eq!(violation.details["violation"]["reason"], "multi_statement");
    }

    #[test]
    fn quoted_identifiers_are_not_keywords() {
        validate_read_only_sql(r#"SELECT "update", `begin`, [delete] FROM audit"#)
            .expect("quoted identifiers pass");
        validate_read_only_sql(r#"SELECT "say ""drop""" FROM audit"#)
            .expect("escaped quotes stay inside the identifier");
    }

    #[test]
    fn with_clause_must_lead_into_a_select() {
        validate_read_only_sql(
            "WITH a AS (SELECT 1 AS x), b AS (SELECT x FROM a) SELECT * FROM b",
        )
        .expect("chained ctes pass");

        let violation = validate_read_only_sql("WITH c(x) AS (SELECT 1) VALUES (2)")
            .expect_err("values after a cte is refused");
        assert_eq!(violation.details["violation"]["statement_keyword"], "values");
    }

    #[test]
    fn unsupported_leading_keyword_is_reported() {
        let violation = validate_read_only_sql("VALUES (1)").expect_err("values is refused");
        assert_eq!(violation.details["violation"]["leading_keyword"], "values");
    }

    #[test]
    fn empty_statement_is_rejected() {
        let violation = validate_read_only_sql("  ;; ").expect_err("empty is refused");
        assert_eq!(violation.details["violation"]["reason"], "empty_statement");
    }
}
