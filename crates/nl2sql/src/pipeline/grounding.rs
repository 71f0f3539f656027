use std::collections::BTreeSet;

use serde::Serialize;

use crate::models::{SchemaCatalog, TurnContext};

const STOPWORDS: &[&str] = &[
    "about", "all", "and", "are", "can", "does", "each", "for", "from", "give", "has", "have",
    "how", "into", "list", "many", "much", "per", "please", "show", "tell", "than", "that", "the",
    "their", "there", "this", "total", "was", "were", "what", "when", "where", "which", "who",
    "why", "with", "you", "your",
];

/// The part of the catalog handed to the query roles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Grounding {
    pub catalog: SchemaCatalog,
    pub matched_tables: Vec<String>,
    /// No table matched, so the whole catalog was used.
    pub full_catalog: bool,
}

/// Picks the tables whose name, description or columns share a word with the
/// question (or the previous question). Tables named in the previous SQL are
/// kept so follow-ups can refine them.
#[must_use]
pub fn select_relevant(catalog: &SchemaCatalog, message: &str, context: &TurnContext) -> Grounding {
    let wanted = keywords(message)
        .into_iter()
        .chain(keywords(&context.last_query))
        .collect::<BTreeSet<_>>();
    let previous_sql = identifiers(&context.last_sql);

    let matched = catalog
        .table_names()
        .into_iter()
        .filter(|table| {
            previous_sql.contains(&table.to_ascii_lowercase())
                || table_words(catalog, table)
                    .iter()
                    .any(|word| wanted.contains(word))
        })
        .collect::<BTreeSet<_>>();

    if matched.is_empty() {
        return Grounding {
            catalog: catalog.clone(),
            matched_tables: Vec::new(),
            full_catalog: true,
        };
    }

    Grounding {
        catalog: catalog.subset(&matched),
        matched_tables: matched.into_iter().collect(),
        full_catalog: false,
    }
}

fn table_words(catalog: &SchemaCatalog, table: &str) -> BTreeSet<String> {
    let mut words = keywords(table);
    if let Some(description) = catalog.description_for(table) {
        words.extend(keywords(description));
    }
    for column in catalog.columns_for(table) {
        words.extend(keywords(&column.column_name));
        words.extend(keywords(&column.description));
    }
    words
}

/// Identifiers in a SQL text, lowercased. Quoting (`"`, `` ` ``, `[]`) and
/// schema qualifiers are dropped, underscores are kept.
fn identifiers(sql: &str) -> BTreeSet<String> {
    sql.split(|ch: char| !ch.is_alphanumeric() && ch != '_')
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn raw_tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| !token.is_empty())
}

fn keywords(text: &str) -> BTreeSet<String> {
    raw_tokens(text)
        .map(str::to_lowercase)
        .filter(|token| token.chars().count() >= 3)
        .filter(|token| token.chars().next().is_some_and(char::is_alphabetic))
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
        .map(|token| stem(&token))
        .collect()
}

/// Folds simple English plurals so `sale` and `sales` meet.
fn stem(token: &str) -> String {
    if let Some(base) = token.strip_suffix("ies")
        && base.len() >= 2
    {
        return format!("{base}y");
    }
    if token.ends_with("ss") || token.len() <= 3 {
        return token.to_string();
    }
    token.strip_suffix('s').unwrap_or(token).to_string()
}

#[cfg(test)]
mod tests {
    use super::{select_relevant, stem};
    use crate::models::{ColumnDescriptor, SchemaCatalog, TableDescriptor, TurnContext};

    fn catalog() -> SchemaCatalog {
        let table = |name: &str, description: &str| TableDescriptor {
            table_name: name.to_string(),
            description: description.to_string(),
        };
        let column = |table: &str, name: &str| ColumnDescriptor {
            table_name: table.to_string(),
            column_name: name.to_string(),
            description: String::new(),
            datatype: "TEXT".to_string(),
        };
        SchemaCatalog::new(
            vec![
                table("sales", "one row per sale"),
                table("products", "product catalogue with category"),
                table("employees", "staff directory"),
            ],
            vec![
                column("sales", "product_id"),
                column("sales", "amount"),
                column("sales", "sale_date"),
                column("products", "category"),
                column("employees", "full_name"),
            ],
        )
    }

    #[test]
    fn matching_words_select_a_subset() {
        let grounding = select_relevant(
            &catalog(),
            "Total sales by category for 2024",
            &TurnContext::default(),
        );
        assert!(!grounding.full_catalog);
        assert_eq!(grounding.matched_tables, vec!["products", "sales"]);
        assert_eq!(grounding.catalog.table_descriptions.len(), 2);
        assert!(
            grounding
                .catalog
                .table_columns
                .iter()
                .all(|column| column.table_name != "employees")
        );
    }

    #[test]
    fn unmatched_question_falls_back_to_full_catalog() {
        let grounding = select_relevant(&catalog(), "How is the weather?", &TurnContext::default());
        assert!(grounding.full_catalog);
        assert_eq!(grounding.catalog, catalog());
    }

    #[test]
    fn previous_sql_keeps_its_tables() {
        let context = TurnContext {
            last_sql: "SELECT full_name FROM employees".to_string(),
            ..TurnContext::default()
        };
        let grounding = select_relevant(&catalog(), "only the first five", &context);
        assert_eq!(grounding.matched_tables, vec!["employees"]);
    }

    #[test]
    fn previous_sql_keeps_underscored_and_quoted_tables() {
        let catalog = SchemaCatalog::new(
            vec![
                TableDescriptor {
                    table_name: "order_items".to_string(),
                    description: String::new(),
                },
                TableDescriptor {
                    table_name: "employees".to_string(),
                    description: String::new(),
                },
            ],
            Vec::new(),
        );
        for last_sql in [
            "SELECT qty FROM order_items",
            "SELECT qty FROM \"Order_Items\"",
            "SELECT qty FROM main.[order_items]",
        ] {
            let context = TurnContext {
                last_sql: last_sql.to_string(),
                ..TurnContext::default()
            };
            let grounding = select_relevant(&catalog, "only the first five", &context);
            assert!(!grounding.full_catalog, "{last_sql}");
            assert_eq!(grounding.matched_tables, vec!["order_items"], "{last_sql}");
        }
    }

    #[test]
    fn plurals_fold_to_the_same_stem() {
        assert_eq!(stem("sales"), "sale");
        assert_eq!(stem("categories"), "category");
        assert_eq!(stem("class"), "class");
    }
}
