#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use nl2sql::accessor::{
    ColumnNamePolicy, QueryOutcome, SchemaAccessor, SqliteAccessor, ensure_metadata_tables,
    open_sqlite_connection,
};
use nl2sql::models::{Role, RunConfig, RunRequest, SchemaCatalog, TurnContext};
use nl2sql::oracle::{CapabilityOracle, OracleError, PromptSet};
use nl2sql::pipeline::{Orchestrator, OrchestratorSettings};
use serde_json::{Value, json};

pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{nanos}-{}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// A store with `products` and `sales` plus their metadata rows.
pub fn seeded_sales_db(prefix: &str) -> PathBuf {
    let path = unique_temp_dir(prefix).join("sales.db");
    let connection = open_sqlite_connection(&path).expect("sqlite db should open");
    ensure_metadata_tables(&connection).expect("metadata tables should be created");
    connection
        .execute_batch(
            r#"
            CREATE TABLE products (product_id INTEGER PRIMARY KEY, name TEXT, category TEXT);
            CREATE TABLE sales (sale_id INTEGER PRIMARY KEY, product_id INTEGER, amount REAL, sale_date TEXT);
            CREATE TABLE staff (staff_id INTEGER PRIMARY KEY, full_name TEXT);

            INSERT INTO products VALUES (1, 'Desk', 'Furniture'), (2, 'Chair', 'Furniture'), (3, 'Laptop', 'Electronics');
            INSERT INTO sales VALUES
                (1, 1, 250.0, '2024-01-15'),
                (2, 2, 120.0, '2024-03-02'),
                (3, 3, 900.0, '2024-05-20'),
                (4, 3, 950.0, '2023-11-11');
            INSERT INTO staff VALUES (1, 'Ada');

            INSERT INTO table_description VALUES
                ('products', 'Catalog of products with their category'),
                ('sales', 'One row per sale with amount and date'),
                ('staff', 'Employees');
            INSERT INTO table_columns VALUES
                ('products', 'product_id', 'Product key', 'INTEGER'),
                ('products', 'name', 'Product name', 'TEXT'),
                ('products', 'category', 'Product category', 'TEXT'),
                ('sales', 'sale_id', 'Sale key', 'INTEGER'),
                ('sales', 'product_id', 'Sold product', 'INTEGER'),
                ('sales', 'amount', 'Sale amount', 'REAL'),
                ('sales', 'sale_date', 'Sale date as YYYY-MM-DD', 'TEXT'),
                ('staff', 'staff_id', 'Staff key', 'INTEGER'),
                ('staff', 'full_name', 'Full name', 'TEXT');
            "#,
        )
        .expect("seed statements should run");
    path
}

pub fn sqlite_accessor(path: &Path) -> Arc<dyn SchemaAccessor> {
    Arc::new(SqliteAccessor::new(path, ColumnNamePolicy::Strict))
}

/// Oracle that answers each role from its own queue. The last scripted
/// reply of a role repeats once the queue is down to one entry.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<HashMap<Role, VecDeque<Result<Value, OracleError>>>>,
    calls: Mutex<Vec<(Role, Value)>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, role: Role, value: Value) -> Self {
        self.push(role, Ok(value));
        self
    }

    pub fn fail(self, role: Role, error: OracleError) -> Self {
        self.push(role, Err(error));
        self
    }

    fn push(&self, role: Role, reply: Result<Value, OracleError>) {
        self.replies
            .lock()
            .expect("replies lock")
            .entry(role)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self, role: Role) -> usize {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(called, _)| *called == role)
            .count()
    }

    pub fn inputs(&self, role: Role) -> Vec<Value> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .filter(|(called, _)| *called == role)
            .map(|(_, input)| input.clone())
            .collect()
    }

    pub fn roles(&self) -> Vec<Role> {
        self.calls
            .lock()
            .expect("calls lock")
            .iter()
            .map(|(role, _)| *role)
            .collect()
    }
}

#[async_trait]
impl CapabilityOracle for ScriptedOracle {
    async fn invoke(
        &self,
        role: Role,
        _instructions: &str,
        input: &Value,
    ) -> Result<Value, OracleError> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((role, input.clone()));

        let mut replies = self.replies.lock().expect("replies lock");
        let queue = replies
            .get_mut(&role)
            .ok_or_else(|| OracleError::Transport(format!("no scripted reply for {role}")))?;
        if queue.len() > 1 {
            queue
                .pop_front()
                .ok_or_else(|| OracleError::Transport(format!("no scripted reply for {role}")))?
        } else {
            queue
                .front()
                .cloned()
                .ok_or_else(|| OracleError::Transport(format!("no scripted reply for {role}")))?
        }
    }
}

/// Accessor whose store is never reachable.
pub struct FailingAccessor;

#[async_trait]
impl SchemaAccessor for FailingAccessor {
    async fn fetch_schema(&self) -> SchemaCatalog {
        SchemaCatalog::default()
    }

    async fn table_row_estimates(&self, _tables: &[String]) -> BTreeMap<String, u64> {
        BTreeMap::new()
    }

    async fn execute_query(
        &self,
        _sql: &str,
        _params: &[Value],
        _timeout: Duration,
    ) -> QueryOutcome {
        QueryOutcome::failed("store unavailable", 0)
    }
}

pub fn orchestrator(
    accessor: Arc<dyn SchemaAccessor>,
    oracle: Arc<ScriptedOracle>,
) -> Orchestrator {
    Orchestrator::new(
        accessor,
        oracle,
        Arc::new(PromptSet::builtin()),
        OrchestratorSettings {
            oracle_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(5),
            ..OrchestratorSettings::default()
        },
    )
}

pub fn request(message: &str) -> RunRequest {
    RunRequest {
        user_message: message.to_string(),
        context: TurnContext::default(),
        config: RunConfig::default(),
    }
}

pub fn nl2sql_decision() -> Value {
    json!({"decision": "NL2SQL", "reason": "asks for figures from the database"})
}

pub fn chit_chat_decision(reply: &str) -> Value {
    json!({"decision": "CHIT_CHAT", "reason": "greeting", "reply": reply})
}

pub fn built_query(sql: &str) -> Value {
    json!({"sql": sql, "params": [], "explanation": "aggregates sales", "assumptions": ["amount is revenue"]})
}

pub fn passing_verdict() -> Value {
    json!({"is_valid": true, "score": 0.9, "issues": [], "feedback_for_builder": ""})
}

pub fn failing_verdict(issue: &str) -> Value {
    json!({"is_valid": false, "score": 0.2, "issues": [issue], "feedback_for_builder": format!("fix: {issue}")})
}

pub fn debug_fix(replacement: &str) -> Value {
    json!({
        "problem_type": "MISSING_COLUMN",
        "diagnosis": "column does not exist",
        "fix_instructions": [{"action": "modify_sql", "replacement": replacement, "explanation": "use the real column"}],
        "confidence": 0.8
    })
}

pub fn explanation(answer: &str) -> Value {
    json!({
        "answer_text": answer,
        "detailed_explanation": "Joined sales to products and summed amounts per category.",
        "result_summary": "2 categories",
        "followups": ["Break it down by month?"]
    })
}
