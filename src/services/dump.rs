//! Tenant dump producers.
//!
//! Two interchangeable strategies behind one contract:
//!
//! * [`AdminDumpProducer`] shells out to `pg_dump` over the fixed allow-list
//!   of tenant-bearing tables. It dumps entire tables, not rows filtered by
//!   tenant, so it is used for platform-wide backups.
//! * [`SelfServiceDumpProducer`] issues row-filtered selects per table and
//!   emits literal `INSERT` statements with deterministic value escaping.
//!   Used for per-tenant backups (platform and customer alike).
//!
//! Both fail with a `Dump` error when the output file ends up empty or
//! absent; an empty backup is never a quiet success.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// How a table's rows are scoped to a tenant.
#[derive(Debug, Clone, Copy)]
pub enum TenantScope {
    /// The table carries a `tenant_id` column directly.
    Direct,
    /// Child table without a tenant column; scoped through its parent.
    ViaParent {
        parent: &'static str,
        fk: &'static str,
    },
}

/// One allow-listed tenant-bearing table.
#[derive(Debug, Clone, Copy)]
pub struct TenantTable {
    pub name: &'static str,
    pub scope: TenantScope,
}

/// Allow-list of tenant-bearing tables, in parent-before-child order.
/// Restore deletes in reverse order (child before parent).
pub const TENANT_TABLES: &[TenantTable] = &[
    TenantTable {
        name: "customers",
        scope: TenantScope::Direct,
    },
    TenantTable {
        name: "products",
        scope: TenantScope::Direct,
    },
    TenantTable {
        name: "quotes",
        scope: TenantScope::Direct,
    },
    TenantTable {
        name: "quote_items",
        scope: TenantScope::ViaParent {
            parent: "quotes",
            fk: "quote_id",
        },
    },
    TenantTable {
        name: "invoices",
        scope: TenantScope::Direct,
    },
    TenantTable {
        name: "invoice_items",
        scope: TenantScope::ViaParent {
            parent: "invoices",
            fk: "invoice_id",
        },
    },
    TenantTable {
        name: "payments",
        scope: TenantScope::Direct,
    },
    TenantTable {
        name: "expenses",
        scope: TenantScope::Direct,
    },
];

/// Contract shared by both dump strategies: write a SQL script for one
/// tenant's data and return its path.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn produce_dump(&self, tenant_id: Uuid, dest_dir: &Path) -> Result<PathBuf>;
}

// ---------------------------------------------------------------------------
// Script rendering (pure)
// ---------------------------------------------------------------------------

/// Render one JSON value as a SQL literal.
///
/// Escaping is deterministic: strings double embedded single quotes, JSON
/// composites become quoted `::jsonb` literals, everything else renders as
/// the standard SQL spelling.
pub fn sql_literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "NULL".to_string(),
        serde_json::Value::Bool(true) => "TRUE".to_string(),
        serde_json::Value::Bool(false) => "FALSE".to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) => quote_string(s),
        composite => format!("{}::jsonb", quote_string(&composite.to_string())),
    }
}

fn quote_string(s: &str) -> String {
    // NUL bytes are not representable in a Postgres text literal
    let cleaned: String = s.chars().filter(|c| *c != '\0').collect();
    format!("'{}'", cleaned.replace('\'', "''"))
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Render one INSERT statement from a `row_to_json` object.
///
/// Column order follows the JSON object's key order, which is stable for a
/// given table, so repeated dumps of identical data are byte-identical.
pub fn render_insert(table: &str, row: &serde_json::Map<String, serde_json::Value>) -> String {
    let columns: Vec<String> = row.keys().map(|k| quote_ident(k)).collect();
    let values: Vec<String> = row.values().map(sql_literal).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({});",
        quote_ident(table),
        columns.join(", "),
        values.join(", ")
    )
}

/// Render the section for one table: a comment marker followed by its
/// INSERT statements. Zero-row tables still emit the marker so the script's
/// table coverage stays auditable.
pub fn render_table_section(table: &str, rows: &[serde_json::Value]) -> Result<String> {
    let mut out = format!("\n-- table: {}\n", table);
    for row in rows {
        let obj = row.as_object().ok_or_else(|| {
            AppError::Dump(format!("Unexpected non-object row dumped from {}", table))
        })?;
        out.push_str(&render_insert(table, obj));
        out.push('\n');
    }
    Ok(out)
}

/// Split a SQL script into executable statements.
///
/// Line-based: comment and blank lines between statements are dropped, and a
/// statement ends on a line-final `;` outside of a string literal (tracked
/// via single-quote parity, with `''` counting as two quotes and therefore
/// staying balanced).
pub fn split_sql_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut open_quotes = 0usize;

    for line in script.lines() {
        let trimmed = line.trim();
        if current.is_empty() && (trimmed.is_empty() || trimmed.starts_with("--")) {
            continue;
        }

        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        open_quotes += line.matches('\'').count();

        if open_quotes % 2 == 0 && current.trim_end().ends_with(';') {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
            open_quotes = 0;
        }
    }

    statements
}

/// True for transaction-control statements the restore replayer must skip
/// (it runs the whole script inside its own transaction).
pub fn is_transaction_control(statement: &str) -> bool {
    let upper = statement.trim().to_uppercase();
    upper == "BEGIN" || upper == "COMMIT" || upper == "ROLLBACK"
}

// ---------------------------------------------------------------------------
// Self-service strategy
// ---------------------------------------------------------------------------

/// Row-filtered dump producer: selects each allow-listed table scoped to one
/// tenant and renders literal INSERT statements.
pub struct SelfServiceDumpProducer {
    db: PgPool,
}

impl SelfServiceDumpProducer {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    fn select_sql(table: &TenantTable) -> String {
        match table.scope {
            TenantScope::Direct => format!(
                "SELECT row_to_json(t)::text FROM {} t WHERE t.tenant_id = $1 ORDER BY t.id",
                quote_ident(table.name)
            ),
            TenantScope::ViaParent { parent, fk } => format!(
                "SELECT row_to_json(t)::text FROM {} t JOIN {} p ON t.{} = p.id \
                 WHERE p.tenant_id = $1 ORDER BY t.id",
                quote_ident(table.name),
                quote_ident(parent),
                quote_ident(fk)
            ),
        }
    }
}

#[async_trait]
impl DumpProducer for SelfServiceDumpProducer {
    async fn produce_dump(&self, tenant_id: Uuid, dest_dir: &Path) -> Result<PathBuf> {
        let mut script = String::new();
        script.push_str("-- ledgerbook tenant data export\n");
        script.push_str(&format!("-- tenant: {}\n", tenant_id));
        script.push_str(&format!("-- generated: {}\n", Utc::now().to_rfc3339()));
        script.push_str("BEGIN;\n");

        for table in TENANT_TABLES {
            let rows: Vec<String> = sqlx::query_scalar(&Self::select_sql(table))
                .bind(tenant_id)
                .fetch_all(&self.db)
                .await?;

            let parsed: Vec<serde_json::Value> = rows
                .iter()
                .map(|r| serde_json::from_str(r))
                .collect::<std::result::Result<_, _>>()?;

            script.push_str(&render_table_section(table.name, &parsed)?);
            tracing::debug!(table = table.name, rows = parsed.len(), "Dumped table");
        }

        script.push_str("\nCOMMIT;\n");

        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join(format!("tenant-{}.sql", tenant_id));
        tokio::fs::write(&path, &script).await?;

        ensure_non_empty(&path).await?;
        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Administrative strategy
// ---------------------------------------------------------------------------

/// Full-table dump producer shelling out to `pg_dump`, restricted to the
/// table allow-list. Dumps entire tables, so its output is only suitable for
/// platform-wide backups.
pub struct AdminDumpProducer {
    database_url: String,
    timeout: Duration,
}

impl AdminDumpProducer {
    pub fn new(database_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            database_url: database_url.into(),
            timeout,
        }
    }

    /// Dump all allow-listed tables to `dest_path` as a data-only SQL script.
    pub async fn dump_all_tables(&self, dest_path: &Path) -> Result<()> {
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new("pg_dump");
        cmd.arg("--data-only")
            .arg("--inserts")
            .arg("--no-owner")
            .arg("--no-privileges");
        for table in TENANT_TABLES {
            cmd.arg("--table").arg(table.name);
        }
        cmd.arg("--file")
            .arg(dest_path)
            .arg(&self.database_url)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                AppError::Dump(format!(
                    "pg_dump timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| AppError::Dump(format!("Failed to invoke pg_dump: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::Dump(format!(
                "pg_dump exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        ensure_non_empty(dest_path).await
    }
}

#[async_trait]
impl DumpProducer for AdminDumpProducer {
    async fn produce_dump(&self, tenant_id: Uuid, dest_dir: &Path) -> Result<PathBuf> {
        // Full-table dump: tenant_id only names the output file. Row-level
        // tenant filtering is the self-service strategy's job.
        let path = dest_dir.join(format!("admin-{}.sql", tenant_id));
        self.dump_all_tables(&path).await?;
        Ok(path)
    }
}

async fn ensure_non_empty(path: &Path) -> Result<()> {
    let len = tokio::fs::metadata(path)
        .await
        .map_err(|_| AppError::Dump(format!("Dump file missing: {}", path.display())))?
        .len();
    if len == 0 {
        return Err(AppError::Dump(format!(
            "Dump file is empty: {}",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sql_literal_escaping() {
        assert_eq!(sql_literal(&json!(null)), "NULL");
        assert_eq!(sql_literal(&json!(true)), "TRUE");
        assert_eq!(sql_literal(&json!(false)), "FALSE");
        assert_eq!(sql_literal(&json!(42)), "42");
        assert_eq!(sql_literal(&json!(12.5)), "12.5");
        assert_eq!(sql_literal(&json!("plain")), "'plain'");
        assert_eq!(sql_literal(&json!("O'Brien & Sons")), "'O''Brien & Sons'");
        assert_eq!(
            sql_literal(&json!("2024-03-01T12:00:00Z")),
            "'2024-03-01T12:00:00Z'"
        );
    }

    #[test]
    fn test_sql_literal_composite_becomes_jsonb() {
        let lit = sql_literal(&json!({"plan": "pro"}));
        assert_eq!(lit, "'{\"plan\":\"pro\"}'::jsonb");
    }

    #[test]
    fn test_render_insert_deterministic() {
        let row = json!({
            "id": 7,
            "name": "Anna's Bakery",
            "active": true,
            "notes": null,
        });
        let stmt = render_insert("customers", row.as_object().unwrap());
        assert_eq!(
            stmt,
            "INSERT INTO \"customers\" (\"active\", \"id\", \"name\", \"notes\") \
             VALUES (TRUE, 7, 'Anna''s Bakery', NULL);"
        );
        // Identical input renders identically
        assert_eq!(stmt, render_insert("customers", row.as_object().unwrap()));
    }

    #[test]
    fn test_zero_row_table_emits_marker() {
        let section = render_table_section("expenses", &[]).unwrap();
        assert_eq!(section, "\n-- table: expenses\n");
    }

    #[test]
    fn test_table_section_contains_all_rows() {
        let rows = vec![json!({"id": 1}), json!({"id": 2})];
        let section = render_table_section("invoices", &rows).unwrap();
        assert!(section.starts_with("\n-- table: invoices\n"));
        assert_eq!(section.matches("INSERT INTO").count(), 2);
    }

    #[test]
    fn test_split_statements_basic() {
        let script = "-- header\nBEGIN;\n\nINSERT INTO t (a) VALUES (1);\nCOMMIT;\n";
        let stmts = split_sql_statements(script);
        assert_eq!(stmts, vec!["BEGIN", "INSERT INTO t (a) VALUES (1)", "COMMIT"]);
    }

    #[test]
    fn test_split_statements_semicolon_inside_string() {
        let script = "INSERT INTO t (a) VALUES ('one;\ntwo');\nINSERT INTO t (a) VALUES ('x');\n";
        let stmts = split_sql_statements(script);
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].contains("one;\ntwo"));
    }

    #[test]
    fn test_split_statements_escaped_quote_stays_balanced() {
        let script = "INSERT INTO t (a) VALUES ('O''Brien');\n";
        let stmts = split_sql_statements(script);
        assert_eq!(stmts, vec!["INSERT INTO t (a) VALUES ('O''Brien')"]);
    }

    #[test]
    fn test_transaction_control_detection() {
        assert!(is_transaction_control("BEGIN"));
        assert!(is_transaction_control("commit"));
        assert!(!is_transaction_control("INSERT INTO t VALUES (1)"));
    }

    #[test]
    fn test_allow_list_ordering() {
        // Every ViaParent table must appear after its parent so restore can
        // delete children first by walking the list in reverse.
        for (idx, table) in TENANT_TABLES.iter().enumerate() {
            if let TenantScope::ViaParent { parent, .. } = table.scope {
                let parent_idx = TENANT_TABLES
                    .iter()
                    .position(|t| t.name == parent)
                    .expect("parent must be allow-listed");
                assert!(parent_idx < idx, "{} listed before parent {}", table.name, parent);
            }
        }
    }

    #[test]
    fn test_select_sql_shapes() {
        let direct = SelfServiceDumpProducer::select_sql(&TENANT_TABLES[0]);
        assert!(direct.contains("WHERE t.tenant_id = $1"));

        let via = TENANT_TABLES
            .iter()
            .find(|t| matches!(t.scope, TenantScope::ViaParent { .. }))
            .unwrap();
        let joined = SelfServiceDumpProducer::select_sql(via);
        assert!(joined.contains("JOIN"));
        assert!(joined.contains("p.tenant_id = $1"));
    }
}
