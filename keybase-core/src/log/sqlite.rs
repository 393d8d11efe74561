use async_trait::async_trait;
use sea_query::{
    Alias, ColumnDef, DeleteStatement, Expr, ExprTrait, Index, Query, SelectStatement,
    SqliteQueryBuilder, Table,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row as _;
use std::path::{Path, PathBuf};

use crate::context::OpContext;
use crate::error::LogError;
use crate::log::{EntryLog, Row, Value};
use crate::query::{Column, GlobToken, Pattern, Predicate, Projection, Select, Statement};

const TABLE: &str = "keybase";
const EXPIRATION: &str = "expiration";

/// Durable entry log stored in a SQLite database file
///
/// The pool holds a single connection so statements reach the file in the
/// order the keybase issues them.
#[derive(Debug)]
pub struct SqliteLog {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteLog {
    /// Opens (creating when absent) the database at `path` and its schema
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(LogError::Open)?;

        let log = Self { pool, path };
        log.create_schema().await?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn create_schema(&self) -> Result<(), LogError> {
        let table = Table::create()
            .table(Alias::new(TABLE))
            .if_not_exists()
            .col(ColumnDef::new(Alias::new(Column::Namespace.name())).text().not_null())
            .col(ColumnDef::new(Alias::new(Column::Key.name())).text().not_null())
            .col(ColumnDef::new(Alias::new(EXPIRATION)).big_integer().not_null())
            .to_owned();
        self.run_ddl(&table.to_string(SqliteQueryBuilder)).await?;

        for (name, column) in [
            ("namespace_index", Column::Namespace.name()),
            ("key_index", Column::Key.name()),
            ("expiration_index", EXPIRATION),
        ] {
            let index = Index::create()
                .if_not_exists()
                .name(name)
                .table(Alias::new(TABLE))
                .col(Alias::new(column))
                .to_owned();
            self.run_ddl(&index.to_string(SqliteQueryBuilder)).await?;
        }

        Ok(())
    }

    fn ensure_open(&self) -> Result<(), LogError> {
        if self.pool.is_closed() {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    /// Runs one write inside a transaction committed only if `ctx` has not fired
    async fn execute_sql(&self, ctx: &OpContext, sql: &str) -> Result<u64, LogError> {
        let mut tx = ctx
            .run(async { self.pool.begin().await.map_err(LogError::Execution) })
            .await?;

        let result = ctx
            .run(async {
                sqlx::query(sql)
                    .execute(&mut *tx)
                    .await
                    .map_err(LogError::Execution)
            })
            .await?;

        // An uncommitted transaction rolls back when dropped
        ctx.check()?;
        tx.commit().await.map_err(LogError::Execution)?;
        Ok(result.rows_affected())
    }

    async fn run_ddl(&self, sql: &str) -> Result<(), LogError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(LogError::Open)?;
        Ok(())
    }
}

/// Renders a pattern in SQLite `LIKE` syntax with `\` as the escape character
///
/// `LIKE` folds ASCII case the same way [`Pattern::matches`] does.
fn like_syntax(pattern: &Pattern) -> String {
    let mut out = String::with_capacity(pattern.as_str().len());
    for token in pattern.tokens() {
        match token {
            GlobToken::AnyRun => out.push('%'),
            GlobToken::AnyChar => out.push('_'),
            GlobToken::Literal(c @ ('%' | '_' | '\\')) => {
                out.push('\\');
                out.push(*c);
            }
            GlobToken::Literal(c) => out.push(*c),
        }
    }
    out
}

fn condition(predicate: &Predicate) -> Expr {
    match predicate {
        Predicate::NamespaceEq(namespace) => {
            Expr::col(Alias::new(Column::Namespace.name())).eq(namespace.as_str())
        }
        Predicate::KeyEq(key) => Expr::col(Alias::new(Column::Key.name())).eq(key.as_str()),
        Predicate::KeyMatches(pattern) => {
            Expr::cust_with_values(r#""key" LIKE ? ESCAPE '\'"#, [like_syntax(pattern)])
        }
        Predicate::ActiveAt(at) => Expr::col(Alias::new(EXPIRATION)).gt(at.as_millis()),
        Predicate::StaleAt(at) => Expr::col(Alias::new(EXPIRATION)).lte(at.as_millis()),
    }
}

fn filtered_select(predicates: &[Predicate]) -> SelectStatement {
    let mut stmt = Query::select();
    stmt.from(Alias::new(TABLE));
    for predicate in predicates {
        stmt.and_where(condition(predicate));
    }
    stmt
}

fn select_statement(select: &Select) -> SelectStatement {
    let mut stmt = filtered_select(&select.predicates);

    match select.projection {
        Projection::Values { column, distinct } => {
            stmt.column(Alias::new(column.name()));
            if distinct {
                stmt.distinct();
            }
        }
        Projection::Count { column, distinct } => {
            // Column names are fixed identifiers, never caller input
            let expr = if distinct {
                format!(r#"COUNT(DISTINCT "{}")"#, column.name())
            } else {
                format!(r#"COUNT("{}")"#, column.name())
            };
            stmt.expr(Expr::cust(expr));
        }
        Projection::CountPairs { distinct: false } => {
            stmt.expr(Expr::cust("COUNT(*)"));
        }
        Projection::CountPairs { distinct: true } => {
            // SQLite has no multi-column COUNT(DISTINCT); count the distinct pairs instead
            stmt.columns([Alias::new(Column::Namespace.name()), Alias::new(Column::Key.name())])
                .distinct();
            let mut outer = Query::select();
            outer
                .expr(Expr::cust("COUNT(*)"))
                .from_subquery(stmt, Alias::new("pairs"));
            return outer;
        }
    }

    stmt
}

fn delete_statement(predicates: &[Predicate]) -> DeleteStatement {
    let mut stmt = Query::delete();
    stmt.from_table(Alias::new(TABLE));
    for predicate in predicates {
        stmt.and_where(condition(predicate));
    }
    stmt
}

fn statement_sql(statement: &Statement) -> String {
    match statement {
        Statement::Insert(entry) => Query::insert()
            .into_table(Alias::new(TABLE))
            .columns([
                Alias::new(Column::Namespace.name()),
                Alias::new(Column::Key.name()),
                Alias::new(EXPIRATION),
            ])
            .values_panic([
                Expr::val(entry.namespace()).into(),
                Expr::val(entry.key()).into(),
                Expr::val(entry.expiration().as_millis()).into(),
            ])
            .to_string(SqliteQueryBuilder),
        Statement::Delete(predicates) => delete_statement(predicates).to_string(SqliteQueryBuilder),
    }
}

fn select_sql(select: &Select) -> String {
    select_statement(select).to_string(SqliteQueryBuilder)
}

fn read_value(row: &SqliteRow, index: usize) -> Result<Value, LogError> {
    if let Ok(text) = row.try_get::<String, _>(index) {
        return Ok(Value::Text(text));
    }
    if let Ok(number) = row.try_get::<i64, _>(index) {
        return Ok(Value::Integer(number));
    }
    match row.try_get::<Option<String>, _>(index) {
        Ok(None) => Ok(Value::Null),
        _ => Err(LogError::Schema(format!("column {index} is neither text nor integer"))),
    }
}

fn read_row(row: &SqliteRow) -> Result<Row, LogError> {
    (0..row.len()).map(|index| read_value(row, index)).collect()
}

#[async_trait]
impl EntryLog for SqliteLog {
    async fn execute(&mut self, ctx: &OpContext, statement: &Statement) -> Result<u64, LogError> {
        self.ensure_open()?;
        self.execute_sql(ctx, &statement_sql(statement)).await
    }

    async fn query_rows(&self, select: &Select) -> Result<Vec<Row>, LogError> {
        self.ensure_open()?;
        let sql = select_sql(select);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(LogError::Execution)?;
        rows.iter().map(read_row).collect()
    }

    async fn query_scalar(&self, select: &Select) -> Result<Value, LogError> {
        self.ensure_open()?;
        let sql = select_sql(select);
        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(LogError::Execution)?;
        if row.len() != 1 {
            return Err(LogError::Schema(format!(
                "expected 1 column for a scalar, got {}",
                row.len()
            )));
        }
        read_value(&row, 0)
    }

    async fn close(&mut self) -> Result<(), LogError> {
        self.pool.close().await;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}
