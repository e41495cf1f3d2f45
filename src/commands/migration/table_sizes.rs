//! `scurry migration table-sizes`: refresh the large-table oracle from
//! the live database.

use crate::classify::{TableSize, TableSizes, DEFAULT_LARGE_TABLE_THRESHOLD};
use crate::commands::{Command, Outcome};
use crate::context::AppContext;
use crate::escape::EscapedIdentifier;
use anyhow::Result;
use console::style;
use tabled::settings::Style;
use tabled::{Table, Tabled};

pub struct RefreshTableSizes {
    pub large_table_threshold: Option<i64>,
}

#[derive(Tabled)]
struct TableSizeRow {
    #[tabled(rename = "Table")]
    name: String,
    #[tabled(rename = "Rows")]
    rows: i64,
    #[tabled(rename = "Bytes")]
    size_bytes: i64,
    #[tabled(rename = "Large")]
    large: String,
}

impl Command for RefreshTableSizes {
    async fn execute(&self, ctx: &AppContext) -> Result<Outcome> {
        let engine = ctx.engine().await?;
        let threshold = self
            .large_table_threshold
            .unwrap_or(DEFAULT_LARGE_TABLE_THRESHOLD);

        let rows = engine
            .client()
            .query(
                "SELECT t.schema_name, t.name, s.estimated_row_count \
                 FROM crdb_internal.table_row_statistics s \
                 JOIN crdb_internal.tables t ON t.table_id = s.table_id \
                 WHERE t.database_name = current_database() \
                 AND t.schema_name NOT IN ('crdb_internal', 'information_schema', 'pg_catalog', 'pg_extension', $1) \
                 AND t.state = 'PUBLIC' \
                 ORDER BY t.schema_name, t.name",
                &[&crate::engine::RESERVED_SCHEMA],
            )
            .await?;

        let mut sizes = TableSizes {
            threshold,
            tables: Default::default(),
        };
        for row in rows {
            let schema: String = row.get(0);
            let name: String = row.get(1);
            let estimated: i64 = row.get(2);
            let qualified = format!("{}.{}", schema, name);

            // approximate on-disk size; older engine versions may not
            // support the detailed range listing
            let size_bytes = match engine
                .client()
                .query_one(
                    &format!(
                        "SELECT COALESCE(sum(range_size), 0)::INT8 \
                         FROM [SHOW RANGES FROM TABLE {}.{} WITH DETAILS]",
                        EscapedIdentifier::new(&schema),
                        EscapedIdentifier::new(&name)
                    ),
                    &[],
                )
                .await
            {
                Ok(r) => r.get::<_, i64>(0),
                Err(_) => 0,
            };

            sizes.tables.insert(
                qualified,
                TableSize {
                    rows: estimated,
                    size_bytes,
                },
            );
        }
        engine.shutdown();

        let table_count = sizes.tables.len();
        ctx.store().write_table_sizes(&sizes)?;

        let display: Vec<TableSizeRow> = sizes
            .tables
            .iter()
            .map(|(name, s)| TableSizeRow {
                name: name.clone(),
                rows: s.rows,
                size_bytes: s.size_bytes,
                large: if s.rows >= threshold {
                    style("yes").yellow().to_string()
                } else {
                    style("no").dim().to_string()
                },
            })
            .collect();
        if !display.is_empty() {
            let mut table = Table::new(display);
            table.with(Style::sharp());
            println!("\n{}\n", table);
        }

        Ok(Outcome::TableSizesWritten {
            tables: table_count,
        })
    }
}
