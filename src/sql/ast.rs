//! Typed DDL statement nodes.
//!
//! These are the nodes the differ and the migration generator exchange.
//! Expressions and data types come straight from the upstream parser
//! (`sqlparser`); statement shells are our own because the differ needs
//! CockroachDB constructs (inline indexes, STORING, TTL storage
//! parameters, `ALTER TYPE … ADD VALUE`) the stock statement AST does
//! not model.

use crate::escape::literal as escape_literal;
use sqlparser::ast::{DataType, Expr};
use std::fmt;

/// A possibly schema-qualified object name as written in the source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Name {
    pub schema: Option<String>,
    pub name: String,
}

impl Name {
    pub fn new(schema: Option<&str>, name: &str) -> Self {
        Name {
            schema: schema.map(|s| s.to_string()),
            name: name.to_string(),
        }
    }

    pub fn unqualified(name: &str) -> Self {
        Name {
            schema: None,
            name: name.to_string(),
        }
    }

    /// Resolves against the default schema.
    pub fn qualify(&self) -> QualifiedName {
        QualifiedName {
            schema: self
                .schema
                .clone()
                .unwrap_or_else(|| DEFAULT_SCHEMA.to_string()),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(s) => write!(f, "{}.{}", quote_ident(s), quote_ident(&self.name)),
            None => write!(f, "{}", quote_ident(&self.name)),
        }
    }
}

pub const DEFAULT_SCHEMA: &str = "public";

/// A fully resolved `(schema, name)` identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: &str, name: &str) -> Self {
        QualifiedName {
            schema: schema.to_string(),
            name: name.to_string(),
        }
    }

    pub fn public(name: &str) -> Self {
        Self::new(DEFAULT_SCHEMA, name)
    }

    /// A member of this object, e.g. a column or an enum value.
    pub fn member(&self, part: &str) -> String {
        format!("{}.{}.{}", self.schema, self.name, part)
    }

    pub fn to_name(&self) -> Name {
        Name::new(Some(&self.schema), &self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quotes an identifier only when it needs quoting.
pub fn quote_ident(ident: &str) -> String {
    let plain = !ident.is_empty()
        && ident
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        && !ident.chars().next().unwrap().is_ascii_digit();
    if plain {
        ident.to_string()
    } else {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    CreateSchema(CreateSchema),
    CreateType(CreateType),
    CreateSequence(CreateSequence),
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    CreateView(CreateView),
    CreateRoutine(CreateRoutine),
    CreateTrigger(CreateTrigger),
    AlterTable(AlterTable),
    AlterType(AlterType),
    AlterSequence(AlterSequence),
    Drop(Drop),
    Begin,
    Commit,
}

impl Statement {
    /// Short tag used in error messages and warnings.
    pub fn tag(&self) -> &'static str {
        match self {
            Statement::CreateSchema(_) => "CREATE SCHEMA",
            Statement::CreateType(_) => "CREATE TYPE",
            Statement::CreateSequence(_) => "CREATE SEQUENCE",
            Statement::CreateTable(_) => "CREATE TABLE",
            Statement::CreateIndex(_) => "CREATE INDEX",
            Statement::CreateView(_) => "CREATE VIEW",
            Statement::CreateRoutine(r) => match r.kind {
                RoutineKind::Function => "CREATE FUNCTION",
                RoutineKind::Procedure => "CREATE PROCEDURE",
            },
            Statement::CreateTrigger(_) => "CREATE TRIGGER",
            Statement::AlterTable(_) => "ALTER TABLE",
            Statement::AlterType(_) => "ALTER TYPE",
            Statement::AlterSequence(_) => "ALTER SEQUENCE",
            Statement::Drop(d) => match d.kind {
                ObjectKind::Schema => "DROP SCHEMA",
                ObjectKind::Type => "DROP TYPE",
                ObjectKind::Sequence => "DROP SEQUENCE",
                ObjectKind::Table => "DROP TABLE",
                ObjectKind::Index => "DROP INDEX",
                ObjectKind::View => "DROP VIEW",
                ObjectKind::Routine => "DROP FUNCTION",
                ObjectKind::Trigger => "DROP TRIGGER",
            },
            Statement::Begin => "BEGIN",
            Statement::Commit => "COMMIT",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Schema,
    Type,
    Sequence,
    Table,
    Index,
    View,
    Routine,
    Trigger,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSchema {
    pub name: String,
    pub if_not_exists: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TypeBody {
    Enum(Vec<String>),
    Composite(Vec<(String, DataType)>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateType {
    pub name: Name,
    pub body: TypeBody,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SequenceOptions {
    pub increment: Option<i64>,
    pub min_value: Option<i64>,
    pub max_value: Option<i64>,
    pub start: Option<i64>,
    pub cache: Option<i64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateSequence {
    pub name: Name,
    pub if_not_exists: bool,
    pub options: SequenceOptions,
}

/// A computed column expression and its storage class.
#[derive(Clone, Debug, PartialEq)]
pub struct Computed {
    pub expr: Expr,
    pub stored: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub not_null: bool,
    pub default: Option<Expr>,
    pub computed: Option<Computed>,
    pub not_visible: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IndexColumn {
    pub expr: Expr,
    pub descending: bool,
}

impl IndexColumn {
    pub fn named(name: &str) -> Self {
        IndexColumn {
            expr: Expr::Identifier(sqlparser::ast::Ident::new(name)),
            descending: false,
        }
    }

    /// The column name when the key part is a plain identifier.
    pub fn column_name(&self) -> Option<String> {
        match &self.expr {
            Expr::Identifier(id) => Some(id.value.clone()),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableConstraint {
    PrimaryKey {
        name: Option<String>,
        columns: Vec<IndexColumn>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<IndexColumn>,
    },
    ForeignKey {
        name: Option<String>,
        columns: Vec<String>,
        foreign_table: Name,
        referred_columns: Vec<String>,
        on_delete: Option<ReferentialAction>,
        on_update: Option<ReferentialAction>,
        not_valid: bool,
    },
    Check {
        name: Option<String>,
        expr: Expr,
        not_valid: bool,
    },
}

impl TableConstraint {
    pub fn name(&self) -> Option<&str> {
        match self {
            TableConstraint::PrimaryKey { name, .. }
            | TableConstraint::Unique { name, .. }
            | TableConstraint::ForeignKey { name, .. }
            | TableConstraint::Check { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferentialAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

impl fmt::Display for ReferentialAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferentialAction::NoAction => "NO ACTION",
            ReferentialAction::Restrict => "RESTRICT",
            ReferentialAction::Cascade => "CASCADE",
            ReferentialAction::SetNull => "SET NULL",
            ReferentialAction::SetDefault => "SET DEFAULT",
        })
    }
}

/// An index definition, either inline in CREATE TABLE or standalone.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexDef {
    pub name: String,
    pub unique: bool,
    pub columns: Vec<IndexColumn>,
    pub storing: Vec<String>,
    pub predicate: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTable {
    pub name: Name,
    pub if_not_exists: bool,
    pub columns: Vec<ColumnDef>,
    pub constraints: Vec<TableConstraint>,
    pub indexes: Vec<IndexDef>,
    /// Storage parameters from `WITH (…)`, e.g. TTL settings. Values are
    /// kept as rendered text since they are compared textually.
    pub storage_params: Vec<(String, String)>,
}

impl CreateTable {
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> Option<&TableConstraint> {
        self.constraints
            .iter()
            .find(|c| matches!(c, TableConstraint::PrimaryKey { .. }))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateIndex {
    pub name: String,
    pub table: Name,
    pub if_not_exists: bool,
    pub index: IndexDef,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateView {
    pub name: Name,
    pub or_replace: bool,
    pub materialized: bool,
    pub columns: Vec<String>,
    /// The defining query, kept as text. Canonical comparison goes through
    /// the shadow database, so structural query analysis is unnecessary.
    pub query: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoutineKind {
    Function,
    Procedure,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RoutineParam {
    pub name: Option<String>,
    pub data_type: DataType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateRoutine {
    pub name: Name,
    pub kind: RoutineKind,
    pub or_replace: bool,
    pub params: Vec<RoutineParam>,
    pub returns: Option<DataType>,
    pub language: Option<String>,
    pub volatility: Option<String>,
    pub body: String,
}

impl CreateRoutine {
    /// Overloads are distinguished by their parameter-type list.
    pub fn signature(&self) -> String {
        let types: Vec<String> = self
            .params
            .iter()
            .map(|p| p.data_type.to_string().to_lowercase())
            .collect();
        format!("{}({})", self.name.qualify(), types.join(","))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerTiming {
    Before,
    After,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TriggerEvent::Insert => "INSERT",
            TriggerEvent::Update => "UPDATE",
            TriggerEvent::Delete => "DELETE",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CreateTrigger {
    pub name: String,
    pub table: Name,
    pub timing: TriggerTiming,
    pub events: Vec<TriggerEvent>,
    pub for_each_row: bool,
    pub when: Option<Expr>,
    pub function: Name,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlterTable {
    pub name: Name,
    pub op: AlterTableOp,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlterTableOp {
    AddColumn(ColumnDef),
    DropColumn(String),
    AlterColumnType {
        column: String,
        data_type: DataType,
        using: Option<Expr>,
    },
    SetNotNull(String),
    DropNotNull(String),
    SetDefault(String, Expr),
    DropDefault(String),
    SetVisible(String),
    SetNotVisible(String),
    AddConstraint(TableConstraint),
    DropConstraint(String),
    ValidateConstraint(String),
    SetStorageParams(Vec<(String, String)>),
    ResetStorageParams(Vec<String>),
    AlterPrimaryKey(Vec<IndexColumn>),
}

/// `ALTER SEQUENCE` carrying the full desired option set.
#[derive(Clone, Debug, PartialEq)]
pub struct AlterSequence {
    pub name: Name,
    pub options: SequenceOptions,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AlterType {
    pub name: Name,
    pub op: AlterTypeOp,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AlterTypeOp {
    AddValue {
        value: String,
        placement: Option<ValuePlacement>,
    },
    DropValue(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum ValuePlacement {
    Before(String),
    After(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Drop {
    pub kind: ObjectKind,
    pub name: Name,
    /// Set for `DROP INDEX` and `DROP TRIGGER`, which address their target
    /// through a table.
    pub table: Option<Name>,
    pub if_exists: bool,
    pub cascade: bool,
}

// Rendering. The output is what lands in migration files, so it has to be
// SQL the engine accepts verbatim.

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::CreateSchema(s) => s.fmt(f),
            Statement::CreateType(s) => s.fmt(f),
            Statement::CreateSequence(s) => s.fmt(f),
            Statement::CreateTable(s) => s.fmt(f),
            Statement::CreateIndex(s) => s.fmt(f),
            Statement::CreateView(s) => s.fmt(f),
            Statement::CreateRoutine(s) => s.fmt(f),
            Statement::CreateTrigger(s) => s.fmt(f),
            Statement::AlterTable(s) => s.fmt(f),
            Statement::AlterType(s) => s.fmt(f),
            Statement::AlterSequence(s) => s.fmt(f),
            Statement::Drop(s) => s.fmt(f),
            Statement::Begin => f.write_str("BEGIN"),
            Statement::Commit => f.write_str("COMMIT"),
        }
    }
}

impl fmt::Display for CreateSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE SCHEMA ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(f, "{}", quote_ident(&self.name))
    }
}

impl fmt::Display for CreateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            TypeBody::Enum(labels) => {
                let rendered: Vec<String> =
                    labels.iter().map(|l| escape_literal(l)).collect();
                write!(f, "CREATE TYPE {} AS ENUM ({})", self.name, rendered.join(", "))
            }
            TypeBody::Composite(fields) => {
                let rendered: Vec<String> = fields
                    .iter()
                    .map(|(n, t)| format!("{} {}", quote_ident(n), t))
                    .collect();
                write!(f, "CREATE TYPE {} AS ({})", self.name, rendered.join(", "))
            }
        }
    }
}

impl fmt::Display for CreateSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE SEQUENCE ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(f, "{}", self.name)?;
        let o = &self.options;
        if let Some(v) = o.increment {
            write!(f, " INCREMENT {}", v)?;
        }
        if let Some(v) = o.min_value {
            write!(f, " MINVALUE {}", v)?;
        }
        if let Some(v) = o.max_value {
            write!(f, " MAXVALUE {}", v)?;
        }
        if let Some(v) = o.start {
            write!(f, " START {}", v)?;
        }
        if let Some(v) = o.cache {
            write!(f, " CACHE {}", v)?;
        }
        Ok(())
    }
}

impl fmt::Display for ColumnDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", quote_ident(&self.name), self.data_type)?;
        if self.not_visible {
            write!(f, " NOT VISIBLE")?;
        }
        if self.not_null {
            write!(f, " NOT NULL")?;
        }
        if let Some(d) = &self.default {
            write!(f, " DEFAULT {}", d)?;
        }
        if let Some(c) = &self.computed {
            write!(f, " AS ({}) {}", c.expr, if c.stored { "STORED" } else { "VIRTUAL" })?;
        }
        Ok(())
    }
}

fn fmt_index_columns(columns: &[IndexColumn]) -> String {
    columns
        .iter()
        .map(|c| {
            if c.descending {
                format!("{} DESC", c.expr)
            } else {
                c.expr.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for TableConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableConstraint::PrimaryKey { name, columns } => {
                if let Some(n) = name {
                    write!(f, "CONSTRAINT {} ", quote_ident(n))?;
                }
                write!(f, "PRIMARY KEY ({})", fmt_index_columns(columns))
            }
            TableConstraint::Unique { name, columns } => {
                if let Some(n) = name {
                    write!(f, "CONSTRAINT {} ", quote_ident(n))?;
                }
                write!(f, "UNIQUE ({})", fmt_index_columns(columns))
            }
            TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                referred_columns,
                on_delete,
                on_update,
                not_valid,
            } => {
                if let Some(n) = name {
                    write!(f, "CONSTRAINT {} ", quote_ident(n))?;
                }
                let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                let refs: Vec<String> =
                    referred_columns.iter().map(|c| quote_ident(c)).collect();
                write!(
                    f,
                    "FOREIGN KEY ({}) REFERENCES {} ({})",
                    cols.join(", "),
                    foreign_table,
                    refs.join(", ")
                )?;
                if let Some(a) = on_delete {
                    write!(f, " ON DELETE {}", a)?;
                }
                if let Some(a) = on_update {
                    write!(f, " ON UPDATE {}", a)?;
                }
                if *not_valid {
                    write!(f, " NOT VALID")?;
                }
                Ok(())
            }
            TableConstraint::Check { name, expr, not_valid } => {
                if let Some(n) = name {
                    write!(f, "CONSTRAINT {} ", quote_ident(n))?;
                }
                write!(f, "CHECK ({})", expr)?;
                if *not_valid {
                    write!(f, " NOT VALID")?;
                }
                Ok(())
            }
        }
    }
}

impl IndexDef {
    fn fmt_inline(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.unique {
            write!(f, "UNIQUE ")?;
        }
        write!(f, "INDEX {} ({})", quote_ident(&self.name), fmt_index_columns(&self.columns))?;
        self.fmt_tail(f)
    }

    fn fmt_tail(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.storing.is_empty() {
            let cols: Vec<String> = self.storing.iter().map(|c| quote_ident(c)).collect();
            write!(f, " STORING ({})", cols.join(", "))?;
        }
        if let Some(p) = &self.predicate {
            write!(f, " WHERE {}", p)?;
        }
        Ok(())
    }
}

impl fmt::Display for CreateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE TABLE ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        writeln!(f, "{} (", self.name)?;
        let mut items: Vec<String> = Vec::new();
        for c in &self.columns {
            items.push(c.to_string());
        }
        for c in &self.constraints {
            items.push(c.to_string());
        }
        for i in &self.indexes {
            items.push(format!("{}", InlineIndex(i)));
        }
        for (pos, item) in items.iter().enumerate() {
            if pos + 1 == items.len() {
                writeln!(f, "    {}", item)?;
            } else {
                writeln!(f, "    {},", item)?;
            }
        }
        write!(f, ")")?;
        if !self.storage_params.is_empty() {
            let params: Vec<String> = self
                .storage_params
                .iter()
                .map(|(k, v)| format!("{} = {}", k, v))
                .collect();
            write!(f, " WITH ({})", params.join(", "))?;
        }
        Ok(())
    }
}

struct InlineIndex<'a>(&'a IndexDef);

impl fmt::Display for InlineIndex<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt_inline(f)
    }
}

impl fmt::Display for CreateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ")?;
        if self.index.unique {
            write!(f, "UNIQUE ")?;
        }
        write!(f, "INDEX ")?;
        if self.if_not_exists {
            write!(f, "IF NOT EXISTS ")?;
        }
        write!(
            f,
            "{} ON {} ({})",
            quote_ident(&self.name),
            self.table,
            fmt_index_columns(&self.index.columns)
        )?;
        self.index.fmt_tail(f)
    }
}

impl fmt::Display for CreateView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ")?;
        if self.or_replace {
            write!(f, "OR REPLACE ")?;
        }
        if self.materialized {
            write!(f, "MATERIALIZED ")?;
        }
        write!(f, "VIEW {}", self.name)?;
        if !self.columns.is_empty() {
            let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
            write!(f, " ({})", cols.join(", "))?;
        }
        write!(f, " AS {}", self.query)
    }
}

impl fmt::Display for CreateRoutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CREATE ")?;
        if self.or_replace {
            write!(f, "OR REPLACE ")?;
        }
        match self.kind {
            RoutineKind::Function => write!(f, "FUNCTION ")?,
            RoutineKind::Procedure => write!(f, "PROCEDURE ")?,
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| match &p.name {
                Some(n) => format!("{} {}", quote_ident(n), p.data_type),
                None => p.data_type.to_string(),
            })
            .collect();
        write!(f, "{}({})", self.name, params.join(", "))?;
        if let Some(r) = &self.returns {
            write!(f, " RETURNS {}", r)?;
        }
        if let Some(l) = &self.language {
            write!(f, " LANGUAGE {}", l)?;
        }
        if let Some(v) = &self.volatility {
            write!(f, " {}", v)?;
        }
        write!(f, " AS $$ {} $$", self.body.trim())
    }
}

impl fmt::Display for CreateTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self.events.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "CREATE TRIGGER {} {} {} ON {}",
            quote_ident(&self.name),
            match self.timing {
                TriggerTiming::Before => "BEFORE",
                TriggerTiming::After => "AFTER",
            },
            events.join(" OR "),
            self.table
        )?;
        if self.for_each_row {
            write!(f, " FOR EACH ROW")?;
        }
        if let Some(w) = &self.when {
            write!(f, " WHEN ({})", w)?;
        }
        write!(f, " EXECUTE FUNCTION {}()", self.function)
    }
}

impl fmt::Display for AlterTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER TABLE {} {}", self.name, self.op)
    }
}

impl fmt::Display for AlterTableOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlterTableOp::AddColumn(c) => write!(f, "ADD COLUMN {}", c),
            AlterTableOp::DropColumn(c) => write!(f, "DROP COLUMN {}", quote_ident(c)),
            AlterTableOp::AlterColumnType { column, data_type, using } => {
                write!(
                    f,
                    "ALTER COLUMN {} SET DATA TYPE {}",
                    quote_ident(column),
                    data_type
                )?;
                if let Some(u) = using {
                    write!(f, " USING {}", u)?;
                }
                Ok(())
            }
            AlterTableOp::SetNotNull(c) => {
                write!(f, "ALTER COLUMN {} SET NOT NULL", quote_ident(c))
            }
            AlterTableOp::DropNotNull(c) => {
                write!(f, "ALTER COLUMN {} DROP NOT NULL", quote_ident(c))
            }
            AlterTableOp::SetDefault(c, e) => {
                write!(f, "ALTER COLUMN {} SET DEFAULT {}", quote_ident(c), e)
            }
            AlterTableOp::DropDefault(c) => {
                write!(f, "ALTER COLUMN {} DROP DEFAULT", quote_ident(c))
            }
            AlterTableOp::SetVisible(c) => {
                write!(f, "ALTER COLUMN {} SET VISIBLE", quote_ident(c))
            }
            AlterTableOp::SetNotVisible(c) => {
                write!(f, "ALTER COLUMN {} SET NOT VISIBLE", quote_ident(c))
            }
            AlterTableOp::AddConstraint(c) => write!(f, "ADD {}", c),
            AlterTableOp::DropConstraint(c) => {
                write!(f, "DROP CONSTRAINT {}", quote_ident(c))
            }
            AlterTableOp::ValidateConstraint(c) => {
                write!(f, "VALIDATE CONSTRAINT {}", quote_ident(c))
            }
            AlterTableOp::SetStorageParams(params) => {
                let rendered: Vec<String> =
                    params.iter().map(|(k, v)| format!("{} = {}", k, v)).collect();
                write!(f, "SET ({})", rendered.join(", "))
            }
            AlterTableOp::ResetStorageParams(keys) => {
                write!(f, "RESET ({})", keys.join(", "))
            }
            AlterTableOp::AlterPrimaryKey(columns) => {
                write!(f, "ALTER PRIMARY KEY USING COLUMNS ({})", fmt_index_columns(columns))
            }
        }
    }
}

impl fmt::Display for AlterSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER SEQUENCE {}", self.name)?;
        let o = &self.options;
        if let Some(v) = o.increment {
            write!(f, " INCREMENT {}", v)?;
        }
        if let Some(v) = o.min_value {
            write!(f, " MINVALUE {}", v)?;
        }
        if let Some(v) = o.max_value {
            write!(f, " MAXVALUE {}", v)?;
        }
        if let Some(v) = o.start {
            write!(f, " START {}", v)?;
        }
        if let Some(v) = o.cache {
            write!(f, " CACHE {}", v)?;
        }
        Ok(())
    }
}

impl fmt::Display for AlterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALTER TYPE {} ", self.name)?;
        match &self.op {
            AlterTypeOp::AddValue { value, placement } => {
                write!(f, "ADD VALUE {}", escape_literal(value))?;
                match placement {
                    Some(ValuePlacement::Before(v)) => write!(f, " BEFORE {}", escape_literal(v)),
                    Some(ValuePlacement::After(v)) => write!(f, " AFTER {}", escape_literal(v)),
                    None => Ok(()),
                }
            }
            AlterTypeOp::DropValue(v) => write!(f, "DROP VALUE {}", escape_literal(v)),
        }
    }
}

impl fmt::Display for Drop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ObjectKind::Index => {
                write!(f, "DROP INDEX ")?;
                if self.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                match &self.table {
                    Some(t) => write!(f, "{}@{}", t, quote_ident(&self.name.name))?,
                    None => write!(f, "{}", self.name)?,
                }
            }
            ObjectKind::Trigger => {
                write!(f, "DROP TRIGGER ")?;
                if self.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                write!(f, "{}", quote_ident(&self.name.name))?;
                if let Some(t) = &self.table {
                    write!(f, " ON {}", t)?;
                }
            }
            _ => {
                let kw = match self.kind {
                    ObjectKind::Schema => "SCHEMA",
                    ObjectKind::Type => "TYPE",
                    ObjectKind::Sequence => "SEQUENCE",
                    ObjectKind::Table => "TABLE",
                    ObjectKind::View => "VIEW",
                    ObjectKind::Routine => "FUNCTION",
                    ObjectKind::Index | ObjectKind::Trigger => unreachable!(),
                };
                write!(f, "DROP {} ", kw)?;
                if self.if_exists {
                    write!(f, "IF EXISTS ")?;
                }
                if self.kind == ObjectKind::Schema {
                    write!(f, "{}", quote_ident(&self.name.name))?;
                } else {
                    write!(f, "{}", self.name)?;
                }
            }
        }
        if self.cascade {
            write!(f, " CASCADE")?;
        }
        Ok(())
    }
}
