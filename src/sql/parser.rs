//! DDL statement parsing.
//!
//! Statement shells are parsed token-wise on top of `sqlparser`'s parser,
//! which supplies the tokenizer plus expression, data-type and literal
//! parsing. This is what lets us accept CockroachDB constructs (inline
//! `INDEX` definitions, `STORING`, `ALTER TYPE … ADD VALUE`, TTL storage
//! parameters) that the stock statement grammar rejects.

use super::ast::*;
use sqlparser::ast::Expr;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::Token;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("syntax error: {0}")]
    Syntax(#[from] sqlparser::parser::ParserError),
    #[error("unsupported statement `{tag}`: only DDL is accepted here")]
    UnsupportedStatement { tag: String },
    #[error("unexpected token `{token}` while parsing {context}")]
    Unexpected { token: String, context: &'static str },
    #[error("expected {expected} while parsing {context}")]
    Expected {
        expected: &'static str,
        context: &'static str,
    },
}

const DIALECT: PostgreSqlDialect = PostgreSqlDialect {};

/// Parses a blob of DDL into statements. Non-DDL statements are rejected.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, ParseError> {
    let mut out = Vec::new();
    for raw in super::split_statements(sql) {
        out.extend(parse_statement(&raw)?);
    }
    Ok(out)
}

/// Parses a single standalone expression.
pub fn parse_expression(sql: &str) -> Result<Expr, ParseError> {
    let mut p = Parser::new(&DIALECT).try_with_sql(sql)?;
    Ok(p.parse_expr()?)
}

/// Parses one statement. `ALTER TABLE` with comma-separated operations
/// expands into one statement per operation.
pub fn parse_statement(raw: &str) -> Result<Vec<Statement>, ParseError> {
    let parser = Parser::new(&DIALECT).try_with_sql(raw)?;
    let mut sp = Ddl { p: parser };
    sp.statement()
}

struct Ddl<'a> {
    p: Parser<'a>,
}

impl<'a> Ddl<'a> {
    // Token helpers. Keyword matching is done on the word text so the
    // CockroachDB-only keywords (STORING, VISIBLE, …) work like any other.

    fn peek_word(&self) -> Option<String> {
        match &self.p.peek_token().token {
            Token::Word(w) => Some(w.value.to_uppercase()),
            _ => None,
        }
    }

    fn peek_nth_word(&self, n: usize) -> Option<String> {
        match &self.p.peek_nth_token(n).token {
            Token::Word(w) => Some(w.value.to_uppercase()),
            _ => None,
        }
    }

    fn eat_word(&mut self, kw: &str) -> bool {
        if self.peek_word().as_deref() == Some(kw) {
            self.p.next_token();
            true
        } else {
            false
        }
    }

    fn eat_words(&mut self, kws: &[&str]) -> bool {
        for (i, kw) in kws.iter().enumerate() {
            if self.peek_nth_word(i).as_deref() != Some(*kw) {
                return false;
            }
        }
        for _ in kws {
            self.p.next_token();
        }
        true
    }

    fn expect_word(&mut self, kw: &'static str, context: &'static str) -> Result<(), ParseError> {
        if self.eat_word(kw) {
            Ok(())
        } else {
            Err(ParseError::Expected {
                expected: kw,
                context,
            })
        }
    }

    fn eat_token(&mut self, t: &Token) -> bool {
        self.p.consume_token(t)
    }

    fn expect_token(&mut self, t: Token, context: &'static str) -> Result<(), ParseError> {
        if self.p.consume_token(&t) {
            Ok(())
        } else {
            Err(ParseError::Unexpected {
                token: self.p.peek_token().token.to_string(),
                context,
            })
        }
    }

    fn ident(&mut self, context: &'static str) -> Result<String, ParseError> {
        let tok = self.p.next_token();
        match tok.token {
            Token::Word(w) => Ok(w.value),
            other => Err(ParseError::Unexpected {
                token: other.to_string(),
                context,
            }),
        }
    }

    fn object_name(&mut self, context: &'static str) -> Result<Name, ParseError> {
        let mut parts = vec![self.ident(context)?];
        while self.eat_token(&Token::Period) {
            parts.push(self.ident(context)?);
        }
        // Three-part names carry a database prefix we do not track.
        while parts.len() > 2 {
            parts.remove(0);
        }
        Ok(match parts.len() {
            1 => Name::unqualified(&parts[0]),
            _ => Name::new(Some(&parts[0]), &parts[1]),
        })
    }

    fn string_literal(&mut self, context: &'static str) -> Result<String, ParseError> {
        let tok = self.p.next_token();
        match tok.token {
            Token::SingleQuotedString(s) => Ok(s),
            other => Err(ParseError::Unexpected {
                token: other.to_string(),
                context,
            }),
        }
    }

    fn integer(&mut self, context: &'static str) -> Result<i64, ParseError> {
        let negative = self.eat_token(&Token::Minus);
        let tok = self.p.next_token();
        match tok.token {
            Token::Number(s, _) => {
                let v: i64 = s.parse().map_err(|_| ParseError::Unexpected {
                    token: s.clone(),
                    context,
                })?;
                Ok(if negative { -v } else { v })
            }
            other => Err(ParseError::Unexpected {
                token: other.to_string(),
                context,
            }),
        }
    }

    fn at_end(&self) -> bool {
        matches!(
            self.p.peek_token().token,
            Token::EOF | Token::SemiColon
        )
    }

    // Statement dispatch.

    fn statement(&mut self) -> Result<Vec<Statement>, ParseError> {
        let head = match self.peek_word() {
            Some(w) => w,
            None => {
                return Err(ParseError::Unexpected {
                    token: self.p.peek_token().token.to_string(),
                    context: "statement",
                })
            }
        };
        match head.as_str() {
            "CREATE" => {
                self.p.next_token();
                self.create().map(|s| vec![s])
            }
            "ALTER" => {
                self.p.next_token();
                self.alter()
            }
            "DROP" => {
                self.p.next_token();
                self.drop_stmt().map(|s| vec![s])
            }
            "BEGIN" | "START" => {
                self.p.next_token();
                self.eat_word("TRANSACTION");
                Ok(vec![Statement::Begin])
            }
            "COMMIT" | "END" => {
                self.p.next_token();
                self.eat_word("TRANSACTION");
                Ok(vec![Statement::Commit])
            }
            tag => Err(ParseError::UnsupportedStatement {
                tag: tag.to_string(),
            }),
        }
    }

    fn create(&mut self) -> Result<Statement, ParseError> {
        let or_replace = self.eat_words(&["OR", "REPLACE"]);
        let head = self.peek_word().unwrap_or_default();
        match head.as_str() {
            "SCHEMA" => {
                self.p.next_token();
                let if_not_exists = self.eat_words(&["IF", "NOT", "EXISTS"]);
                let name = self.ident("CREATE SCHEMA")?;
                Ok(Statement::CreateSchema(CreateSchema {
                    name,
                    if_not_exists,
                }))
            }
            "TYPE" => {
                self.p.next_token();
                self.create_type()
            }
            "SEQUENCE" => {
                self.p.next_token();
                self.create_sequence()
            }
            "TABLE" => {
                self.p.next_token();
                self.create_table()
            }
            "INDEX" => {
                self.p.next_token();
                self.create_index(false)
            }
            "UNIQUE" => {
                self.p.next_token();
                self.expect_word("INDEX", "CREATE UNIQUE INDEX")?;
                self.create_index(true)
            }
            "VIEW" => {
                self.p.next_token();
                self.create_view(or_replace, false)
            }
            "MATERIALIZED" => {
                self.p.next_token();
                self.expect_word("VIEW", "CREATE MATERIALIZED VIEW")?;
                self.create_view(or_replace, true)
            }
            "FUNCTION" => {
                self.p.next_token();
                self.create_routine(RoutineKind::Function, or_replace)
            }
            "PROCEDURE" => {
                self.p.next_token();
                self.create_routine(RoutineKind::Procedure, or_replace)
            }
            "TRIGGER" => {
                self.p.next_token();
                self.create_trigger(or_replace)
            }
            tag => Err(ParseError::UnsupportedStatement {
                tag: format!("CREATE {}", tag),
            }),
        }
    }

    fn create_type(&mut self) -> Result<Statement, ParseError> {
        let name = self.object_name("CREATE TYPE")?;
        self.expect_word("AS", "CREATE TYPE")?;
        if self.eat_word("ENUM") {
            self.expect_token(Token::LParen, "enum labels")?;
            let mut labels = Vec::new();
            if !self.eat_token(&Token::RParen) {
                loop {
                    labels.push(self.string_literal("enum label")?);
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
                self.expect_token(Token::RParen, "enum labels")?;
            }
            Ok(Statement::CreateType(CreateType {
                name,
                body: TypeBody::Enum(labels),
            }))
        } else {
            self.expect_token(Token::LParen, "composite type fields")?;
            let mut fields = Vec::new();
            if !self.eat_token(&Token::RParen) {
                loop {
                    let field = self.ident("composite field")?;
                    let ty = self.p.parse_data_type()?;
                    fields.push((field, ty));
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
                self.expect_token(Token::RParen, "composite type fields")?;
            }
            Ok(Statement::CreateType(CreateType {
                name,
                body: TypeBody::Composite(fields),
            }))
        }
    }

    fn create_sequence(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.eat_words(&["IF", "NOT", "EXISTS"]);
        let name = self.object_name("CREATE SEQUENCE")?;
        let mut options = SequenceOptions::default();
        loop {
            if self.eat_word("INCREMENT") {
                self.eat_word("BY");
                options.increment = Some(self.integer("INCREMENT")?);
            } else if self.eat_word("MINVALUE") {
                options.min_value = Some(self.integer("MINVALUE")?);
            } else if self.eat_word("MAXVALUE") {
                options.max_value = Some(self.integer("MAXVALUE")?);
            } else if self.eat_word("START") {
                self.eat_word("WITH");
                options.start = Some(self.integer("START")?);
            } else if self.eat_word("CACHE") {
                options.cache = Some(self.integer("CACHE")?);
            } else if self.eat_words(&["NO", "MINVALUE"]) || self.eat_words(&["NO", "MAXVALUE"])
                || self.eat_words(&["NO", "CYCLE"])
            {
                // engine defaults, nothing to record
            } else {
                break;
            }
        }
        Ok(Statement::CreateSequence(CreateSequence {
            name,
            if_not_exists,
            options,
        }))
    }

    fn create_table(&mut self) -> Result<Statement, ParseError> {
        let if_not_exists = self.eat_words(&["IF", "NOT", "EXISTS"]);
        let name = self.object_name("CREATE TABLE")?;
        self.expect_token(Token::LParen, "CREATE TABLE")?;

        let mut table = CreateTable {
            name,
            if_not_exists,
            columns: Vec::new(),
            constraints: Vec::new(),
            indexes: Vec::new(),
            storage_params: Vec::new(),
        };

        if !self.eat_token(&Token::RParen) {
            loop {
                self.table_element(&mut table)?;
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "CREATE TABLE")?;
        }

        if self.eat_word("WITH") {
            table.storage_params = self.storage_params()?;
        }

        Ok(Statement::CreateTable(table))
    }

    fn table_element(&mut self, table: &mut CreateTable) -> Result<(), ParseError> {
        let head = self.peek_word().unwrap_or_default();
        match head.as_str() {
            "CONSTRAINT" => {
                self.p.next_token();
                let cname = self.ident("constraint name")?;
                let constraint = self.table_constraint(Some(cname))?;
                table.constraints.push(constraint);
            }
            "PRIMARY" | "UNIQUE" | "FOREIGN" | "CHECK"
                if !(head == "UNIQUE" && self.peek_nth_word(1).as_deref() == Some("INDEX")) =>
            {
                let constraint = self.table_constraint(None)?;
                table.constraints.push(constraint);
            }
            "INDEX" => {
                self.p.next_token();
                let idx = self.inline_index(false, &table.name)?;
                table.indexes.push(idx);
            }
            "UNIQUE" => {
                // UNIQUE INDEX
                self.p.next_token();
                self.expect_word("INDEX", "inline index")?;
                let idx = self.inline_index(true, &table.name)?;
                table.indexes.push(idx);
            }
            "FAMILY" => {
                // column families do not participate in diffing
                self.p.next_token();
                let _ = self.ident("family name")?;
                self.expect_token(Token::LParen, "FAMILY")?;
                loop {
                    let _ = self.ident("family column")?;
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
                self.expect_token(Token::RParen, "FAMILY")?;
            }
            _ => {
                self.column_def(table)?;
            }
        }
        Ok(())
    }

    fn inline_index(&mut self, unique: bool, table: &Name) -> Result<IndexDef, ParseError> {
        let name = if self.p.peek_token().token == Token::LParen {
            // CockroachDB names anonymous inline indexes itself; mirror it
            // so identity is stable before canonicalization.
            None
        } else {
            Some(self.ident("index name")?)
        };
        self.expect_token(Token::LParen, "index columns")?;
        let columns = self.index_columns()?;
        let mut idx = IndexDef {
            name: name.unwrap_or_else(|| {
                let first = columns
                    .first()
                    .and_then(|c| c.column_name())
                    .unwrap_or_else(|| "expr".to_string());
                format!("{}_{}_idx", table.name, first)
            }),
            unique,
            columns,
            storing: Vec::new(),
            predicate: None,
        };
        self.index_tail(&mut idx)?;
        Ok(idx)
    }

    fn index_columns(&mut self) -> Result<Vec<IndexColumn>, ParseError> {
        let mut cols = Vec::new();
        loop {
            let expr = self.p.parse_expr()?;
            let descending = if self.eat_word("DESC") {
                true
            } else {
                self.eat_word("ASC");
                false
            };
            cols.push(IndexColumn { expr, descending });
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        self.expect_token(Token::RParen, "index columns")?;
        Ok(cols)
    }

    fn index_tail(&mut self, idx: &mut IndexDef) -> Result<(), ParseError> {
        loop {
            if self.eat_words(&["USING", "HASH"]) {
                // hash-sharded indexes canonicalize their shard column;
                // the sharding itself is not compared
                if self.eat_word("WITH") {
                    let _ = self.storage_params()?;
                }
            } else if self.eat_word("STORING") || self.eat_word("COVERING") || self.eat_word("INCLUDE") {
                self.expect_token(Token::LParen, "STORING")?;
                loop {
                    idx.storing.push(self.ident("storing column")?);
                    if !self.eat_token(&Token::Comma) {
                        break;
                    }
                }
                self.expect_token(Token::RParen, "STORING")?;
            } else if self.eat_word("WHERE") {
                idx.predicate = Some(self.p.parse_expr()?);
            } else {
                break;
            }
        }
        Ok(())
    }

    fn table_constraint(&mut self, name: Option<String>) -> Result<TableConstraint, ParseError> {
        if self.eat_words(&["PRIMARY", "KEY"]) {
            self.expect_token(Token::LParen, "PRIMARY KEY")?;
            let columns = self.index_columns()?;
            Ok(TableConstraint::PrimaryKey { name, columns })
        } else if self.eat_word("UNIQUE") {
            self.expect_token(Token::LParen, "UNIQUE")?;
            let columns = self.index_columns()?;
            Ok(TableConstraint::Unique { name, columns })
        } else if self.eat_words(&["FOREIGN", "KEY"]) {
            self.expect_token(Token::LParen, "FOREIGN KEY")?;
            let mut columns = Vec::new();
            loop {
                columns.push(self.ident("foreign key column")?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "FOREIGN KEY")?;
            self.expect_word("REFERENCES", "FOREIGN KEY")?;
            let (foreign_table, referred_columns, on_delete, on_update) =
                self.references_clause()?;
            let not_valid = self.eat_words(&["NOT", "VALID"]);
            Ok(TableConstraint::ForeignKey {
                name,
                columns,
                foreign_table,
                referred_columns,
                on_delete,
                on_update,
                not_valid,
            })
        } else if self.eat_word("CHECK") {
            self.expect_token(Token::LParen, "CHECK")?;
            let expr = self.p.parse_expr()?;
            self.expect_token(Token::RParen, "CHECK")?;
            let not_valid = self.eat_words(&["NOT", "VALID"]);
            Ok(TableConstraint::Check {
                name,
                expr,
                not_valid,
            })
        } else {
            Err(ParseError::Unexpected {
                token: self.p.peek_token().token.to_string(),
                context: "table constraint",
            })
        }
    }

    fn references_clause(
        &mut self,
    ) -> Result<
        (
            Name,
            Vec<String>,
            Option<ReferentialAction>,
            Option<ReferentialAction>,
        ),
        ParseError,
    > {
        let foreign_table = self.object_name("REFERENCES")?;
        let mut referred = Vec::new();
        if self.eat_token(&Token::LParen) {
            loop {
                referred.push(self.ident("referenced column")?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "REFERENCES")?;
        }
        let mut on_delete = None;
        let mut on_update = None;
        loop {
            if self.eat_words(&["ON", "DELETE"]) {
                on_delete = Some(self.referential_action()?);
            } else if self.eat_words(&["ON", "UPDATE"]) {
                on_update = Some(self.referential_action()?);
            } else {
                break;
            }
        }
        Ok((foreign_table, referred, on_delete, on_update))
    }

    fn referential_action(&mut self) -> Result<ReferentialAction, ParseError> {
        if self.eat_words(&["NO", "ACTION"]) {
            Ok(ReferentialAction::NoAction)
        } else if self.eat_word("RESTRICT") {
            Ok(ReferentialAction::Restrict)
        } else if self.eat_word("CASCADE") {
            Ok(ReferentialAction::Cascade)
        } else if self.eat_words(&["SET", "NULL"]) {
            Ok(ReferentialAction::SetNull)
        } else if self.eat_words(&["SET", "DEFAULT"]) {
            Ok(ReferentialAction::SetDefault)
        } else {
            Err(ParseError::Unexpected {
                token: self.p.peek_token().token.to_string(),
                context: "referential action",
            })
        }
    }

    fn column_def(&mut self, table: &mut CreateTable) -> Result<(), ParseError> {
        let col_name = self.ident("column name")?;
        let data_type = self.p.parse_data_type()?;
        let mut col = ColumnDef {
            name: col_name.clone(),
            data_type,
            not_null: false,
            default: None,
            computed: None,
            not_visible: false,
        };

        // Inline constraints are hoisted to table level so comparison is
        // uniform.
        loop {
            let named = if self.eat_word("CONSTRAINT") {
                Some(self.ident("constraint name")?)
            } else {
                None
            };
            if self.eat_words(&["NOT", "NULL"]) {
                col.not_null = true;
            } else if self.eat_word("NULL") {
                col.not_null = false;
            } else if self.eat_word("DEFAULT") {
                col.default = Some(self.p.parse_expr()?);
            } else if self.eat_words(&["PRIMARY", "KEY"]) {
                table.constraints.push(TableConstraint::PrimaryKey {
                    name: named.clone(),
                    columns: vec![IndexColumn::named(&col_name)],
                });
                col.not_null = true;
            } else if self.eat_word("UNIQUE") {
                table.constraints.push(TableConstraint::Unique {
                    name: named.clone(),
                    columns: vec![IndexColumn::named(&col_name)],
                });
            } else if self.eat_word("REFERENCES") {
                let (foreign_table, referred, on_delete, on_update) = self.references_clause()?;
                table.constraints.push(TableConstraint::ForeignKey {
                    name: named.clone(),
                    columns: vec![col_name.clone()],
                    foreign_table,
                    referred_columns: referred,
                    on_delete,
                    on_update,
                    not_valid: false,
                });
            } else if self.eat_word("CHECK") {
                self.expect_token(Token::LParen, "CHECK")?;
                let expr = self.p.parse_expr()?;
                self.expect_token(Token::RParen, "CHECK")?;
                table.constraints.push(TableConstraint::Check {
                    name: named.clone(),
                    expr,
                    not_valid: false,
                });
            } else if self.eat_word("AS") {
                self.expect_token(Token::LParen, "computed column")?;
                let expr = self.p.parse_expr()?;
                self.expect_token(Token::RParen, "computed column")?;
                let stored = if self.eat_word("STORED") {
                    true
                } else {
                    self.eat_word("VIRTUAL");
                    false
                };
                col.computed = Some(Computed { expr, stored });
            } else if self.eat_words(&["GENERATED", "ALWAYS"]) {
                self.expect_word("AS", "generated column")?;
                self.expect_token(Token::LParen, "generated column")?;
                let expr = self.p.parse_expr()?;
                self.expect_token(Token::RParen, "generated column")?;
                let stored = if self.eat_word("STORED") {
                    true
                } else {
                    self.eat_word("VIRTUAL");
                    false
                };
                col.computed = Some(Computed { expr, stored });
            } else if self.eat_words(&["NOT", "VISIBLE"]) {
                col.not_visible = true;
            } else if self.eat_word("VISIBLE") {
                col.not_visible = false;
            } else if named.is_some() {
                return Err(ParseError::Unexpected {
                    token: self.p.peek_token().token.to_string(),
                    context: "named column constraint",
                });
            } else {
                break;
            }
        }

        table.columns.push(col);
        Ok(())
    }

    fn storage_params(&mut self) -> Result<Vec<(String, String)>, ParseError> {
        self.expect_token(Token::LParen, "storage parameters")?;
        let mut params = Vec::new();
        loop {
            let key = self.ident("storage parameter")?;
            self.expect_token(Token::Eq, "storage parameters")?;
            // Values are literals or identifiers; keep them as rendered
            // text since storage params are compared textually.
            let value = match self.p.next_token().token {
                Token::SingleQuotedString(s) => escape_text_literal(&s),
                other => other.to_string(),
            };
            params.push((key, value));
            if !self.eat_token(&Token::Comma) {
                break;
            }
        }
        self.expect_token(Token::RParen, "storage parameters")?;
        Ok(params)
    }

    fn create_index(&mut self, unique: bool) -> Result<Statement, ParseError> {
        let if_not_exists = self.eat_words(&["IF", "NOT", "EXISTS"]);
        let name = self.ident("index name")?;
        self.expect_word("ON", "CREATE INDEX")?;
        let table = self.object_name("CREATE INDEX")?;
        if self.eat_word("USING") {
            let _ = self.ident("index method")?;
        }
        self.expect_token(Token::LParen, "index columns")?;
        let columns = self.index_columns()?;
        let mut index = IndexDef {
            name: name.clone(),
            unique,
            columns,
            storing: Vec::new(),
            predicate: None,
        };
        self.index_tail(&mut index)?;
        Ok(Statement::CreateIndex(CreateIndex {
            name,
            table,
            if_not_exists,
            index,
        }))
    }

    fn create_view(&mut self, or_replace: bool, materialized: bool) -> Result<Statement, ParseError> {
        let name = self.object_name("CREATE VIEW")?;
        let mut columns = Vec::new();
        if self.eat_token(&Token::LParen) {
            loop {
                columns.push(self.ident("view column")?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "CREATE VIEW")?;
        }
        self.expect_word("AS", "CREATE VIEW")?;
        let query = self.remaining_text("view query")?;
        Ok(Statement::CreateView(CreateView {
            name,
            or_replace,
            materialized,
            columns,
            query,
        }))
    }

    /// Collects the rest of the statement as renderable text. Token
    /// `Display` output is faithful for literals and quoted identifiers,
    /// and SQL is whitespace-insensitive, so a space join round-trips.
    fn remaining_text(&mut self, context: &'static str) -> Result<String, ParseError> {
        let mut parts = Vec::new();
        loop {
            match self.p.peek_token().token {
                Token::EOF | Token::SemiColon => break,
                _ => {
                    let tok = self.p.next_token();
                    parts.push(tok.token.to_string());
                }
            }
        }
        if parts.is_empty() {
            return Err(ParseError::Expected {
                expected: "query text",
                context,
            });
        }
        Ok(parts.join(" "))
    }

    fn create_routine(
        &mut self,
        kind: RoutineKind,
        or_replace: bool,
    ) -> Result<Statement, ParseError> {
        let name = self.object_name("CREATE FUNCTION")?;
        self.expect_token(Token::LParen, "routine parameters")?;
        let mut params = Vec::new();
        if !self.eat_token(&Token::RParen) {
            loop {
                // `name type` or bare `type`: if the next token terminates
                // the parameter this word was the type.
                let bare_type = matches!(
                    self.p.peek_nth_token(1).token,
                    Token::Comma | Token::RParen
                ) && matches!(self.p.peek_token().token, Token::Word(_));
                if bare_type {
                    let data_type = self.p.parse_data_type()?;
                    params.push(RoutineParam {
                        name: None,
                        data_type,
                    });
                } else {
                    let pname = self.ident("parameter name")?;
                    let data_type = self.p.parse_data_type()?;
                    params.push(RoutineParam {
                        name: Some(pname),
                        data_type,
                    });
                }
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "routine parameters")?;
        }

        let mut routine = CreateRoutine {
            name,
            kind,
            or_replace,
            params,
            returns: None,
            language: None,
            volatility: None,
            body: String::new(),
        };

        loop {
            if self.eat_words(&["RETURNS", "NULL", "ON", "NULL", "INPUT"]) {
                // accepted, not tracked
            } else if self.eat_word("RETURNS") {
                routine.returns = Some(self.p.parse_data_type()?);
            } else if self.eat_word("LANGUAGE") {
                routine.language = Some(self.ident("language")?.to_uppercase());
            } else if self.eat_word("IMMUTABLE") {
                routine.volatility = Some("IMMUTABLE".to_string());
            } else if self.eat_word("STABLE") {
                routine.volatility = Some("STABLE".to_string());
            } else if self.eat_word("VOLATILE") {
                routine.volatility = Some("VOLATILE".to_string());
            } else if self.eat_word("LEAKPROOF") || self.eat_words(&["NOT", "LEAKPROOF"]) {
                // accepted, not tracked
            } else if self.eat_words(&["CALLED", "ON", "NULL", "INPUT"]) || self.eat_word("STRICT") {
                // accepted, not tracked
            } else if self.eat_word("AS") {
                let tok = self.p.next_token();
                routine.body = match tok.token {
                    Token::DollarQuotedString(d) => d.value,
                    Token::SingleQuotedString(s) => s,
                    other => {
                        return Err(ParseError::Unexpected {
                            token: other.to_string(),
                            context: "routine body",
                        })
                    }
                };
            } else if self.at_end() {
                break;
            } else {
                return Err(ParseError::Unexpected {
                    token: self.p.peek_token().token.to_string(),
                    context: "routine attributes",
                });
            }
        }

        if routine.body.is_empty() {
            return Err(ParseError::Expected {
                expected: "AS $$ body $$",
                context: "CREATE FUNCTION",
            });
        }
        Ok(Statement::CreateRoutine(routine))
    }

    fn create_trigger(&mut self, _or_replace: bool) -> Result<Statement, ParseError> {
        let name = self.ident("trigger name")?;
        let timing = if self.eat_word("BEFORE") {
            TriggerTiming::Before
        } else if self.eat_word("AFTER") {
            TriggerTiming::After
        } else {
            return Err(ParseError::Expected {
                expected: "BEFORE or AFTER",
                context: "CREATE TRIGGER",
            });
        };
        let mut events = Vec::new();
        loop {
            if self.eat_word("INSERT") {
                events.push(TriggerEvent::Insert);
            } else if self.eat_word("UPDATE") {
                events.push(TriggerEvent::Update);
                // UPDATE OF <cols> is not modeled
            } else if self.eat_word("DELETE") {
                events.push(TriggerEvent::Delete);
            } else {
                return Err(ParseError::Expected {
                    expected: "INSERT, UPDATE or DELETE",
                    context: "CREATE TRIGGER",
                });
            }
            if !self.eat_word("OR") {
                break;
            }
        }
        self.expect_word("ON", "CREATE TRIGGER")?;
        let table = self.object_name("CREATE TRIGGER")?;
        let mut for_each_row = false;
        if self.eat_words(&["FOR", "EACH", "ROW"]) {
            for_each_row = true;
        } else if self.eat_words(&["FOR", "EACH", "STATEMENT"]) {
            for_each_row = false;
        }
        let when = if self.eat_word("WHEN") {
            self.expect_token(Token::LParen, "WHEN")?;
            let expr = self.p.parse_expr()?;
            self.expect_token(Token::RParen, "WHEN")?;
            Some(expr)
        } else {
            None
        };
        self.expect_word("EXECUTE", "CREATE TRIGGER")?;
        if !self.eat_word("FUNCTION") {
            self.expect_word("PROCEDURE", "CREATE TRIGGER")?;
        }
        let function = self.object_name("trigger function")?;
        if self.eat_token(&Token::LParen) {
            self.expect_token(Token::RParen, "trigger function")?;
        }
        Ok(Statement::CreateTrigger(CreateTrigger {
            name,
            table,
            timing,
            events,
            for_each_row,
            when,
            function,
        }))
    }

    fn alter(&mut self) -> Result<Vec<Statement>, ParseError> {
        if self.eat_word("SEQUENCE") {
            self.eat_words(&["IF", "EXISTS"]);
            let name = self.object_name("ALTER SEQUENCE")?;
            let mut options = SequenceOptions::default();
            loop {
                if self.eat_word("INCREMENT") {
                    self.eat_word("BY");
                    options.increment = Some(self.integer("INCREMENT")?);
                } else if self.eat_word("MINVALUE") {
                    options.min_value = Some(self.integer("MINVALUE")?);
                } else if self.eat_word("MAXVALUE") {
                    options.max_value = Some(self.integer("MAXVALUE")?);
                } else if self.eat_word("START") {
                    self.eat_word("WITH");
                    options.start = Some(self.integer("START")?);
                } else if self.eat_word("CACHE") {
                    options.cache = Some(self.integer("CACHE")?);
                } else {
                    break;
                }
            }
            return Ok(vec![Statement::AlterSequence(AlterSequence {
                name,
                options,
            })]);
        }
        if self.eat_word("TABLE") {
            self.eat_words(&["IF", "EXISTS"]);
            let name = self.object_name("ALTER TABLE")?;
            let mut stmts = Vec::new();
            loop {
                let op = self.alter_table_op()?;
                stmts.push(Statement::AlterTable(AlterTable {
                    name: name.clone(),
                    op,
                }));
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            Ok(stmts)
        } else if self.eat_word("TYPE") {
            let name = self.object_name("ALTER TYPE")?;
            let op = if self.eat_words(&["ADD", "VALUE"]) {
                self.eat_words(&["IF", "NOT", "EXISTS"]);
                let value = self.string_literal("enum value")?;
                let placement = if self.eat_word("BEFORE") {
                    Some(ValuePlacement::Before(self.string_literal("enum value")?))
                } else if self.eat_word("AFTER") {
                    Some(ValuePlacement::After(self.string_literal("enum value")?))
                } else {
                    None
                };
                AlterTypeOp::AddValue { value, placement }
            } else if self.eat_words(&["DROP", "VALUE"]) {
                AlterTypeOp::DropValue(self.string_literal("enum value")?)
            } else {
                return Err(ParseError::Unexpected {
                    token: self.p.peek_token().token.to_string(),
                    context: "ALTER TYPE",
                });
            };
            Ok(vec![Statement::AlterType(AlterType { name, op })])
        } else {
            Err(ParseError::UnsupportedStatement {
                tag: format!("ALTER {}", self.peek_word().unwrap_or_default()),
            })
        }
    }

    fn alter_table_op(&mut self) -> Result<AlterTableOp, ParseError> {
        if self.eat_word("ADD") {
            if self.eat_word("COLUMN") || matches!(self.peek_word().as_deref(), Some(w) if !matches!(w, "CONSTRAINT" | "PRIMARY" | "UNIQUE" | "FOREIGN" | "CHECK"))
            {
                self.eat_words(&["IF", "NOT", "EXISTS"]);
                let mut scratch = CreateTable {
                    name: Name::unqualified("_"),
                    if_not_exists: false,
                    columns: Vec::new(),
                    constraints: Vec::new(),
                    indexes: Vec::new(),
                    storage_params: Vec::new(),
                };
                self.column_def(&mut scratch)?;
                let mut col = scratch.columns.remove(0);
                // An inline PRIMARY KEY/UNIQUE hoisted from ADD COLUMN has
                // no table to land on; keep NOT NULL, discard the rest.
                if !scratch.constraints.is_empty() {
                    col.not_null = col.not_null
                        || scratch
                            .constraints
                            .iter()
                            .any(|c| matches!(c, TableConstraint::PrimaryKey { .. }));
                }
                Ok(AlterTableOp::AddColumn(col))
            } else {
                if self.eat_word("CONSTRAINT") {
                    let cname = self.ident("constraint name")?;
                    Ok(AlterTableOp::AddConstraint(
                        self.table_constraint(Some(cname))?,
                    ))
                } else {
                    Ok(AlterTableOp::AddConstraint(self.table_constraint(None)?))
                }
            }
        } else if self.eat_word("DROP") {
            if self.eat_word("CONSTRAINT") {
                self.eat_words(&["IF", "EXISTS"]);
                Ok(AlterTableOp::DropConstraint(self.ident("constraint")?))
            } else {
                self.eat_word("COLUMN");
                self.eat_words(&["IF", "EXISTS"]);
                let col = self.ident("column")?;
                self.eat_word("CASCADE");
                Ok(AlterTableOp::DropColumn(col))
            }
        } else if self.eat_words(&["ALTER", "PRIMARY", "KEY", "USING", "COLUMNS"]) {
            self.expect_token(Token::LParen, "ALTER PRIMARY KEY")?;
            let columns = self.index_columns()?;
            Ok(AlterTableOp::AlterPrimaryKey(columns))
        } else if self.eat_word("ALTER") {
            self.eat_word("COLUMN");
            let col = self.ident("column")?;
            if self.eat_words(&["SET", "DATA", "TYPE"]) || self.eat_word("TYPE") {
                let data_type = self.p.parse_data_type()?;
                let using = if self.eat_word("USING") {
                    Some(self.p.parse_expr()?)
                } else {
                    None
                };
                Ok(AlterTableOp::AlterColumnType {
                    column: col,
                    data_type,
                    using,
                })
            } else if self.eat_words(&["SET", "NOT", "NULL"]) {
                Ok(AlterTableOp::SetNotNull(col))
            } else if self.eat_words(&["DROP", "NOT", "NULL"]) {
                Ok(AlterTableOp::DropNotNull(col))
            } else if self.eat_words(&["SET", "DEFAULT"]) {
                Ok(AlterTableOp::SetDefault(col, self.p.parse_expr()?))
            } else if self.eat_words(&["DROP", "DEFAULT"]) {
                Ok(AlterTableOp::DropDefault(col))
            } else if self.eat_words(&["SET", "NOT", "VISIBLE"]) {
                Ok(AlterTableOp::SetNotVisible(col))
            } else if self.eat_words(&["SET", "VISIBLE"]) {
                Ok(AlterTableOp::SetVisible(col))
            } else {
                Err(ParseError::Unexpected {
                    token: self.p.peek_token().token.to_string(),
                    context: "ALTER COLUMN",
                })
            }
        } else if self.eat_word("VALIDATE") {
            self.expect_word("CONSTRAINT", "VALIDATE")?;
            Ok(AlterTableOp::ValidateConstraint(self.ident("constraint")?))
        } else if self.eat_word("SET") {
            Ok(AlterTableOp::SetStorageParams(self.storage_params()?))
        } else if self.eat_word("RESET") {
            self.expect_token(Token::LParen, "RESET")?;
            let mut keys = Vec::new();
            loop {
                keys.push(self.ident("storage parameter")?);
                if !self.eat_token(&Token::Comma) {
                    break;
                }
            }
            self.expect_token(Token::RParen, "RESET")?;
            Ok(AlterTableOp::ResetStorageParams(keys))
        } else {
            Err(ParseError::Unexpected {
                token: self.p.peek_token().token.to_string(),
                context: "ALTER TABLE",
            })
        }
    }

    fn drop_stmt(&mut self) -> Result<Statement, ParseError> {
        let kind = match self.peek_word().as_deref() {
            Some("SCHEMA") => ObjectKind::Schema,
            Some("TYPE") => ObjectKind::Type,
            Some("SEQUENCE") => ObjectKind::Sequence,
            Some("TABLE") => ObjectKind::Table,
            Some("INDEX") => ObjectKind::Index,
            Some("VIEW") => ObjectKind::View,
            Some("MATERIALIZED") => {
                self.p.next_token();
                ObjectKind::View
            }
            Some("FUNCTION") | Some("PROCEDURE") => ObjectKind::Routine,
            Some("TRIGGER") => ObjectKind::Trigger,
            other => {
                return Err(ParseError::UnsupportedStatement {
                    tag: format!("DROP {}", other.unwrap_or("")),
                })
            }
        };
        self.p.next_token();
        let if_exists = self.eat_words(&["IF", "EXISTS"]);

        let (name, table) = match kind {
            ObjectKind::Index => {
                let first = self.object_name("DROP INDEX")?;
                if self.eat_token(&Token::AtSign) {
                    let idx = self.ident("index name")?;
                    (Name::unqualified(&idx), Some(first))
                } else {
                    (first, None)
                }
            }
            ObjectKind::Trigger => {
                let trig = self.ident("trigger name")?;
                self.expect_word("ON", "DROP TRIGGER")?;
                let table = self.object_name("DROP TRIGGER")?;
                (Name::unqualified(&trig), Some(table))
            }
            _ => (self.object_name("DROP")?, None),
        };

        // Routines may carry a signature; it is not needed for identity
        // in generated drops, so consume and discard.
        if kind == ObjectKind::Routine && self.eat_token(&Token::LParen) {
            while !self.eat_token(&Token::RParen) {
                if matches!(self.p.peek_token().token, Token::EOF) {
                    return Err(ParseError::Expected {
                        expected: ")",
                        context: "DROP FUNCTION",
                    });
                }
                self.p.next_token();
            }
        }

        let cascade = self.eat_word("CASCADE");
        self.eat_word("RESTRICT");
        Ok(Statement::Drop(Drop {
            kind,
            name,
            table,
            if_exists,
            cascade,
        }))
    }
}

fn escape_text_literal(s: &str) -> String {
    crate::escape::literal(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_inline_index() {
        let stmts = parse_sql(
            "CREATE TABLE users (
                id INT PRIMARY KEY,
                name TEXT NOT NULL,
                status user_status NOT NULL DEFAULT 'active',
                INDEX status_idx (status)
            );",
        )
        .unwrap();
        assert_eq!(stmts.len(), 1);
        let t = match &stmts[0] {
            Statement::CreateTable(t) => t,
            other => panic!("expected table, got {:?}", other),
        };
        assert_eq!(t.columns.len(), 3);
        assert_eq!(t.indexes.len(), 1);
        assert_eq!(t.indexes[0].name, "status_idx");
        // inline PRIMARY KEY hoisted
        assert!(t.primary_key().is_some());
        assert!(t.column("id").unwrap().not_null);
    }

    #[test]
    fn parses_enum_type() {
        let stmts =
            parse_sql("CREATE TYPE user_status AS ENUM ('active', 'inactive', 'suspended')")
                .unwrap();
        match &stmts[0] {
            Statement::CreateType(t) => {
                assert_eq!(
                    t.body,
                    TypeBody::Enum(vec![
                        "active".to_string(),
                        "inactive".to_string(),
                        "suspended".to_string()
                    ])
                );
            }
            other => panic!("expected type, got {:?}", other),
        }
    }

    #[test]
    fn parses_alter_type_add_value() {
        let stmts = parse_sql("ALTER TYPE user_status ADD VALUE 'suspended'").unwrap();
        match &stmts[0] {
            Statement::AlterType(a) => {
                assert_eq!(
                    a.op,
                    AlterTypeOp::AddValue {
                        value: "suspended".to_string(),
                        placement: None
                    }
                );
            }
            other => panic!("expected alter type, got {:?}", other),
        }
    }

    #[test]
    fn multi_op_alter_expands() {
        let stmts =
            parse_sql("ALTER TABLE t ADD COLUMN a INT, DROP COLUMN b").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn rejects_dml() {
        let err = parse_sql("INSERT INTO t VALUES (1)").unwrap_err();
        match err {
            ParseError::UnsupportedStatement { tag } => assert_eq!(tag, "INSERT"),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn parses_partial_unique_index() {
        let stmts = parse_sql(
            "CREATE UNIQUE INDEX active_email ON users (email) STORING (name) WHERE deleted_at IS NULL",
        )
        .unwrap();
        match &stmts[0] {
            Statement::CreateIndex(i) => {
                assert!(i.index.unique);
                assert_eq!(i.index.storing, vec!["name".to_string()]);
                assert!(i.index.predicate.is_some());
            }
            other => panic!("expected index, got {:?}", other),
        }
    }

    #[test]
    fn parses_function_with_dollar_body() {
        let stmts = parse_sql(
            "CREATE FUNCTION add_one(x INT) RETURNS INT LANGUAGE SQL IMMUTABLE AS $$ SELECT x + 1 $$",
        )
        .unwrap();
        match &stmts[0] {
            Statement::CreateRoutine(r) => {
                assert_eq!(r.params.len(), 1);
                assert_eq!(r.language.as_deref(), Some("SQL"));
                assert!(r.body.contains("x + 1"));
            }
            other => panic!("expected routine, got {:?}", other),
        }
    }
}
