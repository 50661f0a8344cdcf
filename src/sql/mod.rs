//! Tokenizer and parser for the bilingual query language.
//!
//! Two keyword vocabularies map onto one command set: the plantation
//! vocabulary (`LAHAN`, `TANAM KE ... BIBIT`, `PANEN ... DARI`,
//! `PUPUK ... DENGAN`, `GUSUR DARI`, `HITUNG`, `INDEKS ... PADA`) and
//! the familiar SQL one (`CREATE TABLE`, `INSERT INTO ... VALUES`,
//! `SELECT ... FROM`, `UPDATE ... SET`, `DELETE FROM`, `CREATE
//! INDEX`). Both sides parse to the same [`Command`] value, so the
//! executor never knows which dialect a client spoke.
//!
//! The parser is deliberately forgiving about case and hard about
//! structure: every failure comes back as a [`ParseError`] carrying a
//! syntax hint, and no partial state leaks out.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::engine::{Row, Value};

/// A parse failure with a user-facing message.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// How a condition combines with the accumulated result of the
/// conditions before it. The first condition's logic is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    And,
    Or,
}

/// Comparison operator of a WHERE condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    Like,
    Between,
    IsNull,
    IsNotNull,
}

/// Right-hand side of a condition: nothing (IS NULL), one value, or a
/// list (IN, BETWEEN).
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    One(Value),
    Many(Vec<Value>),
}

/// One leaf of a WHERE clause: `field op operand`, plus the logic
/// that chains it onto the conditions to its left.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: CondOp,
    pub operand: Operand,
    pub logic: Logic,
}

impl Condition {
    /// The single operand, if there is exactly one.
    pub fn one(&self) -> Option<&Value> {
        match &self.operand {
            Operand::One(v) => Some(v),
            _ => None,
        }
    }

    /// The operand list; empty for `None` and single operands.
    pub fn many(&self) -> &[Value] {
        match &self.operand {
            Operand::Many(vs) => vs,
            _ => &[],
        }
    }
}

/// A parsed WHERE clause. Compound conditions evaluate left to right
/// with no precedence between AND and OR; parentheses are not part of
/// the language.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    Single(Condition),
    Compound(Vec<Condition>),
}

/// ORDER BY key and direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    pub key: String,
    pub descending: bool,
}

/// A fully parsed query, ready for the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Whitespace-only input.
    Empty,
    CreateTable {
        table: String,
    },
    ShowTables,
    ShowIndexes {
        table: Option<String>,
    },
    DropTable {
        table: String,
    },
    Insert {
        table: String,
        data: Row,
    },
    Select {
        table: String,
        cols: Vec<String>,
        criteria: Option<Criteria>,
        sort: Option<Sort>,
        limit: Option<usize>,
        offset: Option<usize>,
    },
    Update {
        table: String,
        updates: Row,
        criteria: Option<Criteria>,
    },
    Delete {
        table: String,
        criteria: Option<Criteria>,
    },
    CreateIndex {
        table: String,
        field: String,
    },
    Aggregate {
        table: String,
        func: String,
        field: String,
        criteria: Option<Criteria>,
        group_by: Option<String>,
    },
}

/// Splits a query string into a flat token stream.
///
/// Matches, in order: multi-character operators, single-character
/// symbols, identifiers, `@name` parameter references, integer
/// literals, and single- or double-quoted strings (no escapes).
/// Anything else is skipped by the scanner.
pub fn tokenize(query: &str) -> Vec<String> {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| {
        Regex::new(r#"\s*(=>|!=|>=|<=|<>|[(),=*.<>?]|[a-zA-Z_]\w*|@\w+|\d+|'[^']*'|"[^"]*")\s*"#)
            .expect("token pattern is valid")
    });
    re.captures_iter(query).map(|c| c[1].to_string()).collect()
}

/// Parses one query, then substitutes `@name` placeholders from
/// `params`. A placeholder whose name is absent stays as-is.
pub fn parse(
    query: &str,
    params: Option<&HashMap<String, Value>>,
) -> Result<Command, ParseError> {
    let tokens = tokenize(query);
    if tokens.is_empty() {
        return Ok(Command::Empty);
    }

    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
    };
    let head = tokens[0].to_ascii_uppercase();
    let mut command = match head.as_str() {
        "LAHAN" => parser.parse_create(),
        "CREATE" => match tokens.get(1).map(|t| t.to_ascii_uppercase()) {
            Some(sub) if sub == "INDEX" => parser.parse_create_index(),
            _ => parser.parse_create(),
        },
        "LIHAT" | "SHOW" => parser.parse_show(),
        "TANAM" | "INSERT" => parser.parse_insert(),
        "PANEN" | "SELECT" => parser.parse_select(),
        "GUSUR" | "DELETE" => parser.parse_delete(),
        "PUPUK" | "UPDATE" => parser.parse_update(),
        "BAKAR" | "DROP" => parser.parse_drop(),
        "INDEKS" => parser.parse_create_index(),
        "HITUNG" => parser.parse_aggregate(),
        _ => Err(ParseError::new(format!("perintah tidak dikenal: {head}"))),
    }?;

    if let Some(params) = params {
        bind_parameters(&mut command, params);
    }
    Ok(command)
}

/// Turns one token into a value: quoted strings lose their quotes,
/// NULL/TRUE/FALSE become their literal values, numeric tokens become
/// numbers, everything else stays a string.
fn normalize_value(token: &str) -> Value {
    if (token.starts_with('\'') || token.starts_with('"')) && token.len() >= 2 {
        return Value::Text(token[1..token.len() - 1].to_string());
    }
    match token.to_ascii_uppercase().as_str() {
        "NULL" => return Value::Null,
        "TRUE" => return Value::Bool(true),
        "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(n) = token.parse::<f64>() {
        return Value::Number(n);
    }
    Value::Text(token.to_string())
}

struct Parser<'a> {
    tokens: &'a [String],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).map(|t| t.as_str())
    }

    fn peek_upper(&self) -> Option<String> {
        self.peek().map(|t| t.to_ascii_uppercase())
    }

    fn next(&mut self) -> Result<&'a str, ParseError> {
        let token = self
            .tokens
            .get(self.pos)
            .ok_or_else(|| ParseError::new("query berakhir terlalu cepat"))?;
        self.pos += 1;
        Ok(token)
    }

    fn next_upper(&mut self) -> Result<String, ParseError> {
        Ok(self.next()?.to_ascii_uppercase())
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ParseError> {
        let token = self.next()?;
        if token != symbol {
            return Err(ParseError::new(format!(
                "diharapkan '{symbol}', dapat '{token}'"
            )));
        }
        Ok(())
    }

    /// Consumes the next token if it matches `keyword` case-insensitively.
    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self
            .peek()
            .is_some_and(|t| t.eq_ignore_ascii_case(keyword))
        {
            self.pos += 1;
            return true;
        }
        false
    }

    fn parse_create(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        let table = if first == "CREATE" {
            if !self.eat_keyword("TABLE") {
                return Err(ParseError::new("Syntax: CREATE TABLE [nama]"));
            }
            self.next()?
        } else {
            self.next()
                .map_err(|_| ParseError::new("Syntax: LAHAN [nama_kebun]"))?
        };
        Ok(Command::CreateTable {
            table: table.to_string(),
        })
    }

    fn parse_show(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        let sub = self.peek_upper().unwrap_or_default();
        match (first.as_str(), sub.as_str()) {
            ("LIHAT", "LAHAN") | ("SHOW", "TABLES") => {
                self.pos += 1;
                Ok(Command::ShowTables)
            }
            ("LIHAT", "INDEKS") | ("SHOW", "INDEXES") => {
                self.pos += 1;
                let table = self.peek().map(|t| t.to_string());
                Ok(Command::ShowIndexes { table })
            }
            _ => Err(ParseError::new(
                "Syntax: LIHAT LAHAN | SHOW TABLES | LIHAT INDEKS [kebun] | SHOW INDEXES [kebun]",
            )),
        }
    }

    fn parse_drop(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        let keyword = if first == "DROP" { "TABLE" } else { "LAHAN" };
        if !self.eat_keyword(keyword) {
            return Err(ParseError::new(
                "Syntax: BAKAR LAHAN [nama] | DROP TABLE [nama]",
            ));
        }
        Ok(Command::DropTable {
            table: self.next()?.to_string(),
        })
    }

    fn parse_insert(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        if first == "INSERT" {
            if !self.eat_keyword("INTO") {
                return Err(ParseError::new("Syntax: INSERT INTO [tabel] ..."));
            }
        } else if !self.eat_keyword("KE") {
            return Err(ParseError::new("Syntax: TANAM KE [kebun] ..."));
        }
        let table = self.next()?.to_string();

        self.expect_symbol("(")
            .map_err(|_| ParseError::new("Syntax: ... [kebun] (kolom1, ...) ..."))?;
        let mut cols = Vec::new();
        loop {
            let token = self
                .next()
                .map_err(|_| ParseError::new("kurung kolom tidak ditutup"))?;
            if token == ")" {
                break;
            }
            if token != "," {
                cols.push(token.to_string());
            }
        }

        let keyword = self.next_upper()?;
        if keyword != "BIBIT" && keyword != "VALUES" {
            return Err(ParseError::new("diharapkan BIBIT atau VALUES"));
        }

        self.expect_symbol("(")
            .map_err(|_| ParseError::new("Syntax: ... BIBIT (nilai1, ...)"))?;
        let mut vals = Vec::new();
        loop {
            let token = self
                .next()
                .map_err(|_| ParseError::new("kurung nilai tidak ditutup"))?;
            if token == ")" {
                break;
            }
            if token != "," {
                vals.push(normalize_value(token));
            }
        }

        if cols.len() != vals.len() {
            return Err(ParseError::new("jumlah kolom dan nilai tidak sama"));
        }
        let data: Row = cols.into_iter().zip(vals).collect();
        Ok(Command::Insert { table, data })
    }

    fn parse_select(&mut self) -> Result<Command, ParseError> {
        self.pos += 1; // PANEN / SELECT

        let mut cols = Vec::new();
        loop {
            let token = self
                .next()
                .map_err(|_| ParseError::new("diharapkan DARI atau FROM"))?;
            let upper = token.to_ascii_uppercase();
            if upper == "DARI" || upper == "FROM" {
                break;
            }
            if token != "," {
                cols.push(token.to_string());
            }
        }
        let table = self.next()?.to_string();

        let criteria = self.parse_optional_where()?;

        let mut sort = None;
        if self.eat_keyword("ORDER") {
            self.eat_keyword("BY");
            let key = self.next()?.to_string();
            let mut descending = false;
            if let Some(dir) = self.peek_upper() {
                if dir == "ASC" || dir == "DESC" {
                    descending = dir == "DESC";
                    self.pos += 1;
                }
            }
            sort = Some(Sort { key, descending });
        }

        let limit = self.parse_count_after("LIMIT")?;
        let offset = self.parse_count_after("OFFSET")?;

        Ok(Command::Select {
            table,
            cols,
            criteria,
            sort,
            limit,
            offset,
        })
    }

    fn parse_count_after(&mut self, keyword: &str) -> Result<Option<usize>, ParseError> {
        if !self.eat_keyword(keyword) {
            return Ok(None);
        }
        let token = self.next()?;
        let count = token
            .parse::<usize>()
            .map_err(|_| ParseError::new(format!("{keyword} butuh angka, dapat '{token}'")))?;
        Ok(Some(count))
    }

    fn parse_optional_where(&mut self) -> Result<Option<Criteria>, ParseError> {
        match self.peek_upper().as_deref() {
            Some("DIMANA") | Some("WHERE") => {
                self.pos += 1;
                self.parse_where()
            }
            _ => Ok(None),
        }
    }

    /// Parses conditions until a clause keyword or the end of input.
    /// `AND`/`OR` tokens set the chaining logic of the condition that
    /// follows them.
    fn parse_where(&mut self) -> Result<Option<Criteria>, ParseError> {
        let mut conditions: Vec<Condition> = Vec::new();
        let mut logic = Logic::And;

        while let Some(token) = self.peek() {
            let upper = token.to_ascii_uppercase();
            match upper.as_str() {
                "AND" => {
                    logic = Logic::And;
                    self.pos += 1;
                    continue;
                }
                "OR" => {
                    logic = Logic::Or;
                    self.pos += 1;
                    continue;
                }
                "DENGAN" | "ORDER" | "LIMIT" | "OFFSET" | "GROUP" | "KELOMPOK" => break,
                _ => {}
            }

            let field = self.next()?.to_string();
            let op = self
                .next()
                .map_err(|_| ParseError::new(format!("kondisi '{field}' tidak lengkap")))?
                .to_ascii_uppercase();

            let condition = match op.as_str() {
                "BETWEEN" => {
                    let low = normalize_value(self.next()?);
                    if !self.eat_keyword("AND") {
                        return Err(ParseError::new("Syntax: [field] BETWEEN [a] AND [b]"));
                    }
                    let high = normalize_value(self.next()?);
                    Condition {
                        field,
                        op: CondOp::Between,
                        operand: Operand::Many(vec![low, high]),
                        logic,
                    }
                }
                "IS" => {
                    let sub = self.next_upper()?;
                    let op = if sub == "NULL" {
                        CondOp::IsNull
                    } else if sub == "NOT" && self.eat_keyword("NULL") {
                        CondOp::IsNotNull
                    } else {
                        return Err(ParseError::new("Syntax: [field] IS [NOT] NULL"));
                    };
                    Condition {
                        field,
                        op,
                        operand: Operand::None,
                        logic,
                    }
                }
                "IN" => Condition {
                    field,
                    op: CondOp::In,
                    operand: Operand::Many(self.parse_value_list()?),
                    logic,
                },
                "NOT" => {
                    if !self.eat_keyword("IN") {
                        return Err(ParseError::new("Syntax: [field] NOT IN (...)"));
                    }
                    Condition {
                        field,
                        op: CondOp::NotIn,
                        operand: Operand::Many(self.parse_value_list()?),
                        logic,
                    }
                }
                "LIKE" => Condition {
                    field,
                    op: CondOp::Like,
                    operand: Operand::One(normalize_value(self.next()?)),
                    logic,
                },
                "=" | "!=" | "<>" | "<" | "<=" | ">" | ">=" => {
                    let op = match op.as_str() {
                        "=" => CondOp::Eq,
                        "!=" | "<>" => CondOp::Ne,
                        "<" => CondOp::Lt,
                        "<=" => CondOp::Le,
                        ">" => CondOp::Gt,
                        _ => CondOp::Ge,
                    };
                    Condition {
                        field,
                        op,
                        operand: Operand::One(normalize_value(self.next()?)),
                        logic,
                    }
                }
                other => {
                    return Err(ParseError::new(format!("operator tidak dikenal: {other}")))
                }
            };
            conditions.push(condition);
        }

        Ok(match conditions.len() {
            0 => None,
            1 => Some(Criteria::Single(conditions.pop().expect("one condition"))),
            _ => Some(Criteria::Compound(conditions)),
        })
    }

    fn parse_value_list(&mut self) -> Result<Vec<Value>, ParseError> {
        self.expect_symbol("(")?;
        let mut values = Vec::new();
        loop {
            let token = self
                .next()
                .map_err(|_| ParseError::new("daftar nilai tidak ditutup"))?;
            if token == ")" {
                break;
            }
            if token != "," {
                values.push(normalize_value(token));
            }
        }
        Ok(values)
    }

    fn parse_delete(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        let keyword = if first == "DELETE" { "FROM" } else { "DARI" };
        if !self.eat_keyword(keyword) {
            return Err(ParseError::new(
                "Syntax: GUSUR DARI [kebun] | DELETE FROM [tabel]",
            ));
        }
        let table = self.next()?.to_string();
        let criteria = self.parse_optional_where()?;
        Ok(Command::Delete { table, criteria })
    }

    fn parse_update(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        let table = self.next()?.to_string();
        let keyword = if first == "UPDATE" { "SET" } else { "DENGAN" };
        if !self.eat_keyword(keyword) {
            return Err(ParseError::new(format!("diharapkan {keyword}")));
        }

        let mut updates = Row::new();
        while let Some(token) = self.peek() {
            let upper = token.to_ascii_uppercase();
            if upper == "DIMANA" || upper == "WHERE" {
                break;
            }
            if token == "," {
                self.pos += 1;
                continue;
            }
            let key = self.next()?.to_string();
            self.expect_symbol("=")?;
            let value = normalize_value(self.next()?);
            updates.insert(key, value);
        }

        let criteria = self.parse_optional_where()?;
        Ok(Command::Update {
            table,
            updates,
            criteria,
        })
    }

    fn parse_create_index(&mut self) -> Result<Command, ParseError> {
        let first = self.next_upper()?;
        if first == "CREATE" {
            self.pos += 1; // INDEX
            // An index name before ON is accepted and ignored; the
            // engine keys indexes by (table, field).
            if !self.peek().is_some_and(|t| t.eq_ignore_ascii_case("ON")) {
                self.next()?;
            }
            if !self.eat_keyword("ON") {
                return Err(ParseError::new(
                    "Syntax: CREATE INDEX [nama] ON [kebun] ([field])",
                ));
            }
            let table = self.next()?.to_string();
            self.expect_symbol("(")?;
            let field = self.next()?.to_string();
            self.expect_symbol(")")?;
            Ok(Command::CreateIndex { table, field })
        } else {
            let table = self.next()?.to_string();
            if !self.eat_keyword("PADA") {
                return Err(ParseError::new("Syntax: INDEKS [kebun] PADA [field]"));
            }
            let field = self.next()?.to_string();
            Ok(Command::CreateIndex { table, field })
        }
    }

    fn parse_aggregate(&mut self) -> Result<Command, ParseError> {
        self.pos += 1; // HITUNG
        let func = self.next()?.to_string();
        self.expect_symbol("(")
            .map_err(|_| ParseError::new("Syntax: HITUNG FN(field) DARI [kebun]"))?;
        let mut field = self.next()?.to_string();
        if field == "*" {
            field.clear();
        }
        self.expect_symbol(")")?;

        let from = self.next_upper()?;
        if from != "DARI" && from != "FROM" {
            return Err(ParseError::new("Syntax: HITUNG FN(field) DARI [kebun]"));
        }
        let table = self.next()?.to_string();

        let criteria = self.parse_optional_where()?;

        let mut group_by = None;
        match self.peek_upper().as_deref() {
            Some("KELOMPOK") => {
                self.pos += 1;
                group_by = Some(self.next()?.to_string());
            }
            Some("GROUP") => {
                self.pos += 1;
                if !self.eat_keyword("BY") {
                    return Err(ParseError::new("Syntax: ... GROUP BY [field]"));
                }
                group_by = Some(self.next()?.to_string());
            }
            _ => {}
        }

        Ok(Command::Aggregate {
            table,
            func,
            field,
            criteria,
            group_by,
        })
    }
}

fn bind_parameters(command: &mut Command, params: &HashMap<String, Value>) {
    match command {
        Command::Insert { data, .. } => {
            for value in data.values_mut() {
                bind_value(value, params);
            }
        }
        Command::Select { criteria, .. }
        | Command::Update { criteria, .. }
        | Command::Delete { criteria, .. }
        | Command::Aggregate { criteria, .. } => bind_criteria(criteria, params),
        _ => {}
    }
}

fn bind_criteria(criteria: &mut Option<Criteria>, params: &HashMap<String, Value>) {
    let Some(criteria) = criteria else {
        return;
    };
    match criteria {
        Criteria::Single(condition) => bind_condition(condition, params),
        Criteria::Compound(conditions) => {
            for condition in conditions {
                bind_condition(condition, params);
            }
        }
    }
}

fn bind_condition(condition: &mut Condition, params: &HashMap<String, Value>) {
    match &mut condition.operand {
        Operand::None => {}
        Operand::One(value) => bind_value(value, params),
        Operand::Many(values) => {
            for value in values {
                bind_value(value, params);
            }
        }
    }
}

fn bind_value(value: &mut Value, params: &HashMap<String, Value>) {
    if let Value::Text(s) = value {
        if let Some(name) = s.strip_prefix('@') {
            if let Some(bound) = params.get(name) {
                *value = bound.clone();
            }
        }
    }
}
