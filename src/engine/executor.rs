//! Command execution: heap scans, predicate matching, the SELECT
//! pipeline, mutations, index maintenance, and aggregation.

use regex::RegexBuilder;
use std::cmp::Ordering;
use tracing::debug;

use super::btree::{BTreeIndex, IndexStats, DEFAULT_ORDER};
use super::catalog::{self, TableEntry};
use super::storage::{self, DATA_HEADER_SIZE, MAX_RECORD_SIZE, PAGE_SIZE};
use super::{Engine, EngineError, QueryResult, Row, Value};
use crate::sql::{Command, CondOp, Condition, Criteria, Sort};

impl Engine {
    /// Dispatches one parsed command. Every arm returns a value or an
    /// error; none of them leave the engine in a half-applied state
    /// beyond what the individual operations document.
    pub(crate) fn execute(&mut self, command: Command) -> Result<QueryResult, EngineError> {
        match command {
            Command::Empty => Ok(QueryResult::Message(String::new())),
            Command::CreateTable { table } => {
                catalog::create_table(&mut self.pager, &table).map(QueryResult::Message)
            }
            Command::ShowTables => {
                catalog::list_tables(&mut self.pager).map(QueryResult::Tables)
            }
            Command::DropTable { table } => {
                let message = catalog::drop_table(&mut self.pager, &table)?;
                // Indexes over the dropped table would otherwise keep
                // serving rows that no longer exist.
                let prefix = format!("{table}.");
                self.indexes.retain(|key, _| !key.starts_with(&prefix));
                Ok(QueryResult::Message(message))
            }
            Command::Insert { table, data } => {
                self.insert(&table, data).map(QueryResult::Message)
            }
            Command::Select {
                table,
                cols,
                criteria,
                sort,
                limit,
                offset,
            } => {
                let rows = self.select(&table, criteria.as_ref(), sort.as_ref(), limit, offset)?;
                Ok(QueryResult::Rows(project(rows, &cols)))
            }
            Command::Update {
                table,
                updates,
                criteria,
            } => self
                .update(&table, updates, criteria.as_ref())
                .map(QueryResult::Message),
            Command::Delete { table, criteria } => {
                self.delete(&table, criteria.as_ref()).map(QueryResult::Message)
            }
            Command::CreateIndex { table, field } => {
                self.create_index(&table, &field).map(QueryResult::Message)
            }
            Command::ShowIndexes { table } => Ok(self.show_indexes(table.as_deref())),
            Command::Aggregate {
                table,
                func,
                field,
                criteria,
                group_by,
            } => self.aggregate(&table, &func, &field, criteria.as_ref(), group_by.as_deref()),
        }
    }

    fn find_required(&mut self, table: &str) -> Result<TableEntry, EngineError> {
        catalog::find_table(&mut self.pager, table)?
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    /// Appends one row to the table's last page, spilling into a
    /// freshly allocated page when it does not fit, then feeds the row
    /// to every index on the table.
    fn insert(&mut self, table: &str, data: Row) -> Result<String, EngineError> {
        if data.is_empty() {
            return Err(EngineError::Invalid("data bibit kosong".to_string()));
        }
        let entry = self.find_required(table)?;

        let record = serde_json::to_vec(&data)
            .map_err(|e| EngineError::Internal(format!("gagal serialisasi record: {e}")))?;
        if record.len() > MAX_RECORD_SIZE {
            return Err(EngineError::Full(format!(
                "record {} byte melebihi batas {MAX_RECORD_SIZE} byte",
                record.len()
            )));
        }
        let total_len = 2 + record.len();

        let mut page_id = entry.last_page;
        let mut page = self.pager.read_page(page_id)?;
        let mut free = storage::page_free_offset(&page) as usize;

        if free + total_len > PAGE_SIZE {
            let new_page_id = self.pager.alloc_page()?;
            storage::set_page_next(&mut page, new_page_id);
            self.pager.write_page(page_id, &page)?;
            catalog::update_last_page(&mut self.pager, table, new_page_id)?;

            page_id = new_page_id;
            page = self.pager.read_page(page_id)?;
            free = storage::page_free_offset(&page) as usize;
        }

        storage::write_u16(&mut page, free, record.len() as u16);
        page[free + 2..free + total_len].copy_from_slice(&record);
        let new_count = storage::page_count(&page) + 1;
        storage::set_page_count(&mut page, new_count);
        storage::set_page_free_offset(&mut page, (free + total_len) as u16);
        self.pager.write_page(page_id, &page)?;

        self.update_indexes(table, &data);
        Ok("Bibit tertanam.".to_string())
    }

    fn update_indexes(&mut self, table: &str, data: &Row) {
        let prefix = format!("{table}.");
        for (key, index) in self.indexes.iter_mut() {
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(value) = data.get(&index.key_field) {
                index.insert(value.clone(), data.clone());
            }
        }
    }

    /// The SELECT pipeline: resolve rows (index lookup when a lone
    /// equality condition hits an index and no sort is requested,
    /// otherwise a full scan), stable sort, then OFFSET and LIMIT.
    /// Projection happens in `execute`, after this returns.
    fn select(
        &mut self,
        table: &str,
        criteria: Option<&Criteria>,
        sort: Option<&Sort>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Row>, EngineError> {
        let entry = self.find_required(table)?;

        let mut rows = match self.index_lookup(table, criteria, sort) {
            Some(rows) => rows,
            None => self.scan_table(&entry, criteria)?,
        };

        if let Some(sort) = sort {
            rows.sort_by(|a, b| {
                let left = a.get(&sort.key).unwrap_or(&Value::Null);
                let right = b.get(&sort.key).unwrap_or(&Value::Null);
                let ord = left.compare(right);
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        let start = offset.unwrap_or(0);
        if start >= rows.len() {
            return Ok(Vec::new());
        }
        let end = limit.map_or(rows.len(), |l| (start + l).min(rows.len()));
        rows.truncate(end);
        if start > 0 {
            rows.drain(..start);
        }
        Ok(rows)
    }

    fn index_lookup(
        &self,
        table: &str,
        criteria: Option<&Criteria>,
        sort: Option<&Sort>,
    ) -> Option<Vec<Row>> {
        if sort.is_some() {
            return None;
        }
        let Some(Criteria::Single(condition)) = criteria else {
            return None;
        };
        if condition.op != CondOp::Eq {
            return None;
        }
        let index = self.indexes.get(&format!("{table}.{}", condition.field))?;
        Some(index.search(condition.one()?))
    }

    /// Walks the table's page chain, decoding every slot and keeping
    /// the rows the criteria accept. A slot that cannot be decoded
    /// aborts the query rather than quietly vanishing.
    fn scan_table(
        &mut self,
        entry: &TableEntry,
        criteria: Option<&Criteria>,
    ) -> Result<Vec<Row>, EngineError> {
        let mut results = Vec::new();
        let mut page_id = entry.first_page;

        while page_id != 0 {
            let page = self.pager.read_page(page_id)?;
            let count = storage::page_count(&page) as usize;
            let mut offset = DATA_HEADER_SIZE;

            for _ in 0..count {
                let len = storage::read_u16(&page, offset) as usize;
                if offset + 2 + len > PAGE_SIZE {
                    return Err(EngineError::Corrupt(format!(
                        "slot melewati batas halaman {page_id}"
                    )));
                }
                let row: Row = serde_json::from_slice(&page[offset + 2..offset + 2 + len])
                    .map_err(|e| {
                        EngineError::Corrupt(format!(
                            "record tidak terbaca di halaman {page_id}: {e}"
                        ))
                    })?;
                if check_match(&row, criteria) {
                    results.push(row);
                }
                offset += 2 + len;
            }
            page_id = storage::page_next(&page);
        }
        Ok(results)
    }

    /// Removes matching rows, re-packing each touched page in place.
    /// Emptied pages stay linked in the chain so the directory's
    /// last-page pointer remains valid.
    fn delete_rows(
        &mut self,
        table: &str,
        criteria: Option<&Criteria>,
    ) -> Result<usize, EngineError> {
        let entry = self.find_required(table)?;
        let mut removed = 0usize;
        let mut page_id = entry.first_page;

        while page_id != 0 {
            let mut page = self.pager.read_page(page_id)?;
            let count = storage::page_count(&page) as usize;
            let next = storage::page_next(&page);

            let mut kept: Vec<Vec<u8>> = Vec::new();
            let mut offset = DATA_HEADER_SIZE;
            for _ in 0..count {
                let len = storage::read_u16(&page, offset) as usize;
                if offset + 2 + len > PAGE_SIZE {
                    return Err(EngineError::Corrupt(format!(
                        "slot melewati batas halaman {page_id}"
                    )));
                }
                let bytes = page[offset + 2..offset + 2 + len].to_vec();
                let row: Row = serde_json::from_slice(&bytes).map_err(|e| {
                    EngineError::Corrupt(format!("record tidak terbaca di halaman {page_id}: {e}"))
                })?;
                if check_match(&row, criteria) {
                    removed += 1;
                } else {
                    kept.push(bytes);
                }
                offset += 2 + len;
            }

            if kept.len() < count {
                let mut write_offset = DATA_HEADER_SIZE;
                storage::set_page_count(&mut page, kept.len() as u16);
                for record in &kept {
                    storage::write_u16(&mut page, write_offset, record.len() as u16);
                    page[write_offset + 2..write_offset + 2 + record.len()]
                        .copy_from_slice(record);
                    write_offset += 2 + record.len();
                }
                storage::set_page_free_offset(&mut page, write_offset as u16);
                page[write_offset..].fill(0);
                self.pager.write_page(page_id, &page)?;
            }
            page_id = next;
        }
        Ok(removed)
    }

    fn delete(&mut self, table: &str, criteria: Option<&Criteria>) -> Result<String, EngineError> {
        let removed = self.delete_rows(table, criteria)?;
        self.rebuild_indexes(table)?;
        Ok(format!("Berhasil menggusur {removed} bibit."))
    }

    /// UPDATE is select + delete + re-insert of the merged rows. The
    /// index rebuild at the end restores the guarantee that indexed
    /// payloads correspond to live rows.
    fn update(
        &mut self,
        table: &str,
        updates: Row,
        criteria: Option<&Criteria>,
    ) -> Result<String, EngineError> {
        let records = self.select(table, criteria, None, None, None)?;
        if records.is_empty() {
            return Ok("Tidak ada bibit yang cocok untuk dipupuk.".to_string());
        }

        self.delete_rows(table, criteria)?;

        let mut count = 0usize;
        for mut record in records {
            for (key, value) in &updates {
                record.insert(key.clone(), value.clone());
            }
            self.insert(table, record)?;
            count += 1;
        }

        self.rebuild_indexes(table)?;
        Ok(format!("Berhasil memupuk {count} bibit."))
    }

    /// Builds a fresh index over `table.field` from a full scan.
    /// Creating an index that already exists is a benign success.
    fn create_index(&mut self, table: &str, field: &str) -> Result<String, EngineError> {
        let entry = self.find_required(table)?;
        let key = format!("{table}.{field}");
        if self.indexes.contains_key(&key) {
            return Ok(format!("Indeks pada '{key}' sudah ada."));
        }

        let rows = self.scan_table(&entry, None)?;
        let mut index = BTreeIndex::new(DEFAULT_ORDER, key.clone(), field.to_string());
        for row in &rows {
            if let Some(value) = row.get(field) {
                index.insert(value.clone(), row.clone());
            }
        }
        debug!(index = %key, rows = rows.len(), "index built");

        let message = format!("Indeks dibuat pada '{key}' ({} record terindeks)", rows.len());
        self.indexes.insert(key, index);
        Ok(message)
    }

    /// Discards and repopulates every index over `table` from the
    /// heap. Called after mutations that move or remove rows.
    fn rebuild_indexes(&mut self, table: &str) -> Result<(), EngineError> {
        let prefix = format!("{table}.");
        let keys: Vec<String> = self
            .indexes
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        if keys.is_empty() {
            return Ok(());
        }

        let entry = self.find_required(table)?;
        let rows = self.scan_table(&entry, None)?;
        for key in keys {
            let index = self.indexes.get_mut(&key).expect("index key just listed");
            index.clear();
            let field = index.key_field.clone();
            for row in &rows {
                if let Some(value) = row.get(&field) {
                    index.insert(value.clone(), row.clone());
                }
            }
        }
        debug!(table, "indexes rebuilt");
        Ok(())
    }

    fn show_indexes(&self, table: Option<&str>) -> QueryResult {
        let mut stats: Vec<IndexStats> = match table {
            Some(table) => {
                let prefix = format!("{table}.");
                self.indexes
                    .iter()
                    .filter(|(key, _)| key.starts_with(&prefix))
                    .map(|(_, index)| index.stats())
                    .collect()
            }
            None => self.indexes.values().map(BTreeIndex::stats).collect(),
        };
        if let Some(table) = table {
            if stats.is_empty() {
                return QueryResult::Message(format!("Tidak ada indeks pada '{table}'"));
            }
        }
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        QueryResult::Indexes(stats)
    }

    /// COUNT/SUM/AVG/MIN/MAX over the matching rows, optionally
    /// partitioned by a grouping field. Only values that are numbers
    /// contribute to the numeric statistics.
    fn aggregate(
        &mut self,
        table: &str,
        func: &str,
        field: &str,
        criteria: Option<&Criteria>,
        group_by: Option<&str>,
    ) -> Result<QueryResult, EngineError> {
        let records = self.select(table, criteria, None, None, None)?;

        if let Some(group_by) = group_by {
            return Ok(QueryResult::Rows(grouped_aggregate(
                &records, func, field, group_by,
            )?));
        }

        let mut result = Row::new();
        match func.to_ascii_uppercase().as_str() {
            "COUNT" => {
                result.insert("count".to_string(), Value::Number(records.len() as f64));
            }
            "SUM" => {
                result.insert("sum".to_string(), Value::Number(numeric_sum(&records, field)));
                result.insert("field".to_string(), Value::Text(field.to_string()));
            }
            "AVG" => {
                if records.is_empty() {
                    result.insert("avg".to_string(), Value::Number(0.0));
                    result.insert("count".to_string(), Value::Number(0.0));
                } else {
                    let avg = numeric_sum(&records, field) / records.len() as f64;
                    result.insert("avg".to_string(), Value::Number(avg));
                    result.insert("field".to_string(), Value::Text(field.to_string()));
                    result.insert("count".to_string(), Value::Number(records.len() as f64));
                }
            }
            "MIN" => {
                result.insert("min".to_string(), Value::Number(numeric_min(&records, field)));
                result.insert("field".to_string(), Value::Text(field.to_string()));
            }
            "MAX" => {
                result.insert("max".to_string(), Value::Number(numeric_max(&records, field)));
                result.insert("field".to_string(), Value::Text(field.to_string()));
            }
            other => {
                return Err(EngineError::Invalid(format!(
                    "fungsi agregat tidak dikenal: {other}"
                )))
            }
        }
        Ok(QueryResult::Record(result))
    }
}

/// Projects rows down to the requested columns. An empty list or a
/// lone `*` keeps rows unchanged; fields absent from a row are
/// dropped from its projection, not emitted as null.
fn project(rows: Vec<Row>, cols: &[String]) -> Vec<Row> {
    if cols.is_empty() || (cols.len() == 1 && cols[0] == "*") {
        return rows;
    }
    rows.into_iter()
        .map(|row| {
            let mut projected = Row::new();
            for col in cols {
                if let Some(value) = row.get(col) {
                    projected.insert(col.clone(), value.clone());
                }
            }
            projected
        })
        .collect()
}

/// Evaluates a criteria tree against one row: a left fold over the
/// conditions, each combined with the accumulator by its own AND/OR.
/// There is no precedence; evaluation is strictly left to right.
fn check_match(row: &Row, criteria: Option<&Criteria>) -> bool {
    match criteria {
        None => true,
        Some(Criteria::Single(condition)) => check_condition(row, condition),
        Some(Criteria::Compound(conditions)) => {
            let mut acc = true;
            for (i, condition) in conditions.iter().enumerate() {
                let matches = check_condition(row, condition);
                if i == 0 {
                    acc = matches;
                } else if condition.logic == crate::sql::Logic::Or {
                    acc = acc || matches;
                } else {
                    acc = acc && matches;
                }
            }
            acc
        }
    }
}

fn check_condition(row: &Row, condition: &Condition) -> bool {
    let value = match row.get(&condition.field) {
        Some(value) => value,
        // A missing field satisfies IS NULL and nothing else.
        None => return condition.op == CondOp::IsNull,
    };

    let compare_one = |accept: fn(Ordering) -> bool| -> bool {
        condition
            .one()
            .map(|target| accept(value.compare(target)))
            .unwrap_or(false)
    };

    match condition.op {
        CondOp::Eq => compare_one(|o| o == Ordering::Equal),
        CondOp::Ne => compare_one(|o| o != Ordering::Equal),
        CondOp::Lt => compare_one(|o| o == Ordering::Less),
        CondOp::Le => compare_one(|o| o != Ordering::Greater),
        CondOp::Gt => compare_one(|o| o == Ordering::Greater),
        CondOp::Ge => compare_one(|o| o != Ordering::Less),
        CondOp::In => condition
            .many()
            .iter()
            .any(|t| value.compare(t) == Ordering::Equal),
        CondOp::NotIn => !condition
            .many()
            .iter()
            .any(|t| value.compare(t) == Ordering::Equal),
        CondOp::Like => condition
            .one()
            .map(|pattern| like_match(value, pattern))
            .unwrap_or(false),
        CondOp::Between => {
            let targets = condition.many();
            targets.len() == 2
                && value.compare(&targets[0]) != Ordering::Less
                && value.compare(&targets[1]) != Ordering::Greater
        }
        CondOp::IsNull => matches!(value, Value::Null),
        CondOp::IsNotNull => !matches!(value, Value::Null),
    }
}

/// Case-insensitive match of `^pattern$` with `%` standing for `.*`.
/// Other regex metacharacters in the pattern are left alone and hit
/// the regex engine as-is; an unparsable pattern matches nothing.
fn like_match(value: &Value, pattern: &Value) -> bool {
    let pattern = format!("^{}$", pattern.text_form().replace('%', ".*"));
    match RegexBuilder::new(&pattern).case_insensitive(true).build() {
        Ok(re) => re.is_match(&value.text_form()),
        Err(_) => false,
    }
}

fn numeric_sum(rows: &[Row], field: &str) -> f64 {
    rows.iter()
        .filter_map(|row| row.get(field).and_then(Value::as_number))
        .sum()
}

fn numeric_min(rows: &[Row], field: &str) -> f64 {
    let min = rows
        .iter()
        .filter_map(|row| row.get(field).and_then(Value::as_number))
        .fold(f64::INFINITY, f64::min);
    if min.is_finite() {
        min
    } else {
        0.0
    }
}

fn numeric_max(rows: &[Row], field: &str) -> f64 {
    let max = rows
        .iter()
        .filter_map(|row| row.get(field).and_then(Value::as_number))
        .fold(f64::NEG_INFINITY, f64::max);
    if max.is_finite() {
        max
    } else {
        0.0
    }
}

/// Partitions rows by the grouping field (a missing field groups as
/// null) and computes the aggregate per group. Groups come out in
/// first-seen row order.
fn grouped_aggregate(
    records: &[Row],
    func: &str,
    field: &str,
    group_by: &str,
) -> Result<Vec<Row>, EngineError> {
    let mut groups: Vec<(Value, Vec<Row>)> = Vec::new();
    for record in records {
        let key = record.get(group_by).cloned().unwrap_or(Value::Null);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(record.clone()),
            None => groups.push((key, vec![record.clone()])),
        }
    }

    let func_upper = func.to_ascii_uppercase();
    let mut results = Vec::with_capacity(groups.len());
    for (key, members) in groups {
        let mut row = Row::new();
        row.insert(group_by.to_string(), key);
        match func_upper.as_str() {
            "COUNT" => {
                row.insert("count".to_string(), Value::Number(members.len() as f64));
            }
            "SUM" => {
                row.insert("sum".to_string(), Value::Number(numeric_sum(&members, field)));
            }
            "AVG" => {
                let avg = numeric_sum(&members, field) / members.len() as f64;
                row.insert("avg".to_string(), Value::Number(avg));
            }
            "MIN" => {
                row.insert("min".to_string(), Value::Number(numeric_min(&members, field)));
            }
            "MAX" => {
                row.insert("max".to_string(), Value::Number(numeric_max(&members, field)));
            }
            other => {
                return Err(EngineError::Invalid(format!(
                    "fungsi agregat tidak dikenal: {other}"
                )))
            }
        }
        results.push(row);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_engine() -> (tempfile::TempDir, Engine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(dir.path().join("exec.sawit")).unwrap();
        (dir, engine)
    }

    fn run(engine: &mut Engine, query: &str) -> QueryResult {
        engine.query(query, None).unwrap()
    }

    fn rows(result: QueryResult) -> Vec<Row> {
        match result {
            QueryResult::Rows(rows) => rows,
            other => panic!("expected rows, got {other:?}"),
        }
    }

    fn seeded() -> (tempfile::TempDir, Engine) {
        let (dir, mut engine) = temp_engine();
        run(&mut engine, "LAHAN kebun");
        for q in [
            "TANAM KE kebun (id, jenis, umur) BIBIT (1, 'Tenera', 5)",
            "TANAM KE kebun (id, jenis, umur) BIBIT (2, 'Dura', 3)",
            "TANAM KE kebun (id, jenis, umur) BIBIT (3, 'Tenera', 7)",
            "TANAM KE kebun (id, jenis) BIBIT (4, 'Pisifera')",
        ] {
            run(&mut engine, q);
        }
        (dir, engine)
    }

    /// Walks one table's pages and checks the slot bookkeeping: the
    /// free offset must equal 8 plus the slot bytes, and the count
    /// must equal the number of reachable slots.
    fn assert_page_invariants(engine: &mut Engine, table: &str) {
        let entry = catalog::find_table(&mut engine.pager, table)
            .unwrap()
            .expect("table exists");
        let mut page_id = entry.first_page;
        let mut last_seen = page_id;
        while page_id != 0 {
            let page = engine.pager.read_page(page_id).unwrap();
            let count = storage::page_count(&page) as usize;
            let mut offset = DATA_HEADER_SIZE;
            for _ in 0..count {
                let len = storage::read_u16(&page, offset) as usize;
                offset += 2 + len;
                assert!(offset <= PAGE_SIZE);
            }
            assert_eq!(storage::page_free_offset(&page) as usize, offset);
            last_seen = page_id;
            page_id = storage::page_next(&page);
        }
        assert_eq!(last_seen, entry.last_page, "chain must end at last_page");
    }

    #[test]
    fn insert_then_select_returns_rows_in_order() {
        let (_dir, mut engine) = seeded();
        let all = rows(run(&mut engine, "PANEN * DARI kebun"));
        assert_eq!(all.len(), 4);
        let ids: Vec<_> = all.iter().map(|r| r.get("id").cloned().unwrap()).collect();
        assert_eq!(
            ids,
            vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(3.0),
                Value::Number(4.0)
            ]
        );
        assert_page_invariants(&mut engine, "kebun");
    }

    #[test]
    fn insert_into_missing_table_fails() {
        let (_dir, mut engine) = temp_engine();
        let err = engine
            .query("TANAM KE hantu (a) BIBIT (1)", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::TableNotFound(_)));
    }

    #[test]
    fn comparison_operators() {
        let (_dir, mut engine) = seeded();
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur >= 5")).len(), 2);
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur < 5")).len(), 1);
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis != 'Tenera'")).len(),
            2
        );
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis = 'Tenera'")).len(),
            2
        );
    }

    #[test]
    fn missing_field_matches_only_is_null() {
        let (_dir, mut engine) = seeded();
        // Row 4 has no umur field.
        let nulls = rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur IS NULL"));
        assert_eq!(nulls.len(), 1);
        assert_eq!(nulls[0].get("id"), Some(&Value::Number(4.0)));

        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur IS NOT NULL")).len(),
            3
        );
        // Non-null operators never match a missing field.
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur != 99")).len(),
            3
        );
    }

    #[test]
    fn in_between_and_like() {
        let (_dir, mut engine) = seeded();
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA id IN (1, 3)")).len(),
            2
        );
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA id NOT IN (1, 3)")).len(),
            2
        );
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA umur BETWEEN 3 AND 5")).len(),
            2
        );
        // LIKE is case-insensitive and % is a wildcard.
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis LIKE 'ten%'")).len(),
            2
        );
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis LIKE '%era'")).len(),
            3
        );
    }

    #[test]
    fn compound_logic_folds_left_to_right() {
        let (_dir, mut engine) = seeded();
        let hits = rows(run(
            &mut engine,
            "PANEN * DARI kebun DIMANA jenis = 'Dura' OR jenis = 'Tenera' AND umur > 5",
        ));
        // (Dura OR Tenera) AND umur > 5: only id 3 survives the fold.
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].get("id"), Some(&Value::Number(3.0)));
    }

    #[test]
    fn sort_is_applied_before_pagination() {
        let (_dir, mut engine) = seeded();
        let page = rows(run(
            &mut engine,
            "PANEN id DARI kebun DIMANA umur IS NOT NULL ORDER BY umur DESC LIMIT 2 OFFSET 1",
        ));
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].get("id"), Some(&Value::Number(1.0)));
        assert_eq!(page[1].get("id"), Some(&Value::Number(2.0)));
    }

    #[test]
    fn offset_past_the_end_is_empty_and_limit_clamps() {
        let (_dir, mut engine) = seeded();
        assert!(rows(run(&mut engine, "PANEN * DARI kebun OFFSET 10")).is_empty());
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun LIMIT 99")).len(), 4);
        assert_eq!(
            rows(run(&mut engine, "PANEN * DARI kebun LIMIT 99 OFFSET 3")).len(),
            1
        );
    }

    #[test]
    fn projection_drops_missing_fields() {
        let (_dir, mut engine) = seeded();
        let projected = rows(run(&mut engine, "PANEN id, umur DARI kebun"));
        assert_eq!(projected.len(), 4);
        assert_eq!(projected[0].len(), 2);
        // Row 4 has no umur; the projection omits the key entirely.
        assert_eq!(projected[3].len(), 1);
        assert!(projected[3].contains_key("id"));
    }

    #[test]
    fn update_merges_and_reports_count() {
        let (_dir, mut engine) = seeded();
        let QueryResult::Message(msg) = run(
            &mut engine,
            "PUPUK kebun DENGAN umur = 6, sehat = TRUE DIMANA jenis = 'Tenera'",
        ) else {
            panic!("expected message");
        };
        assert!(msg.contains('2'), "two rows fertilized: {msg}");

        let tenera = rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis = 'Tenera'"));
        assert_eq!(tenera.len(), 2);
        for row in &tenera {
            assert_eq!(row.get("umur"), Some(&Value::Number(6.0)));
            assert_eq!(row.get("sehat"), Some(&Value::Bool(true)));
        }
        assert_page_invariants(&mut engine, "kebun");
    }

    #[test]
    fn update_with_no_match_is_a_noop_message() {
        let (_dir, mut engine) = seeded();
        let QueryResult::Message(msg) =
            run(&mut engine, "PUPUK kebun DENGAN umur = 1 DIMANA id = 99")
        else {
            panic!("expected message");
        };
        assert!(msg.contains("Tidak ada"));
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun")).len(), 4);
    }

    #[test]
    fn delete_repacks_pages() {
        let (_dir, mut engine) = seeded();
        let QueryResult::Message(msg) =
            run(&mut engine, "GUSUR DARI kebun DIMANA jenis = 'Tenera'")
        else {
            panic!("expected message");
        };
        assert!(msg.contains('2'));
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun")).len(), 2);
        assert_page_invariants(&mut engine, "kebun");

        // Deleting everything leaves an empty but intact chain.
        run(&mut engine, "GUSUR DARI kebun");
        assert!(rows(run(&mut engine, "PANEN * DARI kebun")).is_empty());
        assert_page_invariants(&mut engine, "kebun");
    }

    #[test]
    fn inserts_spill_into_new_pages() {
        let (_dir, mut engine) = temp_engine();
        run(&mut engine, "LAHAN besar");
        // Each record is roughly 60 bytes; a few hundred cross several pages.
        for i in 0..300 {
            let q = format!("TANAM KE besar (id, label) BIBIT ({i}, 'bibit nomor {i}')");
            run(&mut engine, &q);
        }
        assert_eq!(rows(run(&mut engine, "PANEN * DARI besar")).len(), 300);
        assert_page_invariants(&mut engine, "besar");

        let entry = catalog::find_table(&mut engine.pager, "besar")
            .unwrap()
            .unwrap();
        assert_ne!(entry.first_page, entry.last_page, "expected multiple pages");
    }

    #[test]
    fn oversized_records_are_rejected() {
        let (_dir, mut engine) = temp_engine();
        run(&mut engine, "LAHAN sempit");
        let big = "x".repeat(PAGE_SIZE);
        let err = engine
            .query(&format!("TANAM KE sempit (blob) BIBIT ('{big}')"), None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Full(_)));
        assert!(rows(run(&mut engine, "PANEN * DARI sempit")).is_empty());
    }

    #[test]
    fn index_equality_select_matches_full_scan() {
        let (_dir, mut engine) = seeded();
        let scanned = rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis = 'Dura'"));
        run(&mut engine, "INDEKS kebun PADA jenis");
        let indexed = rows(run(&mut engine, "PANEN * DARI kebun DIMANA jenis = 'Dura'"));
        assert_eq!(scanned, indexed);
    }

    #[test]
    fn indexes_survive_update_and_delete() {
        let (_dir, mut engine) = seeded();
        run(&mut engine, "INDEKS kebun PADA id");

        run(&mut engine, "PUPUK kebun DENGAN umur = 31 DIMANA id = 1");
        let hit = rows(run(&mut engine, "PANEN * DARI kebun DIMANA id = 1"));
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].get("umur"), Some(&Value::Number(31.0)));

        run(&mut engine, "GUSUR DARI kebun DIMANA id = 1");
        assert!(rows(run(&mut engine, "PANEN * DARI kebun DIMANA id = 1")).is_empty());
    }

    #[test]
    fn duplicate_index_is_benign_and_stats_are_visible() {
        let (_dir, mut engine) = seeded();
        run(&mut engine, "INDEKS kebun PADA jenis");
        let QueryResult::Message(msg) = run(&mut engine, "INDEKS kebun PADA jenis") else {
            panic!("expected message");
        };
        assert!(msg.contains("sudah ada"));

        let QueryResult::Indexes(stats) = run(&mut engine, "LIHAT INDEKS kebun") else {
            panic!("expected index stats");
        };
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].name, "kebun.jenis");
        assert_eq!(stats[0].key_field, "jenis");
        assert_eq!(stats[0].key_count, 4);

        let QueryResult::Message(msg) = run(&mut engine, "LIHAT INDEKS kosong") else {
            panic!("expected message");
        };
        assert!(msg.contains("Tidak ada indeks"));
    }

    #[test]
    fn drop_table_discards_its_indexes() {
        let (_dir, mut engine) = seeded();
        run(&mut engine, "INDEKS kebun PADA jenis");
        run(&mut engine, "BAKAR LAHAN kebun");
        let QueryResult::Indexes(stats) = run(&mut engine, "LIHAT INDEKS") else {
            panic!("expected index stats");
        };
        assert!(stats.is_empty());
    }

    #[test]
    fn aggregates_without_grouping() {
        let (_dir, mut engine) = seeded();
        let QueryResult::Record(count) = run(&mut engine, "HITUNG COUNT(*) DARI kebun") else {
            panic!("expected record");
        };
        assert_eq!(count.get("count"), Some(&Value::Number(4.0)));

        let QueryResult::Record(sum) = run(&mut engine, "HITUNG SUM(umur) DARI kebun") else {
            panic!("expected record");
        };
        assert_eq!(sum.get("sum"), Some(&Value::Number(15.0)));

        let QueryResult::Record(min) = run(&mut engine, "HITUNG MIN(umur) DARI kebun") else {
            panic!("expected record");
        };
        assert_eq!(min.get("min"), Some(&Value::Number(3.0)));

        let QueryResult::Record(max) = run(&mut engine, "HITUNG MAX(umur) DARI kebun") else {
            panic!("expected record");
        };
        assert_eq!(max.get("max"), Some(&Value::Number(7.0)));
    }

    #[test]
    fn aggregates_over_nothing_return_zero() {
        let (_dir, mut engine) = temp_engine();
        run(&mut engine, "LAHAN kosong");
        for q in [
            "HITUNG AVG(x) DARI kosong",
            "HITUNG MIN(x) DARI kosong",
            "HITUNG MAX(x) DARI kosong",
        ] {
            let QueryResult::Record(record) = run(&mut engine, q) else {
                panic!("expected record");
            };
            let value = record
                .values()
                .find_map(Value::as_number)
                .expect("numeric result");
            assert_eq!(value, 0.0, "query {q}");
        }
    }

    #[test]
    fn grouped_aggregate_partitions_rows() {
        let (_dir, mut engine) = seeded();
        let groups = rows(run(&mut engine, "HITUNG COUNT(*) DARI kebun KELOMPOK jenis"));
        assert_eq!(groups.len(), 3);
        // Groups come out in first-seen order.
        assert_eq!(groups[0].get("jenis"), Some(&Value::Text("Tenera".into())));
        assert_eq!(groups[0].get("count"), Some(&Value::Number(2.0)));

        let avgs = rows(run(&mut engine, "HITUNG AVG(umur) DARI kebun KELOMPOK jenis"));
        let tenera = avgs
            .iter()
            .find(|r| r.get("jenis") == Some(&Value::Text("Tenera".into())))
            .unwrap();
        assert_eq!(tenera.get("avg"), Some(&Value::Number(6.0)));
    }

    #[test]
    fn unknown_aggregate_function_errors() {
        let (_dir, mut engine) = seeded();
        let err = engine.query("HITUNG MEDIAN(umur) DARI kebun", None).unwrap_err();
        assert!(matches!(err, EngineError::Invalid(_)));
    }

    #[test]
    fn reopen_preserves_rows_but_not_indexes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.sawit");
        {
            let mut engine = Engine::open(&path).unwrap();
            run(&mut engine, "LAHAN kebun");
            run(&mut engine, "TANAM KE kebun (id) BIBIT (1)");
            run(&mut engine, "INDEKS kebun PADA id");
        }
        let mut engine = Engine::open(&path).unwrap();
        assert_eq!(rows(run(&mut engine, "PANEN * DARI kebun")).len(), 1);
        let QueryResult::Indexes(stats) = run(&mut engine, "LIHAT INDEKS") else {
            panic!("expected index stats");
        };
        assert!(stats.is_empty(), "indexes are in-memory only");
    }

    #[test]
    fn like_treats_metacharacters_as_regex() {
        let (_dir, mut engine) = temp_engine();
        run(&mut engine, "LAHAN t");
        run(&mut engine, "TANAM KE t (kode) BIBIT ('a.c')");
        run(&mut engine, "TANAM KE t (kode) BIBIT ('abc')");
        // The dot in the pattern is a regex dot, so both rows match.
        assert_eq!(rows(run(&mut engine, "PANEN * DARI t DIMANA kode LIKE 'a.c'")).len(), 2);
    }

    #[test]
    fn syntax_errors_surface_as_syntax_kind() {
        let (_dir, mut engine) = temp_engine();
        let err = engine.query("OMONG kosong", None).unwrap_err();
        assert!(matches!(err, EngineError::Syntax(_)));
    }
}
