#![allow(dead_code)]

use async_trait::async_trait;
use gradesync_core::{Fields, Result, SyncError};
use gradesync_store::{ListOptions, RecordStore, TableSchema};
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Record {
    id: String,
    fields: Fields,
    /// Set on delete: the record keeps showing up in lists until the
    /// table's list counter passes this value.
    visible_until: Option<usize>,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Vec<Record>>,
    list_calls: HashMap<String, usize>,
    next_id: usize,
    create_failures: VecDeque<u16>,
    create_rejections: HashMap<usize, u16>,
    create_calls: usize,
    delete_failures: VecDeque<u16>,
    locked: HashSet<String>,
    create_batches: Vec<usize>,
    delete_batches: usize,
    single_deletes: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory store whose list results lag `lag` list calls behind deletes.
#[derive(Default)]
pub struct FakeStore {
    state: Mutex<State>,
    lag: usize,
    delete_latency: Duration,
    schema: Vec<TableSchema>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lag(mut self, lag: usize) -> Self {
        self.lag = lag;
        self
    }

    pub fn with_delete_latency(mut self, latency: Duration) -> Self {
        self.delete_latency = latency;
        self
    }

    pub fn with_schema(mut self, tables: Vec<TableSchema>) -> Self {
        self.schema = tables;
        self
    }

    pub fn seed(self, table: &str, count: usize) -> Self {
        self.seed_students(table, &[("Someone", count)])
    }

    pub fn seed_students(self, table: &str, students: &[(&str, usize)]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for (name, count) in students {
                for _ in 0..*count {
                    let mut fields = Fields::new();
                    fields.insert("Student Name".into(), json!(name));
                    insert(&mut state, table, fields);
                }
            }
        }
        self
    }

    /// Fail the next batch_create calls with these statuses, in order.
    pub fn fail_creates(self, statuses: &[u16]) -> Self {
        self.state.lock().unwrap().create_failures = statuses.iter().copied().collect();
        self
    }

    /// Reject the `call`-th batch_create (1-based) with `status`.
    pub fn reject_create_call(self, call: usize, status: u16) -> Self {
        self.state
            .lock()
            .unwrap()
            .create_rejections
            .insert(call, status);
        self
    }

    pub fn fail_deletes(self, statuses: &[u16]) -> Self {
        self.state.lock().unwrap().delete_failures = statuses.iter().copied().collect();
        self
    }

    /// Records that refuse every delete with a 403.
    pub fn lock(self, table: &str, count: usize) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let ids: Vec<String> = state.tables[table]
                .iter()
                .take(count)
                .map(|r| r.id.clone())
                .collect();
            state.locked.extend(ids);
        }
        self
    }

    pub fn alive(&self, table: &str) -> usize {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|records| records.iter().filter(|r| r.visible_until.is_none()).count())
            .unwrap_or(0)
    }

    pub fn rows(&self, table: &str) -> Vec<Fields> {
        let state = self.state.lock().unwrap();
        state
            .tables
            .get(table)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.visible_until.is_none())
                    .map(|r| r.fields.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn list_calls(&self, table: &str) -> usize {
        *self.state.lock().unwrap().list_calls.get(table).unwrap_or(&0)
    }

    pub fn create_batches(&self) -> Vec<usize> {
        self.state.lock().unwrap().create_batches.clone()
    }

    pub fn delete_batches(&self) -> usize {
        self.state.lock().unwrap().delete_batches
    }

    pub fn single_deletes(&self) -> usize {
        self.state.lock().unwrap().single_deletes
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }
}

fn insert(state: &mut State, table: &str, fields: Fields) -> String {
    state.next_id += 1;
    let id = format!("rec{:05}", state.next_id);
    state.tables.entry(table.to_string()).or_default().push(Record {
        id: id.clone(),
        fields,
        visible_until: None,
    });
    id
}

fn matches(record: &Record, formula: Option<&str>) -> bool {
    let Some(formula) = formula else {
        return true;
    };
    let name = record.fields["Student Name"].as_str().unwrap_or_default();
    formula.contains(&format!("{{Student Name}} = \"{}\"", name.replace('"', "\\\"")))
}

#[async_trait]
impl RecordStore for FakeStore {
    async fn list_record_ids(&self, table: &str, options: &ListOptions) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let calls = state.list_calls.entry(table.to_string()).or_default();
        *calls += 1;
        let now = *calls;

        let mut ids: Vec<String> = state
            .tables
            .get(table)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.visible_until.map_or(true, |until| now <= until))
                    .filter(|r| matches(r, options.filter_formula.as_deref()))
                    .map(|r| r.id.clone())
                    .collect()
            })
            .unwrap_or_default();
        if let Some(max) = options.max_records {
            ids.truncate(max);
        }
        Ok(ids)
    }

    async fn batch_create(&self, table: &str, rows: &[Fields]) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        if rows.len() > 10 {
            return Err(SyncError::http(422, table, "too many records"));
        }
        state.create_calls += 1;
        let call = state.create_calls;
        if let Some(status) = state.create_rejections.get(&call).copied() {
            return Err(SyncError::http(status, table, "scripted create rejection"));
        }
        if let Some(status) = state.create_failures.pop_front() {
            return Err(SyncError::http(status, table, "scripted create failure"));
        }
        state.create_batches.push(rows.len());
        Ok(rows
            .iter()
            .map(|fields| insert(&mut state, table, fields.clone()))
            .collect())
    }

    async fn batch_delete(&self, table: &str, ids: &[String]) -> Result<Vec<String>> {
        {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        if !self.delete_latency.is_zero() {
            tokio::time::sleep(self.delete_latency).await;
        }

        let mut state = self.state.lock().unwrap();
        state.in_flight -= 1;
        state.delete_batches += 1;
        if ids.len() > 10 {
            return Err(SyncError::http(422, table, "too many records"));
        }
        if let Some(status) = state.delete_failures.pop_front() {
            return Err(SyncError::http(status, table, "scripted delete failure"));
        }
        if ids.iter().any(|id| state.locked.contains(id)) {
            return Err(SyncError::http(403, table, "record is locked"));
        }

        let now = *state.list_calls.get(table).unwrap_or(&0);
        let lag = self.lag;
        let mut deleted = Vec::new();
        if let Some(records) = state.tables.get_mut(table) {
            for record in records.iter_mut() {
                if record.visible_until.is_none() && ids.contains(&record.id) {
                    record.visible_until = Some(now + lag);
                    deleted.push(record.id.clone());
                }
            }
        }
        Ok(deleted)
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.single_deletes += 1;
        if state.locked.contains(id) {
            return Err(SyncError::http(403, table, "record is locked"));
        }
        let now = *state.list_calls.get(table).unwrap_or(&0);
        let lag = self.lag;
        let record = state
            .tables
            .get_mut(table)
            .and_then(|records| {
                records
                    .iter_mut()
                    .find(|r| r.id == id && r.visible_until.is_none())
            })
            .ok_or_else(|| SyncError::http(404, table, "record not found"))?;
        record.visible_until = Some(now + lag);
        Ok(())
    }

    async fn fetch_schema(&self) -> Result<Vec<TableSchema>> {
        Ok(self.schema.clone())
    }
}
