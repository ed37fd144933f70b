use std::collections::HashMap;

use super::Table;
use crate::core::{OrmError, Result};

/// Tables of one in-memory database, keyed by lower-cased name.
#[derive(Debug, Default)]
pub struct Catalog {
    tables: HashMap<String, Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_table(&mut self, table: Table, if_not_exists: bool) -> Result<()> {
        let key = table.name().to_ascii_lowercase();
        if self.tables.contains_key(&key) {
            if if_not_exists {
                return Ok(());
            }
            return Err(OrmError::QueryExecution(format!(
                "relation \"{}\" already exists",
                table.name()
            )));
        }
        self.tables.insert(key, table);
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str, if_exists: bool) -> Result<()> {
        if self.tables.remove(&name.to_ascii_lowercase()).is_none() && !if_exists {
            return Err(Self::missing(name));
        }
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| Self::missing(name))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(&name.to_ascii_lowercase())
            .ok_or_else(|| Self::missing(name))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.contains_key(&name.to_ascii_lowercase())
    }

    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.values().map(|table| table.name()).collect()
    }

    fn missing(name: &str) -> OrmError {
        OrmError::QueryExecution(format!("relation \"{}\" does not exist", name))
    }
}
