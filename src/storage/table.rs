use crate::core::{Result, Row, Schema};

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Schema,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn insert(&mut self, row: Row) -> Result<()> {
        self.validate_row(&row)?;
        self.rows.push(row);
        Ok(())
    }

    /// Replaces the row at `index`. Returns false if there is no such row.
    pub fn update(&mut self, index: usize, row: Row) -> Result<bool> {
        self.validate_row(&row)?;
        match self.rows.get_mut(index) {
            Some(slot) => {
                *slot = row;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn validate_row(&self, row: &Row) -> Result<()> {
        for (column, value) in self.schema.columns().iter().zip(row.iter()) {
            column.validate(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Column, DataType, Value};

    fn persons() -> Table {
        Table::new(
            "persons",
            Schema::new(vec![
                Column::new("id", DataType::Integer).not_null(),
                Column::new("first_name", DataType::Text),
            ]),
        )
    }

    #[test]
    fn test_insert_validates_types() {
        let mut table = persons();
        table.insert(vec![Value::Integer(1), Value::from("Ada")]).unwrap();
        assert!(table.insert(vec![Value::from("x"), Value::Null]).is_err());
        assert!(table.insert(vec![Value::Null, Value::Null]).is_err());
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_update_replaces_row() {
        let mut table = persons();
        table.insert(vec![Value::Integer(1), Value::from("Ada")]).unwrap();

        assert!(table.update(0, vec![Value::Integer(1), Value::from("Augusta")]).unwrap());
        assert!(!table.update(5, vec![Value::Integer(1), Value::Null]).unwrap());
        assert_eq!(table.rows()[0][1], Value::from("Augusta"));
    }
}
