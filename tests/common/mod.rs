#![allow(dead_code)]

use entitymap::{Entity, MemoryDatabase};
use uuid::Uuid;

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "persons")]
pub struct Person {
    #[id]
    pub id: i64,
    #[column]
    pub first_name: String,
    #[column]
    pub last_name: String,
}

#[derive(Debug, Default, Clone, PartialEq, Entity)]
#[entity(table = "notes")]
pub struct Note {
    #[id]
    pub id: Uuid,
    #[column]
    pub title: String,
    #[column]
    pub body: Option<String>,
}

pub const NOTE_ID: &str = "2e9faa1d-5d4c-4b8e-9f3a-0c1d2e3f4a5b";

pub async fn seeded_database() -> MemoryDatabase {
    let db = MemoryDatabase::new();
    db.batch(&format!(
        "CREATE TABLE persons (id BIGINT NOT NULL, first_name TEXT, last_name TEXT);
         INSERT INTO persons VALUES (1, 'Ada', 'Lovelace'), (2, 'Alan', 'Turing'), (3, 'Grace', 'Hopper');
         CREATE TABLE notes (id UUID NOT NULL, title TEXT NOT NULL, body TEXT);
         INSERT INTO notes VALUES ('{}', 'Groceries', NULL);",
        NOTE_ID
    ))
    .await
    .expect("seed database");
    db.clear_statement_log();
    db
}
