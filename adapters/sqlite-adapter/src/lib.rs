//! sqlite-adapter — SQLite implementation of the record repositories.
//!
//! Purpose
//! - Provide a lightweight, file-based store so the server keeps its to-dos
//!   and persons across restarts without external services.
//! - Implements `TodoRepository` and `PersonRepository` from the `domain`
//!   crate on one shared connection.
//!
//! Notes
//! - Uses `rusqlite` with the `bundled` feature for portability.
//! - One flat table per record type, keyed by the generated id. Full scans
//!   follow insertion order (`rowid`).
//! - Timestamps are stored as seconds since UNIX_EPOCH.
//! - Money amounts are stored as decimal TEXT so they round-trip exactly.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use domain::{
    CoreError, Decimal, Gender, Person, PersonId, PersonRepository, Todo, TodoId, TodoRepository,
    TodoWriter,
};
use rusqlite::{params, Connection, Transaction};

/// SQLite-backed repository for both record types.
pub struct SqliteRepo {
    conn: Mutex<Connection>,
}

impl SqliteRepo {
    /// Open (or create) a SQLite database at the given path and ensure schema.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let conn = Connection::open(path).map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Private in-memory database; handy for tests and throwaway runs.
    pub fn in_memory() -> Result<Self, CoreError> {
        let conn = Connection::open_in_memory().map_err(map_sqerr)?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open the database at `path`, creating its parent directory first.
    pub fn open_creating_dirs<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| CoreError::Repository(format!("create db dir: {e}")))?;
        }
        Self::new(path)
    }

    // A panicking transaction is rolled back when its guard unwinds, so the
    // connection behind a poisoned lock is still consistent.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn init_schema(conn: &Connection) -> Result<(), CoreError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS todos (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0
        );
        CREATE TABLE IF NOT EXISTS persons (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            age INTEGER NOT NULL,
            gender TEXT NOT NULL DEFAULT 'MALE',
            years_worked INTEGER NOT NULL DEFAULT 2,
            birth_day INTEGER NOT NULL,
            salary TEXT NOT NULL DEFAULT '1234.5678',
            hourly_rate TEXT NOT NULL DEFAULT '33.33'
        );
        "#,
    )
    .map_err(map_sqerr)?;
    add_missing_person_columns(conn)
}

// Databases created before the money columns existed get them with defaults.
fn add_missing_person_columns(conn: &Connection) -> Result<(), CoreError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info('persons')")
        .map_err(map_sqerr)?;
    let existing = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(map_sqerr)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(map_sqerr)?;
    for (column, default) in [("salary", "1234.5678"), ("hourly_rate", "33.33")] {
        if !existing.iter().any(|c| c == column) {
            conn.execute_batch(&format!(
                "ALTER TABLE persons ADD COLUMN {column} TEXT NOT NULL DEFAULT '{default}'"
            ))
            .map_err(map_sqerr)?;
        }
    }
    Ok(())
}

fn map_sqerr<E: std::fmt::Display>(e: E) -> CoreError {
    CoreError::Repository(format!("sqlite error: {e}"))
}

fn map_insert_err(e: rusqlite::Error) -> CoreError {
    if let rusqlite::Error::SqliteFailure(err, _) = &e {
        if err.code == rusqlite::ErrorCode::ConstraintViolation {
            return CoreError::AlreadyExists;
        }
    }
    map_sqerr(e)
}

fn system_time_to_secs(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs() as i64
}

fn secs_to_system_time(secs: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.max(0) as u64)
}

const PERSON_COLUMNS: &str = "id, name, age, gender, years_worked, birth_day, salary, hourly_rate";

fn parse_decimal(column: &str, raw: &str) -> Result<Decimal, CoreError> {
    raw.parse::<Decimal>()
        .map_err(|e| CoreError::Repository(format!("bad {column} in db: {raw}: {e}")))
}

fn row_to_todo(row: &rusqlite::Row) -> Result<Todo, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let title: String = row.get(1).map_err(map_sqerr)?;
    let completed: i64 = row.get(2).map_err(map_sqerr)?;
    Ok(Todo {
        id: TodoId::new(id).map_err(|e| CoreError::Repository(format!("bad id in db: {e}")))?,
        title,
        completed: completed != 0,
    })
}

fn row_to_person(row: &rusqlite::Row) -> Result<Person, CoreError> {
    let id: String = row.get(0).map_err(map_sqerr)?;
    let name: String = row.get(1).map_err(map_sqerr)?;
    let age: i64 = row.get(2).map_err(map_sqerr)?;
    let gender: String = row.get(3).map_err(map_sqerr)?;
    let years_worked: i64 = row.get(4).map_err(map_sqerr)?;
    let birth_day: i64 = row.get(5).map_err(map_sqerr)?;
    let salary: String = row.get(6).map_err(map_sqerr)?;
    let hourly_rate: String = row.get(7).map_err(map_sqerr)?;
    Ok(Person {
        id: PersonId::new(id).map_err(|e| CoreError::Repository(format!("bad id in db: {e}")))?,
        name,
        age: age as u32,
        gender: Gender::parse(&gender)
            .ok_or_else(|| CoreError::Repository(format!("bad gender in db: {gender}")))?,
        years_worked: years_worked as u32,
        birth_day: secs_to_system_time(birth_day),
        salary: parse_decimal("salary", &salary)?,
        hourly_rate: parse_decimal("hourly_rate", &hourly_rate)?,
    })
}

// Takes a plain connection so it runs both standalone and inside a
// `Transaction` (which derefs to `Connection`).
fn insert_person(conn: &Connection, person: &Person) -> Result<(), CoreError> {
    conn.execute(
        &format!("INSERT INTO persons({PERSON_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"),
        params![
            person.id.as_str(),
            person.name,
            person.age as i64,
            person.gender.as_str(),
            person.years_worked as i64,
            system_time_to_secs(person.birth_day),
            person.salary.to_string(),
            person.hourly_rate.to_string(),
        ],
    )
    .map(|_| ())
    .map_err(map_insert_err)
}

/// Writes of one open transaction.
struct SqliteTodoWriter<'a> {
    tx: &'a Transaction<'a>,
}

impl TodoWriter for SqliteTodoWriter<'_> {
    fn insert(&mut self, todo: Todo) -> Result<(), CoreError> {
        self.tx
            .execute(
                "INSERT INTO todos(id, title, completed) VALUES (?1, ?2, ?3)",
                params![todo.id.as_str(), todo.title, todo.completed as i64],
            )
            .map(|_| ())
            .map_err(map_insert_err)
    }

    fn set_completed(&mut self, id: &TodoId, completed: bool) -> Result<(), CoreError> {
        let changed = self
            .tx
            .execute(
                "UPDATE todos SET completed = ?1 WHERE id = ?2",
                params![completed as i64, id.as_str()],
            )
            .map_err(map_sqerr)?;
        if changed == 0 {
            Err(CoreError::NotFound)
        } else {
            Ok(())
        }
    }
}

impl TodoRepository for SqliteRepo {
    fn get(&self, id: &TodoId) -> Result<Option<Todo>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, title, completed FROM todos WHERE id = ?1")
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_todo(row)?))
        } else {
            Ok(None)
        }
    }

    fn list(&self) -> Result<Vec<Todo>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, title, completed FROM todos ORDER BY rowid")
            .map_err(map_sqerr)?;
        let mut rows = stmt.query([]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_todo(row)?);
        }
        Ok(out)
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut dyn TodoWriter) -> Result<T, CoreError>,
    {
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        // Dropping `tx` without commit (error or unwind) rolls back.
        let out = work(&mut SqliteTodoWriter { tx: &tx })?;
        tx.commit().map_err(map_sqerr)?;
        Ok(out)
    }
}

impl PersonRepository for SqliteRepo {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1"))
            .map_err(map_sqerr)?;
        let mut rows = stmt.query(params![id.as_str()]).map_err(map_sqerr)?;
        if let Some(row) = rows.next().map_err(map_sqerr)? {
            Ok(Some(row_to_person(row)?))
        } else {
            Ok(None)
        }
    }

    fn list(&self) -> Result<Vec<Person>, CoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!("SELECT {PERSON_COLUMNS} FROM persons ORDER BY rowid"))
            .map_err(map_sqerr)?;
        let mut rows = stmt.query([]).map_err(map_sqerr)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_sqerr)? {
            out.push(row_to_person(row)?);
        }
        Ok(out)
    }

    fn put(&self, person: Person) -> Result<(), CoreError> {
        insert_person(&self.lock(), &person)
    }

    fn put_all(&self, persons: Vec<Person>) -> Result<(), CoreError> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction().map_err(map_sqerr)?;
        for person in &persons {
            insert_person(&tx, person)?;
        }
        tx.commit().map_err(map_sqerr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_db() -> (SqliteRepo, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.db");
        let repo = SqliteRepo::new(path).unwrap();
        (repo, dir)
    }

    fn todo(id: &str, title: &str) -> Todo {
        Todo {
            id: TodoId::new(id).unwrap(),
            title: title.into(),
            completed: false,
        }
    }

    #[test]
    fn todo_insert_get_roundtrip() {
        let (repo, _dir) = tmp_db();
        let t = todo("3f2b8c1e-9a4d-4e0f-8b1a-2c3d4e5f6a7b", "What's new in JPA 3.1?");
        repo.transaction(|tx| tx.insert(t.clone())).unwrap();
        let got = TodoRepository::get(&repo, &t.id).unwrap().unwrap();
        assert_eq!(got, t);
    }

    #[test]
    fn duplicate_insert_conflicts() {
        let (repo, _dir) = tmp_db();
        repo.transaction(|tx| tx.insert(todo("dup", "a"))).unwrap();
        let err = repo.transaction(|tx| tx.insert(todo("dup", "b"))).unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
    }

    #[test]
    fn error_rolls_back_whole_transaction() {
        let (repo, _dir) = tmp_db();
        let res: Result<(), CoreError> = repo.transaction(|tx| {
            tx.insert(todo("t1", "one"))?;
            tx.set_completed(&TodoId::new("missing").unwrap(), true)
        });
        assert!(matches!(res, Err(CoreError::NotFound)));
        assert!(TodoRepository::list(&repo).unwrap().is_empty());
    }

    #[test]
    fn list_keeps_insertion_order_and_completion_persists() {
        let (repo, _dir) = tmp_db();
        for (id, title) in [("z", "first"), ("a", "second"), ("m", "third")] {
            repo.transaction(|tx| tx.insert(todo(id, title))).unwrap();
        }
        repo.transaction(|tx| tx.set_completed(&TodoId::new("a").unwrap(), true))
            .unwrap();
        let all = TodoRepository::list(&repo).unwrap();
        let titles: Vec<&str> = all.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, ["first", "second", "third"]);
        assert!(all[1].completed);
        assert!(!all[0].completed);
    }

    #[test]
    fn person_roundtrip_keeps_fields() {
        let repo = SqliteRepo::in_memory().unwrap();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let mut rose = Person::new(PersonId::new("p-2").unwrap(), "Rose", 18, now);
        rose.gender = Gender::Female;
        repo.put(rose.clone()).unwrap();
        let got = PersonRepository::get(&repo, &rose.id).unwrap().unwrap();
        assert_eq!(got, rose);
        assert!(matches!(repo.put(rose), Err(CoreError::AlreadyExists)));
        assert_eq!(PersonRepository::list(&repo).unwrap().len(), 1);
    }

    #[test]
    fn person_money_fields_roundtrip_exactly() {
        let (repo, _dir) = tmp_db();
        let mut jack = Person::new(PersonId::new("p-1").unwrap(), "Jack", 20, UNIX_EPOCH);
        jack.salary = "98765.4321".parse().unwrap();
        repo.put(jack.clone()).unwrap();
        let got = PersonRepository::get(&repo, &jack.id).unwrap().unwrap();
        assert_eq!(got.salary.to_string(), "98765.4321");
        assert_eq!(got.hourly_rate.to_string(), "33.33");
    }

    #[test]
    fn older_persons_table_gains_money_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE persons (id TEXT PRIMARY KEY, name TEXT NOT NULL, age INTEGER NOT NULL, \
                 gender TEXT NOT NULL DEFAULT 'MALE', years_worked INTEGER NOT NULL DEFAULT 2, \
                 birth_day INTEGER NOT NULL);
                 INSERT INTO persons(id, name, age, birth_day) VALUES ('p-1', 'Jack', 20, 0);",
            )
            .unwrap();
        }
        let repo = SqliteRepo::new(&path).unwrap();
        let jack = PersonRepository::get(&repo, &PersonId::new("p-1").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(jack.salary.to_string(), "1234.5678");
        assert_eq!(jack.hourly_rate.to_string(), "33.33");
    }

    #[test]
    fn put_all_rolls_back_on_conflict() {
        let (repo, _dir) = tmp_db();
        let person = |id: &str, name: &str| {
            Person::new(PersonId::new(id).unwrap(), name, 20, UNIX_EPOCH)
        };
        repo.put(person("p-2", "Kate")).unwrap();
        let err = repo
            .put_all(vec![person("p-1", "Jack"), person("p-2", "Rose")])
            .unwrap_err();
        assert!(matches!(err, CoreError::AlreadyExists));
        let names: Vec<String> = PersonRepository::list(&repo)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["Kate".to_string()]);

        repo.put_all(vec![person("p-1", "Jack"), person("p-3", "Rose")])
            .unwrap();
        assert_eq!(PersonRepository::list(&repo).unwrap().len(), 3);
    }

    #[test]
    fn reopen_sees_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("t.db");
        {
            let repo = SqliteRepo::open_creating_dirs(&path).unwrap();
            repo.transaction(|tx| tx.insert(todo("keep", "kept"))).unwrap();
        }
        let repo = SqliteRepo::new(&path).unwrap();
        assert_eq!(TodoRepository::list(&repo).unwrap().len(), 1);
    }
}
