//! Domain library for the async demo service.
//!
//! This crate stays free of IO dependencies (serde derives only) and holds
//! the record types, ports (traits), policy checks and error definitions.
//! Keep adapters, executors and HTTP concerns out of this crate.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

pub use rust_decimal::Decimal;

/// Generated identifier of a to-do item. Assigned once, never changed.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(String);

/// Generated identifier of a person record.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(String);

macro_rules! record_id {
    ($name:ident) => {
        impl $name {
            pub fn new<S: Into<String>>(s: S) -> Result<Self, CoreError> {
                let val = s.into();
                validate::validate_record_id(&val)?;
                Ok(Self(val))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

record_id!(TodoId);
record_id!(PersonId);

/// Input data for creating a new to-do item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewTodo {
    pub title: String,
    pub completed: bool,
}

impl NewTodo {
    pub fn new<S: Into<String>>(title: S) -> Self {
        Self {
            title: title.into(),
            completed: false,
        }
    }
}

/// Stored to-do item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Todo {
    pub id: TodoId,
    pub title: String,
    pub completed: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "MALE" => Some(Gender::Male),
            "FEMALE" => Some(Gender::Female),
            _ => None,
        }
    }
}

/// Stored person record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub age: u32,
    pub gender: Gender,
    pub years_worked: u32,
    pub birth_day: SystemTime,
    pub salary: Decimal,
    pub hourly_rate: Decimal,
}

const THIRTY_YEARS: Duration = Duration::from_secs(30 * 365 * 24 * 60 * 60);

/// Default monthly salary, 1234.5678.
pub const DEFAULT_SALARY: Decimal = Decimal::from_parts(12_345_678, 0, 0, false, 4);
/// Default hourly rate, 33.33.
pub const DEFAULT_HOURLY_RATE: Decimal = Decimal::from_parts(3_333, 0, 0, false, 2);

impl Person {
    /// Create a person with the default fields (male, two years worked, born
    /// thirty years before `now`, default salary and hourly rate). The birth
    /// day is kept at whole seconds, the precision adapters store.
    pub fn new<S: Into<String>>(id: PersonId, name: S, age: u32, now: SystemTime) -> Self {
        let birth = now
            .checked_sub(THIRTY_YEARS)
            .and_then(|t| t.duration_since(SystemTime::UNIX_EPOCH).ok())
            .map(|d| SystemTime::UNIX_EPOCH + Duration::from_secs(d.as_secs()))
            .unwrap_or(SystemTime::UNIX_EPOCH);
        Self {
            id,
            name: name.into(),
            age,
            gender: Gender::Male,
            years_worked: 2,
            birth_day: birth,
            salary: DEFAULT_SALARY,
            hourly_rate: DEFAULT_HOURLY_RATE,
        }
    }
}

/// Event fired once a to-do has been marked completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TodoCompleted {
    pub todo_id: TodoId,
    pub completed_at: SystemTime,
}

/// Time source abstraction to make code testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Identifier generator; adapters decide the format (UUIDs in the server).
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

/// Write side of a to-do transaction. Changes become visible only when the
/// enclosing [`TodoRepository::transaction`] commits.
pub trait TodoWriter {
    fn insert(&mut self, todo: Todo) -> Result<(), CoreError>;
    fn set_completed(&mut self, id: &TodoId, completed: bool) -> Result<(), CoreError>;
}

/// Repository port for to-do items.
pub trait TodoRepository: Send + Sync {
    fn get(&self, id: &TodoId) -> Result<Option<Todo>, CoreError>;
    /// Full scan, in insertion order.
    fn list(&self) -> Result<Vec<Todo>, CoreError>;
    /// Run `work` inside a transaction scope. Commits when `work` returns
    /// `Ok`, rolls back on `Err` and when `work` panics.
    fn transaction<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut dyn TodoWriter) -> Result<T, CoreError>;
}

/// Repository port for person records.
pub trait PersonRepository: Send + Sync {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, CoreError>;
    fn list(&self) -> Result<Vec<Person>, CoreError>;
    fn put(&self, person: Person) -> Result<(), CoreError>;
    /// Store every person or none: a failure on any record leaves the
    /// repository as it was.
    fn put_all(&self, persons: Vec<Person>) -> Result<(), CoreError>;
}

/// Core domain errors (no external error crates to keep deps minimal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    InvalidId(String),
    InvalidTitle(String),
    AlreadyExists,
    NotFound,
    Repository(String),
}

impl Display for CoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CoreError::InvalidId(msg) => write!(f, "invalid id: {}", msg),
            CoreError::InvalidTitle(msg) => write!(f, "invalid title: {}", msg),
            CoreError::AlreadyExists => write!(f, "resource already exists"),
            CoreError::NotFound => write!(f, "not found"),
            CoreError::Repository(msg) => write!(f, "repository error: {}", msg),
        }
    }
}

impl Error for CoreError {}

pub mod adapters;
pub mod security;
pub mod service;
pub mod validate;
