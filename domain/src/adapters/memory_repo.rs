use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use crate::{CoreError, Person, PersonId, PersonRepository, Todo, TodoId, TodoRepository, TodoWriter};

/// In-memory to-do repository for tests and local runs. Keeps insertion
/// order so full scans are stable.
pub struct InMemoryTodoRepo {
    inner: Mutex<Vec<Todo>>,
}

/// In-memory person repository.
pub struct InMemoryPersonRepo {
    inner: Mutex<BTreeMap<String, (u64, Person)>>,
    seq: Mutex<u64>,
}

impl InMemoryTodoRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    // Writes are staged on a copy and swapped in on commit, so a guard
    // poisoned by a panicking transaction still holds committed state.
    fn lock(&self) -> MutexGuard<'_, Vec<Todo>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryTodoRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Staged copy of the table used for one transaction.
struct StagedTodos {
    rows: Vec<Todo>,
}

impl TodoWriter for StagedTodos {
    fn insert(&mut self, todo: Todo) -> Result<(), CoreError> {
        if self.rows.iter().any(|t| t.id == todo.id) {
            return Err(CoreError::AlreadyExists);
        }
        self.rows.push(todo);
        Ok(())
    }

    fn set_completed(&mut self, id: &TodoId, completed: bool) -> Result<(), CoreError> {
        match self.rows.iter_mut().find(|t| &t.id == id) {
            Some(todo) => {
                todo.completed = completed;
                Ok(())
            }
            None => Err(CoreError::NotFound),
        }
    }
}

impl TodoRepository for InMemoryTodoRepo {
    fn get(&self, id: &TodoId) -> Result<Option<Todo>, CoreError> {
        Ok(self.lock().iter().find(|t| &t.id == id).cloned())
    }

    fn list(&self) -> Result<Vec<Todo>, CoreError> {
        Ok(self.lock().clone())
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut dyn TodoWriter) -> Result<T, CoreError>,
    {
        let mut rows = self.lock();
        let mut staged = StagedTodos { rows: rows.clone() };
        let out = work(&mut staged)?;
        *rows = staged.rows;
        Ok(out)
    }
}

impl InMemoryPersonRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            seq: Mutex::new(0),
        }
    }
}

impl Default for InMemoryPersonRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonRepository for InMemoryPersonRepo {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        Ok(map.get(id.as_str()).map(|(_, p)| p.clone()))
    }

    fn list(&self) -> Result<Vec<Person>, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut rows: Vec<&(u64, Person)> = map.values().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, p)| p.clone()).collect())
    }

    fn put(&self, person: Person) -> Result<(), CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let key = person.id.as_str().to_string();
        if map.contains_key(&key) {
            return Err(CoreError::AlreadyExists);
        }
        let mut seq = self
            .seq
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        *seq += 1;
        map.insert(key, (*seq, person));
        Ok(())
    }

    fn put_all(&self, persons: Vec<Person>) -> Result<(), CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut seen = BTreeSet::new();
        for p in &persons {
            if map.contains_key(p.id.as_str()) || !seen.insert(p.id.as_str()) {
                return Err(CoreError::AlreadyExists);
            }
        }
        let mut seq = self
            .seq
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        for person in persons {
            *seq += 1;
            map.insert(person.id.as_str().to_string(), (*seq, person));
        }
        Ok(())
    }
}
