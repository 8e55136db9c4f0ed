// Local repo abstraction supporting memory or sqlite (feature-gated).

use std::sync::Arc;

use domain::adapters::memory_repo::{InMemoryPersonRepo, InMemoryTodoRepo};
use domain::{CoreError, Person, PersonId, PersonRepository, Todo, TodoId, TodoRepository, TodoWriter};
use tracing::{error, info};

use crate::config;

enum RepoKind {
    Memory {
        todos: InMemoryTodoRepo,
        persons: InMemoryPersonRepo,
    },
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
}

/// Cheap to clone; both services share one backing store.
#[derive(Clone)]
pub struct AnyRepo {
    kind: Arc<RepoKind>,
}

impl AnyRepo {
    pub fn memory() -> Self {
        Self {
            kind: Arc::new(RepoKind::Memory {
                todos: InMemoryTodoRepo::new(),
                persons: InMemoryPersonRepo::new(),
            }),
        }
    }

    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: &std::path::Path) -> Result<Self, CoreError> {
        Ok(Self {
            kind: Arc::new(RepoKind::Sqlite(
                sqlite_adapter::SqliteRepo::open_creating_dirs(path)?,
            )),
        })
    }

    pub fn backend(&self) -> &'static str {
        match &*self.kind {
            RepoKind::Memory { .. } => "memory",
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(_) => "sqlite",
        }
    }
}

impl TodoRepository for AnyRepo {
    fn get(&self, id: &TodoId) -> Result<Option<Todo>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { todos, .. } => todos.get(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TodoRepository::get(r, id),
        }
    }

    fn list(&self) -> Result<Vec<Todo>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { todos, .. } => todos.list(),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => TodoRepository::list(r),
        }
    }

    fn transaction<T, F>(&self, work: F) -> Result<T, CoreError>
    where
        F: FnOnce(&mut dyn TodoWriter) -> Result<T, CoreError>,
    {
        match &*self.kind {
            RepoKind::Memory { todos, .. } => todos.transaction(work),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.transaction(work),
        }
    }
}

impl PersonRepository for AnyRepo {
    fn get(&self, id: &PersonId) -> Result<Option<Person>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { persons, .. } => persons.get(id),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => PersonRepository::get(r, id),
        }
    }

    fn list(&self) -> Result<Vec<Person>, CoreError> {
        match &*self.kind {
            RepoKind::Memory { persons, .. } => persons.list(),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => PersonRepository::list(r),
        }
    }

    fn put(&self, person: Person) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { persons, .. } => persons.put(person),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.put(person),
        }
    }

    fn put_all(&self, persons: Vec<Person>) -> Result<(), CoreError> {
        match &*self.kind {
            RepoKind::Memory { persons: repo, .. } => repo.put_all(persons),
            #[cfg(feature = "sqlite")]
            RepoKind::Sqlite(r) => r.put_all(persons),
        }
    }
}

// Construct a repository instance based on config and feature flags.
pub fn build_repo(cfg: &config::Config) -> AnyRepo {
    let repo = match cfg.storage_provider {
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => match AnyRepo::sqlite(&cfg.db_path) {
            Ok(r) => r,
            Err(e) => {
                error!(path = %cfg.db_path.display(), err = %e, "failed to open sqlite, using memory");
                AnyRepo::memory()
            }
        },
        _ => AnyRepo::memory(),
    };
    info!(backend = repo.backend(), "repository ready");
    repo
}
