use crate::validate::validate_title;
use crate::{
    Clock, CoreError, IdGenerator, NewTodo, Person, PersonId, PersonRepository, Todo,
    TodoCompleted, TodoId, TodoRepository,
};

/// Titles of the to-do items seeded at startup.
pub const SAMPLE_TODO_TITLES: [&str; 3] = [
    "What's new in JPA 3.1?",
    "What's new in Jaxrs 3.1",
    "Learn new features in Faces 4.0",
];

/// Name/age pairs of the persons seeded at startup.
pub const SAMPLE_PERSONS: [(&str, u32); 2] = [("Jack", 20), ("Rose", 18)];

/// Application service for to-do items.
///
/// Generic over repository, id generator and clock so it can be exercised
/// with the in-memory adapter in tests and SQLite in the server. Every write
/// goes through an explicit transaction scope on the repository.
pub struct TodoService<R: TodoRepository, G: IdGenerator, C: Clock> {
    repo: R,
    ids: G,
    clock: C,
}

impl<R: TodoRepository, G: IdGenerator, C: Clock> TodoService<R, G, C> {
    pub fn new(repo: R, ids: G, clock: C) -> Self {
        Self { repo, ids, clock }
    }

    /// Persist a new to-do and return it with its generated identifier.
    pub fn create(&self, input: NewTodo) -> Result<Todo, CoreError> {
        validate_title(&input.title)?;
        let todo = Todo {
            id: TodoId::new(self.ids.next_id())?,
            title: input.title.trim().to_string(),
            completed: input.completed,
        };
        self.repo.transaction(|tx| {
            tx.insert(todo.clone())?;
            Ok(todo)
        })
    }

    pub fn find_by_id(&self, id: &TodoId) -> Result<Option<Todo>, CoreError> {
        self.repo.get(id)
    }

    pub fn find_all(&self) -> Result<Vec<Todo>, CoreError> {
        self.repo.list()
    }

    /// Flag a to-do as completed and return the event describing it.
    pub fn mark_completed(&self, id: &TodoId) -> Result<TodoCompleted, CoreError> {
        self.repo.transaction(|tx| tx.set_completed(id, true))?;
        Ok(TodoCompleted {
            todo_id: id.clone(),
            completed_at: self.clock.now(),
        })
    }

    /// Insert the sample to-dos in one transaction; either all of them are
    /// stored or none is.
    pub fn seed(&self) -> Result<Vec<Todo>, CoreError> {
        let todos = SAMPLE_TODO_TITLES
            .iter()
            .map(|title| {
                Ok(Todo {
                    id: TodoId::new(self.ids.next_id())?,
                    title: (*title).to_string(),
                    completed: false,
                })
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        self.repo.transaction(|tx| {
            for todo in &todos {
                tx.insert(todo.clone())?;
            }
            Ok(todos)
        })
    }
}

/// Read-mostly service for person records.
pub struct PersonService<R: PersonRepository, G: IdGenerator, C: Clock> {
    repo: R,
    ids: G,
    clock: C,
}

impl<R: PersonRepository, G: IdGenerator, C: Clock> PersonService<R, G, C> {
    pub fn new(repo: R, ids: G, clock: C) -> Self {
        Self { repo, ids, clock }
    }

    pub fn find_by_id(&self, id: &PersonId) -> Result<Option<Person>, CoreError> {
        self.repo.get(id)
    }

    pub fn find_all(&self) -> Result<Vec<Person>, CoreError> {
        self.repo.list()
    }

    /// Insert the sample persons as one batch; either all of them are
    /// stored or none is.
    pub fn seed(&self) -> Result<Vec<Person>, CoreError> {
        let now = self.clock.now();
        let persons = SAMPLE_PERSONS
            .iter()
            .map(|(name, age)| {
                Ok(Person::new(
                    PersonId::new(self.ids.next_id())?,
                    *name,
                    *age,
                    now,
                ))
            })
            .collect::<Result<Vec<_>, CoreError>>()?;
        self.repo.put_all(persons.clone())?;
        Ok(persons)
    }
}
