//! JSON resources under `/api`: async demos, to-dos, persons, greeting.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{SecondsFormat, Utc};
use concurrency::{complete_async, complete_blocking, suspend, CompletionError};
use domain::{CoreError, Decimal, NewTodo, Person, PersonId, Todo, TodoId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::AppState;

#[derive(Deserialize)]
pub struct CreateTodoReq {
    title: String,
    #[serde(default)]
    completed: bool,
}

#[derive(Serialize)]
struct TodoOut {
    id: String,
    title: String,
    completed: bool,
}

impl From<Todo> for TodoOut {
    fn from(t: Todo) -> Self {
        Self {
            id: t.id.as_str().to_string(),
            title: t.title,
            completed: t.completed,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersonOut {
    id: String,
    name: String,
    age: u32,
    gender: domain::Gender,
    years_worked: u32,
    birth_day: String,
    salary: Decimal,
    hourly_rate: Decimal,
}

impl From<Person> for PersonOut {
    fn from(p: Person) -> Self {
        Self {
            id: p.id.as_str().to_string(),
            name: p.name,
            age: p.age,
            gender: p.gender,
            years_worked: p.years_worked,
            birth_day: http_common::system_time_to_rfc3339(p.birth_day),
            salary: p.salary,
            hourly_rate: p.hourly_rate,
        }
    }
}

fn core_error_response(e: CoreError) -> Response {
    match e {
        CoreError::InvalidId(_) => (
            StatusCode::BAD_REQUEST,
            Json(http_common::json_err("invalid_id")),
        )
            .into_response(),
        CoreError::InvalidTitle(msg) => (
            StatusCode::BAD_REQUEST,
            Json(http_common::json_error_with_message("bad_request", &msg)),
        )
            .into_response(),
        CoreError::AlreadyExists => (
            StatusCode::CONFLICT,
            Json(http_common::json_err("conflict")),
        )
            .into_response(),
        CoreError::NotFound => (
            StatusCode::NOT_FOUND,
            Json(http_common::json_err("not_found")),
        )
            .into_response(),
        CoreError::Repository(msg) => {
            error!(err = %msg, "repository error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_error_with_message(
                    "internal",
                    "server error",
                )),
            )
                .into_response()
        }
    }
}

fn completion_error_response(e: CompletionError<CoreError>) -> Response {
    match e {
        CompletionError::TimedOut(limit) => {
            warn!(timeout_ms = limit.as_millis() as u64, "responding 503");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(http_common::json_err("service_unavailable")),
            )
                .into_response()
        }
        CompletionError::Work(e) => core_error_response(e),
        CompletionError::Interrupted(reason) => {
            error!(%reason, "async work interrupted");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_error_with_message(
                    "internal",
                    "server error",
                )),
            )
                .into_response()
        }
    }
}

/// 400 in the JSON error envelope for bodies axum could not decode.
fn bad_json(rejection: JsonRejection) -> Response {
    warn!(status = rejection.status().as_u16(), "rejected json body");
    (
        StatusCode::BAD_REQUEST,
        Json(http_common::json_error_with_message(
            "bad_request",
            &rejection.body_text(),
        )),
    )
        .into_response()
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Absolute `/api` base of this request, relative when no `Host` is sent.
fn api_base(headers: &HeaderMap) -> String {
    http_common::base_url_from_host(
        header_str(headers, header::HOST.as_str()).unwrap_or(""),
        header_str(headers, "x-forwarded-proto"),
        "/api",
    )
}

fn created(headers: &HeaderMap, todo: Todo) -> Response {
    let location = http_common::resource_location(&api_base(headers), "todos", todo.id.as_str());
    info!(id = %todo.id, "create ok");
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(TodoOut::from(todo)),
    )
        .into_response()
}

// ---- async demos ----

/// Blocking work on the executor, answered through a bounded suspension.
pub async fn async_resource(State(state): State<AppState>) -> Response {
    let delay = state.work_delay;
    let out = complete_blocking(&state.executor, Some(state.async_timeout), move || {
        std::thread::sleep(delay);
        Ok::<_, CoreError>("asynchronous resource")
    })
    .await;
    match out {
        Ok(body) => body.into_response(),
        Err(e) => completion_error_response(e),
    }
}

/// Async work awaited without an explicit bound.
pub async fn ejb_resource(State(state): State<AppState>) -> Response {
    let delay = state.work_delay;
    let out = complete_async(&state.executor, None, async move {
        tokio::time::sleep(delay).await;
        Ok::<_, CoreError>("Asynchronus EJB resource")
    })
    .await;
    match out {
        Ok(body) => body.into_response(),
        Err(e) => completion_error_response(e),
    }
}

/// Blocking work on the managed executor, awaited without an explicit bound.
pub async fn concurrency_async_resource(State(state): State<AppState>) -> Response {
    let delay = state.work_delay;
    let out = complete_blocking(&state.executor, None, move || {
        std::thread::sleep(delay);
        Ok::<_, CoreError>("Concurrency Async resource")
    })
    .await;
    match out {
        Ok(body) => body.into_response(),
        Err(e) => completion_error_response(e),
    }
}

// ---- to-dos ----

pub async fn list_todos(State(state): State<AppState>) -> Response {
    match state.todos.find_all() {
        Ok(todos) => {
            let out: Vec<TodoOut> = todos.into_iter().map(TodoOut::from).collect();
            Json(out).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

pub async fn create_todo(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateTodoReq>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let input = NewTodo {
        title: body.title,
        completed: body.completed,
    };
    match state.todos.create(input) {
        Ok(todo) => created(&headers, todo),
        Err(e) => core_error_response(e),
    }
}

pub async fn create_todo_async(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CreateTodoReq>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => return bad_json(rejection),
    };
    let todos = state.todos.clone();
    let input = NewTodo {
        title: body.title,
        completed: body.completed,
    };
    let out = complete_blocking(&state.executor, Some(state.async_timeout), move || {
        todos.create(input)
    })
    .await;
    match out {
        Ok(todo) => created(&headers, todo),
        Err(e) => completion_error_response(e),
    }
}

fn todo_list_response(out: Result<Vec<Todo>, CompletionError<CoreError>>) -> Response {
    match out {
        Ok(todos) => {
            debug!(count = todos.len(), "async list ok");
            let out: Vec<TodoOut> = todos.into_iter().map(TodoOut::from).collect();
            Json(out).into_response()
        }
        Err(e) => completion_error_response(e),
    }
}

/// Query on the managed executor, bounded by the async timeout.
pub async fn list_todos_async(State(state): State<AppState>) -> Response {
    let todos = state.todos.clone();
    let out =
        complete_blocking(&state.executor, Some(state.async_timeout), move || todos.find_all())
            .await;
    todo_list_response(out)
}

/// Query submitted to the managed executor as a future and awaited as is.
pub async fn list_todos_ejb_future(State(state): State<AppState>) -> Response {
    let todos = state.todos.clone();
    let out = complete_async(&state.executor, None, async move { todos.find_all() }).await;
    todo_list_response(out)
}

/// Synchronous query, then completion from a task on the runtime's own pool.
pub async fn list_todos_and_async(State(state): State<AppState>) -> Response {
    let todos = match state.todos.find_all() {
        Ok(todos) => todos,
        Err(e) => return core_error_response(e),
    };
    let (response, suspended) = suspend::<Vec<Todo>, CoreError>(None);
    tokio::spawn(async move {
        response.resume_ok(todos);
    });
    todo_list_response(suspended.wait().await)
}

/// Synchronous query, then completion on the managed executor.
pub async fn list_todos_and_concurrency_async(State(state): State<AppState>) -> Response {
    let todos = match state.todos.find_all() {
        Ok(todos) => todos,
        Err(e) => return core_error_response(e),
    };
    let out = complete_blocking(&state.executor, None, move || Ok::<_, CoreError>(todos)).await;
    todo_list_response(out)
}

pub async fn get_todo(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match TodoId::new(id) {
        Ok(id) => id,
        Err(e) => {
            warn!("bad todo id in path");
            return core_error_response(e);
        }
    };
    match state.todos.find_by_id(&id) {
        Ok(Some(todo)) => Json(TodoOut::from(todo)).into_response(),
        Ok(None) => {
            warn!(id = %id, "todo 404");
            core_error_response(CoreError::NotFound)
        }
        Err(e) => core_error_response(e),
    }
}

pub async fn mark_todo_completed(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let id = match TodoId::new(id) {
        Ok(id) => id,
        Err(e) => return core_error_response(e),
    };
    match state.todos.mark_completed(&id) {
        Ok(event) => {
            info!(id = %id, "todo completed");
            state.notifications.dispatch(event);
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => core_error_response(e),
    }
}

// ---- persons ----

pub async fn list_persons(State(state): State<AppState>) -> Response {
    match state.persons.find_all() {
        Ok(persons) => {
            let out: Vec<PersonOut> = persons.into_iter().map(PersonOut::from).collect();
            Json(out).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

pub async fn get_person(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let id = match PersonId::new(id) {
        Ok(id) => id,
        Err(e) => return core_error_response(e),
    };
    match state.persons.find_by_id(&id) {
        Ok(Some(p)) => Json(PersonOut::from(p)).into_response(),
        Ok(None) => core_error_response(CoreError::NotFound),
        Err(e) => core_error_response(e),
    }
}

// ---- greeting ----

#[derive(Deserialize)]
pub struct GreetingQuery {
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GreetingOut {
    name: String,
    sent_at: String,
}

pub async fn greeting(Query(q): Query<GreetingQuery>) -> impl IntoResponse {
    let out = GreetingOut {
        name: q
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| "Hantsy".into()),
        sent_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    Json(out)
}
