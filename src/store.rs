//! Todo and reminder persistence.
//!
//! Diesel is synchronous, so every query checks a connection out of the r2d2
//! pool and runs on tokio's blocking pool.

use crate::error::StorageError;
use crate::models::{NewReminder, NewTodo, Reminder, Todo, UpdateTodo};
use crate::schema::{reminders, todo};
use async_trait::async_trait;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use log::info;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

#[async_trait]
pub trait TodoStore: Send + Sync {
    /// All todos, each carrying the username of its reminder if it has one.
    async fn list_todos(&self) -> Result<Vec<Todo>, StorageError>;

    async fn create_todo(&self, new_todo: NewTodo) -> Result<Todo, StorageError>;

    /// Updating an id that does not exist is not an error.
    async fn update_todo(&self, update: UpdateTodo) -> Result<(), StorageError>;

    /// Removes the todo and its reminders, returning how many rows went.
    async fn delete_todo(&self, id: i32) -> Result<usize, StorageError>;
}

#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// The todo id is not checked against the `todo` table.
    async fn create_reminder(&self, new_reminder: NewReminder) -> Result<Reminder, StorageError>;
}

pub trait Store: TodoStore + ReminderStore {}

impl<T: TodoStore + ReminderStore> Store for T {}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    /// Builds the pool; r2d2 opens its first connection here, so a bad URL or
    /// an unreachable database fails at startup.
    pub fn connect(database_url: &str) -> Result<Self, StorageError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder().build(manager)?;
        Ok(PgStore::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run<T, F>(&self, query: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> Result<T, StorageError> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            query(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl TodoStore for PgStore {
    async fn list_todos(&self) -> Result<Vec<Todo>, StorageError> {
        self.run(|conn| {
            let todos = todo::table
                .left_join(reminders::table)
                .select((
                    todo::id,
                    todo::title,
                    todo::description,
                    reminders::username.nullable(),
                ))
                .order(todo::id)
                .load::<Todo>(conn)?;
            Ok(todos)
        })
        .await
    }

    async fn create_todo(&self, new_todo: NewTodo) -> Result<Todo, StorageError> {
        self.run(move |conn| {
            let columns = diesel::insert_into(todo::table)
                .values(&new_todo)
                .returning((todo::id, todo::title, todo::description))
                .get_result::<(i32, String, Option<String>)>(conn)?;
            Ok(Todo::from_columns(columns))
        })
        .await
    }

    async fn update_todo(&self, update: UpdateTodo) -> Result<(), StorageError> {
        self.run(move |conn| {
            diesel::update(todo::table.find(update.id))
                .set((
                    todo::title.eq(update.title),
                    todo::description.eq(update.description),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    async fn delete_todo(&self, id: i32) -> Result<usize, StorageError> {
        self.run(move |conn| {
            let (deleted_reminders, deleted_todos) = conn.transaction(|conn| {
                let deleted_reminders =
                    diesel::delete(reminders::table.filter(reminders::todo_id.eq(id)))
                        .execute(conn)?;
                let deleted_todos = diesel::delete(todo::table.find(id)).execute(conn)?;
                Ok::<_, diesel::result::Error>((deleted_reminders, deleted_todos))
            })?;
            info!(
                "Deleted {} todos and {} reminders",
                deleted_todos, deleted_reminders
            );
            Ok(deleted_todos + deleted_reminders)
        })
        .await
    }
}

#[async_trait]
impl ReminderStore for PgStore {
    async fn create_reminder(&self, new_reminder: NewReminder) -> Result<Reminder, StorageError> {
        self.run(move |conn| {
            let reminder = diesel::insert_into(reminders::table)
                .values(&new_reminder)
                .get_result::<Reminder>(conn)?;
            Ok(reminder)
        })
        .await
    }
}
