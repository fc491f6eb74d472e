use super::schema::{reminders, todo};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// A todo as served by `GET /todos`. `username` comes from the reminder
/// joined onto the row and is `None` when no reminder references it.
#[derive(Queryable, Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Todo {
    pub id: i32,
    pub title: String,
    pub description: Option<String>,
    pub username: Option<String>,
}

impl Todo {
    /// Builds a todo straight from its own columns, before any reminder exists.
    pub fn from_columns((id, title, description): (i32, String, Option<String>)) -> Self {
        Todo {
            id,
            title,
            description,
            username: None,
        }
    }

    pub fn has_reminder(&self) -> bool {
        self.username.is_some()
    }
}

#[derive(Deserialize, Insertable, Clone, Debug)]
#[diesel(table_name = todo)]
pub struct NewTodo {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct UpdateTodo {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A reminder row. On the wire the todo id travels as `id` and the row's own
/// key is not exposed.
#[derive(Queryable, Serialize, Clone, PartialEq, Debug)]
pub struct Reminder {
    #[serde(skip)]
    pub id: i32,
    #[serde(rename = "id")]
    pub todo_id: i32,
    pub username: String,
}

#[derive(Deserialize, Insertable, Clone, Debug)]
#[diesel(table_name = reminders)]
pub struct NewReminder {
    #[serde(rename = "id")]
    pub todo_id: i32,
    pub username: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn todo_without_reminder_serializes_null_username() {
        let todo = Todo::from_columns((4, "Buy milk".into(), None));
        assert_eq!(
            serde_json::to_value(&todo).unwrap(),
            json!({"id": 4, "title": "Buy milk", "description": null, "username": null})
        );
        assert!(!todo.has_reminder());
    }

    #[test]
    fn reminder_exposes_todo_id_as_id() {
        let reminder = Reminder {
            id: 91,
            todo_id: 7,
            username: "alice".into(),
        };
        assert_eq!(
            serde_json::to_value(&reminder).unwrap(),
            json!({"id": 7, "username": "alice"})
        );
    }

    #[test]
    fn new_reminder_reads_todo_id_from_id() {
        let reminder: NewReminder =
            serde_json::from_str(r#"{"id": 12, "username": "bob"}"#).unwrap();
        assert_eq!(reminder.todo_id, 12);
        assert_eq!(reminder.username, "bob");
    }

    #[test]
    fn new_todo_accepts_missing_description_and_empty_title() {
        let new_todo: NewTodo = serde_json::from_str(r#"{"title": ""}"#).unwrap();
        assert_eq!(new_todo.title, "");
        assert_eq!(new_todo.description, None);
    }
}
