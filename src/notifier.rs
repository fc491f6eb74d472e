//! Offline reminder delivery.
//!
//! Each cycle asks whether the user is online. If they are not, the todos
//! that carry a reminder are sent as one chat message and then deleted.
//! A failing step ends the cycle; the next cycle starts from scratch.

use crate::config::NotifierConfig;
use crate::error::NotifierError;
use crate::models::Todo;
use log::{debug, error, info, warn};
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, Response};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    UserOnline,
    /// Presence or todos could not be fetched.
    Skipped,
    NothingToSend,
    DeliveryFailed,
    Notified { sent: usize, deleted: usize },
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    content: &'a str,
}

/// `Title` or `Title: Description`.
pub fn format_todo(todo: &Todo) -> String {
    match todo.description.as_deref() {
        Some(description) if !description.is_empty() => {
            format!("{}: {}", todo.title, description)
        }
        _ => todo.title.clone(),
    }
}

pub fn compose_message(chat_user_id: &str, todos: &[Todo]) -> String {
    let items: Vec<String> = todos.iter().map(format_todo).collect();
    format!(
        "Hey, <@{}>, don't forget!\n{}",
        chat_user_id,
        items.join(",\n")
    )
}

fn check_status(resp: Response) -> Result<Response, NotifierError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(NotifierError::Status {
            url: resp.url().to_string(),
            status: status.as_u16(),
        })
    }
}

pub struct Notifier {
    config: NotifierConfig,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Result<Self, NotifierError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Notifier { config, http })
    }

    fn todos_request(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.config.todos_cookie {
            Some(cookie) => builder.header(COOKIE, cookie),
            None => builder,
        }
    }

    /// Only a body of exactly `false` counts as offline.
    pub async fn user_is_offline(&self) -> Result<bool, NotifierError> {
        let resp = self.http.get(&self.config.online_url).send().await?;
        let body = check_status(resp)?.text().await?;
        Ok(body == "false")
    }

    /// Todos that have a reminder attached.
    pub async fn fetch_reminders(&self) -> Result<Vec<Todo>, NotifierError> {
        let resp = self
            .todos_request(self.http.get(&self.config.todos_url))
            .send()
            .await?;
        let todos: Vec<Todo> = check_status(resp)?.json().await?;
        Ok(todos.into_iter().filter(Todo::has_reminder).collect())
    }

    pub async fn send(&self, todos: &[Todo]) -> Result<(), NotifierError> {
        let content = compose_message(&self.config.chat_user_id, todos);
        let resp = self
            .http
            .post(&self.config.webhook_url)
            .json(&ChatMessage { content: &content })
            .send()
            .await?;
        check_status(resp)?;
        Ok(())
    }

    /// Deletes each todo through the API and returns how many succeeded.
    /// Failures are only logged.
    pub async fn delete_todos(&self, todos: &[Todo]) -> usize {
        let mut deleted = 0;
        for todo in todos {
            let url = format!("{}/{}", self.config.todos_url, todo.id);
            match self.todos_request(self.http.delete(&url)).send().await {
                Ok(resp) => {
                    info!("Deleted TODO w/ ID {} status: {}", todo.id, resp.status());
                    if resp.status().is_success() {
                        deleted += 1;
                    }
                }
                Err(err) => error!("Error deleting TODO w/ ID {}: {}", todo.id, err),
            }
        }
        deleted
    }

    pub async fn run_cycle(&self) -> CycleOutcome {
        match self.user_is_offline().await {
            Ok(true) => {}
            Ok(false) => return CycleOutcome::UserOnline,
            Err(err) => {
                warn!("Failed to fetch online status: {}", err);
                return CycleOutcome::Skipped;
            }
        }

        let todos = match self.fetch_reminders().await {
            Ok(todos) if todos.is_empty() => return CycleOutcome::NothingToSend,
            Ok(todos) => todos,
            Err(err) => {
                warn!("Failed to fetch todos: {}", err);
                return CycleOutcome::Skipped;
            }
        };

        info!(
            "User is offline and has {} todos, sending message now!",
            todos.len()
        );
        if let Err(err) = self.send(&todos).await {
            // The todos stay put and get another go next cycle.
            error!("Failed to send reminder message: {}", err);
            return CycleOutcome::DeliveryFailed;
        }

        let deleted = if self.config.delete_after_notify {
            self.delete_todos(&todos).await
        } else {
            0
        };
        CycleOutcome::Notified {
            sent: todos.len(),
            deleted,
        }
    }

    /// One run: `checks_per_minute` cycles spread over a minute.
    pub async fn run(&self) {
        let interval = self.config.check_interval();
        for check in 0..self.config.checks_per_minute {
            let outcome = self.run_cycle().await;
            debug!("check {}: {:?}", check + 1, outcome);
            tokio::time::sleep(interval).await;
        }
    }
}
