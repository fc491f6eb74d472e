use serde_json::json;
use std::time::Duration;
use todo_reminders::config::NotifierConfig;
use todo_reminders::notifier::{CycleOutcome, Notifier};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> NotifierConfig {
    NotifierConfig {
        online_url: format!("{}/online", server.uri()),
        todos_url: format!("{}/todos", server.uri()),
        webhook_url: format!("{}/webhook", server.uri()),
        chat_user_id: "1234".into(),
        todos_cookie: None,
        checks_per_minute: 20,
        request_timeout: Duration::from_secs(2),
        delete_after_notify: true,
    }
}

fn notifier(server: &MockServer) -> Notifier {
    Notifier::new(config(server)).unwrap()
}

async fn user_online(server: &MockServer, body: &str) {
    Mock::given(method("GET"))
        .and(path("/online"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn todos(server: &MockServer, todos: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path("/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(todos))
        .mount(server)
        .await;
}

async fn webhook(server: &MockServer, status: u16, times: u64) {
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .respond_with(ResponseTemplate::new(status))
        .expect(times)
        .mount(server)
        .await;
}

#[tokio::test]
async fn online_user_is_left_alone() {
    let server = MockServer::start().await;
    user_online(&server, "true").await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(0)
        .mount(&server)
        .await;
    webhook(&server, 204, 0).await;

    assert_eq!(notifier(&server).run_cycle().await, CycleOutcome::UserOnline);
}

#[tokio::test]
async fn only_an_exact_false_means_offline() {
    let server = MockServer::start().await;
    user_online(&server, "false\n").await;
    webhook(&server, 204, 0).await;

    assert_eq!(notifier(&server).run_cycle().await, CycleOutcome::UserOnline);
}

#[tokio::test]
async fn offline_without_reminders_sends_nothing() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    todos(
        &server,
        json!([{"id": 1, "title": "No reminder", "description": null, "username": null}]),
    )
    .await;
    webhook(&server, 204, 0).await;

    assert_eq!(
        notifier(&server).run_cycle().await,
        CycleOutcome::NothingToSend
    );
}

#[tokio::test]
async fn offline_with_reminders_sends_one_message_then_deletes() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    todos(
        &server,
        json!([
            {"id": 1, "title": "Buy milk", "description": "2%", "username": "alice"},
            {"id": 2, "title": "No reminder", "description": "", "username": null},
            {"id": 3, "title": "Call mom", "description": "", "username": "alice"}
        ]),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/webhook"))
        .and(header("content-type", "application/json"))
        .and(body_json(json!({
            "content": "Hey, <@1234>, don't forget!\nBuy milk: 2%,\nCall mom"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    for id in [1, 3] {
        Mock::given(method("DELETE"))
            .and(path(format!("/todos/{}", id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(1)))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("DELETE"))
        .and(path("/todos/2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(
        notifier(&server).run_cycle().await,
        CycleOutcome::Notified { sent: 2, deleted: 2 }
    );
}

#[tokio::test]
async fn failed_delivery_keeps_the_todos() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    todos(
        &server,
        json!([{"id": 5, "title": "Buy milk", "description": null, "username": "alice"}]),
    )
    .await;
    webhook(&server, 500, 1).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    assert_eq!(
        notifier(&server).run_cycle().await,
        CycleOutcome::DeliveryFailed
    );
}

#[tokio::test]
async fn failed_deletes_are_counted_not_fatal() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    todos(
        &server,
        json!([
            {"id": 1, "title": "a", "description": null, "username": "alice"},
            {"id": 2, "title": "b", "description": null, "username": "alice"}
        ]),
    )
    .await;
    webhook(&server, 200, 1).await;
    Mock::given(method("DELETE"))
        .and(path("/todos/1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/todos/2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    assert_eq!(
        notifier(&server).run_cycle().await,
        CycleOutcome::Notified { sent: 2, deleted: 1 }
    );
}

#[tokio::test]
async fn unreachable_presence_endpoint_skips_the_cycle() {
    let server = MockServer::start().await;
    webhook(&server, 204, 0).await;

    // nothing listens on the discard port
    let config = NotifierConfig {
        online_url: "http://127.0.0.1:9/online".into(),
        ..config(&server)
    };
    let notifier = Notifier::new(config).unwrap();

    assert_eq!(notifier.run_cycle().await, CycleOutcome::Skipped);
}

#[tokio::test]
async fn broken_todos_endpoint_skips_the_cycle() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    webhook(&server, 204, 0).await;

    assert_eq!(notifier(&server).run_cycle().await, CycleOutcome::Skipped);
}

#[tokio::test]
async fn todos_cookie_is_forwarded_and_cleanup_can_be_disabled() {
    let server = MockServer::start().await;
    user_online(&server, "false").await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .and(header("cookie", "auth=abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "title": "a", "description": null, "username": "alice"}
        ])))
        .expect(1)
        .mount(&server)
        .await;
    webhook(&server, 204, 1).await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = NotifierConfig {
        todos_cookie: Some("auth=abc".into()),
        delete_after_notify: false,
        ..config(&server)
    };
    let notifier = Notifier::new(config).unwrap();

    assert_eq!(
        notifier.run_cycle().await,
        CycleOutcome::Notified { sent: 1, deleted: 0 }
    );
}
