//! Routes and handlers for the todo API.

use crate::cors::Cors;
use crate::error::{OAuthError, SessionError, StorageError};
use crate::models::{NewReminder, NewTodo, UpdateTodo};
use crate::oauth::{OAuthClient, UserInfo};
use crate::session::{Session, SessionCodec};
use crate::store::Store;
use bytes::Bytes;
use futures_util::FutureExt;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, Response, StatusCode};
use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

pub type ApiResponse = Response<Full<Bytes>>;

static INTERNAL_SERVER_ERROR: &[u8] = b"Internal Server Error";
static NOTFOUND: &[u8] = b"Not Found";

/// Largest request body the JSON handlers will buffer.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

type BoxError = Box<dyn StdError + Send + Sync>;

/// Everything a handler needs, built once at startup.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: SessionCodec,
    pub oauth: OAuthClient,
    pub cors: Cors,
    pub app_url: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthenticated")]
    Unauthorized,
    #[error("no such route")]
    NotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("{0}")]
    BadRequest(String),
    #[error("request body too large")]
    PayloadTooLarge,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    OAuth(#[from] OAuthError),
}

impl ApiError {
    fn into_response(self) -> ApiResponse {
        match self {
            ApiError::Unauthorized => empty(StatusCode::UNAUTHORIZED),
            ApiError::NotFound => text(StatusCode::NOT_FOUND, NOTFOUND),
            ApiError::MethodNotAllowed => empty(StatusCode::METHOD_NOT_ALLOWED),
            ApiError::BadRequest(reason) => {
                json_response(StatusCode::BAD_REQUEST, &json!({ "error": reason }))
            }
            ApiError::PayloadTooLarge => json_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &json!({ "error": "request body too large" }),
            ),
            ApiError::OAuth(err) => {
                warn!("{}", err);
                match err {
                    OAuthError::TokenExchange(_) => json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": "token exchange failed"}),
                    ),
                    OAuthError::UserInfoTransport(_) => json_response(
                        StatusCode::BAD_REQUEST,
                        &json!({"error": "failed to fetch user info"}),
                    ),
                    OAuthError::UserInfoStatus(code) => text(
                        StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_GATEWAY),
                        format!("userinfo responded with status {}", code),
                    ),
                    OAuthError::UserInfoDecode(_) => {
                        text(StatusCode::INTERNAL_SERVER_ERROR, "decode userinfo failed")
                    }
                }
            }
            err @ (ApiError::Storage(_) | ApiError::Session(_)) => {
                error!("{}", err);
                internal_error()
            }
        }
    }
}

fn empty(status: StatusCode) -> ApiResponse {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> ApiResponse {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

fn internal_error() -> ApiResponse {
    text(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_SERVER_ERROR)
}

fn json_response<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> ApiResponse {
    match serde_json::to_vec(value) {
        Ok(json) => {
            let mut response = Response::new(Full::new(Bytes::from(json)));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => {
            error!("could not serialize response: {}", err);
            internal_error()
        }
    }
}

fn redirect(location: &str, set_cookie: Option<String>) -> Result<ApiResponse, ApiError> {
    let mut response = empty(StatusCode::FOUND);
    let location = HeaderValue::from_str(location)
        .map_err(|_| ApiError::BadRequest("invalid redirect location".into()))?;
    response.headers_mut().insert(header::LOCATION, location);
    if let Some(cookie) = set_cookie {
        with_cookie(&mut response, &cookie);
    }
    Ok(response)
}

fn with_cookie(response: &mut ApiResponse, cookie: &str) {
    if let Ok(value) = HeaderValue::from_str(cookie) {
        response.headers_mut().insert(header::SET_COOKIE, value);
    }
}

/// Compares digests so the time taken does not depend on where the inputs
/// first differ, or on their lengths.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    Sha256::digest(a).ct_eq(&Sha256::digest(b)).into()
}

#[derive(Debug, PartialEq)]
enum Route {
    Public(PublicRoute),
    Authenticated(AuthenticatedRoute),
}

#[derive(Debug, PartialEq)]
enum PublicRoute {
    Login,
    Callback,
}

#[derive(Debug, PartialEq)]
enum AuthenticatedRoute {
    ListTodos,
    CreateTodo,
    UpdateTodo,
    DeleteTodo(String),
    CreateReminder,
    WhoAmI,
}

impl Route {
    /// A known path with the wrong method is a 405 rather than a 404 so
    /// clients can tell a typo in the path from a wrong verb.
    fn resolve(method: &Method, path: &str) -> Result<Route, ApiError> {
        let route = match (method, path) {
            (&Method::GET, "/todos") => Route::Authenticated(AuthenticatedRoute::ListTodos),
            (&Method::POST, "/todos") => Route::Authenticated(AuthenticatedRoute::CreateTodo),
            (&Method::PUT, "/todos") => Route::Authenticated(AuthenticatedRoute::UpdateTodo),
            (&Method::POST, "/reminders") => Route::Authenticated(AuthenticatedRoute::CreateReminder),
            (&Method::GET, "/whoami") => Route::Authenticated(AuthenticatedRoute::WhoAmI),
            (&Method::GET, "/auth/login") => Route::Public(PublicRoute::Login),
            (&Method::GET, "/auth/callback") => Route::Public(PublicRoute::Callback),
            (method, path) => {
                if let Some(id) = path.strip_prefix("/todos/").filter(|id| !id.contains('/')) {
                    if *method == Method::DELETE {
                        let id = id.to_string();
                        return Ok(Route::Authenticated(AuthenticatedRoute::DeleteTodo(id)));
                    }
                    return Err(ApiError::MethodNotAllowed);
                }
                return match path {
                    "/todos" | "/reminders" | "/whoami" | "/auth/login" | "/auth/callback" => {
                        Err(ApiError::MethodNotAllowed)
                    }
                    _ => Err(ApiError::NotFound),
                };
            }
        };
        Ok(route)
    }
}

/// Entry point for the connection loop. A panicking handler costs only its
/// own request a 500.
pub async fn serve<B>(state: Arc<AppState>, req: Request<B>) -> ApiResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match AssertUnwindSafe(handle(state, req)).catch_unwind().await {
        Ok(response) => response,
        Err(_) => {
            error!("request handler panicked");
            internal_error()
        }
    }
}

pub async fn handle<B>(state: Arc<AppState>, req: Request<B>) -> ApiResponse
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = if method == Method::OPTIONS {
        state.cors.preflight(origin.as_deref())
    } else {
        route(&state, req)
            .await
            .unwrap_or_else(ApiError::into_response)
    };
    state.cors.decorate(origin.as_deref(), &mut response);

    info!("{} {} {}", method, path, response.status().as_u16());
    response
}

async fn route<B>(state: &AppState, req: Request<B>) -> Result<ApiResponse, ApiError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    let route = Route::resolve(req.method(), req.uri().path())?;
    let session = read_session(state, &req);

    match route {
        Route::Public(PublicRoute::Login) => login(state, session),
        Route::Public(PublicRoute::Callback) => {
            callback(state, session, req.uri().query().unwrap_or_default()).await
        }
        Route::Authenticated(route) => {
            // Checked before the body is read or the store is touched.
            let Some(user) = session.user().map(str::to_string) else {
                info!("User Unauthenticated");
                return Err(ApiError::Unauthorized);
            };
            authenticated(state, route, user, req).await
        }
    }
}

async fn authenticated<B>(
    state: &AppState,
    route: AuthenticatedRoute,
    user: String,
    req: Request<B>,
) -> Result<ApiResponse, ApiError>
where
    B: Body,
    B::Error: Into<BoxError>,
{
    match route {
        AuthenticatedRoute::ListTodos => {
            info!("Getting TODOs for USER: {}", user);
            let todos = state.store.list_todos().await?;
            Ok(json_response(StatusCode::OK, &todos))
        }
        AuthenticatedRoute::CreateTodo => {
            let new_todo: NewTodo = read_json(req).await?;
            let created = state.store.create_todo(new_todo).await?;
            Ok(json_response(StatusCode::CREATED, &created))
        }
        AuthenticatedRoute::UpdateTodo => {
            let update: UpdateTodo = read_json(req).await?;
            info!("GOT PUT REQUEST FOR: {}", update.id);
            state.store.update_todo(update).await?;
            Ok(empty(StatusCode::OK))
        }
        AuthenticatedRoute::DeleteTodo(id) => {
            info!("GOT DELETE REQUEST FOR: {}", id);
            let id: i32 = id
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid todo id: {}", id)))?;
            let deleted = state.store.delete_todo(id).await?;
            Ok(json_response(StatusCode::OK, &deleted))
        }
        AuthenticatedRoute::CreateReminder => {
            let new_reminder: NewReminder = read_json(req).await?;
            let created = state.store.create_reminder(new_reminder).await?;
            Ok(json_response(StatusCode::CREATED, &created))
        }
        AuthenticatedRoute::WhoAmI => Ok(json_response(StatusCode::OK, &json!({ "user": user }))),
    }
}

fn read_session<B>(state: &AppState, req: &Request<B>) -> Session {
    req.headers()
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|cookies| state.sessions.read_cookie_header(cookies))
        .unwrap_or_default()
}

async fn read_json<T, B>(req: Request<B>) -> Result<T, ApiError>
where
    T: DeserializeOwned,
    B: Body,
    B::Error: Into<BoxError>,
{
    let whole_body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|err| {
            if err.downcast_ref::<LengthLimitError>().is_some() {
                ApiError::PayloadTooLarge
            } else {
                ApiError::BadRequest(format!("could not read body: {}", err))
            }
        })?
        .to_bytes();
    serde_json::from_slice(&whole_body).map_err(|err| ApiError::BadRequest(err.to_string()))
}

fn login(state: &AppState, mut session: Session) -> Result<ApiResponse, ApiError> {
    let oauth_state = OAuthClient::new_state();
    let url = state.oauth.authorize_url(&oauth_state);
    session.oauth_state = Some(oauth_state);
    let cookie = state.sessions.set_cookie(&session)?;
    redirect(url.as_str(), Some(cookie))
}

async fn callback(
    state: &AppState,
    mut session: Session,
    query: &str,
) -> Result<ApiResponse, ApiError> {
    let mut code = None;
    let mut returned_state = None;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => returned_state = Some(value.into_owned()),
            _ => {}
        }
    }

    let state_matches = match (session.oauth_state.take(), returned_state) {
        (Some(expected), Some(returned)) => {
            constant_time_eq(expected.as_bytes(), returned.as_bytes())
        }
        _ => false,
    };
    if !state_matches {
        warn!("OAuth callback with unknown state");
        return Err(ApiError::BadRequest("invalid oauth state".into()));
    }

    // The state is spent once it matched, whether or not the login succeeds.
    let user_info = match fetch_user(state, code).await {
        Ok(user_info) => user_info,
        Err(err) => {
            let cleared = state.sessions.set_cookie(&session)?;
            let mut response = err.into_response();
            with_cookie(&mut response, &cleared);
            return Ok(response);
        }
    };
    info!("Logged in {}", user_info.username);

    let session = Session {
        user: Some(user_info.username),
        oauth_state: None,
    };
    let cookie = state.sessions.set_cookie(&session)?;
    redirect(&state.app_url, Some(cookie))
}

async fn fetch_user(state: &AppState, code: Option<String>) -> Result<UserInfo, ApiError> {
    let code = code.ok_or_else(|| ApiError::BadRequest("missing authorization code".into()))?;
    let token = state.oauth.exchange_code(&code).await?;
    Ok(state.oauth.user_info(&token).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_comparison() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"abc"));
    }

    #[test]
    fn resolves_routes() {
        assert_eq!(
            Route::resolve(&Method::GET, "/todos").unwrap(),
            Route::Authenticated(AuthenticatedRoute::ListTodos)
        );
        assert_eq!(
            Route::resolve(&Method::DELETE, "/todos/17").unwrap(),
            Route::Authenticated(AuthenticatedRoute::DeleteTodo("17".into()))
        );
        assert_eq!(
            Route::resolve(&Method::POST, "/reminders").unwrap(),
            Route::Authenticated(AuthenticatedRoute::CreateReminder)
        );
        assert_eq!(
            Route::resolve(&Method::GET, "/auth/callback").unwrap(),
            Route::Public(PublicRoute::Callback)
        );
    }

    #[test]
    fn unknown_paths_and_methods() {
        assert!(matches!(
            Route::resolve(&Method::GET, "/nope"),
            Err(ApiError::NotFound)
        ));
        assert!(matches!(
            Route::resolve(&Method::GET, "/todos/3/extra"),
            Err(ApiError::NotFound)
        ));
        assert!(matches!(
            Route::resolve(&Method::DELETE, "/todos"),
            Err(ApiError::MethodNotAllowed)
        ));
        assert!(matches!(
            Route::resolve(&Method::GET, "/todos/3"),
            Err(ApiError::MethodNotAllowed)
        ));
    }
}
