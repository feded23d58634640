use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{
        AdminUpdateRequest, ListQuery, UpdatePasswordRequest, UpdateProfileRequest,
        UserListResponse,
    },
    service::UserService,
};
use crate::{
    auth::extractors::AuthUser,
    error::AuthError,
    state::AppState,
    store::{Role, UserProfile},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users))
        .route("/users/me", get(get_me).patch(update_me).delete(remove_me))
        .route("/users/me/password", put(update_password))
        .route(
            "/users/:id",
            get(admin_find_one).patch(admin_update).delete(admin_remove),
        )
}

#[instrument(skip(users, user))]
pub async fn get_me(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UserProfile>, AuthError> {
    Ok(Json(users.profile(user.id).await?))
}

#[instrument(skip(users, user, payload))]
pub async fn update_me(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<Json<UserProfile>, AuthError> {
    AuthError::check(payload.validate())?;
    let name = payload.name.map(|n| n.trim().to_string());
    Ok(Json(users.update_profile(user.id, name, payload.avatar).await?))
}

#[instrument(skip(users, user, payload))]
pub async fn update_password(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Json<bool>, AuthError> {
    AuthError::check(payload.validate())?;
    let changed = users
        .update_password(user.id, &payload.current_password, &payload.new_password)
        .await?;
    Ok(Json(changed))
}

#[instrument(skip(users, user))]
pub async fn remove_me(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
) -> Result<Json<UserProfile>, AuthError> {
    Ok(Json(users.remove(user.id, user.id).await?))
}

#[instrument(skip(users, user))]
pub async fn list_users(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<UserListResponse>, AuthError> {
    user.require(Role::Admin)?;
    let window = query.window().map_err(AuthError::Validation)?;
    Ok(Json(
        users.list(window.role, window.skip, window.take).await?,
    ))
}

#[instrument(skip(users, user))]
pub async fn admin_find_one(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, AuthError> {
    user.require(Role::Admin)?;
    Ok(Json(users.find_one(id).await?))
}

#[instrument(skip(users, user, payload))]
pub async fn admin_update(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminUpdateRequest>,
) -> Result<Json<UserProfile>, AuthError> {
    user.require(Role::Admin)?;
    let role = payload.validate().map_err(AuthError::Validation)?;
    let name = payload.name.map(|n| n.trim().to_string());
    Ok(Json(
        users.admin_update(id, name, role, payload.avatar).await?,
    ))
}

#[instrument(skip(users, user))]
pub async fn admin_remove(
    State(users): State<Arc<UserService>>,
    AuthUser(user): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<UserProfile>, AuthError> {
    user.require(Role::Admin)?;
    Ok(Json(users.remove(id, user.id).await?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Method, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{
        app::build_app,
        store::{CredentialStore, Role, UserPatch},
        test_support::Harness,
    };

    async fn call(
        app: &Router,
        method: Method,
        uri: &str,
        bearer: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {bearer}"));
        let req = match body {
            Some(json) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };
        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn session(h: &Harness, email: &str) -> (uuid::Uuid, String) {
        h.engine.signup("Ann", email, "Passw0rd!").await.unwrap();
        let code = h.notifier.last_code(email).unwrap();
        let tokens = h.engine.activate_account(email, &code).await.unwrap();
        (tokens.user_id, tokens.access_token)
    }

    async fn admin_session(h: &Harness, email: &str) -> (uuid::Uuid, String) {
        let (id, _) = session(h, email).await;
        h.store
            .update_user(
                id,
                UserPatch {
                    role: Some(Role::Admin),
                    ..UserPatch::default()
                },
            )
            .await
            .unwrap();
        let tokens = h.engine.signin_local(email, "Passw0rd!").await.unwrap();
        (id, tokens.access_token)
    }

    #[tokio::test]
    async fn me_requires_a_live_access_token() {
        let h = Harness::new();
        let app = build_app(h.state.clone());
        let (_, at) = session(&h, "a@x.com").await;

        let (status, body) = call(&app, Method::GET, "/api/v1/users/me", &at, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "a@x.com");
        assert_eq!(body["role"], "CUSTOMER");
        assert!(body.get("password_hash").is_none());

        let (status, _) = call(&app, Method::GET, "/api/v1/users/me", "garbage", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn profile_update_is_visible_immediately() {
        let h = Harness::new();
        let app = build_app(h.state.clone());
        let (_, at) = session(&h, "a@x.com").await;

        let (status, _) = call(
            &app,
            Method::PATCH,
            "/api/v1/users/me",
            &at,
            Some(json!({"name": " Renamed "})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, Method::GET, "/api/v1/users/me", &at, None).await;
        assert_eq!(body["name"], "Renamed");
    }

    #[tokio::test]
    async fn password_change_logs_the_user_out() {
        let h = Harness::new();
        let app = build_app(h.state.clone());
        let (_, at) = session(&h, "a@x.com").await;

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/users/me/password",
            &at,
            Some(json!({
                "current_password": "Passw0rd!",
                "new_password": "N3wPass!",
                "password_confirm": "N3wPass!"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(true));

        let (status, _) = call(&app, Method::GET, "/api/v1/users/me", &at, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_are_guarded() {
        let h = Harness::new();
        let app = build_app(h.state.clone());
        let (customer_id, customer_at) = session(&h, "c@x.com").await;
        let (_, admin_at) = admin_session(&h, "admin@x.com").await;

        let (status, body) = call(&app, Method::GET, "/api/v1/users", &customer_at, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let (status, body) = call(
            &app,
            Method::GET,
            "/api/v1/users?role=CUSTOMER&take=10",
            &admin_at,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["users"].as_array().unwrap().len(), 1);

        let (_, second) = call(
            &app,
            Method::GET,
            "/api/v1/users?skip=1&take=1",
            &admin_at,
            None,
        )
        .await;
        assert_eq!(second["total_count"], 2);
        assert_eq!(second["users"].as_array().unwrap().len(), 1);

        let (status, body) = call(
            &app,
            Method::PATCH,
            &format!("/api/v1/users/{customer_id}"),
            &admin_at,
            Some(json!({"role": "MOVER"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "MOVER");

        // role change ends the target's session
        let (status, _) = call(&app, Method::GET, "/api/v1/users/me", &customer_at, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/v1/users/{customer_id}"),
            &admin_at,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(
            &app,
            Method::DELETE,
            &format!("/api/v1/users/{customer_id}"),
            &admin_at,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_can_fetch_one_user() {
        let h = Harness::new();
        let app = build_app(h.state.clone());
        let (customer_id, customer_at) = session(&h, "c@x.com").await;
        let (_, admin_at) = admin_session(&h, "admin@x.com").await;
        let uri = format!("/api/v1/users/{customer_id}");

        let (status, body) = call(&app, Method::GET, &uri, &admin_at, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], customer_id.to_string());
        assert_eq!(body["email"], "c@x.com");

        let (status, body) = call(
            &app,
            Method::GET,
            &format!("/api/v1/users/{}", uuid::Uuid::new_v4()),
            &admin_at,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");

        let (status, body) = call(&app, Method::GET, &uri, &customer_at, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");
    }
}
