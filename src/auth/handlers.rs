use std::sync::Arc;

use axum::{extract::State, routing::post, Json, Router};
use tracing::{info, instrument};

use super::{
    dto::{
        normalize_email, ActivateRequest, ForgotPasswordRequest, MessageResponse,
        ResetPasswordRequest, SigninRequest, SignupRequest, TokensResponse,
    },
    extractors::{AuthUser, RefreshBearer},
    service::AuthEngine,
};
use crate::{error::AuthError, state::AppState};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/activate", post(activate))
        .route("/auth/signin", post(signin))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

#[instrument(skip(engine, payload))]
pub async fn signup(
    State(engine): State<Arc<AuthEngine>>,
    Json(mut payload): Json<SignupRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.email = normalize_email(&payload.email);
    AuthError::check(payload.validate())?;

    engine
        .signup(payload.name.trim(), &payload.email, &payload.password)
        .await?;
    Ok(Json(MessageResponse {
        msg: "Check your email for the activation code".into(),
    }))
}

#[instrument(skip(engine, payload))]
pub async fn activate(
    State(engine): State<Arc<AuthEngine>>,
    Json(mut payload): Json<ActivateRequest>,
) -> Result<Json<TokensResponse>, AuthError> {
    payload.email = normalize_email(&payload.email);
    AuthError::check(payload.validate())?;

    let tokens = engine.activate_account(&payload.email, &payload.otp).await?;
    Ok(Json(TokensResponse::new(tokens, Some("Account activated"))))
}

#[instrument(skip(engine, payload))]
pub async fn signin(
    State(engine): State<Arc<AuthEngine>>,
    Json(mut payload): Json<SigninRequest>,
) -> Result<Json<TokensResponse>, AuthError> {
    payload.email = normalize_email(&payload.email);
    AuthError::check(payload.validate())?;

    let tokens = engine
        .signin_local(&payload.email, &payload.password)
        .await
        .map_err(AuthError::conceal)?;
    Ok(Json(TokensResponse::new(tokens, Some("Signed in"))))
}

#[instrument(skip(engine, bearer))]
pub async fn refresh(
    State(engine): State<Arc<AuthEngine>>,
    bearer: RefreshBearer,
) -> Result<Json<TokensResponse>, AuthError> {
    let tokens = engine.refresh_tokens(bearer.user_id, &bearer.token).await?;
    Ok(Json(TokensResponse::new(tokens, None)))
}

#[instrument(skip(engine, user))]
pub async fn logout(
    State(engine): State<Arc<AuthEngine>>,
    AuthUser(user): AuthUser,
) -> Result<Json<bool>, AuthError> {
    Ok(Json(engine.logout(user.id).await?))
}

#[instrument(skip(engine, payload))]
pub async fn forgot_password(
    State(engine): State<Arc<AuthEngine>>,
    Json(mut payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    payload.email = normalize_email(&payload.email);
    AuthError::check(payload.validate())?;

    engine.forget_password(&payload.email).await?;
    Ok(Json(MessageResponse {
        msg: "Check your email for the reset code".into(),
    }))
}

#[instrument(skip(engine, payload))]
pub async fn reset_password(
    State(engine): State<Arc<AuthEngine>>,
    Json(mut payload): Json<ResetPasswordRequest>,
) -> Result<Json<TokensResponse>, AuthError> {
    payload.email = normalize_email(&payload.email);
    AuthError::check(payload.validate())?;

    let tokens = engine
        .reset_password(
            &payload.email,
            &payload.otp,
            &payload.password,
            &payload.password_confirm,
        )
        .await?;
    info!(user_id = %tokens.user_id, "password reset over http");
    Ok(Json(TokensResponse::new(tokens, Some("Password updated"))))
}
