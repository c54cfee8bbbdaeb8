use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use uuid::Uuid;
use validator::Validate;

use crate::{
    audit,
    dto::users::{CreateUserRequest, UpdateUserRequest, UserList},
    entity::users::{ActiveModel, Column, Entity as Users, Model as UserModel},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin, ensure_owner},
    models::{ROLE_ADMIN, ROLE_USER, User},
    response::{ApiResponse, Meta},
    services::auth_service::hash_password,
    state::AppState,
};

const USERNAME_TAKEN: &str = "Username is already taken";

fn validate_role(role: &str) -> AppResult<()> {
    match role {
        ROLE_USER | ROLE_ADMIN => Ok(()),
        other => Err(AppError::BadRequest(format!("unknown role {other}"))),
    }
}

/// Shared by registration and admin user creation.
pub(crate) async fn insert_user(
    state: &AppState,
    payload: CreateUserRequest,
) -> AppResult<UserModel> {
    let role = payload.role.unwrap_or_else(|| ROLE_USER.to_string());
    validate_role(&role)?;

    let exist = Users::find()
        .filter(Column::Username.eq(payload.username.as_str()))
        .one(&state.orm)
        .await?;
    if exist.is_some() {
        return Err(AppError::BadRequest(USERNAME_TAKEN.to_string()));
    }

    let password_hash = hash_password(&payload.password)?;
    let now = Utc::now();
    ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(payload.username),
        email: Set(payload.email),
        password_hash: Set(password_hash),
        role: Set(role),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await
    .map_err(|err| AppError::from_unique_violation(err, USERNAME_TAKEN))
}

pub async fn create_user(
    state: &AppState,
    user: &AuthUser,
    payload: CreateUserRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_admin(user)?;
    payload.validate()?;
    let created = insert_user(state, payload).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "user_create",
        "users",
        serde_json::json!({ "user_id": created.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Success creating user",
        User::from(created),
        Some(Meta::empty()),
    ))
}

pub async fn list_users(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<UserList>> {
    ensure_admin(user)?;
    let items: Vec<User> = Users::find()
        .order_by_asc(Column::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(User::from)
        .collect();

    let meta = Meta::total(items.len());
    Ok(ApiResponse::success("Users", UserList { items }, Some(meta)))
}

pub async fn get_user(state: &AppState, user: &AuthUser, id: Uuid) -> AppResult<ApiResponse<User>> {
    ensure_owner(user, id)?;
    let found = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;
    Ok(ApiResponse::success("User", User::from(found), None))
}

pub async fn update_user(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateUserRequest,
) -> AppResult<ApiResponse<User>> {
    ensure_owner(user, id)?;
    payload.validate()?;

    let existing = Users::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("user"))?;

    let mut active: ActiveModel = existing.into();
    if let Some(email) = payload.email {
        active.email = Set(email);
    }
    if let Some(password) = payload.password {
        active.password_hash = Set(hash_password(&password)?);
    }
    if let Some(role) = payload.role {
        ensure_admin(user)?;
        validate_role(&role)?;
        active.role = Set(role);
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "user_update",
        "users",
        serde_json::json!({ "user_id": updated.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Success updating user",
        User::from(updated),
        Some(Meta::empty()),
    ))
}

pub async fn delete_user(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_owner(user, id)?;
    let result = Users::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::not_found("user"));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "user_delete",
        "users",
        serde_json::json!({ "user_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Success deleting user",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}
