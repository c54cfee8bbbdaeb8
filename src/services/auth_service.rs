use argon2::{
    Argon2, PasswordHasher,
    password_hash::{PasswordHash, PasswordVerifier, SaltString},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use password_hash::rand_core::OsRng;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};

use crate::{
    audit,
    config::AppConfig,
    dto::auth::{Claims, LoginRequest, LoginResponse, RegisterRequest},
    dto::users::CreateUserRequest,
    entity::users::{self, Entity as Users},
    error::{AppError, AppResult},
    models::{ROLE_USER, User},
    response::{ApiResponse, Meta},
    services::user_service,
    state::AppState,
};
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid username or password";

pub fn hash_password(password: &str) -> AppResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))?
        .to_string();
    Ok(hash)
}

pub fn verify_password(password: &str, password_hash: &str) -> AppResult<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("Invalid password hash")))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

pub fn issue_token(config: &AppConfig, user: &users::Model) -> AppResult<String> {
    let expiration = Utc::now()
        .checked_add_signed(Duration::hours(config.jwt_ttl_hours))
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("Failed to set expiration")))?;

    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        role: user.role.clone(),
        exp: expiration.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(anyhow::anyhow!(e.to_string())))
}

pub fn verify_token(config: &AppConfig, token: &str) -> AppResult<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(config.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))
}

pub async fn register_user(
    state: &AppState,
    payload: RegisterRequest,
) -> AppResult<ApiResponse<User>> {
    payload.validate()?;
    let RegisterRequest {
        username,
        email,
        password,
    } = payload;

    let user = user_service::insert_user(
        state,
        CreateUserRequest {
            username,
            email,
            password,
            role: Some(ROLE_USER.to_string()),
        },
    )
    .await?;

    audit::record(
        &state.orm,
        Some(user.id),
        "user_register",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success("User created", User::from(user), None))
}

pub async fn login_user(
    state: &AppState,
    payload: LoginRequest,
) -> AppResult<ApiResponse<LoginResponse>> {
    payload.validate()?;
    let LoginRequest { username, password } = payload;

    let user = Users::find()
        .filter(users::Column::Username.eq(username.as_str()))
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::Unauthorized(INVALID_CREDENTIALS.into()))?;

    if !verify_password(&password, &user.password_hash)? {
        tracing::info!(username = %username, "login rejected");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    let token = issue_token(&state.config, &user)?;
    let resp = LoginResponse {
        token: format!("Bearer {}", token),
    };

    audit::record(
        &state.orm,
        Some(user.id),
        "user_login",
        "users",
        serde_json::json!({ "user_id": user.id }),
    )
    .await;

    Ok(ApiResponse::success("Logged in", resp, Some(Meta::empty())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: "127.0.0.1".into(),
            port: 0,
            jwt_secret: "unit-test-secret".into(),
            jwt_ttl_hours: 1,
        }
    }

    fn user_model() -> users::Model {
        let now = Utc::now();
        users::Model {
            id: Uuid::new_v4(),
            username: "user1".into(),
            email: "user1@example.com".into(),
            password_hash: String::new(),
            role: "admin".into(),
            created_at: now.into(),
            updated_at: now.into(),
        }
    }

    #[test]
    fn password_hash_verifies_only_the_hashed_password() {
        let hash = hash_password("password").unwrap();
        assert_ne!(hash, "password");
        assert!(verify_password("password", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn issued_token_carries_identity() {
        let config = config();
        let user = user_model();
        let token = issue_token(&config, &user).unwrap();
        let claims = verify_token(&config, &token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.username, "user1");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let user = user_model();
        let token = issue_token(&config(), &user).unwrap();
        let other = AppConfig {
            jwt_secret: "different".into(),
            ..config()
        };
        assert!(matches!(
            verify_token(&other, &token),
            Err(AppError::Unauthorized(_))
        ));
    }
}
