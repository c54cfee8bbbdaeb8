use axum::{
    extract::{FromRef, FromRequestParts},
    http::header,
};
use uuid::Uuid;

use crate::{error::AppError, models::ROLE_ADMIN, services::auth_service, state::AppState};

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub username: String,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == ROLE_ADMIN
    }
}

pub fn ensure_role(user: &AuthUser, role: &str) -> Result<(), AppError> {
    if user.role != role {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

pub fn ensure_admin(user: &AuthUser) -> Result<(), AppError> {
    ensure_role(user, ROLE_ADMIN)
}

/// Owners may touch their own records; admins may touch anyone's.
pub fn ensure_owner(user: &AuthUser, owner_id: Uuid) -> Result<(), AppError> {
    if user.user_id != owner_id && !user.is_admin() {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

impl<S> FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AppError;
    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".into()))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| AppError::Unauthorized("Invalid Authorization header".into()))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Invalid Authorization scheme".into()))?
            .trim();

        let state = AppState::from_ref(state);
        let claims = auth_service::verify_token(&state.config, token)?;

        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| AppError::Unauthorized("Invalid user id in token".into()))?;

        Ok(AuthUser {
            user_id,
            username: claims.username,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: &str) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            username: "someone".into(),
            role: role.into(),
        }
    }

    #[test]
    fn owner_check_allows_self_and_admin() {
        let owner = user("user");
        assert!(ensure_owner(&owner, owner.user_id).is_ok());
        assert!(ensure_owner(&user("admin"), owner.user_id).is_ok());
        assert!(matches!(
            ensure_owner(&user("user"), owner.user_id),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn admin_check_rejects_plain_users() {
        assert!(ensure_admin(&user("admin")).is_ok());
        assert!(matches!(ensure_admin(&user("user")), Err(AppError::Forbidden)));
    }
}
