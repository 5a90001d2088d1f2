use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use super::dto::{CreateUserRequest, TokenRequest, UpdateUserRequest};
use super::repo::{NewUser, User};
use crate::auth::password::{hash_password, verify_password};
use crate::db::is_unique_violation;
use crate::error::{AppError, FieldErrors};

pub const MIN_PASSWORD_LEN: usize = 5;
const MAX_FIELD_LEN: usize = 255;

const REQUIRED: &str = "This field is required.";
const EMAIL_TAKEN: &str = "user with this email already exists.";
const BAD_CREDENTIALS: &str = "Unable to authenticate with provided credentials";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    /// Verified against when the email is unknown, so both failure paths
    /// pay for one argon2 verification.
    static ref DUMMY_HASH: Option<String> = hash_password("not-a-real-password").ok();
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Account fields that passed validation.
#[derive(Debug, PartialEq, Eq)]
pub struct ValidUser {
    pub email: String,
    pub password: String,
    pub name: String,
}

fn check_email(errors: &mut FieldErrors, email: Option<&str>) -> Option<String> {
    let email = match email.map(normalize_email) {
        Some(e) if !e.is_empty() => e,
        _ => {
            errors.add("email", REQUIRED);
            return None;
        }
    };
    if email.chars().count() > MAX_FIELD_LEN {
        errors.add("email", "Ensure this field has no more than 255 characters.");
    } else if !is_valid_email(&email) {
        errors.add("email", "Enter a valid email address.");
    }
    Some(email)
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.add(
            "password",
            format!("Ensure this field has at least {MIN_PASSWORD_LEN} characters."),
        );
    }
}

fn check_name(errors: &mut FieldErrors, name: &str) {
    if name.chars().count() > MAX_FIELD_LEN {
        errors.add("name", "Ensure this field has no more than 255 characters.");
    }
}

/// Shape checks for a new account; uniqueness is checked against the store.
pub fn validate_new_user(req: CreateUserRequest) -> Result<ValidUser, AppError> {
    let mut errors = FieldErrors::new();
    let email = check_email(&mut errors, req.email.as_deref());
    match req.password.as_deref() {
        Some(p) if !p.is_empty() => check_password(&mut errors, p),
        _ => errors.add("password", REQUIRED),
    }
    let name = req.name.unwrap_or_default().trim().to_string();
    check_name(&mut errors, &name);
    errors.into_result()?;

    Ok(ValidUser {
        email: email.unwrap_or_default(),
        password: req.password.unwrap_or_default(),
        name,
    })
}

pub async fn create_user(
    db: &PgPool,
    input: &ValidUser,
    superuser: bool,
) -> Result<User, AppError> {
    if User::find_by_email(db, &input.email).await?.is_some() {
        warn!(email = %input.email, "email already registered");
        return Err(AppError::field("email", EMAIL_TAKEN));
    }

    let hash = hash_password(&input.password)?;
    let user = User::create(
        db,
        NewUser {
            email: &input.email,
            name: &input.name,
            password_hash: &hash,
            is_staff: superuser,
            is_superuser: superuser,
        },
    )
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::field("email", EMAIL_TAKEN)
        } else {
            e.into()
        }
    })?;

    info!(user_id = %user.id, email = %user.email, superuser, "user created");
    Ok(user)
}

/// Checks credentials and returns the matching active user.
pub async fn authenticate(db: &PgPool, req: TokenRequest) -> Result<User, AppError> {
    let mut errors = FieldErrors::new();
    let email = req.email.as_deref().map(normalize_email).unwrap_or_default();
    if email.is_empty() {
        errors.add("email", REQUIRED);
    }
    let password = req.password.unwrap_or_default();
    if password.is_empty() {
        errors.add("password", REQUIRED);
    }
    errors.into_result()?;

    let bad_credentials = || AppError::field("non_field_errors", BAD_CREDENTIALS);

    let Some(user) = User::find_by_email(db, &email).await? else {
        if let Some(dummy) = DUMMY_HASH.as_deref() {
            let _ = verify_password(&password, dummy);
        }
        warn!(email = %email, "token request for unknown email");
        return Err(bad_credentials());
    };
    if !verify_password(&password, &user.password_hash)? {
        warn!(user_id = %user.id, "token request with invalid password");
        return Err(bad_credentials());
    }
    if !user.is_active {
        warn!(user_id = %user.id, "token request for inactive user");
        return Err(bad_credentials());
    }
    Ok(user)
}

/// Profile changes that passed validation. `None` leaves a field alone.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProfileChanges {
    pub email: Option<String>,
    pub name: Option<String>,
    pub password: Option<String>,
}

/// `partial` relaxes the required-field rule for PATCH.
pub fn validate_profile_update(
    req: UpdateUserRequest,
    partial: bool,
) -> Result<ProfileChanges, AppError> {
    let mut errors = FieldErrors::new();

    let email = if req.email.is_some() || !partial {
        check_email(&mut errors, req.email.as_deref())
    } else {
        None
    };

    let password = match req.password {
        Some(p) if !p.is_empty() => {
            check_password(&mut errors, &p);
            Some(p)
        }
        Some(_) => {
            errors.add("password", "This field may not be blank.");
            None
        }
        None if !partial => {
            errors.add("password", REQUIRED);
            None
        }
        None => None,
    };

    let name = match req.name {
        Some(n) => Some(n.trim().to_string()),
        None if !partial => Some(String::new()),
        None => None,
    };
    if let Some(n) = &name {
        check_name(&mut errors, n);
    }

    errors.into_result()?;
    Ok(ProfileChanges {
        email,
        name,
        password,
    })
}

pub async fn update_profile(
    db: &PgPool,
    user_id: Uuid,
    changes: ProfileChanges,
) -> Result<User, AppError> {
    let current = User::find_by_id(db, user_id)
        .await?
        .ok_or_else(|| AppError::Unauthorized("User not found.".into()))?;

    let email = changes.email.unwrap_or_else(|| current.email.clone());
    if email != current.email {
        if let Some(other) = User::find_by_email(db, &email).await? {
            if other.id != user_id {
                return Err(AppError::field("email", EMAIL_TAKEN));
            }
        }
    }
    let name = changes.name.unwrap_or(current.name);
    let password_hash = changes
        .password
        .as_deref()
        .map(hash_password)
        .transpose()?;

    let user = User::update_profile(db, user_id, &email, &name, password_hash.as_deref())
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::field("email", EMAIL_TAKEN)
            } else {
                e.into()
            }
        })?
        .ok_or_else(|| AppError::Unauthorized("User not found.".into()))?;

    info!(
        user_id = %user.id,
        password_changed = password_hash.is_some(),
        "profile updated"
    );
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::{create_user as insert_user, TEST_PASSWORD};

    fn create_req(email: Option<&str>, password: Option<&str>) -> CreateUserRequest {
        CreateUserRequest {
            email: email.map(Into::into),
            password: password.map(Into::into),
            name: Some("test name".into()),
        }
    }

    fn errors_of(err: AppError) -> FieldErrors {
        match err {
            AppError::Validation(e) => e,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("Test@TEST.com"), "test@test.com");
        assert_eq!(normalize_email("  a@B.io "), "a@b.io");
    }

    #[test]
    fn valid_user_is_normalized() {
        let user =
            validate_new_user(create_req(Some("test@TEST.com"), Some("test123"))).unwrap();
        assert_eq!(
            user,
            ValidUser {
                email: "test@test.com".into(),
                password: "test123".into(),
                name: "test name".into(),
            }
        );
    }

    #[test]
    fn short_password_is_rejected() {
        let errors =
            errors_of(validate_new_user(create_req(Some("test@test.com"), Some("pw"))).unwrap_err());
        assert!(errors.get("password").is_some());
        assert!(errors.get("email").is_none());
    }

    #[test]
    fn password_of_minimum_length_is_accepted() {
        assert!(validate_new_user(create_req(Some("test@test.com"), Some("12345"))).is_ok());
    }

    #[test]
    fn missing_email_is_rejected() {
        for email in [None, Some(""), Some("   ")] {
            let errors = errors_of(validate_new_user(create_req(email, Some("test123"))).unwrap_err());
            assert_eq!(errors.get("email"), Some(&[REQUIRED.to_string()][..]));
        }
    }

    #[test]
    fn malformed_email_is_rejected() {
        let errors = errors_of(validate_new_user(create_req(Some("one"), Some("test123"))).unwrap_err());
        assert!(errors.get("email").is_some());
    }

    #[test]
    fn name_defaults_to_empty() {
        let user = validate_new_user(CreateUserRequest {
            email: Some("a@b.com".into()),
            password: Some("secret".into()),
            name: None,
        })
        .unwrap();
        assert_eq!(user.name, "");
    }

    #[test]
    fn patch_accepts_single_fields() {
        let changes = validate_profile_update(
            UpdateUserRequest {
                name: Some("new name".into()),
                password: Some("newpassword".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap();
        assert_eq!(
            changes,
            ProfileChanges {
                email: None,
                name: Some("new name".into()),
                password: Some("newpassword".into()),
            }
        );
    }

    #[test]
    fn patch_rejects_short_password() {
        let err = validate_profile_update(
            UpdateUserRequest {
                password: Some("pw".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap_err();
        assert!(errors_of(err).get("password").is_some());
    }

    #[test]
    fn put_requires_email_and_password() {
        let errors = errors_of(
            validate_profile_update(
                UpdateUserRequest {
                    name: Some("n".into()),
                    ..Default::default()
                },
                false,
            )
            .unwrap_err(),
        );
        assert!(errors.get("email").is_some());
        assert!(errors.get("password").is_some());
    }

    #[test]
    fn put_clears_missing_name() {
        let changes = validate_profile_update(
            UpdateUserRequest {
                email: Some("Me@Example.com".into()),
                password: Some("secret".into()),
                name: None,
            },
            false,
        )
        .unwrap();
        assert_eq!(changes.email.as_deref(), Some("me@example.com"));
        assert_eq!(changes.name.as_deref(), Some(""));
    }

    fn token_req(email: &str, password: &str) -> TokenRequest {
        TokenRequest {
            email: Some(email.into()),
            password: Some(password.into()),
        }
    }

    fn assert_bad_credentials(err: AppError) {
        assert_eq!(
            errors_of(err).get("non_field_errors"),
            Some(&[BAD_CREDENTIALS.to_string()][..])
        );
    }

    #[test]
    fn dummy_hash_is_usable() {
        let dummy = DUMMY_HASH.as_deref().expect("dummy hash");
        assert!(!verify_password("anything", dummy).unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn create_user_stores_hashed_password(pool: PgPool) {
        let input = validate_new_user(create_req(Some("Test@Example.com"), Some("test123"))).unwrap();
        let user = create_user(&pool, &input, false).await.unwrap();

        assert_eq!(user.email, "test@example.com");
        assert_ne!(user.password_hash, "test123");
        assert!(verify_password("test123", &user.password_hash).unwrap());
        assert!(user.is_active && !user.is_staff && !user.is_superuser);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn superuser_flags_are_set(pool: PgPool) {
        let input = validate_new_user(create_req(Some("admin@example.com"), Some("test123"))).unwrap();
        let user = create_user(&pool, &input, true).await.unwrap();
        assert!(user.is_staff && user.is_superuser);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn duplicate_email_is_rejected_regardless_of_case(pool: PgPool) {
        insert_user(&pool, "test@example.com").await;

        for email in ["test@example.com", "TEST@Example.COM"] {
            let input = validate_new_user(create_req(Some(email), Some("test123"))).unwrap();
            let err = create_user(&pool, &input, false).await.unwrap_err();
            assert_eq!(
                errors_of(err).get("email"),
                Some(&[EMAIL_TAKEN.to_string()][..])
            );
        }
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(n, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn authenticate_accepts_valid_credentials(pool: PgPool) {
        let user = insert_user(&pool, "test@example.com").await;
        let found = authenticate(&pool, token_req(" Test@Example.com ", TEST_PASSWORD))
            .await
            .unwrap();
        assert_eq!(found.id, user.id);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn authenticate_rejects_bad_credentials(pool: PgPool) {
        let user = insert_user(&pool, "test@example.com").await;

        let err = authenticate(&pool, token_req("test@example.com", "wrongpass"))
            .await
            .unwrap_err();
        assert_bad_credentials(err);

        let err = authenticate(&pool, token_req("nobody@example.com", TEST_PASSWORD))
            .await
            .unwrap_err();
        assert_bad_credentials(err);

        sqlx::query("UPDATE users SET is_active = FALSE WHERE id = $1")
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
        let err = authenticate(&pool, token_req("test@example.com", TEST_PASSWORD))
            .await
            .unwrap_err();
        assert_bad_credentials(err);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn profile_update_rehashes_password(pool: PgPool) {
        let user = insert_user(&pool, "test@example.com").await;
        let changes = validate_profile_update(
            UpdateUserRequest {
                name: Some("new name".into()),
                password: Some("newpassword123".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap();

        let updated = update_profile(&pool, user.id, changes).await.unwrap();
        assert_eq!(updated.name, "new name");
        assert_eq!(updated.email, "test@example.com");
        assert!(verify_password("newpassword123", &updated.password_hash).unwrap());
        assert!(!verify_password(TEST_PASSWORD, &updated.password_hash).unwrap());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn profile_update_keeps_emails_unique(pool: PgPool) {
        insert_user(&pool, "taken@example.com").await;
        let user = insert_user(&pool, "mine@example.com").await;
        let changes = validate_profile_update(
            UpdateUserRequest {
                email: Some("Taken@example.com".into()),
                ..Default::default()
            },
            true,
        )
        .unwrap();

        let err = update_profile(&pool, user.id, changes).await.unwrap_err();
        assert!(errors_of(err).get("email").is_some());
    }
}
