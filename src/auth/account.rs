//! Account provisioning, login, and profile snapshot assembly.
//!
//! Registration runs as one scoped transaction: the user row, the default
//! settings row, and the default attribute row either all land or none do.
//! Login is a single fail-soft read (user LEFT JOIN settings LEFT JOIN
//! attributes) followed by credential verification and snapshot assembly.

use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::params;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::config::AuthConfig;
use crate::db::{Database, DbError};
use crate::error::ApiError;

use super::credentials;

/// Fixed demo account honoured only when `[auth] demo_login_enabled` is set.
const DEMO_EMAIL: &str = "test@chronos.com";
const DEMO_PASSWORD: &str = "123456";
const DEMO_MORSE: &str = "........";
const DEMO_DISPLAY_NAME: &str = "Chronos Pioneer";

/// Display name bound. The wire format nominally allows 100 chars; the
/// stricter product bound wins.
const NAME_MAX_CHARS: usize = 30;
const PASSWORD_MIN_CHARS: usize = 6;
const PASSWORD_MAX_CHARS: usize = 20;
const MORSE_MAX_CHARS: usize = 8;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

// ── Wire Types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub morse_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub name: String,
    pub success: bool,
}

/// Login body. `email` defaults to empty so its absence surfaces as a 400
/// instead of a deserialization rejection; missing credentials are not a
/// request error, they just fail authentication.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub morse_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub avatar_url: Option<String>,
    pub created_at: Option<String>,
}

/// Settings as the frontend consumes them. `progressBarStyle` and
/// `anniversaries` have no storage yet; they are emitted as fixed values
/// so the client schema stays stable when the columns arrive.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOut {
    pub language: String,
    pub birth_date: Option<String>,
    pub birth_time: String,
    pub life_expectancy_preset: String,
    pub custom_life_expectancy: i64,
    pub sleep_offset: f64,
    pub today_sleep_time: f64,
    pub today_work_time: f64,
    pub work_start: String,
    pub work_end: String,
    pub decimal_precision: i64,
    pub progress_bar_style: String,
    pub sound_enabled: bool,
    pub gravity_enabled: bool,
    pub anniversaries: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct AttributesOut {
    pub health: f64,
    pub mind: f64,
    pub skill: f64,
    pub social: f64,
    pub adventure: f64,
    pub spirit: f64,
    pub last_sync_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserInfo,
    pub settings: SettingsOut,
    pub attributes: AttributesOut,
}

/// One `core_attributes` row as returned by the attributes endpoint.
#[derive(Debug, Serialize)]
pub struct AttributeSnapshot {
    pub user_id: i64,
    pub health: f64,
    pub mind: f64,
    pub skill: f64,
    pub social: f64,
    pub adventure: f64,
    pub spirit: f64,
    pub last_sync_at: String,
}

// ── Service ─────────────────────────────────────────────────────────

/// Flat row shape of the login join. Settings and attribute columns are
/// optional because the LEFT JOINs may miss.
struct ProfileRow {
    id: i64,
    name: String,
    email: String,
    morse_code: Option<String>,
    avatar_url: Option<String>,
    created_at: Option<String>,
    password_hash: String,
    language: Option<String>,
    birth_date: Option<String>,
    birth_time: Option<String>,
    expectancy_preset: Option<String>,
    custom_expectancy: Option<i64>,
    sleep_offset: Option<f64>,
    today_sleep_time: Option<f64>,
    today_work_time: Option<f64>,
    work_start: Option<String>,
    work_end: Option<String>,
    decimal_precision: Option<i64>,
    sound_enabled: Option<bool>,
    gravity_enabled: Option<bool>,
    health: Option<f64>,
    mind: Option<f64>,
    skill: Option<f64>,
    social: Option<f64>,
    adventure: Option<f64>,
    spirit: Option<f64>,
    last_sync_at: Option<String>,
}

const PROFILE_SQL: &str = "SELECT
        u.id, u.name, u.email, u.morse_code, u.avatar_url, u.created_at,
        u.password_hash,
        s.language, s.birth_date, s.birth_time, s.expectancy_preset, s.custom_expectancy,
        s.sleep_offset, s.today_sleep_time, s.today_work_time, s.work_start, s.work_end,
        s.decimal_precision, s.sound_enabled, s.gravity_enabled,
        a.health, a.mind, a.skill, a.social, a.adventure, a.spirit, a.last_sync_at
    FROM users u
    LEFT JOIN user_settings s ON u.id = s.user_id
    LEFT JOIN core_attributes a ON u.id = a.user_id
    WHERE u.email = ?1
    LIMIT 1";

fn map_profile_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProfileRow> {
    Ok(ProfileRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        morse_code: row.get(3)?,
        avatar_url: row.get(4)?,
        created_at: row.get(5)?,
        password_hash: row.get(6)?,
        language: row.get(7)?,
        birth_date: row.get(8)?,
        birth_time: row.get(9)?,
        expectancy_preset: row.get(10)?,
        custom_expectancy: row.get(11)?,
        sleep_offset: row.get(12)?,
        today_sleep_time: row.get(13)?,
        today_work_time: row.get(14)?,
        work_start: row.get(15)?,
        work_end: row.get(16)?,
        decimal_precision: row.get(17)?,
        sound_enabled: row.get(18)?,
        gravity_enabled: row.get(19)?,
        health: row.get(20)?,
        mind: row.get(21)?,
        skill: row.get(22)?,
        social: row.get(23)?,
        adventure: row.get(24)?,
        spirit: row.get(25)?,
        last_sync_at: row.get(26)?,
    })
}

/// Registration and login against the shared [`Database`].
#[derive(Clone)]
pub struct AccountService {
    db: Arc<Database>,
    demo_login_enabled: bool,
}

impl AccountService {
    pub fn new(db: Arc<Database>, auth: &AuthConfig) -> Self {
        Self {
            db,
            demo_login_enabled: auth.demo_login_enabled,
        }
    }

    /// Create an account plus its settings and attribute rows, atomically.
    pub fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        validate_registration(req)?;

        let db_err = |e: rusqlite::Error| ApiError::from(DbError::from(e));
        let now = Utc::now().to_rfc3339();
        // Hash before the transaction; the write lock must not span the
        // bcrypt work.
        let password_hash = credentials::hash_password(&req.password)?;

        let user_id = self.db.with_transaction(|tx| {
            let existing = tx.query_row(
                "SELECT id FROM users WHERE email = ?1 LIMIT 1",
                params![req.email],
                |row| row.get::<_, i64>(0),
            );
            match existing {
                Ok(_) => {
                    tracing::debug!(email = %req.email, "registration denied: email taken");
                    return Err(ApiError::UserExists);
                }
                Err(rusqlite::Error::QueryReturnedNoRows) => {}
                Err(e) => return Err(db_err(e)),
            }

            let inserted = tx.execute(
                "INSERT INTO users (email, password_hash, name, morse_code, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![req.email, password_hash, req.name, req.morse_code, now],
            );
            match inserted {
                Ok(_) => {}
                // The pre-check can lose a race; the UNIQUE constraint is
                // the authority and still reports a conflict.
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    tracing::warn!(email = %req.email, "registration lost a uniqueness race");
                    return Err(ApiError::UserExists);
                }
                Err(e) => return Err(db_err(e)),
            }

            let user_id = tx.last_insert_rowid();
            if user_id <= 0 {
                return Err(ApiError::Internal(anyhow::anyhow!(
                    "user insert produced no rowid"
                )));
            }

            tx.execute(
                "INSERT INTO user_settings (
                    user_id, language, birth_date, birth_time,
                    expectancy_preset, custom_expectancy,
                    sleep_offset, today_sleep_time, today_work_time, work_start, work_end,
                    decimal_precision, sound_enabled, gravity_enabled
                ) VALUES (
                    ?1, 'zh-TW', '1990-01-01', '00:00:00',
                    'average', 85, 8.0, 8.0, 8.0, '09:00', '18:00', 6, 0, 0
                )",
                params![user_id],
            )
            .map_err(db_err)?;

            tx.execute(
                "INSERT INTO core_attributes (
                    user_id, health, mind, skill, social, adventure, spirit, last_sync_at
                ) VALUES (?1, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, ?2)",
                params![user_id, now],
            )
            .map_err(db_err)?;

            Ok(user_id)
        })?;

        tracing::info!(user_id, "account provisioned");
        Ok(RegisterResponse {
            name: req.name.clone(),
            success: true,
        })
    }

    /// Authenticate and return the full profile snapshot.
    pub fn login(&self, req: &LoginRequest) -> Result<LoginResponse, ApiError> {
        if req.email.is_empty() {
            return Err(ApiError::InvalidRequest);
        }

        let morse = req.morse_code.as_deref().filter(|m| !m.is_empty());
        let password = req.password.as_deref().filter(|p| !p.is_empty());

        // Fail-soft read: an unknown email and a storage failure look the
        // same here, and both deny access without revealing which.
        let row = match self.db.query_one(PROFILE_SQL, params![req.email], map_profile_row) {
            Some(row) => row,
            None => {
                // Dummy hash to prevent a timing side-channel.
                if let (None, Some(password)) = (morse, password) {
                    let _ = credentials::hash_password(password);
                }
                return Err(ApiError::AccessDenied);
            }
        };

        // A supplied morse code takes precedence: the password is not
        // consulted at all, even if it would have matched.
        let mut authenticated = if morse.is_some() {
            credentials::verify_morse(morse, row.morse_code.as_deref())
        } else if let Some(password) = password {
            credentials::verify_password(password, &row.password_hash)
        } else {
            false
        };

        let mut display_name = row.name.clone();
        if self.demo_login_enabled && req.email == DEMO_EMAIL {
            let demo_match = req.password.as_deref() == Some(DEMO_PASSWORD)
                || req.morse_code.as_deref() == Some(DEMO_MORSE);
            if demo_match {
                authenticated = true;
                display_name = DEMO_DISPLAY_NAME.to_string();
            }
        }

        if !authenticated {
            tracing::debug!(user_id = row.id, "login denied: credential mismatch");
            return Err(ApiError::AccessDenied);
        }

        tracing::info!(user_id = row.id, "login succeeded");
        Ok(assemble_snapshot(row, display_name))
    }

    /// First stored attribute row, unscoped, or `None` when the table is
    /// empty (or the read degrades).
    ///
    /// TODO: scope this to the authenticated account once a session
    /// mechanism exists; until then it mirrors the legacy read-first-row
    /// endpoint the frontend still calls.
    pub fn first_attribute_snapshot(&self) -> Option<AttributeSnapshot> {
        self.db.query_one(
            "SELECT user_id, health, mind, skill, social, adventure, spirit, last_sync_at
             FROM core_attributes ORDER BY user_id LIMIT 1",
            [],
            |row| {
                Ok(AttributeSnapshot {
                    user_id: row.get(0)?,
                    health: row.get(1)?,
                    mind: row.get(2)?,
                    skill: row.get(3)?,
                    social: row.get(4)?,
                    adventure: row.get(5)?,
                    spirit: row.get(6)?,
                    last_sync_at: row.get(7)?,
                })
            },
        )
    }
}

// ── Validation & Assembly ───────────────────────────────────────────

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let name_chars = req.name.chars().count();
    if name_chars == 0 || name_chars > NAME_MAX_CHARS {
        return Err(ApiError::InvalidRequest);
    }
    if !EMAIL_RE.is_match(&req.email) {
        return Err(ApiError::InvalidRequest);
    }
    let password_chars = req.password.chars().count();
    if password_chars < PASSWORD_MIN_CHARS || password_chars > PASSWORD_MAX_CHARS {
        return Err(ApiError::InvalidRequest);
    }
    if let Some(morse) = &req.morse_code {
        if morse.chars().count() > MORSE_MAX_CHARS {
            return Err(ApiError::InvalidRequest);
        }
    }
    Ok(())
}

/// Normalize a profile row into the login response, defaulting every
/// settings/attribute field the LEFT JOINs failed to produce.
fn assemble_snapshot(row: ProfileRow, display_name: String) -> LoginResponse {
    let last_sync_at = row
        .last_sync_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LoginResponse {
        success: true,
        user: UserInfo {
            id: row.id,
            name: display_name,
            email: row.email,
            avatar_url: row.avatar_url,
            created_at: row.created_at,
        },
        settings: SettingsOut {
            language: row.language.unwrap_or_else(|| "zh-TW".into()),
            birth_date: row.birth_date,
            birth_time: row.birth_time.unwrap_or_else(|| "00:00:00".into()),
            life_expectancy_preset: row.expectancy_preset.unwrap_or_else(|| "average".into()),
            custom_life_expectancy: row.custom_expectancy.unwrap_or(85),
            sleep_offset: row.sleep_offset.unwrap_or(8.0),
            today_sleep_time: row.today_sleep_time.unwrap_or(8.0),
            today_work_time: row.today_work_time.unwrap_or(8.0),
            work_start: row.work_start.unwrap_or_else(|| "09:00".into()),
            work_end: row.work_end.unwrap_or_else(|| "18:00".into()),
            decimal_precision: row.decimal_precision.unwrap_or(6),
            progress_bar_style: "linear".into(),
            sound_enabled: row.sound_enabled.unwrap_or(false),
            gravity_enabled: row.gravity_enabled.unwrap_or(false),
            anniversaries: Vec::new(),
        },
        attributes: AttributesOut {
            health: row.health.unwrap_or(0.5),
            mind: row.mind.unwrap_or(0.5),
            skill: row.skill.unwrap_or(0.5),
            social: row.social.unwrap_or(0.5),
            adventure: row.adventure.unwrap_or(0.5),
            spirit: row.spirit.unwrap_or(0.5),
            last_sync_at,
        },
    }
}

// ── Tests ───────────────────────────────────────────────────────────
