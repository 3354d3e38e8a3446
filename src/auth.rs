/*!
Users, password hashes and login sessions.

Password hashes are Argon2id PHC strings (`$argon2id$v=19$...`).
*/
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use rand::thread_rng;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use uuid::Uuid;

use crate::db;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hod,
    Staff,
    Student,
}

impl Role {
    pub fn as_i64(self) -> i64 {
        match self {
            Role::Hod => 1,
            Role::Staff => 2,
            Role::Student => 3,
        }
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(Role::Hod),
            2 => Some(Role::Staff),
            3 => Some(Role::Student),
            _ => None,
        }
    }

    pub fn home_path(self) -> &'static str {
        match self {
            Role::Hod => "/admin/home",
            Role::Staff => "/staff/home",
            Role::Student => "/student/home",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentUser {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub first_name: String,
    pub last_name: String,
}

pub struct NewUser<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub role: Role,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub gender: &'a str,
    pub address: &'a str,
    pub profile_pic: &'a str,
}

/// Argon2id hash in PHC string form; the salt and parameters travel inside
/// the string.
pub fn hash_password(password: &str) -> Result<String, password_hash::Error> {
    let salt = SaltString::generate(&mut thread_rng());
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// False for a wrong password and for anything that is not a PHC string.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(encoded) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

fn hashed(password: &str) -> rusqlite::Result<String> {
    hash_password(password)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

pub fn email_exists(conn: &Connection, email: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM users WHERE lower(email) = lower(?)",
        [email],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
}

pub fn insert_user(conn: &Connection, user: &NewUser<'_>) -> rusqlite::Result<i64> {
    let now = db::now_ts();
    conn.execute(
        "INSERT INTO users(email, password_hash, role, first_name, last_name, gender, address,
                           profile_pic, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            user.email,
            hashed(user.password)?,
            user.role.as_i64(),
            user.first_name,
            user.last_name,
            user.gender,
            user.address,
            user.profile_pic,
            &now,
            &now,
        ),
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn set_password(conn: &Connection, user_id: i64, password: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?",
        (hashed(password)?, db::now_ts(), user_id),
    )?;
    Ok(())
}

fn user_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Option<CurrentUser>> {
    let Some(role) = Role::from_i64(r.get(2)?) else {
        return Ok(None);
    };
    Ok(Some(CurrentUser {
        id: r.get(0)?,
        email: r.get(1)?,
        role,
        first_name: r.get(3)?,
        last_name: r.get(4)?,
    }))
}

pub fn get_user(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<CurrentUser>> {
    conn.query_row(
        "SELECT id, email, role, first_name, last_name FROM users WHERE id = ?",
        [user_id],
        user_from_row,
    )
    .optional()
    .map(Option::flatten)
}

/// Checks an email/password pair. Unknown emails and wrong passwords are
/// indistinguishable to the caller.
pub fn authenticate(
    conn: &Connection,
    email: &str,
    password: &str,
) -> rusqlite::Result<Option<CurrentUser>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, password_hash FROM users WHERE lower(email) = lower(?)",
            [email],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((user_id, encoded)) = row else {
        return Ok(None);
    };
    if !verify_password(password, &encoded) {
        return Ok(None);
    }
    get_user(conn, user_id)
}

pub fn create_session(conn: &Connection, user_id: i64, ttl_hours: i64) -> rusqlite::Result<String> {
    let key = Uuid::new_v4().simple().to_string();
    let expires_at = db::ts(Utc::now() + Duration::hours(ttl_hours));
    conn.execute(
        "INSERT INTO login_sessions(key, user_id, expires_at) VALUES(?, ?, ?)",
        (&key, user_id, &expires_at),
    )?;
    Ok(key)
}

pub fn session_user(conn: &Connection, key: &str) -> rusqlite::Result<Option<CurrentUser>> {
    conn.query_row(
        "SELECT u.id, u.email, u.role, u.first_name, u.last_name
         FROM login_sessions s
         JOIN users u ON u.id = s.user_id
         WHERE s.key = ? AND s.expires_at > ?",
        (key, db::now_ts()),
        user_from_row,
    )
    .optional()
    .map(Option::flatten)
}

pub fn delete_session(conn: &Connection, key: &str) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM login_sessions WHERE key = ?", [key])?;
    Ok(())
}

/// Deletes expired login sessions and returns their keys.
pub fn purge_expired_sessions(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt =
        conn.prepare("DELETE FROM login_sessions WHERE expires_at <= ? RETURNING key")?;
    let keys = stmt
        .query_map([db::now_ts()], |r| r.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(keys)
}

/// Get-or-create the configured HOD account and reset its password, so the
/// configured credentials always work after a restart.
pub fn ensure_default_admin(conn: &Connection, email: &str, password: &str) -> anyhow::Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM users WHERE lower(email) = lower(?)",
            [email],
            |r| r.get(0),
        )
        .optional()?;
    let user_id = match existing {
        Some(id) => {
            set_password(conn, id, password)?;
            conn.execute(
                "UPDATE users SET role = ? WHERE id = ?",
                (Role::Hod.as_i64(), id),
            )?;
            tracing::info!(email, "updated existing user to be the default admin");
            id
        }
        None => {
            let id = insert_user(
                conn,
                &NewUser {
                    email,
                    password,
                    role: Role::Hod,
                    first_name: "Admin",
                    last_name: "",
                    gender: "",
                    address: "",
                    profile_pic: "",
                },
            )?;
            tracing::info!(email, "created default admin");
            id
        }
    };
    conn.execute(
        "INSERT INTO admins(user_id) VALUES(?) ON CONFLICT(user_id) DO NOTHING",
        [user_id],
    )?;
    Ok(user_id)
}
