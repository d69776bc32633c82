//! Teacher accounts and the current-session pointer.
//!
//! Demo-grade only: passwords are salted SHA-256, which is not a password
//! hashing algorithm. A real deployment has to move to a dedicated KDF.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::Teacher;
use crate::error::{LaraError, Result};
use crate::storage::{read_json, write_json, BlobStore};

const TEACHERS_KEY: &str = "lara-teachers";
const CURRENT_TEACHER_KEY: &str = "lara-current-teacher";
const MIN_PASSWORD_LEN: usize = 6;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TeacherCredentials {
    email: String,
    password_hash: String,
    teacher: Teacher,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Clone)]
pub struct IdentityStore {
    blobs: Arc<dyn BlobStore>,
}

impl IdentityStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    fn all_teachers(&self) -> Result<BTreeMap<String, TeacherCredentials>> {
        Ok(read_json(self.blobs.as_ref(), TEACHERS_KEY)?.unwrap_or_default())
    }

    fn save_teachers(&self, teachers: &BTreeMap<String, TeacherCredentials>) -> Result<()> {
        write_json(self.blobs.as_ref(), TEACHERS_KEY, teachers)
    }

    #[instrument(level = "info", skip(self, email, password, name), fields(email_len = email.len()))]
    pub fn sign_up(&self, email: &str, password: &str, name: &str) -> Result<Teacher> {
        let email = email.trim();
        let name = name.trim();
        if email.is_empty() || password.is_empty() || name.is_empty() {
            return Err(LaraError::invalid_input("signup", "All fields are required"));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(LaraError::invalid_input(
                "password",
                "Password must be at least 6 characters",
            ));
        }

        let mut teachers = self.all_teachers()?;
        if teachers.contains_key(email) {
            return Err(LaraError::invalid_input("email", "Email already registered"));
        }

        let teacher = Teacher {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        teachers.insert(
            email.to_string(),
            TeacherCredentials {
                email: email.to_string(),
                password_hash: hash_password(password),
                teacher: teacher.clone(),
            },
        );
        self.save_teachers(&teachers)?;
        self.set_current(&teacher)?;
        info!(target: "auth", teacher_id = %teacher.id, "Teacher signed up");
        Ok(teacher)
    }

    /// Unknown email and wrong password produce the same error.
    #[instrument(level = "info", skip(self, email, password), fields(email_len = email.len()))]
    pub fn log_in(&self, email: &str, password: &str) -> Result<Teacher> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(LaraError::invalid_input(
                "login",
                "Email and password are required",
            ));
        }
        let teachers = self.all_teachers()?;
        let Some(creds) = teachers.get(email) else {
            return Err(LaraError::InvalidCredentials);
        };
        if !verify_password(password, &creds.password_hash) {
            warn!(target: "auth", "Login rejected");
            return Err(LaraError::InvalidCredentials);
        }
        self.set_current(&creds.teacher)?;
        info!(target: "auth", teacher_id = %creds.teacher.id, "Teacher logged in");
        Ok(creds.teacher.clone())
    }

    pub fn log_out(&self) -> Result<()> {
        self.blobs.remove(CURRENT_TEACHER_KEY)
    }

    pub fn current_teacher(&self) -> Result<Option<Teacher>> {
        read_json(self.blobs.as_ref(), CURRENT_TEACHER_KEY)
    }

    pub fn is_logged_in(&self) -> Result<bool> {
        Ok(self.current_teacher()?.is_some())
    }

    fn set_current(&self, teacher: &Teacher) -> Result<()> {
        write_json(self.blobs.as_ref(), CURRENT_TEACHER_KEY, teacher)
    }

    /// Update the logged-in teacher's name and/or email. A new email re-keys the registry.
    #[instrument(level = "info", skip(self, update))]
    pub fn update_profile(&self, update: ProfileUpdate) -> Result<Teacher> {
        let current = self.current_teacher()?.ok_or(LaraError::NotLoggedIn)?;
        let mut teachers = self.all_teachers()?;
        let mut creds = teachers
            .remove(&current.email)
            .ok_or(LaraError::NotLoggedIn)?;

        let new_email = update
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        if let Some(email) = &new_email {
            if email != &current.email && teachers.contains_key(email) {
                return Err(LaraError::invalid_input("email", "Email already registered"));
            }
            creds.email = email.clone();
            creds.teacher.email = email.clone();
        }
        if let Some(name) = update.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty()) {
            creds.teacher.name = name;
        }

        let teacher = creds.teacher.clone();
        teachers.insert(creds.email.clone(), creds);
        self.save_teachers(&teachers)?;
        self.set_current(&teacher)?;
        Ok(teacher)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut s, "{b:02x}");
    }
    s
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b"$");
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

/// `salt$hexdigest` with a random 16-byte salt.
fn hash_password(password: &str) -> String {
    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let salt = hex(&salt);
    let d = digest(&salt, password);
    format!("{salt}${d}")
}

fn verify_password(password: &str, stored: &str) -> bool {
    match stored.split_once('$') {
        Some((salt, expected)) => digest(salt, password) == expected,
        None => false,
    }
}
