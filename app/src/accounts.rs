//! Customer accounts and staff sign-in.
//!
//! Credentials are stored and compared as plain text. Customers live in the
//! shared `users` list with the signed-in one mirrored under `currentUser`;
//! staff sign-ins only raise a flag in the per-session store.

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use err_derive::Error;
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::{Deserialize, Serialize};

use infra::persistence::{MemStorage, Storage, StorageExt};

use crate::keys;

const MIN_PASSWORD_LEN: usize = 6;

lazy_static! {
    static ref EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Manager,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffRecord {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Login {
    pub role: Role,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: String,
    pub confirm: String,
}

#[derive(Debug, Clone, Default)]
pub struct PasswordChange {
    pub current: String,
    pub new: String,
    pub confirm: String,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: String,
    pub email: String,
    pub phone: String,
    pub password: Option<PasswordChange>,
}

/// Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct StaffUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<PasswordChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    #[error(display = "please fill in all required fields")]
    MissingField,
    #[error(display = "passwords do not match")]
    PasswordMismatch,
    #[error(display = "password must be at least 6 characters")]
    PasswordTooShort,
    #[error(display = "email already registered")]
    EmailTaken,
    #[error(display = "this email is reserved for staff")]
    ReservedEmail,
    #[error(display = "please enter a valid email address")]
    InvalidEmail,
    #[error(display = "invalid email or password")]
    InvalidCredentials,
    #[error(display = "current password is incorrect")]
    WrongPassword,
    #[error(display = "please log in first")]
    NotSignedIn,
    #[error(display = "{} access required", _0)]
    Unauthorized(Role),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(display = "unknown role: {:?}", _0)]
pub struct UnknownRole(pub String);

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Manager => "manager",
            Role::Admin => "admin",
        }
    }

    fn session_flag(self) -> Option<&'static str> {
        match self {
            Role::Customer => None,
            Role::Manager => Some(keys::IS_MANAGER),
            Role::Admin => Some(keys::IS_ADMIN),
        }
    }

    fn staff_key(self) -> Option<&'static str> {
        match self {
            Role::Customer => None,
            Role::Manager => Some(keys::MANAGER_DATA),
            Role::Admin => Some(keys::ADMIN_DATA),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownRole;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "manager" => Ok(Role::Manager),
            "admin" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

impl StaffRecord {
    pub fn default_for(role: Role) -> Option<StaffRecord> {
        let (email, password, name) = match role {
            Role::Customer => return None,
            Role::Manager => ("manager@mnt.com", "manager123", "Manager"),
            Role::Admin => ("admin@admin.com", "admin123", "Tumelo Segale"),
        };
        Some(StaffRecord {
            email: email.to_string(),
            password: password.to_string(),
            name: name.to_string(),
        })
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL.is_match(email)
}

fn check_password_change(stored: &str, change: &PasswordChange) -> Result<(), AccountError> {
    if change.current != stored {
        return Err(AccountError::WrongPassword);
    }
    if change.new.chars().count() < MIN_PASSWORD_LEN {
        return Err(AccountError::PasswordTooShort);
    }
    if change.new != change.confirm {
        return Err(AccountError::PasswordMismatch);
    }
    Ok(())
}

/// Account operations for one browsing session.
#[derive(Debug, Clone)]
pub struct Accounts {
    session: MemStorage,
}

impl Accounts {
    pub fn new(session: MemStorage) -> Self {
        Accounts { session }
    }

    /// Stores the default staff records where none exist yet.
    pub fn setup(&self, docs: &dyn Storage) -> Result<()> {
        for role in [Role::Manager, Role::Admin].iter() {
            if let (Some(key), Some(record)) = (role.staff_key(), StaffRecord::default_for(*role)) {
                if docs.get_raw(key)?.is_none() {
                    debug!("Seeding {} account", role);
                    docs.save(key, &record)?;
                }
            }
        }
        Ok(())
    }

    pub fn staff(&self, docs: &dyn Storage, role: Role) -> Option<StaffRecord> {
        let key = role.staff_key()?;
        docs.load_or_default::<Option<StaffRecord>>(key)
            .or_else(|| StaffRecord::default_for(role))
    }

    fn users(&self, docs: &dyn Storage) -> Vec<User> {
        docs.load_or_default(keys::USERS)
    }

    fn is_staff_email(&self, docs: &dyn Storage, email: &str) -> bool {
        [Role::Manager, Role::Admin]
            .iter()
            .filter_map(|r| self.staff(docs, *r))
            .any(|s| s.email.eq_ignore_ascii_case(email))
    }

    pub fn register(&self, docs: &dyn Storage, reg: Registration) -> Result<User, AccountError> {
        let email = reg.email.trim();
        if reg.name.trim().is_empty() || email.is_empty() {
            return Err(AccountError::MissingField);
        }
        if reg.password != reg.confirm {
            return Err(AccountError::PasswordMismatch);
        }
        if reg.password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::PasswordTooShort);
        }

        let mut users = self.users(docs);
        if users.iter().any(|u| u.email == email) {
            return Err(AccountError::EmailTaken);
        }
        if self.is_staff_email(docs, email) {
            return Err(AccountError::ReservedEmail);
        }

        let user = User {
            name: reg.name.trim().to_string(),
            email: email.to_string(),
            phone: reg.phone.trim().to_string(),
            password: reg.password,
        };
        users.push(user.clone());
        docs.save_or_warn(keys::USERS, &users);
        docs.save_or_warn(keys::CURRENT_USER, &user);
        info!("Registered {}", user.email);
        Ok(user)
    }

    pub fn login(
        &self,
        docs: &dyn Storage,
        email: &str,
        password: &str,
    ) -> Result<Login, AccountError> {
        let email = email.trim();
        if let Some(user) = self
            .users(docs)
            .into_iter()
            .find(|u| u.email == email && u.password == password)
        {
            docs.save_or_warn(keys::CURRENT_USER, &user);
            info!("Customer {} signed in", user.email);
            return Ok(Login {
                role: Role::Customer,
                name: user.name,
                email: user.email,
            });
        }

        for role in [Role::Manager, Role::Admin].iter().copied() {
            let staff = match self.staff(docs, role) {
                Some(staff) => staff,
                None => continue,
            };
            if staff.email == email && staff.password == password {
                if let Some(flag) = role.session_flag() {
                    self.session.save_or_warn(flag, &true);
                }
                info!("{} signed in", role);
                return Ok(Login {
                    role,
                    name: staff.name,
                    email: staff.email,
                });
            }
        }

        debug!("Failed sign-in for {:?}", email);
        Err(AccountError::InvalidCredentials)
    }

    pub fn current_user(&self, docs: &dyn Storage) -> Option<User> {
        docs.load_or_default(keys::CURRENT_USER)
    }

    fn has_flag(&self, role: Role) -> bool {
        role.session_flag()
            .map(|flag| self.session.load_or_default::<bool>(flag))
            .unwrap_or(false)
    }

    /// The most privileged role this session holds.
    pub fn role(&self, docs: &dyn Storage) -> Option<Role> {
        if self.has_flag(Role::Admin) {
            Some(Role::Admin)
        } else if self.has_flag(Role::Manager) {
            Some(Role::Manager)
        } else {
            self.current_user(docs).map(|_| Role::Customer)
        }
    }

    pub fn require_role(&self, docs: &dyn Storage, role: Role) -> Result<(), AccountError> {
        let allowed = match role {
            Role::Customer => self.current_user(docs).is_some(),
            staff => self.has_flag(staff),
        };
        if allowed {
            Ok(())
        } else if role == Role::Customer {
            Err(AccountError::NotSignedIn)
        } else {
            Err(AccountError::Unauthorized(role))
        }
    }

    pub fn update_profile(
        &self,
        docs: &dyn Storage,
        update: ProfileUpdate,
    ) -> Result<User, AccountError> {
        let current = self.current_user(docs).ok_or(AccountError::NotSignedIn)?;
        let (name, email, phone) = (update.name.trim(), update.email.trim(), update.phone.trim());
        if name.is_empty() || email.is_empty() || phone.is_empty() {
            return Err(AccountError::MissingField);
        }

        let mut users = self.users(docs);
        let pos = users
            .iter()
            .position(|u| u.email == current.email)
            .ok_or(AccountError::NotSignedIn)?;
        if email != current.email && users.iter().any(|u| u.email == email) {
            return Err(AccountError::EmailTaken);
        }
        if let Some(change) = update.password.as_ref() {
            check_password_change(&users[pos].password, change)?;
            users[pos].password = change.new.clone();
        }

        let user = &mut users[pos];
        user.name = name.to_string();
        user.email = email.to_string();
        user.phone = phone.to_string();
        let updated = user.clone();

        docs.save_or_warn(keys::USERS, &users);
        docs.save_or_warn(keys::CURRENT_USER, &updated);
        info!("Updated profile for {}", updated.email);
        Ok(updated)
    }

    /// Removes the signed-in customer. Their orders stay in the store.
    pub fn delete_profile(&self, docs: &dyn Storage) -> Result<User, AccountError> {
        let current = self.current_user(docs).ok_or(AccountError::NotSignedIn)?;
        let mut users = self.users(docs);
        users.retain(|u| u.email != current.email);
        docs.save_or_warn(keys::USERS, &users);
        if let Err(e) = docs.remove(keys::CURRENT_USER) {
            warn!("Could not clear current user: {:#}", e);
        }
        info!("Deleted account {}", current.email);
        Ok(current)
    }

    /// Changes a staff member's own sign-in details.
    pub fn update_staff(
        &self,
        docs: &dyn Storage,
        role: Role,
        update: StaffUpdate,
    ) -> Result<StaffRecord, AccountError> {
        self.require_role(docs, role)?;
        let key = role.staff_key().ok_or(AccountError::Unauthorized(role))?;
        let mut record = self
            .staff(docs, role)
            .ok_or(AccountError::Unauthorized(role))?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(AccountError::MissingField);
            }
            record.name = name.trim().to_string();
        }
        if let Some(email) = update.email {
            let email = email.trim();
            if !is_valid_email(email) {
                return Err(AccountError::InvalidEmail);
            }
            record.email = email.to_string();
        }
        if let Some(change) = update.password.as_ref() {
            check_password_change(&record.password, change)?;
            record.password = change.new.clone();
        }

        docs.save_or_warn(key, &record);
        info!("Updated {} account", role);
        Ok(record)
    }

    pub fn logout(&self, docs: &dyn Storage) {
        for flag in [keys::IS_MANAGER, keys::IS_ADMIN].iter() {
            if let Err(e) = self.session.remove(flag) {
                warn!("Could not clear {}: {:#}", flag, e);
            }
        }
        if let Err(e) = docs.remove(keys::CURRENT_USER) {
            warn!("Could not clear current user: {:#}", e);
        }
        debug!("Signed out");
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn accounts() -> (Accounts, MemStorage) {
        env_logger::try_init().unwrap_or_default();
        let docs = MemStorage::new();
        let accounts = Accounts::new(MemStorage::new());
        accounts.setup(&docs).expect("setup");
        (accounts, docs)
    }

    fn registration(email: &str) -> Registration {
        Registration {
            name: "Naledi".into(),
            email: email.into(),
            phone: "0820000000".into(),
            password: "secret1".into(),
            confirm: "secret1".into(),
        }
    }

    #[test]
    fn registering_signs_the_customer_in() {
        let (accounts, docs) = accounts();
        let user = accounts
            .register(&docs, registration("naledi@example.com"))
            .expect("register");

        assert_eq!(accounts.current_user(&docs), Some(user));
        assert_eq!(accounts.role(&docs), Some(Role::Customer));
        assert_eq!(accounts.require_role(&docs, Role::Customer), Ok(()));
        assert_eq!(
            accounts.require_role(&docs, Role::Manager),
            Err(AccountError::Unauthorized(Role::Manager))
        );
    }

    #[test]
    fn registration_rules() {
        let (accounts, docs) = accounts();
        let mut reg = registration("a@b.co");
        reg.confirm = "other".into();
        assert_eq!(
            accounts.register(&docs, reg),
            Err(AccountError::PasswordMismatch)
        );

        let mut reg = registration("a@b.co");
        reg.password = "short".into();
        reg.confirm = "short".into();
        assert_eq!(
            accounts.register(&docs, reg),
            Err(AccountError::PasswordTooShort)
        );

        accounts.register(&docs, registration("a@b.co")).expect("first");
        assert_eq!(
            accounts.register(&docs, registration("a@b.co")),
            Err(AccountError::EmailTaken)
        );
        assert_eq!(
            accounts.register(&docs, registration("manager@mnt.com")),
            Err(AccountError::ReservedEmail)
        );
    }

    #[test]
    fn staff_sign_in_raises_a_session_flag() {
        let (accounts, docs) = accounts();
        let login = accounts
            .login(&docs, "manager@mnt.com", "manager123")
            .expect("login");

        assert_eq!(login.role, Role::Manager);
        assert_eq!(accounts.current_user(&docs), None);
        assert_eq!(accounts.role(&docs), Some(Role::Manager));
        assert_eq!(accounts.require_role(&docs, Role::Manager), Ok(()));

        accounts.logout(&docs);
        assert_eq!(accounts.role(&docs), None);
    }

    #[test]
    fn sessions_do_not_share_flags() {
        let (admin, docs) = accounts();
        admin.login(&docs, "admin@admin.com", "admin123").expect("login");
        let other = Accounts::new(MemStorage::new());
        assert_eq!(
            other.require_role(&docs, Role::Admin),
            Err(AccountError::Unauthorized(Role::Admin))
        );
    }

    #[test]
    fn bad_credentials_are_rejected() {
        let (accounts, docs) = accounts();
        assert_eq!(
            accounts.login(&docs, "admin@admin.com", "nope"),
            Err(AccountError::InvalidCredentials)
        );
    }

    #[test]
    fn profile_update_checks_current_password() {
        let (accounts, docs) = accounts();
        accounts.register(&docs, registration("a@b.co")).expect("register");

        let update = ProfileUpdate {
            name: "Naledi M".into(),
            email: "naledi@b.co".into(),
            phone: "0831111111".into(),
            password: Some(PasswordChange {
                current: "wrong".into(),
                new: "newsecret".into(),
                confirm: "newsecret".into(),
            }),
        };
        assert_eq!(
            accounts.update_profile(&docs, update.clone()),
            Err(AccountError::WrongPassword)
        );

        let mut update = update;
        if let Some(change) = update.password.as_mut() {
            change.current = "secret1".into();
        }
        let user = accounts.update_profile(&docs, update).expect("update");
        assert_eq!(user.email, "naledi@b.co");
        assert!(accounts.login(&docs, "naledi@b.co", "newsecret").is_ok());
    }

    #[test]
    fn staff_can_change_their_credentials() {
        let (accounts, docs) = accounts();
        let update = StaffUpdate {
            email: Some("boss@mnt.com".into()),
            ..StaffUpdate::default()
        };
        assert_eq!(
            accounts.update_staff(&docs, Role::Admin, update.clone()),
            Err(AccountError::Unauthorized(Role::Admin))
        );

        accounts.login(&docs, "admin@admin.com", "admin123").expect("login");
        assert_eq!(
            accounts.update_staff(
                &docs,
                Role::Admin,
                StaffUpdate {
                    email: Some("not an email".into()),
                    ..StaffUpdate::default()
                }
            ),
            Err(AccountError::InvalidEmail)
        );
        accounts
            .update_staff(&docs, Role::Admin, update)
            .expect("update");

        let fresh = Accounts::new(MemStorage::new());
        assert_eq!(
            fresh.login(&docs, "boss@mnt.com", "admin123").map(|l| l.role),
            Ok(Role::Admin)
        );
    }

    #[test]
    fn deleting_a_profile_signs_out() {
        let (accounts, docs) = accounts();
        accounts.register(&docs, registration("a@b.co")).expect("register");
        accounts.delete_profile(&docs).expect("delete");
        assert_eq!(accounts.current_user(&docs), None);
        assert_eq!(
            accounts.login(&docs, "a@b.co", "secret1"),
            Err(AccountError::InvalidCredentials)
        );
    }

    #[test]
    fn email_pattern() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a b@c.de"));
        assert!(!is_valid_email("@c.de"));
    }
}
