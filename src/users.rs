//! User records
//!
//! The auth middleware and the account service only need a handful of
//! operations on users: look up by ID, look up by phone number, create on
//! first login, refresh client details, change status, and append to the
//! login log. [`UserDirectory`] is that seam; the database-backed
//! implementation lives with the deployment, and [`MemoryUserDirectory`]
//! serves tests and single-node setups.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// The default user type.
pub const USER_TYPE_NORMAL: i16 = 1;

/// First ID handed out by [`MemoryUserDirectory`].
const FIRST_USER_ID: i64 = 10001;

/// Login records kept by [`MemoryUserDirectory`] before the oldest is dropped.
pub const LOGIN_LOG_CAPACITY: usize = 1024;

/// Boxed future returned by [`UserDirectory`] methods.
pub type DirectoryFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// Types
// ============================================================================

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i16", try_from = "i16")]
pub enum UserStatus {
    /// `1`
    Active,
    /// `-1`: may not log in or use a session
    Disabled,
}

impl UserStatus {
    pub fn code(&self) -> i16 {
        match self {
            Self::Active => 1,
            Self::Disabled => -1,
        }
    }
}

impl From<UserStatus> for i16 {
    fn from(status: UserStatus) -> Self {
        status.code()
    }
}

impl TryFrom<i16> for UserStatus {
    type Error = String;

    fn try_from(code: i16) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Active),
            -1 => Ok(Self::Disabled),
            other => Err(format!("unknown user status {}", other)),
        }
    }
}

/// A user account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub tel: String,
    pub nickname: String,
    pub avatar: String,
    pub user_type: i16,
    pub status: UserStatus,
    pub platform: String,
    pub version: String,
    pub channel: String,
    pub device_id: String,
    #[serde(skip_serializing)]
    pub ip: String,
    pub create_time: i64,
    pub update_time: i64,
}

impl UserRecord {
    pub fn is_disabled(&self) -> bool {
        self.status == UserStatus::Disabled
    }

    fn apply_meta(&mut self, meta: &ClientMeta, now: i64) {
        self.platform = meta.platform.clone();
        self.version = meta.version.clone();
        self.channel = meta.channel.clone();
        self.ip = meta.ip.clone();
        self.update_time = now;
    }
}

/// What the client says about itself: the platform, version, channel and
/// device headers, plus the remote address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub platform: String,
    pub version: String,
    pub channel: String,
    pub device_id: String,
    pub ip: String,
}

/// Fields supplied when a user is created.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub tel: String,
    pub user_type: i16,
    pub meta: ClientMeta,
    pub now: i64,
}

/// One successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    pub user_id: i64,
    pub meta: ClientMeta,
    pub create_time: i64,
}

// ============================================================================
// Directory
// ============================================================================

/// User lookup and mutation.
pub trait UserDirectory: Send + Sync {
    fn get_by_id(&self, id: i64) -> DirectoryFuture<'_, Option<UserRecord>>;

    fn get_by_tel(&self, tel: &str, user_type: i16) -> DirectoryFuture<'_, Option<UserRecord>>;

    /// Create a user unless one already exists for `(tel, user_type)`.
    ///
    /// Returns the stored record and whether it was created by this call.
    fn create(&self, user: NewUser) -> DirectoryFuture<'_, (UserRecord, bool)>;

    /// Overwrite the client details of an existing user. Returns the updated
    /// record, or `None` if the user does not exist.
    fn update_meta(&self, id: i64, meta: ClientMeta, now: i64) -> DirectoryFuture<'_, Option<UserRecord>>;

    /// Change a user's status. Returns `false` if the user does not exist.
    fn set_status(&self, id: i64, status: UserStatus, now: i64) -> DirectoryFuture<'_, bool>;

    /// Append to the login log.
    fn record_login(&self, record: LoginRecord) -> DirectoryFuture<'_, ()>;
}

#[derive(Debug)]
struct Users {
    by_id: HashMap<i64, UserRecord>,
    by_tel: HashMap<(String, i16), i64>,
    next_id: i64,
    logins: VecDeque<LoginRecord>,
}

/// In-memory user directory.
#[derive(Debug)]
pub struct MemoryUserDirectory {
    users: RwLock<Users>,
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self {
            users: RwLock::new(Users {
                by_id: HashMap::new(),
                by_tel: HashMap::new(),
                next_id: FIRST_USER_ID,
                logins: VecDeque::new(),
            }),
        }
    }
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a user outright.
    pub fn remove(&self, id: i64) -> Option<UserRecord> {
        let mut users = self.users.write();
        let removed = users.by_id.remove(&id)?;
        users.by_tel.remove(&(removed.tel.clone(), removed.user_type));
        Some(removed)
    }

    /// Logins of one user, oldest first.
    pub fn logins(&self, user_id: i64) -> Vec<LoginRecord> {
        self.users
            .read()
            .logins
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Number of records in the login log.
    pub fn login_count(&self) -> usize {
        self.users.read().logins.len()
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn get_by_id(&self, id: i64) -> DirectoryFuture<'_, Option<UserRecord>> {
        Box::pin(async move { Ok(self.users.read().by_id.get(&id).cloned()) })
    }

    fn get_by_tel(&self, tel: &str, user_type: i16) -> DirectoryFuture<'_, Option<UserRecord>> {
        let key = (tel.to_string(), user_type);
        Box::pin(async move {
            let users = self.users.read();
            Ok(users.by_tel.get(&key).and_then(|id| users.by_id.get(id)).cloned())
        })
    }

    fn create(&self, user: NewUser) -> DirectoryFuture<'_, (UserRecord, bool)> {
        Box::pin(async move {
            let mut users = self.users.write();
            let key = (user.tel.clone(), user.user_type);
            if let Some(existing) = users.by_tel.get(&key).and_then(|id| users.by_id.get(id)) {
                return Ok((existing.clone(), false));
            }

            let id = users.next_id;
            users.next_id += 1;

            let record = UserRecord {
                id,
                nickname: String::new(),
                avatar: String::new(),
                tel: user.tel,
                user_type: user.user_type,
                status: UserStatus::Active,
                platform: user.meta.platform,
                version: user.meta.version,
                channel: user.meta.channel,
                device_id: user.meta.device_id,
                ip: user.meta.ip,
                create_time: user.now,
                update_time: user.now,
            };
            users.by_tel.insert(key, id);
            users.by_id.insert(id, record.clone());
            Ok((record, true))
        })
    }

    fn update_meta(&self, id: i64, meta: ClientMeta, now: i64) -> DirectoryFuture<'_, Option<UserRecord>> {
        Box::pin(async move {
            let mut users = self.users.write();
            Ok(users.by_id.get_mut(&id).map(|user| {
                user.apply_meta(&meta, now);
                user.clone()
            }))
        })
    }

    fn set_status(&self, id: i64, status: UserStatus, now: i64) -> DirectoryFuture<'_, bool> {
        Box::pin(async move {
            let mut users = self.users.write();
            match users.by_id.get_mut(&id) {
                Some(user) => {
                    user.status = status;
                    user.update_time = now;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    fn record_login(&self, record: LoginRecord) -> DirectoryFuture<'_, ()> {
        Box::pin(async move {
            let mut users = self.users.write();
            if users.logins.len() == LOGIN_LOG_CAPACITY {
                users.logins.pop_front();
            }
            users.logins.push_back(record);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn meta(platform: &str, version: &str) -> ClientMeta {
        ClientMeta {
            platform: platform.to_string(),
            version: version.to_string(),
            channel: "appstore".to_string(),
            device_id: "device-1".to_string(),
            ip: "10.0.0.1".to_string(),
        }
    }

    fn new_user(tel: &str) -> NewUser {
        NewUser {
            tel: tel.to_string(),
            user_type: USER_TYPE_NORMAL,
            meta: meta("ios", "1.0.0"),
            now: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let dir = MemoryUserDirectory::new();
        let (user, created) = dir.create(new_user("13800000000")).await.unwrap();
        assert!(created);
        assert_eq!(user.id, FIRST_USER_ID);
        assert_eq!(user.status, UserStatus::Active);
        assert_eq!(user.version, "1.0.0");
        assert_eq!(user.device_id, "device-1");

        assert_eq!(dir.get_by_id(user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            dir.get_by_tel("13800000000", USER_TYPE_NORMAL).await.unwrap(),
            Some(user)
        );
        assert_eq!(dir.get_by_tel("13800000000", 2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ids_increase() {
        let dir = MemoryUserDirectory::new();
        let (a, _) = dir.create(new_user("1")).await.unwrap();
        let (b, _) = dir.create(new_user("2")).await.unwrap();
        assert_eq!(b.id, a.id + 1);
    }

    #[tokio::test]
    async fn test_create_is_unique_per_tel_and_type() {
        let dir = Arc::new(MemoryUserDirectory::new());
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let dir = dir.clone();
                tokio::spawn(async move { dir.create(new_user("13800000000")).await.unwrap() })
            })
            .collect();

        let mut created = 0;
        let mut ids = Vec::new();
        for task in tasks {
            let (user, fresh) = task.await.unwrap();
            created += usize::from(fresh);
            ids.push(user.id);
        }
        assert_eq!(created, 1);
        assert!(ids.iter().all(|id| *id == ids[0]));

        let other_type = NewUser {
            user_type: 2,
            ..new_user("13800000000")
        };
        let (other, fresh) = dir.create(other_type).await.unwrap();
        assert!(fresh);
        assert_ne!(other.id, ids[0]);
    }

    #[tokio::test]
    async fn test_update_meta() {
        let dir = MemoryUserDirectory::new();
        let (user, _) = dir.create(new_user("13800000000")).await.unwrap();

        let updated = dir
            .update_meta(user.id, meta("android", "2.1.0"), 1_700_000_500)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.platform, "android");
        assert_eq!(updated.version, "2.1.0");
        assert_eq!(updated.update_time, 1_700_000_500);
        assert_eq!(updated.create_time, user.create_time);
        assert_eq!(dir.get_by_id(user.id).await.unwrap(), Some(updated));

        assert_eq!(dir.update_meta(999, ClientMeta::default(), 0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_login_log_is_bounded() {
        let dir = MemoryUserDirectory::new();
        for i in 0..LOGIN_LOG_CAPACITY + 3 {
            dir.record_login(LoginRecord {
                user_id: (i % 2) as i64,
                meta: ClientMeta::default(),
                create_time: i as i64,
            })
            .await
            .unwrap();
        }
        assert_eq!(dir.login_count(), LOGIN_LOG_CAPACITY);

        let logins = dir.logins(1);
        assert_eq!(logins.len(), LOGIN_LOG_CAPACITY / 2);
        assert_eq!(logins[0].create_time, 3);
    }

    #[tokio::test]
    async fn test_set_status() {
        let dir = MemoryUserDirectory::new();
        let (user, _) = dir.create(new_user("13800000000")).await.unwrap();
        assert!(dir.set_status(user.id, UserStatus::Disabled, 5).await.unwrap());
        let user = dir.get_by_id(user.id).await.unwrap().unwrap();
        assert!(user.is_disabled());
        assert_eq!(user.update_time, 5);
        assert!(!dir.set_status(999, UserStatus::Active, 5).await.unwrap());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(UserStatus::try_from(1), Ok(UserStatus::Active));
        assert_eq!(UserStatus::try_from(-1), Ok(UserStatus::Disabled));
        assert!(UserStatus::try_from(0).is_err());
        assert_eq!(serde_json::to_value(UserStatus::Disabled).unwrap(), serde_json::json!(-1));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = UserRecord {
            id: 1,
            tel: "13800000000".into(),
            nickname: String::new(),
            avatar: String::new(),
            user_type: 1,
            status: UserStatus::Active,
            platform: "ios".into(),
            version: "1.0.0".into(),
            channel: String::new(),
            device_id: "device-1".into(),
            ip: "10.0.0.1".into(),
            create_time: 10,
            update_time: 10,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["userType"], 1);
        assert_eq!(json["deviceId"], "device-1");
        assert!(json.get("ip").is_none());
        assert_eq!(json["createTime"], 10);
        assert_eq!(json["status"], 1);
    }
}
