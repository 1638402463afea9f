//! Account registry.
//!
//! One account (key pair plus registrations) per configured user, created on first use. Creation
//! and registration share a single lock across all accounts.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;

use crate::{
    acme::{AccountKey, CertificateAuthority, ExternalAccountBinding, Registration},
    config::User,
    error::ConfigError,
};

/// ACME identity of one user.
#[derive(Debug)]
pub struct Account {
    pub user: String,
    pub email: String,
    pub eab: Option<ExternalAccountBinding>,
    key: AccountKey,

    /// Registrations by directory URL.
    registrations: SyncMutex<HashMap<String, Registration>>,
}

impl Account {
    fn new(user: &User) -> Self {
        Account {
            user: user.name.clone(),
            email: user.email.clone(),
            eab: user.external_account_binding.clone(),
            key: AccountKey::generate(),
            registrations: SyncMutex::default(),
        }
    }

    pub fn key(&self) -> &AccountKey {
        &self.key
    }

    /// Registration with `directory_url`, if one was made.
    pub fn registration(&self, directory_url: &str) -> Option<Registration> {
        self.registrations.lock().get(directory_url).cloned()
    }
}

pub struct AccountRegistry {
    users: HashMap<String, User>,
    accounts: Mutex<HashMap<String, Arc<Account>>>,
}

impl AccountRegistry {
    /// Fails when two users share an email address.
    pub fn new(users: &[User]) -> Result<Self, ConfigError> {
        let mut emails = HashSet::new();

        for user in users {
            if !emails.insert(user.email.to_lowercase()) {
                return Err(ConfigError::DuplicateEmail(user.email.clone()));
            }
        }

        Ok(AccountRegistry {
            users: users
                .iter()
                .map(|user| (user.name.clone(), user.clone()))
                .collect(),
            accounts: Mutex::default(),
        })
    }

    /// Whether `name` is a configured user.
    pub fn contains(&self, name: &str) -> bool {
        self.users.contains_key(name)
    }

    /// The account of `user`, generating its key on first use.
    pub async fn account_for(&self, user: &str) -> Result<Arc<Account>, ConfigError> {
        let config = self
            .users
            .get(user)
            .ok_or_else(|| ConfigError::UnknownUser(user.to_owned()))?;

        let mut accounts = self.accounts.lock().await;

        let account = accounts.entry(user.to_owned()).or_insert_with(|| {
            log::debug!("creating account user={user}");
            Arc::new(Account::new(config))
        });

        Ok(Arc::clone(account))
    }

    /// Returns the registration of `account` with `directory_url`, registering on first use.
    pub async fn get_or_register(
        &self,
        account: &Account,
        directory_url: &str,
        authority: &dyn CertificateAuthority,
    ) -> eyre::Result<Registration> {
        let _accounts = self.accounts.lock().await;

        if let Some(registration) = account.registration(directory_url) {
            return Ok(registration);
        }

        log::info!(
            "registering account user={} directory={directory_url} eab={}",
            account.user,
            account.eab.is_some()
        );

        let registration = authority
            .register(directory_url, &account.key, &account.email, account.eab.as_ref())
            .await?;

        account
            .registrations
            .lock()
            .insert(directory_url.to_owned(), registration.clone());

        Ok(registration)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test::FakeAuthority;

    fn users() -> Vec<User> {
        vec![
            User {
                name: "default".to_owned(),
                email: "admin@example.com".to_owned(),
                external_account_binding: None,
            },
            User {
                name: "other".to_owned(),
                email: "other@example.com".to_owned(),
                external_account_binding: None,
            },
        ]
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_lookups_share_one_account() {
        let registry = Arc::new(AccountRegistry::new(&users()).unwrap());

        let lookups = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.account_for("default").await.unwrap() })
            })
            .collect::<Vec<_>>();

        let mut accounts = Vec::new();
        for lookup in lookups {
            accounts.push(lookup.await.unwrap());
        }

        assert!(accounts.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

        let other = registry.account_for("other").await.unwrap();
        assert!(!Arc::ptr_eq(&accounts[0], &other));
    }

    #[tokio::test]
    async fn unknown_user_is_a_configuration_error() {
        let registry = AccountRegistry::new(&users()).unwrap();
        assert!(matches!(
            registry.account_for("nobody").await,
            Err(ConfigError::UnknownUser(_))
        ));
    }

    #[test]
    fn shared_email_is_rejected_eagerly() {
        let mut users = users();
        users[1].email = "Admin@Example.com".to_owned();
        assert!(matches!(
            AccountRegistry::new(&users),
            Err(ConfigError::DuplicateEmail(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn registration_happens_once() {
        let registry = Arc::new(AccountRegistry::new(&users()).unwrap());
        let authority = Arc::new(FakeAuthority::default());
        let account = registry.account_for("default").await.unwrap();

        let first = registry
            .get_or_register(&account, "https://ca.test/dir", authority.as_ref())
            .await
            .unwrap();

        let repeats = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let authority = Arc::clone(&authority);
                let account = Arc::clone(&account);
                tokio::spawn(async move {
                    registry
                        .get_or_register(&account, "https://ca.test/dir", authority.as_ref())
                        .await
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();

        for repeat in repeats {
            assert_eq!(repeat.await.unwrap(), first);
        }

        assert_eq!(authority.registrations.load(Ordering::SeqCst), 1);

        // a second directory is a second registration
        registry
            .get_or_register(&account, "https://other.test/dir", authority.as_ref())
            .await
            .unwrap();
        assert_eq!(authority.registrations.load(Ordering::SeqCst), 2);
    }
}
