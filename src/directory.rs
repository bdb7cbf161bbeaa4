//! Directory service collaborator.

use crate::config::DirectoryEntry;
use crate::errors::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Read access to organisational users.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn list_users(&self) -> Result<Vec<DirectoryEntry>>;

    async fn get_user(&self, id: &str) -> Result<Option<DirectoryEntry>>;
}

/// Directory backed by the configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    users: Vec<DirectoryEntry>,
    by_id: HashMap<String, usize>,
}

impl StaticDirectory {
    pub fn new(users: Vec<DirectoryEntry>) -> Self {
        let by_id = users
            .iter()
            .enumerate()
            .map(|(i, u)| (u.id.clone(), i))
            .collect();
        Self { users, by_id }
    }
}

#[async_trait]
impl DirectoryService for StaticDirectory {
    async fn list_users(&self) -> Result<Vec<DirectoryEntry>> {
        Ok(self.users.clone())
    }

    async fn get_user(&self, id: &str) -> Result<Option<DirectoryEntry>> {
        Ok(self.by_id.get(id).map(|&i| self.users[i].clone()))
    }
}
