//! User management operations on a database.
//!
//! Thin wrappers over the `createUser`/`dropUser`/`usersInfo` commands.

use std::time::Duration;

use tracing::debug;

use crate::bson::{Bson, Document};
use crate::client::Database;
use crate::error::Result;

impl Database {
    /// Create a user on this database.
    ///
    /// `roles` are role names granted on this database.
    pub async fn add_user(
        &self,
        username: &str,
        password: &str,
        roles: &[&str],
        deadline: Option<Duration>,
    ) -> Result<()> {
        let role_docs = roles
            .iter()
            .map(|role| {
                Bson::Document(
                    Document::new()
                        .with("role", *role)
                        .with("db", self.name()),
                )
            })
            .collect::<Vec<_>>();
        let command = Document::new()
            .with("createUser", username)
            .with("pwd", password)
            .with("roles", role_docs);

        debug!(database = self.name(), user = username, "createUser");
        self.run_command(command, None, deadline).await?;
        Ok(())
    }

    /// Remove a user from this database.
    pub async fn remove_user(&self, username: &str, deadline: Option<Duration>) -> Result<()> {
        let command = Document::new().with("dropUser", username);
        debug!(database = self.name(), user = username, "dropUser");
        self.run_command(command, None, deadline).await?;
        Ok(())
    }

    /// Whether a user exists on this database.
    pub async fn has_user(&self, username: &str, deadline: Option<Duration>) -> Result<bool> {
        let command = Document::new().with("usersInfo", username);
        let reply = self.run_command(command, None, deadline).await?;
        Ok(reply
            .get_array("users")
            .is_some_and(|users| !users.is_empty()))
    }
}
