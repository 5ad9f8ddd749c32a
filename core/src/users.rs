//! Forum accounts. Credentials live outside this crate; a user here is the
//! identity posts are attributed to.

use crate::error::{IndexError, Result};
use crate::store::{Bucket, Txn};
use crate::UserId;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddUserRequest {
    pub username: String,
    #[serde(default)]
    pub email: String,
}

pub const USERS: Bucket<UserId, User> = Bucket::new("users");
/// username → id, keeps usernames unique.
pub const USERNAMES: Bucket<String, UserId> = Bucket::new("usernames");

pub fn is_username_valid(name: &str) -> bool {
    name.len() >= 3
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

pub fn add_user(tx: &mut Txn<'_>, req: AddUserRequest) -> Result<User> {
    tx.require_write()?;
    if !is_username_valid(&req.username) {
        return Err(IndexError::UsernameInvalid);
    }
    if USERNAMES.contains(tx, &req.username)? {
        return Err(IndexError::UsernameTaken);
    }
    let id = tx.next_id(USERS.name())?;
    let user = User { id, username: req.username, email: req.email, is_admin: id < 2 };
    USERS.put(tx, &user.id, &user)?;
    USERNAMES.put(tx, &user.username, &user.id)?;
    info!(id, username = %user.username, "added user");
    Ok(user)
}

pub fn get_user(tx: &Txn<'_>, id: UserId) -> Result<Option<User>> {
    USERS.get(tx, &id)
}

pub fn find_user(tx: &Txn<'_>, username: &str) -> Result<Option<User>> {
    match USERNAMES.get(tx, &username.to_string())? {
        Some(id) => USERS.get(tx, &id),
        None => Ok(None),
    }
}

pub fn list_users(tx: &Txn<'_>) -> Result<Vec<User>> {
    let mut users = Vec::new();
    USERS.iterate_all(tx, |_, user| {
        users.push(user);
        true
    })?;
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;

    fn req(name: &str) -> AddUserRequest {
        AddUserRequest { username: name.into(), email: format!("{name}@example.com") }
    }

    #[test]
    fn username_rules() {
        assert!(is_username_valid("bob.smith-2_x"));
        assert!(!is_username_valid("ab"));
        assert!(!is_username_valid("has space"));
        assert!(!is_username_valid("zoë"));
    }

    #[test]
    fn first_user_is_admin_and_names_are_unique() {
        let store = Store::temporary().unwrap();
        let mut tx = store.write_tx();
        let first = add_user(&mut tx, req("alice")).unwrap();
        let second = add_user(&mut tx, req("bob")).unwrap();
        assert!(first.is_admin);
        assert!(!second.is_admin);
        assert!(matches!(add_user(&mut tx, req("alice")), Err(IndexError::UsernameTaken)));
        assert!(matches!(add_user(&mut tx, req("x")), Err(IndexError::UsernameInvalid)));
        tx.commit().unwrap();

        let tx = store.read_tx();
        let names: Vec<String> = list_users(&tx).unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names, vec!["alice", "bob"]);
        assert_eq!(find_user(&tx, "bob").unwrap().map(|u| u.id), Some(2));
        assert_eq!(get_user(&tx, 9).unwrap(), None);
    }
}
