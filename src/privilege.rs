use cfg_if::cfg_if;

use crate::error::PrivilegeError;

/// The effective user of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub uid: u32,
    pub name: String,
}

impl User {
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }
}

cfg_if! {
    if #[cfg(unix)] {
        use std::ffi::CStr;

        /// Look up the effective user in the password database.
        pub fn current_user() -> Result<User, PrivilegeError> {
            let uid = unsafe { libc::geteuid() };
            // called once at startup, before any other thread exists
            let pw = unsafe { libc::getpwuid(uid) };
            if pw.is_null() {
                return Err(PrivilegeError::UnknownUser(uid as u32));
            }

            let name = unsafe { CStr::from_ptr((*pw).pw_name) }
                .to_string_lossy()
                .into_owned();
            Ok(User { uid: uid as u32, name })
        }
    } else {
        pub fn current_user() -> Result<User, PrivilegeError> {
            Err(PrivilegeError::Unsupported)
        }
    }
}

/// Raw ICMP sockets need root, refuse to go on otherwise.
pub fn require_root() -> Result<User, PrivilegeError> {
    check_root(current_user()?)
}

fn check_root(user: User) -> Result<User, PrivilegeError> {
    if user.is_root() {
        Ok(user)
    } else {
        Err(PrivilegeError::NotRoot(user.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_passes() {
        let root = User {
            uid: 0,
            name: "root".to_string(),
        };
        assert_eq!(check_root(root.clone()).unwrap(), root);
    }

    #[test]
    fn other_users_are_refused() {
        let user = User {
            uid: 1000,
            name: "alice".to_string(),
        };
        match check_root(user) {
            Err(PrivilegeError::NotRoot(name)) => assert_eq!(name, "alice"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn current_user_matches_euid() {
        let euid = unsafe { libc::geteuid() } as u32;
        match current_user() {
            Ok(user) => assert_eq!(user.uid, euid),
            // uid without a passwd entry, common in containers
            Err(PrivilegeError::UnknownUser(uid)) => assert_eq!(uid, euid),
            Err(e) => panic!("unexpected {:?}", e),
        }
    }
}
