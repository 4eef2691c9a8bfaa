//! Legacy nonce challenge-response authentication.
//!
//! The client asks for a nonce with `getnonce`, then proves knowledge of the
//! password by sending `key = md5(nonce + user + md5("user:mongo:password"))`.

use bsonwire_bson::{doc, Document};
use md5::{Digest, Md5};

fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Hex MD5 of `user:mongo:password`, the form the server stores.
pub fn password_digest(username: &str, password: &str) -> String {
    md5_hex(&format!("{}:mongo:{}", username, password))
}

/// The `key` field of the `authenticate` command.
pub fn auth_key(nonce: &str, username: &str, password: &str) -> String {
    md5_hex(&format!(
        "{}{}{}",
        nonce,
        username,
        password_digest(username, password)
    ))
}

pub fn getnonce_command() -> Document {
    doc! { "getnonce" => 1 }
}

pub fn authenticate_command(username: &str, nonce: &str, password: &str) -> Document {
    doc! {
        "authenticate" => 1,
        "user" => username,
        "nonce" => nonce,
        "key" => auth_key(nonce, username, password),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_digest() {
        assert_eq!(
            password_digest("user", "pencil"),
            "1c33006ec1ffd90f9cadcbcc0e118200"
        );
    }

    #[test]
    fn test_auth_key() {
        assert_eq!(
            auth_key("2375531c32080ae8", "user", "pencil"),
            "21742f26431831d5cfca035a08c5bdf6"
        );
    }

    #[test]
    fn test_authenticate_command_order() {
        let cmd = authenticate_command("user", "abc", "pw");
        let keys: Vec<&str> = cmd.keys().collect();
        assert_eq!(keys, vec!["authenticate", "user", "nonce", "key"]);
        assert_eq!(cmd.get_str("key"), Some(auth_key("abc", "user", "pw").as_str()));
    }
}
