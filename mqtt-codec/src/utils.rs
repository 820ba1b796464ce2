// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

/// Generate a random alphanumeric string, used as a fallback client id when
/// the caller does not supply one.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng().sample_iter(&Alphanumeric).take(len).map(char::from).collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClientIdError {
    IsEmpty,
    TooLong,
    InvalidChars,
}

/// Validate a client id against the broker-agnostic subset of the spec:
/// 1-23 bytes, restricted to `[0-9a-zA-Z]`. Many brokers accept longer or
/// wider character sets; callers targeting such a broker can skip this
/// check and pass the id straight to [`crate::ConnectPacket::new`].
///
/// # Errors
/// Returns the specific `ClientIdError` variant that failed.
pub fn check_client_id(client_id: &str) -> Result<(), ClientIdError> {
    if client_id.is_empty() {
        return Err(ClientIdError::IsEmpty);
    }
    if client_id.len() > 23 {
        return Err(ClientIdError::TooLong);
    }
    if !client_id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ClientIdError::InvalidChars);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_string_has_requested_length() {
        assert_eq!(random_string(8).len(), 8);
    }

    #[test]
    fn rejects_empty_and_overlong_ids() {
        assert_eq!(check_client_id(""), Err(ClientIdError::IsEmpty));
        assert_eq!(
            check_client_id(&"a".repeat(24)),
            Err(ClientIdError::TooLong)
        );
        assert_eq!(
            check_client_id("device/01"),
            Err(ClientIdError::InvalidChars)
        );
        assert!(check_client_id("device01").is_ok());
    }
}
