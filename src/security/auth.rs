use subtle::ConstantTimeEq;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailureReason {
    MissingCredentials,
    InvalidCredentials,
}

impl AuthFailureReason {
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::MissingCredentials => "unauthorized: missing peer token",
            Self::InvalidCredentials => "unauthorized: invalid peer token",
        }
    }
}

/// Checks the token carried by a `register` message against the configured secret.
pub fn authorize_peer(expected: Option<&str>, provided: Option<&str>) -> Result<(), AuthFailureReason> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let Some(provided) = provided.map(str::trim).filter(|value| !value.is_empty()) else {
        return Err(AuthFailureReason::MissingCredentials);
    };

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(AuthFailureReason::InvalidCredentials)
    }
}
