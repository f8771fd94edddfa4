use std::fmt;

/// The authenticated identity a request executes as.
///
/// Built once by the auth middleware from the request's credentials and
/// carried through request extensions; never persisted. The credential is
/// forwarded verbatim to the driver, which is the authority on whether it
/// is valid.
#[derive(Clone)]
pub struct Principal {
    name: String,
    credential: String,
}

impl Principal {
    pub fn new(name: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            credential: credential.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

// Keep the credential out of logs.
impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("name", &self.name)
            .field("credential", &"<redacted>")
            .finish()
    }
}
