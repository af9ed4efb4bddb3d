//! Registry credentials.
//!
//! Credentials are looked up per registry host through a [`CredentialProvider`].
//! Passwords and tokens are held in a [`Secret`], which is wiped on drop and
//! never shows up in `Debug` output.

use std::{borrow::Cow, env::VarError, fmt, ops::Deref};

use oci_distribution::secrets::RegistryAuth;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::RemoteError;

/// A password or token.
///
/// Use [`Secret::revealed`] to get at the underlying value.
#[derive(Clone, Deserialize, Serialize)]
#[serde(from = "String")]
pub struct Secret(Cow<'static, str>);

impl Secret {
    /// Read a secret from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, VarError> {
        let value = std::env::var(var)?;
        Ok(Secret(value.into()))
    }

    /// Expose the underlying value.
    pub fn revealed(&self) -> &str {
        self.0.deref()
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        if let Cow::Owned(ref mut s) = self.0 {
            s.zeroize()
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Secret(value.into())
    }
}

impl From<&'static str> for Secret {
    fn from(value: &'static str) -> Self {
        Secret(value.into())
    }
}

/// Credentials presented to a registry host.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    /// No credentials; the registry may still hand out an anonymous token.
    #[default]
    Anonymous,

    /// Username and password.
    Basic {
        /// Account name.
        username: String,
        /// Account password.
        password: Secret,
    },

    /// An identity token, presented in place of a password.
    Bearer(Secret),
}

impl Credentials {
    /// Username and password credentials.
    pub fn basic(username: impl Into<String>, password: impl Into<Secret>) -> Self {
        Credentials::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub(crate) fn to_registry_auth(&self) -> RegistryAuth {
        match self {
            Credentials::Anonymous => RegistryAuth::Anonymous,
            Credentials::Basic { username, password } => {
                RegistryAuth::Basic(username.clone(), password.revealed().to_owned())
            }
            // registries accept identity tokens as the password with an empty user
            Credentials::Bearer(token) => {
                RegistryAuth::Basic(String::new(), token.revealed().to_owned())
            }
        }
    }
}

/// Looks up credentials for a registry host.
pub trait CredentialProvider: Send + Sync {
    /// Credentials to present to `host`.
    fn credentials(&self, host: &str) -> Result<Credentials, RemoteError>;
}

impl<F> CredentialProvider for F
where
    F: Fn(&str) -> Result<Credentials, RemoteError> + Send + Sync,
{
    fn credentials(&self, host: &str) -> Result<Credentials, RemoteError> {
        (self)(host)
    }
}

impl CredentialProvider for Credentials {
    fn credentials(&self, _host: &str) -> Result<Credentials, RemoteError> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn secret_hidden_debug() {
        let key = "secret garden";
        let secret = Secret::from(key);

        assert!(!format!("{secret:?}").contains("secret garden"));
        assert_eq!(&format!("{secret:?}"), "Secret(****)");
        assert_eq!(secret.revealed(), key);
    }

    #[test]
    fn credentials_debug_is_redacted() {
        let creds = Credentials::basic("robot", "hunter2");
        let debug = format!("{creds:?}");
        assert!(debug.contains("robot"));
        assert!(!debug.contains("hunter2"));

        let token = Credentials::Bearer(Secret::from("opaque-token"));
        assert!(!format!("{token:?}").contains("opaque-token"));
    }

    #[test]
    fn registry_auth_mapping() {
        assert!(matches!(
            Credentials::Anonymous.to_registry_auth(),
            RegistryAuth::Anonymous
        ));

        match Credentials::basic("robot", "hunter2").to_registry_auth() {
            RegistryAuth::Basic(user, pass) => {
                assert_eq!(user, "robot");
                assert_eq!(pass, "hunter2");
            }
            _ => panic!("expected basic auth"),
        }

        match Credentials::Bearer(Secret::from("tok")).to_registry_auth() {
            RegistryAuth::Basic(user, pass) => {
                assert!(user.is_empty());
                assert_eq!(pass, "tok");
            }
            _ => panic!("expected basic auth"),
        }
    }

    #[test]
    fn closures_provide_credentials() {
        let provider = |host: &str| -> Result<Credentials, RemoteError> {
            if host == "registry.example.com" {
                Ok(Credentials::basic("ci", "pw"))
            } else {
                Ok(Credentials::Anonymous)
            }
        };

        assert!(matches!(
            provider.credentials("registry.example.com").unwrap(),
            Credentials::Basic { .. }
        ));
        assert!(matches!(
            provider.credentials("docker.io").unwrap(),
            Credentials::Anonymous
        ));
    }
}
