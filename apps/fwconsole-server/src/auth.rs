//! Static bearer-token authentication.

use async_trait::async_trait;
use fwconsole_gateway::OperatorAuthenticator;
use secrecy::{ExposeSecret, SecretString};

use crate::config::OperatorConfig;

/// Operators and their tokens, fixed at startup.
pub struct StaticTokens {
    operators: Vec<(String, SecretString)>,
}

impl StaticTokens {
    #[must_use]
    pub fn new(operators: &[OperatorConfig]) -> Self {
        Self {
            operators: operators
                .iter()
                .map(|o| (o.name.clone(), o.token.clone()))
                .collect(),
        }
    }
}

#[async_trait]
impl OperatorAuthenticator for StaticTokens {
    async fn authenticate(&self, token: Option<&str>) -> Option<String> {
        let token = token?;
        self.operators
            .iter()
            .find(|(_, t)| t.expose_secret() == token)
            .map(|(name, _)| name.clone())
    }
}
