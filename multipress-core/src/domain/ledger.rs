//! Credential ledger row schema
//!
//! The ledger is an append-only audit trail with one row per provisioned
//! instance. The column order is fixed.

use crate::domain::config::{Config, CredentialsConfig};
use crate::domain::identifier::Identifier;

/// One ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRow {
    pub url: String,
    pub username: String,
    pub password: String,
    pub db_username: String,
    pub db_password: String,
    pub db_database: String,
}

impl CredentialRow {
    /// Header row written when the ledger is created
    pub const HEADER: [&'static str; 6] = [
        "URL",
        "Username",
        "Password",
        "DB Username",
        "DB Password",
        "DB Database",
    ];

    pub fn new(config: &Config, identifier: &Identifier, credentials: &CredentialsConfig) -> Self {
        Self {
            url: config.instance_url(identifier),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            db_username: credentials.dbuser.clone(),
            db_password: credentials.dbpassword.clone(),
            db_database: credentials.dbname.clone(),
        }
    }

    pub fn header() -> Vec<String> {
        Self::HEADER.iter().map(|h| h.to_string()).collect()
    }

    /// Fields in ledger column order
    pub fn into_fields(self) -> Vec<String> {
        vec![
            self.url,
            self.username,
            self.password,
            self.db_username,
            self.db_password,
            self.db_database,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fields_follow_header_order() {
        let config = Config::new("example.org", 0, 0);
        let id = Identifier::from("user4");
        let creds = CredentialsConfig {
            dbname: "db".to_string(),
            dbuser: "dbu".to_string(),
            dbpassword: "dbp".to_string(),
            username: "u".to_string(),
            password: "p".to_string(),
            email: "e".to_string(),
        };

        let fields = CredentialRow::new(&config, &id, &creds).into_fields();
        assert_eq!(fields.len(), CredentialRow::HEADER.len());
        assert_eq!(
            fields,
            vec!["https://user4.example.org", "u", "p", "dbu", "dbp", "db"]
        );
    }
}
