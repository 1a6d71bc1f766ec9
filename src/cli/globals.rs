use secrecy::SecretString;

/// Vault connection state shared by everything that reads secrets.
#[derive(Debug, Clone)]
pub struct GlobalArgs {
    pub vault_url: String,
    pub vault_token: SecretString,
    pub kv_mount: String,
    pub kv_path: String,
}

impl GlobalArgs {
    #[must_use]
    pub fn new(vault_url: String, kv_mount: String, kv_path: String) -> Self {
        Self {
            vault_url,
            vault_token: SecretString::default(),
            kv_mount,
            kv_path,
        }
    }

    pub fn set_token(&mut self, token: SecretString) {
        self.vault_token = token;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_global_args() {
        let mut args = GlobalArgs::new(
            "https://localhost:8200".to_string(),
            "secret".to_string(),
            "custos/signing-key".to_string(),
        );
        assert_eq!(args.vault_url, "https://localhost:8200");
        assert_eq!(args.vault_token.expose_secret(), "");

        args.set_token(SecretString::from("hvs.example".to_string()));
        assert_eq!(args.vault_token.expose_secret(), "hvs.example");
    }
}
