/*!
# Helpdesk Auth

Authentication core for the helpdesk web application.

Three ways in, one session out:

- Local administrator accounts (username + password, role `Admin`)
- SAML 2.0 SSO against the organisation's IdP (role `Staff`)
- OpenID Connect authorization code flow (role `Staff`)

Whatever the path, claims are normalized into an [`Identity`], stored in an
AES-GCM sealed, HTTP-only session cookie, and every page request passes the
authorization gate, which sends each role to its own section of the site.

## Quick Start

```rust,no_run
use helpdesk_auth::{api::{ApiServer, AppState}, config::ConfigBuilder};

# #[tokio::main]
# async fn main() -> Result<(), Box<dyn std::error::Error>> {
let config = ConfigBuilder::new()
    .add_file("config/helpdesk-auth.toml", false)
    .load()?;

let state = AppState::from_config(config)?;
ApiServer::new(state).start().await?;
# Ok(())
# }
```

## Security Considerations

- Serve over HTTPS; session and context cookies are `Secure` by default
- `session.secret` must be 32 random bytes, base64 encoded
- Federated users are never granted `Admin`, whatever their claims say
*/

pub mod api;
pub mod authorization;
pub mod claims;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod errors;
pub mod identity;
pub mod methods;
pub mod security;
pub mod session;

pub use authorization::{GateDecision, GatePolicy, decide};
pub use config::{AppConfig, ConfigBuilder};
pub use credentials::{CredentialStore, PasswordCredential};
pub use errors::{AuthError, Result};
pub use identity::{Identity, Role, SourceProtocol};
pub use methods::{FederatedAuthMethod, OidcAuthMethod, SamlAuthMethod};
pub use session::{Session, SessionManager};
