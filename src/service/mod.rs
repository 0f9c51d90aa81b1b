pub mod auth_state;
pub mod key_files;
pub mod key_router;

pub use auth_state::{AuthState, AuthStateOptions, ErrorPolicy};
pub use key_files::KeyFileStore;
pub use key_router::{CREDS_KEY, KeyRouter, KeyRouting};
