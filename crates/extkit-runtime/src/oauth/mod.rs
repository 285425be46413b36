//! OAuth sign-in: the session state machine, callback parsing, PKCE and token stores.

mod callback;
mod pkce;
mod session;
mod store;

pub use callback::{Callback, CallbackPayload};
pub use pkce::{PkcePair, challenge_for};
pub use session::{
    AuthState, CallbackOutcome, CodeExchange, OAuthSession, ProviderConfig,
};
pub use store::{FileTokenStore, MemoryTokenStore, StoredToken};
