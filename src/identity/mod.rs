//! Browser identities and the session pool that rotates them

mod fingerprint;
mod session;

pub use fingerprint::{BrowserFingerprint, FingerprintGenerator, Viewport};
pub use session::{Cookie, Identity, IdentityOutcome, SessionManager};
