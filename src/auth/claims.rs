use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session JWT payload. Sessions are client-held and stateless; the token
/// carries nothing beyond the user id and its validity window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub iat: usize,  // issued at (unix timestamp)
    pub exp: usize,  // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
}
