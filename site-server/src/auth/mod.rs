//! Identity: JWT verification and the request middleware

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, Identity, JwtService, PrincipalKind};
pub use middleware::require_identity;
