//! Business logic services

pub mod bootstrap;
pub mod cleanup;
pub mod crypto;
pub mod email;
pub mod jwks;
pub mod jwt;
pub mod keys;
pub mod magic_link;
pub mod otp;
pub mod redirector;

pub use cleanup::{purge_expired, spawn_expired_cleanup, CleanupStats};
pub use crypto::{AtRestCipher, CryptoError};
pub use email::{provider_from_config, Email, EmailProvider, LogEmailProvider, SmtpEmailProvider};
pub use jwks::{JwksCache, JwksSnapshot};
pub use jwt::{JwtClaims, JwtService};
pub use magic_link::MagicLinkService;
pub use otp::OtpService;
pub use redirector::{
    InterstitialForm, PlainRedirector, RecaptchaRedirector, RedirectArgs, Redirector,
};
