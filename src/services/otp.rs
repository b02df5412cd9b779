//! One-time password generation and validation

use chrono::Utc;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::OsRng;
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::LimitsConfig;
use crate::db::OtpRepository;
use crate::models::{CreateOtp, OtpCreateParams, ServiceAccount};
use crate::utils::validation::resolve_lifespan;
use crate::utils::{AppError, AppResult};

pub const ALPHA_LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
pub const ALPHA_UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
pub const NUMERIC: &str = "0123456789";

/// Longest code that may be requested
pub const MAX_OTP_LENGTH: usize = 12;

/// Union of the requested character classes
pub fn alphabet(params: &OtpCreateParams) -> AppResult<Vec<char>> {
    let mut chars = Vec::new();
    if params.char_set_alpha_lower {
        chars.extend(ALPHA_LOWER.chars());
    }
    if params.char_set_alpha_upper {
        chars.extend(ALPHA_UPPER.chars());
    }
    if params.char_set_numeric {
        chars.extend(NUMERIC.chars());
    }

    if chars.is_empty() {
        return Err(AppError::BadRequest(
            "At least one OTP character set must be selected".to_string(),
        ));
    }
    Ok(chars)
}

/// Draw `length` characters uniformly from `alphabet` using the OS CSPRNG
pub fn generate_code(alphabet: &[char], length: usize) -> String {
    if alphabet.is_empty() {
        return String::new();
    }
    let index = Uniform::new(0, alphabet.len());
    (0..length)
        .map(|_| alphabet[index.sample(&mut OsRng)])
        .collect()
}

#[derive(Debug, Clone)]
pub struct OtpService {
    default_lifespan_secs: u64,
    max_lifespan_secs: u64,
    default_length: usize,
}

impl OtpService {
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            default_lifespan_secs: limits.otp_lifespan_default_secs,
            max_lifespan_secs: limits.otp_lifespan_max_secs,
            default_length: limits.otp_length_default,
        }
    }

    fn resolve_length(&self, requested: usize) -> AppResult<usize> {
        let length = if requested == 0 {
            self.default_length
        } else {
            requested
        };

        if !(1..=MAX_OTP_LENGTH).contains(&length) {
            return Err(AppError::BadRequest(format!(
                "OTP length must be between 1 and {MAX_OTP_LENGTH}"
            )));
        }
        Ok(length)
    }

    /// Generate and store a code, returning its public id and the code
    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        account: &ServiceAccount,
        params: &OtpCreateParams,
    ) -> AppResult<(Uuid, String)> {
        let chars = alphabet(params)?;
        let length = self.resolve_length(params.length)?;
        let lifespan = resolve_lifespan(
            params.lifespan_seconds,
            self.default_lifespan_secs,
            self.max_lifespan_secs,
            "OTP",
        )?;

        let otp = CreateOtp {
            id: Uuid::new_v4(),
            sa_uuid: account.uuid,
            code: generate_code(&chars, length),
            expires_at: Utc::now() + lifespan,
        };
        OtpRepository::new(conn).create(&otp).await?;

        info!(otp_id = %otp.id, sa_uuid = %account.uuid, "Created OTP");
        Ok((otp.id, otp.code))
    }

    /// Consume one of `account`'s codes
    ///
    /// Fails with `NotFound` when the OTP is absent, expired, used, owned by
    /// another account or the code is wrong. A wrong code still burns the OTP.
    pub async fn validate(
        &self,
        conn: &mut SqliteConnection,
        account: &ServiceAccount,
        id: Uuid,
        code: &str,
    ) -> AppResult<()> {
        if OtpRepository::new(conn).validate(id, account.uuid, code).await? {
            info!(otp_id = %id, sa_uuid = %account.uuid, "Validated OTP");
            Ok(())
        } else {
            debug!(otp_id = %id, sa_uuid = %account.uuid, "OTP validation failed");
            Err(AppError::NotFound("OTP not found".to_string()))
        }
    }
}
