//! Magic link creation and redemption
//!
//! A link stores the unsigned claim blob. The JWT is signed only when the
//! link is redeemed, inside the same transaction that consumed it, so a
//! failed signature rolls the consumption back.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use sqlx::SqliteConnection;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{AtRestPolicy, JwkRepository, LinkRepository};
use crate::models::{
    CreateMagicLink, MagicLinkCreateParams, MagicLinkCreateResults, ServiceAccount,
    SigningKeyQuery, DEFAULT_REDIRECT_QUERY_KEY,
};
use crate::services::jwt::{self, JwtClaims, JwtService};
use crate::services::redirector::RedirectArgs;
use crate::utils::validation::{resolve_lifespan, validate_http_url, validate_query_key};
use crate::utils::{AppError, AppResult};

pub struct MagicLinkService {
    jwt: JwtService,
    policy: Arc<AtRestPolicy>,
    redirect_endpoint: Url,
    secret_query_key: String,
    default_lifespan_secs: u64,
    max_lifespan_secs: u64,
}

impl MagicLinkService {
    pub fn new(config: &AppConfig, jwt: JwtService, policy: Arc<AtRestPolicy>) -> Result<Self> {
        Ok(Self {
            jwt,
            policy,
            redirect_endpoint: config.server.redirect_endpoint()?,
            secret_query_key: config.server.secret_query_key.clone(),
            default_lifespan_secs: config.limits.link_lifespan_default_secs,
            max_lifespan_secs: config.limits.link_lifespan_max_secs,
        })
    }

    pub fn secret_query_key(&self) -> &str {
        &self.secret_query_key
    }

    /// Public URL that redeems `secret`
    pub fn link_for(&self, secret: Uuid) -> String {
        let mut url = self.redirect_endpoint.clone();
        url.query_pairs_mut()
            .append_pair(&self.secret_query_key, &secret.to_string());
        url.into()
    }

    pub async fn create(
        &self,
        conn: &mut SqliteConnection,
        account: &ServiceAccount,
        params: &MagicLinkCreateParams,
    ) -> AppResult<MagicLinkCreateResults> {
        let redirect_url = validate_http_url(&params.redirect_url, "redirectURL")?;
        let redirect_query_key = params
            .redirect_query_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .unwrap_or(DEFAULT_REDIRECT_QUERY_KEY);
        validate_query_key(redirect_query_key)?;

        let lifespan = resolve_lifespan(
            params.lifespan_seconds,
            self.default_lifespan_secs,
            self.max_lifespan_secs,
            "Magic link",
        )?;
        let claims = self.jwt.prepare_claims(&params.jwt_create_params, account)?;
        let jwt_alg = params.jwt_create_params.jwt_alg.clone();

        let args = CreateMagicLink {
            sa_uuid: account.uuid,
            expires_at: Utc::now() + lifespan,
            claims: claims.into_bytes(),
            jwt_alg: jwt_alg.clone(),
            redirect_url: redirect_url.into(),
            redirect_query_key: redirect_query_key.to_string(),
        };
        let created = LinkRepository::new(conn, &self.policy).create(&args).await?;

        let Some(kid) = created.jwt_key_id else {
            return Err(jwt::missing_key_error(jwt_alg.as_deref()));
        };

        info!(sa_uuid = %account.uuid, kid = %kid, "Created magic link");
        Ok(MagicLinkCreateResults {
            magic_link: self.link_for(created.secret),
            secret: created.secret,
        })
    }

    /// Consume the link and sign its JWT
    ///
    /// Fails with `NotFound` when the link is absent, expired or already used.
    pub async fn redeem(&self, conn: &mut SqliteConnection, secret: Uuid) -> AppResult<RedirectArgs> {
        let link = LinkRepository::new(&mut *conn, &self.policy)
            .read_and_expire(secret)
            .await?
            .ok_or_else(|| AppError::NotFound("Magic link not found".to_string()))?;

        let mut keys = JwkRepository::new(conn, &self.policy);
        let pinned = match link.jwt_key_id.as_deref() {
            Some(kid) => {
                let key = keys.key_read(kid).await?;
                if key.is_none() {
                    warn!(kid = %kid, "Pinned signing key is gone, using the signing default");
                }
                key
            }
            None => None,
        };
        let key = match pinned {
            Some(key) => key,
            None => keys
                .read_signing_key(&SigningKeyQuery::default())
                .await?
                .ok_or_else(|| jwt::missing_key_error(None))?,
        };

        let claims = JwtClaims::from_stored(link.claims);
        let method = link
            .jwt_signing_method
            .as_deref()
            .filter(|method| *method == key.alg);
        let token = jwt::sign(&claims, &key, method)?;

        info!(sa_uuid = %link.sa_uuid, kid = %key.kid, "Redeemed magic link");
        Ok(RedirectArgs {
            jwt: token,
            redirect_url: link.redirect_url,
            redirect_query_key: link.redirect_query_key,
        })
    }
}
