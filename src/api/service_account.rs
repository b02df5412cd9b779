//! Service account administration

use axum::{http::StatusCode, routing::post, Json, Router};
use tracing::info;

use crate::api::JsonBody;
use crate::db::ServiceAccountRepository;
use crate::middleware::RequestTx;
use crate::models::{
    CreateServiceAccount, RequestMetadata, ServiceAccount, ServiceAccountCreateRequest,
    ServiceAccountCreateResponse, ServiceAccountCreateResults,
};
use crate::utils::AppResult;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/create", post(create_service_account))
}

async fn create_service_account(
    admin: ServiceAccount,
    tx: RequestTx,
    JsonBody(_request): JsonBody<ServiceAccountCreateRequest>,
) -> AppResult<(StatusCode, Json<ServiceAccountCreateResponse>)> {
    let service_account = {
        let mut conn = tx.conn().await?;
        ServiceAccountRepository::new(&mut conn)
            .create(&CreateServiceAccount::generate())
            .await?
    };

    info!(
        sa_uuid = %service_account.uuid,
        created_by = %admin.uuid,
        "Created service account"
    );

    Ok((
        StatusCode::CREATED,
        Json(ServiceAccountCreateResponse {
            service_account_create_results: ServiceAccountCreateResults { service_account },
            request_metadata: RequestMetadata::current(),
        }),
    ))
}
