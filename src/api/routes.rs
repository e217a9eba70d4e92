use crate::api::api_error::APIError;
use crate::api::model::{HealthCheck, ProviderSpecs, ServiceSpecs};
use crate::api::server::AppState;
use crate::error::Error;
use crate::provider;
use crate::resolver::{self, ResolverAnswer, ResolverQuery};
use crate::services::registry::{self, ServiceSchema};
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::WithRejection;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub(super) fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/service_specs", get(service_specs))
        .route("/service_specs/:kind", get(service_spec))
        .route("/provider_specs", get(provider_specs))
        .route("/resolver", post(resolve))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Result<Json<HealthCheck>, APIError> {
    Ok(Json(HealthCheck {
        ok: "healthy",
        schema_version: state.storage.schema_version().await?,
    }))
}

#[allow(clippy::unused_async)]
async fn service_specs() -> Json<ServiceSpecs> {
    Json(ServiceSpecs(registry::global().infos()))
}

#[allow(clippy::unused_async)]
async fn service_spec(Path(kind): Path<String>) -> Result<Json<ServiceSchema>, APIError> {
    registry::global()
        .schema(&kind)
        .map(Json)
        .ok_or_else(|| Error::UnknownServiceKind(kind).into())
}

#[allow(clippy::unused_async)]
async fn provider_specs() -> Json<ProviderSpecs> {
    Json(ProviderSpecs(
        provider::specs()
            .into_iter()
            .map(|spec| (spec.provider_type, spec))
            .collect(),
    ))
}

async fn resolve(
    State(state): State<AppState>,
    WithRejection(Json(query), _): WithRejection<Json<ResolverQuery>, APIError>,
) -> Result<Json<ResolverAnswer>, APIError> {
    let answer = resolver::resolve(&query, state.config.resolver_timeout).await;
    if let Err(err) = &answer {
        tracing::debug!("query for {} {} failed: {err}", query.domain, query.rrtype);
    }
    Ok(Json(answer?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn service_specs_list_every_kind() {
        let Json(specs) = service_specs().await;
        assert!(specs.0.contains_key("abstract.Origin"));
        assert!(specs.0.contains_key("svcs.Orphan"));
        let json = serde_json::to_value(&specs).unwrap();
        assert_eq!(json["svcs.MXs"]["_svctype"], "svcs.MXs");
    }

    #[tokio::test]
    async fn service_spec_lookup() {
        let Json(schema) = service_spec(Path("svcs.TLSA".to_string())).await.ok().unwrap();
        assert!(!schema.fields.is_empty());

        let missing = service_spec(Path("svcs.Nope".to_string())).await.err().unwrap();
        assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn provider_specs_are_keyed_by_type() {
        let Json(specs) = provider_specs().await;
        assert!(specs.0.contains_key(provider::memory::TYPE));
        assert!(specs.0.contains_key(provider::zonefile::TYPE));
    }
}
