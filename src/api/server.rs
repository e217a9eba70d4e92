use crate::api::routes;
use crate::config::SharedConfig;
use crate::storage::Storage;
use std::future::Future;
use std::net::SocketAddr;

#[derive(Clone)]
pub(super) struct AppState {
    pub config: SharedConfig,
    pub storage: Storage,
}

pub fn new(
    config: SharedConfig,
    storage: Storage,
) -> impl Future<Output = hyper::Result<()>> {
    axum::Server::bind(&config.api_bind_addr).serve(
        routes::new(AppState { config, storage })
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
}
