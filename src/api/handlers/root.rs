use axum::response::IntoResponse;

/// Undocumented landing route; useful for load balancers and the curious.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}
