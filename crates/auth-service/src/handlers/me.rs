//! Current user endpoint.

use crate::middleware::CurrentUser;
use axum::Json;
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub current_user_id: String,
    pub current_roles: Vec<String>,
}

/// GET /api/v1/me
///
/// Identity of the bearer token's subject. Requires authentication.
pub async fn get_me(user: CurrentUser) -> Json<MeResponse> {
    Json(MeResponse {
        current_user_id: user.user_id().to_string(),
        current_roles: user.roles().into_iter().map(str::to_string).collect(),
    })
}
