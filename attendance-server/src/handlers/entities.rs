use crate::{
    error::{ApiError, ResultExt},
    server::AppState,
};
use actix_web::{web, HttpRequest, HttpResponse};
use attendance_logic::{
    auth::Role,
    types::{NewTenant, UpdateTenant},
};
use tracing_actix_web::RequestId;
use uuid::Uuid;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/entities")
            .route("", web::post().to(create))
            .route("", web::get().to(list))
            .route("/{id}", web::get().to(get))
            .route("/{id}", web::put().to(update))
            .route("/{id}", web::delete().to(delete)),
    );
}

async fn create(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    body: web::Json<NewTenant>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::SuperAdmin).api(request_id)?;

    let tenant = state
        .entities
        .create(body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(tenant))
}

/// Cross-tenant listing, super admins only.
async fn list(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::SuperAdmin).api(request_id)?;

    let tenants = state.entities.list().await.api(request_id)?;
    Ok(HttpResponse::Ok().json(tenants))
}

async fn get(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    let entity_id = path.into_inner();
    claims.authorize_tenant(entity_id).api(request_id)?;

    let tenant = state.entities.get(entity_id).await.api(request_id)?;
    Ok(HttpResponse::Ok().json(tenant))
}

async fn update(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
    body: web::Json<UpdateTenant>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    let entity_id = path.into_inner();
    claims.authorize_tenant(entity_id).api(request_id)?;
    claims.require_role(Role::EntityOwner).api(request_id)?;

    let tenant = state
        .entities
        .update(entity_id, body.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().json(tenant))
}

async fn delete(
    state: web::Data<AppState>,
    req: HttpRequest,
    request_id: RequestId,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let claims = state.authenticate(&req).api(request_id)?;
    claims.require_role(Role::SuperAdmin).api(request_id)?;

    state
        .entities
        .delete(path.into_inner())
        .await
        .api(request_id)?;
    Ok(HttpResponse::Ok().finish())
}
