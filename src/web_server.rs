use crate::config::AppConfig;
use crate::error::AppError;
use crate::ingest::Upload;
use crate::library::PhotoLibrary;
use crate::models::{ImageId, ImageRecord, TagProvenance, UserId};
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

const USER_HEADER: &str = "X-User-Id";
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Serialize, Debug)]
struct WebImage {
    #[serde(flatten)]
    record: ImageRecord,
    /// Thumbnail URL under the static upload route.
    url: String,
    tags: Vec<String>,
}

#[derive(Serialize, Debug)]
struct WebHit {
    #[serde(flatten)]
    image: WebImage,
    score: f32,
}

#[derive(Deserialize, Debug)]
struct UploadQuery {
    filename: Option<String>,
    capture_time: Option<String>,
}

#[derive(Deserialize, Debug)]
struct SearchQuery {
    #[serde(default)]
    keyword: String,
    #[serde(default)]
    favorites: bool,
}

#[derive(Deserialize, Debug)]
struct EditedBody {
    base64: String,
}

#[derive(Deserialize, Debug)]
struct SemanticBody {
    query: String,
}

#[derive(Deserialize, Debug)]
struct TagBody {
    image_ids: Vec<ImageId>,
    tags: Vec<String>,
}

#[derive(Deserialize, Debug)]
struct StatsQuery {
    provenance: Option<String>,
}

/// The acting user, as asserted by the authentication layer in front of this service.
fn acting_user(req: &HttpRequest) -> Result<UserId, AppError> {
    let raw = req
        .headers()
        .get(USER_HEADER)
        .ok_or_else(|| AppError::InvalidInput(format!("missing {} header", USER_HEADER)))?;
    raw.to_str()
        .ok()
        .and_then(|s| s.trim().parse::<UserId>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::InvalidInput(format!("invalid {} header", USER_HEADER)))
}

/// Epoch milliseconds, RFC 3339 (wall-clock part kept), or `YYYY-MM-DDTHH:MM:SS`.
fn parse_capture_time(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(millis) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis).map(|t| t.naive_utc());
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
}

/// Comma-separated provenance names; absent means manual tags only.
fn parse_provenances(raw: Option<&str>) -> Result<Vec<TagProvenance>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(vec![TagProvenance::Manual]),
        Some("all") => Ok(TagProvenance::ALL.to_vec()),
        Some(list) => list
            .split(',')
            .map(|p| p.parse::<TagProvenance>().map_err(AppError::InvalidInput))
            .collect(),
    }
}

async fn web_image(library: &PhotoLibrary, record: ImageRecord) -> Result<WebImage, AppError> {
    let tags = library.tag_names(record.id).await?;
    Ok(WebImage {
        url: format!("/uploads/{}", record.thumbnail_path),
        record,
        tags,
    })
}

async fn upload_image(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    query: web::Query<UploadQuery>,
    body: web::Bytes,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let query = query.into_inner();
    let capture_time_hint = match query.capture_time.as_deref() {
        Some(raw) => Some(
            parse_capture_time(raw)
                .ok_or_else(|| AppError::InvalidInput(format!("unreadable capture_time '{}'", raw)))?,
        ),
        None => None,
    };
    log::debug!("Upload from user {}: {:?} ({} bytes)", user_id, query.filename, body.len());

    let record = library
        .ingest(Upload {
            user_id,
            original_name: query.filename.unwrap_or_else(|| "upload.jpg".into()),
            bytes: body.to_vec(),
            capture_time_hint,
        })
        .await?;
    Ok(HttpResponse::Created().json(web_image(&library, record).await?))
}

async fn save_edited(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    body: web::Json<EditedBody>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let record = library.save_edited(user_id, &body.base64).await?;
    Ok(HttpResponse::Created().json(web_image(&library, record).await?))
}

async fn get_images(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    query: web::Query<SearchQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    log::debug!("Received request for images with query: {:?}", query);

    let records = library.search(user_id, &query.keyword, query.favorites).await?;
    let mut images = Vec::with_capacity(records.len());
    for record in records {
        images.push(web_image(&library, record).await?);
    }
    Ok(HttpResponse::Ok().json(images))
}

async fn get_image(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    path: web::Path<ImageId>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    Ok(HttpResponse::Ok().json(library.detail(path.into_inner(), user_id).await?))
}

async fn delete_image(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    path: web::Path<ImageId>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    library.delete(path.into_inner(), user_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn toggle_favorite(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    path: web::Path<ImageId>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let id = path.into_inner();
    let is_favorite = library.toggle_favorite(id, user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "id": id, "is_favorite": is_favorite })))
}

async fn analyze_image(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    path: web::Path<ImageId>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let tags = library.analyze(path.into_inner(), user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "tags": tags })))
}

async fn semantic_search(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    body: web::Json<SemanticBody>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let hits = library.search_semantic(user_id, &body.query).await?;
    let ids: Vec<ImageId> = hits.iter().map(|h| h.image_id).collect();
    let mut by_id: HashMap<ImageId, ImageRecord> =
        library.records(&ids).await?.into_iter().map(|r| (r.id, r)).collect();

    let mut results = Vec::with_capacity(hits.len());
    for hit in hits {
        if let Some(record) = by_id.remove(&hit.image_id) {
            results.push(WebHit {
                score: hit.score,
                image: web_image(&library, record).await?,
            });
        }
    }
    Ok(HttpResponse::Ok().json(results))
}

async fn add_tags(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    body: web::Json<TagBody>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let body = body.into_inner();
    if body.image_ids.is_empty() {
        return Err(AppError::InvalidInput("image_ids must not be empty".into()));
    }
    let created = library.add_tags(user_id, &body.image_ids, &body.tags).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "created": created })))
}

async fn tag_stats(
    req: HttpRequest,
    library: web::Data<PhotoLibrary>,
    query: web::Query<StatsQuery>,
) -> Result<HttpResponse, AppError> {
    let user_id = acting_user(&req)?;
    let provenances = parse_provenances(query.provenance.as_deref())?;
    Ok(HttpResponse::Ok().json(library.tag_stats(user_id, &provenances).await?))
}

/// Register the API routes and the static upload directory.
pub fn configure(cfg: &mut web::ServiceConfig, upload_directory: &str) {
    cfg.app_data(web::PayloadConfig::new(MAX_UPLOAD_BYTES))
        .app_data(web::JsonConfig::default().limit(MAX_UPLOAD_BYTES))
        .service(
            web::scope("/api")
                .route("/images", web::post().to(upload_image))
                .route("/images", web::get().to(get_images))
                .route("/images/edited", web::post().to(save_edited))
                .route("/images/{id}", web::get().to(get_image))
                .route("/images/{id}", web::delete().to(delete_image))
                .route("/images/{id}/favorite", web::post().to(toggle_favorite))
                .route("/images/{id}/analyze", web::post().to(analyze_image))
                .route("/search/semantic", web::post().to(semantic_search))
                .route("/tags", web::post().to(add_tags))
                .route("/tags/stats", web::get().to(tag_stats)),
        )
        .service(actix_files::Files::new("/uploads", upload_directory));
}

pub async fn start_web_server(config: Arc<AppConfig>, library: Arc<PhotoLibrary>) -> std::io::Result<()> {
    let port = config.web_port;
    let library_data = web::Data::from(library);
    let upload_directory = config.upload_directory.clone();

    log::info!("Starting web server on port: {}", port);
    log::debug!("Serving uploads from {}", upload_directory);

    HttpServer::new(move || {
        App::new()
            .app_data(library_data.clone())
            .configure(|cfg| configure(cfg, &upload_directory))
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
