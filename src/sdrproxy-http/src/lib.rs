//! HTTP wire protocol: `POST /api/rx/` opens (or shares) a subscription and
//! streams its I/Q bytes; `GET /api/rx/` and `GET /api/sdr/` list the
//! registry's current signals and backing hardware.

use std::sync::Arc;

use actix_web::http::header;
use actix_web::{web, Error, HttpResponse};
use bytes::Bytes;
use futures_util::stream;

use sdrproxy_core::RxRequest;
use sdrproxy_registry::Registry;

/// Tears a signal down when its streaming response body goes away, whether
/// that's a clean end-of-stream or the client disconnecting mid-stream.
/// Mirrors the donor's `defer s.Close()` right after opening a subscription.
struct CloseOnDrop {
    registry: Arc<Registry>,
    name: String,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let name = std::mem::take(&mut self.name);
        tokio::spawn(async move {
            if let Err(e) = registry.close_signal(&name).await {
                tracing::warn!("error closing signal {name}: {e}");
            }
        });
    }
}

async fn open_rx(
    registry: web::Data<Arc<Registry>>,
    req: web::Json<RxRequest>,
) -> Result<HttpResponse, Error> {
    let opened = registry
        .open_signal(req.into_inner())
        .await
        .map_err(|e| actix_web::error::ErrorInternalServerError(e.to_string()))?;

    let response = opened.entry.response().await.ok_or_else(|| {
        actix_web::error::ErrorInternalServerError("signal opened without a response")
    })?;
    let signal_header =
        serde_json::to_string(&response).map_err(actix_web::error::ErrorInternalServerError)?;

    let band = opened.entry.request.band();
    let filename = format!("{}:[{},{}].iq8", band.center, band.begin(), band.end());

    let guard = CloseOnDrop {
        registry: registry.get_ref().clone(),
        name: opened.entry.request.name.clone(),
    };

    let body = stream::unfold((opened, guard), |(mut opened, guard)| async move {
        let batch = opened.mux_subscription.recv().await?;
        let encoded = {
            let mut pipeline = opened.pipeline.lock().await;
            let processed = pipeline.process(&batch);
            sdrproxy_core::iq::encode_batch(&processed)
        };
        Some((Ok::<Bytes, Error>(Bytes::from(encoded)), (opened, guard)))
    });

    Ok(HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "application/octet-stream"))
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("inline; filename=\"{filename}\""),
        ))
        .insert_header(("Signal", signal_header))
        .streaming(body))
}

async fn list_rx(registry: web::Data<Arc<Registry>>) -> HttpResponse {
    HttpResponse::Ok().json(registry.list().await)
}

async fn list_sdr(registry: web::Data<Arc<Registry>>) -> HttpResponse {
    HttpResponse::Ok().json(registry.list_radios().await)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/rx/")
            .route(web::post().to(open_rx))
            .route(web::get().to(list_rx)),
    )
    .service(web::resource("/api/sdr/").route(web::get().to(list_sdr)));
}
