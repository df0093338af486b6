//! HTTP server setup

use actix_web::{App, HttpServer, dev::Server, middleware::Logger, web};

use crate::api::{rest, sys, ws};
use crate::model::AppState;

/// Registers every route of a node
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/sys")
            .route("/cli", web::post().to(sys::cli))
            .route("/shutdown", web::post().to(sys::shutdown))
            .route("/ws", web::get().to(ws::replication_socket)),
    )
    .service(web::resource(["/api/{table}", "/api/{table}/{id}"]).route(web::route().to(rest::dispatch)));
}

/// Creates and binds the main HTTP server. OS signals are handled by the
/// shared shutdown signal, not by actix.
pub fn main_server(state: web::Data<AppState>, address: String, port: u16) -> Result<Server, std::io::Error> {
    Ok(HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(state.clone())
            .configure(routes)
    })
    .disable_signals()
    .bind((address, port))?
    .run())
}
