use actix_web::{HttpResponse, Responder, Scope, web};
use mime_guess::from_path;
use rust_embed::RustEmbed;

/// The dashboard frontend, baked into the binary.
#[derive(RustEmbed)]
#[folder = "./frontend/dist/"]
struct DashboardAssets;

async fn embedded_assets_handler(
    path: web::Path<String>,
    index_file_name_data: web::Data<String>,
) -> impl Responder {
    let file_path = if path.is_empty() {
        index_file_name_data.as_str()
    } else {
        path.as_str()
    };

    if let Some(embedded_file) = DashboardAssets::get(file_path) {
        let mime_type = from_path(file_path).first_or_octet_stream();

        HttpResponse::Ok()
            .content_type(mime_type.to_string())
            .body(embedded_file.data)
    } else {
        HttpResponse::NotFound().body("File not found")
    }
}

pub fn assets(path_prefix: &str, index_file_name: &str) -> Scope {
    let index_data = web::Data::new(index_file_name.to_string());
    web::scope(path_prefix)
        .app_data(index_data)
        .route("/{path:.*}", web::get().to(embedded_assets_handler))
}
