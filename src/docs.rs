use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::modules::auth::dto::*;
use crate::modules::ffmpeg::dto::{ProcessForm, StartResponse};
use crate::modules::file::dto::{EditFileRequest, FileResponse, OwnsResponse, StatsResponse};
use crate::workers::options::ProcessingOptions;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::auth::handler::register,
        crate::modules::auth::handler::login,
        crate::modules::auth::handler::logout,
        crate::modules::auth::handler::get_me,
        crate::modules::auth::handler::validate,
        crate::modules::ffmpeg::handler::start,
        crate::modules::ffmpeg::handler::progress,
        crate::modules::ffmpeg::handler::process,
        crate::modules::file::handler::upload_file,
        crate::modules::file::handler::list_files,
        crate::modules::file::handler::search_files,
        crate::modules::file::handler::get_file,
        crate::modules::file::handler::edit_file,
        crate::modules::file::handler::delete_file,
        crate::modules::file::handler::owns_file,
        crate::modules::file::handler::stream_file,
    ),
    components(
        schemas(
            RegisterRequest, LoginRequest, AuthResponse, UserResponse, MeResponse,
            StartResponse, ProcessForm, ProcessingOptions,
            FileResponse, StatsResponse, EditFileRequest, OwnsResponse,
        )
    ),
    tags(
        (name = "Auth", description = "Authentication endpoints"),
        (name = "FFmpeg", description = "On-demand video processing"),
        (name = "Files", description = "Stored videos")
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
