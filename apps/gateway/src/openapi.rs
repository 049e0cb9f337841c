use utoipa::OpenApi;

/// OpenAPI document for the gateway's public surface.
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::submit::submit_handler,
        crate::api::submissions::get_submission_handler,
    ),
    components(schemas(
        domain_submissions::SubmitRequest,
        domain_submissions::SubmissionView,
        domain_submissions::SubmissionStatus,
    )),
    tags(
        (name = "submissions", description = "Code submission intake and lookup")
    )
)]
pub struct ApiDoc;
