use crate::prelude::*;

const OPENAPI_JSON: &str = "/api-doc/openapi.json";

pub fn root() -> Router {
    let router = Router::new()
        .hoop(crate::utils::logger::Logger)
        .hoop(Timeout::new(std::time::Duration::from_secs(30)))
        .push(crate::auth::router())
        .push(crate::pages::router());
    let doc = openapi_doc(&router);
    router
        .unshift(doc.into_router(OPENAPI_JSON))
        .unshift(Scalar::new(OPENAPI_JSON).into_router("scalar"))
}

fn openapi_doc(to_document: &Router) -> OpenApi {
    OpenApi::new("Gatehouse API", "0.1.0").merge_router(to_document)
}
